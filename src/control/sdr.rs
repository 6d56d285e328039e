//! SDR front-end control client
//!
//! Synchronous TCP line protocol to the SDR server's control port: one
//! command per line, one response per command — `OK [value]`,
//! `ERR <code> [message]`, bare `PONG`, or bare `BYE`. This client only
//! starts/stops streaming and adjusts front-end settings; it is not part
//! of the optimization loop, and a missing SDR connection never blocks
//! tuning.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Connect / read / write timeout for control commands.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SdrError {
    #[error("not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parsed control-port response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdrResponse {
    /// `OK` with an optional value payload
    Ack(Option<String>),
    /// `ERR <code> [message]`
    Error(String),
    Pong,
    Bye,
    /// Anything else, passed through verbatim
    Other(String),
}

impl SdrResponse {
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Error(_))
    }

    fn parse(line: &str) -> Self {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("OK") {
            let value = rest.trim();
            if value.is_empty() {
                Self::Ack(None)
            } else {
                Self::Ack(Some(value.to_string()))
            }
        } else if line == "PONG" {
            Self::Pong
        } else if line == "BYE" {
            Self::Bye
        } else if line.starts_with("ERR") {
            Self::Error(line.to_string())
        } else {
            Self::Other(line.to_string())
        }
    }
}

impl std::fmt::Display for SdrResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ack(None) => write!(f, "OK"),
            Self::Ack(Some(v)) => write!(f, "OK {v}"),
            Self::Error(e) => write!(f, "{e}"),
            Self::Pong => write!(f, "PONG"),
            Self::Bye => write!(f, "BYE"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// TCP client for the SDR server control port.
pub struct SdrLink {
    addr: String,
    stream: Option<TcpStream>,
}

impl SdrLink {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Connect with timeout and enable TCP keepalive so a dead server is
    /// detected rather than hanging the next command.
    pub fn connect(&mut self) -> Result<(), SdrError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = self
            .addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SdrError::ConnectionFailed(format!("cannot resolve {}", self.addr)))?;

        let stream = TcpStream::connect_timeout(&addr, COMMAND_TIMEOUT)
            .map_err(|e| SdrError::ConnectionFailed(e.to_string()))?;
        stream.set_read_timeout(Some(COMMAND_TIMEOUT))?;
        stream.set_write_timeout(Some(COMMAND_TIMEOUT))?;

        let sock_ref = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(30))
            .with_interval(Duration::from_secs(10));
        let _ = sock_ref.set_tcp_keepalive(&keepalive);

        info!(address = %self.addr, "SDR control connected");
        self.stream = Some(stream);
        Ok(())
    }

    /// Close the control connection, telling the server goodbye first.
    pub fn disconnect(&mut self) {
        if self.stream.is_some() {
            let _ = self.command("QUIT");
        }
        if self.stream.take().is_some() {
            info!("SDR control disconnected");
        }
    }

    /// Send one command and read its response line.
    pub fn command(&mut self, cmd: &str) -> Result<SdrResponse, SdrError> {
        let stream = self.stream.as_mut().ok_or(SdrError::NotConnected)?;

        stream.write_all(format!("{cmd}\n").as_bytes())?;

        let mut buf = [0u8; 1024];
        let len = stream.read(&mut buf)?;
        if len == 0 {
            self.stream = None;
            return Err(SdrError::ConnectionFailed("connection closed".to_string()));
        }

        let response = SdrResponse::parse(&String::from_utf8_lossy(&buf[..len]));
        debug!(command = %cmd, response = %response, "SDR command");
        Ok(response)
    }

    // Streaming control

    pub fn start(&mut self) -> Result<SdrResponse, SdrError> {
        self.command("START")
    }

    pub fn stop(&mut self) -> Result<SdrResponse, SdrError> {
        self.command("STOP")
    }

    pub fn status(&mut self) -> Result<SdrResponse, SdrError> {
        self.command("STATUS")
    }

    pub fn ping(&mut self) -> Result<SdrResponse, SdrError> {
        self.command("PING")
    }

    pub fn version(&mut self) -> Result<SdrResponse, SdrError> {
        self.command("VER")
    }

    // Front-end settings

    /// Center frequency in Hz.
    pub fn set_frequency(&mut self, freq_hz: f64) -> Result<SdrResponse, SdrError> {
        self.command(&format!("SET_FREQ {freq_hz:.0}"))
    }

    /// Gain reduction in dB.
    pub fn set_gain(&mut self, gain_reduction: i32) -> Result<SdrResponse, SdrError> {
        self.command(&format!("SET_GAIN {gain_reduction}"))
    }

    pub fn set_lna(&mut self, state: i32) -> Result<SdrResponse, SdrError> {
        self.command(&format!("SET_LNA {state}"))
    }

    /// AGC mode: OFF, 5HZ, 50HZ, 100HZ.
    pub fn set_agc(&mut self, mode: &str) -> Result<SdrResponse, SdrError> {
        self.command(&format!("SET_AGC {mode}"))
    }

    /// AGC setpoint in dBFS.
    pub fn set_agc_setpoint(&mut self, dbfs: i32) -> Result<SdrResponse, SdrError> {
        self.command(&format!("SET_AGC_SETPOINT {dbfs}"))
    }

    pub fn set_sample_rate(&mut self, rate: u64) -> Result<SdrResponse, SdrError> {
        self.command(&format!("SET_SRATE {rate}"))
    }

    pub fn set_bandwidth(&mut self, bw_khz: u32) -> Result<SdrResponse, SdrError> {
        self.command(&format!("SET_BW {bw_khz}"))
    }

    /// Antenna port: A, B, HIZ.
    pub fn set_antenna(&mut self, port: &str) -> Result<SdrResponse, SdrError> {
        self.command(&format!("SET_ANTENNA {port}"))
    }

    pub fn set_decimation(&mut self, factor: u32) -> Result<SdrResponse, SdrError> {
        self.command(&format!("SET_DECIM {factor}"))
    }
}

impl Drop for SdrLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    #[test]
    fn response_parsing() {
        assert_eq!(SdrResponse::parse("OK"), SdrResponse::Ack(None));
        assert_eq!(
            SdrResponse::parse("OK 10000000"),
            SdrResponse::Ack(Some("10000000".to_string()))
        );
        assert_eq!(SdrResponse::parse("PONG"), SdrResponse::Pong);
        assert_eq!(SdrResponse::parse("BYE"), SdrResponse::Bye);
        assert!(matches!(
            SdrResponse::parse("ERR 3 bad value"),
            SdrResponse::Error(_)
        ));
        assert!(!SdrResponse::parse("ERR 3 bad value").is_ok());
        assert!(matches!(
            SdrResponse::parse("something else"),
            SdrResponse::Other(_)
        ));
    }

    #[test]
    fn command_round_trip_against_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut stream = stream;
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                let reply = match line.trim() {
                    "PING" => "PONG\n",
                    "GET_FREQ" => "OK 10000000\n",
                    "QUIT" => {
                        stream.write_all(b"BYE\n").unwrap();
                        break;
                    }
                    _ => "ERR 1 unknown\n",
                };
                stream.write_all(reply.as_bytes()).unwrap();
                line.clear();
            }
        });

        let mut sdr = SdrLink::new(&addr.to_string());
        sdr.connect().unwrap();
        assert_eq!(sdr.ping().unwrap(), SdrResponse::Pong);
        assert_eq!(
            sdr.command("GET_FREQ").unwrap(),
            SdrResponse::Ack(Some("10000000".to_string()))
        );
        assert!(!sdr.command("BOGUS").unwrap().is_ok());
        sdr.disconnect();
        server.join().unwrap();
    }

    #[test]
    fn command_without_connection_fails() {
        let mut sdr = SdrLink::new("127.0.0.1:1");
        assert!(matches!(sdr.ping(), Err(SdrError::NotConnected)));
    }
}
