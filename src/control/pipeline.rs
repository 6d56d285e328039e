//! Fire-and-forget parameter sender
//!
//! UDP control interface for the remote decoding pipeline. Commands are
//! newline-terminated ASCII (`SET_<NAME> <value>`, `ENABLE_TELEM <chan>`);
//! no acknowledgement exists on this channel, so the only observable
//! failure is a local socket error, surfaced as `false`. The sender never
//! blocks and never retries — a lost update shows up as a bad score on the
//! next evaluation, which is penalty enough for the optimizer.

use crate::control::params::{ParamSpec, TuneMode};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::{debug, warn};

/// UDP command link to the remote pipeline's control port.
#[derive(Debug)]
pub struct PipelineLink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl PipelineLink {
    /// Create the sending socket. Resolving the target or binding the
    /// local ephemeral port can fail; everything after this is
    /// best-effort.
    pub fn connect(target: &str) -> io::Result<Self> {
        let target = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address resolved"))?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        debug!(target = %target, "Pipeline control link ready");
        Ok(Self { socket, target })
    }

    /// Send one raw command line. Returns false on a local socket error.
    pub fn send(&self, command: &str) -> bool {
        match self
            .socket
            .send_to(format!("{command}\n").as_bytes(), self.target)
        {
            Ok(_) => true,
            Err(e) => {
                debug!(command = %command, error = %e, "Command send failed");
                false
            }
        }
    }

    /// Set a single named parameter.
    pub fn set_parameter(&self, spec: &ParamSpec, value: f64) -> bool {
        self.send(&format!("{} {}", spec.command, spec.wire_value(value)))
    }

    /// Set a parameter by its short name, searched across all families.
    pub fn set_named(&self, name: &str, value: f64) -> bool {
        match TuneMode::All.specs().iter().find(|s| s.name == name) {
            Some(spec) => self.set_parameter(spec, value),
            None => {
                warn!(name, "Unknown parameter name — nothing sent");
                false
            }
        }
    }

    /// Map a positional vector onto a mode's fixed parameter order and
    /// issue one send per parameter. Returns the conjunction of the
    /// individual sends.
    pub fn set_vector(&self, values: &[f64], mode: TuneMode) -> bool {
        let specs = mode.specs();
        if values.len() != specs.len() {
            warn!(
                mode = %mode,
                expected = specs.len(),
                got = values.len(),
                "Parameter vector length mismatch — nothing sent"
            );
            return false;
        }

        let mut all_sent = true;
        for (spec, value) in specs.iter().zip(values) {
            all_sent &= self.set_parameter(spec, *value);
        }
        all_sent
    }

    /// Ask the remote to start emitting a telemetry channel.
    pub fn enable_telemetry(&self, channel: &str) -> bool {
        self.send(&format!("ENABLE_TELEM {channel}"))
    }

    /// Ask the remote to stop emitting a telemetry channel.
    pub fn disable_telemetry(&self, channel: &str) -> bool {
        self.send(&format!("DISABLE_TELEM {channel}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_with_receiver() -> (PipelineLink, UdpSocket) {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();
        let addr = receiver.local_addr().unwrap();
        (PipelineLink::connect(&addr.to_string()).unwrap(), receiver)
    }

    fn recv_line(receiver: &UdpSocket) -> String {
        let mut buf = [0u8; 256];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..len]).into_owned()
    }

    #[test]
    fn commands_are_newline_terminated() {
        let (link, receiver) = link_with_receiver();
        assert!(link.enable_telemetry("CORR"));
        assert_eq!(recv_line(&receiver), "ENABLE_TELEM CORR\n");
    }

    #[test]
    fn vector_maps_to_fixed_command_order() {
        let (link, receiver) = link_with_receiver();
        assert!(link.set_vector(&[2.5, 0.95, 0.01, 5.0], TuneMode::Tick));

        assert_eq!(recv_line(&receiver), "SET_TICK_THRESHOLD 2.5\n");
        assert_eq!(recv_line(&receiver), "SET_TICK_ADAPT_DOWN 0.95\n");
        assert_eq!(recv_line(&receiver), "SET_TICK_ADAPT_UP 0.01\n");
        assert_eq!(recv_line(&receiver), "SET_TICK_MIN_DURATION 5\n");
    }

    #[test]
    fn named_parameters_resolve_across_families() {
        let (link, receiver) = link_with_receiver();
        assert!(link.set_named("sync_tick_tolerance", 120.0));
        assert_eq!(recv_line(&receiver), "SET_SYNC_TICK_TOLERANCE 120\n");
        assert!(!link.set_named("no_such_parameter", 1.0));
    }

    #[test]
    fn integer_parameters_round_on_the_wire() {
        let (link, receiver) = link_with_receiver();
        assert!(link.set_vector(&[0.8, 5.4], TuneMode::Corr));
        assert_eq!(recv_line(&receiver), "SET_CORR_CONFIDENCE 0.8\n");
        assert_eq!(recv_line(&receiver), "SET_CORR_MAX_MISSES 5\n");
    }

    #[test]
    fn length_mismatch_sends_nothing() {
        let (link, receiver) = link_with_receiver();
        assert!(!link.set_vector(&[1.0, 2.0], TuneMode::Tick));

        receiver
            .set_read_timeout(Some(std::time::Duration::from_millis(50)))
            .unwrap();
        let mut buf = [0u8; 16];
        assert!(receiver.recv_from(&mut buf).is_err());
    }
}
