//! UDP telemetry listener
//!
//! Binds the telemetry endpoint and runs an unbounded receive loop on a
//! background task. A corrupt datagram must never take the loop down —
//! decode and parse failures drop the datagram silently. Shutdown is
//! cooperative via a [`CancellationToken`]; at most the datagram currently
//! in flight is lost.

use crate::telemetry::parser::parse_datagram;
use crate::telemetry::TelemetryStore;
use crate::types::unix_time;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Receive buffer size; telemetry lines are well under this.
const RECV_BUFFER_BYTES: usize = 4096;

/// Telemetry listener errors. Failure to bind is the only condition this
/// subsystem treats as fatal.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to bind telemetry endpoint {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("socket address unavailable: {0}")]
    Addr(#[from] std::io::Error),
}

/// Bound-but-not-yet-running telemetry listener.
pub struct TelemetryListener {
    socket: UdpSocket,
    store: Arc<TelemetryStore>,
}

impl TelemetryListener {
    /// Bind the listening endpoint. This is the one startup step allowed
    /// to fail the process.
    pub async fn bind(addr: &str, store: Arc<TelemetryStore>) -> Result<Self, TelemetryError> {
        let socket = UdpSocket::bind(addr).await.map_err(|source| TelemetryError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        info!(address = %addr, "Telemetry listener bound");
        Ok(Self { socket, store })
    }

    /// Actual bound address — useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, TelemetryError> {
        Ok(self.socket.local_addr()?)
    }

    /// Spawn the receive loop on a background task. The loop exits when
    /// `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        let mut buf = vec![0u8; RECV_BUFFER_BYTES];
        let mut received: u64 = 0;
        let mut dropped: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, _peer)) => {
                            received += 1;
                            if !self.handle_datagram(&buf[..len]) {
                                dropped += 1;
                            }
                        }
                        Err(e) => {
                            // Transient receive errors degrade data, they
                            // do not stop the loop.
                            warn!(error = %e, "Telemetry receive failed");
                        }
                    }
                }
            }
        }

        info!(received, dropped, "Telemetry listener stopped");
    }

    /// Decode and store one datagram. Returns false when it was dropped.
    fn handle_datagram(&self, datagram: &[u8]) -> bool {
        let text = match std::str::from_utf8(datagram) {
            Ok(t) => t,
            Err(_) => {
                trace!("Dropping non-UTF8 telemetry datagram");
                return false;
            }
        };

        match parse_datagram(text, unix_time()) {
            Some(msg) => {
                debug!(channel = %msg.channel, "Telemetry message");
                self.store.record(msg);
                true
            }
            None => {
                trace!("Dropping empty telemetry datagram");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_on_ephemeral_port() {
        let store = Arc::new(TelemetryStore::new());
        let listener = TelemetryListener::bind("127.0.0.1:0", store).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let store = Arc::new(TelemetryStore::new());
        let first = TelemetryListener::bind("127.0.0.1:0", store.clone())
            .await
            .unwrap();
        let addr = first.local_addr().unwrap();

        let second = TelemetryListener::bind(&addr.to_string(), store).await;
        assert!(matches!(second, Err(TelemetryError::Bind { .. })));
    }

    #[test]
    fn corrupt_datagrams_are_dropped_silently() {
        let store = Arc::new(TelemetryStore::new());
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let listener = rt.block_on(async {
            TelemetryListener::bind("127.0.0.1:0", store.clone())
                .await
                .unwrap()
        });

        assert!(!listener.handle_datagram(&[0xff, 0xfe, 0x00]));
        assert!(!listener.handle_datagram(b"   "));
        assert!(listener.handle_datagram(b"SYNC,LOCKED,0.9\n"));
        assert_eq!(store.sync_states().len(), 1);
    }
}
