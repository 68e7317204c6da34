//! Newline-delimited JSON relay transport over TCP.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::error::{LinkError, LinkResult};
use super::relay::{RelaySocket, RelayTransport};

/// Relay transport that speaks one JSON frame per line over TCP.
///
/// The write side shuts down when the link drops its outbound sender; the
/// inbound channel closes when the relay closes the connection, a read
/// fails, or a write fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpRelayTransport;

#[async_trait]
impl RelayTransport for TcpRelayTransport {
    async fn open(&self, endpoint: &str) -> LinkResult<RelaySocket> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| LinkError::Connection {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not disable Nagle on relay socket");
        }

        let (read_half, mut write_half) = stream.into_split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        let (write_failed_tx, mut write_failed) = oneshot::channel::<()>();

        tokio::spawn(async move {
            while let Some(mut line) = outbound_rx.recv().await {
                line.push('\n');
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    // Refuse further frames so the link keeps them queued.
                    outbound_rx.close();
                    let mut lost = 1;
                    while outbound_rx.recv().await.is_some() {
                        lost += 1;
                    }
                    warn!(error = %e, lost, "Relay write failed");
                    if write_failed_tx.send(()).is_err() {
                        debug!("Relay reader already closed");
                    }
                    return;
                }
            }
            if let Err(e) = write_half.shutdown().await {
                debug!(error = %e, "Relay write shutdown failed");
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            let mut writer_alive = true;
            loop {
                tokio::select! {
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => {
                            if inbound_tx.send(line).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "Relay read failed");
                            break;
                        }
                    },
                    signal = &mut write_failed, if writer_alive => {
                        if signal.is_ok() {
                            debug!("Closing relay inbound after write failure");
                            break;
                        }
                        writer_alive = false;
                    }
                }
            }
        });

        Ok(RelaySocket { outbound, inbound })
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn frames_are_newline_delimited() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            write_half.write_all(b"{\"hello\":1}\n").await.unwrap();
            let mut lines = BufReader::new(read_half).lines();
            lines.next_line().await.unwrap()
        });

        let mut socket = TcpRelayTransport.open(&endpoint).await.unwrap();
        socket.outbound.send("{\"ping\":true}".to_string()).unwrap();

        assert_eq!(socket.inbound.recv().await.as_deref(), Some("{\"hello\":1}"));
        assert_eq!(server.await.unwrap().as_deref(), Some("{\"ping\":true}"));
    }

    #[tokio::test]
    async fn inbound_closes_with_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut socket = TcpRelayTransport.open(&endpoint).await.unwrap();

        assert_eq!(socket.inbound.recv().await, None);
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpRelayTransport.open(&endpoint).await;

        assert!(matches!(result, Err(LinkError::Connection { .. })));
    }
}
