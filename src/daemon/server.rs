use std::net::SocketAddr;

use anyhow::Result;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{
    collection::tracker::Inbound,
    protocol::{Request, Response, MAX_REQUEST_BYTES},
};

/// Accepts connections from the browser shim and UI clients and forwards their requests to the
/// tracker.
pub struct CommandServer {
    listener: TcpListener,
    next: mpsc::Sender<Inbound>,
    shutdown: CancellationToken,
}

impl CommandServer {
    pub async fn bind(
        address: SocketAddr,
        next: mpsc::Sender<Inbound>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            next,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Executes the accept loop until shutdown.
    pub async fn run(self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let next = self.next.clone();
                        let span = info_span!("Connection", %peer);
                        tokio::spawn(
                            async move {
                                if let Err(e) = handle_connection(stream, next).await {
                                    warn!("Connection ended with an error {e:?}");
                                }
                            }
                            .instrument(span),
                        );
                    }
                    Err(e) => warn!("Failed to accept connection {e:?}"),
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, next: mpsc::Sender<Inbound>) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read.take(MAX_REQUEST_BYTES));
    let mut line = String::new();

    let response = match reader.read_line(&mut line).await {
        Ok(_) if !line.ends_with('\n') && line.len() as u64 >= MAX_REQUEST_BYTES => {
            Response::failed(format!("Request exceeds {MAX_REQUEST_BYTES} bytes"))
        }
        Ok(_) => match serde_json::from_str::<Request>(line.trim()) {
            Ok(request) => dispatch(request, &next).await,
            Err(e) => {
                debug!("Rejected request {line:?}");
                Response::failed(format!("Malformed request: {e}"))
            }
        },
        Err(e) => Response::failed(format!("Failed to read request: {e}")),
    };

    let mut buffer = serde_json::to_vec(&response)?;
    buffer.push(b'\n');
    write.write_all(&buffer).await?;
    write.shutdown().await?;
    Ok(())
}

async fn dispatch(request: Request, next: &mpsc::Sender<Inbound>) -> Response {
    let (reply, response) = oneshot::channel();
    if next.send(Inbound { request, reply }).await.is_err() {
        return Response::failed("Daemon is shutting down");
    }
    response
        .await
        .unwrap_or_else(|_| Response::failed("Daemon dropped the request"))
}
