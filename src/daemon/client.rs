use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};

use super::protocol::{Request, Response};

/// Sends single requests to a running daemon.
pub struct DaemonClient {
    address: SocketAddr,
}

impl DaemonClient {
    pub fn new(address: SocketAddr) -> Self {
        Self { address }
    }

    pub fn local(port: u16) -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
    }

    pub async fn send(&self, request: &Request) -> Result<Response> {
        let mut stream = TcpStream::connect(self.address).await.with_context(|| {
            format!(
                "Couldn't reach the daemon at {}. Is it running? Start it with `prodtime init`",
                self.address
            )
        })?;

        let mut buffer = serde_json::to_vec(request)?;
        buffer.push(b'\n');
        stream.write_all(&buffer).await?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        serde_json::from_str(line.trim()).with_context(|| format!("Unexpected response {line:?}"))
    }
}
