//! Results endpoint for presentation-side clients
//!
//! A second, independently listening socket, decoupled from the scanner
//! connection. Each client connection gets its own task; a request is a
//! fixed-width zero-padded decimal volume index (e.g. `0001`), and the reply
//! is one newline-terminated JSON object. Connections may issue one request
//! and close, or stay open and issue more. Lookups only ever read the
//! results store, so clients are never serialized behind each other or
//! behind slice ingestion.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::tag::VOL_WIDTH;
use crate::results::{not_found_reply, ResultsReader};

/// Server answering volume-index lookups against the results store
pub struct ResultsServer {
    listener: TcpListener,
    reader: ResultsReader,
    io_timeout: Duration,
}

impl ResultsServer {
    /// Bind the results endpoint
    pub async fn bind(addr: &str, reader: ResultsReader, io_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(local_addr = %listener.local_addr()?, "results endpoint listening");
        Ok(ResultsServer {
            listener,
            reader,
            io_timeout,
        })
    }

    /// Get the local address this server is bound to
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients forever, one task per connection
    ///
    /// A client failure tears down only that client's task; ingestion and
    /// other clients are unaffected.
    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer_addr = %addr, "results client connected");
                    let reader = self.reader.clone();
                    let io_timeout = self.io_timeout;
                    tokio::spawn(async move {
                        if let Err(err) = handle_client(stream, reader, io_timeout).await {
                            debug!(peer_addr = %addr, error = %err, "results client ended");
                        }
                    });
                }
                Err(err) => {
                    warn!(error = %err, "results accept failed");
                }
            }
        }
    }
}

/// Answer requests on one client connection until it closes
async fn handle_client(
    mut stream: TcpStream,
    reader: ResultsReader,
    io_timeout: Duration,
) -> Result<()> {
    loop {
        let mut request = [0u8; VOL_WIDTH];
        let mut filled = 0;
        while filled < VOL_WIDTH {
            let count = match timeout(io_timeout, stream.read(&mut request[filled..])).await {
                Ok(read) => read?,
                Err(_) => return Ok(()),
            };
            if count == 0 {
                if filled > 0 {
                    warn!(bytes = filled, "client closed mid-request");
                }
                return Ok(());
            }
            filled += count;
        }

        let reply = match parse_request(&request) {
            Some(vol) => {
                let reply = match reader.lookup(vol) {
                    Some(result) => result.to_reply(),
                    None => not_found_reply(),
                };
                debug!(vol, found = reply["foundResults"].as_bool(), "lookup answered");
                reply
            }
            None => {
                warn!(request = %String::from_utf8_lossy(&request), "unparseable request");
                not_found_reply()
            }
        };

        let mut body = serde_json::to_vec(&reply).unwrap_or_else(|_| b"{}".to_vec());
        body.push(b'\n');
        stream.write_all(&body).await?;
        stream.flush().await?;
    }
}

/// Parse a fixed-width zero-padded decimal volume index
fn parse_request(raw: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(raw).ok()?;
    text.trim().parse::<u32>().ok()
}
