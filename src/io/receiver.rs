//! Scanner-facing slice receiver
//!
//! Owns the listening socket the scanner-side adapter connects to and runs
//! the per-connection protocol state machine:
//!
//! `AwaitingOpen` - [`ScannerConnection::handshake`] reads the `<opn>` tag,
//! validates the geometry, acknowledges with an echo, and produces a
//! [`Session`]. `Streaming` - [`ScannerConnection::next_event`] performs the
//! per-slice exchange (two-phase header read, bounded payload accumulation,
//! acknowledgment) until the `<end>` tag or a disconnect. `Closed` -
//! [`ScannerConnection::ack_close`] reports the observed complete-volume
//! count and the connection is dropped.
//!
//! Every read is bounded by the configured I/O timeout so a stalled scanner
//! costs at most one slice, never the session.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, SliceLinkError};
use crate::protocol::message::{Close, Open, OpenAck, SliceAck, SliceHeader, TagMessage};
use crate::protocol::tag::{self, MAX_TAG_LEN, SLICE_PREFIX_LEN};
use crate::session::Session;
use crate::volume::{Slice, VolumeDims};

/// Listener for the scanner-side adapter
///
/// Only one scanner connection is meaningful at a time; accept one, drive it
/// to Closed, then accept the next.
pub struct ScannerListener {
    listener: TcpListener,
    io_timeout: Duration,
}

impl ScannerListener {
    /// Bind the scanner-facing endpoint
    pub async fn bind(addr: &str, io_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(local_addr = %listener.local_addr()?, "scanner endpoint listening");
        Ok(ScannerListener {
            listener,
            io_timeout,
        })
    }

    /// Accept the next scanner connection
    pub async fn accept(&self) -> Result<ScannerConnection> {
        let (stream, addr) = self.listener.accept().await?;
        info!(peer_addr = %addr, "scanner connected");
        Ok(ScannerConnection {
            stream,
            io_timeout: self.io_timeout,
        })
    }

    /// Get the local address this listener is bound to
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Everything the streaming state machine can yield
#[derive(Debug)]
pub enum StreamEvent {
    /// A fully received, acknowledged slice
    Slice { header: SliceHeader, payload: Vec<u8> },
    /// A slice whose payload fell short of the declared length before the
    /// timeout; acknowledged short and dropped
    SliceDropped {
        header: SliceHeader,
        received: usize,
    },
    /// The scanner sent the closing message
    Close(Close),
    /// The scanner went away without a closing message
    Disconnected,
}

/// One accepted scanner connection
pub struct ScannerConnection {
    stream: TcpStream,
    io_timeout: Duration,
}

impl ScannerConnection {
    /// AwaitingOpen: read and validate the opening handshake, reply with the
    /// echo acknowledgment, and create the session
    ///
    /// # Errors
    ///
    /// Any error here is connection-fatal: no session exists, the caller
    /// drops the connection, and the scanner-side adapter is expected to
    /// reconnect.
    pub async fn handshake(&mut self, expected_dims: Option<VolumeDims>) -> Result<Session> {
        let text = self.read_tag("opening handshake").await?;
        let open = Open::decode(&text)?;
        let dims = VolumeDims::new(open.x, open.y, open.z)?;

        if let Some(expected) = expected_dims {
            if dims != expected {
                return Err(SliceLinkError::InvalidMessage(format!(
                    "handshake declared {} but configuration pins {}",
                    dims, expected
                )));
            }
        }

        self.send_tag(&OpenAck::from(open), "open acknowledgment")
            .await?;
        info!(dims = %dims, "session open");
        Ok(Session::new(dims))
    }

    /// Streaming: read the next slice or the closing message
    ///
    /// The slice header is read in two phases: first the fixed-width prefix,
    /// which alone carries the total header length, then the remaining
    /// header bytes. The payload is then accumulated up to its declared
    /// length, each read bounded by the I/O timeout; a short payload is
    /// acknowledged short and dropped without disturbing the stream.
    ///
    /// # Errors
    ///
    /// An unparseable prefix or header is connection-fatal (the framing can
    /// no longer be trusted); payload shortfalls and disconnects are
    /// reported as events, not errors.
    pub async fn next_event(&mut self) -> Result<StreamEvent> {
        let mut prefix = [0u8; SLICE_PREFIX_LEN];

        // the wait for the next message has no deadline: an idle scanner
        // between volumes is normal. The timeout clock starts once the first
        // byte of a message has arrived.
        let first = self.stream.read(&mut prefix).await?;
        if first == 0 {
            warn!("scanner disconnected without closing message");
            return Ok(StreamEvent::Disconnected);
        }
        if !self
            .fill(&mut prefix, first, "reading slice header prefix")
            .await?
        {
            warn!("scanner disconnected mid-header");
            return Ok(StreamEvent::Disconnected);
        }

        if prefix.starts_with(b"<end") {
            let text = self.finish_tag(&prefix, "closing message").await?;
            let close = Close::decode(&text)?;
            info!(volumes_sent = close.volumes_sent, "closing message received");
            return Ok(StreamEvent::Close(close));
        }

        let total = SliceHeader::decode_prefix(&prefix)?;
        let mut rest = vec![0u8; total - SLICE_PREFIX_LEN];
        if !self.fill(&mut rest, 0, "reading slice header").await? {
            warn!("scanner disconnected mid-header");
            return Ok(StreamEvent::Disconnected);
        }

        let mut raw = prefix.to_vec();
        raw.extend_from_slice(&rest);
        let text = tag::tag_text(&raw)?;
        let header = SliceHeader::decode(&text)?;
        trace!(
            vol = header.vol,
            slice = header.slice,
            bytes = header.payload_len,
            "slice header received"
        );

        let (payload, received) = self.read_payload(header.payload_len).await?;
        let ack = SliceAck {
            header_len: total,
            vol: header.vol,
            slice: header.slice,
            received,
        };
        self.send_tag(&ack, "slice acknowledgment").await?;

        if received < header.payload_len {
            warn!(
                vol = header.vol,
                slice = header.slice,
                expected = header.payload_len,
                received,
                "partial slice payload, dropping slice"
            );
            return Ok(StreamEvent::SliceDropped { header, received });
        }

        debug!(
            vol = header.vol,
            slice = header.slice,
            bytes = received,
            "slice received"
        );
        Ok(StreamEvent::Slice { header, payload })
    }

    /// Closed: acknowledge the closing message with the number of volumes
    /// observed reaching Complete
    pub async fn ack_close(&mut self, volumes_received: u32) -> Result<()> {
        let ack = crate::protocol::message::CloseAck { volumes_received };
        // the scanner may already be gone; teardown succeeds either way
        if let Err(err) = self.send_tag(&ack, "close acknowledgment").await {
            debug!(error = %err, "scanner closed before acknowledgment");
        }
        Ok(())
    }

    /// Fill `buf` past the first `filled` bytes, each read bounded by the
    /// I/O timeout; returns false on a clean disconnect
    ///
    /// A timeout mid-structure is fatal: the framing can no longer be
    /// trusted. Plain `read` calls are used instead of `read_exact` because
    /// cancelling a `read_exact` future at the timeout would silently drop
    /// whatever it had already consumed.
    async fn fill(&mut self, buf: &mut [u8], mut filled: usize, during: &'static str) -> Result<bool> {
        while filled < buf.len() {
            match timeout(self.io_timeout, self.stream.read(&mut buf[filled..])).await {
                Ok(Ok(0)) => return Ok(false),
                Ok(Ok(count)) => filled += count,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(SliceLinkError::Timeout(during)),
            }
        }
        Ok(true)
    }

    /// Accumulate up to `expected` payload bytes, each read bounded by the
    /// I/O timeout; returns the buffer and how many bytes actually arrived
    async fn read_payload(&mut self, expected: usize) -> Result<(Vec<u8>, usize)> {
        let mut payload = vec![0u8; expected];
        let mut received = 0;
        while received < expected {
            match timeout(self.io_timeout, self.stream.read(&mut payload[received..])).await {
                Ok(Ok(0)) => break,
                Ok(Ok(count)) => received += count,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => break,
            }
        }
        payload.truncate(received.min(expected));
        Ok((payload, received))
    }

    /// Read one delimiter-terminated tag (handshake only; slice headers use
    /// the fixed-width prefix instead)
    async fn read_tag(&mut self, during: &'static str) -> Result<String> {
        let mut raw = Vec::with_capacity(64);
        loop {
            let mut byte = [0u8; 1];
            match timeout(self.io_timeout, self.stream.read(&mut byte)).await {
                Ok(Ok(0)) => {
                    return Err(SliceLinkError::InvalidMessage(format!(
                        "connection closed during {}",
                        during
                    )))
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(SliceLinkError::Timeout(during)),
            }
            raw.push(byte[0]);
            if byte[0] == b'>' {
                break;
            }
            if raw.len() > MAX_TAG_LEN {
                return Err(SliceLinkError::InvalidMessage(format!(
                    "unterminated message during {}",
                    during
                )));
            }
        }
        tag::tag_text(&raw)
    }

    /// Finish reading a tag whose start already arrived in the prefix buffer
    async fn finish_tag(&mut self, start: &[u8], during: &'static str) -> Result<String> {
        let mut raw = start.to_vec();
        while !raw.ends_with(b">") {
            let mut byte = [0u8; 1];
            match timeout(self.io_timeout, self.stream.read(&mut byte)).await {
                Ok(Ok(0)) => {
                    return Err(SliceLinkError::InvalidMessage(format!(
                        "connection closed during {}",
                        during
                    )))
                }
                Ok(Ok(_)) => raw.push(byte[0]),
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(SliceLinkError::Timeout(during)),
            }
            if raw.len() > MAX_TAG_LEN {
                return Err(SliceLinkError::InvalidMessage(format!(
                    "unterminated message during {}",
                    during
                )));
            }
        }
        tag::tag_text(&raw)
    }

    async fn send_tag<T: TagMessage>(&mut self, msg: &T, what: &'static str) -> Result<()> {
        let text = msg.encode()?;
        self.stream.write_all(text.as_bytes()).await?;
        self.stream.flush().await?;
        trace!(bytes = text.len(), "{} sent", what);
        Ok(())
    }

    /// Decode a received slice against the session geometry
    ///
    /// Separated from transport so an out-of-range index or a payload/
    /// geometry mismatch stays slice-local: the payload was already read and
    /// acknowledged, framing is intact, and the caller just logs and moves
    /// on.
    pub fn decode_slice(
        session: &Session,
        header: &SliceHeader,
        payload: &[u8],
    ) -> Result<Slice> {
        Slice::from_payload(&session.dims, header.vol, header.slice, payload)
    }
}
