//! Simulators for exercising a running engine without a scanner
//!
//! [`ScannerSim`] plays the scanner side of the slice protocol: handshake,
//! slices in any order, closing message. [`results_request`] plays a
//! presentation-side client. Both are used by the integration tests and are
//! handy for smoke-testing a deployment.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, SliceLinkError};
use crate::protocol::message::{
    Close, CloseAck, Open, OpenAck, SliceAck, SliceHeader, TagMessage,
};
use crate::protocol::tag::{MAX_TAG_LEN, VOL_WIDTH};
use crate::volume::VolumeDims;

/// Scripted scanner-side peer
pub struct ScannerSim {
    stream: TcpStream,
    dims: VolumeDims,
}

impl ScannerSim {
    /// Connect to the engine's scanner endpoint and complete the handshake
    pub async fn open(addr: &str, dims: VolumeDims) -> Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        let open = Open {
            x: dims.x,
            y: dims.y,
            z: dims.z,
        };
        stream.write_all(open.encode()?.as_bytes()).await?;
        let ack = OpenAck::decode(&read_tag(&mut stream).await?)?;
        if (ack.x, ack.y, ack.z) != (dims.x, dims.y, dims.z) {
            return Err(SliceLinkError::InvalidMessage(format!(
                "handshake echo mismatch: sent {}, got {}x{}x{}",
                dims, ack.x, ack.y, ack.z
            )));
        }
        debug!(dims = %dims, "simulated scanner connected");
        Ok(ScannerSim { stream, dims })
    }

    /// Send one slice and return the acknowledgment
    pub async fn send_slice(&mut self, vol: u32, slice: u32, payload: &[u8]) -> Result<SliceAck> {
        let header = SliceHeader {
            vol,
            slice,
            payload_len: payload.len(),
        };
        self.stream.write_all(header.encode()?.as_bytes()).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        SliceAck::decode(&read_tag(&mut self.stream).await?)
    }

    /// Send a header declaring `declared` bytes but only `payload.len()`
    /// bytes of payload, then return the (short) acknowledgment
    pub async fn send_partial_slice(
        &mut self,
        vol: u32,
        slice: u32,
        payload: &[u8],
        declared: usize,
    ) -> Result<SliceAck> {
        let header = SliceHeader {
            vol,
            slice,
            payload_len: declared,
        };
        self.stream.write_all(header.encode()?.as_bytes()).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        SliceAck::decode(&read_tag(&mut self.stream).await?)
    }

    /// Send one full volume, slices ordered by `order`
    pub async fn send_volume(&mut self, vol: u32, order: &[u32], fill: u16) -> Result<()> {
        let mut payload = Vec::with_capacity(self.dims.slice_payload_len());
        for _ in 0..self.dims.voxels_per_slice() {
            payload.extend_from_slice(&fill.to_le_bytes());
        }
        for &slice in order {
            let ack = self.send_slice(vol, slice, &payload).await?;
            if ack.received != payload.len() {
                return Err(SliceLinkError::InvalidSize {
                    expected: payload.len(),
                    actual: ack.received,
                });
            }
        }
        Ok(())
    }

    /// Send the closing message and return the acknowledged volume count
    pub async fn close(mut self, volumes_sent: u32) -> Result<u32> {
        let close = Close { volumes_sent };
        self.stream.write_all(close.encode()?.as_bytes()).await?;
        let ack = CloseAck::decode(&read_tag(&mut self.stream).await?)?;
        Ok(ack.volumes_received)
    }

    /// Drop the connection without a closing message
    pub fn abort(self) {
        drop(self.stream);
    }
}

/// One results-protocol exchange: request `vol`, parse the JSON reply
pub async fn results_request(addr: &str, vol: u32) -> Result<serde_json::Value> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!("{:0width$}", vol, width = VOL_WIDTH);
    stream.write_all(request.as_bytes()).await?;

    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let count = stream.read(&mut byte).await?;
        if count == 0 || byte[0] == b'\n' {
            break;
        }
        raw.push(byte[0]);
    }
    let text = String::from_utf8(raw)?;
    serde_json::from_str(&text)
        .map_err(|err| SliceLinkError::InvalidMessage(format!("bad results reply: {}", err)))
}

async fn read_tag(stream: &mut TcpStream) -> Result<String> {
    let mut raw = Vec::with_capacity(64);
    loop {
        let mut byte = [0u8; 1];
        let count = stream.read(&mut byte).await?;
        if count == 0 {
            return Err(SliceLinkError::InvalidMessage(
                "connection closed awaiting acknowledgment".to_string(),
            ));
        }
        raw.push(byte[0]);
        if byte[0] == b'>' {
            break;
        }
        if raw.len() > MAX_TAG_LEN {
            return Err(SliceLinkError::InvalidMessage(
                "unterminated acknowledgment".to_string(),
            ));
        }
    }
    String::from_utf8(raw).map_err(Into::into)
}
