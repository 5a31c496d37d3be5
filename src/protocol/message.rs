//! Typed scanner-protocol messages
//!
//! This module defines the common interface the tag messages implement and
//! the six concrete exchanges: the open handshake, per-slice headers and
//! acknowledgments, and the closing handshake.

use crate::error::{Result, SliceLinkError};
use crate::protocol::tag::{self, LEN_WIDTH, SLICE_PREFIX_LEN, VOL_WIDTH};

/// Common interface for all scanner-protocol tag messages
///
/// Each message encodes to a single ASCII tag and decodes from one.
pub trait TagMessage: Sized {
    /// Returns the tag name (e.g. "opn", "rec", "end", "ack")
    fn tag() -> &'static str;

    /// Encode the message to its wire text
    fn encode(&self) -> Result<String>;

    /// Decode the message from wire text
    fn decode(text: &str) -> Result<Self>;
}

fn expect_tag<T: TagMessage>(text: &str) -> Result<()> {
    let name = tag::tag_name(text)?;
    if name != T::tag() {
        return Err(SliceLinkError::InvalidMessage(format!(
            "expected <{}> message, got <{}>",
            T::tag(),
            name
        )));
    }
    Ok(())
}

/// Opening handshake: scanner → core
///
/// Declares the slice geometry for the session: `x`/`y` voxels per slice and
/// `z` slices per volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Open {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl TagMessage for Open {
    fn tag() -> &'static str {
        "opn"
    }

    fn encode(&self) -> Result<String> {
        Ok(format!(
            r#"<opn x="{}" y="{}" z="{}"/>"#,
            self.x, self.y, self.z
        ))
    }

    fn decode(text: &str) -> Result<Self> {
        expect_tag::<Self>(text)?;
        Ok(Open {
            x: tag::attr_u32(text, "x")?,
            y: tag::attr_u32(text, "y")?,
            z: tag::attr_u32(text, "z")?,
        })
    }
}

/// Handshake acknowledgment: core → scanner, echoing the declared geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenAck {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl From<Open> for OpenAck {
    fn from(open: Open) -> Self {
        OpenAck {
            x: open.x,
            y: open.y,
            z: open.z,
        }
    }
}

impl TagMessage for OpenAck {
    fn tag() -> &'static str {
        "ack"
    }

    fn encode(&self) -> Result<String> {
        Ok(format!(
            r#"<ack x="{}" y="{}" z="{}"/>"#,
            self.x, self.y, self.z
        ))
    }

    fn decode(text: &str) -> Result<Self> {
        expect_tag::<Self>(text)?;
        Ok(OpenAck {
            x: tag::attr_u32(text, "x")?,
            y: tag::attr_u32(text, "y")?,
            z: tag::attr_u32(text, "z")?,
        })
    }
}

/// Per-slice header: scanner → core
///
/// `L` is the total header byte length, zero-padded to [`LEN_WIDTH`] digits.
/// The header's first [`SLICE_PREFIX_LEN`] bytes alone carry `L`, so the
/// receiver reads the fixed prefix first and then the remaining
/// `L - SLICE_PREFIX_LEN` bytes. The header length varies with the magnitude
/// of the volume index `v`, slice index `z`, and payload byte length `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceHeader {
    /// Volume index (0-based)
    pub vol: u32,
    /// Slice index within the volume (0-based)
    pub slice: u32,
    /// Payload byte length that follows the header
    pub payload_len: usize,
}

impl SliceHeader {
    /// Parse the fixed-width prefix and return the total header length `L`
    ///
    /// # Errors
    ///
    /// [`SliceLinkError::InvalidMessage`] if the prefix is not a `<rec`
    /// tag opening or `L` is malformed or shorter than the prefix itself.
    pub fn decode_prefix(prefix: &[u8]) -> Result<usize> {
        if prefix.len() != SLICE_PREFIX_LEN {
            return Err(SliceLinkError::InvalidSize {
                expected: SLICE_PREFIX_LEN,
                actual: prefix.len(),
            });
        }
        let text = tag::tag_text(prefix)?;
        if !text.starts_with("<rec L=\"") {
            return Err(SliceLinkError::InvalidMessage(format!(
                "bad slice header prefix: {:?}",
                text
            )));
        }
        let digits = &text[8..8 + LEN_WIDTH];
        let total = digits.parse::<usize>().map_err(|_| {
            SliceLinkError::InvalidMessage(format!("bad header length field: {:?}", digits))
        })?;
        if total < SLICE_PREFIX_LEN {
            return Err(SliceLinkError::InvalidMessage(format!(
                "header length {} shorter than its own prefix",
                total
            )));
        }
        Ok(total)
    }
}

impl TagMessage for SliceHeader {
    fn tag() -> &'static str {
        "rec"
    }

    fn encode(&self) -> Result<String> {
        let tail = format!(
            r#" v="{}" z="{}" n="{}"/>"#,
            self.vol, self.slice, self.payload_len
        );
        let total = SLICE_PREFIX_LEN + tail.len();
        let padded = tag::zero_pad(total as u64, LEN_WIDTH)?;
        Ok(format!(r#"<rec L="{}"{}"#, padded, tail))
    }

    fn decode(text: &str) -> Result<Self> {
        expect_tag::<Self>(text)?;
        let declared = tag::attr(text, "L")? as usize;
        if declared != text.len() {
            return Err(SliceLinkError::InvalidSize {
                expected: declared,
                actual: text.len(),
            });
        }
        let payload_len = tag::attr(text, "n")?;
        Ok(SliceHeader {
            vol: tag::attr_u32(text, "v")?,
            slice: tag::attr_u32(text, "z")?,
            payload_len: payload_len as usize,
        })
    }
}

/// Per-slice acknowledgment: core → scanner
///
/// Echoes the header's `L`, `v`, and `z` with `n` replaced by the payload
/// byte count actually received; `received < declared` signals a partial
/// transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceAck {
    /// `L` value of the acknowledged header
    pub header_len: usize,
    pub vol: u32,
    pub slice: u32,
    /// Payload bytes actually received
    pub received: usize,
}

impl SliceAck {
    /// Acknowledgment for a header whose payload arrived in full or in part
    pub fn for_header(header: &SliceHeader, received: usize) -> Result<Self> {
        let text = header.encode()?;
        Ok(SliceAck {
            header_len: text.len(),
            vol: header.vol,
            slice: header.slice,
            received,
        })
    }
}

impl TagMessage for SliceAck {
    fn tag() -> &'static str {
        "ack"
    }

    fn encode(&self) -> Result<String> {
        let padded = tag::zero_pad(self.header_len as u64, LEN_WIDTH)?;
        Ok(format!(
            r#"<ack L="{}" v="{}" z="{}" n="{}"/>"#,
            padded, self.vol, self.slice, self.received
        ))
    }

    fn decode(text: &str) -> Result<Self> {
        expect_tag::<Self>(text)?;
        Ok(SliceAck {
            header_len: tag::attr(text, "L")? as usize,
            vol: tag::attr_u32(text, "v")?,
            slice: tag::attr_u32(text, "z")?,
            received: tag::attr(text, "n")? as usize,
        })
    }
}

/// Closing handshake: scanner → core
///
/// `n` is the total number of volumes the scanner believes it sent,
/// zero-padded to [`VOL_WIDTH`] digits so the whole message is never shorter
/// than the streaming prefix read that detects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Close {
    pub volumes_sent: u32,
}

impl TagMessage for Close {
    fn tag() -> &'static str {
        "end"
    }

    fn encode(&self) -> Result<String> {
        let padded = tag::zero_pad(u64::from(self.volumes_sent), VOL_WIDTH)?;
        Ok(format!(r#"<end n="{}"/>"#, padded))
    }

    fn decode(text: &str) -> Result<Self> {
        expect_tag::<Self>(text)?;
        Ok(Close {
            volumes_sent: tag::attr_u32(text, "n")?,
        })
    }
}

/// Close acknowledgment: core → scanner
///
/// `n` is the number of volumes the core observed reaching Complete, which
/// may be lower than the count the scanner declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseAck {
    pub volumes_received: u32,
}

impl TagMessage for CloseAck {
    fn tag() -> &'static str {
        "ack"
    }

    fn encode(&self) -> Result<String> {
        let padded = tag::zero_pad(u64::from(self.volumes_received), VOL_WIDTH)?;
        Ok(format!(r#"<ack n="{}"/>"#, padded))
    }

    fn decode(text: &str) -> Result<Self> {
        expect_tag::<Self>(text)?;
        Ok(CloseAck {
            volumes_received: tag::attr_u32(text, "n")?,
        })
    }
}
