//! Scanner protocol implementation module
//!
//! This module contains the plain-text tag codec and the typed messages
//! exchanged with the scanner-side adapter.

pub mod message;
pub mod tag;

// Re-export commonly used types
pub use message::{Close, CloseAck, Open, OpenAck, SliceAck, SliceHeader, TagMessage};
pub use tag::{LEN_WIDTH, SLICE_PREFIX_LEN, VOL_WIDTH};
