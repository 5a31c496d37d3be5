//! Error types for slicelink operations
//!
//! This module defines all error types that can occur while receiving slice
//! data, assembling volumes, running analyses, and serving results.

use thiserror::Error;

/// slicelink error types
///
/// All operations in this library return `Result<T, SliceLinkError>` to
/// provide explicit error handling.
#[derive(Error, Debug)]
pub enum SliceLinkError {
    /// Malformed protocol message
    ///
    /// This error occurs when:
    /// - The opening handshake is missing or unparseable
    /// - A slice header's fixed-width prefix does not carry a valid length
    /// - An attribute is missing, non-numeric, or out of range
    ///
    /// Protocol errors are connection-fatal: the session is torn down and the
    /// scanner-side adapter is expected to reconnect.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Declared and actual byte counts disagree
    ///
    /// This error occurs when:
    /// - A slice payload length does not match the session's slice geometry
    /// - A decoded buffer is shorter than the structure it should contain
    #[error("Invalid size: expected {expected}, got {actual}")]
    InvalidSize {
        /// Expected size in bytes
        expected: usize,
        /// Actual size in bytes received or parsed
        actual: usize,
    },

    /// Slice index outside the session's per-volume slice count
    ///
    /// Slice-local: the offending slice is dropped and the session continues.
    #[error("Slice index {slice} out of range for {z} slices per volume")]
    SliceOutOfRange {
        /// Received slice index
        slice: u32,
        /// Slices per volume declared at handshake
        z: u32,
    },

    /// A bounded I/O operation expired
    ///
    /// Timeouts during a slice payload are slice-local (the slice is dropped
    /// and acknowledged short); a timeout during the handshake is
    /// connection-fatal.
    #[error("Timed out while {0}")]
    Timeout(&'static str),

    /// A second result was produced for the same volume index
    ///
    /// The results table is write-once per key within a session; this
    /// indicates a dispatch bug, and the first result is kept.
    #[error("Result for volume {vol} already stored")]
    DuplicateResult {
        /// Volume index of the rejected write
        vol: u32,
    },

    /// The injected analysis step failed or panicked
    ///
    /// Volume-local: recorded as a failure result for that volume index so
    /// results queries get a definitive negative answer.
    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    /// I/O error occurred during network communication
    ///
    /// Wraps standard library I/O errors: refused/ dropped connections,
    /// broken pipes, sockets closed by the peer, failure to bind a port.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error
    ///
    /// Protocol headers are plain ASCII text; this indicates the sender is
    /// not speaking the protocol.
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for slicelink operations
pub type Result<T> = std::result::Result<T, SliceLinkError>;
