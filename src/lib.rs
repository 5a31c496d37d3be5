//! Real-time MRI slice streaming, volume assembly, and analysis serving
//!
//! slicelink receives brain-image slices streamed live from an MRI scanner,
//! assembles them into time-ordered 3D volumes, runs a configurable analysis
//! on each completed volume, and serves the per-volume results on demand to
//! a presentation system - all within the latency budget of one repetition
//! time (typically ~1 second).
//!
//! # Architecture
//!
//! Data flows one way through the engine:
//!
//! ```text
//! scanner → Slice Receiver → Volume Assembler → Analysis Dispatcher
//!                                                     │
//!            presentation client ← Results Server ← Results Store
//! ```
//!
//! - **`protocol`** - the plain-text tag codec spoken on the scanner socket:
//!   open/close handshakes and length-prefixed slice headers
//! - **`io`** - the scanner-facing receiver state machine and the results
//!   endpoint
//! - **`volume`** - slices, volumes, and the out-of-order assembler
//! - **`analysis`** - the pluggable per-volume analysis and its dispatcher
//! - **`results`** - the session-lifetime, write-once results table
//! - **`engine`** - wires the flows together for the process lifetime
//! - **`config`**, **`sim`** - settings and scripted test peers
//!
//! Three flows run concurrently per session: the receiver's read/acknowledge
//! loop, the dispatcher's per-volume compute, and one task per results
//! client. They share only the results store, which readers consult without
//! ever waiting on the writer.
//!
//! # Quick Start
//!
//! ```no_run
//! use slicelink::analysis::{RoiAverage, RoiMask};
//! use slicelink::config::Config;
//! use slicelink::engine::ScanEngine;
//! use slicelink::volume::VolumeDims;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), slicelink::SliceLinkError> {
//!     let dims = VolumeDims { x: 64, y: 64, z: 18 };
//!     let analysis = Arc::new(RoiAverage::new(RoiMask::full(dims), false));
//!
//!     let engine = ScanEngine::new(Config::default(), analysis);
//!     engine.bind().await?.run().await
//! }
//! ```
//!
//! The scanner side speaks a small tagged protocol: an `<opn x=".." y=".."
//! z=".."/>` handshake answered with an echo, per-slice headers whose
//! fixed-width prefix carries their own total length, raw little-endian
//! 16-bit voxel payloads acknowledged byte-for-byte, and an `<end n="..."/>`
//! closer answered with the number of volumes that actually completed.
//! Presentation clients ask the second endpoint for a zero-padded volume
//! index (`0000`) and get one JSON reply: the analysis fields on success, a
//! failure flag when the analysis failed, or `{"foundResults": false}` when
//! the volume is not there yet - never a blocking wait.
//!
//! # Error Handling
//!
//! All operations return `Result<T, SliceLinkError>`. Protocol errors are
//! connection-fatal and reported to the operator; a short slice payload
//! costs that slice only; an analysis failure is recorded as a failure
//! result for that volume and the session continues.

pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod protocol;
pub mod results;
pub mod session;
pub mod sim;
pub mod volume;

// Re-export commonly used types
pub use error::{Result, SliceLinkError};
