//! Network I/O: the scanner-facing slice stream and the results endpoint

pub mod receiver;
pub mod results_server;

pub use receiver::{ScannerConnection, ScannerListener, StreamEvent};
pub use results_server::ResultsServer;
