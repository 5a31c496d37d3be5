//! Engine wiring: receiver → assembler → dispatcher → store → server
//!
//! [`ScanEngine::bind`] binds both endpoints; [`BoundEngine::run`] then owns
//! the process lifetime: it spawns the results server and accepts scanner
//! connections one at a time. Each accepted connection becomes a session;
//! its completed volumes flow over a channel to a dispatcher task that
//! writes the results table. Tearing a session down (closing message or
//! connection drop) discards assembler state but leaves stored results
//! queryable until the next session begins.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::analysis::{AnalysisDispatcher, VolumeAnalysis};
use crate::config::Config;
use crate::error::{Result, SliceLinkError};
use crate::io::receiver::{ScannerConnection, ScannerListener, StreamEvent};
use crate::io::results_server::ResultsServer;
use crate::results::ResultsStore;
use crate::volume::VolumeAssembler;

/// Outcome of one completed session, for operator reporting
#[derive(Debug, Clone, Copy)]
pub struct SessionSummary {
    /// Volumes the scanner declared in its closing message, when it sent one
    pub volumes_declared: Option<u32>,
    /// Volumes observed reaching Complete
    pub volumes_completed: u32,
    /// Slices dropped to partial transfers or bad indices
    pub slices_dropped: u32,
}

/// The real-time ingestion and serving engine
pub struct ScanEngine {
    config: Config,
    analysis: Arc<dyn VolumeAnalysis>,
    store: ResultsStore,
}

impl ScanEngine {
    pub fn new(config: Config, analysis: Arc<dyn VolumeAnalysis>) -> Self {
        ScanEngine {
            config,
            analysis,
            store: ResultsStore::new(),
        }
    }

    /// Reader handle onto the engine's results store
    pub fn results_reader(&self) -> crate::results::ResultsReader {
        self.store.reader()
    }

    /// Bind both endpoints; the returned engine reports its addresses and
    /// can then [`BoundEngine::run`]
    pub async fn bind(self) -> Result<BoundEngine> {
        let scanner = ScannerListener::bind(&self.config.scanner_addr, self.config.io_timeout())
            .await?;
        let results = ResultsServer::bind(
            &self.config.results_addr,
            self.store.reader(),
            self.config.io_timeout(),
        )
        .await?;
        Ok(BoundEngine {
            engine: self,
            scanner,
            results,
        })
    }

    /// Drive one scanner connection from handshake to teardown
    pub async fn run_session(&self, mut conn: ScannerConnection) -> Result<SessionSummary> {
        let mut session = conn
            .handshake(self.config.expected_dims)
            .await?;

        let writer = self.store.begin_session();
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = AnalysisDispatcher::new(
            Arc::clone(&self.analysis),
            writer,
            self.config.analysis_warn(),
        );
        let dispatcher_task = tokio::spawn(dispatcher.run(rx));

        let mut assembler = VolumeAssembler::new(session.dims);
        let mut slices_dropped: u32 = 0;
        let mut volumes_declared = None;

        let stream_result = loop {
            match conn.next_event().await {
                Ok(StreamEvent::Slice { header, payload }) => {
                    match ScannerConnection::decode_slice(&session, &header, &payload) {
                        Ok(slice) => {
                            if let Some(volume) = assembler.insert(slice) {
                                session.record_completion();
                                // receiver never waits on analysis; an
                                // unbounded queue turns dispatcher lag into
                                // log warnings instead of stalled acks
                                if tx.send(volume).is_err() {
                                    break Err(SliceLinkError::AnalysisFailed(
                                        "dispatcher stopped accepting volumes".to_string(),
                                    ));
                                }
                            }
                        }
                        Err(err) => {
                            slices_dropped += 1;
                            warn!(
                                vol = header.vol,
                                slice = header.slice,
                                error = %err,
                                "slice rejected"
                            );
                        }
                    }
                }
                Ok(StreamEvent::SliceDropped { .. }) => {
                    slices_dropped += 1;
                }
                Ok(StreamEvent::Close(close)) => {
                    volumes_declared = Some(close.volumes_sent);
                    if close.volumes_sent != session.volumes_completed() {
                        warn!(
                            declared = close.volumes_sent,
                            completed = session.volumes_completed(),
                            "declared and completed volume counts disagree"
                        );
                    }
                    conn.ack_close(session.volumes_completed()).await?;
                    break Ok(());
                }
                Ok(StreamEvent::Disconnected) => {
                    // implicit close: discard partial state, keep results
                    if assembler.pending_count() > 0 {
                        warn!(
                            pending_volumes = assembler.pending_count(),
                            "discarding partial volumes after disconnect"
                        );
                    }
                    break Ok(());
                }
                Err(err) => break Err(err),
            }
        };

        // let the dispatcher drain queued volumes before reporting; results
        // written so far must stay queryable regardless of how the session
        // ended
        drop(tx);
        if dispatcher_task.await.is_err() {
            error!("dispatcher task aborted");
        }

        stream_result.map(|()| SessionSummary {
            volumes_declared,
            volumes_completed: session.volumes_completed(),
            slices_dropped,
        })
    }
}

/// A [`ScanEngine`] with both endpoints bound
pub struct BoundEngine {
    engine: ScanEngine,
    scanner: ScannerListener,
    results: ResultsServer,
}

impl BoundEngine {
    /// Address the scanner-side adapter should connect to
    pub fn scanner_addr(&self) -> Result<std::net::SocketAddr> {
        self.scanner.local_addr()
    }

    /// Address presentation-side clients should connect to
    pub fn results_addr(&self) -> Result<std::net::SocketAddr> {
        self.results.local_addr()
    }

    /// Run forever: serve results and process scanner sessions one at a time
    pub async fn run(self) -> Result<()> {
        let BoundEngine {
            engine,
            scanner,
            results,
        } = self;
        tokio::spawn(results.serve());

        loop {
            let conn = scanner.accept().await?;
            match engine.run_session(conn).await {
                Ok(summary) => {
                    info!(
                        completed = summary.volumes_completed,
                        declared = summary.volumes_declared,
                        dropped_slices = summary.slices_dropped,
                        "session ended"
                    );
                }
                Err(err) => {
                    // session-level failure; the adapter reconnects
                    error!(error = %err, "session failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::AnalysisValues;
    use crate::volume::Volume;
    use serde_json::json;

    fn mean_analysis() -> Arc<dyn VolumeAnalysis> {
        Arc::new(|vol: &Volume| -> Result<AnalysisValues> {
            let sum: u64 = vol.data().iter().map(|&v| u64::from(v)).sum();
            let mut out = AnalysisValues::new();
            out.insert(
                "average".to_string(),
                json!(sum as f64 / vol.data().len() as f64),
            );
            Ok(out)
        })
    }

    #[tokio::test]
    async fn test_engine_construction_and_reader() {
        let config = Config {
            scanner_addr: "127.0.0.1:0".to_string(),
            results_addr: "127.0.0.1:0".to_string(),
            ..Config::default()
        };
        let engine = ScanEngine::new(config, mean_analysis());
        assert!(engine.results_reader().is_empty());
    }
}
