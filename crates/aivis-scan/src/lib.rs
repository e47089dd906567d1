//! Scan orchestration and visibility scoring.
//!
//! A scan runs four analysis modules concurrently against one brand. The
//! [`ScanCoordinator`] owns the scan's state machine and is the only writer of
//! aggregate status; the [`ModuleRunner`] executes modules and reports their
//! outcomes; the [`scoring`] functions reduce stored result rows into a 0–100
//! visibility score once every module has finished.

pub mod analysis;
pub mod coordinator;
pub mod error;
pub mod poller;
pub mod runner;
pub mod scoring;
pub mod status;
pub mod store;

mod retry;

pub use analysis::{http_modules, AnalysisClient, HttpAnalysisModule};
pub use coordinator::{ModuleOutcome, ScanCoordinator, ScanStatusReport, ScoreUpdate};
pub use error::{ModuleError, ScanError, StoreError};
pub use poller::{poll_until_terminal, PollError};
pub use runner::{AnalysisModule, ModuleContext, ModuleRunner, RunnerConfig};
pub use scoring::{compute_subscores, compute_visibility_score, Subscores};
pub use store::{MemoryStore, PgStore, RecordedScore, ScanStore};
