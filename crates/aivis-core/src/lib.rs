//! Shared domain types and configuration for the AIVIS workspace.

mod app_config;
mod config;
pub mod profile;
pub mod results;
pub mod scan;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use profile::{score_message, BrandVisibilityProfile, ScoreRecord};
pub use results::{
    BrandDescriptor, ConversationCoverage, ModuleResultSet, ScanResults, Sentiment, Severity,
    ShoppingPlacement, SiteIssue,
};
pub use scan::{
    ModuleKind, ModuleMap, ModuleState, ModuleStatus, Scan, ScanOutcome, ScanStatus,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

/// Raised when a string does not name a known enum variant.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}
