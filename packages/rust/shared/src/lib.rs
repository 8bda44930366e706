//! Shared types, error model, and configuration for research-digest.
//!
//! This crate is the foundation depended on by all other digest crates.
//! It provides:
//! - [`DigestError`]: the unified error type
//! - Domain types ([`ProcessedItem`], [`DiscussionNode`], [`CollectorConfig`])
//! - Configuration ([`AppConfig`], config loading)
//! - [`generate_filename`]: stable document names

pub mod config;
pub mod error;
pub mod filename;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DEFAULT_CONFIG_FILE, ExternalStepConfig, HttpConfig, OutputConfig,
    ProcessingConfig, StorageConfig, default_db_path, init_config, load_config_from,
};
pub use error::{DigestError, Result};
pub use filename::generate_filename;
pub use types::{CollectorConfig, DiscussionNode, ProcessedItem};
