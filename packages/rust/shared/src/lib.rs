//! Shared types, error model, and configuration for Turn/IP.
//!
//! This crate is the foundation depended on by all other Turn/IP crates.
//! It provides:
//! - [`TurnipError`], the unified error type, with [`SchemaError`] and [`AssemblyError`]
//! - Domain types ([`ProtocolRecord`], [`ResourceRecord`], [`RawRecord`], [`TocEntry`])
//! - Configuration ([`AppConfig`], [`GenerateConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, GenerateConfig, GenerateSection, OutputConfig, StoreConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{AssemblyError, ErrorCategory, Result, SchemaError, SchemaErrorKind, TurnipError};
pub use types::{
    CONTINUATION_LABEL, GenerationMode, Link, LinkField, ProtocolRecord, RawRecord, RecordOrder,
    ResourceRecord, SCAPY_FIELD, TocEntry,
};
