//! Core pipeline orchestration and domain logic for Turn/IP.
//!
//! This crate ties together the record store, schema normalization,
//! markdown rendering, and publishing into end-to-end workflows
//! (e.g., [`pipeline::generate`]).

pub mod assembler;
pub mod lookup;
pub mod normalize;
pub mod pipeline;
pub mod toc;

pub use assembler::{AssembleOptions, Catalog, assemble};
pub use lookup::{LookupError, find_protocol};
pub use normalize::{Normalized, normalize, normalize_all, normalize_resource, normalize_resources};
pub use pipeline::{
    CheckReport, GenerateResult, ProgressReporter, SilentProgress, check, generate, load_protocols,
};
pub use toc::{build_toc, slugify};
