//! Connection registry and schema introspection engine for dbprobe.
//!
//! This crate is the core behind the dbprobe CLI and MCP tooling. It owns
//! two halves that the outer surfaces consume through narrow interfaces:
//!
//! - the persistent connection registry: tag-addressed connection records
//!   with SSL-mode policy, environment-variable interpolation, and
//!   multi-schema selection, stored as a single JSON file in the platform
//!   configuration directory;
//! - the per-engine analyzers that turn a resolved connection into a
//!   canonical [`Schema`](models::Schema) document plus
//!   [`SchemaStats`](models::SchemaStats).
//!
//! Formatting, clipboard integration, token estimation, and the MCP server
//! lifecycle are collaborators, not part of this crate.
//!
//! # Security
//! - Connection-string passwords are redacted from all error messages
//! - Analyzers are strictly read-only against the target database
//! - The six-level SSL mode maps to explicit transport verification flags

pub mod analyzers;
pub mod classify;
pub mod error;
pub mod logging;
pub mod models;
pub mod registry;
pub mod ssl;

// Re-export commonly used types
pub use analyzers::{AnalyzerOptions, DatabaseAnalyzer, Engine, SchemaReport, create_analyzer};
pub use classify::classify;
pub use error::{DbProbeError, FailureCategory, Result};
pub use models::{
    CollectionSchema, ColumnInfo, FieldInfo, IndexInfo, Schema, SchemaDetails, SchemaStats,
    SqlSchema, TableInfo,
};
pub use registry::tag::TagGenerationResult;
pub use registry::{
    AddOptions, ConfigFile, ConfigStore, ConnectionEntry, ConnectionListing, Preferences,
    ResolvedConnection, UpdateOp,
};
pub use ssl::{SslMode, TlsOptions};
