//! Database analyzers and the factory that dispatches on URL scheme.
//!
//! An analyzer receives a fully resolved connection from the registry (it
//! never reads the config file itself), connects with the caller-supplied
//! timeout, runs its engine's introspection protocol, and returns a
//! [`SchemaReport`]. Failures pass through the error classifier before
//! propagating, and the underlying client is always released whether the
//! analysis succeeded or not.
//!
//! # Module Structure
//! - `postgres`: exact-catalog introspection over sqlx (feature `postgres`)
//! - `mongodb`: sampling-based shape inference (feature `mongodb`)

use crate::Result;
use crate::models::{Schema, SchemaStats};
use crate::registry::ResolvedConnection;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "mongodb")]
pub mod mongodb;
#[cfg(feature = "postgres")]
pub mod postgres;

/// Database engines with an analyzer implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Postgres,
    MongoDb,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Postgres => write!(f, "PostgreSQL"),
            Engine::MongoDb => write!(f, "MongoDB"),
        }
    }
}

/// The full result of one analysis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReport {
    pub schema: Schema,
    pub stats: SchemaStats,
}

/// Caller-supplied analysis options.
///
/// There is no automatic retry anywhere: an expired timeout fails the run
/// and is classified as a timeout; retries are the caller's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerOptions {
    /// Connection establishment timeout
    pub connect_timeout: Duration,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(10_000),
        }
    }
}

impl AnalyzerOptions {
    /// Builds options from a caller-supplied timeout in milliseconds.
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            connect_timeout: Duration::from_millis(timeout_ms),
        }
    }
}

/// Object-safe analyzer interface.
///
/// # Security
/// - All operations are read-only
/// - Connection strings are redacted in error messages
/// - Every connection attempt carries an explicit timeout
#[async_trait]
pub trait DatabaseAnalyzer: Send + Sync {
    /// Connects, introspects, and returns the canonical schema document
    /// with its derived statistics.
    ///
    /// # Errors
    /// Returns a classified transport error for connection failures, or an
    /// introspection error for query failures. The underlying client is
    /// released in both cases.
    async fn analyze(&self) -> Result<SchemaReport>;

    /// The engine this analyzer handles.
    fn engine(&self) -> Engine;
}

/// Creates the analyzer for a resolved connection based on its URL scheme.
///
/// # Errors
/// Returns a validation error for an unparseable URL, an unknown scheme,
/// or a scheme whose driver feature is not compiled in.
pub fn create_analyzer(
    connection: ResolvedConnection,
    options: AnalyzerOptions,
) -> Result<Box<dyn DatabaseAnalyzer>> {
    let scheme = url::Url::parse(&connection.url)
        .map_err(|e| {
            crate::error::DbProbeError::validation(format!(
                "Invalid connection URL '{}': {e}",
                crate::error::redact_database_url(&connection.url)
            ))
        })?
        .scheme()
        .to_string();

    match scheme.as_str() {
        #[cfg(feature = "postgres")]
        "postgres" | "postgresql" => Ok(Box::new(postgres::PostgresAnalyzer::new(
            connection, options,
        ))),
        #[cfg(not(feature = "postgres"))]
        "postgres" | "postgresql" => Err(crate::error::DbProbeError::validation(
            "PostgreSQL support is not compiled in. Rebuild with --features postgres",
        )),
        #[cfg(feature = "mongodb")]
        "mongodb" | "mongodb+srv" => {
            Ok(Box::new(mongodb::MongoAnalyzer::new(connection, options)))
        }
        #[cfg(not(feature = "mongodb"))]
        "mongodb" | "mongodb+srv" => Err(crate::error::DbProbeError::validation(
            "MongoDB support is not compiled in. Rebuild with --features mongodb",
        )),
        other => Err(crate::error::DbProbeError::validation(format!(
            "Unsupported database scheme '{other}'. Expected postgresql:// or mongodb://"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssl::SslMode;

    fn resolved(url: &str) -> ResolvedConnection {
        ResolvedConnection {
            tag: "alpha".to_string(),
            url: url.to_string(),
            ssl_mode: SslMode::Prefer,
            schemas: vec!["public".to_string()],
        }
    }

    #[test]
    fn test_factory_dispatches_on_scheme() {
        #[cfg(feature = "postgres")]
        {
            let analyzer = create_analyzer(
                resolved("postgresql://u@localhost/db"),
                AnalyzerOptions::default(),
            )
            .unwrap();
            assert_eq!(analyzer.engine(), Engine::Postgres);
        }

        #[cfg(feature = "mongodb")]
        {
            let analyzer = create_analyzer(
                resolved("mongodb://localhost:27017/db"),
                AnalyzerOptions::default(),
            )
            .unwrap();
            assert_eq!(analyzer.engine(), Engine::MongoDb);
        }
    }

    #[test]
    fn test_factory_rejects_unknown_scheme() {
        let err = create_analyzer(
            resolved("mysql://localhost/db"),
            AnalyzerOptions::default(),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("Unsupported database scheme"));
    }

    #[test]
    fn test_timeout_from_millis() {
        let options = AnalyzerOptions::with_timeout_ms(2_500);
        assert_eq!(options.connect_timeout, Duration::from_millis(2_500));
    }
}
