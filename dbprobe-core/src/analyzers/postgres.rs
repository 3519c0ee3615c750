//! PostgreSQL analyzer.
//!
//! SQL engines expose exact catalogs, so introspection here is a single
//! aggregate query over `information_schema` and the `pg_*` catalogs that
//! returns one row per requested schema with its tables and enums already
//! assembled as JSON. Multi-schema runs stay inside that one query rather
//! than N concurrent ones, which keeps the result transactionally
//! consistent from the database's point of view.
//!
//! # Security
//! - Read-only catalog queries only
//! - Connection strings are redacted in error messages
//! - A statement timeout is set for the introspection session

use super::{AnalyzerOptions, DatabaseAnalyzer, Engine, SchemaReport};
use crate::Result;
use crate::classify;
use crate::error::DbProbeError;
use crate::models::{Schema, SchemaStats, SqlSchema, TableInfo};
use crate::registry::ResolvedConnection;
use crate::ssl::SslMode;
use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use std::collections::BTreeMap;
use std::str::FromStr;

/// One aggregate introspection query: per requested schema, the tables
/// (columns in ordinal order with de-duplicated constraint-type labels,
/// indexes with full definitions, table comments) and the enum types with
/// labels in declared sort order.
const INTROSPECTION_QUERY: &str = r#"
WITH requested AS (
    SELECT unnest($1::text[]) AS schema_name
),
column_constraints AS (
    SELECT kcu.table_schema, kcu.table_name, kcu.column_name,
           jsonb_agg(DISTINCT tc.constraint_type) AS constraint_types
    FROM information_schema.key_column_usage kcu
    JOIN information_schema.table_constraints tc
      ON tc.constraint_name = kcu.constraint_name
     AND tc.table_schema = kcu.table_schema
     AND tc.table_name = kcu.table_name
    WHERE kcu.table_schema IN (SELECT schema_name FROM requested)
    GROUP BY kcu.table_schema, kcu.table_name, kcu.column_name
),
table_columns AS (
    SELECT c.table_schema, c.table_name,
           jsonb_agg(jsonb_build_object(
               'name', c.column_name,
               'data_type', c.data_type,
               'nullable', c.is_nullable = 'YES',
               'default', c.column_default,
               'constraints', COALESCE(cc.constraint_types, '[]'::jsonb)
           ) ORDER BY c.ordinal_position) AS columns
    FROM information_schema.columns c
    LEFT JOIN column_constraints cc
      ON cc.table_schema = c.table_schema
     AND cc.table_name = c.table_name
     AND cc.column_name = c.column_name
    WHERE c.table_schema IN (SELECT schema_name FROM requested)
    GROUP BY c.table_schema, c.table_name
),
table_indexes AS (
    SELECT schemaname AS table_schema, tablename AS table_name,
           jsonb_agg(jsonb_build_object('name', indexname, 'definition', indexdef)
                     ORDER BY indexname) AS indexes
    FROM pg_indexes
    WHERE schemaname IN (SELECT schema_name FROM requested)
    GROUP BY schemaname, tablename
),
table_comments AS (
    SELECT n.nspname AS table_schema, cls.relname AS table_name, d.description
    FROM pg_description d
    JOIN pg_class cls ON cls.oid = d.objoid
    JOIN pg_namespace n ON n.oid = cls.relnamespace
    WHERE d.objsubid = 0
      AND cls.relkind IN ('r', 'p')
      AND n.nspname IN (SELECT schema_name FROM requested)
),
schema_tables AS (
    SELECT tc.table_schema,
           jsonb_object_agg(tc.table_name, jsonb_build_object(
               'columns', tc.columns,
               'indexes', COALESCE(ti.indexes, '[]'::jsonb),
               'description', cm.description
           )) AS tables
    FROM table_columns tc
    LEFT JOIN table_indexes ti
      ON ti.table_schema = tc.table_schema AND ti.table_name = tc.table_name
    LEFT JOIN table_comments cm
      ON cm.table_schema = tc.table_schema AND cm.table_name = tc.table_name
    GROUP BY tc.table_schema
),
schema_enums AS (
    SELECT n.nspname AS table_schema,
           jsonb_object_agg(t.typname, labels.labels) AS enums
    FROM pg_type t
    JOIN pg_namespace n ON n.oid = t.typnamespace
    JOIN LATERAL (
        SELECT jsonb_agg(e.enumlabel ORDER BY e.enumsortorder) AS labels
        FROM pg_enum e
        WHERE e.enumtypid = t.oid
    ) labels ON labels.labels IS NOT NULL
    WHERE t.typtype = 'e'
      AND n.nspname IN (SELECT schema_name FROM requested)
    GROUP BY n.nspname
)
SELECT r.schema_name,
       COALESCE(st.tables, '{}'::jsonb) AS tables,
       COALESCE(se.enums, '{}'::jsonb) AS enums
FROM requested r
LEFT JOIN schema_tables st ON st.table_schema = r.schema_name
LEFT JOIN schema_enums se ON se.table_schema = r.schema_name
ORDER BY r.schema_name
"#;

/// Extension trait for extracting typed values from rows with error
/// context attached.
trait RowExt {
    fn get_field<'r, T>(&'r self, field_name: &str) -> Result<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>;
}

impl RowExt for PgRow {
    fn get_field<'r, T>(&'r self, field_name: &str) -> Result<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        self.try_get(field_name).map_err(|e| {
            DbProbeError::introspection_failed(
                format!("Failed to read field '{field_name}' from introspection result"),
                e,
            )
        })
    }
}

/// PostgreSQL analyzer over a short-lived sqlx pool.
#[derive(Debug)]
pub struct PostgresAnalyzer {
    connection: ResolvedConnection,
    options: AnalyzerOptions,
}

#[async_trait]
impl DatabaseAnalyzer for PostgresAnalyzer {
    async fn analyze(&self) -> Result<SchemaReport> {
        let pool = self.connect().await?;

        // Scoped acquire/release: whatever introspection does, the pool is
        // closed before the result propagates.
        let result = introspect(&pool, &self.connection.schemas).await;
        pool.close().await;

        let schema = result.map_err(|e| classify::classify(e, &self.connection))?;
        let stats = SchemaStats::compute(&schema)?;

        tracing::info!(
            "PostgreSQL introspection for '{}' found {} tables across {} schemas",
            self.connection.tag,
            stats.object_count,
            self.connection.schemas.len()
        );
        Ok(SchemaReport { schema, stats })
    }

    fn engine(&self) -> Engine {
        Engine::Postgres
    }
}

impl PostgresAnalyzer {
    /// Creates an analyzer for an already-resolved connection. No network
    /// activity happens until [`DatabaseAnalyzer::analyze`].
    pub fn new(connection: ResolvedConnection, options: AnalyzerOptions) -> Self {
        Self {
            connection,
            options,
        }
    }

    /// Establishes the connection pool with the translated SSL mode and
    /// the caller's timeout. Failures are classified before propagating.
    async fn connect(&self) -> Result<PgPool> {
        let timeout_ms = self.options.connect_timeout.as_millis();
        let connect_options = PgConnectOptions::from_str(&self.connection.url)
            .map_err(|e| {
                DbProbeError::validation(format!(
                    "Invalid PostgreSQL connection string '{}': {e}",
                    crate::error::redact_database_url(&self.connection.url)
                ))
            })?
            .ssl_mode(pg_ssl_mode(self.connection.ssl_mode))
            .options([("statement_timeout", timeout_ms.to_string())]);

        tracing::debug!(
            "Connecting to PostgreSQL for '{}' (sslmode={})",
            self.connection.tag,
            self.connection.ssl_mode
        );

        PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.options.connect_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| {
                let error = DbProbeError::introspection_failed(
                    format!(
                        "Could not connect to {}",
                        crate::error::redact_database_url(&self.connection.url)
                    ),
                    e,
                );
                classify::classify(error, &self.connection)
            })
    }
}

/// Maps the registry's SSL mode onto sqlx's `PgSslMode`.
///
/// sqlx implements the libpq semantics, which already match the policy
/// table: `verify-ca` checks the chain without the hostname.
fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow => PgSslMode::Allow,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Runs the aggregate query and assembles the schema envelope.
async fn introspect(pool: &PgPool, schemas: &[String]) -> Result<Schema> {
    let rows = sqlx::query(INTROSPECTION_QUERY)
        .bind(schemas)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            DbProbeError::introspection_failed("Schema introspection query failed", e)
        })?;

    let mut assembled = BTreeMap::new();
    for row in rows {
        let schema_name: String = row.get_field("schema_name")?;
        let tables_json: serde_json::Value = row.get_field("tables")?;
        let enums_json: serde_json::Value = row.get_field("enums")?;

        let tables: BTreeMap<String, TableInfo> =
            serde_json::from_value(tables_json).map_err(|e| {
                DbProbeError::serialization(
                    format!("table payload for schema '{schema_name}'"),
                    e,
                )
            })?;
        let enums: BTreeMap<String, Vec<String>> =
            serde_json::from_value(enums_json).map_err(|e| {
                DbProbeError::serialization(
                    format!("enum payload for schema '{schema_name}'"),
                    e,
                )
            })?;

        tracing::debug!(
            "Schema '{}': {} tables, {} enums",
            schema_name,
            tables.len(),
            enums.len()
        );
        assembled.insert(schema_name, SqlSchema { tables, enums });
    }

    Ok(Schema::Sql(assembled))
}
