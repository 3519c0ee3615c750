//! MongoDB analyzer.
//!
//! Document stores have no enforced shape, so the schema here is a
//! statistical approximation: each collection is sampled with the native
//! `$sample` operator and the observed field set is the union of keys
//! across the sample, each tagged with the distinct BSON types seen.
//! Indexes are read exactly via `listIndexes`, never sampled. A collection
//! that samples zero documents is omitted from the result entirely; that
//! is documented behavior, not a gap to fix silently.
//!
//! # Security
//! - All operations are read-only
//! - Connection strings are redacted in error messages
//! - Connect and server-selection timeouts are always set

use super::{AnalyzerOptions, DatabaseAnalyzer, Engine, SchemaReport};
use crate::Result;
use crate::classify;
use crate::error::DbProbeError;
use crate::models::{CollectionSchema, FieldInfo, IndexInfo, Schema, SchemaStats};
use crate::registry::ResolvedConnection;
use crate::ssl::SslMode;
use async_trait::async_trait;
use mongodb::Client;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{ClientOptions, Tls, TlsOptions};
use std::collections::{BTreeMap, BTreeSet};

/// Fixed per-collection sample size.
const SAMPLE_SIZE: i64 = 5;

/// MongoDB analyzer over a short-lived client.
#[derive(Debug)]
pub struct MongoAnalyzer {
    connection: ResolvedConnection,
    options: AnalyzerOptions,
}

#[async_trait]
impl DatabaseAnalyzer for MongoAnalyzer {
    async fn analyze(&self) -> Result<SchemaReport> {
        let (client, database_name) = self.connect().await?;

        // Scoped acquire/release: the client is shut down whether
        // introspection succeeded or not.
        let result = introspect(&client, &database_name).await;
        client.shutdown().await;

        let schema = result.map_err(|e| classify::classify(e, &self.connection))?;
        let stats = SchemaStats::compute(&schema)?;

        tracing::info!(
            "MongoDB introspection for '{}' found {} collections",
            self.connection.tag,
            stats.object_count
        );
        Ok(SchemaReport { schema, stats })
    }

    fn engine(&self) -> Engine {
        Engine::MongoDb
    }
}

impl MongoAnalyzer {
    /// Creates an analyzer for an already-resolved connection. No network
    /// activity happens until [`DatabaseAnalyzer::analyze`].
    pub fn new(connection: ResolvedConnection, options: AnalyzerOptions) -> Self {
        Self {
            connection,
            options,
        }
    }

    /// Builds the client with the caller's timeouts and the translated TLS
    /// options, and extracts the target database from the URL.
    ///
    /// The registry's `sslmode` parameter is not driver vocabulary and is
    /// rejected by `ClientOptions::parse`; it is stripped here and TLS is
    /// applied structurally instead.
    async fn connect(&self) -> Result<(Client, String)> {
        let sanitized = crate::ssl::strip_ssl_params(&self.connection.url)?;
        let mut client_options = ClientOptions::parse(&sanitized)
            .await
            .map_err(|e| {
                DbProbeError::validation(format!(
                    "Invalid MongoDB connection string '{}': {e}",
                    crate::error::redact_database_url(&self.connection.url)
                ))
            })?;

        let database_name = client_options.default_database.clone().ok_or_else(|| {
            DbProbeError::validation(
                "No database specified in MongoDB connection string. \
                 Use mongodb://host:port/database_name format.",
            )
        })?;

        client_options.connect_timeout = Some(self.options.connect_timeout);
        client_options.server_selection_timeout = Some(self.options.connect_timeout);
        client_options.app_name = Some(format!("dbprobe-{}", env!("CARGO_PKG_VERSION")));
        client_options.tls = Some(mongo_tls(self.connection.ssl_mode));

        tracing::debug!(
            "Connecting to MongoDB for '{}' (sslmode={})",
            self.connection.tag,
            self.connection.ssl_mode
        );

        let client = Client::with_options(client_options).map_err(|e| {
            let error = DbProbeError::introspection_failed(
                format!(
                    "Could not create MongoDB client for {}",
                    crate::error::redact_database_url(&self.connection.url)
                ),
                e,
            );
            classify::classify(error, &self.connection)
        })?;

        Ok((client, database_name))
    }
}

/// Maps the registry's SSL mode onto the driver's TLS configuration.
///
/// `allow`/`prefer`/`require` skip peer verification entirely; `verify-ca`
/// validates the chain while allowing a mismatched hostname; only
/// `verify-full` enforces both. `allow_invalid_hostnames` exists only on
/// the driver's OpenSSL backend, hence the `openssl-tls` feature on the
/// dependency.
fn mongo_tls(mode: SslMode) -> Tls {
    let policy = mode.tls_options();
    if !policy.enabled {
        return Tls::Disabled;
    }

    let mut tls = TlsOptions::default();
    tls.allow_invalid_certificates = Some(!policy.verify_certificate_chain);
    tls.allow_invalid_hostnames = Some(!policy.verify_hostname);
    Tls::Enabled(tls)
}

/// Enumerates collections and assembles the sampled schema envelope.
///
/// Collections are processed sequentially in name order; a failure in one
/// collection is logged and skipped so it cannot abort the others.
async fn introspect(client: &Client, database_name: &str) -> Result<Schema> {
    let db = client.database(database_name);
    let mut names = db.list_collection_names().await.map_err(|e| {
        DbProbeError::introspection_failed(
            format!("Failed to list collections in database '{database_name}'"),
            e,
        )
    })?;
    names.sort();

    tracing::debug!(
        "Found {} collections in database '{}'",
        names.len(),
        database_name
    );

    let mut collections = Vec::new();
    for name in names {
        match collect_collection(client, database_name, &name).await {
            Ok(Some(collection)) => collections.push(collection),
            Ok(None) => {
                // Zero sampled documents: nothing to infer fields from.
                tracing::debug!("Skipping empty collection '{name}'");
            }
            Err(e) => {
                tracing::warn!("Failed to sample collection '{name}': {e}");
            }
        }
    }

    Ok(Schema::Document(collections))
}

/// Samples one collection and reads its indexes.
///
/// Returns `Ok(None)` when the sample is empty.
async fn collect_collection(
    client: &Client,
    database_name: &str,
    collection_name: &str,
) -> Result<Option<CollectionSchema>> {
    let samples = sample_documents(client, database_name, collection_name).await?;
    if samples.is_empty() {
        return Ok(None);
    }

    let fields = infer_fields(&samples);
    let indexes = list_indexes(client, database_name, collection_name).await?;

    tracing::debug!(
        "Collection '{}': {} fields from {} sampled documents, {} indexes",
        collection_name,
        fields.len(),
        samples.len(),
        indexes.len()
    );

    Ok(Some(CollectionSchema {
        name: collection_name.to_string(),
        fields,
        indexes,
    }))
}

/// Draws the fixed-size random sample via the `$sample` aggregation stage.
async fn sample_documents(
    client: &Client,
    database_name: &str,
    collection_name: &str,
) -> Result<Vec<Document>> {
    let coll = client
        .database(database_name)
        .collection::<Document>(collection_name);
    let pipeline = vec![doc! { "$sample": { "size": SAMPLE_SIZE } }];

    let mut cursor = coll.aggregate(pipeline).await.map_err(|e| {
        DbProbeError::introspection_failed(
            format!("Failed to sample documents from '{database_name}.{collection_name}'"),
            e,
        )
    })?;

    let mut docs = Vec::new();
    while cursor.advance().await.map_err(|e| {
        DbProbeError::introspection_failed(
            format!("Failed to iterate sample cursor for '{database_name}.{collection_name}'"),
            e,
        )
    })? {
        let doc = cursor.deserialize_current().map_err(|e| {
            DbProbeError::introspection_failed(
                format!(
                    "Failed to deserialize sampled document from '{database_name}.{collection_name}'"
                ),
                e,
            )
        })?;
        docs.push(doc);
    }

    Ok(docs)
}

/// Reads a collection's indexes exactly (no sampling).
async fn list_indexes(
    client: &Client,
    database_name: &str,
    collection_name: &str,
) -> Result<Vec<IndexInfo>> {
    let coll = client
        .database(database_name)
        .collection::<Document>(collection_name);

    let mut cursor = coll.list_indexes().await.map_err(|e| {
        DbProbeError::introspection_failed(
            format!("Failed to list indexes for '{database_name}.{collection_name}'"),
            e,
        )
    })?;

    let mut indexes = Vec::new();
    while cursor.advance().await.map_err(|e| {
        DbProbeError::introspection_failed(
            format!("Failed to iterate indexes for '{database_name}.{collection_name}'"),
            e,
        )
    })? {
        let index = cursor.deserialize_current().map_err(|e| {
            DbProbeError::introspection_failed(
                format!("Failed to deserialize index for '{database_name}.{collection_name}'"),
                e,
            )
        })?;

        let definition = serde_json::to_string(&index.keys)
            .map_err(|e| DbProbeError::serialization("index key document", e))?;
        let name = index
            .options
            .and_then(|o| o.name)
            .unwrap_or_else(|| derived_index_name(&index.keys));
        indexes.push(IndexInfo { name, definition });
    }

    Ok(indexes)
}

/// Fallback index name in the server's `field_direction` convention.
fn derived_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(k, v)| format!("{k}_{v}"))
        .collect::<Vec<_>>()
        .join("_")
}

/// Unions field names across the sample, recording the distinct BSON type
/// tags observed per field. Output is sorted by field name.
fn infer_fields(samples: &[Document]) -> Vec<FieldInfo> {
    let mut observed: BTreeMap<String, BTreeSet<&'static str>> = BTreeMap::new();
    for doc in samples {
        for (key, value) in doc {
            observed
                .entry(key.clone())
                .or_default()
                .insert(bson_type_name(value));
        }
    }

    observed
        .into_iter()
        .map(|(name, types)| FieldInfo {
            name,
            types: types.into_iter().map(str::to_string).collect(),
        })
        .collect()
}

/// Canonical BSON type tag for a value, matching the server's `$type`
/// aliases.
fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => "javascript",
        Bson::Int32(_) => "int",
        Bson::Int64(_) => "long",
        Bson::Timestamp(_) => "timestamp",
        Bson::Binary(_) => "binData",
        Bson::ObjectId(_) => "objectId",
        Bson::DateTime(_) => "date",
        Bson::Symbol(_) => "symbol",
        Bson::Decimal128(_) => "decimal",
        Bson::Undefined => "undefined",
        Bson::MaxKey => "maxKey",
        Bson::MinKey => "minKey",
        Bson::DbPointer(_) => "dbPointer",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;

    #[test]
    fn test_infer_fields_unions_keys_across_sample() {
        let samples = vec![
            doc! { "_id": ObjectId::new(), "name": "a", "age": 30 },
            doc! { "_id": ObjectId::new(), "name": "b", "email": "b@example.com" },
        ];

        let fields = infer_fields(&samples);
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["_id", "age", "email", "name"]);
    }

    #[test]
    fn test_infer_fields_records_distinct_type_tags() {
        let samples = vec![
            doc! { "total": 10i32 },
            doc! { "total": 10.5f64 },
            doc! { "total": 11i32 },
        ];

        let fields = infer_fields(&samples);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].types, vec!["double", "int"]);
    }

    #[test]
    fn test_infer_fields_empty_sample_yields_nothing() {
        assert!(infer_fields(&[]).is_empty());
    }

    #[test]
    fn test_bson_type_names_match_server_aliases() {
        assert_eq!(bson_type_name(&Bson::Null), "null");
        assert_eq!(bson_type_name(&Bson::Boolean(true)), "bool");
        assert_eq!(bson_type_name(&Bson::Int64(1)), "long");
        assert_eq!(bson_type_name(&Bson::Document(doc! {})), "object");
        assert_eq!(bson_type_name(&Bson::Array(Vec::new())), "array");
    }

    #[test]
    fn test_tls_mapping_per_mode() {
        assert!(matches!(mongo_tls(SslMode::Disable), Tls::Disabled));

        let Tls::Enabled(tls) = mongo_tls(SslMode::Require) else {
            panic!("require must enable TLS")
        };
        assert_eq!(tls.allow_invalid_certificates, Some(true));
        assert_eq!(tls.allow_invalid_hostnames, Some(true));

        let Tls::Enabled(tls) = mongo_tls(SslMode::VerifyCa) else {
            panic!("verify-ca must enable TLS")
        };
        assert_eq!(tls.allow_invalid_certificates, Some(false));
        // Hostname mismatches stay tolerated under verify-ca.
        assert_eq!(tls.allow_invalid_hostnames, Some(true));

        let Tls::Enabled(tls) = mongo_tls(SslMode::VerifyFull) else {
            panic!("verify-full must enable TLS")
        };
        assert_eq!(tls.allow_invalid_certificates, Some(false));
        assert_eq!(tls.allow_invalid_hostnames, Some(false));
    }

    #[tokio::test]
    async fn test_registry_stored_url_parses_after_strip() {
        // The registry augments every stored URL with sslmode, which the
        // driver rejects; the analyzer must hand it a sanitized string.
        let stored =
            crate::ssl::apply_to_url("mongodb://localhost:27017/appdb", SslMode::Prefer).unwrap();
        assert!(ClientOptions::parse(&stored).await.is_err());

        let sanitized = crate::ssl::strip_ssl_params(&stored).unwrap();
        let options = ClientOptions::parse(&sanitized).await.unwrap();
        assert_eq!(options.default_database.as_deref(), Some("appdb"));
    }

    #[test]
    fn test_derived_index_name_convention() {
        let keys = doc! { "user_id": 1, "created_at": -1 };
        assert_eq!(derived_index_name(&keys), "user_id_1_created_at_-1");
    }
}
