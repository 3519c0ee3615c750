//! Canonical intermediate schema documents and derived statistics.
//!
//! The [`Schema`] envelope is engine-agnostic: SQL engines produce a map
//! from schema name to tables and enums, document engines produce a flat
//! list of collection descriptors. Both serialize to the compact JSON form
//! consumed by the markdown/raw formatters and by token estimation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single column of a SQL table.
///
/// Column order within [`TableInfo::columns`] always reflects source
/// ordinal position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type text as reported by the catalog
    pub data_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Constraint-type labels touching this column, de-duplicated by type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
}

/// An index with its full definition text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub definition: String,
}

/// One SQL table: ordered columns, indexes, and an optional comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One SQL namespace worth of introspection output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SqlSchema {
    pub tables: BTreeMap<String, TableInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub enums: BTreeMap<String, Vec<String>>,
}

/// An observed field of a sampled document collection, with the distinct
/// BSON type tags seen across the sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub types: Vec<String>,
}

/// The sampled shape of one document collection.
///
/// Fields are the union of keys across the sample, not an enforced schema;
/// indexes are read exactly, never sampled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexInfo>,
}

/// Engine-agnostic introspection result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Schema {
    /// SQL engines: schema name -> tables and enums
    Sql(BTreeMap<String, SqlSchema>),
    /// Document engines: flat list of collection descriptors
    Document(Vec<CollectionSchema>),
}

/// Engine-specific breakdown inside [`SchemaStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaDetails {
    Sql {
        tables: usize,
        columns: usize,
        indexes: usize,
        enums: usize,
    },
    Document {
        collections: usize,
        fields: usize,
        indexes: usize,
    },
}

/// Derived size and object statistics for a [`Schema`].
///
/// Always computed by walking the assembled document, never by issuing a
/// second query; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaStats {
    /// Serialized JSON byte length of the schema document
    pub total_size: usize,
    /// Primary entity count: tables or collections
    pub object_count: usize,
    pub details: SchemaDetails,
}

impl SchemaStats {
    /// Walks an assembled schema and derives its statistics.
    ///
    /// # Errors
    /// Returns a serialization error if the schema cannot be rendered to
    /// JSON for the size measurement.
    pub fn compute(schema: &Schema) -> crate::Result<Self> {
        let total_size = serde_json::to_vec(schema)
            .map_err(|e| crate::error::DbProbeError::serialization("schema document", e))?
            .len();

        let (object_count, details) = match schema {
            Schema::Sql(schemas) => {
                let tables: usize = schemas.iter().map(|(_, s)| s.tables.len()).sum();
                let columns: usize = schemas
                    .values()
                    .flat_map(|s| s.tables.values())
                    .map(|t| t.columns.len())
                    .sum();
                let indexes: usize = schemas
                    .values()
                    .flat_map(|s| s.tables.values())
                    .map(|t| t.indexes.len())
                    .sum();
                let enums: usize = schemas.values().map(|s| s.enums.len()).sum();
                (
                    tables,
                    SchemaDetails::Sql {
                        tables,
                        columns,
                        indexes,
                        enums,
                    },
                )
            }
            Schema::Document(collections) => {
                let fields: usize = collections.iter().map(|c| c.fields.len()).sum();
                let indexes: usize = collections.iter().map(|c| c.indexes.len()).sum();
                (
                    collections.len(),
                    SchemaDetails::Document {
                        collections: collections.len(),
                        fields,
                        indexes,
                    },
                )
            }
        };

        Ok(Self {
            total_size,
            object_count,
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sql_schema() -> Schema {
        let mut tables = BTreeMap::new();
        tables.insert(
            "users".to_string(),
            TableInfo {
                columns: vec![
                    ColumnInfo {
                        name: "id".to_string(),
                        data_type: "integer".to_string(),
                        nullable: false,
                        default: None,
                        constraints: vec!["PRIMARY KEY".to_string()],
                    },
                    ColumnInfo {
                        name: "name".to_string(),
                        data_type: "text".to_string(),
                        nullable: true,
                        default: None,
                        constraints: Vec::new(),
                    },
                ],
                indexes: vec![IndexInfo {
                    name: "users_pkey".to_string(),
                    definition: "CREATE UNIQUE INDEX users_pkey ON public.users USING btree (id)"
                        .to_string(),
                }],
                description: None,
            },
        );
        let mut enums = BTreeMap::new();
        enums.insert(
            "mood".to_string(),
            vec!["sad".to_string(), "ok".to_string(), "happy".to_string()],
        );
        let mut schemas = BTreeMap::new();
        schemas.insert("public".to_string(), SqlSchema { tables, enums });
        Schema::Sql(schemas)
    }

    #[test]
    fn test_sql_stats_walk() {
        let schema = sample_sql_schema();
        let stats = SchemaStats::compute(&schema).unwrap();

        assert_eq!(stats.object_count, 1);
        assert_eq!(
            stats.details,
            SchemaDetails::Sql {
                tables: 1,
                columns: 2,
                indexes: 1,
                enums: 1,
            }
        );
        assert!(stats.total_size > 0);
    }

    #[test]
    fn test_document_stats_walk() {
        let schema = Schema::Document(vec![
            CollectionSchema {
                name: "orders".to_string(),
                fields: vec![
                    FieldInfo {
                        name: "_id".to_string(),
                        types: vec!["objectId".to_string()],
                    },
                    FieldInfo {
                        name: "total".to_string(),
                        types: vec!["double".to_string(), "int".to_string()],
                    },
                ],
                indexes: vec![IndexInfo {
                    name: "_id_".to_string(),
                    definition: "{\"_id\":1}".to_string(),
                }],
            },
            CollectionSchema {
                name: "users".to_string(),
                fields: vec![FieldInfo {
                    name: "_id".to_string(),
                    types: vec!["objectId".to_string()],
                }],
                indexes: Vec::new(),
            },
        ]);

        let stats = SchemaStats::compute(&schema).unwrap();
        assert_eq!(stats.object_count, 2);
        assert_eq!(
            stats.details,
            SchemaDetails::Document {
                collections: 2,
                fields: 3,
                indexes: 1,
            }
        );
    }

    #[test]
    fn test_schema_serializes_compact() {
        // SQL form serializes as an object keyed by schema name, document
        // form as a bare array: the formatters depend on both shapes.
        let sql = serde_json::to_value(sample_sql_schema()).unwrap();
        assert!(sql.get("public").is_some());

        let doc = serde_json::to_value(Schema::Document(Vec::new())).unwrap();
        assert!(doc.is_array());
    }

    #[test]
    fn test_column_order_is_preserved() {
        let Schema::Sql(schemas) = sample_sql_schema() else {
            unreachable!()
        };
        let names: Vec<_> = schemas["public"].tables["users"]
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["id", "name"]);
    }
}
