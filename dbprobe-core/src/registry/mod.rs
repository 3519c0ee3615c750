//! Persistent connection registry.
//!
//! A single JSON file in the platform configuration directory holds every
//! saved connection, keyed by tag, plus the default designation and global
//! preferences. The file is created lazily on first `add`, re-read before
//! every operation, fully re-validated before every write, and rewritten
//! atomically (temp file + rename). There is no cross-process lock:
//! concurrent mutating invocations race last-writer-wins, which is
//! acceptable for a single-user local tool and documented as such.
//!
//! # Module Structure
//! - `tag`: unique tag generation and validation
//! - `interpolate`: `${VAR}`/`$VAR` resolution against a `.env` sidecar
//!
//! # Security
//! - Stored URLs may reference credentials via environment placeholders
//! - URLs are redacted in every error message

pub mod interpolate;
pub mod tag;

use crate::error::DbProbeError;
use crate::ssl::{self, SslMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tag::TagGenerationResult;
use url::Url;

/// Current config file format version.
const CONFIG_VERSION: u32 = 1;

/// Default schema set for SQL engines when none is configured.
const DEFAULT_SCHEMAS: [&str; 1] = ["public"];

/// Global preferences stored alongside the connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Output format handed to the formatters ("markdown" or "raw")
    pub format: String,
    /// Default connection timeout in milliseconds
    pub timeout_ms: u64,
    /// Whether fetch results are copied to the clipboard by default
    pub copy_to_clipboard: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            format: "markdown".to_string(),
            timeout_ms: 10_000,
            copy_to_clipboard: false,
        }
    }
}

/// One stored connection record.
///
/// The tag itself is the key in [`ConfigFile::connections`]; it never
/// appears inside the record, so a rename is a key move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEntry {
    /// Connection string; may contain unresolved `${VAR}` placeholders
    pub url: String,
    pub ssl_mode: SslMode,
    /// Ordered SQL schema selection; absent implies `["public"]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schemas: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Refreshed on every resolution through [`ConfigStore::get`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

/// The whole registry as persisted on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: u32,
    /// Tag of the default connection; must reference an existing entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub connections: BTreeMap<String, ConnectionEntry>,
    #[serde(default)]
    pub preferences: Preferences,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            default: None,
            connections: BTreeMap::new(),
            preferences: Preferences::default(),
        }
    }
}

impl ConfigFile {
    /// Validates the whole file: every record, not just the one touched.
    ///
    /// A corrupt single record can never silently taint the store because
    /// every mutation runs this before writing.
    ///
    /// # Errors
    /// Returns a validation error naming the offending tag.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(default) = &self.default {
            if !self.connections.contains_key(default) {
                return Err(DbProbeError::validation(format!(
                    "Default tag '{default}' does not reference an existing connection"
                )));
            }
        }
        for (tag_name, entry) in &self.connections {
            tag::validate_tag(tag_name)?;
            parse_connection_url(&entry.url)?;
        }
        Ok(())
    }
}

/// A read-only listing row returned by [`ConfigStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionListing {
    pub tag: String,
    pub connection: ConnectionEntry,
    pub is_default: bool,
}

/// A fully materialized connection, ready to hand to an analyzer.
///
/// The URL has been interpolated and the schema selection backfilled; this
/// is the sole input an analyzer receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConnection {
    pub tag: String,
    pub url: String,
    pub ssl_mode: SslMode,
    /// SQL schema selection; `["public"]` when nothing was configured
    pub schemas: Vec<String>,
}

/// Options for [`ConfigStore::add`].
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Store the connection with `ssl_mode = disable` instead of `prefer`
    pub ssl_disabled: bool,
    /// Promote the new connection to default
    pub is_default: bool,
    pub description: Option<String>,
}

/// A single typed update operation for [`ConfigStore::update`].
///
/// Closed variant set: an invalid property name fails at construction time
/// in [`UpdateOp::parse`], never inside the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOp {
    RenameTag(String),
    SetSslMode(SslMode),
    SetUsername(String),
    SetPassword(String),
    SetHost(String),
    SetPort(u16),
    SetDatabase(String),
    SetSchemas(Vec<String>),
}

impl UpdateOp {
    /// Builds an operation from the string-typed `(property, value)` form
    /// used by CLI and MCP callers.
    ///
    /// # Errors
    /// Returns a validation error for an unknown property name or an
    /// unparseable value.
    pub fn parse(property: &str, value: &str) -> crate::Result<Self> {
        match property {
            "tag" => Ok(Self::RenameTag(value.to_string())),
            "ssl-mode" => Ok(Self::SetSslMode(value.parse()?)),
            "username" => Ok(Self::SetUsername(value.to_string())),
            "password" => Ok(Self::SetPassword(value.to_string())),
            "host" => Ok(Self::SetHost(value.to_string())),
            "port" => match value.parse::<u16>() {
                Ok(port) if port != 0 => Ok(Self::SetPort(port)),
                _ => Err(DbProbeError::validation(format!(
                    "Invalid port '{value}': expected 1-65535"
                ))),
            },
            "database" => Ok(Self::SetDatabase(value.to_string())),
            "schema" => Ok(Self::SetSchemas(split_schema_list(value))),
            other => Err(DbProbeError::validation(format!(
                "Unknown property '{other}'. Expected one of: tag, ssl-mode, username, password, host, port, database, schema"
            ))),
        }
    }
}

/// Durable CRUD over the connection registry.
///
/// Constructed once per process and passed by reference to whatever needs
/// it; there is no ambient global instance. Each operation re-reads the
/// file so independent invocations never act on a stale in-memory copy.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Opens the store at the platform-conventional location
    /// (`<config dir>/dbprobe/connections.json`).
    ///
    /// # Errors
    /// Returns a configuration error if the platform config directory
    /// cannot be determined.
    pub fn open() -> crate::Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| DbProbeError::config("Could not determine user config directory"))?;
        Ok(Self {
            path: config_dir.join("dbprobe").join("connections.json"),
        })
    }

    /// Opens the store at an explicit path (tests, overrides).
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the optional `.env` sidecar supplying interpolation values.
    pub fn env_file_path(&self) -> PathBuf {
        self.path
            .parent()
            .map_or_else(|| PathBuf::from(".env"), |dir| dir.join(".env"))
    }

    /// Registers a new connection and persists the registry.
    ///
    /// The first connection ever added is always promoted to default,
    /// regardless of `options.is_default`. The stored URL is augmented with
    /// the chosen SSL mode so URL and record never disagree.
    ///
    /// # Errors
    /// Returns a validation error for a malformed URL or candidate tag, or
    /// a configuration error if the file cannot be written.
    pub fn add(
        &self,
        candidate: Option<&str>,
        url: &str,
        options: AddOptions,
    ) -> crate::Result<TagGenerationResult> {
        parse_connection_url(url)?;

        let mut file = self.load()?;
        let result = tag::generate_tag(candidate, |t| file.connections.contains_key(t))?;

        let ssl_mode = if options.ssl_disabled {
            SslMode::Disable
        } else {
            SslMode::Prefer
        };
        let stored_url = ssl::apply_to_url(url, ssl_mode)?;

        let now = Utc::now();
        file.connections.insert(
            result.tag.clone(),
            ConnectionEntry {
                url: stored_url,
                ssl_mode,
                schemas: None,
                description: options.description,
                created: now,
                updated_at: now,
                last_used: None,
            },
        );

        // The very first connection becomes the default unconditionally.
        if file.connections.len() == 1 || options.is_default {
            file.default = Some(result.tag.clone());
        }

        self.persist(&file)?;
        tracing::info!("Added connection '{}'", result.tag);
        Ok(result)
    }

    /// Applies one typed update to a connection and persists the registry.
    ///
    /// Renames go through the tag generator, so a colliding new tag is
    /// auto-resolved rather than silently overwriting another record; the
    /// generation result is returned for caller messaging.
    ///
    /// # Errors
    /// Returns `ConnectionNotFound` for an unknown tag, a validation error
    /// for bad values, or a configuration error on write failure.
    pub fn update(
        &self,
        tag_name: &str,
        op: UpdateOp,
    ) -> crate::Result<Option<TagGenerationResult>> {
        let mut file = self.load()?;
        if !file.connections.contains_key(tag_name) {
            return Err(DbProbeError::connection_not_found(tag_name));
        }

        let mut rename_result = None;
        match op {
            UpdateOp::RenameTag(new_tag) => {
                let result = tag::generate_tag(Some(&new_tag), |t| {
                    t != tag_name && file.connections.contains_key(t)
                })?;
                let mut entry = file
                    .connections
                    .remove(tag_name)
                    .ok_or_else(|| DbProbeError::connection_not_found(tag_name))?;
                entry.updated_at = Utc::now();
                file.connections.insert(result.tag.clone(), entry);
                if file.default.as_deref() == Some(tag_name) {
                    file.default = Some(result.tag.clone());
                }
                rename_result = Some(result);
            }
            op => {
                let entry = file
                    .connections
                    .get_mut(tag_name)
                    .ok_or_else(|| DbProbeError::connection_not_found(tag_name))?;
                apply_entry_update(entry, op)?;
                entry.updated_at = Utc::now();
            }
        }

        self.persist(&file)?;
        Ok(rename_result)
    }

    /// Deletes a connection, reassigning or clearing the default.
    ///
    /// When the removed connection was the default, the first remaining
    /// connection (in tag order) becomes the new default; with none left
    /// the default is cleared.
    ///
    /// # Errors
    /// Returns `ConnectionNotFound` for an unknown tag.
    pub fn remove(&self, tag_name: &str) -> crate::Result<()> {
        let mut file = self.load()?;
        if file.connections.remove(tag_name).is_none() {
            return Err(DbProbeError::connection_not_found(tag_name));
        }
        if file.default.as_deref() == Some(tag_name) {
            file.default = file.connections.keys().next().cloned();
        }
        self.persist(&file)?;
        tracing::info!("Removed connection '{tag_name}'");
        Ok(())
    }

    /// Resolves a tag (or the registry default) into a materialized
    /// connection: interpolated URL, SSL mode, schema selection.
    ///
    /// Resolution is a read-then-write side effect: `last_used` is stamped
    /// and the file persisted.
    ///
    /// # Errors
    /// - `NoConnection` when no tag was given and the registry is empty
    /// - `NoDefaultConnection` when no tag was given and no default is set
    /// - `ConnectionNotFound` for an unknown explicit tag, even on an
    ///   empty registry
    pub fn get(&self, tag_name: Option<&str>) -> crate::Result<ResolvedConnection> {
        let mut file = self.load()?;

        let resolved_tag = match tag_name {
            Some(tag_name) => tag_name.to_string(),
            None => {
                if file.connections.is_empty() {
                    return Err(DbProbeError::NoConnection);
                }
                file.default
                    .clone()
                    .ok_or(DbProbeError::NoDefaultConnection)?
            }
        };

        let env_file = self.env_file_path();
        let entry = file
            .connections
            .get_mut(&resolved_tag)
            .ok_or_else(|| DbProbeError::connection_not_found(&resolved_tag))?;

        let resolved_url = interpolate::resolve(&entry.url, Some(&env_file));
        let schemas = match &entry.schemas {
            Some(schemas) if !schemas.is_empty() => schemas.clone(),
            _ => schemas_from_url(&entry.url)
                .unwrap_or_else(|| DEFAULT_SCHEMAS.iter().map(|s| (*s).to_string()).collect()),
        };
        let ssl_mode = entry.ssl_mode;
        entry.last_used = Some(Utc::now());

        self.persist(&file)?;
        Ok(ResolvedConnection {
            tag: resolved_tag,
            url: resolved_url,
            ssl_mode,
            schemas,
        })
    }

    /// Lists all connections without resolution or interpolation.
    ///
    /// Strictly side-effect free: `last_used` is untouched.
    ///
    /// # Errors
    /// Returns a configuration error if the file exists but is unreadable.
    pub fn list(&self) -> crate::Result<Vec<ConnectionListing>> {
        let file = self.load()?;
        Ok(file
            .connections
            .iter()
            .map(|(tag_name, entry)| ConnectionListing {
                tag: tag_name.clone(),
                connection: entry.clone(),
                is_default: file.default.as_deref() == Some(tag_name),
            })
            .collect())
    }

    /// Marks an existing connection as the default.
    ///
    /// # Errors
    /// Returns `ConnectionNotFound` for an unknown tag.
    pub fn set_default(&self, tag_name: &str) -> crate::Result<()> {
        let mut file = self.load()?;
        if !file.connections.contains_key(tag_name) {
            return Err(DbProbeError::connection_not_found(tag_name));
        }
        file.default = Some(tag_name.to_string());
        self.persist(&file)
    }

    /// Directly replaces a connection's schema selection (interactive
    /// schema-selection flows).
    ///
    /// # Errors
    /// Returns `ConnectionNotFound` for an unknown tag.
    pub fn update_schemas(&self, tag_name: &str, schemas: Vec<String>) -> crate::Result<()> {
        self.update(tag_name, UpdateOp::SetSchemas(schemas))?;
        Ok(())
    }

    /// Reads the whole file into memory; a missing file is an empty
    /// registry (the file is created lazily on first `add`).
    fn load(&self) -> crate::Result<ConfigFile> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ConfigFile::default());
            }
            Err(e) => {
                return Err(DbProbeError::config_with_source(
                    format!("Could not read config file at {}", self.path.display()),
                    e,
                ));
            }
        };
        serde_json::from_str(&contents).map_err(|e| {
            DbProbeError::config_with_source(
                format!("Config file at {} is not valid JSON", self.path.display()),
                e,
            )
        })
    }

    /// Validates and atomically rewrites the whole file.
    ///
    /// Write goes to a temp file in the same directory followed by a
    /// rename, so a concurrent reader never observes a torn file. There is
    /// deliberately no cross-process lock (last-writer-wins).
    fn persist(&self, file: &ConfigFile) -> crate::Result<()> {
        file.validate()?;

        let dir = self.path.parent().ok_or_else(|| {
            DbProbeError::config(format!(
                "Config path {} has no parent directory",
                self.path.display()
            ))
        })?;
        std::fs::create_dir_all(dir)
            .map_err(|e| DbProbeError::io(format!("Could not create {}", dir.display()), e))?;

        let contents = serde_json::to_vec_pretty(file)
            .map_err(|e| DbProbeError::serialization("config file", e))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, contents)
            .map_err(|e| DbProbeError::io(format!("Could not write {}", tmp_path.display()), e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            DbProbeError::io(format!("Could not update {}", self.path.display()), e)
        })
    }
}

/// Applies a non-rename update to one entry, keeping the URL and the
/// structured fields in lockstep.
fn apply_entry_update(entry: &mut ConnectionEntry, op: UpdateOp) -> crate::Result<()> {
    match op {
        UpdateOp::RenameTag(_) => {
            return Err(DbProbeError::validation(
                "Renames must go through ConfigStore::update",
            ));
        }
        UpdateOp::SetSslMode(mode) => {
            entry.ssl_mode = mode;
            entry.url = ssl::apply_to_url(&entry.url, mode)?;
        }
        UpdateOp::SetUsername(username) => {
            let mut url = parse_connection_url(&entry.url)?;
            url.set_username(&username)
                .map_err(|()| DbProbeError::validation("Cannot set username on this URL"))?;
            entry.url = url.to_string();
        }
        UpdateOp::SetPassword(password) => {
            let mut url = parse_connection_url(&entry.url)?;
            url.set_password(Some(&password))
                .map_err(|()| DbProbeError::validation("Cannot set password on this URL"))?;
            entry.url = url.to_string();
        }
        UpdateOp::SetHost(host) => {
            let mut url = parse_connection_url(&entry.url)?;
            url.set_host(Some(&host)).map_err(|e| {
                DbProbeError::validation(format!("Invalid host '{host}': {e}"))
            })?;
            entry.url = url.to_string();
        }
        UpdateOp::SetPort(port) => {
            let mut url = parse_connection_url(&entry.url)?;
            url.set_port(Some(port))
                .map_err(|()| DbProbeError::validation("Cannot set port on this URL"))?;
            entry.url = url.to_string();
        }
        UpdateOp::SetDatabase(database) => {
            let mut url = parse_connection_url(&entry.url)?;
            url.set_path(&format!("/{database}"));
            entry.url = url.to_string();
        }
        UpdateOp::SetSchemas(schemas) => {
            // Structured list and URL query parameter move in lockstep.
            let mut url = parse_connection_url(&entry.url)?;
            replace_query_param(&mut url, "schema", &schemas.join(","));
            entry.url = url.to_string();
            entry.schemas = Some(schemas);
        }
    }
    Ok(())
}

/// Parses and validates a connection string as `scheme://host...`.
fn parse_connection_url(url: &str) -> crate::Result<Url> {
    let parsed = Url::parse(url).map_err(|e| {
        DbProbeError::validation(format!(
            "Invalid connection URL '{}': {e}",
            crate::error::redact_database_url(url)
        ))
    })?;
    if parsed.host_str().is_none() {
        return Err(DbProbeError::validation(format!(
            "Invalid connection URL '{}': expected scheme://host...",
            crate::error::redact_database_url(url)
        )));
    }
    Ok(parsed)
}

/// Replaces (or appends) a single query parameter, dropping prior copies.
fn replace_query_param(url: &mut Url, key: &str, value: &str) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.set_query(None);
    let mut pairs = url.query_pairs_mut();
    for (k, v) in &kept {
        pairs.append_pair(k, v);
    }
    pairs.append_pair(key, value);
}

/// Reads a schema selection back out of the URL's `schema` parameter.
fn schemas_from_url(url: &str) -> Option<Vec<String>> {
    let parsed = Url::parse(url).ok()?;
    let value = parsed
        .query_pairs()
        .find(|(k, _)| k == "schema")
        .map(|(_, v)| v.into_owned())?;
    let schemas = split_schema_list(&value);
    if schemas.is_empty() { None } else { Some(schemas) }
}

/// Comma-splits and trims a schema list, dropping empty segments.
fn split_schema_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_op_parse_closed_set() {
        assert_eq!(
            UpdateOp::parse("ssl-mode", "verify-ca").unwrap(),
            UpdateOp::SetSslMode(SslMode::VerifyCa)
        );
        assert_eq!(
            UpdateOp::parse("port", "5433").unwrap(),
            UpdateOp::SetPort(5433)
        );
        assert_eq!(
            UpdateOp::parse("schema", "public, sales ,audit").unwrap(),
            UpdateOp::SetSchemas(vec![
                "public".to_string(),
                "sales".to_string(),
                "audit".to_string()
            ])
        );

        let err = UpdateOp::parse("hostname", "x").unwrap_err();
        assert!(err.to_string().contains("Unknown property 'hostname'"));

        let err = UpdateOp::parse("port", "not-a-port").unwrap_err();
        assert!(err.to_string().contains("Invalid port"));

        let err = UpdateOp::parse("port", "0").unwrap_err();
        assert!(err.to_string().contains("Invalid port"));

        let err = UpdateOp::parse("ssl-mode", "mystery").unwrap_err();
        assert!(err.to_string().contains("Invalid SSL mode"));
    }

    #[test]
    fn test_config_file_validate_default_must_exist() {
        let mut file = ConfigFile::default();
        file.default = Some("ghost".to_string());
        assert!(file.validate().is_err());
    }

    #[test]
    fn test_parse_connection_url_requires_host() {
        assert!(parse_connection_url("postgresql://u@host/db").is_ok());
        assert!(parse_connection_url("not a url").is_err());
        assert!(parse_connection_url("data:text/plain,hi").is_err());
    }

    #[test]
    fn test_schemas_from_url() {
        assert_eq!(
            schemas_from_url("postgresql://h/db?schema=a,b"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(schemas_from_url("postgresql://h/db"), None);
        assert_eq!(schemas_from_url("postgresql://h/db?schema="), None);
    }
}
