//! SSL policy translation.
//!
//! Maps the six symbolic SSL modes onto (a) the `sslmode` connection-string
//! parameter and (b) transport-layer verification flags. The mapping is
//! deliberate about its weak spots: `allow`, `prefer`, and `require` are
//! equivalent at the transport layer (the driver handles the plaintext
//! fallback nuance), and `verify-ca` verifies the certificate chain while
//! explicitly suppressing hostname verification. Connection-management
//! remediation text references that exact semantic, so it must not be
//! upgraded to full verification.

use crate::error::DbProbeError;
use serde::{Deserialize, Serialize};
use url::Url;

/// Symbolic transport-security policy for a stored connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Allow,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

/// Transport-layer security options derived from an [`SslMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsOptions {
    /// Whether TLS is attempted at all
    pub enabled: bool,
    /// Whether the peer certificate chain is verified
    pub verify_certificate_chain: bool,
    /// Whether the peer hostname is checked against the certificate
    pub verify_hostname: bool,
}

impl SslMode {
    /// All modes in policy order, weakest first.
    pub const ALL: [SslMode; 6] = [
        SslMode::Disable,
        SslMode::Allow,
        SslMode::Prefer,
        SslMode::Require,
        SslMode::VerifyCa,
        SslMode::VerifyFull,
    ];

    /// The wire word used in connection strings and the config file.
    pub fn as_str(self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    /// Translates the mode into transport-layer options.
    pub fn tls_options(self) -> TlsOptions {
        match self {
            SslMode::Disable => TlsOptions {
                enabled: false,
                verify_certificate_chain: false,
                verify_hostname: false,
            },
            // Equivalent at the transport layer: TLS attempted, peer
            // verification disabled. The modes differ only in whether a
            // plaintext fallback is acceptable during negotiation.
            SslMode::Allow | SslMode::Prefer | SslMode::Require => TlsOptions {
                enabled: true,
                verify_certificate_chain: false,
                verify_hostname: false,
            },
            // Chain verified, hostname check suppressed on purpose.
            SslMode::VerifyCa => TlsOptions {
                enabled: true,
                verify_certificate_chain: true,
                verify_hostname: false,
            },
            SslMode::VerifyFull => TlsOptions {
                enabled: true,
                verify_certificate_chain: true,
                verify_hostname: true,
            },
        }
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SslMode {
    type Err = DbProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(DbProbeError::validation(format!(
                "Invalid SSL mode '{other}'. Expected one of: disable, allow, prefer, require, verify-ca, verify-full"
            ))),
        }
    }
}

/// Augments a connection string with the `sslmode` parameter for `mode`.
///
/// Any pre-existing `ssl` or `sslmode` query parameter is stripped first,
/// so repeated updates never accumulate duplicate parameters.
///
/// # Errors
/// Returns a validation error if `url` does not parse.
pub fn apply_to_url(url: &str, mode: SslMode) -> crate::Result<String> {
    let mut parsed = Url::parse(url).map_err(|e| {
        DbProbeError::validation(format!(
            "Invalid connection string '{}': {e}",
            crate::error::redact_database_url(url)
        ))
    })?;

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "ssl" && k != "sslmode")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    parsed.set_query(None);
    {
        let mut pairs = parsed.query_pairs_mut();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair("sslmode", mode.as_str());
    }

    Ok(parsed.to_string())
}

/// Removes the `ssl` and `sslmode` query parameters from a connection
/// string without appending a replacement.
///
/// `sslmode` is registry vocabulary, not driver vocabulary everywhere: the
/// MongoDB driver rejects it at parse time, so the document analyzer strips
/// it and applies TLS structurally instead.
///
/// # Errors
/// Returns a validation error if `url` does not parse.
pub fn strip_ssl_params(url: &str) -> crate::Result<String> {
    let mut parsed = Url::parse(url).map_err(|e| {
        DbProbeError::validation(format!(
            "Invalid connection string '{}': {e}",
            crate::error::redact_database_url(url)
        ))
    })?;

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "ssl" && k != "sslmode")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    parsed.set_query(None);
    if !kept.is_empty() {
        let mut pairs = parsed.query_pairs_mut();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
    }

    Ok(parsed.to_string())
}

/// Reads the `sslmode` parameter back out of a connection string, if any.
pub fn mode_from_url(url: &str) -> Option<SslMode> {
    let parsed = Url::parse(url).ok()?;
    let value = parsed
        .query_pairs()
        .find(|(k, _)| k == "sslmode")
        .map(|(_, v)| v.into_owned())?;
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_options_per_mode() {
        assert!(!SslMode::Disable.tls_options().enabled);

        for mode in [SslMode::Allow, SslMode::Prefer, SslMode::Require] {
            let tls = mode.tls_options();
            assert!(tls.enabled);
            assert!(!tls.verify_certificate_chain);
            assert!(!tls.verify_hostname);
        }

        let verify_ca = SslMode::VerifyCa.tls_options();
        assert!(verify_ca.enabled);
        assert!(verify_ca.verify_certificate_chain);
        // Hostname verification stays off for verify-ca.
        assert!(!verify_ca.verify_hostname);

        let verify_full = SslMode::VerifyFull.tls_options();
        assert!(verify_full.verify_certificate_chain);
        assert!(verify_full.verify_hostname);
    }

    #[test]
    fn test_url_round_trip_all_modes() {
        for mode in SslMode::ALL {
            let augmented = apply_to_url("postgresql://u:p@host:5432/db", mode).unwrap();
            assert_eq!(mode_from_url(&augmented), Some(mode), "mode {mode}");
        }
    }

    #[test]
    fn test_repeated_augmentation_never_duplicates() {
        let mut url = "postgresql://u@host/db?application_name=probe&sslmode=disable".to_string();
        for mode in [SslMode::Require, SslMode::VerifyCa, SslMode::Prefer] {
            url = apply_to_url(&url, mode).unwrap();
        }

        let parsed = Url::parse(&url).unwrap();
        let ssl_params = parsed
            .query_pairs()
            .filter(|(k, _)| k == "sslmode" || k == "ssl")
            .count();
        assert_eq!(ssl_params, 1);
        assert_eq!(mode_from_url(&url), Some(SslMode::Prefer));

        // Unrelated parameters survive the rewrite.
        assert!(url.contains("application_name=probe"));
    }

    #[test]
    fn test_legacy_ssl_param_is_stripped() {
        let url = apply_to_url("mongodb://host/db?ssl=true", SslMode::Require).unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert!(parsed.query_pairs().all(|(k, _)| k != "ssl"));
        assert_eq!(mode_from_url(&url), Some(SslMode::Require));
    }

    #[test]
    fn test_strip_removes_ssl_params_and_trailing_query() {
        let stored = apply_to_url("mongodb://localhost:27017/db", SslMode::Prefer).unwrap();
        assert_eq!(
            strip_ssl_params(&stored).unwrap(),
            "mongodb://localhost:27017/db"
        );

        let stripped =
            strip_ssl_params("mongodb://host/db?ssl=true&authSource=admin&sslmode=require")
                .unwrap();
        assert_eq!(stripped, "mongodb://host/db?authSource=admin");
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        let err = "verify-everything".parse::<SslMode>().unwrap_err();
        assert!(err.to_string().contains("Invalid SSL mode"));
    }

    #[test]
    fn test_serde_kebab_words() {
        for mode in SslMode::ALL {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
            let back: SslMode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, mode);
        }
    }
}
