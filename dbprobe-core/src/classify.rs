//! Transport-error classification.
//!
//! Raw driver errors are matched against a ranked list of
//! `(patterns, category)` pairs; the first hit wins. Matching is kept
//! separate from message formatting so the fragile part (substring
//! patterns over driver error text, which shifts across driver versions)
//! stays small and independently testable. Anything unmatched passes
//! through unmodified, never swallowed or replaced with a generic message.

use crate::error::{DbProbeError, FailureCategory};
use crate::registry::ResolvedConnection;

/// Ranked classification rules, evaluated in order against the lowercased
/// error text. More specific TLS/certificate patterns come before the
/// broad timeout patterns.
const RULES: &[(&[&str], FailureCategory)] = &[
    (
        &[
            "hostname mismatch",
            "notvalidforname",
            "certificate was not valid",
            "not valid for",
        ],
        FailureCategory::TlsHostnameMismatch,
    ),
    (
        &[
            "ssl is required",
            "ssl connection is required",
            "tls required",
            "requires tls",
            "connection is insecure",
        ],
        FailureCategory::TlsRequired,
    ),
    (
        &[
            "does not support ssl",
            "ssl not supported",
            "server does not support tls",
            "unsupported frontend protocol",
        ],
        FailureCategory::SslUnsupported,
    ),
    (
        &[
            "password authentication failed",
            "authentication failed",
            "authentication error",
            "scram",
            "28p01",
        ],
        FailureCategory::AuthFailed,
    ),
    (
        &["connection refused", "econnrefused"],
        FailureCategory::ConnectionRefused,
    ),
    (
        &[
            "host unreachable",
            "no route to host",
            "network is unreachable",
            "ehostunreach",
        ],
        FailureCategory::HostUnreachable,
    ),
    (
        &[
            "failed to lookup address",
            "name or service not known",
            "nodename nor servname",
            "enotfound",
            "dns error",
        ],
        FailureCategory::DnsFailure,
    ),
    (
        &["timed out", "timeout", "etimedout"],
        FailureCategory::Timeout,
    ),
];

/// Matches raw error text against the ranked rules.
///
/// Exposed separately from [`classify`] so the matching layer can be
/// tested without constructing full errors.
pub fn match_category(error_text: &str) -> Option<FailureCategory> {
    let lowered = error_text.to_lowercase();
    RULES
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|p| lowered.contains(p)))
        .map(|(_, category)| *category)
}

/// Formats the user-facing diagnostic for a classified failure: the
/// concrete category, remediation steps, and where applicable the exact
/// configuration-update invocation for this connection's tag.
fn format_diagnostic(
    category: FailureCategory,
    connection: &ResolvedConnection,
    raw: &str,
) -> String {
    let tag = &connection.tag;
    let steps: Vec<String> = match category {
        FailureCategory::ConnectionRefused => vec![
            "Check that the database server is running and accepting connections".to_string(),
            format!(
                "Verify host and port: `dbprobe connections update {tag} host <host>` / `dbprobe connections update {tag} port <port>`"
            ),
        ],
        FailureCategory::HostUnreachable => vec![
            "Check network connectivity, VPN, and firewall rules".to_string(),
            format!("Verify the host: `dbprobe connections update {tag} host <host>`"),
        ],
        FailureCategory::DnsFailure => vec![
            "The hostname did not resolve; check for typos".to_string(),
            format!("Fix it with `dbprobe connections update {tag} host <host>`"),
        ],
        FailureCategory::Timeout => vec![
            "The server did not respond within the timeout".to_string(),
            "Re-run with a larger timeout, or check that the host and port are reachable"
                .to_string(),
        ],
        FailureCategory::TlsRequired => vec![
            "The server or a proxy in front of it requires TLS".to_string(),
            format!("Enable it: `dbprobe connections update {tag} ssl-mode require`"),
        ],
        FailureCategory::TlsHostnameMismatch => vec![
            "The certificate is valid but was issued for a different hostname".to_string(),
            format!(
                "Use `dbprobe connections update {tag} ssl-mode verify-ca` to keep chain verification while skipping the hostname check"
            ),
        ],
        FailureCategory::SslUnsupported => vec![
            "The server does not speak SSL".to_string(),
            format!("Disable it: `dbprobe connections update {tag} ssl-mode disable`"),
        ],
        FailureCategory::AuthFailed => vec![
            "Username or password was rejected".to_string(),
            format!(
                "Update credentials: `dbprobe connections update {tag} username <user>` / `dbprobe connections update {tag} password <pass>`"
            ),
        ],
    };

    let mut message = format!("{category} for connection '{tag}': {raw}");
    for step in steps {
        message.push_str("\n  - ");
        message.push_str(&step);
    }
    message
}

/// Collects the display text of an error and its whole source chain, so a
/// pattern buried in a wrapped driver error still matches.
fn error_chain_text(error: &DbProbeError) -> String {
    let mut text = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

/// Classifies a low-level failure into an actionable diagnostic.
///
/// Matching errors become [`DbProbeError::Transport`] with remediation
/// text referencing the connection's tag; anything else is returned
/// unchanged.
pub fn classify(error: DbProbeError, connection: &ResolvedConnection) -> DbProbeError {
    // Already-classified and registry-level errors pass straight through.
    if !matches!(
        error,
        DbProbeError::Introspection { .. } | DbProbeError::Io { .. }
    ) {
        return error;
    }

    let raw = error_chain_text(&error);
    match match_category(&raw) {
        Some(category) => {
            tracing::debug!("Classified connection failure as {category}");
            DbProbeError::Transport {
                category,
                message: format_diagnostic(category, connection, &raw),
            }
        }
        None => error,
    }
}
