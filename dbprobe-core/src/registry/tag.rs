//! Tag generation for stored connections.
//!
//! A tag is the stable identifier callers use to address a connection.
//! Generation is deterministic for a fixed set of existing tags: a
//! user-supplied candidate is honored verbatim when free and suffixed with
//! an incrementing integer when taken; with no candidate, a 24-name
//! symbolic sequence is walked in order.

use crate::error::DbProbeError;

/// Maximum accepted tag length, in characters.
pub const MAX_TAG_LENGTH: usize = 50;

/// The symbolic sequence used when no candidate tag is supplied.
pub const TAG_SEQUENCE: [&str; 24] = [
    "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "iota", "kappa",
    "lambda", "mu", "nu", "xi", "omicron", "pi", "rho", "sigma", "tau", "upsilon", "phi", "chi",
    "psi", "omega",
];

/// Outcome of a tag generation request.
///
/// Transient: returned to the caller of `add`/rename for messaging, never
/// stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagGenerationResult {
    /// The tag that was actually assigned
    pub tag: String,
    /// The requested candidate, when one was given
    pub original_tag: Option<String>,
    /// True when the candidate collided and a suffix was appended
    pub was_conflict_resolved: bool,
}

/// Validates a candidate tag before generation is attempted.
///
/// # Errors
/// Returns a validation error when the tag is empty, contains whitespace,
/// or exceeds [`MAX_TAG_LENGTH`] characters.
pub fn validate_tag(tag: &str) -> crate::Result<()> {
    if tag.is_empty() {
        return Err(DbProbeError::validation("Tag must not be empty"));
    }
    if tag.chars().any(char::is_whitespace) {
        return Err(DbProbeError::validation(format!(
            "Tag '{tag}' must not contain whitespace"
        )));
    }
    if tag.chars().count() > MAX_TAG_LENGTH {
        return Err(DbProbeError::validation(format!(
            "Tag must be at most {MAX_TAG_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Produces a unique tag against the set described by `in_use`.
///
/// With a candidate, the candidate is validated and returned unchanged if
/// free; on collision, `candidate-1`, `candidate-2`, … are tried until one
/// is free. Without a candidate, [`TAG_SEQUENCE`] is walked in order, and
/// once exhausted `alpha-2`, `alpha-3`, … guarantee termination.
///
/// # Errors
/// Returns a validation error for a malformed candidate; generation itself
/// cannot fail.
pub fn generate_tag<F>(candidate: Option<&str>, in_use: F) -> crate::Result<TagGenerationResult>
where
    F: Fn(&str) -> bool,
{
    if let Some(candidate) = candidate {
        validate_tag(candidate)?;

        if !in_use(candidate) {
            return Ok(TagGenerationResult {
                tag: candidate.to_string(),
                original_tag: Some(candidate.to_string()),
                was_conflict_resolved: false,
            });
        }

        let mut suffix = 1u64;
        loop {
            let attempt = format!("{candidate}-{suffix}");
            if !in_use(&attempt) {
                return Ok(TagGenerationResult {
                    tag: attempt,
                    original_tag: Some(candidate.to_string()),
                    was_conflict_resolved: true,
                });
            }
            suffix += 1;
        }
    }

    for name in TAG_SEQUENCE {
        if !in_use(name) {
            return Ok(TagGenerationResult {
                tag: name.to_string(),
                original_tag: None,
                was_conflict_resolved: false,
            });
        }
    }

    // Sequence exhausted: suffix the first symbol.
    let mut round = 2u64;
    loop {
        let attempt = format!("{}-{round}", TAG_SEQUENCE[0]);
        if !in_use(&attempt) {
            return Ok(TagGenerationResult {
                tag: attempt,
                original_tag: None,
                was_conflict_resolved: false,
            });
        }
        round += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn used(tags: &[&str]) -> HashSet<String> {
        tags.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn test_candidate_honored_when_free() {
        let existing = used(&[]);
        let result = generate_tag(Some("prod"), |t| existing.contains(t)).unwrap();
        assert_eq!(result.tag, "prod");
        assert_eq!(result.original_tag.as_deref(), Some("prod"));
        assert!(!result.was_conflict_resolved);
    }

    #[test]
    fn test_candidate_conflict_appends_suffix() {
        let existing = used(&["prod"]);
        let result = generate_tag(Some("prod"), |t| existing.contains(t)).unwrap();
        assert_eq!(result.tag, "prod-1");
        assert_eq!(result.original_tag.as_deref(), Some("prod"));
        assert!(result.was_conflict_resolved);

        let existing = used(&["prod", "prod-1"]);
        let result = generate_tag(Some("prod"), |t| existing.contains(t)).unwrap();
        assert_eq!(result.tag, "prod-2");
    }

    #[test]
    fn test_sequence_walk_skips_used_symbols() {
        let existing = used(&["alpha", "beta"]);
        let result = generate_tag(None, |t| existing.contains(t)).unwrap();
        assert_eq!(result.tag, "gamma");
        assert_eq!(result.original_tag, None);
        assert!(!result.was_conflict_resolved);
    }

    #[test]
    fn test_sequence_exhaustion_suffixes_first_symbol() {
        let mut existing: HashSet<String> =
            TAG_SEQUENCE.iter().map(|t| (*t).to_string()).collect();
        let result = generate_tag(None, |t| existing.contains(t)).unwrap();
        assert_eq!(result.tag, "alpha-2");

        existing.insert("alpha-2".to_string());
        let result = generate_tag(None, |t| existing.contains(t)).unwrap();
        assert_eq!(result.tag, "alpha-3");
    }

    #[test]
    fn test_determinism_for_fixed_existing_set() {
        let existing = used(&["alpha", "gamma"]);
        let a = generate_tag(None, |t| existing.contains(t)).unwrap();
        let b = generate_tag(None, |t| existing.contains(t)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.tag, "beta");
    }

    #[test]
    fn test_candidate_validation() {
        let existing = used(&[]);

        let err = generate_tag(Some(""), |t| existing.contains(t)).unwrap_err();
        assert!(err.to_string().contains("empty"));

        let err = generate_tag(Some("my tag"), |t| existing.contains(t)).unwrap_err();
        assert!(err.to_string().contains("whitespace"));

        let long = "x".repeat(MAX_TAG_LENGTH + 1);
        let err = generate_tag(Some(&long), |t| existing.contains(t)).unwrap_err();
        assert!(err.to_string().contains("50"));

        // Exactly at the limit is fine.
        let at_limit = "x".repeat(MAX_TAG_LENGTH);
        assert!(generate_tag(Some(&at_limit), |t| existing.contains(t)).is_ok());
    }
}
