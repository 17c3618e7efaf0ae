//! SQL identifier validation.
//!
//! Table and column names are the only batch-controlled text ever
//! interpolated into SQL; everything else is bound as a parameter. Every
//! name must pass this check before statement assembly.

use crate::error::{DomainError, DomainResult};

/// PostgreSQL identifier length limit.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Validates and lowercases one identifier.
///
/// Accepted shape after lowercasing: `[a-z_][a-z0-9_]*`, at most
/// [`MAX_IDENTIFIER_LEN`] characters.
///
/// # Errors
///
/// Returns [`DomainError::InvalidIdentifier`] for anything else.
pub fn validate_identifier(name: &str) -> DomainResult<String> {
    let lowered = name.to_lowercase();
    let mut chars = lowered.chars();
    let valid_first = matches!(chars.next(), Some('a'..='z') | Some('_'));
    let valid_rest = chars.all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_'));
    if !valid_first || !valid_rest || lowered.len() > MAX_IDENTIFIER_LEN {
        return Err(DomainError::InvalidIdentifier {
            name: name.to_string(),
        });
    }
    Ok(lowered)
}

/// Validates the column name derived from an id or envelope key
/// (`_<key>`).
pub fn validate_prefixed(key: &str) -> DomainResult<String> {
    validate_identifier(&format!("_{key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_names() {
        assert_eq!(validate_identifier("xcorte").unwrap(), "xcorte");
        assert_eq!(validate_identifier("XCORTE").unwrap(), "xcorte");
        assert_eq!(validate_identifier("_ver").unwrap(), "_ver");
        assert_eq!(validate_identifier("vta2").unwrap(), "vta2");
    }

    #[test]
    fn test_rejects_injection_shapes() {
        for bad in [
            "",
            "1abc",
            "x corte",
            "x;drop table t",
            "x\"y",
            "x'y",
            "xcorte--",
            "x.y",
            "café",
        ] {
            assert!(validate_identifier(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_rejects_oversized_names() {
        let long = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(validate_identifier(&long).is_err());
        let max = "a".repeat(MAX_IDENTIFIER_LEN);
        assert!(validate_identifier(&max).is_ok());
    }

    #[test]
    fn test_prefixed_keys() {
        assert_eq!(validate_prefixed("hash_id").unwrap(), "_hash_id");
        assert!(validate_prefixed("bad key").is_err());
    }
}
