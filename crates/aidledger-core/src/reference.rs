//! Payment references.
//!
//! A reference is the caller-visible identifier for one payment attempt and the
//! key for idempotent confirmation. Format:
//!
//! ```text
//! <PREFIX>-<borrowerId>-<timestampMillis>
//! LOAN-STU0042-1760601600000
//! ```
//!
//! The prefix names the target kind (`LOAN`, `DON`, `EVT`). Borrower ids may
//! themselves contain `-`, so parsing splits on the first and last separator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::BorrowerId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed payment reference {0:?}")]
pub struct ReferenceParseError(pub String);

/// Globally unique reference for a single payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference(String);

/// The parts of a parsed [`Reference`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceParts {
    pub prefix: String,
    pub borrower: BorrowerId,
    pub timestamp_ms: i64,
}

impl Reference {
    /// Format a reference from its parts.
    ///
    /// The prefix is upper-cased; an empty borrower id is allowed by the format
    /// but never produced by the payment machine.
    pub fn new(prefix: &str, borrower: &BorrowerId, timestamp_ms: i64) -> Self {
        Self(format!(
            "{}-{}-{}",
            prefix.to_ascii_uppercase(),
            borrower.as_str(),
            timestamp_ms
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a reference back into prefix, borrower and timestamp.
    pub fn parts(&self) -> ReferenceParts {
        // Constructed references are always well-formed; see `FromStr`.
        split(&self.0).unwrap_or_else(|| ReferenceParts {
            prefix: String::new(),
            borrower: BorrowerId::new(""),
            timestamp_ms: 0,
        })
    }
}

fn split(s: &str) -> Option<ReferenceParts> {
    let (prefix, rest) = s.split_once('-')?;
    let (borrower, ts) = rest.rsplit_once('-')?;
    if prefix.is_empty()
        || !prefix.bytes().all(|b| b.is_ascii_uppercase())
        || borrower.is_empty()
    {
        return None;
    }
    let timestamp_ms: i64 = ts.parse().ok()?;
    if timestamp_ms < 0 {
        return None;
    }
    Some(ReferenceParts {
        prefix: prefix.to_string(),
        borrower: BorrowerId::new(borrower),
        timestamp_ms,
    })
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Reference {
    type Err = ReferenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        split(s)
            .map(|_| Self(s.to_string()))
            .ok_or_else(|| ReferenceParseError(s.to_string()))
    }
}

impl TryFrom<String> for Reference {
    type Error = ReferenceParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_matches_convention() {
        let r = Reference::new("loan", &BorrowerId::new("STU0042"), 1_760_601_600_000);
        assert_eq!(r.as_str(), "LOAN-STU0042-1760601600000");
    }

    #[test]
    fn parts_recover_inputs() {
        let r = Reference::new("DON", &BorrowerId::new("STU0042"), 17);
        let parts = r.parts();
        assert_eq!(parts.prefix, "DON");
        assert_eq!(parts.borrower.as_str(), "STU0042");
        assert_eq!(parts.timestamp_ms, 17);
    }

    #[test]
    fn borrower_with_dashes() {
        let r: Reference = "EVT-mak-2019-0042-1760601600000".parse().unwrap();
        let parts = r.parts();
        assert_eq!(parts.prefix, "EVT");
        assert_eq!(parts.borrower.as_str(), "mak-2019-0042");
        assert_eq!(parts.timestamp_ms, 1_760_601_600_000);
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "LOAN", "LOAN-1760601600000", "loan-STU1-5", "LOAN-STU1-x", "LOAN--5"] {
            assert!(bad.parse::<Reference>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn whitespace_trimmed() {
        let r: Reference = "  LOAN-STU1-5 ".parse().unwrap();
        assert_eq!(r.as_str(), "LOAN-STU1-5");
    }
}
