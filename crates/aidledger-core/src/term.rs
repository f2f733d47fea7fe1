//! Academic term identifiers.
//!
//! Terms are the boundary at which disbursements happen and therefore the only
//! points at which an automated deduction can be withheld. A term is written
//! `<year>-S<semester>`, e.g. `2026-S1`, and terms order chronologically.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of semesters in one academic year.
pub const SEMESTERS_PER_YEAR: u8 = 2;

/// One academic term (semester).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TermId {
    year: u16,
    semester: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid term id {0:?}, expected <year>-S<semester>")]
pub struct TermParseError(pub String);

impl TermId {
    /// Build a term, rejecting semesters outside `1..=SEMESTERS_PER_YEAR`.
    pub fn new(year: u16, semester: u8) -> Option<Self> {
        (1..=SEMESTERS_PER_YEAR)
            .contains(&semester)
            .then_some(Self { year, semester })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn semester(&self) -> u8 {
        self.semester
    }

    /// The term immediately after this one, or `None` past the last
    /// representable year.
    pub fn next(&self) -> Option<Self> {
        if self.semester < SEMESTERS_PER_YEAR {
            Some(Self {
                year: self.year,
                semester: self.semester + 1,
            })
        } else {
            Some(Self {
                year: self.year.checked_add(1)?,
                semester: 1,
            })
        }
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-S{}", self.year, self.semester)
    }
}

impl FromStr for TermId {
    type Err = TermParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TermParseError(s.to_string());
        let (year, semester) = s.trim().split_once("-S").ok_or_else(err)?;
        let year: u16 = year.parse().map_err(|_| err())?;
        let semester: u8 = semester.parse().map_err(|_| err())?;
        Self::new(year, semester).ok_or_else(err)
    }
}

impl TryFrom<String> for TermId {
    type Error = TermParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TermId> for String {
    fn from(term: TermId) -> Self {
        term.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(s: &str) -> TermId {
        s.parse().unwrap()
    }

    #[test]
    fn next_within_year() {
        assert_eq!(term("2026-S1").next(), Some(term("2026-S2")));
    }

    #[test]
    fn next_rolls_over_year() {
        assert_eq!(term("2026-S2").next(), Some(term("2027-S1")));
    }

    #[test]
    fn last_representable_term_has_no_next() {
        let last = term("65535-S2");
        assert_eq!(last.next(), None);
        assert_eq!(term("65535-S1").next(), Some(last));
        assert!("65536-S1".parse::<TermId>().is_err());
    }

    #[test]
    fn ordering_is_chronological() {
        let mut terms = vec![term("2027-S1"), term("2026-S2"), term("2026-S1")];
        terms.sort();
        assert_eq!(terms, vec![term("2026-S1"), term("2026-S2"), term("2027-S1")]);
    }

    #[test]
    fn rejects_bad_semester() {
        assert!("2026-S0".parse::<TermId>().is_err());
        assert!("2026-S3".parse::<TermId>().is_err());
        assert!("2026".parse::<TermId>().is_err());
        assert!("S1-2026".parse::<TermId>().is_err());
    }

    #[test]
    fn json_is_a_plain_string() {
        let json = serde_json::to_string(&term("2026-S2")).unwrap();
        assert_eq!(json, "\"2026-S2\"");
        let parsed: TermId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, term("2026-S2"));
        assert!(serde_json::from_str::<TermId>("\"2026-S9\"").is_err());
    }
}
