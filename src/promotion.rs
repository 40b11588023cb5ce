use crate::calc::RuleError;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Students in this class-year (or above) leave the school at promotion time.
pub const GRADUATING_YEAR: u32 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabel {
    pub year: u32,
    /// Section letter(s) after the year number; empty for single-form years ("Y9").
    pub section: String,
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Y{}{}", self.year, self.section)
    }
}

fn class_label_re() -> Option<&'static Regex> {
    static LABEL_RE: OnceLock<Option<Regex>> = OnceLock::new();
    LABEL_RE
        .get_or_init(|| Regex::new(r"^Y(\d+)([A-Za-z]*)$").ok())
        .as_ref()
}

pub fn parse_class_label(label: &str) -> Option<ClassLabel> {
    let caps = class_label_re()?.captures(label.trim())?;
    let year = caps.get(1)?.as_str().parse::<u32>().ok()?;
    let section = caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string();
    Some(ClassLabel { year, section })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SchoolYear {
    start: i32,
    long_suffix: bool,
}

impl SchoolYear {
    fn parse(label: &str) -> Result<Self, RuleError> {
        let bad = || RuleError::InvalidSchoolYear(label.to_string());
        let (a, b) = label.trim().split_once('-').ok_or_else(bad)?;
        if a.len() != 4 || !(b.len() == 2 || b.len() == 4) {
            return Err(bad());
        }
        let start = a.parse::<i32>().map_err(|_| bad())?;
        let end = b.parse::<i32>().map_err(|_| bad())?;
        let long_suffix = b.len() == 4;
        let expected_end = if long_suffix {
            start + 1
        } else {
            (start + 1).rem_euclid(100)
        };
        if end != expected_end {
            return Err(bad());
        }
        Ok(Self { start, long_suffix })
    }

    fn shifted(self, by: i32) -> Self {
        Self {
            start: self.start + by,
            long_suffix: self.long_suffix,
        }
    }
}

impl fmt::Display for SchoolYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.long_suffix {
            write!(f, "{}-{}", self.start, self.start + 1)
        } else {
            write!(f, "{}-{:02}", self.start, (self.start + 1).rem_euclid(100))
        }
    }
}

/// "2025-26" -> "2026-27". Four-digit suffixes keep their width.
pub fn next_school_year(label: &str) -> Result<String, RuleError> {
    Ok(SchoolYear::parse(label)?.shifted(1).to_string())
}

pub fn previous_school_year(label: &str) -> Result<String, RuleError> {
    Ok(SchoolYear::parse(label)?.shifted(-1).to_string())
}

pub fn validate_school_year(label: &str) -> Result<(), RuleError> {
    SchoolYear::parse(label).map(|_| ())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Promotion {
    Promoted {
        class_name: String,
        school_year: String,
    },
    Graduated,
    /// Class label has no year number; the student is left untouched.
    Unparseable,
}

pub fn promote(class_name: &str, current_year: &str) -> Result<Promotion, RuleError> {
    let next_year = next_school_year(current_year)?;
    let Some(label) = parse_class_label(class_name) else {
        return Ok(Promotion::Unparseable);
    };
    if label.year >= GRADUATING_YEAR {
        return Ok(Promotion::Graduated);
    }
    let promoted = ClassLabel {
        year: label.year + 1,
        section: label.section,
    };
    Ok(Promotion::Promoted {
        class_name: promoted.to_string(),
        school_year: next_year,
    })
}
