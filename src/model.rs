//! Typed rows for every table, built at the store boundary.
//!
//! Each `COLUMNS` constant lists the select order expected by the matching `from_row`.

use crate::calc::{self, AttendanceStatus, GradeBanding, RuleError};
use crate::homework::{self, Attachment, DueState, HomeworkStatus};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::Row;
use serde::Serialize;

fn text_enum<T>(
    r: &Row<'_>,
    idx: usize,
    parse: impl Fn(&str) -> Result<T, RuleError>,
) -> rusqlite::Result<T> {
    let raw: String = r.get(idx)?;
    parse(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolClass {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub student_count: i64,
}

impl SchoolClass {
    pub const COLUMNS: &'static str = "c.id, c.name, c.active,
        (SELECT COUNT(*) FROM students s WHERE s.class_name = c.name AND s.status = 'active')";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            name: r.get(1)?,
            active: r.get::<_, i64>(2)? != 0,
            student_count: r.get(3)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub active: bool,
}

impl Subject {
    pub const COLUMNS: &'static str = "id, name, active";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            name: r.get(1)?,
            active: r.get::<_, i64>(2)? != 0,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSession {
    pub id: String,
    pub date_key: String,
    pub class_name: String,
    pub subject: String,
    pub time: String,
    pub title: String,
    pub created_at: String,
}

impl ClassSession {
    pub const COLUMNS: &'static str = "id, date_key, class_name, subject, time, title, created_at";

    /// Sessions are keyed by class, time slot and day so re-adding the same lesson upserts it.
    pub fn make_id(class_name: &str, time: &str, date_key: &str) -> String {
        format!("{}-{}-{}", class_name, time, date_key)
    }

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            date_key: r.get(1)?,
            class_name: r.get(2)?,
            subject: r.get(3)?,
            time: r.get(4)?,
            title: r.get(5)?,
            created_at: r.get(6)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StudentStatus {
    Active,
    Archived,
    Graduated,
}

impl StudentStatus {
    pub fn parse(s: &str) -> Result<Self, RuleError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            "graduated" => Ok(Self::Graduated),
            _ => Err(RuleError::unknown("student status", s)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Graduated => "graduated",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub class_name: String,
    pub student_no: i64,
    pub email: Option<String>,
    pub parent_contact: Option<String>,
    pub date_of_birth: Option<String>,
    pub notes: Option<String>,
    pub school_year: String,
    pub status: StudentStatus,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl Student {
    pub const COLUMNS: &'static str = "id, name, class_name, student_no, email, parent_contact,
        date_of_birth, notes, school_year, status, created_at, updated_at";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            name: r.get(1)?,
            class_name: r.get(2)?,
            student_no: r.get(3)?,
            email: r.get(4)?,
            parent_contact: r.get(5)?,
            date_of_birth: r.get(6)?,
            notes: r.get(7)?,
            school_year: r.get(8)?,
            status: text_enum(r, 9, StudentStatus::parse)?,
            created_at: r.get(10)?,
            updated_at: r.get(11)?,
        })
    }

    pub fn display_name(&self) -> String {
        format!("{} - {}", self.student_no, self.name)
    }

    pub fn initials(&self) -> String {
        let words: Vec<&str> = self.name.split_whitespace().collect();
        if words.len() >= 2 {
            words
                .iter()
                .take(2)
                .filter_map(|w| w.chars().next())
                .collect()
        } else {
            self.name.chars().take(2).collect::<String>().to_uppercase()
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut v = serde_json::to_value(self).unwrap_or_default();
        v["displayName"] = serde_json::Value::String(self.display_name());
        v["initials"] = serde_json::Value::String(self.initials());
        v
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub date_key: String,
    pub session_id: String,
    pub student_id: String,
    pub status: Option<AttendanceStatus>,
    pub comment: String,
    pub updated_at: Option<String>,
}

impl AttendanceRecord {
    pub const COLUMNS: &'static str = "date_key, session_id, student_id, status, comment, updated_at";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        let status = match r.get::<_, Option<String>>(3)? {
            Some(s) => Some(
                AttendanceStatus::parse(&s).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
                })?,
            ),
            None => None,
        };
        Ok(Self {
            date_key: r.get(0)?,
            session_id: r.get(1)?,
            student_id: r.get(2)?,
            status,
            comment: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
            updated_at: r.get(5)?,
        })
    }

    /// Placeholder for a student with no stored row yet.
    pub fn unmarked(date_key: &str, session_id: &str, student_id: &str) -> Self {
        Self {
            date_key: date_key.to_string(),
            session_id: session_id.to_string(),
            student_id: student_id.to_string(),
            status: None,
            comment: String::new(),
            updated_at: None,
        }
    }

    pub fn status_text(&self) -> &'static str {
        match self.status {
            None => "Not Marked",
            Some(AttendanceStatus::Present) => "Present",
            Some(AttendanceStatus::Absent) => "Absent",
            Some(AttendanceStatus::Late) => "Late",
        }
    }

    pub fn has_comment(&self) -> bool {
        !self.comment.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: String,
    pub student_id: String,
    pub class_name: String,
    pub subject: String,
    pub assessment_type: String,
    pub assessment_title: String,
    pub score: f64,
    pub max_score: f64,
    pub date: String,
    pub notes: Option<String>,
}

impl Grade {
    pub const COLUMNS: &'static str = "id, student_id, class_name, subject, assessment_type,
        assessment_title, score, max_score, date, notes";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            student_id: r.get(1)?,
            class_name: r.get(2)?,
            subject: r.get(3)?,
            assessment_type: r.get(4)?,
            assessment_title: r.get(5)?,
            score: r.get(6)?,
            max_score: r.get(7)?,
            date: r.get(8)?,
            notes: r.get(9)?,
        })
    }

    pub fn banding(&self) -> GradeBanding {
        calc::grade(self.score, self.max_score, &self.class_name)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut v = serde_json::to_value(self).unwrap_or_default();
        v["banding"] = serde_json::to_value(self.banding()).unwrap_or_default();
        v
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Homework {
    pub id: String,
    pub class_name: String,
    pub subject: String,
    pub title: String,
    pub description: Option<String>,
    pub due_date: NaiveDate,
    pub assigned_date: NaiveDate,
    pub status: HomeworkStatus,
    pub attachments: Vec<Attachment>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl Homework {
    pub const COLUMNS: &'static str = "id, class_name, subject, title, description, due_date,
        assigned_date, status, attachments, created_at, updated_at";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            class_name: r.get(1)?,
            subject: r.get(2)?,
            title: r.get(3)?,
            description: r.get(4)?,
            due_date: text_enum(r, 5, calc::parse_date_key)?,
            assigned_date: text_enum(r, 6, calc::parse_date_key)?,
            status: text_enum(r, 7, HomeworkStatus::parse)?,
            attachments: homework::parse_attachments(r.get::<_, Option<String>>(8)?.as_deref()),
            created_at: r.get(9)?,
            updated_at: r.get(10)?,
        })
    }

    pub fn due_state(&self, today: NaiveDate) -> DueState {
        homework::due_state(self.due_date, today)
    }

    /// Wire form with the due-state fields derived against `today`.
    pub fn to_json(&self, today: NaiveDate) -> serde_json::Value {
        let mut v = serde_json::to_value(self).unwrap_or_default();
        v["dueState"] = serde_json::to_value(self.due_state(today)).unwrap_or_default();
        v["daysUntilDue"] = homework::days_until_due(self.due_date, today).into();
        v["statusText"] = homework::status_text(self.due_date, today).into();
        v["attachmentCount"] = self.attachments.len().into();
        v["attachmentsTotalSize"] =
            homework::format_size(homework::total_attachment_size(&self.attachments)).into();
        v
    }
}

pub const WEEKDAYS: [&str; 5] = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"];

pub fn parse_weekday(s: &str) -> Result<&'static str, RuleError> {
    WEEKDAYS
        .iter()
        .copied()
        .find(|d| d.eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| RuleError::unknown("day of week", s))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScheduleKind {
    Class,
    Duty,
    Extracurricular,
}

impl ScheduleKind {
    pub fn parse(s: &str) -> Result<Self, RuleError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "class" => Ok(Self::Class),
            "duty" => Ok(Self::Duty),
            "extracurricular" => Ok(Self::Extracurricular),
            _ => Err(RuleError::unknown("schedule kind", s)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Duty => "duty",
            Self::Extracurricular => "extracurricular",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: String,
    pub day_of_week: String,
    pub time_slot: String,
    pub kind: ScheduleKind,
    pub class_name: Option<String>,
    pub subject: Option<String>,
    pub label: Option<String>,
}

impl ScheduleEntry {
    pub const COLUMNS: &'static str = "id, day_of_week, time_slot, kind, class_name, subject, label";

    pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            day_of_week: r.get(1)?,
            time_slot: r.get(2)?,
            kind: text_enum(r, 3, ScheduleKind::parse)?,
            class_name: r.get(4)?,
            subject: r.get(5)?,
            label: r.get(6)?,
        })
    }
}
