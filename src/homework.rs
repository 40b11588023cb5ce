use crate::calc::RuleError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DUE_SOON_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DueState {
    Overdue,
    DueToday,
    Upcoming,
}

/// Both dates are calendar days, so time of day never enters the comparison.
pub fn due_state(due: NaiveDate, today: NaiveDate) -> DueState {
    if due < today {
        DueState::Overdue
    } else if due == today {
        DueState::DueToday
    } else {
        DueState::Upcoming
    }
}

/// Whole days from `today` to `due`; negative once overdue.
pub fn days_until_due(due: NaiveDate, today: NaiveDate) -> i64 {
    (due - today).num_days()
}

fn plural_days(n: i64) -> String {
    format!("{} day{}", n, if n == 1 { "" } else { "s" })
}

pub fn status_text(due: NaiveDate, today: NaiveDate) -> String {
    match due_state(due, today) {
        DueState::Overdue => format!("Overdue by {}", plural_days(days_until_due(due, today).abs())),
        DueState::DueToday => "Due today".to_string(),
        DueState::Upcoming => format!("{} remaining", plural_days(days_until_due(due, today))),
    }
}

/// Pending work due between today and the end of the due-soon window, inclusive.
pub fn is_due_soon(due: NaiveDate, today: NaiveDate) -> bool {
    let days = days_until_due(due, today);
    (0..=DUE_SOON_DAYS).contains(&days)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HomeworkStatus {
    Pending,
    Completed,
}

impl HomeworkStatus {
    pub fn parse(s: &str) -> Result<Self, RuleError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            _ => Err(RuleError::unknown("homework status", s)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeworkFilter {
    All,
    Overdue,
    DueToday,
    Upcoming,
    Pending,
    Completed,
}

impl HomeworkFilter {
    pub fn parse(s: &str) -> Result<Self, RuleError> {
        match s.trim() {
            "" | "all" => Ok(Self::All),
            "overdue" => Ok(Self::Overdue),
            "dueToday" => Ok(Self::DueToday),
            "upcoming" => Ok(Self::Upcoming),
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            _ => Err(RuleError::unknown("homework filter", s)),
        }
    }

    pub fn matches(self, due: NaiveDate, status: HomeworkStatus, today: NaiveDate) -> bool {
        match self {
            Self::All => true,
            Self::Overdue => due_state(due, today) == DueState::Overdue,
            Self::DueToday => due_state(due, today) == DueState::DueToday,
            Self::Upcoming => due_state(due, today) == DueState::Upcoming,
            Self::Pending => status == HomeworkStatus::Pending,
            Self::Completed => status == HomeworkStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeworkStats {
    pub all: usize,
    pub overdue: usize,
    pub due_today: usize,
    pub upcoming: usize,
}

pub fn homework_stats<I>(due_dates: I, today: NaiveDate) -> HomeworkStats
where
    I: IntoIterator<Item = NaiveDate>,
{
    let mut stats = HomeworkStats::default();
    for due in due_dates {
        stats.all += 1;
        match due_state(due, today) {
            DueState::Overdue => stats.overdue += 1,
            DueState::DueToday => stats.due_today += 1,
            DueState::Upcoming => stats.upcoming += 1,
        }
    }
    stats
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub uploaded_at: Option<String>,
}

fn lenient_id(v: Option<&serde_json::Value>) -> Option<String> {
    match v? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn attachment_from_value(v: &serde_json::Value) -> Option<Attachment> {
    let obj = v.as_object()?;
    let id = lenient_id(obj.get("id"))?;
    let name = obj.get("name")?.as_str()?.to_string();
    Some(Attachment {
        id,
        name,
        size: obj
            .get("size")
            .and_then(|s| s.as_f64())
            .filter(|s| *s > 0.0)
            .map(|s| s as u64)
            .unwrap_or(0),
        mime_type: obj
            .get("type")
            .and_then(|s| s.as_str())
            .unwrap_or("")
            .to_string(),
        url: obj.get("url").and_then(|s| s.as_str()).map(|s| s.to_string()),
        uploaded_at: obj
            .get("uploadedAt")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
    })
}

/// Decodes the stored attachment column. Anything that is not a JSON array yields an empty
/// list; array items without an id or name are dropped.
pub fn parse_attachments(raw: Option<&str>) -> Vec<Attachment> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Vec::new();
    };
    items.iter().filter_map(attachment_from_value).collect()
}

pub fn encode_attachments(items: &[Attachment]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

pub fn total_attachment_size(items: &[Attachment]) -> u64 {
    items.iter().map(|a| a.size).sum()
}

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes == 0 {
        "0 B".to_string()
    } else if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    }
}
