use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid school year label {0:?}, expected YYYY-YY")]
    InvalidSchoolYear(String),
    #[error("unknown {field} value {value:?}")]
    UnknownValue { field: &'static str, value: String },
}

impl RuleError {
    pub fn unknown(field: &'static str, value: &str) -> Self {
        Self::UnknownValue {
            field,
            value: value.to_string(),
        }
    }
}

/// Rounds to one decimal place, half away from zero.
pub fn round_1_decimal(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time part (`2025-10-03T08:00:00Z`).
pub fn parse_date_key(raw: &str) -> Result<NaiveDate, RuleError> {
    let t = raw.trim();
    let head = t.get(..10).unwrap_or(t);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").map_err(|_| RuleError::InvalidDate(raw.to_string()))
}

// ---------------------------------------------------------------------------
// Grading
// ---------------------------------------------------------------------------

fn class_year_re() -> Option<&'static Regex> {
    static YEAR_RE: OnceLock<Option<Regex>> = OnceLock::new();
    YEAR_RE.get_or_init(|| Regex::new(r"Y(\d+)").ok()).as_ref()
}

/// Class-year number from a class label: "Y5A" -> 5, "Y10" -> 10, "Reception" -> None.
pub fn class_year(class_label: &str) -> Option<u32> {
    let caps = class_year_re()?.captures(class_label)?;
    caps.get(1)?.as_str().parse::<u32>().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GradeScheme {
    /// Cambridge primary bands 1..6 (Y1-Y6).
    Primary,
    /// IGCSE letters A*..U (Y7 and up).
    Secondary,
}

impl GradeScheme {
    pub fn for_year(year: Option<u32>) -> Self {
        match year {
            Some(y) if y > 6 => Self::Secondary,
            _ => Self::Primary,
        }
    }

    pub fn for_class(class_label: &str) -> Self {
        Self::for_year(class_year(class_label))
    }
}

pub fn percentage(score: f64, max_score: f64) -> f64 {
    if max_score > 0.0 {
        score / max_score * 100.0
    } else {
        0.0
    }
}

pub fn primary_band(pct: f64) -> u8 {
    if pct >= 90.0 {
        6
    } else if pct >= 70.0 {
        5
    } else if pct >= 55.0 {
        4
    } else if pct >= 40.0 {
        3
    } else if pct >= 25.0 {
        2
    } else {
        1
    }
}

pub fn primary_letter(band: u8) -> &'static str {
    match band {
        6 => "A*",
        5 => "A",
        4 => "B",
        3 => "C",
        2 => "D",
        _ => "E",
    }
}

fn primary_description(band: u8) -> &'static str {
    match band {
        6 => "Excellent / Outstanding",
        5 => "Great / High Achievement",
        4 => "At Expected Level",
        3 => "Developing / Basic Understanding",
        2 => "Limited / Below Expected Level",
        _ => "Very Limited / Beginning",
    }
}

fn primary_range(band: u8) -> &'static str {
    match band {
        6 => "90-100%",
        5 => "70-89%",
        4 => "55-69%",
        3 => "40-54%",
        2 => "25-39%",
        _ => "0-24%",
    }
}

// (lower bound, letter, description, range), highest first.
const SECONDARY_GRADES: [(f64, &str, &str, &str); 9] = [
    (95.0, "A*", "Outstanding", "95-100%"),
    (85.0, "A", "Excellent", "85-94%"),
    (75.0, "B", "Very Good", "75-84%"),
    (65.0, "C", "Good", "65-74%"),
    (55.0, "D", "Satisfactory", "55-64%"),
    (45.0, "E", "Pass", "45-54%"),
    (35.0, "F", "Below Pass", "35-44%"),
    (25.0, "G", "Poor", "25-34%"),
    (f64::NEG_INFINITY, "U", "Unclassified", "0-24%"),
];

fn secondary_row(pct: f64) -> (f64, &'static str, &'static str, &'static str) {
    SECONDARY_GRADES
        .iter()
        .copied()
        .find(|(min, _, _, _)| pct >= *min)
        .unwrap_or(SECONDARY_GRADES[SECONDARY_GRADES.len() - 1])
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBanding {
    pub percentage: f64,
    pub scheme: GradeScheme,
    /// Only set for the primary scheme.
    pub band: Option<u8>,
    pub letter: &'static str,
    pub description: &'static str,
    pub band_range: &'static str,
}

pub fn band_for_percentage(pct: f64, scheme: GradeScheme) -> GradeBanding {
    match scheme {
        GradeScheme::Primary => {
            let band = primary_band(pct);
            GradeBanding {
                percentage: pct,
                scheme,
                band: Some(band),
                letter: primary_letter(band),
                description: primary_description(band),
                band_range: primary_range(band),
            }
        }
        GradeScheme::Secondary => {
            let (_, letter, description, range) = secondary_row(pct);
            GradeBanding {
                percentage: pct,
                scheme,
                band: None,
                letter,
                description,
                band_range: range,
            }
        }
    }
}

pub fn grade_for_year(score: f64, max_score: f64, year: Option<u32>) -> GradeBanding {
    band_for_percentage(percentage(score, max_score), GradeScheme::for_year(year))
}

pub fn grade(score: f64, max_score: f64, class_label: &str) -> GradeBanding {
    grade_for_year(score, max_score, class_year(class_label))
}

/// Mean of per-assessment percentages, one decimal. `None` when there is nothing to average.
pub fn average_percentage<I>(scores: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut count = 0usize;
    let mut sum = 0.0;
    for (score, max_score) in scores {
        count += 1;
        sum += percentage(score, max_score);
    }
    if count == 0 {
        return None;
    }
    Some(round_1_decimal(sum / count as f64))
}

/// Student count per primary band (1..=6), every band present even when zero.
pub fn band_distribution<I>(averages: I) -> BTreeMap<u8, usize>
where
    I: IntoIterator<Item = f64>,
{
    let mut out: BTreeMap<u8, usize> = (1..=6).map(|b| (b, 0)).collect();
    for avg in averages {
        *out.entry(primary_band(avg)).or_insert(0) += 1;
    }
    out
}

// ---------------------------------------------------------------------------
// Attendance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Result<Self, RuleError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "late" => Ok(Self::Late),
            _ => Err(RuleError::unknown("attendance status", s)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
        }
    }
}

pub const LOW_ATTENDANCE_PERCENT: f64 = 80.0;
pub const HIGH_SEVERITY_PERCENT: f64 = 70.0;
pub const LOW_ATTENDANCE_MIN_RECORDS: usize = 5;
pub const CONSECUTIVE_ABSENCE_ALERT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total: usize,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub unmarked: usize,
    /// (present + late/2) / total, one decimal.
    pub percentage: f64,
}

pub fn attendance_stats<I>(statuses: I) -> AttendanceStats
where
    I: IntoIterator<Item = Option<AttendanceStatus>>,
{
    let mut stats = AttendanceStats::default();
    for s in statuses {
        stats.total += 1;
        match s {
            Some(AttendanceStatus::Present) => stats.present += 1,
            Some(AttendanceStatus::Absent) => stats.absent += 1,
            Some(AttendanceStatus::Late) => stats.late += 1,
            None => stats.unmarked += 1,
        }
    }
    if stats.total > 0 {
        let credited = stats.present as f64 + 0.5 * stats.late as f64;
        stats.percentage = round_1_decimal(credited / stats.total as f64 * 100.0);
    }
    stats
}

/// Present-only rate used by the class and trend views, one decimal.
pub fn present_rate(present: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_1_decimal(present as f64 / total as f64 * 100.0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedStatus {
    pub date_key: String,
    pub status: Option<AttendanceStatus>,
}

/// Absences at the end of the date-ordered history, stopping at the first non-absent record.
pub fn trailing_absences(records: &[DatedStatus]) -> usize {
    let mut ordered: Vec<&DatedStatus> = records.iter().collect();
    ordered.sort_by(|a, b| a.date_key.cmp(&b.date_key));
    ordered
        .iter()
        .rev()
        .take_while(|r| r.status == Some(AttendanceStatus::Absent))
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertKind {
    LowAttendance,
    ConsecutiveAbsence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceAlert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct StudentHistory {
    pub student_id: String,
    pub student_name: String,
    pub class_name: String,
    pub records: Vec<DatedStatus>,
}

pub fn student_alerts(history: &StudentHistory) -> Vec<AttendanceAlert> {
    let mut out = Vec::new();
    let stats = attendance_stats(history.records.iter().map(|r| r.status));
    if stats.percentage < LOW_ATTENDANCE_PERCENT && stats.total >= LOW_ATTENDANCE_MIN_RECORDS {
        let severity = if stats.percentage < HIGH_SEVERITY_PERCENT {
            Severity::High
        } else {
            Severity::Medium
        };
        out.push(AttendanceAlert {
            kind: AlertKind::LowAttendance,
            severity,
            student_id: history.student_id.clone(),
            student_name: history.student_name.clone(),
            class_name: history.class_name.clone(),
            message: format!("Low attendance: {}%", stats.percentage),
        });
    }

    let streak = trailing_absences(&history.records);
    if streak >= CONSECUTIVE_ABSENCE_ALERT {
        out.push(AttendanceAlert {
            kind: AlertKind::ConsecutiveAbsence,
            severity: Severity::High,
            student_id: history.student_id.clone(),
            student_name: history.student_name.clone(),
            class_name: history.class_name.clone(),
            message: format!("Absent for {} consecutive days", streak),
        });
    }
    out
}

/// Alerts for every student, most severe first. Order within a severity follows input order.
pub fn attendance_alerts(histories: &[StudentHistory]) -> Vec<AttendanceAlert> {
    let mut alerts: Vec<AttendanceAlert> = histories.iter().flat_map(student_alerts).collect();
    alerts.sort_by_key(|a| a.severity);
    alerts
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: String,
    pub total: usize,
    pub present: usize,
    pub percentage: f64,
}

pub fn daily_trend<'a, I>(records: I) -> Vec<TrendPoint>
where
    I: IntoIterator<Item = &'a DatedStatus>,
{
    let mut by_date: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for r in records {
        let e = by_date.entry(r.date_key.as_str()).or_insert((0, 0));
        e.0 += 1;
        if r.status == Some(AttendanceStatus::Present) {
            e.1 += 1;
        }
    }
    by_date
        .into_iter()
        .map(|(date, (total, present))| TrendPoint {
            date: date.to_string(),
            total,
            present,
            percentage: present_rate(present, total),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dated(date: &str, status: Option<AttendanceStatus>) -> DatedStatus {
        DatedStatus {
            date_key: date.to_string(),
            status,
        }
    }

    fn history(records: Vec<DatedStatus>) -> StudentHistory {
        StudentHistory {
            student_id: "s1".into(),
            student_name: "Ada".into(),
            class_name: "Y5A".into(),
            records,
        }
    }

    #[test]
    fn class_year_reads_first_year_number() {
        assert_eq!(class_year("Y5A"), Some(5));
        assert_eq!(class_year("Y10"), Some(10));
        assert_eq!(class_year("Group Y7C"), Some(7));
        assert_eq!(class_year("Reception"), None);
        assert_eq!(class_year("y5"), None);
    }

    #[test]
    fn primary_bands_are_inclusive_on_lower_bound() {
        let g = grade_for_year(90.0, 100.0, Some(5));
        assert_eq!(g.band, Some(6));
        assert_eq!(g.letter, "A*");

        let g = grade_for_year(69.0, 100.0, Some(5));
        assert_eq!(g.band, Some(4));
        assert_eq!(g.letter, "B");

        assert_eq!(primary_band(70.0), 5);
        assert_eq!(primary_band(55.0), 4);
        assert_eq!(primary_band(40.0), 3);
        assert_eq!(primary_band(25.0), 2);
        assert_eq!(primary_band(24.9), 1);
        assert_eq!(primary_letter(1), "E");
    }

    #[test]
    fn secondary_letters_follow_igcse_thresholds() {
        let g = grade_for_year(95.0, 100.0, Some(8));
        assert_eq!(g.scheme, GradeScheme::Secondary);
        assert_eq!(g.band, None);
        assert_eq!(g.letter, "A*");

        assert_eq!(grade_for_year(84.0, 100.0, Some(8)).letter, "B");
        let secondary_letter = |pct| band_for_percentage(pct, GradeScheme::Secondary).letter;
        assert_eq!(secondary_letter(85.0), "A");
        assert_eq!(secondary_letter(45.0), "E");
        assert_eq!(secondary_letter(35.0), "F");
        assert_eq!(secondary_letter(25.0), "G");
        assert_eq!(secondary_letter(0.0), "U");
        assert_eq!(band_for_percentage(66.0, GradeScheme::Secondary).band_range, "65-74%");
    }

    #[test]
    fn unlabelled_class_uses_primary_scheme() {
        let g = grade(18.0, 20.0, "Maths club");
        assert_eq!(g.scheme, GradeScheme::Primary);
        assert_eq!(g.band, Some(6));
        assert_eq!(g.description, "Excellent / Outstanding");
        assert_eq!(grade(18.0, 20.0, "Y7C").letter, "A");
        assert_eq!(grade(16.0, 20.0, "Y7C").letter, "B");
    }

    #[test]
    fn zero_max_score_yields_zero_percent() {
        assert_eq!(percentage(5.0, 0.0), 0.0);
        assert_eq!(grade(5.0, 0.0, "Y3").band, Some(1));
    }

    #[test]
    fn average_and_distribution() {
        assert_eq!(average_percentage(Vec::<(f64, f64)>::new()), None);
        let avg = average_percentage(vec![(9.0, 10.0), (14.0, 20.0), (2.0, 3.0)]);
        assert_eq!(avg, Some(75.6));

        let dist = band_distribution(vec![92.0, 71.0, 70.0, 10.0]);
        assert_eq!(dist.len(), 6);
        assert_eq!(dist[&6], 1);
        assert_eq!(dist[&5], 2);
        assert_eq!(dist[&1], 1);
        assert_eq!(dist[&3], 0);
    }

    #[test]
    fn late_counts_as_half_present() {
        let mut statuses = vec![Some(AttendanceStatus::Present); 7];
        statuses.push(Some(AttendanceStatus::Late));
        statuses.push(Some(AttendanceStatus::Absent));
        statuses.push(Some(AttendanceStatus::Absent));
        let stats = attendance_stats(statuses);
        assert_eq!(stats.total, 10);
        assert_eq!(stats.percentage, 75.0);
        assert_eq!(attendance_stats(Vec::new()).percentage, 0.0);
    }

    #[test]
    fn low_attendance_is_medium_between_70_and_80() {
        let mut records: Vec<DatedStatus> = (1..=7)
            .map(|d| dated(&format!("2025-10-{:02}", d), Some(AttendanceStatus::Present)))
            .collect();
        records.push(dated("2025-10-08", Some(AttendanceStatus::Absent)));
        records.push(dated("2025-10-09", Some(AttendanceStatus::Late)));
        records.push(dated("2025-10-10", Some(AttendanceStatus::Absent)));

        let alerts = student_alerts(&history(records));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::LowAttendance);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(alerts[0].message, "Low attendance: 75%");
    }

    #[test]
    fn low_attendance_needs_five_records() {
        let records = vec![
            dated("2025-10-01", Some(AttendanceStatus::Absent)),
            dated("2025-10-02", Some(AttendanceStatus::Present)),
            dated("2025-10-03", Some(AttendanceStatus::Absent)),
            dated("2025-10-04", Some(AttendanceStatus::Present)),
        ];
        assert!(student_alerts(&history(records)).is_empty());
    }

    #[test]
    fn trailing_absences_scan_from_latest_date() {
        let records = vec![
            dated("2025-10-06", Some(AttendanceStatus::Absent)),
            dated("2025-10-02", Some(AttendanceStatus::Present)),
            dated("2025-10-03", Some(AttendanceStatus::Absent)),
            dated("2025-10-07", Some(AttendanceStatus::Absent)),
        ];
        assert_eq!(trailing_absences(&records), 3);

        let alerts = student_alerts(&history(records));
        let streak = alerts
            .iter()
            .find(|a| a.kind == AlertKind::ConsecutiveAbsence)
            .expect("streak alert");
        assert_eq!(streak.severity, Severity::High);
        assert_eq!(streak.message, "Absent for 3 consecutive days");

        let broken = vec![
            dated("2025-10-01", Some(AttendanceStatus::Absent)),
            dated("2025-10-02", Some(AttendanceStatus::Absent)),
            dated("2025-10-03", Some(AttendanceStatus::Late)),
        ];
        assert_eq!(trailing_absences(&broken), 0);
    }

    #[test]
    fn alerts_sort_high_first() {
        let medium = StudentHistory {
            student_id: "m".into(),
            student_name: "Medium".into(),
            class_name: "Y6".into(),
            records: (1..=10)
                .map(|d| {
                    let s = if d <= 3 {
                        AttendanceStatus::Absent
                    } else {
                        AttendanceStatus::Present
                    };
                    dated(&format!("2025-09-{:02}", d), Some(s))
                })
                .collect(),
        };
        let high = StudentHistory {
            student_id: "h".into(),
            student_name: "High".into(),
            class_name: "Y6".into(),
            records: vec![
                dated("2025-09-01", Some(AttendanceStatus::Present)),
                dated("2025-09-02", Some(AttendanceStatus::Absent)),
                dated("2025-09-03", Some(AttendanceStatus::Absent)),
                dated("2025-09-04", Some(AttendanceStatus::Absent)),
            ],
        };
        let alerts = attendance_alerts(&[medium, high]);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].student_id, "h");
        assert_eq!(alerts[1].severity, Severity::Medium);
    }

    #[test]
    fn trend_groups_by_date() {
        let records = vec![
            dated("2025-10-02", Some(AttendanceStatus::Present)),
            dated("2025-10-01", Some(AttendanceStatus::Late)),
            dated("2025-10-02", Some(AttendanceStatus::Absent)),
        ];
        let trend = daily_trend(&records);
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].date, "2025-10-01");
        assert_eq!(trend[0].percentage, 0.0);
        assert_eq!(trend[1].percentage, 50.0);
    }

    #[test]
    fn date_keys_accept_timestamps() {
        let d = parse_date_key("2025-10-03T08:15:00Z").expect("date");
        assert_eq!(d, NaiveDate::from_ymd_opt(2025, 10, 3).expect("ymd"));
        assert!(parse_date_key("03/10/2025").is_err());
    }
}
