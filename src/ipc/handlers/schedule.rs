use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{collect_rows, get_optional_str, get_required_str, with_db, DbHandler};
use crate::ipc::types::{AppState, Request};
use crate::model::{parse_weekday, ScheduleEntry, ScheduleKind, WEEKDAYS};
use chrono::NaiveTime;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Normalises "8:00-8:45" to "08:00-08:45" so slots sort as text.
fn normalize_time_slot(raw: &str) -> Result<String, HandlerErr> {
    let bad = || HandlerErr::bad_params(format!("timeSlot must look like 08:00-08:45, got {}", raw));
    let (start, end) = raw.split_once('-').ok_or_else(bad)?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").map_err(|_| bad())?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").map_err(|_| bad())?;
    if end <= start {
        return Err(HandlerErr::bad_params("timeSlot must end after it starts"));
    }
    Ok(format!("{}-{}", start.format("%H:%M"), end.format("%H:%M")))
}

struct EntryFields {
    day_of_week: &'static str,
    time_slot: String,
    kind: ScheduleKind,
    class_name: Option<String>,
    subject: Option<String>,
    label: Option<String>,
}

impl EntryFields {
    fn validate(&self) -> Result<(), HandlerErr> {
        match self.kind {
            ScheduleKind::Class if self.class_name.is_none() || self.subject.is_none() => Err(
                HandlerErr::bad_params("class entries need className and subject"),
            ),
            ScheduleKind::Duty | ScheduleKind::Extracurricular if self.label.is_none() => {
                Err(HandlerErr::bad_params("duty and extracurricular entries need a label"))
            }
            _ => Ok(()),
        }
    }
}

fn load_entry(conn: &Connection, entry_id: &str) -> Result<ScheduleEntry, HandlerErr> {
    let sql = format!("SELECT {} FROM schedule_entries WHERE id = ?", ScheduleEntry::COLUMNS);
    conn.query_row(&sql, [entry_id], ScheduleEntry::from_row)
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("schedule entry not found"))
}

fn entries_for_day(conn: &Connection, day: &str) -> Result<Vec<ScheduleEntry>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM schedule_entries WHERE day_of_week = ? ORDER BY time_slot",
        ScheduleEntry::COLUMNS
    );
    collect_rows(conn, &sql, [day], ScheduleEntry::from_row)
}

fn schedule_day(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let day = parse_weekday(&get_required_str(params, "day")?)?;
    let entries = entries_for_day(conn, day)?;
    Ok(json!({ "day": day, "entries": entries }))
}

fn schedule_week(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut days = Vec::with_capacity(WEEKDAYS.len());
    for day in WEEKDAYS {
        days.push(json!({ "day": day, "entries": entries_for_day(conn, day)? }));
    }
    Ok(json!({ "days": days }))
}

fn schedule_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let fields = EntryFields {
        day_of_week: parse_weekday(&get_required_str(params, "dayOfWeek")?)?,
        time_slot: normalize_time_slot(&get_required_str(params, "timeSlot")?)?,
        kind: match get_optional_str(params, "kind")? {
            Some(k) => ScheduleKind::parse(&k)?,
            None => ScheduleKind::Class,
        },
        class_name: get_optional_str(params, "className")?,
        subject: get_optional_str(params, "subject")?,
        label: get_optional_str(params, "label")?,
    };
    fields.validate()?;

    let entry_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schedule_entries(id, day_of_week, time_slot, kind, class_name, subject, label)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &entry_id,
            fields.day_of_week,
            &fields.time_slot,
            fields.kind.as_str(),
            fields.class_name.as_deref(),
            fields.subject.as_deref(),
            fields.label.as_deref(),
        ),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "schedule_entries", e))?;
    let entry = load_entry(conn, &entry_id)?;
    Ok(json!({ "entry": entry }))
}

fn schedule_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let entry_id = get_required_str(params, "entryId")?;
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("missing/invalid patch"));
    };
    let current = load_entry(conn, &entry_id)?;
    let has = |k: &str| patch.get(k).is_some();

    let fields = EntryFields {
        day_of_week: if has("dayOfWeek") {
            parse_weekday(&get_required_str(patch, "dayOfWeek")?)?
        } else {
            parse_weekday(&current.day_of_week)?
        },
        time_slot: if has("timeSlot") {
            normalize_time_slot(&get_required_str(patch, "timeSlot")?)?
        } else {
            current.time_slot
        },
        kind: if has("kind") {
            ScheduleKind::parse(&get_required_str(patch, "kind")?)?
        } else {
            current.kind
        },
        class_name: if has("className") {
            get_optional_str(patch, "className")?
        } else {
            current.class_name
        },
        subject: if has("subject") {
            get_optional_str(patch, "subject")?
        } else {
            current.subject
        },
        label: if has("label") {
            get_optional_str(patch, "label")?
        } else {
            current.label
        },
    };
    fields.validate()?;

    conn.execute(
        "UPDATE schedule_entries
         SET day_of_week = ?, time_slot = ?, kind = ?, class_name = ?, subject = ?, label = ?
         WHERE id = ?",
        (
            fields.day_of_week,
            &fields.time_slot,
            fields.kind.as_str(),
            fields.class_name.as_deref(),
            fields.subject.as_deref(),
            fields.label.as_deref(),
            &entry_id,
        ),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "schedule_entries", e))?;
    let entry = load_entry(conn, &entry_id)?;
    Ok(json!({ "entry": entry }))
}

fn schedule_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let entry_id = get_required_str(params, "entryId")?;
    let changed = conn
        .execute("DELETE FROM schedule_entries WHERE id = ?", [&entry_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "schedule_entries", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("schedule entry not found"));
    }
    Ok(json!({ "ok": true }))
}

/// Weekly lesson count per subject, busiest first.
fn schedule_subject_counts(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subjects = collect_rows(
        conn,
        "SELECT subject FROM schedule_entries WHERE kind = 'class' AND subject IS NOT NULL",
        [],
        |r| r.get::<_, String>(0),
    )?;
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for s in subjects {
        *counts.entry(s).or_insert(0) += 1;
    }
    let mut ordered: Vec<(String, usize)> = counts.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let out: Vec<serde_json::Value> = ordered
        .into_iter()
        .map(|(subject, count)| json!({ "subject": subject, "count": count }))
        .collect();
    Ok(json!({ "subjects": out }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: DbHandler = match req.method.as_str() {
        "schedule.day" => schedule_day,
        "schedule.week" => schedule_week,
        "schedule.add" => schedule_add,
        "schedule.update" => schedule_update,
        "schedule.delete" => schedule_delete,
        "schedule.subjectCounts" => schedule_subject_counts,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
