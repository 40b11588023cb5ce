use crate::calc::{self, AttendanceStatus, DatedStatus, StudentHistory};
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::sessions::load_session;
use crate::ipc::handlers::students::load_student;
use crate::ipc::helpers::{
    collect_rows, date_key, get_optional_str, get_required_date, get_required_str, with_db,
    DbHandler,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceRecord, Student};
use rusqlite::Connection;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One stored attendance row joined with the student it belongs to.
#[derive(Debug, Clone)]
struct RangeRow {
    record: AttendanceRecord,
    student_name: String,
    class_name: String,
}

fn record_json(record: &AttendanceRecord) -> serde_json::Value {
    let mut v = serde_json::to_value(record).unwrap_or_default();
    v["statusText"] = record.status_text().into();
    v["hasComment"] = record.has_comment().into();
    v
}

fn parse_status(v: Option<&serde_json::Value>) -> Result<Option<AttendanceStatus>, HandlerErr> {
    match v {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(AttendanceStatus::parse(s)?)),
        Some(_) => Err(HandlerErr::bad_params("status must be a string or null")),
    }
}

fn load_range(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(String, String, Option<String>, Vec<RangeRow>), HandlerErr> {
    let from = get_required_date(params, "from")?;
    let to = get_required_date(params, "to")?;
    if from > to {
        return Err(HandlerErr::bad_params("from must not be after to"));
    }
    let class_name = get_optional_str(params, "className")?;
    let (from, to) = (date_key(from), date_key(to));

    let rows = collect_rows(
        conn,
        "SELECT a.date_key, a.session_id, a.student_id, a.status, a.comment, a.updated_at,
                s.name, s.class_name
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE a.date_key >= ? AND a.date_key <= ?
           AND (? IS NULL OR s.class_name = ?)
         ORDER BY a.date_key, s.class_name, s.student_no, a.session_id",
        (&from, &to, class_name.as_deref(), class_name.as_deref()),
        |r| {
            Ok(RangeRow {
                record: AttendanceRecord::from_row(r)?,
                student_name: r.get(6)?,
                class_name: r.get(7)?,
            })
        },
    )?;
    Ok((from, to, class_name, rows))
}

fn attendance_session_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let day = date_key(get_required_date(params, "dateKey")?);
    let session_id = get_required_str(params, "sessionId")?;
    let session = load_session(conn, &session_id)?;

    let sql = format!(
        "SELECT {} FROM students WHERE class_name = ? AND status = 'active' ORDER BY student_no, name",
        Student::COLUMNS
    );
    let students = collect_rows(conn, &sql, [&session.class_name], Student::from_row)?;

    let sql = format!(
        "SELECT {} FROM attendance WHERE date_key = ? AND session_id = ?",
        AttendanceRecord::COLUMNS
    );
    let stored: HashMap<String, AttendanceRecord> =
        collect_rows(conn, &sql, (&day, &session_id), AttendanceRecord::from_row)?
            .into_iter()
            .map(|r| (r.student_id.clone(), r))
            .collect();

    let records: Vec<AttendanceRecord> = students
        .iter()
        .map(|s| {
            stored
                .get(&s.id)
                .cloned()
                .unwrap_or_else(|| AttendanceRecord::unmarked(&day, &session_id, &s.id))
        })
        .collect();
    let stats = calc::attendance_stats(records.iter().map(|r| r.status));

    let rows: Vec<serde_json::Value> = students
        .iter()
        .zip(records.iter())
        .map(|(s, r)| json!({ "student": s.to_json(), "record": record_json(r) }))
        .collect();

    Ok(json!({
        "dateKey": day,
        "session": session,
        "rows": rows,
        "stats": stats
    }))
}

fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let day = date_key(get_required_date(params, "dateKey")?);
    let session_id = get_required_str(params, "sessionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let status = parse_status(params.get("status"))?;
    load_student(conn, &student_id)?;

    conn.execute(
        "INSERT INTO attendance(date_key, session_id, student_id, status, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(date_key, session_id, student_id) DO UPDATE SET
           status = excluded.status,
           updated_at = excluded.updated_at",
        (
            &day,
            &session_id,
            &student_id,
            status.map(AttendanceStatus::as_str),
            db::now_timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "attendance", e))?;
    tracing::debug!(date_key = %day, session_id = %session_id, student_id = %student_id, "attendance marked");
    Ok(json!({ "ok": true, "status": status.map(AttendanceStatus::as_str) }))
}

fn attendance_comment(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let day = date_key(get_required_date(params, "dateKey")?);
    let session_id = get_required_str(params, "sessionId")?;
    let student_id = get_required_str(params, "studentId")?;
    let comment = match params.get("comment") {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(_) => return Err(HandlerErr::bad_params("comment must be a string")),
    };
    load_student(conn, &student_id)?;

    conn.execute(
        "INSERT INTO attendance(date_key, session_id, student_id, status, comment, updated_at)
         VALUES(?, ?, ?, NULL, ?, ?)
         ON CONFLICT(date_key, session_id, student_id) DO UPDATE SET
           comment = excluded.comment,
           updated_at = excluded.updated_at",
        (&day, &session_id, &student_id, &comment, db::now_timestamp()),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "attendance", e))?;
    Ok(json!({ "ok": true, "comment": comment }))
}

fn attendance_range(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (from, to, class_name, rows) = load_range(conn, params)?;
    let records: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            let mut v = record_json(&row.record);
            v["studentName"] = row.student_name.clone().into();
            v["className"] = row.class_name.clone().into();
            v
        })
        .collect();
    Ok(json!({
        "from": from,
        "to": to,
        "className": class_name,
        "records": records
    }))
}

fn attendance_report(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (from, to, class_name, rows) = load_range(conn, params)?;

    // Students keep the order of their first record.
    let mut histories: Vec<StudentHistory> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in &rows {
        let i = *index.entry(row.record.student_id.clone()).or_insert_with(|| {
            histories.push(StudentHistory {
                student_id: row.record.student_id.clone(),
                student_name: row.student_name.clone(),
                class_name: row.class_name.clone(),
                records: Vec::new(),
            });
            histories.len() - 1
        });
        histories[i].records.push(DatedStatus {
            date_key: row.record.date_key.clone(),
            status: row.record.status,
        });
    }

    let overview = calc::attendance_stats(rows.iter().map(|r| r.record.status));
    let present_rate = calc::present_rate(overview.present, overview.total);

    let per_student: Vec<serde_json::Value> = histories
        .iter()
        .map(|h| {
            let stats = calc::attendance_stats(h.records.iter().map(|r| r.status));
            json!({
                "studentId": h.student_id,
                "studentName": h.student_name,
                "className": h.class_name,
                "stats": stats,
                "consecutiveAbsences": calc::trailing_absences(&h.records)
            })
        })
        .collect();

    let mut per_class: BTreeMap<&str, (BTreeSet<&str>, usize, usize)> = BTreeMap::new();
    for row in &rows {
        let e = per_class.entry(row.class_name.as_str()).or_default();
        e.0.insert(row.record.student_id.as_str());
        e.1 += 1;
        if row.record.status == Some(AttendanceStatus::Present) {
            e.2 += 1;
        }
    }
    let per_class: Vec<serde_json::Value> = per_class
        .into_iter()
        .map(|(name, (students, total, present))| {
            json!({
                "className": name,
                "students": students.len(),
                "totalRecords": total,
                "present": present,
                "percentage": calc::present_rate(present, total)
            })
        })
        .collect();

    let dated: Vec<DatedStatus> = rows
        .iter()
        .map(|r| DatedStatus {
            date_key: r.record.date_key.clone(),
            status: r.record.status,
        })
        .collect();
    let trend = calc::daily_trend(&dated);
    let alerts = calc::attendance_alerts(&histories);

    Ok(json!({
        "from": from,
        "to": to,
        "className": class_name,
        "overview": {
            "totalRecords": overview.total,
            "present": overview.present,
            "absent": overview.absent,
            "late": overview.late,
            "unmarked": overview.unmarked,
            "percentage": overview.percentage,
            "presentRate": present_rate
        },
        "students": per_student,
        "classes": per_class,
        "trend": trend,
        "alerts": alerts
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: DbHandler = match req.method.as_str() {
        "attendance.sessionOpen" => attendance_session_open,
        "attendance.mark" => attendance_mark,
        "attendance.comment" => attendance_comment,
        "attendance.range" => attendance_range,
        "attendance.report" => attendance_report,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
