use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{collect_rows, date_key, get_required_date, get_required_str, with_db, DbHandler};
use crate::ipc::types::{AppState, Request};
use crate::model::ClassSession;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub(crate) fn load_session(conn: &Connection, session_id: &str) -> Result<ClassSession, HandlerErr> {
    let sql = format!("SELECT {} FROM class_sessions WHERE id = ?", ClassSession::COLUMNS);
    conn.query_row(&sql, [session_id], ClassSession::from_row)
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("session not found"))
}

fn sessions_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let day = date_key(get_required_date(params, "dateKey")?);
    let class_name = get_required_str(params, "className")?;
    let subject = get_required_str(params, "subject")?;
    let time = get_required_str(params, "time")?;
    let title = get_required_str(params, "title")?;
    let session_id = ClassSession::make_id(&class_name, &time, &day);

    conn.execute(
        "INSERT INTO class_sessions(id, date_key, class_name, subject, time, title, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           subject = excluded.subject,
           title = excluded.title",
        (
            &session_id,
            &day,
            &class_name,
            &subject,
            &time,
            &title,
            db::now_timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "class_sessions", e))?;
    tracing::info!(session_id = %session_id, "session saved");

    let session = load_session(conn, &session_id)?;
    Ok(json!({ "session": session }))
}

fn sessions_list_by_date(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let day = date_key(get_required_date(params, "dateKey")?);
    let sql = format!(
        "SELECT {} FROM class_sessions WHERE date_key = ? ORDER BY time, class_name",
        ClassSession::COLUMNS
    );
    let sessions = collect_rows(conn, &sql, [&day], ClassSession::from_row)?;
    Ok(json!({ "dateKey": day, "sessions": sessions }))
}

fn sessions_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let session = load_session(conn, &session_id)?;
    Ok(json!({ "session": session }))
}

/// Attendance rows hang off the session id, so they go first.
fn sessions_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    conn.execute("DELETE FROM attendance WHERE session_id = ?", [&session_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "attendance", e))?;
    let changed = conn
        .execute("DELETE FROM class_sessions WHERE id = ?", [&session_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "class_sessions", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("session not found"));
    }
    tracing::info!(session_id = %session_id, "session deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: DbHandler = match req.method.as_str() {
        "sessions.add" => sessions_add,
        "sessions.listByDate" => sessions_list_by_date,
        "sessions.get" => sessions_get,
        "sessions.delete" => sessions_delete,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
