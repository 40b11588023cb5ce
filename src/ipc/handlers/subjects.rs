use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{collect_rows, get_required_str, with_db, DbHandler};
use crate::ipc::types::{AppState, Request};
use crate::model::Subject;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn subjects_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let include_inactive = params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let sql = format!(
        "SELECT {} FROM subjects WHERE (? OR active = 1) ORDER BY name",
        Subject::COLUMNS
    );
    let subjects = collect_rows(conn, &sql, [include_inactive], Subject::from_row)?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, active) VALUES(?, ?, 1)",
        (&subject_id, &name),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "subjects", e))?;
    Ok(json!({ "subjectId": subject_id, "name": name }))
}

fn subjects_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let name = get_required_str(params, "name")?;
    let changed = conn
        .execute("UPDATE subjects SET name = ? WHERE id = ?", (&name, &subject_id))
        .map_err(|e| HandlerErr::write("db_update_failed", "subjects", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("subject not found"));
    }
    Ok(json!({ "subjectId": subject_id, "name": name }))
}

fn subjects_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let changed = conn
        .execute("UPDATE subjects SET active = 0 WHERE id = ?", [&subject_id])
        .map_err(|e| HandlerErr::write("db_update_failed", "subjects", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("subject not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: DbHandler = match req.method.as_str() {
        "subjects.list" => subjects_list,
        "subjects.create" => subjects_create,
        "subjects.update" => subjects_update,
        "subjects.delete" => subjects_delete,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
