use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{collect_rows, get_required_str, with_db, DbHandler};
use crate::ipc::types::{AppState, Request};
use crate::model::SchoolClass;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn active_name_taken(
    conn: &Connection,
    name: &str,
    except_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM classes WHERE name = ? AND active = 1 AND id <> ?",
        (name, except_id.unwrap_or("")),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn classes_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let include_inactive = params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let sql = format!(
        "SELECT {} FROM classes c WHERE (? OR c.active = 1) ORDER BY c.name",
        SchoolClass::COLUMNS
    );
    let classes = collect_rows(conn, &sql, [include_inactive], SchoolClass::from_row)?;
    Ok(json!({ "classes": classes }))
}

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    if active_name_taken(conn, &name, None)? {
        return Err(HandlerErr::new("duplicate", format!("class {} already exists", name)));
    }
    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, active, created_at) VALUES(?, ?, 1, ?)",
        (&class_id, &name, db::now_timestamp()),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "classes", e))?;
    tracing::info!(class_id = %class_id, name = %name, "class created");
    Ok(json!({ "classId": class_id, "name": name }))
}

fn classes_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let name = get_required_str(params, "name")?;
    if active_name_taken(conn, &name, Some(&class_id))? {
        return Err(HandlerErr::new("duplicate", format!("class {} already exists", name)));
    }
    let changed = conn
        .execute("UPDATE classes SET name = ? WHERE id = ?", (&name, &class_id))
        .map_err(|e| HandlerErr::write("db_update_failed", "classes", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("class not found"));
    }
    Ok(json!({ "classId": class_id, "name": name }))
}

/// Soft delete: the row stays so old grades and homework keep their class label.
fn classes_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let changed = conn
        .execute("UPDATE classes SET active = 0 WHERE id = ?", [&class_id])
        .map_err(|e| HandlerErr::write("db_update_failed", "classes", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("class not found"));
    }
    tracing::info!(class_id = %class_id, "class deactivated");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: DbHandler = match req.method.as_str() {
        "classes.list" => classes_list,
        "classes.create" => classes_create,
        "classes.update" => classes_update,
        "classes.delete" => classes_delete,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
