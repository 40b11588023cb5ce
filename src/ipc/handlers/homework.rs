use crate::db;
use crate::homework::{self, Attachment, DueState, HomeworkFilter, HomeworkStatus};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    collect_rows, date_key, get_optional_date, get_optional_str, get_required_date,
    get_required_str, today, with_db, DbHandler,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Homework;
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn load_homework(conn: &Connection, homework_id: &str) -> Result<Homework, HandlerErr> {
    let sql = format!("SELECT {} FROM homework WHERE id = ?", Homework::COLUMNS);
    conn.query_row(&sql, [homework_id], Homework::from_row)
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("homework not found"))
}

fn load_for_class(conn: &Connection, class_name: Option<&str>) -> Result<Vec<Homework>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM homework
         WHERE (? IS NULL OR class_name = ?)
         ORDER BY due_date, class_name, title",
        Homework::COLUMNS
    );
    collect_rows(conn, &sql, (class_name, class_name), Homework::from_row)
}

fn attachment_param(v: &serde_json::Value) -> Result<Attachment, HandlerErr> {
    let obj = v
        .as_object()
        .ok_or_else(|| HandlerErr::bad_params("attachment must be an object"))?;
    let name = obj
        .get("name")
        .and_then(|n| n.as_str())
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| HandlerErr::bad_params("attachment.name is required"))?;
    let size = match obj.get("size") {
        None | Some(serde_json::Value::Null) => 0,
        Some(s) => s
            .as_u64()
            .ok_or_else(|| HandlerErr::bad_params("attachment.size must be a non-negative integer"))?,
    };
    Ok(Attachment {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        size,
        mime_type: obj
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("application/octet-stream")
            .to_string(),
        url: obj.get("url").and_then(|u| u.as_str()).map(|u| u.to_string()),
        uploaded_at: Some(db::now_timestamp()),
    })
}

fn write_attachments(conn: &Connection, homework_id: &str, items: &[Attachment]) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE homework SET attachments = ?, updated_at = ? WHERE id = ?",
        (homework::encode_attachments(items), db::now_timestamp(), homework_id),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "homework", e))?;
    Ok(())
}

fn homework_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today(params)?;
    let class_name = get_optional_str(params, "className")?;
    let filter = HomeworkFilter::parse(&get_optional_str(params, "filter")?.unwrap_or_default())?;
    let items: Vec<serde_json::Value> = load_for_class(conn, class_name.as_deref())?
        .iter()
        .filter(|h| filter.matches(h.due_date, h.status, today))
        .map(|h| h.to_json(today))
        .collect();
    Ok(json!({ "today": date_key(today), "homework": items }))
}

fn homework_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today(params)?;
    let homework_id = get_required_str(params, "homeworkId")?;
    let hw = load_homework(conn, &homework_id)?;
    Ok(json!({ "homework": hw.to_json(today) }))
}

fn homework_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today(params)?;
    let class_name = get_required_str(params, "className")?;
    let subject = get_required_str(params, "subject")?;
    let title = get_required_str(params, "title")?;
    let description = get_optional_str(params, "description")?;
    let due_date = get_required_date(params, "dueDate")?;
    let assigned_date = get_optional_date(params, "assignedDate")?.unwrap_or(today);
    let attachments = match params.get("attachments") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(attachment_param)
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(HandlerErr::bad_params("attachments must be an array")),
    };

    let homework_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO homework(id, class_name, subject, title, description, due_date,
            assigned_date, status, attachments, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
        (
            &homework_id,
            &class_name,
            &subject,
            &title,
            description.as_deref(),
            date_key(due_date),
            date_key(assigned_date),
            homework::encode_attachments(&attachments),
            db::now_timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "homework", e))?;
    tracing::info!(homework_id = %homework_id, class_name = %class_name, "homework created");

    let hw = load_homework(conn, &homework_id)?;
    Ok(json!({ "homework": hw.to_json(today) }))
}

fn homework_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today(params)?;
    let homework_id = get_required_str(params, "homeworkId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing/invalid patch"));
    };
    let patch_value = serde_json::Value::Object(patch.clone());

    let mut set_parts: Vec<&str> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();
    for (key, clause) in [
        ("className", "class_name = ?"),
        ("subject", "subject = ?"),
        ("title", "title = ?"),
    ] {
        if patch.contains_key(key) {
            set_parts.push(clause);
            bind_values.push(Value::Text(get_required_str(&patch_value, key)?));
        }
    }
    if patch.contains_key("description") {
        set_parts.push("description = ?");
        bind_values.push(match get_optional_str(&patch_value, "description")? {
            Some(s) => Value::Text(s),
            None => Value::Null,
        });
    }
    for (key, clause) in [("dueDate", "due_date = ?"), ("assignedDate", "assigned_date = ?")] {
        if patch.contains_key(key) {
            set_parts.push(clause);
            bind_values.push(Value::Text(date_key(get_required_date(&patch_value, key)?)));
        }
    }
    if patch.contains_key("status") {
        let raw = get_required_str(&patch_value, "status")?;
        set_parts.push("status = ?");
        bind_values.push(Value::Text(HomeworkStatus::parse(&raw)?.as_str().to_string()));
    }
    if set_parts.is_empty() {
        return Err(HandlerErr::bad_params("patch has no known fields"));
    }
    set_parts.push("updated_at = ?");
    bind_values.push(Value::Text(db::now_timestamp()));
    bind_values.push(Value::Text(homework_id.clone()));

    let sql = format!("UPDATE homework SET {} WHERE id = ?", set_parts.join(", "));
    let changed = conn
        .execute(&sql, rusqlite::params_from_iter(bind_values))
        .map_err(|e| HandlerErr::write("db_update_failed", "homework", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("homework not found"));
    }
    let hw = load_homework(conn, &homework_id)?;
    Ok(json!({ "homework": hw.to_json(today) }))
}

fn homework_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let homework_id = get_required_str(params, "homeworkId")?;
    let changed = conn
        .execute("DELETE FROM homework WHERE id = ?", [&homework_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "homework", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("homework not found"));
    }
    tracing::info!(homework_id = %homework_id, "homework deleted");
    Ok(json!({ "ok": true }))
}

fn homework_set_status(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let homework_id = get_required_str(params, "homeworkId")?;
    let status = HomeworkStatus::parse(&get_required_str(params, "status")?)?;
    let changed = conn
        .execute(
            "UPDATE homework SET status = ?, updated_at = ? WHERE id = ?",
            (status.as_str(), db::now_timestamp(), &homework_id),
        )
        .map_err(|e| HandlerErr::write("db_update_failed", "homework", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("homework not found"));
    }
    Ok(json!({ "homeworkId": homework_id, "status": status }))
}

fn homework_stats(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today(params)?;
    let class_name = get_optional_str(params, "className")?;
    let items = load_for_class(conn, class_name.as_deref())?;
    let stats = homework::homework_stats(items.iter().map(|h| h.due_date), today);
    let pending = items
        .iter()
        .filter(|h| h.status == HomeworkStatus::Pending)
        .count();
    Ok(json!({
        "today": date_key(today),
        "stats": stats,
        "pending": pending,
        "completed": items.len() - pending
    }))
}

fn pending_where<F>(items: Vec<Homework>, keep: F) -> Vec<Homework>
where
    F: Fn(NaiveDate) -> bool,
{
    items
        .into_iter()
        .filter(|h| h.status == HomeworkStatus::Pending && keep(h.due_date))
        .collect()
}

fn homework_due_soon(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today(params)?;
    let class_name = get_optional_str(params, "className")?;
    let items = pending_where(load_for_class(conn, class_name.as_deref())?, |due| {
        homework::is_due_soon(due, today)
    });
    let out: Vec<serde_json::Value> = items.iter().map(|h| h.to_json(today)).collect();
    Ok(json!({ "today": date_key(today), "homework": out }))
}

/// Pending overdue work, most recently due first.
fn homework_overdue(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today(params)?;
    let class_name = get_optional_str(params, "className")?;
    let mut items = pending_where(load_for_class(conn, class_name.as_deref())?, |due| {
        homework::due_state(due, today) == DueState::Overdue
    });
    items.sort_by(|a, b| b.due_date.cmp(&a.due_date));
    let out: Vec<serde_json::Value> = items.iter().map(|h| h.to_json(today)).collect();
    Ok(json!({ "today": date_key(today), "homework": out }))
}

fn homework_attachment_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today(params)?;
    let homework_id = get_required_str(params, "homeworkId")?;
    let attachment = attachment_param(
        params
            .get("attachment")
            .ok_or_else(|| HandlerErr::bad_params("missing attachment"))?,
    )?;
    let mut hw = load_homework(conn, &homework_id)?;
    let attachment_id = attachment.id.clone();
    hw.attachments.push(attachment);
    write_attachments(conn, &homework_id, &hw.attachments)?;
    tracing::info!(homework_id = %homework_id, attachment_id = %attachment_id, "attachment added");

    let hw = load_homework(conn, &homework_id)?;
    Ok(json!({ "attachmentId": attachment_id, "homework": hw.to_json(today) }))
}

fn homework_attachment_remove(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = today(params)?;
    let homework_id = get_required_str(params, "homeworkId")?;
    let attachment_id = get_required_str(params, "attachmentId")?;
    let mut hw = load_homework(conn, &homework_id)?;
    let before = hw.attachments.len();
    hw.attachments.retain(|a| a.id != attachment_id);
    if hw.attachments.len() == before {
        return Err(HandlerErr::not_found("attachment not found"));
    }
    write_attachments(conn, &homework_id, &hw.attachments)?;

    let hw = load_homework(conn, &homework_id)?;
    Ok(json!({ "homework": hw.to_json(today) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: DbHandler = match req.method.as_str() {
        "homework.list" => homework_list,
        "homework.get" => homework_get,
        "homework.create" => homework_create,
        "homework.update" => homework_update,
        "homework.delete" => homework_delete,
        "homework.setStatus" => homework_set_status,
        "homework.stats" => homework_stats,
        "homework.dueSoon" => homework_due_soon,
        "homework.overdue" => homework_overdue,
        "homework.attachmentAdd" => homework_attachment_add,
        "homework.attachmentRemove" => homework_attachment_remove,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
