use crate::calc;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::settings::current_school_year;
use crate::ipc::helpers::{
    collect_rows, date_key, get_optional_date, get_optional_str, get_required_str, with_db, DbHandler,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Student, StudentStatus};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

pub(crate) fn load_student(conn: &Connection, student_id: &str) -> Result<Student, HandlerErr> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", Student::COLUMNS);
    conn.query_row(&sql, [student_id], Student::from_row)
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))
}

pub(crate) fn next_student_no(conn: &Connection, class_name: &str) -> Result<i64, HandlerErr> {
    let max: Option<i64> = conn
        .query_row(
            "SELECT MAX(student_no) FROM students WHERE class_name = ?",
            [class_name],
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    Ok(max.map(|m| m + 1).unwrap_or(1))
}

fn student_no_param(v: &serde_json::Value) -> Result<i64, HandlerErr> {
    v.as_i64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
        .filter(|n| *n >= 1)
        .ok_or_else(|| HandlerErr::bad_params("studentNo must be a positive integer"))
}

/// Inserts one student and returns its id. Shared with the CSV importer.
pub(crate) fn insert_student(
    conn: &Connection,
    name: &str,
    class_name: &str,
    student_no: Option<i64>,
    school_year: &str,
    extra: &StudentExtras,
) -> Result<String, HandlerErr> {
    let student_no = match student_no {
        Some(n) => n,
        None => next_student_no(conn, class_name)?,
    };
    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, name, class_name, student_no, email, parent_contact,
            date_of_birth, notes, school_year, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)",
        (
            &student_id,
            name,
            class_name,
            student_no,
            extra.email.as_deref(),
            extra.parent_contact.as_deref(),
            extra.date_of_birth.as_deref(),
            extra.notes.as_deref(),
            school_year,
            db::now_timestamp(),
        ),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "students", e))?;
    Ok(student_id)
}

#[derive(Debug, Default)]
pub(crate) struct StudentExtras {
    pub email: Option<String>,
    pub parent_contact: Option<String>,
    pub date_of_birth: Option<String>,
    pub notes: Option<String>,
}

/// Makes `%`, `_` and `\` match literally under `ESCAPE '\'`.
fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();

    if let Some(class_name) = get_optional_str(params, "className")? {
        clauses.push("class_name = ?");
        binds.push(Value::Text(class_name));
    }
    if let Some(year) = get_optional_str(params, "schoolYear")? {
        clauses.push("school_year = ?");
        binds.push(Value::Text(year));
    }
    match get_optional_str(params, "status")?.as_deref() {
        Some("all") => {}
        Some(raw) => {
            clauses.push("status = ?");
            binds.push(Value::Text(StudentStatus::parse(raw)?.as_str().to_string()));
        }
        None => clauses.push("status = 'active'"),
    }
    if let Some(search) = get_optional_str(params, "search")? {
        clauses.push("(LOWER(name) LIKE ? ESCAPE '\\' OR CAST(student_no AS TEXT) = ?)");
        binds.push(Value::Text(format!("%{}%", like_escape(&search.to_lowercase()))));
        binds.push(Value::Text(search));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM students {} ORDER BY class_name, student_no, name",
        Student::COLUMNS,
        where_sql
    );
    let students = collect_rows(conn, &sql, rusqlite::params_from_iter(binds), Student::from_row)?;
    let out: Vec<serde_json::Value> = students.iter().map(Student::to_json).collect();
    Ok(json!({ "students": out }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student = load_student(conn, &student_id)?;
    Ok(json!({ "student": student.to_json() }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let class_name = get_required_str(params, "className")?;
    let student_no = match params.get("studentNo") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(student_no_param(v)?),
    };
    let school_year = match get_optional_str(params, "schoolYear")? {
        Some(y) => y,
        None => current_school_year(conn)?
            .ok_or_else(|| HandlerErr::bad_params("missing schoolYear and no current year set"))?,
    };
    let extras = StudentExtras {
        email: get_optional_str(params, "email")?,
        parent_contact: get_optional_str(params, "parentContact")?,
        date_of_birth: get_optional_date(params, "dateOfBirth")?.map(date_key),
        notes: get_optional_str(params, "notes")?,
    };

    let student_id = insert_student(conn, &name, &class_name, student_no, &school_year, &extras)?;
    tracing::info!(student_id = %student_id, class_name = %class_name, "student created");
    let student = load_student(conn, &student_id)?;
    Ok(json!({ "student": student.to_json() }))
}

fn patch_text(
    patch: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    nullable: bool,
) -> Result<Option<Value>, HandlerErr> {
    match patch.get(key) {
        None => Ok(None),
        Some(serde_json::Value::Null) if nullable => Ok(Some(Value::Null)),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                if nullable {
                    Ok(Some(Value::Null))
                } else {
                    Err(HandlerErr::bad_params(format!("{} must not be empty", key)))
                }
            } else {
                Ok(Some(Value::Text(s.to_string())))
            }
        }
        Some(_) => Err(HandlerErr::bad_params(format!("patch.{} must be a string", key))),
    }
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing/invalid patch"));
    };

    let mut set_parts: Vec<&str> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    let text_fields: [(&str, &str, bool); 6] = [
        ("name", "name = ?", false),
        ("className", "class_name = ?", false),
        ("email", "email = ?", true),
        ("parentContact", "parent_contact = ?", true),
        ("notes", "notes = ?", true),
        ("schoolYear", "school_year = ?", false),
    ];
    for (key, clause, nullable) in text_fields {
        if let Some(v) = patch_text(patch, key, nullable)? {
            set_parts.push(clause);
            bind_values.push(v);
        }
    }
    if let Some(v) = patch_text(patch, "dateOfBirth", true)? {
        let v = match v {
            Value::Text(raw) => Value::Text(date_key(calc::parse_date_key(&raw)?)),
            other => other,
        };
        set_parts.push("date_of_birth = ?");
        bind_values.push(v);
    }
    if let Some(v) = patch.get("studentNo") {
        set_parts.push("student_no = ?");
        bind_values.push(Value::Integer(student_no_param(v)?));
    }
    if let Some(v) = patch.get("status") {
        let raw = v
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params("patch.status must be a string"))?;
        set_parts.push("status = ?");
        bind_values.push(Value::Text(StudentStatus::parse(raw)?.as_str().to_string()));
    }

    if set_parts.is_empty() {
        return Err(HandlerErr::bad_params("patch has no known fields"));
    }
    set_parts.push("updated_at = ?");
    bind_values.push(Value::Text(db::now_timestamp()));
    bind_values.push(Value::Text(student_id.clone()));

    let sql = format!("UPDATE students SET {} WHERE id = ?", set_parts.join(", "));
    let changed = conn
        .execute(&sql, rusqlite::params_from_iter(bind_values))
        .map_err(|e| HandlerErr::write("db_update_failed", "students", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    let student = load_student(conn, &student_id)?;
    Ok(json!({ "student": student.to_json() }))
}

/// Hard delete. Attendance and grade rows reference the student, so they are removed first.
fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    load_student(conn, &student_id)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::query)?;
    tx.execute("DELETE FROM attendance WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "attendance", e))?;
    tx.execute("DELETE FROM grades WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "grades", e))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "students", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::write("db_delete_failed", "students", e))?;

    tracing::info!(student_id = %student_id, "student deleted");
    Ok(json!({ "ok": true }))
}

fn students_next_number(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_name = get_required_str(params, "className")?;
    let next = next_student_no(conn, &class_name)?;
    Ok(json!({ "className": class_name, "studentNo": next }))
}

fn students_group_by_class(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_year = get_optional_str(params, "schoolYear")?;
    let sql = format!(
        "SELECT {} FROM students
         WHERE status = 'active' AND (? IS NULL OR school_year = ?)
         ORDER BY class_name, student_no",
        Student::COLUMNS
    );
    let students = collect_rows(
        conn,
        &sql,
        (school_year.as_deref(), school_year.as_deref()),
        Student::from_row,
    )?;

    let mut groups: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
    for s in &students {
        groups.entry(s.class_name.clone()).or_default().push(s.to_json());
    }
    let out: Vec<serde_json::Value> = groups
        .into_iter()
        .map(|(class_name, students)| {
            json!({ "className": class_name, "count": students.len(), "students": students })
        })
        .collect();
    Ok(json!({ "groups": out }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: DbHandler = match req.method.as_str() {
        "students.list" => students_list,
        "students.get" => students_get,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        "students.nextNumber" => students_next_number,
        "students.groupByClass" => students_group_by_class,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
