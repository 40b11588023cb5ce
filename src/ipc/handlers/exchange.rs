use crate::backup;
use crate::calc;
use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::handlers::settings::current_school_year;
use crate::ipc::handlers::students::{insert_student, StudentExtras};
use crate::ipc::helpers::{
    collect_rows, date_key, get_optional_date, get_optional_str, get_required_str, with_db,
    DbHandler,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{
    AttendanceRecord, Grade, Homework, SchoolClass, ScheduleEntry, Student, Subject,
};
use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};

pub(crate) fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_line<S: AsRef<str>>(cells: &[S]) -> String {
    let quoted: Vec<String> = cells.iter().map(|c| csv_quote(c.as_ref())).collect();
    quoted.join(",")
}

pub(crate) fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                buf.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => out.push(std::mem::take(&mut buf)),
            _ => buf.push(ch),
        }
    }
    out.push(buf);
    out
}

fn write_text(out_path: &str, text: &str) -> Result<(), HandlerErr> {
    let path = Path::new(out_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| HandlerErr::io(out_path, e))?;
    }
    std::fs::write(path, text).map_err(|e| HandlerErr::io(out_path, e))
}

fn write_csv(out_path: &str, header: &[&str], rows: &[Vec<String>]) -> Result<usize, HandlerErr> {
    let mut text = csv_line(header);
    text.push('\n');
    for row in rows {
        text.push_str(&csv_line(row));
        text.push('\n');
    }
    write_text(out_path, &text)?;
    Ok(rows.len())
}

fn opt(s: &Option<String>) -> String {
    s.clone().unwrap_or_default()
}

fn export_students_csv(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_path = get_required_str(params, "outPath")?;
    let class_name = get_optional_str(params, "className")?;
    let sql = format!(
        "SELECT {} FROM students
         WHERE (? IS NULL OR class_name = ?)
         ORDER BY class_name, student_no",
        Student::COLUMNS
    );
    let students = collect_rows(
        conn,
        &sql,
        (class_name.as_deref(), class_name.as_deref()),
        Student::from_row,
    )?;
    let rows: Vec<Vec<String>> = students
        .iter()
        .map(|s| {
            vec![
                s.student_no.to_string(),
                s.name.clone(),
                s.class_name.clone(),
                s.school_year.clone(),
                s.status.as_str().to_string(),
                opt(&s.email),
                opt(&s.parent_contact),
                opt(&s.date_of_birth),
            ]
        })
        .collect();
    let count = write_csv(
        &out_path,
        &[
            "studentNo",
            "name",
            "className",
            "schoolYear",
            "status",
            "email",
            "parentContact",
            "dateOfBirth",
        ],
        &rows,
    )?;
    tracing::info!(path = %out_path, rows = count, "students exported");
    Ok(json!({ "ok": true, "path": out_path, "rowsExported": count }))
}

fn export_grades_csv(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_path = get_required_str(params, "outPath")?;
    let class_name = get_optional_str(params, "className")?;
    let rows = collect_rows(
        conn,
        "SELECT g.id, g.student_id, g.class_name, g.subject, g.assessment_type,
                g.assessment_title, g.score, g.max_score, g.date, g.notes, s.name
         FROM grades g
         JOIN students s ON s.id = g.student_id
         WHERE (? IS NULL OR g.class_name = ?)
         ORDER BY g.class_name, s.student_no, g.date",
        (class_name.as_deref(), class_name.as_deref()),
        |r| Ok((Grade::from_row(r)?, r.get::<_, String>(10)?)),
    )?;
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|(g, student_name)| {
            let banding = g.banding();
            vec![
                student_name.clone(),
                g.class_name.clone(),
                g.subject.clone(),
                g.assessment_type.clone(),
                g.assessment_title.clone(),
                g.score.to_string(),
                g.max_score.to_string(),
                calc::round_1_decimal(banding.percentage).to_string(),
                banding.band.map(|b| b.to_string()).unwrap_or_default(),
                banding.letter.to_string(),
                g.date.clone(),
            ]
        })
        .collect();
    let count = write_csv(
        &out_path,
        &[
            "studentName",
            "className",
            "subject",
            "assessmentType",
            "assessmentTitle",
            "score",
            "maxScore",
            "percentage",
            "band",
            "letter",
            "date",
        ],
        &rows,
    )?;
    tracing::info!(path = %out_path, rows = count, "grades exported");
    Ok(json!({ "ok": true, "path": out_path, "rowsExported": count }))
}

fn export_attendance_csv(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_path = get_required_str(params, "outPath")?;
    let from = get_optional_date(params, "from")?.map(date_key);
    let to = get_optional_date(params, "to")?.map(date_key);
    let class_name = get_optional_str(params, "className")?;
    let rows = collect_rows(
        conn,
        "SELECT a.date_key, a.session_id, a.student_id, a.status, a.comment, a.updated_at,
                s.name, s.class_name
         FROM attendance a
         JOIN students s ON s.id = a.student_id
         WHERE (? IS NULL OR a.date_key >= ?)
           AND (? IS NULL OR a.date_key <= ?)
           AND (? IS NULL OR s.class_name = ?)
         ORDER BY a.date_key, s.class_name, s.student_no",
        (
            from.as_deref(),
            from.as_deref(),
            to.as_deref(),
            to.as_deref(),
            class_name.as_deref(),
            class_name.as_deref(),
        ),
        |r| {
            Ok((
                AttendanceRecord::from_row(r)?,
                r.get::<_, String>(6)?,
                r.get::<_, String>(7)?,
            ))
        },
    )?;
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|(rec, student_name, class_name)| {
            vec![
                rec.date_key.clone(),
                rec.session_id.clone(),
                student_name.clone(),
                class_name.clone(),
                rec.status.map(|s| s.as_str()).unwrap_or("").to_string(),
                rec.comment.clone(),
            ]
        })
        .collect();
    let count = write_csv(
        &out_path,
        &["date", "sessionId", "studentName", "className", "status", "comment"],
        &rows,
    )?;
    tracing::info!(path = %out_path, rows = count, "attendance exported");
    Ok(json!({ "ok": true, "path": out_path, "rowsExported": count }))
}

/// Columns: name, class, parentContact, dateOfBirth. The first line is a header.
fn import_students_csv(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let in_path = get_required_str(params, "inPath")?;
    let school_year = match get_optional_str(params, "schoolYear")? {
        Some(y) => y,
        None => current_school_year(conn)?
            .ok_or_else(|| HandlerErr::bad_params("missing schoolYear and no current year set"))?,
    };
    let text = std::fs::read_to_string(&in_path).map_err(|e| HandlerErr::io(&in_path, e))?;

    let mut imported = 0usize;
    let mut skipped = 0usize;
    let mut warnings: Vec<serde_json::Value> = Vec::new();
    for (i, line) in text.lines().enumerate().skip(1) {
        let line_no = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        let cells: Vec<String> = parse_csv_record(line)
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();
        if cells.len() < 2 || cells[0].is_empty() || cells[1].is_empty() {
            skipped += 1;
            warnings.push(json!({ "line": line_no, "message": "row needs a name and a class" }));
            continue;
        }
        let cell = |idx: usize| cells.get(idx).filter(|c| !c.is_empty()).cloned();
        let date_of_birth = match cell(3) {
            Some(raw) => match calc::parse_date_key(&raw) {
                Ok(d) => Some(date_key(d)),
                Err(e) => {
                    warnings.push(json!({ "line": line_no, "message": e.to_string() }));
                    None
                }
            },
            None => None,
        };
        let extras = StudentExtras {
            parent_contact: cell(2),
            date_of_birth,
            ..StudentExtras::default()
        };
        insert_student(conn, &cells[0], &cells[1], None, &school_year, &extras)?;
        imported += 1;
    }

    tracing::info!(path = %in_path, imported, skipped, "students imported");
    Ok(json!({
        "ok": true,
        "imported": imported,
        "skipped": skipped,
        "warnings": warnings
    }))
}

fn export_all_json(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_path = get_required_str(params, "outPath")?;

    let classes = collect_rows(
        conn,
        &format!("SELECT {} FROM classes c ORDER BY c.name", SchoolClass::COLUMNS),
        [],
        SchoolClass::from_row,
    )?;
    let subjects = collect_rows(
        conn,
        &format!("SELECT {} FROM subjects ORDER BY name", Subject::COLUMNS),
        [],
        Subject::from_row,
    )?;
    let students = collect_rows(
        conn,
        &format!("SELECT {} FROM students ORDER BY class_name, student_no", Student::COLUMNS),
        [],
        Student::from_row,
    )?;
    let grades = collect_rows(
        conn,
        &format!("SELECT {} FROM grades ORDER BY date, class_name", Grade::COLUMNS),
        [],
        Grade::from_row,
    )?;
    let homework = collect_rows(
        conn,
        &format!("SELECT {} FROM homework ORDER BY due_date", Homework::COLUMNS),
        [],
        Homework::from_row,
    )?;
    let attendance = collect_rows(
        conn,
        &format!(
            "SELECT {} FROM attendance ORDER BY date_key, session_id",
            AttendanceRecord::COLUMNS
        ),
        [],
        AttendanceRecord::from_row,
    )?;
    let schedule = collect_rows(
        conn,
        &format!(
            "SELECT {} FROM schedule_entries ORDER BY day_of_week, time_slot",
            ScheduleEntry::COLUMNS
        ),
        [],
        ScheduleEntry::from_row,
    )?;
    let settings = collect_rows(conn, "SELECT key, value_json FROM settings ORDER BY key", [], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })?;
    let settings: serde_json::Map<String, serde_json::Value> = settings
        .into_iter()
        .map(|(k, raw)| {
            let v = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
            (k, v)
        })
        .collect();

    let doc = json!({
        "exportedAt": db::now_timestamp(),
        "appVersion": env!("CARGO_PKG_VERSION"),
        "classes": classes,
        "subjects": subjects,
        "students": students,
        "grades": grades,
        "homework": homework,
        "attendance": attendance,
        "schedule": schedule,
        "settings": settings
    });
    let text = serde_json::to_string_pretty(&doc)
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    write_text(&out_path, &text)?;
    tracing::info!(path = %out_path, students = students.len(), "workspace exported as json");
    Ok(json!({
        "ok": true,
        "path": out_path,
        "counts": {
            "classes": classes.len(),
            "students": students.len(),
            "grades": grades.len(),
            "homework": homework.len(),
            "attendance": attendance.len()
        }
    }))
}

fn required_path(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

fn handle_backup_export_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match required_path(req, "outPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    match backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path)) {
        Ok(export) => {
            tracing::info!(path = %out_path, "workspace bundle exported");
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "path": out_path,
                    "bundleFormat": export.bundle_format,
                    "entryCount": export.entry_count,
                    "dbSha256": export.db_sha256
                }),
            )
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "bundle export failed");
            err(
                &req.id,
                "io_failed",
                format!("{e:#}"),
                Some(json!({ "path": out_path })),
            )
        }
    }
}

fn handle_backup_import_workspace_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match required_path(req, "inPath") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let workspace_path = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone());
    let Some(workspace_path) = workspace_path else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        );
    }

    // The open handle must go before the database file is replaced.
    state.db = None;
    state.workspace = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "bundle import failed");
            return err(
                &req.id,
                "io_failed",
                format!("{e:#}"),
                Some(json!({ "path": in_path })),
            );
        }
    };

    match open_workspace(state, &workspace_path) {
        Ok(()) => ok(
            &req.id,
            json!({
                "ok": true,
                "workspacePath": workspace_path.to_string_lossy(),
                "bundleFormatDetected": import.bundle_format_detected
            }),
        ),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => {
            return Some(handle_backup_export_workspace_bundle(state, req))
        }
        "backup.importWorkspaceBundle" => {
            return Some(handle_backup_import_workspace_bundle(state, req))
        }
        _ => {}
    }
    let handler: DbHandler = match req.method.as_str() {
        "exchange.exportStudentsCsv" => export_students_csv,
        "exchange.exportGradesCsv" => export_grades_csv,
        "exchange.exportAttendanceCsv" => export_attendance_csv,
        "exchange.importStudentsCsv" => import_students_csv,
        "exchange.exportAllJson" => export_all_json,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
