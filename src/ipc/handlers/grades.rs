use crate::calc::{self, GradeScheme};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::students::load_student;
use crate::ipc::helpers::{
    collect_rows, date_key, get_optional_date, get_optional_f64, get_optional_str,
    get_required_str, today, value_as_f64, with_db, DbHandler,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Grade;
use rusqlite::types::Value;
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

const DEFAULT_MAX_SCORE: f64 = 100.0;
const DEFAULT_ASSESSMENT_TYPE: &str = "Test";

/// A score cell from the entry grid. Blank cells are skipped, not rejected.
fn score_cell(student_id: &str, v: &serde_json::Value) -> Result<Option<f64>, HandlerErr> {
    match v {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(None),
        other => {
            let score = value_as_f64(other)
                .filter(|x| x.is_finite())
                .ok_or_else(|| {
                    HandlerErr::bad_params(format!("score for {} must be numeric", student_id))
                })?;
            if score < 0.0 {
                return Err(HandlerErr::bad_params(format!(
                    "score for {} must not be negative",
                    student_id
                )));
            }
            Ok(Some(score))
        }
    }
}

fn grades_add_batch(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(scores) = params.get("scores").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("scores must be an object"));
    };
    let title = get_required_str(params, "assessmentTitle")?;
    let subject = get_required_str(params, "subject")?;
    let class_name = get_required_str(params, "className")?;
    let assessment_type = get_optional_str(params, "assessmentType")?
        .unwrap_or_else(|| DEFAULT_ASSESSMENT_TYPE.to_string());
    let max_score = get_optional_f64(params, "maxScore")?.unwrap_or(DEFAULT_MAX_SCORE);
    if max_score <= 0.0 {
        return Err(HandlerErr::bad_params("maxScore must be greater than 0"));
    }
    let date = match get_optional_date(params, "date")? {
        Some(d) => date_key(d),
        None => date_key(today(params)?),
    };
    let notes = get_optional_str(params, "notes")?;

    let mut entries: Vec<(&str, f64)> = Vec::new();
    let mut skipped = 0usize;
    for (student_id, v) in scores {
        match score_cell(student_id, v)? {
            Some(score) => entries.push((student_id.as_str(), score)),
            None => skipped += 1,
        }
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::query)?;
    let mut grade_ids = Vec::with_capacity(entries.len());
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO grades(id, student_id, class_name, subject, assessment_type,
                    assessment_title, score, max_score, date, notes)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .map_err(HandlerErr::query)?;
        for (student_id, score) in &entries {
            let grade_id = Uuid::new_v4().to_string();
            stmt.execute((
                &grade_id,
                student_id,
                &class_name,
                &subject,
                &assessment_type,
                &title,
                score,
                max_score,
                &date,
                notes.as_deref(),
            ))
            .map_err(|e| {
                HandlerErr::write("db_insert_failed", "grades", e)
                    .with_details(json!({ "table": "grades", "studentId": student_id }))
            })?;
            grade_ids.push(grade_id);
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::write("db_insert_failed", "grades", e))?;

    tracing::info!(
        class_name = %class_name,
        subject = %subject,
        inserted = grade_ids.len(),
        skipped,
        "grades recorded"
    );
    Ok(json!({ "inserted": grade_ids.len(), "skipped": skipped, "gradeIds": grade_ids }))
}

fn load_student_grades(
    conn: &Connection,
    student_id: &str,
    subject: Option<&str>,
) -> Result<Vec<Grade>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM grades
         WHERE student_id = ? AND (? IS NULL OR subject = ?)
         ORDER BY date DESC, assessment_title",
        Grade::COLUMNS
    );
    collect_rows(conn, &sql, (student_id, subject, subject), Grade::from_row)
}

fn grades_list_by_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject = get_optional_str(params, "subject")?;
    let grades = load_student_grades(conn, &student_id, subject.as_deref())?;
    let out: Vec<serde_json::Value> = grades.iter().map(Grade::to_json).collect();
    Ok(json!({ "grades": out }))
}

fn grades_list_by_class(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_name = get_required_str(params, "className")?;
    let subjects: Vec<String> = match params.get("subjects") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(_) => return Err(HandlerErr::bad_params("subjects must be an array")),
    };

    let mut sql = String::from(
        "SELECT g.id, g.student_id, g.class_name, g.subject, g.assessment_type,
                g.assessment_title, g.score, g.max_score, g.date, g.notes, s.name
         FROM grades g
         JOIN students s ON s.id = g.student_id
         WHERE g.class_name = ?",
    );
    let mut binds: Vec<Value> = vec![Value::Text(class_name.clone())];
    if !subjects.is_empty() {
        let marks = vec!["?"; subjects.len()].join(", ");
        sql.push_str(&format!(" AND g.subject IN ({})", marks));
        binds.extend(subjects.iter().cloned().map(Value::Text));
    }
    sql.push_str(" ORDER BY s.student_no, g.date DESC");

    let rows = collect_rows(conn, &sql, rusqlite::params_from_iter(binds), |r| {
        Ok((Grade::from_row(r)?, r.get::<_, String>(10)?))
    })?;
    let out: Vec<serde_json::Value> = rows
        .iter()
        .map(|(g, student_name)| {
            let mut v = g.to_json();
            v["studentName"] = student_name.clone().into();
            v
        })
        .collect();
    Ok(json!({ "className": class_name, "grades": out }))
}

fn grades_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let grade_id = get_required_str(params, "gradeId")?;
    let changed = conn
        .execute("DELETE FROM grades WHERE id = ?", [&grade_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "grades", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("grade not found"));
    }
    Ok(json!({ "ok": true }))
}

fn grades_student_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject = get_optional_str(params, "subject")?;
    let student = load_student(conn, &student_id)?;
    let grades = load_student_grades(conn, &student_id, subject.as_deref())?;

    let average = calc::average_percentage(grades.iter().map(|g| (g.score, g.max_score)));
    let banding = average.map(|avg| {
        calc::band_for_percentage(avg, GradeScheme::for_class(&student.class_name))
    });

    let mut by_subject: BTreeMap<&str, Vec<(f64, f64)>> = BTreeMap::new();
    for g in &grades {
        by_subject
            .entry(g.subject.as_str())
            .or_default()
            .push((g.score, g.max_score));
    }
    let subjects: Vec<serde_json::Value> = by_subject
        .into_iter()
        .map(|(name, scores)| {
            let count = scores.len();
            let avg = calc::average_percentage(scores);
            json!({
                "subject": name,
                "count": count,
                "average": avg,
                "banding": avg.map(|a| calc::band_for_percentage(a, GradeScheme::for_class(&student.class_name)))
            })
        })
        .collect();

    Ok(json!({
        "studentId": student.id,
        "className": student.class_name,
        "count": grades.len(),
        "average": average,
        "banding": banding,
        "subjects": subjects
    }))
}

/// Class spread over primary bands, one entry per graded student.
fn grades_distribution(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_name = get_required_str(params, "className")?;
    let rows = collect_rows(
        conn,
        "SELECT s.id, g.score, g.max_score
         FROM students s
         JOIN grades g ON g.student_id = s.id
         WHERE s.class_name = ? AND s.status = 'active'",
        [&class_name],
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?, r.get::<_, f64>(2)?)),
    )?;

    let mut per_student: BTreeMap<String, Vec<(f64, f64)>> = BTreeMap::new();
    for (student_id, score, max_score) in rows {
        per_student.entry(student_id).or_default().push((score, max_score));
    }
    let averages: Vec<f64> = per_student
        .into_values()
        .filter_map(calc::average_percentage)
        .collect();
    let graded = averages.len();
    let bands: Vec<serde_json::Value> = calc::band_distribution(averages)
        .into_iter()
        .rev()
        .map(|(band, count)| {
            json!({ "band": band, "letter": calc::primary_letter(band), "count": count })
        })
        .collect();

    Ok(json!({ "className": class_name, "studentsGraded": graded, "bands": bands }))
}

/// Pure lookup; works before a workspace is open.
fn grades_band_info(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let pct = get_optional_f64(params, "percentage")?
        .ok_or_else(|| HandlerErr::bad_params("missing percentage"))?;
    let class_name = get_optional_str(params, "className")?.unwrap_or_default();
    let banding = calc::band_for_percentage(pct, GradeScheme::for_class(&class_name));
    Ok(json!({ "banding": banding }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if req.method == "grades.bandInfo" {
        return Some(match grades_band_info(&req.params) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        });
    }
    let handler: DbHandler = match req.method.as_str() {
        "grades.addBatch" => grades_add_batch,
        "grades.listByStudent" => grades_list_by_student,
        "grades.listByClass" => grades_list_by_class,
        "grades.delete" => grades_delete,
        "grades.studentSummary" => grades_student_summary,
        "grades.distribution" => grades_distribution,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
