use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::settings::{current_school_year, set_current_school_year};
use crate::ipc::helpers::{collect_rows, get_optional_str, get_required_str, with_db, DbHandler};
use crate::ipc::types::{AppState, Request};
use crate::promotion::{self, Promotion};
use rusqlite::Connection;
use serde_json::json;

#[derive(Debug, Default)]
struct PromotionTally {
    archived: usize,
    promoted: usize,
    graduated: usize,
    skipped: Vec<serde_json::Value>,
}

impl PromotionTally {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "archived": self.archived,
            "promoted": self.promoted,
            "graduated": self.graduated,
            "skipped": self.skipped
        })
    }

    /// Stops the batch: earlier writes stay applied and are reported with the failure.
    fn fail(&self, step: &str, student_id: Option<&str>, e: rusqlite::Error) -> HandlerErr {
        let mut details = self.to_json();
        details["step"] = step.into();
        details["studentId"] = student_id.into();
        HandlerErr::new("partial_failure", e.to_string()).with_details(details)
    }
}

fn archive_year(conn: &Connection, school_year: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE students SET status = 'archived', updated_at = ?
         WHERE school_year = ? AND status <> 'archived'",
        (db::now_timestamp(), school_year),
    )
}

fn years_archive(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school_year = get_required_str(params, "schoolYear")?;
    promotion::validate_school_year(&school_year)?;
    let archived = archive_year(conn, &school_year)
        .map_err(|e| HandlerErr::write("db_update_failed", "students", e))?;
    tracing::info!(school_year = %school_year, archived, "school year archived");
    Ok(json!({ "schoolYear": school_year, "archived": archived }))
}

/// Archive last year, then move each active student of `currentYear` up one class or graduate
/// them. Writes are applied one at a time.
fn years_promote(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let current_year = match get_optional_str(params, "currentYear")? {
        Some(y) => y,
        None => current_school_year(conn)?
            .ok_or_else(|| HandlerErr::bad_params("missing currentYear and no current year set"))?,
    };
    let next_year = promotion::next_school_year(&current_year)?;
    let previous_year = promotion::previous_school_year(&current_year)?;

    let mut tally = PromotionTally::default();
    let archived =
        archive_year(conn, &previous_year).map_err(|e| tally.fail("archive", None, e))?;
    tally.archived = archived;

    let students = collect_rows(
        conn,
        "SELECT id, name, class_name FROM students
         WHERE school_year = ? AND status = 'active'
         ORDER BY class_name, student_no",
        [&current_year],
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?)),
    )?;

    for (student_id, name, class_name) in &students {
        let result = match promotion::promote(class_name, &current_year)? {
            Promotion::Promoted {
                class_name: next_class,
                school_year,
            } => conn
                .execute(
                    "UPDATE students SET class_name = ?, school_year = ?, updated_at = ? WHERE id = ?",
                    (&next_class, &school_year, db::now_timestamp(), student_id),
                )
                .map(|_| tally.promoted += 1),
            Promotion::Graduated => conn
                .execute(
                    "UPDATE students SET status = 'graduated', updated_at = ? WHERE id = ?",
                    (db::now_timestamp(), student_id),
                )
                .map(|_| tally.graduated += 1),
            Promotion::Unparseable => {
                tracing::warn!(student_id = %student_id, class_name = %class_name, "class label not promotable");
                tally.skipped.push(json!({
                    "studentId": student_id,
                    "name": name,
                    "className": class_name
                }));
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::error!(student_id = %student_id, error = %e, "promotion stopped");
            return Err(tally.fail("promote", Some(student_id.as_str()), e));
        }
    }

    set_current_school_year(conn, &next_year)?;
    tracing::info!(
        from = %current_year,
        to = %next_year,
        promoted = tally.promoted,
        graduated = tally.graduated,
        archived = tally.archived,
        "year promotion finished"
    );

    let mut out = tally.to_json();
    out["fromYear"] = current_year.into();
    out["toYear"] = next_year.into();
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: DbHandler = match req.method.as_str() {
        "years.archive" => years_archive,
        "years.promote" => years_promote,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
