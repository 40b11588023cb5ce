use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, with_db, DbHandler};
use crate::ipc::types::{AppState, Request};
use crate::promotion;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

const PROFILE_KEY: &str = "profile";
const SCHOOL_YEAR_KEY: &str = "schoolYear.current";

fn default_profile() -> Value {
    json!({
        "fullName": "",
        "email": "",
        "phone": "",
        "schoolName": "",
        "role": "Teacher",
        "subjects": [],
        "homeroomClass": null
    })
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_nullable_string_max(v: &Value, key: &str, max_len: usize) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = parse_string_max(v, key, max_len)?;
    Ok(if s.is_empty() { Value::Null } else { Value::String(s) })
}

fn parse_string_list(v: &Value, key: &str) -> Result<Value, String> {
    let items = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let s = parse_string_max(item, key, 80)?;
        if !s.is_empty() {
            out.push(Value::String(s));
        }
    }
    Ok(Value::Array(out))
}

fn merge_profile_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "stored profile must be a JSON object".to_string())?;
    for (k, v) in patch {
        match k.as_str() {
            "fullName" | "schoolName" => {
                obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
            }
            "email" => {
                let s = parse_string_max(v, k, 200)?;
                if !s.is_empty() && !s.contains('@') {
                    return Err("email must contain @".into());
                }
                obj.insert(k.clone(), Value::String(s));
            }
            "phone" | "role" => {
                obj.insert(k.clone(), Value::String(parse_string_max(v, k, 40)?));
            }
            "subjects" => {
                obj.insert(k.clone(), parse_string_list(v, k)?);
            }
            "homeroomClass" => {
                obj.insert(k.clone(), parse_nullable_string_max(v, k, 20)?);
            }
            _ => return Err(format!("unknown profile field: {}", k)),
        }
    }
    Ok(())
}

fn load_profile(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut current = default_profile();
    let saved = db::settings_get_json(conn, PROFILE_KEY)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    if let Some(saved_obj) = saved.as_ref().and_then(|v| v.as_object()) {
        // Stored fields that no longer validate fall back to defaults.
        for (k, v) in saved_obj {
            let mut single = Map::new();
            single.insert(k.clone(), v.clone());
            let _ = merge_profile_patch(&mut current, &single);
        }
    }
    Ok(current)
}

/// The school year new students are enrolled into and promotion starts from.
pub(crate) fn current_school_year(conn: &Connection) -> Result<Option<String>, HandlerErr> {
    let saved = db::settings_get_json(conn, SCHOOL_YEAR_KEY)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))?;
    Ok(saved.and_then(|v| v.as_str().map(|s| s.to_string())))
}

pub(crate) fn set_current_school_year(conn: &Connection, label: &str) -> Result<(), HandlerErr> {
    promotion::validate_school_year(label)?;
    db::settings_set_json(conn, SCHOOL_YEAR_KEY, &json!(label))
        .map_err(|e| HandlerErr::new("db_update_failed", format!("{e:#}")))
}

fn profile_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "profile": load_profile(conn)? }))
}

fn profile_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let mut current = load_profile(conn)?;
    merge_profile_patch(&mut current, patch).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, PROFILE_KEY, &current)
        .map_err(|e| HandlerErr::new("db_update_failed", format!("{e:#}")))?;
    tracing::info!(fields = patch.len(), "profile updated");
    Ok(json!({ "profile": current }))
}

fn school_year_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let current = current_school_year(conn)?;
    let next = match current.as_deref() {
        Some(label) => promotion::next_school_year(label).ok(),
        None => None,
    };
    Ok(json!({ "schoolYear": current, "nextSchoolYear": next }))
}

fn school_year_set(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let label = get_required_str(params, "schoolYear")?;
    set_current_school_year(conn, &label)?;
    tracing::info!(school_year = %label, "current school year set");
    Ok(json!({ "schoolYear": label }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: DbHandler = match req.method.as_str() {
        "settings.profileGet" => profile_get,
        "settings.profileUpdate" => profile_update,
        "settings.schoolYearGet" => school_year_get,
        "settings.schoolYearSet" => school_year_set,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
