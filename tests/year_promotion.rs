mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err_code, request_ok, shutdown, spawn_sidecar, temp_dir};

fn get(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
) -> serde_json::Value {
    request_ok(stdin, reader, id, "students.get", json!({ "studentId": student_id }))["student"]
        .clone()
}

#[test]
fn promotion_moves_graduates_skips_and_archives() {
    let workspace = temp_dir("schoolbook-promotion");
    let (child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "settings.schoolYearSet",
        json!({ "schoolYear": "2025-26" }),
    );

    let mut ids = Vec::new();
    for (i, (name, class_name, year)) in [
        ("Ada", "Y5B", "2025-26"),
        ("Zed", "Y9A", "2025-26"),
        ("Rae", "Reception", "2025-26"),
        ("Old", "Y6A", "2024-25"),
    ]
    .iter()
    .enumerate()
    {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({ "name": name, "className": class_name, "schoolYear": year }),
        );
        ids.push(created["student"]["id"].as_str().expect("id").to_string());
    }

    let result = request_ok(&mut stdin, &mut reader, "3", "years.promote", json!({}));
    assert_eq!(result["fromYear"], "2025-26");
    assert_eq!(result["toYear"], "2026-27");
    assert_eq!(result["archived"], 1);
    assert_eq!(result["promoted"], 1);
    assert_eq!(result["graduated"], 1);
    let skipped = result["skipped"].as_array().expect("skipped");
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0]["className"], "Reception");

    let ada = get(&mut stdin, &mut reader, "4", &ids[0]);
    assert_eq!(ada["className"], "Y6B");
    assert_eq!(ada["schoolYear"], "2026-27");
    assert_eq!(ada["status"], "active");

    let zed = get(&mut stdin, &mut reader, "5", &ids[1]);
    assert_eq!(zed["status"], "graduated");
    assert_eq!(zed["className"], "Y9A");
    assert_eq!(zed["schoolYear"], "2025-26");

    let rae = get(&mut stdin, &mut reader, "6", &ids[2]);
    assert_eq!(rae["className"], "Reception");
    assert_eq!(rae["status"], "active");

    let old = get(&mut stdin, &mut reader, "7", &ids[3]);
    assert_eq!(old["status"], "archived");

    let year = request_ok(&mut stdin, &mut reader, "8", "settings.schoolYearGet", json!({}));
    assert_eq!(year["schoolYear"], "2026-27");
    assert_eq!(year["nextSchoolYear"], "2027-28");

    let active = request_ok(&mut stdin, &mut reader, "9", "students.list", json!({}));
    assert_eq!(active["students"].as_array().expect("students").len(), 2);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "10",
        "years.promote",
        json!({ "currentYear": "2025/26" }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "11",
        "settings.schoolYearSet",
        json!({ "schoolYear": "2025-27" }),
    );
    assert_eq!(code, "bad_params");

    shutdown(child, stdin);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn archive_marks_only_active_students_of_that_year() {
    let workspace = temp_dir("schoolbook-archive");
    let (child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    for (i, year) in ["2024-25", "2024-25", "2025-26"].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({ "name": format!("Pupil {}", i), "className": "Y3A", "schoolYear": year }),
        );
    }

    let archived = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "years.archive",
        json!({ "schoolYear": "2024-25" }),
    );
    assert_eq!(archived["archived"], 2);
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "years.archive",
        json!({ "schoolYear": "2024-25" }),
    );
    assert_eq!(again["archived"], 0);

    let archived_list = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.list",
        json!({ "status": "archived" }),
    );
    assert_eq!(archived_list["students"].as_array().expect("students").len(), 2);

    let code = request_err_code(&mut stdin, &mut reader, "5", "years.promote", json!({}));
    assert_eq!(code, "bad_params");

    shutdown(child, stdin);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn graduates_are_archived_with_their_year() {
    let workspace = temp_dir("schoolbook-graduate-archive");
    let (child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "Zed", "className": "Y9A", "schoolYear": "2025-26" }),
    );
    let zed_id = created["student"]["id"].as_str().expect("id").to_string();

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "years.promote",
        json!({ "currentYear": "2025-26" }),
    );
    assert_eq!(first["graduated"], 1);
    assert_eq!(get(&mut stdin, &mut reader, "4", &zed_id)["status"], "graduated");

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "years.promote",
        json!({ "currentYear": "2026-27" }),
    );
    assert_eq!(second["archived"], 1);
    let zed = get(&mut stdin, &mut reader, "6", &zed_id);
    assert_eq!(zed["status"], "archived");
    assert_eq!(zed["schoolYear"], "2025-26");

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "years.archive",
        json!({ "schoolYear": "2025-26" }),
    );
    assert_eq!(again["archived"], 0);

    shutdown(child, stdin);
    let _ = std::fs::remove_dir_all(workspace);
}
