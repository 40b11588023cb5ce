mod test_support;

use serde_json::json;
use test_support::{request_err_code, request_ok, shutdown, spawn_sidecar, temp_dir};

fn names(result: &serde_json::Value, key: &str) -> Vec<String> {
    result[key]
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|s| s["name"].as_str().map(|n| n.to_string()))
        .collect()
}

#[test]
fn students_crud_numbering_search_and_grouping() {
    let workspace = temp_dir("schoolbook-students");
    let (child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // No current year and none given.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "Ada Lovelace", "className": "Y5A" }),
    );
    assert_eq!(code, "bad_params");

    request_ok(&mut stdin, &mut reader, "3", "settings.schoolYearSet", json!({ "schoolYear": "2025-26" }));
    request_ok(&mut stdin, &mut reader, "4", "classes.create", json!({ "name": "Y5A" }));
    let code = request_err_code(&mut stdin, &mut reader, "5", "classes.create", json!({ "name": "Y5A" }));
    assert_eq!(code, "duplicate");

    let ada = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        json!({ "name": "Ada Lovelace", "className": "Y5A", "dateOfBirth": "2015-03-02" }),
    );
    assert_eq!(ada["student"]["studentNo"], 1);
    assert_eq!(ada["student"]["schoolYear"], "2025-26");
    assert_eq!(ada["student"]["displayName"], "1 - Ada Lovelace");
    assert_eq!(ada["student"]["initials"], "AL");
    let ada_id = ada["student"]["id"].as_str().expect("id").to_string();

    let grace = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.create",
        json!({ "name": "Grace Hopper", "className": "Y5A" }),
    );
    assert_eq!(grace["student"]["studentNo"], 2);
    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.create",
        json!({ "name": "Alan Turing", "className": "Y6B", "studentNo": 7 }),
    );

    let next = request_ok(&mut stdin, &mut reader, "9", "students.nextNumber", json!({ "className": "Y5A" }));
    assert_eq!(next["studentNo"], 3);
    let next = request_ok(&mut stdin, &mut reader, "10", "students.nextNumber", json!({ "className": "Y1C" }));
    assert_eq!(next["studentNo"], 1);

    let found = request_ok(&mut stdin, &mut reader, "11", "students.list", json!({ "search": "grace" }));
    assert_eq!(names(&found, "students"), vec!["Grace Hopper"]);
    for (id, wildcard) in [("11a", "%"), ("11b", "_")] {
        let found = request_ok(&mut stdin, &mut reader, id, "students.list", json!({ "search": wildcard }));
        assert!(names(&found, "students").is_empty(), "{} matched as a wildcard", wildcard);
    }
    let found = request_ok(&mut stdin, &mut reader, "12", "students.list", json!({ "className": "Y5A" }));
    assert_eq!(names(&found, "students"), vec!["Ada Lovelace", "Grace Hopper"]);

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "students.update",
        json!({ "studentId": ada_id, "patch": { "parentContact": "07700 900123", "notes": "" } }),
    );
    assert_eq!(updated["student"]["parentContact"], "07700 900123");
    assert!(updated["student"]["notes"].is_null());
    assert!(updated["student"]["updatedAt"].is_string());

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "14",
        "students.update",
        json!({ "studentId": ada_id, "patch": { "name": "  " } }),
    );
    assert_eq!(code, "bad_params");

    let groups = request_ok(&mut stdin, &mut reader, "15", "students.groupByClass", json!({}));
    let groups = groups["groups"].as_array().expect("groups");
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["className"], "Y5A");
    assert_eq!(groups[0]["count"], 2);
    assert_eq!(groups[1]["className"], "Y6B");

    let classes = request_ok(&mut stdin, &mut reader, "16", "classes.list", json!({}));
    assert_eq!(classes["classes"][0]["studentCount"], 2);

    // Delete clears dependent rows first.
    request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "attendance.mark",
        json!({ "dateKey": "2025-10-06", "sessionId": "Y5A-08:00-2025-10-06", "studentId": ada_id, "status": "present" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "grades.addBatch",
        json!({ "scores": { ada_id.clone(): 80 }, "assessmentTitle": "Quiz", "subject": "Maths", "className": "Y5A" }),
    );
    request_ok(&mut stdin, &mut reader, "19", "students.delete", json!({ "studentId": ada_id }));
    let code = request_err_code(&mut stdin, &mut reader, "20", "students.get", json!({ "studentId": ada_id }));
    assert_eq!(code, "not_found");

    shutdown(child, stdin);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn classes_and_subjects_soft_delete() {
    let workspace = temp_dir("schoolbook-classes");
    let (child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(&mut stdin, &mut reader, "2", "classes.create", json!({ "name": "Y2A" }));
    let class_id = created["classId"].as_str().expect("class id").to_string();
    request_ok(&mut stdin, &mut reader, "3", "classes.delete", json!({ "classId": class_id }));

    let active = request_ok(&mut stdin, &mut reader, "4", "classes.list", json!({}));
    assert!(active["classes"].as_array().expect("classes").is_empty());
    let all = request_ok(&mut stdin, &mut reader, "5", "classes.list", json!({ "includeInactive": true }));
    assert_eq!(all["classes"][0]["active"], false);

    // The name is free again once the old class is inactive.
    request_ok(&mut stdin, &mut reader, "6", "classes.create", json!({ "name": "Y2A" }));

    let subject = request_ok(&mut stdin, &mut reader, "7", "subjects.create", json!({ "name": "Science" }));
    let subject_id = subject["subjectId"].as_str().expect("subject id").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "subjects.update",
        json!({ "subjectId": subject_id, "name": "Biology" }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "9", "subjects.list", json!({}));
    assert_eq!(names(&listed, "subjects"), vec!["Biology"]);
    request_ok(&mut stdin, &mut reader, "10", "subjects.delete", json!({ "subjectId": subject_id }));
    let listed = request_ok(&mut stdin, &mut reader, "11", "subjects.list", json!({}));
    assert!(listed["subjects"].as_array().expect("subjects").is_empty());

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "12",
        "subjects.update",
        json!({ "subjectId": "missing", "name": "Art" }),
    );
    assert_eq!(code, "not_found");

    shutdown(child, stdin);
    let _ = std::fs::remove_dir_all(workspace);
}
