mod test_support;

use serde_json::json;
use test_support::{request_err_code, request_ok, shutdown, spawn_sidecar, temp_dir};

#[test]
fn weekly_timetable_orders_slots_and_counts_subjects() {
    let workspace = temp_dir("schoolbook-schedule");
    let (child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let entries = [
        json!({ "dayOfWeek": "monday", "timeSlot": "10:00-10:45", "className": "Y5A", "subject": "Science" }),
        json!({ "dayOfWeek": "Monday", "timeSlot": "8:00-8:45", "className": "Y5A", "subject": "Maths" }),
        json!({ "dayOfWeek": "Monday", "timeSlot": "12:00-12:30", "kind": "duty", "label": "Lunch duty" }),
        json!({ "dayOfWeek": "Wednesday", "timeSlot": "09:00-09:45", "className": "Y6B", "subject": "Maths" }),
    ];
    let mut ids = Vec::new();
    for (i, entry) in entries.into_iter().enumerate() {
        let added = request_ok(&mut stdin, &mut reader, &format!("a{}", i), "schedule.add", entry);
        ids.push(added["entry"]["id"].as_str().expect("entry id").to_string());
    }

    let monday = request_ok(&mut stdin, &mut reader, "2", "schedule.day", json!({ "day": "MONDAY" }));
    assert_eq!(monday["day"], "Monday");
    let slots: Vec<&str> = monday["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .map(|e| e["timeSlot"].as_str().unwrap_or(""))
        .collect();
    assert_eq!(slots, vec!["08:00-08:45", "10:00-10:45", "12:00-12:30"]);
    assert_eq!(monday["entries"][2]["kind"], "duty");

    let week = request_ok(&mut stdin, &mut reader, "3", "schedule.week", json!({}));
    let days = week["days"].as_array().expect("days");
    assert_eq!(days.len(), 5);
    assert_eq!(days[2]["day"], "Wednesday");
    assert_eq!(days[2]["entries"].as_array().expect("wed").len(), 1);
    assert_eq!(days[4]["entries"].as_array().expect("fri").len(), 0);

    let counts = request_ok(&mut stdin, &mut reader, "4", "schedule.subjectCounts", json!({}));
    assert_eq!(
        counts["subjects"],
        json!([{ "subject": "Maths", "count": 2 }, { "subject": "Science", "count": 1 }])
    );

    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.update",
        json!({ "entryId": ids[0], "patch": { "dayOfWeek": "Friday", "timeSlot": "13:00-13:45" } }),
    );
    assert_eq!(moved["entry"]["dayOfWeek"], "Friday");
    assert_eq!(moved["entry"]["subject"], "Science");

    for (id, params) in [
        ("6", json!({ "dayOfWeek": "Saturday", "timeSlot": "08:00-08:45", "className": "Y5A", "subject": "Art" })),
        ("7", json!({ "dayOfWeek": "Tuesday", "timeSlot": "09:00-08:00", "className": "Y5A", "subject": "Art" })),
        ("8", json!({ "dayOfWeek": "Tuesday", "timeSlot": "09:00-09:45", "className": "Y5A" })),
        ("9", json!({ "dayOfWeek": "Tuesday", "timeSlot": "09:00-09:45", "kind": "duty" })),
    ] {
        assert_eq!(
            request_err_code(&mut stdin, &mut reader, id, "schedule.add", params),
            "bad_params"
        );
    }

    request_ok(&mut stdin, &mut reader, "10", "schedule.delete", json!({ "entryId": ids[2] }));
    let code = request_err_code(&mut stdin, &mut reader, "11", "schedule.delete", json!({ "entryId": ids[2] }));
    assert_eq!(code, "not_found");

    shutdown(child, stdin);
    let _ = std::fs::remove_dir_all(workspace);
}
