mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn router_reports_protocol_errors() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let code = request_err(&mut stdin, &mut reader, "2", "courses.list", json!({}));
    assert_eq!(code, "no_workspace");

    let code = request_err(&mut stdin, &mut reader, "3", "courses.teleport", json!({}));
    assert_eq!(code, "not_implemented");

    writeln!(stdin, "{{not json").expect("write malformed line");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json response");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value["ok"], json!(false));
    assert_eq!(value["error"]["code"], json!("bad_json"));

    // The process keeps serving after a malformed line.
    let code = request_err(&mut stdin, &mut reader, "4", "workspace.select", json!({}));
    assert_eq!(code, "bad_params");
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("coursebook-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(
        selected["workspacePath"].as_str(),
        Some(workspace.to_string_lossy().as_ref())
    );
    assert!(workspace.join("coursebook.sqlite3").is_file());

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "title": "Smoke Course" }),
    );
    let course_id = str_field(&course, "courseId");
    let section = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sections.create",
        json!({ "courseId": course_id, "title": "Intro" }),
    );
    let section_id = str_field(&section, "sectionId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "lessons.create",
        json!({ "sectionId": section_id, "title": "Welcome" }),
    );
    let cohort = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "cohorts.create",
        json!({ "courseId": course_id, "name": "Spring" }),
    );
    let cohort_id = str_field(&cohort, "cohortId");
    let enrollment = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "enrollments.create",
        json!({ "courseId": course_id, "studentName": "Ada", "cohortId": cohort_id }),
    );
    let enrollment_id = str_field(&enrollment, "enrollmentId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "submissions.list",
        json!({ "courseId": course_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "analytics.course.open",
        json!({ "courseId": course_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "analytics.student.open",
        json!({ "enrollmentId": enrollment_id }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "10", "setup.get", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "backup.export",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    assert!(bundle_out.is_file());

    let listed = request_ok(&mut stdin, &mut reader, "12", "courses.list", json!({}));
    let courses = listed["courses"].as_array().expect("courses");
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0]["sectionCount"], json!(1));
    assert_eq!(courses[0]["lessonCount"], json!(1));
    assert_eq!(courses[0]["durationMinutes"], json!(30));
}

#[test]
fn reselecting_a_workspace_keeps_schema_and_rows() {
    let workspace = temp_dir("coursebook-reselect");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let select = json!({ "path": workspace.to_string_lossy() });

    let _ = request_ok(&mut stdin, &mut reader, "1", "workspace.select", select.clone());
    let course_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "courses.create",
            json!({ "title": "Weaving" }),
        ),
        "courseId",
    );
    let section_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "sections.create",
            json!({ "courseId": course_id, "title": "Looms" }),
        ),
        "sectionId",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "lessons.create",
        json!({ "sectionId": section_id, "title": "Warping" }),
    );

    let _ = request_ok(&mut stdin, &mut reader, "5", "workspace.select", select);
    let tree = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.open",
        json!({ "courseId": course_id }),
    );
    assert_eq!(tree["sections"][0]["lessons"][0]["kind"], json!("video"));

    let conn = rusqlite::Connection::open(workspace.join("coursebook.sqlite3"))
        .expect("open workspace db");
    let mut stmt = conn
        .prepare("PRAGMA table_info(course_lessons)")
        .expect("prepare");
    let kind_columns = stmt
        .query_map([], |r| r.get::<_, String>(1))
        .expect("query")
        .filter_map(Result::ok)
        .filter(|name| name == "kind")
        .count();
    assert_eq!(kind_columns, 1);
}
