mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn setup_defaults_and_validation() {
    let workspace = temp_dir("coursebook-setup-defaults");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let setup = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(setup["analysis"]["bands"].as_array().map(|a| a.len()), Some(5));
    assert_eq!(setup["analysis"]["bands"][0]["label"], json!("90-100"));
    assert_eq!(setup["analysis"]["trendGranularity"], json!("month"));
    assert_eq!(setup["analysis"]["topBottomCount"], json!(5));
    assert_eq!(setup["builder"]["defaultLessonDurationMinutes"], json!(30));
    assert_eq!(setup["builder"]["defaultLessonKind"], json!("video"));
    assert_eq!(setup["builder"]["showArchivedByDefault"], json!(false));

    let gap = json!([
        { "label": "High", "min": 60, "max": 100 },
        { "label": "Low", "min": 0, "max": 49 }
    ]);
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "analysis", "patch": { "bands": gap } }),
    );
    assert_eq!(code, "invalid_band_configuration");

    let overlap = json!([
        { "label": "High", "min": 50, "max": 100 },
        { "label": "Low", "min": 0, "max": 60 }
    ]);
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "analysis", "patch": { "bands": overlap } }),
    );
    assert_eq!(code, "invalid_band_configuration");

    let beyond = json!([
        { "label": "Bonus", "min": 101, "max": 200 },
        { "label": "Pass", "min": 50, "max": 100 },
        { "label": "Fail", "min": 0, "max": 49 }
    ]);
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4b",
        "setup.update",
        json!({ "section": "analysis", "patch": { "bands": beyond } }),
    );
    assert_eq!(code, "invalid_band_configuration");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "analysis", "patch": { "topBottomCount": 0 } }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "builder", "patch": { "defaultLessonDurationMinutes": 601 } }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "setup.update",
        json!({ "section": "billing", "patch": {} }),
    );
    assert_eq!(code, "bad_params");

    // Failed updates leave saved values untouched.
    let setup = request_ok(&mut stdin, &mut reader, "8", "setup.get", json!({}));
    assert_eq!(setup["analysis"]["bands"].as_array().map(|a| a.len()), Some(5));
    assert_eq!(setup["analysis"]["topBottomCount"], json!(5));
}

#[test]
fn custom_bands_and_granularity_apply_to_analytics() {
    let workspace = temp_dir("coursebook-setup-bands");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Given low-first; stored high-first.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({
            "section": "analysis",
            "patch": {
                "bands": [
                    { "label": "Fail", "min": 0, "max": 49 },
                    { "label": "Pass", "min": 50, "max": 100 }
                ],
                "trendGranularity": "day"
            }
        }),
    );
    assert_eq!(updated["analysis"]["bands"][0]["label"], json!("Pass"));
    assert_eq!(updated["analysis"]["trendGranularity"], json!("day"));

    let course_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "courses.create",
            json!({ "title": "Chemistry" }),
        ),
        "courseId",
    );
    let enrollment_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "4",
            "enrollments.create",
            json!({ "courseId": course_id, "studentName": "Flo" }),
        ),
        "enrollmentId",
    );
    let mut id = 4;
    for (score, date) in [(49.5, "2026-03-02"), (50.0, "2026-03-03"), (88.0, "2026-03-03")] {
        id += 1;
        let submission_id = str_field(
            &request_ok(
                &mut stdin,
                &mut reader,
                &id.to_string(),
                "submissions.create",
                json!({
                    "enrollmentId": enrollment_id,
                    "assignmentTitle": format!("Lab {}", id),
                    "maxScore": 100,
                    "submittedAt": date
                }),
            ),
            "submissionId",
        );
        id += 1;
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &id.to_string(),
            "submissions.grade",
            json!({ "submissionId": submission_id, "score": score }),
        );
    }

    let analytics = request_ok(
        &mut stdin,
        &mut reader,
        "100",
        "analytics.course.open",
        json!({ "courseId": course_id }),
    );
    let dist = analytics["distribution"].as_array().expect("distribution");
    assert_eq!(dist.len(), 2);
    assert_eq!(dist[0]["label"], json!("Pass"));
    assert_eq!(dist[0]["count"], json!(2));
    assert_eq!(dist[1]["label"], json!("Fail"));
    assert_eq!(dist[1]["count"], json!(1));

    assert_eq!(analytics["granularity"], json!("day"));
    let periods: Vec<&str> = analytics["trend"]
        .as_array()
        .expect("trend")
        .iter()
        .map(|p| p["period"].as_str().expect("period"))
        .collect();
    assert_eq!(periods, vec!["2026-03-02", "2026-03-03"]);
}
