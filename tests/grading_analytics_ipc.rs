mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, str_field, temp_dir};

fn approx(v: &serde_json::Value, expected: f64) {
    let got = v.as_f64().unwrap_or_else(|| panic!("not a number: {}", v));
    assert!((got - expected).abs() < 1e-9, "expected {}, got {}", expected, got);
}

#[test]
fn graded_submissions_drive_course_cohort_and_student_analytics() {
    let workspace = temp_dir("coursebook-grading-analytics");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let mut n = 0u32;
    let mut next = || {
        n += 1;
        n.to_string()
    };

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            &next(),
            "courses.create",
            json!({ "title": "Statistics" }),
        ),
        "courseId",
    );
    let cohort_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            &next(),
            "cohorts.create",
            json!({ "courseId": course_id, "name": "Spring", "startDate": "2026-01-05" }),
        ),
        "cohortId",
    );

    let mut enroll = |name: &str, cohort: Option<&str>| {
        let id = next();
        str_field(
            &request_ok(
                &mut stdin,
                &mut reader,
                &id,
                "enrollments.create",
                json!({ "courseId": course_id, "studentName": name, "cohortId": cohort }),
            ),
            "enrollmentId",
        )
    };
    let ada = enroll("Ada", Some(&cohort_id));
    let ben = enroll("Ben", Some(&cohort_id));
    let cal = enroll("Cal", None);

    // (enrollment, assignment, max, score, date)
    let graded = [
        (&ada, "Essay", 100.0, Some(95.0), "2026-01-10"),
        (&ada, "Quiz", 50.0, Some(41.0), "2026-02-05"),
        (&ben, "Essay", 100.0, Some(71.0), "2026-01-12"),
        (&ben, "Quiz", 50.0, Some(27.5), "2026-02-05"),
        (&cal, "Essay", 100.0, None, "2026-01-11"),
    ];
    for (enrollment_id, title, max, score, date) in graded {
        let submission_id = str_field(
            &request_ok(
                &mut stdin,
                &mut reader,
                &next(),
                "submissions.create",
                json!({
                    "enrollmentId": enrollment_id,
                    "assignmentTitle": title,
                    "maxScore": max,
                    "submittedAt": date
                }),
            ),
            "submissionId",
        );
        if let Some(score) = score {
            let graded = request_ok(
                &mut stdin,
                &mut reader,
                &next(),
                "submissions.grade",
                json!({ "submissionId": submission_id, "score": score }),
            );
            if title == "Quiz" && score == 41.0 {
                approx(&graded["percentage"], 82.0);
                assert_eq!(graded["letter"], json!("B-"));
            }
        } else {
            let code = request_err(
                &mut stdin,
                &mut reader,
                &next(),
                "submissions.grade",
                json!({ "submissionId": submission_id, "score": 101 }),
            );
            assert_eq!(code, "bad_params");
            let code = request_err(
                &mut stdin,
                &mut reader,
                &next(),
                "submissions.grade",
                json!({ "submissionId": submission_id, "score": -1 }),
            );
            assert_eq!(code, "bad_params");
        }
    }

    let graded_list = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "submissions.list",
        json!({ "courseId": course_id, "gradedOnly": true }),
    );
    assert_eq!(graded_list["submissions"].as_array().map(|a| a.len()), Some(4));
    let ungraded_list = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "submissions.list",
        json!({ "courseId": course_id, "ungradedOnly": true }),
    );
    assert_eq!(ungraded_list["submissions"].as_array().map(|a| a.len()), Some(1));
    assert!(ungraded_list["submissions"][0]["percentage"].is_null());

    let course = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "analytics.course.open",
        json!({ "courseId": course_id }),
    );
    assert_eq!(course["summary"]["count"], json!(4));
    approx(&course["summary"]["average"], 75.75);
    assert_eq!(course["summary"]["letter"], json!("C"));
    assert_eq!(course["ungradedCount"], json!(1));
    let counts: Vec<i64> = course["distribution"]
        .as_array()
        .expect("distribution")
        .iter()
        .map(|b| b["count"].as_i64().expect("count"))
        .collect();
    assert_eq!(counts, vec![1, 1, 1, 0, 1]);
    approx(&course["distribution"][0]["percentage"], 25.0);

    assert_eq!(course["granularity"], json!("month"));
    assert_eq!(course["trend"][0]["period"], json!("2026-01"));
    approx(&course["trend"][0]["average"], 83.0);
    assert_eq!(course["trend"][1]["period"], json!("2026-02"));
    approx(&course["trend"][1]["average"], 68.5);

    assert_eq!(course["perAssignment"][0]["key"], json!("Essay"));
    approx(&course["perAssignment"][0]["average"], 83.0);
    assert_eq!(course["perCohort"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(course["perCohort"][0]["cohortId"], json!(cohort_id));
    assert_eq!(course["perCohort"][0]["cohortName"], json!("Spring"));
    assert_eq!(course["topBottom"]["top"][0]["studentName"], json!("Ada"));
    approx(&course["topBottom"]["top"][0]["average"], 88.5);
    assert_eq!(course["topBottom"]["bottom"][0]["studentName"], json!("Ben"));

    let weekly = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "analytics.course.open",
        json!({ "courseId": course_id, "granularity": "week" }),
    );
    let periods: Vec<&str> = weekly["trend"]
        .as_array()
        .expect("trend")
        .iter()
        .map(|p| p["period"].as_str().expect("period"))
        .collect();
    assert_eq!(periods, vec!["2026-W02", "2026-W03", "2026-W06"]);
    let code = request_err(
        &mut stdin,
        &mut reader,
        &next(),
        "analytics.course.open",
        json!({ "courseId": course_id, "granularity": "fortnight" }),
    );
    assert_eq!(code, "bad_params");

    let cohort = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "analytics.cohort.open",
        json!({ "cohortId": cohort_id }),
    );
    assert_eq!(cohort["studentCount"], json!(2));
    assert_eq!(cohort["rows"][0]["studentName"], json!("Ada"));
    approx(&cohort["rows"][0]["average"], 88.5);
    assert_eq!(cohort["rows"][1]["gradedCount"], json!(2));

    let student = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "analytics.student.open",
        json!({ "enrollmentId": ada }),
    );
    assert_eq!(student["summary"]["count"], json!(2));
    approx(&student["summary"]["average"], 88.5);
    approx(&student["courseAverage"], 75.75);
    assert_eq!(student["items"].as_array().map(|a| a.len()), Some(2));

    let ungraded_student = request_ok(
        &mut stdin,
        &mut reader,
        &next(),
        "analytics.student.open",
        json!({ "enrollmentId": cal }),
    );
    assert_eq!(ungraded_student["summary"]["count"], json!(0));
    approx(&ungraded_student["summary"]["average"], 0.0);
    assert!(ungraded_student["summary"]["letter"].is_null());
    assert_eq!(ungraded_student["trend"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn same_named_cohorts_are_reported_separately() {
    let workspace = temp_dir("coursebook-cohort-names");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let mut n = 0u32;
    let mut next = || {
        n += 1;
        n.to_string()
    };
    let mut call = |method: &str, params: serde_json::Value| {
        let id = next();
        request_ok(&mut stdin, &mut reader, &id, method, params)
    };

    let _ = call(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course_id = str_field(&call("courses.create", json!({ "title": "Chemistry" })), "courseId");
    let mut cohort_ids = Vec::new();
    for (student, score) in [("Fay", 100.0), ("Gus", 50.0)] {
        let cohort_id = str_field(
            &call(
                "cohorts.create",
                json!({ "courseId": course_id, "name": "Spring" }),
            ),
            "cohortId",
        );
        let enrollment_id = str_field(
            &call(
                "enrollments.create",
                json!({ "courseId": course_id, "studentName": student, "cohortId": cohort_id }),
            ),
            "enrollmentId",
        );
        let submission_id = str_field(
            &call(
                "submissions.create",
                json!({
                    "enrollmentId": enrollment_id,
                    "assignmentTitle": "Lab",
                    "maxScore": 100,
                    "submittedAt": "2026-03-02"
                }),
            ),
            "submissionId",
        );
        let _ = call(
            "submissions.grade",
            json!({ "submissionId": submission_id, "score": score }),
        );
        cohort_ids.push(cohort_id);
    }

    let course = call("analytics.course.open", json!({ "courseId": course_id }));
    let per_cohort = course["perCohort"].as_array().expect("perCohort array");
    assert_eq!(per_cohort.len(), 2);
    for (cohort_id, expected) in cohort_ids.iter().zip([100.0, 50.0]) {
        let row = per_cohort
            .iter()
            .find(|r| r["cohortId"] == json!(cohort_id))
            .unwrap_or_else(|| panic!("no row for cohort {}", cohort_id));
        assert_eq!(row["cohortName"], json!("Spring"));
        assert_eq!(row["count"], json!(1));
        approx(&row["average"], expected);
    }
}

#[test]
fn enrollment_status_and_letter_grade_lookup() {
    let workspace = temp_dir("coursebook-enrollment-status");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "courses.create",
            json!({ "title": "Art" }),
        ),
        "courseId",
    );
    let enrollment_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "enrollments.create",
            json!({ "courseId": course_id, "studentName": "Dee", "studentEmail": "dee@example.com" }),
        ),
        "enrollmentId",
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.create",
        json!({ "courseId": course_id, "studentName": "Eve", "studentEmail": "not-an-email" }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "enrollments.updateStatus",
        json!({ "enrollmentId": enrollment_id, "status": "paused" }),
    );
    assert_eq!(code, "bad_params");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "enrollments.updateStatus",
        json!({ "enrollmentId": enrollment_id, "status": "completed" }),
    );
    let completed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "enrollments.list",
        json!({ "courseId": course_id, "status": "completed" }),
    );
    assert_eq!(completed["enrollments"][0]["studentName"], json!("Dee"));
    let active = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "enrollments.list",
        json!({ "courseId": course_id, "status": "active" }),
    );
    assert_eq!(active["enrollments"].as_array().map(|a| a.len()), Some(0));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "submissions.create",
        json!({
            "enrollmentId": enrollment_id,
            "assignmentTitle": "Sketch",
            "maxScore": 0,
            "submittedAt": "2026-03-01"
        }),
    );
    assert_eq!(code, "bad_params");

    let letter = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "analytics.letterGrade",
        json!({ "percentage": 120 }),
    );
    assert_eq!(letter["letter"], json!("A+"));
    approx(&letter["percentage"], 100.0);
    let letter = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "analytics.letterGrade",
        json!({ "percentage": 59.99 }),
    );
    assert_eq!(letter["letter"], json!("F"));
}
