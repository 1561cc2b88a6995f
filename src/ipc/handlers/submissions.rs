use crate::calc::{self, GradedItem};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, now_ts, parse_bool, parse_opt_date, parse_opt_f64, parse_opt_string, required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_submissions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assignment_title = match required_str(req, "assignmentTitle") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let max_score = match parse_opt_f64(req.params.get("maxScore")) {
        Ok(Some(v)) if v.is_finite() && v > 0.0 => v,
        Ok(_) => return err(&req.id, "bad_params", "maxScore must be a positive number", None),
        Err(m) => return err(&req.id, "bad_params", format!("maxScore {}", m), None),
    };
    let submitted_at = match parse_opt_date(req.params.get("submittedAt")) {
        Ok(Some(d)) => d.format("%Y-%m-%d").to_string(),
        Ok(None) => return err(&req.id, "bad_params", "missing submittedAt", None),
        Err(m) => return err(&req.id, "bad_params", format!("submittedAt {}", m), None),
    };

    let course_id: Option<String> = match conn
        .query_row(
            "SELECT course_id FROM enrollments WHERE id = ?",
            [&enrollment_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(course_id) = course_id else {
        return err(&req.id, "not_found", "enrollment not found", None);
    };

    let submission_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO submissions(id, course_id, enrollment_id, assignment_title, max_score, submitted_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        params![submission_id, course_id, enrollment_id, assignment_title, max_score, submitted_at],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "submissionId": submission_id }))
}

fn handle_submissions_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let submission_id = match required_str(req, "submissionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let score = match parse_opt_f64(req.params.get("score")) {
        Ok(Some(v)) if v.is_finite() => v,
        Ok(_) => return err(&req.id, "bad_params", "score must be a number", None),
        Err(m) => return err(&req.id, "bad_params", format!("score {}", m), None),
    };
    let feedback = match parse_opt_string(req.params.get("feedback")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("feedback {}", m), None),
    };

    let max_score: Option<f64> = match conn
        .query_row(
            "SELECT max_score FROM submissions WHERE id = ?",
            [&submission_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(max_score) = max_score else {
        return err(&req.id, "not_found", "submission not found", None);
    };
    if score < 0.0 || score > max_score {
        return err(
            &req.id,
            "bad_params",
            format!("score must be between 0 and {}", max_score),
            Some(json!({ "score": score, "maxScore": max_score })),
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE submissions SET score = ?, feedback = ?, graded_at = ? WHERE id = ?",
        params![score, feedback, now_ts(), submission_id],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let item = GradedItem {
        score,
        max_score,
        date: None,
        group_key: submission_id,
    };
    let percentage = item.percentage();
    ok(
        &req.id,
        json!({
            "ok": true,
            "percentage": percentage,
            "letter": calc::letter_grade(percentage),
        }),
    )
}

fn handle_submissions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let enrollment_id = match parse_opt_string(req.params.get("enrollmentId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("enrollmentId {}", m), None),
    };
    let graded_only = match parse_bool(req.params.get("gradedOnly"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("gradedOnly {}", m), None),
    };
    let ungraded_only = match parse_bool(req.params.get("ungradedOnly"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("ungradedOnly {}", m), None),
    };
    if graded_only && ungraded_only {
        return err(
            &req.id,
            "bad_params",
            "gradedOnly and ungradedOnly are mutually exclusive",
            None,
        );
    }

    let mut sql = String::from(
        "SELECT
           s.id,
           s.enrollment_id,
           e.student_name,
           s.assignment_title,
           s.max_score,
           s.score,
           s.feedback,
           s.submitted_at,
           s.graded_at
         FROM submissions s
         JOIN enrollments e ON e.id = s.enrollment_id
         WHERE s.course_id = ?",
    );
    let mut values: Vec<Value> = vec![Value::Text(course_id)];
    if let Some(eid) = enrollment_id {
        sql.push_str(" AND s.enrollment_id = ?");
        values.push(Value::Text(eid));
    }
    if graded_only {
        sql.push_str(" AND s.score IS NOT NULL");
    }
    if ungraded_only {
        sql.push_str(" AND s.score IS NULL");
    }
    sql.push_str(" ORDER BY s.submitted_at, e.student_name, s.id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt.query_map(params_from_iter(values), |r| {
        let max_score: f64 = r.get(4)?;
        let score: Option<f64> = r.get(5)?;
        let percentage = score.map(|s| {
            GradedItem {
                score: s,
                max_score,
                date: None,
                group_key: String::new(),
            }
            .percentage()
        });
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "enrollmentId": r.get::<_, String>(1)?,
            "studentName": r.get::<_, String>(2)?,
            "assignmentTitle": r.get::<_, String>(3)?,
            "maxScore": max_score,
            "score": score,
            "percentage": percentage,
            "letter": percentage.map(calc::letter_grade),
            "feedback": r.get::<_, Option<String>>(6)?,
            "submittedAt": r.get::<_, String>(7)?,
            "gradedAt": r.get::<_, Option<String>>(8)?,
        }))
    });
    match rows.and_then(|rows| rows.collect::<Result<Vec<_>, _>>()) {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.create" => Some(handle_submissions_create(state, req)),
        "submissions.grade" => Some(handle_submissions_grade(state, req)),
        "submissions.list" => Some(handle_submissions_list(state, req)),
        _ => None,
    }
}
