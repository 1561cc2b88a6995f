use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_opt_date, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, types::Value, Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

const ENROLLMENT_STATUSES: [&str; 3] = ["active", "completed", "dropped"];

fn course_exists(conn: &Connection, course_id: &str) -> rusqlite::Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |_r| Ok(()))
        .optional()?
        .is_some())
}

fn cohort_course(conn: &Connection, cohort_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT course_id FROM cohorts WHERE id = ?",
        [cohort_id],
        |r| r.get(0),
    )
    .optional()
}

fn handle_cohorts_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.start_date,
           (SELECT COUNT(*) FROM enrollments e WHERE e.cohort_id = c.id) AS enrollment_count
         FROM cohorts c
         WHERE c.course_id = ?
         ORDER BY c.start_date, c.name, c.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt.query_map([&course_id], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "name": r.get::<_, String>(1)?,
            "startDate": r.get::<_, Option<String>>(2)?,
            "enrollmentCount": r.get::<_, i64>(3)?,
        }))
    });
    match rows.and_then(|rows| rows.collect::<Result<Vec<_>, _>>()) {
        Ok(cohorts) => ok(&req.id, json!({ "cohorts": cohorts })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_cohorts_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let start_date = match parse_opt_date(req.params.get("startDate")) {
        Ok(v) => v.map(|d| d.format("%Y-%m-%d").to_string()),
        Err(m) => return err(&req.id, "bad_params", format!("startDate {}", m), None),
    };
    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let cohort_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO cohorts(id, course_id, name, start_date) VALUES(?, ?, ?, ?)",
        params![cohort_id, course_id, name, start_date],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "cohortId": cohort_id }))
}

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cohort_id = match parse_opt_string(req.params.get("cohortId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("cohortId {}", m), None),
    };
    let status = match parse_opt_string(req.params.get("status")) {
        Ok(Some(s)) if ENROLLMENT_STATUSES.contains(&s.as_str()) => Some(s),
        Ok(Some(_)) => {
            return err(
                &req.id,
                "bad_params",
                "status must be one of: active, completed, dropped",
                None,
            )
        }
        Ok(None) => None,
        Err(m) => return err(&req.id, "bad_params", format!("status {}", m), None),
    };

    let mut sql = String::from(
        "SELECT
           e.id,
           e.student_name,
           e.student_email,
           e.cohort_id,
           c.name,
           e.status,
           e.enrolled_at
         FROM enrollments e
         LEFT JOIN cohorts c ON c.id = e.cohort_id
         WHERE e.course_id = ?",
    );
    let mut values: Vec<Value> = vec![Value::Text(course_id)];
    if let Some(cid) = cohort_id {
        sql.push_str(" AND e.cohort_id = ?");
        values.push(Value::Text(cid));
    }
    if let Some(s) = status {
        sql.push_str(" AND e.status = ?");
        values.push(Value::Text(s));
    }
    sql.push_str(" ORDER BY e.student_name, e.id");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt.query_map(rusqlite::params_from_iter(values), |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "studentName": r.get::<_, String>(1)?,
            "studentEmail": r.get::<_, Option<String>>(2)?,
            "cohortId": r.get::<_, Option<String>>(3)?,
            "cohortName": r.get::<_, Option<String>>(4)?,
            "status": r.get::<_, String>(5)?,
            "enrolledAt": r.get::<_, String>(6)?,
        }))
    });
    match rows.and_then(|rows| rows.collect::<Result<Vec<_>, _>>()) {
        Ok(enrollments) => ok(&req.id, json!({ "enrollments": enrollments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_enrollments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_name = match required_str(req, "studentName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_email = match parse_opt_string(req.params.get("studentEmail")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("studentEmail {}", m), None),
    };
    if let Some(email) = student_email.as_deref() {
        if !email.contains('@') {
            return err(&req.id, "bad_params", "studentEmail must contain @", None);
        }
    }
    let cohort_id = match parse_opt_string(req.params.get("cohortId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("cohortId {}", m), None),
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    if let Some(cid) = cohort_id.as_deref() {
        match cohort_course(conn, cid) {
            Ok(Some(owner)) if owner == course_id => {}
            Ok(Some(_)) => {
                return err(
                    &req.id,
                    "bad_params",
                    "cohort belongs to a different course",
                    Some(json!({ "cohortId": cid })),
                )
            }
            Ok(None) => return err(&req.id, "not_found", "cohort not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let enrollment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO enrollments(id, course_id, cohort_id, student_name, student_email, status, enrolled_at)
         VALUES(?, ?, ?, ?, ?, 'active', ?)",
        params![enrollment_id, course_id, cohort_id, student_name, student_email, now_ts()],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    info!(course_id = %course_id, enrollment_id = %enrollment_id, "student enrolled");
    ok(&req.id, json!({ "enrollmentId": enrollment_id }))
}

fn handle_enrollments_update_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match required_str(req, "status") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(e) => return e,
    };
    if !ENROLLMENT_STATUSES.contains(&status.as_str()) {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: active, completed, dropped",
            None,
        );
    }
    match conn.execute(
        "UPDATE enrollments SET status = ? WHERE id = ?",
        params![status, enrollment_id],
    ) {
        Ok(0) => err(&req.id, "not_found", "enrollment not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cohorts.list" => Some(handle_cohorts_list(state, req)),
        "cohorts.create" => Some(handle_cohorts_create(state, req)),
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        "enrollments.create" => Some(handle_enrollments_create(state, req)),
        "enrollments.updateStatus" => Some(handle_enrollments_update_status(state, req)),
        _ => None,
    }
}
