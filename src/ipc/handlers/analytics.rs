use crate::calc::{self, GradedItem, GroupAverage, PeriodGranularity};
use crate::db::{self, GradedRow, GradedScope};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::{load_analysis_settings, AnalysisSettings};
use crate::ipc::helpers::{db_conn, parse_opt_f64, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

const NO_COHORT: &str = "(no cohort)";

fn analysis_settings(conn: &Connection, req: &Request) -> Result<AnalysisSettings, serde_json::Value> {
    load_analysis_settings(conn).map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

/// `granularity` param wins over the workspace default.
fn parse_granularity(
    req: &Request,
    default: PeriodGranularity,
) -> Result<PeriodGranularity, serde_json::Value> {
    match parse_opt_string(req.params.get("granularity")) {
        Ok(None) => Ok(default),
        Ok(Some(s)) => PeriodGranularity::parse(&s).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "granularity must be one of: day, week, month",
                None,
            )
        }),
        Err(m) => Err(err(&req.id, "bad_params", format!("granularity {}", m), None)),
    }
}

fn load_rows(
    conn: &Connection,
    req: &Request,
    scope: GradedScope<'_>,
) -> Result<Vec<GradedRow>, serde_json::Value> {
    db::load_graded_rows(conn, scope)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn items_by<F>(rows: &[GradedRow], group_key: F) -> Vec<GradedItem>
where
    F: Fn(&GradedRow) -> String,
{
    rows.iter()
        .map(|r| GradedItem {
            score: r.score,
            max_score: r.max_score,
            date: r.submitted_at,
            group_key: group_key(r),
        })
        .collect()
}

fn student_names(rows: &[GradedRow]) -> HashMap<&str, &str> {
    rows.iter()
        .map(|r| (r.enrollment_id.as_str(), r.student_name.as_str()))
        .collect()
}

/// Cohort names keyed by cohort id. Rows without a cohort share the empty key.
fn cohort_names(rows: &[GradedRow]) -> HashMap<&str, &str> {
    rows.iter()
        .filter_map(|r| Some((r.cohort_id.as_deref()?, r.cohort_name.as_deref()?)))
        .collect()
}

fn cohort_json(g: &GroupAverage, names: &HashMap<&str, &str>) -> serde_json::Value {
    let cohort_id = (!g.key.is_empty()).then_some(g.key.as_str());
    let cohort_name = cohort_id
        .and_then(|id| names.get(id).copied())
        .unwrap_or(NO_COHORT);
    json!({
        "cohortId": cohort_id,
        "cohortName": cohort_name,
        "average": g.average,
        "count": g.count,
        "letter": g.letter,
    })
}

fn student_json(g: &GroupAverage, names: &HashMap<&str, &str>) -> serde_json::Value {
    json!({
        "enrollmentId": g.key,
        "studentName": names.get(g.key.as_str()).copied().unwrap_or(""),
        "average": g.average,
        "count": g.count,
        "letter": g.letter,
    })
}

/// Highest and lowest student averages; ties keep key order.
fn top_bottom(
    students: &[GroupAverage],
    names: &HashMap<&str, &str>,
    n: usize,
) -> serde_json::Value {
    let mut ranked: Vec<&GroupAverage> = students.iter().collect();
    ranked.sort_by(|a, b| {
        b.average
            .partial_cmp(&a.average)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    let top = ranked
        .iter()
        .take(n)
        .map(|g| student_json(g, names))
        .collect::<Vec<_>>();
    let bottom = ranked
        .iter()
        .rev()
        .take(n)
        .map(|g| student_json(g, names))
        .collect::<Vec<_>>();
    json!({ "top": top, "bottom": bottom })
}

fn handle_analytics_course_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match analysis_settings(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let granularity = match parse_granularity(req, settings.trend_granularity) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let title: Option<String> = match conn
        .query_row("SELECT title FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(title) = title else {
        return err(&req.id, "not_found", "course not found", None);
    };
    let ungraded_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM submissions WHERE course_id = ? AND score IS NULL",
        [&course_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match load_rows(conn, req, GradedScope::Course(&course_id)) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let by_assignment = items_by(&rows, |r| r.assignment_title.clone());
    let by_cohort = items_by(&rows, |r| r.cohort_id.clone().unwrap_or_default());
    let by_student = items_by(&rows, |r| r.enrollment_id.clone());
    let names = student_names(&rows);
    let cohorts = cohort_names(&rows);
    let students = calc::group_averages(&by_student);

    ok(
        &req.id,
        json!({
            "course": { "id": course_id, "title": title },
            "granularity": granularity.as_str(),
            "summary": calc::summarize(&by_assignment),
            "ungradedCount": ungraded_count,
            "distribution": calc::distribution(&by_assignment, &settings.bands),
            "trend": calc::trend(&by_assignment, |i| granularity.period_of(i)),
            "perAssignment": calc::group_averages(&by_assignment),
            "perCohort": calc::group_averages(&by_cohort)
                .iter()
                .map(|g| cohort_json(g, &cohorts))
                .collect::<Vec<_>>(),
            "topBottom": top_bottom(&students, &names, settings.top_bottom_count),
        }),
    )
}

fn handle_analytics_cohort_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cohort_id = match required_str(req, "cohortId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match analysis_settings(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let granularity = match parse_granularity(req, settings.trend_granularity) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let cohort: Option<(String, String)> = match conn
        .query_row(
            "SELECT name, course_id FROM cohorts WHERE id = ?",
            [&cohort_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((name, course_id)) = cohort else {
        return err(&req.id, "not_found", "cohort not found", None);
    };

    // Every enrolled student gets a row, graded or not.
    let enrolled: Vec<(String, String, String)> = {
        let mut stmt = match conn.prepare(
            "SELECT id, student_name, status FROM enrollments
             WHERE cohort_id = ?
             ORDER BY student_name, id",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt.query_map([&cohort_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)));
        match rows.and_then(|rows| rows.collect::<Result<Vec<_>, _>>()) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };
    let rows = match load_rows(conn, req, GradedScope::Cohort(&cohort_id)) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let items = items_by(&rows, |r| r.enrollment_id.clone());
    let averages: HashMap<String, GroupAverage> = calc::group_averages(&items)
        .into_iter()
        .map(|g| (g.key.clone(), g))
        .collect();
    let student_rows = enrolled
        .iter()
        .map(|(enrollment_id, student_name, status)| {
            let avg = averages.get(enrollment_id);
            json!({
                "enrollmentId": enrollment_id,
                "studentName": student_name,
                "status": status,
                "average": avg.map(|g| g.average),
                "gradedCount": avg.map(|g| g.count).unwrap_or(0),
                "letter": avg.map(|g| g.letter),
            })
        })
        .collect::<Vec<_>>();

    ok(
        &req.id,
        json!({
            "cohort": { "id": cohort_id, "name": name, "courseId": course_id },
            "granularity": granularity.as_str(),
            "summary": calc::summarize(&items),
            "studentCount": enrolled.len(),
            "distribution": calc::distribution(&items, &settings.bands),
            "trend": calc::trend(&items, |i| granularity.period_of(i)),
            "rows": student_rows,
        }),
    )
}

fn handle_analytics_student_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match analysis_settings(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let granularity = match parse_granularity(req, settings.trend_granularity) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let enrollment: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT student_name, course_id, status FROM enrollments WHERE id = ?",
            [&enrollment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((student_name, course_id, status)) = enrollment else {
        return err(&req.id, "not_found", "enrollment not found", None);
    };

    let rows = match load_rows(conn, req, GradedScope::Enrollment(&enrollment_id)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_rows = match load_rows(conn, req, GradedScope::Course(&course_id)) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let items = items_by(&rows, |r| r.assignment_title.clone());
    let course_items = items_by(&course_rows, |r| r.enrollment_id.clone());
    let course_average = if course_items.is_empty() {
        None
    } else {
        Some(calc::average(&course_items))
    };

    let item_rows = rows
        .iter()
        .zip(items.iter())
        .map(|(r, item)| {
            let pct = item.percentage();
            json!({
                "submissionId": r.submission_id,
                "assignmentTitle": r.assignment_title,
                "score": r.score,
                "maxScore": r.max_score,
                "percentage": pct,
                "letter": calc::letter_grade(pct),
                "submittedAt": r.submitted_at.map(|d| d.format("%Y-%m-%d").to_string()),
            })
        })
        .collect::<Vec<_>>();

    ok(
        &req.id,
        json!({
            "student": {
                "enrollmentId": enrollment_id,
                "studentName": student_name,
                "courseId": course_id,
                "status": status,
            },
            "granularity": granularity.as_str(),
            "summary": calc::summarize(&items),
            "courseAverage": course_average,
            "trend": calc::trend(&items, |i| granularity.period_of(i)),
            "items": item_rows,
        }),
    )
}

fn handle_analytics_letter_grade(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let percentage = match parse_opt_f64(req.params.get("percentage")) {
        Ok(Some(v)) if v.is_finite() => v,
        Ok(_) => return err(&req.id, "bad_params", "missing percentage", None),
        Err(m) => return err(&req.id, "bad_params", format!("percentage {}", m), None),
    };
    ok(
        &req.id,
        json!({
            "percentage": percentage.clamp(0.0, 100.0),
            "letter": calc::letter_grade(percentage),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.course.open" => Some(handle_analytics_course_open(state, req)),
        "analytics.cohort.open" => Some(handle_analytics_cohort_open(state, req)),
        "analytics.student.open" => Some(handle_analytics_student_open(state, req)),
        "analytics.letterGrade" => Some(handle_analytics_letter_grade(state, req)),
        _ => None,
    }
}
