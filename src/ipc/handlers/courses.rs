use crate::db;
use crate::ipc::error::{err, ok, structure_err};
use crate::ipc::handlers::setup::{is_lesson_kind, load_builder_defaults, LESSON_KINDS};
use crate::ipc::helpers::{
    db_conn, now_ts, parse_bool, parse_opt_i64, parse_opt_string, required_index, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::structure::{self, Course, Section, StructureMove};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};
use uuid::Uuid;

const STATUS_DRAFT: &str = "draft";
const STATUS_PUBLISHED: &str = "published";
const STATUS_ARCHIVED: &str = "archived";

fn validate_course_status(status: &str) -> bool {
    matches!(status, STATUS_DRAFT | STATUS_PUBLISHED | STATUS_ARCHIVED)
}

fn section_json(s: &Section) -> JsonValue {
    json!({
        "id": s.id,
        "courseId": s.course_id,
        "title": s.title,
        "summary": s.summary,
        "order": s.order,
        "durationMinutes": s.duration_minutes(),
        "lessonCount": s.lessons.len(),
        "lessons": s.lessons,
    })
}

fn course_tree_json(c: &Course) -> JsonValue {
    json!({
        "id": c.id,
        "title": c.title,
        "description": c.description,
        "status": c.status,
        "durationMinutes": c.duration_minutes(),
        "sectionCount": c.sections.len(),
        "lessonCount": c.lesson_count(),
        "sections": c.sections.iter().map(section_json).collect::<Vec<_>>(),
    })
}

fn load_tree(conn: &Connection, req: &Request, course_id: &str) -> Result<Course, JsonValue> {
    match db::load_course_tree(conn, course_id) {
        Ok(Some(c)) => Ok(c),
        Ok(None) => Err(err(&req.id, "not_found", "course not found", None)),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

fn load_section(conn: &Connection, req: &Request, section_id: &str) -> Result<Section, JsonValue> {
    match db::load_section(conn, section_id) {
        Ok(Some(s)) => Ok(s),
        Ok(None) => Err(err(&req.id, "not_found", "section not found", None)),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

/// Runs `write` in one transaction; nothing is persisted unless every statement succeeds.
fn commit_structure<F>(conn: &Connection, req: &Request, write: F) -> Result<(), JsonValue>
where
    F: FnOnce(&Connection, &str) -> anyhow::Result<()>,
{
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| err(&req.id, "db_tx_failed", e.to_string(), None))?;
    let ts = now_ts();
    if let Err(e) = write(&tx, &ts) {
        let _ = tx.rollback();
        return Err(err(&req.id, "db_update_failed", e.to_string(), None));
    }
    tx.commit()
        .map_err(|e| err(&req.id, "db_commit_failed", e.to_string(), None))
}

fn exists(conn: &Connection, sql: &str, id: &str) -> rusqlite::Result<bool> {
    Ok(conn
        .query_row(sql, [id], |_r| Ok(()))
        .optional()?
        .is_some())
}

fn next_order(conn: &Connection, sql: &str, parent_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(sql, [parent_id], |r| r.get(0))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let defaults = match load_builder_defaults(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let include_archived = match parse_bool(
        req.params.get("includeArchived"),
        defaults.show_archived_by_default,
    ) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("includeArchived {}", m), None),
    };

    // Correlated subqueries keep counts from multiplying across joins.
    let sql = format!(
        "SELECT
           c.id,
           c.title,
           c.description,
           c.status,
           c.updated_at,
           (SELECT COUNT(*) FROM course_sections s WHERE s.course_id = c.id) AS section_count,
           (SELECT COUNT(*) FROM course_lessons l JOIN course_sections s ON s.id = l.section_id
              WHERE s.course_id = c.id) AS lesson_count,
           (SELECT COALESCE(SUM(l.duration_minutes), 0) FROM course_lessons l
              JOIN course_sections s ON s.id = l.section_id
              WHERE s.course_id = c.id) AS duration_minutes
         FROM courses c
         {}
         ORDER BY c.title, c.id",
        if include_archived {
            ""
        } else {
            "WHERE c.status != 'archived'"
        }
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt.query_map([], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "title": r.get::<_, String>(1)?,
            "description": r.get::<_, Option<String>>(2)?,
            "status": r.get::<_, String>(3)?,
            "updatedAt": r.get::<_, String>(4)?,
            "sectionCount": r.get::<_, i64>(5)?,
            "lessonCount": r.get::<_, i64>(6)?,
            "durationMinutes": r.get::<_, i64>(7)?,
        }))
    });
    match rows.and_then(|rows| rows.collect::<Result<Vec<_>, _>>()) {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = match parse_opt_string(req.params.get("description")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("description {}", m), None),
    };
    let course_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, title, description, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        params![course_id, title, description, STATUS_DRAFT, ts, ts],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    info!(course_id = %course_id, "course created");
    ok(&req.id, json!({ "courseId": course_id }))
}

fn handle_courses_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut course = match load_tree(conn, req, &course_id) {
        Ok(c) => c,
        Err(e) => return e,
    };

    if let Some(first_bad) = structure::find_order_gap(&course) {
        warn!(course_id = %course_id, entity = first_bad, "repairing non-contiguous order");
        structure::reindex_sections(&mut course.sections);
        for section in course.sections.iter_mut() {
            structure::reindex_lessons(section);
        }
        if let Err(e) = commit_structure(conn, req, |tx, ts| {
            db::persist_course_structure(tx, &course, ts)
        }) {
            return e;
        }
    }
    ok(&req.id, course_tree_json(&course))
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut fields: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    for (k, v) in patch {
        match k.as_str() {
            "title" => match parse_opt_string(Some(v)) {
                Ok(Some(t)) => {
                    fields.push("title = ?");
                    values.push(Value::Text(t));
                }
                _ => return err(&req.id, "bad_params", "title must be a non-empty string", None),
            },
            "description" => match parse_opt_string(Some(v)) {
                Ok(d) => {
                    fields.push("description = ?");
                    values.push(d.map(Value::Text).unwrap_or(Value::Null));
                }
                Err(m) => {
                    return err(&req.id, "bad_params", format!("description {}", m), None)
                }
            },
            "status" => {
                let status = v.as_str().map(|s| s.trim().to_ascii_lowercase());
                match status {
                    Some(s) if validate_course_status(&s) => {
                        fields.push("status = ?");
                        values.push(Value::Text(s));
                    }
                    _ => {
                        return err(
                            &req.id,
                            "bad_params",
                            "status must be one of: draft, published, archived",
                            None,
                        )
                    }
                }
            }
            other => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown course field: {}", other),
                    None,
                )
            }
        }
    }
    if fields.is_empty() {
        return err(&req.id, "bad_params", "patch is empty", None);
    }
    fields.push("updated_at = ?");
    values.push(Value::Text(now_ts()));
    values.push(Value::Text(course_id));
    let sql = format!("UPDATE courses SET {} WHERE id = ?", fields.join(", "));
    match conn.execute(&sql, params_from_iter(values)) {
        Ok(0) => err(&req.id, "not_found", "course not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let dependents = [
        "DELETE FROM submissions WHERE course_id = ?",
        "DELETE FROM enrollments WHERE course_id = ?",
        "DELETE FROM cohorts WHERE course_id = ?",
        "DELETE FROM course_lessons WHERE section_id IN (SELECT id FROM course_sections WHERE course_id = ?)",
        "DELETE FROM course_sections WHERE course_id = ?",
    ];
    for sql in dependents {
        if let Err(e) = tx.execute(sql, [&course_id]) {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    }
    match tx.execute("DELETE FROM courses WHERE id = ?", [&course_id]) {
        Ok(0) => {
            let _ = tx.rollback();
            return err(&req.id, "not_found", "course not found", None);
        }
        Ok(_) => {}
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    info!(course_id = %course_id, "course deleted");
    ok(&req.id, json!({ "ok": true }))
}

fn handle_sections_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let summary = match parse_opt_string(req.params.get("summary")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("summary {}", m), None),
    };
    match exists(conn, "SELECT 1 FROM courses WHERE id = ?", &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let order = match next_order(
        conn,
        "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM course_sections WHERE course_id = ?",
        &course_id,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let section_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO course_sections(id, course_id, title, summary, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        params![section_id, course_id, title, summary, order, now_ts()],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "sectionId": section_id, "order": order }))
}

fn handle_sections_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    let mut fields: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    for (k, v) in patch {
        match k.as_str() {
            "title" => match parse_opt_string(Some(v)) {
                Ok(Some(t)) => {
                    fields.push("title = ?");
                    values.push(Value::Text(t));
                }
                _ => return err(&req.id, "bad_params", "title must be a non-empty string", None),
            },
            "summary" => match parse_opt_string(Some(v)) {
                Ok(s) => {
                    fields.push("summary = ?");
                    values.push(s.map(Value::Text).unwrap_or(Value::Null));
                }
                Err(m) => return err(&req.id, "bad_params", format!("summary {}", m), None),
            },
            other => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown section field: {}", other),
                    None,
                )
            }
        }
    }
    if fields.is_empty() {
        return err(&req.id, "bad_params", "patch is empty", None);
    }
    fields.push("updated_at = ?");
    values.push(Value::Text(now_ts()));
    values.push(Value::Text(section_id));
    let sql = format!("UPDATE course_sections SET {} WHERE id = ?", fields.join(", "));
    match conn.execute(&sql, params_from_iter(values)) {
        Ok(0) => err(&req.id, "not_found", "section not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_sections_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section = match load_section(conn, req, &section_id) {
        Ok(s) => s,
        Err(e) => return e,
    };

    let mut remaining: Vec<Section> = Vec::new();
    let result = commit_structure(conn, req, |tx, ts| {
        tx.execute("DELETE FROM course_lessons WHERE section_id = ?", [&section.id])?;
        tx.execute("DELETE FROM course_sections WHERE id = ?", [&section.id])?;
        let Some(mut course) = db::load_course_tree(tx, &section.course_id)? else {
            anyhow::bail!("course vanished during delete");
        };
        structure::reindex_sections(&mut course.sections);
        db::persist_section_order(tx, &course.sections, ts)?;
        remaining = course.sections;
        Ok(())
    });
    if let Err(e) = result {
        return e;
    }
    let sections = remaining
        .iter()
        .map(|s| json!({ "id": s.id, "order": s.order }))
        .collect::<Vec<_>>();
    ok(&req.id, json!({ "ok": true, "sections": sections }))
}

fn handle_sections_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let from_index = match required_index(req, "fromIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to_index = match required_index(req, "toIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let moving_id = match parse_opt_string(req.params.get("sectionId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("sectionId {}", m), None),
    };
    let course = match load_tree(conn, req, &course_id) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mv = StructureMove::Sections {
        from_index,
        to_index,
        moving_id,
    };
    let updated = match structure::apply_move(&course, &mv) {
        Ok(c) => c,
        Err(e) => return structure_err(&req.id, &e),
    };
    if let Err(e) = commit_structure(conn, req, |tx, ts| {
        db::persist_section_order(tx, &updated.sections, ts)
    }) {
        return e;
    }
    ok(
        &req.id,
        json!({ "sections": updated.sections.iter().map(section_json).collect::<Vec<_>>() }),
    )
}

fn handle_lessons_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let defaults = match load_builder_defaults(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let duration = match parse_opt_i64(req.params.get("durationMinutes")) {
        Ok(Some(v)) if v > 0 => v,
        Ok(Some(_)) => {
            return err(&req.id, "bad_params", "durationMinutes must be positive", None)
        }
        Ok(None) => defaults.default_lesson_duration_minutes,
        Err(m) => return err(&req.id, "bad_params", format!("durationMinutes {}", m), None),
    };
    let kind = match parse_opt_string(req.params.get("kind")) {
        Ok(Some(k)) => k.to_ascii_lowercase(),
        Ok(None) => defaults.default_lesson_kind.clone(),
        Err(m) => return err(&req.id, "bad_params", format!("kind {}", m), None),
    };
    if !is_lesson_kind(&kind) {
        return err(
            &req.id,
            "bad_params",
            format!("kind must be one of: {}", LESSON_KINDS.join(", ")),
            None,
        );
    }
    let summary = match parse_opt_string(req.params.get("summary")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("summary {}", m), None),
    };
    match exists(conn, "SELECT 1 FROM course_sections WHERE id = ?", &section_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "section not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let order = match next_order(
        conn,
        "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM course_lessons WHERE section_id = ?",
        &section_id,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let lesson_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO course_lessons(id, section_id, title, kind, summary, duration_minutes, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        params![lesson_id, section_id, title, kind, summary, duration, order, now_ts()],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "lessonId": lesson_id, "order": order }))
}

fn handle_lessons_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    let mut fields: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    for (k, v) in patch {
        match k.as_str() {
            "title" => match parse_opt_string(Some(v)) {
                Ok(Some(t)) => {
                    fields.push("title = ?");
                    values.push(Value::Text(t));
                }
                _ => return err(&req.id, "bad_params", "title must be a non-empty string", None),
            },
            "durationMinutes" => match v.as_i64() {
                Some(n) if n > 0 => {
                    fields.push("duration_minutes = ?");
                    values.push(Value::Integer(n));
                }
                _ => {
                    return err(
                        &req.id,
                        "bad_params",
                        "durationMinutes must be a positive integer",
                        None,
                    )
                }
            },
            "kind" => {
                let kind = v.as_str().map(|s| s.trim().to_ascii_lowercase());
                match kind {
                    Some(k) if is_lesson_kind(&k) => {
                        fields.push("kind = ?");
                        values.push(Value::Text(k));
                    }
                    _ => {
                        return err(
                            &req.id,
                            "bad_params",
                            format!("kind must be one of: {}", LESSON_KINDS.join(", ")),
                            None,
                        )
                    }
                }
            }
            "summary" => match parse_opt_string(Some(v)) {
                Ok(s) => {
                    fields.push("summary = ?");
                    values.push(s.map(Value::Text).unwrap_or(Value::Null));
                }
                Err(m) => return err(&req.id, "bad_params", format!("summary {}", m), None),
            },
            other => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown lesson field: {}", other),
                    None,
                )
            }
        }
    }
    if fields.is_empty() {
        return err(&req.id, "bad_params", "patch is empty", None);
    }
    fields.push("updated_at = ?");
    values.push(Value::Text(now_ts()));
    values.push(Value::Text(lesson_id));
    let sql = format!("UPDATE course_lessons SET {} WHERE id = ?", fields.join(", "));
    match conn.execute(&sql, params_from_iter(values)) {
        Ok(0) => err(&req.id, "not_found", "lesson not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_lessons_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section_id: Option<String> = match conn
        .query_row(
            "SELECT section_id FROM course_lessons WHERE id = ?",
            [&lesson_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(section_id) = section_id else {
        return err(&req.id, "not_found", "lesson not found", None);
    };

    let mut remaining: Option<Section> = None;
    let result = commit_structure(conn, req, |tx, ts| {
        tx.execute("DELETE FROM course_lessons WHERE id = ?", [&lesson_id])?;
        let Some(mut section) = db::load_section(tx, &section_id)? else {
            anyhow::bail!("section vanished during delete");
        };
        structure::reindex_lessons(&mut section);
        db::persist_lesson_order(tx, &section, ts)?;
        remaining = Some(section);
        Ok(())
    });
    if let Err(e) = result {
        return e;
    }
    ok(
        &req.id,
        json!({ "ok": true, "section": remaining.as_ref().map(section_json) }),
    )
}

fn handle_lessons_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let from_index = match required_index(req, "fromIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to_index = match required_index(req, "toIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let moving_id = match parse_opt_string(req.params.get("lessonId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("lessonId {}", m), None),
    };
    let section = match load_section(conn, req, &section_id) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let course = match load_tree(conn, req, &section.course_id) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mv = StructureMove::Lessons {
        section_id: section_id.clone(),
        from_index,
        to_index,
        moving_id,
    };
    let updated = match structure::apply_move(&course, &mv) {
        Ok(c) => c,
        Err(e) => return structure_err(&req.id, &e),
    };
    let Some(updated) = updated.sections.into_iter().find(|s| s.id == section_id) else {
        return err(&req.id, "not_found", "section not found", None);
    };
    if let Err(e) = commit_structure(conn, req, |tx, ts| {
        db::persist_lesson_order(tx, &updated, ts)
    }) {
        return e;
    }
    ok(&req.id, json!({ "section": section_json(&updated) }))
}

fn handle_lessons_move(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let source_section_id = match required_str(req, "sourceSectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let dest_section_id = match required_str(req, "destSectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let from_index = match required_index(req, "fromIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to_index = match required_index(req, "toIndex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let moving_id = match parse_opt_string(req.params.get("lessonId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("lessonId {}", m), None),
    };
    let source = match load_section(conn, req, &source_section_id) {
        Ok(s) => s,
        Err(e) => return e,
    };
    // Destination must live in the same course as the source.
    let course = match load_tree(conn, req, &source.course_id) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mv = StructureMove::LessonAcross {
        source_section_id: source_section_id.clone(),
        dest_section_id: dest_section_id.clone(),
        from_index,
        to_index,
        moving_id,
    };
    let updated = match structure::apply_move(&course, &mv) {
        Ok(c) => c,
        Err(e) => return structure_err(&req.id, &e),
    };
    let touched: Vec<&Section> = updated
        .sections
        .iter()
        .filter(|s| s.id == source_section_id || s.id == dest_section_id)
        .collect();
    if let Err(e) = commit_structure(conn, req, |tx, ts| {
        for s in &touched {
            db::persist_lesson_order(tx, s, ts)?;
        }
        Ok(())
    }) {
        return e;
    }
    let find = |id: &str| updated.sections.iter().find(|s| s.id == id).map(section_json);
    ok(
        &req.id,
        json!({
            "source": find(&source_section_id),
            "dest": find(&dest_section_id),
        }),
    )
}

fn parse_move(req: &Request) -> Result<StructureMove, JsonValue> {
    let Some(mv) = req.params.get("move").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "move must be an object", None));
    };
    let index = |key: &str| -> Result<usize, JsonValue> {
        mv.get(key)
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .ok_or_else(|| {
                err(
                    &req.id,
                    "bad_params",
                    format!("move.{} must be a non-negative integer", key),
                    None,
                )
            })
    };
    let id = |key: &str| -> Result<String, JsonValue> {
        mv.get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| err(&req.id, "bad_params", format!("missing move.{}", key), None))
    };
    let moving_id = |key: &str| -> Result<Option<String>, JsonValue> {
        parse_opt_string(mv.get(key))
            .map_err(|m| err(&req.id, "bad_params", format!("move.{} {}", key, m), None))
    };
    match mv.get("kind").and_then(|v| v.as_str()) {
        Some("sections") => Ok(StructureMove::Sections {
            from_index: index("fromIndex")?,
            to_index: index("toIndex")?,
            moving_id: moving_id("sectionId")?,
        }),
        Some("lessons") => Ok(StructureMove::Lessons {
            section_id: id("sectionId")?,
            from_index: index("fromIndex")?,
            to_index: index("toIndex")?,
            moving_id: moving_id("lessonId")?,
        }),
        Some("lessonAcross") => Ok(StructureMove::LessonAcross {
            source_section_id: id("sourceSectionId")?,
            dest_section_id: id("destSectionId")?,
            from_index: index("fromIndex")?,
            to_index: index("toIndex")?,
            moving_id: moving_id("lessonId")?,
        }),
        _ => Err(err(
            &req.id,
            "bad_params",
            "move.kind must be one of: sections, lessons, lessonAcross",
            None,
        )),
    }
}

fn handle_courses_apply_move(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mv = match parse_move(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course = match load_tree(conn, req, &course_id) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let updated = match structure::apply_move(&course, &mv) {
        Ok(c) => c,
        Err(e) => return structure_err(&req.id, &e),
    };
    if let Err(e) = commit_structure(conn, req, |tx, ts| {
        db::persist_course_structure(tx, &updated, ts)
    }) {
        return e;
    }
    ok(&req.id, course_tree_json(&updated))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.open" => Some(handle_courses_open(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        "courses.applyMove" => Some(handle_courses_apply_move(state, req)),
        "sections.create" => Some(handle_sections_create(state, req)),
        "sections.update" => Some(handle_sections_update(state, req)),
        "sections.delete" => Some(handle_sections_delete(state, req)),
        "sections.reorder" => Some(handle_sections_reorder(state, req)),
        "lessons.create" => Some(handle_lessons_create(state, req)),
        "lessons.update" => Some(handle_lessons_update(state, req)),
        "lessons.delete" => Some(handle_lessons_delete(state, req)),
        "lessons.reorder" => Some(handle_lessons_reorder(state, req)),
        "lessons.move" => Some(handle_lessons_move(state, req)),
        _ => None,
    }
}
