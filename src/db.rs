use crate::structure::{Course, Lesson, Section};
use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "coursebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'draft',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_sections(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            title TEXT NOT NULL,
            summary TEXT,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_sections_course ON course_sections(course_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_lessons(
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            title TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'video',
            summary TEXT,
            duration_minutes INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(section_id) REFERENCES course_sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_lessons_section ON course_lessons(section_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cohorts(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            start_date TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cohorts_course ON cohorts(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            cohort_id TEXT,
            student_name TEXT NOT NULL,
            student_email TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            enrolled_at TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(cohort_id) REFERENCES cohorts(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_cohort ON enrollments(cohort_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            enrollment_id TEXT NOT NULL,
            assignment_title TEXT NOT NULL,
            max_score REAL NOT NULL,
            score REAL,
            feedback TEXT,
            submitted_at TEXT NOT NULL,
            graded_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_course ON submissions(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_enrollment ON submissions(enrollment_id)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(
            serde_json::from_str(&text).with_context(|| format!("setting {} is not JSON", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        params![key, serde_json::to_string(value)?],
    )?;
    Ok(())
}

fn load_lessons(conn: &Connection, section_id: &str) -> anyhow::Result<Vec<Lesson>> {
    let mut stmt = conn.prepare(
        "SELECT id, section_id, title, kind, summary, duration_minutes, sort_order
         FROM course_lessons
         WHERE section_id = ?
         ORDER BY sort_order, id",
    )?;
    let rows = stmt.query_map([section_id], |r| {
        Ok(Lesson {
            id: r.get(0)?,
            section_id: r.get(1)?,
            title: r.get(2)?,
            kind: r.get(3)?,
            summary: r.get(4)?,
            duration_minutes: r.get(5)?,
            order: r.get(6)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn load_section(conn: &Connection, section_id: &str) -> anyhow::Result<Option<Section>> {
    let row = conn
        .query_row(
            "SELECT id, course_id, title, summary, sort_order FROM course_sections WHERE id = ?",
            [section_id],
            |r| {
                Ok(Section {
                    id: r.get(0)?,
                    course_id: r.get(1)?,
                    title: r.get(2)?,
                    summary: r.get(3)?,
                    order: r.get(4)?,
                    lessons: Vec::new(),
                })
            },
        )
        .optional()?;
    let Some(mut section) = row else {
        return Ok(None);
    };
    section.lessons = load_lessons(conn, &section.id)?;
    Ok(Some(section))
}

/// Loads a course with its sections and lessons in stored order.
pub fn load_course_tree(conn: &Connection, course_id: &str) -> anyhow::Result<Option<Course>> {
    let row = conn
        .query_row(
            "SELECT id, title, description, status FROM courses WHERE id = ?",
            [course_id],
            |r| {
                Ok(Course {
                    id: r.get(0)?,
                    title: r.get(1)?,
                    description: r.get(2)?,
                    status: r.get(3)?,
                    sections: Vec::new(),
                })
            },
        )
        .optional()?;
    let Some(mut course) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT id, course_id, title, summary, sort_order
         FROM course_sections
         WHERE course_id = ?
         ORDER BY sort_order, id",
    )?;
    let sections = stmt
        .query_map([course_id], |r| {
            Ok(Section {
                id: r.get(0)?,
                course_id: r.get(1)?,
                title: r.get(2)?,
                summary: r.get(3)?,
                order: r.get(4)?,
                lessons: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for mut section in sections {
        section.lessons = load_lessons(conn, &section.id)?;
        course.sections.push(section);
    }
    Ok(Some(course))
}

pub fn persist_section_order(conn: &Connection, sections: &[Section], ts: &str) -> anyhow::Result<()> {
    for s in sections {
        conn.execute(
            "UPDATE course_sections SET sort_order = ?, updated_at = ? WHERE id = ?",
            params![s.order, ts, s.id],
        )?;
    }
    Ok(())
}

/// Writes order and owning section for every lesson of `section`.
pub fn persist_lesson_order(conn: &Connection, section: &Section, ts: &str) -> anyhow::Result<()> {
    for l in &section.lessons {
        conn.execute(
            "UPDATE course_lessons SET section_id = ?, sort_order = ?, updated_at = ? WHERE id = ?",
            params![section.id, l.order, ts, l.id],
        )?;
    }
    Ok(())
}

pub fn persist_course_structure(conn: &Connection, course: &Course, ts: &str) -> anyhow::Result<()> {
    persist_section_order(conn, &course.sections, ts)?;
    for s in &course.sections {
        persist_lesson_order(conn, s, ts)?;
    }
    Ok(())
}

/// A graded submission joined with the enrollment and cohort it belongs to.
#[derive(Debug, Clone)]
pub struct GradedRow {
    pub submission_id: String,
    pub enrollment_id: String,
    pub student_name: String,
    pub cohort_id: Option<String>,
    pub cohort_name: Option<String>,
    pub assignment_title: String,
    pub score: f64,
    pub max_score: f64,
    pub submitted_at: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy)]
pub enum GradedScope<'a> {
    Course(&'a str),
    Cohort(&'a str),
    Enrollment(&'a str),
}

/// Loads graded submissions only; rows with a null score never leave the database.
pub fn load_graded_rows(conn: &Connection, scope: GradedScope<'_>) -> anyhow::Result<Vec<GradedRow>> {
    let (filter, id) = match scope {
        GradedScope::Course(id) => ("s.course_id = ?", id),
        GradedScope::Cohort(id) => ("e.cohort_id = ?", id),
        GradedScope::Enrollment(id) => ("s.enrollment_id = ?", id),
    };
    let sql = format!(
        "SELECT s.id, s.enrollment_id, e.student_name, e.cohort_id, c.name,
                s.assignment_title, s.score, s.max_score, s.submitted_at
         FROM submissions s
         JOIN enrollments e ON e.id = s.enrollment_id
         LEFT JOIN cohorts c ON c.id = e.cohort_id
         WHERE s.score IS NOT NULL AND {}
         ORDER BY s.submitted_at, s.id",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([id], |r| {
            let submitted: Option<String> = r.get(8)?;
            Ok(GradedRow {
                submission_id: r.get(0)?,
                enrollment_id: r.get(1)?,
                student_name: r.get(2)?,
                cohort_id: r.get(3)?,
                cohort_name: r.get(4)?,
                assignment_title: r.get(5)?,
                score: r.get(6)?,
                max_score: r.get(7)?,
                submitted_at: submitted
                    .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to load graded submissions")?;
    Ok(rows)
}
