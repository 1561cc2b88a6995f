use crate::calc::{self, CalcError, PeriodGranularity, ScoreBand};
use crate::db;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

pub const LESSON_KINDS: [&str; 4] = ["video", "reading", "quiz", "assignment"];

pub fn is_lesson_kind(kind: &str) -> bool {
    LESSON_KINDS.contains(&kind)
}

#[derive(Clone, Copy)]
enum SetupSection {
    Analysis,
    Builder,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "analysis" => Some(Self::Analysis),
            "builder" => Some(Self::Builder),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Analysis => "setup.analysis",
            Self::Builder => "setup.builder",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Analysis => json!({
            "bands": calc::standard_bands(),
            "trendGranularity": "month",
            "topBottomCount": 5
        }),
        SetupSection::Builder => json!({
            "defaultLessonDurationMinutes": 30,
            "defaultLessonKind": "video",
            "showArchivedByDefault": false
        }),
    }
}

enum PatchError {
    BadParams(String),
    Bands(CalcError),
}

impl From<String> for PatchError {
    fn from(msg: String) -> Self {
        PatchError::BadParams(msg)
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_bands(v: &Value) -> Result<Vec<ScoreBand>, PatchError> {
    let bands: Vec<ScoreBand> = serde_json::from_value(v.clone()).map_err(|e| {
        PatchError::BadParams(format!("bands must be an array of {{label, min, max}}: {}", e))
    })?;
    if bands.iter().any(|b| b.label.trim().is_empty()) {
        return Err(PatchError::BadParams("band labels must not be empty".into()));
    }
    calc::validate_bands(&bands).map_err(PatchError::Bands)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), PatchError> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Analysis => match k.as_str() {
                "bands" => {
                    let sorted = parse_bands(v)?;
                    obj.insert(k.clone(), json!(sorted));
                }
                "trendGranularity" => {
                    let s = parse_string_max(v, k, 16)?;
                    let Some(g) = PeriodGranularity::parse(&s) else {
                        return Err("trendGranularity must be one of: day, week, month"
                            .to_string()
                            .into());
                    };
                    obj.insert(k.clone(), Value::String(g.as_str().to_string()));
                }
                "topBottomCount" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 20)?));
                }
                _ => return Err(format!("unknown analysis field: {}", k).into()),
            },
            SetupSection::Builder => match k.as_str() {
                "defaultLessonDurationMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 600)?));
                }
                "defaultLessonKind" => {
                    let kind = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if !is_lesson_kind(&kind) {
                        return Err(format!(
                            "defaultLessonKind must be one of: {}",
                            LESSON_KINDS.join(", ")
                        )
                        .into());
                    }
                    obj.insert(k.clone(), Value::String(kind));
                }
                "showArchivedByDefault" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown builder field: {}", k).into()),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &single);
            }
        }
    }
    Ok(current)
}

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub bands: Vec<ScoreBand>,
    pub trend_granularity: PeriodGranularity,
    pub top_bottom_count: usize,
}

pub fn load_analysis_settings(conn: &rusqlite::Connection) -> anyhow::Result<AnalysisSettings> {
    let v = load_section(conn, SetupSection::Analysis)?;
    let bands = v
        .get("bands")
        .cloned()
        .and_then(|b| serde_json::from_value::<Vec<ScoreBand>>(b).ok())
        .and_then(|b| calc::validate_bands(&b).ok())
        .unwrap_or_else(calc::standard_bands);
    let trend_granularity = v
        .get("trendGranularity")
        .and_then(|g| g.as_str())
        .and_then(PeriodGranularity::parse)
        .unwrap_or(PeriodGranularity::Month);
    let top_bottom_count = v
        .get("topBottomCount")
        .and_then(|n| n.as_u64())
        .map(|n| n as usize)
        .unwrap_or(5);
    Ok(AnalysisSettings {
        bands,
        trend_granularity,
        top_bottom_count,
    })
}

#[derive(Debug, Clone)]
pub struct BuilderDefaults {
    pub default_lesson_duration_minutes: i64,
    pub default_lesson_kind: String,
    pub show_archived_by_default: bool,
}

pub fn load_builder_defaults(conn: &rusqlite::Connection) -> anyhow::Result<BuilderDefaults> {
    let v = load_section(conn, SetupSection::Builder)?;
    Ok(BuilderDefaults {
        default_lesson_duration_minutes: v
            .get("defaultLessonDurationMinutes")
            .and_then(|n| n.as_i64())
            .unwrap_or(30),
        default_lesson_kind: v
            .get("defaultLessonKind")
            .and_then(|s| s.as_str())
            .unwrap_or("video")
            .to_string(),
        show_archived_by_default: v
            .get("showArchivedByDefault")
            .and_then(|b| b.as_bool())
            .unwrap_or(false),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let analysis = match load_section(conn, SetupSection::Analysis) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let builder = match load_section(conn, SetupSection::Builder) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "analysis": analysis, "builder": builder }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match merge_section_patch(section, &mut current, patch_obj) {
        Ok(()) => {}
        Err(PatchError::BadParams(msg)) => return err(&req.id, "bad_params", msg, None),
        Err(PatchError::Bands(e)) => return calc_err(&req.id, &e),
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    let mut result = json!({ "ok": true });
    result[section_raw] = current;
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
