use crate::calc::CalcError;
use crate::structure::StructureError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn structure_err(id: &str, e: &StructureError) -> serde_json::Value {
    let details = match e {
        StructureError::InvalidIndex { index, len } => json!({ "index": index, "len": len }),
        StructureError::NotFound { kind, id } => json!({ "kind": kind, "id": id }),
        StructureError::SameSection(section_id) => json!({ "sectionId": section_id }),
        StructureError::MovingIdMismatch {
            index,
            expected,
            found,
        } => json!({ "index": index, "expected": expected, "found": found }),
    };
    err(id, e.code(), e.to_string(), Some(details))
}

pub fn calc_err(id: &str, e: &CalcError) -> serde_json::Value {
    err(id, e.code(), e.to_string(), None)
}
