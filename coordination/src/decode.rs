//! Strict decoding of model output
//!
//! Models wrap JSON in markdown fences or add prose around it. Decoding finds
//! the first balanced top-level object, validates it against a fixed schema,
//! and applies exactly one fallback per response kind:
//!
//! - plan: accept a well-formed `story_points` even when `rationale` is missing
//! - code: use the raw text (minus a surrounding fence) when no object carries code

use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collaborators::{ensure_code, CollaboratorError, Plan};
use crate::escalation::policy::DifficultyScore;

static OPEN_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^```[a-z0-9_+-]*[ \t]*\r?\n?").unwrap());
static CLOSE_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\r?\n?```\s*$").unwrap());

/// Decoding failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("no JSON object found in model output")]
    NoObject,

    #[error("unterminated JSON object in model output")]
    Unterminated,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("schema violation: {0}")]
    Schema(String),
}

/// Planner response schema
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanResponse {
    /// Task identifier echoed back
    #[serde(default)]
    pub id: Option<String>,
    /// One of 1, 2, 3, 5, 8
    pub story_points: u8,
    /// Why this value fits and the closest lower value does not
    pub rationale: String,
}

/// Worker / merger response schema
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CodeResponse {
    /// The full program source
    pub generated_code: String,
}

/// Remove a surrounding markdown code fence, if any
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = OPEN_FENCE.find(trimmed) else {
        return trimmed;
    };
    let body = &trimmed[open.end()..];
    match CLOSE_FENCE.find(body) {
        Some(close) => body[..close.start()].trim_end(),
        None => body.trim_end(),
    }
}

/// Extract and parse the first balanced top-level JSON object in `text`.
///
/// Braces inside JSON strings (including escaped quotes) are ignored.
pub fn extract_json_object(text: &str) -> Result<serde_json::Map<String, Value>, DecodeError> {
    let cleaned = strip_code_fence(text);
    let start = cleaned.find('{').ok_or(DecodeError::NoObject)?;

    let mut in_string = false;
    let mut escaped = false;
    let mut depth = 0usize;
    let mut end = None;

    for (offset, ch) in cleaned[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + offset);
                    break;
                }
            }
            _ => {}
        }
    }

    let end = end.ok_or(DecodeError::Unterminated)?;
    match serde_json::from_str::<Value>(&cleaned[start..=end]) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DecodeError::NoObject),
        Err(e) => Err(DecodeError::InvalidJson(e.to_string())),
    }
}

fn story_points_field(map: &serde_json::Map<String, Value>) -> Result<i64, DecodeError> {
    match map.get("story_points") {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| DecodeError::Schema(format!("story_points is not an integer: {n}"))),
        // Digit strings are tolerated
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| DecodeError::Schema(format!("story_points is not numeric: {s:?}"))),
        Some(other) => Err(DecodeError::Schema(format!(
            "story_points has wrong type: {other}"
        ))),
        None => Err(DecodeError::Schema("missing story_points".to_string())),
    }
}

/// Decode a planner response into a [`Plan`].
///
/// Fails with [`CollaboratorError::MalformedPlan`] when no well-formed
/// `story_points` is present or its value lies outside the domain.
pub fn decode_plan(text: &str) -> Result<Plan, CollaboratorError> {
    let malformed = |e: DecodeError| CollaboratorError::MalformedPlan(e.to_string());
    let map = extract_json_object(text).map_err(malformed)?;
    let points = story_points_field(&map).map_err(malformed)?;
    let difficulty = DifficultyScore::try_from(points)
        .map_err(|e| CollaboratorError::MalformedPlan(e.to_string()))?;

    let rationale = match map.get("rationale") {
        Some(Value::String(r)) if !r.trim().is_empty() => r.trim().to_string(),
        _ => {
            tracing::warn!(story_points = points, "Plan missing rationale, keeping story points");
            "(no rationale provided)".to_string()
        }
    };

    Ok(Plan {
        difficulty,
        rationale,
    })
}

/// Decode worker or merger output into program source.
///
/// A bare `"code"` key only counts when the object is the whole response, so
/// a raw program containing `{"code": ...}` as data is kept as-is.
pub fn decode_code(text: &str) -> Result<String, CollaboratorError> {
    if let Ok(map) = extract_json_object(text) {
        let body = strip_code_fence(text);
        let whole = body.starts_with('{') && body.ends_with('}');
        for key in ["generated_code", "reviewed_code", "code"] {
            if key == "code" && !whole {
                continue;
            }
            if let Some(Value::String(code)) = map.get(key) {
                return ensure_code(strip_code_fence(code).to_string());
            }
        }
    }
    ensure_code(strip_code_fence(text).to_string())
}
