//! Normalization of structured oracle output.
//!
//! Models return loosely shaped JSON: fenced in markdown, with booleans as
//! strings, impact labels in free text. Everything is coerced here into the
//! typed verdicts, with fixed fallbacks for optional fields. A response that
//! carries no JSON object at all is rejected.

use serde_json::{Map, Value};
use strata_core::{
    ArchitecturalLesson, Impact, JourneyVerdict, NamedPiece, SynthesisVerdict, TokenUsage,
};

use crate::InferError;

pub const DEFAULT_JOURNEY_DESCRIPTION: &str = "Core file component";
pub const DEFAULT_SYNTHESIS_SUMMARY: &str = "Evolutionary architecture analysis";
pub const DEFAULT_LESSON_TITLE: &str = "Architectural lesson";

const CONTEXT_WINDOW_PHRASES: [&str; 4] = [
    "too many tokens",
    "context length",
    "maximum context length",
    "too long",
];

/// True when an oracle failure message reads like a context window overflow.
pub fn is_context_window_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    CONTEXT_WINDOW_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}

/// Slice from the first `{` to the last `}` after dropping markdown fences.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = strip_code_fences(raw.trim());
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}

pub fn parse_journey_verdict(
    path: &str,
    raw: &str,
    tokens: TokenUsage,
) -> Result<JourneyVerdict, InferError> {
    let object = parse_object(raw)?;

    let description = string_field(&object, &["description", "summary"])
        .unwrap_or_else(|| DEFAULT_JOURNEY_DESCRIPTION.to_owned());
    let is_hotspot = object
        .get("isHotspot")
        .or_else(|| object.get("is_hotspot"))
        .map(truthy)
        .unwrap_or(false);
    let lessons = string_list_field(&object, &["evolutionaryLessons", "evolutionary_lessons", "lessons"]);
    let reinforcement = string_field(&object, &["reinforcement"]);

    Ok(JourneyVerdict {
        path: path.to_owned(),
        description,
        is_hotspot,
        evolutionary_lessons: if is_hotspot { lessons } else { Vec::new() },
        reinforcement: if is_hotspot { None } else { reinforcement },
        tokens,
    })
}

pub fn parse_synthesis_verdict(raw: &str, tokens: TokenUsage) -> Result<SynthesisVerdict, InferError> {
    let object = parse_object(raw)?;

    let summary = string_field(&object, &["summary"])
        .unwrap_or_else(|| DEFAULT_SYNTHESIS_SUMMARY.to_owned());

    let architectural_lessons = array_field(&object, &["architecturalLessons", "architectural_lessons"])
        .iter()
        .filter_map(Value::as_object)
        .filter_map(normalize_lesson)
        .collect();

    let named_pieces = array_field(&object, &["namedPieces", "named_pieces"])
        .iter()
        .filter_map(Value::as_object)
        .filter_map(normalize_named_piece)
        .collect();

    Ok(SynthesisVerdict {
        summary,
        architectural_lessons,
        named_pieces,
        tokens,
    })
}

fn normalize_lesson(object: &Map<String, Value>) -> Option<ArchitecturalLesson> {
    let title = string_field(object, &["title"]);
    let lesson = string_field(object, &["lesson", "description"]);
    if title.is_none() && lesson.is_none() {
        return None;
    }

    let impact = string_field(object, &["impact"])
        .map(|raw| Impact::normalize(&raw))
        .unwrap_or_default();

    Some(ArchitecturalLesson {
        title: title.unwrap_or_else(|| DEFAULT_LESSON_TITLE.to_owned()),
        lesson: lesson.unwrap_or_default(),
        impact,
        affected_files: string_list_field(object, &["affectedFiles", "affected_files", "files"]),
    })
}

fn normalize_named_piece(object: &Map<String, Value>) -> Option<NamedPiece> {
    let name = string_field(object, &["name"])?;
    Some(NamedPiece {
        name,
        description: string_field(object, &["description"]).unwrap_or_default(),
        files: string_list_field(object, &["files", "affectedFiles"]),
    })
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, InferError> {
    let candidate = extract_json_object(raw).ok_or_else(|| {
        InferError::InvalidResponse("oracle response contained no JSON object".to_owned())
    })?;

    match serde_json::from_str::<Value>(candidate)? {
        Value::Object(object) => Ok(object),
        _ => Err(InferError::InvalidResponse(
            "oracle response JSON is not an object".to_owned(),
        )),
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn string_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_owned)
}

fn array_field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> &'a [Value] {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(|value| value.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn string_list_field(object: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    let Some(value) = keys.iter().find_map(|key| object.get(*key)) else {
        return Vec::new();
    };

    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_owned)
            .collect(),
        Value::String(single) if !single.trim().is_empty() => vec![single.trim().to_owned()],
        _ => Vec::new(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "1"
        ),
        _ => false,
    }
}
