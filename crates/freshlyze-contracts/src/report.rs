use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field set the collaborator is asked to return, in schema order.
/// Validation checks presence in this order so the first gap is the one
/// reported.
pub const REQUIRED_FIELDS: [&str; 14] = [
    "isFood",
    "itemName",
    "freshnessScore",
    "freshnessLabel",
    "ripenessLevel",
    "cookingSuggestions",
    "recipeName",
    "recipeInstructions",
    "confidence",
    "visualIndicators",
    "shortDescription",
    "shelfLife",
    "storageAdvice",
    "nutritionHighlights",
];

pub const DEFAULT_RECIPE_NAME: &str = "Simple preparation";
pub const DEFAULT_RECIPE_INSTRUCTIONS: &str = "Prepare the item to your taste.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed payload")]
    Malformed,
    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Structured analysis result for one image, built exactly once from the
/// collaborator's raw reply and never mutated afterwards.
///
/// When `is_food` is false the remaining fields are not meaningful and hold
/// defaults; callers check `is_food` before reading them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FreshnessReport {
    pub is_food: bool,
    pub item_name: String,
    pub short_description: String,
    pub freshness_score: i64,
    pub freshness_label: String,
    pub confidence: i64,
    pub ripeness_level: String,
    pub visual_indicators: Vec<String>,
    pub shelf_life: String,
    pub storage_advice: String,
    pub nutrition_highlights: String,
    pub cooking_suggestions: Vec<String>,
    pub recipe_name: String,
    pub recipe_instructions: String,
}

impl FreshnessReport {
    /// Parse and normalize the collaborator's raw text reply.
    pub fn from_raw_text(text: &str) -> Result<Self, ValidationError> {
        let raw = strip_code_fence(text);
        let parsed: Value =
            serde_json::from_str(&raw).map_err(|_| ValidationError::Malformed)?;
        let payload = parsed.as_object().ok_or(ValidationError::Malformed)?;
        Self::from_payload(payload)
    }

    /// Validate and normalize an already-parsed payload object.
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, ValidationError> {
        for field in REQUIRED_FIELDS {
            if !payload.contains_key(field) {
                return Err(ValidationError::MissingField(field.to_string()));
            }
        }

        let is_food = payload
            .get("isFood")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !is_food {
            // Not-food is a successful outcome; the remaining fields carry
            // no information and stay at their defaults.
            return Ok(Self::default());
        }

        Ok(Self {
            is_food: true,
            item_name: text_field(payload, "itemName"),
            short_description: text_field(payload, "shortDescription"),
            freshness_score: score_field(payload, "freshnessScore"),
            freshness_label: text_field(payload, "freshnessLabel"),
            confidence: score_field(payload, "confidence"),
            ripeness_level: text_field(payload, "ripenessLevel"),
            visual_indicators: list_field(payload, "visualIndicators"),
            shelf_life: text_field(payload, "shelfLife"),
            storage_advice: text_field(payload, "storageAdvice"),
            nutrition_highlights: text_field(payload, "nutritionHighlights"),
            cooking_suggestions: list_field(payload, "cookingSuggestions"),
            recipe_name: text_field_or(payload, "recipeName", DEFAULT_RECIPE_NAME),
            recipe_instructions: text_field_or(
                payload,
                "recipeInstructions",
                DEFAULT_RECIPE_INSTRUCTIONS,
            ),
        })
    }
}

/// Coerce an ambiguous-scale value to the canonical 0-100 integer scale.
///
/// Raw values at or below 1 are read as fractions and multiplied by 100;
/// anything above 1 is taken as already being a percentage. No clamping:
/// out-of-range upstream values pass through unchanged.
pub fn normalize_score(raw: f64) -> i64 {
    if raw <= 1.0 {
        (raw * 100.0).round() as i64
    } else {
        raw.round() as i64
    }
}

fn score_field(payload: &Map<String, Value>, key: &str) -> i64 {
    payload
        .get(key)
        .and_then(Value::as_f64)
        .map(normalize_score)
        .unwrap_or(0)
}

fn text_field(payload: &Map<String, Value>, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

fn text_field_or(payload: &Map<String, Value>, key: &str, default: &str) -> String {
    let value = text_field(payload, key);
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

fn list_field(payload: &Map<String, Value>, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|row| !row.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn strip_code_fence(text: &str) -> String {
    let raw = text.trim();
    if !(raw.starts_with("```") && raw.ends_with("```")) {
        return raw.to_string();
    }
    let lines: Vec<&str> = raw.lines().collect();
    if lines.len() < 2 {
        return raw.to_string();
    }
    let mut body = lines[1..lines.len() - 1].join("\n").trim().to_string();
    if body.to_ascii_lowercase().starts_with("json") {
        body = body[4..].trim().to_string();
    }
    body
}
