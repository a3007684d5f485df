use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use freshlyze_contracts::events::{payload, EventPayload, EventWriter};
use freshlyze_contracts::report::{FreshnessReport, ValidationError, REQUIRED_FIELDS};
use freshlyze_contracts::session::{AnalysisSession, AnalysisStatus, SelectedImage};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use thiserror::Error;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Longest edge of the preview handed to the presentation layer.
const PREVIEW_MAX_DIM: u32 = 512;

const GENERIC_FAILURE_MESSAGE: &str = "Failed to analyze the image.";

const SYSTEM_INSTRUCTION: &str = "\
You are Freshlyze, an expert agronomist, chef, and nutritionist. \
Analyze the photographed fruit or vegetable and judge its freshness, its \
ripeness, and the most suitable way to prepare it.

Response rules:
- JSON only, matching the response schema exactly.
- freshnessScore and confidence are integers on a 0-100 scale. Do not use \
decimals such as 0.95.
- If the item is overripe or starting to wilt, suggest preparations that \
rescue it rather than discarding it.
- If the image does not show food, set isFood to false.";

const ANALYSIS_PROMPT: &str = "Assess the freshness of this item.";

#[derive(Debug, Error)]
pub enum AnalyzeError {
    /// Credential or endpoint configuration missing; raised before any
    /// network interaction.
    #[error("{0}")]
    Configuration(String),

    /// The selection is empty or not an image; raised before any call.
    #[error("{0}")]
    InvalidImage(String),

    /// The collaborator answered without a textual payload.
    #[error("The analysis service returned an empty reply.")]
    EmptyResponse,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transport, auth, or quota failure, carrying the collaborator's own
    /// message when it provided one.
    #[error("{0}")]
    Upstream(String),
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
}

impl AnalyzerConfig {
    /// Build a configuration from an explicit credential. The key is
    /// captured here, once; nothing reads the environment mid-call.
    pub fn new(api_key: impl Into<String>) -> Result<Self, AnalyzeError> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(AnalyzeError::Configuration(
                "The analysis service requires an API key.".to_string(),
            ));
        }
        Ok(Self {
            api_key,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    pub fn from_env() -> Result<Self, AnalyzeError> {
        let api_key = non_empty_env("GEMINI_API_KEY")
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
            .ok_or_else(|| {
                AnalyzeError::Configuration(
                    "GEMINI_API_KEY (or GOOGLE_API_KEY) not set. Create a key in \
                     Google AI Studio and export it before running."
                        .to_string(),
                )
            })?;
        let mut config = Self::new(api_key)?;
        if let Some(base) = env::var("GEMINI_API_BASE")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
        {
            config.api_base = base;
        }
        if let Some(model) = non_empty_env("FRESHLYZE_MODEL") {
            config.model = model;
        }
        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into().trim().to_string();
        if !model.is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

/// One captured image: raw encoded bytes and the declared media type.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        Ok(Self::new(bytes, guess_image_media_type(path)))
    }

    /// The collaborator accepts image formats only, and never an empty body.
    pub fn validate(&self) -> Result<(), AnalyzeError> {
        if self.bytes.is_empty() {
            return Err(AnalyzeError::InvalidImage(
                "The selected file is empty.".to_string(),
            ));
        }
        if !self.media_type.starts_with("image/") {
            return Err(AnalyzeError::InvalidImage(format!(
                "Unsupported media type {}; only images can be analyzed.",
                self.media_type
            )));
        }
        Ok(())
    }

    /// Build the display handle: a flattened, downscaled JPEG preview as a
    /// data URL. Falls back to the raw bytes when the image cannot be
    /// decoded (the declared type still lets a browser render it).
    pub fn preview_data_url(&self, max_dim: u32) -> String {
        let dim = max_dim.max(64);
        if let Ok(decoded) = image::load_from_memory(&self.bytes) {
            let rgba = decoded.to_rgba8();
            let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
            for (x, y, pixel) in rgba.enumerate_pixels() {
                let alpha = u16::from(pixel[3]);
                let blend = |channel: u8| -> u8 {
                    (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
                };
                flattened.put_pixel(
                    x,
                    y,
                    Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
                );
            }
            let resized = DynamicImage::ImageRgba8(flattened)
                .resize(dim, dim, FilterType::Triangle)
                .to_rgb8();
            let mut bytes = Vec::new();
            let mut encoder = JpegEncoder::new_with_quality(&mut bytes, 80);
            if encoder
                .encode_image(&DynamicImage::ImageRgb8(resized))
                .is_ok()
            {
                return format!("data:image/jpeg;base64,{}", BASE64.encode(bytes));
            }
        }
        format!(
            "data:{};base64,{}",
            self.media_type,
            BASE64.encode(&self.bytes)
        )
    }

    pub fn to_selected_image(&self) -> SelectedImage {
        SelectedImage {
            bytes: self.bytes.clone(),
            media_type: self.media_type.clone(),
            preview: self.preview_data_url(PREVIEW_MAX_DIM),
        }
    }
}

pub fn guess_image_media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "heic" | "heif" => "image/heic",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "image/png",
    }
}

/// The external vision service: takes one image, returns the model's raw
/// text payload. One attempt per call; any failure is terminal for the
/// session's analyzing phase.
pub trait VisionCollaborator: Send + Sync {
    fn name(&self) -> &str;
    fn classify(&self, image: &ImagePayload) -> Result<String, AnalyzeError>;
}

pub struct GeminiCollaborator {
    config: AnalyzerConfig,
    http: HttpClient,
}

impl GeminiCollaborator {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    fn build_request(&self, image: &ImagePayload) -> Value {
        json!({
            "systemInstruction": {
                "parts": [{ "text": SYSTEM_INSTRUCTION }]
            },
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": response_schema(),
            },
            "contents": [{
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": image.media_type,
                            "data": BASE64.encode(&image.bytes),
                        }
                    },
                    { "text": ANALYSIS_PROMPT },
                ]
            }]
        })
    }

    fn extract_text(response_payload: &Value) -> String {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut collected: Vec<String> = Vec::new();
        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(Value::as_object)
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if !text.trim().is_empty() {
                        collected.push(text.trim().to_string());
                    }
                }
            }
        }
        collected.join("\n")
    }
}

impl VisionCollaborator for GeminiCollaborator {
    fn name(&self) -> &str {
        "gemini"
    }

    fn classify(&self, image: &ImagePayload) -> Result<String, AnalyzeError> {
        let endpoint = self.config.endpoint();
        let request = self.build_request(image);

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.config.api_key.as_str())])
            .timeout(self.config.timeout)
            .json(&request)
            .send()
            .map_err(|err| AnalyzeError::Upstream(transport_message(&err, self.config.timeout)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|_| AnalyzeError::Upstream(GENERIC_FAILURE_MESSAGE.to_string()))?;
        if !status.is_success() {
            return Err(AnalyzeError::Upstream(upstream_message(
                status.as_u16(),
                &body,
            )));
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|_| {
            AnalyzeError::Upstream(
                "The analysis service returned an invalid response envelope.".to_string(),
            )
        })?;
        let text = Self::extract_text(&parsed);
        if text.trim().is_empty() {
            return Err(AnalyzeError::EmptyResponse);
        }
        Ok(text)
    }
}

/// Deterministic stand-in for the vision service; runs the whole pipeline
/// without credentials or network.
pub struct DryrunCollaborator;

impl VisionCollaborator for DryrunCollaborator {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn classify(&self, image: &ImagePayload) -> Result<String, AnalyzeError> {
        let seed = image.bytes.len() as i64;
        let freshness_score = 55 + seed % 41;
        let confidence = 80 + seed % 16;
        let freshness_label = if freshness_score >= 80 {
            "Very fresh"
        } else {
            "Fresh"
        };
        Ok(json!({
            "isFood": true,
            "itemName": "Sample produce",
            "shortDescription": "A placeholder analysis generated without contacting the model.",
            "freshnessScore": freshness_score,
            "freshnessLabel": freshness_label,
            "confidence": confidence,
            "ripenessLevel": "Ripe",
            "visualIndicators": ["Even color", "No soft spots"],
            "shelfLife": "3-5 days at room temperature",
            "storageAdvice": "Store in a cool, dry place away from direct sunlight.",
            "nutritionHighlights": "A good source of fiber and vitamin C.",
            "cookingSuggestions": ["Eat raw", "Add to a salad"],
            "recipeName": "Fresh fruit salad",
            "recipeInstructions": "Dice, toss with lime juice and mint, chill before serving."
        })
        .to_string())
    }
}

/// Validates the captured image, makes exactly one collaborator call, and
/// normalizes the reply into a report.
pub struct FreshnessAnalyzer {
    collaborator: Box<dyn VisionCollaborator>,
}

impl FreshnessAnalyzer {
    pub fn new(collaborator: Box<dyn VisionCollaborator>) -> Self {
        Self { collaborator }
    }

    pub fn gemini(config: AnalyzerConfig) -> Self {
        Self::new(Box::new(GeminiCollaborator::new(config)))
    }

    pub fn dryrun() -> Self {
        Self::new(Box::new(DryrunCollaborator))
    }

    pub fn collaborator_name(&self) -> &str {
        self.collaborator.name()
    }

    pub fn analyze(&self, image: &ImagePayload) -> Result<FreshnessReport, AnalyzeError> {
        image.validate()?;
        let text = self.collaborator.classify(image)?;
        if text.trim().is_empty() {
            return Err(AnalyzeError::EmptyResponse);
        }
        Ok(FreshnessReport::from_raw_text(&text)?)
    }
}

/// Drives an `AnalysisSession` through one analysis attempt: selection,
/// the collaborator call, resolution, and the matching event-log entries.
pub struct AnalysisEngine {
    analyzer: FreshnessAnalyzer,
    config: Option<AnalyzerConfig>,
    events: Option<EventWriter>,
    out_dir: Option<PathBuf>,
    session_id: String,
}

impl AnalysisEngine {
    pub fn new(
        analyzer: FreshnessAnalyzer,
        config: Option<AnalyzerConfig>,
        out_dir: Option<PathBuf>,
        events_path: Option<PathBuf>,
    ) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let events = events_path.map(|path| EventWriter::new(path, session_id.clone()));
        Self {
            analyzer,
            config,
            events,
            out_dir,
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn model_name(&self) -> String {
        self.config
            .as_ref()
            .map(|config| config.model.clone())
            .unwrap_or_else(|| self.analyzer.collaborator_name().to_string())
    }

    /// Swap the collaborator model. A no-op for the dry-run collaborator.
    pub fn set_model(&mut self, model: &str) -> bool {
        let Some(config) = self.config.as_mut() else {
            return false;
        };
        let model = model.trim();
        if model.is_empty() {
            return false;
        }
        config.model = model.to_string();
        self.analyzer = FreshnessAnalyzer::gemini(config.clone());
        true
    }

    /// Run one full attempt for the image at `path`. Collaborator failures
    /// land in the session's Error state, not in the returned `Result`;
    /// the `Err` branch is reserved for local faults (unreadable file,
    /// selection refused, event log unwritable).
    pub fn analyze_path(
        &self,
        session: &mut AnalysisSession,
        path: &Path,
    ) -> Result<AnalysisStatus> {
        let image = ImagePayload::from_path(path)?;
        session.select_image(Some(image.to_selected_image()))?;
        self.emit(
            "image_selected",
            payload(json!({
                "path": path.display().to_string(),
                "media_type": image.media_type,
                "byte_len": image.bytes.len(),
            })),
        )?;
        self.emit(
            "analysis_started",
            payload(json!({
                "collaborator": self.analyzer.collaborator_name(),
                "model": self.model_name(),
            })),
        )?;

        match self.analyzer.analyze(&image) {
            Ok(report) => {
                let artifact = self.write_report_artifact(&report)?;
                let mut event = payload(json!({
                    "is_food": report.is_food,
                    "freshness_score": report.freshness_score,
                    "confidence": report.confidence,
                }));
                if let Some(artifact) = artifact {
                    event.insert(
                        "artifact".to_string(),
                        Value::String(artifact.display().to_string()),
                    );
                }
                session.analysis_succeeded(report)?;
                self.emit("analysis_succeeded", event)?;
            }
            Err(err) => {
                let message = err.to_string();
                session.analysis_failed(message.clone())?;
                self.emit("analysis_failed", payload(json!({ "message": message })))?;
            }
        }

        Ok(session.status())
    }

    pub fn reset(&self, session: &mut AnalysisSession) -> Result<()> {
        session.reset();
        self.emit("session_reset", EventPayload::new())?;
        Ok(())
    }

    fn emit(&self, event_type: &str, event: EventPayload) -> Result<()> {
        if let Some(events) = &self.events {
            events.emit(event_type, event)?;
        }
        Ok(())
    }

    fn write_report_artifact(&self, report: &FreshnessReport) -> Result<Option<PathBuf>> {
        let Some(out_dir) = &self.out_dir else {
            return Ok(None);
        };
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
        let path = out_dir.join(format!("report-{}.json", timestamp_millis()));
        fs::write(&path, serde_json::to_string_pretty(report)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(Some(path))
    }
}

fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "isFood": { "type": "BOOLEAN" },
            "itemName": { "type": "STRING" },
            "freshnessScore": { "type": "INTEGER" },
            "freshnessLabel": { "type": "STRING" },
            "confidence": { "type": "INTEGER" },
            "ripenessLevel": { "type": "STRING" },
            "shortDescription": { "type": "STRING" },
            "visualIndicators": { "type": "ARRAY", "items": { "type": "STRING" } },
            "shelfLife": { "type": "STRING" },
            "storageAdvice": { "type": "STRING" },
            "nutritionHighlights": { "type": "STRING" },
            "cookingSuggestions": { "type": "ARRAY", "items": { "type": "STRING" } },
            "recipeName": { "type": "STRING" },
            "recipeInstructions": { "type": "STRING" }
        },
        "required": REQUIRED_FIELDS,
    })
}

fn transport_message(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        return format!(
            "The analysis request timed out after {} seconds.",
            timeout.as_secs()
        );
    }
    if err.is_connect() {
        return "Could not reach the analysis service.".to_string();
    }
    GENERIC_FAILURE_MESSAGE.to_string()
}

fn upstream_message(code: u16, body: &str) -> String {
    let provider_message = serde_json::from_str::<Value>(body)
        .ok()
        .as_ref()
        .and_then(|value| value.get("error"))
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string);

    match provider_message {
        Some(message) if message.to_ascii_lowercase().contains("api key") => {
            "The API key was rejected. Check that it is valid and active.".to_string()
        }
        Some(message) => format!(
            "Analysis request failed ({code}): {}",
            truncate_text(&message, 512)
        ),
        None => format!("Analysis request failed ({code})."),
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}
