use thiserror::Error;

use crate::report::FreshnessReport;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStatus {
    #[default]
    Idle,
    Analyzing,
    Success,
    Error,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Idle => "idle",
            AnalysisStatus::Analyzing => "analyzing",
            AnalysisStatus::Success => "success",
            AnalysisStatus::Error => "error",
        }
    }
}

/// The currently selected image: raw encoded bytes, the declared media
/// type, and a preview data URL the presentation layer can render without
/// re-reading the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedImage {
    pub bytes: Vec<u8>,
    pub media_type: String,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The selection event carried no file. Recovered locally: the session
    /// stays where it was.
    #[error("no file was selected")]
    NoFileSelected,

    /// A second selection arrived while an analysis was in flight. Only one
    /// analysis runs at a time; the state machine enforces it rather than
    /// relying on the presentation layer hiding the upload affordance.
    #[error("an analysis is already in flight")]
    AnalysisInFlight,

    #[error("{action} is not valid while the session is {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}

/// Lifecycle of a single analysis attempt.
///
/// Invariants, maintained by keeping the fields private:
/// - `result` is Some iff the status is Success
/// - `error_message` is Some iff the status is Error
/// - `image` is None iff the status is Idle
#[derive(Debug, Default)]
pub struct AnalysisSession {
    status: AnalysisStatus,
    image: Option<SelectedImage>,
    result: Option<FreshnessReport>,
    error_message: Option<String>,
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> AnalysisStatus {
        self.status
    }

    pub fn image(&self) -> Option<&SelectedImage> {
        self.image.as_ref()
    }

    pub fn result(&self) -> Option<&FreshnessReport> {
        self.result.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Accept a selection event and move to Analyzing.
    ///
    /// `None` means the event carried no file; the session is left exactly
    /// as it was. A selection during an in-flight analysis is refused.
    /// Selecting from Success or Error discards the previous outcome and
    /// starts a fresh attempt.
    pub fn select_image(&mut self, image: Option<SelectedImage>) -> Result<(), SessionError> {
        let Some(image) = image else {
            return Err(SessionError::NoFileSelected);
        };
        if self.status == AnalysisStatus::Analyzing {
            return Err(SessionError::AnalysisInFlight);
        }
        self.result = None;
        self.error_message = None;
        self.image = Some(image);
        self.status = AnalysisStatus::Analyzing;
        Ok(())
    }

    /// Store the validated report. Valid only while Analyzing; the display
    /// handle of the selected image is retained.
    pub fn analysis_succeeded(&mut self, report: FreshnessReport) -> Result<(), SessionError> {
        if self.status != AnalysisStatus::Analyzing {
            return Err(self.invalid("analysis_succeeded"));
        }
        self.result = Some(report);
        self.status = AnalysisStatus::Success;
        Ok(())
    }

    /// Store a human-readable failure message. Valid only while Analyzing.
    pub fn analysis_failed(&mut self, message: impl Into<String>) -> Result<(), SessionError> {
        if self.status != AnalysisStatus::Analyzing {
            return Err(self.invalid("analysis_failed"));
        }
        self.error_message = Some(message.into());
        self.status = AnalysisStatus::Error;
        Ok(())
    }

    /// Return to Idle, dropping the report, the error, and the image.
    pub fn reset(&mut self) {
        self.result = None;
        self.error_message = None;
        self.image = None;
        self.status = AnalysisStatus::Idle;
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            action,
            state: self.status().as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::report::FreshnessReport;

    use super::{AnalysisSession, AnalysisStatus, SelectedImage, SessionError};

    fn selected() -> SelectedImage {
        SelectedImage {
            bytes: vec![1, 2, 3],
            media_type: "image/png".to_string(),
            preview: "data:image/png;base64,AQID".to_string(),
        }
    }

    fn sample_report() -> FreshnessReport {
        FreshnessReport {
            is_food: true,
            item_name: "Tomato".to_string(),
            freshness_score: 72,
            confidence: 88,
            ..FreshnessReport::default()
        }
    }

    #[test]
    fn new_session_is_idle_and_empty() {
        let session = AnalysisSession::new();
        assert_eq!(session.status(), AnalysisStatus::Idle);
        assert!(session.image().is_none());
        assert!(session.result().is_none());
        assert!(session.error_message().is_none());
    }

    #[test]
    fn selecting_nothing_is_a_local_no_op() {
        let mut session = AnalysisSession::new();
        assert_eq!(session.select_image(None), Err(SessionError::NoFileSelected));
        assert_eq!(session.status(), AnalysisStatus::Idle);
        assert!(session.image().is_none());
    }

    #[test]
    fn selection_moves_to_analyzing_with_image() {
        let mut session = AnalysisSession::new();
        session.select_image(Some(selected())).unwrap();
        assert_eq!(session.status(), AnalysisStatus::Analyzing);
        assert_eq!(session.image().map(|image| image.media_type.as_str()), Some("image/png"));
    }

    #[test]
    fn second_selection_while_analyzing_is_refused() {
        let mut session = AnalysisSession::new();
        session.select_image(Some(selected())).unwrap();
        assert_eq!(
            session.select_image(Some(selected())),
            Err(SessionError::AnalysisInFlight)
        );
        assert_eq!(session.status(), AnalysisStatus::Analyzing);
    }

    #[test]
    fn success_keeps_image_and_stores_report() {
        let mut session = AnalysisSession::new();
        session.select_image(Some(selected())).unwrap();
        session.analysis_succeeded(sample_report()).unwrap();
        assert_eq!(session.status(), AnalysisStatus::Success);
        assert!(session.image().is_some());
        assert_eq!(session.result().map(|report| report.freshness_score), Some(72));
        assert!(session.error_message().is_none());
    }

    #[test]
    fn failure_keeps_image_and_stores_message() {
        let mut session = AnalysisSession::new();
        session.select_image(Some(selected())).unwrap();
        session.analysis_failed("the model is unavailable").unwrap();
        assert_eq!(session.status(), AnalysisStatus::Error);
        assert!(session.image().is_some());
        assert_eq!(session.error_message(), Some("the model is unavailable"));
        assert!(session.result().is_none());
    }

    #[test]
    fn resolution_events_are_only_valid_while_analyzing() {
        let mut session = AnalysisSession::new();
        assert!(matches!(
            session.analysis_succeeded(sample_report()),
            Err(SessionError::InvalidTransition { .. })
        ));
        assert!(matches!(
            session.analysis_failed("boom"),
            Err(SessionError::InvalidTransition { .. })
        ));
        assert_eq!(session.status(), AnalysisStatus::Idle);
    }

    #[test]
    fn reset_clears_everything_from_success() {
        let mut session = AnalysisSession::new();
        session.select_image(Some(selected())).unwrap();
        session.analysis_succeeded(sample_report()).unwrap();
        session.reset();
        assert_eq!(session.status(), AnalysisStatus::Idle);
        assert!(session.image().is_none());
        assert!(session.result().is_none());
        assert!(session.error_message().is_none());
    }

    #[test]
    fn reset_clears_everything_from_error() {
        let mut session = AnalysisSession::new();
        session.select_image(Some(selected())).unwrap();
        session.analysis_failed("boom").unwrap();
        session.reset();
        assert_eq!(session.status(), AnalysisStatus::Idle);
        assert!(session.image().is_none());
        assert!(session.error_message().is_none());
    }

    #[test]
    fn reselecting_after_error_starts_fresh() {
        let mut session = AnalysisSession::new();
        session.select_image(Some(selected())).unwrap();
        session.analysis_failed("boom").unwrap();
        session.select_image(Some(selected())).unwrap();
        assert_eq!(session.status(), AnalysisStatus::Analyzing);
        assert!(session.error_message().is_none());
    }
}
