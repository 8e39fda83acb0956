use crate::error::PublishError;
use crate::workflow::request::ValidationError;
use crate::workflow::state::Stage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    ElementNotFound,
    /// Element found but the action did not land (covered, detached).
    Interaction,
    OptionalStepFailed,
    Validation,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection => "CONNECTION_ERROR",
            Self::ElementNotFound => "ELEMENT_NOT_FOUND",
            Self::Interaction => "INTERACTION_FAILED",
            Self::OptionalStepFailed => "OPTIONAL_STEP_FAILED",
            Self::Validation => "VALIDATION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// Diagnostic record for a failed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub step: String,
    pub stage: Stage,
    pub message: String,
    /// Locators tried, in order, with their match counts.
    pub descriptors_tried: Vec<String>,
}

impl ErrorInfo {
    pub fn new(
        kind: ErrorKind,
        step: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            step: step.into(),
            stage,
            message: message.into(),
            descriptors_tried: Vec::new(),
        }
    }

    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.descriptors_tried = trace;
        self
    }

    pub fn validation(error: &ValidationError) -> Self {
        Self::new(ErrorKind::Validation, "validate", Stage::Idle, error.to_string())
    }

    /// Classify a runtime error raised while `step` was running.
    pub fn from_error(step: impl Into<String>, stage: Stage, error: &PublishError) -> Self {
        let kind = match error {
            PublishError::Cancelled => ErrorKind::Cancelled,
            PublishError::Timeout { .. } => ErrorKind::Timeout,
            PublishError::FileNotFound(_) => ErrorKind::Validation,
            // The page answered, the script or command did not work.
            PublishError::Protocol(_) | PublishError::Json(_) | PublishError::NotSupported(_) => {
                ErrorKind::Interaction
            }
            _ => ErrorKind::Connection,
        };
        Self::new(kind, step, stage, error.to_string())
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}@{}]: {}",
            self.kind.code(),
            self.step,
            self.stage,
            self.message
        )?;
        if !self.descriptors_tried.is_empty() {
            write!(f, " tried=[{}]", self.descriptors_tried.join("; "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step: String,
    pub stage: Stage,
    pub success: bool,
    pub detail: String,
    pub error_kind: Option<ErrorKind>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub final_stage: Stage,
    pub steps: Vec<StepOutcome>,
    pub error: Option<ErrorInfo>,
}

impl WorkflowResult {
    /// A run that ended before any step, e.g. bad input or no browser.
    pub fn aborted(error: ErrorInfo) -> Self {
        Self {
            final_stage: Stage::Blocked,
            steps: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_done(&self) -> bool {
        self.final_stage == Stage::Done
    }

    pub fn is_blocked(&self) -> bool {
        self.final_stage == Stage::Blocked
    }

    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == name)
    }

    pub fn optional_failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps
            .iter()
            .filter(|s| s.error_kind == Some(ErrorKind::OptionalStepFailed))
    }

    /// Stages visited, in recording order, without repeats.
    pub fn stage_trail(&self) -> Vec<Stage> {
        let mut trail: Vec<Stage> = Vec::new();
        for step in &self.steps {
            if trail.last() != Some(&step.stage) {
                trail.push(step.stage);
            }
        }
        if trail.last() != Some(&self.final_stage) {
            trail.push(self.final_stage);
        }
        trail
    }

    pub fn summary(&self) -> String {
        let ok = self.steps.iter().filter(|s| s.success).count();
        match &self.error {
            Some(error) => format!(
                "stage={} steps={}/{} error={}",
                self.final_stage,
                ok,
                self.steps.len(),
                error
            ),
            None => format!("stage={} steps={}/{}", self.final_stage, ok, self.steps.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn display_includes_code_step_and_trace() {
        let info = ErrorInfo::new(ErrorKind::ElementNotFound, "title", Stage::Editing, "no title input")
            .with_trace(vec!["css(#title) matched=0 visible=0".into()]);
        let text = info.to_string();
        assert!(text.starts_with("ELEMENT_NOT_FOUND [title@editing]"));
        assert!(text.contains("css(#title)"));
    }

    #[test]
    fn runtime_errors_are_classified() {
        let timeout = PublishError::timeout("Runtime.evaluate", Duration::from_secs(1));
        assert_eq!(ErrorInfo::from_error("x", Stage::Editing, &timeout).kind, ErrorKind::Timeout);
        assert_eq!(
            ErrorInfo::from_error("x", Stage::Editing, &PublishError::ConnectionClosed).kind,
            ErrorKind::Connection
        );
        assert_eq!(
            ErrorInfo::from_error("x", Stage::Idle, &PublishError::Cancelled).kind,
            ErrorKind::Cancelled
        );
        let script = PublishError::Protocol("evaluate: TypeError".into());
        assert_eq!(
            ErrorInfo::from_error("x", Stage::Editing, &script).kind,
            ErrorKind::Interaction
        );
    }

    #[test]
    fn aborted_result_is_blocked_without_steps() {
        let result = WorkflowResult::aborted(ErrorInfo::new(
            ErrorKind::Connection,
            "launch",
            Stage::Idle,
            "no chrome",
        ));
        assert!(result.is_blocked());
        assert!(result.steps.is_empty());
        assert_eq!(result.stage_trail(), vec![Stage::Blocked]);
    }
}
