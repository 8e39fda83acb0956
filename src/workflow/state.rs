use crate::workflow::result::ErrorInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Workflow stage. Declaration order is progression order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Idle,
    AwaitingLogin,
    Editing,
    UploadingCover,
    InsertingContent,
    ConfiguringOriginal,
    ConfiguringReward,
    ConfiguringCollection,
    Saving,
    Publishing,
    AwaitingQrConfirmation,
    Done,
    Blocked,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingLogin => "awaiting_login",
            Self::Editing => "editing",
            Self::UploadingCover => "uploading_cover",
            Self::InsertingContent => "inserting_content",
            Self::ConfiguringOriginal => "configuring_original",
            Self::ConfiguringReward => "configuring_reward",
            Self::ConfiguringCollection => "configuring_collection",
            Self::Saving => "saving",
            Self::Publishing => "publishing",
            Self::AwaitingQrConfirmation => "awaiting_qr_confirmation",
            Self::Done => "done",
            Self::Blocked => "blocked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Blocked)
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::Idle | Self::AwaitingLogin => Phase::Idle,
            Self::Editing | Self::InsertingContent => Phase::Editing,
            Self::UploadingCover => Phase::Uploading,
            Self::ConfiguringOriginal | Self::ConfiguringReward | Self::ConfiguringCollection => {
                Phase::ConfiguringFlags
            }
            Self::Saving => Phase::Saving,
            Self::Publishing => Phase::Publishing,
            Self::AwaitingQrConfirmation => Phase::Confirming,
            Self::Done => Phase::Done,
            Self::Blocked => Phase::Blocked,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse grouping of [`Stage`] for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Editing,
    Uploading,
    ConfiguringFlags,
    Saving,
    Publishing,
    Confirming,
    Done,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid stage transition {from} -> {to}")]
pub struct TransitionError {
    pub from: Stage,
    pub to: Stage,
}

/// Mutable progress record of one run. Only the orchestrator writes to it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionState {
    pub logged_in: bool,
    stage: Stage,
    last_error: Option<ErrorInfo>,
    pub token: Option<String>,
    pub editor_url: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.last_error.as_ref()
    }

    /// Move strictly forward to a non-blocked stage.
    pub fn advance(&mut self, next: Stage) -> Result<(), TransitionError> {
        if self.stage.is_terminal() || next == Stage::Blocked || next <= self.stage {
            return Err(TransitionError {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        Ok(())
    }

    /// Stop the run. Allowed from any non-terminal stage.
    pub fn block(&mut self, error: ErrorInfo) -> Result<(), TransitionError> {
        if self.stage.is_terminal() {
            return Err(TransitionError {
                from: self.stage,
                to: Stage::Blocked,
            });
        }
        self.stage = Stage::Blocked;
        self.last_error = Some(error);
        Ok(())
    }
}
