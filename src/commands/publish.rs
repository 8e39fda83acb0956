use crate::browser::connection::Launcher;
use crate::config::AutomationConfig;
use crate::error::PublishError;
use crate::platforms::wechat::mp_profile;
use crate::workflow::hooks::{CheckpointHook, NoopHook, ScreenshotHook};
use crate::workflow::result::ErrorInfo;
use crate::workflow::{Orchestrator, PublishRequest, Stage, WorkflowResult};
use log::{info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run one publish end to end: validate, connect, drive, tear down.
///
/// The request is checked before the launcher is touched, and the
/// connection is torn down on every exit path once it exists.
pub async fn publish(
    launcher: &dyn Launcher,
    request: PublishRequest,
    config: &AutomationConfig,
    cancel: CancellationToken,
) -> WorkflowResult {
    if let Err(e) = request.validate() {
        warn!("[Publish] rejected: {}", e);
        return WorkflowResult::aborted(ErrorInfo::validation(&e));
    }

    let profile = mp_profile();

    let launched = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PublishError::Cancelled),
        launched = launcher.launch_or_attach() => launched,
    };
    let mut connection = match launched {
        Ok(connection) => connection,
        Err(e) => {
            warn!("[Publish] connection failed: {}", e);
            return WorkflowResult::aborted(ErrorInfo::from_error("connect", Stage::Idle, &e));
        }
    };
    info!(
        "[Publish] {} ({}) connected mode={} port={}",
        profile.info.name,
        profile.info.id,
        connection.mode().as_str(),
        connection.port()
    );

    let hook: Arc<dyn CheckpointHook> = match &config.screenshot_dir {
        Some(dir) => Arc::new(ScreenshotHook::new(dir.clone())),
        None => Arc::new(NoopHook),
    };
    let result = Orchestrator::new(profile, request, config.timeouts.clone())
        .with_hook(hook)
        .run(&connection, &cancel)
        .await;

    connection.teardown().await;
    info!("[Publish] {}", result.summary());
    result
}
