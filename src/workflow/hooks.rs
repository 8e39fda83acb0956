use crate::browser::driver::PageDriver;
use crate::workflow::state::Stage;
use async_trait::async_trait;
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Called at named points of a run. Failures inside a hook must not
/// affect the run, so the method returns nothing.
#[async_trait]
pub trait CheckpointHook: Send + Sync {
    async fn checkpoint(&self, name: &str, stage: Stage, page: &dyn PageDriver);
}

pub struct NoopHook;

#[async_trait]
impl CheckpointHook for NoopHook {
    async fn checkpoint(&self, _name: &str, _stage: Stage, _page: &dyn PageDriver) {}
}

/// Writes `NN_<stage>_<name>.png` into a directory at every checkpoint.
pub struct ScreenshotHook {
    dir: PathBuf,
    counter: AtomicUsize,
}

impl ScreenshotHook {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicUsize::new(0),
        }
    }

    fn file_name(&self, name: &str, stage: Stage) -> String {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let slug: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{:02}_{}_{}.png", seq, stage.as_str(), slug)
    }
}

#[async_trait]
impl CheckpointHook for ScreenshotHook {
    async fn checkpoint(&self, name: &str, stage: Stage, page: &dyn PageDriver) {
        let path = self.dir.join(self.file_name(name, stage));
        let bytes = match page.screenshot().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("[Checkpoint] {} screenshot failed: {}", name, e);
                return;
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!("[Checkpoint] cannot create {}: {}", self.dir.display(), e);
            return;
        }
        match tokio::fs::write(&path, &bytes).await {
            Ok(()) => debug!("[Checkpoint] {} -> {}", name, path.display()),
            Err(e) => warn!("[Checkpoint] write {} failed: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_numbered_and_sanitised() {
        let hook = ScreenshotHook::new("/tmp/shots");
        assert_eq!(hook.file_name("editor ready", Stage::Editing), "01_editing_editor_ready.png");
        assert_eq!(hook.file_name("done", Stage::Done), "02_done_done.png");
    }
}
