use crate::browser::chrome;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ChromeStatus {
    pub found: bool,
    pub path: Option<String>,
    pub error: Option<String>,
}

/// Whether a usable Chrome/Chromium executable is installed.
pub fn detect_chrome_status() -> ChromeStatus {
    match chrome::detect_chrome() {
        Ok(path) => ChromeStatus {
            found: true,
            path: Some(path.to_string_lossy().to_string()),
            error: None,
        },
        Err(e) => ChromeStatus {
            found: false,
            path: None,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_consistent() {
        let status = detect_chrome_status();
        assert_eq!(status.found, status.path.is_some());
        assert_eq!(status.found, status.error.is_none());
    }
}
