//! Error-overlay script endpoint.
//!
//! Serves a small client runtime that renders runtime errors with
//! original-source snippets fetched from `/@source-map`. A project can
//! override the built-in runtime by shipping its own copy at
//! `src/runtime/overlay-runtime.js`.

use std::path::Path;
use tracing::debug;

/// Built-in overlay runtime, compiled into the binary.
pub const OVERLAY_RUNTIME: &str = include_str!("../assets/overlay-runtime.js");

/// Project-relative location of the user override, under `src/`.
pub const OVERLAY_OVERRIDE: &str = "runtime/overlay-runtime.js";

/// The overlay script to serve for this project.
pub async fn overlay_source(src_dir: &Path) -> String {
    let override_path = src_dir.join(OVERLAY_OVERRIDE);
    match tokio::fs::read_to_string(&override_path).await {
        Ok(custom) => {
            debug!("serving overlay override from {}", override_path.display());
            custom
        }
        Err(_) => OVERLAY_RUNTIME.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_runtime_installs_overlay_api() {
        assert!(OVERLAY_RUNTIME.contains("window.showErrorOverlay"));
        assert!(OVERLAY_RUNTIME.contains("window.clearErrorOverlay"));
        assert!(OVERLAY_RUNTIME.contains("/@source-map"));
        assert!(OVERLAY_RUNTIME.contains("vscode://file"));
        assert!(OVERLAY_RUNTIME.contains("unhandledrejection"));
        // Either overlay prototype's field name works.
        assert!(OVERLAY_RUNTIME.contains("mapped.source || mapped.file"));
    }

    #[tokio::test]
    async fn test_embedded_runtime_served_without_override() {
        let temp = TempDir::new().unwrap();
        let served = overlay_source(temp.path()).await;
        assert_eq!(served, OVERLAY_RUNTIME);
    }

    #[tokio::test]
    async fn test_override_wins_when_present() {
        let temp = TempDir::new().unwrap();
        let runtime_dir = temp.path().join("runtime");
        fs::create_dir_all(&runtime_dir).unwrap();
        fs::write(
            runtime_dir.join("overlay-runtime.js"),
            "window.showErrorOverlay = () => {};\n",
        )
        .unwrap();

        let served = overlay_source(temp.path()).await;
        assert!(served.starts_with("window.showErrorOverlay"));
        assert_ne!(served, OVERLAY_RUNTIME);
    }
}
