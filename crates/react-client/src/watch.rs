//! Filesystem watcher for the source tree and the project manifest.
//!
//! Events are advisory: consumers re-stat before acting, and clients are
//! resilient to duplicate update messages, so the debounce here only
//! trims bursts from editors that write a file several times per save.

use crate::error::Result;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

/// What changed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file under the source tree changed.
    Source(PathBuf),
    /// The project manifest changed; the dependency set may have too.
    Manifest,
}

/// Recursive watcher over `<src_dir>` plus the project manifest file.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
    src_dir: PathBuf,
}

impl SourceWatcher {
    /// Start watching. Returns the watcher (keep it alive) and the event
    /// stream.
    pub fn new(
        src_dir: PathBuf,
        manifest_path: PathBuf,
        debounce_ms: u64,
    ) -> Result<(Self, mpsc::Receiver<WatchEvent>)> {
        let (tx, rx) = mpsc::channel(100);

        let debounce = Duration::from_millis(debounce_ms);
        let mut last_event: Option<(PathBuf, Instant)> = None;
        let src_dir_filter = src_dir.clone();
        let manifest = manifest_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if !matches!(
                event.kind,
                notify::EventKind::Create(_)
                    | notify::EventKind::Modify(_)
                    | notify::EventKind::Remove(_)
            ) {
                return;
            }
            for path in &event.paths {
                if *path == manifest {
                    let _ = tx.blocking_send(WatchEvent::Manifest);
                    continue;
                }
                if Self::should_ignore(path, &src_dir_filter) {
                    continue;
                }

                let now = Instant::now();
                if let Some((last_path, last_time)) = &last_event {
                    if last_path == path && now.duration_since(*last_time) < debounce {
                        continue;
                    }
                }
                last_event = Some((path.clone(), now));

                let _ = tx.blocking_send(WatchEvent::Source(path.clone()));
            }
        })?;

        watcher.watch(&src_dir, RecursiveMode::Recursive)?;
        if manifest_path.is_file() {
            watcher.watch(&manifest_path, RecursiveMode::NonRecursive)?;
        } else {
            debug!("manifest {} absent, not watched", manifest_path.display());
        }

        Ok((
            Self {
                _watcher: watcher,
                src_dir,
            },
            rx,
        ))
    }

    /// Filter out paths the broadcaster must never react to: anything
    /// outside the source tree, the dep cache, and hidden files.
    fn should_ignore(path: &Path, src_dir: &Path) -> bool {
        if !path.starts_with(src_dir) {
            return true;
        }
        let Ok(relative) = path.strip_prefix(src_dir) else {
            return true;
        };
        for component in relative.components() {
            if let Some(name) = component.as_os_str().to_str() {
                if name.starts_with('.') {
                    return true;
                }
            }
        }
        false
    }

    /// Root of the watched source tree.
    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_should_ignore_outside_source_tree() {
        let src = PathBuf::from("/project/src");
        assert!(SourceWatcher::should_ignore(
            &PathBuf::from("/project/.react-client/deps/react.js"),
            &src
        ));
        assert!(SourceWatcher::should_ignore(
            &PathBuf::from("/other/src/main.tsx"),
            &src
        ));
        assert!(!SourceWatcher::should_ignore(
            &PathBuf::from("/project/src/App.tsx"),
            &src
        ));
    }

    #[test]
    fn test_should_ignore_hidden_files() {
        let src = PathBuf::from("/project/src");
        assert!(SourceWatcher::should_ignore(
            &PathBuf::from("/project/src/.App.tsx.swp"),
            &src
        ));
        assert!(SourceWatcher::should_ignore(
            &PathBuf::from("/project/src/.cache/state.json"),
            &src
        ));
    }

    #[tokio::test]
    async fn test_source_change_is_delivered() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let file = src.join("App.tsx");
        fs::write(&file, "export {};\n").unwrap();

        let (_watcher, mut rx) =
            SourceWatcher::new(src.clone(), temp.path().join("package.json"), 50).unwrap();

        // Give the backend a moment to arm, then touch the file.
        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&file, "export const changed = true;\n").unwrap();

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher event within deadline")
            .expect("watcher channel open");
        match event {
            WatchEvent::Source(path) => assert!(path.ends_with("App.tsx")),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
