//! Project configuration.
//!
//! The loader that reads a user config file lives outside the core; this
//! module only turns an already-parsed [`ServerOptions`] into the
//! immutable [`ProjectConfig`] the server runs on.

use crate::error::{ConfigError, Result};
use crate::plugins::Plugin;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default listen port. The alternate-port prompt starts scanning from
/// here when it is taken.
pub const DEFAULT_PORT: u16 = 5173;

/// Directory (under the project root) holding prebundled dependencies.
pub const DEP_CACHE_DIR: &str = ".react-client/deps";

/// Recognized user-facing options, all optional.
#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerOptions {
    /// Project root, default `"."`.
    pub root: Option<PathBuf>,

    /// `server.*` options.
    pub server: ServerSection,

    /// `build.*` options. Unused by the dev server core.
    pub build: BuildSection,

    /// Ordered plugins. Not part of the serialized config surface.
    #[serde(skip)]
    pub plugins: Vec<Arc<dyn Plugin>>,
}

/// The `server` section of [`ServerOptions`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSection {
    /// Listen port, default [`DEFAULT_PORT`].
    pub port: Option<u16>,

    /// Open the browser once the server is up, default `true`.
    pub open: Option<bool>,
}

/// The `build` section of [`ServerOptions`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildSection {
    /// Production output directory. The dev server never writes here.
    pub out_dir: Option<PathBuf>,
}

/// Immutable configuration derived once at startup.
#[derive(Clone)]
pub struct ProjectConfig {
    /// Absolute path to the project root.
    pub root_dir: PathBuf,

    /// `<root_dir>/src`.
    pub src_dir: PathBuf,

    /// The application entry: first of `src/main.tsx`, `src/main.jsx`
    /// that exists.
    pub entry_file: PathBuf,

    /// `<root_dir>/index.html`.
    pub index_html_path: PathBuf,

    /// `<root_dir>/package.json`, watched for prebundle invalidation.
    pub manifest_path: PathBuf,

    /// Port the HTTP server listens on.
    pub listen_port: u16,

    /// Open the browser once the server is up.
    pub open_browser_on_start: bool,

    /// Ordered user plugins.
    pub plugins: Vec<Arc<dyn Plugin>>,
}

impl ProjectConfig {
    /// Derive the runtime configuration from user options.
    ///
    /// Fatal when the root does not exist or no entry file is present.
    pub fn resolve(options: ServerOptions) -> Result<Self> {
        let root = options.root.unwrap_or_else(|| PathBuf::from("."));
        let root_dir = root
            .canonicalize()
            .map_err(|_| ConfigError::RootNotFound(root.clone()))?;
        if !root_dir.is_dir() {
            return Err(ConfigError::RootNotFound(root_dir).into());
        }

        let src_dir = root_dir.join("src");
        let entry_file = ["main.tsx", "main.jsx"]
            .iter()
            .map(|name| src_dir.join(name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ConfigError::EntryNotFound(src_dir.clone()))?;

        Ok(Self {
            index_html_path: root_dir.join("index.html"),
            manifest_path: root_dir.join("package.json"),
            src_dir,
            entry_file,
            root_dir,
            listen_port: options.server.port.unwrap_or(DEFAULT_PORT),
            open_browser_on_start: options.server.open.unwrap_or(true),
            plugins: options.plugins,
        })
    }

    /// Absolute path of the prebundle artifact directory.
    pub fn dep_cache_dir(&self) -> PathBuf {
        self.root_dir.join(DEP_CACHE_DIR)
    }
}

impl fmt::Debug for ProjectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectConfig")
            .field("root_dir", &self.root_dir)
            .field("src_dir", &self.src_dir)
            .field("entry_file", &self.entry_file)
            .field("index_html_path", &self.index_html_path)
            .field("listen_port", &self.listen_port)
            .field("open_browser_on_start", &self.open_browser_on_start)
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project_with_entry(entry: &str) -> TempDir {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join(entry), "export default null;\n").unwrap();
        temp
    }

    #[test]
    fn test_resolve_prefers_tsx_entry() {
        let temp = project_with_entry("main.tsx");
        fs::write(temp.path().join("src/main.jsx"), "// jsx\n").unwrap();

        let config = ProjectConfig::resolve(ServerOptions {
            root: Some(temp.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap();

        assert!(config.entry_file.ends_with("main.tsx"));
    }

    #[test]
    fn test_resolve_falls_back_to_jsx_entry() {
        let temp = project_with_entry("main.jsx");

        let config = ProjectConfig::resolve(ServerOptions {
            root: Some(temp.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap();

        assert!(config.entry_file.ends_with("main.jsx"));
    }

    #[test]
    fn test_resolve_missing_entry_is_fatal() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();

        let err = ProjectConfig::resolve(ServerOptions {
            root: Some(temp.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap_err();

        assert!(err.to_string().contains("No entry file"));
    }

    #[test]
    fn test_resolve_defaults() {
        let temp = project_with_entry("main.tsx");

        let config = ProjectConfig::resolve(ServerOptions {
            root: Some(temp.path().to_path_buf()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(config.listen_port, DEFAULT_PORT);
        assert!(config.open_browser_on_start);
        assert!(config.dep_cache_dir().ends_with(".react-client/deps"));
        assert!(config.manifest_path.ends_with("package.json"));
    }

    #[test]
    fn test_server_options_from_json() {
        let options: ServerOptions = serde_json::from_str(
            r#"{ "root": "app", "server": { "port": 2202, "open": false }, "build": { "outDir": "dist" } }"#,
        )
        .unwrap();

        assert_eq!(options.server.port, Some(2202));
        assert_eq!(options.server.open, Some(false));
        assert_eq!(options.build.out_dir, Some(PathBuf::from("dist")));
    }
}
