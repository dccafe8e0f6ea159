//! Error types for the dev server core.
//!
//! The hierarchy mirrors how failures surface: `ConfigError` is fatal at
//! startup, everything else is reported to the browser or logged and the
//! server keeps running. Request handlers never panic the process.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the dev server.
#[derive(Debug, Error)]
pub enum DevError {
    /// Configuration errors. The only fatal category; the server refuses
    /// to start.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A bare import specifier could not be mapped to a file on disk.
    /// Surfaces as a 500 with a JavaScript-comment body.
    #[error("Failed to resolve module {specifier}: {reason}")]
    Resolve {
        /// The bare specifier that failed to resolve
        specifier: String,
        /// Why resolution failed
        reason: String,
    },

    /// The transpiler failed on a project source file.
    #[error("Transform failed for {}: {message}", .file.display())]
    Transform {
        /// File that failed to compile
        file: PathBuf,
        /// Transpiler stderr, trimmed
        message: String,
    },

    /// Prebundling a third-party dependency failed. A warning at startup;
    /// a 500 when the module is fetched.
    #[error("Failed to bundle dependency {specifier}: {message}")]
    Bundle {
        /// The dependency that failed to bundle
        specifier: String,
        /// Transpiler stderr, trimmed
        message: String,
    },

    /// Filesystem errors. Logged; the server continues.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watcher errors.
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// JSON serialization errors (manifest, meta file, wire messages).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP server errors (bind failures, accept-loop teardown).
    #[error("Server error: {0}")]
    Server(String),
}

/// Startup configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The project root does not exist or is not a directory.
    #[error("Project root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    /// Neither `src/main.tsx` nor `src/main.jsx` exists.
    #[error("No entry file found in {}: expected main.tsx or main.jsx", .0.display())]
    EntryNotFound(PathBuf),

    /// The esbuild binary is not installed locally or on PATH.
    #[error("esbuild binary not found under {} or on PATH", .0.display())]
    TranspilerNotFound(PathBuf),

    /// A recognized option carried a value the server cannot use.
    #[error("Invalid value for '{field}': {value}")]
    InvalidValue {
        /// Option name
        field: String,
        /// The offending value
        value: String,
    },
}

/// Result alias used throughout the core.
pub type Result<T, E = DevError> = std::result::Result<T, E>;

impl DevError {
    /// Render this error as a syntactically valid JavaScript comment.
    ///
    /// Routes that the browser imports as modules must never receive an
    /// HTML error page; a parse error in the importing module would mask
    /// the real failure.
    pub fn as_js_comment(&self) -> String {
        let text = self.to_string();
        let mut body = String::with_capacity(text.len() + 8);
        for line in text.lines() {
            body.push_str("// ");
            body.push_str(line);
            body.push('\n');
        }
        body
    }
}
