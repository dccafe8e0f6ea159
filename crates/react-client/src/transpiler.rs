//! Gateway to the external esbuild binary.
//!
//! Two invocation shapes: whole-package bundles written to the dep cache,
//! and per-file transforms piped through stdin/stdout with inline source
//! maps. The binary is located once at startup; a missing binary is a
//! fatal configuration error.

use crate::error::{ConfigError, DevError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// esbuild `--loader` values, selected by source extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    Js,
    Jsx,
    Ts,
    Tsx,
}

impl Loader {
    /// Loader for a file extension; `None` for extensions the transpiler
    /// does not compile.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "js" => Some(Self::Js),
            "jsx" => Some(Self::Jsx),
            "ts" => Some(Self::Ts),
            "tsx" => Some(Self::Tsx),
            _ => None,
        }
    }

    fn as_flag(self) -> &'static str {
        match self {
            Self::Js => "--loader=js",
            Self::Jsx => "--loader=jsx",
            Self::Ts => "--loader=ts",
            Self::Tsx => "--loader=tsx",
        }
    }
}

/// Handle to the located esbuild binary.
#[derive(Debug, Clone)]
pub struct Transpiler {
    binary: PathBuf,
}

impl Transpiler {
    /// Locate esbuild: the project-local install first, then PATH.
    pub fn discover(root_dir: &Path) -> Result<Self> {
        let local = root_dir.join("node_modules/.bin/esbuild");
        if local.is_file() {
            return Ok(Self { binary: local });
        }
        if let Some(path_var) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&path_var) {
                let candidate = dir.join("esbuild");
                if candidate.is_file() {
                    return Ok(Self { binary: candidate });
                }
            }
        }
        Err(ConfigError::TranspilerNotFound(root_dir.to_path_buf()).into())
    }

    /// Construct a gateway around an explicit binary path.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Compile one source text, returning browser-ready output with an
    /// inline source map.
    pub async fn transform(&self, source: &str, loader: Loader, file: &Path) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .args(transform_args(loader))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| transform_error(file, &format!("failed to spawn esbuild: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| transform_error(file, "failed to open esbuild stdin"))?;
        stdin
            .write_all(source.as_bytes())
            .await
            .map_err(|e| transform_error(file, &format!("failed to write source: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| transform_error(file, &format!("esbuild did not exit: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(transform_error(file, stderr.trim()));
        }
        String::from_utf8(output.stdout)
            .map_err(|_| transform_error(file, "esbuild produced invalid UTF-8"))
    }

    /// Bundle one resolved dependency entry into a self-contained
    /// browser-ESM artifact at `outfile`.
    pub async fn bundle(&self, specifier: &str, entry: &Path, outfile: &Path) -> Result<()> {
        if let Some(parent) = outfile.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let output = Command::new(&self.binary)
            .args(bundle_args(entry, outfile))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| bundle_error(specifier, &format!("failed to spawn esbuild: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(bundle_error(specifier, stderr.trim()));
        }
        Ok(())
    }
}

/// Arguments for a per-file transform: stdin source, ESM output, inline
/// source map.
fn transform_args(loader: Loader) -> Vec<String> {
    vec![
        loader.as_flag().to_string(),
        "--format=esm".to_string(),
        "--target=es2020".to_string(),
        "--sourcemap=inline".to_string(),
    ]
}

/// Arguments for a whole-package prebundle.
fn bundle_args(entry: &Path, outfile: &Path) -> Vec<String> {
    vec![
        entry.to_string_lossy().into_owned(),
        "--bundle".to_string(),
        "--format=esm".to_string(),
        "--platform=browser".to_string(),
        "--target=es2020".to_string(),
        format!("--outfile={}", outfile.display()),
    ]
}

fn transform_error(file: &Path, message: &str) -> DevError {
    DevError::Transform {
        file: file.to_path_buf(),
        message: message.to_string(),
    }
}

fn bundle_error(specifier: &str, message: &str) -> DevError {
    DevError::Bundle {
        specifier: specifier.to_string(),
        message: message.to_string(),
    }
}
