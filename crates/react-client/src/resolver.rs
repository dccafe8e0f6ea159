//! Bare-specifier resolution against the package store.
//!
//! Maps an import like `react-dom/client` to a concrete file under a
//! `node_modules` directory, honoring the package manifest's export map,
//! conditional exports, and the legacy `module`/`browser`/`main` entry
//! fields. Manifests are parsed once and cached for the process lifetime.

use crate::error::{DevError, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A module id that does not start with `.` or `/`, split into the
/// package root (first segment, or first two for `@scope/name`) and an
/// optional subpath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BareSpecifier {
    raw: String,
    package_root: String,
    subpath: Option<String>,
}

impl BareSpecifier {
    /// Split a specifier, or `None` when it is relative or absolute.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.starts_with('.') || raw.starts_with('/') {
            return None;
        }
        let segments: Vec<&str> = raw.splitn(3, '/').collect();
        let (package_root, subpath) = if raw.starts_with('@') {
            match segments.as_slice() {
                [scope, name] => (format!("{scope}/{name}"), None),
                [scope, name, rest] => (format!("{scope}/{name}"), Some(rest.to_string())),
                _ => return None,
            }
        } else {
            let mut parts = raw.splitn(2, '/');
            let head = parts.next()?.to_string();
            (head, parts.next().map(str::to_string))
        };
        Some(Self {
            raw: raw.to_string(),
            package_root,
            subpath,
        })
    }

    /// The full specifier text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// First one or two path segments naming the package.
    pub fn package_root(&self) -> &str {
        &self.package_root
    }

    /// Everything after the package root, if present.
    pub fn subpath(&self) -> Option<&str> {
        self.subpath.as_deref()
    }

    /// Flat filename key for the prebundle directory: path separators
    /// become `_`.
    pub fn cache_key(&self) -> String {
        self.raw.replace('/', "_")
    }
}

/// The subset of `package.json` the resolver reads.
#[derive(Debug, Default, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    exports: Option<Value>,
    #[serde(default)]
    module: Option<String>,
    /// `browser` may be a string entry or a replacement map; only the
    /// string form names an entry point.
    #[serde(default)]
    browser: Option<Value>,
    #[serde(default)]
    main: Option<String>,
}

/// Resolves bare specifiers to absolute files inside the package store.
pub struct ModuleResolver {
    root_dir: PathBuf,
    manifests: RwLock<HashMap<PathBuf, Arc<PackageManifest>>>,
}

impl ModuleResolver {
    /// Create a resolver searching from `root_dir` upward.
    pub fn new(root_dir: PathBuf) -> Self {
        Self {
            root_dir,
            manifests: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve `specifier` to an existing regular file.
    pub fn resolve(&self, specifier: &str) -> Result<PathBuf> {
        let spec = BareSpecifier::parse(specifier)
            .ok_or_else(|| resolve_error(specifier, "not a bare specifier"))?;

        // Direct resolution: the specifier already names a file inside a
        // package store. Extension guessing is deferred until after the
        // export map has had its say.
        for store in self.search_paths() {
            if let Some(found) = existing_file(&store.join(spec.as_str())) {
                return Ok(found);
            }
        }

        let package_dir = self
            .find_package_dir(spec.package_root())
            .ok_or_else(|| resolve_error(specifier, "package directory not found"))?;
        let manifest = self.load_manifest(&package_dir.join("package.json"))?;

        if let Some(exports) = &manifest.exports {
            if let Some(found) = resolve_exports(&package_dir, exports, spec.subpath()) {
                return Ok(found);
            }
        }

        if let Some(subpath) = spec.subpath() {
            if let Some(found) = try_file_candidates(&package_dir.join(subpath)) {
                return Ok(found);
            }
            return Err(resolve_error(specifier, "subpath not found in package"));
        }

        let entry_fields = [
            manifest.module.as_deref(),
            manifest.browser.as_ref().and_then(Value::as_str),
            manifest.main.as_deref(),
        ];
        for entry in entry_fields.into_iter().flatten() {
            if let Some(found) = try_file_candidates(&package_dir.join(entry)) {
                return Ok(found);
            }
        }

        Err(resolve_error(specifier, "no usable entry in package manifest"))
    }

    /// `node_modules` directories from the project root upward.
    fn search_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.root_dir
            .ancestors()
            .map(|dir| dir.join("node_modules"))
    }

    /// Directory of the package named by `package_root`, if installed.
    fn find_package_dir(&self, package_root: &str) -> Option<PathBuf> {
        self.search_paths()
            .map(|store| store.join(package_root))
            .find(|candidate| candidate.is_dir())
    }

    /// Parse a manifest once and cache it by absolute path.
    fn load_manifest(&self, manifest_path: &Path) -> Result<Arc<PackageManifest>> {
        if let Some(cached) = self.manifests.read().get(manifest_path) {
            return Ok(Arc::clone(cached));
        }
        let text = std::fs::read_to_string(manifest_path)?;
        let manifest: PackageManifest = serde_json::from_str(&text)?;
        let manifest = Arc::new(manifest);
        self.manifests
            .write()
            .insert(manifest_path.to_path_buf(), Arc::clone(&manifest));
        Ok(manifest)
    }
}

/// Walk the `exports` field. Conditional keys are tried in a fixed
/// order (`import`, `default`, then any remaining string value) so
/// resolution never depends on host state.
fn resolve_exports(package_dir: &Path, exports: &Value, subpath: Option<&str>) -> Option<PathBuf> {
    match exports {
        Value::String(target) if subpath.is_none() => existing_file(&join_export(package_dir, target)),
        Value::Object(map) => {
            let keys: Vec<String> = match subpath {
                Some(sub) => vec![
                    format!("./{sub}"),
                    format!("./{sub}.js"),
                    format!("./{sub}.mjs"),
                ],
                None => vec![".".into(), "./index.js".into(), "./index.mjs".into()],
            };
            for key in &keys {
                let Some(value) = map.get(key.as_str()) else {
                    continue;
                };
                if let Some(target) = export_target(value) {
                    if let Some(found) = existing_file(&join_export(package_dir, target)) {
                        return Some(found);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

/// Pick the entry string out of one export-map value.
fn export_target(value: &Value) -> Option<&str> {
    match value {
        Value::String(target) => Some(target),
        Value::Object(conditions) => conditions
            .get("import")
            .and_then(Value::as_str)
            .or_else(|| conditions.get("default").and_then(Value::as_str))
            .or_else(|| conditions.values().find_map(Value::as_str)),
        _ => None,
    }
}

fn join_export(package_dir: &Path, target: &str) -> PathBuf {
    package_dir.join(target.trim_start_matches("./"))
}

/// Filesystem fallbacks for an extensionless candidate: the path itself,
/// then `.js`, `.mjs`, then directory index files.
fn try_file_candidates(base: &Path) -> Option<PathBuf> {
    if let Some(found) = existing_file(base) {
        return Some(found);
    }
    let raw = base.as_os_str().to_string_lossy();
    for suffix in [".js", ".mjs"] {
        if let Some(found) = existing_file(Path::new(&format!("{raw}{suffix}"))) {
            return Some(found);
        }
    }
    for index in ["index.js", "index.mjs"] {
        if let Some(found) = existing_file(&base.join(index)) {
            return Some(found);
        }
    }
    None
}

fn existing_file(path: &Path) -> Option<PathBuf> {
    path.is_file().then(|| path.to_path_buf())
}

fn resolve_error(specifier: &str, reason: &str) -> DevError {
    DevError::Resolve {
        specifier: specifier.to_string(),
        reason: reason.to_string(),
    }
}
