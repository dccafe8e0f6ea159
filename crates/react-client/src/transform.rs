//! On-demand transform pipeline and its in-memory cache.
//!
//! A served project file passes through: disk read, bare-import rewrite,
//! the plugin transform chain, and the transpiler. The result is cached
//! by absolute path until the watcher invalidates it, so repeated fetches
//! of an unchanged file are byte-identical.

use crate::error::Result;
use crate::plugins::PluginHost;
use crate::rewrite::rewrite_bare_imports;
use crate::transpiler::{Loader, Transpiler};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Extensions tried, in order, when a source URL names no file directly.
pub const FALLBACK_EXTENSIONS: [&str; 5] = ["tsx", "ts", "jsx", "js", "css"];

/// Last-known transformed text per absolute source path.
#[derive(Default)]
pub struct TransformCache {
    records: RwLock<HashMap<PathBuf, String>>,
}

impl TransformCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached output for `path`, if current.
    pub fn get(&self, path: &Path) -> Option<String> {
        self.records.read().get(path).cloned()
    }

    pub fn insert(&self, path: PathBuf, output: String) {
        self.records.write().insert(path, output);
    }

    /// Drop the record for a changed or deleted file.
    pub fn invalidate(&self, path: &Path) {
        self.records.write().remove(path);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

/// Map a request path like `/src/App.tsx` to a file under `root_dir`,
/// trying the fallback extensions when the bare path does not exist.
/// `None` means the request falls through to the next route.
pub fn resolve_source_path(root_dir: &Path, url_path: &str) -> Option<PathBuf> {
    let relative = url_path.trim_start_matches('/');
    if relative.is_empty() || relative.split('/').any(|seg| seg == "..") {
        return None;
    }
    let base = root_dir.join(relative);
    if base.is_file() {
        return Some(base);
    }
    let raw = base.as_os_str().to_string_lossy();
    FALLBACK_EXTENSIONS
        .iter()
        .map(|ext| PathBuf::from(format!("{raw}.{ext}")))
        .find(|candidate| candidate.is_file())
}

/// Serve one project source file through the full pipeline, consulting
/// and filling the cache.
///
/// The response reflects the file state at the moment the miss was
/// serviced; a concurrent edit is reconciled by the follow-up HMR
/// update message.
pub async fn transform_source(
    cache: &TransformCache,
    plugins: &PluginHost,
    transpiler: &Transpiler,
    path: &Path,
) -> Result<String> {
    if let Some(hit) = cache.get(path) {
        return Ok(hit);
    }

    let raw = tokio::fs::read_to_string(path).await?;
    let rewritten = rewrite_bare_imports(&raw);
    let code = plugins.apply_transforms(rewritten, path)?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let output = match Loader::from_extension(ext) {
        Some(loader) => transpiler.transform(&code, loader, path).await?,
        // CSS (and anything else the plugin chain already turned into
        // JavaScript) skips the transpiler.
        None => code,
    };

    cache.insert(path.to_path_buf(), output.clone());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::PluginHost;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_cache_round_trip_and_invalidation() {
        let cache = TransformCache::new();
        let path = PathBuf::from("/p/src/App.tsx");

        assert!(cache.get(&path).is_none());
        cache.insert(path.clone(), "compiled".to_string());
        assert_eq!(cache.get(&path).as_deref(), Some("compiled"));
        assert_eq!(cache.len(), 1);

        cache.invalidate(&path);
        assert!(cache.get(&path).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_resolve_source_path_direct_hit() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("App.tsx"), "export {};\n").unwrap();

        let found = resolve_source_path(temp.path(), "/src/App.tsx").unwrap();
        assert!(found.ends_with("src/App.tsx"));
    }

    #[test]
    fn test_resolve_source_path_extension_fallback_order() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        // Both exist; .tsx wins because it is tried first.
        fs::write(src.join("Button.tsx"), "export {};\n").unwrap();
        fs::write(src.join("Button.js"), "export {};\n").unwrap();

        let found = resolve_source_path(temp.path(), "/src/Button").unwrap();
        assert!(found.ends_with("Button.tsx"));
    }

    #[test]
    fn test_resolve_source_path_misses_fall_through() {
        let temp = TempDir::new().unwrap();
        assert!(resolve_source_path(temp.path(), "/src/nope").is_none());
        assert!(resolve_source_path(temp.path(), "/../etc/passwd").is_none());
    }

    #[tokio::test]
    async fn test_css_pipeline_skips_transpiler() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let css_path = src.join("index.css");
        fs::write(&css_path, "body { margin: 0; }").unwrap();

        let cache = TransformCache::new();
        let plugins = PluginHost::new(vec![]);
        // The binary is never spawned for CSS, so a bogus path is fine.
        let transpiler = Transpiler::with_binary(PathBuf::from("/nonexistent/esbuild"));

        let out = transform_source(&cache, &plugins, &transpiler, &css_path)
            .await
            .unwrap();
        assert!(out.contains("document.createElement('style')"));
        assert!(out.contains("body { margin: 0; }"));

        // Second fetch is served from cache, byte-identical.
        let again = transform_source(&cache, &plugins, &transpiler, &css_path)
            .await
            .unwrap();
        assert_eq!(out, again);
    }

    #[tokio::test]
    async fn test_invalidation_forces_fresh_read() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let css_path = src.join("a.css");
        fs::write(&css_path, ".a { color: red; }").unwrap();

        let cache = TransformCache::new();
        let plugins = PluginHost::new(vec![]);
        let transpiler = Transpiler::with_binary(PathBuf::from("/nonexistent/esbuild"));

        let first = transform_source(&cache, &plugins, &transpiler, &css_path)
            .await
            .unwrap();
        assert!(first.contains("red"));

        fs::write(&css_path, ".a { color: blue; }").unwrap();
        // Until invalidation the cached record is served.
        let stale = transform_source(&cache, &plugins, &transpiler, &css_path)
            .await
            .unwrap();
        assert_eq!(first, stale);

        cache.invalidate(&css_path);
        let fresh = transform_source(&cache, &plugins, &transpiler, &css_path)
            .await
            .unwrap();
        assert!(fresh.contains("blue"));
    }
}
