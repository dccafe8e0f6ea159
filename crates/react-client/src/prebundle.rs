//! Dependency prebundling cache.
//!
//! Third-party packages are bundled once into self-contained browser-ESM
//! artifacts under `<root>/.react-client/deps/` and served from disk
//! afterwards. The set of direct dependencies is discovered by a textual
//! walk of the project source graph from the entry file; a digest of that
//! set, stored in `_meta.json`, decides wholesale invalidation when the
//! project manifest changes.

use crate::error::{DevError, Result};
use crate::resolver::{BareSpecifier, ModuleResolver};
use crate::rewrite;
use crate::transpiler::Transpiler;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// On-disk invalidation record for the dep cache directory.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrebundleMeta {
    /// Hex digest of the sorted direct-dependency set.
    pub hash: String,
}

/// Name of the meta file inside the dep cache directory.
pub const META_FILE: &str = "_meta.json";

/// Source extensions followed by the dependency walk.
const WALK_EXTENSIONS: [&str; 4] = ["tsx", "ts", "jsx", "js"];

/// Prebundle cache over the dep artifact directory.
///
/// Writes are once per cache key, guarded by a keyed single-flight so
/// concurrent requests for the same specifier share one build.
pub struct PrebundleCache {
    src_dir: PathBuf,
    entry_file: PathBuf,
    deps_dir: PathBuf,
    resolver: Arc<ModuleResolver>,
    transpiler: Arc<Transpiler>,
    inflight: Mutex<HashMap<String, Arc<OnceCell<PathBuf>>>>,
}

impl PrebundleCache {
    pub fn new(
        src_dir: PathBuf,
        entry_file: PathBuf,
        deps_dir: PathBuf,
        resolver: Arc<ModuleResolver>,
        transpiler: Arc<Transpiler>,
    ) -> Self {
        Self {
            src_dir,
            entry_file,
            deps_dir,
            resolver,
            transpiler,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Artifact path for one specifier: a flat filename in the dep dir.
    pub fn artifact_path(&self, spec: &BareSpecifier) -> PathBuf {
        self.deps_dir.join(format!("{}.js", spec.cache_key()))
    }

    /// Walk the project source graph from the entry, collecting bare
    /// specifiers. The walk follows relative imports only and never
    /// leaves the project source tree.
    pub fn scan_direct_deps(&self) -> Result<BTreeSet<String>> {
        let mut deps = BTreeSet::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        queue.push_back(self.entry_file.clone());

        while let Some(file) = queue.pop_front() {
            if !visited.insert(file.clone()) {
                continue;
            }
            let code = match std::fs::read_to_string(&file) {
                Ok(code) => code,
                Err(e) => {
                    debug!("skipping unreadable source {}: {e}", file.display());
                    continue;
                }
            };
            deps.extend(rewrite::collect_bare_specifiers(&code));

            let dir = file.parent().unwrap_or(&self.src_dir).to_path_buf();
            for relative in rewrite::collect_relative_specifiers(&code) {
                if let Some(next) = resolve_walk_target(&dir, &relative) {
                    if next.starts_with(&self.src_dir) {
                        queue.push_back(next);
                    }
                }
            }
        }
        Ok(deps)
    }

    /// Bring the artifact directory in line with the current dependency
    /// set. Returns the number of artifacts built.
    ///
    /// Individual bundle failures are warnings; the failing module
    /// surfaces a 500 when it is actually fetched.
    pub async fn ensure_all(&self) -> Result<usize> {
        let deps = self.scan_direct_deps()?;
        let digest = digest_dependency_set(&deps);

        if self.read_meta().await.map(|meta| meta.hash == digest) == Some(true)
            && deps
                .iter()
                .filter_map(|d| BareSpecifier::parse(d))
                .all(|spec| self.artifact_path(&spec).is_file())
        {
            debug!("dependency set unchanged, {} artifacts reused", deps.len());
            return Ok(0);
        }

        tokio::fs::create_dir_all(&self.deps_dir).await?;

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();

        for dep in &deps {
            let Some(spec) = BareSpecifier::parse(dep) else {
                continue;
            };
            let artifact = self.artifact_path(&spec);
            if artifact.is_file() {
                continue;
            }
            let dep = dep.clone();
            let resolver = Arc::clone(&self.resolver);
            let transpiler = Arc::clone(&self.transpiler);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;
                let outcome = bundle_dependency(&resolver, &transpiler, &dep, &artifact).await;
                (dep, outcome)
            });
        }

        let mut built = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => built += 1,
                Ok((dep, Err(e))) => warn!("prebundle of {dep} failed: {e}"),
                Err(e) => warn!("prebundle task panicked: {e}"),
            }
        }

        self.write_meta(&PrebundleMeta { hash: digest }).await?;
        Ok(built)
    }

    /// Serve-path entry: return the artifact for `specifier`, building it
    /// first if needed. Concurrent callers for the same key attach to one
    /// in-flight build.
    pub async fn bundle_on_demand(&self, specifier: &str) -> Result<PathBuf> {
        let spec = BareSpecifier::parse(specifier).ok_or_else(|| DevError::Resolve {
            specifier: specifier.to_string(),
            reason: "not a bare specifier".to_string(),
        })?;
        let artifact = self.artifact_path(&spec);
        if artifact.is_file() {
            return Ok(artifact);
        }

        let cell = {
            let mut inflight = self.inflight.lock();
            Arc::clone(inflight.entry(spec.cache_key()).or_default())
        };
        cell.get_or_try_init(|| async {
            bundle_dependency(&self.resolver, &self.transpiler, specifier, &artifact).await?;
            Ok(artifact.clone())
        })
        .await
        .cloned()
    }

    /// Read the stored invalidation record, if any.
    pub async fn read_meta(&self) -> Option<PrebundleMeta> {
        let text = tokio::fs::read_to_string(self.deps_dir.join(META_FILE))
            .await
            .ok()?;
        serde_json::from_str(&text).ok()
    }

    async fn write_meta(&self, meta: &PrebundleMeta) -> Result<()> {
        let text = serde_json::to_string_pretty(meta)?;
        tokio::fs::write(self.deps_dir.join(META_FILE), text).await?;
        Ok(())
    }
}

/// Resolve and bundle one dependency into its artifact file.
async fn bundle_dependency(
    resolver: &ModuleResolver,
    transpiler: &Transpiler,
    specifier: &str,
    artifact: &Path,
) -> Result<()> {
    let entry = resolver.resolve(specifier)?;
    transpiler.bundle(specifier, &entry, artifact).await
}

/// Stable digest of the sorted dependency set.
pub fn digest_dependency_set(deps: &BTreeSet<String>) -> String {
    let mut hasher = blake3::Hasher::new();
    for dep in deps {
        hasher.update(dep.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

/// Resolve one relative import of the walk to a source file, trying the
/// path itself, the walkable extensions, then index files.
fn resolve_walk_target(dir: &Path, relative: &str) -> Option<PathBuf> {
    let base = dir.join(relative);
    if base.is_file() {
        return has_walk_extension(&base).then_some(base);
    }
    let raw = base.as_os_str().to_string_lossy();
    for ext in WALK_EXTENSIONS {
        let candidate = PathBuf::from(format!("{raw}.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    for ext in WALK_EXTENSIONS {
        let candidate = base.join(format!("index.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn has_walk_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| WALK_EXTENSIONS.contains(&e))
}
