//! Plugin host.
//!
//! Plugins are ordered; each transform hook sees the previous hook's
//! output, modeled as a fold over owned strings so hooks stay
//! reentrant-safe. Hook failures in the hot-update chain are logged and
//! never abort the chain.

use crate::error::Result;
use crate::hmr::HmrMessage;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, warn};

/// Context handed to `server_start` hooks.
#[derive(Debug, Clone)]
pub struct ServerContext {
    /// Absolute project root.
    pub root_dir: std::path::PathBuf,
    /// URL the server is reachable at.
    pub server_url: String,
}

/// A named plugin with optional entry points.
///
/// All hooks default to no-ops so plugins implement only what they need.
pub trait Plugin: Send + Sync {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Rewrite served source text. Receives the previous plugin's output.
    fn transform(&self, code: String, _id: &Path) -> Result<String> {
        Ok(code)
    }

    /// React to a source-file change before the update broadcast goes
    /// out. `broadcast` delivers a message to every connected client.
    fn hot_update(&self, _file: &Path, _broadcast: &dyn Fn(HmrMessage)) {}

    /// Called once, after the listener is bound.
    fn server_start(&self, _ctx: &ServerContext) {}
}

/// Built-in plugin turning CSS into a self-installing JavaScript module.
///
/// The served module inserts a `<style>` element holding the original
/// CSS literal, which makes stylesheet edits hot-swappable without a
/// page reload.
pub struct CssPlugin;

impl Plugin for CssPlugin {
    fn name(&self) -> &str {
        "core:css"
    }

    fn transform(&self, code: String, id: &Path) -> Result<String> {
        if id.extension().and_then(|e| e.to_str()) != Some("css") {
            return Ok(code);
        }
        let literal = serde_json::to_string(&code)?;
        let id_literal = serde_json::to_string(&id.to_string_lossy())?;
        Ok(format!(
            r#"const css = {literal};
const id = {id_literal};
let style = document.querySelector(`style[data-dev-id=${{JSON.stringify(id)}}]`);
if (!style) {{
  style = document.createElement('style');
  style.setAttribute('data-dev-id', id);
  document.head.appendChild(style);
}}
style.textContent = css;
export default css;
"#
        ))
    }
}

/// Ordered plugin chain. User plugins run first, in registration order,
/// followed by the built-in CSS plugin.
pub struct PluginHost {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginHost {
    /// Build the chain from user plugins plus the built-ins.
    pub fn new(user_plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let mut plugins = user_plugins;
        plugins.push(Arc::new(CssPlugin));
        Self { plugins }
    }

    /// Fold `code` through every transform hook in order.
    pub fn apply_transforms(&self, code: String, id: &Path) -> Result<String> {
        let mut current = code;
        for plugin in &self.plugins {
            current = plugin.transform(current, id).map_err(|e| {
                error!("plugin {} transform failed for {}: {e}", plugin.name(), id.display());
                e
            })?;
        }
        Ok(current)
    }

    /// Run every hot-update hook. A panicking or failing hook is logged
    /// and the chain continues.
    pub fn run_hot_update(&self, file: &Path, broadcast: &dyn Fn(HmrMessage)) {
        for plugin in &self.plugins {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                plugin.hot_update(file, broadcast);
            }));
            if outcome.is_err() {
                warn!("plugin {} hot_update hook panicked", plugin.name());
            }
        }
    }

    /// Run every server-start hook.
    pub fn run_server_start(&self, ctx: &ServerContext) {
        for plugin in &self.plugins {
            plugin.server_start(ctx);
        }
    }
}
