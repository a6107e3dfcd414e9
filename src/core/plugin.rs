//! Plugin host for the dev server: ordered hooks a consumer can register to
//! observe and modify the transform pipeline, hot-update handling, and
//! server startup.

use crate::core::models::HmrMessage;
use crate::utils::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A bound handle onto the HMR broadcaster, handed to plugin hooks so they
/// can push their own messages (e.g. a custom "ready" notification, or an
/// update triggered by something other than a file-change event).
#[derive(Clone)]
pub struct BroadcastHandle(broadcast::Sender<HmrMessage>);

impl BroadcastHandle {
    pub fn new(sender: broadcast::Sender<HmrMessage>) -> Self {
        Self(sender)
    }

    /// Push a message to every connected client. No receivers yet is not
    /// an error.
    pub fn send(&self, message: HmrMessage) {
        let _ = self.0.send(message);
    }
}

/// Handed to `on_server_start` so a plugin can react to the bound address or
/// push its own HMR message.
#[derive(Clone)]
pub struct PluginServerContext {
    pub addr: SocketAddr,
    broadcast: BroadcastHandle,
}

impl PluginServerContext {
    pub fn new(addr: SocketAddr, broadcast: broadcast::Sender<HmrMessage>) -> Self {
        Self {
            addr,
            broadcast: BroadcastHandle::new(broadcast),
        }
    }

    pub fn broadcast(&self, message: HmrMessage) {
        self.broadcast.send(message);
    }
}

/// Extension point a dev server consumer registers at startup. All hooks are
/// optional; the defaults are no-ops so a plugin only overrides what it
/// needs.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Called once the transform pipeline has produced `code` for
    /// `file_path`. Return `Some(code)` to replace it, `None` to pass it
    /// through unchanged.
    async fn on_transform(&self, _file_path: &Path, _code: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// Called whenever the watcher detects a changed file, before the
    /// broadcaster decides update-vs-reload. `broadcast` lets the plugin
    /// push its own HMR message directly. Returning `Ok(true)` forces a
    /// full reload regardless of the file's extension.
    async fn on_hot_update(&self, _file_path: &Path, _broadcast: &BroadcastHandle) -> Result<bool> {
        Ok(false)
    }

    /// Called once, after the HTTP listener is bound.
    async fn on_server_start(&self, _context: &PluginServerContext) -> Result<()> {
        Ok(())
    }
}

/// Runs the registered plugins' hooks in registration order.
#[derive(Clone, Default)]
pub struct PluginHost {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginHost {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Threads `code` through every plugin's `on_transform`, in registration
    /// order, each seeing the previous plugin's output.
    pub async fn run_transform(&self, file_path: &Path, mut code: String) -> Result<String> {
        for plugin in &self.plugins {
            if let Some(transformed) = plugin.on_transform(file_path, &code).await? {
                code = transformed;
            }
        }
        Ok(code)
    }

    /// Runs every plugin's `on_hot_update` hook in order. A failing
    /// plugin is logged and skipped — it never aborts the chain, so later
    /// plugins still see the change. Returns `true` if any plugin
    /// requested a full reload.
    pub async fn run_hot_update(&self, file_path: &Path, broadcast: &BroadcastHandle) -> bool {
        let mut force_reload = false;
        for plugin in &self.plugins {
            match plugin.on_hot_update(file_path, broadcast).await {
                Ok(true) => force_reload = true,
                Ok(false) => {}
                Err(err) => {
                    crate::utils::logging::Logger::plugin_error(plugin.name(), &err.to_string());
                }
            }
        }
        force_reload
    }

    pub async fn run_server_start(&self, context: &PluginServerContext) -> Result<()> {
        for plugin in &self.plugins {
            if let Err(err) = plugin.on_server_start(context).await {
                crate::utils::logging::Logger::plugin_error(plugin.name(), &err.to_string());
            }
        }
        Ok(())
    }
}
