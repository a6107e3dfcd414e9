use tracing::{error, info, warn};

/// Thin façade over `tracing`: a handful of named call sites for the
/// lifecycle events a developer actually watches scroll by, instead of
/// ad-hoc `info!` calls scattered through the core.
pub struct Logger;

impl Logger {
    pub fn init() {
        tracing_subscriber::fmt()
            .with_env_filter("sprig=info,warn")
            .with_target(false)
            .without_time()
            .init();
    }

    pub fn server_listening(host: &str, port: u16) {
        info!("🌱 sprig dev server ready on http://{}:{}", host, port);
    }

    pub fn prebundle_start(count: usize) {
        info!("📦 prebundling {} dependencies...", count);
    }

    pub fn prebundle_hit(specifier: &str) {
        info!("  ↳ {} (cached)", specifier);
    }

    pub fn prebundle_built(specifier: &str, millis: u128) {
        info!("  ↳ {} ({}ms)", specifier, millis);
    }

    pub fn prebundle_failed(specifier: &str, reason: &str) {
        warn!("prebundle failed for {}: {}", specifier, reason);
    }

    pub fn hmr_update(path: &str, clients: usize) {
        info!("🔥 update {} -> {} client(s)", path, clients);
    }

    pub fn hmr_full_reload(reason: &str) {
        info!("🔄 full reload: {}", reason);
    }

    pub fn watcher_error(message: &str) {
        warn!("watcher: {}", message);
    }

    pub fn plugin_error(plugin: &str, message: &str) {
        warn!("plugin \"{}\" hook failed: {}", plugin, message);
    }

    pub fn error(msg: &str) {
        error!("{}", msg);
    }

    pub fn warn(msg: &str) {
        warn!("{}", msg);
    }

    pub fn info(msg: &str) {
        info!("{}", msg);
    }
}
