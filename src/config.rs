//! Configuration loading — the one external collaborator the core still
//! needs a concrete type from. The core itself never parses JSON or reads
//! `sprig.config.json` directly; it receives a fully realized
//! `ProjectConfig`.
//!
//! `RawConfig` has every field optional so a project can omit any section
//! of `sprig.config.json`; `load()` applies the documented defaults and
//! produces the core's actual `ProjectConfig`.

use crate::core::models::{ProjectConfig, ResolveConfig};
use crate::core::plugin::Plugin;
use crate::utils::errors::SprigError;
use crate::utils::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default dev server port.
pub const DEFAULT_PORT: u16 = 5173;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    pub root: Option<String>,
    pub server: Option<RawServerConfig>,
    pub build: Option<RawBuildConfig>,
    pub resolve: Option<RawResolveConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawServerConfig {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub open: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBuildConfig {
    /// Unused by the core; kept so a shared config file doesn't fail to
    /// parse when it also configures the production build.
    #[serde(rename = "outDir")]
    pub out_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawResolveConfig {
    pub alias: Option<HashMap<String, String>>,
    pub conditions: Option<Vec<String>>,
}

/// Reads `<root>/sprig.config.json` if present, falling back to defaults,
/// then resolves the entry file and builds the immutable `ProjectConfig`
/// the core runs against.
pub fn load(root: &str, port_override: Option<u16>, plugins: Vec<Arc<dyn Plugin>>) -> Result<ProjectConfig> {
    let root_dir = PathBuf::from(root)
        .canonicalize()
        .map_err(|e| SprigError::config(format!("project root {} not found: {}", root, e)))?;

    let config_path = root_dir.join("sprig.config.json");
    let raw: RawConfig = if config_path.is_file() {
        let content = std::fs::read_to_string(&config_path)?;
        serde_json::from_str(&content)
            .map_err(|e| SprigError::config(format!("invalid sprig.config.json: {}", e)))?
    } else {
        RawConfig::default()
    };

    let src_dir = root_dir.join("src");
    let entry_file = find_entry_file(&src_dir)
        .ok_or_else(|| SprigError::config("no entry file found (expected src/main.tsx or src/main.jsx)"))?;

    let mut resolve = ResolveConfig::default();
    if let Some(raw_resolve) = &raw.resolve {
        if let Some(alias) = &raw_resolve.alias {
            resolve.alias = alias.clone();
        }
        if let Some(conditions) = &raw_resolve.conditions {
            resolve.conditions = conditions.clone();
        }
    }

    let listen_port = port_override
        .or_else(|| raw.server.as_ref().and_then(|s| s.port))
        .unwrap_or(DEFAULT_PORT);
    let listen_host = raw
        .server
        .as_ref()
        .and_then(|s| s.host.clone())
        .unwrap_or_else(|| "localhost".to_string());
    let open_browser_on_start = raw.server.as_ref().and_then(|s| s.open).unwrap_or(true);

    Ok(ProjectConfig {
        index_html_path: root_dir.join("index.html"),
        root_dir,
        src_dir,
        entry_file,
        listen_host,
        listen_port,
        open_browser_on_start,
        resolve,
        plugins,
    })
}

/// First of `{main.tsx, main.jsx}` that exists.
fn find_entry_file(src_dir: &Path) -> Option<PathBuf> {
    for name in ["main.tsx", "main.jsx"] {
        let candidate = src_dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn loads_defaults_when_no_config_file_present() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src").join("main.tsx"), "export {}").unwrap();
        fs::write(tmp.path().join("index.html"), "<html></html>").unwrap();

        let config = load(tmp.path().to_str().unwrap(), None, Vec::new()).unwrap();
        assert_eq!(config.listen_port, DEFAULT_PORT);
        assert!(config.open_browser_on_start);
        assert_eq!(config.entry_file.file_name().unwrap(), "main.tsx");
    }

    #[test]
    fn prefers_explicit_port_override_over_config_file() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src").join("main.jsx"), "export {}").unwrap();
        fs::write(
            tmp.path().join("sprig.config.json"),
            r#"{"server": {"port": 4000}}"#,
        )
        .unwrap();

        let config = load(tmp.path().to_str().unwrap(), Some(9999), Vec::new()).unwrap();
        assert_eq!(config.listen_port, 9999);
    }

    #[test]
    fn missing_entry_file_is_a_config_error() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        let err = load(tmp.path().to_str().unwrap(), None, Vec::new()).unwrap_err();
        assert!(matches!(err, SprigError::Config(_)));
    }
}
