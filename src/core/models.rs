//! The data model shared by every dev-server component.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::plugin::Plugin;

/// Parsed once at startup, immutable for the server's lifetime.
#[derive(Clone)]
pub struct ProjectConfig {
    pub root_dir: PathBuf,
    pub src_dir: PathBuf,
    pub entry_file: PathBuf,
    pub index_html_path: PathBuf,
    pub listen_host: String,
    pub listen_port: u16,
    pub open_browser_on_start: bool,
    pub resolve: ResolveConfig,
    pub plugins: Vec<Arc<dyn Plugin>>,
}

impl std::fmt::Debug for ProjectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectConfig")
            .field("root_dir", &self.root_dir)
            .field("src_dir", &self.src_dir)
            .field("entry_file", &self.entry_file)
            .field("listen_host", &self.listen_host)
            .field("listen_port", &self.listen_port)
            .field("open_browser_on_start", &self.open_browser_on_start)
            .field("resolve", &self.resolve)
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

impl ProjectConfig {
    /// `<root_dir>/.react-client/deps` — where prebundle artifacts live.
    pub fn prebundle_dir(&self) -> PathBuf {
        self.root_dir.join(".react-client").join("deps")
    }

    pub fn public_dir(&self) -> PathBuf {
        self.root_dir.join("public")
    }

    /// The manifest the Prebundle Cache watches for wholesale invalidation.
    pub fn manifest_path(&self) -> PathBuf {
        self.root_dir.join("package.json")
    }
}

/// Conditions and fields used while walking `package.json#exports`/fallback
/// fields. `conditions` is a configurable, ordered list rather than a fixed
/// pair, so a project can add its own (e.g. `worker`) ahead of `default`.
#[derive(Debug, Clone)]
pub struct ResolveConfig {
    pub conditions: Vec<String>,
    pub main_fields: Vec<String>,
    pub alias: std::collections::HashMap<String, String>,
    pub extensions: Vec<String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            conditions: vec![
                "import".to_string(),
                "module".to_string(),
                "browser".to_string(),
                "default".to_string(),
            ],
            main_fields: vec!["module".to_string(), "browser".to_string(), "main".to_string()],
            alias: std::collections::HashMap::new(),
            extensions: vec![
                ".tsx".to_string(),
                ".ts".to_string(),
                ".jsx".to_string(),
                ".js".to_string(),
                ".mjs".to_string(),
                ".json".to_string(),
            ],
        }
    }
}

/// A module id not starting with `.` or `/` (e.g. `react`, `@scope/pkg`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BareSpecifier {
    raw: String,
    package_root_len: usize,
}

impl BareSpecifier {
    /// Returns `None` if `raw` is relative (`./`, `../`) or absolute (`/`).
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.starts_with('.') || raw.starts_with('/') {
            return None;
        }

        let package_root_len = if raw.starts_with('@') {
            // Scoped package: first two path segments.
            let mut iter = raw.match_indices('/');
            match iter.next().and_then(|_| iter.next()) {
                Some((second_slash, _)) => second_slash,
                None => raw.len(),
            }
        } else {
            raw.find('/').unwrap_or(raw.len())
        };

        Some(Self {
            raw: raw.to_string(),
            package_root_len,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// First segment (`lodash`), or first two for scoped packages (`@scope/pkg`).
    pub fn package_root(&self) -> &str {
        &self.raw[..self.package_root_len]
    }

    /// Everything after the package root, without the leading slash.
    pub fn subpath(&self) -> Option<&str> {
        let rest = &self.raw[self.package_root_len..];
        rest.strip_prefix('/').filter(|s| !s.is_empty())
    }

    /// Flat artifact filename for this specifier. Literal underscores are
    /// escaped to `__` before path separators are collapsed to `_`, so
    /// distinct specifiers never collide on the same encoded key (e.g.
    /// `react-dom/client` and `react-dom_client` encode differently).
    pub fn cache_key(&self) -> String {
        self.raw.replace('_', "__").replace('/', "_")
    }
}

impl std::fmt::Display for BareSpecifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Absolute filesystem path produced by the Module Resolver.
pub type ResolvedEntry = PathBuf;

/// `{hash: <digest of sorted direct-dependency set>}`, persisted alongside
/// the prebundle artifacts as `_meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrebundleMeta {
    pub hash: String,
    #[serde(default)]
    pub conditions: Vec<String>,
}

/// A tagged HMR wire message. `#[serde(tag = "type")]` reproduces the exact
/// `{"type": "...", ...}` shape the browser client expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HmrMessage {
    Update { path: String },
    Error { message: String, stack: String },
    Reload,
}

/// Source-file extensions the Transform Cache / HTTP router will serve.
/// Order matters: it is the extension-guessing order when a URL has none.
pub const SOURCE_EXTENSIONS: &[&str] = &[".tsx", ".ts", ".jsx", ".js", ".css"];

pub fn has_known_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| SOURCE_EXTENSIONS.iter().any(|known| known.trim_start_matches('.') == ext))
        .unwrap_or(false)
}
