//! Module Resolver. Maps a [`BareSpecifier`] to an absolute file on disk,
//! honoring a package's `exports` map, conditional exports, and fallback
//! entry fields, with a process-lifetime `package.json` cache.

use crate::core::models::{BareSpecifier, ResolveConfig, ResolvedEntry};
use crate::utils::errors::SprigError;
use crate::utils::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, Serialize)]
struct PackageJson {
    main: Option<String>,
    module: Option<String>,
    browser: Option<BrowserField>,
    exports: Option<ExportsField>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum BrowserField {
    String(String),
    Map(HashMap<String, serde_json::Value>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum ExportsField {
    String(String),
    Map(HashMap<String, ExportEntry>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum ExportEntry {
    String(String),
    Conditional(HashMap<String, serde_json::Value>),
}

/// Caches parsed `package.json` files by absolute path for the process
/// lifetime, so a package shared by multiple importers is parsed once.
pub struct Resolver {
    root_dir: PathBuf,
    config: ResolveConfig,
    package_cache: Arc<Mutex<HashMap<PathBuf, Arc<PackageJson>>>>,
}

impl Resolver {
    pub fn new(root_dir: PathBuf, config: ResolveConfig) -> Self {
        Self {
            root_dir,
            config,
            package_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolves `specifier` (imported from `importer`) to an absolute,
    /// existing, regular file.
    pub fn resolve(&self, specifier: &str, importer: &Path) -> Result<ResolvedEntry> {
        if let Some(target) = self.config.alias.get(specifier) {
            return self.resolve(target, importer);
        }

        if specifier.starts_with('.') {
            let base = importer.parent().unwrap_or(&self.root_dir);
            return self
                .resolve_file_candidates(&base.join(specifier))
                .ok_or_else(|| SprigError::resolve(specifier, "no such relative file"));
        }

        if let Some(stripped) = specifier.strip_prefix('/') {
            return self
                .resolve_file_candidates(&self.root_dir.join(stripped))
                .ok_or_else(|| SprigError::resolve(specifier, "no such file under project root"));
        }

        let bare = BareSpecifier::parse(specifier)
            .ok_or_else(|| SprigError::resolve(specifier, "not a bare specifier"))?;
        self.resolve_bare(&bare, importer)
    }

    fn resolve_bare(&self, bare: &BareSpecifier, importer: &Path) -> Result<ResolvedEntry> {
        let package_dir = self
            .find_package_dir(bare.package_root(), importer)
            .ok_or_else(|| SprigError::resolve(bare.as_str(), "package not found in node_modules"))?;

        // Step 1: direct resolution (a relative path inside the package acts
        // like a normal file lookup once the package root is known).
        if let Some(subpath) = bare.subpath() {
            if let Some(found) = self.resolve_file_candidates(&package_dir.join(subpath)) {
                return Ok(found);
            }
        } else if let Some(found) = self.resolve_file_candidates(&package_dir) {
            return Ok(found);
        }

        // Step 2: package manifest lookup.
        let manifest = self.load_manifest(&package_dir);

        // Step 3: export map.
        if let Some(manifest) = &manifest {
            if let Some(exports) = &manifest.exports {
                if let Some(resolved) = self.resolve_exports(exports, bare.subpath())? {
                    let candidate = package_dir.join(resolved.trim_start_matches("./"));
                    if let Some(found) = self.resolve_file_candidates(&candidate) {
                        return Ok(found);
                    }
                }
            }
        }

        // Step 4: subpath direct, filesystem candidates relative to the
        // manifest's directory.
        if let Some(subpath) = bare.subpath() {
            if let Some(found) = self.resolve_file_candidates(&package_dir.join(subpath)) {
                return Ok(found);
            }
        }

        // Step 5: manifest fields, in configured preference order.
        if let Some(manifest) = &manifest {
            for field in &self.config.main_fields {
                let entry = match field.as_str() {
                    "module" => manifest.module.as_deref(),
                    "main" => manifest.main.as_deref(),
                    "browser" => match &manifest.browser {
                        Some(BrowserField::String(path)) => Some(path.as_str()),
                        _ => None,
                    },
                    _ => None,
                };
                if let Some(entry) = entry {
                    if let Some(found) = self.resolve_file_candidates(&package_dir.join(entry)) {
                        return Ok(found);
                    }
                }
            }
        }

        Err(SprigError::resolve(bare.as_str(), "ModuleNotFound"))
    }

    /// Walks the conditional-exports map using the resolver's configured
    /// condition order, falling back to a plain string value if present.
    fn resolve_exports(
        &self,
        exports: &ExportsField,
        subpath: Option<&str>,
    ) -> Result<Option<String>> {
        if let ExportsField::String(path) = exports {
            return Ok(if subpath.is_none() {
                Some(path.clone())
            } else {
                None
            });
        }

        let ExportsField::Map(map) = exports else {
            return Ok(None);
        };

        let keys: Vec<String> = match subpath {
            Some(s) => vec![format!("./{}", s), format!("./{}.js", s), format!("./{}.mjs", s)],
            None => vec![".".to_string(), "./index.js".to_string(), "./index.mjs".to_string()],
        };

        for key in &keys {
            if let Some(entry) = map.get(key) {
                if let Some(resolved) = self.resolve_export_entry(entry)? {
                    return Ok(Some(resolved));
                }
            }
        }
        Ok(None)
    }

    fn resolve_export_entry(&self, entry: &ExportEntry) -> Result<Option<String>> {
        match entry {
            ExportEntry::String(path) => Ok(Some(path.clone())),
            ExportEntry::Conditional(map) => {
                for condition in &self.config.conditions {
                    if let Some(serde_json::Value::String(path)) = map.get(condition) {
                        return Ok(Some(path.clone()));
                    }
                }
                if let Some(serde_json::Value::String(path)) = map.get("default") {
                    return Ok(Some(path.clone()));
                }
                // Any remaining string value, in insertion order.
                for value in map.values() {
                    if let serde_json::Value::String(path) = value {
                        return Ok(Some(path.clone()));
                    }
                }
                Ok(None)
            }
        }
    }

    fn find_package_dir(&self, package_root: &str, importer: &Path) -> Option<PathBuf> {
        let mut dir = importer.parent().unwrap_or(&self.root_dir);
        loop {
            let candidate = dir.join("node_modules").join(package_root);
            if candidate.is_dir() {
                return Some(candidate);
            }
            dir = dir.parent()?;
        }
    }

    fn load_manifest(&self, package_dir: &Path) -> Option<Arc<PackageJson>> {
        let manifest_path = package_dir.join("package.json");
        {
            let cache = self.package_cache.lock();
            if let Some(cached) = cache.get(&manifest_path) {
                return Some(cached.clone());
            }
        }

        let content = std::fs::read_to_string(&manifest_path).ok()?;
        let manifest: PackageJson = serde_json::from_str(&content).ok()?;
        let manifest = Arc::new(manifest);
        self.package_cache
            .lock()
            .insert(manifest_path, manifest.clone());
        Some(manifest)
    }

    /// Tries the exact path, then each configured extension, then
    /// `<path>/index.<ext>`. Returns the first candidate that is a regular
    /// existing file.
    fn resolve_file_candidates(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }

        for ext in &self.config.extensions {
            let candidate = PathBuf::from(format!("{}{}", path.display(), ext));
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        if path.is_dir() {
            for ext in &self.config.extensions {
                let candidate = path.join(format!("index{}", ext));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn resolves_exports_map_import_condition() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        let pkg = root.join("node_modules").join("widget");
        write(
            &pkg.join("package.json"),
            r#"{"exports": {".": {"import": "./esm.js", "default": "./cjs.js"}}}"#,
        );
        write(&pkg.join("esm.js"), "export const widget = 1;");
        write(&pkg.join("cjs.js"), "module.exports.widget = 1;");

        let resolver = Resolver::new(root.clone(), ResolveConfig::default());
        let importer = root.join("src").join("main.tsx");
        let resolved = resolver.resolve("widget", &importer).unwrap();
        assert_eq!(resolved, pkg.join("esm.js"));
    }

    #[test]
    fn falls_back_to_default_when_import_condition_absent() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        let pkg = root.join("node_modules").join("widget");
        write(
            &pkg.join("package.json"),
            r#"{"exports": {".": {"default": "./cjs.js"}}}"#,
        );
        write(&pkg.join("cjs.js"), "module.exports.widget = 1;");

        let resolver = Resolver::new(root.clone(), ResolveConfig::default());
        let importer = root.join("src").join("main.tsx");
        let resolved = resolver.resolve("widget", &importer).unwrap();
        assert_eq!(resolved, pkg.join("cjs.js"));
    }

    #[test]
    fn resolves_subpath_export_with_pattern_and_main_field_fallback() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        let pkg = root.join("node_modules").join("react-dom");
        write(&pkg.join("package.json"), r#"{"main": "index.js"}"#);
        write(&pkg.join("index.js"), "module.exports = {};");
        write(&pkg.join("client.js"), "export function createRoot() {}");

        let resolver = Resolver::new(root.clone(), ResolveConfig::default());
        let importer = root.join("src").join("main.tsx");

        let resolved = resolver.resolve("react-dom/client", &importer).unwrap();
        assert_eq!(resolved, pkg.join("client.js"));

        let resolved = resolver.resolve("react-dom", &importer).unwrap();
        assert_eq!(resolved, pkg.join("index.js"));
    }

    #[test]
    fn unknown_package_is_module_not_found() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        let resolver = Resolver::new(root.clone(), ResolveConfig::default());
        let importer = root.join("src").join("main.tsx");
        let err = resolver.resolve("does-not-exist", &importer).unwrap_err();
        assert!(err.as_js_comment().contains("does-not-exist"));
    }
}
