//! Transform Cache and Prebundle Cache: the in-memory transform cache is a
//! plain concurrent map with no disk tier (entries are ephemeral and rebuilt
//! on a cache miss), while the prebundle cache tracks in-flight builds so
//! concurrent requests for the same dependency collapse into one build.

use crate::core::models::{BareSpecifier, PrebundleMeta, ResolvedEntry};
use crate::resolver::Resolver;
use crate::transform::scan_bare_imports;
use crate::utils::errors::SprigError;
use crate::utils::logging::Logger;
use crate::utils::Result;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

/// In-memory mapping from absolute source path to transformed output text.
/// Invalidated by the watcher on change.
#[derive(Default)]
pub struct TransformCache {
    entries: DashMap<PathBuf, String>,
}

impl TransformCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.entries.get(path).map(|e| e.clone())
    }

    pub fn insert(&self, path: PathBuf, code: String) {
        self.entries.insert(path, code);
    }

    pub fn invalidate(&self, path: &Path) {
        self.entries.remove(path);
    }
}

/// One in-flight (or just-finished) prebundle build, shared by every reader
/// that asks for the same cache key while it's running.
struct BuildSlot {
    notify: Notify,
    claimed: std::sync::Mutex<bool>,
}

/// Discovers third-party dependencies reachable from the entry file, builds
/// them into browser-ESM artifacts, and serves `/@modules/<specifier>`.
pub struct PrebundleCache {
    root_dir: PathBuf,
    resolver: Arc<Resolver>,
    semaphore: Arc<Semaphore>,
    in_flight: DashMap<String, Arc<BuildSlot>>,
}

impl PrebundleCache {
    pub fn new(root_dir: PathBuf, resolver: Arc<Resolver>, concurrency: usize) -> Self {
        Self {
            root_dir,
            resolver,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            in_flight: DashMap::new(),
        }
    }

    fn deps_dir(&self) -> PathBuf {
        self.root_dir.join(".react-client").join("deps")
    }

    fn meta_path(&self) -> PathBuf {
        self.deps_dir().join("_meta.json")
    }

    fn artifact_path(&self, specifier: &BareSpecifier) -> PathBuf {
        self.deps_dir().join(format!("{}.js", specifier.cache_key()))
    }

    /// Walks the project source tree (never third-party code) from
    /// `entry_file`, collecting every reachable bare specifier.
    pub fn scan_direct_dependencies(&self, entry_file: &Path) -> Result<BTreeSet<String>> {
        let mut seen_files = HashSet::new();
        let mut queue = VecDeque::new();
        let mut deps = BTreeSet::new();

        queue.push_back(entry_file.to_path_buf());
        seen_files.insert(entry_file.to_path_buf());

        while let Some(path) = queue.pop_front() {
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            for specifier in scan_bare_imports(&content) {
                if specifier.starts_with('.') || specifier.starts_with('/') {
                    let base = path.parent().unwrap_or(&self.root_dir);
                    let candidate = base.join(&specifier);
                    if !seen_files.contains(&candidate) {
                        seen_files.insert(candidate.clone());
                        queue.push_back(candidate);
                    }
                } else {
                    deps.insert(specifier);
                }
            }
            // Relative imports without an extension or bare module names are
            // the only two shapes scan_bare_imports can return; project
            // source files that import each other relatively stay inside
            // the walk, matching "does not recurse through third-party code".
        }

        Ok(deps)
    }

    fn digest(deps: &BTreeSet<String>) -> String {
        let joined = deps.iter().cloned().collect::<Vec<_>>().join(",");
        blake3::hash(joined.as_bytes()).to_hex().to_string()
    }

    fn read_meta(&self) -> Option<PrebundleMeta> {
        let content = std::fs::read_to_string(self.meta_path()).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn write_meta(&self, meta: &PrebundleMeta) -> Result<()> {
        std::fs::create_dir_all(self.deps_dir())?;
        let content = serde_json::to_string_pretty(meta)?;
        std::fs::write(self.meta_path(), content)?;
        Ok(())
    }

    /// Recomputes the direct dependency set and rebuilds any artifact whose
    /// cache key is missing on disk, or whose manifest hash no longer
    /// matches. Called at startup and whenever the project manifest
    /// changes.
    pub async fn refresh(self: &Arc<Self>, entry_file: &Path, conditions: &[String]) -> Result<()> {
        let deps = self.scan_direct_dependencies(entry_file)?;
        let hash = Self::digest(&deps);
        let stale = self
            .read_meta()
            .map(|meta| meta.hash != hash || meta.conditions != conditions)
            .unwrap_or(true);

        Logger::prebundle_start(deps.len());

        let mut handles = Vec::new();
        for raw in &deps {
            let Some(specifier) = BareSpecifier::parse(raw) else {
                continue;
            };
            let needs_build = stale || !self.artifact_path(&specifier).is_file();
            if !needs_build {
                Logger::prebundle_hit(raw);
                continue;
            }
            let this = self.clone();
            let importer = entry_file.to_path_buf();
            handles.push(tokio::spawn(async move {
                this.build_one(specifier, importer).await
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        self.write_meta(&PrebundleMeta {
            hash,
            conditions: conditions.to_vec(),
        })?;

        Ok(())
    }

    /// Ensures an artifact exists for `specifier`, building it if necessary.
    /// Concurrent callers for the same cache key collapse into one build.
    pub async fn ensure_built(&self, specifier: BareSpecifier, importer: PathBuf) -> Result<PathBuf> {
        let artifact = self.artifact_path(&specifier);
        if artifact.is_file() {
            return Ok(artifact);
        }

        let key = specifier.as_str().to_string();
        let slot = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(BuildSlot {
                    notify: Notify::new(),
                    claimed: std::sync::Mutex::new(false),
                })
            })
            .clone();

        // Only the entry that actually inserted this slot should drive the
        // build; everyone else awaits the notification.
        let is_owner = {
            let mut claimed = slot.claimed.lock().unwrap();
            let was_claimed = *claimed;
            *claimed = true;
            !was_claimed
        };

        if is_owner {
            let outcome = self.build_one(specifier.clone(), importer).await;
            self.in_flight.remove(&key);
            slot.notify.notify_waiters();
            outcome.map(|_| artifact)
        } else {
            slot.notify.notified().await;
            if artifact.is_file() {
                Ok(artifact)
            } else {
                Err(SprigError::bundle(specifier.as_str(), "build failed in peer request"))
            }
        }
    }

    async fn build_one(&self, specifier: BareSpecifier, importer: PathBuf) -> Result<()> {
        let _permit = self.semaphore.acquire().await.map_err(|e| {
            SprigError::bundle(specifier.as_str(), format!("semaphore closed: {}", e))
        })?;

        let started = std::time::Instant::now();
        let resolver = self.resolver.clone();
        let artifact_path = self.artifact_path(&specifier);
        let deps_dir = self.deps_dir();
        let raw = specifier.as_str().to_string();

        let result = tokio::task::spawn_blocking(move || -> Result<()> {
            let entry = resolver.resolve(&raw, &importer)?;
            let bundled = bundle_scope_hoisted(&entry, &resolver)?;
            std::fs::create_dir_all(&deps_dir)?;
            std::fs::write(&artifact_path, bundled)?;
            Ok(())
        })
        .await
        .map_err(|e| SprigError::bundle(specifier.as_str(), format!("join error: {}", e)))?;

        match result {
            Ok(()) => {
                Logger::prebundle_built(specifier.as_str(), started.elapsed().as_millis());
                Ok(())
            }
            Err(err) => {
                Logger::prebundle_failed(specifier.as_str(), &err.to_string());
                Err(err)
            }
        }
    }
}

/// Internal scope-hoisting bundler: concatenates a package's reachable
/// relative-import graph into one self-contained module. Bare specifiers
/// found inside third-party source (the package's own dependencies) are
/// rewritten to `/@modules/<dep>` rather than inlined, so shared
/// dependencies aren't duplicated across artifacts.
fn bundle_scope_hoisted(entry: &ResolvedEntry, resolver: &Resolver) -> Result<String> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(entry.clone());
    seen.insert(entry.clone());

    while let Some(path) = queue.pop_front() {
        let content = std::fs::read_to_string(&path)?;
        let mut local_deps = Vec::new();
        for specifier in scan_bare_imports(&content) {
            if specifier.starts_with('.') {
                if let Ok(resolved) = resolver.resolve(&specifier, &path) {
                    if seen.insert(resolved.clone()) {
                        queue.push_back(resolved);
                    }
                }
            } else {
                local_deps.push(specifier);
            }
        }
        order.push((path, content, local_deps));
    }

    let mut output = String::new();
    for (index, (path, content, nested_deps)) in order.iter().enumerate() {
        let rewritten = rewrite_nested_bare_imports(content, nested_deps);
        output.push_str(&format!("// --- module {} ({}) ---\n", index, path.display()));
        output.push_str(&rewritten);
        output.push('\n');
    }

    Ok(output)
}

fn rewrite_nested_bare_imports(content: &str, nested_deps: &[String]) -> String {
    let mut rewritten = content.to_string();
    for dep in nested_deps {
        let from = format!("\"{}\"", dep);
        let to = format!("\"/@modules/{}\"", dep);
        rewritten = rewritten.replace(&from, &to);
        let from_single = format!("'{}'", dep);
        let to_single = format!("'/@modules/{}'", dep);
        rewritten = rewritten.replace(&from_single, &to_single);
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ResolveConfig;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(
            root.join("src").join("main.tsx"),
            r#"import React from "react";
import { helper } from "./helper";
import("react-dom/client");
"#,
        )
        .unwrap();
        fs::write(root.join("src").join("helper.ts"), "export const helper = 1;").unwrap();
        (tmp, root)
    }

    #[test]
    fn scans_direct_dependency_set_across_relative_imports() {
        let (_tmp, root) = project();
        let resolver = Arc::new(Resolver::new(root.clone(), ResolveConfig::default()));
        let cache = PrebundleCache::new(root.clone(), resolver, 2);
        let deps = cache
            .scan_direct_dependencies(&root.join("src").join("main.tsx"))
            .unwrap();
        assert_eq!(
            deps,
            BTreeSet::from(["react".to_string(), "react-dom/client".to_string()])
        );
    }

    #[test]
    fn digest_is_stable_for_same_set() {
        let a = BTreeSet::from(["react".to_string(), "react-dom/client".to_string()]);
        let b = BTreeSet::from(["react-dom/client".to_string(), "react".to_string()]);
        assert_eq!(PrebundleCache::digest(&a), PrebundleCache::digest(&b));
    }

    #[test]
    fn cache_key_is_injective_for_distinct_specifiers() {
        let a = BareSpecifier::parse("react-dom/client").unwrap();
        let b = BareSpecifier::parse("react-dom_client").unwrap();
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "react-dom_client");
        assert_eq!(b.cache_key(), "react-dom__client");
    }

    #[test]
    fn cache_key_round_trips_through_escaping() {
        let specifiers = [
            "react-dom/client",
            "react-dom_client",
            "@scope/pkg",
            "@scope_pkg",
            "a/b_c",
            "a_b/c",
        ];
        let keys: HashSet<String> = specifiers
            .iter()
            .map(|s| BareSpecifier::parse(s).unwrap().cache_key())
            .collect();
        assert_eq!(keys.len(), specifiers.len());
    }

    #[test]
    fn transform_cache_round_trips_and_invalidates() {
        let cache = TransformCache::new();
        let path = PathBuf::from("/project/src/App.tsx");
        assert!(cache.get(&path).is_none());
        cache.insert(path.clone(), "compiled".to_string());
        assert_eq!(cache.get(&path).unwrap(), "compiled");
        cache.invalidate(&path);
        assert!(cache.get(&path).is_none());
    }
}
