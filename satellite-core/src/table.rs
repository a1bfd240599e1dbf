//! The live, file-backed route table (C6). Lookup iterates routes in
//! declaration order; the first matching glob wins. Reload re-parses the
//! manifest and, on success, atomically swaps in a new snapshot -- an
//! in-flight request always finishes against the snapshot it captured at
//! entry, never a torn intermediate state (spec §5, REDESIGN FLAG #1).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::condition::{ConditionSet, ConditionSetDoc};
use crate::error::LoadError;
use crate::route::{Route, RouteDoc};

/// One immutable point-in-time view of the route table plus its global
/// conditions overlay.
pub struct RouteTableSnapshot {
    pub routes: Vec<Route>,
    global_conditions: ConditionSetDoc,
}

impl RouteTableSnapshot {
    /// First route whose glob matches `uri`, with its conditions merged
    /// under the global overlay (route wins on conflict, lists
    /// concatenate). Falls back to synthesizing an anonymous route when a
    /// real file exists beneath `root` at `uri`.
    pub fn match_uri(&self, uri: &str, root: &Path) -> Option<Route> {
        for route in &self.routes {
            if route.glob.matches(uri) {
                let merged_doc = route.conditions_doc.clone().merge_under(&self.global_conditions);
                let conditions = ConditionSet::compile(&merged_doc).unwrap_or_else(|_| route.conditions.clone());
                return Some(Route {
                    pattern: route.pattern.clone(),
                    glob: route.glob.clone(),
                    artifact: route.artifact.clone(),
                    content_type: route.content_type.clone(),
                    disposition: route.disposition.clone(),
                    on_failure: route.on_failure.clone(),
                    conditions,
                    conditions_doc: merged_doc,
                });
            }
        }

        let candidate = root.join(uri.trim_start_matches('/'));
        if let Ok(meta) = fs::metadata(&candidate) {
            if meta.is_file() {
                return Some(Route::anonymous(uri));
            }
        }
        None
    }

    /// Look up a route strictly by exact pattern, bypassing glob matching.
    /// Used by `on_failure.render` / `not_found.render` to serve a decoy's
    /// backing artifact without re-running its own conditions.
    pub fn by_pattern(&self, pattern: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.pattern == pattern)
    }
}

pub struct RouteTable {
    root: PathBuf,
    manifest_path: PathBuf,
    global_conditions_path: Option<PathBuf>,
    snapshot: ArcSwap<RouteTableSnapshot>,
}

impl RouteTable {
    /// `manifest_path` is `{server_root}/pathList.yml`.
    pub fn load(
        root: impl Into<PathBuf>,
        manifest_path: impl Into<PathBuf>,
        global_conditions_path: Option<PathBuf>,
    ) -> Result<RouteTable, LoadError> {
        let root = root.into();
        let manifest_path = manifest_path.into();
        let snapshot = build_snapshot(&manifest_path, global_conditions_path.as_deref())?;
        Ok(RouteTable {
            root,
            manifest_path,
            global_conditions_path,
            snapshot: ArcSwap::from_pointee(snapshot),
        })
    }

    /// Current snapshot. Callers MUST capture this once per request and
    /// use it for the request's whole lifetime so a concurrent reload
    /// cannot be observed mid-request.
    pub fn current(&self) -> Arc<RouteTableSnapshot> {
        self.snapshot.load_full()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Re-parses the manifest (and global conditions directory). On
    /// success, atomically publishes a new snapshot. On failure, the
    /// existing snapshot is retained and the error is returned for the
    /// caller to log.
    pub fn reload(&self) -> Result<(), LoadError> {
        let snapshot = build_snapshot(&self.manifest_path, self.global_conditions_path.as_deref())?;
        self.snapshot.store(Arc::new(snapshot));
        Ok(())
    }
}

fn build_snapshot(
    manifest_path: &Path,
    global_conditions_path: Option<&Path>,
) -> Result<RouteTableSnapshot, LoadError> {
    let routes = if manifest_path.exists() {
        let raw = fs::read_to_string(manifest_path).map_err(|source| LoadError::Read {
            path: manifest_path.to_path_buf(),
            source,
        })?;
        let docs: Vec<RouteDoc> = serde_yaml::from_str(&raw).map_err(|source| LoadError::Parse {
            path: manifest_path.to_path_buf(),
            source,
        })?;
        docs.iter().map(Route::compile).collect::<Result<Vec<_>, _>>()?
    } else {
        Vec::new()
    };

    let global_conditions = match global_conditions_path {
        Some(dir) if dir.is_dir() => load_global_conditions(dir)?,
        _ => ConditionSetDoc::default(),
    };

    Ok(RouteTableSnapshot {
        routes,
        global_conditions,
    })
}

/// Parses every file under `dir` as a `ConditionSetDoc` and merges them,
/// first file (in directory-listing order) winning on scalar conflicts.
fn load_global_conditions(dir: &Path) -> Result<ConditionSetDoc, LoadError> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| LoadError::GlobalConditions {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    let mut merged = ConditionSetDoc::default();
    for path in entries {
        let raw = fs::read_to_string(&path).map_err(|source| LoadError::Read {
            path: path.clone(),
            source,
        })?;
        let doc: ConditionSetDoc = serde_yaml::from_str(&raw).map_err(|source| LoadError::Parse { path, source })?;
        merged = merged.merge_under(&doc);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("pathList.yml");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn first_matching_route_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            r#"
- path: /a
  hosted_file: /a
- path: "/**"
  hosted_file: /fallback
"#,
        );
        let table = RouteTable::load(dir.path(), dir.path().join("pathList.yml"), None).unwrap();
        let snapshot = table.current();
        let route = snapshot.match_uri("/a", dir.path()).unwrap();
        assert_eq!(route.pattern, "/a");
    }

    #[test]
    fn missing_manifest_yields_empty_table_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let table = RouteTable::load(dir.path(), dir.path().join("pathList.yml"), None).unwrap();
        assert!(table.current().routes.is_empty());
    }

    #[test]
    fn reload_failure_preserves_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "- path: /a\n  hosted_file: /a\n");
        let table = RouteTable::load(dir.path(), dir.path().join("pathList.yml"), None).unwrap();
        assert_eq!(table.current().routes.len(), 1);

        write_manifest(dir.path(), "not: [valid, yaml for a route list");
        assert!(table.reload().is_err());
        assert_eq!(table.current().routes.len(), 1);
    }

    #[test]
    fn anonymous_fallback_serves_real_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("loose.txt"), b"hi").unwrap();
        let table = RouteTable::load(dir.path(), dir.path().join("pathList.yml"), None).unwrap();
        let snapshot = table.current();
        let route = snapshot.match_uri("/loose.txt", dir.path()).unwrap();
        assert_eq!(route.pattern, "/loose.txt");
    }

    #[test]
    fn global_conditions_merge_under_route_conditions() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "- path: /a\n  hosted_file: /a\n  serve: 5\n");
        let globals_dir = dir.path().join("globals");
        fs::create_dir_all(&globals_dir).unwrap();
        fs::write(globals_dir.join("01.yml"), "serve: 1\nauthorized_methods: [GET]\n").unwrap();

        let table = RouteTable::load(dir.path(), dir.path().join("pathList.yml"), Some(globals_dir)).unwrap();
        let snapshot = table.current();
        let route = snapshot.match_uri("/a", dir.path()).unwrap();
        assert_eq!(route.conditions_doc.serve, Some(5));
        assert_eq!(route.conditions_doc.authorized_methods, Some(vec!["GET".to_string()]));
    }
}
