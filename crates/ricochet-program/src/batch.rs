//! Parallel loading of program directories

use crate::loader::load_program;
use crate::program::Program;
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use ricochet_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Default file patterns for program files
pub const DEFAULT_INCLUDE: &[&str] = &["*.yaml", "*.yml", "*.json"];

/// Finds and loads program files below a directory
pub struct BatchLoader {
    include: GlobSet,
    exclude: GlobSet,
}

impl BatchLoader {
    pub fn new() -> Result<Self> {
        Self::with_patterns(DEFAULT_INCLUDE, &[])
    }

    /// Patterns are matched against file names
    pub fn with_patterns(include: &[&str], exclude: &[&str]) -> Result<Self> {
        Ok(Self {
            include: build_set(include)?,
            exclude: build_set(exclude)?,
        })
    }

    /// Program files below `dir`, sorted
    pub fn discover(&self, dir: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let name = e.file_name();
                self.include.is_match(name) && !self.exclude.is_match(name)
            })
            .map(|e| e.path().to_path_buf())
            .collect();
        paths.sort();
        info!("Found {} program files in {:?}", paths.len(), dir);
        paths
    }

    /// Load every file in parallel
    pub fn load_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Result<Program>)> {
        let total = paths.len();
        let loaded = AtomicUsize::new(0);
        paths
            .par_iter()
            .map(|path| {
                let result = load_program(path);
                let current = loaded.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("Loaded {}/{}: {:?}", current, total, path);
                (path.clone(), result)
            })
            .collect()
    }

    pub fn load_directory(&self, dir: &Path) -> Vec<(PathBuf, Result<Program>)> {
        let paths = self.discover(dir);
        self.load_files(&paths)
    }
}

fn build_set(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("bad pattern `{}`: {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PROGRAM: &str = "methods:\n  - name: main\n    locals: { a: A }\n    body: [a = new A]\n";

    #[test]
    fn test_discover_and_load() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one.yaml"), PROGRAM).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/two.yml"), PROGRAM).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join("broken.yaml"), "methods: [{name: f, body: [\"??\"]}]").unwrap();

        let loader = BatchLoader::new().unwrap();
        let results = loader.load_directory(dir.path());
        assert_eq!(results.len(), 3);
        let ok = results.iter().filter(|(_, r)| r.is_ok()).count();
        assert_eq!(ok, 2);
    }

    #[test]
    fn test_exclude() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.yaml"), PROGRAM).unwrap();
        fs::write(dir.path().join("skip.draft.yaml"), PROGRAM).unwrap();

        let loader = BatchLoader::with_patterns(&["*.yaml"], &["*.draft.yaml"]).unwrap();
        let paths = loader.discover(dir.path());
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("keep.yaml"));
    }

    #[test]
    fn test_bad_pattern() {
        assert!(BatchLoader::with_patterns(&["a[b"], &[]).is_err());
    }
}
