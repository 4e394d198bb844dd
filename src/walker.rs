//! File Walker (C1): yields candidate files under a root, honoring
//! layered `.gitignore`/`.wbgrepignore` rules, a global ignore glob set,
//! and the code-extension allowlist.

use crate::config::Config;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{WalkBuilder, WalkState};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

/// Build the global ignore glob set from the built-in patterns plus any
/// user-supplied `ignore.extra_patterns` from config.
fn build_global_ignore(extra_patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in crate::config::GLOBAL_IGNORE_PATTERNS {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    for pattern in extra_patterns {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

/// Check whether a file is emittable: regular file, not excluded by the
/// global ignore set, and on the extension allowlist or a special
/// filename.
fn is_indexable(path: &Path, global_ignore: &GlobSet) -> bool {
    let basename = match path.file_name() {
        Some(n) => n.to_string_lossy().to_lowercase(),
        None => return false,
    };

    if global_ignore.is_match(&basename) || global_ignore.is_match(path) {
        return false;
    }

    if crate::config::is_special_filename(&basename) {
        return true;
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    crate::config::is_supported_extension(&ext)
}

/// Conventional build-output directory names the watcher ignores
/// unconditionally, regardless of `.gitignore` contents.
const WATCHER_IGNORED_DIRS: &[&str] = &["node_modules", ".git", "dist", "build"];

/// Single-path ignore check used by the watcher, where there is no walk
/// in progress to lean on. Reuses the same `.gitignore`/`.wbgrepignore`
/// files the full walk honors, but only the ones at `root` — nested
/// ignore files in subdirectories are not consulted here, unlike `walk`.
pub struct IgnoreMatcher {
    root: PathBuf,
    gitignore: ignore::gitignore::Gitignore,
    wbgrepignore: ignore::gitignore::Gitignore,
    global: GlobSet,
    /// The vector-store data directory (`<root>/.wb-grep`), ignored so the
    /// watcher never reacts to its own index/journal writes.
    data_dir: PathBuf,
}

impl IgnoreMatcher {
    pub fn build(root: &Path, config: &Config) -> Self {
        let mut git_builder = ignore::gitignore::GitignoreBuilder::new(root);
        git_builder.add(root.join(".gitignore"));
        let gitignore = git_builder.build().unwrap_or_else(|_| ignore::gitignore::Gitignore::empty());

        let mut wb_builder = ignore::gitignore::GitignoreBuilder::new(root);
        wb_builder.add(root.join(".wbgrepignore"));
        let wbgrepignore = wb_builder.build().unwrap_or_else(|_| ignore::gitignore::Gitignore::empty());

        Self {
            root: root.to_path_buf(),
            gitignore,
            wbgrepignore,
            global: build_global_ignore(&config.ignore.extra_patterns),
            data_dir: config.data_dir.clone(),
        }
    }

    pub fn is_indexable(&self, path: &Path) -> bool {
        if path.starts_with(&self.data_dir) {
            return false;
        }
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let is_dotfile_or_build_dir = relative.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            name.starts_with('.') || WATCHER_IGNORED_DIRS.contains(&name.as_ref())
        });
        if is_dotfile_or_build_dir {
            return false;
        }
        if self.gitignore.matched(path, false).is_ignore() || self.wbgrepignore.matched(path, false).is_ignore() {
            return false;
        }
        is_indexable(path, &self.global)
    }
}

/// Walk `root`, returning absolute paths of every indexable file.
/// Directories that cannot be read are skipped silently; per-file
/// ignore-file parsing is cached by the underlying `ignore` crate walker
/// for the duration of the walk.
pub fn walk(root: &Path, config: &Config) -> Vec<PathBuf> {
    let global_ignore = build_global_ignore(&config.ignore.extra_patterns);

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true) // rule 1: skip dotfile entries
        .git_ignore(true) // rule 3: .gitignore, walked from root down
        .git_global(false)
        .git_exclude(false)
        .parents(true)
        .add_custom_ignore_filename(".wbgrepignore");

    let (tx, rx) = mpsc::channel::<PathBuf>();
    let walker = builder.build_parallel();
    walker.run(|| {
        let tx = tx.clone();
        let global_ignore = global_ignore.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                if entry.file_type().is_some_and(|ft| ft.is_file())
                    && is_indexable(entry.path(), &global_ignore)
                {
                    let _ = tx.send(entry.into_path());
                }
            }
            WalkState::Continue
        })
    });
    drop(tx);

    rx.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn skips_hidden_and_lockfiles() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.py"), "print(1)\n");
        write(&dir.path().join(".hidden.py"), "print(2)\n");
        write(&dir.path().join("Cargo.lock"), "x");

        let config = Config::default();
        let files = walk(dir.path(), &config);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();

        assert!(names.contains(&"a.py".to_string()));
        assert!(!names.iter().any(|n| n.contains("hidden")));
        assert!(!names.iter().any(|n| n.ends_with(".lock")));
    }

    #[test]
    fn honors_gitignore_precedence() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join(".gitignore"), "build/\n");
        write(&dir.path().join("build/x.py"), "print(1)\n");
        write(&dir.path().join("src/main.py"), "print(2)\n");

        let config = Config::default();
        let files = walk(dir.path(), &config);
        let rel: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();

        assert!(rel.iter().any(|n| n.ends_with("main.py")));
        assert!(!rel.iter().any(|n| n.contains("build")));
    }

    #[test]
    fn honors_wbgrepignore() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join(".wbgrepignore"), "vendor/\n");
        write(&dir.path().join("vendor/x.py"), "print(1)\n");
        write(&dir.path().join("app.py"), "print(2)\n");

        let config = Config::default();
        let files = walk(dir.path(), &config);
        let rel: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();

        assert!(rel.iter().any(|n| n.ends_with("app.py")));
        assert!(!rel.iter().any(|n| n.contains("vendor")));
    }

    #[test]
    fn special_filenames_without_extension_are_indexable() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("Makefile"), "all:\n\techo hi\n");

        let config = Config::default();
        let files = walk(dir.path(), &config);
        assert!(files.iter().any(|p| p.file_name().unwrap() == "Makefile"));
    }

    #[test]
    fn ignore_matcher_rejects_build_output_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().join(".wb-grep");
        let matcher = IgnoreMatcher::build(dir.path(), &config);

        assert!(!matcher.is_indexable(&dir.path().join("node_modules").join("x.js")));
        assert!(!matcher.is_indexable(&dir.path().join("dist").join("x.js")));
        assert!(!matcher.is_indexable(&dir.path().join("build").join("x.js")));
        assert!(matcher.is_indexable(&dir.path().join("src").join("x.js")));
    }

    #[test]
    fn ignore_matcher_rejects_its_own_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().join(".wb-grep");
        let matcher = IgnoreMatcher::build(dir.path(), &config);

        assert!(!matcher.is_indexable(&config.data_dir.join("state.json")));
    }
}
