//! File system walker for discovering source files to index
//!
//! This module provides efficient directory traversal with support for:
//! - .gitignore rules
//! - .codevecignore files
//! - Ignore patterns from configuration
//! - Language filtering and a size limit
//!
//! [`IndexFilter`] applies the same rules to single paths, for callers that
//! learn about files one at a time instead of walking.

use crate::Settings;
use crate::chunking::Language;
use crate::config::IGNORE_FILE;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::{Match, WalkBuilder};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Walks directories to find source files to index
#[derive(Debug)]
pub struct FileWalker {
    settings: Arc<Settings>,
}

impl FileWalker {
    /// Create a new file walker with the given settings
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Walk a directory and return an iterator of files to index
    pub fn walk(&self, root: &Path) -> impl Iterator<Item = PathBuf> {
        let mut builder = WalkBuilder::new(root);

        builder
            .hidden(true) // Skip hidden files and directories
            .git_ignore(true) // Respect .gitignore files
            .git_global(true) // Respect global gitignore
            .git_exclude(true) // Respect .git/info/exclude
            .follow_links(false) // Don't follow symlinks by default
            .max_depth(None) // No depth limit
            .require_git(false); // Allow gitignore to work in non-git directories

        builder.add_custom_ignore_filename(IGNORE_FILE);

        // Overrides are whitelists; a leading '!' turns a glob into an ignore.
        if let Some(overrides) = ignore_overrides(&self.settings.indexing.ignore_patterns, root) {
            builder.overrides(overrides);
        }

        let max_file_size = self.settings.indexing.max_file_size;

        builder
            .build()
            .filter_map(Result::ok) // Skip files we can't access
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(move |entry| {
                let path = entry.path();
                Language::from_path(path)?;

                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if size > max_file_size {
                    debug!(
                        "skipping {} ({size} bytes > {max_file_size})",
                        path.display()
                    );
                    return None;
                }

                Some(path.to_path_buf())
            })
    }

    /// Count files that would be indexed (useful for dry runs)
    pub fn count_files(&self, root: &Path) -> usize {
        self.walk(root).count()
    }

    /// Per-path filter with the walker's rules, rooted at `root`.
    pub fn filter(&self, root: &Path) -> IndexFilter {
        IndexFilter::new(&self.settings, root)
    }
}

fn ignore_overrides(patterns: &[String], root: &Path) -> Option<Override> {
    if patterns.is_empty() {
        return None;
    }

    let mut builder = OverrideBuilder::new(root);
    for pattern in patterns {
        let glob = pattern.trim_start_matches('!');
        if let Err(e) = builder.add(&format!("!{glob}")) {
            warn!("ignoring invalid ignore pattern '{pattern}': {e}");
        }
    }
    match builder.build() {
        Ok(overrides) => Some(overrides),
        Err(e) => {
            warn!("ignore patterns unusable: {e}");
            None
        }
    }
}

/// Decides for one path at a time what [`FileWalker::walk`] would decide.
///
/// Ignore files are read lazily per directory and kept until
/// [`invalidate`](Self::invalidate).
#[derive(Debug)]
pub struct IndexFilter {
    root: PathBuf,
    overrides: Option<Override>,
    global: Gitignore,
    max_file_size: u64,
    /// Directory -> matcher for its `.gitignore` and ignore file.
    matchers: HashMap<PathBuf, Gitignore>,
}

impl IndexFilter {
    pub fn new(settings: &Settings, root: &Path) -> Self {
        let (global, error) = Gitignore::global();
        if let Some(e) = error {
            debug!("global gitignore unusable: {e}");
        }
        Self {
            root: root.to_path_buf(),
            overrides: ignore_overrides(&settings.indexing.ignore_patterns, root),
            global,
            max_file_size: settings.indexing.max_file_size,
            matchers: HashMap::new(),
        }
    }

    /// Drop cached ignore files, e.g. after one of them changed.
    pub fn invalidate(&mut self) {
        self.matchers.clear();
    }

    /// Whether a walk over the root would yield `path`.
    ///
    /// The size limit is only checked when the file exists, so deletions of
    /// indexable files still pass.
    pub fn is_indexable(&mut self, path: &Path) -> bool {
        if Language::from_path(path).is_none() || self.is_excluded(path) {
            return false;
        }
        match std::fs::metadata(path) {
            Ok(meta) => meta.is_file() && meta.len() <= self.max_file_size,
            Err(_) => true,
        }
    }

    /// Whether ignore rules, hidden components or configured patterns
    /// exclude `path`. Paths outside the root are excluded.
    pub fn is_excluded(&mut self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return true;
        };
        let relative = relative.to_path_buf();

        let mut dirs = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(name) => {
                    if name.to_string_lossy().starts_with('.') {
                        return true;
                    }
                    dirs.push(name);
                }
                _ => return true,
            }
        }
        // The last component is the file itself.
        dirs.pop();

        let mut ancestors = Vec::with_capacity(dirs.len() + 1);
        let mut current = self.root.clone();
        ancestors.push(current.clone());
        for name in dirs {
            current.push(name);
            ancestors.push(current.clone());
        }

        if let Some(overrides) = &self.overrides {
            let file_ignored = overrides.matched(path, false).is_ignore();
            let dir_ignored = ancestors[1..]
                .iter()
                .any(|dir| overrides.matched(dir, true).is_ignore());
            if file_ignored || dir_ignored {
                return true;
            }
        }

        // Deeper ignore files take precedence over shallower ones.
        for dir in ancestors.iter().rev() {
            match self.matcher(dir).matched_path_or_any_parents(path, false) {
                Match::Ignore(_) => return true,
                Match::Whitelist(_) => return false,
                Match::None => {}
            }
        }

        let mut partial = PathBuf::new();
        for component in relative.components() {
            partial.push(component);
            let is_dir = partial != relative;
            if self.global.matched(&partial, is_dir).is_ignore() {
                return true;
            }
        }
        false
    }

    fn matcher(&mut self, dir: &Path) -> &Gitignore {
        let is_root = dir == self.root;
        self.matchers.entry(dir.to_path_buf()).or_insert_with(|| {
            let mut builder = GitignoreBuilder::new(dir);
            // Later files win, so the custom ignore file is added last.
            let mut sources = Vec::new();
            if is_root {
                sources.push(dir.join(".git").join("info").join("exclude"));
            }
            sources.push(dir.join(".gitignore"));
            sources.push(dir.join(IGNORE_FILE));
            for source in sources.iter().filter(|source| source.is_file()) {
                if let Some(e) = builder.add(source) {
                    warn!("problem reading {}: {e}", source.display());
                }
            }
            builder.build().unwrap_or_else(|e| {
                warn!("ignore rules in {} unusable: {e}", dir.display());
                Gitignore::empty()
            })
        })
    }
}
