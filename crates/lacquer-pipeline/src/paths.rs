//! Glob matching and source file discovery.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{BuildError, ConfigError};

/// A source file matched by a category glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path on disk
    pub path: PathBuf,

    /// Path relative to the glob's base directory; this is the output path
    /// under the category's output directory.
    pub relative: PathBuf,
}

#[derive(Debug, Clone)]
struct Pattern {
    glob: String,
    base: PathBuf,
    matcher: GlobMatcher,
}

/// A compiled list of glob patterns relative to the project root.
#[derive(Debug, Clone)]
pub struct GlobPatterns {
    patterns: Vec<Pattern>,
    set: GlobSet,
}

impl GlobPatterns {
    /// Compile patterns. `*` never crosses a path separator; `**` does.
    pub fn new(globs: &[String]) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        let mut patterns = Vec::with_capacity(globs.len());

        for glob in globs {
            let normalized = normalize_pattern(glob);
            let compiled = GlobBuilder::new(&normalized)
                .literal_separator(true)
                .build()
                .map_err(|e| ConfigError::InvalidGlob {
                    pattern: glob.clone(),
                    message: e.to_string(),
                })?;

            builder.add(compiled.clone());
            patterns.push(Pattern {
                glob: glob.clone(),
                base: glob_base(&normalized),
                matcher: compiled.compile_matcher(),
            });
        }

        let set = builder.build().map_err(|e| ConfigError::InvalidGlob {
            pattern: globs.join(", "),
            message: e.to_string(),
        })?;

        Ok(Self { patterns, set })
    }

    /// Whether no patterns were given.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The original pattern strings.
    pub fn globs(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.glob.as_str())
    }

    /// Literal base directories of every pattern, relative to the project root.
    pub fn bases(&self) -> impl Iterator<Item = &Path> {
        self.patterns.iter().map(|p| p.base.as_path())
    }

    /// Whether a path relative to the project root matches any pattern.
    pub fn is_match(&self, relative: &Path) -> bool {
        self.set.is_match(relative)
    }

    /// Enumerate matching files under `root`, sorted by path.
    ///
    /// Each call re-reads the filesystem. A pattern whose base directory does
    /// not exist is an error, and so is anything under it that cannot be
    /// walked: unreadable directories, broken symlinks, symlink loops.
    pub fn files(&self, root: &Path) -> Result<Vec<SourceFile>, BuildError> {
        let mut found: BTreeMap<PathBuf, SourceFile> = BTreeMap::new();

        for pattern in &self.patterns {
            let base_dir = root.join(&pattern.base);
            if !base_dir.is_dir() {
                return Err(BuildError::MissingSource(base_dir));
            }

            for entry in WalkDir::new(&base_dir).follow_links(true) {
                let entry = entry.map_err(|e| BuildError::Read {
                    path: e.path().map_or_else(|| base_dir.clone(), Path::to_path_buf),
                    message: e.to_string(),
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }

                let path = entry.path();
                let Ok(from_root) = path.strip_prefix(root) else {
                    continue;
                };
                if !pattern.matcher.is_match(from_root) {
                    continue;
                }

                let relative = path
                    .strip_prefix(&base_dir)
                    .unwrap_or(from_root)
                    .to_path_buf();

                // First pattern to claim a file decides its output location.
                found.entry(path.to_path_buf()).or_insert_with(|| SourceFile {
                    path: path.to_path_buf(),
                    relative,
                });
            }
        }

        Ok(found.into_values().collect())
    }
}

/// The literal directory prefix of a glob: every leading component without
/// wildcard characters, excluding the final component.
pub fn glob_base(pattern: &str) -> PathBuf {
    let components: Vec<&str> = pattern.split('/').collect();
    let mut base = PathBuf::new();

    for (i, component) in components.iter().enumerate() {
        if i == components.len() - 1 || has_wildcard(component) {
            break;
        }
        if component.is_empty() || *component == "." {
            continue;
        }
        base.push(component);
    }

    base
}

/// Express a path relative to `root`, or `None` if it lies outside.
pub fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(root).ok()?;
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return None;
    }
    Some(relative.to_path_buf())
}

fn has_wildcard(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

fn normalize_pattern(pattern: &str) -> String {
    pattern.trim_start_matches("./").replace('\\', "/")
}
