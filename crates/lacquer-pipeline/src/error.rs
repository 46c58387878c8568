//! Error types for the asset pipeline.

use std::path::PathBuf;

use crate::config::Category;

/// Errors found while loading or validating `lacquer.toml`.
///
/// All of these are raised before any build step runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Unknown asset category: {0}")]
    UnknownCategory(String),

    #[error("Unknown build target: {0}")]
    UnknownTarget(String),

    #[error("Invalid glob pattern '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error("Category '{0}' has no source patterns")]
    NoSources(Category),

    #[error("Invalid version '{version}' for browser '{browser}'")]
    InvalidBrowserVersion { browser: String, version: String },

    #[error("Unknown browser in autoprefix targets: {0}")]
    UnknownBrowser(String),

    #[error("Invalid source map location '{0}': expected \"none\", \"/\" or \"/<dir>\"")]
    InvalidSourceMapLocation(String),

    #[error("Invalid server configuration: {0}")]
    InvalidServer(String),
}

/// A failure to transform a single file.
///
/// These are logged and skip only the offending file.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Include failed: {0}")]
    Include(String),

    #[error("Style compilation failed: {0}")]
    Style(String),

    #[error("Autoprefix failed: {0}")]
    Autoprefix(String),

    #[error("Source map generation failed: {0}")]
    SourceMap(String),

    #[error("File is not valid UTF-8")]
    Encoding,
}

/// Errors that abort a category's build step.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Source directory not found: {0}")]
    MissingSource(PathBuf),

    #[error("Failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("Failed to clean {path}: {message}")]
    Clean { path: PathBuf, message: String },

    #[error("Refusing to clean {0}: it contains the project root or a source directory")]
    UnsafeClean(PathBuf),
}
