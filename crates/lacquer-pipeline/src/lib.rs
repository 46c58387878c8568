//! Asset pipeline for lacquer.
//!
//! Turns a source tree into an output tree one category at a time: HTML pages
//! with includes, SCSS compiled and prefixed, scripts, images, plugins and
//! root files copied. Each category build is a stateless pass over the files
//! its globs match.

pub mod clean;
pub mod config;
pub mod error;
pub mod header;
pub mod paths;
pub mod step;
pub mod styles;
pub mod templates;

pub use clean::clean;
pub use config::{
    AssetCategory, BuildTarget, Category, Config, ServeMode, ServerConfig, SourceMapLocation,
    TargetKind, Transform, CONFIG_FILE,
};
pub use error::{BuildError, ConfigError, TransformError};
pub use step::{BuildStep, FailedFile, ReloadSignal, StepReport};
