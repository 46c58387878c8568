//! Per-category build step.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::config::{BuildTarget, Category, Config, SourceMapLocation, TargetKind, Transform};
use crate::error::{BuildError, TransformError};
use crate::header;
use crate::paths::SourceFile;
use crate::styles::{is_partial, StyleCompiler};
use crate::templates::IncludeEngine;

/// Receives the output paths written by a build step.
///
/// Implemented by the live-reload hub; only called for targets with live
/// reload enabled.
pub trait ReloadSignal: Send + Sync {
    fn assets_changed(&self, category: Category, paths: &[PathBuf]);
}

/// A file that failed to transform and produced no output.
#[derive(Debug)]
pub struct FailedFile {
    pub source: PathBuf,
    pub error: TransformError,
}

/// Result of running one category's build step.
#[derive(Debug)]
pub struct StepReport {
    pub category: Category,
    pub target: TargetKind,

    /// Every file written, including source maps
    pub written: Vec<PathBuf>,

    /// Files skipped because a transformation failed
    pub failed: Vec<FailedFile>,

    pub duration_ms: u64,
}

/// One file to be written.
#[derive(Debug)]
struct Output {
    /// Path relative to the category output directory
    relative: PathBuf,
    contents: Vec<u8>,
}

enum Body {
    Bytes(Vec<u8>),
    Text(String),
}

impl Body {
    fn text(&mut self) -> Result<&mut String, TransformError> {
        if let Body::Bytes(bytes) = self {
            let text = String::from_utf8(std::mem::take(bytes)).map_err(|_| TransformError::Encoding)?;
            *self = Body::Text(text);
        }
        match self {
            Body::Text(text) => Ok(text),
            Body::Bytes(_) => Err(TransformError::Encoding),
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        match self {
            Body::Bytes(bytes) => bytes,
            Body::Text(text) => text.into_bytes(),
        }
    }
}

/// Runs category build steps against a configuration.
///
/// Holds the include engine and style compiler so repeated builds (watch
/// mode) reuse them.
pub struct BuildStep {
    config: Arc<Config>,
    includes: IncludeEngine,
    styles: StyleCompiler,
}

impl BuildStep {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            includes: IncludeEngine::new(config.include_dir.clone(), &config.variables),
            styles: StyleCompiler::new(config.browsers),
            config,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Build every file of `category` into the `kind` target.
    ///
    /// Transformation failures are logged and reported; they never abort the
    /// step. Missing source directories and I/O failures do.
    pub fn run(
        &self,
        category: Category,
        kind: TargetKind,
        reload: Option<&dyn ReloadSignal>,
    ) -> Result<StepReport, BuildError> {
        let start = Instant::now();
        let definition = self.config.get(category);
        let target = self.config.target(kind);
        let chain = definition.chain(target);

        let mut files = definition.sources.files(&self.config.root)?;
        if chain.contains(&Transform::CompileStyle) {
            files.retain(|f| !is_partial(&f.path));
        }

        let load_paths: Vec<PathBuf> = definition
            .sources
            .bases()
            .map(|b| self.config.root.join(b))
            .collect();
        let out_dir = target.category_dir(definition);

        let reads_source = !chain.contains(&Transform::CompileStyle);

        let outcomes: Vec<Result<Vec<PathBuf>, FailedFile>> = files
            .par_iter()
            .map(|file| {
                let source = if reads_source {
                    fs::read(&file.path).map_err(|e| BuildError::Read {
                        path: file.path.clone(),
                        message: e.to_string(),
                    })?
                } else {
                    Vec::new()
                };

                match self.transform(file, source, &chain, target, &load_paths) {
                    Ok(outputs) => write_outputs(&out_dir, outputs).map(Ok),
                    Err(error) => {
                        tracing::error!("{}: {}: {}", category, file.path.display(), error);
                        Ok(Err(FailedFile {
                            source: file.path.clone(),
                            error,
                        }))
                    }
                }
            })
            .collect::<Result<_, BuildError>>()?;

        let mut written = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(paths) => written.extend(paths),
                Err(failure) => failed.push(failure),
            }
        }

        let report = StepReport {
            category,
            target: kind,
            written,
            failed,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        tracing::info!(
            "{} ({}): wrote {} files to {} in {}ms",
            category,
            kind,
            report.written.len(),
            out_dir.display(),
            report.duration_ms
        );
        if !report.failed.is_empty() {
            tracing::warn!("{} ({}): {} files failed", category, kind, report.failed.len());
        }

        if target.live_reload {
            if let Some(reload) = reload {
                let changed: Vec<PathBuf> = report
                    .written
                    .iter()
                    .filter(|p| p.extension().and_then(|e| e.to_str()) != Some("map"))
                    .cloned()
                    .collect();
                if !changed.is_empty() {
                    reload.assets_changed(category, &changed);
                }
            }
        }

        Ok(report)
    }

    /// Build several categories one after another.
    pub fn run_all(
        &self,
        categories: &[Category],
        kind: TargetKind,
        reload: Option<&dyn ReloadSignal>,
    ) -> Result<Vec<StepReport>, BuildError> {
        categories
            .iter()
            .map(|category| self.run(*category, kind, reload))
            .collect()
    }

    /// Apply the transformation chain to one file.
    ///
    /// `source` holds the file's bytes, except for style compilation which
    /// reads from disk itself so imports resolve relative to the file.
    fn transform(
        &self,
        file: &SourceFile,
        source: Vec<u8>,
        chain: &[Transform],
        target: &BuildTarget,
        load_paths: &[PathBuf],
    ) -> Result<Vec<Output>, TransformError> {
        let mut relative = file.relative.clone();
        let mut body = Body::Bytes(source);
        let mut map: Option<String> = None;
        let mut extra = Vec::new();
        let source_name = slash_path(&file.relative);

        for transform in chain {
            match transform {
                Transform::Include => {
                    let rendered = self.includes.render(&source_name, body.text()?)?;
                    body = Body::Text(rendered);
                }
                Transform::CompileStyle => {
                    body = Body::Text(self.styles.compile(&file.path, load_paths)?);
                    relative.set_extension("css");
                }
                Transform::Autoprefix => {
                    let wants_map = chain
                        .contains(&Transform::SourceMap)
                        .then(|| self.map_line_offset(chain, &relative));
                    let processed = self.styles.process(
                        body.text()?,
                        &slash_path(&relative),
                        true,
                        wants_map,
                    )?;
                    map = processed.map;
                    body = Body::Text(processed.code);
                }
                Transform::SourceMap => {
                    let json = match map.take() {
                        Some(json) => json,
                        None => {
                            let offset = self.map_line_offset(chain, &relative);
                            let processed = self.styles.process(
                                body.text()?,
                                &slash_path(&relative),
                                false,
                                Some(offset),
                            )?;
                            body = Body::Text(processed.code);
                            processed.map.ok_or_else(|| {
                                TransformError::SourceMap("no map produced".to_string())
                            })?
                        }
                    };

                    let Some((map_relative, url)) = map_location(&relative, &target.source_maps)
                    else {
                        continue;
                    };

                    let text = body.text()?;
                    if !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push_str(&format!("/*# sourceMappingURL={} */\n", url));

                    extra.push(Output {
                        relative: map_relative,
                        contents: json.into_bytes(),
                    });
                }
                Transform::HeaderComment => {
                    if header::supports_header(&relative) {
                        let with_header =
                            header::prepend(&relative, &self.config.header, body.text()?);
                        body = Body::Text(with_header);
                    }
                }
            }
        }

        let mut outputs = vec![Output {
            relative,
            contents: body.into_bytes(),
        }];
        outputs.extend(extra);
        Ok(outputs)
    }

    /// Lines the header comment will add above a stylesheet in this chain.
    fn map_line_offset(&self, chain: &[Transform], relative: &Path) -> u32 {
        if chain.contains(&Transform::HeaderComment) && header::supports_header(relative) {
            u32::try_from(header::height(&self.config.header)).unwrap_or(u32::MAX)
        } else {
            0
        }
    }
}

/// Where the map for `css` goes and the URL the stylesheet uses to find it.
fn map_location(css: &Path, location: &SourceMapLocation) -> Option<(PathBuf, String)> {
    let file_name = format!("{}.map", css.file_name()?.to_string_lossy());
    let parent = css.parent().unwrap_or(Path::new(""));

    match location {
        SourceMapLocation::Disabled => None,
        SourceMapLocation::Adjacent => Some((parent.join(&file_name), file_name)),
        SourceMapLocation::Directory(dir) => {
            let url = format!("{}/{}", slash_path(dir), file_name);
            Some((parent.join(dir).join(&file_name), url))
        }
    }
}

/// Write outputs under `out_dir`, replacing whole files.
fn write_outputs(out_dir: &Path, outputs: Vec<Output>) -> Result<Vec<PathBuf>, BuildError> {
    let mut written = Vec::with_capacity(outputs.len());
    for output in outputs {
        let path = out_dir.join(&output.relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::Write {
                path: parent.to_path_buf(),
                message: e.to_string(),
            })?;
        }
        fs::write(&path, &output.contents).map_err(|e| BuildError::Write {
            path: path.clone(),
            message: e.to_string(),
        })?;
        written.push(path);
    }
    Ok(written)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
