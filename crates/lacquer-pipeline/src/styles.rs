//! Stylesheet processing: SCSS compilation, autoprefixing and source maps.

use std::path::{Path, PathBuf};

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;

use crate::error::TransformError;

/// CSS produced by the style pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedCss {
    pub code: String,
    /// Source map JSON, when requested
    pub map: Option<String>,
}

/// Compiles SCSS and post-processes the resulting CSS.
#[derive(Debug, Clone)]
pub struct StyleCompiler {
    browsers: Browsers,
}

impl StyleCompiler {
    pub fn new(browsers: Browsers) -> Self {
        Self { browsers }
    }

    /// Compile an SCSS file to expanded CSS.
    ///
    /// `@use`/`@import` resolve against the file's directory and each of
    /// `load_paths`.
    pub fn compile(&self, path: &Path, load_paths: &[PathBuf]) -> Result<String, TransformError> {
        let mut options = grass::Options::default().style(grass::OutputStyle::Expanded);
        if let Some(dir) = path.parent() {
            options = options.load_path(dir);
        }
        for load_path in load_paths {
            options = options.load_path(load_path);
        }

        grass::from_path(path, &options).map_err(|e| TransformError::Style(e.to_string()))
    }

    /// Re-print CSS through lightningcss.
    ///
    /// With `prefix`, vendor prefixes are added for the configured browsers.
    /// The output is never minified.
    ///
    /// With `source_map`, a v3 map is produced whose single source is `css`
    /// itself, named `source_name`. Mappings therefore point into the
    /// compiled CSS, not the SCSS it came from. The value is the number of
    /// lines that will be prepended to the output afterwards; generated
    /// lines are shifted by it.
    pub fn process(
        &self,
        css: &str,
        source_name: &str,
        prefix: bool,
        source_map: Option<u32>,
    ) -> Result<ProcessedCss, TransformError> {
        let targets = if prefix {
            Targets::from(self.browsers)
        } else {
            Targets::default()
        };

        let mut stylesheet = StyleSheet::parse(
            css,
            ParserOptions {
                filename: source_name.to_string(),
                ..Default::default()
            },
        )
        .map_err(|e| TransformError::Autoprefix(e.to_string()))?;

        stylesheet
            .minify(MinifyOptions {
                targets,
                ..Default::default()
            })
            .map_err(|e| TransformError::Autoprefix(e.to_string()))?;

        let mut map = if source_map.is_some() {
            let mut map = SourceMap::new("/");
            map.add_source(source_name);
            map.set_source_content(0, css)
                .map_err(|e| TransformError::SourceMap(format!("{:?}", e)))?;
            Some(map)
        } else {
            None
        };

        let printed = stylesheet
            .to_css(PrinterOptions {
                minify: false,
                source_map: map.as_mut(),
                targets,
                ..Default::default()
            })
            .map_err(|e| TransformError::Autoprefix(e.to_string()))?;

        let map = match map.as_mut() {
            Some(map) => {
                let offset = source_map.unwrap_or(0);
                if offset > 0 {
                    map.offset_lines(0, i64::from(offset))
                        .map_err(|e| TransformError::SourceMap(format!("{:?}", e)))?;
                }
                Some(
                    map.to_json(None)
                        .map_err(|e| TransformError::SourceMap(format!("{:?}", e)))?,
                )
            }
            None => None,
        };

        Ok(ProcessedCss {
            code: printed.code,
            map,
        })
    }
}

/// SCSS partials (`_name.scss`) are only imported, never emitted.
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn compiler() -> StyleCompiler {
        StyleCompiler::new(Browsers {
            safari: Some(10 << 16),
            ..Default::default()
        })
    }

    #[test]
    fn compiles_scss_with_partials() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("_vars.scss"), "$brand: #336699;").unwrap();
        fs::write(
            temp.path().join("style.scss"),
            "@import 'vars';\n.btn { color: $brand; &:hover { color: red; } }",
        )
        .unwrap();

        let css = compiler()
            .compile(&temp.path().join("style.scss"), &[])
            .unwrap();

        assert!(css.contains(".btn {"));
        assert!(css.contains("#336699"));
        assert!(css.contains(".btn:hover"));
    }

    #[test]
    fn syntax_errors_are_style_errors() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("broken.scss"), ".btn { color: ; ").unwrap();

        let err = compiler()
            .compile(&temp.path().join("broken.scss"), &[])
            .unwrap_err();

        assert!(matches!(err, TransformError::Style(_)));
    }

    #[test]
    fn adds_vendor_prefixes() {
        let out = compiler()
            .process(".a { user-select: none; }", "style.css", true, None)
            .unwrap();

        assert!(out.code.contains("-webkit-user-select"));
        assert!(out.map.is_none());
    }

    #[test]
    fn leaves_css_alone_without_prefixing() {
        let out = compiler()
            .process(".a { user-select: none; }", "style.css", false, None)
            .unwrap();

        assert!(!out.code.contains("-webkit-"));
    }

    fn mappings(map: &str) -> String {
        let json: serde_json::Value = serde_json::from_str(map).unwrap();
        json["mappings"].as_str().unwrap().to_string()
    }

    #[test]
    fn emits_source_map() {
        let out = compiler()
            .process(".a {\n  color: red;\n}\n", "style.css", true, Some(0))
            .unwrap();

        let map = out.map.unwrap();
        assert!(!mappings(&map).starts_with(';'));
        assert!(map.contains("style.css"));
    }

    #[test]
    fn shifts_map_past_prepended_lines() {
        let out = compiler()
            .process(".a {\n  color: red;\n}\n", "style.css", true, Some(3))
            .unwrap();

        let mappings = mappings(&out.map.unwrap());
        assert!(mappings.starts_with(";;;"));
        assert!(!mappings.starts_with(";;;;"));
    }

    #[test]
    fn is_deterministic() {
        let css = ".a { display: flex; user-select: none; }";
        let first = compiler().process(css, "a.css", true, Some(0)).unwrap();
        let second = compiler().process(css, "a.css", true, Some(0)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn detects_partials() {
        assert!(is_partial(Path::new("scss/_buttons.scss")));
        assert!(!is_partial(Path::new("scss/style.scss")));
    }
}
