//! Path configuration: asset categories and build targets.
//!
//! `lacquer.toml` is read once into raw `*File` structs, merged over the
//! built-in defaults and validated into an immutable [`Config`]. Every task
//! receives the same `Arc<Config>`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use lightningcss::targets::Browsers;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths::GlobPatterns;

/// Name of the configuration file looked up in the project root.
pub const CONFIG_FILE: &str = "lacquer.toml";

/// A class of source asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Html,
    Scss,
    Js,
    Images,
    Plugins,
    Others,
}

impl Category {
    /// Every category, in first-build order.
    pub const ALL: [Category; 6] = [
        Category::Html,
        Category::Js,
        Category::Scss,
        Category::Images,
        Category::Plugins,
        Category::Others,
    ];

    /// Lowercase name used in task names and config keys.
    pub fn name(self) -> &'static str {
        match self {
            Category::Html => "html",
            Category::Scss => "scss",
            Category::Js => "js",
            Category::Images => "images",
            Category::Plugins => "plugins",
            Category::Others => "others",
        }
    }

    fn index(self) -> usize {
        match self {
            Category::Html => 0,
            Category::Js => 1,
            Category::Scss => 2,
            Category::Images => 3,
            Category::Plugins => 4,
            Category::Others => 5,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| ConfigError::UnknownCategory(s.to_string()))
    }
}

/// One content-rewriting step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Resolve template includes
    Include,
    /// Compile SCSS to CSS
    CompileStyle,
    /// Add vendor prefixes
    Autoprefix,
    /// Emit a source map next to the stylesheet
    SourceMap,
    /// Prepend the license header comment
    HeaderComment,
}

/// Which output tree a build writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Dev,
    Production,
}

impl TargetKind {
    pub fn name(self) -> &'static str {
        match self {
            TargetKind::Dev => "dev",
            TargetKind::Production => "production",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(TargetKind::Dev),
            "production" | "netlify" => Ok(TargetKind::Production),
            other => Err(ConfigError::UnknownTarget(other.to_string())),
        }
    }
}

/// Where source maps are written relative to the stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMapLocation {
    /// No source maps
    Disabled,
    /// `style.css.map` next to `style.css`
    Adjacent,
    /// `<dir>/style.css.map` under the stylesheet's directory
    Directory(PathBuf),
}

impl SourceMapLocation {
    /// Parse `"none"`, `"/"` or `"/<dir>"`.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "" | "none" | "false" => Ok(Self::Disabled),
            "/" | "." | "./" => Ok(Self::Adjacent),
            other => {
                let dir = other.trim_start_matches('/').trim_end_matches('/');
                if dir.is_empty() || dir.split('/').any(|c| c == "..") {
                    return Err(ConfigError::InvalidSourceMapLocation(value.to_string()));
                }
                Ok(Self::Directory(PathBuf::from(dir)))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// A named output configuration.
#[derive(Debug, Clone)]
pub struct BuildTarget {
    /// Dev or production
    pub kind: TargetKind,

    /// Absolute output root
    pub output_root: PathBuf,

    /// Prepend the header comment to eligible files
    pub header: bool,

    /// Source map placement for compiled styles
    pub source_maps: SourceMapLocation,

    /// Notify live-reload clients after writing
    pub live_reload: bool,
}

impl BuildTarget {
    /// Output directory for a category.
    pub fn category_dir(&self, category: &AssetCategory) -> PathBuf {
        if category.output.as_os_str().is_empty() {
            self.output_root.clone()
        } else {
            self.output_root.join(&category.output)
        }
    }
}

/// A source asset category with its globs and transformation chain.
#[derive(Debug, Clone)]
pub struct AssetCategory {
    pub category: Category,

    /// Files that are built
    pub sources: GlobPatterns,

    /// Extra files that trigger a rebuild when they change (e.g. partials)
    pub watch: GlobPatterns,

    /// Output subdirectory under the target root; empty means the root
    pub output: PathBuf,

    /// Category transformations, in order
    pub transforms: Vec<Transform>,

    /// Whether the target's header comment applies to this category
    pub header: bool,
}

impl AssetCategory {
    /// The full chain for a target: category steps, then source maps, then
    /// the header comment.
    pub fn chain(&self, target: &BuildTarget) -> Vec<Transform> {
        let mut chain = self.transforms.clone();
        if target.source_maps.is_enabled() && chain.contains(&Transform::CompileStyle) {
            chain.push(Transform::SourceMap);
        }
        if target.header && self.header {
            chain.push(Transform::HeaderComment);
        }
        chain
    }

    /// Whether a change to this project-relative path should rebuild the category.
    pub fn is_affected_by(&self, relative: &Path) -> bool {
        self.sources.is_match(relative) || self.watch.is_match(relative)
    }
}

/// How the dev server answers requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeMode {
    /// Serve the dev output root as static files
    Static,
    /// Forward requests to a running backend
    Proxy { backend: String },
}

/// Dev server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub open: bool,
    pub mode: ServeMode,
}

/// The validated, immutable project configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Project root; all globs are relative to it
    pub root: PathBuf,

    /// Directory that template includes resolve against
    pub include_dir: PathBuf,

    /// License header text, one line per line of the comment
    pub header: String,

    /// Values available to HTML templates
    pub variables: BTreeMap<String, toml::Value>,

    /// Browser targets for autoprefixing
    pub browsers: Browsers,

    pub dev: BuildTarget,
    pub production: BuildTarget,
    pub server: ServerConfig,

    /// Quiet period before a watched change triggers a rebuild
    pub debounce: Duration,

    categories: Vec<AssetCategory>,
}

impl Config {
    /// Load `lacquer.toml`, falling back to defaults when it does not exist.
    ///
    /// The project root is the directory containing the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if !path.exists() {
            tracing::debug!("{} not found, using defaults", path.display());
            return Self::resolve(ConfigFile::default(), &root);
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let file: ConfigFile = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        tracing::info!("Loaded config from {}", path.display());
        Self::resolve(file, &root)
    }

    /// Built-in defaults rooted at `root`.
    pub fn defaults(root: &Path) -> Result<Self, ConfigError> {
        Self::resolve(ConfigFile::default(), root)
    }

    /// Parse a TOML string rooted at `root`.
    pub fn from_toml(content: &str, root: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: root.join(CONFIG_FILE),
            message: e.to_string(),
        })?;
        Self::resolve(file, root)
    }

    /// The definition of a category.
    pub fn get(&self, category: Category) -> &AssetCategory {
        &self.categories[category.index()]
    }

    /// Look up a category by name.
    pub fn category(&self, name: &str) -> Result<&AssetCategory, ConfigError> {
        Ok(self.get(name.parse()?))
    }

    /// All categories in first-build order.
    pub fn categories(&self) -> impl Iterator<Item = &AssetCategory> {
        self.categories.iter()
    }

    /// The build target of the given kind.
    pub fn target(&self, kind: TargetKind) -> &BuildTarget {
        match kind {
            TargetKind::Dev => &self.dev,
            TargetKind::Production => &self.production,
        }
    }

    /// Glob patterns and output directory for a category on a target.
    pub fn paths_for(
        &self,
        name: &str,
        kind: TargetKind,
    ) -> Result<(Vec<&str>, PathBuf), ConfigError> {
        let category = self.category(name)?;
        let globs = category.sources.globs().collect();
        Ok((globs, self.target(kind).category_dir(category)))
    }

    fn resolve(file: ConfigFile, root: &Path) -> Result<Self, ConfigError> {
        let root = match &file.project.root {
            Some(r) => root.join(r),
            None => root.to_path_buf(),
        };

        let mut overrides: BTreeMap<Category, CategoryFile> = BTreeMap::new();
        for (name, category) in file.categories {
            overrides.insert(name.parse()?, category);
        }

        let mut categories = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let defaults = CategoryDefaults::of(category);
            let custom = overrides.remove(&category).unwrap_or_default();

            let sources = custom.sources.unwrap_or_else(|| to_strings(defaults.sources));
            if sources.is_empty() {
                return Err(ConfigError::NoSources(category));
            }
            let watch = custom.watch.unwrap_or_else(|| to_strings(defaults.watch));
            let output = custom.output.unwrap_or_else(|| defaults.output.to_string());

            categories.push(AssetCategory {
                category,
                sources: GlobPatterns::new(&sources)?,
                watch: GlobPatterns::new(&watch)?,
                output: normalize_subdir(&output),
                transforms: defaults.transforms.to_vec(),
                header: custom.header.unwrap_or(defaults.header),
            });
        }

        let dev = file
            .targets
            .dev
            .into_target(TargetKind::Dev, &root, TargetDefaults::DEV)?;
        let production = file.targets.production.into_target(
            TargetKind::Production,
            &root,
            TargetDefaults::PRODUCTION,
        )?;

        let server = file.server.into_config()?;

        Ok(Self {
            include_dir: root.join(&file.project.include_dir),
            header: file.project.header,
            variables: file.variables,
            browsers: file.autoprefix.into_browsers()?,
            dev,
            production,
            server,
            debounce: Duration::from_millis(file.watch.debounce_ms),
            categories,
            root,
        })
    }
}

struct CategoryDefaults {
    sources: &'static [&'static str],
    watch: &'static [&'static str],
    output: &'static str,
    transforms: &'static [Transform],
    header: bool,
}

impl CategoryDefaults {
    fn of(category: Category) -> Self {
        match category {
            Category::Html => Self {
                sources: &["source/*.html"],
                watch: &["source/partials/**/*.htm"],
                output: "",
                transforms: &[Transform::Include],
                header: true,
            },
            Category::Scss => Self {
                sources: &["source/scss/**/*.scss"],
                watch: &[],
                output: "css",
                transforms: &[Transform::CompileStyle, Transform::Autoprefix],
                header: true,
            },
            Category::Js => Self {
                sources: &["source/js/*.js"],
                watch: &[],
                output: "js",
                transforms: &[],
                header: true,
            },
            Category::Images => Self {
                sources: &["source/images/**/*.{png,jpg,gif,svg}"],
                watch: &[],
                output: "images",
                transforms: &[],
                header: false,
            },
            Category::Plugins => Self {
                sources: &["source/plugins/**/*.*"],
                watch: &[],
                output: "plugins",
                transforms: &[],
                header: false,
            },
            Category::Others => Self {
                sources: &["source/*.{php,ico,png}"],
                watch: &[],
                output: "",
                transforms: &[],
                header: false,
            },
        }
    }
}

struct TargetDefaults {
    output: &'static str,
    header: bool,
    source_maps: &'static str,
    live_reload: bool,
}

impl TargetDefaults {
    const DEV: Self = Self {
        output: "theme",
        header: true,
        source_maps: "/",
        live_reload: true,
    };

    const PRODUCTION: Self = Self {
        output: "netlify",
        header: false,
        source_maps: "/maps",
        live_reload: false,
    };
}

const DEFAULT_HEADER: &str = "Built with lacquer.\nEdit the files under source/, not this output.";

/// Raw configuration file structure (lacquer.toml).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    project: ProjectFile,
    variables: BTreeMap<String, toml::Value>,
    autoprefix: AutoprefixFile,
    categories: BTreeMap<String, CategoryFile>,
    targets: TargetsFile,
    server: ServerFile,
    watch: WatchFile,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ProjectFile {
    root: Option<String>,
    include_dir: String,
    header: String,
}

impl Default for ProjectFile {
    fn default() -> Self {
        Self {
            root: None,
            include_dir: "source/partials".to_string(),
            header: DEFAULT_HEADER.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CategoryFile {
    sources: Option<Vec<String>>,
    watch: Option<Vec<String>>,
    output: Option<String>,
    header: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TargetsFile {
    dev: TargetFile,
    production: TargetFile,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TargetFile {
    output: Option<String>,
    header: Option<bool>,
    source_maps: Option<String>,
    live_reload: Option<bool>,
}

impl TargetFile {
    fn into_target(
        self,
        kind: TargetKind,
        root: &Path,
        defaults: TargetDefaults,
    ) -> Result<BuildTarget, ConfigError> {
        let source_maps = self
            .source_maps
            .as_deref()
            .unwrap_or(defaults.source_maps);

        Ok(BuildTarget {
            kind,
            output_root: root.join(self.output.as_deref().unwrap_or(defaults.output)),
            header: self.header.unwrap_or(defaults.header),
            source_maps: SourceMapLocation::parse(source_maps)?,
            live_reload: self.live_reload.unwrap_or(defaults.live_reload),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ServerFile {
    host: String,
    port: u16,
    open: bool,
    mode: String,
    backend: Option<String>,
}

impl Default for ServerFile {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            open: true,
            mode: "static".to_string(),
            backend: None,
        }
    }
}

impl ServerFile {
    fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let mode = match (self.mode.as_str(), self.backend) {
            ("static", _) => ServeMode::Static,
            ("proxy", Some(backend)) => ServeMode::Proxy { backend },
            ("proxy", None) => {
                return Err(ConfigError::InvalidServer(
                    "proxy mode requires a backend URL".to_string(),
                ))
            }
            (other, _) => {
                return Err(ConfigError::InvalidServer(format!(
                    "unknown mode '{}', expected \"static\" or \"proxy\"",
                    other
                )))
            }
        };

        Ok(ServerConfig {
            host: self.host,
            port: self.port,
            open: self.open,
            mode,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WatchFile {
    debounce_ms: u64,
}

impl Default for WatchFile {
    fn default() -> Self {
        Self { debounce_ms: 100 }
    }
}

/// Browser versions as "major[.minor[.patch]]" strings.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct AutoprefixFile(BTreeMap<String, String>);

impl Default for AutoprefixFile {
    fn default() -> Self {
        let defaults = [
            ("android", "90"),
            ("chrome", "90"),
            ("edge", "90"),
            ("firefox", "88"),
            ("ios_saf", "14"),
            ("opera", "76"),
            ("safari", "14"),
            ("samsung", "14"),
        ];
        Self(
            defaults
                .into_iter()
                .map(|(b, v)| (b.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl AutoprefixFile {
    fn into_browsers(self) -> Result<Browsers, ConfigError> {
        let mut browsers = Browsers::default();

        for (browser, version) in self.0 {
            let encoded = encode_version(&version).ok_or_else(|| {
                ConfigError::InvalidBrowserVersion {
                    browser: browser.clone(),
                    version: version.clone(),
                }
            })?;

            let slot = match browser.as_str() {
                "android" => &mut browsers.android,
                "chrome" => &mut browsers.chrome,
                "edge" => &mut browsers.edge,
                "firefox" => &mut browsers.firefox,
                "ie" => &mut browsers.ie,
                "ios_saf" => &mut browsers.ios_saf,
                "opera" => &mut browsers.opera,
                "safari" => &mut browsers.safari,
                "samsung" => &mut browsers.samsung,
                _ => return Err(ConfigError::UnknownBrowser(browser)),
            };
            *slot = Some(encoded);
        }

        Ok(browsers)
    }
}

/// Encode "major.minor.patch" the way lightningcss expects: one byte each,
/// major in the high byte.
fn encode_version(version: &str) -> Option<u32> {
    let mut parts = version.trim().split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next().map(str::parse::<u32>).transpose().ok()?.unwrap_or(0);
    let patch: u32 = parts.next().map(str::parse::<u32>).transpose().ok()?.unwrap_or(0);
    if parts.next().is_some() || major > 255 || minor > 255 || patch > 255 {
        return None;
    }
    Some((major << 16) | (minor << 8) | patch)
}

fn normalize_subdir(output: &str) -> PathBuf {
    let trimmed = output.trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        PathBuf::new()
    } else {
        PathBuf::from(trimmed)
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
