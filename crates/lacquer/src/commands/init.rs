//! Initialize a lacquer project.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Files written by `init`, relative to the project root.
const STARTER_FILES: &[(&str, &str)] = &[
    ("source/index.html", DEFAULT_INDEX),
    ("source/partials/header.htm", DEFAULT_HEADER_PARTIAL),
    ("source/partials/footer.htm", DEFAULT_FOOTER_PARTIAL),
    ("source/scss/_variables.scss", DEFAULT_VARIABLES),
    ("source/scss/style.scss", DEFAULT_STYLE),
    ("source/js/main.js", DEFAULT_SCRIPT),
];

/// Directories created empty so every category has a source directory.
const STARTER_DIRS: &[&str] = &["source/images", "source/plugins"];

/// Run the init command.
pub async fn run(config_path: &Path, yes: bool) -> Result<()> {
    tracing::info!("Initializing lacquer...");

    let root = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    if root.join("source").exists() && !yes {
        tracing::warn!("source/ directory already exists. Use --yes to overwrite.");
        return Ok(());
    }

    write_starter(root, config_path, yes)?;

    tracing::info!("Initialization complete!");
    tracing::info!("Run 'lacquer dev' to build, watch and serve.");

    Ok(())
}

fn write_starter(root: &Path, config_path: &Path, overwrite: bool) -> Result<()> {
    if !config_path.exists() || overwrite {
        fs::write(config_path, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        tracing::info!("Created {}", config_path.display());
    }

    for dir in STARTER_DIRS {
        let path = root.join(dir);
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
    }

    for (relative, content) in STARTER_FILES {
        let path = root.join(relative);
        if path.exists() && !overwrite {
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Created {}", relative);
    }

    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# Lacquer configuration

[project]
# Directory searched by @@include('file.htm')
include_dir = "source/partials"

# Comment prepended to HTML, CSS and JS in targets with header = true
header = """
WEBSITE: https://example.com
"""

# Replaces @@name in pages and partials
[variables]
site_name = "My Site"

[autoprefix]
chrome = "90"
firefox = "88"
safari = "14"

[targets.dev]
output = "theme"
header = true
source_maps = "/"
live_reload = true

[targets.production]
output = "netlify"
header = false
source_maps = "/maps"
live_reload = false

[server]
port = 3000
open = true
# "static" serves targets.dev.output; "proxy" forwards to backend
mode = "static"
# backend = "http://localhost:8000"

[watch]
debounce_ms = 100

# Override a category's globs or output directory:
# [categories.scss]
# sources = ["source/scss/**/*.scss"]
# output = "css"
"#;

const DEFAULT_INDEX: &str = r#"<!DOCTYPE html>
<html lang="en">
@@include('header.htm')
<body>
  <main>
    <h1>@@site_name</h1>
    <p>Edit <code>source/index.html</code> to get started.</p>
  </main>
@@include('footer.htm')
</body>
</html>
"#;

const DEFAULT_HEADER_PARTIAL: &str = r#"<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>@@site_name</title>
  <link rel="stylesheet" href="/css/style.css">
</head>
"#;

const DEFAULT_FOOTER_PARTIAL: &str = r#"  <footer>&copy; @@site_name</footer>
  <script src="/js/main.js"></script>
"#;

const DEFAULT_VARIABLES: &str = r#"$text: #222;
$accent: #336699;
"#;

const DEFAULT_STYLE: &str = r#"@import 'variables';

body {
  color: $text;
  font-family: system-ui, sans-serif;
  max-width: 48rem;
  margin: 2rem auto;

  a {
    color: $accent;
    user-select: none;
  }
}
"#;

const DEFAULT_SCRIPT: &str = r#"document.addEventListener('DOMContentLoaded', function () {
  console.log('ready');
});
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use lacquer_pipeline::Config;
    use tempfile::tempdir;

    #[test]
    fn starter_config_is_valid() {
        let temp = tempdir().unwrap();
        let config = Config::from_toml(DEFAULT_CONFIG, temp.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.dev.output_root, temp.path().join("theme"));
    }

    #[tokio::test]
    async fn writes_starter_tree() {
        let temp = tempdir().unwrap();
        let config_path = temp.path().join("lacquer.toml");

        run(&config_path, false).await.unwrap();

        assert!(config_path.exists());
        assert!(temp.path().join("source/index.html").exists());
        assert!(temp.path().join("source/partials/header.htm").exists());
        assert!(temp.path().join("source/scss/style.scss").exists());
        assert!(temp.path().join("source/images").is_dir());
    }

    #[tokio::test]
    async fn keeps_existing_source_without_yes() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("source")).unwrap();
        fs::write(temp.path().join("source/index.html"), "mine").unwrap();

        run(&temp.path().join("lacquer.toml"), false).await.unwrap();

        assert_eq!(
            fs::read_to_string(temp.path().join("source/index.html")).unwrap(),
            "mine"
        );
        assert!(!temp.path().join("lacquer.toml").exists());
    }
}
