//! License header comments.

use std::path::Path;

/// Comment syntax for a file, picked by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    Markup,
    Block,
}

fn syntax_for(path: &Path) -> Option<Syntax> {
    let ext = path.extension().and_then(|e| e.to_str())?.to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => Some(Syntax::Markup),
        "css" | "js" => Some(Syntax::Block),
        _ => None,
    }
}

/// Whether a header comment can be written into this file.
pub fn supports_header(path: &Path) -> bool {
    syntax_for(path).is_some()
}

/// Prepend `text` to `content` as a comment in the file's syntax.
///
/// Returns the content unchanged for files without comment syntax or when
/// the text is blank. Leading and trailing blank lines and per-line
/// indentation are stripped from the text.
pub fn prepend(path: &Path, text: &str, content: &str) -> String {
    let Some(syntax) = syntax_for(path) else {
        return content.to_string();
    };

    let lines = comment_lines(text);
    if lines.is_empty() {
        return content.to_string();
    }

    let mut out = String::with_capacity(content.len() + text.len() + 16);
    match syntax {
        Syntax::Markup => {
            out.push_str("<!--\n");
            for line in lines {
                out.push_str("  ");
                out.push_str(line);
                out.push('\n');
            }
            out.push_str("-->\n");
        }
        Syntax::Block => {
            out.push_str("/*\n");
            for line in lines {
                if line.is_empty() {
                    out.push_str(" *\n");
                } else {
                    out.push_str(" * ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
            out.push_str(" */\n");
        }
    }
    out.push_str(content);
    out
}

/// Number of lines [`prepend`] adds for `text` on a file with comment syntax.
pub fn height(text: &str) -> usize {
    match comment_lines(text).len() {
        0 => 0,
        n => n + 2,
    }
}

/// Header lines with indentation and surrounding blank lines removed.
fn comment_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .skip_while(|l| l.is_empty())
        .collect();
    let end = lines
        .iter()
        .rposition(|l| !l.is_empty())
        .map_or(0, |i| i + 1);
    lines.truncate(end);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEXT: &str = "
    WEBSITE: https://example.com
    GITHUB: https://github.com/example/
    ";

    #[test]
    fn wraps_html_in_markup_comment() {
        let out = prepend(Path::new("index.html"), TEXT, "<!DOCTYPE html>\n");
        assert_eq!(
            out,
            "<!--\n  WEBSITE: https://example.com\n  GITHUB: https://github.com/example/\n-->\n<!DOCTYPE html>\n"
        );
    }

    #[test]
    fn wraps_css_and_js_in_block_comment() {
        let out = prepend(Path::new("css/style.css"), TEXT, "body{}");
        assert_eq!(
            out,
            "/*\n * WEBSITE: https://example.com\n * GITHUB: https://github.com/example/\n */\nbody{}"
        );
        assert!(prepend(Path::new("app.JS"), TEXT, "").starts_with("/*\n"));
    }

    #[test]
    fn leaves_other_files_alone() {
        assert_eq!(prepend(Path::new("style.css.map"), TEXT, "{}"), "{}");
        assert_eq!(prepend(Path::new("logo.png"), TEXT, "x"), "x");
        assert!(!supports_header(Path::new("favicon.ico")));
    }

    #[test]
    fn blank_text_adds_nothing() {
        assert_eq!(prepend(Path::new("a.js"), "  \n \n", "x"), "x");
        assert_eq!(height("  \n \n"), 0);
    }

    #[test]
    fn height_counts_added_lines() {
        let out = prepend(Path::new("style.css"), TEXT, "body{}");
        assert_eq!(height(TEXT), 4);
        assert_eq!(out.lines().position(|l| l == "body{}"), Some(height(TEXT)));
    }
}
