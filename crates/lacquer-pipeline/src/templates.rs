//! `@@include` expansion for HTML pages.
//!
//! Only the directive forms are interpreted; all other text passes through
//! byte for byte, so client-side template syntax in a page is left alone.
//!
//! - `@@include('file.htm')` inserts a partial from the include directory.
//! - `@@include('file.htm', {"active": "home"})` inserts it with the JSON
//!   object merged over the current context.
//! - `@@key` (or `@@key.path`) is replaced by a context value. Keys that are
//!   not in the context are left as written.
//!
//! The top-level context is the project's `[variables]` table.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::TransformError;

const DIRECTIVE: &str = "@@include(";

/// Includes nested deeper than this are assumed to be recursive.
const MAX_DEPTH: usize = 32;

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@@([A-Za-z_][A-Za-z0-9_-]*(?:\.[A-Za-z0-9_-]+)*)")
        .expect("variable regex is valid")
});

/// Expands include directives against a partials directory.
pub struct IncludeEngine {
    include_dir: PathBuf,
    context: Map<String, Value>,
}

impl IncludeEngine {
    /// Create an engine that loads includes from `include_dir`.
    pub fn new(include_dir: PathBuf, variables: &BTreeMap<String, toml::Value>) -> Self {
        let context = variables
            .iter()
            .filter_map(|(key, value)| {
                serde_json::to_value(value)
                    .ok()
                    .map(|value| (key.clone(), value))
            })
            .collect();

        Self {
            include_dir,
            context,
        }
    }

    /// Expand a page. `name` is used in error messages.
    pub fn render(&self, name: &str, source: &str) -> Result<String, TransformError> {
        self.expand(source, &self.context, name, 0)
    }

    fn expand(
        &self,
        source: &str,
        context: &Map<String, Value>,
        origin: &str,
        depth: usize,
    ) -> Result<String, TransformError> {
        let mut out = String::with_capacity(source.len());
        let mut rest = source;

        while let Some(at) = rest.find(DIRECTIVE) {
            out.push_str(&substitute(&rest[..at], context));

            let args = &rest[at + DIRECTIVE.len()..];
            let directive = parse_directive(args)
                .map_err(|message| TransformError::Include(format!("{}: {}", origin, message)))?;
            out.push_str(&self.include(&directive, context, origin, depth)?);

            rest = &args[directive.consumed..];
        }

        out.push_str(&substitute(rest, context));
        Ok(out)
    }

    fn include(
        &self,
        directive: &Directive,
        context: &Map<String, Value>,
        origin: &str,
        depth: usize,
    ) -> Result<String, TransformError> {
        if depth >= MAX_DEPTH {
            return Err(TransformError::Include(format!(
                "{}: includes nested more than {} deep at '{}'",
                origin, MAX_DEPTH, directive.name
            )));
        }

        let path = safe_join(&self.include_dir, &directive.name).ok_or_else(|| {
            TransformError::Include(format!(
                "{}: include '{}' is outside {}",
                origin,
                directive.name,
                self.include_dir.display()
            ))
        })?;

        let source = fs::read_to_string(&path).map_err(|e| {
            TransformError::Include(format!(
                "{}: could not read include {}: {}",
                origin,
                path.display(),
                e
            ))
        })?;

        let mut scope = context.clone();
        scope.extend(directive.context.clone());
        self.expand(&source, &scope, &directive.name, depth + 1)
    }
}

/// A parsed `@@include(...)` argument list.
#[derive(Debug, PartialEq)]
struct Directive {
    name: String,
    context: Map<String, Value>,
    /// Bytes consumed after `@@include(`, including the closing `)`
    consumed: usize,
}

/// Parse the arguments following `@@include(`.
fn parse_directive(input: &str) -> Result<Directive, String> {
    let mut pos = skip_whitespace(input, 0);

    let quote = input[pos..]
        .chars()
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or("expected a quoted file name after @@include(")?;
    let name_start = pos + 1;
    let name_len = input[name_start..]
        .find(quote)
        .ok_or("unterminated file name in @@include")?;
    let name = input[name_start..name_start + name_len].to_string();
    pos = skip_whitespace(input, name_start + name_len + 1);

    let mut context = Map::new();
    if input[pos..].starts_with(',') {
        let args = &input[pos + 1..];
        let mut values = serde_json::Deserializer::from_str(args).into_iter::<Value>();
        match values.next() {
            Some(Ok(Value::Object(map))) => context = map,
            Some(Ok(_)) => return Err(format!("context for '{}' must be a JSON object", name)),
            Some(Err(e)) => return Err(format!("invalid context for '{}': {}", name, e)),
            None => return Err(format!("missing context for '{}'", name)),
        }
        pos = skip_whitespace(input, pos + 1 + values.byte_offset());
    }

    if !input[pos..].starts_with(')') {
        return Err(format!("expected ')' to close @@include('{}'", name));
    }

    Ok(Directive {
        name,
        context,
        consumed: pos + 1,
    })
}

fn skip_whitespace(input: &str, from: usize) -> usize {
    let rest = &input[from..];
    from + (rest.len() - rest.trim_start().len())
}

/// Replace `@@key` references that resolve in `context`.
fn substitute<'a>(text: &'a str, context: &Map<String, Value>) -> Cow<'a, str> {
    if context.is_empty() {
        return Cow::Borrowed(text);
    }

    VARIABLE.replace_all(text, |caps: &Captures| match lookup(context, &caps[1]) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) => String::new(),
        Some(value) => value.to_string(),
        None => caps[0].to_string(),
    })
}

fn lookup<'a>(context: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut value = context.get(parts.next()?)?;
    for part in parts {
        value = value.as_object()?.get(part)?;
    }
    Some(value)
}

/// Join an include name onto the partials directory, refusing anything that
/// would escape it.
fn safe_join(base: &Path, name: &str) -> Option<PathBuf> {
    let mut path = base.to_path_buf();
    for component in Path::new(name.trim_start_matches("./")).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path)
}
