//! Purpose: Render key summaries through user templates such as `{{.Value.metadata.name}}`.
//! Exports: `Template`, `NO_VALUE`.
//! Role: Small adapter around `jaq-core`; every `{{ ... }}` action is a jq filter over the
//! Role: summary's template view (`Key`, `Version`, `Value`, `TypeMeta`, `Stats`).
//! Invariants: Parse/compile failures surface before any store access.
//! Invariants: Runtime failures abort rendering; missing fields render as `<no value>`.
//! Invariants: `{{-` / `-}}` trim whitespace on the adjacent literal side.
use std::fmt;
use std::fmt::Write as _;

use jaq_core::load::{Arena, File, Loader};
use jaq_core::{Compiler, Ctx, Native, RcIter};
use jaq_json::Val;

use crate::core::error::{Error, ErrorKind};
use crate::core::summary::KeySummary;

/// Rendered for actions that yield `null`, e.g. a missing map field.
pub const NO_VALUE: &str = "<no value>";

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

const VIEW_FIELDS: [&str; 5] = ["Key", "Version", "Value", "TypeMeta", "Stats"];
const STATS_FIELDS: [&str; 5] = [
    "VersionCount",
    "KeySize",
    "ValueSize",
    "AllVersionsKeySize",
    "AllVersionsValueSize",
];

struct Action {
    expr: String,
    filter: jaq_core::Filter<Native<Val>>,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("expr", &self.expr).finish()
    }
}

#[derive(Debug)]
enum Segment {
    Text(String),
    Action(Action),
}

#[derive(Debug)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, Error> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut trim_next = false;

        while let Some(open) = rest.find(OPEN) {
            let mut text = &rest[..open];
            if trim_next {
                text = text.trim_start();
            }
            let after_open = &rest[open + OPEN.len()..];
            let close = find_close(after_open).ok_or_else(|| {
                template_error(source, "unclosed action")
                    .with_hint("Every `{{` needs a matching `}}`.")
            })?;
            let mut inner = &after_open[..close];

            if let Some(stripped) = inner.strip_prefix('-') {
                text = text.trim_end();
                inner = stripped;
            }
            trim_next = false;
            if let Some(stripped) = inner.strip_suffix('-') {
                trim_next = true;
                inner = stripped;
            }

            if !text.is_empty() {
                segments.push(Segment::Text(text.to_string()));
            }
            segments.push(Segment::Action(compile_action(source, inner.trim())?));
            rest = &after_open[close + CLOSE.len()..];
        }

        let tail = if trim_next { rest.trim_start() } else { rest };
        if !tail.is_empty() {
            segments.push(Segment::Text(tail.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Renders one summary; the caller adds the trailing newline.
    pub fn render(&self, summary: &KeySummary) -> Result<String, Error> {
        let input = Val::from(summary.template_view());
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Action(action) => action
                    .eval(&input, &mut out)
                    .map_err(|err| err.with_key(&summary.key_bytes))?,
            }
        }
        Ok(out)
    }
}

impl Action {
    fn eval(&self, input: &Val, out: &mut String) -> Result<(), Error> {
        let inputs = RcIter::new(core::iter::empty::<Result<Val, String>>());
        let results = self.filter.run((Ctx::new([], &inputs), input.clone()));
        for item in results {
            match item {
                Ok(Val::Null) => out.push_str(NO_VALUE),
                Ok(Val::Str(text)) => out.push_str(&text),
                Ok(other) => {
                    let _ = write!(out, "{other}");
                }
                Err(err) => {
                    return Err(Error::new(ErrorKind::Template)
                        .with_message(format!("template action `{}` failed", self.expr))
                        .with_hint(format!("Details: {err:?}")));
                }
            }
        }
        Ok(())
    }
}

/// Offset of the `}}` closing an action, ignoring any inside jq string literals.
fn find_close(action: &str) -> Option<usize> {
    let bytes = action.as_bytes();
    let mut in_string = false;
    let mut escaped = false;
    for (index, &byte) in bytes.iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
        } else if byte == b'"' {
            in_string = true;
        } else if bytes[index..].starts_with(CLOSE.as_bytes()) {
            return Some(index);
        }
    }
    None
}

/// Leading `.Name` or `.Name.Name` path segments of `expr`.
fn leading_fields(expr: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut rest = expr;
    while let Some(after_dot) = rest.strip_prefix('.') {
        let end = after_dot
            .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
            .unwrap_or(after_dot.len());
        if end == 0 {
            break;
        }
        fields.push(&after_dot[..end]);
        rest = &after_dot[end..];
    }
    fields
}

// Misspelled view fields fail like Go templates do instead of rendering `<no value>`.
fn check_view_fields(source: &str, expr: &str) -> Result<(), Error> {
    let fields = leading_fields(expr);
    let unknown = match fields.as_slice() {
        [root, ..] if !VIEW_FIELDS.contains(root) => Some((*root, VIEW_FIELDS.join(", "))),
        ["Stats", stat, ..] if !STATS_FIELDS.contains(stat) => {
            Some((*stat, STATS_FIELDS.join(", ")))
        }
        _ => None,
    };
    match unknown {
        Some((name, known)) => Err(template_error(source, &format!("can't evaluate field {name}"))
            .with_hint(format!("Available fields here: {known}."))),
        None => Ok(()),
    }
}

fn compile_action(source: &str, expr: &str) -> Result<Action, Error> {
    if expr.is_empty() {
        return Err(template_error(source, "empty action `{{}}`"));
    }
    check_view_fields(source, expr)?;
    let arena = Arena::default();
    let loader = Loader::new(jaq_std::defs().chain(jaq_json::defs()));

    let program = File {
        code: expr,
        path: (),
    };
    let modules = loader
        .load(&arena, program)
        .map_err(|errs| action_compile_error(source, expr, errs))?;

    let filter = Compiler::default()
        .with_funs(jaq_std::funs().chain(jaq_json::funs()))
        .compile(modules)
        .map_err(|errs| action_compile_error(source, expr, errs))?;

    Ok(Action {
        expr: expr.to_string(),
        filter,
    })
}

fn template_error(source: &str, message: &str) -> Error {
    Error::new(ErrorKind::Template).with_message(format!("invalid template `{source}`: {message}"))
}

fn action_compile_error<E: fmt::Debug>(source: &str, expr: &str, err: E) -> Error {
    template_error(source, &format!("cannot parse action `{expr}`")).with_hint(format!(
        "Actions are jq paths or filters.\nDetails: {err:?}\nExample: --template '{{{{.Key}}}} {{{{.Value.metadata.uid}}}}'"
    ))
}
