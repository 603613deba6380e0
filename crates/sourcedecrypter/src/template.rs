//! Placeholder templates
//!
//! A target file's own content is the template, compiled with Handlebars.
//! Placeholders reference secrets through the render context:
//!
//! ```text
//! password: {{ encryptedSecrets.db_password }}
//! token: {{ encryptedSecrets.[api token] }}
//! token: {{ lookup encryptedSecrets "api token" }}
//! {{! comments render nothing }}
//! ```
//!
//! Every reference is checked with [`RenderContext::lookup`] before anything
//! is rendered, so an undefined secret never reaches the engine. Block
//! helpers, partials, decorators and helpers other than `lookup` are rejected
//! when the template is parsed. Output is not HTML-escaped.

use crate::secrets::{LookupError, RenderContext};
use handlebars::template::{HelperTemplate, Parameter, Template as Compiled, TemplateElement};
use handlebars::{Handlebars, no_escape};
use std::collections::BTreeMap;
use std::io::Write;
use thiserror::Error;

/// The only helper a placeholder may call.
const LOOKUP_HELPER: &str = "lookup";

/// Malformed or unsupported template syntax.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The source is not valid UTF-8.
    #[error("template is not valid UTF-8")]
    NotUtf8,

    /// The engine rejected the template syntax.
    #[error("{source}")]
    Syntax {
        /// Engine error with line and column
        #[source]
        source: Box<handlebars::TemplateError>,
    },

    /// A construct outside the placeholder subset.
    #[error("line {line}: unsupported template construct \"{construct}\"")]
    Unsupported {
        /// Line of the construct
        line: usize,
        /// The construct, as far as it can be named
        construct: String,
    },
}

/// Failure while rendering a parsed template.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A placeholder does not resolve under strict lookup.
    #[error("line {line}: executing \"{placeholder}\": {source}")]
    Lookup {
        /// Line of the placeholder
        line: usize,
        /// The placeholder as written
        placeholder: String,
        /// Why it does not resolve
        #[source]
        source: LookupError,
    },

    /// The engine failed after every reference resolved.
    #[error("{source}")]
    Engine {
        /// Engine error
        #[source]
        source: Box<handlebars::RenderError>,
    },

    /// Writing rendered output failed.
    #[error("failed to write rendered output: {0}")]
    Io(#[from] std::io::Error),
}

/// One secret reference inside a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Path below the context root, e.g. `["encryptedSecrets", "db_password"]`
    pub path: Vec<String>,
    /// 1-based line of the placeholder, 0 if the engine reports none
    pub line: usize,
    /// The reference as written, for error messages
    pub source: String,
}

/// A parsed template.
pub struct Template {
    name: String,
    registry: Handlebars<'static>,
    placeholders: Vec<Placeholder>,
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("placeholders", &self.placeholders)
            .finish_non_exhaustive()
    }
}

impl Template {
    /// Parse `source` as a template called `name`.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for invalid UTF-8, invalid syntax, or a
    /// construct other than a secret reference or comment.
    pub fn parse(name: impl Into<String>, source: &[u8]) -> Result<Self, ParseError> {
        let name = name.into();
        let text = std::str::from_utf8(source).map_err(|_| ParseError::NotUtf8)?;
        let compiled = Compiled::compile(text).map_err(|e| ParseError::Syntax {
            source: Box::new(e.in_template(name.clone())),
        })?;

        let mut placeholders = Vec::new();
        collect_placeholders(&compiled, &mut placeholders)?;

        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(no_escape);
        registry.register_template(&name, compiled);

        Ok(Self {
            name,
            registry,
            placeholders,
        })
    }

    /// The template's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All placeholders in document order.
    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.placeholders.iter()
    }

    /// Names of the secrets this template references.
    pub fn referenced_secrets(&self) -> impl Iterator<Item = &str> {
        self.placeholders().filter_map(|p| match p.path.as_slice() {
            [namespace, name, ..] if namespace == crate::SECRETS_NAMESPACE => Some(name.as_str()),
            _ => None,
        })
    }

    /// Resolve every placeholder, then render into `out`.
    ///
    /// Nothing is written unless every placeholder resolves.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Lookup`] for the first unresolved reference,
    /// [`RenderError::Engine`] if the engine fails, and [`RenderError::Io`]
    /// when `out` fails.
    pub fn render_to<W: Write + ?Sized>(
        &self,
        ctx: &RenderContext<'_>,
        out: &mut W,
    ) -> Result<(), RenderError> {
        // Only referenced secrets are handed to the engine.
        let mut visible: BTreeMap<&str, &str> = BTreeMap::new();
        for placeholder in &self.placeholders {
            let value = ctx
                .lookup(placeholder.path.as_slice())
                .map_err(|source| RenderError::Lookup {
                    line: placeholder.line,
                    placeholder: placeholder.source.clone(),
                    source,
                })?;
            visible.insert(placeholder.path[1].as_str(), value);
        }
        let data = BTreeMap::from([(crate::SECRETS_NAMESPACE, visible)]);

        let rendered = self
            .registry
            .render(&self.name, &data)
            .map_err(|e| RenderError::Engine {
                source: Box::new(e),
            })?;
        out.write_all(rendered.as_bytes())?;
        Ok(())
    }

    /// Render into a buffer.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Lookup`] for an unresolved reference.
    pub fn render(&self, ctx: &RenderContext<'_>) -> Result<Vec<u8>, RenderError> {
        let mut out = Vec::new();
        self.render_to(ctx, &mut out)?;
        Ok(out)
    }
}

/// Walk the top level of a compiled template, recording each reference.
fn collect_placeholders(compiled: &Compiled, out: &mut Vec<Placeholder>) -> Result<(), ParseError> {
    for (index, element) in compiled.elements.iter().enumerate() {
        let line = compiled.mapping.get(index).map_or(0, |m| m.0);
        match element {
            TemplateElement::RawString(_) | TemplateElement::Comment(_) => {}
            TemplateElement::Expression(helper) | TemplateElement::HtmlExpression(helper) => {
                out.push(placeholder(helper, line)?);
            }
            TemplateElement::HelperBlock(helper) => {
                return Err(unsupported(line, format!("#{}", param_name(&helper.name))));
            }
            _ => return Err(unsupported(line, "partial or decorator".to_string())),
        }
    }
    Ok(())
}

/// Turn `{{ path }}` or `{{ lookup path "key" }}` into a placeholder.
fn placeholder(helper: &HelperTemplate, line: usize) -> Result<Placeholder, ParseError> {
    let name = param_name(&helper.name);
    if !helper.hash.is_empty() || helper.block_param.is_some() {
        return Err(unsupported(line, name));
    }

    if helper.params.is_empty() {
        let path = split_path(&name).ok_or_else(|| unsupported(line, name.clone()))?;
        return Ok(Placeholder {
            path,
            line,
            source: name,
        });
    }

    match helper.params.as_slice() {
        [base, Parameter::Literal(serde_json::Value::String(key))] if name == LOOKUP_HELPER => {
            let base = param_name(base);
            let mut path = split_path(&base).ok_or_else(|| unsupported(line, base.clone()))?;
            path.push(key.clone());
            Ok(Placeholder {
                path,
                line,
                source: format!("{LOOKUP_HELPER} {base} \"{key}\""),
            })
        }
        _ => Err(unsupported(line, name)),
    }
}

fn param_name(param: &Parameter) -> String {
    match param {
        Parameter::Literal(value) => value.to_string(),
        other => other.as_name().unwrap_or("(subexpression)").to_string(),
    }
}

fn unsupported(line: usize, construct: String) -> ParseError {
    ParseError::Unsupported { line, construct }
}

/// Split a raw Handlebars path into segments.
///
/// `this`, `.` and `./` prefixes address the root; `[...]` quotes a segment.
/// Parent (`..`) and `@data` paths are not references and yield `None`.
fn split_path(raw: &str) -> Option<Vec<String>> {
    let raw = raw.trim();
    let rest = ["this.", "this/", "./"]
        .iter()
        .find_map(|prefix| raw.strip_prefix(prefix))
        .unwrap_or(raw);
    if rest == "this" || rest == "." || rest.is_empty() {
        return Some(Vec::new());
    }
    if rest.starts_with('@') || rest.starts_with("..") {
        return None;
    }

    let mut segments = Vec::new();
    let mut chars = rest.chars();
    let mut current = String::new();
    while let Some(c) = chars.next() {
        match c {
            '[' if current.is_empty() => {
                current.extend(chars.by_ref().take_while(|&c| c != ']'));
                segments.push(std::mem::take(&mut current));
                match chars.next() {
                    None => break,
                    Some('.' | '/') => {}
                    Some(_) => return None,
                }
            }
            '.' | '/' => {
                if current.is_empty() || current == ".." {
                    return None;
                }
                segments.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    Some(segments)
}
