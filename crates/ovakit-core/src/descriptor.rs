//! Appliance descriptor rendering.
//!
//! Descriptor templates interpolate properties with `${p.field}`. Expressions
//! are handed to Tera, so its `{% if %}` and `{% for %}` blocks work in the
//! same template. Referencing an attribute that does not exist is an error.
//!
//! The rest of the template is Tera source as well: `{{`, `{%` and `{#`
//! outside a `${}` expression open Tera tags and comments. Text that must
//! reach the descriptor verbatim goes inside `{% raw %}...{% endraw %}`.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tera::{Context, Tera};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::properties::{file_stem, ApplianceProperties};

/// File extension of rendered descriptors.
pub const DESCRIPTOR_EXTENSION: &str = "ovf";

/// Name under which the property set is visible to templates.
pub const PROPERTIES_NAME: &str = "p";

const TEMPLATE_NAME: &str = "descriptor";

/// A compiled descriptor template.
#[derive(Debug)]
pub struct DescriptorTemplate {
    tera: Tera,
}

impl DescriptorTemplate {
    /// Read and compile the template at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::config(format!(
                "descriptor template '{}' does not exist",
                path.display()
            )));
        }
        let source = fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
        let template = Self::from_source(&source).map_err(|e| match e {
            Error::Config { message } => {
                Error::config(format!("template '{}': {}", path.display(), message))
            }
            other => other,
        })?;
        debug!(path = %path.display(), bytes = source.len(), "loaded descriptor template");
        Ok(template)
    }

    /// Compile a template from its source text.
    pub fn from_source(source: &str) -> Result<Self> {
        let translated = translate_interpolations(source)?;
        let mut tera = Tera::default();
        tera.autoescape_on(Vec::new());
        tera.add_raw_template(TEMPLATE_NAME, &translated)
            .map_err(|e| Error::config(error_chain(&e)))?;
        Ok(Self { tera })
    }

    /// Render the descriptor for a set of appliance properties.
    pub fn render(&self, properties: &ApplianceProperties) -> Result<String> {
        let rendered = self.render_context(properties)?;
        info!(
            virtual_system_id = %properties.virtual_system_id,
            bytes = rendered.len(),
            "rendered appliance descriptor"
        );
        Ok(rendered)
    }

    /// Render against any serializable property set.
    pub fn render_context<T: Serialize>(&self, properties: &T) -> Result<String> {
        let mut context = Context::new();
        context.insert(PROPERTIES_NAME, properties);
        self.tera
            .render(TEMPLATE_NAME, &context)
            .map_err(|e| Error::render(error_chain(&e)))
    }
}

/// Descriptor file name for a disk image: its stem plus `.ovf`.
pub fn descriptor_file_name(image_path: &Path) -> Result<String> {
    Ok(format!("{}.{}", file_stem(image_path)?, DESCRIPTOR_EXTENSION))
}

/// Rewrite `${expr}` into Tera's `{{ expr }}`.
fn translate_interpolations(source: &str) -> Result<String> {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let mut depth = 0usize;
        let mut end = None;
        for (i, c) in after.char_indices() {
            match c {
                '{' => depth += 1,
                '}' if depth == 0 => {
                    end = Some(i);
                    break;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }

        let end = end.ok_or_else(|| {
            let line = source[..source.len() - rest.len() + start].matches('\n').count() + 1;
            Error::config(format!("unterminated '${{' on line {}", line))
        })?;
        let expr = after[..end].trim();
        if expr.is_empty() {
            return Err(Error::config("empty '${}' expression"));
        }
        out.push_str("{{ ");
        out.push_str(expr);
        out.push_str(" }}");
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Tera nests the useful message in the error's source chain.
fn error_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
