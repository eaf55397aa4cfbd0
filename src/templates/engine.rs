//! Tera template engine wrapper.
//!
//! Provides template loading, rendering, and management.

use std::error::Error as _;
use std::path::Path;
use std::sync::Arc;

use tera::{Context, Tera};
use tracing::{debug, info};

use super::filters;
use super::BUILTIN_TEMPLATES;
use crate::error::{DaemonError, TemplateErrorKind};

/// Template engine for rendering configuration files.
///
/// Rendering is a pure function of template and context: the same inputs
/// always produce byte-identical output.
#[derive(Clone)]
pub struct TemplateEngine {
    tera: Arc<Tera>,
}

impl TemplateEngine {
    /// Create an engine from the built-in templates, overridden by any
    /// `.tera` files found under `override_dir`.
    ///
    /// A missing override directory is not an error.
    pub fn new(override_dir: &Path) -> Result<Self, DaemonError> {
        let mut tera = if override_dir.is_dir() {
            let pattern = override_dir.join("**/*.tera");
            let pattern_str = pattern.to_string_lossy();

            debug!(pattern = %pattern_str, "Loading template overrides");

            Tera::new(&pattern_str).map_err(|e| DaemonError::Template {
                kind: TemplateErrorKind::Load {
                    message: format!(
                        "Failed to load templates from '{}': {}",
                        override_dir.display(),
                        error_chain(&e)
                    ),
                },
            })?
        } else {
            Tera::default()
        };

        let overrides = tera.get_template_names().count();
        add_builtins(&mut tera)?;
        register_filters(&mut tera);

        info!(
            directory = %override_dir.display(),
            overrides,
            count = tera.get_template_names().count(),
            "Template engine initialized"
        );

        Ok(Self {
            tera: Arc::new(tera),
        })
    }

    /// Create an engine holding only the built-in templates.
    pub fn builtin() -> Result<Self, DaemonError> {
        let mut tera = Tera::default();
        add_builtins(&mut tera)?;
        register_filters(&mut tera);
        Ok(Self {
            tera: Arc::new(tera),
        })
    }

    /// Create an engine from explicit `(name, source)` pairs.
    pub fn from_sources<'a>(
        sources: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, DaemonError> {
        let mut tera = Tera::default();
        for (name, source) in sources {
            add_template(&mut tera, name, source)?;
        }
        register_filters(&mut tera);
        Ok(Self {
            tera: Arc::new(tera),
        })
    }

    /// Render a template with the given context.
    ///
    /// String values containing a line break or NUL are rejected before
    /// rendering. Every rendered directive is single-line, and such a value
    /// would otherwise inject directives into the output.
    pub fn render(
        &self,
        template_name: &str,
        context: &serde_json::Value,
    ) -> Result<String, DaemonError> {
        if !self.has_template(template_name) {
            return Err(DaemonError::Template {
                kind: TemplateErrorKind::NotFound {
                    name: template_name.to_string(),
                },
            });
        }

        let render_error = |message: String| DaemonError::Template {
            kind: TemplateErrorKind::Render {
                template: template_name.to_string(),
                message,
            },
        };

        guard_context(context, "").map_err(render_error)?;

        let tera_context = Context::from_serialize(context)
            .map_err(|e| render_error(format!("Invalid template context: {}", error_chain(&e))))?;

        self.tera
            .render(template_name, &tera_context)
            .map_err(|e| render_error(error_chain(&e)))
    }

    /// Check if a template exists.
    pub fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }

    /// List all available template names, sorted.
    pub fn list_templates(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tera.get_template_names().collect();
        names.sort_unstable();
        names
    }

    /// Get the number of loaded templates.
    pub fn template_count(&self) -> usize {
        self.tera.get_template_names().count()
    }
}

fn add_builtins(tera: &mut Tera) -> Result<(), DaemonError> {
    for (name, source) in BUILTIN_TEMPLATES {
        if tera.get_template_names().any(|n| n == *name) {
            debug!(template = name, "Built-in template overridden");
            continue;
        }
        add_template(tera, name, source)?;
    }
    Ok(())
}

fn add_template(tera: &mut Tera, name: &str, source: &str) -> Result<(), DaemonError> {
    tera.add_raw_template(name, source)
        .map_err(|e| DaemonError::Template {
            kind: TemplateErrorKind::Load {
                message: format!("Failed to parse template '{}': {}", name, error_chain(&e)),
            },
        })
}

fn register_filters(tera: &mut Tera) {
    tera.register_filter("section", filters::section);
    tera.register_filter("exports_path", filters::exports_path);
}

/// Walk the context and reject strings that would span lines.
fn guard_context(value: &serde_json::Value, path: &str) -> Result<(), String> {
    match value {
        serde_json::Value::String(s) => {
            if let Some(c) = s.chars().find(|c| matches!(c, '\n' | '\r' | '\0')) {
                return Err(format!(
                    "value at '{}' contains forbidden character {:?}",
                    if path.is_empty() { "." } else { path },
                    c
                ));
            }
            Ok(())
        }
        serde_json::Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                guard_context(item, &format!("{}[{}]", path, i))?;
            }
            Ok(())
        }
        serde_json::Value::Object(map) => {
            for (key, item) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                guard_context(item, &child)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Tera reports the useful part of an error in its source chain.
fn error_chain(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
