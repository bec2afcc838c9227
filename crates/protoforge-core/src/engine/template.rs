//! Rendering backend boundary.
//!
//! The template language itself is an external collaborator: the engine
//! only hands it a context and consumes rendered text. [`RenderBackend`]
//! is the seam, [`TeraRenderer`] the default implementation.
//!
//! The Tera instance registers the shared identifier-conversion filters so
//! every template spells names through the same rules as the generator
//! itself: `lower_rule`, `upper_rule`, `camel_rule`, `camel_lower_rule`,
//! `unchanged_rule` and `cpp_namespace_prefix`.

use crate::model::naming::{self, convert, NameMode};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tera::{Context, Tera, Value};

/// Rendering seam between the generation engine and the template language.
pub trait RenderBackend {
    /// Render a template file against a context.
    fn render_file(&mut self, template: &Path, context: &Context)
        -> Result<String, tera::Error>;

    /// Render an inline template source (output-path rules) against a context.
    fn render_str(&mut self, source: &str, context: &Context) -> Result<String, tera::Error>;

    /// True when the text contains the engine's expression-start marker and
    /// therefore needs rendering instead of literal use.
    fn has_expression(&self, text: &str) -> bool {
        text.contains("{{") || text.contains("{%")
    }
}

/// Tera-backed renderer with the naming filters registered.
pub struct TeraRenderer {
    tera: Tera,
    registered: HashSet<String>,
}

impl Default for TeraRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn name_filter(
    mode: NameMode,
    separator: &'static str,
) -> impl Fn(&Value, &HashMap<String, Value>) -> tera::Result<Value> + Send + Sync {
    move |value, _args| {
        let name = value
            .as_str()
            .ok_or_else(|| tera::Error::msg("naming filters expect a string value"))?;
        Ok(Value::String(convert(name, mode, separator)))
    }
}

impl TeraRenderer {
    /// Create an empty renderer; generated output is code, so autoescaping
    /// is disabled.
    pub fn new() -> Self {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.register_filter("lower_rule", name_filter(NameMode::Lower, "_"));
        tera.register_filter("upper_rule", name_filter(NameMode::Upper, "_"));
        tera.register_filter("camel_rule", name_filter(NameMode::Camel, ""));
        tera.register_filter(
            "camel_lower_rule",
            name_filter(NameMode::CamelFirstLower, ""),
        );
        tera.register_filter("unchanged_rule", name_filter(NameMode::Unchanged, "."));
        tera.register_filter(
            "cpp_namespace_prefix",
            |value: &Value, _args: &HashMap<String, Value>| {
                let name = value
                    .as_str()
                    .ok_or_else(|| tera::Error::msg("cpp_namespace_prefix expects a string"))?;
                Ok(Value::String(naming::cpp_namespace_prefix(name)))
            },
        );
        Self {
            tera,
            registered: HashSet::new(),
        }
    }
}

impl RenderBackend for TeraRenderer {
    fn render_file(&mut self, template: &Path, context: &Context) -> Result<String, tera::Error> {
        let name = template.to_string_lossy().into_owned();
        if !self.registered.contains(&name) {
            self.tera.add_template_file(template, Some(&name))?;
            self.registered.insert(name.clone());
        }
        self.tera.render(&name, context)
    }

    fn render_str(&mut self, source: &str, context: &Context) -> Result<String, tera::Error> {
        self.tera.render_str(source, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_expression_marker_detection() {
        let renderer = TeraRenderer::new();
        assert!(renderer.has_expression("{{ rpc.name }}.h"));
        assert!(renderer.has_expression("{% if x %}a{% endif %}"));
        assert!(!renderer.has_expression("task_action_auth.h"));
    }

    #[test]
    fn test_render_str_with_naming_filters() {
        let mut renderer = TeraRenderer::new();
        let mut context = Context::new();
        context.insert("rpc", &json!({ "name": "get_user_info" }));

        let out = renderer
            .render_str("task_{{ rpc.name | lower_rule }}.h", &context)
            .expect("render");
        assert_eq!(out, "task_get_user_info.h");

        let out = renderer
            .render_str("{{ rpc.name | camel_rule }}", &context)
            .expect("render");
        assert_eq!(out, "GetUserInfo");

        let out = renderer
            .render_str("{{ \"acme.login\" | cpp_namespace_prefix }}", &context)
            .expect("render");
        assert_eq!(out, "acme::login");
    }

    #[test]
    fn test_render_file_and_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template_path = dir.path().join("rpc.txt.tera");
        let mut file = std::fs::File::create(&template_path).expect("create template");
        writeln!(file, "rpc {{{{ rpc.name }}}} of {{{{ service }}}}").expect("write template");
        drop(file);

        let mut renderer = TeraRenderer::new();
        let mut context = Context::new();
        context.insert("rpc", &json!({ "name": "Auth" }));
        context.insert("service", &json!("Login"));

        let out = renderer
            .render_file(&template_path, &context)
            .expect("render file");
        assert_eq!(out, "rpc Auth of Login\n");

        // second render reuses the registered template
        let out = renderer
            .render_file(&template_path, &context)
            .expect("render cached");
        assert_eq!(out, "rpc Auth of Login\n");
    }

    #[test]
    fn test_render_missing_variable_fails() {
        let mut renderer = TeraRenderer::new();
        let context = Context::new();
        assert!(renderer.render_str("{{ missing.name }}", &context).is_err());
    }

    #[test]
    fn test_autoescape_disabled_for_code_output() {
        let mut renderer = TeraRenderer::new();
        let mut context = Context::new();
        context.insert("decl", &json!("std::vector<int>&"));
        let out = renderer.render_str("{{ decl }}", &context).expect("render");
        assert_eq!(out, "std::vector<int>&");
    }
}
