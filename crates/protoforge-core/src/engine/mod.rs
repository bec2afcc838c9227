//! Generic hierarchical generation-rule engine.
//!
//! A [`GenerationRule`] pairs an outer entity kind (service, message, enum,
//! the whole descriptor set, or nothing for global rules) with an inner
//! entity kind (rpc, field, enum value, file) and a set of template rules
//! per level. [`GenerationEngine::run`] executes one rule in two
//! independent passes:
//!
//! - the **outer pass** applies each outer template rule exactly once;
//! - the **inner pass** narrows the inner entity map through the
//!   [`SelectionFilter`] and applies each inner template rule once per
//!   surviving entity.
//!
//! Both passes share the same output-path resolution, overwrite cascade and
//! forward-to-writer sequence. A missing template file skips that template
//! rule and the run continues; a render failure aborts the whole run,
//! because partial schema output is unsafe to leave on disk.

pub mod select;
pub mod template;

pub use select::{Selectable, SelectionFilter};
pub use template::{RenderBackend, TeraRenderer};

use crate::cache::GENERATOR_NAME;
use crate::database::SymbolDatabase;
use crate::error::{Error, Result};
use crate::model::{EnumValueModel, FieldModel, FileModel, RpcModel};
use crate::writer::{CodeFormatter, OutputWriter, WriteUnit};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tera::Context;
use tracing::{info, warn};

/// The outer/inner entity pairing a rule operates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// One render per template rule, no outer entity, whole database visible
    Global,
    /// Outer service, inner rpcs
    Service,
    /// Outer message, inner fields
    Message,
    /// Outer enum, inner enum values
    Enum,
    /// Inner files of the primary payload; no outer pass
    File,
}

impl RuleKind {
    /// Context key the outer value is bound under.
    pub fn outer_key(&self) -> &'static str {
        match self {
            RuleKind::Global => "database",
            RuleKind::Service => "service",
            RuleKind::Message => "message",
            RuleKind::Enum => "enum",
            RuleKind::File => "file_descriptor_set",
        }
    }

    /// Context key a bound inner entity is rebound under.
    pub fn inner_key(&self) -> Option<&'static str> {
        match self {
            RuleKind::Global => None,
            RuleKind::Service => Some("rpc"),
            RuleKind::Message => Some("field"),
            RuleKind::Enum => Some("enumvalue"),
            RuleKind::File => Some("file"),
        }
    }

    /// Context key of the surviving inner-entity mapping.
    pub fn inner_set_key(&self) -> Option<&'static str> {
        match self {
            RuleKind::Global => None,
            RuleKind::Service => Some("rpcs"),
            RuleKind::Message => Some("fields"),
            RuleKind::Enum => Some("enumvalues"),
            RuleKind::File => Some("files"),
        }
    }

    /// Key prefix of the outer export-decoration context value.
    fn outer_decl_key(&self) -> &'static str {
        match self {
            RuleKind::Global => "global",
            other => other.outer_key(),
        }
    }
}

/// Well-known template suffixes stripped when deriving an output name from
/// a template path.
const TEMPLATE_SUFFIXES: [&str; 3] = [".template", ".tpl", ".tera"];

/// Strip well-known template suffixes, repeatedly.
pub fn strip_template_suffix(name: &str) -> &str {
    let mut name = name;
    loop {
        let before = name;
        for suffix in TEMPLATE_SUFFIXES {
            if let Some(stripped) = name.strip_suffix(suffix) {
                name = stripped;
            }
        }
        if name == before {
            return name;
        }
    }
}

/// One template with its output-path rule and optional overwrite override.
#[derive(Debug, Clone)]
pub struct TemplateRule {
    /// Path of the template file
    pub template: PathBuf,
    /// Output-path rule; rendered when it contains the template engine's
    /// expression marker, used literally otherwise
    pub output_rule: String,
    /// Overwrite override for this template rule alone
    pub overwrite: Option<bool>,
}

impl TemplateRule {
    /// Parse a `template:output` option value. Without the `:output` part
    /// the output name derives from the template basename with well-known
    /// template suffixes stripped.
    pub fn parse(rule: &str) -> Self {
        match rule.find(':') {
            Some(pos) if pos > 0 && pos + 1 < rule.len() => Self {
                template: PathBuf::from(&rule[..pos]),
                output_rule: rule[pos + 1..].to_string(),
                overwrite: None,
            },
            _ => Self::from_template_path(rule.trim_end_matches(':'), None),
        }
    }

    /// Build a rule from structured configuration.
    pub fn new(template: impl Into<PathBuf>, output: Option<String>, overwrite: Option<bool>) -> Self {
        let template = template.into();
        match output {
            Some(output) if !output.is_empty() => Self {
                template,
                output_rule: output,
                overwrite,
            },
            _ => {
                let mut rule = Self::from_template_path(&template.to_string_lossy(), overwrite);
                rule.template = template;
                rule
            }
        }
    }

    fn from_template_path(path: &str, overwrite: Option<bool>) -> Self {
        let basename = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Self {
            template: PathBuf::from(path),
            output_rule: strip_template_suffix(&basename).to_string(),
            overwrite: None,
        }
        .with_overwrite(overwrite)
    }

    fn with_overwrite(mut self, overwrite: Option<bool>) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// Cascade the overwrite decision: template rule, then rule, then the
/// process-global default; the first configured level wins.
fn effective_overwrite(
    template_level: Option<bool>,
    rule_level: Option<bool>,
    default_allow: bool,
) -> bool {
    template_level.or(rule_level).unwrap_or(default_allow)
}

/// One configured generation rule.
#[derive(Debug, Clone)]
pub struct GenerationRule {
    /// Outer/inner entity pairing
    pub kind: RuleKind,
    /// Full name of the outer entity (service/message/enum rules)
    pub outer_name: Option<String>,
    /// Templates applied once for the rule's outer level
    pub outer_templates: Vec<TemplateRule>,
    /// Templates applied per surviving inner entity
    pub inner_templates: Vec<TemplateRule>,
    /// Inner-entity selection policy
    pub filter: SelectionFilter,
    /// Output directory override for this rule
    pub output_directory: Option<PathBuf>,
    /// Overwrite override for this rule
    pub overwrite: Option<bool>,
    /// Custom variables merged over the process-level ones
    pub custom_variables: BTreeMap<String, JsonValue>,
    /// Export decoration bound for the outer level
    pub outer_export_decl: String,
    /// Export decoration bound for the inner level
    pub inner_export_decl: String,
    /// Formatter override for this rule
    pub formatter: Option<CodeFormatter>,
}

impl GenerationRule {
    /// An empty rule of the given kind.
    pub fn new(kind: RuleKind) -> Self {
        Self {
            kind,
            outer_name: None,
            outer_templates: Vec::new(),
            inner_templates: Vec::new(),
            filter: SelectionFilter::keep_all(),
            output_directory: None,
            overwrite: None,
            custom_variables: BTreeMap::new(),
            outer_export_decl: String::new(),
            inner_export_decl: String::new(),
            formatter: None,
        }
    }
}

/// Process-level settings shared by every rule of a run.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Default output directory when a rule has none
    pub output_directory: PathBuf,
    /// Global overwrite default (`false` under `--no-overwrite`)
    pub allow_overwrite: bool,
    /// Resolve output paths without rendering or writing anything
    pub list_only: bool,
    /// VCS username bound as `local_vcs_user_name`
    pub vcs_username: String,
    /// Process-level custom variables
    pub custom_variables: BTreeMap<String, JsonValue>,
    /// Process-level formatter
    pub formatter: Option<CodeFormatter>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("."),
            allow_overwrite: true,
            list_only: false,
            vcs_username: GENERATOR_NAME.to_string(),
            custom_variables: BTreeMap::new(),
            formatter: None,
        }
    }
}

/// Outcome of one executed rule.
#[derive(Debug, Default)]
pub struct RuleOutcome {
    /// Output paths that were rendered and forwarded (or, under
    /// `list_only`, would have been)
    pub outputs: Vec<PathBuf>,
    /// Existing outputs skipped by the overwrite policy
    pub skipped_existing: Vec<PathBuf>,
    /// Template rules skipped because their template file is missing
    pub missing_templates: Vec<PathBuf>,
}

/// One inner entity bound into the rendering context.
enum InnerItem {
    Rpc(Arc<RpcModel>),
    Field(Arc<FieldModel>),
    EnumValue(Arc<EnumValueModel>),
    File(Arc<FileModel>),
}

impl InnerItem {
    fn context_value(&self) -> JsonValue {
        match self {
            InnerItem::Rpc(rpc) => rpc.context_value(),
            InnerItem::Field(field) => field.context_value(),
            InnerItem::EnumValue(value) => value.context_value(),
            InnerItem::File(file) => file.context_value(),
        }
    }

    fn full_name(&self) -> &str {
        match self {
            InnerItem::Rpc(rpc) => rpc.full_name(),
            InnerItem::Field(field) => field.full_name(),
            InnerItem::EnumValue(value) => value.full_name(),
            InnerItem::File(file) => file.full_name(),
        }
    }
}

impl Selectable for InnerItem {
    fn bare_name(&self) -> &str {
        match self {
            InnerItem::Rpc(rpc) => rpc.name(),
            InnerItem::Field(field) => field.name(),
            InnerItem::EnumValue(value) => value.name(),
            InnerItem::File(file) => file.name(),
        }
    }

    fn in_dataset(&self, checked: &HashSet<String>) -> bool {
        match self {
            InnerItem::Rpc(rpc) => rpc.is_in_dataset(checked),
            InnerItem::Field(field) => field.is_in_dataset(checked),
            InnerItem::EnumValue(_) => false,
            InnerItem::File(file) => file.is_in_dataset(checked),
        }
    }
}

/// Executes generation rules against one database.
pub struct GenerationEngine<'a> {
    database: &'a SymbolDatabase,
    backend: &'a mut dyn RenderBackend,
    writer: &'a OutputWriter,
    settings: &'a EngineSettings,
}

impl<'a> GenerationEngine<'a> {
    /// Bind the engine to its collaborators.
    pub fn new(
        database: &'a SymbolDatabase,
        backend: &'a mut dyn RenderBackend,
        writer: &'a OutputWriter,
        settings: &'a EngineSettings,
    ) -> Self {
        Self {
            database,
            backend,
            writer,
            settings,
        }
    }

    /// Execute one rule. A missing outer entity or template file is a
    /// recoverable configuration error; a render failure is fatal.
    pub fn run(&mut self, rule: &GenerationRule) -> Result<RuleOutcome> {
        let mut outcome = RuleOutcome::default();

        let (outer_value, inner_map) = self.resolve_entities(rule)?;
        let selected = rule.filter.apply(&inner_map);
        let selected_value = JsonValue::Object(
            selected
                .iter()
                .map(|(name, item)| (name.clone(), item.context_value()))
                .collect(),
        );

        let mut context = self.base_context(rule);
        context.insert(rule.kind.outer_key(), &outer_value);
        if let Some(set_key) = rule.kind.inner_set_key() {
            context.insert(set_key, &selected_value);
        }

        // outer pass: file-shaped rules have no single outer entity
        if rule.kind != RuleKind::File {
            let mut outer_context = context.clone();
            if rule.kind != RuleKind::Global {
                outer_context.insert("current_instance", &outer_value);
            }
            let entity = rule.outer_name.as_deref().unwrap_or(rule.kind.outer_key());
            for template_rule in &rule.outer_templates {
                self.apply_template(rule, template_rule, &mut outer_context, entity, &mut outcome)?;
            }
        }

        // inner pass: rebind the current entity per survivor
        if let Some(inner_key) = rule.kind.inner_key() {
            for template_rule in &rule.inner_templates {
                for (_, item) in selected.iter() {
                    let mut inner_context = context.clone();
                    let value = item.context_value();
                    inner_context.insert(inner_key, &value);
                    inner_context.insert("current_instance", &value);
                    self.apply_template(
                        rule,
                        template_rule,
                        &mut inner_context,
                        item.full_name(),
                        &mut outcome,
                    )?;
                }
            }
        }

        Ok(outcome)
    }

    /// Resolve the rule's outer context value and raw inner-entity map.
    fn resolve_entities(
        &self,
        rule: &GenerationRule,
    ) -> Result<(JsonValue, BTreeMap<String, InnerItem>)> {
        let mut inner = BTreeMap::new();
        let outer = match rule.kind {
            RuleKind::Global => self.database.context_value(),
            RuleKind::File => {
                for (name, file) in self.database.file_models() {
                    inner.insert(name, InnerItem::File(file));
                }
                self.database.context_value()
            }
            RuleKind::Service => {
                let name = rule.outer_name.as_deref().unwrap_or_default();
                let service = self
                    .database
                    .get_service(name)
                    .ok_or_else(|| Error::symbol_not_found("service", name))?;
                for (rpc_name, rpc) in service.rpcs() {
                    inner.insert(rpc_name.clone(), InnerItem::Rpc(Arc::clone(rpc)));
                }
                service.context_value()
            }
            RuleKind::Message => {
                let name = rule.outer_name.as_deref().unwrap_or_default();
                let message = self
                    .database
                    .get_message(name)
                    .ok_or_else(|| Error::symbol_not_found("message", name))?;
                for (field_name, field) in message.fields_by_name() {
                    inner.insert(field_name.clone(), InnerItem::Field(Arc::clone(field)));
                }
                message.context_value()
            }
            RuleKind::Enum => {
                let name = rule.outer_name.as_deref().unwrap_or_default();
                let enumeration = self
                    .database
                    .get_enum(name)
                    .ok_or_else(|| Error::symbol_not_found("enum", name))?;
                for (value_name, value) in enumeration.values_by_name() {
                    inner.insert(value_name.clone(), InnerItem::EnumValue(Arc::clone(value)));
                }
                enumeration.context_value()
            }
        };
        Ok((outer, inner))
    }

    /// Context entries shared by both passes.
    fn base_context(&self, rule: &GenerationRule) -> Context {
        let mut context = Context::new();
        context.insert("generator", GENERATOR_NAME);
        context.insert("local_vcs_user_name", &self.settings.vcs_username);
        context.insert("output_render_path", &JsonValue::Null);
        context.insert("output_file_path", &JsonValue::Null);
        context.insert(
            format!("{}_dllexport_decl", rule.kind.outer_decl_key()),
            &rule.outer_export_decl,
        );
        if let Some(inner_key) = rule.kind.inner_key() {
            context.insert(
                format!("{}_dllexport_decl", inner_key),
                &rule.inner_export_decl,
            );
        }
        for (key, value) in &self.settings.custom_variables {
            context.insert(key.as_str(), value);
        }
        for (key, value) in &rule.custom_variables {
            context.insert(key.as_str(), value);
        }
        context
    }

    /// Resolve the output path, apply the overwrite cascade, render and
    /// forward one template rule for the currently-bound entity.
    fn apply_template(
        &mut self,
        rule: &GenerationRule,
        template_rule: &TemplateRule,
        context: &mut Context,
        entity: &str,
        outcome: &mut RuleOutcome,
    ) -> Result<()> {
        if !template_rule.template.exists() {
            warn!(template = %template_rule.template.display(), "template file not found, skipping");
            outcome.missing_templates.push(template_rule.template.clone());
            return Ok(());
        }

        let rendered_name = if self.backend.has_expression(&template_rule.output_rule) {
            self.backend
                .render_str(&template_rule.output_rule, context)
                .map_err(|e| Error::render(&template_rule.template, entity, e))?
        } else {
            template_rule.output_rule.clone()
        };
        context.insert("output_render_path", &rendered_name);

        let output_dir = rule
            .output_directory
            .as_deref()
            .unwrap_or(&self.settings.output_directory);
        let output_path = output_dir.join(&rendered_name);

        if self.settings.list_only {
            outcome.outputs.push(output_path);
            return Ok(());
        }

        if output_path.exists() {
            let allow = effective_overwrite(
                template_rule.overwrite,
                rule.overwrite,
                self.settings.allow_overwrite,
            );
            if !allow {
                info!(
                    output = %output_path.display(),
                    template = %template_rule.template.display(),
                    "output already exists, skipping"
                );
                outcome.skipped_existing.push(output_path);
                return Ok(());
            }
        }

        context.insert("output_file_path", &absolute(&output_path));

        let body = self
            .backend
            .render_file(&template_rule.template, context)
            .map_err(|e| Error::render(&template_rule.template, entity, e))?;

        self.writer.submit(WriteUnit {
            path: output_path.clone(),
            content: body.into_bytes(),
            formatter: rule
                .formatter
                .clone()
                .or_else(|| self.settings.formatter.clone()),
        });
        info!(
            template = %template_rule.template.display(),
            output = %output_path.display(),
            "generated"
        );
        outcome.outputs.push(output_path);
        Ok(())
    }
}

fn absolute(path: &Path) -> String {
    if path.is_absolute() {
        path.to_string_lossy().into_owned()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
            .to_string_lossy()
            .into_owned()
    }
}
