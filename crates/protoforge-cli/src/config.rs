//! YAML batch-configuration document.
//!
//! A configure file carries a `configure` section of global settings and an
//! ordered `rules` list; each rule is tagged by its kind:
//!
//! ```yaml
//! configure:
//!   output_directory: src/generated
//!   overwrite: true
//!   protocol_input_pb_file: service-protocol.pb
//!   custom_variables:
//!     project: acme
//! rules:
//!   - service:
//!       name: acme.Login
//!       rpc_template: "templates/task.h.tera:task_{{ rpc.name_lower_rule }}.h"
//!   - global:
//!       input: templates/manifest.txt.tera
//!       output: manifest.txt
//! ```
//!
//! Template entries are either `template:output` strings or structured
//! `{input, output, overwrite}` mappings; a missing output derives from the
//! template basename.

use anyhow::{Context as _, Result};
use protoforge_core::TemplateRule;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configure document.
#[derive(Debug, Default, Deserialize)]
pub struct BatchConfig {
    /// Global settings merged over the command-line options
    #[serde(default)]
    pub configure: Option<ConfigureSection>,
    /// Ordered rule list
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

/// Global settings of a configure document.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigureSection {
    pub encoding: Option<String>,
    pub output_directory: Option<PathBuf>,
    pub overwrite: Option<bool>,
    pub protoc: Option<PathBuf>,
    #[serde(default)]
    pub protoc_flags: Vec<String>,
    #[serde(default)]
    pub protoc_includes: Vec<PathBuf>,
    #[serde(default)]
    pub protocol_files: Vec<String>,
    pub protocol_input_pb_file: Option<PathBuf>,
    #[serde(default)]
    pub protocol_external_pb_files: Vec<PathBuf>,
    pub protocol_output_pb_file: Option<PathBuf>,
    pub protocol_project_directory: Option<PathBuf>,
    #[serde(default)]
    pub custom_variables: BTreeMap<String, JsonValue>,
}

/// One rule block, tagged by its kind key.
#[derive(Debug, Deserialize)]
pub enum RuleEntry {
    #[serde(rename = "global")]
    Global(GlobalRule),
    #[serde(rename = "service")]
    Service(ServiceRule),
    #[serde(rename = "message")]
    Message(MessageRule),
    #[serde(rename = "enum")]
    Enum(EnumRule),
    #[serde(rename = "file")]
    File(FileRule),
}

/// Settings shared by every rule kind.
#[derive(Debug, Default, Deserialize)]
pub struct RuleCommon {
    pub output_directory: Option<PathBuf>,
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub custom_variables: BTreeMap<String, JsonValue>,
    pub clang_format_path: Option<PathBuf>,
    pub clang_format_rule: Option<String>,
}

/// A `global` rule block is itself one template entry plus settings.
#[derive(Debug, Deserialize)]
pub struct GlobalRule {
    pub input: PathBuf,
    pub output: Option<String>,
    pub global_dllexport_decl: Option<String>,
    #[serde(flatten)]
    pub common: RuleCommon,
}

/// A `service` rule block.
#[derive(Debug, Deserialize)]
pub struct ServiceRule {
    pub name: String,
    #[serde(default)]
    pub service_template: TemplateList,
    #[serde(default)]
    pub rpc_template: TemplateList,
    pub rpc_include: Option<String>,
    pub rpc_exclude: Option<String>,
    #[serde(default)]
    pub rpc_include_request: Vec<String>,
    #[serde(default)]
    pub rpc_exclude_request: Vec<String>,
    pub service_dllexport_decl: Option<String>,
    pub rpc_dllexport_decl: Option<String>,
    #[serde(flatten)]
    pub common: RuleCommon,
}

/// A `message` rule block.
#[derive(Debug, Deserialize)]
pub struct MessageRule {
    pub name: String,
    #[serde(default)]
    pub message_template: TemplateList,
    #[serde(default)]
    pub field_template: TemplateList,
    pub field_include: Option<String>,
    pub field_exclude: Option<String>,
    #[serde(default)]
    pub field_include_type: Vec<String>,
    #[serde(default)]
    pub field_exclude_type: Vec<String>,
    pub message_dllexport_decl: Option<String>,
    pub field_dllexport_decl: Option<String>,
    #[serde(flatten)]
    pub common: RuleCommon,
}

/// An `enum` rule block.
#[derive(Debug, Deserialize)]
pub struct EnumRule {
    pub name: String,
    #[serde(default)]
    pub enum_template: TemplateList,
    #[serde(default)]
    pub value_template: TemplateList,
    pub value_include: Option<String>,
    pub value_exclude: Option<String>,
    pub enum_dllexport_decl: Option<String>,
    pub enumvalue_dllexport_decl: Option<String>,
    #[serde(flatten)]
    pub common: RuleCommon,
}

/// A `file` rule block.
#[derive(Debug, Deserialize)]
pub struct FileRule {
    #[serde(default)]
    pub file_template: TemplateList,
    pub file_include: Option<String>,
    pub file_exclude: Option<String>,
    #[serde(default)]
    pub file_include_package: Vec<String>,
    #[serde(default)]
    pub file_exclude_package: Vec<String>,
    pub file_dllexport_decl: Option<String>,
    #[serde(flatten)]
    pub common: RuleCommon,
}

/// One template entry: inline `template:output` string or structured form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TemplateEntry {
    Inline(String),
    Structured {
        input: PathBuf,
        output: Option<String>,
        overwrite: Option<bool>,
    },
}

impl TemplateEntry {
    /// Convert into the engine's template rule.
    pub fn to_rule(&self) -> TemplateRule {
        match self {
            TemplateEntry::Inline(rule) => TemplateRule::parse(rule),
            TemplateEntry::Structured {
                input,
                output,
                overwrite,
            } => TemplateRule::new(input, output.clone(), *overwrite),
        }
    }
}

/// Scalar-or-list template field.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(from = "OneOrMany")]
pub struct TemplateList(pub Vec<TemplateEntry>);

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(TemplateEntry),
    Many(Vec<TemplateEntry>),
}

impl From<OneOrMany> for TemplateList {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(entry) => TemplateList(vec![entry]),
            OneOrMany::Many(entries) => TemplateList(entries),
        }
    }
}

impl TemplateList {
    /// Engine template rules for every entry.
    pub fn to_rules(&self) -> Vec<TemplateRule> {
        self.0.iter().map(TemplateEntry::to_rule).collect()
    }
}

/// Load and parse a configure document.
pub fn load_config(path: &Path) -> Result<BatchConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configure file {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse configure file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_document() {
        let yaml = r#"
configure:
  encoding: utf-8
  output_directory: src/generated
  overwrite: true
  protoc: /usr/bin/protoc
  protoc_flags: ["--experimental_allow_proto3_optional"]
  protocol_files: ["proto/*.proto"]
  protocol_output_pb_file: build/service-protocol.pb
  custom_variables:
    project: acme
    worker_count: 4
rules:
  - service:
      name: acme.Login
      service_template: "templates/service.h.tera:include/{{ service.name_lower_rule }}.h"
      rpc_template:
        - input: templates/task.h.tera
          output: "task_{{ rpc.name_lower_rule }}.h"
          overwrite: false
      rpc_include: "Auth.*"
      rpc_exclude_request: ["acme.Internal"]
      overwrite: false
  - enum:
      name: acme.Status
      value_template: "templates/value.h.tera"
  - file:
      file_template: "templates/pbdesc.cpp.tera:{{ file.file_path_without_ext }}.pb.cc"
      file_include_package: ["acme"]
  - global:
      input: templates/manifest.txt.tera
      output: manifest.txt
      output_directory: build
"#;
        let config: BatchConfig = serde_yaml::from_str(yaml).expect("parse");
        let configure = config.configure.expect("configure section");
        assert_eq!(configure.output_directory, Some(PathBuf::from("src/generated")));
        assert_eq!(configure.overwrite, Some(true));
        assert_eq!(configure.protocol_files, vec!["proto/*.proto"]);
        assert_eq!(
            configure.custom_variables.get("project"),
            Some(&serde_json::json!("acme"))
        );
        assert_eq!(config.rules.len(), 4);

        let RuleEntry::Service(service) = &config.rules[0] else {
            panic!("first rule should be a service rule");
        };
        assert_eq!(service.name, "acme.Login");
        assert_eq!(service.common.overwrite, Some(false));
        assert_eq!(service.rpc_include.as_deref(), Some("Auth.*"));
        assert_eq!(service.service_template.0.len(), 1);

        let rpc_rules = service.rpc_template.to_rules();
        assert_eq!(rpc_rules.len(), 1);
        assert_eq!(rpc_rules[0].output_rule, "task_{{ rpc.name_lower_rule }}.h");
        assert_eq!(rpc_rules[0].overwrite, Some(false));

        let RuleEntry::Global(global) = &config.rules[3] else {
            panic!("last rule should be a global rule");
        };
        assert_eq!(global.output.as_deref(), Some("manifest.txt"));
        assert_eq!(global.common.output_directory, Some(PathBuf::from("build")));
    }

    #[test]
    fn test_scalar_template_becomes_single_entry() {
        let yaml = r#"
rules:
  - enum:
      name: acme.Status
      value_template: "templates/value.h.tera"
"#;
        let config: BatchConfig = serde_yaml::from_str(yaml).expect("parse");
        let RuleEntry::Enum(rule) = &config.rules[0] else {
            panic!("enum rule expected");
        };
        let rules = rule.value_template.to_rules();
        assert_eq!(rules.len(), 1);
        // output derives from the basename with the template suffix stripped
        assert_eq!(rules[0].output_rule, "value.h");
    }

    #[test]
    fn test_empty_document() {
        let config: BatchConfig = serde_yaml::from_str("{}").expect("parse");
        assert!(config.configure.is_none());
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_unknown_rule_kind_is_rejected() {
        let yaml = r#"
rules:
  - widget:
      name: nope
"#;
        assert!(serde_yaml::from_str::<BatchConfig>(yaml).is_err());
    }
}
