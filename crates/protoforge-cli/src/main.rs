//! protoforge - Template-driven source generation from compiled protobuf
//! descriptor sets.
//!
//! This tool loads a binary descriptor set (supplied directly or compiled
//! on the fly with `protoc`), applies configured generation rules to the
//! schema entities in it, and writes the rendered output files
//! concurrently with write-only-if-different semantics.

mod compiler;
mod config;

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use compiler::{expand_proto_patterns, ProtocInvocation, TempPayload};
use config::{BatchConfig, RuleCommon, RuleEntry};
use protoforge_core::writer::DEFAULT_FORMAT_RULE;
use protoforge_core::{
    CodeFormatter, EngineSettings, GenerationEngine, GenerationRule, OutputWriter, ProcessCache,
    RuleKind, SelectionFilter, TemplateRule, TeraRenderer,
};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Template-driven source-code generator for compiled protobuf descriptor sets
#[derive(Parser, Debug)]
#[command(name = "protoforge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output directory for generated files
    #[arg(short, long = "output")]
    output_dir: Option<PathBuf>,

    /// Path to the schema compiler
    #[arg(short = 'p', long = "protoc-bin", default_value = "protoc")]
    protoc_bin: PathBuf,

    /// Extra flag passed to the schema compiler
    #[arg(long = "protoc-flag")]
    protoc_flags: Vec<String>,

    /// Extra -I include directory for the schema compiler
    #[arg(long = "protoc-include")]
    protoc_includes: Vec<PathBuf>,

    /// Proto files (or directories / basename patterns) to compile
    #[arg(short = 'P', long = "proto-files")]
    proto_files: Vec<String>,

    /// Use an existing descriptor-set payload instead of running the compiler
    #[arg(long = "pb-file")]
    pb_file: Option<PathBuf>,

    /// External descriptor-set payloads merged in (first file name wins)
    #[arg(long = "external-pb-files")]
    external_pb_files: Vec<PathBuf>,

    /// Encoding of output files (UTF-8 family honored)
    #[arg(long, default_value = "utf-8")]
    encoding: String,

    /// Where a compiled descriptor set is written
    #[arg(long = "output-pb-file")]
    output_pb_file: Option<PathBuf>,

    /// Do not delete a compiled descriptor set on exit
    #[arg(long = "keep-pb-file")]
    keep_pb_file: bool,

    /// Project directory (default: nearest ancestor containing .git)
    #[arg(long = "project-dir")]
    project_dir: Option<PathBuf>,

    /// Print resolved output paths without generating anything
    #[arg(long = "print-output-files")]
    print_output_files: bool,

    /// Never overwrite existing output files
    #[arg(long = "no-overwrite")]
    no_overwrite: bool,

    /// Do not log per-file generation details
    #[arg(long)]
    quiet: bool,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Custom template variable, KEY=VALUE
    #[arg(long = "set")]
    set_vars: Vec<String>,

    /// Export/import decoration bound for every level by default
    #[arg(long = "dllexport-decl", default_value = "")]
    dllexport_decl: String,

    /// Path of the external source formatter
    #[arg(long = "clang-format-path")]
    clang_format_path: Option<PathBuf>,

    /// Filename regex selecting outputs to format
    #[arg(long = "clang-format-rule", default_value = DEFAULT_FORMAT_RULE)]
    clang_format_rule: String,

    // service - rpc
    /// Template rule applied per rpc (TEMPLATE:OUTPUT)
    #[arg(long = "rpc-template")]
    rpc_template: Vec<String>,

    /// Keep only rpcs whose request message is one of these types
    #[arg(long = "rpc-include-request")]
    rpc_include_request: Vec<String>,

    /// Drop rpcs whose request message is one of these types
    #[arg(long = "rpc-exclude-request")]
    rpc_exclude_request: Vec<String>,

    /// Export decoration for the rpc level
    #[arg(long = "rpc-dllexport-decl")]
    rpc_dllexport_decl: Option<String>,

    /// Template rule applied once per service (TEMPLATE:OUTPUT)
    #[arg(long = "service-template")]
    service_template: Vec<String>,

    /// Full name of a service to generate for
    #[arg(short = 's', long = "service-name")]
    service_name: Vec<String>,

    /// Export decoration for the service level
    #[arg(long = "service-dllexport-decl")]
    service_dllexport_decl: Option<String>,

    /// Keep only rpcs whose name matches this pattern
    #[arg(long = "rpc-include")]
    rpc_include_rule: Option<String>,

    /// Drop rpcs whose name matches this pattern
    #[arg(long = "rpc-exclude")]
    rpc_exclude_rule: Option<String>,

    // message - field
    /// Template rule applied per field (TEMPLATE:OUTPUT)
    #[arg(long = "field-template")]
    field_template: Vec<String>,

    /// Export decoration for the field level
    #[arg(long = "field-dllexport-decl")]
    field_dllexport_decl: Option<String>,

    /// Template rule applied once per message (TEMPLATE:OUTPUT)
    #[arg(long = "message-template")]
    message_template: Vec<String>,

    /// Full name of a message to generate for
    #[arg(long = "message-name")]
    message_name: Vec<String>,

    /// Export decoration for the message level
    #[arg(long = "message-dllexport-decl")]
    message_dllexport_decl: Option<String>,

    /// Keep only fields whose name matches this pattern
    #[arg(long = "field-include")]
    field_include_rule: Option<String>,

    /// Drop fields whose name matches this pattern
    #[arg(long = "field-exclude")]
    field_exclude_rule: Option<String>,

    /// Keep only fields of these full names
    #[arg(long = "field-include-type")]
    field_include_type: Vec<String>,

    /// Drop fields of these full names
    #[arg(long = "field-exclude-type")]
    field_exclude_type: Vec<String>,

    // enum - enumvalue
    /// Template rule applied per enum value (TEMPLATE:OUTPUT)
    #[arg(long = "enumvalue-template")]
    enumvalue_template: Vec<String>,

    /// Export decoration for the enum value level
    #[arg(long = "enumvalue-dllexport-decl")]
    enumvalue_dllexport_decl: Option<String>,

    /// Template rule applied once per enum (TEMPLATE:OUTPUT)
    #[arg(long = "enum-template")]
    enum_template: Vec<String>,

    /// Full name of an enum to generate for
    #[arg(long = "enum-name")]
    enum_name: Vec<String>,

    /// Export decoration for the enum level
    #[arg(long = "enum-dllexport-decl")]
    enum_dllexport_decl: Option<String>,

    /// Keep only enum values whose name matches this pattern
    #[arg(long = "enumvalue-include")]
    enumvalue_include_rule: Option<String>,

    /// Drop enum values whose name matches this pattern
    #[arg(long = "enumvalue-exclude")]
    enumvalue_exclude_rule: Option<String>,

    // file
    /// Keep only files of these packages
    #[arg(long = "file-include-package")]
    file_include_package: Vec<String>,

    /// Drop files of these packages
    #[arg(long = "file-exclude-package")]
    file_exclude_package: Vec<String>,

    /// Template rule applied per schema file (TEMPLATE:OUTPUT)
    #[arg(long = "file-template")]
    file_template: Vec<String>,

    /// Export decoration for the file level
    #[arg(long = "file-dllexport-decl")]
    file_dllexport_decl: Option<String>,

    /// Keep only files whose path matches this pattern
    #[arg(long = "file-include")]
    file_include_rule: Option<String>,

    /// Drop files whose path matches this pattern
    #[arg(long = "file-exclude")]
    file_exclude_rule: Option<String>,

    // global
    /// Template rule applied once for the whole database (TEMPLATE:OUTPUT)
    #[arg(long = "global-template")]
    global_template: Vec<String>,

    /// Export decoration for global templates
    #[arg(long = "global-dllexport-decl")]
    global_dllexport_decl: Option<String>,

    /// YAML configure file for batch generation
    #[arg(short = 'c', long = "configure")]
    configure: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let mut cli = Cli::parse();

    let level = if cli.quiet {
        Level::WARN
    } else {
        match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let mut custom_vars = parse_set_vars(&cli.set_vars);

    let batch = match &cli.configure {
        Some(path) => config::load_config(path)?,
        None => BatchConfig::default(),
    };
    if let Some(section) = &batch.configure {
        merge_configure(&mut cli, section, &mut custom_vars);
    }

    if !cli.encoding.eq_ignore_ascii_case("utf-8") && !cli.encoding.eq_ignore_ascii_case("utf8") {
        warn!(encoding = %cli.encoding, "only UTF-8 output is supported, writing UTF-8");
    }

    if cli.pb_file.is_none() && cli.proto_files.is_empty() {
        bail!("-P/--proto-files <*.proto> or --pb-file <payload.pb> is required");
    }

    let project_dir = resolve_project_dir(&cli)?;

    // obtain the descriptor-set payload; a compiled one is removed on exit
    // unless --keep-pb-file
    let (payload_path, _payload_guard) = match &cli.pb_file {
        Some(pb_file) => {
            if !pb_file.exists() {
                bail!("--pb-file {} does not exist", pb_file.display());
            }
            (pb_file.clone(), None)
        }
        None => {
            let proto_files = expand_proto_patterns(&cli.proto_files);
            let output = match &cli.output_pb_file {
                Some(path) => path.clone(),
                None => std::env::current_dir()
                    .context("failed to resolve working directory")?
                    .join("service-protocol.pb"),
            };
            let guard = TempPayload::new(output.clone(), cli.keep_pb_file);
            ProtocInvocation {
                protoc: cli.protoc_bin.clone(),
                flags: cli.protoc_flags.clone(),
                includes: cli.protoc_includes.clone(),
                proto_files,
                output: output.clone(),
            }
            .run()?;
            (output, Some(guard))
        }
    };

    let cache = ProcessCache::new();
    let database = cache.database(&payload_path, &cli.external_pb_files)?;

    let settings = EngineSettings {
        output_directory: cli.output_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
        allow_overwrite: !cli.no_overwrite,
        list_only: cli.print_output_files,
        vcs_username: cache.vcs_username(&project_dir),
        custom_variables: custom_vars,
        formatter: match &cli.clang_format_path {
            Some(path) => Some(CodeFormatter::new(path, &cli.clang_format_rule)?),
            None => None,
        },
    };

    let rules = assemble_rules(&cli, &batch)?;
    if rules.is_empty() {
        warn!("no generation rules configured, nothing to do");
    }

    let writer = OutputWriter::new()?;
    let mut backend = TeraRenderer::new();
    let mut engine = GenerationEngine::new(&database, &mut backend, &writer, &settings);

    let mut failed = false;
    let mut planned = Vec::new();
    for rule in &rules {
        match engine.run(rule) {
            Ok(outcome) => planned.extend(outcome.outputs),
            Err(e) if e.is_recoverable() => warn!("rule skipped: {}", e),
            Err(e) => {
                // render failures abort the run; partial schema output must
                // not be completed silently
                error!("generation aborted: {:#}", anyhow::Error::new(e));
                failed = true;
                break;
            }
        }
    }

    if cli.print_output_files {
        for path in &planned {
            println!("{}", path.display());
        }
    }

    let report = writer.drain();
    for (path, e) in &report.failures {
        error!("generate file {} failed: {}", path.display(), e);
        failed = true;
    }
    info!(
        written = report.written.len(),
        unchanged = report.unchanged.len(),
        failed = report.failures.len(),
        "generation finished"
    );

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// `--set KEY=VALUE` pairs into template variables.
fn parse_set_vars(pairs: &[String]) -> BTreeMap<String, JsonValue> {
    let mut vars = BTreeMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) => {
                vars.insert(key.trim().to_string(), JsonValue::from(value.trim()));
            }
            None => {
                vars.insert(pair.trim().to_string(), JsonValue::from(""));
            }
        }
    }
    vars
}

/// Merge the configure section of a batch document over the CLI options.
fn merge_configure(
    cli: &mut Cli,
    section: &config::ConfigureSection,
    custom_vars: &mut BTreeMap<String, JsonValue>,
) {
    if let Some(encoding) = &section.encoding {
        cli.encoding = encoding.clone();
    }
    if let Some(output_directory) = &section.output_directory {
        cli.output_dir = Some(output_directory.clone());
    }
    if let Some(overwrite) = section.overwrite {
        cli.no_overwrite = !overwrite;
    }
    if let Some(protoc) = &section.protoc {
        cli.protoc_bin = protoc.clone();
    }
    cli.protoc_flags.extend(section.protoc_flags.iter().cloned());
    cli.protoc_includes
        .extend(section.protoc_includes.iter().cloned());
    cli.proto_files.extend(section.protocol_files.iter().cloned());
    if let Some(input) = &section.protocol_input_pb_file {
        cli.pb_file = Some(input.clone());
    }
    cli.external_pb_files
        .extend(section.protocol_external_pb_files.iter().cloned());
    if let Some(output) = &section.protocol_output_pb_file {
        cli.output_pb_file = Some(output.clone());
    }
    if let Some(project_dir) = &section.protocol_project_directory {
        cli.project_dir = Some(project_dir.clone());
    }
    for (key, value) in &section.custom_variables {
        custom_vars.insert(key.clone(), value.clone());
    }
}

/// `--project-dir`, or the nearest ancestor of the working directory that
/// contains a `.git` entry.
fn resolve_project_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(dir) = &cli.project_dir {
        return Ok(dir.clone());
    }
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    for candidate in cwd.ancestors() {
        if candidate.join(".git").exists() {
            return Ok(candidate.to_path_buf());
        }
    }
    bail!(
        "cannot find a project directory; pass --project-dir <dir> (no .git found above {})",
        cwd.display()
    );
}

fn to_set(names: &[String]) -> HashSet<String> {
    names.iter().cloned().collect()
}

fn or_default<'a>(specific: Option<&'a String>, default: &'a str) -> String {
    specific.map(|s| s.as_str()).unwrap_or(default).to_string()
}

/// Formatter override for one YAML rule; `None` inherits the process-level
/// formatter.
fn rule_formatter(common: &RuleCommon, cli: &Cli) -> Result<Option<CodeFormatter>> {
    if common.clang_format_path.is_none() && common.clang_format_rule.is_none() {
        return Ok(None);
    }
    let Some(path) = common
        .clang_format_path
        .as_deref()
        .or(cli.clang_format_path.as_deref())
    else {
        return Ok(None);
    };
    let rule = common
        .clang_format_rule
        .as_deref()
        .unwrap_or(&cli.clang_format_rule);
    Ok(Some(CodeFormatter::new(path, rule)?))
}

/// Build the ordered rule list: per kind, flag-derived rules first, then the
/// batch-configured ones.
fn assemble_rules(cli: &Cli, batch: &BatchConfig) -> Result<Vec<GenerationRule>> {
    let service_decl = or_default(cli.service_dllexport_decl.as_ref(), &cli.dllexport_decl);
    let rpc_decl = or_default(cli.rpc_dllexport_decl.as_ref(), &cli.dllexport_decl);
    let message_decl = or_default(cli.message_dllexport_decl.as_ref(), &cli.dllexport_decl);
    let field_decl = or_default(cli.field_dllexport_decl.as_ref(), &cli.dllexport_decl);
    let enum_decl = or_default(cli.enum_dllexport_decl.as_ref(), &cli.dllexport_decl);
    let enumvalue_decl = or_default(cli.enumvalue_dllexport_decl.as_ref(), &cli.dllexport_decl);
    let file_decl = or_default(cli.file_dllexport_decl.as_ref(), &cli.dllexport_decl);
    let global_decl = or_default(cli.global_dllexport_decl.as_ref(), &cli.dllexport_decl);

    let mut rules = Vec::new();

    // service - rpc
    for name in &cli.service_name {
        let mut rule = GenerationRule::new(RuleKind::Service);
        rule.outer_name = Some(name.clone());
        rule.outer_templates = cli.service_template.iter().map(|r| TemplateRule::parse(r)).collect();
        rule.inner_templates = cli.rpc_template.iter().map(|r| TemplateRule::parse(r)).collect();
        rule.filter = SelectionFilter::new(
            cli.rpc_include_rule.as_deref(),
            cli.rpc_exclude_rule.as_deref(),
            to_set(&cli.rpc_include_request),
            to_set(&cli.rpc_exclude_request),
        )?;
        rule.outer_export_decl = service_decl.clone();
        rule.inner_export_decl = rpc_decl.clone();
        rules.push(rule);
    }
    for entry in &batch.rules {
        if let RuleEntry::Service(item) = entry {
            let mut rule = GenerationRule::new(RuleKind::Service);
            rule.outer_name = Some(item.name.clone());
            rule.outer_templates = item.service_template.to_rules();
            rule.inner_templates = item.rpc_template.to_rules();
            rule.filter = SelectionFilter::new(
                item.rpc_include.as_deref(),
                item.rpc_exclude.as_deref(),
                to_set(&item.rpc_include_request),
                to_set(&item.rpc_exclude_request),
            )?;
            rule.output_directory = item.common.output_directory.clone();
            rule.overwrite = item.common.overwrite;
            rule.custom_variables = item.common.custom_variables.clone();
            rule.outer_export_decl = or_default(item.service_dllexport_decl.as_ref(), &service_decl);
            rule.inner_export_decl = or_default(item.rpc_dllexport_decl.as_ref(), &rpc_decl);
            rule.formatter = rule_formatter(&item.common, cli)?;
            rules.push(rule);
        }
    }

    // message - field
    for name in &cli.message_name {
        let mut rule = GenerationRule::new(RuleKind::Message);
        rule.outer_name = Some(name.clone());
        rule.outer_templates = cli.message_template.iter().map(|r| TemplateRule::parse(r)).collect();
        rule.inner_templates = cli.field_template.iter().map(|r| TemplateRule::parse(r)).collect();
        rule.filter = SelectionFilter::new(
            cli.field_include_rule.as_deref(),
            cli.field_exclude_rule.as_deref(),
            to_set(&cli.field_include_type),
            to_set(&cli.field_exclude_type),
        )?;
        rule.outer_export_decl = message_decl.clone();
        rule.inner_export_decl = field_decl.clone();
        rules.push(rule);
    }
    for entry in &batch.rules {
        if let RuleEntry::Message(item) = entry {
            let mut rule = GenerationRule::new(RuleKind::Message);
            rule.outer_name = Some(item.name.clone());
            rule.outer_templates = item.message_template.to_rules();
            rule.inner_templates = item.field_template.to_rules();
            rule.filter = SelectionFilter::new(
                item.field_include.as_deref(),
                item.field_exclude.as_deref(),
                to_set(&item.field_include_type),
                to_set(&item.field_exclude_type),
            )?;
            rule.output_directory = item.common.output_directory.clone();
            rule.overwrite = item.common.overwrite;
            rule.custom_variables = item.common.custom_variables.clone();
            rule.outer_export_decl = or_default(item.message_dllexport_decl.as_ref(), &message_decl);
            rule.inner_export_decl = or_default(item.field_dllexport_decl.as_ref(), &field_decl);
            rule.formatter = rule_formatter(&item.common, cli)?;
            rules.push(rule);
        }
    }

    // enum - enumvalue
    for name in &cli.enum_name {
        let mut rule = GenerationRule::new(RuleKind::Enum);
        rule.outer_name = Some(name.clone());
        rule.outer_templates = cli.enum_template.iter().map(|r| TemplateRule::parse(r)).collect();
        rule.inner_templates = cli
            .enumvalue_template
            .iter()
            .map(|r| TemplateRule::parse(r))
            .collect();
        rule.filter = SelectionFilter::new(
            cli.enumvalue_include_rule.as_deref(),
            cli.enumvalue_exclude_rule.as_deref(),
            HashSet::new(),
            HashSet::new(),
        )?;
        rule.outer_export_decl = enum_decl.clone();
        rule.inner_export_decl = enumvalue_decl.clone();
        rules.push(rule);
    }
    for entry in &batch.rules {
        if let RuleEntry::Enum(item) = entry {
            let mut rule = GenerationRule::new(RuleKind::Enum);
            rule.outer_name = Some(item.name.clone());
            rule.outer_templates = item.enum_template.to_rules();
            rule.inner_templates = item.value_template.to_rules();
            rule.filter = SelectionFilter::new(
                item.value_include.as_deref(),
                item.value_exclude.as_deref(),
                HashSet::new(),
                HashSet::new(),
            )?;
            rule.output_directory = item.common.output_directory.clone();
            rule.overwrite = item.common.overwrite;
            rule.custom_variables = item.common.custom_variables.clone();
            rule.outer_export_decl = or_default(item.enum_dllexport_decl.as_ref(), &enum_decl);
            rule.inner_export_decl =
                or_default(item.enumvalue_dllexport_decl.as_ref(), &enumvalue_decl);
            rule.formatter = rule_formatter(&item.common, cli)?;
            rules.push(rule);
        }
    }

    // file
    if !cli.file_template.is_empty() {
        let mut rule = GenerationRule::new(RuleKind::File);
        rule.inner_templates = cli.file_template.iter().map(|r| TemplateRule::parse(r)).collect();
        rule.filter = SelectionFilter::new(
            cli.file_include_rule.as_deref(),
            cli.file_exclude_rule.as_deref(),
            to_set(&cli.file_include_package),
            to_set(&cli.file_exclude_package),
        )?;
        rule.inner_export_decl = file_decl.clone();
        rules.push(rule);
    }
    for entry in &batch.rules {
        if let RuleEntry::File(item) = entry {
            let mut rule = GenerationRule::new(RuleKind::File);
            rule.inner_templates = item.file_template.to_rules();
            rule.filter = SelectionFilter::new(
                item.file_include.as_deref(),
                item.file_exclude.as_deref(),
                to_set(&item.file_include_package),
                to_set(&item.file_exclude_package),
            )?;
            rule.output_directory = item.common.output_directory.clone();
            rule.overwrite = item.common.overwrite;
            rule.custom_variables = item.common.custom_variables.clone();
            rule.inner_export_decl = or_default(item.file_dllexport_decl.as_ref(), &file_decl);
            rule.formatter = rule_formatter(&item.common, cli)?;
            rules.push(rule);
        }
    }

    // global
    if !cli.global_template.is_empty() {
        let mut rule = GenerationRule::new(RuleKind::Global);
        rule.outer_templates = cli.global_template.iter().map(|r| TemplateRule::parse(r)).collect();
        rule.outer_export_decl = global_decl.clone();
        rules.push(rule);
    }
    for entry in &batch.rules {
        if let RuleEntry::Global(item) = entry {
            let mut rule = GenerationRule::new(RuleKind::Global);
            rule.outer_templates = vec![TemplateRule::new(
                &item.input,
                item.output.clone(),
                item.common.overwrite,
            )];
            rule.output_directory = item.common.output_directory.clone();
            rule.custom_variables = item.common.custom_variables.clone();
            rule.outer_export_decl =
                or_default(item.global_dllexport_decl.as_ref(), &global_decl);
            rule.formatter = rule_formatter(&item.common, cli)?;
            rules.push(rule);
        }
    }

    Ok(rules)
}
