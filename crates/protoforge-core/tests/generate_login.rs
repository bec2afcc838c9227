//! End-to-end generation over an in-memory descriptor set.
//!
//! Builds a schema with one service `Login` containing
//! `Auth(AuthRequest) -> AuthResponse`, runs a service rule whose rpc
//! template routes output through the RPC's Camel name, and checks the
//! produced file and the idempotence of a second run.

use prost::Message;
use protoforge_core::{
    EngineSettings, GenerationEngine, GenerationRule, OutputWriter, ProcessCache, RuleKind,
    TemplateRule, TeraRenderer,
};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::{NamedTempFile, TempDir};

fn login_payload() -> NamedTempFile {
    let file = prost_types::FileDescriptorProto {
        name: Some("login.proto".into()),
        package: Some("acme".into()),
        message_type: vec![
            prost_types::DescriptorProto {
                name: Some("AuthRequest".into()),
                field: vec![prost_types::FieldDescriptorProto {
                    name: Some("token".into()),
                    number: Some(1),
                    label: Some(prost_types::field_descriptor_proto::Label::Optional as i32),
                    r#type: Some(prost_types::field_descriptor_proto::Type::String as i32),
                    ..Default::default()
                }],
                ..Default::default()
            },
            prost_types::DescriptorProto {
                name: Some("AuthResponse".into()),
                ..Default::default()
            },
        ],
        service: vec![prost_types::ServiceDescriptorProto {
            name: Some("Login".into()),
            method: vec![prost_types::MethodDescriptorProto {
                name: Some("Auth".into()),
                input_type: Some(".acme.AuthRequest".into()),
                output_type: Some(".acme.AuthResponse".into()),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    };

    let set = prost_types::FileDescriptorSet { file: vec![file] };
    let mut payload = NamedTempFile::new().expect("temp payload");
    payload
        .write_all(&set.encode_to_vec())
        .expect("write payload");
    payload
}

fn rpc_template(dir: &Path) -> std::path::PathBuf {
    let template_path = dir.join("task.h.tera");
    fs::write(
        &template_path,
        "\
// generated by {{ generator }}
class Task{{ rpc.name_camel_rule }} {
  using request_type = {{ rpc.request.cpp_class_name }};
  using response_type = {{ rpc.response.cpp_class_name }};
};
",
    )
    .expect("write rpc template");
    template_path
}

fn service_rule(template: &Path) -> GenerationRule {
    let mut rule = GenerationRule::new(RuleKind::Service);
    rule.outer_name = Some("acme.Login".into());
    rule.inner_templates.push(TemplateRule::parse(&format!(
        "{}:task_{{{{ rpc.name_camel_rule }}}}.h",
        template.display()
    )));
    rule
}

fn run_once(payload: &Path, out_dir: &Path, rule: &GenerationRule) -> protoforge_core::WriteReport {
    let cache = ProcessCache::new();
    let database = cache.database(payload, &[]).expect("load payload");

    let settings = EngineSettings {
        output_directory: out_dir.to_path_buf(),
        ..EngineSettings::default()
    };
    let writer = OutputWriter::new().expect("writer");
    let mut backend = TeraRenderer::new();
    let mut engine = GenerationEngine::new(&database, &mut backend, &writer, &settings);

    let outcome = engine.run(rule).expect("run rule");
    assert_eq!(outcome.missing_templates.len(), 0);
    writer.drain()
}

#[test]
fn generates_exactly_one_file_named_from_the_rpc() {
    let payload = login_payload();
    let out_dir = TempDir::new().expect("out dir");
    let template = rpc_template(out_dir.path());
    let rule = service_rule(&template);

    let report = run_once(payload.path(), out_dir.path(), &rule);
    assert!(report.is_success());
    assert_eq!(report.written.len(), 1);

    let expected = out_dir.path().join("task_Auth.h");
    assert_eq!(report.written[0], expected);

    let content = fs::read_to_string(&expected).expect("generated file");
    assert!(content.contains("class TaskAuth"));
    assert!(content.contains("acme::AuthRequest"));
    assert!(content.contains("acme::AuthResponse"));

    // only the rpc-derived file exists next to the template
    let generated: Vec<_> = fs::read_dir(out_dir.path())
        .expect("read out dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".h"))
        .collect();
    assert_eq!(generated, vec!["task_Auth.h".to_string()]);
}

#[test]
fn second_run_writes_nothing() {
    let payload = login_payload();
    let out_dir = TempDir::new().expect("out dir");
    let template = rpc_template(out_dir.path());
    let rule = service_rule(&template);

    let first = run_once(payload.path(), out_dir.path(), &rule);
    assert!(first.is_success());
    assert_eq!(first.written.len(), 1);

    let target = out_dir.path().join("task_Auth.h");
    let hash_before = blake3::hash(&fs::read(&target).expect("read generated"));

    let second = run_once(payload.path(), out_dir.path(), &rule);
    assert!(second.is_success());
    assert!(second.written.is_empty());
    assert_eq!(second.unchanged.len(), 1);

    let hash_after = blake3::hash(&fs::read(&target).expect("read generated"));
    assert_eq!(hash_before, hash_after);
}

#[test]
fn rpc_filter_narrows_generated_set() {
    let payload = login_payload();
    let out_dir = TempDir::new().expect("out dir");
    let template = rpc_template(out_dir.path());

    let mut rule = service_rule(&template);
    rule.filter = protoforge_core::SelectionFilter::new(
        Some("Logout"),
        None,
        Default::default(),
        Default::default(),
    )
    .expect("filter");

    let report = run_once(payload.path(), out_dir.path(), &rule);
    assert!(report.is_success());
    assert!(report.written.is_empty());
    assert!(!out_dir.path().join("task_Auth.h").exists());
}
