//! Symbol database: descriptor-set loading, merging and lookup.
//!
//! A [`SymbolDatabase`] merges one or more binary descriptor-set payloads
//! into a single queryable pool and serves identity-cached wrapper lookups
//! over it.
//!
//! ## Two-phase bootstrap
//!
//! Custom annotations ("extension options") can only be decoded once the
//! extension *definitions* themselves are registered. The load therefore
//! registers the merged file set twice: a "default" pool whose registered
//! files feed the extension registry (discovery), and an "extended" pool
//! that every wrapper query resolves against. Pools are built from the
//! payload's raw per-file bytes, never from a `prost-types` round trip —
//! the typed structs drop the extension payloads the whole exercise is
//! about.
//!
//! ## Merge ordering
//!
//! Files are registered in dependency order computed by an explicit
//! worklist with a claimed set: a file is claimed before its dependencies
//! are visited, so cyclic references cannot re-enter the walk and the
//! final registered set is independent of input order.

mod raw;

pub use raw::{RawIndex, RawSymbol};

use crate::error::{Error, Result};
use crate::model::{EnumModel, FileModel, MessageModel, ServiceModel};
use bytes::Bytes;
use prost::Message;
use prost_reflect::{DescriptorPool, ExtensionDescriptor};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Descriptor-set payload split into per-file raw byte blobs.
///
/// Decoding the set this way preserves extension options that the typed
/// `prost-types` structs would silently drop.
#[derive(Clone, PartialEq, ::prost::Message)]
struct RawFileDescriptorSet {
    #[prost(bytes, repeated, tag = "1")]
    file: Vec<Vec<u8>>,
}

/// One merged schema file: raw bytes plus the typed view used for
/// bookkeeping (name, dependencies, raw index).
#[derive(Debug, Clone)]
struct MergedFile {
    name: String,
    dependencies: Vec<String>,
    bytes: Vec<u8>,
}

/// One discovered annotation extension.
#[derive(Debug, Clone)]
pub struct ExtensionEntry {
    /// Short name, e.g. `service_options`
    pub name: String,
    /// Dotted full name, e.g. `annot.service_options`
    pub full_name: String,
    /// Full name of the extended options message, e.g.
    /// `google.protobuf.ServiceOptions`
    pub extendee: String,
}

/// Merged, queryable pool over one or more descriptor-set payloads.
#[derive(Debug)]
pub struct SymbolDatabase {
    payload_paths: Vec<PathBuf>,
    raw_files: BTreeMap<String, FileDescriptorProto>,
    raw_index: RawIndex,
    default_pool: DescriptorPool,
    extended_pool: DescriptorPool,
    extension_registry: Vec<ExtensionEntry>,
    cache_files: Mutex<HashMap<String, Arc<FileModel>>>,
    cache_messages: Mutex<HashMap<String, Arc<MessageModel>>>,
    cache_enums: Mutex<HashMap<String, Arc<EnumModel>>>,
    cache_services: Mutex<HashMap<String, Arc<ServiceModel>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SymbolDatabase {
    /// Load and merge a primary descriptor-set payload plus any external
    /// payloads (first occurrence of a file name wins).
    ///
    /// Any decode or registration failure is fatal for the whole load; the
    /// error carries the offending payload paths and no database is
    /// returned.
    pub fn load(primary: impl Into<PathBuf>, externals: &[PathBuf]) -> Result<Self> {
        let primary = primary.into();
        let mut payload_paths = vec![primary.clone()];
        payload_paths.extend(externals.iter().cloned());

        let (primary_view, primary_files) = read_payload(&primary)?;
        let mut merged = primary_files;
        let mut seen: HashSet<String> = merged.iter().map(|f| f.name.clone()).collect();

        for external in externals {
            let (_, external_files) = read_payload(external)?;
            for file in external_files {
                if seen.insert(file.name.clone()) {
                    merged.push(file);
                } else {
                    debug!(file = %file.name, payload = %external.display(), "duplicate file skipped");
                }
            }
        }

        patch_well_known_types(&mut merged, &mut seen);

        let ordered = order_by_dependencies(&merged);
        let default_pool = build_pool(&ordered, "default", &payload_paths)?;
        let extension_registry = build_extension_registry(&default_pool);

        let raw_files: BTreeMap<String, FileDescriptorProto> = primary_view
            .file
            .iter()
            .map(|f| (f.name().to_string(), f.clone()))
            .collect();
        let raw_index = RawIndex::build(&primary_view);

        let extended_pool = build_pool(&ordered, "extended", &payload_paths)?;

        info!(
            files = extended_pool.files().count(),
            extensions = extension_registry.len(),
            "descriptor database loaded"
        );

        Ok(Self {
            payload_paths,
            raw_files,
            raw_index,
            default_pool,
            extended_pool,
            extension_registry,
            cache_files: Mutex::new(HashMap::new()),
            cache_messages: Mutex::new(HashMap::new()),
            cache_enums: Mutex::new(HashMap::new()),
            cache_services: Mutex::new(HashMap::new()),
        })
    }

    /// Payload paths this database was loaded from.
    pub fn payload_paths(&self) -> &[PathBuf] {
        &self.payload_paths
    }

    /// Raw file descriptors of the primary payload, keyed by path.
    pub fn raw_files(&self) -> &BTreeMap<String, FileDescriptorProto> {
        &self.raw_files
    }

    /// Raw sub-descriptor for a dotted full name, if the entity came from
    /// the primary payload.
    pub fn raw_symbol(&self, full_name: &str) -> Option<&RawSymbol> {
        self.raw_index.get(full_name)
    }

    /// Names of every file registered in the extended pool.
    pub fn registered_files(&self) -> Vec<String> {
        self.extended_pool
            .files()
            .map(|f| f.name().to_string())
            .collect()
    }

    /// The pool wrapper queries resolve against.
    pub fn extended_pool(&self) -> &DescriptorPool {
        &self.extended_pool
    }

    /// The bootstrap pool used only for extension discovery.
    pub fn default_pool(&self) -> &DescriptorPool {
        &self.default_pool
    }

    /// Discovered annotation extensions targeting the given options type.
    pub(crate) fn extension_entries_for<'a>(
        &'a self,
        extendee: &'a str,
    ) -> impl Iterator<Item = &'a ExtensionEntry> {
        self.extension_registry
            .iter()
            .filter(move |entry| entry.extendee == extendee)
    }

    /// Resolve an extension descriptor by short or full name.
    pub fn find_extension(&self, name: &str) -> Option<ExtensionDescriptor> {
        if let Some(extension) = self.extended_pool.get_extension_by_name(name) {
            return Some(extension);
        }
        self.extension_registry
            .iter()
            .find(|entry| entry.name == name)
            .and_then(|entry| self.extended_pool.get_extension_by_name(&entry.full_name))
    }

    /// File wrapper by path; identity-cached.
    pub fn get_file(&self, name: &str) -> Option<Arc<FileModel>> {
        if let Some(hit) = lock(&self.cache_files).get(name) {
            return Some(Arc::clone(hit));
        }
        let descriptor = self.extended_pool.get_file_by_name(name)?;
        let model = Arc::new(FileModel::new(self, &descriptor));
        Some(Arc::clone(
            lock(&self.cache_files)
                .entry(name.to_string())
                .or_insert(model),
        ))
    }

    /// Message wrapper by full name; identity-cached.
    pub fn get_message(&self, full_name: &str) -> Option<Arc<MessageModel>> {
        if full_name.is_empty() {
            return None;
        }
        if let Some(hit) = lock(&self.cache_messages).get(full_name) {
            return Some(Arc::clone(hit));
        }
        let descriptor = self.extended_pool.get_message_by_name(full_name)?;
        let file = self.get_file(descriptor.parent_file().name())?;
        let model = Arc::new(MessageModel::new(self, file, &descriptor));
        Some(Arc::clone(
            lock(&self.cache_messages)
                .entry(full_name.to_string())
                .or_insert(model),
        ))
    }

    /// Enum wrapper by full name; identity-cached.
    pub fn get_enum(&self, full_name: &str) -> Option<Arc<EnumModel>> {
        if full_name.is_empty() {
            return None;
        }
        if let Some(hit) = lock(&self.cache_enums).get(full_name) {
            return Some(Arc::clone(hit));
        }
        let descriptor = self.extended_pool.get_enum_by_name(full_name)?;
        let file = self.get_file(descriptor.parent_file().name())?;
        let model = Arc::new(EnumModel::new(self, file, &descriptor));
        Some(Arc::clone(
            lock(&self.cache_enums)
                .entry(full_name.to_string())
                .or_insert(model),
        ))
    }

    /// Service wrapper by full name; identity-cached. Constructing a
    /// service also runs the rpc resolution pass against the completed
    /// symbol table.
    pub fn get_service(&self, full_name: &str) -> Option<Arc<ServiceModel>> {
        if full_name.is_empty() {
            return None;
        }
        if let Some(hit) = lock(&self.cache_services).get(full_name) {
            return Some(Arc::clone(hit));
        }
        let descriptor = self.extended_pool.get_service_by_name(full_name)?;
        let file = self.get_file(descriptor.parent_file().name())?;
        let model = Arc::new(ServiceModel::new(self, file, &descriptor));
        let model = Arc::clone(
            lock(&self.cache_services)
                .entry(full_name.to_string())
                .or_insert(model),
        );
        model.resolve(self);
        Some(model)
    }

    /// File wrappers for every file of the primary payload, keyed by path.
    pub fn file_models(&self) -> BTreeMap<String, Arc<FileModel>> {
        self.raw_files
            .keys()
            .filter_map(|name| self.get_file(name).map(|f| (name.clone(), f)))
            .collect()
    }

    /// Template-visible summary of the whole database, used by global and
    /// file-level rules.
    pub fn context_value(&self) -> JsonValue {
        let files: serde_json::Map<String, JsonValue> = self
            .file_models()
            .iter()
            .map(|(name, file)| (name.clone(), file.context_value()))
            .collect();
        json!({ "files": files })
    }
}

fn read_payload(path: &Path) -> Result<(FileDescriptorSet, Vec<MergedFile>)> {
    let bytes = Bytes::from(fs::read(path).map_err(|e| Error::file_read(path, e))?);
    let view = FileDescriptorSet::decode(bytes.clone())
        .map_err(|e| Error::descriptor_decode(path, e))?;
    let blobs = RawFileDescriptorSet::decode(bytes)
        .map_err(|e| Error::descriptor_decode(path, e))?;

    let files = view
        .file
        .iter()
        .zip(blobs.file)
        .map(|(proto, bytes)| MergedFile {
            name: proto.name().to_string(),
            dependencies: proto.dependency.clone(),
            bytes,
        })
        .collect();
    Ok((view, files))
}

/// Add the canonical well-known-type descriptors for any `google.protobuf`
/// file a producer omitted, so the merged pool is self-consistent.
fn patch_well_known_types(merged: &mut Vec<MergedFile>, seen: &mut HashSet<String>) {
    for file in DescriptorPool::global().files() {
        let proto = file.file_descriptor_proto();
        let name = proto.name().to_string();
        if !name.starts_with("google/protobuf/") || seen.contains(&name) {
            continue;
        }
        debug!(file = %name, "patching well-known type descriptor");
        seen.insert(name.clone());
        merged.push(MergedFile {
            name,
            dependencies: proto.dependency.clone(),
            bytes: proto.encode_to_vec(),
        });
    }
}

/// Dependency-respecting, cycle-tolerant ordering over the merged files.
///
/// Explicit worklist with a claimed set: popping a file claims it, and each
/// dependency is claimed the moment it is pushed, so a dependency cycle
/// cannot be re-entered and stack depth is bounded by the file count. Files
/// whose dependencies live outside the merge set are emitted as-is; the
/// pool registration reports them if they are genuinely missing.
fn order_by_dependencies(files: &[MergedFile]) -> Vec<&MergedFile> {
    let by_name: HashMap<&str, &MergedFile> =
        files.iter().map(|f| (f.name.as_str(), f)).collect();
    let mut pending: BTreeSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
    let mut ordered: Vec<&MergedFile> = Vec::with_capacity(by_name.len());
    let mut stack: Vec<&str> = Vec::new();

    while let Some(root) = pending.pop_first() {
        stack.push(root);
        while let Some(&name) = stack.last() {
            let Some(&file) = by_name.get(name) else {
                stack.pop();
                continue;
            };
            if let Some(dep) = file
                .dependencies
                .iter()
                .find(|dep| pending.contains(dep.as_str()))
            {
                pending.remove(dep.as_str());
                stack.push(dep.as_str());
                continue;
            }
            stack.pop();
            ordered.push(file);
        }
    }
    ordered
}

fn build_pool(
    ordered: &[&MergedFile],
    pool_name: &'static str,
    payloads: &[PathBuf],
) -> Result<DescriptorPool> {
    let set = RawFileDescriptorSet {
        file: ordered.iter().map(|f| f.bytes.clone()).collect(),
    };
    DescriptorPool::decode(set.encode_to_vec().as_slice())
        .map_err(|e| Error::pool_register(pool_name, payloads.to_vec(), e.to_string()))
}

/// Collect every extension declaration (file-level and message-nested)
/// registered in the bootstrap pool.
fn build_extension_registry(pool: &DescriptorPool) -> Vec<ExtensionEntry> {
    fn push_entry(entries: &mut Vec<ExtensionEntry>, prefix: &str, ext: &prost_types::FieldDescriptorProto) {
        let full_name = if prefix.is_empty() {
            ext.name().to_string()
        } else {
            format!("{}.{}", prefix, ext.name())
        };
        entries.push(ExtensionEntry {
            name: ext.name().to_string(),
            full_name,
            extendee: ext.extendee().trim_start_matches('.').to_string(),
        });
    }

    fn walk_message(entries: &mut Vec<ExtensionEntry>, prefix: &str, message: &prost_types::DescriptorProto) {
        let full_name = if prefix.is_empty() {
            message.name().to_string()
        } else {
            format!("{}.{}", prefix, message.name())
        };
        for ext in &message.extension {
            push_entry(entries, &full_name, ext);
        }
        for nested in &message.nested_type {
            walk_message(entries, &full_name, nested);
        }
    }

    let mut entries = Vec::new();
    for file in pool.files() {
        let proto = file.file_descriptor_proto();
        let package = proto.package().to_string();
        for ext in &proto.extension {
            push_entry(&mut entries, &package, ext);
        }
        for message in &proto.message_type {
            walk_message(&mut entries, &package, message);
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Annotated, ExtensionAccess};
    use pretty_assertions::assert_eq;
    use prost_types::{
        DescriptorProto, FieldDescriptorProto, MethodDescriptorProto, ServiceDescriptorProto,
    };
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_proto(name: &str, package: &str, deps: &[&str]) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(name.into()),
            package: Some(package.into()),
            dependency: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    fn merged(files: &[FileDescriptorProto]) -> Vec<MergedFile> {
        files
            .iter()
            .map(|f| MergedFile {
                name: f.name().to_string(),
                dependencies: f.dependency.clone(),
                bytes: f.encode_to_vec(),
            })
            .collect()
    }

    fn write_set(files: Vec<FileDescriptorProto>) -> NamedTempFile {
        let set = FileDescriptorSet { file: files };
        let mut out = NamedTempFile::new().expect("temp file");
        out.write_all(&set.encode_to_vec()).expect("write payload");
        out
    }

    fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for (i, head) in items.iter().enumerate() {
            let mut rest = items.to_vec();
            rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_order_diamond_dependencies() {
        let files = [
            file_proto("d.proto", "d", &["b.proto", "c.proto"]),
            file_proto("b.proto", "b", &["a.proto"]),
            file_proto("c.proto", "c", &["a.proto"]),
            file_proto("a.proto", "a", &[]),
        ];
        for perm in permutations(&files) {
            let set = merged(&perm);
            let ordered = order_by_dependencies(&set);
            let names: Vec<&str> = ordered.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names.len(), 4);
            let pos = |n: &str| names.iter().position(|x| *x == n).expect("present");
            assert!(pos("a.proto") < pos("b.proto"));
            assert!(pos("a.proto") < pos("c.proto"));
            assert!(pos("b.proto") < pos("d.proto"));
            assert!(pos("c.proto") < pos("d.proto"));
        }
    }

    #[test]
    fn test_order_terminates_on_cycle() {
        let files = [
            file_proto("x.proto", "x", &["y.proto"]),
            file_proto("y.proto", "y", &["x.proto"]),
        ];
        for perm in permutations(&files) {
            let set = merged(&perm);
            let ordered = order_by_dependencies(&set);
            let mut names: Vec<&str> = ordered.iter().map(|f| f.name.as_str()).collect();
            names.sort_unstable();
            assert_eq!(names, vec!["x.proto", "y.proto"]);
        }
    }

    #[test]
    fn test_order_ignores_foreign_dependencies() {
        let files = [file_proto("a.proto", "a", &["not/in/merge.proto"])];
        let set = merged(&files);
        let ordered = order_by_dependencies(&set);
        assert_eq!(ordered.len(), 1);
    }

    #[test]
    fn test_load_merge_first_occurrence_wins() {
        let primary = write_set(vec![file_proto("a.proto", "one", &[])]);
        let external = write_set(vec![
            file_proto("a.proto", "two", &[]),
            file_proto("e.proto", "extra", &[]),
        ]);

        let db = SymbolDatabase::load(primary.path(), &[external.path().to_path_buf()])
            .expect("load merged payloads");

        let a = db.get_file("a.proto").expect("a.proto registered");
        assert_eq!(a.package(), "one");
        assert!(db.get_file("e.proto").is_some());
    }

    #[test]
    fn test_load_permutation_invariance() {
        let files = [
            file_proto("a.proto", "a", &[]),
            file_proto("b.proto", "b", &["a.proto"]),
            file_proto("c.proto", "c", &["a.proto"]),
            file_proto("d.proto", "d", &["b.proto", "c.proto"]),
        ];
        let mut reference: Option<Vec<String>> = None;
        for perm in permutations(&files) {
            let payload = write_set(perm);
            let db = SymbolDatabase::load(payload.path(), &[]).expect("load permutation");
            let mut registered = db.registered_files();
            registered.sort_unstable();
            match &reference {
                None => reference = Some(registered),
                Some(expected) => assert_eq!(&registered, expected),
            }
        }
    }

    fn login_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("login.proto".into()),
            package: Some("acme".into()),
            message_type: vec![
                DescriptorProto {
                    name: Some("AuthRequest".into()),
                    ..Default::default()
                },
                DescriptorProto {
                    name: Some("AuthResponse".into()),
                    ..Default::default()
                },
            ],
            service: vec![ServiceDescriptorProto {
                name: Some("Login".into()),
                method: vec![MethodDescriptorProto {
                    name: Some("Auth".into()),
                    input_type: Some(".acme.AuthRequest".into()),
                    output_type: Some(".acme.AuthResponse".into()),
                    server_streaming: Some(true),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_service_lookup_and_rpc_resolution() {
        let payload = write_set(vec![login_file()]);
        let db = SymbolDatabase::load(payload.path(), &[]).expect("load");

        let service = db.get_service("acme.Login").expect("service registered");
        assert_eq!(service.name(), "Login");
        let rpc = service.rpcs().get("Auth").expect("rpc present");
        assert_eq!(rpc.full_name(), "acme.Login.Auth");
        assert_eq!(
            rpc.request().expect("request resolved").full_name(),
            "acme.AuthRequest"
        );
        assert_eq!(
            rpc.response().expect("response resolved").full_name(),
            "acme.AuthResponse"
        );
        // streaming flags come from the raw index
        assert!(!rpc.is_request_stream());
        assert!(rpc.is_response_stream());
    }

    #[test]
    fn test_identity_caches_return_same_instance() {
        let payload = write_set(vec![login_file()]);
        let db = SymbolDatabase::load(payload.path(), &[]).expect("load");

        let first = db.get_message("acme.AuthRequest").expect("message");
        let second = db.get_message("acme.AuthRequest").expect("message");
        assert!(Arc::ptr_eq(&first, &second));

        let svc1 = db.get_service("acme.Login").expect("service");
        let svc2 = db.get_service("acme.Login").expect("service");
        assert!(Arc::ptr_eq(&svc1, &svc2));

        // rpc request references the identity-cached message wrapper
        let rpc = svc1.rpcs().get("Auth").expect("rpc");
        assert!(Arc::ptr_eq(rpc.request().expect("request"), &first));
    }

    #[test]
    fn test_streaming_defaults_false_without_raw_entry() {
        // entity only present in an external payload: no raw companion
        let primary = write_set(vec![file_proto("empty.proto", "empty", &[])]);
        let external = write_set(vec![login_file()]);
        let db = SymbolDatabase::load(primary.path(), &[external.path().to_path_buf()])
            .expect("load");

        let service = db.get_service("acme.Login").expect("service");
        let rpc = service.rpcs().get("Auth").expect("rpc");
        assert!(!rpc.is_response_stream());
    }

    // Minimal mirrors of descriptor.proto that keep a custom service option
    // in its extension slot; prost-types would drop it.
    #[derive(Clone, PartialEq, ::prost::Message)]
    struct TestFile {
        #[prost(string, optional, tag = "1")]
        name: Option<String>,
        #[prost(string, optional, tag = "2")]
        package: Option<String>,
        #[prost(string, repeated, tag = "3")]
        dependency: Vec<String>,
        #[prost(message, repeated, tag = "4")]
        message_type: Vec<TestMessage>,
        #[prost(message, repeated, tag = "6")]
        service: Vec<TestService>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    struct TestMessage {
        #[prost(string, optional, tag = "1")]
        name: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    struct TestService {
        #[prost(string, optional, tag = "1")]
        name: Option<String>,
        #[prost(message, repeated, tag = "2")]
        method: Vec<TestMethod>,
        #[prost(message, optional, tag = "3")]
        options: Option<TestServiceOptions>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    struct TestMethod {
        #[prost(string, optional, tag = "1")]
        name: Option<String>,
        #[prost(string, optional, tag = "2")]
        input_type: Option<String>,
        #[prost(string, optional, tag = "3")]
        output_type: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    struct TestServiceOptions {
        #[prost(message, optional, tag = "50001")]
        service_options: Option<TestServiceOpts>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    struct TestServiceOpts {
        #[prost(string, optional, tag = "1")]
        module_name: Option<String>,
    }

    fn annotated_payload() -> Vec<u8> {
        // annot.proto declares the extension and its payload message
        let annot = FileDescriptorProto {
            name: Some("annot.proto".into()),
            package: Some("annot".into()),
            dependency: vec!["google/protobuf/descriptor.proto".into()],
            message_type: vec![DescriptorProto {
                name: Some("ServiceOpts".into()),
                field: vec![FieldDescriptorProto {
                    name: Some("module_name".into()),
                    number: Some(1),
                    label: Some(prost_types::field_descriptor_proto::Label::Optional as i32),
                    r#type: Some(prost_types::field_descriptor_proto::Type::String as i32),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            extension: vec![FieldDescriptorProto {
                name: Some("service_options".into()),
                number: Some(50001),
                label: Some(prost_types::field_descriptor_proto::Label::Optional as i32),
                r#type: Some(prost_types::field_descriptor_proto::Type::Message as i32),
                type_name: Some(".annot.ServiceOpts".into()),
                extendee: Some(".google.protobuf.ServiceOptions".into()),
                ..Default::default()
            }],
            ..Default::default()
        };

        // svc.proto carries the annotation value in its service options
        let svc = TestFile {
            name: Some("svc.proto".into()),
            package: Some("acme".into()),
            dependency: vec!["annot.proto".into()],
            message_type: vec![
                TestMessage {
                    name: Some("Req".into()),
                },
                TestMessage {
                    name: Some("Res".into()),
                },
            ],
            service: vec![TestService {
                name: Some("Login".into()),
                method: vec![TestMethod {
                    name: Some("Auth".into()),
                    input_type: Some(".acme.Req".into()),
                    output_type: Some(".acme.Res".into()),
                }],
                options: Some(TestServiceOptions {
                    service_options: Some(TestServiceOpts {
                        module_name: Some("logic".into()),
                    }),
                }),
            }],
        };

        RawFileDescriptorSet {
            file: vec![annot.encode_to_vec(), svc.encode_to_vec()],
        }
        .encode_to_vec()
    }

    #[test]
    fn test_custom_option_survives_two_phase_load() {
        let mut payload = NamedTempFile::new().expect("temp file");
        payload
            .write_all(&annotated_payload())
            .expect("write payload");

        let db = SymbolDatabase::load(payload.path(), &[]).expect("load annotated payload");

        // discovery: the extension is in the registry of the default pool
        assert!(db
            .extension_entries_for("google.protobuf.ServiceOptions")
            .any(|e| e.full_name == "annot.service_options"));
        assert!(db.find_extension("service_options").is_some());

        let service = db.get_service("acme.Login").expect("service");
        let decoded = service
            .extension("service_options")
            .expect("annotation decoded");
        assert_eq!(decoded, &json!({ "module_name": "logic" }));

        // the full-name key resolves to the same value
        assert_eq!(service.extension("annot.service_options"), Some(decoded));

        let module = service.extension_field(
            "service_options",
            ExtensionAccess::Transform(&|v| v.get("module_name").cloned()),
            json!("action"),
        );
        assert_eq!(module, json!("logic"));
    }

    #[test]
    fn test_extension_field_default_without_annotation() {
        let payload = write_set(vec![login_file()]);
        let db = SymbolDatabase::load(payload.path(), &[]).expect("load");
        let service = db.get_service("acme.Login").expect("service");
        let module = service.extension_field(
            "service_options",
            ExtensionAccess::Transform(&|v| v.get("module_name").cloned()),
            json!("action"),
        );
        assert_eq!(module, json!("action"));
    }

    #[test]
    fn test_load_rejects_truncated_payload() {
        let mut out = NamedTempFile::new().expect("temp file");
        out.write_all(&[0x0a, 0xff, 0x02, 0x01]).expect("write");
        assert!(SymbolDatabase::load(out.path(), &[]).is_err());
    }
}
