//! Wrapper model over the symbol database.
//!
//! Every schema entity a template can see is wrapped exactly once per
//! database lifetime into an immutable, `Arc`-shared model object:
//! [`FileModel`], [`MessageModel`], [`FieldModel`], [`OneofModel`],
//! [`EnumModel`], [`EnumValueModel`], [`ServiceModel`] and [`RpcModel`].
//!
//! Wrappers are built in two phases: construction captures everything an
//! entity exposes (derived name spellings, decoded annotation options,
//! streaming flags), and an explicit resolution pass fills cross references
//! (rpc → request/response message) once the symbol table is complete.
//! After resolution an instance never mutates, so models are freely
//! shareable.
//!
//! Annotation options ("extension options") are decoded eagerly against the
//! database's extended pool and stored keyed by both the extension's short
//! name and its full name.

pub mod naming;

use crate::database::{RawSymbol, SymbolDatabase};
use naming::{convert, NameMode};
use once_cell::sync::OnceCell;
use prost_reflect::{
    DynamicMessage, EnumDescriptor, FieldDescriptor, Kind, MapKey, MessageDescriptor,
    MethodDescriptor, OneofDescriptor, ReflectMessage, ServiceDescriptor, Value,
};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Decoded annotation options, keyed by extension short name and full name.
pub type ExtensionMap = BTreeMap<String, JsonValue>;

/// How [`Annotated::extension_field`] turns a decoded annotation into the
/// value the caller wants: either a pure transform over the decoded value,
/// or a constant that stands in whenever the annotation is present.
pub enum ExtensionAccess<'a> {
    /// Apply a transform to the decoded annotation value
    Transform(&'a dyn Fn(&JsonValue) -> Option<JsonValue>),
    /// Replace the decoded annotation value with a constant
    Constant(JsonValue),
}

/// Returns false for the values that mean "not configured": null, false,
/// zero, and empty strings/arrays/objects.
fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

/// Uniform annotation access shared by every wrapper entity.
///
/// This is the single customization point every generation-time decision
/// (module routing, streaming opt-outs, export decorations) is read
/// through.
pub trait Annotated {
    /// All decoded annotation options of this entity
    fn extensions(&self) -> &ExtensionMap;

    /// The decoded annotation value for `name` (short or full), if attached
    fn extension(&self, name: &str) -> Option<&JsonValue> {
        self.extensions().get(name)
    }

    /// Resolves one field of an annotation, falling back to `default` when
    /// the annotation is absent or the accessor yields a falsy value
    fn extension_field(
        &self,
        name: &str,
        access: ExtensionAccess<'_>,
        default: JsonValue,
    ) -> JsonValue {
        let Some(value) = self.extension(name) else {
            return default;
        };
        let resolved = match access {
            ExtensionAccess::Transform(f) => f(value),
            ExtensionAccess::Constant(constant) => Some(constant),
        };
        match resolved {
            Some(v) if is_truthy(&v) => v,
            _ => default,
        }
    }
}

/// Precomputed identifier spellings for one schema name.
#[derive(Debug, Clone)]
pub struct NameRules {
    /// `Lower` mode, `_`-joined
    pub lower: String,
    /// `Upper` mode, `_`-joined
    pub upper: String,
    /// `Camel` mode
    pub camel: String,
    /// `CamelFirstLower` mode
    pub camel_first_lower: String,
}

impl NameRules {
    fn for_name(name: &str) -> Self {
        Self {
            lower: convert(name, NameMode::Lower, "_"),
            upper: convert(name, NameMode::Upper, "_"),
            camel: convert(name, NameMode::Camel, ""),
            camel_first_lower: convert(name, NameMode::CamelFirstLower, ""),
        }
    }

    fn write_into(&self, map: &mut JsonMap<String, JsonValue>) {
        map.insert("name_lower_rule".into(), json!(self.lower));
        map.insert("name_upper_rule".into(), json!(self.upper));
        map.insert("name_camel_rule".into(), json!(self.camel));
        map.insert(
            "name_camel_first_lower_rule".into(),
            json!(self.camel_first_lower),
        );
    }
}

/// Convert a decoded protobuf reflection value into the JSON shape handed
/// to templates. Message values become objects keyed by proto field name.
fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Bool(b) => json!(b),
        Value::I32(n) => json!(n),
        Value::I64(n) => json!(n),
        Value::U32(n) => json!(n),
        Value::U64(n) => json!(n),
        Value::F32(n) => json!(n),
        Value::F64(n) => json!(n),
        Value::String(s) => json!(s),
        Value::Bytes(b) => json!(String::from_utf8_lossy(b)),
        Value::EnumNumber(n) => json!(n),
        Value::Message(message) => dynamic_message_to_json(message),
        Value::List(items) => JsonValue::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => {
            let mut map = JsonMap::new();
            for (key, val) in entries {
                map.insert(map_key_to_string(key), value_to_json(val));
            }
            JsonValue::Object(map)
        }
    }
}

fn map_key_to_string(key: &MapKey) -> String {
    match key {
        MapKey::Bool(b) => b.to_string(),
        MapKey::I32(n) => n.to_string(),
        MapKey::I64(n) => n.to_string(),
        MapKey::U32(n) => n.to_string(),
        MapKey::U64(n) => n.to_string(),
        MapKey::String(s) => s.clone(),
    }
}

fn dynamic_message_to_json(message: &DynamicMessage) -> JsonValue {
    let mut map = JsonMap::new();
    for field in message.descriptor().fields() {
        if message.has_field(&field) {
            map.insert(
                field.name().to_string(),
                value_to_json(message.get_field(&field).as_ref()),
            );
        }
    }
    JsonValue::Object(map)
}

/// Decode every annotation attached to an options message, keyed by the
/// extension's short name and full name.
fn decode_extensions(database: &SymbolDatabase, options: &DynamicMessage) -> ExtensionMap {
    let mut decoded = ExtensionMap::new();
    let extendee = options.descriptor().full_name().to_string();
    for entry in database.extension_entries_for(&extendee) {
        let Some(extension) = database.find_extension(&entry.full_name) else {
            continue;
        };
        if !options.has_extension(&extension) {
            continue;
        }
        let value = value_to_json(options.get_extension(&extension).as_ref());
        decoded.insert(entry.name.clone(), value.clone());
        decoded.insert(entry.full_name.clone(), value);
    }
    decoded
}

fn base_context(
    name: &str,
    full_name: &str,
    package: &str,
    rules: &NameRules,
    extensions: &ExtensionMap,
) -> JsonMap<String, JsonValue> {
    let mut map = JsonMap::new();
    map.insert("name".into(), json!(name));
    map.insert("full_name".into(), json!(full_name));
    map.insert("package".into(), json!(package));
    map.insert("cpp_class_name".into(), json!(full_name.replace('.', "::")));
    rules.write_into(&mut map);
    map.insert(
        "options".into(),
        JsonValue::Object(extensions.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
    );
    map
}

/// Wrapper over one schema file.
#[derive(Debug)]
pub struct FileModel {
    name: String,
    package: String,
    rules: NameRules,
    extensions: ExtensionMap,
}

impl FileModel {
    pub(crate) fn new(database: &SymbolDatabase, descriptor: &prost_reflect::FileDescriptor) -> Self {
        Self {
            name: descriptor.name().to_string(),
            package: descriptor.package_name().to_string(),
            rules: NameRules::for_name(descriptor.name()),
            extensions: decode_extensions(database, &descriptor.options()),
        }
    }

    /// File path, e.g. `proto/login.proto`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A file's full name is its path
    pub fn full_name(&self) -> &str {
        &self.name
    }

    /// Declared package of the file
    pub fn package(&self) -> &str {
        &self.package
    }

    /// File path with a trailing `.proto` extension removed
    pub fn path_without_ext(&self) -> &str {
        self.name.strip_suffix(".proto").unwrap_or(&self.name)
    }

    /// Files classify into datasets by package name
    pub fn is_in_dataset(&self, checked: &HashSet<String>) -> bool {
        !checked.is_empty() && checked.contains(&self.package)
    }

    /// Template-visible view of this file
    pub fn context_value(&self) -> JsonValue {
        let mut map = base_context(
            &self.name,
            self.full_name(),
            &self.package,
            &self.rules,
            &self.extensions,
        );
        map.insert("file_path_without_ext".into(), json!(self.path_without_ext()));
        map.insert(
            "cpp_namespace".into(),
            json!(naming::cpp_namespace_prefix(&self.package)),
        );
        JsonValue::Object(map)
    }
}

impl Annotated for FileModel {
    fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }
}

/// Wrapper over one message field.
#[derive(Debug)]
pub struct FieldModel {
    name: String,
    full_name: String,
    container_full_name: String,
    package: String,
    number: u32,
    kind: String,
    type_name: Option<String>,
    repeated: bool,
    map_entry: bool,
    rules: NameRules,
    extensions: ExtensionMap,
}

impl FieldModel {
    fn new(
        database: &SymbolDatabase,
        container_full_name: &str,
        package: &str,
        descriptor: &FieldDescriptor,
    ) -> Self {
        let (kind, type_name) = describe_kind(&descriptor.kind());
        Self {
            name: descriptor.name().to_string(),
            full_name: join_names(container_full_name, descriptor.name()),
            container_full_name: container_full_name.to_string(),
            package: package.to_string(),
            number: descriptor.number(),
            kind,
            type_name,
            repeated: descriptor.is_list(),
            map_entry: descriptor.is_map(),
            rules: NameRules::for_name(descriptor.name()),
            extensions: decode_extensions(database, &descriptor.options()),
        }
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `package.Message.field`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Field number within its message
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Scalar kind name, or `message` / `enum` for composite fields
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Full name of the referenced message or enum type, when composite
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// Fields classify into datasets by their own full name
    pub fn is_in_dataset(&self, checked: &HashSet<String>) -> bool {
        !checked.is_empty() && checked.contains(&self.full_name)
    }

    /// Template-visible view of this field
    pub fn context_value(&self) -> JsonValue {
        let mut map = base_context(
            &self.name,
            &self.full_name,
            &self.package,
            &self.rules,
            &self.extensions,
        );
        map.insert("container".into(), json!(self.container_full_name));
        map.insert("number".into(), json!(self.number));
        map.insert("kind".into(), json!(self.kind));
        map.insert("type_name".into(), json!(self.type_name));
        map.insert("repeated".into(), json!(self.repeated));
        map.insert("map".into(), json!(self.map_entry));
        JsonValue::Object(map)
    }
}

impl Annotated for FieldModel {
    fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }
}

fn describe_kind(kind: &Kind) -> (String, Option<String>) {
    match kind {
        Kind::Message(message) => ("message".into(), Some(message.full_name().to_string())),
        Kind::Enum(enumeration) => ("enum".into(), Some(enumeration.full_name().to_string())),
        scalar => (format!("{:?}", scalar).to_lowercase(), None),
    }
}

fn join_names(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Wrapper over one oneof declaration; participating fields are shared with
/// the containing message, not copied.
#[derive(Debug)]
pub struct OneofModel {
    name: String,
    full_name: String,
    fields: Vec<Arc<FieldModel>>,
    extensions: ExtensionMap,
}

impl OneofModel {
    fn new(
        database: &SymbolDatabase,
        container_full_name: &str,
        descriptor: &OneofDescriptor,
        fields: Vec<Arc<FieldModel>>,
    ) -> Self {
        Self {
            name: descriptor.name().to_string(),
            full_name: join_names(container_full_name, descriptor.name()),
            fields,
            extensions: decode_extensions(database, &descriptor.options()),
        }
    }

    /// Oneof name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields participating in this oneof
    pub fn fields(&self) -> &[Arc<FieldModel>] {
        &self.fields
    }

    fn context_value(&self) -> JsonValue {
        json!({
            "name": self.name,
            "full_name": self.full_name,
            "fields": self.fields.iter().map(|f| f.context_value()).collect::<Vec<_>>(),
            "options": JsonValue::Object(
                self.extensions.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            ),
        })
    }
}

impl Annotated for OneofModel {
    fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }
}

/// Wrapper over one message type.
#[derive(Debug)]
pub struct MessageModel {
    file: Arc<FileModel>,
    name: String,
    full_name: String,
    package: String,
    fields: Vec<Arc<FieldModel>>,
    fields_by_name: BTreeMap<String, Arc<FieldModel>>,
    fields_by_number: BTreeMap<u32, Arc<FieldModel>>,
    oneofs: Vec<OneofModel>,
    rules: NameRules,
    extensions: ExtensionMap,
}

impl MessageModel {
    pub(crate) fn new(
        database: &SymbolDatabase,
        file: Arc<FileModel>,
        descriptor: &MessageDescriptor,
    ) -> Self {
        let package = file.package().to_string();
        let full_name = descriptor.full_name().to_string();

        let mut fields = Vec::new();
        let mut fields_by_name = BTreeMap::new();
        let mut fields_by_number = BTreeMap::new();
        for field_desc in descriptor.fields() {
            let field = Arc::new(FieldModel::new(database, &full_name, &package, &field_desc));
            fields_by_name.insert(field.name().to_string(), Arc::clone(&field));
            fields_by_number.insert(field.number(), Arc::clone(&field));
            fields.push(field);
        }

        let mut oneofs = Vec::new();
        for oneof_desc in descriptor.oneofs() {
            let members: Vec<Arc<FieldModel>> = oneof_desc
                .fields()
                .filter_map(|f| fields_by_number.get(&f.number()).cloned())
                .collect();
            oneofs.push(OneofModel::new(database, &full_name, &oneof_desc, members));
        }

        Self {
            file,
            name: descriptor.name().to_string(),
            full_name,
            package,
            fields,
            fields_by_name,
            fields_by_number,
            oneofs,
            rules: NameRules::for_name(descriptor.name()),
            extensions: decode_extensions(database, &descriptor.options()),
        }
    }

    /// Message name without package
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `package.Message`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Declaring file
    pub fn file(&self) -> &Arc<FileModel> {
        &self.file
    }

    /// Declared fields in schema order
    pub fn fields(&self) -> &[Arc<FieldModel>] {
        &self.fields
    }

    /// Fields indexed by name
    pub fn fields_by_name(&self) -> &BTreeMap<String, Arc<FieldModel>> {
        &self.fields_by_name
    }

    /// Fields indexed by number
    pub fn fields_by_number(&self) -> &BTreeMap<u32, Arc<FieldModel>> {
        &self.fields_by_number
    }

    /// Declared oneofs in schema order
    pub fn oneofs(&self) -> &[OneofModel] {
        &self.oneofs
    }

    /// Template-visible view of this message
    pub fn context_value(&self) -> JsonValue {
        let mut map = base_context(
            &self.name,
            &self.full_name,
            &self.package,
            &self.rules,
            &self.extensions,
        );
        map.insert("file".into(), json!(self.file.name()));
        map.insert(
            "fields".into(),
            JsonValue::Array(self.fields.iter().map(|f| f.context_value()).collect()),
        );
        map.insert(
            "fields_by_name".into(),
            JsonValue::Object(
                self.fields_by_name
                    .iter()
                    .map(|(k, v)| (k.clone(), v.context_value()))
                    .collect(),
            ),
        );
        map.insert(
            "oneofs".into(),
            JsonValue::Array(self.oneofs.iter().map(|o| o.context_value()).collect()),
        );
        JsonValue::Object(map)
    }
}

impl Annotated for MessageModel {
    fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }
}

/// Wrapper over one enum value.
#[derive(Debug)]
pub struct EnumValueModel {
    name: String,
    full_name: String,
    number: i32,
    package: String,
    rules: NameRules,
    extensions: ExtensionMap,
}

impl EnumValueModel {
    fn new(
        database: &SymbolDatabase,
        container_full_name: &str,
        package: &str,
        descriptor: &prost_reflect::EnumValueDescriptor,
    ) -> Self {
        Self {
            name: descriptor.name().to_string(),
            full_name: join_names(container_full_name, descriptor.name()),
            number: descriptor.number(),
            package: package.to_string(),
            rules: NameRules::for_name(descriptor.name()),
            extensions: decode_extensions(database, &descriptor.options()),
        }
    }

    /// Enum value name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `package.Enum.VALUE`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Declared number
    pub fn number(&self) -> i32 {
        self.number
    }

    /// Template-visible view of this enum value
    pub fn context_value(&self) -> JsonValue {
        let mut map = base_context(
            &self.name,
            &self.full_name,
            &self.package,
            &self.rules,
            &self.extensions,
        );
        map.insert("number".into(), json!(self.number));
        JsonValue::Object(map)
    }
}

impl Annotated for EnumValueModel {
    fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }
}

/// Wrapper over one enum type.
#[derive(Debug)]
pub struct EnumModel {
    file: Arc<FileModel>,
    name: String,
    full_name: String,
    package: String,
    values: Vec<Arc<EnumValueModel>>,
    values_by_name: BTreeMap<String, Arc<EnumValueModel>>,
    values_by_number: BTreeMap<i32, Arc<EnumValueModel>>,
    rules: NameRules,
    extensions: ExtensionMap,
}

impl EnumModel {
    pub(crate) fn new(
        database: &SymbolDatabase,
        file: Arc<FileModel>,
        descriptor: &EnumDescriptor,
    ) -> Self {
        let package = file.package().to_string();
        let full_name = descriptor.full_name().to_string();

        let mut values = Vec::new();
        let mut values_by_name = BTreeMap::new();
        let mut values_by_number = BTreeMap::new();
        for value_desc in descriptor.values() {
            let value = Arc::new(EnumValueModel::new(database, &full_name, &package, &value_desc));
            values_by_name.insert(value.name().to_string(), Arc::clone(&value));
            values_by_number.entry(value.number()).or_insert_with(|| Arc::clone(&value));
            values.push(value);
        }

        Self {
            file,
            name: descriptor.name().to_string(),
            full_name,
            package,
            values,
            values_by_name,
            values_by_number,
            rules: NameRules::for_name(descriptor.name()),
            extensions: decode_extensions(database, &descriptor.options()),
        }
    }

    /// Enum name without package
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `package.Enum`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Declaring file
    pub fn file(&self) -> &Arc<FileModel> {
        &self.file
    }

    /// Declared values in schema order
    pub fn values(&self) -> &[Arc<EnumValueModel>] {
        &self.values
    }

    /// Values indexed by name
    pub fn values_by_name(&self) -> &BTreeMap<String, Arc<EnumValueModel>> {
        &self.values_by_name
    }

    /// Values indexed by number; aliased numbers keep the first declaration
    pub fn values_by_number(&self) -> &BTreeMap<i32, Arc<EnumValueModel>> {
        &self.values_by_number
    }

    /// Template-visible view of this enum
    pub fn context_value(&self) -> JsonValue {
        let mut map = base_context(
            &self.name,
            &self.full_name,
            &self.package,
            &self.rules,
            &self.extensions,
        );
        map.insert("file".into(), json!(self.file.name()));
        map.insert(
            "values".into(),
            JsonValue::Array(self.values.iter().map(|v| v.context_value()).collect()),
        );
        JsonValue::Object(map)
    }
}

impl Annotated for EnumModel {
    fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }
}

/// Wrapper over one RPC method.
///
/// Request/response wrappers are unresolved at construction; the owning
/// [`ServiceModel`] runs the resolution pass once all rpcs exist.
#[derive(Debug)]
pub struct RpcModel {
    name: String,
    full_name: String,
    service_full_name: String,
    package: String,
    input_full_name: String,
    output_full_name: String,
    request: OnceCell<Arc<MessageModel>>,
    response: OnceCell<Arc<MessageModel>>,
    request_stream: bool,
    response_stream: bool,
    rules: NameRules,
    extensions: ExtensionMap,
}

impl RpcModel {
    fn new(
        database: &SymbolDatabase,
        service_full_name: &str,
        package: &str,
        descriptor: &MethodDescriptor,
    ) -> Self {
        let full_name = join_names(service_full_name, descriptor.name());
        let (request_stream, response_stream) = match database.raw_symbol(&full_name) {
            Some(RawSymbol::Method(method)) => {
                (method.client_streaming(), method.server_streaming())
            }
            _ => (false, false),
        };
        Self {
            name: descriptor.name().to_string(),
            full_name,
            service_full_name: service_full_name.to_string(),
            package: package.to_string(),
            input_full_name: descriptor.input().full_name().to_string(),
            output_full_name: descriptor.output().full_name().to_string(),
            request: OnceCell::new(),
            response: OnceCell::new(),
            request_stream,
            response_stream,
            rules: NameRules::for_name(descriptor.name()),
            extensions: decode_extensions(database, &descriptor.options()),
        }
    }

    /// Fills the request/response references from the completed symbol table.
    fn resolve(&self, database: &SymbolDatabase) {
        if let Some(request) = database.get_message(&self.input_full_name) {
            let _ = self.request.set(request);
        } else {
            debug!(rpc = %self.full_name, input = %self.input_full_name, "request type unresolved");
        }
        if let Some(response) = database.get_message(&self.output_full_name) {
            let _ = self.response.set(response);
        } else {
            debug!(rpc = %self.full_name, output = %self.output_full_name, "response type unresolved");
        }
    }

    /// Method name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `package.Service.Method`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Full name of the owning service
    pub fn service_full_name(&self) -> &str {
        &self.service_full_name
    }

    /// Full name of the request message type
    pub fn input_full_name(&self) -> &str {
        &self.input_full_name
    }

    /// Resolved request message wrapper
    pub fn request(&self) -> Option<&Arc<MessageModel>> {
        self.request.get()
    }

    /// Resolved response message wrapper
    pub fn response(&self) -> Option<&Arc<MessageModel>> {
        self.response.get()
    }

    /// Client-streaming flag, from the raw index; false without a raw entry
    pub fn is_request_stream(&self) -> bool {
        self.request_stream
    }

    /// Server-streaming flag, from the raw index; false without a raw entry
    pub fn is_response_stream(&self) -> bool {
        self.response_stream
    }

    /// Rpcs classify into datasets by their request message's full name
    pub fn is_in_dataset(&self, checked: &HashSet<String>) -> bool {
        !checked.is_empty() && checked.contains(&self.input_full_name)
    }

    /// Template-visible view of this rpc
    pub fn context_value(&self) -> JsonValue {
        let mut map = base_context(
            &self.name,
            &self.full_name,
            &self.package,
            &self.rules,
            &self.extensions,
        );
        map.insert("service".into(), json!(self.service_full_name));
        map.insert(
            "request".into(),
            self.request
                .get()
                .map(|m| m.context_value())
                .unwrap_or(JsonValue::Null),
        );
        map.insert(
            "response".into(),
            self.response
                .get()
                .map(|m| m.context_value())
                .unwrap_or(JsonValue::Null),
        );
        map.insert("request_stream".into(), json!(self.request_stream));
        map.insert("response_stream".into(), json!(self.response_stream));
        JsonValue::Object(map)
    }
}

impl Annotated for RpcModel {
    fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }
}

/// Wrapper over one service.
#[derive(Debug)]
pub struct ServiceModel {
    file: Arc<FileModel>,
    name: String,
    full_name: String,
    package: String,
    rpcs: BTreeMap<String, Arc<RpcModel>>,
    rules: NameRules,
    extensions: ExtensionMap,
}

impl ServiceModel {
    pub(crate) fn new(
        database: &SymbolDatabase,
        file: Arc<FileModel>,
        descriptor: &ServiceDescriptor,
    ) -> Self {
        let package = file.package().to_string();
        let full_name = descriptor.full_name().to_string();

        let mut rpcs = BTreeMap::new();
        for method_desc in descriptor.methods() {
            let rpc = Arc::new(RpcModel::new(database, &full_name, &package, &method_desc));
            rpcs.insert(rpc.name().to_string(), rpc);
        }

        Self {
            file,
            name: descriptor.name().to_string(),
            full_name,
            package,
            rpcs,
            rules: NameRules::for_name(descriptor.name()),
            extensions: decode_extensions(database, &descriptor.options()),
        }
    }

    /// Resolution pass: fill each rpc's request/response references.
    pub(crate) fn resolve(&self, database: &SymbolDatabase) {
        for rpc in self.rpcs.values() {
            rpc.resolve(database);
        }
    }

    /// Service name without package
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `package.Service`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Declaring file
    pub fn file(&self) -> &Arc<FileModel> {
        &self.file
    }

    /// Rpcs indexed by method name
    pub fn rpcs(&self) -> &BTreeMap<String, Arc<RpcModel>> {
        &self.rpcs
    }

    /// Template-visible view of this service
    pub fn context_value(&self) -> JsonValue {
        let mut map = base_context(
            &self.name,
            &self.full_name,
            &self.package,
            &self.rules,
            &self.extensions,
        );
        map.insert("file".into(), json!(self.file.name()));
        map.insert(
            "rpcs".into(),
            JsonValue::Object(
                self.rpcs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.context_value()))
                    .collect(),
            ),
        );
        JsonValue::Object(map)
    }
}

impl Annotated for ServiceModel {
    fn extensions(&self) -> &ExtensionMap {
        &self.extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Annotations(ExtensionMap);

    impl Annotated for Annotations {
        fn extensions(&self) -> &ExtensionMap {
            &self.0
        }
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy(&json!("action")));
        assert!(is_truthy(&json!(7)));
        assert!(is_truthy(&json!(true)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&JsonValue::Null));
        assert!(!is_truthy(&json!([])));
    }

    #[test]
    fn test_extension_field_returns_default_when_absent() {
        let entity = Annotations(ExtensionMap::new());
        let got = entity.extension_field(
            "service_options",
            ExtensionAccess::Transform(&|v| v.get("module_name").cloned()),
            json!("action"),
        );
        assert_eq!(got, json!("action"));
    }

    #[test]
    fn test_extension_field_applies_transform() {
        let mut map = ExtensionMap::new();
        map.insert(
            "service_options".into(),
            json!({ "module_name": "logic" }),
        );
        let entity = Annotations(map);
        let got = entity.extension_field(
            "service_options",
            ExtensionAccess::Transform(&|v| v.get("module_name").cloned()),
            json!("action"),
        );
        assert_eq!(got, json!("logic"));
    }

    #[test]
    fn test_extension_field_falsy_transform_falls_back() {
        let mut map = ExtensionMap::new();
        map.insert("service_options".into(), json!({ "module_name": "" }));
        let entity = Annotations(map);
        let got = entity.extension_field(
            "service_options",
            ExtensionAccess::Transform(&|v| v.get("module_name").cloned()),
            json!("action"),
        );
        assert_eq!(got, json!("action"));
    }

    #[test]
    fn test_extension_field_constant() {
        let mut map = ExtensionMap::new();
        map.insert("no_stream".into(), json!(true));
        let entity = Annotations(map);
        let got = entity.extension_field(
            "no_stream",
            ExtensionAccess::Constant(json!("disabled")),
            json!("enabled"),
        );
        assert_eq!(got, json!("disabled"));
    }

    #[test]
    fn test_join_names() {
        assert_eq!(join_names("acme.Login", "Auth"), "acme.Login.Auth");
        assert_eq!(join_names("", "Auth"), "Auth");
    }

    #[test]
    fn test_name_rules() {
        let rules = NameRules::for_name("get_user_info");
        assert_eq!(rules.lower, "get_user_info");
        assert_eq!(rules.upper, "GET_USER_INFO");
        assert_eq!(rules.camel, "GetUserInfo");
        assert_eq!(rules.camel_first_lower, "getUserInfo");
    }
}
