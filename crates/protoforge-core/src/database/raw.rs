//! Raw descriptor index for the primary payload.
//!
//! The reflection layer does not expose every descriptor detail uniformly
//! (client/server streaming flags in particular), so the primary payload is
//! also indexed in its undecorated `prost-types` form, one entry per entity,
//! keyed by dotted full name.

use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MethodDescriptorProto, OneofDescriptorProto,
    ServiceDescriptorProto,
};
use std::collections::HashMap;

/// One raw sub-descriptor of the primary payload.
#[derive(Debug, Clone)]
pub enum RawSymbol {
    /// A schema file, keyed by its path
    File(FileDescriptorProto),
    /// A message type, including nested messages
    Message(DescriptorProto),
    /// An enum type
    Enum(EnumDescriptorProto),
    /// A single enum value
    EnumValue(EnumValueDescriptorProto),
    /// A service
    Service(ServiceDescriptorProto),
    /// An rpc method; the only uniform source of streaming flags
    Method(MethodDescriptorProto),
    /// A message field
    Field(FieldDescriptorProto),
    /// A oneof declaration
    Oneof(OneofDescriptorProto),
    /// An extension declaration
    Extension(FieldDescriptorProto),
}

/// Full-name index over every entity of the primary payload.
#[derive(Debug, Default)]
pub struct RawIndex {
    symbols: HashMap<String, RawSymbol>,
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

impl RawIndex {
    /// Index every file of a descriptor set.
    pub fn build(set: &FileDescriptorSet) -> Self {
        let mut index = Self::default();
        for file in &set.file {
            index.add_file(file);
        }
        index
    }

    /// Look up a raw sub-descriptor by dotted full name.
    pub fn get(&self, full_name: &str) -> Option<&RawSymbol> {
        self.symbols.get(full_name)
    }

    /// Number of indexed symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// True when nothing was indexed.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    fn add_file(&mut self, file: &FileDescriptorProto) {
        let package = file.package().to_string();
        self.symbols
            .insert(file.name().to_string(), RawSymbol::File(file.clone()));
        for enum_type in &file.enum_type {
            self.add_enum(&package, enum_type);
        }
        for extension in &file.extension {
            self.symbols.insert(
                join(&package, extension.name()),
                RawSymbol::Extension(extension.clone()),
            );
        }
        for message_type in &file.message_type {
            self.add_message(&package, message_type);
        }
        for service in &file.service {
            self.add_service(&package, service);
        }
    }

    fn add_message(&mut self, package: &str, message: &DescriptorProto) {
        let full_name = join(package, message.name());
        self.symbols
            .insert(full_name.clone(), RawSymbol::Message(message.clone()));
        for enum_type in &message.enum_type {
            self.add_enum(&full_name, enum_type);
        }
        for nested_type in &message.nested_type {
            self.add_message(&full_name, nested_type);
        }
        for extension in &message.extension {
            self.symbols.insert(
                join(&full_name, extension.name()),
                RawSymbol::Extension(extension.clone()),
            );
        }
        for field in &message.field {
            self.symbols
                .insert(join(&full_name, field.name()), RawSymbol::Field(field.clone()));
        }
        for oneof_decl in &message.oneof_decl {
            self.symbols.insert(
                join(&full_name, oneof_decl.name()),
                RawSymbol::Oneof(oneof_decl.clone()),
            );
        }
    }

    fn add_enum(&mut self, package: &str, enum_type: &EnumDescriptorProto) {
        let full_name = join(package, enum_type.name());
        self.symbols
            .insert(full_name.clone(), RawSymbol::Enum(enum_type.clone()));
        for value in &enum_type.value {
            self.symbols.insert(
                join(&full_name, value.name()),
                RawSymbol::EnumValue(value.clone()),
            );
        }
    }

    fn add_service(&mut self, package: &str, service: &ServiceDescriptorProto) {
        let full_name = join(package, service.name());
        self.symbols
            .insert(full_name.clone(), RawSymbol::Service(service.clone()));
        for method in &service.method {
            self.symbols.insert(
                join(&full_name, method.name()),
                RawSymbol::Method(method.clone()),
            );
        }
    }
}
