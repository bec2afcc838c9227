//! # protoforge-core
//!
//! A library for template-driven source generation from compiled protobuf
//! descriptor sets.
//!
//! This crate provides the core functionality for:
//! - Merging binary descriptor-set payloads into a single queryable pool,
//!   including custom annotation ("extension option") resolution
//! - Wrapping schema entities into identity-cached, template-friendly
//!   model objects with uniform identifier conversion
//! - Driving configured generation rules (global, service→rpc,
//!   message→field, enum→enumvalue, file) through a shared selection,
//!   overwrite and rendering pipeline
//! - Writing results concurrently with write-only-if-different semantics
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`database`]: Descriptor-set loading, merging and raw-symbol indexing
//! - [`model`]: Wrapper entities and identifier-conversion rules
//! - [`engine`]: Generation rules, selection filters and the rule executor
//! - [`writer`]: Concurrent, idempotent output stage
//! - [`cache`]: Process-scoped database and VCS-username caches
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use protoforge_core::{
//!     EngineSettings, GenerationEngine, GenerationRule, OutputWriter, ProcessCache,
//!     RuleKind, TemplateRule, TeraRenderer,
//! };
//! use std::path::Path;
//!
//! let cache = ProcessCache::new();
//! let database = cache.database(Path::new("service-protocol.pb"), &[])?;
//!
//! let mut rule = GenerationRule::new(RuleKind::Service);
//! rule.outer_name = Some("acme.Login".to_string());
//! rule.inner_templates
//!     .push(TemplateRule::parse("rpc.h.tera:task_{{ rpc.name_lower_rule }}.h"));
//!
//! let settings = EngineSettings::default();
//! let writer = OutputWriter::new()?;
//! let mut backend = TeraRenderer::new();
//! let mut engine = GenerationEngine::new(&database, &mut backend, &writer, &settings);
//! engine.run(&rule)?;
//!
//! let report = writer.drain();
//! assert!(report.is_success());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! The [`RenderBackend`] trait decouples the engine from the template
//! language; [`TeraRenderer`] is the default implementation.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod cache;
pub mod database;
pub mod engine;
pub mod error;
pub mod model;
pub mod writer;

// Re-export primary types for convenience
pub use cache::ProcessCache;
pub use database::{ExtensionEntry, RawSymbol, SymbolDatabase};
pub use engine::{
    EngineSettings, GenerationEngine, GenerationRule, RenderBackend, RuleKind, RuleOutcome,
    Selectable, SelectionFilter, TemplateRule, TeraRenderer,
};
pub use error::{Error, Result};
pub use model::naming::{convert, NameMode};
pub use model::{Annotated, ExtensionAccess};
pub use writer::{CodeFormatter, OutputWriter, WriteReport, WriteStatus, WriteUnit};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
