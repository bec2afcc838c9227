//! Identifier-conversion rules shared by every generated name.
//!
//! All identifier spellings that reach a template go through [`convert`],
//! so a schema name has exactly one lower/upper/camel form everywhere in
//! the generated tree.
//!
//! ## Splitting rules
//!
//! A name is first split on module-path separators (`.`, `/`, `\`) into
//! package segments. Within a segment, runs of digits, underscores,
//! whitespace or hyphens act as group boundaries. A boundary run is kept as
//! a group of its own only when it is non-empty after trimming and does not
//! start with `_` or `-`; digit runs therefore survive as standalone tokens
//! while underscore/hyphen/whitespace runs are dropped.

use once_cell::sync::Lazy;
use regex::Regex;

/// Boundary runs inside a package segment: digits, underscores, whitespace, hyphen.
static SPLIT_GROUP_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+|_+|\s+|-").expect("group split rule is valid"));

/// Module-path separators between package segments.
static SPLIT_MODULE_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[./\\]").expect("module split rule is valid"));

/// Case-conversion mode applied to the groups of each package segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMode {
    /// No case change; groups joined with the empty separator
    Unchanged,
    /// All groups lower-cased, joined with `_`
    Lower,
    /// All groups upper-cased, joined with `_`
    Upper,
    /// Each group capitalized-first/lower-rest, joined with the empty separator
    Camel,
    /// Same as [`NameMode::Camel`] but the first overall group is lower-cased
    CamelFirstLower,
}

/// Split one package segment into identifier groups.
fn split_segments(input: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut before = 0;
    for run in SPLIT_GROUP_RULE.find_iter(input) {
        if run.start() > before {
            groups.push(&input[before..run.start()]);
        }
        let val = run.as_str().trim();
        if !val.is_empty() && !val.starts_with('_') && !val.starts_with('-') {
            groups.push(val);
        }
        before = run.end();
    }
    if input.len() > before {
        groups.push(&input[before..]);
    }
    groups
}

/// Capitalize the first character and lower-case the rest of a group.
fn capitalize_group(group: &str) -> String {
    let mut chars = group.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => {
            let mut out: String = first.to_uppercase().collect();
            out.extend(chars.flat_map(|c| c.to_lowercase()));
            out
        }
    }
}

/// Convert a schema name into an identifier spelling.
///
/// Package segments are re-joined with `package_separator`, so a dotted full
/// name keeps its package structure while every segment is normalized.
///
/// # Examples
///
/// ```
/// use protoforge_core::model::naming::{convert, NameMode};
///
/// assert_eq!(convert("rpc_get_user_info", NameMode::Lower, "_"), "rpc_get_user_info");
/// assert_eq!(convert("rpc_get_user_info", NameMode::Camel, ""), "RpcGetUserInfo");
/// assert_eq!(convert("abc123def", NameMode::Lower, "_"), "abc_123_def");
/// ```
pub fn convert(name: &str, mode: NameMode, package_separator: &str) -> String {
    let segments: Vec<String> = SPLIT_MODULE_RULE
        .split(name)
        .filter(|segment| !segment.trim().is_empty())
        .map(|segment| {
            let groups: Vec<&str> = split_segments(segment)
                .into_iter()
                .map(str::trim)
                .collect();
            match mode {
                NameMode::Unchanged => groups.concat(),
                NameMode::Lower => groups
                    .iter()
                    .map(|g| g.to_lowercase())
                    .collect::<Vec<_>>()
                    .join("_"),
                NameMode::Upper => groups
                    .iter()
                    .map(|g| g.to_uppercase())
                    .collect::<Vec<_>>()
                    .join("_"),
                NameMode::Camel => groups
                    .iter()
                    .map(|g| capitalize_group(g))
                    .collect::<Vec<_>>()
                    .concat(),
                NameMode::CamelFirstLower => {
                    let mut camel: Vec<String> =
                        groups.iter().map(|g| capitalize_group(g)).collect();
                    if let Some(first) = camel.first_mut() {
                        *first = first.to_lowercase();
                    }
                    camel.concat()
                }
            }
        })
        .collect();
    segments.join(package_separator)
}

/// Lower-rule shorthand: `Lower` mode with `_` between package segments.
pub fn lower_rule(name: &str) -> String {
    convert(name, NameMode::Lower, "_")
}

/// Upper-rule shorthand: `Upper` mode with `_` between package segments.
pub fn upper_rule(name: &str) -> String {
    convert(name, NameMode::Upper, "_")
}

/// Camel-rule shorthand: `Camel` mode with no package separator.
pub fn camel_rule(name: &str) -> String {
    convert(name, NameMode::Camel, "")
}

/// Turn a dotted full name into a `::`-joined C++ qualifier prefix.
pub fn cpp_namespace_prefix(full_name: &str) -> String {
    SPLIT_MODULE_RULE
        .split(full_name)
        .collect::<Vec<_>>()
        .join("::")
}

/// Opening `namespace` lines for a dotted package name, outermost first.
pub fn cpp_namespace_begin(full_name: &str) -> Vec<String> {
    SPLIT_MODULE_RULE
        .split(full_name)
        .map(|segment| format!("namespace {} {{", segment))
        .collect()
}

/// Closing brace lines for a dotted package name, innermost first.
pub fn cpp_namespace_end(full_name: &str) -> Vec<String> {
    let mut lines: Vec<String> = SPLIT_MODULE_RULE
        .split(full_name)
        .map(|segment| format!("}}  // namespace {}", segment))
        .collect();
    lines.reverse();
    lines
}
