//! Name-aware type identity. The input header carries mangled spellings
//! (`Foo_3`, `Col__Enum`, `List_1_Foo`) for the types the target names
//! canonically; every lookup in the engine goes through these comparisons.

use crate::config::RemapConfig;
use crate::data::ast::{DeclArena, Declaration, TypeRef};

/// Applies the configured remap table; names not in it pass through.
pub fn apply_remap<'a>(config: &'a RemapConfig, name: &'a str) -> &'a str {
    config
        .remapped_types
        .get(name)
        .map(String::as_str)
        .unwrap_or(name)
}

/// Drops a leading `<ns>::` for the declaration's immediate namespace.
pub fn strip_namespace<'a>(name: &'a str, namespace: Option<&str>) -> &'a str {
    match namespace {
        Some(ns) if !ns.is_empty() => name
            .strip_prefix(ns)
            .and_then(|rest| rest.strip_prefix("::"))
            .unwrap_or(name),
        _ => name,
    }
}

/// Do two (namespace-stripped) type names denote the same logical type?
///
/// Reserved suffixes carry semantic meaning and veto a match when only one
/// side ends in one. `__Enum` is dropped from both sides. When exactly one
/// side carries an underscore it is a mangled spelling: an all-digit tail is
/// a duplicate-name counter (`Foo_3`) and the head is compared, any other
/// tail is a generic argument (`List_1_Foo`) and the tail is compared.
pub fn same_type_name(config: &RemapConfig, a: &str, b: &str) -> bool {
    for suffix in config.known_reserved_suffixes.keys() {
        if a.ends_with(suffix.as_str()) != b.ends_with(suffix.as_str()) {
            return false;
        }
    }

    let a = a.replace("__Enum", "");
    let b = b.replace("__Enum", "");

    match (a.contains('_'), b.contains('_')) {
        (true, false) => mangled_match(&a, &b),
        (false, true) => mangled_match(&b, &a),
        _ => a == b,
    }
}

fn mangled_match(mangled: &str, plain: &str) -> bool {
    let Some((head, tail)) = mangled.rsplit_once('_') else {
        return mangled == plain;
    };
    if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
        head == plain
    } else {
        tail == plain
    }
}

/// A name is generic when its post-underscore part starts with a digit
/// (`List_1_Foo`, `Action_2_Foo`) and it does not end in a reserved suffix.
pub fn is_generic_name(config: &RemapConfig, name: &str) -> bool {
    let Some((_, tail)) = name.split_once('_') else {
        return false;
    };
    !tail.is_empty()
        && tail.as_bytes()[0].is_ascii_digit()
        && !config
            .known_reserved_suffixes
            .keys()
            .any(|s| name.ends_with(s.as_str()))
}

/// Does `decl` answer to `query`? The remap table is applied on the query
/// side, the namespace prefix stripped on the declaration side.
pub fn decl_matches_name(config: &RemapConfig, decl: &Declaration, query: &str) -> bool {
    same_type_name(config, decl.local_name(), apply_remap(config, query))
}

/// Type-reference equality: same structural kind, same genericity, and the
/// (namespace-stripped) names match with the remap table applied to the
/// right-hand side.
pub fn refs_equal(arena: &DeclArena, config: &RemapConfig, a: &TypeRef, b: &TypeRef) -> bool {
    if a.kind_tag() != b.kind_tag() {
        return false;
    }

    let a_name = ref_local_name(arena, a);
    let b_name = ref_local_name(arena, b);

    if is_generic_name(config, &a_name) != is_generic_name(config, &b_name) {
        return false;
    }

    same_type_name(config, &a_name, apply_remap(config, &b_name))
}

/// Name of the reference's core with its declaring namespace stripped.
pub fn ref_local_name<'a>(arena: &'a DeclArena, r: &TypeRef) -> std::borrow::Cow<'a, str> {
    match r.base_decl() {
        Some(id) => std::borrow::Cow::Borrowed(arena[id].local_name()),
        None => r.name(arena),
    }
}
