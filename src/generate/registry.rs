use std::collections::HashMap;

use color_eyre::eyre::{bail, Result};
use log::warn;

use crate::config::RemapConfig;
use crate::data::ast::{DeclArena, DeclId, TypeRef};
use crate::data::name_match::{decl_matches_name, refs_equal};

/// An ordered list of declarations from one compilation. Append-only; the
/// engine keeps one for the input header, one for the target's `app`
/// namespace and one for the target's file-scope globals.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    pub decls: Vec<DeclId>,
}

impl Registry {
    pub fn new(decls: Vec<DeclId>) -> Registry {
        Registry { decls }
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    /// Last-to-first scan; later declarations shadow earlier ones with the
    /// same matched name. The remap table applies on the query side.
    pub fn find_by_name(
        &self,
        arena: &DeclArena,
        config: &RemapConfig,
        name: &str,
    ) -> Option<DeclId> {
        self.decls
            .iter()
            .rev()
            .copied()
            .find(|&id| decl_matches_name(config, &arena[id], name))
    }

    pub fn find_by_type(
        &self,
        arena: &DeclArena,
        config: &RemapConfig,
        tref: &TypeRef,
    ) -> Option<DeclId> {
        self.decls
            .iter()
            .copied()
            .find(|&id| refs_equal(arena, config, &TypeRef::for_decl(arena, id), tref))
    }

    pub fn contains_name(&self, arena: &DeclArena, config: &RemapConfig, name: &str) -> bool {
        self.find_by_name(arena, config, name).is_some()
    }

    pub fn contains_type(&self, arena: &DeclArena, config: &RemapConfig, tref: &TypeRef) -> bool {
        self.find_by_type(arena, config, tref).is_some()
    }

    /// Stable ascending sort by (file, offset). In strict mode a list that
    /// spans more than one source file is a hard error.
    pub fn sort_by_source_span(&mut self, arena: &DeclArena, strict: bool) -> Result<()> {
        if strict {
            if let Some(&first) = self.decls.first() {
                let file = &arena[first].span.file;
                if let Some(&odd) = self
                    .decls
                    .iter()
                    .find(|&&id| &arena[id].span.file != file)
                {
                    bail!(
                        "declarations from multiple files: {} vs {}",
                        file.display(),
                        arena[odd].span.file.display()
                    );
                }
            }
        }
        self.decls
            .sort_by(|&a, &b| arena[a].span.cmp(&arena[b].span));
        Ok(())
    }
}

/// Caches the input declaration (or a pointer over it) for every configured
/// known name and reserved-suffix remap target. Keys are the exact
/// configured names; a trailing `*` requests the pointer wrapper.
pub fn load_prebuilt_types(
    arena: &DeclArena,
    config: &RemapConfig,
    input: &Registry,
) -> HashMap<String, TypeRef> {
    let mut cache = HashMap::new();
    let names = config
        .known_names
        .iter()
        .chain(config.known_reserved_suffixes.values());

    for name in names {
        if cache.contains_key(name) {
            continue;
        }
        let (lookup, pointer) = match name.strip_suffix('*') {
            Some(base) => (base, true),
            None => (name.as_str(), false),
        };
        match input.find_by_name(arena, config, lookup) {
            Some(id) => {
                let mut r = TypeRef::for_decl(arena, id);
                if pointer {
                    r = TypeRef::Pointer(Box::new(r));
                }
                cache.insert(name.clone(), r);
            }
            None => warn!("Prebuilt type {name} not found in input header"),
        }
    }
    cache
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ast::{
        ClassDecl, ClassKind, DeclKind, Declaration, SourceSpan, Status, TypedefDecl,
        PrimitiveKind,
    };
    use std::path::PathBuf;

    fn class_at(arena: &mut DeclArena, name: &str, file: &str, start: usize) -> DeclId {
        arena.alloc(Declaration {
            name: name.to_string(),
            namespace: None,
            span: SourceSpan {
                file: PathBuf::from(file),
                start,
                end: start + 1,
            },
            comment: None,
            status: Status::Ok,
            kind: DeclKind::Class(ClassDecl {
                class_kind: ClassKind::Struct,
                bases: Vec::new(),
                fields: Vec::new(),
                nested: Vec::new(),
                size: 8,
            }),
        })
    }

    #[test]
    fn find_by_name_prefers_later_declarations() {
        let mut arena = DeclArena::new();
        let config = RemapConfig::default();
        let first = class_at(&mut arena, "Foo", "a.h", 0);
        let second = class_at(&mut arena, "Foo", "a.h", 10);
        let registry = Registry::new(vec![first, second]);
        assert_eq!(registry.find_by_name(&arena, &config, "Foo"), Some(second));
    }

    #[test]
    fn find_by_name_applies_matcher() {
        let mut arena = DeclArena::new();
        let config = RemapConfig::default();
        let mangled = class_at(&mut arena, "Foo_3", "a.h", 0);
        let registry = Registry::new(vec![mangled]);
        assert_eq!(registry.find_by_name(&arena, &config, "Foo"), Some(mangled));
        assert_eq!(registry.find_by_name(&arena, &config, "Bar"), None);
    }

    #[test]
    fn sort_orders_by_file_then_offset() {
        let mut arena = DeclArena::new();
        let c = class_at(&mut arena, "C", "a.h", 20);
        let a = class_at(&mut arena, "A", "a.h", 0);
        let b = class_at(&mut arena, "B", "a.h", 10);
        let mut registry = Registry::new(vec![c, a, b]);
        registry.sort_by_source_span(&arena, true).unwrap();
        assert_eq!(registry.decls, vec![a, b, c]);
    }

    #[test]
    fn strict_sort_rejects_mixed_files() {
        let mut arena = DeclArena::new();
        let a = class_at(&mut arena, "A", "a.h", 0);
        let b = class_at(&mut arena, "B", "b.h", 0);
        let mut registry = Registry::new(vec![a, b]);
        assert!(registry.sort_by_source_span(&arena, true).is_err());
        assert!(registry.sort_by_source_span(&arena, false).is_ok());
    }

    #[test]
    fn prebuilt_cache_wraps_starred_names() {
        let mut arena = DeclArena::new();
        let mut config = RemapConfig::default();
        config.known_names = vec!["Il2CppObject".to_string(), "String*".to_string()];
        let object = class_at(&mut arena, "Il2CppObject", "a.h", 0);
        let string = class_at(&mut arena, "String", "a.h", 10);
        let registry = Registry::new(vec![object, string]);

        let cache = load_prebuilt_types(&arena, &config, &registry);
        assert_eq!(cache.get("Il2CppObject"), Some(&TypeRef::Decl(object)));
        assert_eq!(
            cache.get("String*"),
            Some(&TypeRef::Pointer(Box::new(TypeRef::Decl(string))))
        );
    }

    #[test]
    fn prebuilt_cache_skips_missing_names() {
        let mut arena = DeclArena::new();
        let mut config = RemapConfig::default();
        config.known_names = vec!["Absent".to_string()];
        config
            .known_reserved_suffixes
            .insert("__Array".to_string(), "Il2CppArray".to_string());
        let array = class_at(&mut arena, "Il2CppArray", "a.h", 0);
        let registry = Registry::new(vec![array]);

        let cache = load_prebuilt_types(&arena, &config, &registry);
        assert!(!cache.contains_key("Absent"));
        assert_eq!(cache.get("Il2CppArray"), Some(&TypeRef::Decl(array)));
    }

    #[test]
    fn find_by_type_respects_kind() {
        let mut arena = DeclArena::new();
        let config = RemapConfig::default();
        let class = class_at(&mut arena, "Foo", "a.h", 0);
        let alias = arena.alloc(Declaration {
            name: "Foo".to_string(),
            namespace: None,
            span: SourceSpan::default(),
            comment: None,
            status: Status::Ok,
            kind: DeclKind::Typedef(TypedefDecl {
                element: TypeRef::Primitive(PrimitiveKind::Int),
            }),
        });
        let registry = Registry::new(vec![class, alias]);
        assert_eq!(
            registry.find_by_type(&arena, &config, &TypeRef::Decl(class)),
            Some(class)
        );
        assert_eq!(
            registry.find_by_type(&arena, &config, &TypeRef::Typedef(alias)),
            Some(alias)
        );
    }
}
