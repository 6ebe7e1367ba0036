//! Per-class field alignment. Each target class is rewritten against its
//! input counterpart: matching layouts compare pairwise, everything else is
//! reassembled from the input side with inherited base fields filtered out.

use crate::data::ast::{DeclId, Field, RefKind, Status, TypeRef};
use crate::data::name_match::{decl_matches_name, refs_equal};
use crate::generate::engine::MergeEngine;

/// C# property backing fields surface with this suffix in the input export.
fn strip_backing_field(name: &str) -> &str {
    name.strip_suffix("_k__BackingField").unwrap_or(name)
}

impl MergeEngine {
    /// Rewrites `tc`'s fields against its input counterpart. Returns `false`
    /// when no counterpart exists; the caller marks the class unresolved.
    /// Guarded by the walked-classes set, so recursion through base classes
    /// and field types terminates.
    pub(crate) fn walk_class(&mut self, tc: DeclId) -> bool {
        let tc_name = self.arena[tc].local_name().to_string();
        if !self.walked.insert(tc_name.clone()) {
            return true;
        }

        let Some(ic) = self.input.decls.iter().rev().copied().find(|&id| {
            self.arena[id].is_class() && decl_matches_name(&self.config, &self.arena[id], &tc_name)
        }) else {
            return false;
        };

        let input_fields: Vec<Field> = self.arena[ic]
            .as_class()
            .expect("checked class")
            .fields
            .iter()
            .cloned()
            .map(|mut f| {
                f.name = strip_backing_field(&f.name).to_string();
                f
            })
            .collect();
        let target_fields = self.arena[tc].as_class().expect("target class").fields.clone();

        let size_sum = |fs: &[Field]| fs.iter().map(|f| f.size).sum::<u64>();
        if input_fields.len() == target_fields.len()
            && size_sum(&input_fields) == size_sum(&target_fields)
        {
            // layouts agree; compare pairwise
            let mut rebuilt = Vec::with_capacity(input_fields.len());
            for (fi, ft) in input_fields.into_iter().zip(target_fields) {
                rebuilt.push(self.compare_field(tc, fi, ft));
            }
            self.arena[tc].as_class_mut().expect("target class").fields = rebuilt;
            return true;
        }

        // layouts disagree; rebuild from the input side. Fields the target
        // inherits from its bases are not repeated on the class itself.
        let base_fields = self.gather_base_fields(tc);

        let last = target_fields
            .last()
            .and_then(|last_target| {
                input_fields
                    .iter()
                    .rposition(|fi| fi.name == last_target.name)
            })
            .unwrap_or(input_fields.len().saturating_sub(1));

        let mut rebuilt: Vec<Field> = Vec::new();
        for fi in input_fields.into_iter().take(last + 1).rev() {
            if let Some(ft) = target_fields.iter().find(|ft| ft.name == fi.name) {
                let ft = ft.clone();
                rebuilt.push(self.compare_field(tc, fi, ft));
            } else if base_fields.iter().any(|bf| bf.name == fi.name) {
                // inherited; stays on the base class
            } else {
                let mut field = fi;
                if !self.try_update_field(tc, &mut field) {
                    field.status = Status::Unresolved;
                }
                rebuilt.push(field);
            }
        }
        rebuilt.reverse();
        self.arena[tc].as_class_mut().expect("target class").fields = rebuilt;
        true
    }

    /// Fields of every transitive base class, each base walked first so its
    /// own fields are already reconciled.
    fn gather_base_fields(&mut self, tc: DeclId) -> Vec<Field> {
        let bases = match self.arena[tc].as_class() {
            Some(c) => c.bases.clone(),
            None => return Vec::new(),
        };
        let mut out = Vec::new();
        for base in bases {
            let Some(bid) = base.ty.base_decl() else {
                continue;
            };
            if !self.arena[bid].is_class() {
                continue;
            }
            if !self.walk_class(bid) {
                self.arena[bid].status = Status::Unresolved;
            }
            if let Some(c) = self.arena[bid].as_class() {
                out.extend(c.fields.iter().cloned());
            }
            out.extend(self.gather_base_fields(bid));
        }
        out
    }

    /// Picks the winning side for one aligned field pair.
    pub(crate) fn compare_field(&mut self, tc: DeclId, mut fi: Field, mut ft: Field) -> Field {
        self.first_pass_refine(&mut fi);
        self.first_pass_refine(&mut ft);

        // both sides already known: the input spelling stands
        if self.is_known_ref(&fi.ty) && self.is_known_ref(&ft.ty) {
            return fi;
        }
        // agreeing references: the target's canonical declaration wins
        if refs_equal(&self.arena, &self.config, &fi.ty, &ft.ty) {
            return ft;
        }
        // the target narrowed an input pointer down to a known type
        if fi.ty.kind_tag() == RefKind::Pointer
            && fi.name == ft.name
            && self.is_known_ref(&ft.ty)
        {
            return ft;
        }
        // enum specialization on the target side is preserved
        if matches!(fi.ty.kind_tag(), RefKind::Primitive | RefKind::Typedef)
            && self.is_enum_or_primitive(&ft.ty)
        {
            return ft;
        }
        // padding absorption and everything else: adopt the input field
        if !self.try_update_field(tc, &mut fi) {
            fi.status = Status::Unresolved;
        }
        fi
    }

    fn is_enum_or_primitive(&self, r: &TypeRef) -> bool {
        match r {
            TypeRef::Primitive(_) => true,
            TypeRef::Decl(id) => self.arena[*id].is_enum(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemapConfig;
    use crate::data::ast::{
        BaseSpecifier, ClassDecl, ClassKind, DeclArena, DeclKind, Declaration, PrimitiveKind,
        SourceSpan, Access,
    };
    use crate::generate::registry::Registry;

    fn class_with(
        arena: &mut DeclArena,
        name: &str,
        namespace: Option<&str>,
        fields: Vec<Field>,
        bases: Vec<BaseSpecifier>,
    ) -> DeclId {
        let size = fields.iter().map(|f| f.size).sum::<u64>().max(1);
        arena.alloc(Declaration {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            span: SourceSpan::default(),
            comment: None,
            status: Status::Ok,
            kind: DeclKind::Class(ClassDecl {
                class_kind: ClassKind::Struct,
                bases,
                fields,
                nested: Vec::new(),
                size,
            }),
        })
    }

    fn engine() -> MergeEngine {
        MergeEngine::new(RemapConfig::default())
    }

    #[test]
    fn fast_path_adopts_rich_pointer_types() {
        // struct Foo_3 { int32_t x; Bar_2* b; } vs
        // struct Foo { int32_t x; Il2CppObject* b; } with Bar in globals
        let mut engine = engine();
        let target_bar = class_with(&mut engine.arena, "Bar", None, Vec::new(), Vec::new());
        let object = class_with(&mut engine.arena, "Il2CppObject", None, Vec::new(), Vec::new());
        engine.target_globals = Registry::new(vec![target_bar, object]);

        let input_bar = class_with(&mut engine.arena, "Bar_2", None, Vec::new(), Vec::new());
        let input_foo = class_with(
            &mut engine.arena,
            "Foo_3",
            None,
            vec![
                Field::new("x", TypeRef::Primitive(PrimitiveKind::Int), 4),
                Field::new("b", TypeRef::Pointer(Box::new(TypeRef::Decl(input_bar))), 8),
            ],
            Vec::new(),
        );
        engine.input = Registry::new(vec![input_bar, input_foo]);

        let target_foo = class_with(
            &mut engine.arena,
            "app::Foo",
            Some("app"),
            vec![
                Field::new("x", TypeRef::Primitive(PrimitiveKind::Int), 4),
                Field::new("b", TypeRef::Pointer(Box::new(TypeRef::Decl(object))), 8),
            ],
            Vec::new(),
        );
        engine.target = Registry::new(vec![target_foo]);

        assert!(engine.walk_class(target_foo));
        let fields = &engine.arena[target_foo].as_class().unwrap().fields;
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].ty, TypeRef::Primitive(PrimitiveKind::Int));
        assert_eq!(
            fields[1].ty,
            TypeRef::Pointer(Box::new(TypeRef::Decl(target_bar)))
        );
        assert!(fields.iter().all(|f| f.status == Status::Ok));
    }

    #[test]
    fn missing_counterpart_fails_the_walk() {
        let mut engine = engine();
        let target = class_with(&mut engine.arena, "app::Lost", Some("app"), Vec::new(), Vec::new());
        engine.target = Registry::new(vec![target]);
        assert!(!engine.walk_class(target));
    }

    #[test]
    fn walk_is_idempotent_via_guard() {
        let mut engine = engine();
        let target = class_with(&mut engine.arena, "app::Foo", Some("app"), Vec::new(), Vec::new());
        engine.walked.insert("Foo".to_string());
        // no input counterpart, but the guard short-circuits first
        assert!(engine.walk_class(target));
    }

    #[test]
    fn slow_path_skips_inherited_fields() {
        // input Derived_2 repeats the base's field inline; the target keeps
        // it on the base class
        let mut engine = engine();
        let input_base = class_with(
            &mut engine.arena,
            "Base_1",
            None,
            vec![Field::new("id", TypeRef::Primitive(PrimitiveKind::Int), 4)],
            Vec::new(),
        );
        let input_derived = class_with(
            &mut engine.arena,
            "Derived_2",
            None,
            vec![
                Field::new("id", TypeRef::Primitive(PrimitiveKind::Int), 4),
                Field::new("hp", TypeRef::Primitive(PrimitiveKind::Float), 4),
            ],
            Vec::new(),
        );
        engine.input = Registry::new(vec![input_base, input_derived]);

        let target_base = class_with(
            &mut engine.arena,
            "app::Base",
            Some("app"),
            vec![Field::new("id", TypeRef::Primitive(PrimitiveKind::Int), 4)],
            Vec::new(),
        );
        let target_derived = class_with(
            &mut engine.arena,
            "app::Derived",
            Some("app"),
            vec![Field::new("hp", TypeRef::Primitive(PrimitiveKind::Float), 4)],
            vec![BaseSpecifier {
                ty: TypeRef::Decl(target_base),
                access: Access::Public,
            }],
        );
        engine.target = Registry::new(vec![target_base, target_derived]);

        assert!(engine.walk_class(target_derived));
        let fields = &engine.arena[target_derived].as_class().unwrap().fields;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "hp");
    }

    #[test]
    fn slow_path_adopts_extra_input_fields() {
        let mut engine = engine();
        let input = class_with(
            &mut engine.arena,
            "Foo_3",
            None,
            vec![
                Field::new("a", TypeRef::Primitive(PrimitiveKind::Int), 4),
                Field::new("b", TypeRef::Primitive(PrimitiveKind::Float), 4),
            ],
            Vec::new(),
        );
        engine.input = Registry::new(vec![input]);

        let target = class_with(
            &mut engine.arena,
            "app::Foo",
            Some("app"),
            vec![Field::new("b", TypeRef::Primitive(PrimitiveKind::Float), 4)],
            Vec::new(),
        );
        engine.target = Registry::new(vec![target]);

        assert!(engine.walk_class(target));
        let fields = &engine.arena[target].as_class().unwrap().fields;
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "a");
        assert_eq!(fields[1].name, "b");
    }

    #[test]
    fn trailing_input_fields_are_dropped() {
        // fields past the one matching the target's last are statics and
        // do not belong to the instance layout
        let mut engine = engine();
        let input = class_with(
            &mut engine.arena,
            "Foo_3",
            None,
            vec![
                Field::new("a", TypeRef::Primitive(PrimitiveKind::Int), 4),
                Field::new("statics", TypeRef::Primitive(PrimitiveKind::Long), 8),
            ],
            Vec::new(),
        );
        engine.input = Registry::new(vec![input]);

        let target = class_with(
            &mut engine.arena,
            "app::Foo",
            Some("app"),
            vec![
                Field::new("pad", TypeRef::Primitive(PrimitiveKind::Char), 1),
                Field::new("a", TypeRef::Primitive(PrimitiveKind::Int), 4),
            ],
            Vec::new(),
        );
        engine.target = Registry::new(vec![target]);

        assert!(engine.walk_class(target));
        let fields = &engine.arena[target].as_class().unwrap().fields;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "a");
    }

    #[test]
    fn backing_field_suffix_is_stripped() {
        let mut engine = engine();
        let input = class_with(
            &mut engine.arena,
            "Foo_3",
            None,
            vec![Field::new(
                "_hp_k__BackingField",
                TypeRef::Primitive(PrimitiveKind::Float),
                4,
            )],
            Vec::new(),
        );
        engine.input = Registry::new(vec![input]);

        let target = class_with(
            &mut engine.arena,
            "app::Foo",
            Some("app"),
            vec![Field::new("_hp", TypeRef::Primitive(PrimitiveKind::Float), 4)],
            Vec::new(),
        );
        engine.target = Registry::new(vec![target]);

        assert!(engine.walk_class(target));
        let fields = &engine.arena[target].as_class().unwrap().fields;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "_hp");
    }

    #[test]
    fn enum_specialization_is_preserved() {
        let mut engine = engine();
        let color = engine.arena.alloc(Declaration {
            name: "app::Col".to_string(),
            namespace: Some("app".to_string()),
            span: SourceSpan::default(),
            comment: None,
            status: Status::Ok,
            kind: DeclKind::Enum(crate::data::ast::EnumDecl {
                items: Vec::new(),
                size: 4,
            }),
        });
        let fi = Field::new("c", TypeRef::Primitive(PrimitiveKind::Int), 4);
        let ft = Field::new("c", TypeRef::Decl(color), 4);
        let holder = class_with(&mut engine.arena, "H", None, Vec::new(), Vec::new());
        let picked = engine.compare_field(holder, fi, ft);
        assert_eq!(picked.ty, TypeRef::Decl(color));
    }

    #[test]
    fn known_pointer_narrowing_prefers_target() {
        let mut engine = engine();
        engine.config.known_names = vec!["String".to_string()];
        let string = class_with(&mut engine.arena, "String", None, Vec::new(), Vec::new());
        let noise = class_with(&mut engine.arena, "Noise_8", None, Vec::new(), Vec::new());
        let holder = class_with(&mut engine.arena, "H", None, Vec::new(), Vec::new());

        let fi = Field::new("s", TypeRef::Pointer(Box::new(TypeRef::Decl(noise))), 8);
        let ft = Field::new("s", TypeRef::Decl(string), 8);
        let picked = engine.compare_field(holder, fi, ft);
        assert_eq!(picked.ty, TypeRef::Decl(string));
    }

    #[test]
    fn unresolvable_field_is_marked() {
        let mut engine = engine();
        let mystery = class_with(&mut engine.arena, "Mystery_9", None, Vec::new(), Vec::new());
        let holder = class_with(&mut engine.arena, "H", None, Vec::new(), Vec::new());
        // pointer to an unknown type with no prebuilt fallbacks configured
        let fi = Field::new("m", TypeRef::Pointer(Box::new(TypeRef::Decl(mystery))), 8);
        let ft = Field::new("pad", TypeRef::Primitive(PrimitiveKind::Long), 8);
        let picked = engine.compare_field(holder, fi, ft);
        assert_eq!(picked.status, Status::Unresolved);
        assert_eq!(picked.name, "m");
    }
}
