//! Deterministic text emission. Everything is reconstructed from the arena;
//! identical inputs and configuration give byte-identical output.

use std::fmt::Write as _;

use indent_write::fmt::IndentWriter;
use itertools::Itertools;

use crate::data::ast::{DeclId, DeclKind, Field, PrimitiveKind, Status, TypeRef};
use crate::generate::engine::MergeEngine;

/// Emitted verbatim ahead of everything else.
pub const HEADER_PREAMBLE: &str = r#"#pragma once
#if defined(__i386__) || defined(__arm__)
#define IS_32BIT
#endif
#ifndef DO_ARRAY_DEFINE
#define DO_ARRAY_DEFINE(E_NAME) \
struct  E_NAME ## __Array { \
Il2CppClass *klass; \
MonitorData *monitor; \
Il2CppArrayBounds *bounds; \
il2cpp_array_size_t max_length; \
E_NAME vector[32]; \
};
#endif
#ifndef DO_LIST_DEFINE
#define DO_LIST_DEFINE(E_NAME) \
DO_ARRAY_DEFINE(E_NAME) \
struct List_1_ ## E_NAME { \
Il2CppClass *klass; \
MonitorData *monitor; \
struct E_NAME ## __Array *_items; \
int32_t _size; \
int32_t _version; \
};
#endif

#include <cstdint>
#include "il2cpp-class.h"
"#;

fn primitive_spelling(kind: PrimitiveKind) -> &'static str {
    match kind {
        PrimitiveKind::Void => "void",
        PrimitiveKind::Bool => "bool",
        PrimitiveKind::Char => "int8_t",
        PrimitiveKind::UChar => "uint8_t",
        PrimitiveKind::Short => "int16_t",
        PrimitiveKind::UShort => "uint16_t",
        PrimitiveKind::Int => "int32_t",
        PrimitiveKind::UInt => "uint32_t",
        PrimitiveKind::Long => "int64_t",
        PrimitiveKind::ULong => "uint64_t",
        PrimitiveKind::LongLong => "int64_t",
        PrimitiveKind::ULongLong => "uint64_t",
        PrimitiveKind::Float => "float",
        PrimitiveKind::Double => "double",
        other => panic!("emission bug: no spelling for primitive {other:?}"),
    }
}

impl MergeEngine {
    /// Builds the merged header: preamble, the target's own global typedefs
    /// and built-in classes, then the `app` namespace with enums, inserted
    /// enums and classes in target order.
    pub fn emit_header(&self) -> String {
        let mut out = String::new();
        out.push_str(HEADER_PREAMBLE);
        out.push('\n');

        for &id in &self.target_globals.decls {
            let decl = &self.arena[id];
            if !matches!(decl.kind, DeclKind::Typedef(_)) {
                continue;
            }
            if decl.local_name() == "size_t" || decl.span.file != self.target_file {
                continue;
            }
            let _ = writeln!(out, "{};", self.spell_typedef(id));
        }

        for name in self.config.built_in_names() {
            if let Some(id) = self.find_global_class(name) {
                let _ = writeln!(out, "{};", self.spell_class(id, false));
            }
        }

        out.push_str("namespace app {\n");

        for &id in &self.target.decls {
            let decl = &self.arena[id];
            if decl.is_enum() && decl.status == Status::Ok {
                let _ = writeln!(out, "{};", self.spell_enum(id));
            }
        }

        // enums discovered during resolution, in planning order
        for &id in &self.target.decls {
            for r in self.insertions.get(&id).into_iter().flatten() {
                if let Some(did) = r.base_decl() {
                    if self.arena[did].is_enum() {
                        let _ = writeln!(out, "{};", self.spell_enum(did));
                    }
                }
            }
        }

        for &id in &self.target.decls {
            let decl = &self.arena[id];
            if !decl.is_class() {
                continue;
            }
            match decl.status {
                Status::Unresolved => continue,
                Status::MacroArray => {
                    if let Some(base) = decl.local_name().strip_suffix("__Array") {
                        let _ = writeln!(out, "DO_ARRAY_DEFINE({base})");
                    }
                }
                Status::MacroList => {
                    let name = decl.local_name();
                    if name.ends_with("__Array") {
                        // the list define already expands the array struct
                        continue;
                    }
                    let base = name.strip_prefix("List_1_").unwrap_or(name);
                    let _ = writeln!(out, "DO_LIST_DEFINE({base})");
                }
                Status::Ok => {
                    for r in self.insertions.get(&id).into_iter().flatten() {
                        if let Some(did) = r.base_decl() {
                            if self.arena[did].is_enum() {
                                continue;
                            }
                            let _ = writeln!(out, "{};", self.spell_decl(did));
                        }
                    }
                    let _ = writeln!(out, "{};", self.spell_class(id, false));
                }
            }
        }

        out.push_str("}\n");
        out
    }

    fn find_global_class(&self, name: &str) -> Option<DeclId> {
        self.target_globals
            .decls
            .iter()
            .copied()
            .find(|&id| self.arena[id].is_class() && self.arena[id].local_name() == name)
    }

    fn spell_decl(&self, id: DeclId) -> String {
        match self.arena[id].kind {
            DeclKind::Class(_) => self.spell_class(id, false),
            DeclKind::Enum(_) => self.spell_enum(id),
            DeclKind::Typedef(_) => self.spell_typedef(id),
        }
    }

    fn spell_typedef(&self, id: DeclId) -> String {
        let decl = &self.arena[id];
        let td = decl.as_typedef().expect("typedef declaration");
        let (pre, post) = self.spell_type(&td.element);
        format!("typedef {pre} {}{post}", decl.local_name())
    }

    fn spell_enum(&self, id: DeclId) -> String {
        let decl = &self.arena[id];
        let e = decl.as_enum().expect("enum declaration");
        if e.items.is_empty() {
            return format!("enum {}", decl.local_name());
        }
        let mut s = format!("enum {} {{\n", decl.local_name());
        for (i, item) in e.items.iter().enumerate() {
            s.push_str("    ");
            s.push_str(&item.name);
            s.push_str(" = ");
            s.push_str(&item.value);
            if i + 1 < e.items.len() {
                s.push(',');
            }
            s.push('\n');
        }
        s.push('}');
        s
    }

    /// `declaration_only` (and size 0) emit the bare `struct Name` form.
    fn spell_class(&self, id: DeclId, declaration_only: bool) -> String {
        let decl = &self.arena[id];
        let class = decl
            .as_class()
            .unwrap_or_else(|| panic!("emission bug: {} is not a class", decl.name));
        let kind = class.class_kind.spelling();
        let name = decl.local_name();

        if class.size == 0 || declaration_only {
            return format!("{kind} {name}");
        }

        let mut s = format!("{kind} {name}");
        if !class.bases.is_empty() {
            let bases = class
                .bases
                .iter()
                .rev()
                .map(|b| self.spell_type(&b.ty).0)
                .join(", ");
            s.push_str(" : ");
            s.push_str(&bases);
        }
        s.push_str(" {\n");
        {
            let mut w = IndentWriter::new("    ", &mut s);
            for &nid in &class.nested {
                let _ = writeln!(w, "{};", self.spell_decl(nid));
            }
            for field in &class.fields {
                let _ = writeln!(w, "{};", self.spell_field(field));
            }
        }
        s.push('}');
        s
    }

    fn spell_field(&self, field: &Field) -> String {
        let mut s = String::new();
        if field.status == Status::Unresolved {
            s.push_str("/* Unresolved */ ");
        } else if let Some(comment) = field.comment.as_deref() {
            if !comment.contains('\n') && !comment.contains("*/") {
                let _ = write!(s, "/* {comment} */ ");
            }
        }
        for attr in &field.attributes {
            if attr.starts_with("alignas") {
                s.push_str("alignas(8) ");
            } else {
                s.push_str(attr);
                s.push(' ');
            }
        }
        let (pre, post) = self.spell_type(&field.ty);
        let _ = write!(s, "{pre} {}{post}", field.name);
        if let Some(width) = field.bit_width {
            let _ = write!(s, " : {width}");
        }
        s
    }

    /// (type spelling, suffix after the field name) pair; arrays put their
    /// extent in the suffix.
    fn spell_type(&self, tref: &TypeRef) -> (String, String) {
        match tref {
            TypeRef::Primitive(k) => (primitive_spelling(*k).to_string(), String::new()),
            TypeRef::Typedef(id) | TypeRef::Decl(id) => {
                (self.arena[*id].local_name().to_string(), String::new())
            }
            TypeRef::Pointer(_) => (self.spell_pointer(tref), String::new()),
            TypeRef::Array(element, len) => {
                let (pre, post) = self.spell_type(element);
                (pre, format!("{post}[{len}]"))
            }
            TypeRef::Qualified(q, element) => {
                let (pre, post) = self.spell_type(element);
                (format!("{} {pre}", q.spelling()), post)
            }
        }
    }

    fn spell_pointer(&self, tref: &TypeRef) -> String {
        let depth = tref.pointer_depth();
        let mut base = tref;
        while let TypeRef::Pointer(e) = base {
            base = e;
        }

        let mut prefix = String::new();
        let mut core = base;
        while let TypeRef::Qualified(q, e) = core {
            prefix.push_str(q.spelling());
            prefix.push(' ');
            core = e;
        }

        let name = match core {
            TypeRef::Primitive(k) => primitive_spelling(*k).to_string(),
            TypeRef::Typedef(id) | TypeRef::Decl(id) => {
                let decl = &self.arena[*id];
                let mut n = String::new();
                if let Some(class) = decl.as_class() {
                    // opaque forward declarations need their tag kind
                    if class.size == 0 {
                        n.push_str(class.class_kind.spelling());
                        n.push(' ');
                    }
                }
                n.push_str(decl.local_name());
                n
            }
            other => self.spell_type(other).0,
        };

        format!("{prefix}{name}{}", "*".repeat(depth))
    }
}
