//! libclang front-end. Lowers the two header compilations into the
//! [`crate::data::ast`] facade; everything downstream works on the arena and
//! never touches libclang again.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use clang::diagnostic::Severity;
use clang::{Accessibility, Clang, Entity, EntityKind, Index, Type, TypeKind, Unsaved};
use color_eyre::eyre::{eyre, Context, Result};
use log::{trace, warn};

use crate::data::ast::{
    Access, BaseSpecifier, ClassDecl, ClassKind, DeclArena, DeclId, DeclKind, Declaration,
    EnumDecl, EnumItem, Field, PrimitiveKind, Qualifier, SourceSpan, Status, TypeRef,
    TypedefDecl,
};

/// Top-level declarations of one compilation, in source order.
#[derive(Debug, Default)]
pub struct ParsedHeader {
    pub file: PathBuf,
    pub typedefs: Vec<DeclId>,
    pub enums: Vec<DeclId>,
    pub classes: Vec<DeclId>,
    pub namespaces: Vec<ParsedNamespace>,
    pub errors: Vec<String>,
    /// Set when the `size_t` retry kicked in; spans refer to this text, not
    /// the on-disk file.
    pub patched: Option<String>,
}

#[derive(Debug, Default)]
pub struct ParsedNamespace {
    pub name: String,
    pub typedefs: Vec<DeclId>,
    pub enums: Vec<DeclId>,
    pub classes: Vec<DeclId>,
}

impl ParsedHeader {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub include_dir: PathBuf,
    pub sysroot: PathBuf,
}

impl ParseOptions {
    fn arguments(&self) -> Vec<String> {
        vec![
            "-x".to_string(),
            "c++".to_string(),
            "--target=aarch64-linux-gnu".to_string(),
            "-D_IDACLANG_=1".to_string(),
            "-I".to_string(),
            self.include_dir.display().to_string(),
            "-I".to_string(),
            self.sysroot.display().to_string(),
        ]
    }
}

/// Parses both headers with identical options. The target header gets one
/// silent retry with a `size_t` typedef injected after `#pragma once`; some
/// exports rely on it without declaring it.
pub fn parse_headers(
    arena: &mut DeclArena,
    input_path: &Path,
    target_path: &Path,
    options: &ParseOptions,
) -> Result<(ParsedHeader, ParsedHeader)> {
    let clang = Clang::new().map_err(|e| eyre!("libclang unavailable: {e}"))?;
    let index = Index::new(&clang, false, false);

    let input = parse_one(&index, arena, input_path, options, None)?;

    let mut target = parse_one(&index, arena, target_path, options, None)?;
    if !target.ok() {
        let text = fs::read_to_string(target_path)
            .with_context(|| format!("unable to read {}", target_path.display()))?;
        let patched = inject_size_t_typedef(&text);
        target = parse_one(&index, arena, target_path, options, Some(patched.clone()))?;
        target.patched = Some(patched);
    }

    Ok((input, target))
}

fn parse_one(
    index: &Index,
    arena: &mut DeclArena,
    path: &Path,
    options: &ParseOptions,
    override_text: Option<String>,
) -> Result<ParsedHeader> {
    let mut parser = index.parser(path);
    parser
        .arguments(&options.arguments())
        .detailed_preprocessing_record(true);

    let unsaved;
    if let Some(text) = override_text {
        unsaved = [Unsaved::new(path, text)];
        parser.unsaved(&unsaved);
    }

    let tu = parser
        .parse()
        .with_context(|| format!("unable to parse {}", path.display()))?;

    let errors: Vec<String> = tu
        .get_diagnostics()
        .iter()
        .filter(|d| matches!(d.get_severity(), Severity::Error | Severity::Fatal))
        .map(|d| d.get_text())
        .collect();
    if !errors.is_empty() {
        return Ok(ParsedHeader {
            file: path.to_path_buf(),
            errors,
            ..Default::default()
        });
    }

    let mut header = ParsedHeader {
        file: path.to_path_buf(),
        ..Default::default()
    };
    let mut lowering = Lowering {
        arena,
        ids: HashMap::new(),
    };

    for child in tu.get_entity().get_children() {
        match child.get_kind() {
            EntityKind::Namespace => {
                let name = child.get_name().unwrap_or_default();
                let mut namespace = ParsedNamespace {
                    name: name.clone(),
                    ..Default::default()
                };
                for member in child.get_children() {
                    lowering.lower_top_level(member, Some(&name), &mut namespace.typedefs,
                        &mut namespace.enums, &mut namespace.classes);
                }
                header.namespaces.push(namespace);
            }
            _ => {
                let (typedefs, enums, classes) = (
                    &mut header.typedefs,
                    &mut header.enums,
                    &mut header.classes,
                );
                lowering.lower_top_level(child, None, typedefs, enums, classes);
            }
        }
    }

    trace!(
        "{}: {} typedefs, {} enums, {} classes, {} namespaces",
        path.display(),
        header.typedefs.len(),
        header.enums.len(),
        header.classes.len(),
        header.namespaces.len()
    );

    Ok(header)
}

struct Lowering<'a, 'tu> {
    arena: &'a mut DeclArena,
    ids: HashMap<Entity<'tu>, DeclId>,
}

impl<'a, 'tu> Lowering<'a, 'tu> {
    fn lower_top_level(
        &mut self,
        entity: Entity<'tu>,
        namespace: Option<&str>,
        typedefs: &mut Vec<DeclId>,
        enums: &mut Vec<DeclId>,
        classes: &mut Vec<DeclId>,
    ) {
        match entity.get_kind() {
            EntityKind::TypedefDecl | EntityKind::TypeAliasDecl => {
                typedefs.push(self.lower_decl(entity, namespace));
            }
            EntityKind::EnumDecl => {
                enums.push(self.lower_decl(entity, namespace));
            }
            EntityKind::StructDecl | EntityKind::ClassDecl | EntityKind::UnionDecl => {
                classes.push(self.lower_decl(entity, namespace));
            }
            _ => {}
        }
    }

    fn lower_decl(&mut self, entity: Entity<'tu>, namespace: Option<&str>) -> DeclId {
        let canonical = entity.get_definition().unwrap_or(entity);
        if let Some(&id) = self.ids.get(&canonical) {
            return id;
        }

        let local = canonical
            .get_name()
            .unwrap_or_else(|| canonical.get_display_name().unwrap_or_default());
        let name = match namespace {
            Some(ns) if !ns.is_empty() => format!("{ns}::{local}"),
            _ => local,
        };

        // allocate and memoize up front so self-referential types terminate
        let id = self.arena.alloc(Declaration {
            name,
            namespace: namespace.map(str::to_string),
            span: span_of(canonical),
            comment: canonical.get_comment(),
            status: Status::Ok,
            kind: DeclKind::Class(ClassDecl {
                class_kind: class_kind_of(canonical),
                bases: Vec::new(),
                fields: Vec::new(),
                nested: Vec::new(),
                size: 0,
            }),
        });
        self.ids.insert(canonical, id);

        let kind = match canonical.get_kind() {
            EntityKind::TypedefDecl | EntityKind::TypeAliasDecl => {
                let element = canonical
                    .get_typedef_underlying_type()
                    .map(|t| self.lower_type(t, true))
                    .unwrap_or(TypeRef::Primitive(PrimitiveKind::Void));
                DeclKind::Typedef(TypedefDecl { element })
            }
            EntityKind::EnumDecl => DeclKind::Enum(self.lower_enum(canonical)),
            _ => DeclKind::Class(self.lower_class(canonical, namespace)),
        };
        self.arena[id].kind = kind;
        id
    }

    fn lower_enum(&mut self, entity: Entity<'tu>) -> EnumDecl {
        let items = entity
            .get_children()
            .into_iter()
            .filter(|c| c.get_kind() == EntityKind::EnumConstantDecl)
            .map(|c| EnumItem {
                name: c.get_name().unwrap_or_default(),
                value: c
                    .get_enum_constant_value()
                    .map(|(signed, _)| signed.to_string())
                    .unwrap_or_default(),
            })
            .collect();
        EnumDecl {
            items,
            size: sizeof_of(entity),
        }
    }

    fn lower_class(&mut self, entity: Entity<'tu>, namespace: Option<&str>) -> ClassDecl {
        let mut class = ClassDecl {
            class_kind: class_kind_of(entity),
            bases: Vec::new(),
            fields: Vec::new(),
            nested: Vec::new(),
            size: sizeof_of(entity),
        };

        for child in entity.get_children() {
            match child.get_kind() {
                EntityKind::FieldDecl => class.fields.push(self.lower_field(child)),
                EntityKind::BaseSpecifier => {
                    let ty = child
                        .get_type()
                        .map(|t| self.lower_type(t, true))
                        .unwrap_or(TypeRef::Primitive(PrimitiveKind::Void));
                    class.bases.push(BaseSpecifier {
                        ty,
                        access: match child.get_accessibility() {
                            Some(Accessibility::Private) => Access::Private,
                            Some(Accessibility::Protected) => Access::Protected,
                            _ => Access::Public,
                        },
                    });
                }
                EntityKind::StructDecl
                | EntityKind::ClassDecl
                | EntityKind::UnionDecl
                | EntityKind::EnumDecl => {
                    // only named nested definitions; anonymous ones surface
                    // through their fields' types
                    if child.get_name().is_some() && child.is_definition() {
                        let nested = self.lower_decl(child, namespace);
                        class.nested.push(nested);
                    }
                }
                EntityKind::TypedefDecl => {
                    if child.get_name().is_some() {
                        let nested = self.lower_decl(child, namespace);
                        class.nested.push(nested);
                    }
                }
                _ => {}
            }
        }

        class
    }

    fn lower_field(&mut self, entity: Entity<'tu>) -> Field {
        let ty = entity.get_type();
        let tref = ty
            .map(|t| self.lower_type(t, true))
            .unwrap_or(TypeRef::Primitive(PrimitiveKind::Void));
        let size = ty.and_then(|t| t.get_sizeof().ok()).unwrap_or(0) as u64;

        let attributes = entity
            .get_children()
            .into_iter()
            .filter(|c| {
                matches!(
                    c.get_kind(),
                    EntityKind::UnexposedAttr | EntityKind::PackedAttr
                )
            })
            .filter_map(attr_spelling)
            .collect();

        Field {
            name: entity.get_name().unwrap_or_default(),
            ty: tref,
            size,
            bit_width: entity.get_bit_field_width().map(|w| w as u32),
            attributes,
            status: Status::Ok,
            comment: entity.get_comment(),
        }
    }

    fn lower_type(&mut self, ty: Type<'tu>, consider_quals: bool) -> TypeRef {
        if consider_quals {
            if ty.is_const_qualified() {
                return TypeRef::Qualified(Qualifier::Const, Box::new(self.lower_type(ty, false)));
            }
            if ty.is_volatile_qualified() {
                return TypeRef::Qualified(
                    Qualifier::Volatile,
                    Box::new(self.lower_type(ty, false)),
                );
            }
        }

        match ty.get_kind() {
            TypeKind::Pointer => {
                let pointee = ty
                    .get_pointee_type()
                    .map(|p| self.lower_type(p, true))
                    .unwrap_or(TypeRef::Primitive(PrimitiveKind::Void));
                TypeRef::Pointer(Box::new(pointee))
            }
            TypeKind::ConstantArray | TypeKind::IncompleteArray => {
                let element = ty
                    .get_element_type()
                    .map(|e| self.lower_type(e, true))
                    .unwrap_or(TypeRef::Primitive(PrimitiveKind::Void));
                TypeRef::Array(Box::new(element), ty.get_size().unwrap_or(0) as u32)
            }
            TypeKind::Elaborated => match ty.get_elaborated_type() {
                Some(inner) => self.lower_type(inner, consider_quals),
                None => TypeRef::Primitive(PrimitiveKind::Void),
            },
            TypeKind::Typedef | TypeKind::Record | TypeKind::Enum => {
                match ty.get_declaration() {
                    Some(decl) => {
                        let id = self.lower_decl(decl, namespace_of(decl).as_deref());
                        TypeRef::for_decl(self.arena, id)
                    }
                    None => TypeRef::Primitive(PrimitiveKind::Void),
                }
            }
            TypeKind::Void => TypeRef::Primitive(PrimitiveKind::Void),
            TypeKind::Bool => TypeRef::Primitive(PrimitiveKind::Bool),
            TypeKind::CharS | TypeKind::CharU | TypeKind::SChar => {
                TypeRef::Primitive(PrimitiveKind::Char)
            }
            TypeKind::UChar => TypeRef::Primitive(PrimitiveKind::UChar),
            TypeKind::Short => TypeRef::Primitive(PrimitiveKind::Short),
            TypeKind::UShort => TypeRef::Primitive(PrimitiveKind::UShort),
            TypeKind::Int => TypeRef::Primitive(PrimitiveKind::Int),
            TypeKind::UInt => TypeRef::Primitive(PrimitiveKind::UInt),
            TypeKind::Long => TypeRef::Primitive(PrimitiveKind::Long),
            TypeKind::ULong => TypeRef::Primitive(PrimitiveKind::ULong),
            TypeKind::LongLong => TypeRef::Primitive(PrimitiveKind::LongLong),
            TypeKind::ULongLong => TypeRef::Primitive(PrimitiveKind::ULongLong),
            TypeKind::Float => TypeRef::Primitive(PrimitiveKind::Float),
            TypeKind::Double => TypeRef::Primitive(PrimitiveKind::Double),
            TypeKind::WChar => TypeRef::Primitive(PrimitiveKind::WChar),
            TypeKind::Char16 => TypeRef::Primitive(PrimitiveKind::Char16),
            TypeKind::Char32 => TypeRef::Primitive(PrimitiveKind::Char32),
            TypeKind::LongDouble => TypeRef::Primitive(PrimitiveKind::LongDouble),
            TypeKind::Int128 => TypeRef::Primitive(PrimitiveKind::Int128),
            TypeKind::UInt128 => TypeRef::Primitive(PrimitiveKind::UInt128),
            other => {
                if let Some(decl) = ty.get_declaration() {
                    let id = self.lower_decl(decl, namespace_of(decl).as_deref());
                    TypeRef::for_decl(self.arena, id)
                } else {
                    warn!("Unhandled type kind {other:?} ({})", ty.get_display_name());
                    TypeRef::Primitive(PrimitiveKind::Void)
                }
            }
        }
    }
}

fn span_of(entity: Entity) -> SourceSpan {
    match entity.get_range() {
        Some(range) => {
            let start = range.get_start().get_file_location();
            let end = range.get_end().get_file_location();
            SourceSpan {
                file: start
                    .file
                    .map(|f| f.get_path())
                    .unwrap_or_default(),
                start: start.offset as usize,
                end: end.offset as usize,
            }
        }
        None => SourceSpan::default(),
    }
}

fn sizeof_of(entity: Entity) -> u64 {
    entity
        .get_type()
        .and_then(|t| t.get_sizeof().ok())
        .unwrap_or(0) as u64
}

fn class_kind_of(entity: Entity) -> ClassKind {
    match entity.get_kind() {
        EntityKind::ClassDecl => ClassKind::Class,
        EntityKind::UnionDecl => ClassKind::Union,
        _ => ClassKind::Struct,
    }
}

fn namespace_of(entity: Entity) -> Option<String> {
    match entity.get_semantic_parent() {
        Some(parent) if parent.get_kind() == EntityKind::Namespace => parent.get_name(),
        _ => None,
    }
}

fn attr_spelling(entity: Entity) -> Option<String> {
    let range = entity.get_range()?;
    let spelling: String = range
        .tokenize()
        .iter()
        .map(|t| t.get_spelling())
        .collect();
    (!spelling.is_empty()).then_some(spelling)
}

/// Inserts the `size_t` workaround typedef right after `#pragma once` (or at
/// the top when the pragma is absent).
pub fn inject_size_t_typedef(text: &str) -> String {
    const TYPEDEF: &str = "typedef unsigned long size_t;";
    match text.find("#pragma once") {
        Some(at) => {
            let line_end = text[at..]
                .find('\n')
                .map(|i| at + i + 1)
                .unwrap_or(text.len());
            format!("{}{TYPEDEF}\n{}", &text[..line_end], &text[line_end..])
        }
        None => format!("{TYPEDEF}\n{text}"),
    }
}

/// Byte offsets of every `DO_ARRAY_DEFINE` / `DO_LIST_DEFINE` occurrence in
/// the raw header text. The parser has already inlined these macros, so the
/// engine correlates offsets with declaration spans to recover their origin.
pub fn scan_macro_markers(text: &str) -> Vec<(usize, Status)> {
    let mut markers = Vec::new();
    for (token, status) in [
        ("DO_ARRAY_DEFINE", Status::MacroArray),
        ("DO_LIST_DEFINE", Status::MacroList),
    ] {
        let mut from = 0;
        while let Some(i) = text[from..].find(token) {
            markers.push((from + i, status));
            from += i + token.len();
        }
    }
    markers.sort_by_key(|(offset, _)| *offset);
    markers
}
