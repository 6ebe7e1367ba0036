//! Transitive type resolution. Once a field survives alignment, anything it
//! references must either resolve against the target's declarations, get
//! remapped to a prebuilt fallback, or be scheduled for insertion.

use log::warn;

use crate::data::ast::{DeclId, Field, RefKind, Status, TypeRef};
use crate::data::name_match::{is_generic_name, ref_local_name};
use crate::generate::engine::MergeEngine;

impl MergeEngine {
    /// Makes one field's type usable in the emitted header. Known, primitive
    /// and typedef types pass through; references that resolve among the
    /// target's declarations are retargeted to them; everything else is
    /// walked, with unresolvable input types recorded for insertion ahead of
    /// `base`.
    pub(crate) fn try_update_field(&mut self, base: DeclId, field: &mut Field) -> bool {
        if self.is_known_ref(&field.ty) {
            return true;
        }
        match field.ty.kind_tag() {
            RefKind::Primitive | RefKind::Typedef => true,
            RefKind::Pointer => {
                if let Some(found) = self.resolve_in_target(&field.ty) {
                    let target = TypeRef::for_decl(&self.arena, found);
                    field.ty.replace_base(target);
                    return true;
                }
                self.walk_type_hierarchy(base, &mut field.ty, false)
            }
            _ => {
                if let Some(found) = self.resolve_in_target(&field.ty) {
                    let target = TypeRef::for_decl(&self.arena, found);
                    field.ty.replace_base(target);
                    return true;
                }
                if !self.walk_type_hierarchy(base, &mut field.ty, true) {
                    return false;
                }
                if self.needs_insertion(&field.ty) {
                    self.insertions
                        .entry(base)
                        .or_default()
                        .insert(0, field.ty.clone());
                }
                true
            }
        }
    }

    /// A walked reference is inserted only while it still denotes an
    /// input-side declaration; remaps to prebuilt or primitive types leave
    /// nothing to emit.
    fn needs_insertion(&self, tref: &TypeRef) -> bool {
        match tref.ultimate_base() {
            TypeRef::Primitive(_) => false,
            _ => self.resolve_in_target(tref).is_none() && !self.is_known_ref(tref),
        }
    }

    /// Recursive resolution with the walked-classes guard; re-entering a
    /// class already being rewritten succeeds immediately.
    pub(crate) fn walk_type_hierarchy(
        &mut self,
        base: DeclId,
        tref: &mut TypeRef,
        deep: bool,
    ) -> bool {
        let name = ref_local_name(&self.arena, tref).to_string();
        if self.walked.contains(&name) {
            return true;
        }
        if self.is_known_ref(tref) {
            return deep;
        }

        match tref {
            TypeRef::Primitive(_) | TypeRef::Typedef(_) => deep,
            TypeRef::Array(element, _) | TypeRef::Qualified(_, element) => {
                self.walk_type_hierarchy(base, element, deep)
            }
            TypeRef::Pointer(_) => self.refine_pointee(tref),
            TypeRef::Decl(id) => {
                let id = *id;
                if self.arena[id].is_class() {
                    self.walked.insert(name);
                    self.walk_class_fields_new(id, base);
                    true
                } else if self.arena[id].is_enum() {
                    if let Some(found) = self.resolve_in_target(&TypeRef::Decl(id)) {
                        *tref = TypeRef::for_decl(&self.arena, found);
                        return true;
                    }
                    if deep {
                        // survives as an inserted enum definition
                        true
                    } else {
                        *tref = self.int32_ref();
                        true
                    }
                } else {
                    deep
                }
            }
        }
    }

    /// Resolves the fields of an input class scheduled for insertion; its
    /// own dependencies land under the same target declaration.
    pub(crate) fn walk_class_fields_new(&mut self, ic: DeclId, base: DeclId) {
        let Some(fields) = self.arena[ic].as_class().map(|c| c.fields.clone()) else {
            return;
        };
        let mut rebuilt = Vec::with_capacity(fields.len());
        for mut field in fields {
            self.first_pass_refine(&mut field);
            if !self.try_update_field(base, &mut field) {
                field.status = Status::Unresolved;
            }
            rebuilt.push(field);
        }
        if let Some(class) = self.arena[ic].as_class_mut() {
            class.fields = rebuilt;
        }
    }

    /// First-pass simplifier: a nominal wrapper struct with exactly one
    /// numeric field collapses to that number. Types named with `FP` are
    /// left alone.
    pub(crate) fn first_pass_refine(&self, field: &mut Field) {
        let TypeRef::Decl(id) = &field.ty else {
            return;
        };
        let decl = &self.arena[*id];
        if decl.name.contains("FP") {
            return;
        }
        let Some(class) = decl.as_class() else {
            return;
        };
        if class.fields.len() != 1 {
            return;
        }
        match &class.fields[0].ty {
            TypeRef::Primitive(_) => field.ty = class.fields[0].ty.clone(),
            TypeRef::Typedef(tid) => {
                if let Some(td) = self.arena[*tid].as_typedef() {
                    if matches!(td.element, TypeRef::Primitive(_)) {
                        field.ty = td.element.clone();
                    }
                }
            }
            _ => {}
        }
    }

    /// Second-pass refiner for pointer element types. Reserved suffixes
    /// force their configured remap target (unless that target is an enum),
    /// mangled delegate names become `Action`, and everything else degrades
    /// to `Il2CppObject`. The outer pointer wrapper always survives.
    fn refine_pointee(&mut self, tref: &mut TypeRef) -> bool {
        fn base_slot(r: &mut TypeRef) -> &mut TypeRef {
            match r {
                TypeRef::Pointer(e) | TypeRef::Array(e, _) | TypeRef::Qualified(_, e) => {
                    base_slot(e)
                }
                other => other,
            }
        }

        let slot = base_slot(tref);
        if matches!(slot, TypeRef::Primitive(_) | TypeRef::Typedef(_)) {
            return true;
        }
        if self.config.is_known(&slot.name(&self.arena)) {
            return true;
        }
        if let Some(found) = self.resolve_in_target(slot) {
            *slot = TypeRef::for_decl(&self.arena, found);
            return true;
        }
        if let TypeRef::Decl(id) = slot {
            if self.arena[*id].is_enum() {
                *slot = self.int32_ref();
                return true;
            }
        }

        let elem_name = ref_local_name(&self.arena, slot).to_string();
        let suffix_target = self
            .config
            .known_reserved_suffixes
            .iter()
            .find(|(suffix, _)| elem_name.ends_with(suffix.as_str()))
            .map(|(_, target)| target.clone());
        if let Some(target_name) = suffix_target {
            let Some(prebuilt) = self.prebuilt.get(&target_name) else {
                warn!("No prebuilt {target_name} to remap {elem_name} to");
                return false;
            };
            if let Some(id) = prebuilt.base_decl() {
                if self.arena[id].is_enum() {
                    return true;
                }
            }
            *slot = prebuilt.clone();
            return true;
        }

        if is_generic_name(&self.config, &elem_name)
            && (elem_name.starts_with("Action_") || elem_name.starts_with("Func_"))
        {
            return self.remap_to_prebuilt(slot, "Action", &elem_name);
        }
        self.remap_to_prebuilt(slot, "Il2CppObject", &elem_name)
    }

    fn remap_to_prebuilt(&self, slot: &mut TypeRef, name: &str, from: &str) -> bool {
        match self.prebuilt.get(name) {
            Some(r) => {
                *slot = r.clone();
                true
            }
            None => {
                warn!("No prebuilt {name} to remap {from} to");
                false
            }
        }
    }
}
