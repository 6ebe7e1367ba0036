//! Insertion planning. Resolution records, per target declaration, the input
//! types that must be emitted ahead of it; this pass makes each of them the
//! property of exactly one (earliest) dependent.

use crate::data::name_match::{ref_local_name, same_type_name};
use crate::generate::engine::MergeEngine;

impl MergeEngine {
    /// One forward pass over the target list. A type already claimed by an
    /// earlier declaration is dropped from every later insertion list;
    /// identity is decided by the name matcher.
    pub fn plan_insertions(&mut self) {
        let mut inserted: Vec<String> = Vec::new();
        let arena = &self.arena;
        let config = &self.config;

        for &id in &self.target.decls {
            let Some(list) = self.insertions.get_mut(&id) else {
                continue;
            };
            list.retain(|r| {
                let name = ref_local_name(arena, r).to_string();
                if inserted.iter().any(|seen| same_type_name(config, seen, &name)) {
                    return false;
                }
                inserted.push(name);
                true
            });
        }

        self.insertions.retain(|_, list| !list.is_empty());
    }
}
