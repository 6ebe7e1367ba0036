use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result};
use log::{error, info, trace, warn};

use crate::config::RemapConfig;
use crate::data::ast::{DeclArena, DeclId, PrimitiveKind, Status, TypeRef};
use crate::data::frontend::{self, ParseOptions, ParsedHeader};
use crate::data::name_match::{decl_matches_name, ref_local_name};
use crate::generate::registry::{load_prebuilt_types, Registry};

/// Owns the whole reconciliation: the arena with both compilations, the
/// three declaration lists, the prebuilt-type cache and the per-target
/// insertion lists. Single-threaded; one caller drives it through
/// `build_type_model` -> `resolve_types` -> `plan_insertions` -> `emit_header`.
pub struct MergeEngine {
    pub(crate) arena: DeclArena,
    pub(crate) config: RemapConfig,
    pub(crate) input: Registry,
    /// Enums and classes of the target's `app` namespace, in source order.
    pub(crate) target: Registry,
    /// File-scope declarations of the target compilation.
    pub(crate) target_globals: Registry,
    pub(crate) prebuilt: HashMap<String, TypeRef>,
    /// Types that must be emitted before the keyed target declaration.
    pub(crate) insertions: HashMap<DeclId, Vec<TypeRef>>,
    /// Recursion guard: classes being rewritten or already rewritten.
    pub(crate) walked: HashSet<String>,
    pub(crate) target_file: PathBuf,
    pub(crate) built: bool,
}

impl MergeEngine {
    pub fn new(config: RemapConfig) -> MergeEngine {
        MergeEngine {
            arena: DeclArena::new(),
            config,
            input: Registry::default(),
            target: Registry::default(),
            target_globals: Registry::default(),
            prebuilt: HashMap::new(),
            insertions: HashMap::new(),
            walked: HashSet::new(),
            target_file: PathBuf::new(),
            built: false,
        }
    }

    /// Parses both headers and assembles the registries. Returns `false`
    /// (engine unusable) on parse errors, a missing `app` namespace, or a
    /// second invocation.
    pub fn build_type_model(
        &mut self,
        input_path: &Path,
        target_path: &Path,
        sysroot: &Path,
    ) -> Result<bool> {
        if self.built {
            warn!("Type model already built");
            return Ok(false);
        }

        let options = ParseOptions {
            include_dir: target_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf(),
            sysroot: sysroot.to_path_buf(),
        };
        let (input, target) =
            frontend::parse_headers(&mut self.arena, input_path, target_path, &options)?;

        for header in [&input, &target] {
            if !header.ok() {
                error!(
                    "{} error(s) parsing {}",
                    header.errors.len(),
                    header.file.display()
                );
                for e in &header.errors {
                    error!("  {e}");
                }
                return Ok(false);
            }
        }

        let target_text = match &target.patched {
            Some(text) => text.clone(),
            None => fs::read_to_string(target_path)
                .with_context(|| format!("unable to read {}", target_path.display()))?,
        };
        self.attach_macro_markers(&target_text, &target);

        let Some(app) = target.namespaces.iter().find(|n| n.name == "app") else {
            error!(
                "target header {} has no app namespace",
                target_path.display()
            );
            return Ok(false);
        };

        self.target = Registry::new(app.enums.iter().chain(&app.classes).copied().collect());
        self.target_globals = Registry::new(
            target
                .typedefs
                .iter()
                .chain(&target.enums)
                .chain(&target.classes)
                .copied()
                .collect(),
        );
        self.input = Registry::new(
            input
                .typedefs
                .iter()
                .chain(&input.enums)
                .chain(&input.classes)
                .copied()
                .collect(),
        );

        self.input.sort_by_source_span(&self.arena, true)?;
        self.target.sort_by_source_span(&self.arena, false)?;

        self.prebuilt = load_prebuilt_types(&self.arena, &self.config, &self.input);

        // forward declarations carry no layout to reconcile
        let arena = &self.arena;
        self.target.decls.retain(|&id| arena[id].size() > 0);

        self.target_file = target.file.clone();
        self.built = true;

        info!(
            "Model built: {} input, {} target, {} global declarations",
            self.input.len(),
            self.target.len(),
            self.target_globals.len()
        );
        Ok(true)
    }

    /// Correlates raw-text macro hits with declaration spans. Every
    /// declaration starting at a hit offset takes the marker; the list macro
    /// expands to two structs sharing one offset and both take it.
    fn attach_macro_markers(&mut self, text: &str, target: &ParsedHeader) {
        let markers = frontend::scan_macro_markers(text);
        if markers.is_empty() {
            return;
        }

        let mut all: Vec<DeclId> = target
            .typedefs
            .iter()
            .chain(&target.enums)
            .chain(&target.classes)
            .copied()
            .collect();
        for ns in &target.namespaces {
            all.extend(ns.typedefs.iter().chain(&ns.enums).chain(&ns.classes));
        }

        let mut hits = 0usize;
        for (offset, status) in markers {
            for &id in &all {
                let decl = &mut self.arena[id];
                if decl.span.file == target.file && decl.span.start == offset {
                    decl.status = status;
                    hits += 1;
                }
            }
        }
        info!("Attached {hits} macro markers");
    }

    /// Rewrites every target declaration against its input counterpart,
    /// last-to-first in source order. Failures are localized: the
    /// declaration is marked `Unresolved` and skipped at emission.
    pub fn resolve_types(&mut self) {
        let order: Vec<DeclId> = self.target.decls.iter().rev().copied().collect();
        let total = order.len();
        info!("Resolving {total} target declarations");

        for (i, id) in order.into_iter().enumerate() {
            trace!(
                "Resolving {:.4}% ({i}/{total})",
                i as f64 / total as f64 * 100.0
            );
            if self.arena[id].status != Status::Ok {
                // macro-expanded declarations are re-emitted through their macro
                continue;
            }
            if self.arena[id].is_class() {
                if !self.walk_class(id) {
                    warn!("No input counterpart for {}", self.arena[id].name);
                    self.arena[id].status = Status::Unresolved;
                }
            } else if self.arena[id].is_enum() {
                if !self.walk_enum(id) {
                    warn!("No input counterpart for enum {}", self.arena[id].name);
                    self.arena[id].status = Status::Unresolved;
                }
            }
        }
    }

    /// Replaces the target enum's items with the input's; the input carries
    /// the full item list while the target is often degraded to a bare tag.
    fn walk_enum(&mut self, te: DeclId) -> bool {
        let query = self.arena[te].local_name().to_string();
        let Some(ie) = self.input.decls.iter().rev().copied().find(|&id| {
            self.arena[id].is_enum() && decl_matches_name(&self.config, &self.arena[id], &query)
        }) else {
            return false;
        };
        let Some(input_enum) = self.arena[ie].as_enum().cloned() else {
            return false;
        };
        let e = self.arena[te]
            .as_enum_mut()
            .expect("target list enum dispatch");
        e.items = input_enum.items;
        e.size = input_enum.size;
        true
    }

    /// Looks the reference up among the target's declarations, file-scope
    /// globals first, then the `app` namespace list.
    pub(crate) fn resolve_in_target(&self, tref: &TypeRef) -> Option<DeclId> {
        let name = ref_local_name(&self.arena, tref).to_string();
        self.target_globals
            .find_by_name(&self.arena, &self.config, &name)
            .or_else(|| self.target.find_by_name(&self.arena, &self.config, &name))
    }

    pub(crate) fn is_known_ref(&self, tref: &TypeRef) -> bool {
        self.config.is_known(&tref.name(&self.arena))
    }

    /// The prebuilt `int32_t`, falling back to the raw primitive when the
    /// input header never declared the typedef.
    pub(crate) fn int32_ref(&self) -> TypeRef {
        self.prebuilt
            .get("int32_t")
            .cloned()
            .unwrap_or(TypeRef::Primitive(PrimitiveKind::Int))
    }
}
