use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Remapping rules loaded from `remapping_config.json` next to the
/// executable. Loaded once and threaded through the engine; never mutated
/// after startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemapConfig {
    /// Type names that are always considered known: never re-resolved, and
    /// emitted from the target compilation's globals when present there.
    #[serde(rename = "KnownNames")]
    pub known_names: Vec<String>,

    /// Entry of `KnownNames` closing the built-in prefix; everything up to
    /// and including it is emitted globally, before the `app` namespace.
    #[serde(rename = "LastBuiltInTypeName")]
    pub last_built_in_type_name: String,

    /// Suffix (e.g. `__Array`) to remap-target type name (e.g. `Il2CppArray`).
    #[serde(rename = "KnownReservedSuffixes")]
    pub known_reserved_suffixes: BTreeMap<String, String>,

    /// Fully-qualified source name to replacement name, applied symmetrically
    /// during name comparison.
    #[serde(rename = "RemappedTypes")]
    pub remapped_types: BTreeMap<String, String>,
}

impl RemapConfig {
    pub const FILE_NAME: &'static str = "remapping_config.json";

    /// Reads the config at `path`, writing a default one first if the file
    /// does not exist. An unreadable or malformed file is a hard error.
    pub fn load_or_create(path: &Path) -> Result<RemapConfig> {
        if !path.exists() {
            let default = RemapConfig::default();
            fs::write(path, serde_json::to_string_pretty(&default)?)
                .with_context(|| format!("unable to write default config {}", path.display()))?;
            info!("Wrote default config to {}", path.display());
            return Ok(default);
        }

        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("malformed config {}", path.display()))
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.known_names.iter().any(|n| n == name)
    }

    /// The `KnownNames` prefix up to and including `LastBuiltInTypeName`.
    /// Empty when the marker name is unset or absent.
    pub fn built_in_names(&self) -> &[String] {
        if self.last_built_in_type_name.is_empty() {
            return &[];
        }
        match self
            .known_names
            .iter()
            .position(|n| *n == self.last_built_in_type_name)
        {
            Some(i) => &self.known_names[..=i],
            None => &[],
        }
    }
}
