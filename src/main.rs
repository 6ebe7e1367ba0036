use std::fs;
use std::path::PathBuf;
use std::time;

use clap::Parser;
use color_eyre::eyre::{bail, Context};
use log::info;

use crate::config::RemapConfig;
use crate::generate::engine::MergeEngine;

mod config;
mod data;
mod generate;

/// Merges an idaclang-exported IL2CPP header into a canonically named one:
/// the target keeps its names, ordering and `app` namespace, the input
/// contributes the full struct/enum layouts.
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// The symbol-derived header with full struct/enum fidelity
    #[clap(value_parser, value_name = "INPUT_HEADER")]
    input: Option<PathBuf>,

    /// The canonically named header whose field types should be upgraded
    #[clap(value_parser, value_name = "TARGET_HEADER")]
    target: Option<PathBuf>,

    /// Directory holding the il2cpp sysroot headers
    #[clap(value_parser, value_name = "SYSROOT_INCLUDE_DIR")]
    sysroot: Option<PathBuf>,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let (Some(input), Some(target), Some(sysroot)) = (cli.input, cli.target, cli.sysroot) else {
        println!("usage: il2merge <input-header> <target-header> <sysroot-include-dir>");
        return Ok(());
    };

    let config_path = std::env::current_exe()?.with_file_name(RemapConfig::FILE_NAME);
    let config = RemapConfig::load_or_create(&config_path)?;

    let mut engine = MergeEngine::new(config);

    let t = time::Instant::now();
    if !engine.build_type_model(&input, &target, &sysroot)? {
        bail!("type model construction failed");
    }
    info!("Built type model in {}ms", t.elapsed().as_millis());

    let t = time::Instant::now();
    engine.resolve_types();
    engine.plan_insertions();
    info!("Resolved in {}ms", t.elapsed().as_millis());

    let merged = engine.emit_header();
    let stem = target
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("target");
    let out_path = target.with_file_name(format!("{stem}_merged.h"));
    fs::write(&out_path, merged)
        .with_context(|| format!("unable to write {}", out_path.display()))?;
    info!("Wrote {}", out_path.display());

    Ok(())
}
