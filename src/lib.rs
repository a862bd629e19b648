use std::{
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::{
    binary::{Error, ModuleReader},
    emscripten::{fs::read_module, DylinkSection, EmscriptenMetadata},
};

pub mod binary;
pub mod emscripten;

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct CmdConfig {
    #[command(subcommand)]
    pub command: Command,
    #[arg(long, global = true)]
    pub disable_ansi_color: bool,
    #[arg(long, global = true, default_value = "warn", help = "trace, debug, info, warn or error")]
    pub log_level: tracing::Level,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Insert an emscripten_metadata section right after the module header
    AddMetadata {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, help = "initial linear memory size in bytes")]
        initial_memory: u64,
        #[arg(long, default_value_t = 1024)]
        global_base: u32,
        #[arg(long)]
        standalone_wasm: bool,
    },
    /// Append needed libraries to the dylink section of a shared library
    UpdateDylink {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long = "needed", value_name = "LIB", required = true)]
        needed: Vec<String>,
    },
    /// Print sections, imports, exports and emscripten sections of a module
    Dump {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

pub fn get_args() -> Result<CmdConfig> {
    Ok(CmdConfig::parse())
}

/// Writes a human readable summary of the module at `path` to `out`.
pub fn dump(path: &Path, out: &mut impl Write) -> Result<()> {
    let wasm = read_module(path)?;
    let module = ModuleReader::new(&wasm)?;

    writeln!(out, "{}: {} bytes", path.display(), wasm.len())?;
    for section in module.sections() {
        let section = section?;
        writeln!(out, "  {:?} offset={} size={}", section.kind, section.offset, section.size)?;
    }

    let duplicates = module.duplicate_sections()?;
    if !duplicates.is_empty() {
        writeln!(out, "duplicate sections (first one is used): {duplicates:?}")?;
    }

    match DylinkSection::parse(&module) {
        Ok(dylink) => writeln!(
            out,
            "dylink: mem_size={} mem_align={} table_size={} table_align={} needed={:?}",
            dylink.mem_size, dylink.mem_align, dylink.table_size, dylink.table_align, dylink.needed
        )?,
        // not a shared library
        Err(Error::MissingDylinkSection | Error::UnexpectedCustomSection { .. }) => {}
        Err(err) => return Err(err).context("malformed dylink section"),
    }
    if let Some(metadata) = EmscriptenMetadata::parse(&module)? {
        writeln!(out, "emscripten_metadata: {metadata:?}")?;
    }

    for import in module.imports()? {
        writeln!(out, "import {}.{} {:?}", import.module, import.field, import.desc)?;
    }
    for export in module.exports()? {
        writeln!(out, "export {} {:?} {}", export.name, export.kind, export.index)?;
    }

    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::{CmdConfig, Command};
    use anyhow::Result;
    use clap::Parser;

    #[test]
    fn parse_update_dylink() -> Result<()> {
        let config = CmdConfig::try_parse_from([
            "wasm-dylink-tools",
            "update-dylink",
            "lib.wasm",
            "--needed",
            "libA",
            "--needed",
            "libB",
        ])?;

        match config.command {
            Command::UpdateDylink { file, needed } => {
                assert_eq!("lib.wasm", file.to_string_lossy());
                assert_eq!(vec!["libA".to_string(), "libB".to_string()], needed);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(tracing::Level::WARN, config.log_level);
        Ok(())
    }

    #[test]
    fn parse_add_metadata() -> Result<()> {
        let config = CmdConfig::try_parse_from([
            "wasm-dylink-tools", "add-metadata", "main.wasm", "--initial-memory", "16777216",
            "--standalone-wasm", "--log-level", "debug",
        ])?;

        match config.command {
            Command::AddMetadata { initial_memory, global_base, standalone_wasm, .. } => {
                assert_eq!(16777216, initial_memory);
                assert_eq!(1024, global_base);
                assert!(standalone_wasm);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(tracing::Level::DEBUG, config.log_level);
        Ok(())
    }

    #[test]
    fn initial_memory_accepts_4gib() -> Result<()> {
        let config = CmdConfig::try_parse_from([
            "wasm-dylink-tools", "add-metadata", "main.wasm", "--initial-memory", "4294967296",
        ])?;

        match config.command {
            Command::AddMetadata { initial_memory, .. } => assert_eq!(4294967296, initial_memory),
            other => panic!("unexpected command {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn update_dylink_requires_a_library() {
        let parsed = CmdConfig::try_parse_from(["wasm-dylink-tools", "update-dylink", "lib.wasm"]);
        assert!(parsed.is_err());
    }
}
