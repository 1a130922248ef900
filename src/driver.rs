//! The CLI driver (C13).
//!
//! Per-file orchestration: lex + parse (C11/C12, folding in relax/C7),
//! relocate (C8), serialise (C9), and write the `.debug_line` section (C10)
//! if any `.file` directive appeared. Mirrors the original tool's `main`:
//! one file at a time, first failure wins.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser as ClapParser;
use termcolor::{ColorChoice, StandardStream};

use crate::error::{AsError, AsResult};
use crate::parser::Parser;

#[derive(Debug, ClapParser)]
#[command(name = "was", disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// Print usage and exit.
    #[arg(short = 'h', long = "help")]
    help: bool,

    /// Print the version banner and exit.
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Output path (single input) or output directory (multiple inputs).
    #[arg(short = 'o', value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Assembly source files.
    #[arg(value_name = "INPUT")]
    inputs: Vec<PathBuf>,
}

/// Parsed from argv by [`run`]; `-h`/`-v` exit 1 rather than the
/// conventional 0, matching the original tool's observable behaviour.
fn print_help() {
    eprintln!("usage: was [-h] [-v] [-o OUTPUT] INPUT...");
}

fn print_version() {
    eprintln!("was (x86-64 AT&T assembler)");
}

/// Entry point called by `main`. Returns the process exit code.
pub fn run(args: impl IntoIterator<Item = String>) -> i32 {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(_) => {
            print_help();
            return 1;
        }
    };

    if cli.help {
        print_help();
        return 1;
    }
    if cli.version {
        print_version();
        return 1;
    }
    if cli.inputs.is_empty() {
        print_help();
        return 1;
    }

    let output = cli.output.unwrap_or_else(|| PathBuf::from("a.out"));
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);

    for input in &cli.inputs {
        let out_path = output_path_for(input, &output, cli.inputs.len());
        if let Err(e) = assemble_one(input, &out_path) {
            e.report(&mut stderr);
            return 1;
        }
        log::debug!("wrote {}", out_path.display());
    }

    0
}

/// Single input → `OUTPUT` verbatim. Multiple inputs → each input's
/// basename with a `.o` extension, placed alongside `OUTPUT`.
fn output_path_for(input: &Path, output: &Path, input_count: usize) -> PathBuf {
    if input_count == 1 {
        return output.to_path_buf();
    }
    let dir = output.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let stem = input.file_stem().unwrap_or_default();
    dir.join(stem).with_extension("o")
}

fn assemble_one(input: &Path, out_path: &Path) -> AsResult<()> {
    let source = fs::read(input).map_err(AsError::Io)?;
    let parser = Parser::new(input, source)?;
    let parsed = parser.run()?;

    let mut sections = parsed.sections;
    let mut symtab = parsed.symtab;

    if let Some(debug_line) = parsed.debug_line {
        let id = sections.add(crate::section::Section::new(".debug_line", crate::section::SectionType::ProgBits, 0, 1));
        sections.get_mut(id).chunks.push(crate::chunk::PositionedChunk::new(crate::chunk::Chunk::Data {
            bytes: debug_line,
            reloc: None,
        }));
    }

    let bytes = crate::elf::write_object(&sections, &mut symtab);
    let mut file = fs::File::create(out_path).map_err(AsError::Io)?;
    file.write_all(&bytes).map_err(AsError::Io)?;
    Ok(())
}
