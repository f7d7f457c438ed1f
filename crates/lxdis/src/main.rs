//! lxdis - a disassembler for Linear Executable (LE) binaries.
//!
//! Usage:
//!   lxdis <binary>                 Disassemble to stdout
//!   lxdis <binary> -m game.map     Name addresses from a linker map
//!   lxdis <binary> -o listing.asm  Write the listing to a file

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use lxdis_analysis::{Analyser, KnownFile, ListingWriter};
use lxdis_core::SymbolMap;
use lxdis_formats::{build_image, load_map_symbols, LinearExecutable};

#[derive(Parser)]
#[command(name = "lxdis")]
#[command(about = "A disassembler for Linear Executable (LE) binaries", long_about = None)]
struct Cli {
    /// Path to the LE binary
    binary: PathBuf,

    /// Linker map file(s) to take symbol names from
    #[arg(short, long = "map")]
    map: Vec<PathBuf>,

    /// Write the listing here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let data = fs::read(&cli.binary)
        .with_context(|| format!("Failed to read binary: {}", cli.binary.display()))?;
    let le = LinearExecutable::parse(&data).context("Failed to parse LE file")?;
    let image = build_image(&le).context("Failed to reconstruct the loaded image")?;

    let mut symbols = SymbolMap::new();
    for path in &cli.map {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read map file: {}", path.display()))?;
        let count = load_map_symbols(&text, &le, &mut symbols)
            .with_context(|| format!("Failed to parse map file: {}", path.display()))?;
        eprintln!("Loaded {} symbol(s) from {}.", count, path.display());
    }

    let known = KnownFile::check(&le);
    let mut analyser = Analyser::new(&le, &image);
    known
        .pre_apply(&mut analyser)
        .context("Failed to apply known-file overrides")?;
    analyser.run(&symbols).context("Disassembly failed")?;
    known.post_apply(&mut analyser);

    let writer = ListingWriter::new(&le, &image, analyser.regions(), analyser.labels());
    match &cli.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            let mut out = BufWriter::new(file);
            writer.write(&mut out).context("Failed to write listing")?;
            out.flush().context("Failed to write listing")?;
        }
        None => {
            let stdout = io::stdout();
            writer
                .write(&mut stdout.lock())
                .context("Failed to write listing")?;
        }
    }

    Ok(())
}
