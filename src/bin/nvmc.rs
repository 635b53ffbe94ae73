/*!

  The compiler / inspector front end.

  `-i <source>` assembles a source file and prints its textual object
  dump; `-b <binary>` parses an object dump and prints its
  decompilation, one rendered line per instruction. Exactly one of the
  two must be given.

*/

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use nanovm::asm::{Assembler, NativeAssembler};
use nanovm::disasm::{Decompiler, NativeDecompiler};
use nanovm::listing::format_line;
use nanovm::load_file;
use nanovm::object::dump::parse_object;

#[derive(Parser)]
#[command(name = "nvmc", about = "NanoVM compiler and object inspector")]
struct Args {
  /// Assemble a source file and print its object dump
  #[arg(short = 'i', value_name = "source", conflicts_with = "binary")]
  source: Option<PathBuf>,

  /// Parse an object dump and print its decompilation
  #[arg(short = 'b', value_name = "binary")]
  binary: Option<PathBuf>,
}

fn run(args: &Args) -> Result<()> {
  if let Some(path) = &args.source {
    let source = load_file(path)?;
    let object = NativeAssembler.assemble(&source)?;
    println!("{}", object.dump());
  } else if let Some(path) = &args.binary {
    let binary = load_file(path)?;
    let object = parse_object(&binary)?;
    let decompiled = NativeDecompiler.decompile(&object)?;
    let labels = BTreeMap::new();
    for line in &decompiled {
      println!("{}", format_line(line, None, None, &labels, false));
    }
  } else {
    anyhow::bail!("must be specified -i <source> or -b <binary>");
  }
  Ok(())
}

fn main() -> ExitCode {
  let args = Args::parse();
  match run(&args) {
    Ok(())     => ExitCode::SUCCESS,
    Err(error) => {
      eprintln!("Error: {}", error);
      ExitCode::FAILURE
    }
  }
}
