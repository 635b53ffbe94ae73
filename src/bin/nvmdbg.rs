/*!

  The interactive debugger front end: assembles `-i <source>`, overlays
  the optional `-I <binding>` document onto the initial RAM image, and
  drops into the `(debug) ` shell. Ctrl-C interrupts a running
  `continue`; a second Ctrl-C before the engine notices aborts.

*/

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use nanovm::asm::{Assembler, NativeAssembler};
use nanovm::binding::apply_binding;
use nanovm::debugger::{install_interrupt_handler, Debugger};
use nanovm::load_file;
use nanovm::object::Object;

#[derive(Parser)]
#[command(name = "nvmdbg", about = "NanoVM interactive debugger")]
struct Args {
  /// Source file to assemble and debug
  #[arg(short = 'i', value_name = "source")]
  source: PathBuf,

  /// Binding document overlaying initial RAM values
  #[arg(short = 'I', value_name = "binding")]
  binding: Option<PathBuf>,
}

fn load(args: &Args) -> Result<Object> {
  let source = load_file(&args.source)?;
  let mut object = NativeAssembler.assemble(&source)?;

  if let Some(path) = &args.binding {
    let content = load_file(path)?;
    apply_binding(&mut object, &content)?;
  }

  Ok(object)
}

fn main() -> ExitCode {
  let args = Args::parse();

  let object = match load(&args) {
    Ok(object) => object,
    Err(error) => {
      eprintln!("Error while process args: {}", error);
      return ExitCode::FAILURE;
    }
  };

  install_interrupt_handler();

  let mut debugger = Debugger::new(object);
  match debugger.run() {
    Ok(())     => ExitCode::SUCCESS,
    Err(error) => {
      eprintln!("Error: {}", error);
      ExitCode::FAILURE
    }
  }
}
