/*!

  NanoVM is a didactic word machine with byte-granular code addressing: 128
  bytes of RAM viewed as 32 little-endian 32-bit words, up to 256 bytes of
  code, and an 8-bit program counter. Word 0 of RAM doubles as the
  accumulator/link register `lr`.

  The crate is layered bottom-up:

    * [`bytecode`] — the instruction set and its 1–3 byte binary encoding.
    * [`object`]   — compiled programs: five named sections carrying bytes
                     and label tables, plus the textual object-dump format.
    * [`vm`]       — the interpreter.
    * [`asm`] / [`disasm`] — the embedded assembler and decompiler, behind
                     the [`asm::Assembler`] and [`disasm::Decompiler`]
                     traits so an out-of-process toolchain could be slotted
                     in instead.
    * [`listing`]  — decompiled-line records and their rendering, shared by
                     the debugger and the inspector.
    * [`binding`]  — JSON overlays for initial RAM values.
    * [`debugger`] — the interactive shell.
    * [`harness`]  — the concurrent test runner.

*/

#[macro_use]
extern crate lazy_static;

pub mod asm;
pub mod binding;
pub mod bytecode;
pub mod debugger;
pub mod disasm;
pub mod harness;
pub mod listing;
pub mod object;
pub mod vm;

use std::fs;
use std::path::Path;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between a source file and a terminated
/// guest. The interpreter itself only ever produces [`Error::CodeOverrun`];
/// all other variants belong to the surrounding toolchain.
#[derive(Debug, Error)]
pub enum Error {
  #[error("cannot open file '{path}': {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  /// An assembler diagnostic, with the 1-based source line it refers to.
  #[error("line {line}: {message}")]
  Assembly { line: usize, message: String },

  /// A memory region of the assembler overflowed during layout.
  #[error("out of memory region {region} ({size} > {limit})")]
  RegionOverflow {
    region: &'static str,
    size: usize,
    limit: usize,
  },

  /// A malformed or rejected object-dump line.
  #[error("object dump line {line}: {message}")]
  DumpParse { line: usize, message: String },

  #[error("unknown section {0}")]
  UnknownSection(String),

  #[error("name {label} not found in section {section}")]
  UnknownLabel { section: String, label: String },

  /// A rejected binding-overlay document.
  #[error("{0}")]
  Binding(String),

  /// A malformed `<section>.<label>=<value>` override.
  #[error("can't set value to section, use <section>.<label>=<value>")]
  BadOverride,

  /// A malformed `-i` test specification.
  #[error("expected <source>:<binding>[:<section>.<label>=<value>]*")]
  BadTestSpec,

  #[error("parse pair '{0}' error")]
  BadPair(String),

  /// Instruction fetch ran past the end of `text`. The source leaves this
  /// undefined; here it is a hard error.
  #[error("code overrun at pc {pc:#04x}")]
  CodeOverrun { pc: u8 },

  /// A byte range in `text` that does not decode to a whole instruction.
  #[error("instruction truncated at {pos:#04x}")]
  TruncatedInstruction { pos: u8 },

  #[error(".text section is empty")]
  EmptyText,
}

/// Reads a whole file, attaching the path to the error the way every
/// command-line surface reports it.
pub fn load_file(path: impl AsRef<Path>) -> Result<String> {
  let path = path.as_ref();
  fs::read_to_string(path).map_err(|source| {
    Error::Io {
      path: path.display().to_string(),
      source,
    }
  })
}
