/*!

  The decompiled-line record and its human rendering.

  One [`DecompiledLine`] describes one instruction of `text`: its byte
  offset, raw bytes, mnemonic, the operand texts in assembly order, and
  the labels referenced by those operands. The record is produced by the
  decompiler and consumed by the debugger and the object inspector, which
  share a single renderer so their listings look identical.

  The rendered shape is

  ```text
  POS: BYTES     -> MNEMONIC arg[VALUES], arg | lr[VALUES]
  ```

  with the `->` marker and the bracketed annotations only on the current
  line. When both a RAM snapshot and its predecessor are supplied, a
  changed word renders as `[0xBEFORE->0xAFTER]`, otherwise `[0xVALUE]`.
  The `| lr[..]` suffix is appended for the mnemonics whose semantics
  touch the accumulator.

*/

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use crate::bytecode::Mnemonic;
use crate::object::Label;
use crate::vm::Ram;

lazy_static! {
  /// The mnemonics whose execution reads or writes `lr`.
  static ref LR_MNEMONICS: HashSet<Mnemonic> = {
    let mut set = HashSet::new();
    set.insert(Mnemonic::LoadOp);
    set.insert(Mnemonic::StoreOp);
    set.insert(Mnemonic::LoadLow);
    set.insert(Mnemonic::LoadHigh);
    set.insert(Mnemonic::Jz);
    set.insert(Mnemonic::Jl);
    set.insert(Mnemonic::Load3);
    set
  };
}

/// One instruction of `text` as the decompiler renders it.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct DecompiledLine {
  /// Byte offset of the instruction inside `text`.
  pub pos: u8,
  /// The raw instruction bytes, 1–3 of them.
  pub code: Vec<u8>,
  pub command: Mnemonic,
  /// Operand texts in assembly order: label names or `0xHEX` immediates.
  pub args: Vec<String>,
  /// The labels named by `args`, with their ranges.
  pub labels: Vec<(String, Label)>,
}

fn write_word(out: &mut String, ram: &Ram, prev: Option<&Ram>, index: u8) {
  if let Some(previous) = prev {
    if previous.word(index) != ram.word(index) {
      let _ = write!(out, "0x{:08X}->", previous.word(index));
    }
  }
  let _ = write!(out, "0x{:08X}", ram.word(index));
}

/**
  Renders one line. `is_current` selects the `->` marker and, when `ram`
  is supplied, the value annotations; `prev_ram` additionally turns a
  changed word into a `before->after` pair. `labels` is the merged label
  table used to resolve operand names to word indices.
*/
pub fn format_line(
  line: &DecompiledLine,
  ram: Option<&Ram>,
  prev_ram: Option<&Ram>,
  labels: &BTreeMap<String, Label>,
  is_current: bool,
) -> String {
  let mut out = String::new();
  let _ = write!(out, "{:02x}: ", line.pos);
  for byte in &line.code {
    let _ = write!(out, "{:02x}", byte);
  }
  for _ in 0..8usize.saturating_sub(line.code.len() * 2) {
    out.push(' ');
  }

  match is_current {
    true  => { let _ = write!(out, " -> {} ", line.command); }
    false => { let _ = write!(out, "    {} ", line.command); }
  }

  for (i, arg) in line.args.iter().enumerate() {
    out.push_str(arg);
    if is_current {
      if let (Some(ram), Some(label)) = (ram, labels.get(arg)) {
        out.push('[');
        write_word(&mut out, ram, prev_ram, label.pos / 4);
        out.push(']');
      }
    }
    if i + 1 < line.args.len() {
      out.push_str(", ");
    }
  }

  if is_current {
    if let Some(ram) = ram {
      if LR_MNEMONICS.contains(&line.command) {
        out.push_str(" | lr[");
        write_word(&mut out, ram, prev_ram, 0);
        out.push(']');
      }
    }
  }

  out
}
