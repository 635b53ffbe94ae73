/*!

  The embedded decompiler: the object → listing direction of the
  toolchain boundary, the counterpart of [`crate::asm`].

  Decompilation walks `text` from offset zero, decoding one instruction
  at a time. Register-class operands whose word index matches a known
  label render as that label's name and the label is attached to the
  line; every other operand renders as an uppercase `0x` immediate. A
  byte range that does not decode to a whole instruction (only possible
  by truncation — the encoding is total over headers) is an error, as is
  a jump target seen mid-walk: the walk itself stays strictly
  sequential, exactly like the original.

*/

use std::collections::BTreeMap;

use crate::bytecode::{decode_instruction, OperandClass};
use crate::listing::DecompiledLine;
use crate::object::{Label, Object};
use crate::{Error, Result};

/// The object → listing boundary, mirror of [`crate::asm::Assembler`].
pub trait Decompiler {
  fn decompile(&self, object: &Object) -> Result<Vec<DecompiledLine>>;
}

pub struct NativeDecompiler;

impl Decompiler for NativeDecompiler {
  fn decompile(&self, object: &Object) -> Result<Vec<DecompiledLine>> {
    let labels = object.all_labels();
    let code = &object.text().data;
    let mut lines = Vec::new();
    let mut pos = 0usize;

    while pos < code.len() {
      let (instruction, size) = decode_instruction(code, pos as u8)
        .ok_or(Error::TruncatedInstruction { pos: pos as u8 })?;

      let mut args = Vec::new();
      let mut line_labels: Vec<(String, Label)> = Vec::new();
      for operand in instruction.operands() {
        match operand.class {
          OperandClass::Register => {
            match find_word_label(&labels, operand.value) {
              Some((name, label)) => {
                args.push(name.clone());
                if !line_labels.iter().any(|(n, _)| n == name) {
                  line_labels.push((name.clone(), *label));
                }
              }
              None => args.push(format!("0x{:X}", operand.value)),
            }
          }
          _ => args.push(format!("0x{:X}", operand.value)),
        }
      }

      // Trailing bytes may have wrapped modulo 256 in a full image, so
      // fetch them the way the decoder did instead of slicing.
      let bytes = (0..size)
        .map(|offset| code[(pos as u8).wrapping_add(offset) as usize])
        .collect();

      lines.push(DecompiledLine {
        pos: pos as u8,
        code: bytes,
        command: instruction.mnemonic(),
        args,
        labels: line_labels,
      });
      pos += size as usize;
    }

    Ok(lines)
  }
}

/// The first label (in name order) whose word index matches `value`.
fn find_word_label(
  labels: &BTreeMap<String, Label>,
  value: u32,
) -> Option<(&String, &Label)> {
  labels
    .iter()
    .find(|(_, label)| (label.pos / 4) as u32 == value)
}
