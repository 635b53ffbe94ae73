/*!

  Representation of VM instructions abstractly: opcode families, assembly
  mnemonics, and the decoded [`Instruction`] variant type.

  One design decision that needed to be made is whether the interpreter
  should re-extract bit fields at each step or work from a decoded variant.
  Decoding to a variant first costs a few bytes per instruction but lets
  both the interpreter and the decompiler match exhaustively, so an
  unassigned sub-encoding is caught at the decode boundary rather than
  somewhere in the middle of a dispatch chain.

*/

use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};

/**
  The eight opcode families, selected by the top three bits of an
  instruction's first byte. The numeric values are significant: they index
  [`OPCODE_SIZES`] and appear shifted into the header byte.
*/
#[derive(
  StrumDisplay, IntoStaticStr, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,               PartialEq,     Debug, Hash
)]
#[repr(u8)]
pub enum Opcode {
  LoadOp  = 0, // LR ← W[m]
  StoreOp = 1, // W[m] ← LR
  Jump    = 2, // JL / JZ
  Load1   = 3, // LOAD_LOW / LOAD_HIGH
  AddSub  = 4,
  AndOr   = 5,
  Shift   = 6,
  Extra   = 7, // CALL / LOAD3 / PC_SWP / HALT
}

/// Base instruction size in bytes, indexed by opcode family. `LOAD_HIGH`,
/// `CALL`, and `PC_SWP` each carry one byte more than their family's base.
pub const OPCODE_SIZES: [u8; 8] = [1, 1, 2, 2, 2, 2, 2, 1];

/**
  Assembly-level operation names. These are what the assembler parses and
  the decompiler prints; several mnemonics share one opcode family,
  distinguished by a flag bit in the header.
*/
#[derive(
  StrumDisplay, EnumString, IntoStaticStr,
  Clone,        Copy,       Eq,            PartialEq, Debug, Hash
)]
pub enum Mnemonic {
  #[strum(serialize = "LOAD_OP")]
  LoadOp,
  #[strum(serialize = "STORE_OP")]
  StoreOp,
  #[strum(serialize = "JL")]
  Jl,
  #[strum(serialize = "JZ")]
  Jz,
  #[strum(serialize = "LOAD_LOW")]
  LoadLow,
  #[strum(serialize = "LOAD_HIGH")]
  LoadHigh,
  #[strum(serialize = "ADD")]
  Add,
  #[strum(serialize = "SUB")]
  Sub,
  #[strum(serialize = "AND")]
  And,
  #[strum(serialize = "OR")]
  Or,
  // The early revision spelled the shifts LS/RS; both spellings assemble.
  #[strum(serialize = "LS", serialize = "LSL")]
  Lsl,
  #[strum(serialize = "RS", serialize = "LSR")]
  Lsr,
  #[strum(serialize = "CALL")]
  Call,
  #[strum(serialize = "PC_SWP")]
  PcSwp,
  #[strum(serialize = "LOAD3")]
  Load3,
  #[strum(serialize = "HALT")]
  Halt,
}

/**
  How an operand value is to be interpreted by the assembler and the
  decompiler. `Register` operands index RAM words and so resolve labels
  through `position / 4`; `Code` operands are byte addresses into `text`;
  `Const` operands are plain immediates.
*/
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum OperandClass {
  Register,
  Code,
  Const,
}

/// A decoded operand value paired with its class.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Operand {
  pub value: u32,
  pub class: OperandClass,
}

impl Operand {
  fn register(value: u8) -> Operand {
    Operand { value: value as u32, class: OperandClass::Register }
  }

  fn code(value: u32) -> Operand {
    Operand { value, class: OperandClass::Code }
  }

  fn constant(value: u32) -> Operand {
    Operand { value, class: OperandClass::Const }
  }
}

/**
  Holds the decoded components of an instruction, one variant per
  operation. Field widths are guaranteed by construction: `mem` fields are
  5 bits, register fields 4 bits (5 for `PC_SWP`), immediates as noted.
*/
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Instruction {
  /// `LR ← W[mem]`
  LoadOp { mem: u8 },
  /// `W[mem] ← LR`
  StoreOp { mem: u8 },
  /// If `less`, branch when `LR < W[rarg]` (unsigned); otherwise branch
  /// when `LR == W[rarg]`. The target is an absolute byte address.
  Jump { less: bool, rarg: u8, addr: u8 },
  /// `LR ← (LR & 0xFFFF_F000) | value`, `value` being 12 bits.
  LoadLow { value: u16 },
  /// `LR ← (LR & 0xFFF) | (value << 12)`, `value` being 20 bits.
  LoadHigh { value: u32 },
  /// `W[result] ← W[a] ± W[b]`, wrapping.
  AddSub { sub: bool, result: u8, a: u8, b: u8 },
  /// `W[result] ← W[a] & W[b]` or `W[a] | W[b]`.
  AndOr { or: bool, result: u8, a: u8, b: u8 },
  /// `W[result] ← W[mem] << count` or `>> count`; `count` ∈ [0, 15].
  Shift { right: bool, result: u8, mem: u8, count: u8 },
  /// `W[result] ← proc(W[callback], W[arg])`, `0` without a callback.
  Call { callback: u8, result: u8, arg: u8 },
  /// `next ← W[mem]; W[save] ← pc_after; PC ← next`. The operand read
  /// happens strictly before the write so `PC_SWP r, r` returns through
  /// `r` while overwriting it.
  PcSwp { mem: u8, save: u8 },
  /// `LR ← value`, `value` being 3 bits.
  Load3 { value: u8 },
  Halt,
}

impl Instruction {
  pub fn opcode(&self) -> Opcode {
    match self {
      Instruction::LoadOp { .. }   => Opcode::LoadOp,
      Instruction::StoreOp { .. }  => Opcode::StoreOp,
      Instruction::Jump { .. }     => Opcode::Jump,
      Instruction::LoadLow { .. }
      | Instruction::LoadHigh { .. } => Opcode::Load1,
      Instruction::AddSub { .. }   => Opcode::AddSub,
      Instruction::AndOr { .. }    => Opcode::AndOr,
      Instruction::Shift { .. }    => Opcode::Shift,
      Instruction::Call { .. }
      | Instruction::PcSwp { .. }
      | Instruction::Load3 { .. }
      | Instruction::Halt          => Opcode::Extra,
    }
  }

  pub fn mnemonic(&self) -> Mnemonic {
    match self {
      Instruction::LoadOp { .. }              => Mnemonic::LoadOp,
      Instruction::StoreOp { .. }             => Mnemonic::StoreOp,
      Instruction::Jump { less: true, .. }    => Mnemonic::Jl,
      Instruction::Jump { less: false, .. }   => Mnemonic::Jz,
      Instruction::LoadLow { .. }             => Mnemonic::LoadLow,
      Instruction::LoadHigh { .. }            => Mnemonic::LoadHigh,
      Instruction::AddSub { sub: false, .. }  => Mnemonic::Add,
      Instruction::AddSub { sub: true, .. }   => Mnemonic::Sub,
      Instruction::AndOr { or: false, .. }    => Mnemonic::And,
      Instruction::AndOr { or: true, .. }     => Mnemonic::Or,
      Instruction::Shift { right: false, .. } => Mnemonic::Lsl,
      Instruction::Shift { right: true, .. }  => Mnemonic::Lsr,
      Instruction::Call { .. }                => Mnemonic::Call,
      Instruction::PcSwp { .. }               => Mnemonic::PcSwp,
      Instruction::Load3 { .. }               => Mnemonic::Load3,
      Instruction::Halt                       => Mnemonic::Halt,
    }
  }

  /// Size of the encoded instruction in bytes.
  pub fn size(&self) -> u8 {
    match self {
      Instruction::LoadHigh { .. } => 3,
      Instruction::Call { .. }
      | Instruction::PcSwp { .. }  => 2,
      Instruction::Load3 { .. }
      | Instruction::Halt          => 1,
      other                        => OPCODE_SIZES[u8::from(other.opcode()) as usize],
    }
  }

  /// The operand values in assembly order, paired with their classes.
  /// This is the order the assembler accepts and the decompiler prints.
  pub fn operands(&self) -> Vec<Operand> {
    match *self {
      Instruction::LoadOp { mem }
      | Instruction::StoreOp { mem } => vec![Operand::register(mem)],

      Instruction::Jump { rarg, addr, .. } => {
        vec![Operand::register(rarg), Operand::code(addr as u32)]
      }

      Instruction::LoadLow { value } => vec![Operand::code(value as u32)],

      Instruction::LoadHigh { value } => vec![Operand::constant(value)],

      Instruction::AddSub { result, a, b, .. }
      | Instruction::AndOr { result, a, b, .. } => {
        vec![Operand::register(result), Operand::register(a), Operand::register(b)]
      }

      Instruction::Shift { result, mem, count, .. } => {
        vec![
          Operand::register(result),
          Operand::register(mem),
          Operand::constant(count as u32),
        ]
      }

      Instruction::Call { callback, result, arg } => {
        vec![
          Operand::register(callback),
          Operand::register(result),
          Operand::register(arg),
        ]
      }

      Instruction::PcSwp { mem, save } => {
        vec![Operand::register(mem), Operand::register(save)]
      }

      Instruction::Load3 { value } => vec![Operand::constant(value as u32)],

      Instruction::Halt => vec![],
    }
  }

  /**
    Builds an instruction from a mnemonic and operand values in assembly
    order, checking each value against its field width. This is the
    assembler's entry point into the instruction model; the error is the
    diagnostic text without source position.
  */
  pub fn from_mnemonic(
    mnemonic: Mnemonic,
    args: &[u32],
  ) -> std::result::Result<Instruction, String> {
    let expect = |n: usize| {
      if args.len() == n {
        Ok(())
      } else {
        Err(format!("{} takes {} arguments, got {}", mnemonic, n, args.len()))
      }
    };
    let field = |name: &str, value: u32, bits: u32| {
      let mask = (1u32 << bits) - 1;
      if value > mask {
        Err(format!(
          "argument {} value 0x{:02X} overflows 0x{:02X}",
          name, value, mask
        ))
      } else {
        Ok(value as u8)
      }
    };

    let instruction = match mnemonic {
      Mnemonic::LoadOp => {
        expect(1)?;
        Instruction::LoadOp { mem: field("mem", args[0], 5)? }
      }
      Mnemonic::StoreOp => {
        expect(1)?;
        Instruction::StoreOp { mem: field("mem", args[0], 5)? }
      }
      Mnemonic::Jl | Mnemonic::Jz => {
        expect(2)?;
        Instruction::Jump {
          less: mnemonic == Mnemonic::Jl,
          rarg: field("rarg", args[0], 4)?,
          addr: field("addr", args[1], 8)?,
        }
      }
      Mnemonic::LoadLow => {
        expect(1)?;
        if args[0] > 0xFFF {
          return Err(format!(
            "argument value 0x{:02X} overflows 0x{:02X}",
            args[0], 0xFFFu32
          ));
        }
        Instruction::LoadLow { value: args[0] as u16 }
      }
      Mnemonic::LoadHigh => {
        expect(1)?;
        if args[0] > 0xF_FFFF {
          return Err(format!(
            "argument value 0x{:02X} overflows 0x{:02X}",
            args[0], 0xF_FFFFu32
          ));
        }
        Instruction::LoadHigh { value: args[0] }
      }
      Mnemonic::Add | Mnemonic::Sub => {
        expect(3)?;
        Instruction::AddSub {
          sub: mnemonic == Mnemonic::Sub,
          result: field("result", args[0], 4)?,
          a: field("mem1", args[1], 4)?,
          b: field("mem2", args[2], 4)?,
        }
      }
      Mnemonic::And | Mnemonic::Or => {
        expect(3)?;
        Instruction::AndOr {
          or: mnemonic == Mnemonic::Or,
          result: field("result", args[0], 4)?,
          a: field("mem1", args[1], 4)?,
          b: field("mem2", args[2], 4)?,
        }
      }
      Mnemonic::Lsl | Mnemonic::Lsr => {
        expect(3)?;
        Instruction::Shift {
          right: mnemonic == Mnemonic::Lsr,
          result: field("result", args[0], 4)?,
          mem: field("mem", args[1], 4)?,
          count: field("count", args[2], 4)?,
        }
      }
      Mnemonic::Call => {
        expect(3)?;
        Instruction::Call {
          callback: field("callback", args[0], 4)?,
          result: field("result", args[1], 4)?,
          arg: field("arg", args[2], 4)?,
        }
      }
      Mnemonic::PcSwp => {
        expect(2)?;
        Instruction::PcSwp {
          mem: field("mem", args[0], 5)?,
          save: field("save", args[1], 5)?,
        }
      }
      Mnemonic::Load3 => {
        expect(1)?;
        Instruction::Load3 { value: field("value", args[0], 3)? }
      }
      Mnemonic::Halt => {
        expect(0)?;
        Instruction::Halt
      }
    };

    Ok(instruction)
  }
}

impl Display for Instruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.mnemonic())?;
    for (i, operand) in self.operands().iter().enumerate() {
      match i {
        0 => write!(f, " {}", operand.value)?,
        _ => write!(f, ", {}", operand.value)?,
      }
    }
    Ok(())
  }
}
