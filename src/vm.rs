/*!

  Structures and functions for the NanoVM interpreter.

  A [`Machine`] owns a private 128-byte RAM image and an 8-bit program
  counter, and borrows the `text` bytes of the program it runs. One call
  to [`Machine::step`] decodes and applies a single instruction; a call to
  [`Machine::execute`] loops until the guest halts or a cooperative
  cancellation flag is raised. The guest is strictly single-threaded and
  deterministic: identical code, RAM image, and host callback produce an
  identical terminal RAM.

  There is no timeslice and no instruction counter; the guest is trusted
  to terminate. The one failure the interpreter can report is an
  instruction fetch past the end of `text` after the modulo-256 wrap of
  the program counter, which the original left undefined.

*/

use std::sync::atomic::{AtomicBool, Ordering};

use crate::bytecode::{decode_instruction, Instruction};
use crate::object::RAM_SIZE;
use crate::{Error, Result};

/// Words of RAM; word 0 is the accumulator `lr`.
pub const WORD_COUNT: usize = RAM_SIZE / 4;

/**
  A host function reachable from guest code through `CALL`: the guest
  supplies a callback id and one argument, the host returns one word.
  Closures implement it for free.
*/
pub trait HostCallback {
  fn call(&mut self, proc_id: u32, arg: u32) -> u32;
}

impl<F> HostCallback for F
where
  F: FnMut(u32, u32) -> u32,
{
  fn call(&mut self, proc_id: u32, arg: u32) -> u32 {
    self(proc_id, arg)
  }
}

/**
  The guest memory: an ordered byte buffer, also viewed as 32
  little-endian 32-bit words. Word accessors mask their index to the
  word count, mirroring the 5-bit operand width of the instruction set;
  byte-offset accessors are checked because label positions come from
  program input.
*/
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Ram {
  bytes: [u8; RAM_SIZE],
}

impl Default for Ram {
  fn default() -> Self {
    Ram::new()
  }
}

impl Ram {
  pub fn new() -> Ram {
    Ram { bytes: [0; RAM_SIZE] }
  }

  /// Builds the RAM from an initial image, zero-extending a short one.
  pub fn from_image(image: &[u8]) -> Ram {
    let mut ram = Ram::new();
    let length = image.len().min(RAM_SIZE);
    ram.bytes[..length].copy_from_slice(&image[..length]);
    ram
  }

  pub fn word(&self, index: u8) -> u32 {
    let offset = (index as usize % WORD_COUNT) * 4;
    u32::from_le_bytes([
      self.bytes[offset],
      self.bytes[offset + 1],
      self.bytes[offset + 2],
      self.bytes[offset + 3],
    ])
  }

  pub fn set_word(&mut self, index: u8, value: u32) {
    let offset = (index as usize % WORD_COUNT) * 4;
    self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
  }

  /// Reads the little-endian word at a byte offset, `None` when the
  /// four-byte range does not fit the image.
  pub fn read_at(&self, pos: u8) -> Option<u32> {
    let pos = pos as usize;
    let slice = self.bytes.get(pos..pos + 4)?;
    Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
  }

  /// Copies `len` bytes from `image` starting at `pos` in both; used to
  /// seed the live input ranges of a fresh RAM.
  pub fn copy_range(&mut self, image: &[u8], pos: u8, len: u8) {
    let start = pos as usize;
    let end = (start + len as usize).min(RAM_SIZE).min(image.len());
    if start < end {
      self.bytes[start..end].copy_from_slice(&image[start..end]);
    }
  }

  pub fn bytes(&self) -> &[u8; RAM_SIZE] {
    &self.bytes
  }
}

/// Outcome of a single step.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Step {
  Running,
  Halted,
}

/// Why [`Machine::execute`] returned.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Termination {
  Halted,
  Cancelled,
}

pub struct Machine {
  ram: Ram,
  pc: u8,
}

impl Machine {
  pub fn new(ram: Ram) -> Machine {
    Machine { ram, pc: 0 }
  }

  pub fn ram(&self) -> &Ram {
    &self.ram
  }

  pub fn ram_mut(&mut self) -> &mut Ram {
    &mut self.ram
  }

  pub fn pc(&self) -> u8 {
    self.pc
  }

  pub fn set_pc(&mut self, pc: u8) {
    self.pc = pc;
  }

  /**
    Decodes and applies the instruction at the current program counter.
    The counter is advanced by the instruction's encoded size before the
    semantics run, so jump targets and `PC_SWP` link values see the
    address of the following instruction.
  */
  pub fn step(
    &mut self,
    code: &[u8],
    proc: Option<&mut dyn HostCallback>,
  ) -> Result<Step> {
    let (instruction, size) = decode_instruction(code, self.pc)
      .ok_or(Error::CodeOverrun { pc: self.pc })?;
    self.pc = self.pc.wrapping_add(size);

    #[cfg(feature = "trace_execution")]
    println!(
      "{:02x}: {}",
      self.pc.wrapping_sub(size),
      instruction
    );

    match instruction {
      Instruction::LoadOp { mem } => {
        let value = self.ram.word(mem);
        self.ram.set_word(0, value);
      }

      Instruction::StoreOp { mem } => {
        let value = self.ram.word(0);
        self.ram.set_word(mem, value);
      }

      Instruction::Jump { less, rarg, addr } => {
        let lr = self.ram.word(0);
        let rhs = self.ram.word(rarg);
        let taken = match less {
          true  => lr < rhs,
          false => lr == rhs,
        };
        if taken {
          self.pc = addr;
        }
      }

      Instruction::LoadLow { value } => {
        let lr = self.ram.word(0);
        self.ram.set_word(0, (lr & 0xFFFF_F000) | (value as u32 & 0xFFF));
      }

      Instruction::LoadHigh { value } => {
        let lr = self.ram.word(0);
        self.ram.set_word(0, (lr & 0xFFF) | ((value & 0xF_FFFF) << 12));
      }

      Instruction::AddSub { sub, result, a, b } => {
        let lhs = self.ram.word(a);
        let rhs = self.ram.word(b);
        let value = match sub {
          true  => lhs.wrapping_sub(rhs),
          false => lhs.wrapping_add(rhs),
        };
        self.ram.set_word(result, value);
      }

      Instruction::AndOr { or, result, a, b } => {
        let lhs = self.ram.word(a);
        let rhs = self.ram.word(b);
        let value = match or {
          true  => lhs | rhs,
          false => lhs & rhs,
        };
        self.ram.set_word(result, value);
      }

      Instruction::Shift { right, result, mem, count } => {
        let value = self.ram.word(mem);
        let shifted = match right {
          true  => value >> count,
          false => value << count,
        };
        self.ram.set_word(result, shifted);
      }

      Instruction::Call { callback, result, arg } => {
        let proc_id = self.ram.word(callback);
        let argument = self.ram.word(arg);
        // An absent callback is not an error; the call yields zero.
        let value = match proc {
          Some(host) => host.call(proc_id, argument),
          None       => 0,
        };
        self.ram.set_word(result, value);
      }

      Instruction::PcSwp { mem, save } => {
        // The operand read precedes the write: `PC_SWP r, r` jumps
        // through the old value of `r` while linking into it.
        let next_pc = self.ram.word(mem);
        self.ram.set_word(save, self.pc as u32);
        self.pc = next_pc as u8;
      }

      Instruction::Load3 { value } => {
        self.ram.set_word(0, value as u32);
      }

      Instruction::Halt => {
        return Ok(Step::Halted);
      }
    }

    Ok(Step::Running)
  }

  /**
    Runs from `start` until the guest halts or `cancel` is observed set.
    Cancellation is cooperative: the step in progress completes before
    the loop exits, and the flag is left untouched for the caller to
    clear.
  */
  pub fn execute(
    &mut self,
    code: &[u8],
    start: u8,
    mut proc: Option<&mut dyn HostCallback>,
    cancel: Option<&AtomicBool>,
  ) -> Result<Termination> {
    self.pc = start;
    loop {
      if let Some(flag) = cancel {
        if flag.load(Ordering::SeqCst) {
          return Ok(Termination::Cancelled);
        }
      }
      let step_result = match proc {
        Some(ref mut p) => self.step(code, Some(&mut **p))?,
        None => self.step(code, None)?,
      };
      match step_result {
        Step::Running => {}
        Step::Halted  => return Ok(Termination::Halted),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::Instruction as I;

  /// Encodes a program from instruction values.
  fn assemble(instructions: &[I]) -> Vec<u8> {
    let mut code = Vec::new();
    for instruction in instructions {
      code.extend_from_slice(instruction.encode().bytes());
    }
    code
  }

  fn run(machine: &mut Machine, code: &[u8]) {
    machine
      .execute(code, 0, None, None)
      .expect("program terminates");
  }

  #[test]
  fn load3_then_store_reaches_any_word() {
    for mem in [1u8, 15, 16, 31] {
      let code = assemble(&[
        I::Load3 { value: 5 },
        I::StoreOp { mem },
        I::Halt,
      ]);
      let mut machine = Machine::new(Ram::new());
      run(&mut machine, &code);
      assert_eq!(machine.ram().word(mem), 5);
    }
  }

  #[test]
  fn immediate_loads_span_the_word() {
    let code = assemble(&[
      I::LoadLow { value: 0xABC },
      I::LoadHigh { value: 0x12345 },
      I::Halt,
    ]);
    let mut machine = Machine::new(Ram::new());
    run(&mut machine, &code);
    assert_eq!(machine.ram().word(0), 0x12345ABC);
  }

  #[test]
  fn load_low_preserves_the_high_bits() {
    let code = assemble(&[
      I::LoadHigh { value: 0x12345 },
      I::LoadLow { value: 0xABC },
      I::Halt,
    ]);
    let mut machine = Machine::new(Ram::new());
    run(&mut machine, &code);
    assert_eq!(machine.ram().word(0), 0x12345ABC);
  }

  #[test]
  fn arithmetic_wraps() {
    let mut ram = Ram::new();
    ram.set_word(1, u32::MAX);
    ram.set_word(2, 2);
    let code = assemble(&[
      I::AddSub { sub: false, result: 3, a: 1, b: 2 },
      I::AddSub { sub: true, result: 4, a: 3, b: 2 },
      I::Halt,
    ]);
    let mut machine = Machine::new(ram);
    run(&mut machine, &code);
    assert_eq!(machine.ram().word(3), 1);
    assert_eq!(machine.ram().word(4), u32::MAX);
  }

  #[test]
  fn bitwise_and_shift_forms() {
    let mut ram = Ram::new();
    ram.set_word(1, 0b1100);
    ram.set_word(2, 0b1010);
    let code = assemble(&[
      I::AndOr { or: false, result: 3, a: 1, b: 2 },
      I::AndOr { or: true, result: 4, a: 1, b: 2 },
      I::Shift { right: false, result: 5, mem: 1, count: 4 },
      I::Shift { right: true, result: 6, mem: 1, count: 2 },
      I::Halt,
    ]);
    let mut machine = Machine::new(ram);
    run(&mut machine, &code);
    assert_eq!(machine.ram().word(3), 0b1000);
    assert_eq!(machine.ram().word(4), 0b1110);
    assert_eq!(machine.ram().word(5), 0b1100_0000);
    assert_eq!(machine.ram().word(6), 0b11);
  }

  #[test]
  fn register_writes_to_word_zero_clobber_lr() {
    let mut ram = Ram::new();
    ram.set_word(1, 40);
    ram.set_word(2, 2);
    let code = assemble(&[
      I::AddSub { sub: false, result: 0, a: 1, b: 2 },
      I::Halt,
    ]);
    let mut machine = Machine::new(ram);
    run(&mut machine, &code);
    assert_eq!(machine.ram().word(0), 42);
  }

  #[test]
  fn jz_branches_only_on_equality() {
    // LR = 2, W1 = 1: not taken, so word 10 receives 5.
    let mut ram = Ram::new();
    ram.set_word(1, 1);
    let code = assemble(&[
      I::Load3 { value: 2 },                        // 0
      I::Jump { less: false, rarg: 1, addr: 6 },    // 1
      I::Load3 { value: 5 },                        // 3
      I::StoreOp { mem: 10 },                       // 4
      I::Halt,                                      // 5
      I::Load3 { value: 1 },                        // 6
      I::StoreOp { mem: 10 },                       // 7
      I::Halt,                                      // 8
    ]);
    let mut machine = Machine::new(ram);
    run(&mut machine, &code);
    assert_eq!(machine.ram().word(10), 5);

    // LR = 1, W1 = 1: taken.
    let mut ram = Ram::new();
    ram.set_word(1, 1);
    let code = assemble(&[
      I::Load3 { value: 1 },
      I::Jump { less: false, rarg: 1, addr: 6 },
      I::Load3 { value: 5 },
      I::StoreOp { mem: 10 },
      I::Halt,
      I::Load3 { value: 1 },
      I::StoreOp { mem: 10 },
      I::Halt,
    ]);
    let mut machine = Machine::new(ram);
    run(&mut machine, &code);
    assert_eq!(machine.ram().word(10), 1);
  }

  #[test]
  fn jl_compares_unsigned() {
    // LR = 1 < W1 = 0xFFFF_FFFF under unsigned comparison.
    let mut ram = Ram::new();
    ram.set_word(1, u32::MAX);
    let code = assemble(&[
      I::Load3 { value: 1 },                     // 0
      I::Jump { less: true, rarg: 1, addr: 5 },  // 1
      I::Halt,                                   // 3
      I::Halt,                                   // 4
      I::Load3 { value: 7 },                     // 5
      I::StoreOp { mem: 10 },                    // 6
      I::Halt,                                   // 7
    ]);
    let mut machine = Machine::new(ram);
    run(&mut machine, &code);
    assert_eq!(machine.ram().word(10), 7);
  }

  #[test]
  fn pc_swp_links_and_jumps() {
    // 0: PC_SWP 1, 2 with W1 = 4 jumps to 4 and stores 2 into W2.
    let mut ram = Ram::new();
    ram.set_word(1, 4);
    let code = assemble(&[
      I::PcSwp { mem: 1, save: 2 },  // 0
      I::Halt,                       // 2
      I::Halt,                       // 3
      I::Load3 { value: 3 },         // 4
      I::StoreOp { mem: 10 },        // 5
      I::Halt,                       // 6
    ]);
    let mut machine = Machine::new(ram);
    run(&mut machine, &code);
    assert_eq!(machine.ram().word(2), 2);
    assert_eq!(machine.ram().word(10), 3);
  }

  #[test]
  fn pc_swp_reads_before_writing() {
    // PC_SWP r, r: the jump goes through the old value while the link
    // lands in the same register.
    let mut ram = Ram::new();
    ram.set_word(3, 4);
    let code = assemble(&[
      I::PcSwp { mem: 3, save: 3 },
      I::Halt,
      I::Halt,
      I::Halt,
      I::Halt, // target
    ]);
    let mut machine = Machine::new(ram);
    run(&mut machine, &code);
    assert_eq!(machine.ram().word(3), 2);
  }

  #[test]
  fn call_without_callback_yields_zero() {
    let mut ram = Ram::new();
    ram.set_word(5, 0xDEAD);
    let code = assemble(&[
      I::Call { callback: 1, result: 5, arg: 2 },
      I::Halt,
    ]);
    let mut machine = Machine::new(ram);
    run(&mut machine, &code);
    assert_eq!(machine.ram().word(5), 0);
  }

  #[test]
  fn call_reaches_the_host() {
    let mut ram = Ram::new();
    ram.set_word(1, 9); // callback id
    ram.set_word(2, 33); // argument
    let code = assemble(&[
      I::Call { callback: 1, result: 5, arg: 2 },
      I::Halt,
    ]);
    let mut seen = Vec::new();
    let mut host = |id: u32, arg: u32| {
      seen.push((id, arg));
      id + arg
    };
    let mut machine = Machine::new(ram);
    machine
      .execute(&code, 0, Some(&mut host), None)
      .expect("terminates");
    assert_eq!(seen, vec![(9, 33)]);
    assert_eq!(machine.ram().word(5), 42);
  }

  #[test]
  fn cancellation_is_observed_between_steps() {
    // An infinite loop: JZ 0, 0 always branches back to itself.
    let code = assemble(&[I::Jump { less: false, rarg: 0, addr: 0 }]);
    let cancel = AtomicBool::new(true);
    let mut machine = Machine::new(Ram::new());
    let termination = machine
      .execute(&code, 0, None, Some(&cancel))
      .expect("cancelled, not failed");
    assert_eq!(termination, Termination::Cancelled);
    assert!(cancel.load(Ordering::SeqCst));
  }

  #[test]
  fn running_off_the_code_is_an_error() {
    let code = assemble(&[I::Load3 { value: 1 }]);
    let mut machine = Machine::new(Ram::new());
    let err = machine.execute(&code, 0, None, None).unwrap_err();
    assert!(matches!(err, Error::CodeOverrun { pc: 1 }));
  }

  #[test]
  fn execution_is_deterministic() {
    let mut ram = Ram::new();
    ram.set_word(1, 3);
    ram.set_word(2, 4);
    let code = assemble(&[
      I::AddSub { sub: false, result: 3, a: 1, b: 2 },
      I::Halt,
    ]);
    let mut first = Machine::new(ram.clone());
    let mut second = Machine::new(ram);
    run(&mut first, &code);
    run(&mut second, &code);
    assert!(first.ram() == second.ram());
  }
}
