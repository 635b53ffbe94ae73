/*!

  The interactive debugger shell.

  The shell reads commands from stdin at a `(debug) ` prompt and runs a
  [`Machine`] over the debugged object's `text`, rendering every executed
  instruction through the shared listing formatter with live RAM diffs.
  Commands are matched by their minimal distinguishing prefix: `step`/`n`,
  `continue`/`c`, `break <hexAddr>`/`b`, `goto <dec>`/`g`,
  `mem <name-or-dec>[=value]`/`p`, `lr`, `list [n]`/`l`, and `exit`/`q`.

  Interrupt handling is cooperative. SIGINT sets a process-wide flag that
  `continue` inspects and clears between steps; a second SIGINT while the
  flag is still set means the engine never looked at it, and the process
  aborts with a "not responding" message.

  Command handling writes to a caller-supplied sink, so the whole
  protocol is exercised by the test suite without a terminal.

*/

use std::collections::{BTreeMap, HashSet};
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::disasm::{Decompiler, NativeDecompiler};
use crate::listing::{format_line, DecompiledLine};
use crate::object::{Label, Object};
use crate::vm::{Machine, Ram, Step};

/// Set by the SIGINT handler, consumed by `continue`.
static CANCEL: AtomicBool = AtomicBool::new(false);

/**
  Installs the SIGINT handler. The first signal raises the cancellation
  flag; a second one arriving while the flag is still set aborts the
  process.
*/
pub fn install_interrupt_handler() {
  let result = ctrlc::set_handler(|| {
    if CANCEL.swap(true, Ordering::SeqCst) {
      eprintln!("Debugger not responding");
      std::process::exit(1);
    }
  });
  if let Err(error) = result {
    eprintln!("Error while install signal handler: {}", error);
  }
}

enum StepOutcome {
  Executed,
  Halted,
  End,
}

pub struct Debugger {
  object: Object,
  machine: Machine,
  breakpoints: HashSet<u8>,
  all_labels: BTreeMap<String, Label>,
  decompiled: Option<Vec<DecompiledLine>>,
  line_map: BTreeMap<u8, DecompiledLine>,
  running: bool,
}

impl Debugger {
  pub fn new(object: Object) -> Debugger {
    let machine = Machine::new(Ram::from_image(&object.ram().data));
    let all_labels = object.all_labels();
    Debugger {
      object,
      machine,
      breakpoints: HashSet::new(),
      all_labels,
      decompiled: None,
      line_map: BTreeMap::new(),
      running: true,
    }
  }

  /// The REPL over stdin/stdout; returns when the user leaves the loop
  /// or stdin closes.
  pub fn run(&mut self) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    while self.running {
      write!(stdout, "(debug) ")?;
      stdout.flush()?;

      line.clear();
      if stdin.lock().read_line(&mut line)? == 0 {
        break;
      }
      let command = line.trim().to_string();
      self.handle_command(&command, &mut stdout)?;
    }
    Ok(())
  }

  /// Dispatches one command line. Public so the protocol is scriptable.
  pub fn handle_command(
    &mut self,
    command: &str,
    out: &mut dyn Write,
  ) -> io::Result<()> {
    if command == "step" || command == "n" {
      self.step(out)?;
    } else if command.starts_with("goto") || command.starts_with("g ") || command == "g" {
      self.go_to(command, out)?;
    } else if command == "continue" || command.starts_with('c') {
      self.continue_execution(out)?;
    } else if command.starts_with("break") || command.starts_with('b') {
      self.set_breakpoint(command, out)?;
    } else if command.starts_with("mem") || command.starts_with('p') {
      self.show_memory(command, out)?;
    } else if command == "lr" {
      writeln!(out, "LR = {}", self.machine.ram().word(0))?;
    } else if command.starts_with("list") || command.starts_with("l ") || command == "l" {
      self.list_instructions(command, out)?;
    } else if command == "exit" || command.starts_with('q') {
      self.running = false;
    } else {
      writeln!(
        out,
        "Unknown command! Available: step, continue, break [addr], mem [addr], lr, list, exit"
      )?;
    }
    Ok(())
  }

  pub fn is_running(&self) -> bool {
    self.running
  }

  pub fn machine(&self) -> &Machine {
    &self.machine
  }

  fn step(&mut self, out: &mut dyn Write) -> io::Result<StepOutcome> {
    if self.machine.pc() as usize >= self.object.text().data.len() {
      writeln!(out, "End of program.")?;
      self.running = false;
      return Ok(StepOutcome::End);
    }

    self.ensure_decompiled(out)?;

    let prev_ram = self.machine.ram().clone();
    let prev_pc = self.machine.pc();
    let code = &self.object.text().data;
    let outcome = match self.machine.step(code, None) {
      Ok(Step::Running) => StepOutcome::Executed,
      Ok(Step::Halted)  => StepOutcome::Halted,
      Err(error) => {
        writeln!(out, "Error while execute: {}", error)?;
        self.running = false;
        return Ok(StepOutcome::End);
      }
    };

    match self.line_map.get(&prev_pc) {
      Some(line) => {
        writeln!(
          out,
          "{}",
          format_line(
            line,
            Some(self.machine.ram()),
            Some(&prev_ram),
            &self.all_labels,
            true,
          )
        )?;
      }
      // A jump into the middle of an instruction desynchronizes the
      // listing; show the position at least.
      None => writeln!(out, "{:02x}: ?", prev_pc)?,
    }

    Ok(outcome)
  }

  fn continue_execution(&mut self, out: &mut dyn Write) -> io::Result<()> {
    while (self.machine.pc() as usize) < self.object.text().data.len() {
      let cancelled = CANCEL.swap(false, Ordering::SeqCst);
      if self.breakpoints.contains(&self.machine.pc()) || cancelled {
        writeln!(out, "Hit breakpoint at PC: {}", self.machine.pc())?;
        return Ok(());
      }
      match self.step(out)? {
        StepOutcome::Executed => {}
        _                     => break,
      }
    }
    Ok(())
  }

  fn set_breakpoint(&mut self, command: &str, out: &mut dyn Write) -> io::Result<()> {
    let arg = argument_of(command);
    match u8::from_str_radix(arg, 16) {
      Ok(addr) => {
        self.breakpoints.insert(addr);
        writeln!(out, "Breakpoint set at address {}", addr)?;
      }
      Err(_) => writeln!(out, "Bad breakpoint address '{}'", arg)?,
    }
    Ok(())
  }

  fn go_to(&mut self, command: &str, out: &mut dyn Write) -> io::Result<()> {
    // Bare `g` reports the current position without moving it.
    let arg = match command.find(' ') {
      Some(index) => &command[index + 1..],
      None        => "",
    };
    if arg.is_empty() {
      writeln!(out, "pc = {:02x}", self.machine.pc())?;
      return Ok(());
    }
    match arg.parse::<u8>() {
      Ok(addr) => {
        self.machine.set_pc(addr);
        writeln!(out, "pc = {:02x}", addr)?;
      }
      Err(_) => writeln!(out, "Bad address '{}'", arg)?,
    }
    Ok(())
  }

  fn show_memory(&mut self, command: &str, out: &mut dyn Write) -> io::Result<()> {
    let arg = argument_of(command);
    let (name, value) = match arg.find('=') {
      Some(index) => (&arg[..index], Some(&arg[index + 1..])),
      None        => (arg, None),
    };

    let addr = match name.chars().next() {
      Some(c) if c.is_ascii_digit() => name.parse::<u8>().ok(),
      // Labels resolve through the sections in declared order.
      _ => self.object.find_label(name).map(|(_, label)| label.pos / 4),
    };

    let addr = match addr {
      Some(addr) => addr,
      None => {
        writeln!(out, "Var {} not found", name)?;
        return Ok(());
      }
    };

    if let Some(value) = value {
      match parse_number(value) {
        Some(number) => self.machine.ram_mut().set_word(addr, number),
        None => {
          writeln!(out, "Can't parse value '{}'", value)?;
          return Ok(());
        }
      }
    }

    writeln!(out, "Memory[{}] = {}", addr, self.machine.ram().word(addr))?;
    Ok(())
  }

  fn list_instructions(&mut self, command: &str, out: &mut dyn Write) -> io::Result<()> {
    let arg = match command.find(' ') {
      Some(index) => &command[index + 1..],
      None        => "",
    };
    let context = arg.parse::<usize>().unwrap_or(5);

    self.ensure_decompiled(out)?;
    let lines = self.decompiled.as_deref().unwrap_or(&[]);

    let pc = self.machine.pc();
    let current = lines.iter().position(|line| line.pos == pc);
    let pivot = current.unwrap_or(lines.len());
    let start = pivot.saturating_sub(context);
    let stop = (pivot + context).min(lines.len());

    writeln!(out, "Listing instructions:")?;
    for (index, line) in lines[start..stop].iter().enumerate() {
      writeln!(
        out,
        "{}",
        format_line(
          line,
          None,
          None,
          &self.all_labels,
          Some(start + index) == current,
        )
      )?;
    }
    Ok(())
  }

  fn ensure_decompiled(&mut self, out: &mut dyn Write) -> io::Result<()> {
    if self.decompiled.is_some() {
      return Ok(());
    }
    match NativeDecompiler.decompile(&self.object) {
      Ok(lines) => {
        self.line_map = lines.iter().map(|line| (line.pos, line.clone())).collect();
        self.decompiled = Some(lines);
      }
      Err(error) => {
        writeln!(out, "Error while decompile: {}", error)?;
        self.decompiled = Some(Vec::new());
      }
    }
    Ok(())
  }
}

/// Everything after the first space; the whole command when there is
/// none, matching the original shell's forgiving slicing.
fn argument_of(command: &str) -> &str {
  match command.find(' ') {
    Some(index) => &command[index + 1..],
    None        => command,
  }
}

fn parse_number(text: &str) -> Option<u32> {
  if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
    u32::from_str_radix(hex, 16).ok()
  } else {
    text.parse().ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::asm::{Assembler, NativeAssembler};

  fn debugger_for(source: &str) -> Debugger {
    Debugger::new(NativeAssembler.assemble(source).unwrap())
  }

  fn command(debugger: &mut Debugger, line: &str) -> String {
    let mut out = Vec::new();
    debugger.handle_command(line, &mut out).unwrap();
    String::from_utf8(out).unwrap()
  }

  const COUNT_PROGRAM: &str = "\
.output
MEMORY 4, result
.code
LOAD3 5
STORE_OP 20
LOAD3 1
LOAD3 1
LOAD3 1
LOAD3 1
LOAD3 1
LOAD3 1
LOAD3 1
LOAD3 1
LOAD3 7
STORE_OP 21
HALT
";

  #[test]
  fn breakpoint_stops_continue_before_the_instruction() {
    let mut debugger = debugger_for(COUNT_PROGRAM);
    let output = command(&mut debugger, "b 0a");
    assert_eq!(output, "Breakpoint set at address 10\n");

    let output = command(&mut debugger, "c");
    assert!(output.ends_with("Hit breakpoint at PC: 10\n"));
    assert_eq!(debugger.machine().pc(), 0x0A);
    // Instructions before the breakpoint ran, the ones after did not.
    assert_eq!(debugger.machine().ram().word(20), 5);
    assert_eq!(debugger.machine().ram().word(21), 0);
  }

  #[test]
  fn step_renders_the_executed_line_with_lr_diff() {
    let mut debugger = debugger_for(COUNT_PROGRAM);
    let output = command(&mut debugger, "step");
    assert_eq!(output, "00: f5       -> LOAD3 0x5 | lr[0x00000000->0x00000005]\n");
  }

  #[test]
  fn continue_stops_at_halt() {
    let mut debugger = debugger_for(".output\nMEMORY 4, r\n.code\nLOAD3 3\nHALT\n");
    let output = command(&mut debugger, "c");
    assert!(output.contains("LOAD3"));
    assert!(output.contains("HALT"));
    assert!(!output.contains("Hit breakpoint"));
    assert!(debugger.is_running());
  }

  #[test]
  fn goto_and_lr_and_mem() {
    let mut debugger = debugger_for(COUNT_PROGRAM);
    assert_eq!(command(&mut debugger, "g 4"), "pc = 04\n");
    assert_eq!(debugger.machine().pc(), 4);

    assert_eq!(command(&mut debugger, "lr"), "LR = 0\n");

    // Write by label, read back by word index. `result` is word 1.
    assert_eq!(command(&mut debugger, "mem result=0x2A"), "Memory[1] = 42\n");
    assert_eq!(command(&mut debugger, "mem 1"), "Memory[1] = 42\n");
    assert_eq!(command(&mut debugger, "mem nope"), "Var nope not found\n");
  }

  #[test]
  fn list_marks_the_current_line() {
    let mut debugger = debugger_for(COUNT_PROGRAM);
    let output = command(&mut debugger, "l 2");
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines[0], "Listing instructions:");
    assert!(lines[1].contains("-> LOAD3"));
    assert_eq!(lines.len(), 1 + 2); // current plus two below

    command(&mut debugger, "g 2");
    let output = command(&mut debugger, "l 2");
    assert!(output.lines().nth(3).unwrap().contains("->"));
  }

  #[test]
  fn stepping_past_the_end_leaves_the_loop() {
    let mut debugger = debugger_for(".code\nHALT\n");
    command(&mut debugger, "step"); // executes HALT
    assert!(debugger.is_running());
    let output = command(&mut debugger, "step");
    assert_eq!(output, "End of program.\n");
    assert!(!debugger.is_running());
  }

  #[test]
  fn unknown_commands_print_the_usage_line() {
    let mut debugger = debugger_for(".code\nHALT\n");
    let output = command(&mut debugger, "frobnicate");
    assert!(output.starts_with("Unknown command!"));
  }

  #[test]
  fn exit_variants_leave_the_loop() {
    let mut debugger = debugger_for(".code\nHALT\n");
    command(&mut debugger, "q");
    assert!(!debugger.is_running());

    let mut debugger = debugger_for(".code\nHALT\n");
    command(&mut debugger, "exit");
    assert!(!debugger.is_running());
  }
}
