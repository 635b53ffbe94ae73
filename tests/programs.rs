//! End-to-end scenarios: assemble real programs, run them, and check the
//! observable output memory, the way the test harness does.

use nanovm::debugger::Debugger;
use nanovm::harness::LoadedTest;
use nanovm::object::SectionKind;

fn overrides(pairs: &[(&str, u32)]) -> Vec<(String, u32)> {
  pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn run_and_check(name: &str, source: &str, pairs: &[(&str, u32)]) -> LoadedTest {
  let test = LoadedTest::from_source(name, source, None, &overrides(pairs))
    .expect("assembles");
  let ram = test.run().expect("terminates");
  assert!(test.check(&ram), "output labels do not match for {}", name);
  test
}

#[test]
fn add_two_inputs() {
  run_and_check(
    "add",
    "\
.input
MEMORY 4, a
MEMORY 4, b

.output
MEMORY 4, result

.code
MOV result, a
ADD result, result, b
HALT
",
    &[("input.a", 3), ("input.b", 4), ("output.result", 7)],
  );
}

const FACTORIAL: &str = "\
.input
MEMORY 4, n

.output
MEMORY 4, result

.data
MEMORY 4, return
MEMORY 4, one
MEMORY 4, counter
MEMORY 4, mula
MEMORY 4, mulb
MEMORY 4, accum

.code
start:
  LOAD3 1
  STORE_OP one
  LOAD3 1
  STORE_OP result
  LOAD_OP n
  STORE_OP counter

loop:
  LOAD3 0
  JZ counter, end       ; counter exhausted
  LOAD_OP result
  STORE_OP mula
  LOAD_OP counter
  STORE_OP mulb
  LOAD3 0
  LOAD_LOW multiply
  PC_SWP lr, return     ; call multiply
  LOAD_OP accum
  STORE_OP result
  SUB counter, counter, one
  LOAD3 0
  JZ lr, loop           ; unconditional

end:
  HALT

multiply:               ; accum = mula * mulb, by repeated addition
  LOAD3 0
  STORE_OP accum
mul_loop:
  LOAD3 0
  JZ mulb, mul_done
  ADD accum, accum, mula
  SUB mulb, mulb, one
  LOAD3 0
  JZ lr, mul_loop       ; unconditional
mul_done:
  PC_SWP return, return
";

#[test]
fn factorial_of_twelve() {
  run_and_check(
    "factorial",
    FACTORIAL,
    &[("input.n", 12), ("output.result", 479_001_600)],
  );
}

#[test]
fn factorial_of_zero_is_one() {
  run_and_check(
    "factorial0",
    FACTORIAL,
    &[("input.n", 0), ("output.result", 1)],
  );
}

#[test]
fn branch_not_taken() {
  // LR = 2 against W10 = 1: JZ falls through and result receives 5.
  run_and_check(
    "branch",
    "\
.output
MEMORY 4, result

.code
LOAD3 1
STORE_OP 10
LOAD3 2
JZ 10, target
LOAD3 5
STORE_OP result
HALT
target:
LOAD3 1
STORE_OP result
HALT
",
    &[("output.result", 5)],
  );
}

#[test]
fn pc_swp_call_and_return() {
  let test = run_and_check(
    "linkage",
    "\
.output
MEMORY 4, result
MEMORY 4, marker

.data
MEMORY 4, target
MEMORY 4, save

.code
  LOAD3 0
  LOAD_LOW callee
  STORE_OP target
  PC_SWP target, save   ; save <- 6, jump to callee
  LOAD3 5
  STORE_OP result
  HALT
callee:
  LOAD3 7
  STORE_OP marker
  PC_SWP save, save     ; return to the caller
",
    &[("output.result", 5), ("output.marker", 7)],
  );

  // The callee entry is at byte 9, so its own PC_SWP at 11 linked 13
  // back into `save` while returning to 6.
  let ram = test.run().unwrap();
  let save = test.object().section(SectionKind::Data).labels["save"];
  assert_eq!(ram.read_at(save.pos), Some(13));
}

#[test]
fn immediate_loads_span() {
  run_and_check(
    "spans",
    "\
.output
MEMORY 4, result

.code
LOAD_LOW 0xABC
LOAD_HIGH 0x12345
STORE_OP result
HALT
",
    &[("output.result", 0x12345ABC)],
  );
}

#[test]
fn breakpoint_halts_the_debugger_at_the_address() {
  // `b 0A; c` stops at PC 0x0A with nothing past it executed.
  let test = LoadedTest::from_source(
    "debug",
    "\
.output
MEMORY 4, before
MEMORY 4, after

.code
LOAD3 5
STORE_OP before
LOAD3 1
LOAD3 1
LOAD3 1
LOAD3 1
LOAD3 1
LOAD3 1
LOAD3 1
LOAD3 1
LOAD3 7
STORE_OP after
HALT
",
    None,
    &[],
  )
  .unwrap();

  let mut debugger = Debugger::new(test.object().clone());
  let mut out = Vec::new();
  debugger.handle_command("b 0A", &mut out).unwrap();
  debugger.handle_command("c", &mut out).unwrap();

  let output = String::from_utf8(out).unwrap();
  assert!(output.contains("Hit breakpoint at PC: 10"));
  assert_eq!(debugger.machine().pc(), 0x0A);

  let before = test.object().section(SectionKind::Output).labels["before"];
  let after = test.object().section(SectionKind::Output).labels["after"];
  assert_eq!(debugger.machine().ram().read_at(before.pos), Some(5));
  assert_eq!(debugger.machine().ram().read_at(after.pos), Some(0));
}
