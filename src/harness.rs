/*!

  The test harness: runs assembled programs and compares their observable
  output memory against expected values.

  A test is a source file plus an optional binding overlay plus zero or
  more `<section>.<label>=<value>` overrides. Loading a test assembles
  the source and writes the overlay and overrides into the object's RAM
  image; the values behind `input` labels are the program's live inputs,
  the values behind `output` labels the expectations.

  Running a test allocates a fresh zeroed RAM, copies in only the
  `input`-label ranges of the image, executes from PC 0, and then checks
  every `output` label's word against the image at the same offset.

  Tests run one thread each. Terminal output is serialized through a
  mutex; every status line is written inside an ANSI cursor save/restore
  pair at a per-test row, so concurrent tests update their own lines in
  place. Failing tests print per-label `got=`/`exp=` diffs afterwards.

*/

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Mutex;
use std::thread;

use crate::asm::{Assembler, NativeAssembler};
use crate::binding::apply_binding;
use crate::object::{Object, SectionKind};
use crate::vm::{Machine, Ram};
use crate::{load_file, Error, Result};

const OK_COLOR: &str = "\x1b[38;5;118m";
const ERROR_COLOR: &str = "\x1b[38;5;196m";
const EXPECT_COLOR: &str = "\x1b[38;5;184m";
const PASSED_COLOR: &str = "\x1b[1;38;5;76m";
const FAILED_COLOR: &str = "\x1b[1;38;5;160m";
const RESET: &str = "\x1b[0m";
const CURSOR_SAVE: &str = "\x1b[s";
const CURSOR_RESTORE: &str = "\x1b[u";

/// One `-i` argument of the test runner, parsed but not yet loaded.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct TestSpec {
  pub source: String,
  pub binding: Option<String>,
  pub overrides: Vec<(String, u32)>,
}

impl TestSpec {
  /// Parses `<source>:<binding>[:<section>.<label>=<value>]*`; the
  /// binding part may be empty.
  pub fn parse(argument: &str) -> Result<TestSpec> {
    let mut parts = argument.split(':');
    let source = parts.next().filter(|s| !s.is_empty());
    let binding = parts.next();
    let (source, binding) = match (source, binding) {
      (Some(source), Some(binding)) => (source, binding),
      _ => return Err(Error::BadTestSpec),
    };

    let mut overrides = Vec::new();
    for pair in parts {
      let equals = pair.find('=').ok_or_else(|| Error::BadPair(pair.to_string()))?;
      let key = &pair[..equals];
      let value = parse_number(&pair[equals + 1..])
        .ok_or_else(|| Error::BadPair(pair.to_string()))?;
      overrides.push((key.to_string(), value));
    }

    Ok(TestSpec {
      source: source.to_string(),
      binding: match binding.is_empty() {
        true  => None,
        false => Some(binding.to_string()),
      },
      overrides,
    })
  }
}

fn parse_number(text: &str) -> Option<u32> {
  if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
    u32::from_str_radix(hex, 16).ok()
  } else {
    text.parse().ok()
  }
}

/// An assembled test with its overlays applied, ready to run.
#[derive(Debug)]
pub struct LoadedTest {
  name: String,
  object: Object,
}

impl LoadedTest {
  /// Loads a spec from the filesystem; any failure here is fatal to the
  /// whole run, not just this test.
  pub fn load(spec: &TestSpec) -> Result<LoadedTest> {
    let source = load_file(&spec.source)?;
    let binding = match &spec.binding {
      Some(path) => Some(load_file(path)?),
      None       => None,
    };
    LoadedTest::from_source(
      &spec.source,
      &source,
      binding.as_deref(),
      &spec.overrides,
    )
  }

  /// The file-free constructor behind [`LoadedTest::load`].
  pub fn from_source(
    name: &str,
    source: &str,
    binding: Option<&str>,
    overrides: &[(String, u32)],
  ) -> Result<LoadedTest> {
    let mut object = NativeAssembler.assemble(source)?;

    if let Some(binding) = binding {
      apply_binding(&mut object, binding)?;
    }

    for (key, value) in overrides {
      // The key names the section on the left of the dot and the label
      // on the right; both lookups are exact.
      let dot = key.find('.').ok_or(Error::BadOverride)?;
      let (section_name, label_name) = (&key[..dot], &key[dot + 1..]);
      let kind: SectionKind = section_name
        .parse()
        .map_err(|_| Error::UnknownSection(section_name.to_string()))?;
      let label = *object
        .section(kind)
        .labels
        .get(label_name)
        .ok_or_else(|| {
          Error::UnknownLabel {
            section: section_name.to_string(),
            label: label_name.to_string(),
          }
        })?;

      let ram = &mut object.section_mut(SectionKind::Ram).data;
      let pos = label.pos as usize;
      if pos + 4 > ram.len() {
        return Err(Error::Binding(format!(
          "{} lies outside the ram image",
          key
        )));
      }
      ram[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
    }

    Ok(LoadedTest { name: name.to_string(), object })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn object(&self) -> &Object {
    &self.object
  }

  /// Executes the test: fresh RAM, live inputs copied in, run from 0.
  pub fn run(&self) -> Result<Ram> {
    let image = &self.object.ram().data;
    let mut ram = Ram::new();
    for label in self.object.section(SectionKind::Input).labels.values() {
      ram.copy_range(image, label.pos, label.size);
    }

    let code = &self.object.text().data;
    if code.is_empty() {
      return Err(Error::EmptyText);
    }

    let mut machine = Machine::new(ram);
    machine.execute(code, 0, None, None)?;
    Ok(machine.ram().clone())
  }

  fn expected(&self, pos: u8) -> u32 {
    let image = &self.object.ram().data;
    let pos = pos as usize;
    u32::from_le_bytes([
      image[pos],
      image[pos + 1],
      image[pos + 2],
      image[pos + 3],
    ])
  }

  /// A test passes iff every `output` label's word matches the image.
  pub fn check(&self, ram: &Ram) -> bool {
    self
      .object
      .section(SectionKind::Output)
      .labels
      .values()
      .all(|label| ram.read_at(label.pos) == Some(self.expected(label.pos)))
  }

  /// Per-label diff of a failed test.
  pub fn dump_failures(&self, ram: &Ram, out: &mut dyn Write) -> io::Result<()> {
    let labels = &self.object.section(SectionKind::Output).labels;
    let width = labels.keys().map(String::len).max().unwrap_or(0);

    for (name, label) in labels {
      let got = ram.read_at(label.pos).unwrap_or(0);
      let expected = self.expected(label.pos);
      let ok = got == expected;
      let status = match ok {
        true  => format!("{}OK{}   : ", OK_COLOR, RESET),
        false => format!("{}ERROR{}: ", ERROR_COLOR, RESET),
      };
      writeln!(
        out,
        "{}{}{}: got={}0x{:08X}{}, exp={}0x{:08X}{}",
        status,
        " ".repeat(width - name.len()),
        name,
        if ok { "" } else { ERROR_COLOR },
        got,
        RESET,
        if ok { "" } else { EXPECT_COLOR },
        expected,
        RESET,
      )?;
    }
    Ok(())
  }
}

/// Serializes concurrent status lines: each test owns one terminal row
/// below the caller's cursor, addressed inside a save/restore pair.
struct StatusBoard {
  state: Mutex<BoardState>,
}

struct BoardState {
  rows: HashMap<String, usize>,
  last_row: usize,
}

impl StatusBoard {
  fn new() -> StatusBoard {
    StatusBoard {
      state: Mutex::new(BoardState { rows: HashMap::new(), last_row: 0 }),
    }
  }

  fn with_line(&self, name: &str, write: impl FnOnce(&mut dyn Write)) {
    let mut state = self.state.lock().expect("status board poisoned");
    let next_row = state.last_row + 1;
    let row = *state.rows.entry(name.to_string()).or_insert(next_row);
    state.last_row = state.last_row.max(row);

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let _ = write!(handle, "{}\x1b[{}B\r", CURSOR_SAVE, row);
    write(&mut handle);
    let _ = write!(handle, "{}", CURSOR_RESTORE);
    let _ = handle.flush();
  }
}

fn run_one(test: &LoadedTest, board: &StatusBoard, pad: usize) -> Result<Ram> {
  board.with_line(test.name(), |out| {
    let _ = write!(out, "Running test: {} ... ", test.name());
  });

  let result = test.run();

  board.with_line(test.name(), |out| {
    let _ = match &result {
      Ok(ram) if test.check(ram) => write!(
        out,
        "Running test: {} ... {}{}PASSED{}",
        test.name(),
        " ".repeat(pad - test.name().len()),
        PASSED_COLOR,
        RESET
      ),
      Ok(_) => write!(
        out,
        "Running test: {} ... {}{}FAILED{}",
        test.name(),
        " ".repeat(pad - test.name().len()),
        FAILED_COLOR,
        RESET
      ),
      Err(error) => write!(
        out,
        "Running test: {} ... {}{}ERROR{} {}",
        test.name(),
        " ".repeat(pad - test.name().len()),
        FAILED_COLOR,
        RESET,
        error
      ),
    };
  });

  result
}

/**
  Runs every test on its own thread, then prints diffs for the failures
  to stderr. An error inside one test isolates to that test.
*/
pub fn run_tests(tests: &[LoadedTest]) -> io::Result<()> {
  let pad = tests.iter().map(|test| test.name().len()).max().unwrap_or(0);
  let board = StatusBoard::new();

  let results: Vec<Result<Ram>> = thread::scope(|scope| {
    let handles: Vec<_> = tests
      .iter()
      .map(|test| scope.spawn(|| run_one(test, &board, pad)))
      .collect();
    handles
      .into_iter()
      .map(|handle| handle.join().expect("test thread panicked"))
      .collect()
  });

  // Step past the status rows before writing the summary.
  println!("{}", "\n".repeat(tests.len() + 1));

  let stderr = io::stderr();
  for (test, result) in tests.iter().zip(&results) {
    match result {
      Ok(ram) if !test.check(ram) => {
        let mut err = stderr.lock();
        writeln!(err, "Results of test {}:", test.name())?;
        test.dump_failures(ram, &mut err)?;
        writeln!(err)?;
      }
      Err(error) => {
        let mut err = stderr.lock();
        writeln!(err, "Results of test {}:", test.name())?;
        writeln!(err, "Error while execute: {}", error)?;
        writeln!(err)?;
      }
      Ok(_) => {}
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const ADD_PROGRAM: &str = "\
.input
MEMORY 4, a
MEMORY 4, b
.output
MEMORY 4, result
.code
MOV result, a
ADD result, result, b
HALT
";

  fn overrides(pairs: &[(&str, u32)]) -> Vec<(String, u32)> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
  }

  #[test]
  fn spec_lines_parse() {
    let spec = TestSpec::parse("prog.nvm:bind.json:input.a=3:output.r=0x2A").unwrap();
    assert_eq!(spec.source, "prog.nvm");
    assert_eq!(spec.binding.as_deref(), Some("bind.json"));
    assert_eq!(
      spec.overrides,
      overrides(&[("input.a", 3), ("output.r", 42)])
    );

    let spec = TestSpec::parse("prog.nvm:").unwrap();
    assert_eq!(spec.binding, None);
    assert!(spec.overrides.is_empty());

    assert!(matches!(TestSpec::parse("prog.nvm"), Err(Error::BadTestSpec)));
    assert!(matches!(
      TestSpec::parse("prog.nvm:b:oops"),
      Err(Error::BadPair(_))
    ));
    assert!(matches!(
      TestSpec::parse("prog.nvm:b:input.a=12teen"),
      Err(Error::BadPair(_))
    ));
  }

  #[test]
  fn passing_test_matches_every_output_label() {
    let test = LoadedTest::from_source(
      "add",
      ADD_PROGRAM,
      None,
      &overrides(&[("input.a", 3), ("input.b", 4), ("output.result", 7)]),
    )
    .unwrap();
    let ram = test.run().unwrap();
    assert!(test.check(&ram));
  }

  #[test]
  fn failing_test_reports_diffs() {
    let test = LoadedTest::from_source(
      "add",
      ADD_PROGRAM,
      None,
      &overrides(&[("input.a", 3), ("input.b", 4), ("output.result", 9)]),
    )
    .unwrap();
    let ram = test.run().unwrap();
    assert!(!test.check(&ram));

    let mut out = Vec::new();
    test.dump_failures(&ram, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("result"));
    assert!(text.contains("got="));
    assert!(text.contains("0x00000007"));
    assert!(text.contains("exp="));
    assert!(text.contains("0x00000009"));
  }

  #[test]
  fn binding_documents_feed_inputs() {
    let test = LoadedTest::from_source(
      "add",
      ADD_PROGRAM,
      Some(r#"{ "input": { "a": 20, "b": "0x16" }, "output": { "result": 42 } }"#),
      &[],
    )
    .unwrap();
    let ram = test.run().unwrap();
    assert!(test.check(&ram));
  }

  #[test]
  fn overrides_after_binding_win() {
    let test = LoadedTest::from_source(
      "add",
      ADD_PROGRAM,
      Some(r#"{ "input": { "a": 1, "b": 1 }, "output": { "result": 9 } }"#),
      &overrides(&[("input.b", 8)]),
    )
    .unwrap();
    let ram = test.run().unwrap();
    assert!(test.check(&ram));
  }

  #[test]
  fn only_input_ranges_are_copied_into_the_fresh_ram() {
    // The expectation behind the output label must not leak into the
    // running RAM, or every test would vacuously pass.
    let test = LoadedTest::from_source(
      "leak",
      ".input\nMEMORY 4, a\n.output\nMEMORY 4, result\n.code\nHALT\n",
      None,
      &overrides(&[("input.a", 5), ("output.result", 7)]),
    )
    .unwrap();
    let ram = test.run().unwrap();
    assert_eq!(ram.read_at(4), Some(5)); // input copied
    assert_eq!(ram.read_at(8), Some(0)); // expectation not copied
    assert!(!test.check(&ram));
  }

  #[test]
  fn bad_override_keys_are_rejected() {
    let plain = |key: &str| {
      LoadedTest::from_source(
        "bad",
        ADD_PROGRAM,
        None,
        &overrides(&[(key, 1)]),
      )
    };
    assert!(matches!(plain("inputa").unwrap_err(), Error::BadOverride));
    assert!(matches!(
      plain("bss.a").unwrap_err(),
      Error::UnknownSection(_)
    ));
    assert!(matches!(
      plain("input.zz").unwrap_err(),
      Error::UnknownLabel { .. }
    ));
  }

  #[test]
  fn empty_text_isolates_as_a_test_error() {
    let test = LoadedTest::from_source(
      "empty",
      ".input\nMEMORY 4, a\n",
      None,
      &[],
    )
    .unwrap();
    assert!(matches!(test.run().unwrap_err(), Error::EmptyText));
  }
}
