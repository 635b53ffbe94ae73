/*!

  The test runner front end. Each repeatable `-i` takes
  `<source>:<binding>[:<section>.<label>=<value>]*`, where the binding
  part may be empty. Tests run concurrently, one thread each, updating
  their status lines in place; failing tests print per-output-label
  diffs once every test has finished.

*/

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use nanovm::harness::{run_tests, LoadedTest, TestSpec};

#[derive(Parser)]
#[command(name = "nvmtest", about = "NanoVM test harness")]
struct Args {
  /// Test spec: <source>:<binding>[:<section>.<label>=<value>]*
  #[arg(short = 'i', value_name = "spec", required = true)]
  specs: Vec<String>,
}

fn load(args: &Args) -> Result<Vec<LoadedTest>> {
  let mut tests = Vec::new();
  for spec in &args.specs {
    let spec = TestSpec::parse(spec)?;
    tests.push(LoadedTest::load(&spec)?);
  }
  Ok(tests)
}

fn main() -> ExitCode {
  let args = Args::parse();

  let tests = match load(&args) {
    Ok(tests) => tests,
    Err(error) => {
      eprintln!("Error while process args: {}", error);
      return ExitCode::FAILURE;
    }
  };

  match run_tests(&tests) {
    Ok(())     => ExitCode::SUCCESS,
    Err(error) => {
      eprintln!("Error: {}", error);
      ExitCode::FAILURE
    }
  }
}
