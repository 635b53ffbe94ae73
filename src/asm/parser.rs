/*!

  The line grammar of NanoVM assembly. A statement is one of

  ```text
  label:
  .section
  MNEMONIC [arg[, arg]*]
  ```

  where an argument is a decimal or `0x` number, a label name, or the
  literal `.` standing for the statement's own position. `;` starts a
  comment; blank lines are skipped. The driver strips comments and
  whitespace before handing single statements to [`parse_statement`].

*/

use nom::{
  branch::alt,
  bytes::complete::{tag, take_while1},
  character::complete::{char as one_char, digit1, hex_digit1, space0, space1},
  combinator::{all_consuming, map, map_res, opt, value},
  multi::separated_list1,
  sequence::{pair, preceded, separated_pair, terminated},
  IResult,
};

/// One operand as written in the source.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Arg<'a> {
  Number(u32),
  Name(&'a str),
  /// `.` — the statement's own position.
  SelfPos,
}

/// One parsed source statement.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Statement<'a> {
  Label(&'a str),
  Section(&'a str),
  Operation { name: &'a str, args: Vec<Arg<'a>> },
}

fn ident(input: &str) -> IResult<&str, &str> {
  take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn number(input: &str) -> IResult<&str, u32> {
  alt((
    map_res(
      preceded(alt((tag("0x"), tag("0X"))), hex_digit1),
      |digits| u32::from_str_radix(digits, 16),
    ),
    map_res(digit1, str::parse::<u32>),
  ))(input)
}

fn argument(input: &str) -> IResult<&str, Arg> {
  alt((
    map(number, Arg::Number),
    map(ident, Arg::Name),
    value(Arg::SelfPos, one_char('.')),
  ))(input)
}

fn label_statement(input: &str) -> IResult<&str, Statement> {
  map(terminated(ident, one_char(':')), Statement::Label)(input)
}

fn section_statement(input: &str) -> IResult<&str, Statement> {
  map(preceded(one_char('.'), ident), Statement::Section)(input)
}

fn operation_statement(input: &str) -> IResult<&str, Statement> {
  map(
    pair(
      ident,
      opt(preceded(
        space1,
        separated_list1(
          separated_pair(space0, one_char(','), space0),
          argument,
        ),
      )),
    ),
    |(name, args)| {
      Statement::Operation {
        name,
        args: args.unwrap_or_default(),
      }
    },
  )(input)
}

/// Parses one comment-stripped, trimmed, non-empty statement. Numbers win
/// over names, so a digit-leading token is always an immediate.
pub fn parse_statement(input: &str) -> Option<Statement> {
  all_consuming(alt((
    label_statement,
    section_statement,
    operation_statement,
  )))(input)
  .ok()
  .map(|(_, statement)| statement)
}
