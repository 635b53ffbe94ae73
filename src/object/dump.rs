/*!

  The textual serialization of an [`Object`]: one line per section, in
  canonical order,

  ```text
  <name> <HEXBYTE> <HEXBYTE> ... , <ident>=<pos>:<size> ...
  ```

  with a single space standing in for the byte list when the section's
  data is empty. `HEXBYTE` is emitted as two uppercase hex digits (either
  case is accepted on input), label positions and sizes are decimal.
  Labels are emitted in name order and parsed order-insensitively, so
  `parse_object(obj.dump())` reproduces `obj` exactly and dumping a parsed
  canonical dump reproduces the input text.

  The parser rejects any line that does not match the grammar and any
  section name outside the canonical five.

*/

use std::fmt::Write as _;

use nom::{
  branch::alt,
  bytes::complete::take_while_m_n,
  character::complete::{char as one_char, digit1},
  combinator::{all_consuming, map, map_res, opt},
  multi::{many0, many1},
  sequence::{preceded, separated_pair, tuple},
  IResult,
};

use super::{Label, Object, SectionKind, RAM_SIZE, TEXT_SIZE};
use crate::{Error, Result};

impl Object {
  /// Serializes the object into its canonical dump.
  pub fn dump(&self) -> String {
    let mut out = String::new();
    for section in self.sections() {
      out.push_str(section.name());
      for byte in &section.data {
        let _ = write!(out, " {:02X}", byte);
      }
      if section.data.is_empty() {
        out.push(' ');
      }
      out.push(',');
      for (name, label) in &section.labels {
        let _ = write!(out, " {}={}:{}", name, label.pos, label.size);
      }
      out.push('\n');
    }
    out
  }
}

fn ident(input: &str) -> IResult<&str, &str> {
  take_while_m_n(1, 64, |c: char| c.is_alphanumeric() || c == '_')(input)
}

fn hex_byte(input: &str) -> IResult<&str, u8> {
  map_res(
    take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
    |digits| u8::from_str_radix(digits, 16),
  )(input)
}

fn decimal_u8(input: &str) -> IResult<&str, u8> {
  map_res(digit1, str::parse::<u8>)(input)
}

fn label_entry(input: &str) -> IResult<&str, (&str, Label)> {
  map(
    separated_pair(
      ident,
      one_char('='),
      separated_pair(decimal_u8, one_char(':'), decimal_u8),
    ),
    |(name, (pos, size))| (name, Label { pos, size }),
  )(input)
}

type DumpLine<'a> = (&'a str, Vec<u8>, Vec<(&'a str, Label)>);

fn dump_line(input: &str) -> IResult<&str, DumpLine> {
  all_consuming(map(
    tuple((
      ident,
      alt((
        many1(preceded(one_char(' '), hex_byte)),
        map(one_char(' '), |_| Vec::new()),
      )),
      one_char(','),
      many0(preceded(one_char(' '), label_entry)),
      opt(one_char(' ')),
    )),
    |(name, data, _, labels, _)| (name, data, labels),
  ))(input)
}

/// Parses a textual object dump. Lines may arrive in any order; absent
/// sections stay empty.
pub fn parse_object(text: &str) -> Result<Object> {
  let mut object = Object::new();

  for (index, line) in text.lines().enumerate() {
    let line_no = index + 1;
    let (_, (name, data, labels)) = dump_line(line).map_err(|_| {
      Error::DumpParse {
        line: line_no,
        message: format!("malformed section line '{}'", line),
      }
    })?;

    let kind: SectionKind = name
      .parse()
      .map_err(|_| Error::UnknownSection(name.to_string()))?;

    let limit = match kind {
      SectionKind::Text => TEXT_SIZE,
      _                 => RAM_SIZE,
    };
    if data.len() > limit {
      return Err(Error::DumpParse {
        line: line_no,
        message: format!(
          "section {} holds {} bytes, limit {}",
          name,
          data.len(),
          limit
        ),
      });
    }

    let section = object.section_mut(kind);
    section.data = data;
    section.labels.clear();
    for (label_name, label) in labels {
      if kind != SectionKind::Text
        && label.pos as usize + label.size as usize > RAM_SIZE
      {
        return Err(Error::DumpParse {
          line: line_no,
          message: format!(
            "label {} spans {}:{}, past the {}-byte ram image",
            label_name, label.pos, label.size, RAM_SIZE
          ),
        });
      }
      section.labels.insert(label_name.to_string(), label);
    }
  }

  Ok(object)
}
