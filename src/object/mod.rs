/*!

  The object model for compiled programs.

  An [`Object`] is a fixed set of five sections, in this order: `text`,
  `ram`, `input`, `output`, `data`. Only `text` holds executable bytes and
  `ram` the full 128-byte initial memory image; `input`, `output`, and
  `data` carry no bytes of their own — they are label tables naming byte
  ranges inside the `ram` image. Labels are metadata, not storage.

  Label tables are ordered by name so the textual dump of an object is
  canonical. Cross-section name lookup scans the sections in their
  declared order, which is also the order the debugger resolves `mem`
  operands in.

*/

pub mod dump;

use std::collections::BTreeMap;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::IntoEnumIterator;
use strum_macros::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};

/// RAM size in bytes; the image is also viewed as 32 little-endian words.
pub const RAM_SIZE: usize = 128;
/// Upper bound on the `text` section.
pub const TEXT_SIZE: usize = 256;

/**
  The five section kinds in their canonical order. The discriminant
  doubles as the index into [`Object::sections`], and the lowercase
  serialization is the name used by dumps, bindings, and override keys.
*/
#[derive(
  StrumDisplay, EnumString, EnumIter,    IntoStaticStr,
  TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,       Eq,          PartialEq,     Debug, Hash
)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum SectionKind {
  Text = 0,
  Ram,
  Input,
  Output,
  Data,
}

/// A named byte range. For labels outside `text` the range lies inside
/// the 128-byte RAM image; `text` labels mark instruction boundaries and
/// have size zero.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Label {
  pub pos: u8,
  pub size: u8,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Section {
  pub kind: SectionKind,
  pub data: Vec<u8>,
  pub labels: BTreeMap<String, Label>,
}

impl Section {
  pub fn new(kind: SectionKind) -> Section {
    Section {
      kind,
      data: Vec::new(),
      labels: BTreeMap::new(),
    }
  }

  pub fn name(&self) -> &'static str {
    self.kind.into()
  }
}

/// An owned compiled program: five sections in canonical order.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Object {
  sections: [Section; 5],
}

impl Default for Object {
  fn default() -> Self {
    Object::new()
  }
}

impl Object {
  pub fn new() -> Object {
    Object {
      sections: [
        Section::new(SectionKind::Text),
        Section::new(SectionKind::Ram),
        Section::new(SectionKind::Input),
        Section::new(SectionKind::Output),
        Section::new(SectionKind::Data),
      ],
    }
  }

  pub fn section(&self, kind: SectionKind) -> &Section {
    &self.sections[u8::from(kind) as usize]
  }

  pub fn section_mut(&mut self, kind: SectionKind) -> &mut Section {
    &mut self.sections[u8::from(kind) as usize]
  }

  /// The sections in canonical order.
  pub fn sections(&self) -> impl Iterator<Item = &Section> {
    self.sections.iter()
  }

  pub fn text(&self) -> &Section {
    self.section(SectionKind::Text)
  }

  pub fn ram(&self) -> &Section {
    self.section(SectionKind::Ram)
  }

  /// Resolves a label name by scanning the sections in declared order;
  /// the first match wins.
  pub fn find_label(&self, name: &str) -> Option<(SectionKind, Label)> {
    for section in &self.sections {
      if let Some(label) = section.labels.get(name) {
        return Some((section.kind, *label));
      }
    }
    None
  }

  /**
    All labels of every section merged into one table. When a name occurs
    in more than one section the later section wins, matching the scan
    order the original toolchain used for its listing annotations.
  */
  pub fn all_labels(&self) -> BTreeMap<String, Label> {
    let mut labels = BTreeMap::new();
    for kind in SectionKind::iter() {
      for (name, label) in &self.section(kind).labels {
        labels.insert(name.clone(), *label);
      }
    }
    labels
  }
}
