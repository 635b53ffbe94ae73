/*!

  The embedded assembler.

  The original toolchain reached an out-of-process assembler through a
  file transport; here the same text → object transformation runs
  in-process behind the [`Assembler`] trait, so the transport could be
  slotted back in without touching any caller.

  Assembly is laid out in two memory regions. The 256-byte `text` region
  holds the instructions of the `.text` (alias `.code`) section. The
  128-byte RAM image is composed of four sub-regions in fixed order:
  the predefined 4-byte `lr` word at offset 0, then the fragments of
  `.input`, `.output`, `.data`, and `.ram`, in that order regardless of
  the order the sections appear in the source. `MEMORY size[, name]`
  reserves zeroed bytes in the current section and optionally labels
  them; a bare `name:` labels the current position.

  Operands resolve in a single namespace: register-class operands take a
  label's word index (`position / 4`), code-class operands its byte
  position, and `.` the statement's own position. `MOV a, b` expands to
  `LOAD_OP b; STORE_OP a`, and `LOAD1 v` to `LOAD_HIGH v>>12;
  LOAD_LOW v&0xFFF`.

*/

mod parser;

pub use parser::{Arg, Statement};

use std::collections::BTreeMap;

use crate::bytecode::{Instruction, Mnemonic, OperandClass};
use crate::object::{Label, Object, SectionKind, RAM_SIZE, TEXT_SIZE};
use crate::{Error, Result};

/// The text → object boundary. The shipped implementation assembles
/// in-process; an adapter around an external compiler would implement
/// the same trait.
pub trait Assembler {
  fn assemble(&self, source: &str) -> Result<Object>;
}

pub struct NativeAssembler;

impl Assembler for NativeAssembler {
  fn assemble(&self, source: &str) -> Result<Object> {
    Assembly::parse(source)?.link()
  }
}

/// The operand classes of a mnemonic, in assembly order.
fn operand_classes(mnemonic: Mnemonic) -> &'static [OperandClass] {
  use OperandClass::{Code, Const, Register};
  match mnemonic {
    Mnemonic::LoadOp | Mnemonic::StoreOp => &[Register],
    Mnemonic::Jl | Mnemonic::Jz          => &[Register, Code],
    Mnemonic::LoadLow                    => &[Code],
    Mnemonic::LoadHigh                   => &[Const],
    Mnemonic::Add
    | Mnemonic::Sub
    | Mnemonic::And
    | Mnemonic::Or                       => &[Register, Register, Register],
    Mnemonic::Lsl | Mnemonic::Lsr        => &[Register, Register, Const],
    Mnemonic::Call                       => &[Register, Register, Register],
    Mnemonic::PcSwp                      => &[Register, Register],
    Mnemonic::Load3                      => &[Const],
    Mnemonic::Halt                       => &[],
  }
}

/// The five assembler sections. `Text` fills the code buffer; the rest
/// are sub-regions of the RAM image in this order, after the `lr` word.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum Region {
  Text,
  Input,
  Output,
  Data,
  Ram,
}

const RAM_REGIONS: [Region; 4] =
  [Region::Input, Region::Output, Region::Data, Region::Ram];

impl Region {
  fn from_name(name: &str) -> Option<Region> {
    match name {
      "text" | "code" => Some(Region::Text),
      "input"         => Some(Region::Input),
      "output"        => Some(Region::Output),
      "data"          => Some(Region::Data),
      "ram"           => Some(Region::Ram),
      _               => None,
    }
  }

  fn section_kind(&self) -> SectionKind {
    match self {
      Region::Text   => SectionKind::Text,
      Region::Input  => SectionKind::Input,
      Region::Output => SectionKind::Output,
      Region::Data   => SectionKind::Data,
      Region::Ram    => SectionKind::Ram,
    }
  }
}

/// A positioned piece of a region: reserved space or one instruction.
enum Fragment<'a> {
  Space {
    name: Option<&'a str>,
    size: usize,
  },
  Instr {
    mnemonic: Mnemonic,
    args: Vec<Arg<'a>>,
    line: usize,
  },
}

impl<'a> Fragment<'a> {
  fn size(&self) -> usize {
    match self {
      Fragment::Space { size, .. } => *size,
      // Sizes are static per mnemonic, so layout can run before operands
      // are resolved.
      Fragment::Instr { mnemonic, .. } => match mnemonic {
        Mnemonic::LoadOp
        | Mnemonic::StoreOp
        | Mnemonic::Load3
        | Mnemonic::Halt     => 1,
        Mnemonic::LoadHigh   => 3,
        _                    => 2,
      },
    }
  }
}

struct Assembly<'a> {
  fragments: [Vec<Fragment<'a>>; 5], // indexed by Region discriminant
}

fn err(line: usize, message: impl Into<String>) -> Error {
  Error::Assembly { line, message: message.into() }
}

impl<'a> Assembly<'a> {
  fn parse(source: &'a str) -> Result<Assembly<'a>> {
    let mut assembly = Assembly {
      fragments: [vec![], vec![], vec![], vec![], vec![]],
    };
    let mut current = Region::Text;

    for (index, raw) in source.lines().enumerate() {
      let line_no = index + 1;
      let line = raw.split(';').next().unwrap_or("").trim();
      if line.is_empty() {
        continue;
      }

      let statement = parser::parse_statement(line)
        .ok_or_else(|| err(line_no, format!("error parse line '{}'", line)))?;

      match statement {
        Statement::Section(name) => {
          current = Region::from_name(&name.to_lowercase())
            .ok_or_else(|| err(line_no, format!("section .{} not found", name)))?;
        }

        Statement::Label(name) => {
          assembly.push(current, Fragment::Space { name: Some(name), size: 0 });
        }

        Statement::Operation { name, args } => {
          assembly.operation(current, name, args, line_no)?;
        }
      }
    }

    Ok(assembly)
  }

  fn push(&mut self, region: Region, fragment: Fragment<'a>) {
    self.fragments[region as usize].push(fragment);
  }

  fn operation(
    &mut self,
    region: Region,
    name: &'a str,
    args: Vec<Arg<'a>>,
    line: usize,
  ) -> Result<()> {
    match name.to_uppercase().as_str() {
      "MEMORY" => {
        let size = match args.first() {
          Some(Arg::Number(n)) => *n as usize,
          _ => return Err(err(line, "MEMORY expects a numeric size")),
        };
        let label = match args.get(1) {
          None                => None,
          Some(Arg::Name(s))  => Some(*s),
          Some(_)             => {
            return Err(err(line, "MEMORY name must be an identifier"));
          }
        };
        if args.len() > 2 {
          return Err(err(line, "MEMORY takes at most two arguments"));
        }
        self.push(region, Fragment::Space { name: label, size });
      }

      "MOV" => {
        if args.len() != 2 {
          return Err(err(line, "args of MOV length not match"));
        }
        self.push(region, Fragment::Instr {
          mnemonic: Mnemonic::LoadOp,
          args: vec![args[1]],
          line,
        });
        self.push(region, Fragment::Instr {
          mnemonic: Mnemonic::StoreOp,
          args: vec![args[0]],
          line,
        });
      }

      "LOAD1" => {
        let value = match args.as_slice() {
          [Arg::Number(n)] => *n,
          _ => return Err(err(line, "LOAD1 expects one numeric value")),
        };
        self.push(region, Fragment::Instr {
          mnemonic: Mnemonic::LoadHigh,
          args: vec![Arg::Number(value >> 12)],
          line,
        });
        self.push(region, Fragment::Instr {
          mnemonic: Mnemonic::LoadLow,
          args: vec![Arg::Number(value & 0xFFF)],
          line,
        });
      }

      upper => {
        let mnemonic: Mnemonic = upper
          .parse()
          .map_err(|_| err(line, format!("instruction {} not found", name)))?;
        if args.len() != operand_classes(mnemonic).len() {
          return Err(err(line, format!("args of {} length not match", upper)));
        }
        self.push(region, Fragment::Instr { mnemonic, args, line });
      }
    }

    Ok(())
  }

  /// Assigns positions, resolves operands, encodes, and builds the
  /// object.
  fn link(&self) -> Result<Object> {
    // Absolute position of every fragment, region by region. The RAM
    // image starts with the predefined lr word.
    let mut positions: [Vec<usize>; 5] = Default::default();
    let mut labels: BTreeMap<&str, usize> = BTreeMap::new();
    labels.insert("lr", 0);

    let mut text_size = 0usize;
    for fragment in &self.fragments[Region::Text as usize] {
      positions[Region::Text as usize].push(text_size);
      if let Fragment::Space { name: Some(name), .. } = fragment {
        labels.insert(*name, text_size);
      }
      text_size += fragment.size();
    }
    if text_size > TEXT_SIZE {
      return Err(Error::RegionOverflow {
        region: "text",
        size: text_size,
        limit: TEXT_SIZE,
      });
    }

    let mut ram_size = 4usize; // lr
    for region in RAM_REGIONS {
      for fragment in &self.fragments[region as usize] {
        positions[region as usize].push(ram_size);
        if let Fragment::Space { name: Some(name), .. } = fragment {
          labels.insert(*name, ram_size);
        }
        ram_size += fragment.size();
      }
    }
    if ram_size > RAM_SIZE {
      return Err(Error::RegionOverflow {
        region: "ram",
        size: ram_size,
        limit: RAM_SIZE,
      });
    }

    // Encode every instruction now that all positions are known. The
    // RAM image accumulates the region buffers in layout order, after
    // the lr word.
    let mut object = Object::new();
    let mut ram_image = vec![0u8; 4];
    for region in [Region::Text, Region::Input, Region::Output, Region::Data, Region::Ram] {
      let mut buffer: Vec<u8> = Vec::new();
      let mut section_labels: BTreeMap<String, Label> = BTreeMap::new();

      for (fragment, &pos) in self.fragments[region as usize]
        .iter()
        .zip(&positions[region as usize])
      {
        match fragment {
          Fragment::Space { name, size } => {
            if let Some(name) = name {
              section_labels.insert(
                name.to_string(),
                Label { pos: pos as u8, size: *size as u8 },
              );
            }
            buffer.resize(buffer.len() + size, 0);
          }

          Fragment::Instr { mnemonic, args, line } => {
            let values = self.resolve(*mnemonic, args, pos, &labels, *line)?;
            let instruction = Instruction::from_mnemonic(*mnemonic, &values)
              .map_err(|message| err(*line, message))?;
            buffer.extend_from_slice(instruction.encode().bytes());
          }
        }
      }

      let section = object.section_mut(region.section_kind());
      section.labels = section_labels;
      match region {
        Region::Text => section.data = buffer,
        // Label tables only; their bytes live in the RAM image.
        _            => ram_image.append(&mut buffer),
      }
    }

    // The full 128-byte initial image. Reserved space is zeroed, so it
    // stays all zeros until a binding or override writes into it.
    ram_image.resize(RAM_SIZE, 0);
    object.section_mut(SectionKind::Ram).data = ram_image;

    // The lr word is addressable by name like any other label.
    object
      .section_mut(SectionKind::Data)
      .labels
      .insert("lr".to_string(), Label { pos: 0, size: 4 });

    Ok(object)
  }

  fn resolve(
    &self,
    mnemonic: Mnemonic,
    args: &[Arg],
    pos: usize,
    labels: &BTreeMap<&str, usize>,
    line: usize,
  ) -> Result<Vec<u32>> {
    let classes = operand_classes(mnemonic);
    let mut values = Vec::with_capacity(args.len());

    for (arg, class) in args.iter().zip(classes) {
      let value = match arg {
        Arg::Number(n) => *n,
        Arg::SelfPos   => (pos / 4) as u32,
        Arg::Name(name) => {
          let position = labels
            .get(name)
            .copied()
            .ok_or_else(|| err(line, format!("label {} not found", name)))?;
          match class {
            OperandClass::Register => (position / 4) as u32,
            _                      => position as u32,
          }
        }
      };
      values.push(value);
    }

    Ok(values)
  }
}
