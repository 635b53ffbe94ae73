/*!

  JSON binding overlays: initial RAM values by label name.

  A binding document is an object mapping section names to objects
  mapping label names to values, e.g.

  ```json
  { "input": { "a": 3, "b": "0x1C" } }
  ```

  Each entry writes its 32-bit value little-endian into the RAM image at
  the label's position. Values are unsigned integers or strings holding a
  decimal or `0x`/`0X` hexadecimal number. Only word-sized labels can be
  bound. Applying the same document twice leaves the image unchanged.

*/

use serde_json::Value;

use crate::object::{Object, SectionKind, RAM_SIZE};
use crate::{Error, Result};

fn parse_value(text: &str) -> Option<u32> {
  if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
    u32::from_str_radix(hex, 16).ok()
  } else {
    text.parse().ok()
  }
}

/// Applies one binding document to the object's RAM image.
pub fn apply_binding(object: &mut Object, content: &str) -> Result<()> {
  let document: Value = serde_json::from_str(content)
    .map_err(|e| Error::Binding(format!("invalid binding document: {}", e)))?;

  let root = document
    .as_object()
    .ok_or_else(|| Error::Binding("root is not an object".to_string()))?;

  for (section_name, entries) in root {
    let kind: SectionKind = section_name
      .parse()
      .map_err(|_| Error::UnknownSection(section_name.clone()))?;

    let entries = entries.as_object().ok_or_else(|| {
      Error::Binding(format!("section {} is not an object", section_name))
    })?;

    for (label_name, value) in entries {
      let full_name = format!("{}.{}", section_name, label_name);

      let number = match value {
        Value::Number(n) => n
          .as_u64()
          .and_then(|v| u32::try_from(v).ok())
          .ok_or_else(|| {
            Error::Binding(format!("type of {} not supported", full_name))
          })?,
        Value::String(s) => parse_value(s).ok_or_else(|| {
          Error::Binding(format!("can't parse value of {}", full_name))
        })?,
        _ => {
          return Err(Error::Binding(format!(
            "type of {} not supported",
            full_name
          )));
        }
      };

      let label = *object
        .section(kind)
        .labels
        .get(label_name)
        .ok_or_else(|| {
          Error::UnknownLabel {
            section: section_name.clone(),
            label: label_name.clone(),
          }
        })?;

      if label.size != 4 {
        return Err(Error::Binding(format!(
          "size {} of {} not supported",
          label.size, full_name
        )));
      }

      let ram = &mut object.section_mut(SectionKind::Ram).data;
      let pos = label.pos as usize;
      if pos + 4 > ram.len() || pos + 4 > RAM_SIZE {
        return Err(Error::Binding(format!(
          "{} lies outside the ram image",
          full_name
        )));
      }
      ram[pos..pos + 4].copy_from_slice(&number.to_le_bytes());
    }
  }

  Ok(())
}
