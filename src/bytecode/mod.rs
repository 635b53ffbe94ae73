/*!

  The instruction set and its binary form.

  Instructions are one, two, or three bytes. The top three bits of the
  first byte select one of eight opcode families; the remaining bits of the
  family header and up to two trailing bytes carry the operands. Operands
  come in three widths: 5-bit memory indices (words 0–31 of RAM), 4-bit
  register indices (words 0–15), and immediates of 3, 8, 12, or 20 bits.

  The flat [`Instruction`] enum holds fully decoded operands, one variant
  per distinct operation, so the interpreter and the decompiler can match
  exhaustively instead of re-deriving bit fields. [`binary`] owns the
  encode/decode pair; nothing else in the crate touches instruction bits.

*/

mod binary;
mod instruction;

pub use binary::{decode_instruction, EncodedInstruction};
pub use instruction::{
  Instruction, Mnemonic, Opcode, Operand, OperandClass, OPCODE_SIZES,
};
