//! The payload executor's fixed-width instruction set: `NOOP|ACT|PRE|REF|LOOP`.

use thiserror::Error;

/// Width of a LOOP instruction's `count` field, in bits. Fixed by the
/// hardware ISA.
pub const LOOP_COUNT_BITS: u32 = 21;
/// Width of a LOOP instruction's `jump` field, in bits. Fixed by the hardware
/// ISA.
pub const LOOP_JUMP_BITS: u32 = 13;
/// Width of a NOOP's `timeslice` field, in bits.
const NOOP_TIMESLICE_BITS: u32 = 29;
/// Width of an ACT/PRE/REF instruction's `timeslice` field, in bits.
const TIMESLICE_BITS: u32 = 6;

/// Maximum count value a single LOOP instruction can carry.
pub const LOOP_COUNT_MAX: u32 = (1 << LOOP_COUNT_BITS) - 1;
/// Maximum jump distance (in instructions) a single LOOP instruction can
/// carry.
pub const LOOP_JUMP_MAX: u32 = (1 << LOOP_JUMP_BITS) - 1;
/// Maximum timeslice a single NOOP can carry.
pub const NOOP_TIMESLICE_MAX: u32 = (1 << NOOP_TIMESLICE_BITS) - 1;

/// Column-field value meaning "precharge every bank, not just one".
pub const PRECHARGE_ALL_COL: u32 = 1 << 10;

/// A single payload-executor instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Wait `timeslice` cycles doing nothing.
    Noop {
        /// Number of cycles to wait.
        timeslice: u32,
    },
    /// Activate `(bank, row)` and then wait `timeslice` cycles (tRAS).
    Act {
        /// Cycles to hold the row open.
        timeslice: u32,
        /// Bank to activate.
        bank: u32,
        /// Row to activate.
        row: u32,
    },
    /// Precharge `col` (or every bank, if `col == PRECHARGE_ALL_COL`) and
    /// wait `timeslice` cycles (tRP).
    Pre {
        /// Cycles to wait for precharge to complete.
        timeslice: u32,
        /// Column field; `PRECHARGE_ALL_COL` means "precharge all".
        col: u32,
    },
    /// Issue a refresh and wait `timeslice` cycles (tRFC).
    Ref {
        /// Cycles to wait for the refresh to complete.
        timeslice: u32,
    },
    /// Repeat the previous `jump` instructions `count` more times.
    Loop {
        /// Number of additional repetitions of the loop body.
        count: u32,
        /// Number of instructions, counting backwards from this one, that
        /// make up the loop body.
        jump: u32,
    },
}

/// An instruction or address field did not fit in its hardware bit-width.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// A NOOP/ACT/PRE/REF timeslice exceeded its field width.
    #[error("timeslice {value} exceeds field width ({max} max)")]
    TimesliceOutOfRange {
        /// The offending value.
        value: u32,
        /// The field's maximum representable value.
        max: u32,
    },
    /// A LOOP `count` exceeded `LOOP_COUNT_MAX`.
    #[error("loop count {0} exceeds {LOOP_COUNT_MAX}")]
    CountOutOfRange(u32),
    /// A LOOP `jump` exceeded `LOOP_JUMP_MAX`.
    #[error("loop jump {0} exceeds {LOOP_JUMP_MAX}")]
    JumpOutOfRange(u32),
    /// A bank index exceeded the configured `bankbits`.
    #[error("bank {bank} does not fit in {bankbits} bits")]
    BankOutOfRange {
        /// The offending bank index.
        bank: u32,
        /// Number of bank address bits configured.
        bankbits: u32,
    },
}

/// Opcode tag occupying the instruction word's high bit-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
enum OpTag {
    Noop = 0,
    Act = 1,
    Pre = 2,
    Ref = 3,
    Loop = 4,
}

/// Encodes [`Instruction`]s into machine words, parameterized by the number
/// of bank address bits (needed to size the ACT address field).
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    bankbits: u32,
}

impl Encoder {
    /// Builds an encoder for DRAM with `bankbits` bank-address bits.
    pub fn new(bankbits: u32) -> Self {
        Self { bankbits }
    }

    /// Constructs and validates a NOOP, rejecting an out-of-range timeslice.
    pub fn noop(&self, timeslice: u32) -> Result<Instruction, EncodeError> {
        check_timeslice(timeslice, NOOP_TIMESLICE_MAX)?;
        Ok(Instruction::Noop { timeslice })
    }

    /// Constructs and validates an ACT, rejecting an out-of-range timeslice
    /// or bank.
    pub fn act(&self, timeslice: u32, bank: u32, row: u32) -> Result<Instruction, EncodeError> {
        check_timeslice(timeslice, (1 << TIMESLICE_BITS) - 1)?;
        self.check_bank(bank)?;
        Ok(Instruction::Act { timeslice, bank, row })
    }

    /// Constructs and validates a PRE, rejecting an out-of-range timeslice.
    pub fn pre(&self, timeslice: u32, col: u32) -> Result<Instruction, EncodeError> {
        check_timeslice(timeslice, (1 << TIMESLICE_BITS) - 1)?;
        Ok(Instruction::Pre { timeslice, col })
    }

    /// Constructs and validates a REF, rejecting an out-of-range timeslice.
    pub fn refresh(&self, timeslice: u32) -> Result<Instruction, EncodeError> {
        check_timeslice(timeslice, (1 << TIMESLICE_BITS) - 1)?;
        Ok(Instruction::Ref { timeslice })
    }

    /// Constructs and validates a LOOP, rejecting an out-of-range count or
    /// jump.
    pub fn loop_back(&self, count: u32, jump: u32) -> Result<Instruction, EncodeError> {
        if count > LOOP_COUNT_MAX {
            return Err(EncodeError::CountOutOfRange(count));
        }
        if jump > LOOP_JUMP_MAX {
            return Err(EncodeError::JumpOutOfRange(jump));
        }
        Ok(Instruction::Loop { count, jump })
    }

    fn check_bank(&self, bank: u32) -> Result<(), EncodeError> {
        if self.bankbits < 32 && bank >= (1 << self.bankbits) {
            return Err(EncodeError::BankOutOfRange { bank, bankbits: self.bankbits });
        }
        Ok(())
    }

    /// Packs an address field for an ACT/PRE instruction. `col =
    /// PRECHARGE_ALL_COL` encodes "precharge all" and is only meaningful for
    /// PRE.
    pub fn address(&self, bank: u32, row: u32, col: u32) -> u32 {
        (bank << (self.bankbits + 16)) | (row << 16) | col
    }

    /// Serializes a sequence of instructions into a flat `u32` word stream,
    /// one word per instruction, for upload-size accounting and debug dumps.
    ///
    /// `count`'s full `LOOP_COUNT_BITS` range does not fit alongside
    /// `jump`'s `LOOP_JUMP_BITS` in a 32-bit word together with a 3-bit
    /// opcode tag (21+13+3 = 37 > 32), so large `count` values are saturated
    /// to what fits in this dump. That loss is confined to this debug
    /// encoding: [`crate::executor::HardwareExecutor`] hands the transport
    /// the structured [`Instruction`] list directly
    /// ([`crate::executor::Transport::upload_payload`]) and never re-decodes
    /// this word stream, so a full-range LOOP count still reaches hardware
    /// intact.
    pub fn encode(&self, instructions: &[Instruction]) -> Vec<u32> {
        instructions.iter().map(|i| self.encode_one(i)).collect()
    }

    fn encode_one(&self, instruction: &Instruction) -> u32 {
        const OP_SHIFT: u32 = 29;
        match *instruction {
            Instruction::Noop { timeslice } => ((OpTag::Noop as u32) << OP_SHIFT) | timeslice,
            Instruction::Act { timeslice, bank, row } => {
                let addr = self.address(bank, row, 0);
                ((OpTag::Act as u32) << OP_SHIFT) | (timeslice << 23) | (addr & 0x7F_FFFF)
            }
            Instruction::Pre { timeslice, col } => {
                ((OpTag::Pre as u32) << OP_SHIFT) | (timeslice << 23) | (col & 0x7F_FFFF)
            }
            Instruction::Ref { timeslice } => ((OpTag::Ref as u32) << OP_SHIFT) | timeslice,
            Instruction::Loop { count, jump } => {
                let count_field_bits = OP_SHIFT - LOOP_JUMP_BITS;
                let count_max_representable = (1u32 << count_field_bits) - 1;
                let count = count.min(count_max_representable);
                ((OpTag::Loop as u32) << OP_SHIFT) | (count << LOOP_JUMP_BITS) | jump
            }
        }
    }
}

fn check_timeslice(value: u32, max: u32) -> Result<(), EncodeError> {
    if value > max {
        return Err(EncodeError::TimesliceOutOfRange { value, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precharge_all_column_is_named_constant() {
        assert_eq!(PRECHARGE_ALL_COL, 1 << 10);
    }

    #[test]
    fn loop_rejects_count_and_jump_overflow() {
        let encoder = Encoder::new(3);
        assert!(encoder.loop_back(LOOP_COUNT_MAX, 0).is_ok());
        assert!(encoder.loop_back(LOOP_COUNT_MAX + 1, 0).is_err());
        assert!(encoder.loop_back(0, LOOP_JUMP_MAX).is_ok());
        assert!(encoder.loop_back(0, LOOP_JUMP_MAX + 1).is_err());
    }

    #[test]
    fn act_rejects_bank_outside_geometry() {
        let encoder = Encoder::new(3);
        assert!(encoder.act(14, 7, 0).is_ok());
        assert!(encoder.act(14, 8, 0).is_err());
    }

    #[test]
    fn encode_produces_one_word_per_instruction() {
        let encoder = Encoder::new(3);
        let instrs = vec![
            encoder.noop(10).unwrap(),
            encoder.act(14, 0, 5).unwrap(),
            encoder.pre(7, PRECHARGE_ALL_COL).unwrap(),
            encoder.refresh(208).unwrap(),
            encoder.loop_back(5, 4).unwrap(),
        ];
        let words = encoder.encode(&instrs);
        assert_eq!(words.len(), 5);
    }
}
