use anyhow::{Context, Result};

use crate::ir::{Instruction, InstructionKind};
use crate::opcodes;

/// Decode a raw Code attribute array into instructions with absolute branch targets.
pub fn decode_instructions(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let length = opcode_length(code, offset)?;
        if length == 0 || offset + length > code.len() {
            anyhow::bail!("invalid bytecode length at offset {}", offset);
        }
        let kind = decode_kind(code, offset, opcode)
            .with_context(|| format!("decode opcode 0x{opcode:02x} at offset {offset}"))?;
        let opcode = if opcode == opcodes::WIDE {
            code[offset + 1]
        } else {
            opcode
        };
        instructions.push(Instruction {
            offset: offset as u32,
            opcode,
            kind,
        });
        offset += length;
    }
    Ok(instructions)
}

fn decode_kind(code: &[u8], offset: usize, opcode: u8) -> Result<InstructionKind> {
    let kind = match opcode {
        opcodes::BIPUSH => InstructionKind::Push {
            value: read_u8(code, offset + 1)? as i8 as i32,
        },
        opcodes::SIPUSH => InstructionKind::Push {
            value: read_u16(code, offset + 1)? as i16 as i32,
        },
        opcodes::LDC => InstructionKind::Constant {
            index: read_u8(code, offset + 1)? as u16,
        },
        opcodes::LDC_W
        | opcodes::LDC2_W
        | opcodes::GETSTATIC
        | opcodes::PUTSTATIC
        | opcodes::GETFIELD
        | opcodes::PUTFIELD
        | opcodes::INVOKEVIRTUAL
        | opcodes::INVOKESPECIAL
        | opcodes::INVOKESTATIC
        | opcodes::INVOKEINTERFACE
        | opcodes::INVOKEDYNAMIC
        | opcodes::NEW
        | opcodes::ANEWARRAY
        | opcodes::CHECKCAST
        | opcodes::INSTANCEOF => InstructionKind::Constant {
            index: read_u16(code, offset + 1)?,
        },
        opcodes::MULTIANEWARRAY => InstructionKind::MultiANewArray {
            index: read_u16(code, offset + 1)?,
            dimensions: read_u8(code, offset + 3)?,
        },
        opcodes::NEWARRAY => InstructionKind::NewArray {
            element_type: read_u8(code, offset + 1)?,
        },
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            InstructionKind::Variable {
                index: read_u8(code, offset + 1)? as u16,
            }
        }
        opcodes::IINC => InstructionKind::Increment {
            index: read_u8(code, offset + 1)? as u16,
            delta: read_u8(code, offset + 2)? as i8 as i16,
        },
        opcodes::WIDE => {
            let widened = read_u8(code, offset + 1)?;
            let index = read_u16(code, offset + 2)?;
            if widened == opcodes::IINC {
                InstructionKind::Increment {
                    index,
                    delta: read_u16(code, offset + 4)? as i16,
                }
            } else {
                InstructionKind::Variable { index }
            }
        }
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            let delta = read_u16(code, offset + 1)? as i16 as i64;
            InstructionKind::Branch {
                target: branch_target(offset, delta)?,
            }
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            let delta = read_i32(code, offset + 1)? as i64;
            InstructionKind::Branch {
                target: branch_target(offset, delta)?,
            }
        }
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let default = branch_target(offset, read_i32(code, base)? as i64)?;
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let count = (high as i64 - low as i64 + 1).max(0) as usize;
            let mut targets = Vec::with_capacity(count);
            for entry in 0..count {
                let delta = read_i32(code, base + 12 + entry * 4)? as i64;
                targets.push(branch_target(offset, delta)?);
            }
            InstructionKind::Switch { default, targets }
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let default = branch_target(offset, read_i32(code, base)? as i64)?;
            let npairs = read_i32(code, base + 4)?.max(0) as usize;
            let mut targets = Vec::with_capacity(npairs);
            for pair in 0..npairs {
                let delta = read_i32(code, base + 8 + pair * 8 + 4)? as i64;
                targets.push(branch_target(offset, delta)?);
            }
            InstructionKind::Switch { default, targets }
        }
        _ => InstructionKind::Simple,
    };
    Ok(kind)
}

fn branch_target(offset: usize, delta: i64) -> Result<u32> {
    let target = offset as i64 + delta;
    if target < 0 || target > u32::MAX as i64 {
        anyhow::bail!("branch target {} out of range", target);
    }
    Ok(target as u32)
}

/// Instruction length in bytes, including operands.
pub fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        opcodes::BIPUSH => 2,
        opcodes::SIPUSH => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        opcodes::IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa6 => 3,
        opcodes::GOTO | opcodes::JSR => 3,
        opcodes::RET => 2,
        opcodes::TABLESWITCH => tableswitch_length(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb5 => 3,
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        opcodes::NEW => 3,
        opcodes::NEWARRAY => 2,
        opcodes::ANEWARRAY => 3,
        opcodes::ARRAYLENGTH | opcodes::ATHROW => 1,
        opcodes::CHECKCAST | opcodes::INSTANCEOF => 3,
        opcodes::MONITORENTER | opcodes::MONITOREXIT => 1,
        opcodes::WIDE => wide_length(code, offset)?,
        opcodes::MULTIANEWARRAY => 4,
        opcodes::IFNULL | opcodes::IFNONNULL => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        _ => anyhow::bail!("unsupported opcode 0x{:02x}", opcode),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    if count < 0 {
        anyhow::bail!("invalid tableswitch range");
    }
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code
        .get(offset + 1)
        .copied()
        .context("missing wide opcode")?;
    match opcode {
        opcodes::IINC => Ok(6),
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            Ok(4)
        }
        _ => anyhow::bail!("invalid wide opcode 0x{:02x}", opcode),
    }
}

fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u8(code: &[u8], offset: usize) -> Result<u8> {
    code.get(offset).copied().context("bytecode u8 out of bounds")
}

fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .context("bytecode u16 out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let slice = code
        .get(offset..offset + 4)
        .context("bytecode u32 out of bounds")?;
    Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}
