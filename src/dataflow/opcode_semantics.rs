use anyhow::Result;

use crate::dataflow::frame::{Frame, Join};
use crate::ir::{Instruction, InstructionKind};
use crate::opcodes;

/// Analysis-supplied value constructors used by shared opcode semantics.
pub trait ValueDomain<V> {
    fn scalar_value(&self) -> V;
    fn null_value(&self) -> V;
    fn new_instance_value(&self) -> V;
    /// Value loaded from the heap: an array element or a field.
    fn external_value(&self) -> V;
}

/// Result of attempting shared opcode execution.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum ApplyOutcome {
    Applied,
    NotHandled,
}

/// Analysis hook run before the default semantics. Opcodes whose effect
/// depends on the constant pool (`ldc`, field access, invocations) are left
/// to the hook.
pub trait SemanticsHooks<V> {
    fn pre_apply(&mut self, _frame: &mut Frame<V>, _instruction: &Instruction) -> Result<ApplyOutcome> {
        Ok(ApplyOutcome::NotHandled)
    }
}

/// Applies table-driven semantics, giving `hooks` the first chance.
pub fn apply_semantics<V, D, H>(
    frame: &mut Frame<V>,
    instruction: &Instruction,
    domain: &D,
    hooks: &mut H,
) -> Result<ApplyOutcome>
where
    V: Join,
    D: ValueDomain<V>,
    H: SemanticsHooks<V> + ?Sized,
{
    if hooks.pre_apply(frame, instruction)? == ApplyOutcome::Applied {
        return Ok(ApplyOutcome::Applied);
    }
    let Some(effect) = decode(instruction.opcode) else {
        return Ok(ApplyOutcome::NotHandled);
    };
    apply_effect(frame, instruction, domain, effect)?;
    Ok(ApplyOutcome::Applied)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Effect {
    Noop,
    Push { kind: PushKind, size: usize },
    LoadLocal { slot: LocalSlot, size: usize },
    StoreLocal { slot: LocalSlot, size: usize },
    Pop(usize),
    /// Duplicates the top `count` slots below the next `depth` slots.
    Dup { count: usize, depth: usize },
    Swap,
    PopAndPush { pop: usize, kind: PushKind, size: usize },
    MultiANewArray,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PushKind {
    Scalar,
    Null,
    New,
    External,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LocalSlot {
    Operand,
    Fixed(usize),
}

/// Slot sizes for the int, long, float, double, reference opcode groups.
const TYPE_SIZES: [usize; 5] = [1, 2, 1, 2, 1];

fn apply_effect<V, D>(
    frame: &mut Frame<V>,
    instruction: &Instruction,
    domain: &D,
    effect: Effect,
) -> Result<()>
where
    V: Join,
    D: ValueDomain<V>,
{
    match effect {
        Effect::Noop => {}
        Effect::Push { kind, size } => frame.push_sized(push_value(domain, kind), size),
        Effect::LoadLocal { slot, size } => {
            let index = local_index(instruction, slot)?;
            for offset in 0..size {
                let value = frame.load(index + offset)?;
                frame.push(value);
            }
        }
        Effect::StoreLocal { slot, size } => {
            let index = local_index(instruction, slot)?;
            let values = frame.pop_n(size)?;
            for (offset, value) in values.into_iter().enumerate() {
                frame.store(index + offset, value, 1)?;
            }
        }
        Effect::Pop(count) => {
            frame.pop_n(count)?;
        }
        Effect::Dup { count, depth } => {
            let values = frame.pop_n(count + depth)?;
            let top = values[depth..].to_vec();
            for value in top.into_iter().chain(values) {
                frame.push(value);
            }
        }
        Effect::Swap => {
            let right = frame.pop()?;
            let left = frame.pop()?;
            frame.push(right);
            frame.push(left);
        }
        Effect::PopAndPush { pop, kind, size } => {
            frame.pop_n(pop)?;
            frame.push_sized(push_value(domain, kind), size);
        }
        Effect::MultiANewArray => {
            let InstructionKind::MultiANewArray { dimensions, .. } = instruction.kind else {
                anyhow::bail!("multianewarray without dimensions operand");
            };
            frame.pop_n(dimensions as usize)?;
            frame.push(domain.new_instance_value());
        }
    }
    Ok(())
}

fn push_value<V, D: ValueDomain<V>>(domain: &D, kind: PushKind) -> V {
    match kind {
        PushKind::Scalar => domain.scalar_value(),
        PushKind::Null => domain.null_value(),
        PushKind::New => domain.new_instance_value(),
        PushKind::External => domain.external_value(),
    }
}

fn local_index(instruction: &Instruction, slot: LocalSlot) -> Result<usize> {
    match (slot, &instruction.kind) {
        (LocalSlot::Fixed(index), _) => Ok(index),
        (LocalSlot::Operand, InstructionKind::Variable { index }) => Ok(*index as usize),
        _ => anyhow::bail!(
            "opcode 0x{:02x} at offset {} has no local variable operand",
            instruction.opcode,
            instruction.offset
        ),
    }
}

fn scalar(size: usize) -> Effect {
    Effect::Push {
        kind: PushKind::Scalar,
        size,
    }
}

fn compute(pop: usize, size: usize) -> Effect {
    Effect::PopAndPush {
        pop,
        kind: PushKind::Scalar,
        size,
    }
}

fn decode(opcode: u8) -> Option<Effect> {
    let effect = match opcode {
        opcodes::NOP => Effect::Noop,
        opcodes::ACONST_NULL => Effect::Push {
            kind: PushKind::Null,
            size: 1,
        },
        opcodes::ICONST_M1..=opcodes::ICONST_5
        | opcodes::FCONST_0..=opcodes::FCONST_2
        | opcodes::BIPUSH
        | opcodes::SIPUSH => scalar(1),
        opcodes::LCONST_0 | opcodes::LCONST_1 | opcodes::DCONST_0 | opcodes::DCONST_1 => scalar(2),
        opcodes::ILOAD..=opcodes::ALOAD => Effect::LoadLocal {
            slot: LocalSlot::Operand,
            size: TYPE_SIZES[(opcode - opcodes::ILOAD) as usize],
        },
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let relative = (opcode - opcodes::ILOAD_0) as usize;
            Effect::LoadLocal {
                slot: LocalSlot::Fixed(relative % 4),
                size: TYPE_SIZES[relative / 4],
            }
        }
        opcodes::ISTORE..=opcodes::ASTORE => Effect::StoreLocal {
            slot: LocalSlot::Operand,
            size: TYPE_SIZES[(opcode - opcodes::ISTORE) as usize],
        },
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let relative = (opcode - opcodes::ISTORE_0) as usize;
            Effect::StoreLocal {
                slot: LocalSlot::Fixed(relative % 4),
                size: TYPE_SIZES[relative / 4],
            }
        }
        opcodes::IALOAD | opcodes::FALOAD | opcodes::BALOAD | opcodes::CALOAD | opcodes::SALOAD => {
            compute(2, 1)
        }
        opcodes::LALOAD | opcodes::DALOAD => compute(2, 2),
        opcodes::AALOAD => Effect::PopAndPush {
            pop: 2,
            kind: PushKind::External,
            size: 1,
        },
        opcodes::LASTORE | opcodes::DASTORE => Effect::Pop(4),
        opcodes::IASTORE..=opcodes::SASTORE => Effect::Pop(3),
        opcodes::POP => Effect::Pop(1),
        opcodes::POP2 => Effect::Pop(2),
        opcodes::DUP => Effect::Dup { count: 1, depth: 0 },
        opcodes::DUP_X1 => Effect::Dup { count: 1, depth: 1 },
        opcodes::DUP_X2 => Effect::Dup { count: 1, depth: 2 },
        opcodes::DUP2 => Effect::Dup { count: 2, depth: 0 },
        opcodes::DUP2_X1 => Effect::Dup { count: 2, depth: 1 },
        opcodes::DUP2_X2 => Effect::Dup { count: 2, depth: 2 },
        opcodes::SWAP => Effect::Swap,
        // add, sub, mul, div, rem cycle through int, long, float, double.
        opcodes::IADD..=opcodes::DREM => {
            let size = TYPE_SIZES[((opcode - opcodes::IADD) % 4) as usize];
            compute(2 * size, size)
        }
        opcodes::INEG..=opcodes::DNEG => {
            let size = TYPE_SIZES[((opcode - opcodes::INEG) % 4) as usize];
            compute(size, size)
        }
        // Shift distance is always an int.
        opcodes::ISHL | opcodes::ISHR | opcodes::IUSHR => compute(2, 1),
        opcodes::LSHL | opcodes::LSHR | opcodes::LUSHR => compute(3, 2),
        opcodes::IAND | opcodes::IOR | opcodes::IXOR => compute(2, 1),
        opcodes::LAND | opcodes::LOR | opcodes::LXOR => compute(4, 2),
        opcodes::IINC => Effect::Noop,
        opcodes::I2L | opcodes::I2D | opcodes::F2L | opcodes::F2D => compute(1, 2),
        opcodes::I2F | opcodes::F2I | opcodes::I2B | opcodes::I2C | opcodes::I2S => compute(1, 1),
        opcodes::L2I | opcodes::L2F | opcodes::D2I | opcodes::D2F => compute(2, 1),
        opcodes::L2D | opcodes::D2L => compute(2, 2),
        opcodes::LCMP | opcodes::DCMPL | opcodes::DCMPG => compute(4, 1),
        opcodes::FCMPL | opcodes::FCMPG => compute(2, 1),
        opcodes::IFEQ..=opcodes::IFLE
        | opcodes::IFNULL
        | opcodes::IFNONNULL
        | opcodes::TABLESWITCH
        | opcodes::LOOKUPSWITCH => Effect::Pop(1),
        opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => Effect::Pop(2),
        opcodes::GOTO | opcodes::GOTO_W | opcodes::RET => Effect::Noop,
        // Return address.
        opcodes::JSR | opcodes::JSR_W => scalar(1),
        opcodes::IRETURN | opcodes::FRETURN | opcodes::ARETURN => Effect::Pop(1),
        opcodes::LRETURN | opcodes::DRETURN => Effect::Pop(2),
        opcodes::RETURN => Effect::Noop,
        opcodes::NEW => Effect::Push {
            kind: PushKind::New,
            size: 1,
        },
        opcodes::NEWARRAY | opcodes::ANEWARRAY => Effect::PopAndPush {
            pop: 1,
            kind: PushKind::New,
            size: 1,
        },
        opcodes::ARRAYLENGTH | opcodes::INSTANCEOF => compute(1, 1),
        opcodes::ATHROW | opcodes::MONITORENTER | opcodes::MONITOREXIT => Effect::Pop(1),
        // The cast result is the same reference.
        opcodes::CHECKCAST => Effect::Noop,
        opcodes::MULTIANEWARRAY => Effect::MultiANewArray,
        _ => return None,
    };
    Some(effect)
}
