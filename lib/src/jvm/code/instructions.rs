//! This module contains the AST of JVM bytecode. The representations is slightly different from
//! the usual presentation to make it easier to edit bytecode. For instance:
//!
//!   - The "wide" instruction doesn't show up at all, but instead gets merged into the
//!     instructions it is allowed to modify
//!
//!   - Some instructions (like the branches) get abstracted into one instruction with a field.
//!     This helps with repetitive pattern matches and also simplifies tasks like inverting a
//!     branch condition.
//!
//!   - Instructions that can transfer control (jumps, switches, returns, `athrow`, `jsr`/`ret`)
//!     are kept apart in [`BranchInstruction`], since they are the ones whose encoding depends on
//!     where things end up in the code array.
//!
//! Decoding then re-encoding an instruction always picks the shortest encoding, so `ldc_w` of a
//! small index becomes `ldc` and `wide iload 2` becomes `iload_2`.

use crate::jvm::class_file::{
    ClassConstantIndex, ConstantIndex, Deserialize, FieldRefConstantIndex,
    InvokeDynamicConstantIndex, MethodRefConstantIndex, Serialize,
};
use crate::jvm::{BaseType, Error};
use crate::util::Width;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;
use std::io::{Cursor, ErrorKind, Result};
use std::ops::Not;

/// Non-branching JVM bytecode instruction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    Ldc(ConstantIndex), // covers both `ldc` and `ldc_w`
    Ldc2(ConstantIndex),
    ILoad(u16), // covers `iload`, `iload{0,3}`, and `wide iload`
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16), // covers `istore`, `istore{0,3}`, and `wide istore`
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType), // covers `ishr`, `ishl`, and `iushr`
    LSh(ShiftType), // covers `lshr`, `lshl`, and `lushr`
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16), // covers `iinc` and `wide iinc`
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode), // covers `dcmpl` and `dcmpg`
    GetStatic(FieldRefConstantIndex),
    PutStatic(FieldRefConstantIndex),
    GetField(FieldRefConstantIndex),
    PutField(FieldRefConstantIndex),
    Invoke(InvokeType, MethodRefConstantIndex),
    InvokeDynamic(InvokeDynamicConstantIndex),
    New(ClassConstantIndex),
    NewArray(BaseType),
    ANewArray(ClassConstantIndex),
    ArrayLength,
    CheckCast(ClassConstantIndex),
    InstanceOf(ClassConstantIndex),
    MonitorEnter,
    MonitorExit,
    MultiANewArray(ClassConstantIndex, u8),
}

/// Width of a load or store of a local variable
///
/// The load/store instructions follow the same pattern:
///
///   - short form (0-3) have special bytes
///   - normal form (0-255) use `iload` plus a byte operand
///   - wide form (255-65535) use `wide iload` plus two byte operands
fn load_or_store_width(idx: u16) -> usize {
    match idx {
        0..=3 => 1,
        4..=255 => 2,
        _ => 4,
    }
}

impl Width for Instruction {
    fn width(&self) -> usize {
        match self {
            Instruction::BiPush(_) | Instruction::NewArray(_) => 2,

            Instruction::SiPush(_)
            | Instruction::Ldc2(_)
            | Instruction::GetStatic(_)
            | Instruction::PutStatic(_)
            | Instruction::GetField(_)
            | Instruction::PutField(_)
            | Instruction::Invoke(InvokeType::Virtual, _)
            | Instruction::Invoke(InvokeType::Special, _)
            | Instruction::Invoke(InvokeType::Static, _)
            | Instruction::New(_)
            | Instruction::ANewArray(_)
            | Instruction::CheckCast(_)
            | Instruction::InstanceOf(_) => 3,

            Instruction::MultiANewArray(_, _) => 4,

            Instruction::Invoke(InvokeType::Interface(_), _) | Instruction::InvokeDynamic(_) => 5,

            Instruction::Ldc(ConstantIndex(idx)) => {
                if *idx <= u8::MAX as u16 {
                    2
                } else {
                    3
                }
            }

            Instruction::ILoad(idx)
            | Instruction::LLoad(idx)
            | Instruction::FLoad(idx)
            | Instruction::DLoad(idx)
            | Instruction::ALoad(idx)
            | Instruction::IStore(idx)
            | Instruction::LStore(idx)
            | Instruction::FStore(idx)
            | Instruction::DStore(idx)
            | Instruction::AStore(idx) => load_or_store_width(*idx),

            Instruction::IInc(idx, diff) => match (u8::try_from(*idx), i8::try_from(*diff)) {
                (Ok(_), Ok(_)) => 3,
                _ => 6,
            },

            _ => 1,
        }
    }
}

impl Serialize for Instruction {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        fn serialize_load_or_store<W: WriteBytesExt>(
            idx: u16,
            short_form_start: u8,
            normal_form: u8,
            writer: &mut W,
        ) -> Result<()> {
            match u8::try_from(idx) {
                Ok(n @ 0..=3) => (short_form_start + n).serialize(writer),
                Ok(n) => {
                    normal_form.serialize(writer)?;
                    n.serialize(writer)
                }
                Err(_) => {
                    0xC4u8.serialize(writer)?;
                    normal_form.serialize(writer)?;
                    idx.serialize(writer)
                }
            }
        }

        match self {
            Instruction::Nop => 0x00u8.serialize(writer)?,
            Instruction::AConstNull => 0x01u8.serialize(writer)?,
            Instruction::IConstM1 => 0x02u8.serialize(writer)?,
            Instruction::IConst0 => 0x03u8.serialize(writer)?,
            Instruction::IConst1 => 0x04u8.serialize(writer)?,
            Instruction::IConst2 => 0x05u8.serialize(writer)?,
            Instruction::IConst3 => 0x06u8.serialize(writer)?,
            Instruction::IConst4 => 0x07u8.serialize(writer)?,
            Instruction::IConst5 => 0x08u8.serialize(writer)?,
            Instruction::LConst0 => 0x09u8.serialize(writer)?,
            Instruction::LConst1 => 0x0au8.serialize(writer)?,
            Instruction::FConst0 => 0x0bu8.serialize(writer)?,
            Instruction::FConst1 => 0x0cu8.serialize(writer)?,
            Instruction::FConst2 => 0x0du8.serialize(writer)?,
            Instruction::DConst0 => 0x0eu8.serialize(writer)?,
            Instruction::DConst1 => 0x0fu8.serialize(writer)?,
            Instruction::BiPush(b) => {
                0x10u8.serialize(writer)?;
                b.serialize(writer)?;
            }
            Instruction::SiPush(s) => {
                0x11u8.serialize(writer)?;
                s.serialize(writer)?;
            }
            Instruction::Ldc(ConstantIndex(idx)) => match u8::try_from(*idx) {
                Ok(b) => {
                    0x12u8.serialize(writer)?;
                    b.serialize(writer)?;
                }
                Err(_) => {
                    0x13u8.serialize(writer)?;
                    idx.serialize(writer)?;
                }
            },
            Instruction::Ldc2(ConstantIndex(idx)) => {
                0x14u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::ILoad(idx) => serialize_load_or_store(*idx, 0x1A, 0x15, writer)?,
            Instruction::LLoad(idx) => serialize_load_or_store(*idx, 0x1E, 0x16, writer)?,
            Instruction::FLoad(idx) => serialize_load_or_store(*idx, 0x22, 0x17, writer)?,
            Instruction::DLoad(idx) => serialize_load_or_store(*idx, 0x26, 0x18, writer)?,
            Instruction::ALoad(idx) => serialize_load_or_store(*idx, 0x2A, 0x19, writer)?,
            Instruction::IALoad => 0x2eu8.serialize(writer)?,
            Instruction::LALoad => 0x2fu8.serialize(writer)?,
            Instruction::FALoad => 0x30u8.serialize(writer)?,
            Instruction::DALoad => 0x31u8.serialize(writer)?,
            Instruction::AALoad => 0x32u8.serialize(writer)?,
            Instruction::BALoad => 0x33u8.serialize(writer)?,
            Instruction::CALoad => 0x34u8.serialize(writer)?,
            Instruction::SALoad => 0x35u8.serialize(writer)?,
            Instruction::IStore(idx) => serialize_load_or_store(*idx, 0x3B, 0x36, writer)?,
            Instruction::LStore(idx) => serialize_load_or_store(*idx, 0x3F, 0x37, writer)?,
            Instruction::FStore(idx) => serialize_load_or_store(*idx, 0x43, 0x38, writer)?,
            Instruction::DStore(idx) => serialize_load_or_store(*idx, 0x47, 0x39, writer)?,
            Instruction::AStore(idx) => serialize_load_or_store(*idx, 0x4B, 0x3A, writer)?,
            Instruction::IAStore => 0x4fu8.serialize(writer)?,
            Instruction::LAStore => 0x50u8.serialize(writer)?,
            Instruction::FAStore => 0x51u8.serialize(writer)?,
            Instruction::DAStore => 0x52u8.serialize(writer)?,
            Instruction::AAStore => 0x53u8.serialize(writer)?,
            Instruction::BAStore => 0x54u8.serialize(writer)?,
            Instruction::CAStore => 0x55u8.serialize(writer)?,
            Instruction::SAStore => 0x56u8.serialize(writer)?,
            Instruction::Pop => 0x57u8.serialize(writer)?,
            Instruction::Pop2 => 0x58u8.serialize(writer)?,
            Instruction::Dup => 0x59u8.serialize(writer)?,
            Instruction::DupX1 => 0x5au8.serialize(writer)?,
            Instruction::DupX2 => 0x5bu8.serialize(writer)?,
            Instruction::Dup2 => 0x5cu8.serialize(writer)?,
            Instruction::Dup2X1 => 0x5du8.serialize(writer)?,
            Instruction::Dup2X2 => 0x5eu8.serialize(writer)?,
            Instruction::Swap => 0x5fu8.serialize(writer)?,
            Instruction::IAdd => 0x60u8.serialize(writer)?,
            Instruction::LAdd => 0x61u8.serialize(writer)?,
            Instruction::FAdd => 0x62u8.serialize(writer)?,
            Instruction::DAdd => 0x63u8.serialize(writer)?,
            Instruction::ISub => 0x64u8.serialize(writer)?,
            Instruction::LSub => 0x65u8.serialize(writer)?,
            Instruction::FSub => 0x66u8.serialize(writer)?,
            Instruction::DSub => 0x67u8.serialize(writer)?,
            Instruction::IMul => 0x68u8.serialize(writer)?,
            Instruction::LMul => 0x69u8.serialize(writer)?,
            Instruction::FMul => 0x6au8.serialize(writer)?,
            Instruction::DMul => 0x6bu8.serialize(writer)?,
            Instruction::IDiv => 0x6cu8.serialize(writer)?,
            Instruction::LDiv => 0x6du8.serialize(writer)?,
            Instruction::FDiv => 0x6eu8.serialize(writer)?,
            Instruction::DDiv => 0x6fu8.serialize(writer)?,
            Instruction::IRem => 0x70u8.serialize(writer)?,
            Instruction::LRem => 0x71u8.serialize(writer)?,
            Instruction::FRem => 0x72u8.serialize(writer)?,
            Instruction::DRem => 0x73u8.serialize(writer)?,
            Instruction::INeg => 0x74u8.serialize(writer)?,
            Instruction::LNeg => 0x75u8.serialize(writer)?,
            Instruction::FNeg => 0x76u8.serialize(writer)?,
            Instruction::DNeg => 0x77u8.serialize(writer)?,
            Instruction::ISh(ShiftType::Left) => 0x78u8.serialize(writer)?,
            Instruction::LSh(ShiftType::Left) => 0x79u8.serialize(writer)?,
            Instruction::ISh(ShiftType::ArithmeticRight) => 0x7au8.serialize(writer)?,
            Instruction::LSh(ShiftType::ArithmeticRight) => 0x7bu8.serialize(writer)?,
            Instruction::ISh(ShiftType::LogicalRight) => 0x7cu8.serialize(writer)?,
            Instruction::LSh(ShiftType::LogicalRight) => 0x7du8.serialize(writer)?,
            Instruction::IAnd => 0x7eu8.serialize(writer)?,
            Instruction::LAnd => 0x7fu8.serialize(writer)?,
            Instruction::IOr => 0x80u8.serialize(writer)?,
            Instruction::LOr => 0x81u8.serialize(writer)?,
            Instruction::IXor => 0x82u8.serialize(writer)?,
            Instruction::LXor => 0x83u8.serialize(writer)?,
            Instruction::IInc(idx, diff) => match (u8::try_from(*idx), i8::try_from(*diff)) {
                (Ok(b), Ok(d)) => {
                    0x84u8.serialize(writer)?;
                    b.serialize(writer)?;
                    d.serialize(writer)?;
                }
                _ => {
                    0xc4u8.serialize(writer)?;
                    0x84u8.serialize(writer)?;
                    idx.serialize(writer)?;
                    diff.serialize(writer)?;
                }
            },
            Instruction::I2L => 0x85u8.serialize(writer)?,
            Instruction::I2F => 0x86u8.serialize(writer)?,
            Instruction::I2D => 0x87u8.serialize(writer)?,
            Instruction::L2I => 0x88u8.serialize(writer)?,
            Instruction::L2F => 0x89u8.serialize(writer)?,
            Instruction::L2D => 0x8au8.serialize(writer)?,
            Instruction::F2I => 0x8bu8.serialize(writer)?,
            Instruction::F2L => 0x8cu8.serialize(writer)?,
            Instruction::F2D => 0x8du8.serialize(writer)?,
            Instruction::D2I => 0x8eu8.serialize(writer)?,
            Instruction::D2L => 0x8fu8.serialize(writer)?,
            Instruction::D2F => 0x90u8.serialize(writer)?,
            Instruction::I2B => 0x91u8.serialize(writer)?,
            Instruction::I2C => 0x92u8.serialize(writer)?,
            Instruction::I2S => 0x93u8.serialize(writer)?,
            Instruction::LCmp => 0x94u8.serialize(writer)?,
            Instruction::FCmp(CompareMode::L) => 0x95u8.serialize(writer)?,
            Instruction::FCmp(CompareMode::G) => 0x96u8.serialize(writer)?,
            Instruction::DCmp(CompareMode::L) => 0x97u8.serialize(writer)?,
            Instruction::DCmp(CompareMode::G) => 0x98u8.serialize(writer)?,
            Instruction::GetStatic(idx) => {
                0xb2u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::PutStatic(idx) => {
                0xb3u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::GetField(idx) => {
                0xb4u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::PutField(idx) => {
                0xb5u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::Invoke(InvokeType::Virtual, idx) => {
                0xb6u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::Invoke(InvokeType::Special, idx) => {
                0xb7u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::Invoke(InvokeType::Static, idx) => {
                0xb8u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::Invoke(InvokeType::Interface(cnt), idx) => {
                0xb9u8.serialize(writer)?;
                idx.serialize(writer)?;
                cnt.serialize(writer)?;
                0u8.serialize(writer)?;
            }
            Instruction::InvokeDynamic(idx) => {
                0xbau8.serialize(writer)?;
                idx.serialize(writer)?;
                0u16.serialize(writer)?;
            }
            Instruction::New(idx) => {
                0xbbu8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::NewArray(basetype) => {
                let atype: u8 = match basetype {
                    BaseType::Boolean => 4,
                    BaseType::Char => 5,
                    BaseType::Float => 6,
                    BaseType::Double => 7,
                    BaseType::Byte => 8,
                    BaseType::Short => 9,
                    BaseType::Int => 10,
                    BaseType::Long => 11,
                };
                0xbcu8.serialize(writer)?;
                atype.serialize(writer)?;
            }
            Instruction::ANewArray(idx) => {
                0xbdu8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::ArrayLength => 0xbeu8.serialize(writer)?,
            Instruction::CheckCast(idx) => {
                0xc0u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::InstanceOf(idx) => {
                0xc1u8.serialize(writer)?;
                idx.serialize(writer)?;
            }
            Instruction::MonitorEnter => 0xc2u8.serialize(writer)?,
            Instruction::MonitorExit => 0xc3u8.serialize(writer)?,
            Instruction::MultiANewArray(idx, dimensions) => {
                0xc5u8.serialize(writer)?;
                idx.serialize(writer)?;
                dimensions.serialize(writer)?;
            }
        }
        Ok(())
    }
}

/// Branching JVM bytecode instruction
///
/// The type parameters let us abstract over the representation of
///
///   * __regular relative jump targets__: used in `goto`, `jsr`, and all of the `if*` jumps
///   * __wide relative jump targets__: used in `goto_w`, `jsr_w` and the switches
///
/// In an editable method body both are labels. Shortly before the final serialization step,
/// regular jump targets will become signed 16-bit offsets into the code array and wide jump
/// targets will become signed 32-bit offsets into the code array.
///
/// Conditional jumps fall through to whatever comes next in the code array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchInstruction<Lbl, LblWide> {
    If(OrdComparison, Lbl), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, Lbl), // covers `if_icmpeq`, `if_icmpne`, `if_icmplt`, ... `if_icmple`
    IfACmp(EqComparison, Lbl), // covers `if_acmpeq`, `if_acmpne`
    IfNull(EqComparison, Lbl), // covers `ifnull`, `ifnonnull`
    Goto(Lbl),
    GotoW(LblWide),
    Jsr(Lbl),
    JsrW(LblWide),
    Ret(u16), // covers `ret` and `wide ret`
    TableSwitch {
        /// `default` must be at a multiple of four bytes from the start of the current method, so
        /// there must be a 0-3 inclusive byte padding
        padding: u8,

        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len()`
        default: LblWide,

        /// Value associated with the first jump target
        low: i32,

        /// Jump targets
        targets: Vec<LblWide>,
    },
    LookupSwitch {
        /// `default` must be at a multiple of four bytes from the start of the current method, so
        /// there must be a 0-3 inclusive byte padding
        padding: u8,

        /// Jump target if there is no corresponding key
        default: LblWide,

        /// Jump targets (sorted so that the keys are ascending)
        targets: Vec<(i32, LblWide)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,
}

impl<Lbl, LblWide> BranchInstruction<Lbl, LblWide> {
    /// Can control continue on to the next instruction in the code array?
    pub fn falls_through(&self) -> bool {
        matches!(
            self,
            BranchInstruction::If(_, _)
                | BranchInstruction::IfICmp(_, _)
                | BranchInstruction::IfACmp(_, _)
                | BranchInstruction::IfNull(_, _)
                | BranchInstruction::Jsr(_)
                | BranchInstruction::JsrW(_)
        )
    }

    /// Is this one of the `*return` instructions?
    pub fn is_return(&self) -> bool {
        matches!(
            self,
            BranchInstruction::IReturn
                | BranchInstruction::LReturn
                | BranchInstruction::FReturn
                | BranchInstruction::DReturn
                | BranchInstruction::AReturn
                | BranchInstruction::Return
        )
    }

    pub fn map_labels<Lbl2, LblWide2, E>(
        &self,
        map_label: impl FnOnce(&Lbl) -> std::result::Result<Lbl2, E>,
        map_wide_label: impl Fn(&LblWide) -> std::result::Result<LblWide2, E>,
    ) -> std::result::Result<BranchInstruction<Lbl2, LblWide2>, E> {
        use BranchInstruction::*;

        Ok(match self {
            If(op, lbl) => If(*op, map_label(lbl)?),
            IfICmp(op, lbl) => IfICmp(*op, map_label(lbl)?),
            IfACmp(op, lbl) => IfACmp(*op, map_label(lbl)?),
            IfNull(op, lbl) => IfNull(*op, map_label(lbl)?),
            Goto(lbl) => Goto(map_label(lbl)?),
            GotoW(wide) => GotoW(map_wide_label(wide)?),
            Jsr(lbl) => Jsr(map_label(lbl)?),
            JsrW(wide) => JsrW(map_wide_label(wide)?),
            Ret(idx) => Ret(*idx),
            TableSwitch {
                padding,
                default,
                low,
                targets,
            } => TableSwitch {
                padding: *padding,
                default: map_wide_label(default)?,
                low: *low,
                targets: targets
                    .iter()
                    .map(&map_wide_label)
                    .collect::<std::result::Result<_, E>>()?,
            },
            LookupSwitch {
                padding,
                default,
                targets,
            } => LookupSwitch {
                padding: *padding,
                default: map_wide_label(default)?,
                targets: targets
                    .iter()
                    .map(|(key, lbl)| Ok((*key, map_wide_label(lbl)?)))
                    .collect::<std::result::Result<_, E>>()?,
            },
            IReturn => IReturn,
            LReturn => LReturn,
            FReturn => FReturn,
            DReturn => DReturn,
            AReturn => AReturn,
            Return => Return,
            AThrow => AThrow,
        })
    }

    /// Same instruction, with switch padding updated for an instruction starting at `offset`
    pub fn with_padding_at(mut self, offset: usize) -> Self {
        let new_padding = switch_padding(offset);
        match &mut self {
            BranchInstruction::TableSwitch { padding, .. }
            | BranchInstruction::LookupSwitch { padding, .. } => *padding = new_padding,
            _ => (),
        }
        self
    }
}

impl<Lbl: Copy> BranchInstruction<Lbl, Lbl> {
    /// Every label this instruction can jump to (not counting falling through)
    pub fn jump_targets(&self) -> Vec<Lbl> {
        match self {
            BranchInstruction::If(_, lbl)
            | BranchInstruction::IfICmp(_, lbl)
            | BranchInstruction::IfACmp(_, lbl)
            | BranchInstruction::IfNull(_, lbl)
            | BranchInstruction::Goto(lbl)
            | BranchInstruction::GotoW(lbl)
            | BranchInstruction::Jsr(lbl)
            | BranchInstruction::JsrW(lbl) => vec![*lbl],
            BranchInstruction::TableSwitch {
                default, targets, ..
            } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().copied());
                ts
            }
            BranchInstruction::LookupSwitch {
                default, targets, ..
            } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().map(|(_, target)| *target));
                ts
            }
            _ => vec![],
        }
    }
}

/// Number of padding bytes after a switch opcode found at `offset`
pub fn switch_padding(offset: usize) -> u8 {
    ((4 - (offset + 1) % 4) % 4) as u8
}

impl<Lbl, LblWide> Width for BranchInstruction<Lbl, LblWide> {
    fn width(&self) -> usize {
        match self {
            BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => 1,

            BranchInstruction::Ret(idx) => {
                if *idx <= u8::MAX as u16 {
                    2
                } else {
                    4
                }
            }

            BranchInstruction::Goto(_)
            | BranchInstruction::Jsr(_)
            | BranchInstruction::If(_, _)
            | BranchInstruction::IfICmp(_, _)
            | BranchInstruction::IfACmp(_, _)
            | BranchInstruction::IfNull(_, _) => 3,

            BranchInstruction::GotoW(_) | BranchInstruction::JsrW(_) => 5,

            BranchInstruction::TableSwitch {
                padding, targets, ..
            } => 1 + *padding as usize + 4 * (3 + targets.len()),

            BranchInstruction::LookupSwitch {
                padding, targets, ..
            } => 1 + *padding as usize + 8 * (1 + targets.len()),
        }
    }
}

impl Serialize for BranchInstruction<i16, i32> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        match self {
            BranchInstruction::If(comp, lbl) => {
                let opcode: u8 = match comp {
                    OrdComparison::EQ => 0x99,
                    OrdComparison::NE => 0x9a,
                    OrdComparison::LT => 0x9b,
                    OrdComparison::GE => 0x9c,
                    OrdComparison::GT => 0x9d,
                    OrdComparison::LE => 0x9e,
                };
                opcode.serialize(writer)?;
                lbl.serialize(writer)?;
            }
            BranchInstruction::IfICmp(comp, lbl) => {
                let opcode: u8 = match comp {
                    OrdComparison::EQ => 0x9f,
                    OrdComparison::NE => 0xa0,
                    OrdComparison::LT => 0xa1,
                    OrdComparison::GE => 0xa2,
                    OrdComparison::GT => 0xa3,
                    OrdComparison::LE => 0xa4,
                };
                opcode.serialize(writer)?;
                lbl.serialize(writer)?;
            }
            BranchInstruction::IfACmp(comp, lbl) => {
                let opcode: u8 = match comp {
                    EqComparison::EQ => 0xa5,
                    EqComparison::NE => 0xa6,
                };
                opcode.serialize(writer)?;
                lbl.serialize(writer)?;
            }
            BranchInstruction::Goto(lbl) => {
                0xa7u8.serialize(writer)?;
                lbl.serialize(writer)?;
            }
            BranchInstruction::Jsr(lbl) => {
                0xa8u8.serialize(writer)?;
                lbl.serialize(writer)?;
            }
            BranchInstruction::Ret(idx) => match u8::try_from(*idx) {
                Ok(b) => {
                    0xa9u8.serialize(writer)?;
                    b.serialize(writer)?;
                }
                Err(_) => {
                    0xc4u8.serialize(writer)?;
                    0xa9u8.serialize(writer)?;
                    idx.serialize(writer)?;
                }
            },
            BranchInstruction::TableSwitch {
                padding,
                default,
                low,
                targets,
            } => {
                0xaau8.serialize(writer)?;
                for _ in 0..*padding {
                    0x00u8.serialize(writer)?;
                }
                default.serialize(writer)?;
                low.serialize(writer)?;
                (low + targets.len() as i32 - 1).serialize(writer)?;
                for target in targets {
                    target.serialize(writer)?;
                }
            }
            BranchInstruction::LookupSwitch {
                padding,
                default,
                targets,
            } => {
                0xabu8.serialize(writer)?;
                for _ in 0..*padding {
                    0x00u8.serialize(writer)?;
                }
                default.serialize(writer)?;
                (targets.len() as i32).serialize(writer)?;
                for (key, target) in targets {
                    key.serialize(writer)?;
                    target.serialize(writer)?;
                }
            }
            BranchInstruction::IReturn => 0xacu8.serialize(writer)?,
            BranchInstruction::LReturn => 0xadu8.serialize(writer)?,
            BranchInstruction::FReturn => 0xaeu8.serialize(writer)?,
            BranchInstruction::DReturn => 0xafu8.serialize(writer)?,
            BranchInstruction::AReturn => 0xb0u8.serialize(writer)?,
            BranchInstruction::Return => 0xb1u8.serialize(writer)?,
            BranchInstruction::AThrow => 0xbfu8.serialize(writer)?,
            BranchInstruction::IfNull(comp, lbl) => {
                let opcode: u8 = match comp {
                    EqComparison::EQ => 0xc6,
                    EqComparison::NE => 0xc7,
                };
                opcode.serialize(writer)?;
                lbl.serialize(writer)?;
            }
            BranchInstruction::GotoW(lbl_ext) => {
                0xc8u8.serialize(writer)?;
                lbl_ext.serialize(writer)?;
            }
            BranchInstruction::JsrW(lbl_ext) => {
                0xc9u8.serialize(writer)?;
                lbl_ext.serialize(writer)?;
            }
        }
        Ok(())
    }
}

/// Instruction read out of a code array
///
/// Branch targets are absolute offsets into the code array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodedInstruction {
    Instruction(Instruction),
    Branch(BranchInstruction<usize, usize>),
}

impl DecodedInstruction {
    /// Decode the instruction starting at `offset`, and return it along with the offset of the
    /// following instruction
    pub fn decode(code: &[u8], offset: usize) -> std::result::Result<(Self, usize), Error> {
        let mut reader = Cursor::new(code);
        reader.set_position(offset as u64);
        let decoded = decode_at(&mut reader, offset).map_err(|err| {
            Error::MalformedClass(format!("bad instruction at offset {}: {}", offset, err))
        })?;
        Ok((decoded, reader.position() as usize))
    }
}

fn invalid_data(message: String) -> std::io::Error {
    std::io::Error::new(ErrorKind::InvalidData, message)
}

/// Absolute target of a jump found at `base`
fn jump_target(base: usize, relative: i32) -> Result<usize> {
    let target = base as i64 + relative as i64;
    usize::try_from(target).map_err(|_| invalid_data(format!("jump to {}", target)))
}

fn decode_at<R: ReadBytesExt>(reader: &mut R, offset: usize) -> Result<DecodedInstruction> {
    use BranchInstruction as B;
    use DecodedInstruction::{Branch, Instruction as Insn};
    use Instruction as I;

    let opcode = u8::deserialize(reader)?;
    let short_jump = |reader: &mut R| -> Result<usize> {
        jump_target(offset, i16::deserialize(reader)? as i32)
    };
    let wide_jump =
        |reader: &mut R| -> Result<usize> { jump_target(offset, i32::deserialize(reader)?) };

    let decoded = match opcode {
        0x00 => Insn(I::Nop),
        0x01 => Insn(I::AConstNull),
        0x02 => Insn(I::IConstM1),
        0x03 => Insn(I::IConst0),
        0x04 => Insn(I::IConst1),
        0x05 => Insn(I::IConst2),
        0x06 => Insn(I::IConst3),
        0x07 => Insn(I::IConst4),
        0x08 => Insn(I::IConst5),
        0x09 => Insn(I::LConst0),
        0x0a => Insn(I::LConst1),
        0x0b => Insn(I::FConst0),
        0x0c => Insn(I::FConst1),
        0x0d => Insn(I::FConst2),
        0x0e => Insn(I::DConst0),
        0x0f => Insn(I::DConst1),
        0x10 => Insn(I::BiPush(i8::deserialize(reader)?)),
        0x11 => Insn(I::SiPush(i16::deserialize(reader)?)),
        0x12 => Insn(I::Ldc(ConstantIndex(u8::deserialize(reader)? as u16))),
        0x13 => Insn(I::Ldc(ConstantIndex::deserialize(reader)?)),
        0x14 => Insn(I::Ldc2(ConstantIndex::deserialize(reader)?)),
        0x15..=0x19 | 0x36..=0x3a => {
            let idx = u8::deserialize(reader)? as u16;
            Insn(local_access(opcode, idx)?)
        }
        0x1a..=0x2d => {
            let kind = (opcode - 0x1a) / 4;
            Insn(local_access(0x15 + kind, ((opcode - 0x1a) % 4) as u16)?)
        }
        0x2e => Insn(I::IALoad),
        0x2f => Insn(I::LALoad),
        0x30 => Insn(I::FALoad),
        0x31 => Insn(I::DALoad),
        0x32 => Insn(I::AALoad),
        0x33 => Insn(I::BALoad),
        0x34 => Insn(I::CALoad),
        0x35 => Insn(I::SALoad),
        0x3b..=0x4e => {
            let kind = (opcode - 0x3b) / 4;
            Insn(local_access(0x36 + kind, ((opcode - 0x3b) % 4) as u16)?)
        }
        0x4f => Insn(I::IAStore),
        0x50 => Insn(I::LAStore),
        0x51 => Insn(I::FAStore),
        0x52 => Insn(I::DAStore),
        0x53 => Insn(I::AAStore),
        0x54 => Insn(I::BAStore),
        0x55 => Insn(I::CAStore),
        0x56 => Insn(I::SAStore),
        0x57 => Insn(I::Pop),
        0x58 => Insn(I::Pop2),
        0x59 => Insn(I::Dup),
        0x5a => Insn(I::DupX1),
        0x5b => Insn(I::DupX2),
        0x5c => Insn(I::Dup2),
        0x5d => Insn(I::Dup2X1),
        0x5e => Insn(I::Dup2X2),
        0x5f => Insn(I::Swap),
        0x60 => Insn(I::IAdd),
        0x61 => Insn(I::LAdd),
        0x62 => Insn(I::FAdd),
        0x63 => Insn(I::DAdd),
        0x64 => Insn(I::ISub),
        0x65 => Insn(I::LSub),
        0x66 => Insn(I::FSub),
        0x67 => Insn(I::DSub),
        0x68 => Insn(I::IMul),
        0x69 => Insn(I::LMul),
        0x6a => Insn(I::FMul),
        0x6b => Insn(I::DMul),
        0x6c => Insn(I::IDiv),
        0x6d => Insn(I::LDiv),
        0x6e => Insn(I::FDiv),
        0x6f => Insn(I::DDiv),
        0x70 => Insn(I::IRem),
        0x71 => Insn(I::LRem),
        0x72 => Insn(I::FRem),
        0x73 => Insn(I::DRem),
        0x74 => Insn(I::INeg),
        0x75 => Insn(I::LNeg),
        0x76 => Insn(I::FNeg),
        0x77 => Insn(I::DNeg),
        0x78 => Insn(I::ISh(ShiftType::Left)),
        0x79 => Insn(I::LSh(ShiftType::Left)),
        0x7a => Insn(I::ISh(ShiftType::ArithmeticRight)),
        0x7b => Insn(I::LSh(ShiftType::ArithmeticRight)),
        0x7c => Insn(I::ISh(ShiftType::LogicalRight)),
        0x7d => Insn(I::LSh(ShiftType::LogicalRight)),
        0x7e => Insn(I::IAnd),
        0x7f => Insn(I::LAnd),
        0x80 => Insn(I::IOr),
        0x81 => Insn(I::LOr),
        0x82 => Insn(I::IXor),
        0x83 => Insn(I::LXor),
        0x84 => {
            let idx = u8::deserialize(reader)? as u16;
            let diff = i8::deserialize(reader)? as i16;
            Insn(I::IInc(idx, diff))
        }
        0x85 => Insn(I::I2L),
        0x86 => Insn(I::I2F),
        0x87 => Insn(I::I2D),
        0x88 => Insn(I::L2I),
        0x89 => Insn(I::L2F),
        0x8a => Insn(I::L2D),
        0x8b => Insn(I::F2I),
        0x8c => Insn(I::F2L),
        0x8d => Insn(I::F2D),
        0x8e => Insn(I::D2I),
        0x8f => Insn(I::D2L),
        0x90 => Insn(I::D2F),
        0x91 => Insn(I::I2B),
        0x92 => Insn(I::I2C),
        0x93 => Insn(I::I2S),
        0x94 => Insn(I::LCmp),
        0x95 => Insn(I::FCmp(CompareMode::L)),
        0x96 => Insn(I::FCmp(CompareMode::G)),
        0x97 => Insn(I::DCmp(CompareMode::L)),
        0x98 => Insn(I::DCmp(CompareMode::G)),
        0x99..=0x9e => {
            let comp = ORD_COMPARISONS[(opcode - 0x99) as usize];
            Branch(B::If(comp, short_jump(reader)?))
        }
        0x9f..=0xa4 => {
            let comp = ORD_COMPARISONS[(opcode - 0x9f) as usize];
            Branch(B::IfICmp(comp, short_jump(reader)?))
        }
        0xa5 => Branch(B::IfACmp(EqComparison::EQ, short_jump(reader)?)),
        0xa6 => Branch(B::IfACmp(EqComparison::NE, short_jump(reader)?)),
        0xa7 => Branch(B::Goto(short_jump(reader)?)),
        0xa8 => Branch(B::Jsr(short_jump(reader)?)),
        0xa9 => Branch(B::Ret(u8::deserialize(reader)? as u16)),
        0xaa => {
            let padding = switch_padding(offset);
            for _ in 0..padding {
                u8::deserialize(reader)?;
            }
            let default = wide_jump(reader)?;
            let low = i32::deserialize(reader)?;
            let high = i32::deserialize(reader)?;
            if high < low {
                return Err(invalid_data(format!("tableswitch from {} to {}", low, high)));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(wide_jump(reader)?);
            }
            Branch(B::TableSwitch {
                padding,
                default,
                low,
                targets,
            })
        }
        0xab => {
            let padding = switch_padding(offset);
            for _ in 0..padding {
                u8::deserialize(reader)?;
            }
            let default = wide_jump(reader)?;
            let count = i32::deserialize(reader)?;
            let count = usize::try_from(count)
                .map_err(|_| invalid_data(format!("lookupswitch with {} pairs", count)))?;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                let key = i32::deserialize(reader)?;
                targets.push((key, wide_jump(reader)?));
            }
            Branch(B::LookupSwitch {
                padding,
                default,
                targets,
            })
        }
        0xac => Branch(B::IReturn),
        0xad => Branch(B::LReturn),
        0xae => Branch(B::FReturn),
        0xaf => Branch(B::DReturn),
        0xb0 => Branch(B::AReturn),
        0xb1 => Branch(B::Return),
        0xb2 => Insn(I::GetStatic(FieldRefConstantIndex::deserialize(reader)?)),
        0xb3 => Insn(I::PutStatic(FieldRefConstantIndex::deserialize(reader)?)),
        0xb4 => Insn(I::GetField(FieldRefConstantIndex::deserialize(reader)?)),
        0xb5 => Insn(I::PutField(FieldRefConstantIndex::deserialize(reader)?)),
        0xb6 => Insn(I::Invoke(
            InvokeType::Virtual,
            MethodRefConstantIndex::deserialize(reader)?,
        )),
        0xb7 => Insn(I::Invoke(
            InvokeType::Special,
            MethodRefConstantIndex::deserialize(reader)?,
        )),
        0xb8 => Insn(I::Invoke(
            InvokeType::Static,
            MethodRefConstantIndex::deserialize(reader)?,
        )),
        0xb9 => {
            let idx = MethodRefConstantIndex::deserialize(reader)?;
            let count = u8::deserialize(reader)?;
            u8::deserialize(reader)?;
            Insn(I::Invoke(InvokeType::Interface(count), idx))
        }
        0xba => {
            let idx = InvokeDynamicConstantIndex::deserialize(reader)?;
            u16::deserialize(reader)?;
            Insn(I::InvokeDynamic(idx))
        }
        0xbb => Insn(I::New(ClassConstantIndex::deserialize(reader)?)),
        0xbc => {
            let base_type = match u8::deserialize(reader)? {
                4 => BaseType::Boolean,
                5 => BaseType::Char,
                6 => BaseType::Float,
                7 => BaseType::Double,
                8 => BaseType::Byte,
                9 => BaseType::Short,
                10 => BaseType::Int,
                11 => BaseType::Long,
                other => return Err(invalid_data(format!("newarray of type {}", other))),
            };
            Insn(I::NewArray(base_type))
        }
        0xbd => Insn(I::ANewArray(ClassConstantIndex::deserialize(reader)?)),
        0xbe => Insn(I::ArrayLength),
        0xbf => Branch(B::AThrow),
        0xc0 => Insn(I::CheckCast(ClassConstantIndex::deserialize(reader)?)),
        0xc1 => Insn(I::InstanceOf(ClassConstantIndex::deserialize(reader)?)),
        0xc2 => Insn(I::MonitorEnter),
        0xc3 => Insn(I::MonitorExit),
        0xc4 => {
            let widened = u8::deserialize(reader)?;
            match widened {
                0x15..=0x19 | 0x36..=0x3a => {
                    Insn(local_access(widened, u16::deserialize(reader)?)?)
                }
                0x84 => {
                    let idx = u16::deserialize(reader)?;
                    let diff = i16::deserialize(reader)?;
                    Insn(I::IInc(idx, diff))
                }
                0xa9 => Branch(B::Ret(u16::deserialize(reader)?)),
                other => return Err(invalid_data(format!("wide opcode {:#04x}", other))),
            }
        }
        0xc5 => {
            let idx = ClassConstantIndex::deserialize(reader)?;
            Insn(I::MultiANewArray(idx, u8::deserialize(reader)?))
        }
        0xc6 => Branch(B::IfNull(EqComparison::EQ, short_jump(reader)?)),
        0xc7 => Branch(B::IfNull(EqComparison::NE, short_jump(reader)?)),
        0xc8 => Branch(B::GotoW(wide_jump(reader)?)),
        0xc9 => Branch(B::JsrW(wide_jump(reader)?)),
        other => return Err(invalid_data(format!("unknown opcode {:#04x}", other))),
    };
    Ok(decoded)
}

/// Comparisons in the order their opcodes appear in (`ifeq`, `ifne`, `iflt`, ...)
const ORD_COMPARISONS: [OrdComparison; 6] = [
    OrdComparison::EQ,
    OrdComparison::NE,
    OrdComparison::LT,
    OrdComparison::GE,
    OrdComparison::GT,
    OrdComparison::LE,
];

/// Local variable load or store, given the opcode of its normal (one byte operand) form
fn local_access(normal_form: u8, idx: u16) -> Result<Instruction> {
    Ok(match normal_form {
        0x15 => Instruction::ILoad(idx),
        0x16 => Instruction::LLoad(idx),
        0x17 => Instruction::FLoad(idx),
        0x18 => Instruction::DLoad(idx),
        0x19 => Instruction::ALoad(idx),
        0x36 => Instruction::IStore(idx),
        0x37 => Instruction::LStore(idx),
        0x38 => Instruction::FStore(idx),
        0x39 => Instruction::DStore(idx),
        0x3a => Instruction::AStore(idx),
        other => return Err(invalid_data(format!("{:#04x} is not a load or store", other))),
    })
}

/// Possible bit shifts
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// Comparison modes for floating point
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// -1 on NaN
    L,

    /// 1 on NaN
    G,
}

/// Binary comparison operators available for `int` branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
}

impl Not for OrdComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            OrdComparison::EQ => OrdComparison::NE,
            OrdComparison::GE => OrdComparison::LT,
            OrdComparison::GT => OrdComparison::LE,
            OrdComparison::LE => OrdComparison::GT,
            OrdComparison::LT => OrdComparison::GE,
            OrdComparison::NE => OrdComparison::EQ,
        }
    }
}

/// Equality/inequality comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

impl Not for EqComparison {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            EqComparison::EQ => EqComparison::NE,
            EqComparison::NE => EqComparison::EQ,
        }
    }
}

/// Type of method to invoke
///
/// Note: `InvokeDynamic` is kept separate because the constant argument it expects is not to a
/// `Constant::MethodRef`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface(u8), // `count` is of total arguments, where `long`/`double` count for 2
}
