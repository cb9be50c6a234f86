use crate::jvm::class_file::{ClassConstantIndex, Deserialize, Serialize, StackMapFrame};
use crate::jvm::Error;
use crate::util::{OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};

/// These types are from [this hierarchy][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType<Cls, U> {
    /// Unusable slot (eg. a local which has not been assigned on every path)
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(Cls),

    /// State of an object after `new` has been called but `<init>` has not been called
    ///
    ///   - in a decoded method body, `U` is the label on the `new` instruction, so that the type
    ///     survives instructions being inserted before it
    ///   - when serializing into a classfile, `U` is the `u16` offset of that `new` instruction
    Uninitialized(U),
}

impl<Cls, U> VerificationType<Cls, U> {
    pub fn map<C2, U2>(
        &self,
        map_class: impl Fn(&Cls) -> C2,
        map_uninitialized: impl Fn(&U) -> Result<U2, Error>,
    ) -> Result<VerificationType<C2, U2>, Error> {
        Ok(match self {
            VerificationType::Top => VerificationType::Top,
            VerificationType::Integer => VerificationType::Integer,
            VerificationType::Float => VerificationType::Float,
            VerificationType::Long => VerificationType::Long,
            VerificationType::Double => VerificationType::Double,
            VerificationType::Null => VerificationType::Null,
            VerificationType::UninitializedThis => VerificationType::UninitializedThis,
            VerificationType::Object(cls) => VerificationType::Object(map_class(cls)),
            VerificationType::Uninitialized(uninit) => {
                VerificationType::Uninitialized(map_uninitialized(uninit)?)
            }
        })
    }
}

impl Serialize for VerificationType<ClassConstantIndex, u16> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(off) => {
                8u8.serialize(writer)?;
                off.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Deserialize for VerificationType<ClassConstantIndex, u16> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        let vtype = match u8::deserialize(reader)? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object(ClassConstantIndex::deserialize(reader)?),
            8 => VerificationType::Uninitialized(u16::deserialize(reader)?),
            other => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unknown verification type tag {}", other),
                ))
            }
        };
        Ok(vtype)
    }
}

impl<Cls, A> Width for VerificationType<Cls, A> {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

/// Snapshot of the stack and local variables at a point in the bytecode
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame<Cls, U> {
    /// Local variables in scope
    pub locals: OffsetVec<VerificationType<Cls, U>>,

    /// Types of values on the stack
    pub stack: OffsetVec<VerificationType<Cls, U>>,
}

impl<Cls: Clone, U: Clone> Frame<Cls, U> {
    /// Set the local at `slot`, padding any gap before it with `Top`
    ///
    /// Locals at or past `slot` are discarded first.
    pub fn set_local(&mut self, slot: usize, vtype: VerificationType<Cls, U>) {
        let keep = self
            .locals
            .iter()
            .take_while(|(offset, _, t)| offset.0 + t.width() <= slot)
            .count();
        self.locals.truncate(keep);
        while self.locals.offset_len().0 < slot {
            self.locals.push(VerificationType::Top);
        }
        self.locals.push(vtype);
    }

    pub fn map<C2, U2>(
        &self,
        map_class: impl Fn(&Cls) -> C2,
        map_uninitialized: impl Fn(&U) -> Result<U2, Error>,
    ) -> Result<Frame<C2, U2>, Error> {
        let map_all = |types: &OffsetVec<VerificationType<Cls, U>>| {
            types
                .iter()
                .map(|(_, _, t)| t.map(&map_class, &map_uninitialized))
                .collect::<Result<OffsetVec<_>, Error>>()
        };
        Ok(Frame {
            locals: map_all(&self.locals)?,
            stack: map_all(&self.stack)?,
        })
    }
}

impl Frame<ClassConstantIndex, u16> {
    /// Apply a (possibly compressed) stack map frame on top of the previous frame
    pub fn apply(&self, stack_map_frame: &StackMapFrame) -> Result<Self, Error> {
        let mut next = Frame {
            locals: self.locals.clone(),
            stack: OffsetVec::new(),
        };
        match stack_map_frame {
            StackMapFrame::SameLocalsNoStack { .. } => (),
            StackMapFrame::SameLocalsOneStack { stack, .. } => {
                next.stack.push(*stack);
            }
            StackMapFrame::ChopLocalsNoStack { chopped_k, .. } => {
                let chopped_k = *chopped_k as usize;
                if chopped_k > next.locals.len() {
                    return Err(Error::MalformedClass(String::from(
                        "chop frame removes more locals than there are",
                    )));
                }
                next.locals.truncate(next.locals.len() - chopped_k);
            }
            StackMapFrame::AppendLocalsNoStack { locals, .. } => {
                next.locals.extend(locals.iter().copied());
            }
            StackMapFrame::Full { locals, stack, .. } => {
                next.locals = locals.iter().copied().collect();
                next.stack = stack.iter().copied().collect();
            }
        }
        Ok(next)
    }

    /// Compute a stack map frame for this frame, given the previous frame
    ///
    /// This will fall back to the `Full` option using [`Self::full_stack_map_frame`] only if none
    /// of the other stack map frame variants are enough to encode the transition.
    pub fn stack_map_frame(&self, offset_delta: u16, previous_frame: &Self) -> StackMapFrame {
        let this_locals: Vec<_> = self.locals.iter().map(|(_, _, t)| *t).collect();
        let prev_locals: Vec<_> = previous_frame.locals.iter().map(|(_, _, t)| *t).collect();

        match self.stack.get_index(0) {
            None if this_locals.len() <= prev_locals.len() => {
                let chopped = prev_locals.len() - this_locals.len();
                if chopped < 4 && prev_locals.starts_with(&this_locals) {
                    return if chopped == 0 {
                        StackMapFrame::SameLocalsNoStack { offset_delta }
                    } else {
                        StackMapFrame::ChopLocalsNoStack {
                            offset_delta,
                            chopped_k: chopped as u8,
                        }
                    };
                }
            }
            None => {
                let added = this_locals.len() - prev_locals.len();
                if added < 4 && this_locals.starts_with(&prev_locals) {
                    return StackMapFrame::AppendLocalsNoStack {
                        offset_delta,
                        locals: this_locals[prev_locals.len()..].to_vec(),
                    };
                }
            }
            Some((_, top)) if self.stack.len() == 1 && this_locals == prev_locals => {
                return StackMapFrame::SameLocalsOneStack {
                    offset_delta,
                    stack: *top,
                }
            }
            Some(_) => (),
        }

        self.full_stack_map_frame(offset_delta)
    }

    /// Compute a `Full` stack map frame
    pub fn full_stack_map_frame(&self, offset_delta: u16) -> StackMapFrame {
        StackMapFrame::Full {
            offset_delta,
            stack: self.stack.iter().map(|(_, _, t)| *t).collect(),
            locals: self.locals.iter().map(|(_, _, t)| *t).collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantIndex;

    type SerFrame = Frame<ClassConstantIndex, u16>;

    fn frame(locals: Vec<VerificationType<ClassConstantIndex, u16>>) -> SerFrame {
        Frame {
            locals: locals.into_iter().collect(),
            stack: OffsetVec::new(),
        }
    }

    #[test]
    fn compression_picks_smallest_encoding() {
        let obj = VerificationType::Object(ClassConstantIndex(ConstantIndex(3)));
        let base = frame(vec![obj, VerificationType::Integer]);

        assert_eq!(
            base.stack_map_frame(4, &base),
            StackMapFrame::SameLocalsNoStack { offset_delta: 4 }
        );

        let appended = frame(vec![obj, VerificationType::Integer, VerificationType::Long]);
        assert_eq!(
            appended.stack_map_frame(1, &base),
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 1,
                locals: vec![VerificationType::Long]
            }
        );
        assert_eq!(
            base.stack_map_frame(2, &appended),
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 2,
                chopped_k: 1
            }
        );

        let mut one_stack = base.clone();
        one_stack.stack.push(VerificationType::Null);
        assert_eq!(
            one_stack.stack_map_frame(0, &base),
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 0,
                stack: VerificationType::Null
            }
        );

        let replaced = frame(vec![VerificationType::Float]);
        assert!(matches!(
            replaced.stack_map_frame(0, &base),
            StackMapFrame::Full { .. }
        ));
    }

    #[test]
    fn applying_compressed_frames_inverts_compression() {
        let obj = VerificationType::Object(ClassConstantIndex(ConstantIndex(3)));
        let previous = frame(vec![obj, VerificationType::Double]);
        let next = frame(vec![obj, VerificationType::Double, VerificationType::Integer]);
        let compressed = next.stack_map_frame(7, &previous);
        assert_eq!(previous.apply(&compressed).unwrap(), next);

        let chop = StackMapFrame::ChopLocalsNoStack {
            offset_delta: 0,
            chopped_k: 3,
        };
        assert!(previous.apply(&chop).is_err());
    }

    #[test]
    fn set_local_pads_with_top() {
        let mut f = frame(vec![VerificationType::Long]);
        f.set_local(4, VerificationType::Integer);
        let locals: Vec<_> = f.locals.iter().map(|(o, _, t)| (o.0, *t)).collect();
        assert_eq!(
            locals,
            vec![
                (0, VerificationType::Long),
                (2, VerificationType::Top),
                (3, VerificationType::Top),
                (4, VerificationType::Integer),
            ]
        );

        f.set_local(1, VerificationType::Float);
        let locals: Vec<_> = f.locals.iter().map(|(o, _, t)| (o.0, *t)).collect();
        assert_eq!(
            locals,
            vec![(0, VerificationType::Top), (1, VerificationType::Float)]
        );
    }
}
