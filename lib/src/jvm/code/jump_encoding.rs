//! Lay out an editable method body back into a code array
//!
//! The tricky part of assembling is that the encoding of some branches depends on where their
//! targets end up, and where things end up depends on the encoding of the branches:
//!
//!   - `tableswitch`/`lookupswitch` carry 0-3 bytes of padding so that their jump table is
//!     four-byte aligned
//!
//!   - `goto` and `jsr` only reach targets within a signed 16-bit offset. When that is not
//!     enough they get rewritten into `goto_w` and `jsr_w`.
//!
//! ### Termination
//!
//! Offsets are computed assuming every `goto`/`jsr` is short, then any jump that is found to be
//! oversized is widened and offsets are recomputed. Widening only ever makes code longer, so a
//! jump that has been widened never needs to go back to being short and the number of short
//! jumps strictly decreases until a fixed point is reached.
//!
//! Conditional jumps have no wide form, so an `if*` that ends up out of range is routed through
//! a `goto_w` (see [`widen_conditionals`]). Each rewrite replaces the far target with a near
//! one, and the inserted `goto_w` never needs widening itself.

use crate::jvm::class_file::{
    BytecodeArray, BytecodeIndex, ClassConstantIndex, Code, ConstantIndex, ConstantsPool,
    ExceptionHandler, LineNumber, LineNumberTable, LocalVariable, LocalVariableTable,
    LocalVariableTypeTable, Serialize, StackMapTable,
};
use crate::jvm::code::{
    BranchInstruction, CodeItem, CodeList, LabelGenerator, LabelledFrame, LocalVariableScope,
    SerializableFrame, SynLabel,
};
use crate::jvm::Error;
use crate::util::Width;
use log::debug;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::TryFrom;
use std::ops::RangeInclusive;

/// Range of relative jump offsets supported by `goto` and `if*` branch instructions
pub const SIGNED_16BIT_JUMP_RANGE: RangeInclusive<isize> =
    RangeInclusive::new(i16::MIN as isize, i16::MAX as isize);

/// Largest code array a method can have
pub const MAX_CODE_LENGTH: usize = u16::MAX as usize;

/// Resolved positions of everything in a method body
struct Layout {
    /// Offset of every label
    labels: HashMap<SynLabel, usize>,

    /// Offset of every item (by index in `CodeList::items`)
    item_offsets: Vec<usize>,

    /// Items (by index) whose `goto`/`jsr` needs the wide form
    widened: HashSet<usize>,

    /// Total length of the code array
    code_length: usize,
}

impl Layout {
    fn compute(items: &[CodeItem]) -> Layout {
        let mut layout = Layout {
            labels: HashMap::new(),
            item_offsets: Vec::with_capacity(items.len()),
            widened: HashSet::new(),
            code_length: 0,
        };
        loop {
            layout.place(items);
            let newly_oversized: Vec<usize> = items
                .iter()
                .enumerate()
                .filter(|(idx, _)| !layout.widened.contains(idx))
                .filter_map(|(idx, item)| match item {
                    CodeItem::Branch(BranchInstruction::Goto(lbl))
                    | CodeItem::Branch(BranchInstruction::Jsr(lbl)) => {
                        let jump = layout.distance(idx, lbl)?;
                        if SIGNED_16BIT_JUMP_RANGE.contains(&jump) {
                            None
                        } else {
                            Some(idx)
                        }
                    }
                    _ => None,
                })
                .collect();
            if newly_oversized.is_empty() {
                return layout;
            }
            debug!("widening {} oversized jumps", newly_oversized.len());
            layout.widened.extend(newly_oversized);
        }
    }

    /// Assign offsets to every item, given the current set of widened jumps
    fn place(&mut self, items: &[CodeItem]) {
        self.labels.clear();
        self.item_offsets.clear();
        let mut offset = 0;
        for (idx, item) in items.iter().enumerate() {
            self.item_offsets.push(offset);
            match item {
                CodeItem::Label(lbl) => {
                    self.labels.insert(*lbl, offset);
                }
                CodeItem::LineNumber(_) | CodeItem::Frame(_) => (),
                CodeItem::Instruction(insn) => offset += insn.width(),
                CodeItem::Branch(branch) => {
                    offset += self.encoded_branch_width(idx, branch, offset);
                }
            }
        }
        self.code_length = offset;
    }

    fn encoded_branch_width(
        &self,
        idx: usize,
        branch: &BranchInstruction<SynLabel, SynLabel>,
        offset: usize,
    ) -> usize {
        match branch {
            BranchInstruction::Goto(_) | BranchInstruction::Jsr(_)
                if self.widened.contains(&idx) =>
            {
                5
            }
            BranchInstruction::TableSwitch { .. } | BranchInstruction::LookupSwitch { .. } => {
                branch.clone().with_padding_at(offset).width()
            }
            _ => branch.width(),
        }
    }

    /// Relative jump distance from the item at `idx` to a label (`None` if the label is unknown)
    fn distance(&self, idx: usize, lbl: &SynLabel) -> Option<isize> {
        let target = *self.labels.get(lbl)?;
        Some(target as isize - self.item_offsets[idx] as isize)
    }

    fn offset_of(&self, lbl: &SynLabel) -> Result<usize, Error> {
        self.labels.get(lbl).copied().ok_or(Error::UnknownLabel(*lbl))
    }

    /// Offset at which the item at `idx` would start (the code length past the last item)
    fn item_offset(&self, idx: usize) -> usize {
        self.item_offsets
            .get(idx)
            .copied()
            .unwrap_or(self.code_length)
    }
}

/// Target of an `if*` jump
fn conditional_target(branch: &BranchInstruction<SynLabel, SynLabel>) -> Option<SynLabel> {
    match branch {
        BranchInstruction::If(_, lbl)
        | BranchInstruction::IfICmp(_, lbl)
        | BranchInstruction::IfACmp(_, lbl)
        | BranchInstruction::IfNull(_, lbl) => Some(*lbl),
        _ => None,
    }
}

/// Point an `if*` jump at `target`, negating its condition if `negate` is set
fn redirect(
    branch: &BranchInstruction<SynLabel, SynLabel>,
    target: SynLabel,
    negate: bool,
) -> BranchInstruction<SynLabel, SynLabel> {
    match *branch {
        BranchInstruction::If(op, _) => BranchInstruction::If(if negate { !op } else { op }, target),
        BranchInstruction::IfICmp(op, _) => {
            BranchInstruction::IfICmp(if negate { !op } else { op }, target)
        }
        BranchInstruction::IfACmp(op, _) => {
            BranchInstruction::IfACmp(if negate { !op } else { op }, target)
        }
        BranchInstruction::IfNull(op, _) => {
            BranchInstruction::IfNull(if negate { !op } else { op }, target)
        }
        ref other => other.clone(),
    }
}

/// Does the item take up no space in the code array?
fn is_zero_width(item: &CodeItem) -> bool {
    matches!(
        item,
        CodeItem::Label(_) | CodeItem::LineNumber(_) | CodeItem::Frame(_)
    )
}

/// Frame recorded at the offset of a label (the last one, if several share the offset)
fn frame_at(items: &[CodeItem], label: SynLabel) -> Option<LabelledFrame> {
    let position = items
        .iter()
        .position(|item| *item == CodeItem::Label(label))?;
    let mut first = position;
    while first > 0 && is_zero_width(&items[first - 1]) {
        first -= 1;
    }
    items[first..]
        .iter()
        .take_while(|item| is_zero_width(item))
        .filter_map(|item| match item {
            CodeItem::Frame(frame) => Some(frame),
            _ => None,
        })
        .last()
        .cloned()
}

/// Rewrite `if*` jumps whose target is out of reach of a 16-bit offset
///
/// Without frames, the condition is inverted to hop over a `goto_w` to the far target:
///
/// ```text,ignore,no_run
///     if* L2                ifnot* L1
///                           goto_w L2
/// L1: ...         =>    L1: ...
/// ```
///
/// With frames, `L1` would need the verification state after the jump, which a label-based body
/// does not track. The jump instead goes through a trampoline placed just after the closest
/// instruction that does not fall through, carrying the frame already recorded at the target:
///
/// ```text,ignore,no_run
///     if* L2                if* T
///     ...                   ...
///     return                return
///                       T:  [frame at L2]
///                           goto_w L2
/// L3: ...         =>    L3: ...
/// ```
///
/// Jumps that cannot be rewritten are left alone, for assembly to report.
fn widen_conditionals<'i>(
    items: &'i [CodeItem],
    labels: &mut LabelGenerator,
    emit_frames: bool,
) -> Cow<'i, [CodeItem]> {
    let mut items = Cow::Borrowed(items);
    loop {
        let layout = Layout::compute(&items);
        let oversized: Vec<(usize, SynLabel)> = items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| match item {
                CodeItem::Branch(branch) => {
                    let target = conditional_target(branch)?;
                    let jump = layout.distance(idx, &target)?;
                    if SIGNED_16BIT_JUMP_RANGE.contains(&jump) {
                        None
                    } else {
                        Some((idx, target))
                    }
                }
                _ => None,
            })
            .collect();
        if oversized.is_empty() {
            return items;
        }

        let rewritten = if emit_frames {
            through_trampolines(&items, &layout, &oversized, labels)
        } else {
            Some(hop_over_goto_w(&items, &oversized, labels))
        };
        match rewritten {
            Some(rewritten) => {
                debug!("widening {} oversized conditional jumps", oversized.len());
                items = Cow::Owned(rewritten);
            }
            None => return items,
        }
    }
}

fn hop_over_goto_w(
    items: &[CodeItem],
    oversized: &[(usize, SynLabel)],
    labels: &mut LabelGenerator,
) -> Vec<CodeItem> {
    let oversized: HashMap<usize, SynLabel> = oversized.iter().copied().collect();
    let mut rewritten = Vec::with_capacity(items.len() + 3 * oversized.len());
    for (idx, item) in items.iter().enumerate() {
        match (item, oversized.get(&idx)) {
            (CodeItem::Branch(branch), Some(far)) => {
                let next = labels.fresh_label();
                rewritten.push(CodeItem::Branch(redirect(branch, next, true)));
                rewritten.push(CodeItem::Branch(BranchInstruction::GotoW(*far)));
                rewritten.push(CodeItem::Label(next));
            }
            _ => rewritten.push(item.clone()),
        }
    }
    rewritten
}

/// Returns `None` when none of the oversized jumps could be given a trampoline
fn through_trampolines(
    items: &[CodeItem],
    layout: &Layout,
    oversized: &[(usize, SynLabel)],
    labels: &mut LabelGenerator,
) -> Option<Vec<CodeItem>> {
    // Item indices just past an instruction that never falls through
    let spots: Vec<usize> = items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| match item {
            CodeItem::Branch(branch) if !branch.falls_through() => Some(idx + 1),
            _ => None,
        })
        .collect();

    let mut trampolines: BTreeMap<usize, Vec<(SynLabel, SynLabel, LabelledFrame)>> =
        BTreeMap::new();
    let mut shared: HashMap<(usize, SynLabel), SynLabel> = HashMap::new();
    let mut redirected: HashMap<usize, SynLabel> = HashMap::new();
    for (idx, far) in oversized {
        let frame = match frame_at(items, *far) {
            Some(frame) => frame,
            None => {
                debug!("no frame at the target of oversized jump {}", idx);
                continue;
            }
        };
        let from = layout.item_offsets[*idx] as isize;
        let spot = spots
            .iter()
            .copied()
            .map(|spot| (spot, layout.item_offset(spot) as isize - from))
            .filter(|(_, jump)| SIGNED_16BIT_JUMP_RANGE.contains(jump))
            .min_by_key(|(_, jump)| jump.abs());
        let spot = match spot {
            Some((spot, _)) => spot,
            None => {
                debug!("no room for a trampoline near oversized jump {}", idx);
                continue;
            }
        };
        let trampoline = *shared.entry((spot, *far)).or_insert_with(|| {
            let trampoline = labels.fresh_label();
            trampolines
                .entry(spot)
                .or_default()
                .push((trampoline, *far, frame));
            trampoline
        });
        redirected.insert(*idx, trampoline);
    }
    if redirected.is_empty() {
        return None;
    }

    let place = |rewritten: &mut Vec<CodeItem>, spot: usize| {
        for (trampoline, far, frame) in trampolines.get(&spot).into_iter().flatten() {
            rewritten.push(CodeItem::Label(*trampoline));
            rewritten.push(CodeItem::Frame(frame.clone()));
            rewritten.push(CodeItem::Branch(BranchInstruction::GotoW(*far)));
        }
    };
    let mut rewritten = Vec::with_capacity(items.len() + 3 * redirected.len());
    for (idx, item) in items.iter().enumerate() {
        place(&mut rewritten, idx);
        match (item, redirected.get(&idx)) {
            (CodeItem::Branch(branch), Some(trampoline)) => {
                rewritten.push(CodeItem::Branch(redirect(branch, *trampoline, false)));
            }
            _ => rewritten.push(item.clone()),
        }
    }
    place(&mut rewritten, items.len());
    Some(rewritten)
}

impl CodeList {
    /// Assemble the method body back into a `Code` attribute
    ///
    /// When `emit_frames` is set, the explicit frames in the body are compressed into a
    /// `StackMapTable`. Otherwise frames are dropped (class files before version 50 must not
    /// have them).
    pub fn assemble(&self, constants: &mut ConstantsPool, emit_frames: bool) -> Result<Code, Error> {
        let mut label_generator = self.label_generator.clone();
        let items = widen_conditionals(&self.items, &mut label_generator, emit_frames);
        let layout = Layout::compute(&items);
        if layout.code_length > MAX_CODE_LENGTH {
            return Err(Error::MethodCodeOverflow(layout.code_length));
        }

        let mut code_array = BytecodeArray(Vec::with_capacity(layout.code_length));
        let mut line_numbers = vec![];
        let mut frames: BTreeMap<usize, SerializableFrame> = BTreeMap::new();
        for (idx, item) in items.iter().enumerate() {
            let offset = layout.item_offsets[idx];
            match item {
                CodeItem::Label(_) => (),
                CodeItem::LineNumber(line) => line_numbers.push(LineNumber {
                    start_pc: BytecodeIndex(offset as u16),
                    line_number: *line,
                }),
                CodeItem::Frame(frame) => {
                    if emit_frames {
                        let frame = frame.map(
                            |class| *class,
                            |new_label| layout.offset_of(new_label).map(|off| off as u16),
                        )?;
                        frames.insert(offset, frame);
                    }
                }
                CodeItem::Instruction(insn) => insn.serialize(&mut code_array.0)?,
                CodeItem::Branch(branch) => {
                    let branch = if layout.widened.contains(&idx) {
                        match branch {
                            BranchInstruction::Goto(lbl) => BranchInstruction::GotoW(*lbl),
                            BranchInstruction::Jsr(lbl) => BranchInstruction::JsrW(*lbl),
                            other => other.clone(),
                        }
                    } else {
                        branch.clone().with_padding_at(offset)
                    };
                    let encoded = branch.map_labels(
                        |lbl| {
                            let target = layout.offset_of(lbl)?;
                            let jump = target as isize - offset as isize;
                            i16::try_from(jump).map_err(|_| Error::BranchOverflow {
                                from: offset,
                                to: target,
                            })
                        },
                        |lbl| {
                            let target = layout.offset_of(lbl)?;
                            Ok((target as isize - offset as isize) as i32)
                        },
                    )?;
                    encoded.serialize(&mut code_array.0)?;
                }
            }
        }

        let exception_table = self
            .exception_table
            .iter()
            .map(|try_catch| {
                Ok(ExceptionHandler {
                    start_pc: BytecodeIndex(layout.offset_of(&try_catch.start)? as u16),
                    end_pc: BytecodeIndex(layout.offset_of(&try_catch.end)? as u16),
                    handler_pc: BytecodeIndex(layout.offset_of(&try_catch.handler)? as u16),
                    catch_type: try_catch
                        .catch_type
                        .unwrap_or(ClassConstantIndex(ConstantIndex(0))),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?
            .into_iter()
            .filter(|handler| handler.start_pc.0 < handler.end_pc.0)
            .collect();

        let mut attributes = vec![];
        if self.has_line_numbers || !line_numbers.is_empty() {
            line_numbers.dedup();
            attributes.push(constants.get_attribute(LineNumberTable(line_numbers))?);
        }
        if !self.local_variables.is_empty() {
            let table = LocalVariableTable(scopes(&layout, &self.local_variables)?);
            attributes.push(constants.get_attribute(table)?);
        }
        if !self.local_variable_types.is_empty() {
            let table = LocalVariableTypeTable(scopes(&layout, &self.local_variable_types)?);
            attributes.push(constants.get_attribute(table)?);
        }
        if !frames.is_empty() {
            let table = self.stack_map_table(frames, layout.code_length);
            attributes.push(constants.get_attribute(table)?);
        }

        Ok(Code {
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code_array,
            exception_table,
            attributes,
        })
    }

    /// Compress frames (keyed by their offset) into a `StackMapTable`
    fn stack_map_table(
        &self,
        frames: BTreeMap<usize, SerializableFrame>,
        code_length: usize,
    ) -> StackMapTable {
        let mut previous_frame = &self.initial_frame;
        let mut previous_offset: Option<usize> = None;
        let mut stack_map_frames = vec![];
        for (offset, frame) in &frames {
            if *offset >= code_length {
                debug!("dropping frame past the end of the code at {}", offset);
                continue;
            }
            let offset_delta = match previous_offset {
                None => *offset,
                Some(previous_offset) => offset - previous_offset - 1,
            };
            stack_map_frames.push(frame.stack_map_frame(offset_delta as u16, previous_frame));
            previous_frame = frame;
            previous_offset = Some(*offset);
        }
        StackMapTable(stack_map_frames)
    }
}

/// Resolve local variable scopes into table entries
fn scopes(layout: &Layout, scopes: &[LocalVariableScope]) -> Result<Vec<LocalVariable>, Error> {
    scopes
        .iter()
        .map(|scope| {
            let start = layout.offset_of(&scope.start)?;
            let end = layout.offset_of(&scope.end)?;
            Ok(LocalVariable {
                start_pc: BytecodeIndex(start as u16),
                length: end.saturating_sub(start) as u16,
                name_index: scope.name,
                descriptor_index: scope.descriptor,
                index: scope.index,
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::StackMapFrame;
    use crate::jvm::code::{Frame, Instruction, LabelGenerator, OrdComparison, VerificationType};
    use crate::util::OffsetVec;

    fn empty_code(items: Vec<CodeItem>, label_generator: LabelGenerator) -> CodeList {
        CodeList {
            max_stack: 2,
            max_locals: 2,
            items,
            exception_table: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
            initial_frame: Frame {
                locals: OffsetVec::new(),
                stack: OffsetVec::new(),
            },
            has_line_numbers: false,
            label_generator,
        }
    }

    #[test]
    fn backward_jumps_and_frames() {
        let mut labels = LabelGenerator::new();
        let top = labels.fresh_label();
        let items = vec![
            CodeItem::Instruction(Instruction::IConst0),
            CodeItem::Instruction(Instruction::IStore(0)),
            CodeItem::Label(top),
            CodeItem::Frame(Frame {
                locals: vec![VerificationType::Integer].into_iter().collect(),
                stack: OffsetVec::new(),
            }),
            CodeItem::Instruction(Instruction::IInc(0, 1)),
            CodeItem::Instruction(Instruction::ILoad(0)),
            CodeItem::Branch(BranchInstruction::If(OrdComparison::NE, top)),
            CodeItem::Branch(BranchInstruction::Return),
        ];
        let code = empty_code(items, labels);
        let mut pool = ConstantsPool::new();
        let assembled = code.assemble(&mut pool, true).unwrap();

        // iconst_0, istore_0, iinc 0 1, iload_0, ifne -4, return
        assert_eq!(
            assembled.code_array.0,
            vec![0x03, 0x3b, 0x84, 0x00, 0x01, 0x1a, 0x9a, 0xff, 0xfc, 0xb1]
        );
        assert_eq!(assembled.attributes.len(), 1);
        let table: StackMapTable = assembled.attributes[0].decode().unwrap();
        assert_eq!(
            table.0,
            vec![StackMapFrame::AppendLocalsNoStack {
                offset_delta: 2,
                locals: vec![VerificationType::Integer],
            }]
        );

        let without_frames = code.assemble(&mut pool, false).unwrap();
        assert!(without_frames.attributes.is_empty());
    }

    #[test]
    fn oversized_goto_is_widened() {
        let mut labels = LabelGenerator::new();
        let end = labels.fresh_label();
        let mut items = vec![CodeItem::Branch(BranchInstruction::Goto(end))];
        items.extend((0..40000).map(|_| CodeItem::Instruction(Instruction::Nop)));
        items.push(CodeItem::Label(end));
        items.push(CodeItem::Branch(BranchInstruction::Return));
        let code = empty_code(items, labels);
        let assembled = code.assemble(&mut ConstantsPool::new(), true).unwrap();
        let bytes = &assembled.code_array.0;
        assert_eq!(bytes.len(), 5 + 40000 + 1);
        assert_eq!(&bytes[0..5], &[0xc8, 0x00, 0x00, 0x9c, 0x45]);
    }

    fn far_conditional(labels: &mut LabelGenerator) -> Vec<CodeItem> {
        let end = labels.fresh_label();
        let mut items = vec![
            CodeItem::Instruction(Instruction::ILoad(0)),
            CodeItem::Branch(BranchInstruction::If(OrdComparison::EQ, end)),
            CodeItem::Branch(BranchInstruction::Return),
        ];
        items.extend((0..40000).map(|_| CodeItem::Instruction(Instruction::Nop)));
        items.push(CodeItem::Label(end));
        items
    }

    #[test]
    fn oversized_conditional_hops_over_goto_w() {
        let mut labels = LabelGenerator::new();
        let mut items = far_conditional(&mut labels);
        items.push(CodeItem::Branch(BranchInstruction::Return));
        let code = empty_code(items, labels);
        let assembled = code.assemble(&mut ConstantsPool::new(), false).unwrap();
        let bytes = &assembled.code_array.0;

        // iload_0, ifne +8, goto_w end, return, nops..., return
        assert_eq!(bytes.len(), 1 + 3 + 5 + 1 + 40000 + 1);
        assert_eq!(&bytes[0..4], &[0x1a, 0x9a, 0x00, 0x08]);
        assert_eq!(&bytes[4..9], &[0xc8, 0x00, 0x00, 0x9c, 0x46]);
        assert_eq!(bytes[9], 0xb1);
    }

    #[test]
    fn oversized_conditional_goes_through_trampoline() {
        let mut labels = LabelGenerator::new();
        let mut items = far_conditional(&mut labels);
        items.push(CodeItem::Frame(Frame {
            locals: vec![VerificationType::Integer].into_iter().collect(),
            stack: OffsetVec::new(),
        }));
        items.push(CodeItem::Branch(BranchInstruction::Return));
        let code = empty_code(items, labels);
        let assembled = code.assemble(&mut ConstantsPool::new(), true).unwrap();
        let bytes = &assembled.code_array.0;

        // iload_0, ifeq +4, return, goto_w end, nops..., return
        assert_eq!(bytes.len(), 1 + 3 + 1 + 5 + 40000 + 1);
        assert_eq!(&bytes[0..5], &[0x1a, 0x99, 0x00, 0x04, 0xb1]);
        assert_eq!(&bytes[5..10], &[0xc8, 0x00, 0x00, 0x9c, 0x45]);

        // The trampoline carries the frame of the far target
        let table: StackMapTable = assembled.attributes[0].decode().unwrap();
        assert_eq!(
            table.0,
            vec![
                StackMapFrame::AppendLocalsNoStack {
                    offset_delta: 5,
                    locals: vec![VerificationType::Integer],
                },
                StackMapFrame::SameLocalsNoStack {
                    offset_delta: 40004,
                },
            ]
        );
    }

    #[test]
    fn oversized_conditional_without_target_frame_is_an_error() {
        let mut labels = LabelGenerator::new();
        let mut items = far_conditional(&mut labels);
        items.push(CodeItem::Branch(BranchInstruction::Return));
        let code = empty_code(items, labels);
        assert!(matches!(
            code.assemble(&mut ConstantsPool::new(), true),
            Err(Error::BranchOverflow { from: 1, .. })
        ));
    }

    #[test]
    fn unplaced_labels_are_reported() {
        let mut labels = LabelGenerator::new();
        let nowhere = labels.fresh_label();
        let items = vec![CodeItem::Branch(BranchInstruction::Goto(nowhere))];
        let code = empty_code(items, labels);
        assert!(matches!(
            code.assemble(&mut ConstantsPool::new(), true),
            Err(Error::UnknownLabel(_))
        ));
    }

    #[test]
    fn switch_padding_follows_position() {
        let mut labels = LabelGenerator::new();
        let dflt = labels.fresh_label();
        let items = vec![
            CodeItem::Instruction(Instruction::ILoad(0)),
            CodeItem::Branch(BranchInstruction::LookupSwitch {
                padding: 0,
                default: dflt,
                targets: vec![(1, dflt)],
            }),
            CodeItem::Label(dflt),
            CodeItem::Branch(BranchInstruction::Return),
        ];
        let code = empty_code(items, labels);
        let assembled = code.assemble(&mut ConstantsPool::new(), false).unwrap();
        // iload_0 at 0, lookupswitch at 1 with 2 bytes of padding, table of 16 bytes, return
        let bytes = &assembled.code_array.0;
        assert_eq!(bytes.len(), 1 + 1 + 2 + 16 + 1);
        assert_eq!(&bytes[1..4], &[0xab, 0x00, 0x00]);
        // default jumps to offset 20, relative to the switch at 1
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x13]);
    }
}
