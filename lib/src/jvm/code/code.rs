use crate::jvm::class_file::{
    ClassConstantIndex, Code, ConstantsPool, LineNumberTable, LocalVariable, LocalVariableTable,
    LocalVariableTypeTable, StackMapTable, Utf8ConstantIndex,
};
use crate::jvm::code::{
    BranchInstruction, DecodedInstruction, Frame, Instruction, LabelGenerator, SynLabel,
    VerificationType,
};
use crate::jvm::{BaseType, BinaryName, Error, FieldType, MethodDescriptor, Name, RenderDescriptor};
use crate::util::OffsetVec;
use log::debug;
use std::collections::{BTreeMap, HashMap};

/// Frame whose uninitialized types point at the label on the `new` instruction
pub type LabelledFrame = Frame<ClassConstantIndex, SynLabel>;

/// Frame ready to go into a `StackMapTable`
pub type SerializableFrame = Frame<ClassConstantIndex, u16>;

/// Entry in an editable method body
#[derive(Clone, Debug, PartialEq)]
pub enum CodeItem {
    /// Marks the position of the next instruction
    Label(SynLabel),

    /// Source line of the instructions that follow
    LineNumber(u16),

    /// Explicit stack map frame for the next instruction
    ///
    /// If several frames end up at the same offset, the last one is kept.
    Frame(LabelledFrame),

    Instruction(Instruction),
    Branch(BranchInstruction<SynLabel, SynLabel>),
}

/// Exception table entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TryCatch {
    /// Start of the protected range (inclusive)
    pub start: SynLabel,

    /// End of the protected range (exclusive)
    pub end: SynLabel,

    pub handler: SynLabel,

    /// Class of exceptions caught (`None` catches everything)
    pub catch_type: Option<ClassConstantIndex>,
}

/// Entry in a `LocalVariableTable` or `LocalVariableTypeTable`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalVariableScope {
    pub start: SynLabel,
    pub end: SynLabel,
    pub name: Utf8ConstantIndex,
    pub descriptor: Utf8ConstantIndex,
    pub index: u16,
}

/// Editable method body
///
/// Offsets are replaced by labels everywhere, so instructions can be inserted anywhere in
/// `items` without having to fix up jumps, exception ranges, or debug information. Use
/// [`CodeList::assemble`] to turn it back into a `Code`
/// attribute.
#[derive(Clone, Debug)]
pub struct CodeList {
    pub max_stack: u16,
    pub max_locals: u16,
    pub items: Vec<CodeItem>,
    pub exception_table: Vec<TryCatch>,
    pub local_variables: Vec<LocalVariableScope>,
    pub local_variable_types: Vec<LocalVariableScope>,

    /// Frame implied by the method descriptor, which the first stack map frame is relative to
    pub initial_frame: SerializableFrame,

    /// Whether the original code carried a `LineNumberTable`
    pub has_line_numbers: bool,

    pub label_generator: LabelGenerator,
}

/// What the method looks like from the outside, for computing its initial frame
pub struct MethodShape<'a> {
    pub this_class: ClassConstantIndex,
    pub is_static: bool,
    pub is_constructor: bool,
    pub descriptor: &'a MethodDescriptor,
}

/// Verification type of a value with the given field type, adding a class constant if needed
pub fn verification_type<U>(
    constants: &mut ConstantsPool,
    field_type: &FieldType,
) -> Result<VerificationType<ClassConstantIndex, U>, Error> {
    Ok(match field_type {
        FieldType::Base(BaseType::Float) => VerificationType::Float,
        FieldType::Base(BaseType::Long) => VerificationType::Long,
        FieldType::Base(BaseType::Double) => VerificationType::Double,
        FieldType::Base(_) => VerificationType::Integer,
        FieldType::Ref(ref_type) => {
            VerificationType::Object(constants.get_class(&ref_type.class_constant_name())?)
        }
    })
}

impl<'a> MethodShape<'a> {
    /// Compute the frame at the start of the method
    ///
    /// `this` is uninitialized in constructors, except in `java/lang/Object` which has no super
    /// constructor to call.
    pub fn initial_frame(&self, constants: &mut ConstantsPool) -> Result<SerializableFrame, Error> {
        let mut locals = OffsetVec::new();
        if !self.is_static {
            let this_is_object =
                constants.class_name(self.this_class)? == BinaryName::OBJECT.as_str();
            if self.is_constructor && !this_is_object {
                locals.push(VerificationType::UninitializedThis);
            } else {
                locals.push(VerificationType::Object(self.this_class));
            }
        }
        for parameter in &self.descriptor.parameters {
            locals.push(verification_type(constants, parameter)?);
        }
        Ok(Frame {
            locals,
            stack: OffsetVec::new(),
        })
    }
}

impl CodeList {
    /// Decode a `Code` attribute into an editable method body
    pub fn decode(
        code: &Code,
        constants: &mut ConstantsPool,
        shape: &MethodShape<'_>,
    ) -> Result<CodeList, Error> {
        let bytes = &code.code_array.0;

        // Decode every instruction and note where they start
        let mut instructions: Vec<(usize, DecodedInstruction)> = vec![];
        let mut offset = 0;
        while offset < bytes.len() {
            let (decoded, next) = DecodedInstruction::decode(bytes, offset)?;
            instructions.push((offset, decoded));
            offset = next;
        }
        let code_len = bytes.len();

        // Sort out the code attributes we understand
        let mut line_numbers: Vec<(usize, u16)> = vec![];
        let mut local_variables = vec![];
        let mut local_variable_types = vec![];
        let mut stack_map_frames = vec![];
        let mut has_line_numbers = false;
        for attribute in &code.attributes {
            let name = constants.utf8(attribute.name_index)?;
            match name {
                "LineNumberTable" => {
                    has_line_numbers = true;
                    let table: LineNumberTable = attribute.decode()?;
                    line_numbers.extend(
                        table
                            .0
                            .iter()
                            .map(|entry| (entry.start_pc.0 as usize, entry.line_number)),
                    );
                }
                "LocalVariableTable" => {
                    let table: LocalVariableTable = attribute.decode()?;
                    local_variables = table.0;
                }
                "LocalVariableTypeTable" => {
                    let table: LocalVariableTypeTable = attribute.decode()?;
                    local_variable_types = table.0;
                }
                "StackMapTable" => {
                    let table: StackMapTable = attribute.decode()?;
                    stack_map_frames = table.0;
                }
                other => debug!("dropping {} attribute of rewritten code", other),
            }
        }

        // Resolve stack map frames to absolute offsets
        let initial_frame = shape.initial_frame(constants)?;
        let mut frames: BTreeMap<usize, SerializableFrame> = BTreeMap::new();
        let mut previous: Option<(usize, SerializableFrame)> = None;
        for stack_map_frame in &stack_map_frames {
            let (offset, frame) = match &previous {
                None => (
                    stack_map_frame.offset_delta() as usize,
                    initial_frame.apply(stack_map_frame)?,
                ),
                Some((prev_offset, prev_frame)) => (
                    prev_offset + stack_map_frame.offset_delta() as usize + 1,
                    prev_frame.apply(stack_map_frame)?,
                ),
            };
            frames.insert(offset, frame.clone());
            previous = Some((offset, frame));
        }

        // Every offset something refers to gets a label
        let mut labels = OffsetLabels::default();
        for (_, decoded) in &instructions {
            if let DecodedInstruction::Branch(branch) = decoded {
                for target in branch.jump_targets() {
                    labels.label_at(target);
                }
            }
        }
        let exception_table = code
            .exception_table
            .iter()
            .map(|handler| TryCatch {
                start: labels.label_at(handler.start_pc.0 as usize),
                end: labels.label_at(handler.end_pc.0 as usize),
                handler: labels.label_at(handler.handler_pc.0 as usize),
                catch_type: if (handler.catch_type.0).0 == 0 {
                    None
                } else {
                    Some(handler.catch_type)
                },
            })
            .collect::<Vec<_>>();
        let local_variables = labels.scopes(local_variables);
        let local_variable_types = labels.scopes(local_variable_types);
        for frame in frames.values() {
            for (_, _, vtype) in frame.locals.iter().chain(frame.stack.iter()) {
                if let VerificationType::Uninitialized(new_offset) = vtype {
                    labels.label_at(*new_offset as usize);
                }
            }
        }

        let lookup = |offset: &usize| -> Result<SynLabel, Error> {
            labels.get(*offset).ok_or_else(|| {
                Error::MalformedClass(format!("no label at offset {}", offset))
            })
        };
        let mut branches: HashMap<usize, BranchInstruction<SynLabel, SynLabel>> = HashMap::new();
        for (offset, decoded) in &instructions {
            if let DecodedInstruction::Branch(branch) = decoded {
                branches.insert(*offset, branch.map_labels(lookup, lookup)?);
            }
        }
        let mut labelled_frames: BTreeMap<usize, LabelledFrame> = BTreeMap::new();
        for (offset, frame) in frames {
            let labelled = frame.map(|class| *class, |new_offset| lookup(&(*new_offset as usize)))?;
            labelled_frames.insert(offset, labelled);
        }

        // Every label must be on an instruction boundary (or at the very end)
        let mut boundaries: Vec<usize> = instructions.iter().map(|(off, _)| *off).collect();
        boundaries.push(code_len);
        for offset in labels.offsets.keys() {
            if boundaries.binary_search(offset).is_err() {
                return Err(Error::MalformedClass(format!(
                    "offset {} is not on an instruction boundary",
                    offset
                )));
            }
        }
        for offset in line_numbers.iter().map(|(off, _)| off) {
            if boundaries.binary_search(offset).is_err() {
                debug!("dropping line number at offset {}", offset);
            }
        }
        for offset in labelled_frames.keys() {
            if *offset >= code_len || boundaries.binary_search(offset).is_err() {
                return Err(Error::MalformedClass(format!(
                    "stack map frame at offset {} is not on an instruction",
                    offset
                )));
            }
        }

        // Lay out the items
        let mut items = vec![];
        for (offset, decoded) in instructions {
            if let Some(label) = labels.get(offset) {
                items.push(CodeItem::Label(label));
            }
            for (_, line) in line_numbers.iter().filter(|(off, _)| *off == offset) {
                items.push(CodeItem::LineNumber(*line));
            }
            if let Some(frame) = labelled_frames.remove(&offset) {
                items.push(CodeItem::Frame(frame));
            }
            match decoded {
                DecodedInstruction::Instruction(insn) => items.push(CodeItem::Instruction(insn)),
                DecodedInstruction::Branch(_) => match branches.remove(&offset) {
                    Some(branch) => items.push(CodeItem::Branch(branch)),
                    None => {
                        return Err(Error::MalformedClass(format!(
                            "branch at offset {} was not resolved",
                            offset
                        )))
                    }
                },
            }
        }
        if let Some(label) = labels.get(code_len) {
            items.push(CodeItem::Label(label));
        }

        Ok(CodeList {
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            items,
            exception_table,
            local_variables,
            local_variable_types,
            initial_frame,
            has_line_numbers,
            label_generator: labels.generator,
        })
    }

    /// Empty body for a method of the given shape, with room for its parameters
    pub fn new(constants: &mut ConstantsPool, shape: &MethodShape<'_>) -> Result<CodeList, Error> {
        let max_locals = shape.descriptor.parameter_length(!shape.is_static);
        Ok(CodeList {
            max_stack: 0,
            max_locals: u16::try_from(max_locals).map_err(|_| Error::MaxLocalsOverflow(max_locals))?,
            items: vec![],
            exception_table: vec![],
            local_variables: vec![],
            local_variable_types: vec![],
            initial_frame: shape.initial_frame(constants)?,
            has_line_numbers: false,
            label_generator: LabelGenerator::new(),
        })
    }

    /// Initial frame, in the form explicit frames take in `items`
    pub fn labelled_initial_frame(&self) -> Result<LabelledFrame, Error> {
        self.initial_frame.map(
            |class| *class,
            |offset| {
                Err(Error::MalformedClass(format!(
                    "uninitialized type at {} in initial frame",
                    offset
                )))
            },
        )
    }

    /// Generate a label that is not yet used anywhere in this method
    pub fn fresh_label(&mut self) -> SynLabel {
        self.label_generator.fresh_label()
    }

    /// Record a local variable in the `LocalVariableTable`
    pub fn add_local_variable(
        &mut self,
        constants: &mut ConstantsPool,
        start: SynLabel,
        end: SynLabel,
        name: &str,
        field_type: &FieldType,
        index: u16,
    ) -> Result<(), Error> {
        let name = constants.get_utf8(name)?;
        let descriptor = constants.get_utf8(&field_type.render())?;
        self.local_variables.push(LocalVariableScope {
            start,
            end,
            name,
            descriptor,
            index,
        });
        Ok(())
    }
}

/// Labels assigned to offsets in the original code array
#[derive(Default)]
struct OffsetLabels {
    offsets: HashMap<usize, SynLabel>,
    generator: LabelGenerator,
}

impl OffsetLabels {
    fn label_at(&mut self, offset: usize) -> SynLabel {
        let generator = &mut self.generator;
        *self
            .offsets
            .entry(offset)
            .or_insert_with(|| generator.fresh_label())
    }

    fn get(&self, offset: usize) -> Option<SynLabel> {
        self.offsets.get(&offset).copied()
    }

    fn scopes(&mut self, entries: Vec<LocalVariable>) -> Vec<LocalVariableScope> {
        entries
            .into_iter()
            .map(|entry| {
                let start = entry.start_pc.0 as usize;
                LocalVariableScope {
                    start: self.label_at(start),
                    end: self.label_at(start + entry.length as usize),
                    name: entry.name_index,
                    descriptor: entry.descriptor_index,
                    index: entry.index,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{
        Attribute, BytecodeArray, BytecodeIndex, ExceptionHandler, LineNumber, Serialize,
        StackMapFrame,
    };
    use crate::jvm::{BaseType, ParseDescriptor};

    fn sample_pool() -> (ConstantsPool, ClassConstantIndex) {
        let mut pool = ConstantsPool::new();
        let this_class = pool.get_class("me/Sample").unwrap();
        (pool, this_class)
    }

    fn attribute<A: crate::jvm::class_file::AttributeLike>(
        pool: &mut ConstantsPool,
        attribute: A,
    ) -> Attribute {
        pool.get_attribute(attribute).unwrap()
    }

    #[test]
    fn initial_frame_follows_descriptor() {
        let (mut pool, this_class) = sample_pool();
        let descriptor = MethodDescriptor::parse("(JLjava/lang/String;[I)V").unwrap();
        let shape = MethodShape {
            this_class,
            is_static: false,
            is_constructor: true,
            descriptor: &descriptor,
        };
        let frame = shape.initial_frame(&mut pool).unwrap();
        let string = pool.get_class("java/lang/String").unwrap();
        let int_array = pool.get_class("[I").unwrap();
        let locals: Vec<_> = frame.locals.iter().map(|(off, _, t)| (off.0, *t)).collect();
        assert_eq!(
            locals,
            vec![
                (0, VerificationType::UninitializedThis),
                (1, VerificationType::Long),
                (3, VerificationType::Object(string)),
                (4, VerificationType::Object(int_array)),
            ]
        );
    }

    #[test]
    fn decode_resolves_offsets_to_labels() {
        let (mut pool, this_class) = sample_pool();
        let descriptor = MethodDescriptor {
            parameters: vec![FieldType::Base(BaseType::Int)],
            return_type: Some(FieldType::int()),
        };

        // 0: iload_1
        // 1: ifeq 6
        // 4: iconst_1
        // 5: ireturn
        // 6: iconst_0
        // 7: ireturn
        let mut line_numbers = LineNumberTable(vec![]);
        line_numbers.0.push(LineNumber {
            start_pc: BytecodeIndex(0),
            line_number: 10,
        });
        line_numbers.0.push(LineNumber {
            start_pc: BytecodeIndex(6),
            line_number: 11,
        });
        let frames = StackMapTable(vec![StackMapFrame::SameLocalsNoStack { offset_delta: 6 }]);
        let attributes = vec![
            attribute(&mut pool, line_numbers),
            attribute(&mut pool, frames),
        ];
        let code = Code {
            max_stack: 1,
            max_locals: 2,
            code_array: BytecodeArray(vec![0x1b, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac]),
            exception_table: vec![ExceptionHandler {
                start_pc: BytecodeIndex(0),
                end_pc: BytecodeIndex(4),
                handler_pc: BytecodeIndex(6),
                catch_type: ClassConstantIndex(crate::jvm::class_file::ConstantIndex(0)),
            }],
            attributes,
        };
        let shape = MethodShape {
            this_class,
            is_static: false,
            is_constructor: false,
            descriptor: &descriptor,
        };
        let decoded = CodeList::decode(&code, &mut pool, &shape).unwrap();
        assert!(decoded.has_line_numbers);

        let start = decoded.exception_table[0].start;
        let end = decoded.exception_table[0].end;
        let target = decoded.exception_table[0].handler;
        assert_eq!(decoded.exception_table[0].catch_type, None);

        let expected_frame = Frame {
            locals: vec![VerificationType::Object(this_class), VerificationType::Integer]
                .into_iter()
                .collect(),
            stack: OffsetVec::new(),
        };
        assert_eq!(
            decoded.items,
            vec![
                CodeItem::Label(start),
                CodeItem::LineNumber(10),
                CodeItem::Instruction(Instruction::ILoad(1)),
                CodeItem::Branch(BranchInstruction::If(
                    crate::jvm::code::OrdComparison::EQ,
                    target
                )),
                CodeItem::Label(end),
                CodeItem::Instruction(Instruction::IConst1),
                CodeItem::Branch(BranchInstruction::IReturn),
                CodeItem::Label(target),
                CodeItem::LineNumber(11),
                CodeItem::Frame(expected_frame),
                CodeItem::Instruction(Instruction::IConst0),
                CodeItem::Branch(BranchInstruction::IReturn),
            ]
        );

        // Unused, but makes sure the attribute encoding is consistent with the pool
        let mut bytes = vec![];
        code.serialize(&mut bytes).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn jumps_into_the_middle_of_instructions_are_rejected() {
        let (mut pool, this_class) = sample_pool();
        let descriptor = MethodDescriptor {
            parameters: vec![],
            return_type: None,
        };
        let code = Code {
            max_stack: 1,
            max_locals: 1,
            // 0: goto 4 (middle of the `sipush`)
            // 3: sipush 1
            // 6: return
            code_array: BytecodeArray(vec![0xa7, 0x00, 0x04, 0x11, 0x00, 0x01, 0xb1]),
            exception_table: vec![],
            attributes: vec![],
        };
        let shape = MethodShape {
            this_class,
            is_static: true,
            is_constructor: false,
            descriptor: &descriptor,
        };
        assert!(CodeList::decode(&code, &mut pool, &shape).is_err());
    }
}
