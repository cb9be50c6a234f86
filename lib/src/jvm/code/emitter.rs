use crate::jvm::class_file::ConstantsPool;
use crate::jvm::code::{
    BranchInstruction, CodeItem, CompareMode, EqComparison, Instruction, InvokeType,
    LabelGenerator, LabelledFrame, OrdComparison, SynLabel,
};
use crate::jvm::{
    BaseType, BinaryName, Error, FieldType, MethodDescriptor, Name, RenderDescriptor,
    UnqualifiedName,
};
use crate::util::Width;

/// Typed builder for short instruction sequences spliced into existing code
///
/// The emitter tracks the operand stack (as a stack of value widths) so that width-sensitive
/// instructions like `dup`/`dup2` are picked automatically, and so that the peak depth of the
/// generated sequence is known afterwards.
pub struct Emitter<'a> {
    constants: &'a mut ConstantsPool,
    labels: &'a mut LabelGenerator,
    items: Vec<CodeItem>,

    /// Width of each value on the stack
    stack: Vec<usize>,

    /// Largest total width the stack reached
    max_depth: usize,
}

impl<'a> Emitter<'a> {
    pub fn new(constants: &'a mut ConstantsPool, labels: &'a mut LabelGenerator) -> Emitter<'a> {
        Emitter {
            constants,
            labels,
            items: vec![],
            stack: vec![],
            max_depth: 0,
        }
    }

    /// Start with values of the given types already on the stack (eg. the value being returned)
    pub fn with_stack(mut self, stack: &[FieldType]) -> Self {
        self.stack = stack.iter().map(Width::width).collect();
        self.max_depth = self.depth();
        self
    }

    /// Generated items, along with the peak stack depth
    pub fn finish(self) -> (Vec<CodeItem>, usize) {
        (self.items, self.max_depth)
    }

    /// Current stack depth, in slots
    pub fn depth(&self) -> usize {
        self.stack.iter().sum()
    }

    pub fn fresh_label(&mut self) -> SynLabel {
        self.labels.fresh_label()
    }

    pub fn place_label(&mut self, label: SynLabel) {
        self.items.push(CodeItem::Label(label));
    }

    /// Explicit frame for the next instruction
    ///
    /// The tracked stack is reset to match the frame.
    pub fn frame(&mut self, frame: LabelledFrame) {
        self.stack = frame.stack.iter().map(|(_, _, t)| t.width()).collect();
        self.items.push(CodeItem::Frame(frame));
    }

    fn pop_values(&mut self, count: usize) {
        let remaining = self.stack.len().saturating_sub(count);
        self.stack.truncate(remaining);
    }

    fn push_value(&mut self, width: usize) {
        self.stack.push(width);
        self.max_depth = self.max_depth.max(self.depth());
    }

    /// Push an instruction, given how many values it pops and what width of value it pushes
    fn push_instruction(&mut self, insn: Instruction, pops: usize, pushes: Option<usize>) {
        self.pop_values(pops);
        if let Some(width) = pushes {
            self.push_value(width);
        }
        self.items.push(CodeItem::Instruction(insn));
    }

    /// Push a branch instruction (popping its operands)
    pub fn branch(&mut self, branch: BranchInstruction<SynLabel, SynLabel>) {
        let pops = match &branch {
            BranchInstruction::If(_, _)
            | BranchInstruction::IfNull(_, _)
            | BranchInstruction::TableSwitch { .. }
            | BranchInstruction::LookupSwitch { .. }
            | BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::AThrow => 1,
            BranchInstruction::IfICmp(_, _) | BranchInstruction::IfACmp(_, _) => 2,
            _ => 0,
        };
        self.pop_values(pops);
        self.items.push(CodeItem::Branch(branch));
    }

    /// Push a null reference
    pub fn const_null(&mut self) {
        self.push_instruction(Instruction::AConstNull, 0, Some(1));
    }

    /// Push an integer constant onto the stack, using the shortest encoding
    pub fn const_int(&mut self, integer: i32) -> Result<(), Error> {
        let insn = match integer {
            -1 => Instruction::IConstM1,
            0 => Instruction::IConst0,
            1 => Instruction::IConst1,
            2 => Instruction::IConst2,
            3 => Instruction::IConst3,
            4 => Instruction::IConst4,
            5 => Instruction::IConst5,
            -128..=127 => Instruction::BiPush(integer as i8),
            -32768..=32767 => Instruction::SiPush(integer as i16),
            _ => Instruction::Ldc(self.constants.get_integer(integer)?),
        };
        self.push_instruction(insn, 0, Some(1));
        Ok(())
    }

    /// Get a local at a particular offset
    pub fn get_local(&mut self, offset: u16, field_type: &FieldType) {
        let insn = match field_type {
            FieldType::Base(BaseType::Float) => Instruction::FLoad(offset),
            FieldType::Base(BaseType::Long) => Instruction::LLoad(offset),
            FieldType::Base(BaseType::Double) => Instruction::DLoad(offset),
            FieldType::Base(_) => Instruction::ILoad(offset),
            FieldType::Ref(_) => Instruction::ALoad(offset),
        };
        self.push_instruction(insn, 0, Some(field_type.width()));
    }

    /// Set a local at a particular offset
    pub fn set_local(&mut self, offset: u16, field_type: &FieldType) {
        let insn = match field_type {
            FieldType::Base(BaseType::Float) => Instruction::FStore(offset),
            FieldType::Base(BaseType::Long) => Instruction::LStore(offset),
            FieldType::Base(BaseType::Double) => Instruction::DStore(offset),
            FieldType::Base(_) => Instruction::IStore(offset),
            FieldType::Ref(_) => Instruction::AStore(offset),
        };
        self.push_instruction(insn, 1, None);
    }

    /// Push the receiver (`this`)
    pub fn load_this(&mut self) {
        self.push_instruction(Instruction::ALoad(0), 0, Some(1));
    }

    /// Duplicate the top of the stack, accounting for the different possible type widths
    pub fn dup(&mut self) {
        let width = self.stack.last().copied().unwrap_or(1);
        let insn = if width == 2 {
            Instruction::Dup2
        } else {
            Instruction::Dup
        };
        self.push_instruction(insn, 0, Some(width));
    }

    /// Pop the top of the stack, accounting for the different possible type widths
    pub fn pop(&mut self) {
        let width = self.stack.last().copied().unwrap_or(1);
        let insn = if width == 2 {
            Instruction::Pop2
        } else {
            Instruction::Pop
        };
        self.push_instruction(insn, 1, None);
    }

    /// Swap the top two single-width values
    pub fn swap(&mut self) {
        let top = self.stack.pop().unwrap_or(1);
        let below = self.stack.pop().unwrap_or(1);
        self.stack.push(top);
        self.stack.push(below);
        self.items.push(CodeItem::Instruction(Instruction::Swap));
    }

    /// Box the primitive on top of the stack (references are left alone)
    pub fn box_top(&mut self, field_type: &FieldType) -> Result<(), Error> {
        if let FieldType::Base(base_type) = field_type {
            let descriptor = base_type.box_descriptor();
            self.invoke_static(
                &base_type.boxed_class(),
                UnqualifiedName::VALUEOF.as_str(),
                &descriptor,
            )?;
        }
        Ok(())
    }

    /// Unbox a reference on top of the stack into the given type
    ///
    /// References are checked against the type instead.
    pub fn unbox_top(&mut self, field_type: &FieldType) -> Result<(), Error> {
        match field_type {
            FieldType::Base(base_type) => {
                let boxed_class = base_type.boxed_class();
                self.check_cast(boxed_class.as_str())?;
                self.invoke_virtual(
                    &boxed_class,
                    base_type.unbox_method().as_str(),
                    &base_type.unbox_descriptor(),
                )
            }
            FieldType::Ref(ref_type) => {
                let name = ref_type.class_constant_name();
                if name != BinaryName::OBJECT.as_str() {
                    self.check_cast(&name)?;
                }
                Ok(())
            }
        }
    }

    /// Duplicate the value about to be returned as an `Object`
    ///
    ///   - `void` pushes `null`
    ///   - references (including in-flight exceptions) are duplicated
    ///   - primitives are duplicated (with `dup2` for `long`/`double`) then boxed
    pub fn dup_and_box(&mut self, return_type: Option<&FieldType>) -> Result<(), Error> {
        match return_type {
            None => self.const_null(),
            Some(field_type) => {
                self.dup();
                self.box_top(field_type)?;
            }
        }
        Ok(())
    }

    /// Invoke a static method
    pub fn invoke_static(
        &mut self,
        class: &BinaryName,
        name: &str,
        descriptor: &MethodDescriptor,
    ) -> Result<(), Error> {
        let method = self.constants.get_method_ref(
            class.as_str(),
            name,
            &descriptor.render(),
            false,
        )?;
        self.push_instruction(
            Instruction::Invoke(InvokeType::Static, method),
            descriptor.parameters.len(),
            descriptor.return_type.as_ref().map(Width::width),
        );
        Ok(())
    }

    /// Invoke an instance method on a class (not an interface)
    pub fn invoke_virtual(
        &mut self,
        class: &BinaryName,
        name: &str,
        descriptor: &MethodDescriptor,
    ) -> Result<(), Error> {
        let method = self.constants.get_method_ref(
            class.as_str(),
            name,
            &descriptor.render(),
            false,
        )?;
        self.push_instruction(
            Instruction::Invoke(InvokeType::Virtual, method),
            descriptor.parameters.len() + 1,
            descriptor.return_type.as_ref().map(Width::width),
        );
        Ok(())
    }

    /// Read an instance field off the object on top of the stack
    pub fn get_field(
        &mut self,
        class: &str,
        name: &str,
        field_type: &FieldType,
    ) -> Result<(), Error> {
        let field = self
            .constants
            .get_field_ref(class, name, &field_type.render())?;
        self.push_instruction(Instruction::GetField(field), 1, Some(field_type.width()));
        Ok(())
    }

    /// Write an instance field (stack is `..., object, value`)
    pub fn put_field(
        &mut self,
        class: &str,
        name: &str,
        field_type: &FieldType,
    ) -> Result<(), Error> {
        let field = self
            .constants
            .get_field_ref(class, name, &field_type.render())?;
        self.push_instruction(Instruction::PutField(field), 2, None);
        Ok(())
    }

    /// Store the value on top of the stack into a field of `this`, leaving the value in place
    ///
    /// Single-width values use `dup aload_0 swap putfield`. There is no swap for wide values, so
    /// those go through `dup2 aload_0 dup_x2 pop putfield`.
    pub fn store_top_to_field(
        &mut self,
        class: &str,
        name: &str,
        field_type: &FieldType,
    ) -> Result<(), Error> {
        self.dup();
        self.load_this();
        if field_type.width() == 2 {
            self.push_instruction(Instruction::DupX2, 0, Some(1));
            self.push_instruction(Instruction::Pop, 1, None);

            // `dup_x2` tucked a copy of the receiver under the duplicated value
            let receiver = self.stack.pop().unwrap_or(1);
            let value = self.stack.pop().unwrap_or(2);
            self.stack.push(receiver);
            self.stack.push(value);
        } else {
            self.swap();
        }
        self.put_field(class, name, field_type)
    }

    pub fn check_cast(&mut self, class: &str) -> Result<(), Error> {
        let class = self.constants.get_class(class)?;
        self.push_instruction(Instruction::CheckCast(class), 1, Some(1));
        Ok(())
    }

    /// Build an `Object[]` out of values loaded from locals, boxing primitives along the way
    pub fn object_array_of_locals(&mut self, locals: &[(u16, &FieldType)]) -> Result<(), Error> {
        self.const_int(locals.len() as i32)?;
        let object = self.constants.get_class(BinaryName::OBJECT.as_str())?;
        self.push_instruction(Instruction::ANewArray(object), 1, Some(1));
        for (idx, (slot, field_type)) in locals.iter().enumerate() {
            self.dup();
            self.const_int(idx as i32)?;
            self.get_local(*slot, field_type);
            self.box_top(field_type)?;
            self.push_instruction(Instruction::AAStore, 3, None);
        }
        Ok(())
    }

    /// Compare the value on top of the stack against its default value, leaving an `int` that
    /// is zero exactly when the value is the default
    ///
    /// References are left as they are (to be tested with `ifnull`/`ifnonnull`).
    pub fn compare_to_default(&mut self, field_type: &FieldType) {
        match field_type {
            FieldType::Base(BaseType::Long) => {
                self.push_instruction(Instruction::LConst0, 0, Some(2));
                self.push_instruction(Instruction::LCmp, 2, Some(1));
            }
            FieldType::Base(BaseType::Float) => {
                self.push_instruction(Instruction::FConst0, 0, Some(1));
                self.push_instruction(Instruction::FCmp(CompareMode::L), 2, Some(1));
            }
            FieldType::Base(BaseType::Double) => {
                self.push_instruction(Instruction::DConst0, 0, Some(2));
                self.push_instruction(Instruction::DCmp(CompareMode::L), 2, Some(1));
            }
            FieldType::Base(_) | FieldType::Ref(_) => (),
        }
    }

    /// Jump to `target` when the value on top of the stack (as left by
    /// [`Self::compare_to_default`]) is the default
    pub fn branch_if_default(&mut self, field_type: &FieldType, target: SynLabel) {
        let branch = match field_type {
            FieldType::Ref(_) => BranchInstruction::IfNull(EqComparison::EQ, target),
            FieldType::Base(_) => BranchInstruction::If(OrdComparison::EQ, target),
        };
        self.branch(branch);
    }

    /// Return from the method
    pub fn return_(&mut self, return_type: Option<&FieldType>) {
        let insn = match return_type {
            None => BranchInstruction::Return,
            Some(FieldType::Base(BaseType::Float)) => BranchInstruction::FReturn,
            Some(FieldType::Base(BaseType::Long)) => BranchInstruction::LReturn,
            Some(FieldType::Base(BaseType::Double)) => BranchInstruction::DReturn,
            Some(FieldType::Base(_)) => BranchInstruction::IReturn,
            Some(FieldType::Ref(_)) => BranchInstruction::AReturn,
        };
        self.branch(insn);
    }

    /// Throw the exception on top of the stack
    pub fn athrow(&mut self) {
        self.branch(BranchInstruction::AThrow);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::Constant;

    fn instructions(items: &[CodeItem]) -> Vec<Instruction> {
        items
            .iter()
            .filter_map(|item| match item {
                CodeItem::Instruction(insn) => Some(*insn),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn const_int_picks_smallest_encoding() {
        let mut pool = ConstantsPool::new();
        let mut labels = LabelGenerator::new();
        let mut emitter = Emitter::new(&mut pool, &mut labels);
        for value in [3, -100, 1000, 100_000] {
            emitter.const_int(value).unwrap();
        }
        let (items, depth) = emitter.finish();
        assert_eq!(depth, 4);
        let insns = instructions(&items);
        assert_eq!(insns[0], Instruction::IConst3);
        assert_eq!(insns[1], Instruction::BiPush(-100));
        assert_eq!(insns[2], Instruction::SiPush(1000));
        match insns[3] {
            Instruction::Ldc(idx) => {
                assert_eq!(pool.get(idx).unwrap(), &Constant::Integer(100_000))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn dup_and_box_follows_return_category() {
        let mut pool = ConstantsPool::new();
        let mut labels = LabelGenerator::new();

        let mut emitter = Emitter::new(&mut pool, &mut labels).with_stack(&[FieldType::long()]);
        emitter.dup_and_box(Some(&FieldType::long())).unwrap();
        let (items, depth) = emitter.finish();
        let insns = instructions(&items);
        assert_eq!(insns[0], Instruction::Dup2);
        assert!(matches!(
            insns[1],
            Instruction::Invoke(InvokeType::Static, _)
        ));
        assert_eq!(depth, 4);

        let mut emitter = Emitter::new(&mut pool, &mut labels);
        emitter.dup_and_box(None).unwrap();
        let (items, _) = emitter.finish();
        assert_eq!(instructions(&items), vec![Instruction::AConstNull]);

        let mut emitter = Emitter::new(&mut pool, &mut labels).with_stack(&[FieldType::OBJECT]);
        emitter.dup_and_box(Some(&FieldType::OBJECT)).unwrap();
        let (items, _) = emitter.finish();
        assert_eq!(instructions(&items), vec![Instruction::Dup]);
    }

    #[test]
    fn wide_values_are_stored_without_swap() {
        let mut pool = ConstantsPool::new();
        let mut labels = LabelGenerator::new();
        let mut emitter = Emitter::new(&mut pool, &mut labels).with_stack(&[FieldType::long()]);
        emitter
            .store_top_to_field("me/Sample", "cached", &FieldType::long())
            .unwrap();
        assert_eq!(emitter.depth(), 2);
        let (items, depth) = emitter.finish();
        let insns = instructions(&items);
        assert_eq!(&insns[0..4], &[
            Instruction::Dup2,
            Instruction::ALoad(0),
            Instruction::DupX2,
            Instruction::Pop,
        ]);
        assert!(matches!(insns[4], Instruction::PutField(_)));
        assert_eq!(depth, 6);
    }

    #[test]
    fn argument_arrays_box_primitives() {
        let mut pool = ConstantsPool::new();
        let mut labels = LabelGenerator::new();
        let mut emitter = Emitter::new(&mut pool, &mut labels);
        let int = FieldType::int();
        let string = FieldType::object(BinaryName::STRING);
        emitter
            .object_array_of_locals(&[(1, &int), (2, &string)])
            .unwrap();
        assert_eq!(emitter.depth(), 1);
        let (items, _) = emitter.finish();
        let insns = instructions(&items);
        assert_eq!(insns[0], Instruction::IConst2);
        assert!(matches!(insns[1], Instruction::ANewArray(_)));
        assert_eq!(&insns[2..5], &[
            Instruction::Dup,
            Instruction::IConst0,
            Instruction::ILoad(1)
        ]);
        assert!(matches!(insns[5], Instruction::Invoke(InvokeType::Static, _)));
        assert_eq!(insns[6], Instruction::AAStore);
        assert_eq!(insns.len(), 11);
    }
}
