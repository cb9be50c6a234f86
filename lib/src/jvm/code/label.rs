use std::fmt;

/// Opaque label marking a position in a method body
///
/// Labels are what let us edit code without tracking bytecode offsets: jumps, exception ranges,
/// local variable scopes, and uninitialized verification types all point at labels, and the
/// labels only get resolved into offsets when the code is assembled again.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SynLabel(usize);

impl SynLabel {
    /// First label handed out by a fresh generator
    pub const START: SynLabel = SynLabel(0);

    /// Get the next fresh label
    pub fn next(&self) -> SynLabel {
        SynLabel(self.0 + 1)
    }
}

impl fmt::Debug for SynLabel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

/// Hands out labels that are unique within one method body
///
/// Cloning does not split the generator source - the cloned generator will produce the same
/// sequence of labels as the original.
#[derive(Clone, Debug)]
pub struct LabelGenerator(SynLabel);

impl LabelGenerator {
    pub fn new() -> LabelGenerator {
        LabelGenerator(SynLabel::START)
    }

    /// Generate a fresh label
    pub fn fresh_label(&mut self) -> SynLabel {
        let to_return = self.0;
        self.0 = self.0.next();
        to_return
    }
}

impl Default for LabelGenerator {
    fn default() -> Self {
        LabelGenerator::new()
    }
}
