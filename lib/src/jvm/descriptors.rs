use super::{BinaryName, Name, UnqualifiedName};
use crate::util::Width;
use std::io::{Error, ErrorKind, Result};
use std::iter::Peekable;
use std::str::Chars;

/// Utility trait for converting descriptors to and from string representations
pub trait RenderDescriptor {
    /// Turn the descriptor into a string
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Write the descriptor to a string
    fn render_to(&self, write_to: &mut String);
}

pub trait ParseDescriptor: Sized {
    /// Parse a descriptor from a string
    fn parse(source: &str) -> Result<Self> {
        let mut chars = source.chars().peekable();
        let ret = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(ret),
            Some(c) => {
                let msg = format!("Unexpected leftover input '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
        }
    }

    /// Read the descriptor from a character buffer
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self>;
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    /// Class used to box values of this type
    pub fn boxed_class(&self) -> BinaryName {
        match self {
            BaseType::Byte => BinaryName::BYTE,
            BaseType::Char => BinaryName::CHARACTER,
            BaseType::Double => BinaryName::DOUBLE,
            BaseType::Float => BinaryName::FLOAT,
            BaseType::Int => BinaryName::INTEGER,
            BaseType::Long => BinaryName::LONG,
            BaseType::Short => BinaryName::SHORT,
            BaseType::Boolean => BinaryName::BOOLEAN,
        }
    }

    /// Instance method on the boxed class which extracts the primitive (eg. `intValue`)
    pub fn unbox_method(&self) -> UnqualifiedName {
        match self {
            BaseType::Byte => UnqualifiedName::BYTEVALUE,
            BaseType::Char => UnqualifiedName::CHARVALUE,
            BaseType::Double => UnqualifiedName::DOUBLEVALUE,
            BaseType::Float => UnqualifiedName::FLOATVALUE,
            BaseType::Int => UnqualifiedName::INTVALUE,
            BaseType::Long => UnqualifiedName::LONGVALUE,
            BaseType::Short => UnqualifiedName::SHORTVALUE,
            BaseType::Boolean => UnqualifiedName::BOOLEANVALUE,
        }
    }

    /// Descriptor of the static `valueOf` boxing method on [`Self::boxed_class`]
    pub fn box_descriptor(&self) -> MethodDescriptor {
        MethodDescriptor {
            parameters: vec![FieldType::Base(*self)],
            return_type: Some(FieldType::object(self.boxed_class())),
        }
    }

    /// Descriptor of the [`Self::unbox_method`]
    pub fn unbox_descriptor(&self) -> MethodDescriptor {
        MethodDescriptor {
            parameters: vec![],
            return_type: Some(FieldType::Base(*self)),
        }
    }
}

impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Byte
            | BaseType::Char
            | BaseType::Float
            | BaseType::Int
            | BaseType::Short
            | BaseType::Boolean => 1,
            BaseType::Double | BaseType::Long => 2,
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        let c = match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        };
        write_to.push(c);
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let typ = match source.next() {
            Some('B') => BaseType::Byte,
            Some('C') => BaseType::Char,
            Some('D') => BaseType::Double,
            Some('F') => BaseType::Float,
            Some('I') => BaseType::Int,
            Some('J') => BaseType::Long,
            Some('S') => BaseType::Short,
            Some('Z') => BaseType::Boolean,
            Some(c) => {
                let msg = format!("Invalid base type character '{}'", c);
                return Err(Error::new(ErrorKind::InvalidInput, msg));
            }
            None => {
                let msg = "Missing base type character";
                return Err(Error::new(ErrorKind::UnexpectedEof, msg));
            }
        };
        Ok(typ)
    }
}

/// Reference type
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum RefType {
    Object(BinaryName),

    /// Array whose elements have the boxed type
    Array(Box<FieldType>),
}

impl RefType {
    /// Name under which this type appears in a `CONSTANT_Class_info`
    ///
    /// Object types use their binary name, but array types use their descriptor (eg. `[I`).
    pub fn class_constant_name(&self) -> String {
        match self {
            RefType::Object(name) => name.as_str().to_owned(),
            RefType::Array(_) => self.render(),
        }
    }
}

impl RenderDescriptor for BinaryName {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('L');
        write_to.push_str(self.as_str());
        write_to.push(';');
    }
}

impl ParseDescriptor for BinaryName {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if let Some('L') = source.next() {
            let mut class_name = String::new();
            loop {
                let c: char = source.next().ok_or_else(|| {
                    let msg = format!("Missing terminator for 'L{}'", class_name);
                    Error::new(ErrorKind::UnexpectedEof, msg)
                })?;
                if c == ';' {
                    return BinaryName::from_string(class_name)
                        .map_err(|msg| Error::new(ErrorKind::InvalidInput, msg));
                } else {
                    class_name.push(c)
                }
            }
        } else {
            Err(Error::new(
                ErrorKind::InvalidInput,
                "Expected object type to start with `L`",
            ))
        }
    }
}

impl RenderDescriptor for RefType {
    fn render_to(&self, write_to: &mut String) {
        match self {
            RefType::Object(cls) => cls.render_to(write_to),
            RefType::Array(elem) => {
                write_to.push('[');
                elem.render_to(write_to);
            }
        }
    }
}

impl ParseDescriptor for RefType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.peek().copied() {
            Some('L') => Ok(RefType::Object(BinaryName::parse_from(source)?)),
            Some('[') => {
                source.next();
                let elem = FieldType::parse_from(source)?;
                Ok(RefType::Array(Box::new(elem)))
            }
            Some(c) => {
                let msg = format!("Invalid reference type character '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
            None => {
                let msg = "Missing reference type";
                Err(Error::new(ErrorKind::UnexpectedEof, msg))
            }
        }
    }
}

/// Type of a field, parameter, return, or local variable
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType {
    Base(BaseType),
    Ref(RefType),
}

impl Width for FieldType {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Ref(_) => 1,
        }
    }
}

impl FieldType {
    pub fn array(field_type: FieldType) -> FieldType {
        FieldType::Ref(RefType::Array(Box::new(field_type)))
    }

    pub const fn object(class_name: BinaryName) -> FieldType {
        FieldType::Ref(RefType::Object(class_name))
    }

    pub const fn int() -> FieldType {
        FieldType::Base(BaseType::Int)
    }

    pub const fn long() -> FieldType {
        FieldType::Base(BaseType::Long)
    }

    pub const fn boolean() -> FieldType {
        FieldType::Base(BaseType::Boolean)
    }

    /// `java/lang/Object`, the default type for most values the instrumentation passes around
    pub const OBJECT: FieldType = FieldType::object(BinaryName::OBJECT);

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Ref(_))
    }
}

impl RenderDescriptor for FieldType {
    fn render_to(&self, write_to: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(write_to),
            FieldType::Ref(reference_type) => reference_type.render_to(write_to),
        }
    }
}

impl ParseDescriptor for FieldType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.peek().copied() {
            None => Err(Error::new(ErrorKind::UnexpectedEof, "Missing field type")),
            Some('B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z') => {
                BaseType::parse_from(source).map(FieldType::Base)
            }
            Some('L' | '[') => RefType::parse_from(source).map(FieldType::Ref),
            Some(c) => {
                let msg = format!("Invalid field type character '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
        }
    }
}

/// Signature of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    pub return_type: Option<FieldType>, // `None` is for `void` (ie. no return)
}

impl MethodDescriptor {
    /// Total length of parameters in local variable slots (not the same as the length of the
    /// vector), which must be 255 or less for it to be valid
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let this_len = if has_this_param { 1 } else { 0 };
        this_len + self.parameters.iter().map(Width::width).sum::<usize>()
    }

    /// Parameters along with the local variable slot each one arrives in
    pub fn parameter_slots(&self, has_this_param: bool) -> Vec<(u16, &FieldType)> {
        let mut slot: u16 = if has_this_param { 1 } else { 0 };
        let mut slots = Vec::with_capacity(self.parameters.len());
        for parameter in &self.parameters {
            slots.push((slot, parameter));
            slot += parameter.width() as u16;
        }
        slots
    }
}

impl RenderDescriptor for MethodDescriptor {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(typ) => typ.render_to(write_to),
        };
    }
}

impl ParseDescriptor for MethodDescriptor {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if source.next() != Some('(') {
            let msg = "Expected '(' for method";
            return Err(Error::new(ErrorKind::InvalidInput, msg));
        }

        let mut parameters = vec![];
        loop {
            match source.peek().copied() {
                Some(')') => {
                    source.next();
                    break;
                }
                None => {
                    let msg = "Expected ')' for method";
                    return Err(Error::new(ErrorKind::UnexpectedEof, msg));
                }
                Some(_) => parameters.push(FieldType::parse_from(source)?),
            }
        }

        let return_type = if source.next_if_eq(&'V').is_some() {
            None
        } else {
            Some(FieldType::parse_from(source)?)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}
