use crate::jvm::class_file::{read_bytes, Attribute, AttributeLike, Deserialize, Serialize};
use crate::jvm::Error;
use crate::util::{Offset, OffsetVec, Width};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::result::Result;

/// Class file constants pool
///
/// A pool parsed out of an existing class keeps every entry at its original index, so that
/// untouched parts of the class (attributes we do not understand, instructions we copy through)
/// keep pointing at the right constants. New constants are only ever appended, and are
/// deduplicated against what is already in the pool.
#[derive(Debug, Clone)]
pub struct ConstantsPool {
    constants: OffsetVec<Constant>,

    classes: HashMap<Utf8ConstantIndex, ClassConstantIndex>,
    fieldrefs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex), FieldRefConstantIndex>,
    methodrefs:
        HashMap<(ClassConstantIndex, NameAndTypeConstantIndex, bool), MethodRefConstantIndex>,
    strings: HashMap<Utf8ConstantIndex, StringConstantIndex>,
    integers: HashMap<i32, ConstantIndex>,
    name_and_types: HashMap<(Utf8ConstantIndex, Utf8ConstantIndex), NameAndTypeConstantIndex>,
    utf8s: HashMap<String, Utf8ConstantIndex>,
}

impl Default for ConstantsPool {
    fn default() -> Self {
        ConstantsPool::new()
    }
}

impl ConstantsPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            classes: HashMap::new(),
            fieldrefs: HashMap::new(),
            methodrefs: HashMap::new(),
            strings: HashMap::new(),
            integers: HashMap::new(),
            name_and_types: HashMap::new(),
            utf8s: HashMap::new(),
        }
    }

    /// Read a constant pool (including its leading count) from a class file
    pub fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<ConstantsPool, Error> {
        let count = u16::deserialize(reader)? as usize;
        let mut pool = ConstantsPool::new();
        while pool.constants.offset_len().0 < count {
            let constant = Constant::parse(reader)?;
            let offset = pool.constants.offset_len().0;
            if offset + constant.width() > count {
                return Err(Error::MalformedClass(format!(
                    "constant #{} overruns the pool count {}",
                    offset, count
                )));
            }
            let idx = ConstantIndex(offset as u16);
            pool.remember(idx, &constant);
            pool.constants.push(constant);
        }
        Ok(pool)
    }

    /// Record a parsed constant in the deduplication maps (first occurrence wins)
    fn remember(&mut self, idx: ConstantIndex, constant: &Constant) {
        match constant {
            Constant::Utf8(string) => {
                self.utf8s
                    .entry(string.clone())
                    .or_insert(Utf8ConstantIndex(idx));
            }
            Constant::Class(name) => {
                self.classes.entry(*name).or_insert(ClassConstantIndex(idx));
            }
            Constant::String(utf8) => {
                self.strings.entry(*utf8).or_insert(StringConstantIndex(idx));
            }
            Constant::Integer(integer) => {
                self.integers.entry(*integer).or_insert(idx);
            }
            Constant::NameAndType { name, descriptor } => {
                self.name_and_types
                    .entry((*name, *descriptor))
                    .or_insert(NameAndTypeConstantIndex(idx));
            }
            Constant::FieldRef(class, name_and_type) => {
                self.fieldrefs
                    .entry((*class, *name_and_type))
                    .or_insert(FieldRefConstantIndex(idx));
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                self.methodrefs
                    .entry((*class, *name_and_type, *is_interface))
                    .or_insert(MethodRefConstantIndex(idx));
            }
            _ => (),
        }
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        let offset = self.constants.offset_len().0;
        if offset + constant.width() > u16::MAX as usize {
            return Err(Error::ConstantPoolOverflow {
                constant,
                offset: offset as u16,
            });
        }
        self.constants.push(constant);
        Ok(ConstantIndex(offset as u16))
    }

    /// Number of entries (counting `long` and `double` twice) plus one, as in the class file
    pub fn count(&self) -> u16 {
        self.constants.offset_len().0 as u16
    }

    /// Look up a constant by its index
    pub fn get(&self, idx: ConstantIndex) -> Result<&Constant, Error> {
        self.constants
            .get_offset(Offset(idx.0 as usize))
            .ok()
            .ok_or(Error::MissingConstant(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> + '_ {
        self.constants
            .iter()
            .map(|(off, _, constant)| (ConstantIndex(off.0 as u16), constant))
    }

    /// Look up the string of a UTF-8 constant
    pub fn utf8(&self, idx: Utf8ConstantIndex) -> Result<&str, Error> {
        match self.get(idx.0)? {
            Constant::Utf8(string) => Ok(string),
            _ => Err(Error::MissingConstant(idx.0)),
        }
    }

    /// Look up the name of a class constant (a binary name, or a descriptor for array classes)
    pub fn class_name(&self, idx: ClassConstantIndex) -> Result<&str, Error> {
        match self.get(idx.0)? {
            Constant::Class(name) => self.utf8(*name),
            _ => Err(Error::MissingConstant(idx.0)),
        }
    }

    /// Look up the owner, name, and descriptor of a field reference
    pub fn field_ref(&self, idx: FieldRefConstantIndex) -> Result<(&str, &str, &str), Error> {
        match self.get(idx.0)? {
            Constant::FieldRef(class, name_and_type) => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok((self.class_name(*class)?, name, descriptor))
            }
            _ => Err(Error::MissingConstant(idx.0)),
        }
    }

    /// Look up the owner, name, and descriptor of a method reference
    pub fn method_ref(&self, idx: MethodRefConstantIndex) -> Result<(&str, &str, &str), Error> {
        match self.get(idx.0)? {
            Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok((self.class_name(*class)?, name, descriptor))
            }
            _ => Err(Error::MissingConstant(idx.0)),
        }
    }

    /// Look up the name and descriptor of a name-and-type constant
    pub fn name_and_type(&self, idx: NameAndTypeConstantIndex) -> Result<(&str, &str), Error> {
        match self.get(idx.0)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(Error::MissingConstant(idx.0)),
        }
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8(&mut self, utf8: &str) -> Result<Utf8ConstantIndex, Error> {
        if let Some(idx) = self.utf8s.get(utf8) {
            return Ok(*idx);
        }
        let owned = utf8.to_owned();
        let idx = Utf8ConstantIndex(self.push_constant(Constant::Utf8(owned.clone()))?);
        self.utf8s.insert(owned, idx);
        Ok(idx)
    }

    /// Get or insert a class constant, given its name
    pub fn get_class(&mut self, name: &str) -> Result<ClassConstantIndex, Error> {
        let name = self.get_utf8(name)?;
        if let Some(idx) = self.classes.get(&name) {
            return Ok(*idx);
        }
        let idx = ClassConstantIndex(self.push_constant(Constant::Class(name))?);
        self.classes.insert(name, idx);
        Ok(idx)
    }

    /// Get or insert a string constant from the constant pool
    pub fn get_string(&mut self, string: &str) -> Result<StringConstantIndex, Error> {
        let utf8 = self.get_utf8(string)?;
        if let Some(idx) = self.strings.get(&utf8) {
            return Ok(*idx);
        }
        let idx = StringConstantIndex(self.push_constant(Constant::String(utf8))?);
        self.strings.insert(utf8, idx);
        Ok(idx)
    }

    /// Get or insert an integer constant from the constant pool
    pub fn get_integer(&mut self, integer: i32) -> Result<ConstantIndex, Error> {
        if let Some(idx) = self.integers.get(&integer) {
            return Ok(*idx);
        }
        let idx = self.push_constant(Constant::Integer(integer))?;
        self.integers.insert(integer, idx);
        Ok(idx)
    }

    /// Get or insert a name & type constant from the constant pool
    pub fn get_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        let key = (self.get_utf8(name)?, self.get_utf8(descriptor)?);
        if let Some(idx) = self.name_and_types.get(&key) {
            return Ok(*idx);
        }
        let constant = Constant::NameAndType {
            name: key.0,
            descriptor: key.1,
        };
        let idx = NameAndTypeConstantIndex(self.push_constant(constant)?);
        self.name_and_types.insert(key, idx);
        Ok(idx)
    }

    /// Get or insert a `CONSTANT_Fieldref_info`
    pub fn get_field_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<FieldRefConstantIndex, Error> {
        let key = (
            self.get_class(class)?,
            self.get_name_and_type(name, descriptor)?,
        );
        if let Some(idx) = self.fieldrefs.get(&key) {
            return Ok(*idx);
        }
        let idx = FieldRefConstantIndex(self.push_constant(Constant::FieldRef(key.0, key.1))?);
        self.fieldrefs.insert(key, idx);
        Ok(idx)
    }

    /// Get or insert a `CONSTANT_Methodref_info` or `CONSTANT_InterfaceMethodref_info`
    pub fn get_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, Error> {
        let key = (
            self.get_class(class)?,
            self.get_name_and_type(name, descriptor)?,
            is_interface,
        );
        if let Some(idx) = self.methodrefs.get(&key) {
            return Ok(*idx);
        }
        let constant = Constant::MethodRef {
            class: key.0,
            name_and_type: key.1,
            is_interface,
        };
        let idx = MethodRefConstantIndex(self.push_constant(constant)?);
        self.methodrefs.insert(key, idx);
        Ok(idx)
    }

    /// Add an attribute to the constant pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info)?;
        Ok(Attribute { name_index, info })
    }
}

impl Serialize for ConstantsPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.count().serialize(writer)?;
        for (_, _, constant) in &self.constants {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(f32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Modified UTF-8 bytes which do not decode to a valid Rust string (eg. lone surrogates)
    ///
    /// These are carried through untouched and never deduplicated against.
    RawUtf8(Vec<u8>),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// Depending on the method kind, this points to different things:
        ///
        ///   - `FieldRef` for `GetField`, `GetStatic`, `PutField`, `PutStatic`
        ///   - `MethodRef` for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    Module(Utf8ConstantIndex),
    Package(Utf8ConstantIndex),
}

impl Constant {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<Constant, Error> {
        let tag = u8::deserialize(reader)?;
        let constant = match tag {
            1 => {
                let len = u16::deserialize(reader)?;
                let bytes = read_bytes(reader, len as usize)?;
                match decode_modified_utf8(&bytes) {
                    Some(string) if encode_modified_utf8(&string) == bytes => {
                        Constant::Utf8(string)
                    }
                    _ => Constant::RawUtf8(bytes),
                }
            }
            3 => Constant::Integer(i32::deserialize(reader)?),
            4 => Constant::Float(f32::deserialize(reader)?),
            5 => Constant::Long(i64::deserialize(reader)?),
            6 => Constant::Double(f64::deserialize(reader)?),
            7 => Constant::Class(Utf8ConstantIndex::deserialize(reader)?),
            8 => Constant::String(Utf8ConstantIndex::deserialize(reader)?),
            9 => Constant::FieldRef(
                ClassConstantIndex::deserialize(reader)?,
                NameAndTypeConstantIndex::deserialize(reader)?,
            ),
            10 | 11 => Constant::MethodRef {
                class: ClassConstantIndex::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
                is_interface: tag == 11,
            },
            12 => Constant::NameAndType {
                name: Utf8ConstantIndex::deserialize(reader)?,
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            15 => Constant::MethodHandle {
                handle_kind: HandleKind::parse(reader)?,
                member: ConstantIndex::deserialize(reader)?,
            },
            16 => Constant::MethodType {
                descriptor: Utf8ConstantIndex::deserialize(reader)?,
            },
            17 => Constant::Dynamic {
                bootstrap_method: u16::deserialize(reader)?,
                name_and_type: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            18 => Constant::InvokeDynamic {
                bootstrap_method: u16::deserialize(reader)?,
                method_descriptor: NameAndTypeConstantIndex::deserialize(reader)?,
            },
            19 => Constant::Module(Utf8ConstantIndex::deserialize(reader)?),
            20 => Constant::Package(Utf8ConstantIndex::deserialize(reader)?),
            other => {
                return Err(Error::MalformedClass(format!(
                    "unknown constant pool tag {}",
                    other
                )))
            }
        };
        Ok(constant)
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        fn write_utf8_bytes<W: WriteBytesExt>(bytes: &[u8], writer: &mut W) -> std::io::Result<()> {
            1u8.serialize(writer)?;
            (bytes.len() as u16).serialize(writer)?;
            writer.write_all(bytes)
        }

        match self {
            Constant::Utf8(string) => write_utf8_bytes(&encode_modified_utf8(string), writer)?,
            Constant::RawUtf8(bytes) => write_utf8_bytes(bytes, writer)?,
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(bytes) => {
                8u8.serialize(writer)?;
                bytes.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                17u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = Vec::with_capacity(string.len());
    let mut units = [0u16; 2];
    for c in string.chars() {
        for unit in c.encode_utf16(&mut units).iter() {
            let code = *unit as u32;
            match code {
                0x0001..=0x007F => buffer.push(code as u8),
                0x0000 | 0x0080..=0x07FF => {
                    buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                    buffer.push((code & 0x3F) as u8 | 0b1000_0000);
                }
                _ => {
                    buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                    buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                    buffer.push((code & 0x3F) as u8 | 0b1000_0000);
                }
            }
        }
    }
    buffer
}

/// Decode modified UTF-8, returning `None` if the bytes are malformed or contain an unpaired
/// surrogate (which a Rust `String` cannot hold)
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(b0) = iter.next() {
        let unit = match b0 {
            0x01..=0x7F => b0 as u16,
            0xC0..=0xDF => {
                let b1 = continuation(iter.next())?;
                ((b0 as u16 & 0x1F) << 6) | b1
            }
            0xE0..=0xEF => {
                let b1 = continuation(iter.next())?;
                let b2 = continuation(iter.next())?;
                ((b0 as u16 & 0x0F) << 12) | (b1 << 6) | b2
            }
            _ => return None,
        };
        units.push(unit);
    }
    String::from_utf16(&units).ok()
}

fn continuation(byte: Option<u8>) -> Option<u16> {
    match byte {
        Some(b @ 0x80..=0xBF) => Some(b as u16 & 0x3F),
        _ => None,
    }
}

#[cfg(test)]
mod encode_modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(decode_modified_utf8(&[97, 192, 128, 97]).unwrap(), "a\x00a");
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
        assert_eq!(
            encode_modified_utf8("Nothing$"),
            vec![78, 111, 116, 104, 105, 110, 103, 36]
        );
    }

    #[test]
    fn two_and_three_byte_encodings() {
        let two = "ĄǍǞ";
        assert_eq!(encode_modified_utf8(two), vec![196, 132, 199, 141, 199, 158]);
        let three = "ऄअ";
        assert_eq!(
            encode_modified_utf8(three),
            vec![224, 164, 132, 224, 164, 133]
        );
        assert_eq!(decode_modified_utf8(&encode_modified_utf8(three)).unwrap(), three);
    }

    #[test]
    fn supplementary_characters() {
        let encoded = encode_modified_utf8("\u{10000}\u{10FFFF}");
        assert_eq!(
            encoded,
            vec![237, 160, 128, 237, 176, 128, 237, 175, 191, 237, 191, 191]
        );
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), "\u{10000}\u{10FFFF}");
    }

    #[test]
    fn lone_surrogates_do_not_decode() {
        assert_eq!(decode_modified_utf8(&[237, 160, 128]), None);
        assert_eq!(decode_modified_utf8(&[0]), None);
        assert_eq!(decode_modified_utf8(&[0xC0]), None);
    }
}

#[cfg(test)]
mod pool_tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn new_constants_are_deduplicated() {
        let mut pool = ConstantsPool::new();
        let a = pool.get_method_ref("a/B", "run", "()V", false).unwrap();
        let b = pool.get_method_ref("a/B", "run", "()V", false).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.method_ref(a).unwrap(), ("a/B", "run", "()V"));
        let class = pool.get_class("a/B").unwrap();
        assert_eq!(pool.class_name(class).unwrap(), "a/B");

        let hello = pool.get_string("hello").unwrap();
        assert_eq!(pool.get_string("hello").unwrap(), hello);
        assert_ne!(pool.get_string("world").unwrap(), hello);
    }

    #[test]
    fn parsed_pool_keeps_indices_and_wide_entries() {
        let mut pool = ConstantsPool::new();
        pool.push_constant(Constant::Long(5)).unwrap();
        let utf8 = pool.get_utf8("x").unwrap();
        assert_eq!(utf8, Utf8ConstantIndex(ConstantIndex(3)));
        let mut bytes = vec![];
        pool.serialize(&mut bytes).unwrap();

        let parsed = ConstantsPool::parse(&mut Cursor::new(&bytes[..])).unwrap();
        assert_eq!(parsed.count(), 4);
        assert_eq!(parsed.get(ConstantIndex(1)).unwrap(), &Constant::Long(5));
        assert!(parsed.get(ConstantIndex(2)).is_err());
        assert_eq!(parsed.utf8(utf8).unwrap(), "x");
    }

    #[test]
    fn parsed_pool_seeds_deduplication() {
        let mut pool = ConstantsPool::new();
        let class = pool.get_class("java/lang/Object").unwrap();
        let mut bytes = vec![];
        pool.serialize(&mut bytes).unwrap();

        let mut parsed = ConstantsPool::parse(&mut Cursor::new(&bytes[..])).unwrap();
        assert_eq!(parsed.get_class("java/lang/Object").unwrap(), class);
        assert_eq!(parsed.count(), pool.count());
    }
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the JVM specification:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2. The constant_pool
/// > index n+1 must be valid but is considered unusable.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ConstantIndex(pub u16);

macro_rules! typed_constant_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
        pub struct $name(pub ConstantIndex);

        impl From<$name> for ConstantIndex {
            fn from(idx: $name) -> ConstantIndex {
                idx.0
            }
        }

        impl Serialize for $name {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                self.0.serialize(writer)
            }
        }

        impl Deserialize for $name {
            fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
                ConstantIndex::deserialize(reader).map($name)
            }
        }
    };
}

typed_constant_index!(Utf8ConstantIndex);
typed_constant_index!(StringConstantIndex);
typed_constant_index!(NameAndTypeConstantIndex);
typed_constant_index!(ClassConstantIndex);
typed_constant_index!(FieldRefConstantIndex);
typed_constant_index!(
    /// Points at either a `Methodref` or an `InterfaceMethodref`
    MethodRefConstantIndex
);
typed_constant_index!(InvokeDynamicConstantIndex);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ConstantIndex {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> std::io::Result<Self> {
        u16::deserialize(reader).map(ConstantIndex)
    }
}

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    fn parse<R: ReadBytesExt>(reader: &mut R) -> Result<HandleKind, Error> {
        let kind = match u8::deserialize(reader)? {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            other => {
                return Err(Error::MalformedClass(format!(
                    "unknown method handle kind {}",
                    other
                )))
            }
        };
        Ok(kind)
    }
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let byte: u8 = match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        };
        byte.serialize(writer)
    }
}
