use crate::jvm::class_file::{
    Attribute, ClassConstantIndex, ConstantIndex, ConstantsPool, Deserialize, Field, Method,
    Serialize, Version,
};
use crate::jvm::{ClassAccessFlags, Error};
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantsPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,

    /// Only `java/lang/Object` has no superclass
    pub super_class: Option<ClassConstantIndex>,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

    /// Parse a class file out of its bytes
    ///
    /// Trailing bytes after the last attribute are rejected.
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, Error> {
        let mut reader = Cursor::new(bytes);
        let class_file = ClassFile::read(&mut reader)?;
        if (reader.position() as usize) != bytes.len() {
            return Err(Error::MalformedClass(format!(
                "{} trailing bytes after class",
                bytes.len() - reader.position() as usize
            )));
        }
        Ok(class_file)
    }

    fn read<R: ReadBytesExt>(reader: &mut R) -> Result<ClassFile, Error> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != ClassFile::MAGIC {
            return Err(Error::MalformedClass(format!("bad magic {:02X?}", magic)));
        }
        let version = Version::deserialize(reader)?;
        let constants = ConstantsPool::parse(reader)?;
        let access_flags = ClassAccessFlags::deserialize(reader)?;
        let this_class = ClassConstantIndex::deserialize(reader)?;
        let super_class = match ConstantIndex::deserialize(reader)? {
            ConstantIndex(0) => None,
            idx => Some(ClassConstantIndex(idx)),
        };
        Ok(ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces: Vec::deserialize(reader)?,
            fields: Vec::deserialize(reader)?,
            methods: Vec::deserialize(reader)?,
            attributes: Vec::deserialize(reader)?,
        })
    }

    /// Name of the class, as in the `this_class` constant
    pub fn class_name(&self) -> Result<&str, Error> {
        self.constants.class_name(self.this_class)
    }

    /// Name of the superclass, if there is one
    pub fn super_class_name(&self) -> Result<Option<&str>, Error> {
        self.super_class
            .map(|idx| self.constants.class_name(idx))
            .transpose()
    }

    /// Names of the directly implemented interfaces
    pub fn interface_names(&self) -> Result<Vec<&str>, Error> {
        self.interfaces
            .iter()
            .map(|idx| self.constants.class_name(*idx))
            .collect()
    }

    /// Encode the class file back into bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![];
        self.serialize(&mut bytes)?;
        Ok(bytes)
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&ClassFile::MAGIC)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        match self.super_class {
            Some(super_class) => super_class.serialize(writer)?,
            None => 0u16.serialize(writer)?,
        }
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}
