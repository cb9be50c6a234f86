use super::class_file::{Constant, ConstantIndex};
use super::code::SynLabel;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// The input is not a well-formed class file
    MalformedClass(String),

    /// Adding this constant would push the pool past 65535 entries
    ConstantPoolOverflow {
        constant: Constant,
        offset: u16,
    },

    /// Index does not point at a constant of the expected kind
    MissingConstant(ConstantIndex),

    /// Field or method descriptor could not be parsed
    BadDescriptor(String),

    /// Method code longer than 65535 bytes
    MethodCodeOverflow(usize),

    /// Conditional jump whose target is out of 16-bit range
    BranchOverflow {
        from: usize,
        to: usize,
    },

    MaxStackOverflow(usize),
    MaxLocalsOverflow(usize),

    /// A label is referred to but never placed in the code
    UnknownLabel(SynLabel),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::MalformedClass(msg) => write!(f, "malformed class file: {}", msg),
            Error::ConstantPoolOverflow { constant, offset } => write!(
                f,
                "constant pool overflow at index {} adding {:?}",
                offset, constant
            ),
            Error::MissingConstant(idx) => write!(f, "missing or mistyped constant #{}", idx.0),
            Error::BadDescriptor(desc) => write!(f, "bad descriptor: {}", desc),
            Error::MethodCodeOverflow(len) => write!(f, "method code is {} bytes long", len),
            Error::BranchOverflow { from, to } => {
                write!(f, "branch from {} to {} does not fit in 16 bits", from, to)
            }
            Error::MaxStackOverflow(depth) => write!(f, "max stack of {} is too large", depth),
            Error::MaxLocalsOverflow(slots) => write!(f, "max locals of {} is too large", slots),
            Error::UnknownLabel(lbl) => write!(f, "label {:?} is never placed", lbl),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}
