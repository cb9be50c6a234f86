use crate::jvm;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    BytecodeGen(jvm::Error),

    /// The rule asks for something that cannot be expressed in the method it targets
    MalformedRule { method: String, reason: String },
}

impl Error {
    pub(crate) fn malformed(method: impl fmt::Display, reason: impl Into<String>) -> Error {
        Error::MalformedRule {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BytecodeGen(err) => write!(f, "bytecode error: {}", err),
            Error::MalformedRule { method, reason } => {
                write!(f, "malformed rule for {}: {}", method, reason)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BytecodeGen(err) => Some(err),
            Error::MalformedRule { .. } => None,
        }
    }
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::BytecodeGen(err)
    }
}
