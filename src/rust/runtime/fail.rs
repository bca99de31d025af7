// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::libc::{
    c_int,
    EAGAIN,
    EALREADY,
    EIO,
    ENOMEM,
    ESRCH,
};
use ::std::{
    error,
    fmt,
    io,
};

//==============================================================================
// Structures
//==============================================================================

/// Failure
#[derive(Clone, PartialEq, Eq)]
pub struct Fail {
    /// Error code.
    pub errno: c_int,
    /// Cause.
    pub cause: String,
}

/// Resource exhaustion while creating a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocErr {
    /// The stack allocator ran out of its budget.
    OutOfStackMemory,
    /// The heap refused to back a new stack.
    OutOfMemory,
    /// The task table has no free slot left.
    TaskTableFull,
}

/// Rejected attempt to forcibly terminate a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeErr {
    /// No live task has this identifier.
    NoSuchTask,
    /// Another caller is already tearing the task down.
    AlreadyFreeing,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Failures
impl Fail {
    /// Creates a new Failure
    pub fn new(errno: i32, cause: &str) -> Self {
        Self {
            errno,
            cause: cause.to_string(),
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Display Trait Implementation for Failures
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Debug trait Implementation for Failures
impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Error Trait Implementation for Failures
impl error::Error for Fail {}

/// Conversion Trait Implementation for Fail
impl From<io::Error> for Fail {
    fn from(_: io::Error) -> Self {
        Self {
            errno: EIO,
            cause: "I/O error".to_string(),
        }
    }
}

impl fmt::Display for AllocErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocErr::OutOfStackMemory => write!(f, "stack budget exhausted"),
            AllocErr::OutOfMemory => write!(f, "out of memory"),
            AllocErr::TaskTableFull => write!(f, "task table is full"),
        }
    }
}

impl error::Error for AllocErr {}

impl From<AllocErr> for Fail {
    fn from(e: AllocErr) -> Self {
        match e {
            AllocErr::OutOfStackMemory | AllocErr::OutOfMemory => Fail::new(ENOMEM, &e.to_string()),
            AllocErr::TaskTableFull => Fail::new(EAGAIN, &e.to_string()),
        }
    }
}

impl fmt::Display for FreeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreeErr::NoSuchTask => write!(f, "no such task"),
            FreeErr::AlreadyFreeing => write!(f, "task is already being torn down"),
        }
    }
}

impl error::Error for FreeErr {}

impl From<FreeErr> for Fail {
    fn from(e: FreeErr) -> Self {
        match e {
            FreeErr::NoSuchTask => Fail::new(ESRCH, &e.to_string()),
            FreeErr::AlreadyFreeing => Fail::new(EALREADY, &e.to_string()),
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{
        AllocErr,
        Fail,
        FreeErr,
    };
    use ::anyhow::Result;

    #[test]
    fn errors_map_to_errno() -> Result<()> {
        crate::ensure_eq!(Fail::from(AllocErr::OutOfStackMemory).errno, libc::ENOMEM);
        crate::ensure_eq!(Fail::from(AllocErr::TaskTableFull).errno, libc::EAGAIN);
        crate::ensure_eq!(Fail::from(FreeErr::NoSuchTask).errno, libc::ESRCH);
        crate::ensure_eq!(Fail::from(FreeErr::AlreadyFreeing).errno, libc::EALREADY);
        Ok(())
    }

    #[test]
    fn display_carries_cause() -> Result<()> {
        let fail: Fail = Fail::new(libc::EINVAL, "bad capacity");
        crate::ensure_eq!(fail.to_string().contains("bad capacity"), true);
        Ok(())
    }
}
