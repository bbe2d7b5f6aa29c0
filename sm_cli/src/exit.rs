//! Process exit codes. Scripts may branch on these, but they are not a
//! stable contract.

use std::fmt;

use sm_core::Error;

pub const USAGE: i32 = 1;
pub const MISSING_EXEC: i32 = 2;
pub const EXEC_NOT_FOUND: i32 = 3;
pub const ENVIRONMENT: i32 = 4;
pub const NORMALIZE: i32 = 5;
pub const BAD_PATH_ARG: i32 = 7;
pub const RENDER: i32 = 10;
pub const BAD_CONFIG: i32 = 40;
pub const INSTALL: i32 = 50;
pub const START: i32 = 100;
pub const STOP: i32 = 127;

/// A failure on its way out of `main`.
#[derive(Debug, PartialEq, Eq)]
pub struct Exit {
    pub code: i32,
    pub message: String,
}

impl Exit {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Environment errors always win over the caller's code.
    pub fn from_error(code: i32, error: &Error) -> Self {
        let code = if error.is_environment() {
            ENVIRONMENT
        } else {
            code
        };
        Self::new(code, error.to_string())
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub trait OrExit<T> {
    fn or_exit(self, code: i32) -> Result<T, Exit>;
}

impl<T> OrExit<T> for Result<T, Error> {
    fn or_exit(self, code: i32) -> Result<T, Exit> {
        self.map_err(|e| Exit::from_error(code, &e))
    }
}
