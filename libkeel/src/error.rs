//! Error handling for the scanning core. The scanner itself never panics and
//! only returns `Err` for conditions that must stop the link; everything
//! recoverable goes through the diagnostics sink instead.

use std::fmt::Display;

/// A fatal link error. Carries a chain of context messages, innermost first.
#[derive(Debug, Clone)]
pub struct Error {
    message: String,
    context: Vec<String>,
}

pub type Result<T = (), E = Error> = core::result::Result<T, E>;

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Error {
            message: message.into(),
            context: Vec::new(),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for ctx in self.context.iter().rev() {
            write!(f, "{ctx}: ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::msg(value.to_string())
    }
}

/// Attaches extra context to errors as they propagate.
pub trait Context<T> {
    fn context(self, message: impl Display) -> Result<T, Error>;

    fn with_context(self, f: impl FnOnce() -> String) -> Result<T, Error>;
}

impl<T, E: Into<Error>> Context<T> for Result<T, E> {
    fn context(self, message: impl Display) -> Result<T, Error> {
        self.map_err(|e| {
            let mut error = e.into();
            error.context.push(message.to_string());
            error
        })
    }

    fn with_context(self, f: impl FnOnce() -> String) -> Result<T, Error> {
        self.map_err(|e| {
            let mut error = e.into();
            error.context.push(f());
            error
        })
    }
}

impl<T> Context<T> for Option<T> {
    fn context(self, message: impl Display) -> Result<T, Error> {
        self.ok_or_else(|| Error::msg(message.to_string()))
    }

    fn with_context(self, f: impl FnOnce() -> String) -> Result<T, Error> {
        self.ok_or_else(|| Error::msg(f()))
    }
}

/// Emits a warning that isn't attached to a particular input location.
pub fn warning(message: &str) {
    tracing::warn!("{message}");
}

#[macro_export]
macro_rules! error {
    ($($args:tt)*) => {
        $crate::error::Error::msg(format!($($args)*))
    };
}

#[macro_export]
macro_rules! bail {
    ($($args:tt)*) => {
        return Err($crate::error!($($args)*))
    };
}

#[macro_export]
macro_rules! ensure {
    ($condition:expr, $($args:tt)*) => {
        if !$condition {
            $crate::bail!($($args)*);
        }
    };
}
