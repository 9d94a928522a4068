//! Bridge errors - one enum for every failure crossing the host/Lua boundary
//!
//! Design: errors travel into Lua wrapped by `mlua::Error::external` and are
//! recovered intact on the way back out, so a conversion failure raised three
//! calls deep still reaches the host as a conversion failure.

use std::fmt;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Conversion,
    Invocation,
    RuntimeScript,
    Binding,
    Access,
    Unsupported,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Conversion => "conversion",
            Self::Invocation => "invocation",
            Self::RuntimeScript => "script",
            Self::Binding => "binding",
            Self::Access => "access",
            Self::Unsupported => "unsupported",
            Self::Config => "config",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("cannot convert {from} to {to}{}", detail(.reason))]
    Conversion {
        from: String,
        to: String,
        reason: Option<String>,
    },

    #[error("key of type {found} does not match key type {expected} of {container}")]
    KeyType {
        container: String,
        expected: String,
        found: String,
    },

    #[error("{callee}: expected {expected}{} argument(s), got {got}", or_more(.variadic))]
    Arity {
        callee: String,
        expected: usize,
        got: usize,
        variadic: bool,
    },

    #[error("host function failed: {0}")]
    Invocation(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("binding error: {0}")]
    Binding(String),

    #[error("{ty}: {message}")]
    Access { ty: String, message: String },

    #[error("unsupported type {0}")]
    Unsupported(String),

    #[error("config error: {0}")]
    Config(String),
}

fn or_more(variadic: &bool) -> &'static str {
    if *variadic {
        " or more"
    } else {
        ""
    }
}

fn detail(reason: &Option<String>) -> String {
    reason
        .as_ref()
        .map(|r| format!(" ({r})"))
        .unwrap_or_default()
}

impl Error {
    pub fn conversion(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self::Conversion {
            from: from.to_string(),
            to: to.to_string(),
            reason: None,
        }
    }

    pub fn conversion_because(
        from: impl fmt::Display,
        to: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conversion {
            from: from.to_string(),
            to: to.to_string(),
            reason: Some(reason.into()),
        }
    }

    pub fn access(ty: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Access {
            ty: ty.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conversion { .. } | Self::KeyType { .. } => ErrorKind::Conversion,
            Self::Arity { .. } | Self::Invocation(_) => ErrorKind::Invocation,
            Self::Script(_) => ErrorKind::RuntimeScript,
            Self::Binding(_) => ErrorKind::Binding,
            Self::Access { .. } => ErrorKind::Access,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Recover the bridge error carried inside a Lua error, if any
    pub fn from_lua(err: &mlua::Error) -> Option<&Error> {
        match err {
            mlua::Error::CallbackError { cause, .. } => Self::from_lua(cause),
            mlua::Error::WithContext { cause, .. } => Self::from_lua(cause),
            mlua::Error::ExternalError(inner) => inner.downcast_ref::<Error>(),
            _ => None,
        }
    }
}

impl From<mlua::Error> for Error {
    fn from(err: mlua::Error) -> Self {
        match Self::from_lua(&err) {
            Some(inner) => inner.clone(),
            None => Self::Script(err.to_string()),
        }
    }
}

impl From<Error> for mlua::Error {
    fn from(err: Error) -> Self {
        mlua::Error::external(err)
    }
}
