use std::fmt;

use failure::Backtrace;
use failure::Context;
use failure::Fail;
use slog::Record;
use slog::Serializer;
use slog::KV;

/// Error information returned by functions in case of errors.
#[derive(Debug)]
pub struct Error(Context<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.get_context()
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error(inner)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error(Context::new(kind))
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.0.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.0.backtrace()
    }

    fn name(&self) -> Option<&str> {
        self.kind().kind_name()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Exhaustive list of possible errors emitted by this crate.
#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "authentication mechanism must be set when a password is given")]
    AuthMechanismMissing,

    #[fail(display = "unknown authentication mechanism '{}'", _0)]
    AuthMechanismUnknown(String),

    #[fail(display = "authentication mechanism {} requires a source database", _0)]
    AuthSourceMissing(&'static str),

    #[fail(display = "authentication mechanism {} requires a username", _0)]
    AuthUsernameMissing(&'static str),

    #[fail(display = "invalid value '{}' for configuration option '{}'", _1, _0)]
    ConfigInvalid(&'static str, String),

    #[fail(display = "unable to load configuration")]
    ConfigLoad,

    #[fail(display = "required configuration option '{}' not set", _0)]
    ConfigMissing(&'static str),

    #[fail(display = "unable to connect to MongoDB at '{}'", _0)]
    Connect(String),

    #[fail(display = "failed to read MongoDB cursor for collection '{}'", _0)]
    CursorFault(String),

    #[fail(display = "MongoDB health check against database '{}' failed", _0)]
    HealthCheck(String),

    #[fail(display = "MongoDB health check returned a non-ok response ({})", _0)]
    HealthCheckFailed(String),

    #[fail(display = "connector is not connected to MongoDB")]
    NotConnected,

    #[fail(display = "unable to write output")]
    Output,

    #[fail(display = "unsupported constructor '{}' in query", _0)]
    QueryConstructor(String),

    #[fail(display = "MongoDB find on collection '{}' failed", _0)]
    QueryOp(String),

    #[fail(display = "query must be a document, found {}", _0)]
    QueryNotObject(String),

    #[fail(display = "unable to parse query expression")]
    QueryParse,

    #[fail(display = "invalid query syntax: {}", _0)]
    QuerySyntax(&'static str),

    #[fail(display = "no more rows available from collection '{}'", _0)]
    SequenceExhausted(String),
}

impl ErrorKind {
    fn kind_name(&self) -> Option<&'static str> {
        let name = match self {
            ErrorKind::AuthMechanismMissing => "AuthMechanismMissing",
            ErrorKind::AuthMechanismUnknown(_) => "AuthMechanismUnknown",
            ErrorKind::AuthSourceMissing(_) => "AuthSourceMissing",
            ErrorKind::AuthUsernameMissing(_) => "AuthUsernameMissing",
            ErrorKind::ConfigInvalid(_, _) => "ConfigInvalid",
            ErrorKind::ConfigLoad => "ConfigLoad",
            ErrorKind::ConfigMissing(_) => "ConfigMissing",
            ErrorKind::Connect(_) => "Connect",
            ErrorKind::CursorFault(_) => "CursorFault",
            ErrorKind::HealthCheck(_) => "HealthCheck",
            ErrorKind::HealthCheckFailed(_) => "HealthCheckFailed",
            ErrorKind::NotConnected => "NotConnected",
            ErrorKind::Output => "Output",
            ErrorKind::QueryConstructor(_) => "QueryConstructor",
            ErrorKind::QueryOp(_) => "QueryOp",
            ErrorKind::QueryNotObject(_) => "QueryNotObject",
            ErrorKind::QueryParse => "QueryParse",
            ErrorKind::QuerySyntax(_) => "QuerySyntax",
            ErrorKind::SequenceExhausted(_) => "SequenceExhausted",
        };
        Some(name)
    }

    /// Broad class of the error, as seen by the import pipeline.
    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorKind::ConfigInvalid(_, _) | ErrorKind::ConfigLoad | ErrorKind::ConfigMissing(_) => {
                ErrorClass::Config
            }
            ErrorKind::AuthMechanismMissing
            | ErrorKind::AuthMechanismUnknown(_)
            | ErrorKind::AuthSourceMissing(_)
            | ErrorKind::AuthUsernameMissing(_) => ErrorClass::Auth,
            ErrorKind::Connect(_) | ErrorKind::HealthCheck(_) | ErrorKind::HealthCheckFailed(_) => {
                ErrorClass::Connect
            }
            ErrorKind::NotConnected
            | ErrorKind::QueryOp(_)
            | ErrorKind::QueryConstructor(_)
            | ErrorKind::QueryNotObject(_)
            | ErrorKind::QueryParse
            | ErrorKind::QuerySyntax(_) => ErrorClass::Query,
            ErrorKind::CursorFault(_) | ErrorKind::SequenceExhausted(_) => ErrorClass::Cursor,
            ErrorKind::Output => ErrorClass::Output,
        }
    }
}

/// Coarse grouping of `ErrorKind`s.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum ErrorClass {
    /// Authentication settings are missing or not recognised.
    Auth,

    /// Required configuration is missing or invalid.
    Config,

    /// The client could not connect or the health check failed.
    Connect,

    /// A cursor failed while rows were being read.
    Cursor,

    /// Results could not be written out.
    Output,

    /// A query could not be parsed or executed.
    Query,
}

/// Short form alias for functions returning `Error`s.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Format a `Fail` and its chain of causes into a single message.
pub fn format_fail(fail: &dyn Fail) -> String {
    let mut message = fail.to_string();
    let mut cause = fail.cause();
    while let Some(inner) = cause {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        cause = inner.cause();
    }
    message
}

/// Structured logging details for an `Error`.
///
/// Use as the last item of a `slog` key/value list:
/// `error!(logger, "Query failed"; failure_info(&error))`.
pub fn failure_info(error: &Error) -> FailureInfo {
    FailureInfo {
        kind: error.kind().kind_name().unwrap_or("Unknown"),
        message: format_fail(error),
    }
}

/// See `failure_info`.
pub struct FailureInfo {
    kind: &'static str,
    message: String,
}

impl KV for FailureInfo {
    fn serialize(&self, _: &Record, serializer: &mut dyn Serializer) -> slog::Result {
        serializer.emit_str("error.kind", self.kind)?;
        serializer.emit_str("error.message", &self.message)?;
        Ok(())
    }
}
