use std::error::Error;
use std::io::{self, ErrorKind};

use http::StatusCode;
use rusqlite::ErrorCode;

pub(crate) type DavResult<T> = Result<T, DavError>;

/// Everything that can stop a request before it produces a regular response.
///
/// Handlers return these up to the dispatcher, which turns them into
/// a response. Nothing below the dispatcher writes response framing.
#[derive(Debug)]
pub(crate) enum DavError {
    NotFound,
    /// missing intermediate collection, bad destination parent, etc.
    Conflict(&'static str),
    Forbidden(&'static str),
    PreconditionFailed,
    Locked,
    UnsupportedMediaType,
    /// bad header or body grammar.
    MalformedRequest(String),
    MethodNotAllowed,
    UnknownDavMethod,
    InvalidPath,
    PayloadTooLarge,
    Status(StatusCode),
    StatusClose(StatusCode),
    /// the store reported a concurrent writer. retried once by the dispatcher.
    Busy(rusqlite::Error),
    Db(rusqlite::Error),
    XmlParseError(xmltree::ParseError),
    XmlWriterError(xml::writer::Error),
    JsonError(serde_json::Error),
    IoError(io::Error),
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::Busy(e) => Some(e),
            DavError::Db(e) => Some(e),
            DavError::XmlParseError(e) => Some(e),
            DavError::XmlWriterError(e) => Some(e),
            DavError::JsonError(e) => Some(e),
            DavError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::NotFound => write!(f, "not found"),
            DavError::Conflict(why) => write!(f, "conflict: {why}"),
            DavError::Forbidden(why) => write!(f, "forbidden: {why}"),
            DavError::PreconditionFailed => write!(f, "precondition failed"),
            DavError::Locked => write!(f, "resource is locked"),
            DavError::UnsupportedMediaType => write!(f, "unsupported request body"),
            DavError::MalformedRequest(why) => write!(f, "malformed request: {why}"),
            DavError::MethodNotAllowed => write!(f, "method not allowed"),
            DavError::UnknownDavMethod => write!(f, "unknown method"),
            DavError::InvalidPath => write!(f, "invalid path"),
            DavError::PayloadTooLarge => write!(f, "request body too large"),
            DavError::Status(s) | DavError::StatusClose(s) => write!(f, "{s}"),
            DavError::Busy(e) => write!(f, "store busy: {e}"),
            DavError::Db(e) => write!(f, "store error: {e}"),
            DavError::XmlParseError(e) => write!(f, "XML parse error: {e}"),
            DavError::XmlWriterError(e) => write!(f, "XML write error: {e}"),
            DavError::JsonError(e) => write!(f, "JSON error: {e}"),
            DavError::IoError(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

impl From<rusqlite::Error> for DavError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => DavError::Busy(e),
            _ => DavError::Db(e),
        }
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(e: xmltree::ParseError) -> Self {
        DavError::XmlParseError(e)
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(e: xml::writer::Error) -> Self {
        DavError::XmlWriterError(e)
    }
}

impl From<serde_json::Error> for DavError {
    fn from(e: serde_json::Error) -> Self {
        DavError::JsonError(e)
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl DavError {
    pub(crate) fn malformed(why: impl Into<String>) -> DavError {
        DavError::MalformedRequest(why.into())
    }

    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::NotFound => StatusCode::NOT_FOUND,
            DavError::Conflict(_) => StatusCode::CONFLICT,
            DavError::Forbidden(_) => StatusCode::FORBIDDEN,
            DavError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            DavError::Locked => StatusCode::LOCKED,
            DavError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            DavError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            DavError::UnknownDavMethod => StatusCode::METHOD_NOT_ALLOWED,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::XmlParseError(_) => StatusCode::BAD_REQUEST,
            DavError::IoError(e) => match e.kind() {
                ErrorKind::UnexpectedEof => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            DavError::Busy(_)
            | DavError::Db(_)
            | DavError::XmlWriterError(_)
            | DavError::JsonError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        match self {
            DavError::StatusClose(_) | DavError::PayloadTooLarge => true,
            DavError::IoError(e) => e.kind() == ErrorKind::UnexpectedEof,
            _ => false,
        }
    }

    /// Short reason sent as the body of an error response.
    ///
    /// Internal failures are not described to the client.
    pub(crate) fn reason(&self) -> Option<String> {
        match self {
            DavError::Conflict(why) | DavError::Forbidden(why) => Some(why.to_string()),
            DavError::MalformedRequest(why) => Some(why.clone()),
            DavError::XmlParseError(_) => Some("malformed XML body".to_string()),
            _ => None,
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        matches!(self, DavError::Busy(_))
    }
}
