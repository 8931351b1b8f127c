use serde_derive::{Deserialize, Serialize};

use crate::invoke::ChannelError;
use crate::protocol::ApplicationException;

/// All errors produced by transports, connections and servers.
///
/// `Error` is `Clone` so a single failure can both reject the pending call it
/// belongs to and be reported on the connection's event channel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Transport is closed")]
    TransportClosed,
    #[error("Connection is closed")]
    ConnectionClosed,
    #[error(transparent)]
    PayloadDecode(#[from] PayloadDecodeError),
    #[error(transparent)]
    LambdaServer(#[from] LambdaServerError),
    #[error(transparent)]
    Application(#[from] ApplicationException),
    /// The transport ran out of bytes before a value could be decoded.
    #[error("Input buffer underrun: {needed} more byte(s) needed")]
    Incomplete { needed: usize },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("{error_type}: {message}")]
    Handler { error_type: String, message: String },
    #[error("The processor finished without flushing a reply")]
    NoReply,
    #[error("The pending call was dropped before a reply arrived")]
    Cancelled,
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Wraps an error raised by application code running inside a server.
    ///
    /// The short type name of `E` is kept as the error type, which is what the
    /// invocation platform reports back to the caller.
    pub fn handler<E: std::error::Error>(e: E) -> Self {
        let full = std::any::type_name::<E>();
        let error_type = full.rsplit("::").next().unwrap_or(full).to_string();
        Error::Handler {
            error_type,
            message: e.to_string(),
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Error::Protocol(message.into())
    }

    /// The name reported as `errorType` when this error escapes a function.
    pub fn error_type(&self) -> &str {
        match self {
            Error::TransportClosed => "TransportClosedError",
            Error::ConnectionClosed => "ConnectionClosedError",
            Error::PayloadDecode(_) => "PayloadDecodeError",
            Error::LambdaServer(_) => "LambdaServerError",
            Error::Application(_) => "ApplicationException",
            Error::Incomplete { .. } => "InputBufferUnderrunError",
            Error::Protocol(_) => "ProtocolError",
            Error::Handler { error_type, .. } => error_type,
            Error::NoReply => "NoReplyError",
            Error::Cancelled => "CancelledError",
            Error::Config(_) => "ConfigError",
        }
    }

    /// The message reported as `errorMessage` when this error escapes a function.
    pub fn message(&self) -> String {
        match self {
            Error::Handler { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::Incomplete { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The invocation payload could not be unwrapped from its JSON/base64 framing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Failed decoding payload: {reason}")]
pub struct PayloadDecodeError {
    /// The raw payload as received, kept for diagnostics.
    pub payload: Vec<u8>,
    pub reason: String,
}

impl PayloadDecodeError {
    pub fn new<S: Into<String>>(payload: &[u8], reason: S) -> Self {
        PayloadDecodeError {
            payload: payload.to_vec(),
            reason: reason.into(),
        }
    }
}

/// The structured body the platform returns when a function fails.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct FunctionErrorPayload {
    #[serde(rename = "errorMessage")]
    pub error_message: String,
    #[serde(rename = "errorType", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(
        rename = "stackTrace",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub stack_trace: Vec<String>,
}

/// A failure of the invocation layer itself, not of the protocol.
///
/// Produced either when the invocation channel fails or when the invoked
/// function ran but reported an execution error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct LambdaServerError {
    pub status_code: Option<i64>,
    pub error_type: Option<String>,
    pub message: String,
    /// Parsed function error body, when the payload carried one.
    pub details: Option<FunctionErrorPayload>,
}

impl LambdaServerError {
    pub fn from_function_error(
        status_code: i64,
        error_type: Option<String>,
        payload: &[u8],
    ) -> Self {
        LambdaServerError {
            status_code: Some(status_code),
            error_type,
            message: String::from_utf8_lossy(payload).into_owned(),
            details: serde_json::from_slice(payload).ok(),
        }
    }
}

impl From<ChannelError> for LambdaServerError {
    fn from(e: ChannelError) -> Self {
        LambdaServerError {
            status_code: e.status_code,
            error_type: e.code,
            message: e.message,
            details: None,
        }
    }
}
