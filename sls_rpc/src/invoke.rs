//! The invocation channel: one payload in, one payload out.

use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::error::*;
use crate::framing::{unwrap_payload, wrap_payload};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvocationType {
    #[default]
    RequestResponse,
    Event,
    DryRun,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    pub function_name: String,
    pub qualifier: Option<String>,
    pub invocation_type: InvocationType,
    /// The framed payload, see [`crate::framing`].
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvokeResponse {
    pub status_code: i64,
    /// Set when the function ran but failed, e.g. `"Unhandled"`.
    pub function_error: Option<String>,
    pub executed_version: Option<String>,
    pub payload: Vec<u8>,
}

/// The invocation itself failed: unknown function, throttling, network.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ChannelError {
    pub message: String,
    pub status_code: Option<i64>,
    pub code: Option<String>,
}

impl ChannelError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        ChannelError {
            message: message.into(),
            status_code: None,
            code: None,
        }
    }

    pub fn with_status(mut self, status_code: i64) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_code<S: Into<String>>(mut self, code: S) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// A client for the function invocation service.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        request: InvokeRequest,
    ) -> std::result::Result<InvokeResponse, ChannelError>;
}

/// The function, and optionally the version or alias, a connection talks to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FunctionTarget {
    pub name: String,
    #[serde(default)]
    pub qualifier: Option<String>,
}

impl FunctionTarget {
    pub fn new<S: Into<String>>(name: S) -> Self {
        FunctionTarget {
            name: name.into(),
            qualifier: None,
        }
    }

    pub fn with_qualifier<S: Into<String>>(mut self, qualifier: S) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Builds the request that carries `bytes` to this target.
    pub fn request(&self, bytes: &[u8]) -> InvokeRequest {
        InvokeRequest {
            function_name: self.name.clone(),
            qualifier: self.qualifier.clone(),
            invocation_type: InvocationType::RequestResponse,
            payload: wrap_payload(bytes).into_bytes(),
        }
    }

    /// Performs exactly one invocation and classifies what came back.
    pub async fn invoke(&self, invoker: &dyn Invoker, bytes: &[u8]) -> InvocationOutcome {
        debug!(function = %self.name, qualifier = ?self.qualifier, len = bytes.len(), "invoking");
        InvocationOutcome::classify(invoker.invoke(self.request(bytes)).await)
    }
}

/// The result of one invocation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    /// The unwrapped reply bytes.
    Success(Vec<u8>),
    FunctionError {
        status_code: i64,
        error_type: Option<String>,
        payload: Vec<u8>,
    },
    ChannelFailure(ChannelError),
    DecodeFailure(PayloadDecodeError),
}

impl InvocationOutcome {
    pub fn classify(result: std::result::Result<InvokeResponse, ChannelError>) -> Self {
        let response = match result {
            Ok(response) => response,
            Err(e) => return InvocationOutcome::ChannelFailure(e),
        };

        if response.function_error.is_some() {
            return InvocationOutcome::FunctionError {
                status_code: response.status_code,
                error_type: response.function_error,
                payload: response.payload,
            };
        }

        match unwrap_payload(&response.payload) {
            Ok(bytes) => InvocationOutcome::Success(bytes),
            Err(e) => InvocationOutcome::DecodeFailure(e),
        }
    }

    pub fn into_result(self) -> Result<Vec<u8>> {
        match self {
            InvocationOutcome::Success(bytes) => Ok(bytes),
            InvocationOutcome::FunctionError {
                status_code,
                error_type,
                payload,
            } => Err(
                LambdaServerError::from_function_error(status_code, error_type, &payload).into(),
            ),
            InvocationOutcome::ChannelFailure(e) => Err(LambdaServerError::from(e).into()),
            InvocationOutcome::DecodeFailure(e) => Err(e.into()),
        }
    }
}
