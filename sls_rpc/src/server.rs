//! The server side of the channel: one request and one reply per invocation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::instrument;

use crate::error::*;
use crate::protocol::{
    BinaryProtocolFactory, InputProtocol, MessageHeader, OutputProtocol, ProtocolFactory,
};
use crate::transport::{ReplyCallback, ServerTransport};

/// What the hosting platform knows about the running invocation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    #[serde(rename = "awsRequestId", default)]
    pub request_id: String,
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub function_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    /// Anything else the platform passed along.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Something the platform can invoke: one payload in, one payload out.
#[async_trait]
pub trait Function: Send + Sync {
    async fn call(&self, payload: &[u8], context: InvocationContext) -> Result<String>;
}

/// Handles one request message and writes its reply.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(
        &self,
        input: &mut dyn InputProtocol,
        output: &mut dyn OutputProtocol,
        context: &InvocationContext,
    ) -> Result<()> {
        let header = input.read_message_begin()?;
        self.process_message(header, input, output, context).await
    }

    /// Like [`Processor::process`], with the message header already read.
    async fn process_message(
        &self,
        header: MessageHeader,
        input: &mut dyn InputProtocol,
        output: &mut dyn OutputProtocol,
        context: &InvocationContext,
    ) -> Result<()>;
}

/// Serves a [`Processor`] through function invocations.
pub struct LambdaServer<P> {
    processor: Arc<P>,
    protocol: Arc<dyn ProtocolFactory>,
}

impl<P: Processor> LambdaServer<P> {
    pub fn new(processor: P) -> Self {
        Self::with_protocol(processor, Arc::new(BinaryProtocolFactory))
    }

    pub fn with_protocol(processor: P, protocol: Arc<dyn ProtocolFactory>) -> Self {
        LambdaServer {
            processor: Arc::new(processor),
            protocol,
        }
    }

    /// Processes one invocation. `callback` receives the framed reply when the
    /// processor flushes it.
    ///
    /// Errors raised while processing are returned, not turned into replies.
    #[instrument(level = "debug", skip_all, fields(request_id = %context.request_id))]
    pub async fn handle(
        &self,
        payload: Option<&[u8]>,
        context: &InvocationContext,
        callback: ReplyCallback,
    ) -> Result<()> {
        let transport = Arc::new(ServerTransport::new(payload, callback)?);
        let mut input = self.protocol.input(transport.clone());
        let mut output = self.protocol.output(transport);
        self.processor.process(&mut *input, &mut *output, context).await
    }

    /// Processes one invocation and returns the framed reply.
    pub async fn call(
        &self,
        payload: Option<&[u8]>,
        context: &InvocationContext,
    ) -> Result<String> {
        let (sender, receiver) = oneshot::channel();
        self.handle(
            payload,
            context,
            Box::new(move |reply: String| {
                let _ = sender.send(reply);
            }),
        )
        .await?;
        receiver.await.map_err(|_| Error::NoReply)
    }
}

#[async_trait]
impl<P: Processor> Function for LambdaServer<P> {
    async fn call(&self, payload: &[u8], context: InvocationContext) -> Result<String> {
        Self::call(self, Some(payload), &context).await
    }
}
