//! Method dispatch for servers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::*;
use crate::protocol::{
    ApplicationException, ApplicationExceptionKind, FieldType, InputProtocol, MessageHeader,
    MessageType, OutputProtocol,
};
use crate::server::{InvocationContext, Processor};

/// One method of a service.
///
/// `read_args` and `write_output` carry the struct encoding, which generated
/// code usually provides. An error from `call` is not written as a reply; it
/// propagates to whoever drives the processor.
#[async_trait]
pub trait Method: Send + Sync + 'static {
    type Args: Send;
    type Output: Send;

    fn read_args(&self, input: &mut dyn InputProtocol) -> Result<Self::Args>;

    async fn call(&self, args: Self::Args, context: &InvocationContext) -> Result<Self::Output>;

    fn write_output(&self, output: &mut dyn OutputProtocol, result: Self::Output) -> Result<()>;

    /// Oneway methods send no reply message. The transport is still flushed.
    fn oneway(&self) -> bool {
        false
    }
}

#[async_trait]
trait Dispatch: Send + Sync {
    async fn dispatch(
        &self,
        header: MessageHeader,
        input: &mut dyn InputProtocol,
        output: &mut dyn OutputProtocol,
        context: &InvocationContext,
    ) -> Result<()>;
}

#[async_trait]
impl<M: Method> Dispatch for M {
    async fn dispatch(
        &self,
        header: MessageHeader,
        input: &mut dyn InputProtocol,
        output: &mut dyn OutputProtocol,
        context: &InvocationContext,
    ) -> Result<()> {
        let args = self.read_args(input)?;
        input.read_message_end()?;

        let result = self.call(args, context).await?;

        if !self.oneway() {
            output.write_message_begin(&MessageHeader::new(
                header.name,
                MessageType::Reply,
                header.seq_id,
            ))?;
            self.write_output(output, result)?;
            output.write_message_end()?;
        }
        output.flush().await
    }
}

async fn reply_exception(
    header: &MessageHeader,
    input: &mut dyn InputProtocol,
    output: &mut dyn OutputProtocol,
    exception: ApplicationException,
) -> Result<()> {
    input.skip(FieldType::Struct)?;
    input.read_message_end()?;

    output.write_message_begin(&MessageHeader::new(
        header.name.clone(),
        MessageType::Exception,
        header.seq_id,
    ))?;
    exception.write(output)?;
    output.write_message_end()?;
    output.flush().await
}

/// Dispatches calls by method name.
#[derive(Default)]
pub struct ServiceProcessor {
    methods: HashMap<String, Box<dyn Dispatch>>,
}

impl ServiceProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<N: Into<String>, M: Method>(mut self, name: N, method: M) -> Self {
        self.methods.insert(name.into(), Box::new(method));
        self
    }
}

#[async_trait]
impl Processor for ServiceProcessor {
    async fn process_message(
        &self,
        header: MessageHeader,
        input: &mut dyn InputProtocol,
        output: &mut dyn OutputProtocol,
        context: &InvocationContext,
    ) -> Result<()> {
        match self.methods.get(&header.name) {
            Some(method) => {
                trace!(method = %header.name, seq_id = header.seq_id, "dispatching");
                method.dispatch(header, input, output, context).await
            }
            None => {
                debug!(method = %header.name, "unknown method");
                let exception = ApplicationException::new(
                    ApplicationExceptionKind::UnknownMethod,
                    format!("Unknown function {}", header.name),
                );
                reply_exception(&header, input, output, exception).await
            }
        }
    }
}

/// Dispatches `Service:method` calls to the processor registered for
/// `Service`, which sees the bare method name.
#[derive(Default)]
pub struct MultiplexedProcessor {
    services: HashMap<String, Arc<dyn Processor>>,
}

impl MultiplexedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<N: Into<String>, P: Processor + 'static>(
        mut self,
        service: N,
        processor: P,
    ) -> Self {
        self.services.insert(service.into(), Arc::new(processor));
        self
    }
}

#[async_trait]
impl Processor for MultiplexedProcessor {
    async fn process_message(
        &self,
        header: MessageHeader,
        input: &mut dyn InputProtocol,
        output: &mut dyn OutputProtocol,
        context: &InvocationContext,
    ) -> Result<()> {
        let (processor, method) = match header.service_and_method() {
            (Some(service), method) => match self.services.get(service) {
                Some(processor) => (processor.clone(), method.to_string()),
                None => {
                    let message = format!("Unknown service {}", service);
                    return reply_exception(
                        &header,
                        input,
                        output,
                        ApplicationException::new(ApplicationExceptionKind::UnknownMethod, message),
                    )
                    .await;
                }
            },
            (None, _) => {
                let message = format!(
                    "Service name not found in message name: {}. \
                     Did you forget to use a multiplexed client?",
                    header.name
                );
                return reply_exception(
                    &header,
                    input,
                    output,
                    ApplicationException::new(ApplicationExceptionKind::UnknownMethod, message),
                )
                .await;
            }
        };

        let header = MessageHeader::new(method, header.message_type, header.seq_id);
        processor.process_message(header, input, output, context).await
    }
}
