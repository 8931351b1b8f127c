//!Binary RPC over single-shot function invocations.
//!
//!The binary RPC protocol expects a persistent byte stream with many calls in
//!flight. A function invocation carries exactly one payload each way. This crate
//!bridges the two:
//!
//!- on the client side a [`Connection`] sends every outbound message as its own
//!  invocation and routes the single reply back to the [`Client`] call waiting
//!  for it, including multiplexed clients sharing one connection;
//!- on the server side a [`LambdaServer`] decodes one invocation payload, runs a
//!  [`Processor`] over it and returns the reply through a callback.
//!
//!Payloads cross the invocation boundary as a JSON string holding the base64 of
//!the protocol bytes, see [`framing`].
//!
//!The invocation channel is abstracted by [`Invoker`]. [`LocalInvoker`] runs
//!registered functions in-process:
//!
//!```rust
//!# use std::sync::Arc;
//!# use async_trait::async_trait;
//!use sls_rpc::*;
//!
//!struct Echo;
//!
//!#[async_trait]
//!impl Method for Echo {
//!    type Args = String;
//!    type Output = String;
//!
//!    fn read_args(&self, input: &mut dyn InputProtocol) -> Result<String> {
//!        input.read_string()
//!    }
//!
//!    async fn call(&self, args: String, _context: &InvocationContext) -> Result<String> {
//!        Ok(args)
//!    }
//!
//!    fn write_output(&self, output: &mut dyn OutputProtocol, result: String) -> Result<()> {
//!        output.write_string(&result)
//!    }
//!}
//!
//!struct EchoService;
//!
//!fn recv_echo(input: &mut dyn InputProtocol) -> Result<String> {
//!    input.read_string()
//!}
//!
//!impl Service for EchoService {
//!    type Reply = String;
//!
//!    fn receivers() -> Vec<(&'static str, Receiver<String>)> {
//!        vec![("echo", recv_echo as Receiver<String>)]
//!    }
//!}
//!
//!# #[tokio::main]
//!# async fn main() -> Result<()> {
//!let invoker = LocalInvoker::new();
//!invoker.register("echo", LambdaServer::new(ServiceProcessor::new().method("echo", Echo)));
//!
//!let (connection, _events) = Connection::new(ConnectionConfig::new("echo"), Arc::new(invoker));
//!let client = Client::<EchoService>::new(&connection);
//!let reply = client.call("echo", |out| out.write_string("hello")).await?;
//!assert_eq!(reply, "hello");
//!# Ok(())
//!# }
//!```

#![deny(unsafe_code)]

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use crate::client::{CallToken, Client, ClientStub, Receiver, Service};
pub use crate::config::ConnectionConfig;
pub use crate::connection::{Connection, ConnectionEvent};
pub use crate::error::*;
pub use crate::invoke::{
    ChannelError, FunctionTarget, InvocationOutcome, InvocationType, InvokeRequest, InvokeResponse,
    Invoker,
};
pub use crate::local::LocalInvoker;
pub use crate::processor::{Method, MultiplexedProcessor, ServiceProcessor};
pub use crate::protocol::{
    ApplicationException, ApplicationExceptionKind, BinaryProtocol, BinaryProtocolFactory,
    FieldHeader, FieldType, InputProtocol, ListHeader, MessageHeader, MessageType, OutputProtocol,
    ProtocolFactory,
};
pub use crate::server::{Function, InvocationContext, LambdaServer, Processor};
pub use crate::transport::{
    ClientTransport, Identity, ReplyCallback, ServerTransport, Transform, TransformTransport,
    Transport, TransportExt,
};

mod client;
pub mod config;
mod connection;
mod error;
pub mod framing;
pub mod invoke;
mod local;
mod processor;
pub mod protocol;
mod server;
pub mod transport;

/// Locks a mutex that only guards plain tables, ignoring poisoning.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
