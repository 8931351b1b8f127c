//! Typed client stubs and the pending call table behind them.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::connection::Connection;
use crate::error::*;
use crate::protocol::{
    ApplicationException, ApplicationExceptionKind, InputProtocol, MessageHeader, MessageType,
    OutputProtocol, MULTIPLEX_SEPARATOR,
};
use crate::transport::TransformTransport;

/// Decodes the result struct of one method into the service's reply type.
///
/// An `Err` other than [`Error::Incomplete`] rejects the call with that error,
/// which is how declared exceptions reach the caller.
pub type Receiver<R> = fn(&mut dyn InputProtocol) -> Result<R>;

/// A service description, usually generated from an interface definition.
pub trait Service: Send + 'static {
    type Reply: Send + 'static;

    /// One receive handler per method that expects a reply.
    fn receivers() -> Vec<(&'static str, Receiver<Self::Reply>)>;
}

/// The key of the pending call table.
///
/// `Real` entries belong to waiting callers. The connection inserts a
/// `Synthetic` entry for the reply it is decoding, which relays to the `Real`
/// entry with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallToken {
    Real(i32),
    Synthetic(i32),
}

enum Pending<R> {
    Caller(oneshot::Sender<Result<R>>),
    Relay { real: i32 },
}

/// The type-erased view a [`Connection`] has of a client.
pub trait ClientStub: Send + Sync {
    fn has_receiver(&self, method: &str) -> bool;

    /// Inserts the relay entry for a reply with sequence id `seq_id`.
    fn insert_relay(&self, seq_id: i32);

    fn remove(&self, token: CallToken) -> bool;

    /// Decodes the body of a reply whose header has been read already and
    /// settles the call through the relay entry.
    fn recv(
        &self,
        method: &str,
        input: &mut dyn InputProtocol,
        message_type: MessageType,
        seq_id: i32,
    ) -> Result<()>;

    /// Fails the call with sequence id `seq_id`. Returns whether a caller was
    /// waiting for it.
    fn reject(&self, seq_id: i32, error: Error) -> bool;
}

struct State<R> {
    pending: HashMap<CallToken, Pending<R>>,
    receivers: HashMap<&'static str, Receiver<R>>,
}

struct Stub<R> {
    state: Mutex<State<R>>,
}

impl<R: Send + 'static> Stub<R> {
    fn new(receivers: Vec<(&'static str, Receiver<R>)>) -> Self {
        Stub {
            state: Mutex::new(State {
                pending: HashMap::new(),
                receivers: receivers.into_iter().collect(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<R>> {
        crate::lock(&self.state)
    }

    fn insert_caller(&self, seq_id: i32, sender: oneshot::Sender<Result<R>>) {
        self.state()
            .pending
            .insert(CallToken::Real(seq_id), Pending::Caller(sender));
    }

    fn receiver(&self, method: &str) -> Option<Receiver<R>> {
        self.state().receivers.get(method).copied()
    }

    /// Follows relays from `token` and hands `result` to the caller at the end.
    fn settle(&self, mut token: CallToken, result: Result<R>) -> bool {
        let sender = {
            let mut state = self.state();
            loop {
                match state.pending.remove(&token) {
                    Some(Pending::Relay { real }) => token = CallToken::Real(real),
                    Some(Pending::Caller(sender)) => break sender,
                    None => {
                        debug!(?token, "no pending call to settle");
                        return false;
                    }
                }
            }
        };
        // the caller resumes on its own task, never inside this call
        sender.send(result).is_ok()
    }
}

impl<R: Send + 'static> ClientStub for Stub<R> {
    fn has_receiver(&self, method: &str) -> bool {
        self.state().receivers.contains_key(method)
    }

    fn insert_relay(&self, seq_id: i32) {
        self.state()
            .pending
            .insert(CallToken::Synthetic(seq_id), Pending::Relay { real: seq_id });
    }

    fn remove(&self, token: CallToken) -> bool {
        self.state().pending.remove(&token).is_some()
    }

    fn recv(
        &self,
        method: &str,
        input: &mut dyn InputProtocol,
        message_type: MessageType,
        seq_id: i32,
    ) -> Result<()> {
        let result = match message_type {
            MessageType::Exception => {
                let exception = ApplicationException::read(input)?;
                input.read_message_end()?;
                Err(exception.into())
            }
            MessageType::Reply => {
                let receiver = self.receiver(method).ok_or_else(|| {
                    ApplicationException::new(
                        ApplicationExceptionKind::UnknownMethod,
                        format!("no receive handler for {}", method),
                    )
                })?;
                match receiver(input) {
                    Err(e) if e.is_incomplete() => return Err(e),
                    Ok(reply) => {
                        input.read_message_end()?;
                        Ok(reply)
                    }
                    Err(e) => Err(e),
                }
            }
            other => {
                return Err(ApplicationException::new(
                    ApplicationExceptionKind::InvalidMessageType,
                    format!("unexpected {:?} message in a reply", other),
                )
                .into())
            }
        };

        trace!(method, seq_id, ok = result.is_ok(), "settling call");
        self.settle(CallToken::Synthetic(seq_id), result);
        Ok(())
    }

    fn reject(&self, seq_id: i32, error: Error) -> bool {
        self.settle(CallToken::Real(seq_id), Err(error))
    }
}

/// A client of service `S` on a shared [`Connection`].
///
/// Method arguments are written by a closure so generated code (or a test)
/// controls the struct encoding:
///
/// ```ignore
/// let sum = client
///     .call("add", |out| {
///         out.write_struct_begin("add_args")?;
///         out.write_field_begin("num1", FieldType::I32, 1)?;
///         out.write_i32(1)?;
///         out.write_field_end()?;
///         out.write_field_stop()?;
///         out.write_struct_end()
///     })
///     .await?;
/// ```
pub struct Client<S: Service> {
    connection: Connection,
    stub: Arc<Stub<S::Reply>>,
    service: Option<String>,
    _service: PhantomData<fn() -> S>,
}

impl<S: Service> Client<S> {
    /// Registers the client as the connection's only, unmultiplexed client.
    pub fn new(connection: &Connection) -> Self {
        let stub = Arc::new(Stub::new(S::receivers()));
        connection.attach(None, stub.clone());
        Client {
            connection: connection.clone(),
            stub,
            service: None,
            _service: PhantomData,
        }
    }

    /// Registers the client under `service`; its calls are sent as
    /// `service:method`.
    pub fn multiplexed<N: Into<String>>(connection: &Connection, service: N) -> Self {
        let service = service.into();
        let stub = Arc::new(Stub::new(S::receivers()));
        connection.attach(Some(&service), stub.clone());
        Client {
            connection: connection.clone(),
            stub,
            service: Some(service),
            _service: PhantomData,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// Sends one call and waits for its reply.
    pub async fn call<F>(&self, method: &str, args: F) -> Result<S::Reply>
    where
        F: FnOnce(&mut dyn OutputProtocol) -> Result<()> + Send,
    {
        let seq_id = self.connection.next_seq_id();
        let bytes = self.encode(method, MessageType::Call, seq_id, args).await?;

        let (sender, receiver) = oneshot::channel();
        self.stub.insert_caller(seq_id, sender);
        if let Some(service) = &self.service {
            self.connection.route(seq_id, service);
        }

        if let Err(e) = self.connection.write(&bytes) {
            self.stub.remove(CallToken::Real(seq_id));
            self.connection.unroute(seq_id);
            return Err(e);
        }

        receiver.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Sends a call that expects no reply.
    pub async fn call_oneway<F>(&self, method: &str, args: F) -> Result<()>
    where
        F: FnOnce(&mut dyn OutputProtocol) -> Result<()> + Send,
    {
        let seq_id = self.connection.next_seq_id();
        let bytes = self.encode(method, MessageType::Oneway, seq_id, args).await?;
        self.connection.write(&bytes)
    }

    async fn encode<F>(
        &self,
        method: &str,
        message_type: MessageType,
        seq_id: i32,
        args: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce(&mut dyn OutputProtocol) -> Result<()> + Send,
    {
        let name = match &self.service {
            Some(service) => format!("{}{}{}", service, MULTIPLEX_SEPARATOR, method),
            None => method.to_string(),
        };

        let transport = Arc::new(TransformTransport::new());
        let mut output = self.connection.protocol().output(transport.clone());
        output.write_message_begin(&MessageHeader::new(name, message_type, seq_id))?;
        args(&mut *output)?;
        output.write_message_end()?;
        output.flush().await?;
        transport.read_all()
    }
}
