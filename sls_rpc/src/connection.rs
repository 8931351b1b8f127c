//! The client side of the channel: one invocation per outbound message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, error, instrument, trace, warn};

use crate::client::{CallToken, ClientStub};
use crate::config::ConnectionConfig;
use crate::error::*;
use crate::invoke::{FunctionTarget, Invoker};
use crate::protocol::{
    ApplicationException, ApplicationExceptionKind, BinaryProtocolFactory, ProtocolFactory,
};
use crate::transport::{ClientTransport, TransformTransport, Transport};

/// Something that happened on a connection outside of any single call.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Open,
    Close,
    Error(Error),
}

#[derive(Default)]
struct Clients {
    top: Option<Arc<dyn ClientStub>>,
    services: HashMap<String, Arc<dyn ClientStub>>,
}

struct Inner {
    open: AtomicBool,
    target: FunctionTarget,
    invoker: Arc<dyn Invoker>,
    protocol: Arc<dyn ProtocolFactory>,
    next_seq_id: AtomicI32,
    clients: Mutex<Clients>,
    // seq id -> service name, for multiplexed calls in flight
    routes: Mutex<HashMap<i32, String>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

/// A connection to one function.
///
/// Each [`write`](Connection::write) invokes the function once with the written
/// message and decodes the reply into the client that is waiting for it.
/// Failures that no caller can see directly are reported on the event channel
/// returned by the constructor, and logged.
///
/// Writes spawn the invocation on the current tokio runtime.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub fn new(
        config: ConnectionConfig,
        invoker: Arc<dyn Invoker>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        Self::with_protocol(config, invoker, Arc::new(BinaryProtocolFactory))
    }

    pub fn with_protocol(
        config: ConnectionConfig,
        invoker: Arc<dyn Invoker>,
        protocol: Arc<dyn ProtocolFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let connection = Connection {
            inner: Arc::new(Inner {
                open: AtomicBool::new(true),
                target: config.target(),
                invoker,
                protocol,
                next_seq_id: AtomicI32::new(1),
                clients: Mutex::new(Clients::default()),
                routes: Mutex::new(HashMap::new()),
                events,
            }),
        };
        debug!(function = %connection.inner.target.name, "connection open");
        connection.emit(ConnectionEvent::Open);
        (connection, receiver)
    }

    pub fn target(&self) -> &FunctionTarget {
        &self.inner.target
    }

    pub fn protocol(&self) -> &Arc<dyn ProtocolFactory> {
        &self.inner.protocol
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        if !self.inner.open.swap(true, Ordering::SeqCst) {
            self.emit(ConnectionEvent::Open);
        }
    }

    /// Stops further writes. Invocations already sent still deliver replies.
    pub fn close(&self) {
        if self.inner.open.swap(false, Ordering::SeqCst) {
            self.emit(ConnectionEvent::Close);
        }
    }

    pub fn end(&self) {
        self.close()
    }

    pub(crate) fn next_seq_id(&self) -> i32 {
        self.inner.next_seq_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn attach(&self, service: Option<&str>, stub: Arc<dyn ClientStub>) {
        let mut clients = crate::lock(&self.inner.clients);
        match service {
            Some(service) => {
                clients.services.insert(service.to_string(), stub);
            }
            None => clients.top = Some(stub),
        }
    }

    pub(crate) fn route(&self, seq_id: i32, service: &str) {
        crate::lock(&self.inner.routes).insert(seq_id, service.to_string());
    }

    pub(crate) fn unroute(&self, seq_id: i32) -> Option<String> {
        crate::lock(&self.inner.routes).remove(&seq_id)
    }

    fn client(&self, service: Option<&str>) -> Option<Arc<dyn ClientStub>> {
        let clients = crate::lock(&self.inner.clients);
        match service {
            Some(service) => clients.services.get(service).cloned(),
            None => clients.top.clone(),
        }
    }

    /// Sends one framed protocol message as a single invocation.
    ///
    /// Returns as soon as the invocation is dispatched. Its outcome reaches the
    /// waiting caller, or the event channel when there is none.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }

        let seq_id = self.peek_seq_id(bytes);
        let transport = Arc::new(ClientTransport::connect(
            self.inner.invoker.clone(),
            self.inner.target.clone(),
        ));
        transport.write(bytes)?;

        let connection = self.clone();
        tokio::spawn(async move {
            let flushed = transport.flush().await;
            connection.handle_reply(seq_id, transport, flushed);
        });
        Ok(())
    }

    fn peek_seq_id(&self, bytes: &[u8]) -> Option<i32> {
        let transport = Arc::new(TransformTransport::with_value(bytes));
        self.inner
            .protocol
            .input(transport)
            .read_message_begin()
            .map(|header| header.seq_id)
            .ok()
    }

    #[instrument(
        level = "debug",
        skip(self, transport, flushed),
        fields(function = %self.inner.target.name)
    )]
    fn handle_reply(
        &self,
        seq_id: Option<i32>,
        transport: Arc<ClientTransport>,
        flushed: Result<()>,
    ) {
        match flushed {
            Ok(()) => self.decode_reply(seq_id, transport),
            Err(e) => {
                if let Some(seq_id) = seq_id {
                    self.fail_call(seq_id, e.clone());
                }
                self.emit_error(e);
            }
        }
    }

    fn fail_call(&self, seq_id: i32, error: Error) {
        let service = self.unroute(seq_id);
        if let Some(client) = self.client(service.as_deref()) {
            client.reject(seq_id, error);
        }
    }

    fn decode_reply(&self, sent_seq_id: Option<i32>, transport: Arc<ClientTransport>) {
        let mut input = self.inner.protocol.input(transport.clone());

        let header = match input.read_message_begin() {
            Ok(header) => header,
            Err(e) if e.is_incomplete() => {
                trace!("reply carries no complete message");
                transport.rollback_position();
                return;
            }
            Err(e) => {
                if let Some(seq_id) = sent_seq_id {
                    self.fail_call(seq_id, e.clone());
                }
                self.emit_error(e);
                return;
            }
        };

        let seq_id = header.seq_id;
        let service = self.unroute(seq_id);
        let (_, method) = header.service_and_method();
        trace!(method, seq_id, ?service, "decoding reply");

        let client = match self.client(service.as_deref()) {
            Some(client) if client.has_receiver(method) => client,
            client => {
                let e: Error = ApplicationException::new(
                    ApplicationExceptionKind::UnknownMethod,
                    "Received a response to an unknown RPC function",
                )
                .into();
                if let Some(client) = client {
                    client.reject(seq_id, e.clone());
                }
                self.emit_error(e);
                return;
            }
        };

        client.insert_relay(seq_id);
        match client.recv(method, &mut *input, header.message_type, seq_id) {
            Ok(()) => transport.commit_position(),
            Err(e) if e.is_incomplete() => {
                client.remove(CallToken::Synthetic(seq_id));
                transport.rollback_position();
                // no more bytes will arrive for this reply
                client.reject(seq_id, e);
            }
            Err(e) => {
                client.remove(CallToken::Synthetic(seq_id));
                client.reject(seq_id, e.clone());
                self.emit_error(e);
            }
        }
    }

    fn emit_error(&self, e: Error) {
        warn!(error = %e, function = %self.inner.target.name, "connection error");
        self.emit(ConnectionEvent::Error(e));
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Err(mpsc::error::SendError(event)) = self.inner.events.send(event) {
            if let ConnectionEvent::Error(e) = event {
                error!(error = %e, "connection error with no event listener");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::{ChannelError, InvokeRequest, InvokeResponse};
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl Invoker for Unreachable {
        async fn invoke(
            &self,
            _request: InvokeRequest,
        ) -> std::result::Result<InvokeResponse, ChannelError> {
            Err(ChannelError::new("unreachable"))
        }
    }

    #[tokio::test]
    async fn test_open_close_events() {
        let (connection, mut events) =
            Connection::new(ConnectionConfig::new("calc"), Arc::new(Unreachable));
        assert!(connection.is_open());
        connection.close();
        connection.end();
        assert!(!connection.is_open());
        assert_eq!(connection.write(b"1234"), Err(Error::ConnectionClosed));
        connection.open();

        assert_eq!(events.recv().await, Some(ConnectionEvent::Open));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Close));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Open));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failure_without_caller_is_an_event() {
        let (connection, mut events) =
            Connection::new(ConnectionConfig::new("calc"), Arc::new(Unreachable));
        assert_eq!(events.recv().await, Some(ConnectionEvent::Open));
        connection.write(b"not a message").unwrap();
        match events.recv().await {
            Some(ConnectionEvent::Error(Error::LambdaServer(e))) => {
                assert_eq!(e.message, "unreachable")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_seq_ids_are_connection_wide() {
        let (connection, _events) =
            Connection::new(ConnectionConfig::new("calc"), Arc::new(Unreachable));
        let other = connection.clone();
        assert_eq!(connection.next_seq_id(), 1);
        assert_eq!(other.next_seq_id(), 2);
    }
}
