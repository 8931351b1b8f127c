use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Transport, TransformTransport};
use crate::error::*;
use crate::framing::{unwrap_payload, wrap_payload};

/// Receives the framed reply of a server-side exchange.
pub type ReplyCallback = Box<dyn FnOnce(String) + Send>;

/// The transport of one inbound invocation.
///
/// Construction unwraps the invocation payload into the read buffer. The first
/// flush frames whatever the processor wrote and hands it to the callback.
pub struct ServerTransport {
    inner: TransformTransport,
    reply: Mutex<Option<ReplyCallback>>,
}

impl ServerTransport {
    /// A missing or empty payload yields an empty read buffer.
    pub fn new(payload: Option<&[u8]>, callback: ReplyCallback) -> Result<Self> {
        let inner = match payload {
            Some(payload) if !payload.is_empty() => {
                TransformTransport::with_value(unwrap_payload(payload)?)
            }
            _ => TransformTransport::new(),
        };

        Ok(ServerTransport {
            inner,
            reply: Mutex::new(Some(callback)),
        })
    }

    /// The framed unread bytes.
    pub fn value(&self) -> String {
        wrap_payload(&self.inner.value())
    }
}

#[async_trait]
impl Transport for ServerTransport {
    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn open(&self) {
        self.inner.open()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn read(&self, len: usize) -> Result<Vec<u8>> {
        self.inner.read(len)
    }

    fn write(&self, buf: &[u8]) -> Result<()> {
        self.inner.write(buf)
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await?;

        let callback = crate::lock(&self.reply).take();

        match callback {
            Some(callback) => {
                let reply = self.value();
                debug!(len = reply.len(), "returning reply");
                callback(reply);
            }
            None => warn!("reply already returned, dropping flushed bytes"),
        }
        Ok(())
    }
}
