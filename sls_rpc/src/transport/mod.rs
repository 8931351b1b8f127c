//! Buffered transports whose flush step transforms the written bytes.
//!
//! A [`TransformTransport`] accumulates writes; `flush()` hands them to a
//! [`Transform`] and the result becomes the readable side. With the
//! [`Identity`] transform this is an in-memory loopback, which is how messages
//! are encoded and decoded. The specializations in [`server`] and [`client`]
//! turn the flush step into "return the reply" and "invoke the function".

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::trace;

use crate::error::*;

pub mod client;
pub mod server;

pub use self::client::{ClientTransport, Invoke};
pub use self::server::{ReplyCallback, ServerTransport};

/// The byte channel a protocol codec reads from and writes to.
///
/// Transports are shared handles: the input and the output protocol of a
/// single exchange hold the same transport, so all methods take `&self`.
#[async_trait]
pub trait Transport: Send + Sync {
    fn is_open(&self) -> bool;
    fn open(&self);
    fn close(&self);
    /// Returns and consumes up to `len` bytes. A short read is not an error.
    fn read(&self, len: usize) -> Result<Vec<u8>>;
    fn write(&self, buf: &[u8]) -> Result<()>;
    async fn flush(&self) -> Result<()>;
}

/// Big-endian readers on top of [`Transport::read`].
///
/// A read that comes up short fails with [`Error::Incomplete`], the signal
/// codecs use for "not enough data yet". The bytes that were available are
/// consumed; callers that need to retry roll the transport position back.
pub trait TransportExt: Transport {
    fn write_str(&self, text: &str) -> Result<()> {
        self.write(text.as_bytes())
    }

    fn read_exact(&self, len: usize) -> Result<Vec<u8>> {
        let buf = self.read(len)?;
        if buf.len() < len {
            return Err(Error::Incomplete {
                needed: len - buf.len(),
            });
        }
        Ok(buf)
    }

    fn read_array<const N: usize>(&self) -> Result<[u8; N]> {
        let buf = self.read_exact(N)?;
        let mut a = [0u8; N];
        a.copy_from_slice(&buf);
        Ok(a)
    }

    fn read_byte(&self) -> Result<i8> {
        Ok(i8::from_be_bytes(self.read_array()?))
    }

    fn read_i16(&self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    fn read_i32(&self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    fn read_i64(&self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    fn read_double(&self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    fn read_string(&self, len: usize) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.read_exact(len)?).into_owned())
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}

/// The step a [`TransformTransport`] applies to its write buffer on flush.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn transform(&self, buf: &[u8]) -> Result<Vec<u8>>;
}

/// Makes whatever was written readable again.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

#[async_trait]
impl Transform for Identity {
    async fn transform(&self, buf: &[u8]) -> Result<Vec<u8>> {
        Ok(buf.to_vec())
    }
}

#[derive(Debug)]
struct State {
    open: bool,
    write_buf: Vec<u8>,
    read_buf: Vec<u8>,
    // bytes before `read_pos` are consumed but kept until committed
    read_pos: usize,
    seq_id: Option<i32>,
}

pub struct TransformTransport<X = Identity> {
    state: Mutex<State>,
    // serializes flushes, so writes never leak into another flush's transform
    flushing: tokio::sync::Mutex<()>,
    transform: X,
}

impl TransformTransport<Identity> {
    pub fn new() -> Self {
        Self::with_transform(Identity)
    }

    /// A loopback transport whose read buffer starts with `value`.
    pub fn with_value<B: Into<Vec<u8>>>(value: B) -> Self {
        let transport = Self::new();
        transport.state().read_buf = value.into();
        transport
    }
}

impl Default for TransformTransport<Identity> {
    fn default() -> Self {
        Self::new()
    }
}

impl<X: Transform> TransformTransport<X> {
    pub fn with_transform(transform: X) -> Self {
        TransformTransport {
            state: Mutex::new(State {
                open: true,
                write_buf: Vec::new(),
                read_buf: Vec::new(),
                read_pos: 0,
                seq_id: None,
            }),
            flushing: tokio::sync::Mutex::new(()),
            transform,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        crate::lock(&self.state)
    }

    /// A copy of the unread bytes. Does not consume anything.
    pub fn value(&self) -> Vec<u8> {
        let state = self.state();
        state.read_buf[state.read_pos..].to_vec()
    }

    pub fn available(&self) -> usize {
        let state = self.state();
        state.read_buf.len() - state.read_pos
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        let len = self.available();
        self.read(len)
    }

    /// Forgets the bytes read so far; a later rollback stops here.
    pub fn commit_position(&self) {
        let mut state = self.state();
        let pos = state.read_pos;
        state.read_buf.drain(..pos);
        state.read_pos = 0;
    }

    /// Makes the bytes read since the last commit readable again.
    pub fn rollback_position(&self) {
        self.state().read_pos = 0;
    }

    pub fn set_seq_id(&self, seq_id: i32) {
        self.state().seq_id = Some(seq_id);
    }

    pub fn seq_id(&self) -> Option<i32> {
        self.state().seq_id
    }
}

#[async_trait]
impl<X: Transform> Transport for TransformTransport<X> {
    fn is_open(&self) -> bool {
        self.state().open
    }

    fn open(&self) {
        self.state().open = true;
    }

    fn close(&self) {
        self.state().open = false;
    }

    fn read(&self, len: usize) -> Result<Vec<u8>> {
        let mut state = self.state();
        if !state.open {
            return Err(Error::TransportClosed);
        }
        let start = state.read_pos;
        let end = state.read_buf.len().min(start.saturating_add(len));
        state.read_pos = end;
        Ok(state.read_buf[start..end].to_vec())
    }

    fn write(&self, buf: &[u8]) -> Result<()> {
        let mut state = self.state();
        if !state.open {
            return Err(Error::TransportClosed);
        }
        state.write_buf.extend_from_slice(buf);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let _gate = self.flushing.lock().await;

        let pending = {
            let mut state = self.state();
            if !state.open {
                return Err(Error::TransportClosed);
            }
            std::mem::take(&mut state.write_buf)
        };

        trace!(len = pending.len(), "flushing transport");

        match self.transform.transform(&pending).await {
            Ok(read_buf) => {
                let mut state = self.state();
                state.read_buf = read_buf;
                state.read_pos = 0;
                Ok(())
            }
            Err(e) => {
                // keep the unsent bytes in front of anything written meanwhile
                let mut state = self.state();
                state.write_buf.splice(0..0, pending);
                Err(e)
            }
        }
    }
}
