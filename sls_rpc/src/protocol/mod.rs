//! The codec interface spoken over a [`Transport`].
//!
//! Generated service code encodes and decodes its structs against
//! [`InputProtocol`] and [`OutputProtocol`]. The crate ships the strict binary
//! codec in [`binary`]; other codecs plug in through a [`ProtocolFactory`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::*;
use crate::transport::Transport;

pub mod binary;
mod exception;

pub use self::binary::{BinaryProtocol, BinaryProtocolFactory};
pub use self::exception::{ApplicationException, ApplicationExceptionKind};

/// Separates the service name from the method name of a multiplexed call.
pub const MULTIPLEX_SEPARATOR: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 1,
    Reply = 2,
    Exception = 3,
    Oneway = 4,
}

impl MessageType {
    pub fn from_i32(v: i32) -> Result<Self> {
        match v {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Exception),
            4 => Ok(MessageType::Oneway),
            _ => Err(Error::protocol(format!("invalid message type {}", v))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Stop = 0,
    Void = 1,
    Bool = 2,
    Byte = 3,
    Double = 4,
    I16 = 6,
    I32 = 8,
    I64 = 10,
    String = 11,
    Struct = 12,
    Map = 13,
    Set = 14,
    List = 15,
}

impl FieldType {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => FieldType::Stop,
            1 => FieldType::Void,
            2 => FieldType::Bool,
            3 => FieldType::Byte,
            4 => FieldType::Double,
            6 => FieldType::I16,
            8 => FieldType::I32,
            10 => FieldType::I64,
            11 => FieldType::String,
            12 => FieldType::Struct,
            13 => FieldType::Map,
            14 => FieldType::Set,
            15 => FieldType::List,
            _ => return Err(Error::protocol(format!("invalid field type {}", v))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub message_type: MessageType,
    pub seq_id: i32,
}

impl MessageHeader {
    pub fn new<S: Into<String>>(name: S, message_type: MessageType, seq_id: i32) -> Self {
        MessageHeader {
            name: name.into(),
            message_type,
            seq_id,
        }
    }

    /// Splits `Service:method` into its parts. Plain names have no service.
    pub fn service_and_method(&self) -> (Option<&str>, &str) {
        match self.name.split_once(MULTIPLEX_SEPARATOR) {
            Some((service, method)) => (Some(service), method),
            None => (None, &self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHeader {
    pub field_type: FieldType,
    pub id: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListHeader {
    pub element_type: FieldType,
    pub size: i32,
}

/// Decodes values from a transport.
///
/// Running out of bytes surfaces as [`Error::Incomplete`].
pub trait InputProtocol: Send {
    fn read_message_begin(&mut self) -> Result<MessageHeader>;
    fn read_message_end(&mut self) -> Result<()>;
    fn read_struct_begin(&mut self) -> Result<()>;
    fn read_struct_end(&mut self) -> Result<()>;
    fn read_field_begin(&mut self) -> Result<FieldHeader>;
    fn read_field_end(&mut self) -> Result<()>;
    fn read_list_begin(&mut self) -> Result<ListHeader>;
    fn read_list_end(&mut self) -> Result<()>;
    fn read_bool(&mut self) -> Result<bool>;
    fn read_byte(&mut self) -> Result<i8>;
    fn read_i16(&mut self) -> Result<i16>;
    fn read_i32(&mut self) -> Result<i32>;
    fn read_i64(&mut self) -> Result<i64>;
    fn read_double(&mut self) -> Result<f64>;
    fn read_string(&mut self) -> Result<String>;
    fn read_binary(&mut self) -> Result<Vec<u8>>;

    /// Reads and discards one value of the given type.
    fn skip(&mut self, field_type: FieldType) -> Result<()> {
        match field_type {
            FieldType::Bool => self.read_bool().map(drop),
            FieldType::Byte => self.read_byte().map(drop),
            FieldType::Double => self.read_double().map(drop),
            FieldType::I16 => self.read_i16().map(drop),
            FieldType::I32 => self.read_i32().map(drop),
            FieldType::I64 => self.read_i64().map(drop),
            FieldType::String => self.read_binary().map(drop),
            FieldType::Struct => {
                self.read_struct_begin()?;
                loop {
                    let field = self.read_field_begin()?;
                    if field.field_type == FieldType::Stop {
                        break;
                    }
                    self.skip(field.field_type)?;
                    self.read_field_end()?;
                }
                self.read_struct_end()
            }
            FieldType::List => {
                let list = self.read_list_begin()?;
                for _ in 0..list.size {
                    self.skip(list.element_type)?;
                }
                self.read_list_end()
            }
            FieldType::Stop | FieldType::Void | FieldType::Map | FieldType::Set => {
                Err(Error::protocol(format!("cannot skip a value of type {:?}", field_type)))
            }
        }
    }
}

/// Encodes values into a transport. Nothing leaves the process before
/// [`OutputProtocol::flush`].
#[async_trait]
pub trait OutputProtocol: Send {
    fn write_message_begin(&mut self, header: &MessageHeader) -> Result<()>;
    fn write_message_end(&mut self) -> Result<()>;
    fn write_struct_begin(&mut self, name: &str) -> Result<()>;
    fn write_struct_end(&mut self) -> Result<()>;
    fn write_field_begin(&mut self, name: &str, field_type: FieldType, id: i16) -> Result<()>;
    fn write_field_end(&mut self) -> Result<()>;
    fn write_field_stop(&mut self) -> Result<()>;
    fn write_list_begin(&mut self, element_type: FieldType, size: i32) -> Result<()>;
    fn write_list_end(&mut self) -> Result<()>;
    fn write_bool(&mut self, v: bool) -> Result<()>;
    fn write_byte(&mut self, v: i8) -> Result<()>;
    fn write_i16(&mut self, v: i16) -> Result<()>;
    fn write_i32(&mut self, v: i32) -> Result<()>;
    fn write_i64(&mut self, v: i64) -> Result<()>;
    fn write_double(&mut self, v: f64) -> Result<()>;
    fn write_string(&mut self, v: &str) -> Result<()>;
    fn write_binary(&mut self, v: &[u8]) -> Result<()>;
    async fn flush(&mut self) -> Result<()>;
}

/// Creates the codec halves for a transport.
pub trait ProtocolFactory: Send + Sync {
    fn input(&self, transport: Arc<dyn Transport>) -> Box<dyn InputProtocol>;
    fn output(&self, transport: Arc<dyn Transport>) -> Box<dyn OutputProtocol>;
}
