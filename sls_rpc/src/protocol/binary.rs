//! The binary codec: big-endian fixed-width integers and length-prefixed
//! strings, with the versioned (strict) message envelope.

use std::sync::Arc;

use async_trait::async_trait;

use super::*;
use crate::transport::{Transport, TransportExt};

const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;
const TYPE_MASK: u32 = 0x0000_00ff;

pub struct BinaryProtocol {
    transport: Arc<dyn Transport>,
    strict_read: bool,
    strict_write: bool,
}

impl BinaryProtocol {
    /// Writes versioned headers and accepts both header forms on read.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        BinaryProtocol {
            transport,
            strict_read: false,
            strict_write: true,
        }
    }

    pub fn strict(transport: Arc<dyn Transport>, strict_read: bool, strict_write: bool) -> Self {
        BinaryProtocol {
            transport,
            strict_read,
            strict_write,
        }
    }

    fn read_len(&mut self) -> Result<usize> {
        let len = self.transport.read_i32()?;
        usize::try_from(len).map_err(|_| Error::protocol(format!("negative length {}", len)))
    }

    fn write_len(&mut self, len: usize) -> Result<()> {
        let len = i32::try_from(len)
            .map_err(|_| Error::protocol(format!("length {} too large", len)))?;
        self.write_i32(len)
    }
}

impl InputProtocol for BinaryProtocol {
    fn read_message_begin(&mut self) -> Result<MessageHeader> {
        let first = self.transport.read_i32()?;

        if first < 0 {
            let version = first as u32 & VERSION_MASK;
            if version != VERSION_1 {
                return Err(Error::protocol(format!(
                    "bad version in message header: {:#x}",
                    version
                )));
            }
            let message_type = MessageType::from_i32((first as u32 & TYPE_MASK) as i32)?;
            let name = self.read_string()?;
            let seq_id = self.transport.read_i32()?;
            return Ok(MessageHeader {
                name,
                message_type,
                seq_id,
            });
        }

        if self.strict_read {
            return Err(Error::protocol("missing version in message header"));
        }

        let name = self.transport.read_string(first as usize)?;
        let message_type = MessageType::from_i32(self.transport.read_byte()? as i32)?;
        let seq_id = self.transport.read_i32()?;
        Ok(MessageHeader {
            name,
            message_type,
            seq_id,
        })
    }

    fn read_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_struct_begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_struct_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_field_begin(&mut self) -> Result<FieldHeader> {
        let field_type = FieldType::from_u8(self.transport.read_byte()? as u8)?;
        let id = match field_type {
            FieldType::Stop => 0,
            _ => self.transport.read_i16()?,
        };
        Ok(FieldHeader { field_type, id })
    }

    fn read_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_list_begin(&mut self) -> Result<ListHeader> {
        let element_type = FieldType::from_u8(self.transport.read_byte()? as u8)?;
        let size = self.transport.read_i32()?;
        if size < 0 {
            return Err(Error::protocol(format!("negative list size {}", size)));
        }
        Ok(ListHeader { element_type, size })
    }

    fn read_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.transport.read_byte()? != 0)
    }

    fn read_byte(&mut self) -> Result<i8> {
        self.transport.read_byte()
    }

    fn read_i16(&mut self) -> Result<i16> {
        self.transport.read_i16()
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.transport.read_i32()
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.transport.read_i64()
    }

    fn read_double(&mut self) -> Result<f64> {
        self.transport.read_double()
    }

    fn read_string(&mut self) -> Result<String> {
        String::from_utf8(self.read_binary()?).map_err(|e| Error::protocol(e.to_string()))
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_len()?;
        self.transport.read_exact(len)
    }
}

#[async_trait]
impl OutputProtocol for BinaryProtocol {
    fn write_message_begin(&mut self, header: &MessageHeader) -> Result<()> {
        if self.strict_write {
            self.write_i32((VERSION_1 | header.message_type as u32) as i32)?;
            self.write_string(&header.name)?;
        } else {
            self.write_string(&header.name)?;
            self.write_byte(header.message_type as i8)?;
        }
        self.write_i32(header.seq_id)
    }

    fn write_message_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_struct_begin(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn write_struct_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_begin(&mut self, _name: &str, field_type: FieldType, id: i16) -> Result<()> {
        self.write_byte(field_type as i8)?;
        self.write_i16(id)
    }

    fn write_field_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_field_stop(&mut self) -> Result<()> {
        self.write_byte(FieldType::Stop as i8)
    }

    fn write_list_begin(&mut self, element_type: FieldType, size: i32) -> Result<()> {
        self.write_byte(element_type as i8)?;
        self.write_i32(size)
    }

    fn write_list_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_byte(v as i8)
    }

    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.transport.write(&v.to_be_bytes())
    }

    fn write_i16(&mut self, v: i16) -> Result<()> {
        self.transport.write(&v.to_be_bytes())
    }

    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.transport.write(&v.to_be_bytes())
    }

    fn write_i64(&mut self, v: i64) -> Result<()> {
        self.transport.write(&v.to_be_bytes())
    }

    fn write_double(&mut self, v: f64) -> Result<()> {
        self.transport.write(&v.to_be_bytes())
    }

    fn write_string(&mut self, v: &str) -> Result<()> {
        self.write_binary(v.as_bytes())
    }

    fn write_binary(&mut self, v: &[u8]) -> Result<()> {
        self.write_len(v.len())?;
        self.transport.write(v)
    }

    async fn flush(&mut self) -> Result<()> {
        self.transport.flush().await
    }
}

/// Creates [`BinaryProtocol`]s with the default strictness.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryProtocolFactory;

impl ProtocolFactory for BinaryProtocolFactory {
    fn input(&self, transport: Arc<dyn Transport>) -> Box<dyn InputProtocol> {
        Box::new(BinaryProtocol::new(transport))
    }

    fn output(&self, transport: Arc<dyn Transport>) -> Box<dyn OutputProtocol> {
        Box::new(BinaryProtocol::new(transport))
    }
}
