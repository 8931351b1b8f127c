use super::{FieldType, InputProtocol, OutputProtocol};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationExceptionKind {
    Unknown = 0,
    UnknownMethod = 1,
    InvalidMessageType = 2,
    WrongMethodName = 3,
    BadSequenceId = 4,
    MissingResult = 5,
    InternalError = 6,
    ProtocolError = 7,
    InvalidTransform = 8,
    InvalidProtocol = 9,
    UnsupportedClientType = 10,
}

impl ApplicationExceptionKind {
    pub fn from_i32(v: i32) -> Self {
        use ApplicationExceptionKind::*;
        match v {
            1 => UnknownMethod,
            2 => InvalidMessageType,
            3 => WrongMethodName,
            4 => BadSequenceId,
            5 => MissingResult,
            6 => InternalError,
            7 => ProtocolError,
            8 => InvalidTransform,
            9 => InvalidProtocol,
            10 => UnsupportedClientType,
            _ => Unknown,
        }
    }
}

/// The protocol-level error a peer sends in place of a reply.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} ({kind:?})")]
pub struct ApplicationException {
    pub kind: ApplicationExceptionKind,
    pub message: String,
}

impl ApplicationException {
    pub fn new<S: Into<String>>(kind: ApplicationExceptionKind, message: S) -> Self {
        ApplicationException {
            kind,
            message: message.into(),
        }
    }

    pub fn read(input: &mut dyn InputProtocol) -> Result<Self> {
        let mut exception = ApplicationException::new(ApplicationExceptionKind::Unknown, "");

        input.read_struct_begin()?;
        loop {
            let field = input.read_field_begin()?;
            match (field.id, field.field_type) {
                (_, FieldType::Stop) => break,
                (1, FieldType::String) => exception.message = input.read_string()?,
                (2, FieldType::I32) => {
                    exception.kind = ApplicationExceptionKind::from_i32(input.read_i32()?)
                }
                (_, other) => input.skip(other)?,
            }
            input.read_field_end()?;
        }
        input.read_struct_end()?;

        Ok(exception)
    }

    pub fn write(&self, output: &mut dyn OutputProtocol) -> Result<()> {
        output.write_struct_begin("TApplicationException")?;
        output.write_field_begin("message", FieldType::String, 1)?;
        output.write_string(&self.message)?;
        output.write_field_end()?;
        output.write_field_begin("type", FieldType::I32, 2)?;
        output.write_i32(self.kind as i32)?;
        output.write_field_end()?;
        output.write_field_stop()?;
        output.write_struct_end()
    }
}
