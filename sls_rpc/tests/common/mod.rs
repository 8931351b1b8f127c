//! A calculator service with hand-written stubs, the way generated code would
//! look, plus invokers for driving connections from tests.

#![allow(dead_code)]

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sls_rpc::*;
use tokio::sync::{mpsc, oneshot};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add = 1,
    Subtract = 2,
    Multiply = 3,
    Divide = 4,
}

impl Operation {
    fn from_i32(v: i32) -> Option<Self> {
        match v {
            1 => Some(Operation::Add),
            2 => Some(Operation::Subtract),
            3 => Some(Operation::Multiply),
            4 => Some(Operation::Divide),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Work {
    pub num1: i32,
    pub num2: i32,
    pub op: Operation,
    pub comment: Option<String>,
}

impl Work {
    pub fn new(num1: i32, num2: i32, op: Operation) -> Self {
        Work {
            num1,
            num2,
            op,
            comment: None,
        }
    }
}

#[derive(Debug)]
pub struct InvalidOperation {
    pub what_op: i32,
    pub why: String,
}

impl fmt::Display for InvalidOperation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.why)
    }
}

impl std::error::Error for InvalidOperation {}

pub fn read_struct<F>(input: &mut dyn InputProtocol, mut field: F) -> Result<()>
where
    F: FnMut(&mut dyn InputProtocol, FieldHeader) -> Result<()>,
{
    input.read_struct_begin()?;
    loop {
        let header = input.read_field_begin()?;
        if header.field_type == FieldType::Stop {
            break;
        }
        field(input, header)?;
        input.read_field_end()?;
    }
    input.read_struct_end()
}

pub fn write_i32_struct(
    output: &mut dyn OutputProtocol,
    name: &str,
    fields: &[(i16, i32)],
) -> Result<()> {
    output.write_struct_begin(name)?;
    for (id, value) in fields {
        output.write_field_begin("", FieldType::I32, *id)?;
        output.write_i32(*value)?;
        output.write_field_end()?;
    }
    output.write_field_stop()?;
    output.write_struct_end()
}

pub fn write_work(output: &mut dyn OutputProtocol, work: &Work) -> Result<()> {
    output.write_struct_begin("Work")?;
    output.write_field_begin("num1", FieldType::I32, 1)?;
    output.write_i32(work.num1)?;
    output.write_field_end()?;
    output.write_field_begin("num2", FieldType::I32, 2)?;
    output.write_i32(work.num2)?;
    output.write_field_end()?;
    output.write_field_begin("op", FieldType::I32, 3)?;
    output.write_i32(work.op as i32)?;
    output.write_field_end()?;
    if let Some(comment) = &work.comment {
        output.write_field_begin("comment", FieldType::String, 4)?;
        output.write_string(comment)?;
        output.write_field_end()?;
    }
    output.write_field_stop()?;
    output.write_struct_end()
}

pub fn read_work(input: &mut dyn InputProtocol) -> Result<Work> {
    let mut work = Work::new(0, 0, Operation::Add);
    read_struct(input, |input, field| {
        match (field.id, field.field_type) {
            (1, FieldType::I32) => work.num1 = input.read_i32()?,
            (2, FieldType::I32) => work.num2 = input.read_i32()?,
            (3, FieldType::I32) => {
                let op = input.read_i32()?;
                work.op = Operation::from_i32(op)
                    .ok_or_else(|| Error::protocol(format!("bad op {}", op)))?;
            }
            (4, FieldType::String) => work.comment = Some(input.read_string()?),
            (_, other) => input.skip(other)?,
        }
        Ok(())
    })?;
    Ok(work)
}

fn read_i32_fields(input: &mut dyn InputProtocol, values: &mut [Option<i32>]) -> Result<()> {
    read_struct(input, |input, field| {
        match (field.id, field.field_type) {
            (id, FieldType::I32) if (id as usize) < values.len() => {
                values[id as usize] = Some(input.read_i32()?)
            }
            (_, other) => input.skip(other)?,
        }
        Ok(())
    })
}

fn write_void_result(output: &mut dyn OutputProtocol) -> Result<()> {
    write_i32_struct(output, "void_result", &[])
}

fn write_i32_result(output: &mut dyn OutputProtocol, value: i32) -> Result<()> {
    write_i32_struct(output, "i32_result", &[(0, value)])
}

// -- server side --

pub struct Ping;

#[async_trait]
impl Method for Ping {
    type Args = ();
    type Output = ();

    fn read_args(&self, input: &mut dyn InputProtocol) -> Result<()> {
        input.skip(FieldType::Struct)
    }

    async fn call(&self, _args: (), _context: &InvocationContext) -> Result<()> {
        Ok(())
    }

    fn write_output(&self, output: &mut dyn OutputProtocol, _result: ()) -> Result<()> {
        write_void_result(output)
    }
}

pub struct Add;

#[async_trait]
impl Method for Add {
    type Args = (i32, i32);
    type Output = i32;

    fn read_args(&self, input: &mut dyn InputProtocol) -> Result<(i32, i32)> {
        let mut values = [None; 3];
        read_i32_fields(input, &mut values)?;
        Ok((values[1].unwrap_or_default(), values[2].unwrap_or_default()))
    }

    async fn call(&self, (num1, num2): (i32, i32), _context: &InvocationContext) -> Result<i32> {
        Ok(num1.wrapping_add(num2))
    }

    fn write_output(&self, output: &mut dyn OutputProtocol, result: i32) -> Result<()> {
        write_i32_result(output, result)
    }
}

pub struct Calculate;

#[async_trait]
impl Method for Calculate {
    type Args = (i32, Work);
    type Output = i32;

    fn read_args(&self, input: &mut dyn InputProtocol) -> Result<(i32, Work)> {
        let mut logid = 0;
        let mut work = None;
        read_struct(input, |input, field| {
            match (field.id, field.field_type) {
                (1, FieldType::I32) => logid = input.read_i32()?,
                (2, FieldType::Struct) => work = Some(read_work(input)?),
                (_, other) => input.skip(other)?,
            }
            Ok(())
        })?;
        let work = work.ok_or_else(|| Error::protocol("calculate without work"))?;
        Ok((logid, work))
    }

    async fn call(&self, (_logid, work): (i32, Work), _context: &InvocationContext) -> Result<i32> {
        match work.op {
            Operation::Add => Ok(work.num1 + work.num2),
            Operation::Subtract => Ok(work.num1 - work.num2),
            Operation::Multiply => Ok(work.num1 * work.num2),
            Operation::Divide if work.num2 == 0 => Err(Error::handler(InvalidOperation {
                what_op: work.op as i32,
                why: "Cannot divide by 0".to_string(),
            })),
            Operation::Divide => Ok(work.num1 / work.num2),
        }
    }

    fn write_output(&self, output: &mut dyn OutputProtocol, result: i32) -> Result<()> {
        write_i32_result(output, result)
    }
}

/// A oneway method counting how often it ran.
#[derive(Clone, Default)]
pub struct Zip {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Method for Zip {
    type Args = ();
    type Output = ();

    fn read_args(&self, input: &mut dyn InputProtocol) -> Result<()> {
        input.skip(FieldType::Struct)
    }

    async fn call(&self, _args: (), _context: &InvocationContext) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_output(&self, _output: &mut dyn OutputProtocol, _result: ()) -> Result<()> {
        Ok(())
    }

    fn oneway(&self) -> bool {
        true
    }
}

/// Returns the version of the function that handled the call.
pub struct Version;

#[async_trait]
impl Method for Version {
    type Args = ();
    type Output = String;

    fn read_args(&self, input: &mut dyn InputProtocol) -> Result<()> {
        input.skip(FieldType::Struct)
    }

    async fn call(&self, _args: (), context: &InvocationContext) -> Result<String> {
        Ok(format!("{}/{}", context.function_name, context.function_version))
    }

    fn write_output(&self, output: &mut dyn OutputProtocol, result: String) -> Result<()> {
        output.write_struct_begin("version_result")?;
        output.write_field_begin("success", FieldType::String, 0)?;
        output.write_string(&result)?;
        output.write_field_end()?;
        output.write_field_stop()?;
        output.write_struct_end()
    }
}

pub fn calculator_processor(zip: Zip) -> ServiceProcessor {
    ServiceProcessor::new()
        .method("ping", Ping)
        .method("add", Add)
        .method("calculate", Calculate)
        .method("zip", zip)
}

pub fn calculator_server() -> LambdaServer<ServiceProcessor> {
    LambdaServer::new(calculator_processor(Zip::default()))
}

/// `"calc"` serves the calculator, `"multi"` serves `Calculator` and `Info`
/// multiplexed.
pub fn local_invoker() -> LocalInvoker {
    let invoker = LocalInvoker::new();
    invoker.register("calc", calculator_server());
    invoker.register_version(
        "calc",
        "live",
        LambdaServer::new(calculator_processor(Zip::default()).method("version", Version)),
    );
    invoker.register(
        "multi",
        LambdaServer::new(
            MultiplexedProcessor::new()
                .register("Calculator", calculator_processor(Zip::default()))
                .register("Info", ServiceProcessor::new().method("version", Version)),
        ),
    );
    invoker
}

// -- client side --

#[derive(Debug, Clone, PartialEq)]
pub enum CalculatorReply {
    Void,
    Value(i32),
}

pub struct Calculator;

fn missing_result() -> Error {
    ApplicationException::new(ApplicationExceptionKind::MissingResult, "unknown result").into()
}

fn recv_void(input: &mut dyn InputProtocol) -> Result<CalculatorReply> {
    input.skip(FieldType::Struct)?;
    Ok(CalculatorReply::Void)
}

fn recv_value(input: &mut dyn InputProtocol) -> Result<CalculatorReply> {
    let mut values = [None];
    read_i32_fields(input, &mut values)?;
    match values[0] {
        Some(v) => Ok(CalculatorReply::Value(v)),
        None => Err(missing_result()),
    }
}

impl Service for Calculator {
    type Reply = CalculatorReply;

    fn receivers() -> Vec<(&'static str, Receiver<CalculatorReply>)> {
        vec![
            ("ping", recv_void as Receiver<_>),
            ("add", recv_value),
            ("calculate", recv_value),
        ]
    }
}

fn expect_value(reply: CalculatorReply) -> Result<i32> {
    match reply {
        CalculatorReply::Value(v) => Ok(v),
        other => Err(Error::protocol(format!("unexpected reply {:?}", other))),
    }
}

pub async fn ping(client: &Client<Calculator>) -> Result<()> {
    client
        .call("ping", |out| write_i32_struct(out, "ping_args", &[]))
        .await
        .map(drop)
}

pub async fn add(client: &Client<Calculator>, num1: i32, num2: i32) -> Result<i32> {
    let reply = client
        .call("add", move |out| write_i32_struct(out, "add_args", &[(1, num1), (2, num2)]))
        .await?;
    expect_value(reply)
}

pub async fn calculate(client: &Client<Calculator>, logid: i32, work: Work) -> Result<i32> {
    let reply = client
        .call("calculate", move |out| {
            out.write_struct_begin("calculate_args")?;
            out.write_field_begin("logid", FieldType::I32, 1)?;
            out.write_i32(logid)?;
            out.write_field_end()?;
            out.write_field_begin("w", FieldType::Struct, 2)?;
            write_work(out, &work)?;
            out.write_field_end()?;
            out.write_field_stop()?;
            out.write_struct_end()
        })
        .await?;
    expect_value(reply)
}

pub async fn zip(client: &Client<Calculator>) -> Result<()> {
    client
        .call_oneway("zip", |out| write_i32_struct(out, "zip_args", &[]))
        .await
}

pub struct Info;

fn recv_string(input: &mut dyn InputProtocol) -> Result<String> {
    let mut value = None;
    read_struct(input, |input, field| {
        match (field.id, field.field_type) {
            (0, FieldType::String) => value = Some(input.read_string()?),
            (_, other) => input.skip(other)?,
        }
        Ok(())
    })?;
    value.ok_or_else(missing_result)
}

impl Service for Info {
    type Reply = String;

    fn receivers() -> Vec<(&'static str, Receiver<String>)> {
        vec![("version", recv_string as Receiver<_>)]
    }
}

pub async fn version(client: &Client<Info>) -> Result<String> {
    client
        .call("version", |out| write_i32_struct(out, "version_args", &[]))
        .await
}

// -- invokers --

pub type Responder = oneshot::Sender<std::result::Result<InvokeResponse, ChannelError>>;

/// An invoker whose invocations wait until the test answers them.
pub struct Scripted {
    calls: mpsc::UnboundedSender<(InvokeRequest, Responder)>,
}

impl Scripted {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(InvokeRequest, Responder)>) {
        let (calls, receiver) = mpsc::unbounded_channel();
        (Arc::new(Scripted { calls }), receiver)
    }
}

#[async_trait]
impl Invoker for Scripted {
    async fn invoke(
        &self,
        request: InvokeRequest,
    ) -> std::result::Result<InvokeResponse, ChannelError> {
        let (responder, response) = oneshot::channel();
        self.calls
            .send((request, responder))
            .map_err(|_| ChannelError::new("script finished"))?;
        response
            .await
            .unwrap_or_else(|_| Err(ChannelError::new("no response scripted")))
    }
}

/// Runs `request` through `server` the way the platform would.
pub async fn answer<P: Processor>(
    server: &LambdaServer<P>,
    request: &InvokeRequest,
) -> InvokeResponse {
    let reply = server
        .call(Some(request.payload.as_slice()), &InvocationContext::default())
        .await
        .expect("server failed");
    InvokeResponse {
        status_code: 200,
        payload: reply.into_bytes(),
        ..Default::default()
    }
}

pub fn ok(payload: &[u8]) -> std::result::Result<InvokeResponse, ChannelError> {
    Ok(InvokeResponse {
        status_code: 200,
        payload: payload.to_vec(),
        ..Default::default()
    })
}

/// Encodes one message with the binary codec.
pub async fn encode<F>(header: MessageHeader, body: F) -> Vec<u8>
where
    F: FnOnce(&mut dyn OutputProtocol) -> Result<()>,
{
    let transport = Arc::new(TransformTransport::new());
    let mut output = BinaryProtocol::new(transport.clone());
    output.write_message_begin(&header).unwrap();
    body(&mut output).unwrap();
    output.write_message_end().unwrap();
    output.flush().await.unwrap();
    transport.read_all().unwrap()
}

/// Reads the header of a framed message.
pub fn decode_header(payload: &[u8]) -> (MessageHeader, BinaryProtocol) {
    let bytes = framing::unwrap_payload(payload).unwrap();
    let mut input = BinaryProtocol::new(Arc::new(TransformTransport::with_value(bytes)));
    let header = input.read_message_begin().unwrap();
    (header, input)
}
