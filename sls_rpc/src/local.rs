//! In-process function invocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::error::FunctionErrorPayload;
use crate::invoke::{ChannelError, InvocationType, InvokeRequest, InvokeResponse, Invoker};
use crate::server::{Function, InvocationContext};

const LATEST: &str = "$LATEST";

#[derive(Clone)]
struct Registered {
    function: Arc<dyn Function>,
    version: String,
}

/// An [`Invoker`] that runs registered [`Function`]s in this process, with the
/// reply and error conventions of the hosted platform.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use sls_rpc::{Connection, ConnectionConfig, LambdaServer, LocalInvoker, ServiceProcessor};
/// # #[tokio::main]
/// # async fn main() {
/// let invoker = LocalInvoker::new();
/// invoker.register("calc", LambdaServer::new(ServiceProcessor::new()));
/// let (connection, _events) = Connection::new(ConnectionConfig::new("calc"), Arc::new(invoker));
/// # }
/// ```
#[derive(Default)]
pub struct LocalInvoker {
    functions: RwLock<HashMap<String, Registered>>,
    next_request: AtomicU64,
}

impl LocalInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` as the unqualified version of `name`.
    pub fn register<F: Function + 'static>(&self, name: &str, function: F) {
        self.insert(name.to_string(), LATEST, function);
    }

    /// Registers `function` as version or alias `qualifier` of `name`.
    pub fn register_version<F: Function + 'static>(
        &self,
        name: &str,
        qualifier: &str,
        function: F,
    ) {
        self.insert(format!("{}:{}", name, qualifier), qualifier, function);
    }

    fn insert<F: Function + 'static>(&self, key: String, version: &str, function: F) {
        debug!(function = %key, "registering local function");
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key,
                Registered {
                    function: Arc::new(function),
                    version: version.to_string(),
                },
            );
    }

    fn lookup(&self, request: &InvokeRequest) -> Result<Registered, ChannelError> {
        let key = match &request.qualifier {
            Some(qualifier) => format!("{}:{}", request.function_name, qualifier),
            None => request.function_name.clone(),
        };
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or_else(|| {
                ChannelError::new(format!("Function not found: {}", key))
                    .with_status(404)
                    .with_code("ResourceNotFoundException")
            })
    }
}

#[async_trait]
impl Invoker for LocalInvoker {
    #[instrument(level = "debug", skip_all, fields(function = %request.function_name))]
    async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse, ChannelError> {
        let registered = self.lookup(&request)?;
        let context = InvocationContext {
            request_id: format!("local-{}", self.next_request.fetch_add(1, Ordering::Relaxed)),
            function_name: request.function_name.clone(),
            function_version: registered.version.clone(),
            ..Default::default()
        };

        match request.invocation_type {
            InvocationType::DryRun => {
                return Ok(InvokeResponse {
                    status_code: 204,
                    ..Default::default()
                })
            }
            InvocationType::Event => {
                tokio::spawn(async move {
                    if let Err(e) = registered.function.call(&request.payload, context).await {
                        warn!(error = %e, "event invocation failed");
                    }
                });
                return Ok(InvokeResponse {
                    status_code: 202,
                    ..Default::default()
                });
            }
            InvocationType::RequestResponse => {}
        }

        match registered.function.call(&request.payload, context).await {
            Ok(reply) => Ok(InvokeResponse {
                status_code: 200,
                function_error: None,
                executed_version: Some(registered.version),
                payload: reply.into_bytes(),
            }),
            Err(e) => {
                debug!(error = %e, "function failed");
                let body = FunctionErrorPayload {
                    error_message: e.message(),
                    error_type: Some(e.error_type().to_string()),
                    stack_trace: Vec::new(),
                };
                let payload = serde_json::to_vec(&body)
                    .map_err(|e| ChannelError::new(e.to_string()).with_status(500))?;
                Ok(InvokeResponse {
                    status_code: 200,
                    function_error: Some("Unhandled".to_string()),
                    executed_version: Some(registered.version),
                    payload,
                })
            }
        }
    }
}
