use std::sync::Arc;

use async_trait::async_trait;

use super::{Transform, TransformTransport};
use crate::error::*;
use crate::invoke::{FunctionTarget, Invoker};

/// A [`Transform`] that sends the written bytes to a function and returns the
/// bytes of its reply.
#[derive(Clone)]
pub struct Invoke {
    invoker: Arc<dyn Invoker>,
    target: FunctionTarget,
}

impl Invoke {
    pub fn new(invoker: Arc<dyn Invoker>, target: FunctionTarget) -> Self {
        Invoke { invoker, target }
    }
}

#[async_trait]
impl Transform for Invoke {
    async fn transform(&self, buf: &[u8]) -> Result<Vec<u8>> {
        self.target.invoke(&*self.invoker, buf).await.into_result()
    }
}

/// A transport where every flush is one function invocation.
pub type ClientTransport = TransformTransport<Invoke>;

impl ClientTransport {
    pub fn connect(invoker: Arc<dyn Invoker>, target: FunctionTarget) -> Self {
        TransformTransport::with_transform(Invoke::new(invoker, target))
    }
}
