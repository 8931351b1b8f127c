use serde_derive::{Deserialize, Serialize};

use crate::error::*;
use crate::invoke::FunctionTarget;

pub const FUNCTION_NAME_ENV: &str = "SLS_RPC_FUNCTION_NAME";
pub const QUALIFIER_ENV: &str = "SLS_RPC_QUALIFIER";

/// Where a [`Connection`](crate::Connection) sends its invocations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub function_name: String,
    /// A version or alias of the function.
    #[serde(default)]
    pub qualifier: Option<String>,
}

impl ConnectionConfig {
    pub fn new<S: Into<String>>(function_name: S) -> Self {
        ConnectionConfig {
            function_name: function_name.into(),
            qualifier: None,
        }
    }

    pub fn with_qualifier<S: Into<String>>(mut self, qualifier: S) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Reads `SLS_RPC_FUNCTION_NAME` and the optional `SLS_RPC_QUALIFIER`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let function_name = lookup(FUNCTION_NAME_ENV)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::Config(format!("{} is not set", FUNCTION_NAME_ENV)))?;

        Ok(ConnectionConfig {
            function_name,
            qualifier: lookup(QUALIFIER_ENV).filter(|q| !q.is_empty()),
        })
    }

    pub fn target(&self) -> FunctionTarget {
        FunctionTarget {
            name: self.function_name.clone(),
            qualifier: self.qualifier.clone(),
        }
    }
}
