use crate::metrics_defs::RPC_DURATION;
use crate::protocol::{Envelope, Params, RpcError, RpcResponse};
use async_trait::async_trait;
use serde_json::Value;
use shared::histogram;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Instant;

/// A single RPC method.
///
/// Implementations validate their own parameters and return plain errors; turning an
/// error into a wire response is the dispatcher's job.
#[async_trait]
pub trait Method: Send + Sync {
    async fn call(&self, params: &Params) -> Result<Value, RpcError>;
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RegistrationError {
    #[error("method {0} is already registered")]
    Duplicate(String),
    #[error("method name must not be empty")]
    EmptyName,
}

/// Maps method names to their handlers.
///
/// Methods are registered once during startup; the dispatcher is read-only afterwards.
#[derive(Default)]
pub struct Dispatcher {
    methods: HashMap<String, Box<dyn Method>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher::default()
    }

    /// Registers `method` under `name`. A name that is already taken is rejected and the
    /// existing registration is kept.
    pub fn register<M>(&mut self, name: &str, method: M) -> Result<(), RegistrationError>
    where
        M: Method + 'static,
    {
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }

        match self.methods.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RegistrationError::Duplicate(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Box::new(method));
                Ok(())
            }
        }
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Runs the named method and converts the outcome into a wire response.
    pub async fn dispatch(&self, envelope: &Envelope) -> RpcResponse {
        self.call(envelope).await.into()
    }

    /// Runs the named method, keeping the typed error so callers can tell infrastructure
    /// failures apart from domain failures.
    pub async fn call(&self, envelope: &Envelope) -> Result<Value, RpcError> {
        let start = Instant::now();
        let result = match self.methods.get(&envelope.method) {
            Some(method) => method.call(&envelope.params).await,
            None => Err(RpcError::MethodNotFound(envelope.method.clone())),
        };

        let method = if self.methods.contains_key(&envelope.method) {
            envelope.method.clone()
        } else {
            "unknown".to_string()
        };
        let outcome = if result.is_ok() { "success" } else { "error" };
        histogram!(RPC_DURATION, "method" => method, "outcome" => outcome)
            .record(start.elapsed().as_secs_f64());

        if let Err(err) = &result {
            tracing::debug!("RPC method {} failed: {err}", envelope.method);
        }

        result
    }
}
