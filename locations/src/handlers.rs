//! The locations RPC methods.
use crate::dispatcher::{Dispatcher, Method, RegistrationError};
use crate::protocol::{Params, RpcError};
use crate::supervisor::ConnectionSupervisor;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

pub const DEFAULT_LIMIT: i32 = 10;

/// Registers `getTopLocations`, `getLocationById` and `searchLocations`.
pub fn register_location_methods(
    dispatcher: &mut Dispatcher,
    store: Arc<ConnectionSupervisor>,
) -> Result<(), RegistrationError> {
    dispatcher.register(
        "getTopLocations",
        TopLocations {
            store: store.clone(),
        },
    )?;
    dispatcher.register(
        "getLocationById",
        LocationById {
            store: store.clone(),
        },
    )?;
    dispatcher.register("searchLocations", SearchLocations { store })?;
    Ok(())
}

pub struct TopLocations {
    store: Arc<ConnectionSupervisor>,
}

#[async_trait]
impl Method for TopLocations {
    async fn call(&self, params: &Params) -> Result<Value, RpcError> {
        let limit = limit_param(params)?;
        let session = self.store.session().await?;
        let locations = session.gateway().top_locations(limit).await?;
        to_data(&locations)
    }
}

pub struct LocationById {
    store: Arc<ConnectionSupervisor>,
}

#[async_trait]
impl Method for LocationById {
    async fn call(&self, params: &Params) -> Result<Value, RpcError> {
        let id = required_str(params, "id")?;
        let session = self.store.session().await?;
        let location = session
            .gateway()
            .location_by_id(id)
            .await?
            .ok_or_else(|| RpcError::NotFound(id.to_string()))?;
        to_data(&location)
    }
}

pub struct SearchLocations {
    store: Arc<ConnectionSupervisor>,
}

#[async_trait]
impl Method for SearchLocations {
    async fn call(&self, params: &Params) -> Result<Value, RpcError> {
        let query = required_str(params, "query")?;
        let session = self.store.session().await?;
        let locations = session.gateway().search_locations(query).await?;
        to_data(&locations)
    }
}

fn required_str<'a>(params: &'a Params, key: &'static str) -> Result<&'a str, RpcError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or(RpcError::InvalidParam(key))
}

// Absent or null means the default; anything else must be a non-negative integer.
fn limit_param(params: &Params) -> Result<i32, RpcError> {
    match params.get("limit") {
        None | Some(Value::Null) => Ok(DEFAULT_LIMIT),
        Some(value) => value
            .as_i64()
            .and_then(|limit| i32::try_from(limit).ok())
            .filter(|limit| *limit >= 0)
            .ok_or(RpcError::InvalidParam("limit")),
    }
}

fn to_data<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Internal(e.to_string()))
}
