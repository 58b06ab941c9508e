//! Postgres implementation of the store traits, over `tokio-postgres` with rustls.
use crate::store::{Connector, Param, Row, Session, SqlValue, StoreError};
use async_trait::async_trait;
use rustls::ClientConfig;
use std::sync::Arc;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use url::Url;

pub struct PgConnector {
    config: tokio_postgres::Config,
    target: String,
    tls: Option<MakeRustlsConnect>,
}

impl PgConnector {
    /// Parses the connection string and, if `tls` is set, prepares the rustls
    /// connector with the system trust roots. Nothing is dialed yet.
    pub fn new(url: &str, tls: bool) -> Result<Self, StoreError> {
        let config = url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| StoreError::Connect(format!("invalid connection string: {e}")))?;

        let tls = if tls {
            Some(MakeRustlsConnect::new(build_rustls_config()?))
        } else {
            None
        };

        Ok(PgConnector {
            config,
            target: redact(url),
            tls,
        })
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, StoreError> {
        let client = match &self.tls {
            Some(tls) => connect_with(&self.config, tls.clone()).await?,
            None => connect_with(&self.config, NoTls).await?,
        };
        Ok(Box::new(PgSession { client }))
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}

// The connection future drives the socket; it runs on its own task until the client
// is dropped or the server goes away.
async fn connect_with<T>(config: &tokio_postgres::Config, tls: T) -> Result<Client, StoreError>
where
    T: MakeTlsConnect<Socket> + Send,
    T::Stream: Send + 'static,
{
    let (client, connection) = config.connect(tls).await.map_err(|e| {
        StoreError::Connect(
            e.as_db_error()
                .map(|db| db.message().to_string())
                .unwrap_or_else(|| e.to_string()),
        )
    })?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {e}");
        }
    });

    Ok(client)
}

fn build_rustls_config() -> Result<ClientConfig, StoreError> {
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        tracing::warn!("Error loading system certificates: {e}");
    }

    let mut roots = rustls::RootCertStore::empty();
    let (loaded, skipped) = roots.add_parsable_certificates(native.certs);
    if skipped > 0 {
        tracing::warn!("Skipped {skipped} invalid system certificates");
    }
    if loaded == 0 {
        return Err(StoreError::Connect(
            "no valid system certificates found".into(),
        ));
    }

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| StoreError::Connect(format!("TLS setup failed: {e}")))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(config)
}

/// Connection string with the password masked, for logs.
fn redact(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        // key=value connection strings
        Err(_) => "postgres".to_string(),
    }
}

struct PgSession {
    client: Client,
}

impl PgSession {
    fn bind(params: &[Param]) -> Vec<&(dyn ToSql + Sync)> {
        params
            .iter()
            .map(|param| match param {
                Param::Int(value) => value as &(dyn ToSql + Sync),
                Param::Text(value) => value as &(dyn ToSql + Sync),
            })
            .collect()
    }
}

#[async_trait]
impl Session for PgSession {
    async fn is_valid(&self) -> bool {
        !self.client.is_closed()
    }

    async fn query(&self, statement: &str, params: &[Param]) -> Result<Vec<Row>, StoreError> {
        let rows = self
            .client
            .query(statement, &Self::bind(params))
            .await
            .map_err(query_error)?;
        rows.iter().map(convert_row).collect()
    }

    async fn execute(&self, statement: &str, params: &[Param]) -> Result<u64, StoreError> {
        self.client
            .execute(statement, &Self::bind(params))
            .await
            .map_err(query_error)
    }
}

fn query_error(e: tokio_postgres::Error) -> StoreError {
    match e.as_db_error() {
        Some(db) => StoreError::Query(db.message().to_string()),
        None if e.is_closed() => StoreError::Closed,
        None => StoreError::Query(e.to_string()),
    }
}

fn convert_row(row: &tokio_postgres::Row) -> Result<Row, StoreError> {
    let mut converted = Row::new();

    for (idx, column) in row.columns().iter().enumerate() {
        let decode_error = |e: tokio_postgres::Error| {
            StoreError::Query(format!("column {}: {e}", column.name()))
        };

        let value = match *column.type_() {
            Type::BOOL => row
                .try_get::<_, Option<bool>>(idx)
                .map_err(decode_error)?
                .map(SqlValue::Bool),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(idx)
                .map_err(decode_error)?
                .map(|v| SqlValue::Int(v.into())),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(idx)
                .map_err(decode_error)?
                .map(|v| SqlValue::Int(v.into())),
            Type::INT8 => row
                .try_get::<_, Option<i64>>(idx)
                .map_err(decode_error)?
                .map(SqlValue::Int),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(idx)
                .map_err(decode_error)?
                .map(|v| SqlValue::Float(v.into())),
            Type::FLOAT8 => row
                .try_get::<_, Option<f64>>(idx)
                .map_err(decode_error)?
                .map(SqlValue::Float),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => row
                .try_get::<_, Option<String>>(idx)
                .map_err(decode_error)?
                .map(SqlValue::Text),
            Type::VOID => None,
            ref other => {
                return Err(StoreError::UnsupportedType {
                    column: column.name().to_string(),
                    type_name: other.name().to_string(),
                });
            }
        };

        converted.insert(column.name(), value.unwrap_or(SqlValue::Null));
    }

    Ok(converted)
}
