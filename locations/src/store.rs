//! The parametrized-query seam between the service and the relational store.
//!
//! A [`Connector`] opens sessions; a [`Session`] runs one statement at a time and
//! returns rows as loosely typed column maps. Everything above this module only sees
//! these traits, so the store can be swapped for an in-memory fake in tests.
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Query(String),
    #[error("session is closed")]
    Closed,
    #[error("unsupported column type {type_name} for column {column}")]
    UnsupportedType { column: String, type_name: String },
}

/// A bound statement parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum Param {
    Int(i32),
    Text(String),
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// A single result row keyed by column name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    columns: HashMap<String, SqlValue>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    pub fn with<C: Into<String>>(mut self, column: C, value: SqlValue) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert<C: Into<String>>(&mut self, column: C, value: SqlValue) {
        self.columns.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.get(column)
    }

    /// Text value of a column. Numbers are rendered, nulls and missing columns are `None`.
    pub fn text(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Float(f) => Some(f.to_string()),
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Null => None,
        }
    }

    pub fn float(&self, column: &str) -> Option<f64> {
        match self.get(column)? {
            SqlValue::Float(f) => Some(*f),
            SqlValue::Int(i) => Some(*i as f64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Bool(_) | SqlValue::Null => None,
        }
    }

    /// Boolean value of a column. Accepts the `t`/`f` text form returned by Postgres.
    pub fn bool(&self, column: &str) -> Option<bool> {
        match self.get(column)? {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Text(s) => match s.as_str() {
                "t" | "true" => Some(true),
                "f" | "false" => Some(false),
                _ => None,
            },
            SqlValue::Int(i) => Some(*i != 0),
            SqlValue::Float(_) | SqlValue::Null => None,
        }
    }
}

/// A live session against the store. Sessions are not safe for concurrent use;
/// callers serialize access (see `supervisor`).
#[async_trait]
pub trait Session: Send + Sync {
    /// Cheap liveness check. A session that reports `false` is discarded and replaced.
    async fn is_valid(&self) -> bool;

    async fn query(&self, statement: &str, params: &[Param]) -> Result<Vec<Row>, StoreError>;

    /// Runs a statement whose result rows are not needed. Returns the affected row count.
    async fn execute(&self, statement: &str, params: &[Param]) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Session>, StoreError>;

    /// Human readable target for logs. Must not contain credentials.
    fn describe(&self) -> String;
}
