use crate::gateway::{
    IS_USER_BLOCKED, LOCATION_BY_ID, LOG_USER_REQUEST, LOG_USER_RESPONSE, SEARCH_LOCATIONS,
    TOP_LOCATIONS,
};
use crate::store::{Connector, Param, Row, Session, SqlValue, StoreError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SAMPLE_LOCATIONS: &[(&str, &str, &str, &str, f64)] = &[
    ("yosemite", "Yosemite", "US", "CA", 4.7),
    ("arches", "Arches", "US", "UT", 4.9),
    ("zion", "Zion", "US", "UT", 4.5),
    ("grand-canyon", "Grand Canyon", "US", "AZ", 4.4),
    ("acadia", "Acadia", "US", "ME", 4.3),
    ("glacier", "Glacier", "US", "MT", 4.2),
    ("olympic", "Olympic", "US", "WA", 4.1),
    ("denali", "Denali", "US", "AK", 4.0),
    ("everglades", "Everglades", "US", "FL", 3.9),
    ("sequoia", "Sequoia", "US", "CA", 3.8),
    ("joshua-tree", "Joshua Tree", "US", "CA", 3.7),
    ("bryce", "Bryce Canyon", "US", "UT", 3.6),
];

pub fn location_row(id: &str, name: &str, rating: f64) -> Row {
    Row::new()
        .with("id", SqlValue::Text(id.into()))
        .with("name", SqlValue::Text(name.into()))
        .with("country", SqlValue::Text("US".into()))
        .with("state", SqlValue::Null)
        .with("description", SqlValue::Text(format!("{name} national park")))
        .with("svg_link", SqlValue::Text(format!("/svg/{id}.svg")))
        .with("rating", SqlValue::Float(rating))
}

#[derive(Default)]
struct State {
    locations: Vec<Row>,
    blocked: HashSet<String>,
    // Users become blocked once they have this many logged requests.
    block_after: Option<usize>,
    request_log: Vec<String>,
    response_log: Vec<String>,
    statements: Vec<String>,
    query_error: Option<String>,
    // Sessions stay valid but every statement fails as if the server went away.
    connection_closed: bool,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    connect_attempts: AtomicU32,
    failing_connects: AtomicU32,
    generation: AtomicU64,
    query_delay_ms: AtomicU64,
    busy: AtomicBool,
    overlap_violations: AtomicU32,
}

/// In-memory stand-in for the relational store, shared by every session it hands out.
#[derive(Clone, Default)]
pub struct MemoryDb {
    inner: Arc<Inner>,
}

impl MemoryDb {
    pub fn new() -> Self {
        MemoryDb::default()
    }

    pub fn with_sample_locations() -> Self {
        let db = MemoryDb::new();
        for (id, name, country, state, rating) in SAMPLE_LOCATIONS {
            db.add_location(
                location_row(id, name, *rating)
                    .with("country", SqlValue::Text(country.to_string()))
                    .with("state", SqlValue::Text(state.to_string())),
            );
        }
        db
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().unwrap()
    }

    pub fn add_location(&self, row: Row) {
        self.state().locations.push(row);
    }

    pub fn block_user(&self, userid: &str) {
        self.state().blocked.insert(userid.to_string());
    }

    pub fn block_after_requests(&self, count: usize) {
        self.state().block_after = Some(count);
    }

    pub fn fail_queries(&self, message: Option<&str>) {
        self.state().query_error = message.map(String::from);
    }

    pub fn close_connection(&self) {
        self.state().connection_closed = true;
    }

    pub fn reopen_connection(&self) {
        self.state().connection_closed = false;
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.inner.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Makes every session handed out so far report itself as invalid.
    pub fn invalidate_sessions(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_query_delay(&self, delay: Duration) {
        self.inner
            .query_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn overlap_violations(&self) -> u32 {
        self.inner.overlap_violations.load(Ordering::SeqCst)
    }

    pub fn request_log(&self) -> Vec<String> {
        self.state().request_log.clone()
    }

    pub fn response_log(&self) -> Vec<String> {
        self.state().response_log.clone()
    }

    /// Every statement run so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    // Marks the store busy for the duration of one operation, counting any overlap.
    async fn occupy(&self) {
        if self.inner.busy.swap(true, Ordering::SeqCst) {
            self.inner.overlap_violations.fetch_add(1, Ordering::SeqCst);
        }
        let delay = self.inner.query_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.busy.store(false, Ordering::SeqCst);
    }

    fn run(&self, statement: &str, params: &[Param]) -> Result<Vec<Row>, StoreError> {
        let mut state = self.state();
        state.statements.push(statement.to_string());

        if state.connection_closed {
            return Err(StoreError::Closed);
        }
        if let Some(message) = &state.query_error {
            return Err(StoreError::Query(message.clone()));
        }

        let text = match params.first() {
            Some(Param::Text(text)) => text.clone(),
            _ => String::new(),
        };

        let rows = match statement {
            TOP_LOCATIONS => {
                let limit = match params.first() {
                    Some(Param::Int(limit)) => (*limit).max(0) as usize,
                    _ => return Err(StoreError::Query("limit must be an integer".into())),
                };
                let mut rows = state.locations.clone();
                rows.sort_by(|a, b| {
                    let a = a.float("rating").unwrap_or(0.0);
                    let b = b.float("rating").unwrap_or(0.0);
                    b.total_cmp(&a)
                });
                rows.truncate(limit);
                rows
            }
            LOCATION_BY_ID => state
                .locations
                .iter()
                .filter(|row| row.text("id").as_deref() == Some(text.as_str()))
                .cloned()
                .collect(),
            SEARCH_LOCATIONS => {
                let needle = text.to_lowercase();
                state
                    .locations
                    .iter()
                    .filter(|row| {
                        ["name", "description", "country", "state"].iter().any(|column| {
                            row.text(column)
                                .is_some_and(|value| value.to_lowercase().contains(&needle))
                        })
                    })
                    .cloned()
                    .collect()
            }
            IS_USER_BLOCKED => {
                let logged = state.request_log.iter().filter(|u| **u == text).count();
                let blocked = state.blocked.contains(&text)
                    || state.block_after.is_some_and(|limit| logged >= limit);
                vec![Row::new().with("blocked", SqlValue::Bool(blocked))]
            }
            LOG_USER_REQUEST => {
                state.request_log.push(text);
                vec![]
            }
            LOG_USER_RESPONSE => {
                state.response_log.push(text);
                vec![]
            }
            other => return Err(StoreError::Query(format!("unknown statement: {other}"))),
        };

        Ok(rows)
    }
}

pub struct MemoryConnector {
    db: MemoryDb,
}

impl MemoryConnector {
    pub fn new(db: MemoryDb) -> Self {
        MemoryConnector { db }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, StoreError> {
        let inner = &self.db.inner;
        inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.db.occupy().await;

        let failing = inner.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            inner.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Connect("connection refused".into()));
        }

        Ok(Box::new(MemorySession {
            db: self.db.clone(),
            generation: inner.generation.load(Ordering::SeqCst),
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

struct MemorySession {
    db: MemoryDb,
    generation: u64,
}

#[async_trait]
impl Session for MemorySession {
    async fn is_valid(&self) -> bool {
        self.generation == self.db.inner.generation.load(Ordering::SeqCst)
    }

    async fn query(&self, statement: &str, params: &[Param]) -> Result<Vec<Row>, StoreError> {
        self.db.occupy().await;
        self.db.run(statement, params)
    }

    async fn execute(&self, statement: &str, params: &[Param]) -> Result<u64, StoreError> {
        self.db.occupy().await;
        self.db.run(statement, params).map(|_| 1)
    }
}
