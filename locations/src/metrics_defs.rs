//! Metrics definitions for the locations service.

use shared::metrics_defs::{MetricDef, MetricType};

pub const RPC_DURATION: MetricDef = MetricDef {
    name: "rpc.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent dispatching an RPC call in seconds. Tagged with method, outcome.",
};

pub const DB_RECONNECT_ATTEMPTS: MetricDef = MetricDef {
    name: "db.reconnect.attempts",
    metric_type: MetricType::Counter,
    description: "Number of attempts made to establish a database session",
};

pub const DB_RECONNECT_FAILURES: MetricDef = MetricDef {
    name: "db.reconnect.failures",
    metric_type: MetricType::Counter,
    description: "Number of failed attempts to establish a database session",
};

pub const DB_CONNECTED: MetricDef = MetricDef {
    name: "db.connected",
    metric_type: MetricType::Gauge,
    description: "1 while a valid database session is installed, 0 otherwise",
};

pub const RATE_GATE_REJECTED: MetricDef = MetricDef {
    name: "rate_gate.rejected",
    metric_type: MetricType::Counter,
    description: "Requests rejected because the user is blocked. Tagged with stage.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    RPC_DURATION,
    DB_RECONNECT_ATTEMPTS,
    DB_RECONNECT_FAILURES,
    DB_CONNECTED,
    RATE_GATE_REJECTED,
];
