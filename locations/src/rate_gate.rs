use crate::config::RateGateConfig;
use crate::metrics_defs::RATE_GATE_REJECTED;
use crate::supervisor::ConnectionSupervisor;
use shared::counter;
use std::sync::Arc;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum GateError {
    #[error("You have exceeded the rate limit")]
    Blocked,
}

/// Per-user admission control.
///
/// The limiting policy lives in the store (`is_user_blocked`, `log_user_request`,
/// `log_user_response`); the gate only decides when to call it. Accounting failures
/// never fail a request: a failing block check counts as not blocked and failing log
/// calls are only reported.
pub struct RateGate {
    store: Arc<ConnectionSupervisor>,
    recheck_after_record: bool,
}

impl RateGate {
    pub fn new(store: Arc<ConnectionSupervisor>, config: &RateGateConfig) -> Self {
        RateGate {
            store,
            recheck_after_record: config.recheck_after_record,
        }
    }

    /// Admits or rejects a request before dispatch.
    ///
    /// Anonymous requests (no user id) are always admitted and leave no trace. Otherwise
    /// the user is checked, the request is recorded and, if configured, the user is
    /// checked again so the request that crosses the limit is itself rejected.
    pub async fn admit(&self, userid: Option<&str>) -> Result<(), GateError> {
        let Some(userid) = userid.filter(|u| !u.is_empty()) else {
            return Ok(());
        };

        if self.is_blocked(userid).await {
            counter!(RATE_GATE_REJECTED, "stage" => "before_record").increment(1);
            return Err(GateError::Blocked);
        }

        self.record_request(userid).await;

        if self.recheck_after_record && self.is_blocked(userid).await {
            counter!(RATE_GATE_REJECTED, "stage" => "after_record").increment(1);
            return Err(GateError::Blocked);
        }

        Ok(())
    }

    /// Records that an admitted request has been answered.
    pub async fn complete(&self, userid: Option<&str>) {
        if let Some(userid) = userid.filter(|u| !u.is_empty()) {
            self.record_response(userid).await;
        }
    }

    pub async fn is_blocked(&self, userid: &str) -> bool {
        let blocked = match self.store.session().await {
            Ok(session) => session.gateway().is_user_blocked(userid).await,
            Err(err) => Err(err),
        };

        blocked.unwrap_or_else(|err| {
            tracing::warn!("Block check for user {userid} failed, admitting: {err}");
            false
        })
    }

    pub async fn record_request(&self, userid: &str) {
        let result = match self.store.session().await {
            Ok(session) => session.gateway().log_user_request(userid).await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            tracing::warn!("Could not record request for user {userid}: {err}");
        }
    }

    pub async fn record_response(&self, userid: &str) {
        let result = match self.store.session().await {
            Ok(session) => session.gateway().log_user_response(userid).await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            tracing::warn!("Could not record response for user {userid}: {err}");
        }
    }
}
