//! Typed queries over the store's locations API.
//!
//! The gateway holds nothing but a borrowed session. It is created from a
//! [`SessionGuard`](crate::supervisor::SessionGuard) for each unit of work, so every call
//! runs under the supervisor lock.
use crate::store::{Param, Row, Session, StoreError};
use crate::types::Location;

// Columns are cast so every driver hands back plain text and float8.
macro_rules! select_locations {
    ($source:literal) => {
        concat!(
            "SELECT id::text AS id, name::text AS name, country::text AS country, ",
            "state::text AS state, description::text AS description, ",
            "svg_link::text AS svg_link, rating::float8 AS rating FROM ",
            $source
        )
    };
}

pub(crate) const TOP_LOCATIONS: &str = select_locations!("get_top_locations($1::int)");
pub(crate) const LOCATION_BY_ID: &str = select_locations!("get_location_by_id($1::text)");
pub(crate) const SEARCH_LOCATIONS: &str = select_locations!("search_locations($1::text)");
pub(crate) const IS_USER_BLOCKED: &str = "SELECT is_user_blocked($1::text) AS blocked";
pub(crate) const LOG_USER_REQUEST: &str = "SELECT log_user_request($1::text)";
pub(crate) const LOG_USER_RESPONSE: &str = "SELECT log_user_response($1::text)";

pub struct QueryGateway<'a> {
    session: &'a dyn Session,
}

impl<'a> QueryGateway<'a> {
    pub fn new(session: &'a dyn Session) -> Self {
        QueryGateway { session }
    }

    /// Highest rated locations, in the order the store returns them.
    pub async fn top_locations(&self, limit: i32) -> Result<Vec<Location>, StoreError> {
        let rows = self.session.query(TOP_LOCATIONS, &[Param::Int(limit)]).await?;
        Ok(to_locations(&rows))
    }

    pub async fn location_by_id(&self, id: &str) -> Result<Option<Location>, StoreError> {
        let rows = self.session.query(LOCATION_BY_ID, &[id.into()]).await?;
        Ok(to_locations(&rows).into_iter().next())
    }

    pub async fn search_locations(&self, query: &str) -> Result<Vec<Location>, StoreError> {
        let rows = self.session.query(SEARCH_LOCATIONS, &[query.into()]).await?;
        Ok(to_locations(&rows))
    }

    /// An empty result counts as not blocked.
    pub async fn is_user_blocked(&self, userid: &str) -> Result<bool, StoreError> {
        let rows = self.session.query(IS_USER_BLOCKED, &[userid.into()]).await?;
        Ok(rows
            .first()
            .and_then(|row| row.bool("blocked"))
            .unwrap_or(false))
    }

    pub async fn log_user_request(&self, userid: &str) -> Result<(), StoreError> {
        self.session
            .execute(LOG_USER_REQUEST, &[userid.into()])
            .await
            .map(|_| ())
    }

    pub async fn log_user_response(&self, userid: &str) -> Result<(), StoreError> {
        self.session
            .execute(LOG_USER_RESPONSE, &[userid.into()])
            .await
            .map(|_| ())
    }
}

fn to_locations(rows: &[Row]) -> Vec<Location> {
    rows.iter()
        .filter_map(|row| match Location::from_row(row) {
            Ok(location) => Some(location),
            Err(err) => {
                tracing::warn!("Skipping location row: {err}");
                None
            }
        })
        .collect()
}
