use crate::store::Row;
use serde::Serialize;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RowError {
    #[error("row is missing a location id")]
    MissingId,
}

/// A single location record as exposed to clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub country: String,
    pub state: String,
    pub description: String,
    pub svg_link: String,
    pub rating: f64,
}

impl Location {
    /// Builds a location from a store row, sanitizing every text column.
    /// Null text columns become empty strings and a null rating becomes 0.
    pub fn from_row(row: &Row) -> Result<Self, RowError> {
        let text = |column: &str| sanitize(&row.text(column).unwrap_or_default());

        let id = text("id");
        if id.is_empty() {
            return Err(RowError::MissingId);
        }

        Ok(Location {
            id,
            name: text("name"),
            country: text("country"),
            state: text("state"),
            description: text("description"),
            svg_link: text("svg_link"),
            rating: row.float("rating").unwrap_or(0.0),
        })
    }
}

/// Strips control characters, keeping tab, newline and carriage return.
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqlValue;

    fn row(id: &str, description: &str) -> Row {
        Row::new()
            .with("id", SqlValue::Text(id.into()))
            .with("name", SqlValue::Text("Arches".into()))
            .with("country", SqlValue::Text("US".into()))
            .with("state", SqlValue::Text("UT".into()))
            .with("description", SqlValue::Text(description.into()))
            .with("svg_link", SqlValue::Text("/svg/arches.svg".into()))
            .with("rating", SqlValue::Float(4.8))
    }

    #[test]
    fn test_sanitize_control_characters() {
        let location = Location::from_row(&row("a1", "red\u{7} rock\tarch\r\nnext\u{1b}[0m")).unwrap();
        assert_eq!(location.description, "red rock\tarch\r\nnext[0m");
        assert_eq!(location.rating, 4.8);
    }

    #[test]
    fn test_missing_id() {
        assert_eq!(Location::from_row(&row("", "x")), Err(RowError::MissingId));
        // An id made only of control characters is empty after sanitizing
        assert_eq!(
            Location::from_row(&row("\u{0}\u{7}", "x")),
            Err(RowError::MissingId)
        );
    }

    #[test]
    fn test_null_columns() {
        let row = Row::new()
            .with("id", SqlValue::Text("b2".into()))
            .with("state", SqlValue::Null);
        let location = Location::from_row(&row).unwrap();
        assert_eq!(location.state, "");
        assert_eq!(location.rating, 0.0);
    }

    #[test]
    fn test_json_shape() {
        let location = Location::from_row(&row("a1", "desc")).unwrap();
        let value = serde_json::to_value(&location).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["country", "description", "id", "name", "rating", "state", "svg_link"]
        );
    }
}
