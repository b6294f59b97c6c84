use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One append-only audit record. `changes` is a list of [`FieldDelta`]
/// objects serialized as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: i64,
    pub actor_id: Option<i64>,
    pub changes: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDelta {
    pub field: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

impl FieldDelta {
    pub fn new(
        field: impl Into<String>,
        old: impl Serialize,
        new: impl Serialize,
    ) -> Self {
        Self {
            field: field.into(),
            old: serde_json::to_value(old).unwrap_or(serde_json::Value::Null),
            new: serde_json::to_value(new).unwrap_or(serde_json::Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_serialize_field_old_new() {
        let delta = FieldDelta::new("status", "unpaid", "paid");
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["field"], "status");
        assert_eq!(json["old"], "unpaid");
        assert_eq!(json["new"], "paid");
    }
}
