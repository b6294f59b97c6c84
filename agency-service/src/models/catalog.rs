//! Service catalog and issuing-business records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Catalog service. `pipeline_config` holds the batches of content items a
/// paid invoice for this service provisions.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub hsn_code: Option<String>,
    pub category: Option<String>,
    pub is_pipeline: bool,
    pub pipeline_config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// One batch entry inside a service's pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineBatch {
    pub prefix: String,
    pub count: u32,
}

impl Service {
    /// Parses the stored pipeline configuration, tolerating a missing or
    /// malformed value as "no batches".
    pub fn pipeline_batches(&self) -> Vec<PipelineBatch> {
        self.pipeline_config
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// Master record for the issuing business. Invoices copy these fields at
/// creation time, so edits here never touch historic invoices.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BusinessInfo {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub gstin: String,
    pub bank_account_name: String,
    pub bank_account_number: String,
    pub bank_ifsc: String,
    pub bank_branch: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with_config(config: Option<serde_json::Value>) -> Service {
        Service {
            id: 1,
            code: "SMM".to_string(),
            name: "Social media management".to_string(),
            hsn_code: None,
            category: None,
            is_pipeline: true,
            pipeline_config: config,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn parses_pipeline_batches() {
        let svc = service_with_config(Some(serde_json::json!([
            {"prefix": "REEL", "count": 4},
            {"prefix": "POST", "count": 8},
        ])));
        let batches = svc.pipeline_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].prefix, "REEL");
        assert_eq!(batches[1].count, 8);
    }

    #[test]
    fn missing_or_malformed_config_yields_no_batches() {
        assert!(service_with_config(None).pipeline_batches().is_empty());
        let malformed = service_with_config(Some(serde_json::json!({"prefix": "X"})));
        assert!(malformed.pipeline_batches().is_empty());
    }
}
