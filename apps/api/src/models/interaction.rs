use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row of the append-only `ai_interactions` audit log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InteractionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub flow_name: String,
    pub status: String,
    pub input: String,
    pub output: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
