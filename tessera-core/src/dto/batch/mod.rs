//! Batch DTOs

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Request to submit a batch of prediction jobs
///
/// Every item is merged over `shared_params` (item keys win) to form one
/// child's input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBatch {
    #[serde(default = "empty_object")]
    pub shared_params: JsonValue,
    pub items: Vec<JsonValue>,
    /// Maximum number of children in flight at once
    #[serde(default)]
    pub max_concurrent: Option<u32>,
}

/// Acknowledgement of an accepted batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub batch_id: Uuid,
    /// Child ids in submission order
    pub child_ids: Vec<Uuid>,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}
