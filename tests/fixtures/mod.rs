//! Canned worker payloads shared by the integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};

pub fn running(percent: f64, completed: u64, total: u64, current: &str) -> Value {
    json!({
        "state": "running",
        "progress_percent": percent,
        "completed_count": completed,
        "total_count": total,
        "current_item_label": current,
    })
}

pub fn completed(results: Value) -> Value {
    json!({
        "state": "completed",
        "progress_percent": 100,
        "completed_count": 2,
        "total_count": 2,
        "successful_count": 1,
        "failed_count": 1,
        "results": results,
    })
}

pub fn two_results() -> Value {
    json!([
        {
            "item_id": "a1",
            "label": "Review vendor contracts",
            "success": true,
            "found_documents": ["msa.pdf", "sow.pdf"],
            "suggested_status": "done"
        },
        {
            "item_id": "a2",
            "label": "Collect signed NDAs",
            "success": false,
            "error": "No matching documents"
        }
    ])
}

pub fn cancelled() -> Value {
    json!({ "state": "cancelled", "message": "Cancelled by user" })
}

pub fn ingest(state: &str) -> Value {
    json!({ "state": state })
}
