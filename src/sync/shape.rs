//! List-response adapter.
//!
//! The API names its list field per endpoint (`users`, `events`, `data`, ...).
//! [`extract_page`] picks the item list in this order:
//!
//! 1. the body itself, when it is a JSON array;
//! 2. the first array-valued field of the top-level object, in document order;
//! 3. nothing: an empty list.
//!
//! With more than one array-valued field the first one wins.
//!
//! Pagination metadata: `pages` → total pages (1 when absent, non-numeric or
//! below 1), `total` → total items (0 when absent or non-numeric).

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageEnvelope {
    pub items: Vec<Value>,
    pub total_pages: u32,
    pub total_items: u64,
}

pub fn extract_page(body: &Value) -> PageEnvelope {
    match body {
        Value::Array(items) => PageEnvelope {
            items: items.clone(),
            total_pages: 1,
            total_items: 0,
        },
        Value::Object(fields) => PageEnvelope {
            items: first_list(fields).cloned().unwrap_or_default(),
            total_pages: total_pages(fields),
            total_items: total_items(fields),
        },
        _ => PageEnvelope {
            items: Vec::new(),
            total_pages: 1,
            total_items: 0,
        },
    }
}

fn first_list(fields: &Map<String, Value>) -> Option<&Vec<Value>> {
    fields.values().find_map(Value::as_array)
}

fn total_pages(fields: &Map<String, Value>) -> u32 {
    fields
        .get("pages")
        .and_then(non_negative)
        .filter(|pages| *pages >= 1)
        .map(|pages| u32::try_from(pages).unwrap_or(u32::MAX))
        .unwrap_or(1)
}

fn total_items(fields: &Map<String, Value>) -> u64 {
    fields.get("total").and_then(non_negative).unwrap_or(0)
}

fn non_negative(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}
