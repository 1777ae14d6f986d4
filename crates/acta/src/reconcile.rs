//! Turns a free-form update request into a typed patch.
//!
//! Empty values mean "leave unchanged"; there is no way to clear a field
//! through this path. `updated_on` is stamped on every patch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::ActaError;
use crate::types::{Field, FieldValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub changes: Vec<(Field, FieldValue)>,
    pub updated_on: DateTime<Utc>,
}

/// Split `_id` out of a request body. Absent and empty are both rejected.
pub fn take_id(fields: &mut BTreeMap<String, String>) -> Result<String, ActaError> {
    match fields.remove("_id") {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(ActaError::MissingId),
    }
}

/// Build a patch from the remaining request fields, returning it with the
/// number of fields it changes (`updated_on` excluded).
pub fn reconcile(raw_fields: &BTreeMap<String, String>) -> (Patch, usize) {
    reconcile_at(raw_fields, Utc::now())
}

pub fn reconcile_at(raw_fields: &BTreeMap<String, String>, now: DateTime<Utc>) -> (Patch, usize) {
    let mut changes = Vec::new();

    for (key, value) in raw_fields {
        if value.is_empty() {
            continue;
        }
        match Field::from_key(key) {
            Some(field) => changes.push((field, field.coerce(value))),
            None => tracing::debug!(key = %key, "skipping non-updatable key"),
        }
    }

    let count = changes.len();
    (
        Patch {
            changes,
            updated_on: now,
        },
        count,
    )
}
