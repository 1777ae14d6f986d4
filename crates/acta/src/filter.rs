use std::collections::BTreeMap;

use crate::types::{Field, FieldValue, Issue, format_ts};

/// Timestamp columns, compared against the exact text the view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    CreatedOn,
    UpdatedOn,
}

impl Stamp {
    pub fn from_key(key: &str) -> Option<Stamp> {
        match key {
            "created_on" => Some(Stamp::CreatedOn),
            "updated_on" => Some(Stamp::UpdatedOn),
            _ => None,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Stamp::CreatedOn => "created_on",
            Stamp::UpdatedOn => "updated_on",
        }
    }

    fn text_of(self, issue: &Issue) -> String {
        match self {
            Stamp::CreatedOn => format_ts(&issue.created_on),
            Stamp::UpdatedOn => format_ts(&issue.updated_on),
        }
    }
}

/// An equality condition against a stored issue. A predicate set is
/// combined with logical AND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Project(String),
    Id(String),
    Field(Field, FieldValue),
    Stamp(Stamp, String),
    /// A key no issue carries. Matches nothing.
    Unknown(String),
}

impl Predicate {
    pub fn matches(&self, issue: &Issue) -> bool {
        match self {
            Predicate::Project(id) => issue.project_id == *id,
            Predicate::Id(id) => issue.id == *id,
            Predicate::Field(field, value) => field.value_of(issue) == *value,
            Predicate::Stamp(stamp, text) => stamp.text_of(issue) == *text,
            Predicate::Unknown(_) => false,
        }
    }
}

/// Translate query parameters into predicates scoped to `project_id`.
///
/// The project predicate always comes first. `_id` targets the record
/// identifier and known fields are coerced through [`Field::coerce`].
/// `created_on` and `updated_on` compare as text. Every other key, including
/// `project_id`, becomes [`Predicate::Unknown`], so the listing is empty.
pub fn build(project_id: &str, raw_params: &BTreeMap<String, String>) -> Vec<Predicate> {
    let mut predicates = vec![Predicate::Project(project_id.to_string())];

    for (key, value) in raw_params {
        if key == "_id" {
            predicates.push(Predicate::Id(value.clone()));
        } else if let Some(field) = Field::from_key(key) {
            predicates.push(Predicate::Field(field, field.coerce(value)));
        } else if let Some(stamp) = Stamp::from_key(key) {
            predicates.push(Predicate::Stamp(stamp, value.clone()));
        } else {
            tracing::debug!(key = %key, "filter key matches no issue field");
            predicates.push(Predicate::Unknown(key.clone()));
        }
    }

    predicates
}
