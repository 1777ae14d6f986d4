use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::error::ActaError;

/// How project names are kept consistent in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ProjectPolicy {
    /// No uniqueness constraint; the earliest project with a name wins.
    #[default]
    FirstMatch,
    /// Unique index on the name; resolve-or-create is an upsert.
    Unique,
}

/// The mutable, caller-addressable fields of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Title,
    Text,
    CreatedBy,
    AssignedTo,
    StatusText,
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Title,
        Field::Text,
        Field::CreatedBy,
        Field::AssignedTo,
        Field::StatusText,
        Field::Open,
    ];

    pub fn from_key(key: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.key() == key)
    }

    /// Request key, view key and column name are all the same string.
    pub fn key(self) -> &'static str {
        match self {
            Field::Title => "issue_title",
            Field::Text => "issue_text",
            Field::CreatedBy => "created_by",
            Field::AssignedTo => "assigned_to",
            Field::StatusText => "status_text",
            Field::Open => "open",
        }
    }

    /// `open` is true only for the exact string `"true"`.
    pub fn coerce(self, raw: &str) -> FieldValue {
        match self {
            Field::Open => FieldValue::Bool(raw == "true"),
            _ => FieldValue::Text(raw.to_string()),
        }
    }

    pub fn value_of(self, issue: &Issue) -> FieldValue {
        match self {
            Field::Title => FieldValue::Text(issue.issue_title.clone()),
            Field::Text => FieldValue::Text(issue.issue_text.clone()),
            Field::CreatedBy => FieldValue::Text(issue.created_by.clone()),
            Field::AssignedTo => FieldValue::Text(issue.assigned_to.clone()),
            Field::StatusText => FieldValue::Text(issue.status_text.clone()),
            Field::Open => FieldValue::Bool(issue.open),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub id: String,
    pub project_id: String,
    pub issue_title: String,
    pub issue_text: String,
    pub created_by: String,
    pub assigned_to: String,
    pub status_text: String,
    pub open: bool,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

/// What callers see: `_id` instead of `id`, no project back-reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueView {
    #[serde(rename = "_id")]
    pub id: String,
    pub issue_title: String,
    pub issue_text: String,
    pub created_on: String,
    pub updated_on: String,
    pub created_by: String,
    pub assigned_to: String,
    pub open: bool,
    pub status_text: String,
}

impl From<Issue> for IssueView {
    fn from(issue: Issue) -> Self {
        IssueView {
            id: issue.id,
            issue_title: issue.issue_title,
            issue_text: issue.issue_text,
            created_on: format_ts(&issue.created_on),
            updated_on: format_ts(&issue.updated_on),
            created_by: issue.created_by,
            assigned_to: issue.assigned_to,
            open: issue.open,
            status_text: issue.status_text,
        }
    }
}

/// Validated input for the create path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub issue_title: String,
    pub issue_text: String,
    pub created_by: String,
    pub assigned_to: String,
    pub status_text: String,
}

impl NewIssue {
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<NewIssue, ActaError> {
        let required = |field: Field| match fields.get(field.key()) {
            Some(v) if !v.is_empty() => Ok(v.clone()),
            _ => Err(ActaError::RequiredFieldsMissing),
        };
        let optional = |field: Field| fields.get(field.key()).cloned().unwrap_or_default();

        Ok(NewIssue {
            issue_title: required(Field::Title)?,
            issue_text: required(Field::Text)?,
            created_by: required(Field::CreatedBy)?,
            assigned_to: optional(Field::AssignedTo),
            status_text: optional(Field::StatusText),
        })
    }
}

pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
