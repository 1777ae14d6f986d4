use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub enum ActaError {
    RequiredFieldsMissing,
    MissingId,
    NoSuchProject(String),
    IssueNotFound(String),
    NoUpdateFields(String),
    InvalidBody(String),
    InvalidQuery(String),
    Internal(String),
}

impl fmt::Display for ActaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActaError::RequiredFieldsMissing => write!(f, "required field(s) missing"),
            ActaError::MissingId => write!(f, "missing _id"),
            ActaError::NoSuchProject(name) => write!(f, "no such project: {name}"),
            ActaError::IssueNotFound(id) => write!(f, "issue not found: {id}"),
            ActaError::NoUpdateFields(id) => write!(f, "no update field(s) sent for {id}"),
            ActaError::InvalidBody(detail) => write!(f, "invalid request body: {detail}"),
            ActaError::InvalidQuery(detail) => write!(f, "invalid query: {detail}"),
            ActaError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ActaError {}

/// The operation a request was performing, which decides the wording of
/// not-found responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    List,
    Create,
    Update,
    Delete,
}

/// Inline error body. Every failure is reported with HTTP 200.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Listing an unknown project uses a capitalised key.
#[derive(Debug, Serialize)]
pub struct ProjectErrorResponse {
    #[serde(rename = "Error")]
    pub error: String,
}

impl ErrorResponse {
    fn new(error: &str, id: Option<&str>) -> Self {
        ErrorResponse {
            error: error.to_string(),
            id: id.map(String::from),
        }
    }
}

pub fn error_body(err: &ActaError, action: Action) -> serde_json::Value {
    let resp = match (err, action) {
        (ActaError::NoSuchProject(_), Action::List) => {
            return serde_json::json!(ProjectErrorResponse {
                error: "no such project".to_string(),
            });
        }
        (ActaError::RequiredFieldsMissing, _) => {
            ErrorResponse::new("required field(s) missing", None)
        }
        (ActaError::MissingId, _) => ErrorResponse::new("missing _id", None),
        (ActaError::NoUpdateFields(id), _) => {
            ErrorResponse::new("no update field(s) sent", Some(id.as_str()))
        }
        (ActaError::IssueNotFound(id), Action::Delete) => {
            ErrorResponse::new("could not delete", Some(id.as_str()))
        }
        (ActaError::IssueNotFound(id), _) => {
            ErrorResponse::new("could not update", Some(id.as_str()))
        }
        (ActaError::InvalidBody(_), _) => ErrorResponse::new("invalid request body", None),
        (ActaError::InvalidQuery(_), _) => ErrorResponse::new("invalid query", None),
        (ActaError::NoSuchProject(_), _) | (ActaError::Internal(_), _) => {
            ErrorResponse::new("internal error", None)
        }
    };
    serde_json::json!(resp)
}
