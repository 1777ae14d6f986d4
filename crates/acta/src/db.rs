use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension};

use crate::error::ActaError;
use crate::filter::Predicate;
use crate::id;
use crate::reconcile::Patch;
use crate::types::{FieldValue, Issue, NewIssue, ProjectPolicy, format_ts};

pub struct Db {
    pub conn: Connection,
    pub acta_dir: PathBuf,
    pub policy: ProjectPolicy,
}

fn parse_dt(row: &rusqlite::Row, column: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            let idx = row.as_ref().column_index(column).unwrap_or_default();
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        })
}

pub(crate) fn issue_from_row(row: &rusqlite::Row) -> Result<Issue, rusqlite::Error> {
    Ok(Issue {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        issue_title: row.get("issue_title")?,
        issue_text: row.get("issue_text")?,
        created_by: row.get("created_by")?,
        assigned_to: row.get("assigned_to")?,
        status_text: row.get("status_text")?,
        open: row.get("open")?,
        created_on: parse_dt(row, "created_on")?,
        updated_on: parse_dt(row, "updated_on")?,
    })
}

fn sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(s) => Value::Text(s.clone()),
        FieldValue::Bool(b) => Value::Integer(i64::from(*b)),
    }
}

/// Column names come from closed enums; caller-supplied keys never reach SQL.
fn predicate_clause(predicate: &Predicate) -> (String, Option<Value>) {
    match predicate {
        Predicate::Project(id) => ("project_id = ?".to_string(), Some(Value::Text(id.clone()))),
        Predicate::Id(id) => ("id = ?".to_string(), Some(Value::Text(id.clone()))),
        Predicate::Field(field, value) => {
            (format!("{} = ?", field.key()), Some(sql_value(value)))
        }
        Predicate::Stamp(stamp, text) => {
            (format!("{} = ?", stamp.column()), Some(Value::Text(text.clone())))
        }
        Predicate::Unknown(_) => ("0 = 1".to_string(), None),
    }
}

impl Db {
    pub fn store_path(data_dir: &Path) -> PathBuf {
        data_dir.join(".acta").join("db.sqlite")
    }

    pub fn open(data_dir: &Path, policy: ProjectPolicy) -> Result<Db, ActaError> {
        let acta_dir = data_dir.join(".acta");
        fs::create_dir_all(&acta_dir)
            .map_err(|e| ActaError::Internal(format!("failed to create .acta dir: {e}")))?;

        let conn = Connection::open(Self::store_path(data_dir))
            .map_err(|e| ActaError::Internal(format!("failed to open database: {e}")))?;

        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| ActaError::Internal(format!("failed to set busy_timeout: {e}")))?;

        Self::run_migrations(&conn, policy)?;

        Ok(Db {
            conn,
            acta_dir,
            policy,
        })
    }

    fn run_migrations(conn: &Connection, policy: ProjectPolicy) -> Result<(), ActaError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS projects (
                id   TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS issues (
                id          TEXT PRIMARY KEY,
                project_id  TEXT NOT NULL,
                issue_title TEXT NOT NULL,
                issue_text  TEXT NOT NULL,
                created_by  TEXT NOT NULL,
                assigned_to TEXT NOT NULL DEFAULT '',
                status_text TEXT NOT NULL DEFAULT '',
                open        INTEGER NOT NULL DEFAULT 1,
                created_on  TEXT NOT NULL,
                updated_on  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS issues_project ON issues(project_id);
            CREATE INDEX IF NOT EXISTS projects_name ON projects(name);",
        )
        .map_err(|e| ActaError::Internal(format!("migration failed: {e}")))?;

        if policy == ProjectPolicy::Unique {
            conn.execute_batch(
                "CREATE UNIQUE INDEX IF NOT EXISTS projects_name_unique ON projects(name);",
            )
            .map_err(|e| {
                ActaError::Internal(format!("cannot enforce unique project names: {e}"))
            })?;
        }

        Ok(())
    }

    /// First project with this name, in insertion order.
    pub fn resolve_project(&self, name: &str) -> Result<Option<String>, ActaError> {
        tracing::debug!(project = %name, "looking up project");
        self.conn
            .query_row(
                "SELECT id FROM projects WHERE name = ?1 ORDER BY rowid LIMIT 1",
                rusqlite::params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ActaError::Internal(format!("failed to look up project: {e}")))
    }

    /// Under [`ProjectPolicy::FirstMatch`] this is lookup-then-insert, so two
    /// processes sharing the store file can still create duplicates.
    pub fn resolve_or_create_project(&self, name: &str) -> Result<String, ActaError> {
        match self.policy {
            ProjectPolicy::FirstMatch => {
                if let Some(id) = self.resolve_project(name)? {
                    return Ok(id);
                }
                let id = id::project_id();
                self.conn
                    .execute(
                        "INSERT INTO projects (id, name) VALUES (?1, ?2)",
                        rusqlite::params![id, name],
                    )
                    .map_err(|e| ActaError::Internal(format!("failed to create project: {e}")))?;
                tracing::info!(project = %name, id = %id, "project created");
                Ok(id)
            }
            ProjectPolicy::Unique => {
                let id = id::project_id();
                let inserted = self
                    .conn
                    .execute(
                        "INSERT INTO projects (id, name) VALUES (?1, ?2)
                         ON CONFLICT(name) DO NOTHING",
                        rusqlite::params![id, name],
                    )
                    .map_err(|e| ActaError::Internal(format!("failed to upsert project: {e}")))?;
                if inserted > 0 {
                    tracing::info!(project = %name, id = %id, "project created");
                }
                self.resolve_project(name)?.ok_or_else(|| {
                    ActaError::Internal(format!("project {name} missing after upsert"))
                })
            }
        }
    }

    pub fn create_issue(&self, project_id: &str, new: &NewIssue) -> Result<Issue, ActaError> {
        let id = id::issue_id();
        let ts = format_ts(&now());

        self.conn
            .execute(
                "INSERT INTO issues (id, project_id, issue_title, issue_text, created_by, assigned_to, status_text, open, created_on, updated_on)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9)",
                rusqlite::params![
                    id,
                    project_id,
                    new.issue_title,
                    new.issue_text,
                    new.created_by,
                    new.assigned_to,
                    new.status_text,
                    ts,
                    ts,
                ],
            )
            .map_err(|e| ActaError::Internal(format!("failed to create issue: {e}")))?;

        tracing::info!(id = %id, project_id = %project_id, "issue created");
        self.get_issue(&id)
    }

    pub(crate) fn get_issue(&self, id: &str) -> Result<Issue, ActaError> {
        self.conn
            .query_row(
                "SELECT * FROM issues WHERE id = ?1",
                rusqlite::params![id],
                issue_from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => ActaError::IssueNotFound(id.to_string()),
                other => ActaError::Internal(format!("failed to get issue: {other}")),
            })
    }

    /// All issues satisfying every predicate, in insertion order.
    pub fn list_issues(&self, predicates: &[Predicate]) -> Result<Vec<Issue>, ActaError> {
        let (clauses, values): (Vec<String>, Vec<Option<Value>>) =
            predicates.iter().map(predicate_clause).unzip();
        let values: Vec<Value> = values.into_iter().flatten().collect();

        let mut sql = "SELECT * FROM issues".to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY rowid");
        tracing::debug!(%sql, "listing issues");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| ActaError::Internal(format!("failed to prepare issues query: {e}")))?;
        let issues = stmt
            .query_map(rusqlite::params_from_iter(values), issue_from_row)
            .map_err(|e| ActaError::Internal(format!("failed to query issues: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ActaError::Internal(format!("failed to read issues: {e}")))?;
        Ok(issues)
    }

    /// Apply `patch` to the issue `issue_id` within `project_id`.
    ///
    /// The stored `updated_on` always moves forward by at least a
    /// millisecond, even if the clock has not.
    pub fn update_issue(
        &self,
        project_id: &str,
        issue_id: &str,
        patch: &Patch,
    ) -> Result<Issue, ActaError> {
        let matches = self.list_issues(&[
            Predicate::Project(project_id.to_string()),
            Predicate::Id(issue_id.to_string()),
        ])?;

        let mut updated = None;
        for current in matches {
            let stamp = patch
                .updated_on
                .trunc_subsecs(3)
                .max(current.updated_on + Duration::milliseconds(1));

            let mut set_clauses = Vec::new();
            let mut values: Vec<Value> = Vec::new();
            for (field, value) in &patch.changes {
                set_clauses.push(format!("{} = ?", field.key()));
                values.push(sql_value(value));
            }
            set_clauses.push("updated_on = ?".to_string());
            values.push(Value::Text(format_ts(&stamp)));
            values.push(Value::Text(current.id.clone()));

            let sql = format!("UPDATE issues SET {} WHERE id = ?", set_clauses.join(", "));
            self.conn
                .execute(&sql, rusqlite::params_from_iter(values))
                .map_err(|e| ActaError::Internal(format!("failed to update issue: {e}")))?;

            tracing::info!(id = %current.id, changes = patch.changes.len(), "issue updated");
            updated = Some(self.get_issue(&current.id)?);
        }

        updated.ok_or_else(|| ActaError::IssueNotFound(issue_id.to_string()))
    }

    pub fn delete_issue(&self, project_id: &str, issue_id: &str) -> Result<(), ActaError> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM issues WHERE project_id = ?1 AND id = ?2",
                rusqlite::params![project_id, issue_id],
            )
            .map_err(|e| ActaError::Internal(format!("failed to delete issue: {e}")))?;

        if deleted == 0 {
            return Err(ActaError::IssueNotFound(issue_id.to_string()));
        }
        tracing::info!(id = %issue_id, project_id = %project_id, "issue deleted");
        Ok(())
    }
}

/// Current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
