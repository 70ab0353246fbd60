//! SQLite implementation of [`BountyStore`].
//!
//! Records are stored as JSON documents keyed by their external id, with a
//! few extracted columns for the lookups the engine needs (repository id +
//! issue number, owner login, discord id). A `schema_version` table tracks
//! migrations; increment `CURRENT_SCHEMA_VERSION` and extend
//! `run_migrations` when the schema changes.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::records::{
    Issue, IssuePatch, LinkedUser, Organization, OrganizationPatch, PullRequest, PullRequestPatch,
    Repository, RepositoryPatch,
};
use super::{BountyStore, StoreError};

const CURRENT_SCHEMA_VERSION: i64 = 1;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run pending migrations.
    ///
    /// WAL mode is required; SQLite can silently keep DELETE mode on
    /// filesystems without shared-memory support, so the pragma result is
    /// verified. In-memory databases report `memory`, which is accepted.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();

        if path_str != ":memory:" && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| StoreError::storage("open database", e.to_string()))?;

        let is_in_memory = path_str == ":memory:";
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::storage("set journal_mode", e.to_string()))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(StoreError::storage(
                "configure journal_mode",
                format!(
                    "failed to enable WAL mode: SQLite returned '{journal_mode}' instead of 'wal'"
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| StoreError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(
                "schema version",
                format!(
                    "database schema version {from_version} is newer than supported version \
                     {CURRENT_SCHEMA_VERSION}; upgrade the application"
                ),
            ));
        }
        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS issues (
                    issue_id TEXT PRIMARY KEY,
                    repository_id TEXT NOT NULL,
                    number INTEGER NOT NULL,
                    doc TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_issues_repository
                    ON issues(repository_id);
                CREATE INDEX IF NOT EXISTS idx_issues_repo_number
                    ON issues(repository_id, number);

                CREATE TABLE IF NOT EXISTS repositories (
                    repository_id TEXT PRIMARY KEY,
                    owner_login TEXT NOT NULL,
                    doc TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_repositories_owner
                    ON repositories(owner_login);

                CREATE TABLE IF NOT EXISTS organizations (
                    organization_id TEXT PRIMARY KEY,
                    login TEXT NOT NULL,
                    doc TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_organizations_login
                    ON organizations(login);

                CREATE TABLE IF NOT EXISTS pull_requests (
                    pull_request_id TEXT PRIMARY KEY,
                    doc TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS users (
                    login TEXT PRIMARY KEY,
                    discord_id TEXT,
                    doc TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_users_discord
                    ON users(discord_id) WHERE discord_id IS NOT NULL;
                "#,
            )
            .map_err(|e| StoreError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT INTO schema_version (id, version) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET version = ?1",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::storage("record schema version", e.to_string()))?;

        Ok(())
    }
}

fn to_doc<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::storage("serialize record", e.to_string()))
}

fn from_doc<T: DeserializeOwned>(doc: &str) -> Result<T, StoreError> {
    serde_json::from_str(doc).map_err(|e| StoreError::storage("deserialize record", e.to_string()))
}

fn query_doc<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let doc: Option<String> = conn
        .query_row(sql, params![key], |row| row.get(0))
        .optional()
        .map_err(|e| StoreError::storage("query record", e.to_string()))?;
    doc.as_deref().map(from_doc).transpose()
}

fn query_docs<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    key: &str,
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| StoreError::storage("prepare query", e.to_string()))?;
    let rows = stmt
        .query_map(params![key], |row| row.get::<_, String>(0))
        .map_err(|e| StoreError::storage("query records", e.to_string()))?;
    let mut records = Vec::new();
    for row in rows {
        let doc = row.map_err(|e| StoreError::storage("read row", e.to_string()))?;
        records.push(from_doc(&doc)?);
    }
    Ok(records)
}

#[async_trait]
impl BountyStore for SqliteStore {
    async fn create_or_update_issue(&self, patch: IssuePatch) -> Result<Issue, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let existing: Option<Issue> = query_doc(
            &conn,
            "SELECT doc FROM issues WHERE issue_id = ?1",
            &patch.issue_id,
        )?;
        let issue = match existing {
            Some(mut issue) => {
                issue.apply(patch);
                issue
            }
            None => Issue::from_patch(patch),
        };
        conn.execute(
            "INSERT INTO issues (issue_id, repository_id, number, doc)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(issue_id) DO UPDATE SET
                 repository_id = ?2, number = ?3, doc = ?4",
            params![
                issue.issue_id,
                issue.repository.id,
                issue.number as i64,
                to_doc(&issue)?
            ],
        )
        .map_err(|e| StoreError::storage("write issue", e.to_string()))?;
        Ok(issue)
    }

    async fn update_issue(&self, issue_id: &str, patch: IssuePatch) -> Result<Issue, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut issue: Issue =
            query_doc(&conn, "SELECT doc FROM issues WHERE issue_id = ?1", issue_id)?
                .ok_or_else(|| StoreError::not_found("issue", issue_id))?;
        issue.apply(patch);
        conn.execute(
            "UPDATE issues SET repository_id = ?2, number = ?3, doc = ?4 WHERE issue_id = ?1",
            params![
                issue.issue_id,
                issue.repository.id,
                issue.number as i64,
                to_doc(&issue)?
            ],
        )
        .map_err(|e| StoreError::storage("write issue", e.to_string()))?;
        Ok(issue)
    }

    async fn issue(&self, issue_id: &str) -> Result<Option<Issue>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        query_doc(&conn, "SELECT doc FROM issues WHERE issue_id = ?1", issue_id)
    }

    async fn issue_by_repo_and_number(
        &self,
        repository_id: &str,
        number: u64,
    ) -> Result<Option<Issue>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM issues WHERE repository_id = ?1 AND number = ?2",
                params![repository_id, number as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::storage("query issue", e.to_string()))?;
        doc.as_deref().map(from_doc).transpose()
    }

    async fn delete_issue(&self, issue_id: &str) -> Result<Issue, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let issue: Issue =
            query_doc(&conn, "SELECT doc FROM issues WHERE issue_id = ?1", issue_id)?
                .ok_or_else(|| StoreError::not_found("issue", issue_id))?;
        conn.execute("DELETE FROM issues WHERE issue_id = ?1", params![issue_id])
            .map_err(|e| StoreError::storage("delete issue", e.to_string()))?;
        Ok(issue)
    }

    async fn issues_for_repository(&self, repository_id: &str) -> Result<Vec<Issue>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        query_docs(
            &conn,
            "SELECT doc FROM issues WHERE repository_id = ?1",
            repository_id,
        )
    }

    async fn issues_assigned_to(&self, login: &str) -> Result<Vec<Issue>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        // Assignees live inside the JSON document; scan and filter.
        let mut stmt = conn
            .prepare("SELECT doc FROM issues")
            .map_err(|e| StoreError::storage("prepare query", e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::storage("query issues", e.to_string()))?;
        let mut issues = Vec::new();
        for row in rows {
            let doc = row.map_err(|e| StoreError::storage("read row", e.to_string()))?;
            let issue: Issue = from_doc(&doc)?;
            if issue.assignee(login).is_some() {
                issues.push(issue);
            }
        }
        Ok(issues)
    }

    async fn create_or_update_repository(
        &self,
        patch: RepositoryPatch,
    ) -> Result<Repository, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let existing: Option<Repository> = query_doc(
            &conn,
            "SELECT doc FROM repositories WHERE repository_id = ?1",
            &patch.repository_id,
        )?;
        let repository = match existing {
            Some(mut repository) => {
                repository.apply(patch);
                repository
            }
            None => Repository::from_patch(patch),
        };
        conn.execute(
            "INSERT INTO repositories (repository_id, owner_login, doc)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(repository_id) DO UPDATE SET owner_login = ?2, doc = ?3",
            params![
                repository.repository_id,
                repository.owner.login,
                to_doc(&repository)?
            ],
        )
        .map_err(|e| StoreError::storage("write repository", e.to_string()))?;
        Ok(repository)
    }

    async fn update_repository(
        &self,
        repository_id: &str,
        patch: RepositoryPatch,
    ) -> Result<Repository, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut repository: Repository = query_doc(
            &conn,
            "SELECT doc FROM repositories WHERE repository_id = ?1",
            repository_id,
        )?
        .ok_or_else(|| StoreError::not_found("repository", repository_id))?;
        repository.apply(patch);
        conn.execute(
            "UPDATE repositories SET owner_login = ?2, doc = ?3 WHERE repository_id = ?1",
            params![
                repository.repository_id,
                repository.owner.login,
                to_doc(&repository)?
            ],
        )
        .map_err(|e| StoreError::storage("write repository", e.to_string()))?;
        Ok(repository)
    }

    async fn repository(&self, repository_id: &str) -> Result<Option<Repository>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        query_doc(
            &conn,
            "SELECT doc FROM repositories WHERE repository_id = ?1",
            repository_id,
        )
    }

    async fn repositories_for_owner(&self, login: &str) -> Result<Vec<Repository>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        query_docs(
            &conn,
            "SELECT doc FROM repositories WHERE owner_login = ?1",
            login,
        )
    }

    async fn create_or_update_organization(
        &self,
        patch: OrganizationPatch,
    ) -> Result<Organization, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let existing: Option<Organization> = query_doc(
            &conn,
            "SELECT doc FROM organizations WHERE organization_id = ?1",
            &patch.organization_id,
        )?;
        let organization = match existing {
            Some(mut organization) => {
                organization.apply(patch);
                organization
            }
            None => Organization::from_patch(patch),
        };
        conn.execute(
            "INSERT INTO organizations (organization_id, login, doc)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(organization_id) DO UPDATE SET login = ?2, doc = ?3",
            params![
                organization.organization_id,
                organization.login,
                to_doc(&organization)?
            ],
        )
        .map_err(|e| StoreError::storage("write organization", e.to_string()))?;
        Ok(organization)
    }

    async fn update_organization(
        &self,
        organization_id: &str,
        patch: OrganizationPatch,
    ) -> Result<Organization, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut organization: Organization = query_doc(
            &conn,
            "SELECT doc FROM organizations WHERE organization_id = ?1",
            organization_id,
        )?
        .ok_or_else(|| StoreError::not_found("organization", organization_id))?;
        organization.apply(patch);
        conn.execute(
            "UPDATE organizations SET login = ?2, doc = ?3 WHERE organization_id = ?1",
            params![
                organization.organization_id,
                organization.login,
                to_doc(&organization)?
            ],
        )
        .map_err(|e| StoreError::storage("write organization", e.to_string()))?;
        Ok(organization)
    }

    async fn organization(
        &self,
        organization_id: &str,
    ) -> Result<Option<Organization>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        query_doc(
            &conn,
            "SELECT doc FROM organizations WHERE organization_id = ?1",
            organization_id,
        )
    }

    async fn organization_by_login(&self, login: &str) -> Result<Option<Organization>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        query_doc(
            &conn,
            "SELECT doc FROM organizations WHERE login = ?1",
            login,
        )
    }

    async fn create_or_update_pull_request(
        &self,
        patch: PullRequestPatch,
    ) -> Result<PullRequest, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let existing: Option<PullRequest> = query_doc(
            &conn,
            "SELECT doc FROM pull_requests WHERE pull_request_id = ?1",
            &patch.pull_request_id,
        )?;
        let pull_request = match existing {
            Some(mut pull_request) => {
                pull_request.apply(patch);
                pull_request
            }
            None => PullRequest::from_patch(patch),
        };
        conn.execute(
            "INSERT INTO pull_requests (pull_request_id, doc)
             VALUES (?1, ?2)
             ON CONFLICT(pull_request_id) DO UPDATE SET doc = ?2",
            params![pull_request.pull_request_id, to_doc(&pull_request)?],
        )
        .map_err(|e| StoreError::storage("write pull request", e.to_string()))?;
        Ok(pull_request)
    }

    async fn pull_request(
        &self,
        pull_request_id: &str,
    ) -> Result<Option<PullRequest>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        query_doc(
            &conn,
            "SELECT doc FROM pull_requests WHERE pull_request_id = ?1",
            pull_request_id,
        )
    }

    async fn user_by_login(&self, login: &str) -> Result<Option<LinkedUser>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        query_doc(&conn, "SELECT doc FROM users WHERE login = ?1", login)
    }

    async fn user_by_discord_id(
        &self,
        discord_id: &str,
    ) -> Result<Option<LinkedUser>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        query_doc(
            &conn,
            "SELECT doc FROM users WHERE discord_id = ?1",
            discord_id,
        )
    }

    async fn upsert_user(&self, user: LinkedUser) -> Result<LinkedUser, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "INSERT INTO users (login, discord_id, doc)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(login) DO UPDATE SET discord_id = ?2, doc = ?3",
            params![user.login, user.discord_id, to_doc(&user)?],
        )
        .map_err(|e| StoreError::storage("write user", e.to_string()))?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::records::{IssueState, RepoRef, RepoState, UserRef};

    fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("bountyhub.db")).unwrap();
        (dir, store)
    }

    fn issue_patch(issue_id: &str, number: u64) -> IssuePatch {
        IssuePatch {
            issue_id: issue_id.into(),
            number: Some(number),
            title: Some("Add retries".into()),
            state: Some(IssueState::Open),
            repository: Some(RepoRef {
                id: "R_1".into(),
                name: "widget".into(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn round_trips_an_issue() {
        let (_dir, store) = open_store();
        let written = store
            .create_or_update_issue(issue_patch("I_1", 7))
            .await
            .unwrap();
        let read = store.issue("I_1").await.unwrap().unwrap();
        assert_eq!(written, read);
    }

    #[tokio::test]
    async fn upsert_merges_into_existing_document() {
        let (_dir, store) = open_store();
        store
            .create_or_update_issue(issue_patch("I_1", 7))
            .await
            .unwrap();
        let updated = store
            .create_or_update_issue(IssuePatch {
                issue_id: "I_1".into(),
                price: Some(100),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.price, 100);
        assert_eq!(updated.title, "Add retries");
        assert_eq!(updated.number, 7);
    }

    #[tokio::test]
    async fn reopening_preserves_data_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bountyhub.db");
        {
            let store = SqliteStore::new(&path).unwrap();
            store
                .create_or_update_repository(RepositoryPatch {
                    repository_id: "R_1".into(),
                    name: Some("widget".into()),
                    owner: Some(UserRef {
                        login: "acme".into(),
                        avatar_url: None,
                    }),
                    state: Some(RepoState::Accepted),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let store = SqliteStore::new(&path).unwrap();
        let repository = store.repository("R_1").await.unwrap().unwrap();
        assert_eq!(repository.state, RepoState::Accepted);
        assert_eq!(repository.owner.login, "acme");
    }

    #[tokio::test]
    async fn lookup_by_repo_and_number() {
        let (_dir, store) = open_store();
        store
            .create_or_update_issue(issue_patch("I_1", 7))
            .await
            .unwrap();
        store
            .create_or_update_issue(issue_patch("I_2", 8))
            .await
            .unwrap();
        let found = store.issue_by_repo_and_number("R_1", 8).await.unwrap();
        assert_eq!(found.unwrap().issue_id, "I_2");
    }

    #[tokio::test]
    async fn delete_then_get_is_none_and_typed_not_found() {
        let (_dir, store) = open_store();
        store
            .create_or_update_issue(issue_patch("I_1", 7))
            .await
            .unwrap();
        store.delete_issue("I_1").await.unwrap();
        assert!(store.issue("I_1").await.unwrap().is_none());
        assert!(store.delete_issue("I_1").await.unwrap_err().is_not_found());
    }
}
