use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value as JsonValue};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    store::{
        models::{apply_patch, criteria_clause},
        Contact, ContactFields, ContactStore, Criterion,
    },
    Error, Result,
};

const CONTACT_COLUMNS: &str =
    "id, name, email, phone, workflow_id, attributes, created_at, updated_at";

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new(path: &Path, max_connections: u32) -> Result<Self> {
        info!("Connecting to SQLite database: {}", path.display());

        // Every connection to :memory: is a fresh database, so pin the pool to one.
        let (options, max_connections) = if path.as_os_str() == ":memory:" {
            (SqliteConnectOptions::from_str("sqlite::memory:")?, 1)
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            (
                SqliteConnectOptions::new().filename(path).create_if_missing(true),
                max_connections.max(1),
            )
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| {
                error!("Failed to connect to SQLite: {}", e);
                Error::Sqlx(e)
            })?;

        Ok(Self { pool })
    }

    async fn fetch_by_email(&self, email: &str) -> Result<Option<Contact>> {
        let sql = format!("SELECT {} FROM contacts WHERE email = ?1", CONTACT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(contact_from_row).transpose()
    }
}

fn contact_from_row(r: &SqliteRow) -> Result<Contact> {
    let attributes: Map<String, JsonValue> = serde_json::from_str(r.get("attributes"))?;
    Ok(Contact {
        id: r.get::<String, _>("id").parse()?,
        name: r.get("name"),
        email: r.get("email"),
        phone: r.get("phone"),
        workflow_id: r.get("workflow_id"),
        attributes,
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

#[async_trait]
impl ContactStore for SqliteStore {
    async fn init(&self) -> Result<()> {
        info!("Creating contact schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT,
                email TEXT NOT NULL UNIQUE,
                phone TEXT,
                workflow_id TEXT,
                attributes TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_contacts_workflow_id ON contacts(workflow_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn upsert(&self, fields: ContactFields, workflow_id: Option<String>) -> Result<Contact> {
        let fields = fields.normalized()?;
        debug!("Upserting contact: {}", fields.email);

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO contacts (id, name, email, phone, workflow_id, attributes, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, '{}', ?6, ?6)
            ON CONFLICT(email) DO UPDATE SET
                name = COALESCE(excluded.name, contacts.name),
                phone = COALESCE(excluded.phone, contacts.phone),
                workflow_id = COALESCE(excluded.workflow_id, contacts.workflow_id),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&fields.name)
        .bind(&fields.email)
        .bind(&fields.phone)
        .bind(&workflow_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.fetch_by_email(&fields.email)
            .await?
            .ok_or_else(|| Error::Internal(format!("contact {} vanished after upsert", fields.email)))
    }

    async fn find(&self, criteria: &[Criterion]) -> Result<Option<Contact>> {
        let (clause, values) = criteria_clause(criteria, |i| format!("?{}", i))?;
        debug!("Finding contact where {}", clause);

        let sql = format!(
            "SELECT {} FROM contacts WHERE {} ORDER BY created_at LIMIT 1",
            CONTACT_COLUMNS, clause
        );
        let mut query = sqlx::query(&sql);
        for value in &values {
            query = query.bind(value);
        }
        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(contact_from_row).transpose()
    }

    async fn update(
        &self,
        criteria: &[Criterion],
        patch: &Map<String, JsonValue>,
    ) -> Result<Option<Contact>> {
        let (clause, values) = criteria_clause(criteria, |i| format!("?{}", i))?;
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM contacts WHERE {} ORDER BY created_at LIMIT 1",
            CONTACT_COLUMNS, clause
        );
        let mut query = sqlx::query(&sql);
        for value in &values {
            query = query.bind(value);
        }
        let Some(row) = query.fetch_optional(&mut *tx).await? else {
            return Ok(None);
        };

        let mut contact = contact_from_row(&row)?;
        apply_patch(&mut contact, patch)?;
        debug!("Updating contact: {}", contact.id);

        sqlx::query(
            r#"
            UPDATE contacts
            SET name = ?2, email = ?3, phone = ?4, attributes = ?5, updated_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(contact.id.to_string())
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(&contact.phone)
        .bind(serde_json::to_string(&contact.attributes)?)
        .bind(contact.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(contact))
    }

    async fn delete_by_workflow(&self, workflow_id: &str) -> Result<u64> {
        debug!("Deleting contacts of workflow {}", workflow_id);

        let result = sqlx::query("DELETE FROM contacts WHERE workflow_id = ?1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
