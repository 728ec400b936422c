//! SQLite-backed queue store

use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use super::traits::QueueStore;
use crate::models::{AttachmentRef, DeliveryReport, DeliveryStatus, MessageId, QueuedMessage};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Outbound message queue. Records are never deleted; rows reaching
            -- a terminal status stay for the analytics read path.
            CREATE TABLE queue (
                id TEXT PRIMARY KEY,
                from_addr TEXT NOT NULL,
                to_addr TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                send_time INTEGER NOT NULL,   -- unix millis
                throttle_limit INTEGER NOT NULL DEFAULT 10,
                owner TEXT NOT NULL,
                company TEXT,
                attachment_path TEXT,
                attachment_filename TEXT,
                status TEXT NOT NULL DEFAULT 'scheduled'
            );

            CREATE INDEX idx_queue_due ON queue(status, send_time ASC);
            CREATE INDEX idx_queue_owner ON queue(owner);
            "#,
        ),
    ])
}

/// SQLite implementation of QueueStore
///
/// The connection lives behind a Mutex; the dispatcher runs one tick at a
/// time, so contention is limited to the ingestion and analytics paths.
pub struct SqliteQueueStore {
    conn: Mutex<Connection>,
}

impl SqliteQueueStore {
    /// Open (or create) the queue database at the given path
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open queue database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory queue database (for tests)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL for concurrent readers during writes; NORMAL sync is safe with
        // WAL and keeps per-record status writes cheap.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run queue database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_message(row: &Row) -> rusqlite::Result<QueuedMessage> {
        let send_time_millis: i64 = row.get("send_time")?;
        let status: String = row.get("status")?;
        let attachment_path: Option<String> = row.get("attachment_path")?;
        let attachment_filename: Option<String> = row.get("attachment_filename")?;

        Ok(QueuedMessage {
            id: MessageId::new(row.get::<_, String>("id")?),
            from: row.get("from_addr")?,
            to: row.get("to_addr")?,
            subject: row.get("subject")?,
            body: row.get("body")?,
            send_time: millis_to_datetime(send_time_millis),
            throttle_limit: row.get("throttle_limit")?,
            owner: row.get("owner")?,
            company: row.get("company")?,
            attachment: attachment_path
                .zip(attachment_filename)
                .map(|(path, filename)| AttachmentRef { path, filename }),
            status: DeliveryStatus::parse(&status).unwrap_or(DeliveryStatus::Failed),
        })
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

impl QueueStore for SqliteQueueStore {
    fn insert(&self, message: QueuedMessage) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO queue (
                id, from_addr, to_addr, subject, body, send_time,
                throttle_limit, owner, company,
                attachment_path, attachment_filename, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                message.id.as_str(),
                message.from,
                message.to,
                message.subject,
                message.body,
                message.send_time.timestamp_millis(),
                message.throttle_limit,
                message.owner,
                message.company,
                message.attachment.as_ref().map(|a| a.path.as_str()),
                message.attachment.as_ref().map(|a| a.filename.as_str()),
                message.status.as_str(),
            ],
        )
        .context("Failed to insert message record")?;
        Ok(())
    }

    fn query_due(&self, now: DateTime<Utc>) -> Result<Vec<QueuedMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, from_addr, to_addr, subject, body, send_time,
                   throttle_limit, owner, company,
                   attachment_path, attachment_filename, status
            FROM queue
            WHERE status = 'scheduled' AND send_time <= ?1
            ORDER BY send_time ASC, id ASC
            "#,
        )?;

        let messages = stmt
            .query_map([now.timestamp_millis()], Self::row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    fn update_status(&self, id: &MessageId, status: DeliveryStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        // The guard makes the write a no-op unless the record is still
        // Scheduled or already carries the same value (idempotent repeat).
        let changed = conn.execute(
            "UPDATE queue SET status = ?2
             WHERE id = ?1 AND (status = 'scheduled' OR status = ?2)",
            params![id.as_str(), status.as_str()],
        )?;
        if changed > 0 {
            return Ok(());
        }

        let existing: Option<String> = conn
            .query_row(
                "SELECT status FROM queue WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            None => bail!("unknown message id: {}", id.as_str()),
            Some(current) => bail!(
                "message {} already terminal as {}, refusing {}",
                id.as_str(),
                current,
                status.as_str()
            ),
        }
    }

    fn list_for_owner(&self, owner: &str) -> Result<Vec<DeliveryReport>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT company, to_addr, status, send_time FROM queue
             WHERE owner = ?1 ORDER BY send_time ASC, id ASC",
        )?;

        let reports = stmt
            .query_map([owner], |row| {
                let status: String = row.get("status")?;
                let send_time_millis: i64 = row.get("send_time")?;
                Ok(DeliveryReport {
                    company: row.get("company")?,
                    to: row.get("to_addr")?,
                    status: DeliveryStatus::parse(&status).unwrap_or(DeliveryStatus::Failed),
                    send_time: millis_to_datetime(send_time_millis),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(reports)
    }
}
