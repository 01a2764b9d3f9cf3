//! SQLite storage backend for manifest records

use super::traits::{
    BackfillFields, ManifestFilter, ManifestRecord, ManifestStore, OpenStore, StorageError,
    StorageResult,
};
use crate::activity::ActivityKind;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

const SELECT_COLUMNS: &str = "SELECT subject_url, provider, most_recent_activity, most_recent_end_time, \
     content_json, content_empty, first_seen_at, content_updated_at, backfill_attempts, last_attempt_at \
     FROM manifests";

/// Columns of one `manifests` row before decoding
struct ManifestRow {
    subject_url: String,
    provider: String,
    most_recent_activity: String,
    most_recent_end_time: Option<String>,
    content_json: Option<String>,
    content_empty: bool,
    first_seen_at: String,
    content_updated_at: Option<String>,
    backfill_attempts: u32,
    last_attempt_at: Option<String>,
}

/// SQLite-backed manifest store
///
/// One table keyed by subject URL. Thread-safe via internal mutex on the
/// connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS manifests (
                subject_url TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                most_recent_activity TEXT NOT NULL,
                most_recent_end_time TEXT,
                content_json TEXT,
                content_empty INTEGER NOT NULL DEFAULT 0,
                first_seen_at TEXT NOT NULL,
                content_updated_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_manifests_provider
                ON manifests(provider);

            -- Enable WAL mode so stats queries can read during a harvest
            PRAGMA journal_mode = WAL;
            "#,
        )?;

        Self::migrate_add_backfill_attempts(conn)?;

        // backfill queue selection (needs the migrated columns)
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_manifests_pending \
             ON manifests(content_empty, backfill_attempts) WHERE content_json IS NULL",
            [],
        )?;
        Ok(())
    }

    /// Migration: attempt bookkeeping for databases created before it existed
    fn migrate_add_backfill_attempts(conn: &Connection) -> StorageResult<()> {
        let has_attempts: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info('manifests') WHERE name = 'backfill_attempts'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !has_attempts {
            conn.execute(
                "ALTER TABLE manifests ADD COLUMN backfill_attempts INTEGER NOT NULL DEFAULT 0",
                [],
            )?;
            conn.execute("ALTER TABLE manifests ADD COLUMN last_attempt_at TEXT", [])?;
        }
        Ok(())
    }

    fn read_row(row: &Row<'_>) -> rusqlite::Result<ManifestRow> {
        Ok(ManifestRow {
            subject_url: row.get(0)?,
            provider: row.get(1)?,
            most_recent_activity: row.get(2)?,
            most_recent_end_time: row.get(3)?,
            content_json: row.get(4)?,
            content_empty: row.get(5)?,
            first_seen_at: row.get(6)?,
            content_updated_at: row.get(7)?,
            backfill_attempts: row.get(8)?,
            last_attempt_at: row.get(9)?,
        })
    }

    fn parse_time(value: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StorageError::DateParse(e.to_string()))
    }

    /// Deserialize a record from database columns
    fn row_to_record(row: ManifestRow) -> StorageResult<ManifestRecord> {
        let most_recent_activity: ActivityKind = row.most_recent_activity.parse().map_err(|_| {
            StorageError::Corrupt {
                subject_url: row.subject_url.clone(),
                reason: format!("unknown activity kind {:?}", row.most_recent_activity),
            }
        })?;

        Ok(ManifestRecord {
            most_recent_activity,
            most_recent_end_time: row.most_recent_end_time.as_deref().map(Self::parse_time).transpose()?,
            content: row.content_json.as_deref().map(serde_json::from_str).transpose()?,
            content_empty: row.content_empty,
            first_seen_at: Self::parse_time(&row.first_seen_at)?,
            content_updated_at: row.content_updated_at.as_deref().map(Self::parse_time).transpose()?,
            backfill_attempts: row.backfill_attempts,
            last_attempt_at: row.last_attempt_at.as_deref().map(Self::parse_time).transpose()?,
            subject_url: row.subject_url,
            provider: row.provider,
        })
    }

    /// WHERE clause and parameters for a filter (without LIMIT)
    fn filter_clause(filter: &ManifestFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut sql = String::from(" WHERE 1 = 1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref provider) = filter.provider {
            sql.push_str(" AND provider = ?");
            params_vec.push(Box::new(provider.clone()));
        }

        match filter.awaiting_backfill {
            Some(true) => sql.push_str(" AND content_json IS NULL AND content_empty = 0"),
            Some(false) => sql.push_str(" AND (content_json IS NOT NULL OR content_empty = 1)"),
            None => {}
        }

        if let Some(content_empty) = filter.content_empty {
            sql.push_str(" AND content_empty = ?");
            params_vec.push(Box::new(content_empty));
        }

        (sql, params_vec)
    }

    fn query_records(&self, filter: &ManifestFilter) -> StorageResult<Vec<ManifestRecord>> {
        let conn = self.conn.lock().unwrap();

        let (clause, params_vec) = Self::filter_clause(filter);
        let order = if filter.awaiting_backfill == Some(true) {
            "backfill_attempts, subject_url"
        } else {
            "subject_url"
        };
        let mut sql = format!("{SELECT_COLUMNS}{clause} ORDER BY {order}");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params_refs.as_slice(), Self::read_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(Self::row_to_record(row?)?);
        }
        Ok(records)
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ManifestStore for SqliteStore {
    fn find_by_key(&self, subject_url: &str) -> StorageResult<Option<ManifestRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE subject_url = ?1"),
                params![subject_url],
                Self::read_row,
            )
            .optional()?;
        row.map(Self::row_to_record).transpose()
    }

    fn insert_if_absent(&self, record: &ManifestRecord) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let content_json = record.content.as_ref().map(serde_json::to_string).transpose()?;

        let changed = conn.execute(
            r#"
            INSERT INTO manifests (subject_url, provider, most_recent_activity, most_recent_end_time,
                                   content_json, content_empty, first_seen_at, content_updated_at,
                                   backfill_attempts, last_attempt_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(subject_url) DO NOTHING
            "#,
            params![
                record.subject_url,
                record.provider,
                record.most_recent_activity.as_str(),
                record.most_recent_end_time.map(|t| t.to_rfc3339()),
                content_json,
                record.content_empty,
                record.first_seen_at.to_rfc3339(),
                record.content_updated_at.map(|t| t.to_rfc3339()),
                record.backfill_attempts,
                record.last_attempt_at.map(|t| t.to_rfc3339()),
            ],
        )?;

        Ok(changed > 0)
    }

    fn set_fields_if_unset(&self, subject_url: &str, fields: &BackfillFields) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let changed = match fields {
            BackfillFields::Content(content) => conn.execute(
                r#"
                UPDATE manifests SET content_json = ?2, content_updated_at = ?3
                WHERE subject_url = ?1 AND content_json IS NULL AND content_empty = 0
                "#,
                params![subject_url, serde_json::to_string(content)?, now],
            )?,
            BackfillFields::Gone => conn.execute(
                r#"
                UPDATE manifests SET content_empty = 1, content_updated_at = ?2
                WHERE subject_url = ?1 AND content_json IS NULL AND content_empty = 0
                "#,
                params![subject_url, now],
            )?,
        };

        Ok(changed > 0)
    }

    fn note_backfill_attempt(&self, subject_url: &str) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"
            UPDATE manifests SET backfill_attempts = backfill_attempts + 1, last_attempt_at = ?2
            WHERE subject_url = ?1 AND content_json IS NULL AND content_empty = 0
            "#,
            params![subject_url, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    fn find_one_matching(&self, filter: &ManifestFilter) -> StorageResult<Option<ManifestRecord>> {
        let filter = filter.clone().with_limit(1);
        Ok(self.query_records(&filter)?.into_iter().next())
    }

    fn find_matching(&self, filter: &ManifestFilter) -> StorageResult<Vec<ManifestRecord>> {
        self.query_records(filter)
    }

    fn count_matching(&self, filter: &ManifestFilter) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let (clause, params_vec) = Self::filter_clause(filter);
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();

        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM manifests{clause}"),
            params_refs.as_slice(),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn distinct_labels(&self, provider: Option<&str>) -> StorageResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT CAST(json_extract(content_json, '$.label') AS TEXT) AS label
            FROM manifests
            WHERE content_json IS NOT NULL
              AND json_extract(content_json, '$.label') IS NOT NULL
              AND (?1 IS NULL OR provider = ?1)
            ORDER BY label
            "#,
        )?;

        let labels = stmt
            .query_map(params![provider], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    fn count_by_provider(&self) -> StorageResult<Vec<(String, usize)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT provider, COUNT(*) FROM manifests GROUP BY provider ORDER BY provider",
        )?;

        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }
}
