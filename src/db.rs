use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::record::{ExtractionStatus, FieldResult, FieldStatus, Record};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS medicines (
            identity          TEXT PRIMARY KEY,
            name              TEXT NOT NULL,
            source_url        TEXT NOT NULL,
            extraction_status TEXT NOT NULL CHECK(extraction_status IN ('success','partial','failed')),
            collected_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS medicine_fields (
            id        INTEGER PRIMARY KEY,
            identity  TEXT NOT NULL REFERENCES medicines(identity),
            position  INTEGER NOT NULL,
            field     TEXT NOT NULL,
            value     TEXT,
            status    TEXT NOT NULL CHECK(status IN ('success','error','missing')),
            UNIQUE(identity, field)
        );
        CREATE INDEX IF NOT EXISTS idx_fields_identity ON medicine_fields(identity);
        ",
    )?;
    Ok(())
}

/// Replace the record and its field rows in one transaction.
pub fn upsert_record(conn: &Connection, record: &Record) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut rec_stmt = tx.prepare_cached(
            "INSERT INTO medicines (identity, name, source_url, extraction_status, collected_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(identity) DO UPDATE SET
                name = excluded.name,
                source_url = excluded.source_url,
                extraction_status = excluded.extraction_status,
                collected_at = excluded.collected_at",
        )?;
        rec_stmt.execute(rusqlite::params![
            record.identity,
            record.name,
            record.source_url,
            record.status.as_str(),
            record.collected_at.to_rfc3339(),
        ])?;

        tx.execute(
            "DELETE FROM medicine_fields WHERE identity = ?1",
            rusqlite::params![record.identity],
        )?;
        let mut field_stmt = tx.prepare_cached(
            "INSERT INTO medicine_fields (identity, position, field, value, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (pos, f) in record.fields.iter().enumerate() {
            field_stmt.execute(rusqlite::params![
                record.identity,
                pos as i64,
                f.name,
                f.value,
                f.status.as_str(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn exists(conn: &Connection, identity: &str) -> Result<bool> {
    let found: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM medicines WHERE identity = ?1)",
        rusqlite::params![identity],
        |r| r.get(0),
    )?;
    Ok(found)
}

/// All committed identities, for seeding the dedup index at startup.
pub fn load_identities(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT identity FROM medicines")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}

pub fn record_count(conn: &Connection) -> Result<usize> {
    let n: usize = conn.query_row("SELECT COUNT(*) FROM medicines", [], |r| r.get(0))?;
    Ok(n)
}

/// Fetch records by 1-based index range in insertion order, inclusive.
/// Indices below 1 are clamped to 1.
pub fn fetch_range(conn: &Connection, start_idx: usize, end_idx: usize) -> Result<Vec<Record>> {
    let start_idx = start_idx.max(1);
    if end_idx < start_idx {
        return Ok(Vec::new());
    }
    let limit = end_idx - start_idx + 1;
    let offset = start_idx - 1;

    let mut stmt = conn.prepare(
        "SELECT identity, name, source_url, extraction_status, collected_at
         FROM medicines ORDER BY rowid LIMIT ?1 OFFSET ?2",
    )?;
    let shells = stmt
        .query_map(rusqlite::params![limit as i64, offset as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut field_stmt = conn.prepare(
        "SELECT field, value, status FROM medicine_fields
         WHERE identity = ?1 ORDER BY position",
    )?;

    let mut records = Vec::with_capacity(shells.len());
    for (identity, name, source_url, status_raw, ts_raw) in shells {
        let status = ExtractionStatus::parse(&status_raw)
            .ok_or_else(|| anyhow::anyhow!("bad extraction_status '{status_raw}' for {identity}"))?;
        let collected_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| anyhow::anyhow!("bad collected_at for {identity}: {e}"))?;

        let raw_fields = field_stmt
            .query_map(rusqlite::params![identity], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut fields = Vec::with_capacity(raw_fields.len());
        for (field, value, field_status_raw) in raw_fields {
            let field_status = FieldStatus::parse(&field_status_raw)
                .ok_or_else(|| anyhow::anyhow!("bad field status '{field_status_raw}'"))?;
            fields.push(FieldResult {
                name: field,
                value,
                status: field_status,
            });
        }

        records.push(Record {
            identity,
            name,
            fields,
            status,
            source_url,
            collected_at,
        });
    }
    Ok(records)
}

// ── Stats ──

pub struct StoreStats {
    pub total: usize,
    pub success: usize,
    pub partial: usize,
    pub failed: usize,
}

pub fn get_stats(conn: &Connection) -> Result<StoreStats> {
    let count = |status: &str| -> Result<usize> {
        let n = conn.query_row(
            "SELECT COUNT(*) FROM medicines WHERE extraction_status = ?1",
            rusqlite::params![status],
            |r| r.get(0),
        )?;
        Ok(n)
    };
    Ok(StoreStats {
        total: record_count(conn)?,
        success: count("success")?,
        partial: count("partial")?,
        failed: count("failed")?,
    })
}

// ── Tests ──
