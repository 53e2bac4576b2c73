//! Persistence (C12): `index_scores` (append-only) and `media_articles`
//! (upsert-by-URL) over a single `rusqlite` connection, WAL mode, guarded by
//! one `parking_lot::Mutex` — same shape as the teacher's
//! `DbSignalStorage`, scaled down to this crate's two tables.

use crate::models::{Article, ComponentScores, IndexSnapshot};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS index_scores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    as_of INTEGER NOT NULL,
    composite REAL NOT NULL,
    momentum REAL NOT NULL,
    price_strength REAL NOT NULL,
    volume REAL NOT NULL,
    volatility REAL NOT NULL,
    equity_vs_bonds REAL NOT NULL,
    media_sentiment REAL NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_index_scores_as_of ON index_scores(as_of DESC);

CREATE TABLE IF NOT EXISTS media_articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    source TEXT NOT NULL,
    title TEXT NOT NULL,
    summary TEXT,
    content TEXT NOT NULL,
    image_url TEXT,
    published_at INTEGER,
    sentiment_score REAL,
    sentiment_label TEXT,
    sentiment_confidence REAL,
    quality_score REAL,
    scraped_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_media_articles_published ON media_articles(published_at DESC);
CREATE INDEX IF NOT EXISTS idx_media_articles_id ON media_articles(id DESC);
"#;

pub struct Persistence {
    conn: Arc<Mutex<Connection>>,
}

fn to_unix(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_unix(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

impl Persistence {
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("failed to open database at {db_path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize schema")?;
        info!(db_path, "persistence initialized");
        Ok(Persistence {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Commits a pipeline run's snapshot plus its new/updated articles in one
    /// transaction, per §4.12's "commit once, roll back both" rule.
    pub fn commit_run(&self, snapshot: &IndexSnapshot, articles: &[Article]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO index_scores
                (as_of, composite, momentum, price_strength, volume, volatility, equity_vs_bonds, media_sentiment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                to_unix(snapshot.as_of),
                snapshot.composite,
                snapshot.components.momentum,
                snapshot.components.price_strength,
                snapshot.components.volume,
                snapshot.components.volatility,
                snapshot.components.equity_vs_bonds,
                snapshot.components.media_sentiment,
            ],
        )?;

        let mut upserted = 0usize;
        for article in articles {
            if Self::upsert_article(&tx, article)? {
                upserted += 1;
            }
        }

        tx.commit()?;
        Ok(upserted)
    }

    /// Upserts one article, applying the §4.2/§3 quality-upgrade rule:
    /// insert if new, replace only when the incoming quality strictly
    /// exceeds the stored value. Returns whether a write happened.
    fn upsert_article(tx: &rusqlite::Transaction, article: &Article) -> Result<bool> {
        let existing_quality: Option<f64> = tx
            .query_row(
                "SELECT quality_score FROM media_articles WHERE url = ?1",
                params![article.url],
                |row| row.get(0),
            )
            .ok();

        let should_write = match existing_quality {
            None => true,
            Some(existing) => article.quality_score.unwrap_or(0.0) > existing,
        };
        if !should_write {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO media_articles
                (url, source, title, summary, content, image_url, published_at, sentiment_score, sentiment_label, sentiment_confidence, quality_score, scraped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(url) DO UPDATE SET
                source = excluded.source,
                title = excluded.title,
                summary = excluded.summary,
                content = excluded.content,
                image_url = excluded.image_url,
                published_at = excluded.published_at,
                sentiment_score = excluded.sentiment_score,
                sentiment_label = excluded.sentiment_label,
                sentiment_confidence = excluded.sentiment_confidence,
                quality_score = excluded.quality_score,
                scraped_at = excluded.scraped_at",
            params![
                article.url,
                article.source,
                article.title,
                article.summary,
                article.content,
                article.image_url,
                article.published_at.map(to_unix),
                article.sentiment_score,
                article.sentiment_label,
                article.sentiment_confidence,
                article.quality_score,
                to_unix(article.scraped_at),
            ],
        )?;
        Ok(true)
    }

    pub fn latest_snapshot(&self) -> Result<Option<IndexSnapshot>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT as_of, composite, momentum, price_strength, volume, volatility, equity_vs_bonds, media_sentiment
             FROM index_scores ORDER BY as_of DESC, id DESC LIMIT 1",
            [],
            Self::row_to_snapshot,
        );
        match result {
            Ok(snap) => Ok(Some(snap)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Ordered ascending by `as_of`, capped at `limit` (callers pass 365 max
    /// per the §6 `/index/history` contract).
    pub fn history(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<IndexSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT as_of, composite, momentum, price_strength, volume, volatility, equity_vs_bonds, media_sentiment
             FROM index_scores WHERE as_of >= ?1 ORDER BY as_of ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![to_unix(since), limit as i64], Self::row_to_snapshot)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Most recent `window` snapshots' components, oldest first — the raw
    /// material `ScalerHistory::from_snapshots` consumes.
    pub fn recent_components(&self, window: usize) -> Result<Vec<ComponentScores>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT momentum, price_strength, volume, volatility, equity_vs_bonds, media_sentiment
             FROM index_scores ORDER BY as_of DESC, id DESC LIMIT ?1",
        )?;
        let mut rows: Vec<ComponentScores> = stmt
            .query_map(params![window as i64], |row| {
                Ok(ComponentScores {
                    momentum: row.get(0)?,
                    price_strength: row.get(1)?,
                    volume: row.get(2)?,
                    volatility: row.get(3)?,
                    equity_vs_bonds: row.get(4)?,
                    media_sentiment: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        rows.reverse();
        Ok(rows)
    }

    pub fn all_snapshots(&self) -> Result<Vec<IndexSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT as_of, composite, momentum, price_strength, volume, volatility, equity_vs_bonds, media_sentiment
             FROM index_scores ORDER BY as_of ASC",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_snapshot)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Offset-paginated listing, newest first.
    pub fn articles_page(&self, limit: usize, offset: usize) -> Result<Vec<Article>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT url, source, title, summary, content, image_url, published_at, scraped_at, sentiment_score, sentiment_label, sentiment_confidence, quality_score
             FROM media_articles ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], Self::row_to_article)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Cursor-paginated listing: cursor is the internal article id,
    /// strictly descending, per the §6 `/media/latest` contract.
    pub fn articles_after_cursor(&self, limit: usize, cursor: Option<i64>) -> Result<Vec<(i64, Article)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, url, source, title, summary, content, image_url, published_at, scraped_at, sentiment_score, sentiment_label, sentiment_confidence, quality_score
             FROM media_articles
             WHERE (?1 IS NULL OR id < ?1)
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![cursor, limit as i64], |row| {
                let id: i64 = row.get(0)?;
                let article = Self::row_to_article_offset(row, 1)?;
                Ok((id, article))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<IndexSnapshot> {
        let as_of: i64 = row.get(0)?;
        Ok(IndexSnapshot {
            as_of: from_unix(as_of),
            composite: row.get(1)?,
            components: ComponentScores {
                momentum: row.get(2)?,
                price_strength: row.get(3)?,
                volume: row.get(4)?,
                volatility: row.get(5)?,
                equity_vs_bonds: row.get(6)?,
                media_sentiment: row.get(7)?,
            },
        })
    }

    fn row_to_article(row: &rusqlite::Row) -> rusqlite::Result<Article> {
        Self::row_to_article_offset(row, 0)
    }

    fn row_to_article_offset(row: &rusqlite::Row, base: usize) -> rusqlite::Result<Article> {
        let published_at: Option<i64> = row.get(base + 6)?;
        let scraped_at: i64 = row.get(base + 7)?;
        Ok(Article {
            url: row.get(base)?,
            source: row.get(base + 1)?,
            title: row.get(base + 2)?,
            summary: row.get(base + 3)?,
            content: row.get(base + 4)?,
            image_url: row.get(base + 5)?,
            published_at: published_at.map(from_unix),
            scraped_at: from_unix(scraped_at),
            sentiment_score: row.get(base + 8)?,
            sentiment_label: row.get(base + 9)?,
            sentiment_confidence: row.get(base + 10)?,
            quality_score: row.get(base + 11)?,
        })
    }
}

/// Persistence failures are logged, not propagated — the orchestrator keeps
/// its in-memory result per §4.9/§7's `PersistenceFailure` policy.
pub fn log_persistence_failure(err: &anyhow::Error) {
    warn!("persistence failure, keeping in-memory result: {err:#}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn temp_store() -> Persistence {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        // Leak the tempdir so the file survives for the test's duration.
        std::mem::forget(dir);
        Persistence::open(path.to_str().unwrap()).unwrap()
    }

    fn article(url: &str, quality: f64) -> Article {
        Article {
            url: url.to_string(),
            source: "test".to_string(),
            title: "title".to_string(),
            summary: None,
            content: "content".to_string(),
            image_url: None,
            published_at: None,
            scraped_at: Utc::now(),
            sentiment_score: None,
            sentiment_label: None,
            sentiment_confidence: None,
            quality_score: Some(quality),
        }
    }

    fn snapshot(day: u32, composite: f64) -> IndexSnapshot {
        let date = NaiveDate::from_ymd_opt(2026, 1, day).unwrap();
        IndexSnapshot {
            as_of: Utc.from_utc_datetime(&date.and_hms_opt(16, 0, 0).unwrap()),
            composite,
            components: ComponentScores::neutral(),
        }
    }

    #[test]
    fn article_upsert_follows_quality_upgrade_rule() {
        let store = temp_store();
        store.commit_run(&snapshot(1, 50.0), &[article("https://x/1", 0.4)]).unwrap();
        store.commit_run(&snapshot(2, 50.0), &[article("https://x/1", 0.3)]).unwrap();

        let page = store.articles_page(10, 0).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].quality_score, Some(0.4));

        store.commit_run(&snapshot(3, 50.0), &[article("https://x/1", 0.7)]).unwrap();
        let page = store.articles_page(10, 0).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].quality_score, Some(0.7));
    }

    #[test]
    fn snapshots_are_append_only_and_history_is_ascending() {
        let store = temp_store();
        for day in 1..=5 {
            store.commit_run(&snapshot(day, day as f64 * 10.0), &[]).unwrap();
        }
        let all = store.all_snapshots().unwrap();
        assert_eq!(all.len(), 5);
        for pair in all.windows(2) {
            assert!(pair[0].as_of <= pair[1].as_of);
        }
        let latest = store.latest_snapshot().unwrap().unwrap();
        assert_eq!(latest.composite, 50.0);
    }

    #[test]
    fn cursor_pagination_is_strictly_descending() {
        let store = temp_store();
        for i in 0..5 {
            store
                .commit_run(&snapshot(1, 50.0), &[article(&format!("https://x/{i}"), 0.5)])
                .unwrap();
        }
        let (first_page, _) = {
            let page = store.articles_after_cursor(2, None).unwrap();
            (page.clone(), page)
        };
        assert_eq!(first_page.len(), 2);
        let cursor = first_page.last().unwrap().0;
        let second_page = store.articles_after_cursor(2, Some(cursor)).unwrap();
        assert!(second_page.iter().all(|(id, _)| *id < cursor));
    }
}
