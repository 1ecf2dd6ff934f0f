use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use drover_core::error::{DroverError, Result};
use drover_core::traits::{RecordStore, WordSource};
use drover_core::types::PipelineRecord;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS screening_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        user_input TEXT NOT NULL,
        is_passed INTEGER NOT NULL,
        reason TEXT NOT NULL,
        history TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS intent_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        user_input TEXT NOT NULL,
        cleaned_input TEXT NOT NULL,
        success_finish INTEGER NOT NULL,
        is_intent_clear INTEGER,
        output TEXT,
        history TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS decision_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        user_input TEXT NOT NULL,
        observations TEXT NOT NULL,
        final_answer TEXT NOT NULL,
        history TEXT,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_screening_user ON screening_results(user_id, id);
    CREATE INDEX IF NOT EXISTS idx_intent_user ON intent_results(user_id, id);
    CREATE INDEX IF NOT EXISTS idx_decision_user ON decision_results(user_id, id);

    CREATE TABLE IF NOT EXISTS forbidden_words (
        word TEXT PRIMARY KEY,
        added_at TEXT NOT NULL
    );
";

fn db_err(e: impl std::fmt::Display) -> DroverError {
    DroverError::Database(e.to_string())
}

/// SQLite-backed store for pipeline results and the forbidden word list.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| db_err(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(db_err)
    }

    /// Add a forbidden word. Returns false if it was already present.
    pub fn add_word(&self, word: &str) -> Result<bool> {
        let word = word.trim();
        if word.is_empty() {
            return Ok(false);
        }
        let conn = self.lock()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO forbidden_words (word, added_at) VALUES (?1, ?2)",
                params![word, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(inserted > 0)
    }

    /// Remove a forbidden word. Returns false if it was not present.
    pub fn remove_word(&self, word: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM forbidden_words WHERE word = ?1", params![word.trim()])
            .map_err(db_err)?;
        Ok(removed > 0)
    }

    /// All forbidden words, alphabetically.
    pub fn words(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT word FROM forbidden_words ORDER BY word")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?;

        let mut words = Vec::new();
        for row in rows {
            words.push(row.map_err(db_err)?);
        }
        Ok(words)
    }

    /// Number of rows saved for a record kind (`screening`, `intent`, `decision`).
    pub fn count(&self, kind: &str) -> Result<i64> {
        let table = table_for(kind)
            .ok_or_else(|| db_err(format!("unknown record kind: {}", kind)))?;
        let conn = self.lock()?;
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .map_err(db_err)
    }

    fn insert(&self, record: &PipelineRecord) -> Result<i64> {
        let conn = self.lock()?;
        match record {
            PipelineRecord::Screening(r) => {
                conn.execute(
                    "INSERT INTO screening_results
                        (user_id, user_input, is_passed, reason, history, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        r.user_id,
                        r.user_input,
                        r.is_passed,
                        r.reason,
                        serde_json::to_string(&r.history)?,
                        r.created_at.to_rfc3339(),
                    ],
                )
                .map_err(db_err)?;
            }
            PipelineRecord::Intent(r) => {
                conn.execute(
                    "INSERT INTO intent_results
                        (user_id, user_input, cleaned_input, success_finish,
                         is_intent_clear, output, history, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        r.user_id,
                        r.user_input,
                        r.cleaned_input,
                        r.success_finish,
                        r.is_intent_clear,
                        r.output,
                        serde_json::to_string(&r.history)?,
                        r.created_at.to_rfc3339(),
                    ],
                )
                .map_err(db_err)?;
            }
            PipelineRecord::Decision(r) => {
                conn.execute(
                    "INSERT INTO decision_results
                        (user_id, user_input, observations, final_answer, history, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        r.user_id,
                        r.user_input,
                        serde_json::to_string(&r.observations)?,
                        r.final_answer,
                        serde_json::to_string(&r.history)?,
                        r.created_at.to_rfc3339(),
                    ],
                )
                .map_err(db_err)?;
            }
        }
        Ok(conn.last_insert_rowid())
    }
}

fn table_for(kind: &str) -> Option<&'static str> {
    match kind {
        "screening" => Some("screening_results"),
        "intent" => Some("intent_results"),
        "decision" => Some("decision_results"),
        _ => None,
    }
}

impl RecordStore for SqliteStore {
    fn save(&self, record: PipelineRecord) -> BoxFuture<'_, Result<i64>> {
        Box::pin(async move {
            let id = self.insert(&record)?;
            debug!(kind = record.kind(), id, "Pipeline record saved");
            Ok(id)
        })
    }
}

impl WordSource for SqliteStore {
    fn list_words(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move { self.words() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::types::{DecisionRecord, HistoryEntry, IntentRecord, ScreeningRecord};

    fn screening(passed: bool) -> PipelineRecord {
        PipelineRecord::Screening(ScreeningRecord {
            user_id: "7".into(),
            user_input: "where is my coupon".into(),
            is_passed: passed,
            reason: String::new(),
            history: vec![HistoryEntry::system("no forbidden words")],
            created_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_save_returns_row_ids_per_table() {
        let store = SqliteStore::in_memory().unwrap();

        assert_eq!(store.save(screening(true)).await.unwrap(), 1);
        assert_eq!(store.save(screening(false)).await.unwrap(), 2);

        let intent = PipelineRecord::Intent(IntentRecord {
            user_id: "7".into(),
            user_input: "coupon?".into(),
            cleaned_input: "coupon?".into(),
            success_finish: true,
            is_intent_clear: true,
            output: "coupon inquiry".into(),
            history: vec![],
            created_at: Utc::now(),
        });
        assert_eq!(store.save(intent).await.unwrap(), 1);

        let decision = PipelineRecord::Decision(DecisionRecord {
            user_id: "7".into(),
            user_input: "coupon?".into(),
            observations: vec!["found one coupon".into()],
            final_answer: "You have one coupon.".into(),
            history: vec![HistoryEntry::assistant("{}")],
            created_at: Utc::now(),
        });
        assert_eq!(store.save(decision).await.unwrap(), 1);

        assert_eq!(store.count("screening").unwrap(), 2);
        assert_eq!(store.count("intent").unwrap(), 1);
        assert_eq!(store.count("decision").unwrap(), 1);
        assert!(store.count("unknown").is_err());
    }

    #[tokio::test]
    async fn test_word_list() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.add_word("bomb").unwrap());
        assert!(store.add_word(" attack ").unwrap());
        assert!(!store.add_word("bomb").unwrap());
        assert!(!store.add_word("   ").unwrap());

        assert_eq!(store.list_words().await.unwrap(), vec!["attack", "bomb"]);

        assert!(store.remove_word("bomb").unwrap());
        assert!(!store.remove_word("bomb").unwrap());
        assert_eq!(store.words().unwrap(), vec!["attack"]);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("drover.db");
        let store = SqliteStore::open(&path).unwrap();
        store.add_word("x").unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.words().unwrap(), vec!["x"]);
    }
}
