//! SQLite store for NVTs, selectors, scan configs and task references

use chrono::Utc;
use forgescan_common::DatabaseConfig;
use forgescan_core::{
    ConfigId, Error, NvtInfo, Result, ScanConfig, SelectionCounts, SelectorId, TaskId,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Map a rusqlite error into a database error with context
pub(crate) fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::Database(format!("{}: {}", context, e))
}

/// Policy database backed by SQLite
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create the policy database at the given path
    pub fn open(path: impl AsRef<Path>, busy_timeout_ms: u32) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            Error::Database(format!("Failed to open policy database {}: {}", path.display(), e))
        })?;
        conn.busy_timeout(Duration::from_millis(u64::from(busy_timeout_ms)))
            .map_err(db_err("Failed to set busy timeout"))?;

        info!("Opened policy database: {}", path.display());
        Self::with_connection(conn)
    }

    /// Open the database described by the `[database]` config section
    pub fn open_with(config: &DatabaseConfig) -> Result<Self> {
        if config.path == ":memory:" {
            return Self::in_memory();
        }
        Self::open(&config.path, config.busy_timeout_ms)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(db_err("Failed to create in-memory database"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal(String::from("policy database lock poisoned")))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS nvts (
                oid TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                family TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS selectors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS selector_rules (
                selector_id INTEGER NOT NULL REFERENCES selectors(id) ON DELETE CASCADE,
                rule_type INTEGER NOT NULL,
                exclude INTEGER NOT NULL,
                family_or_nvt TEXT NOT NULL,
                family TEXT,
                PRIMARY KEY (selector_id, rule_type, family_or_nvt)
            );

            CREATE TABLE IF NOT EXISTS configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                selector_id INTEGER NOT NULL UNIQUE REFERENCES selectors(id),
                family_count INTEGER NOT NULL DEFAULT 0,
                nvt_count INTEGER NOT NULL DEFAULT 0,
                families_growing INTEGER NOT NULL DEFAULT 0,
                nvts_growing INTEGER NOT NULL DEFAULT 0,
                modified_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                config_id INTEGER NOT NULL REFERENCES configs(id)
            );

            CREATE INDEX IF NOT EXISTS idx_nvts_family ON nvts(family);
            CREATE INDEX IF NOT EXISTS idx_selector_rules_family ON selector_rules(selector_id, family);
            CREATE INDEX IF NOT EXISTS idx_tasks_config ON tasks(config_id);
            "#,
        )
        .map_err(db_err("Failed to initialize schema"))?;

        Ok(())
    }

    /// Run `f` inside one exclusive transaction
    ///
    /// Commits when `f` returns `Ok`; any error rolls the whole transaction back.
    pub fn exclusive<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Exclusive)
            .map_err(db_err("Failed to begin exclusive transaction"))?;

        let value = f(&tx)?;

        tx.commit().map_err(db_err("Failed to commit transaction"))?;
        Ok(value)
    }

    /// Run a read-only closure against the connection
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Insert or update one catalog entry
    pub fn upsert_nvt(&self, nvt: &NvtInfo) -> Result<()> {
        self.upsert_nvts(std::slice::from_ref(nvt)).map(|_| ())
    }

    /// Insert or update a batch of catalog entries in one transaction
    pub fn upsert_nvts(&self, nvts: &[NvtInfo]) -> Result<usize> {
        self.exclusive(|tx| {
            let mut stmt = tx
                .prepare("INSERT OR REPLACE INTO nvts (oid, name, family) VALUES (?1, ?2, ?3)")
                .map_err(db_err("Failed to prepare NVT upsert"))?;
            for nvt in nvts {
                stmt.execute(params![nvt.oid, nvt.name, nvt.family])
                    .map_err(db_err("Failed to upsert NVT"))?;
            }
            debug!("Upserted {} NVTs", nvts.len());
            Ok(nvts.len())
        })
    }

    /// Read the whole persisted catalog
    pub fn load_nvts(&self) -> Result<Vec<NvtInfo>> {
        self.read(|conn| {
            let mut stmt = conn
                .prepare("SELECT oid, name, family FROM nvts ORDER BY oid")
                .map_err(db_err("Failed to prepare NVT query"))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(NvtInfo {
                        oid: row.get(0)?,
                        name: row.get(1)?,
                        family: row.get(2)?,
                    })
                })
                .map_err(db_err("Failed to query NVTs"))?;
            let nvts = rows
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("Failed to read NVT row"))?;
            Ok(nvts)
        })
    }

    /// Get NVT count
    pub fn nvt_count(&self) -> Result<u64> {
        self.read(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM nvts", [], |row| row.get(0))
                .map_err(db_err("Failed to count NVTs"))?;
            Ok(count as u64)
        })
    }
}

// Row-level helpers. These take a plain connection so they can run inside
// whichever transaction the engine has open.

pub(crate) fn insert_selector(conn: &Connection, name: &str) -> Result<SelectorId> {
    conn.execute("INSERT INTO selectors (name) VALUES (?1)", [name])
        .map_err(db_err("Failed to create selector"))?;
    Ok(SelectorId(conn.last_insert_rowid()))
}

pub(crate) fn insert_config(
    conn: &Connection,
    name: &str,
    comment: &str,
    selector: SelectorId,
    counts: &SelectionCounts,
) -> Result<ConfigId> {
    conn.execute(
        r#"
        INSERT INTO configs (uuid, name, comment, selector_id, family_count, nvt_count,
                             families_growing, nvts_growing, modified_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            Uuid::new_v4().to_string(),
            name,
            comment,
            selector.0,
            counts.family_count,
            counts.nvt_count,
            counts.families_growing,
            counts.nvts_growing,
            Utc::now().timestamp(),
        ],
    )
    .map_err(db_err("Failed to create scan config"))?;
    Ok(ConfigId(conn.last_insert_rowid()))
}

fn config_from_row(row: &Row<'_>) -> rusqlite::Result<ScanConfig> {
    Ok(ScanConfig {
        id: ConfigId(row.get(0)?),
        uuid: row.get(1)?,
        name: row.get(2)?,
        comment: row.get(3)?,
        selector_id: SelectorId(row.get(4)?),
        counts: SelectionCounts {
            family_count: row.get(5)?,
            nvt_count: row.get(6)?,
            families_growing: row.get(7)?,
            nvts_growing: row.get(8)?,
        },
        modified_at: row.get(9)?,
    })
}

const CONFIG_COLUMNS: &str = "id, uuid, name, comment, selector_id, family_count, nvt_count, \
                              families_growing, nvts_growing, modified_at";

pub(crate) fn get_config(conn: &Connection, id: ConfigId) -> Result<ScanConfig> {
    conn.query_row(
        &format!("SELECT {} FROM configs WHERE id = ?1", CONFIG_COLUMNS),
        [id.0],
        config_from_row,
    )
    .optional()
    .map_err(db_err("Failed to load scan config"))?
    .ok_or(Error::ConfigNotFound { config_id: id.0 })
}

pub(crate) fn list_configs(conn: &Connection) -> Result<Vec<ScanConfig>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {} FROM configs ORDER BY name, id", CONFIG_COLUMNS))
        .map_err(db_err("Failed to prepare config query"))?;
    let rows = stmt
        .query_map([], config_from_row)
        .map_err(db_err("Failed to query scan configs"))?;
    let configs = rows
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err("Failed to read scan config row"))?;
    Ok(configs)
}

/// Persist the cached selection summary of a config
pub(crate) fn write_counts(conn: &Connection, id: ConfigId, counts: &SelectionCounts) -> Result<()> {
    let updated = conn
        .execute(
            r#"
            UPDATE configs
            SET family_count = ?1, nvt_count = ?2, families_growing = ?3, nvts_growing = ?4,
                modified_at = ?5
            WHERE id = ?6
            "#,
            params![
                counts.family_count,
                counts.nvt_count,
                counts.families_growing,
                counts.nvts_growing,
                Utc::now().timestamp(),
                id.0,
            ],
        )
        .map_err(db_err("Failed to update config counts"))?;

    if updated == 0 {
        return Err(Error::ConfigNotFound { config_id: id.0 });
    }
    Ok(())
}

/// Number of tasks referencing a config
pub(crate) fn tasks_using(conn: &Connection, id: ConfigId) -> Result<u32> {
    conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE config_id = ?1",
        [id.0],
        |row| row.get(0),
    )
    .map_err(db_err("Failed to count tasks using config"))
}

/// Refuse when any task references the config
pub(crate) fn ensure_not_in_use(conn: &Connection, id: ConfigId) -> Result<()> {
    match tasks_using(conn, id)? {
        0 => Ok(()),
        tasks => Err(Error::ConfigInUse {
            config_id: id.0,
            tasks,
        }),
    }
}

pub(crate) fn insert_task(conn: &Connection, name: &str, config: ConfigId) -> Result<TaskId> {
    get_config(conn, config)?;
    conn.execute(
        "INSERT INTO tasks (name, config_id) VALUES (?1, ?2)",
        params![name, config.0],
    )
    .map_err(db_err("Failed to create task"))?;
    Ok(TaskId(conn.last_insert_rowid()))
}

pub(crate) fn delete_task(conn: &Connection, task: TaskId) -> Result<()> {
    let deleted = conn
        .execute("DELETE FROM tasks WHERE id = ?1", [task.0])
        .map_err(db_err("Failed to delete task"))?;
    if deleted == 0 {
        return Err(Error::TaskNotFound { task_id: task.0 });
    }
    Ok(())
}

/// Remove a config together with its selector and rules
pub(crate) fn delete_config(conn: &Connection, config: &ScanConfig) -> Result<()> {
    conn.execute("DELETE FROM configs WHERE id = ?1", [config.id.0])
        .map_err(db_err("Failed to delete scan config"))?;
    conn.execute(
        "DELETE FROM selector_rules WHERE selector_id = ?1",
        [config.selector_id.0],
    )
    .map_err(db_err("Failed to delete selector rules"))?;
    conn.execute("DELETE FROM selectors WHERE id = ?1", [config.selector_id.0])
        .map_err(db_err("Failed to delete selector"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_db() {
        let store = Store::in_memory().unwrap();
        assert_eq!(store.nvt_count().unwrap(), 0);
    }

    #[test]
    fn test_upsert_nvts() {
        let store = Store::in_memory().unwrap();
        store
            .upsert_nvts(&[
                NvtInfo::new("1.3.6.1.4.1.25623.1.0.10330", "Services", "Service detection"),
                NvtInfo::new("1.3.6.1.4.1.25623.1.0.100315", "Ping Host", "Port scanners"),
            ])
            .unwrap();
        assert_eq!(store.nvt_count().unwrap(), 2);

        // Re-publishing an OID moves it, never duplicates it
        store
            .upsert_nvt(&NvtInfo::new("1.3.6.1.4.1.25623.1.0.10330", "Services", "General"))
            .unwrap();
        let nvts = store.load_nvts().unwrap();
        assert_eq!(nvts.len(), 2);
        assert!(nvts
            .iter()
            .any(|n| n.oid == "1.3.6.1.4.1.25623.1.0.10330" && n.family == "General"));
    }

    #[test]
    fn test_exclusive_rolls_back_on_error() {
        let store = Store::in_memory().unwrap();
        let result: Result<()> = store.exclusive(|tx| {
            insert_selector(tx, "doomed")?;
            Err(Error::Internal(String::from("abort")))
        });
        assert!(result.is_err());

        let selectors: i64 = store
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM selectors", [], |row| row.get(0))
                    .map_err(db_err("count"))
            })
            .unwrap();
        assert_eq!(selectors, 0);
    }

    #[test]
    fn test_config_rows_and_tasks() {
        let store = Store::in_memory().unwrap();
        let counts = SelectionCounts {
            family_count: 2,
            nvt_count: 5,
            families_growing: true,
            nvts_growing: true,
        };

        let config = store
            .exclusive(|tx| {
                let selector = insert_selector(tx, "Full and fast")?;
                let id = insert_config(tx, "Full and fast", "", selector, &counts)?;
                get_config(tx, id)
            })
            .unwrap();
        assert_eq!(config.counts, counts);
        assert_eq!(config.uuid.len(), 36);

        let task = store
            .exclusive(|tx| insert_task(tx, "Weekly", config.id))
            .unwrap();
        let err = store
            .read(|conn| ensure_not_in_use(conn, config.id))
            .unwrap_err();
        assert!(matches!(err, Error::ConfigInUse { tasks: 1, .. }));

        store.exclusive(|tx| delete_task(tx, task)).unwrap();
        store.read(|conn| ensure_not_in_use(conn, config.id)).unwrap();

        let missing = store.read(|conn| get_config(conn, ConfigId(999))).unwrap_err();
        assert!(matches!(missing, Error::ConfigNotFound { config_id: 999 }));
    }
}
