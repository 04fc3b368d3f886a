//! Player progress repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide keyed CRUD plus atomic counter increments over `player_progress`.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Write paths call `PlayerProgressRecord::validate()` before SQL mutations.
//! - `increment_field` creates the row lazily and returns the post-increment
//!   state from the same statement.
//! - A closed repository rejects every call with `RepoError::Closed`.

use crate::clock::now_epoch_ms;
use crate::db::{open_db, open_db_in_memory, DbError};
use crate::model::progress::{PlayerProgressRecord, ProgressField, ProgressValidationError};
use log::{info, warn};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

const PROGRESS_SELECT_SQL: &str = "SELECT
    player_id,
    rank_index,
    kills,
    deaths,
    last_updated,
    rank_achieved_at
FROM player_progress";

const PROGRESS_RETURNING_SQL: &str =
    "RETURNING player_id, rank_index, kills, deaths, last_updated, rank_achieved_at";

pub type RepoResult<T> = Result<T, RepoError>;

/// Persistence failure surfaced by repository and event-store calls.
#[derive(Debug)]
pub enum RepoError {
    Validation(ProgressValidationError),
    Db(DbError),
    InvalidData(String),
    /// The store was closed by its owner.
    Closed,
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Closed => write!(f, "repository is closed"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::InvalidData(_) | Self::Closed => None,
        }
    }
}

impl From<ProgressValidationError> for RepoError {
    fn from(value: ProgressValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Ordering for record listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressOrder {
    /// Stable order used by batch scans.
    #[default]
    PlayerId,
    /// Leaderboard order: kills descending, ties by player id.
    KillsDesc,
}

/// Pagination options for listing records.
#[derive(Debug, Clone, Default)]
pub struct ProgressListQuery {
    pub limit: Option<u32>,
    pub offset: u32,
    pub order: ProgressOrder,
}

/// Repository interface for player progress records.
pub trait ProgressRepository: Send + Sync {
    fn get_record(&self, player_id: &str) -> RepoResult<Option<PlayerProgressRecord>>;
    fn upsert_record(&self, record: &PlayerProgressRecord) -> RepoResult<()>;
    /// Adds `amount` to `field`, creating a zero-state row first when missing.
    fn increment_field(
        &self,
        player_id: &str,
        field: ProgressField,
        amount: i64,
    ) -> RepoResult<PlayerProgressRecord>;
    /// Returns whether a record existed.
    fn delete_record(&self, player_id: &str) -> RepoResult<bool>;
    fn list_records(&self, query: &ProgressListQuery) -> RepoResult<Vec<PlayerProgressRecord>>;
    /// Releases backing resources. Stores without resources keep the default.
    fn close(&self) -> RepoResult<()> {
        Ok(())
    }
}

/// SQLite-backed progress repository shared across handlers.
pub struct SqliteProgressRepository {
    conn: Mutex<Option<Connection>>,
}

impl SqliteProgressRepository {
    /// Wraps an already migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    /// Opens a private in-memory database.
    pub fn in_memory() -> RepoResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    fn with_conn<T>(&self, op: impl FnOnce(&Connection) -> RepoResult<T>) -> RepoResult<T> {
        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(conn) => op(conn),
            None => Err(RepoError::Closed),
        }
    }
}

impl ProgressRepository for SqliteProgressRepository {
    fn get_record(&self, player_id: &str) -> RepoResult<Option<PlayerProgressRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{PROGRESS_SELECT_SQL} WHERE player_id = ?1;"))?;
            let raw = stmt.query_row([player_id], read_raw_row).optional()?;
            raw.map(RawProgressRow::into_record).transpose()
        })
    }

    fn upsert_record(&self, record: &PlayerProgressRecord) -> RepoResult<()> {
        record.validate()?;
        let rank_index = rank_index_to_db(record.rank_index)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO player_progress (
                    player_id,
                    rank_index,
                    kills,
                    deaths,
                    last_updated,
                    rank_achieved_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(player_id) DO UPDATE SET
                    rank_index = excluded.rank_index,
                    kills = excluded.kills,
                    deaths = excluded.deaths,
                    last_updated = excluded.last_updated,
                    rank_achieved_at = excluded.rank_achieved_at;",
                params![
                    record.player_id.as_str(),
                    rank_index,
                    record.kills,
                    record.deaths,
                    record.last_updated,
                    record.rank_achieved_at,
                ],
            )?;
            Ok(())
        })
    }

    fn increment_field(
        &self,
        player_id: &str,
        field: ProgressField,
        amount: i64,
    ) -> RepoResult<PlayerProgressRecord> {
        if player_id.trim().is_empty() {
            return Err(ProgressValidationError::BlankPlayerId.into());
        }
        if amount <= 0 {
            return Err(ProgressValidationError::NonPositiveIncrement(amount).into());
        }

        let column = field.column();
        self.with_conn(|conn| {
            let raw = conn.query_row(
                &format!(
                    "INSERT INTO player_progress (player_id, {column}, last_updated)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(player_id) DO UPDATE SET
                        {column} = {column} + excluded.{column},
                        last_updated = excluded.last_updated
                     {PROGRESS_RETURNING_SQL};"
                ),
                params![player_id, amount, now_epoch_ms()],
                read_raw_row,
            )?;
            raw.into_record()
        })
    }

    fn delete_record(&self, player_id: &str) -> RepoResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM player_progress WHERE player_id = ?1;",
                [player_id],
            )?;
            Ok(changed > 0)
        })
    }

    fn list_records(&self, query: &ProgressListQuery) -> RepoResult<Vec<PlayerProgressRecord>> {
        let mut sql = PROGRESS_SELECT_SQL.to_string();
        let mut bind_values: Vec<Value> = Vec::new();

        match query.order {
            ProgressOrder::PlayerId => sql.push_str(" ORDER BY player_id ASC"),
            ProgressOrder::KillsDesc => sql.push_str(" ORDER BY kills DESC, player_id ASC"),
        }

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bind_values), read_raw_row)?;
            let mut records = Vec::new();
            for raw in rows {
                records.push(raw?.into_record()?);
            }
            Ok(records)
        })
    }

    fn close(&self) -> RepoResult<()> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(conn) = guard.take() else {
            return Ok(());
        };
        match conn.close() {
            Ok(()) => {
                info!("event=repo_close module=repo status=ok store=player_progress");
                Ok(())
            }
            Err((_conn, err)) => {
                warn!("event=repo_close module=repo status=error store=player_progress error={err}");
                Err(err.into())
            }
        }
    }
}

// Column values as read; converted outside the rusqlite row callback so
// invalid data maps to `RepoError::InvalidData` instead of a SQL error.
struct RawProgressRow {
    player_id: String,
    rank_index: i64,
    kills: i64,
    deaths: i64,
    last_updated: i64,
    rank_achieved_at: Option<i64>,
}

impl RawProgressRow {
    fn into_record(self) -> RepoResult<PlayerProgressRecord> {
        let rank_index = usize::try_from(self.rank_index).map_err(|_| {
            RepoError::InvalidData(format!(
                "invalid rank_index `{}` for player `{}`",
                self.rank_index, self.player_id
            ))
        })?;
        let record = PlayerProgressRecord {
            player_id: self.player_id,
            rank_index,
            kills: self.kills,
            deaths: self.deaths,
            last_updated: self.last_updated,
            rank_achieved_at: self.rank_achieved_at,
        };
        record
            .validate()
            .map_err(|err| RepoError::InvalidData(format!("{err} ({})", record.player_id)))?;
        Ok(record)
    }
}

fn read_raw_row(row: &Row<'_>) -> rusqlite::Result<RawProgressRow> {
    Ok(RawProgressRow {
        player_id: row.get("player_id")?,
        rank_index: row.get("rank_index")?,
        kills: row.get("kills")?,
        deaths: row.get("deaths")?,
        last_updated: row.get("last_updated")?,
        rank_achieved_at: row.get("rank_achieved_at")?,
    })
}

fn rank_index_to_db(rank_index: usize) -> RepoResult<i64> {
    i64::try_from(rank_index)
        .map_err(|_| RepoError::InvalidData(format!("rank_index `{rank_index}` overflows")))
}
