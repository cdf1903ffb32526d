//! Named monotonic id counters for table games.
//!
//! Counters live in the `game_ids` table, which carries capture triggers
//! like any other rule-visible table, so generated ids roll back with the
//! rest of the state on detach.

use ludex_rules::RulesError;
use rusqlite::{params, Connection, OptionalExtension};

pub(crate) const IDS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS game_ids (
        name TEXT PRIMARY KEY,
        next INTEGER NOT NULL
    );
";

/// Access point handed to the rule hooks.
#[derive(Copy, Clone)]
pub struct IdPool<'a> {
    conn: &'a Connection,
}

impl std::fmt::Debug for IdPool<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdPool").finish_non_exhaustive()
    }
}

impl<'a> IdPool<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// The counter for one logical id space.
    pub fn ids(&self, name: &str) -> IdRange<'a> {
        IdRange {
            conn: self.conn,
            name: name.to_owned(),
        }
    }
}

/// One named counter.
pub struct IdRange<'a> {
    conn: &'a Connection,
    name: String,
}

impl std::fmt::Debug for IdRange<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdRange")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl IdRange<'_> {
    /// Returns the next free id and advances the counter.  A fresh
    /// counter starts at 1.
    pub fn next_id(&self) -> Result<u64, RulesError> {
        let next: Option<i64> = self
            .conn
            .query_row(
                "SELECT next FROM game_ids WHERE name = ?1",
                params![self.name],
                |row| row.get(0),
            )
            .optional()
            .map_err(RulesError::backend)?;
        let value = next.unwrap_or(1);

        self.conn
            .execute(
                "INSERT INTO game_ids (name, next) VALUES (?1, ?2)
                 ON CONFLICT (name) DO UPDATE SET next = excluded.next",
                params![self.name, value + 1],
            )
            .map_err(RulesError::backend)?;

        Ok(value as u64)
    }

    /// Marks every id up to and including `n` as used.  Monotonic: a
    /// smaller argument is a no-op.
    pub fn reserve_up_to(&self, n: u64) -> Result<(), RulesError> {
        self.conn
            .execute(
                "INSERT INTO game_ids (name, next) VALUES (?1, ?2)
                 ON CONFLICT (name) DO UPDATE SET next = MAX(next, excluded.next)",
                params![self.name, (n as i64) + 1],
            )
            .map_err(RulesError::backend)?;
        Ok(())
    }
}
