//! `SQLite`-backed directory.

pub mod connection;
pub mod migrations;

use huddle_core::{ChannelId, ConversationId, UserId};
use rusqlite::OptionalExtension;
use tracing::info;

use self::connection::{ConnectionConfig, ConnectionPool};
use crate::directory::{Directory, Memberships, UserProfile};
use crate::errors::Result;

/// Directory over the application's `SQLite` database. Soft-deleted rows
/// (non-null `deleted_at`) are invisible.
#[derive(Clone, Debug)]
pub struct SqliteDirectory {
    pool: ConnectionPool,
}

impl SqliteDirectory {
    /// Open (creating if needed) and migrate a database file.
    pub fn open(path: &str, config: &ConnectionConfig) -> Result<Self> {
        let pool = connection::new_file(path, config)?;
        let dir = Self::from_pool(pool)?;
        info!(path, "directory database ready");
        Ok(dir)
    }

    /// Migrated in-memory database on a single connection.
    pub fn in_memory() -> Result<Self> {
        let config = ConnectionConfig {
            pool_size: 1,
            ..ConnectionConfig::default()
        };
        Self::from_pool(connection::new_in_memory(&config)?)
    }

    /// Wrap an existing pool, applying pending migrations.
    pub fn from_pool(pool: ConnectionPool) -> Result<Self> {
        let _ = migrations::run_migrations(&*pool.get()?)?;
        Ok(Self { pool })
    }

    /// Underlying pool, for seeding and administration.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn channels(&self, user: &UserId) -> Result<Vec<ChannelId>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT tc.id FROM team_channels tc \
             JOIN team_members tm ON tm.team_id = tc.team_id \
             WHERE tm.user_id = ?1 AND tm.deleted_at IS NULL AND tc.deleted_at IS NULL \
             ORDER BY tc.id",
        )?;
        let rows = stmt.query_map([user.as_str()], |row| row.get::<_, String>(0))?;
        rows.map(|r| r.map(ChannelId::from).map_err(Into::into))
            .collect()
    }

    fn conversations(&self, user: &UserId) -> Result<Vec<ConversationId>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id FROM conversations \
             WHERE (user1_id = ?1 OR user2_id = ?1) AND deleted_at IS NULL \
             ORDER BY id",
        )?;
        let rows = stmt.query_map([user.as_str()], |row| row.get::<_, String>(0))?;
        rows.map(|r| r.map(ConversationId::from).map_err(Into::into))
            .collect()
    }
}

impl Directory for SqliteDirectory {
    fn user_exists(&self, user: &UserId) -> Result<bool> {
        let conn = self.pool.get()?;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1 AND deleted_at IS NULL)",
            [user.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn memberships(&self, user: &UserId) -> Result<Memberships> {
        Ok(Memberships {
            channels: self.channels(user)?,
            conversations: self.conversations(user)?,
        })
    }

    fn profile(&self, user: &UserId) -> Result<Option<UserProfile>> {
        let conn = self.pool.get()?;
        let profile = conn
            .query_row(
                "SELECT id, COALESCE(NULLIF(display_name, ''), full_name), profile_image \
                 FROM users WHERE id = ?1 AND deleted_at IS NULL",
                [user.as_str()],
                |row| {
                    Ok(UserProfile {
                        id: UserId::from_raw(row.get::<_, String>(0)?),
                        display_name: row.get(1)?,
                        avatar: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }
}
