//! Crash-recovery snapshot store (spec.md §7, SPEC_FULL.md §10.4): a
//! key/value JSON blob table over SQLite, modeled on the teacher's
//! `agent_state` table — one row per snapshot key, upserted on every
//! committed bar so the engine can reconstruct `RiskState`, open
//! `Position`s, open `Package`s, and `HedgeState` after a restart.

use engine_core::{EngineError, EngineResult, HedgeState, Package, Position, RiskState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

const KEY_RISK_STATE: &str = "risk_state";
const KEY_POSITIONS: &str = "positions";
const KEY_PACKAGES: &str = "packages";
const KEY_HEDGE_STATES: &str = "hedge_states";

pub struct EngineSnapshotStore {
    pool: SqlitePool,
}

impl EngineSnapshotStore {
    pub async fn connect(database_url: &str) -> EngineResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    pub async fn in_memory() -> EngineResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn init_tables(&self) -> EngineResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS engine_snapshot (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS seen_client_order_ids (
                client_order_id TEXT PRIMARY KEY,
                recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn save<T: Serialize + Sync>(&self, key: &str, value: &T) -> EngineResult<()> {
        let json = serde_json::to_string(value).map_err(|e| EngineError::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO engine_snapshot (key, value, updated_at) VALUES (?, ?, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> EngineResult<Option<T>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM engine_snapshot WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        match row {
            Some((value,)) => serde_json::from_str(&value)
                .map(Some)
                .map_err(|e| EngineError::Storage(e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn save_risk_state(&self, state: &RiskState) -> EngineResult<()> {
        self.save(KEY_RISK_STATE, state).await
    }

    pub async fn load_risk_state(&self) -> EngineResult<Option<RiskState>> {
        self.load(KEY_RISK_STATE).await
    }

    pub async fn save_positions(&self, positions: &[Position]) -> EngineResult<()> {
        self.save(KEY_POSITIONS, &positions).await
    }

    pub async fn load_positions(&self) -> EngineResult<Vec<Position>> {
        Ok(self.load(KEY_POSITIONS).await?.unwrap_or_default())
    }

    pub async fn save_packages(&self, packages: &[Package]) -> EngineResult<()> {
        self.save(KEY_PACKAGES, &packages).await
    }

    pub async fn load_packages(&self) -> EngineResult<Vec<Package>> {
        Ok(self.load(KEY_PACKAGES).await?.unwrap_or_default())
    }

    pub async fn save_hedge_states(&self, states: &[HedgeState]) -> EngineResult<()> {
        self.save(KEY_HEDGE_STATES, &states).await
    }

    pub async fn load_hedge_states(&self) -> EngineResult<Vec<HedgeState>> {
        Ok(self.load(KEY_HEDGE_STATES).await?.unwrap_or_default())
    }

    /// Snapshots every recovery-relevant piece of state in one call, after a committed bar.
    pub async fn save_all(
        &self,
        risk_state: &RiskState,
        positions: &[Position],
        packages: &[Package],
        hedge_states: &[HedgeState],
    ) -> EngineResult<()> {
        self.save_risk_state(risk_state).await?;
        self.save_positions(positions).await?;
        self.save_packages(packages).await?;
        self.save_hedge_states(hedge_states).await?;
        Ok(())
    }

    /// Records a `client_order_id` the broker has acknowledged, so a restart
    /// doesn't resubmit an order already in flight.
    pub async fn record_client_order_id(&self, client_order_id: &str) -> EngineResult<()> {
        sqlx::query("INSERT OR IGNORE INTO seen_client_order_ids (client_order_id) VALUES (?)")
            .bind(client_order_id)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(())
    }

    pub async fn has_seen_client_order_id(&self, client_order_id: &str) -> EngineResult<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT client_order_id FROM seen_client_order_ids WHERE client_order_id = ?")
                .bind(client_order_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(row.is_some())
    }
}
