// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dpos_staking::{
    Balance, Collator, Delegator, HistoryElement, HistoryKind, Reward, Round, RoundCollator,
    RoundNomination, RoundNominator, Staker, StakerRole,
};
use sqlx::{
    any::{AnyArguments, AnyPoolOptions, AnyRow},
    query::Query,
    Any, AnyPool, Row, Transaction,
};

use super::DbError;

pub type StakingDbObj = Arc<dyn StakingStore + Send + Sync>;

type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

const LAST_PROCESSED_BLOCK_KEY: &str = "last_processed_block";

// Batch insert chunk size to avoid parameter limits
// PostgreSQL: 65535 max params, SQLite: 999-32766 params (configurable)
// The widest table binds 10 columns, so 75 rows stay under the SQLite floor
const BATCH_INSERT_CHUNK_SIZE: usize = 75;

/// Width of u128::MAX in decimal.
const BALANCE_WIDTH: usize = 39;

/// Convert a balance to a zero-padded string for proper database sorting
fn pad_balance(value: Balance) -> String {
    format!("{:0>width$}", value, width = BALANCE_WIDTH)
}

/// Convert a zero-padded string back to a balance
fn unpad_balance(s: &str) -> Result<Balance, DbError> {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed.parse().map_err(|_| DbError::BadValue(format!("Invalid balance string: {}", s)))
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::BadValue(format!("Invalid timestamp: {}", ms)))
}

fn conflict_or_sql(table: &'static str, err: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint failed") {
            return DbError::Conflict(table.to_string());
        }
    }
    DbError::SqlErr(err)
}

/// Everything one batch persists. Applied in a single transaction by [`StakingStore::commit_batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchWrite {
    // Inserted; an existing row fails the batch with [`DbError::Conflict`].
    pub rounds: Vec<Round>,
    pub round_collators: Vec<RoundCollator>,
    pub round_nominators: Vec<RoundNominator>,
    pub round_nominations: Vec<RoundNomination>,
    pub rewards: Vec<Reward>,
    pub history_elements: Vec<HistoryElement>,

    // Saved over whatever is stored.
    pub stakers: Vec<Staker>,
    pub updated_round_collators: Vec<RoundCollator>,
    pub collators: Vec<Collator>,
    pub delegators: Vec<Delegator>,

    pub last_processed_block: Option<u64>,
}

#[async_trait]
pub trait StakingStore {
    async fn find_stakers(&self, ids: &[String]) -> Result<HashMap<String, Staker>, DbError>;

    async fn find_round_collators(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, RoundCollator>, DbError>;

    async fn find_round_nominators(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, RoundNominator>, DbError>;

    async fn find_round_nominations(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, RoundNomination>, DbError>;

    async fn find_collators(&self, ids: &[String]) -> Result<HashMap<String, Collator>, DbError>;

    async fn find_delegators(&self, ids: &[String]) -> Result<HashMap<String, Delegator>, DbError>;

    async fn find_rewards(&self, ids: &[String]) -> Result<HashMap<String, Reward>, DbError>;

    async fn find_history_elements(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, HistoryElement>, DbError>;

    /// Rounds with index >= `min_index`, ordered by index.
    async fn find_rounds_from(&self, min_index: u32) -> Result<Vec<Round>, DbError>;

    async fn get_last_processed_block(&self) -> Result<Option<u64>, DbError>;

    /// Persist a batch atomically.
    async fn commit_batch(&self, batch: BatchWrite) -> Result<(), DbError>;
}

pub struct StakingDb {
    pool: AnyPool,
}

impl StakingDb {
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(20).connect(database_url).await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    async fn fetch_by_ids(&self, select: &str, ids: &[String]) -> Result<Vec<AnyRow>, DbError> {
        let mut rows = Vec::new();
        for chunk in ids.chunks(BATCH_INSERT_CHUNK_SIZE) {
            let placeholders =
                (1..=chunk.len()).map(|i| format!("${}", i)).collect::<Vec<_>>().join(",");
            let query = format!("{} WHERE id IN ({})", select, placeholders);

            let mut q = sqlx::query(&query);
            for id in chunk {
                q = q.bind(id.clone());
            }
            rows.extend(q.fetch_all(&self.pool).await?);
        }
        Ok(rows)
    }
}

/// Multi-row INSERT of `rows` in chunks, each row bound by `bind`.
async fn insert_chunked<T: Sync>(
    tx: &mut Transaction<'_, Any>,
    table: &'static str,
    columns: &[&str],
    on_conflict: &str,
    rows: &[T],
    bind: for<'q> fn(AnyQuery<'q>, &T) -> AnyQuery<'q>,
) -> Result<(), DbError> {
    for chunk in rows.chunks(BATCH_INSERT_CHUNK_SIZE) {
        let mut values_clauses = Vec::with_capacity(chunk.len());
        let mut param_idx = 1;
        for _ in chunk {
            let params = (param_idx..param_idx + columns.len())
                .map(|i| format!("${}", i))
                .collect::<Vec<_>>()
                .join(",");
            values_clauses.push(format!("({})", params));
            param_idx += columns.len();
        }

        let query = format!(
            "INSERT INTO {} ({}) VALUES {} {}",
            table,
            columns.join(", "),
            values_clauses.join(","),
            on_conflict
        );

        let mut q = sqlx::query(&query);
        for row in chunk {
            q = bind(q, row);
        }
        q.execute(&mut **tx).await.map_err(|err| conflict_or_sql(table, err))?;
    }
    Ok(())
}

const STAKER_COLUMNS: &[&str] = &["id", "stash_id", "role", "active_bond", "total_reward", "apr24h"];
const ROUND_COLUMNS: &[&str] = &[
    "id",
    "round_index",
    "timestamp",
    "started_at",
    "collators_count",
    "total",
    "collator_commission",
];
const ROUND_COLLATOR_COLUMNS: &[&str] = &[
    "id",
    "round_index",
    "staker_id",
    "own_bond",
    "total_bond",
    "nominators_count",
    "reward_amount",
    "apr",
    "apr_techn_numerator",
    "apr_techn_denominator",
];
const ROUND_NOMINATOR_COLUMNS: &[&str] =
    &["id", "round_index", "staker_id", "bond", "collators_count"];
const ROUND_NOMINATION_COLUMNS: &[&str] =
    &["id", "round_index", "collator_id", "nominator_id", "amount"];
const REWARD_COLUMNS: &[&str] =
    &["id", "account_id", "staker_id", "amount", "round", "block_number", "timestamp"];
const HISTORY_COLUMNS: &[&str] = &[
    "id",
    "block_number",
    "timestamp",
    "type",
    "round_index",
    "staker_id",
    "amount",
    "delegator_id",
    "collator_id",
];

fn bind_staker<'q>(q: AnyQuery<'q>, staker: &Staker) -> AnyQuery<'q> {
    q.bind(staker.id.clone())
        .bind(staker.stash_id.clone())
        .bind(staker.role.as_str().to_string())
        .bind(staker.active_bond.to_string())
        .bind(pad_balance(staker.total_reward))
        .bind(staker.apr24h)
}

fn bind_round<'q>(q: AnyQuery<'q>, round: &Round) -> AnyQuery<'q> {
    q.bind(round.id())
        .bind(round.index as i64)
        .bind(round.timestamp.timestamp_millis())
        .bind(round.started_at as i64)
        .bind(round.collators_count as i64)
        .bind(pad_balance(round.total))
        .bind(round.collator_commission.map(i64::from))
}

fn bind_round_collator<'q>(q: AnyQuery<'q>, rc: &RoundCollator) -> AnyQuery<'q> {
    q.bind(rc.id.clone())
        .bind(rc.round_index as i64)
        .bind(rc.staker_id.clone())
        .bind(pad_balance(rc.own_bond))
        .bind(pad_balance(rc.total_bond))
        .bind(rc.nominators_count as i64)
        .bind(rc.reward_amount.map(pad_balance))
        .bind(rc.apr)
        .bind(rc.apr_techn_numerator)
        .bind(rc.apr_techn_denominator)
}

fn bind_round_nominator<'q>(q: AnyQuery<'q>, rn: &RoundNominator) -> AnyQuery<'q> {
    q.bind(rn.id.clone())
        .bind(rn.round_index as i64)
        .bind(rn.staker_id.clone())
        .bind(pad_balance(rn.bond))
        .bind(rn.collators_count as i64)
}

fn bind_round_nomination<'q>(q: AnyQuery<'q>, rn: &RoundNomination) -> AnyQuery<'q> {
    q.bind(rn.id.clone())
        .bind(rn.round_index as i64)
        .bind(rn.collator_id.clone())
        .bind(rn.nominator_id.clone())
        .bind(pad_balance(rn.amount))
}

fn bind_reward<'q>(q: AnyQuery<'q>, reward: &Reward) -> AnyQuery<'q> {
    q.bind(reward.id.clone())
        .bind(reward.account_id.clone())
        .bind(reward.staker_id.clone())
        .bind(pad_balance(reward.amount))
        .bind(reward.round as i64)
        .bind(reward.block_number as i64)
        .bind(reward.timestamp.timestamp_millis())
}

fn bind_history_element<'q>(q: AnyQuery<'q>, element: &HistoryElement) -> AnyQuery<'q> {
    q.bind(element.id.clone())
        .bind(element.block_number as i64)
        .bind(element.timestamp.timestamp_millis())
        .bind(element.kind.code())
        .bind(element.round_index as i64)
        .bind(element.staker_id.clone())
        .bind(pad_balance(element.amount))
        .bind(element.delegator_id.clone())
        .bind(element.collator_id.clone())
}

fn bind_collator<'q>(q: AnyQuery<'q>, collator: &Collator) -> AnyQuery<'q> {
    q.bind(collator.id.clone())
}

fn bind_delegator<'q>(q: AnyQuery<'q>, delegator: &Delegator) -> AnyQuery<'q> {
    q.bind(delegator.id.clone())
}

fn staker_from_row(row: &AnyRow) -> Result<Staker, DbError> {
    let role: String = row.try_get("role")?;
    let active_bond: String = row.try_get("active_bond")?;
    Ok(Staker {
        id: row.try_get("id")?,
        stash_id: row.try_get("stash_id")?,
        role: StakerRole::parse(&role)
            .ok_or_else(|| DbError::BadValue(format!("Invalid staker role: {}", role)))?,
        active_bond: active_bond
            .parse()
            .map_err(|_| DbError::BadValue(format!("Invalid active bond: {}", active_bond)))?,
        total_reward: unpad_balance(&row.try_get::<String, _>("total_reward")?)?,
        apr24h: row.try_get("apr24h")?,
    })
}

fn round_from_row(row: &AnyRow) -> Result<Round, DbError> {
    Ok(Round {
        index: row.try_get::<i64, _>("round_index")? as u32,
        timestamp: millis_to_datetime(row.try_get("timestamp")?)?,
        started_at: row.try_get::<i64, _>("started_at")? as u64,
        collators_count: row.try_get::<i64, _>("collators_count")? as u32,
        total: unpad_balance(&row.try_get::<String, _>("total")?)?,
        collator_commission: row
            .try_get::<Option<i64>, _>("collator_commission")?
            .map(|c| c as u32),
    })
}

fn round_collator_from_row(row: &AnyRow) -> Result<RoundCollator, DbError> {
    let reward_amount: Option<String> = row.try_get("reward_amount")?;
    Ok(RoundCollator {
        id: row.try_get("id")?,
        round_index: row.try_get::<i64, _>("round_index")? as u32,
        staker_id: row.try_get("staker_id")?,
        own_bond: unpad_balance(&row.try_get::<String, _>("own_bond")?)?,
        total_bond: unpad_balance(&row.try_get::<String, _>("total_bond")?)?,
        nominators_count: row.try_get::<i64, _>("nominators_count")? as u32,
        reward_amount: reward_amount.as_deref().map(unpad_balance).transpose()?,
        apr: row.try_get("apr")?,
        apr_techn_numerator: row.try_get("apr_techn_numerator")?,
        apr_techn_denominator: row.try_get("apr_techn_denominator")?,
    })
}

fn round_nominator_from_row(row: &AnyRow) -> Result<RoundNominator, DbError> {
    Ok(RoundNominator {
        id: row.try_get("id")?,
        round_index: row.try_get::<i64, _>("round_index")? as u32,
        staker_id: row.try_get("staker_id")?,
        bond: unpad_balance(&row.try_get::<String, _>("bond")?)?,
        collators_count: row.try_get::<i64, _>("collators_count")? as u32,
    })
}

fn round_nomination_from_row(row: &AnyRow) -> Result<RoundNomination, DbError> {
    Ok(RoundNomination {
        id: row.try_get("id")?,
        round_index: row.try_get::<i64, _>("round_index")? as u32,
        collator_id: row.try_get("collator_id")?,
        nominator_id: row.try_get("nominator_id")?,
        amount: unpad_balance(&row.try_get::<String, _>("amount")?)?,
    })
}

fn reward_from_row(row: &AnyRow) -> Result<Reward, DbError> {
    Ok(Reward {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        staker_id: row.try_get("staker_id")?,
        amount: unpad_balance(&row.try_get::<String, _>("amount")?)?,
        round: row.try_get::<i64, _>("round")? as u32,
        block_number: row.try_get::<i64, _>("block_number")? as u64,
        timestamp: millis_to_datetime(row.try_get("timestamp")?)?,
    })
}

fn history_element_from_row(row: &AnyRow) -> Result<HistoryElement, DbError> {
    let code: i64 = row.try_get("type")?;
    Ok(HistoryElement {
        id: row.try_get("id")?,
        block_number: row.try_get::<i64, _>("block_number")? as u64,
        timestamp: millis_to_datetime(row.try_get("timestamp")?)?,
        kind: HistoryKind::from_code(code)
            .ok_or_else(|| DbError::BadValue(format!("Invalid history type: {}", code)))?,
        round_index: row.try_get::<i64, _>("round_index")? as u32,
        staker_id: row.try_get("staker_id")?,
        amount: unpad_balance(&row.try_get::<String, _>("amount")?)?,
        delegator_id: row.try_get("delegator_id")?,
        collator_id: row.try_get("collator_id")?,
    })
}

fn collect_by_id<T>(
    rows: Vec<AnyRow>,
    parse: fn(&AnyRow) -> Result<T, DbError>,
    id: fn(&T) -> String,
) -> Result<HashMap<String, T>, DbError> {
    rows.iter()
        .map(|row| {
            let entity = parse(row)?;
            Ok((id(&entity), entity))
        })
        .collect()
}

#[async_trait]
impl StakingStore for StakingDb {
    async fn find_stakers(&self, ids: &[String]) -> Result<HashMap<String, Staker>, DbError> {
        let rows = self
            .fetch_by_ids(
                "SELECT id, stash_id, role, active_bond, total_reward, apr24h FROM stakers",
                ids,
            )
            .await?;
        collect_by_id(rows, staker_from_row, |s| s.id.clone())
    }

    async fn find_round_collators(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, RoundCollator>, DbError> {
        let rows = self
            .fetch_by_ids(
                r#"SELECT id, round_index, staker_id, own_bond, total_bond, nominators_count,
                reward_amount, apr, apr_techn_numerator, apr_techn_denominator
                FROM round_collators"#,
                ids,
            )
            .await?;
        collect_by_id(rows, round_collator_from_row, |rc| rc.id.clone())
    }

    async fn find_round_nominators(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, RoundNominator>, DbError> {
        let rows = self
            .fetch_by_ids(
                "SELECT id, round_index, staker_id, bond, collators_count FROM round_nominators",
                ids,
            )
            .await?;
        collect_by_id(rows, round_nominator_from_row, |rn| rn.id.clone())
    }

    async fn find_round_nominations(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, RoundNomination>, DbError> {
        let rows = self
            .fetch_by_ids(
                "SELECT id, round_index, collator_id, nominator_id, amount FROM round_nominations",
                ids,
            )
            .await?;
        collect_by_id(rows, round_nomination_from_row, |rn| rn.id.clone())
    }

    async fn find_collators(&self, ids: &[String]) -> Result<HashMap<String, Collator>, DbError> {
        let rows = self.fetch_by_ids("SELECT id FROM collators", ids).await?;
        collect_by_id(rows, |row| Ok(Collator { id: row.try_get("id")? }), |c| c.id.clone())
    }

    async fn find_delegators(&self, ids: &[String]) -> Result<HashMap<String, Delegator>, DbError> {
        let rows = self.fetch_by_ids("SELECT id FROM delegators", ids).await?;
        collect_by_id(rows, |row| Ok(Delegator { id: row.try_get("id")? }), |d| d.id.clone())
    }

    async fn find_rewards(&self, ids: &[String]) -> Result<HashMap<String, Reward>, DbError> {
        let rows = self
            .fetch_by_ids(
                r#"SELECT id, account_id, staker_id, amount, round, block_number, timestamp
                FROM rewards"#,
                ids,
            )
            .await?;
        collect_by_id(rows, reward_from_row, |r| r.id.clone())
    }

    async fn find_history_elements(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, HistoryElement>, DbError> {
        let rows = self
            .fetch_by_ids(
                r#"SELECT id, block_number, timestamp, type, round_index, staker_id, amount,
                delegator_id, collator_id
                FROM history_elements"#,
                ids,
            )
            .await?;
        collect_by_id(rows, history_element_from_row, |h| h.id.clone())
    }

    async fn find_rounds_from(&self, min_index: u32) -> Result<Vec<Round>, DbError> {
        let query = r#"
            SELECT round_index, timestamp, started_at, collators_count, total, collator_commission
            FROM rounds
            WHERE round_index >= $1
            ORDER BY round_index ASC
        "#;

        let rows = sqlx::query(query).bind(min_index as i64).fetch_all(&self.pool).await?;
        rows.iter().map(round_from_row).collect()
    }

    async fn get_last_processed_block(&self) -> Result<Option<u64>, DbError> {
        let query = "SELECT value FROM indexer_state WHERE key = $1";
        let result = sqlx::query(query)
            .bind(LAST_PROCESSED_BLOCK_KEY.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match result {
            Some(row) => {
                let value: String = row.try_get("value")?;
                Ok(Some(value.parse().map_err(|_| DbError::BadBlockNumb(value))?))
            }
            None => Ok(None),
        }
    }

    async fn commit_batch(&self, batch: BatchWrite) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        insert_chunked(&mut tx, "rounds", ROUND_COLUMNS, "", &batch.rounds, bind_round).await?;
        insert_chunked(
            &mut tx,
            "round_collators",
            ROUND_COLLATOR_COLUMNS,
            "",
            &batch.round_collators,
            bind_round_collator,
        )
        .await?;
        insert_chunked(
            &mut tx,
            "round_nominators",
            ROUND_NOMINATOR_COLUMNS,
            "",
            &batch.round_nominators,
            bind_round_nominator,
        )
        .await?;
        insert_chunked(
            &mut tx,
            "round_nominations",
            ROUND_NOMINATION_COLUMNS,
            "",
            &batch.round_nominations,
            bind_round_nomination,
        )
        .await?;
        insert_chunked(&mut tx, "rewards", REWARD_COLUMNS, "", &batch.rewards, bind_reward).await?;
        insert_chunked(
            &mut tx,
            "history_elements",
            HISTORY_COLUMNS,
            "",
            &batch.history_elements,
            bind_history_element,
        )
        .await?;

        insert_chunked(
            &mut tx,
            "stakers",
            STAKER_COLUMNS,
            r#"ON CONFLICT (id) DO UPDATE SET
                stash_id = EXCLUDED.stash_id,
                role = EXCLUDED.role,
                active_bond = EXCLUDED.active_bond,
                total_reward = EXCLUDED.total_reward,
                apr24h = EXCLUDED.apr24h,
                updated_at = CURRENT_TIMESTAMP"#,
            &batch.stakers,
            bind_staker,
        )
        .await?;
        insert_chunked(
            &mut tx,
            "round_collators",
            ROUND_COLLATOR_COLUMNS,
            r#"ON CONFLICT (id) DO UPDATE SET
                reward_amount = EXCLUDED.reward_amount,
                apr = EXCLUDED.apr,
                apr_techn_numerator = EXCLUDED.apr_techn_numerator,
                apr_techn_denominator = EXCLUDED.apr_techn_denominator"#,
            &batch.updated_round_collators,
            bind_round_collator,
        )
        .await?;
        insert_chunked(
            &mut tx,
            "collators",
            &["id"],
            "ON CONFLICT (id) DO NOTHING",
            &batch.collators,
            bind_collator,
        )
        .await?;
        insert_chunked(
            &mut tx,
            "delegators",
            &["id"],
            "ON CONFLICT (id) DO NOTHING",
            &batch.delegators,
            bind_delegator,
        )
        .await?;

        if let Some(block) = batch.last_processed_block {
            let query = r#"
                INSERT INTO indexer_state (key, value, updated_at)
                VALUES ($1, $2, CURRENT_TIMESTAMP)
                ON CONFLICT (key)
                DO UPDATE SET value = $2, updated_at = CURRENT_TIMESTAMP
            "#;
            sqlx::query(query)
                .bind(LAST_PROCESSED_BLOCK_KEY.to_string())
                .bind(block.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balances_pad_and_sort() {
        assert_eq!(pad_balance(0).len(), BALANCE_WIDTH);
        assert_eq!(pad_balance(u128::MAX).len(), BALANCE_WIDTH);
        assert!(pad_balance(9) < pad_balance(10));
        assert_eq!(unpad_balance(&pad_balance(0)).unwrap(), 0);
        assert_eq!(unpad_balance(&pad_balance(u128::MAX)).unwrap(), u128::MAX);
        assert!(unpad_balance("12x").is_err());
    }
}
