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

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::Instant,
};

use anyhow::{bail, Context, Result};
use dpos_staking::{
    names::storage, Block, BlockHeader, CanonicalEventDecoder, CanonicalKind,
    CanonicalStorageReader, HexAddressCodec, LedgerState, Round, RoundEntities, RoundLocator,
    RoundSnapshotBuilder, SchemaVersionOracle, Staker, StakingError, StakingLedger, APR_SAMPLES,
};
use tokio::time::Duration;

use crate::{
    archive::Archive,
    db::{BatchWrite, StakingDb, StakingDbObj},
};

#[derive(Clone)]
pub struct StakingIndexerServiceConfig {
    /// Blocks fetched from the archive per batch.
    pub batch_size: u64,
    pub interval: Duration,
    pub retries: u32,
    pub start_block: Option<u64>,
    pub end_block: Option<u64>,
}

/// Chain constants resolved once per batch, at the batch's first staking block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConstants {
    pub reward_payment_delay: u32,
    pub start_round_index: u32,
}

pub struct StakingIndexerService<A> {
    archive: A,
    db: StakingDbObj,
    oracle: SchemaVersionOracle,
    codec: HexAddressCodec,
    config: StakingIndexerServiceConfig,
}

impl<A: Archive> StakingIndexerService<A> {
    pub async fn new(archive: A, db_conn: &str, config: StakingIndexerServiceConfig) -> Result<Self> {
        let db: StakingDbObj = Arc::new(StakingDb::new(db_conn).await?);
        Ok(Self::with_db(archive, db, config))
    }

    pub fn with_db(archive: A, db: StakingDbObj, config: StakingIndexerServiceConfig) -> Self {
        Self { archive, db, oracle: SchemaVersionOracle::new(), codec: HexAddressCodec, config }
    }

    /// Indexes every block after the last committed one, up to the configured end block or the
    /// archive head.
    pub async fn run(&self) -> Result<()> {
        let start_time = Instant::now();
        tracing::info!("Starting staking indexer run");

        let Some(head) = self.archive.head().await? else {
            tracing::info!("Archive has no blocks yet");
            return Ok(());
        };
        let end_block = self.config.end_block.unwrap_or(head);
        if end_block > head {
            bail!("End block {} is greater than archive head {}", end_block, head);
        }

        let configured_start = self.config.start_block.unwrap_or(0);
        let from = match self.db.get_last_processed_block().await? {
            Some(last) => (last + 1).max(configured_start),
            None => configured_start,
        };
        if from > end_block {
            tracing::info!("No new blocks to index (next block {}, end {})", from, end_block);
            return Ok(());
        }

        tracing::info!(
            "Indexing blocks {} to {} ({} blocks)",
            from,
            end_block,
            end_block - from + 1
        );

        let batch_size = self.config.batch_size.max(1);
        let mut batch_start = from;
        while batch_start <= end_block {
            let batch_end = batch_start.saturating_add(batch_size - 1).min(end_block);
            let blocks = self.archive.blocks(batch_start, batch_end).await?;
            self.process_batch(&blocks, batch_end).await?;
            batch_start = batch_end + 1;
        }

        tracing::info!(
            "Staking indexer run completed successfully in {:.2}s",
            start_time.elapsed().as_secs_f64()
        );
        Ok(())
    }

    pub async fn chain_constants(&self, first: &BlockHeader) -> Result<ChainConstants> {
        let reader = CanonicalStorageReader::new(&self.archive, &self.oracle);
        let reward_payment_delay = reader.reward_payment_delay(&first.runtime)?;
        let round = reader
            .current_round(first)
            .await?
            .ok_or(StakingError::ItemAbsent { item: storage::ROUND, block: first.height })?;
        Ok(ChainConstants { reward_payment_delay, start_round_index: round.current })
    }

    /// Decodes, folds and commits one batch of ordered blocks. `last_block` is recorded as
    /// processed, even when no block in the batch carries staking events.
    pub async fn process_batch(&self, blocks: &[Block], last_block: u64) -> Result<()> {
        let batch_start = Instant::now();
        let blocks: Vec<&Block> = blocks
            .iter()
            .filter(|block| {
                block.events.iter().any(|e| CanonicalEventDecoder::is_staking_event(&e.name))
            })
            .collect();

        let Some(first) = blocks.first() else {
            tracing::debug!("No staking events up to block {}", last_block);
            self.db
                .commit_batch(BatchWrite {
                    last_processed_block: Some(last_block),
                    ..Default::default()
                })
                .await?;
            return Ok(());
        };

        let constants = self.chain_constants(&first.header).await?;
        tracing::info!(
            "Processing {} staking blocks from {} to {} (round {}, payment delay {})",
            blocks.len(),
            first.header.height,
            last_block,
            constants.start_round_index,
            constants.reward_payment_delay
        );

        let reader = CanonicalStorageReader::new(&self.archive, &self.oracle);
        let decoder = CanonicalEventDecoder::new(&self.oracle);
        let mut builder = RoundSnapshotBuilder::new(reader);
        let mut rounds = RoundEntities::default();
        let mut events = Vec::new();
        for block in &blocks {
            let decoded = decoder
                .decode_block(block)
                .with_context(|| format!("Failed to decode block {}", block.header.height))?;
            for event in &decoded {
                if let Some(snapshot) = builder.on_event(event, &block.header).await? {
                    rounds.extend(snapshot.to_entities(&self.codec));
                }
            }
            events.extend(decoded);
        }

        let mut per_kind: BTreeMap<CanonicalKind, usize> = BTreeMap::new();
        for event in &events {
            *per_kind.entry(event.payload.kind()).or_default() += 1;
        }
        tracing::info!("Decoded {} staking events: {:?}", events.len(), per_kind);
        if !rounds.rounds.is_empty() {
            tracing::info!(
                "Assembled {} rounds with {} collators and {} nominators",
                rounds.rounds.len(),
                rounds.collators.len(),
                rounds.nominators.len()
            );
        }

        let round_offset = constants.reward_payment_delay + APR_SAMPLES;
        let mut known_rounds: BTreeMap<u32, Round> = self
            .db
            .find_rounds_from(constants.start_round_index.saturating_sub(round_offset))
            .await?
            .into_iter()
            .map(|round| (round.index, round))
            .collect();
        for round in &rounds.rounds {
            known_rounds.insert(round.index, round.clone());
        }

        let mut ledger = StakingLedger::new(
            self.codec,
            constants.reward_payment_delay,
            RoundLocator::new(known_rounds.into_values().collect()),
        );
        let keys = ledger.required_keys(&events)?;

        let staker_ids: Vec<String> = keys
            .staker_ids
            .iter()
            .chain(rounds.staker_ids.iter())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let round_collator_ids: Vec<String> = keys.round_collator_ids.into_iter().collect();
        let collator_ids: Vec<String> = keys.collator_ids.into_iter().collect();
        let delegator_ids: Vec<String> = keys.delegator_ids.into_iter().collect();

        let (mut stakers, mut round_collators, collators, delegators) = futures_util::try_join!(
            self.db.find_stakers(&staker_ids),
            self.db.find_round_collators(&round_collator_ids),
            self.db.find_collators(&collator_ids),
            self.db.find_delegators(&delegator_ids),
        )?;

        let new_stakers: BTreeMap<String, Staker> = rounds
            .staker_ids
            .iter()
            .filter(|id| !stakers.contains_key(*id))
            .map(|id| (id.clone(), Staker::new(id.clone())))
            .collect();
        for (id, staker) in &new_stakers {
            stakers.insert(id.clone(), staker.clone());
        }
        for collator in &rounds.collators {
            round_collators.insert(collator.id.clone(), collator.clone());
        }

        ledger.preload(LedgerState { stakers, round_collators, collators, delegators });
        for event in &events {
            ledger.apply(event).with_context(|| format!("Failed to apply event {}", event.id))?;
        }
        let changes = ledger.finish();

        // APR updates to collators of a round assembled in this batch go into its insert.
        let new_positions: HashMap<String, usize> = rounds
            .collators
            .iter()
            .enumerate()
            .map(|(position, collator)| (collator.id.clone(), position))
            .collect();
        let mut updated_round_collators = Vec::new();
        for collator in changes.round_collators {
            match new_positions.get(&collator.id) {
                Some(&position) => rounds.collators[position] = collator,
                None => updated_round_collators.push(collator),
            }
        }

        let mut staker_writes = new_stakers;
        for staker in changes.stakers {
            staker_writes.insert(staker.id.clone(), staker);
        }

        tracing::info!(
            "Ledger touched {} stakers, attributed {} rewards, updated {} round collators",
            staker_writes.len(),
            changes.rewards.len(),
            updated_round_collators.len()
        );

        let batch = BatchWrite {
            rounds: rounds.rounds,
            round_collators: rounds.collators,
            round_nominators: rounds.nominators,
            round_nominations: rounds.nominations,
            rewards: changes.rewards,
            history_elements: changes.history_elements,
            stakers: staker_writes.into_values().collect(),
            updated_round_collators,
            collators: changes.collators,
            delegators: changes.delegators,
            last_processed_block: Some(last_block),
        };

        let commit_start = Instant::now();
        self.db
            .commit_batch(batch)
            .await
            .with_context(|| format!("Failed to commit batch ending at block {}", last_block))?;
        tracing::info!(
            "Committed batch in {:.2}s (total {:.2}s)",
            commit_start.elapsed().as_secs_f64(),
            batch_start.elapsed().as_secs_f64()
        );

        Ok(())
    }
}
