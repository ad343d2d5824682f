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

//! Point-in-time snapshots of the active collator set, taken when a round starts.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::{
    codec::AddressCodec,
    entities::{
        round_collator_id, round_nomination_id, round_nominator_id, Round, RoundCollator,
        RoundNomination, RoundNominator,
    },
    error::StakingError,
    events::{CanonicalEvent, EventPayload},
    storage::{CanonicalStorageReader, ChainStorage},
    types::{AccountId, Balance, BlockHeader, CandidateState, DelegatorState},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSnapshot {
    pub index: u32,
    pub timestamp: DateTime<Utc>,
    pub started_at: u64,
    pub collator_count: u32,
    pub total_stake: Balance,
    pub collator_commission: Option<u32>,
    /// Selected collators, in selection order.
    pub collators: Vec<(AccountId, CandidateState)>,
    /// Every delegator backing a selected collator, in first-seen order.
    pub delegators: Vec<(AccountId, DelegatorState)>,
}

/// Rows derived from one [`RoundSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct RoundEntities {
    pub rounds: Vec<Round>,
    pub collators: Vec<RoundCollator>,
    pub nominators: Vec<RoundNominator>,
    pub nominations: Vec<RoundNomination>,
    /// Staker ids referenced by the rows above.
    pub staker_ids: Vec<String>,
}

impl RoundEntities {
    pub fn extend(&mut self, other: RoundEntities) {
        self.rounds.extend(other.rounds);
        self.collators.extend(other.collators);
        self.nominators.extend(other.nominators);
        self.nominations.extend(other.nominations);
        self.staker_ids.extend(other.staker_ids);
    }
}

impl RoundSnapshot {
    pub fn to_entities(&self, codec: &impl AddressCodec) -> RoundEntities {
        let index = self.index;
        let mut entities = RoundEntities {
            rounds: vec![Round {
                index,
                timestamp: self.timestamp,
                started_at: self.started_at,
                collators_count: self.collator_count,
                total: self.total_stake,
                collator_commission: self.collator_commission,
            }],
            ..Default::default()
        };

        let mut nominators: HashMap<String, RoundNominator> = HashMap::new();
        let mut nominator_order = Vec::with_capacity(self.delegators.len());
        for (account, state) in &self.delegators {
            let id = codec.encode(account);
            nominators.insert(
                id.clone(),
                RoundNominator {
                    id: round_nominator_id(index, &id),
                    round_index: index,
                    staker_id: id.clone(),
                    bond: state.total,
                    collators_count: 0,
                },
            );
            nominator_order.push(id);
        }

        let mut backed: HashSet<(String, String)> = HashSet::new();
        for (account, state) in &self.collators {
            let collator_id = codec.encode(account);
            let collator = RoundCollator {
                id: round_collator_id(index, &collator_id),
                round_index: index,
                staker_id: collator_id.clone(),
                own_bond: state.bond,
                total_bond: state.total_backing(),
                nominators_count: state.delegations().count() as u32,
                reward_amount: None,
                apr: None,
                apr_techn_numerator: None,
                apr_techn_denominator: None,
            };

            for delegation in state.delegations() {
                let nominator_id = codec.encode(&delegation.owner);
                if let Some(nominator) = nominators.get_mut(&nominator_id) {
                    if backed.insert((collator_id.clone(), nominator_id.clone())) {
                        nominator.collators_count += 1;
                    }
                    entities.nominations.push(RoundNomination {
                        id: round_nomination_id(index, &collator_id, &nominator_id),
                        round_index: index,
                        collator_id: collator.id.clone(),
                        nominator_id: nominator.id.clone(),
                        amount: delegation.amount,
                    });
                }
            }

            entities.staker_ids.push(collator_id);
            entities.collators.push(collator);
        }

        for id in nominator_order {
            if let Some(nominator) = nominators.remove(&id) {
                entities.nominators.push(nominator);
                entities.staker_ids.push(id);
            }
        }

        entities
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuilderState {
    #[default]
    Idle,
    Assembling {
        round_index: u32,
        block: u64,
    },
}

/// Assembles a [`RoundSnapshot`] from the storage reads a `NewRound` event triggers. All reads
/// are made at the block holding the event.
pub struct RoundSnapshotBuilder<'a, S: ?Sized> {
    reader: CanonicalStorageReader<'a, S>,
    state: BuilderState,
}

impl<'a, S: ChainStorage + ?Sized> RoundSnapshotBuilder<'a, S> {
    pub fn new(reader: CanonicalStorageReader<'a, S>) -> Self {
        Self { reader, state: BuilderState::Idle }
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    /// Builds the snapshot for `event`, which must be a `NewRound` event found in `header`'s
    /// block. Returns `Ok(None)` for any other event, and for a round whose block does not
    /// expose the selected candidates.
    pub async fn on_event(
        &mut self,
        event: &CanonicalEvent,
        header: &BlockHeader,
    ) -> Result<Option<RoundSnapshot>, StakingError> {
        let EventPayload::NewRound { starting_block, round_index, total_stake, .. } = event.payload
        else {
            return Ok(None);
        };

        self.state = BuilderState::Assembling { round_index, block: header.height };
        let result = self.assemble(header, round_index, starting_block, total_stake).await;
        self.state = BuilderState::Idle;
        result
    }

    async fn assemble(
        &self,
        header: &BlockHeader,
        index: u32,
        started_at: u64,
        total_stake: Balance,
    ) -> Result<Option<RoundSnapshot>, StakingError> {
        let block = header.height;
        let absent = |item| StakingError::ItemAbsent { item, block };
        let missing = |item, account: &AccountId| StakingError::MissingState {
            item,
            account: format!("{account:#x}"),
            block,
        };

        let Some(selected) = self.reader.selected_candidates(header).await? else {
            tracing::debug!("No selected candidates at block {}, skipping round {}", block, index);
            return Ok(None);
        };

        let candidate_states = self
            .reader
            .candidate_states(header, &selected)
            .await?
            .ok_or_else(|| absent("CandidateState"))?;
        let collators = selected
            .iter()
            .zip(candidate_states)
            .map(|(account, state)| {
                state.map(|s| (*account, s)).ok_or_else(|| missing("CandidateState", account))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        let delegator_ids: Vec<AccountId> = collators
            .iter()
            .flat_map(|(_, state)| state.delegations().map(|d| d.owner))
            .filter(|owner| seen.insert(*owner))
            .collect();

        let delegator_states = self
            .reader
            .delegator_states(header, &delegator_ids)
            .await?
            .ok_or_else(|| absent("DelegatorState"))?;
        let delegators = delegator_ids
            .iter()
            .zip(delegator_states)
            .map(|(account, state)| {
                state.map(|s| (*account, s)).ok_or_else(|| missing("DelegatorState", account))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let collator_commission = self.reader.collator_commission(header).await?;

        tracing::debug!(
            "Assembled round {} at block {}: {} collators, {} delegators",
            index,
            block,
            collators.len(),
            delegators.len()
        );

        Ok(Some(RoundSnapshot {
            index,
            timestamp: header.timestamp,
            started_at,
            collator_count: selected.len() as u32,
            total_stake,
            collator_commission,
            collators,
            delegators,
        }))
    }
}
