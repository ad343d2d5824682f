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

//! Running staker balances, delayed reward attribution and collator APR.

use std::collections::{BTreeSet, HashMap};

use crate::{
    codec::AddressCodec,
    entities::{
        round_collator_id, Collator, Delegator, HistoryElement, HistoryKind, Reward, Round,
        RoundCollator, Staker, StakerRole,
    },
    error::StakingError,
    events::{CanonicalEvent, EventPayload},
    types::Balance,
    PERIODS_PER_YEAR,
};

/// Number of payouts averaged into [`Staker::apr24h`].
pub const APR_SAMPLES: u32 = 4;

/// Share of a round's reward kept by a collator regardless of its stake.
const COLLATOR_FLAT_SHARE: f64 = 0.2;
/// Weight of the collator's own stake proportion in its reward share.
const COLLATOR_STAKE_WEIGHT: f64 = 0.5;

/// Finds the round active at a block height.
#[derive(Debug, Clone, Default)]
pub struct RoundLocator {
    rounds: Vec<Round>,
    cache: HashMap<u64, usize>,
}

impl RoundLocator {
    pub fn new(mut rounds: Vec<Round>) -> Self {
        rounds.sort_by_key(|r| r.index);
        rounds.dedup_by_key(|r| r.index);
        Self { rounds, cache: HashMap::new() }
    }

    pub fn earliest_start(&self) -> Option<u64> {
        self.rounds.first().map(|r| r.started_at)
    }

    /// The latest round that started at or before `height`.
    pub fn round_for(&mut self, height: u64) -> Result<&Round, StakingError> {
        let position = match self.cache.get(&height) {
            Some(&position) => position,
            None => {
                let after = self.rounds.partition_point(|r| r.started_at <= height);
                if after == 0 {
                    return Err(StakingError::RoundLookupFailure {
                        height,
                        earliest: self.earliest_start(),
                    });
                }
                self.cache.insert(height, after - 1);
                after - 1
            }
        };
        Ok(&self.rounds[position])
    }
}

/// Ids of every persisted entity the ledger may read while folding a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerKeys {
    pub staker_ids: BTreeSet<String>,
    pub round_collator_ids: BTreeSet<String>,
    pub collator_ids: BTreeSet<String>,
    pub delegator_ids: BTreeSet<String>,
}

/// Previously persisted state loaded for [`LedgerKeys`].
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    pub stakers: HashMap<String, Staker>,
    pub round_collators: HashMap<String, RoundCollator>,
    pub collators: HashMap<String, Collator>,
    pub delegators: HashMap<String, Delegator>,
}

/// Everything a fold produced that must be written.
#[derive(Debug, Clone, Default)]
pub struct LedgerChanges {
    pub stakers: Vec<Staker>,
    pub round_collators: Vec<RoundCollator>,
    pub collators: Vec<Collator>,
    pub delegators: Vec<Delegator>,
    pub history_elements: Vec<HistoryElement>,
    pub rewards: Vec<Reward>,
}

/// Folds canonical staking events, in chain order, into staker balances and reward history.
pub struct StakingLedger<C> {
    codec: C,
    reward_payment_delay: u32,
    rounds: RoundLocator,
    state: LedgerState,
    touched_stakers: BTreeSet<String>,
    touched_round_collators: BTreeSet<String>,
    new_collators: BTreeSet<String>,
    new_delegators: BTreeSet<String>,
    history_elements: Vec<HistoryElement>,
    rewards: Vec<Reward>,
}

/// `bond` moved by `amount`, or `None` when the result does not fit.
fn adjust(bond: i128, amount: Balance, is_decrease: bool) -> Option<i128> {
    let amount = i128::try_from(amount).ok()?;
    if is_decrease {
        bond.checked_sub(amount)
    } else {
        bond.checked_add(amount)
    }
}

impl<C: AddressCodec> StakingLedger<C> {
    pub fn new(codec: C, reward_payment_delay: u32, rounds: RoundLocator) -> Self {
        Self {
            codec,
            reward_payment_delay,
            rounds,
            state: LedgerState::default(),
            touched_stakers: BTreeSet::new(),
            touched_round_collators: BTreeSet::new(),
            new_collators: BTreeSet::new(),
            new_delegators: BTreeSet::new(),
            history_elements: Vec::new(),
            rewards: Vec::new(),
        }
    }

    /// Round a reward paid during `paid_round` was earned in, or `None` when `paid_round` is too
    /// early for any round to have been earned.
    pub fn earned_round(&self, paid_round: u32) -> Option<u32> {
        paid_round.checked_sub(self.reward_payment_delay + 2)
    }

    /// Collects the ids [`Self::apply`] will look up for `events`.
    pub fn required_keys(&mut self, events: &[CanonicalEvent]) -> Result<LedgerKeys, StakingError> {
        let mut keys = LedgerKeys::default();
        for event in events {
            match &event.payload {
                EventPayload::NewRound { .. } => {}
                EventPayload::BondChanged { account, .. }
                | EventPayload::Compounded { account, .. } => {
                    keys.staker_ids.insert(self.codec.encode(account));
                }
                EventPayload::DelegationChanged { delegator, candidate, .. } => {
                    let delegator = self.codec.encode(delegator);
                    keys.collator_ids.insert(self.codec.encode(candidate));
                    keys.delegator_ids.insert(delegator.clone());
                    keys.staker_ids.insert(delegator);
                }
                EventPayload::Rewarded { account, .. } => {
                    let paid_round = self.rounds.round_for(event.block_height)?.index;
                    let id = self.codec.encode(account);
                    if let Some(earned) = self.earned_round(paid_round) {
                        for back in 0..=APR_SAMPLES {
                            if let Some(round) = earned.checked_sub(back) {
                                keys.round_collator_ids.insert(round_collator_id(round, &id));
                            }
                        }
                    }
                    keys.staker_ids.insert(id);
                }
            }
        }
        Ok(keys)
    }

    /// Seeds the ledger with persisted state. Entries already present are kept.
    pub fn preload(&mut self, state: LedgerState) {
        for (id, staker) in state.stakers {
            self.state.stakers.entry(id).or_insert(staker);
        }
        for (id, rc) in state.round_collators {
            self.state.round_collators.entry(id).or_insert(rc);
        }
        for (id, collator) in state.collators {
            self.state.collators.entry(id).or_insert(collator);
        }
        for (id, delegator) in state.delegators {
            self.state.delegators.entry(id).or_insert(delegator);
        }
    }

    pub fn staker(&self, id: &str) -> Option<&Staker> {
        self.state.stakers.get(id)
    }

    pub fn round_collator(&self, id: &str) -> Option<&RoundCollator> {
        self.state.round_collators.get(id)
    }

    fn staker_mut(&mut self, id: &str) -> &mut Staker {
        self.touched_stakers.insert(id.to_string());
        self.state.stakers.entry(id.to_string()).or_insert_with(|| Staker::new(id))
    }

    pub fn apply(&mut self, event: &CanonicalEvent) -> Result<(), StakingError> {
        let round_index = match event.payload {
            EventPayload::NewRound { .. } => return Ok(()),
            _ => self.rounds.round_for(event.block_height)?.index,
        };
        let overflow = |staker_id: &str| StakingError::BalanceOverflow {
            account: staker_id.to_string(),
            block: event.block_height,
        };
        let history = |kind, staker_id: &str, amount| HistoryElement {
            id: event.id.clone(),
            block_number: event.block_height,
            timestamp: event.timestamp,
            kind,
            round_index,
            staker_id: staker_id.to_string(),
            amount,
            delegator_id: None,
            collator_id: None,
        };

        match event.payload {
            EventPayload::NewRound { .. } => {}
            EventPayload::BondChanged { account, amount, new_total, is_decrease } => {
                let id = self.codec.encode(&account);
                let staker = self.staker_mut(&id);
                staker.role = StakerRole::Collator;
                staker.active_bond = i128::try_from(new_total).map_err(|_| overflow(&id))?;

                let kind = if is_decrease { HistoryKind::Unstake } else { HistoryKind::Stake };
                self.history_elements.push(history(kind, &id, amount));
            }
            EventPayload::DelegationChanged { delegator, candidate, amount, is_decrease } => {
                let id = self.codec.encode(&delegator);
                let collator_id = self.codec.encode(&candidate);
                let staker = self.staker_mut(&id);
                staker.role = StakerRole::Delegator;
                staker.active_bond =
                    adjust(staker.active_bond, amount, is_decrease).ok_or_else(|| overflow(&id))?;

                if !self.state.delegators.contains_key(&id) {
                    self.state.delegators.insert(id.clone(), Delegator { id: id.clone() });
                    self.new_delegators.insert(id.clone());
                }
                if !self.state.collators.contains_key(&collator_id) {
                    self.state
                        .collators
                        .insert(collator_id.clone(), Collator { id: collator_id.clone() });
                    self.new_collators.insert(collator_id.clone());
                }

                let kind = if is_decrease { HistoryKind::Unstake } else { HistoryKind::Stake };
                let mut element = history(kind, &id, amount);
                element.delegator_id = Some(id);
                element.collator_id = Some(collator_id);
                self.history_elements.push(element);
            }
            EventPayload::Compounded { account, amount } => {
                let id = self.codec.encode(&account);
                let staker = self.staker_mut(&id);
                staker.active_bond =
                    adjust(staker.active_bond, amount, false).ok_or_else(|| overflow(&id))?;
                self.history_elements.push(history(HistoryKind::Compound, &id, amount));
            }
            EventPayload::Rewarded { account, amount } => {
                let id = self.codec.encode(&account);
                let earned = self.earned_round(round_index);
                let staker = self.staker_mut(&id);
                staker.active_bond =
                    adjust(staker.active_bond, amount, false).ok_or_else(|| overflow(&id))?;
                staker.total_reward =
                    staker.total_reward.checked_add(amount).ok_or_else(|| overflow(&id))?;
                let role = staker.role;
                let stash_id = staker.stash_id.clone();

                self.history_elements.push(history(HistoryKind::Reward, &id, amount));
                let Some(earned) = earned else {
                    tracing::debug!(
                        "Reward {} paid in round {} predates any earned round, not attributed",
                        event.id,
                        round_index
                    );
                    return Ok(());
                };
                self.rewards.push(Reward {
                    id: event.id.clone(),
                    account_id: id.clone(),
                    staker_id: id.clone(),
                    amount,
                    round: earned,
                    block_number: event.block_height,
                    timestamp: event.timestamp,
                });

                if role == StakerRole::Collator {
                    self.update_apr(&id, &stash_id, earned, amount);
                }
            }
        }
        Ok(())
    }

    fn sample_apr(&self, stash_id: &str, round: Option<u32>) -> Option<f64> {
        let round = round?;
        self.state.round_collators.get(&round_collator_id(round, stash_id)).and_then(|rc| rc.apr)
    }

    /// Writes the APR of the collator's `earned` round and slides `apr24h`.
    ///
    /// The average spans [`APR_SAMPLES`] earned rounds whatever the payment delay: the sample
    /// leaving the window is the one earned at `earned - APR_SAMPLES`.
    fn update_apr(&mut self, staker_id: &str, stash_id: &str, earned: u32, amount: Balance) {
        let key = round_collator_id(earned, stash_id);
        let Some(rc) = self.state.round_collators.get_mut(&key) else {
            tracing::debug!("No round collator {} for reward, skipping APR", key);
            return;
        };
        if rc.own_bond == 0 || rc.total_bond == 0 {
            tracing::debug!("Round collator {} has no bond, skipping APR", key);
            return;
        }

        let own_bond = rc.own_bond as f64;
        let stake_share = own_bond / rc.total_bond as f64;
        let implied_total_due =
            amount as f64 / (COLLATOR_FLAT_SHARE + COLLATOR_STAKE_WEIGHT * stake_share);
        let collator_portion = COLLATOR_FLAT_SHARE * implied_total_due
            + COLLATOR_STAKE_WEIGHT * implied_total_due * stake_share;
        let annual = collator_portion * PERIODS_PER_YEAR;
        let apr = annual / own_bond;

        rc.apr = Some(apr);
        rc.apr_techn_numerator = Some(annual);
        rc.apr_techn_denominator = Some(own_bond);
        rc.reward_amount = Some(amount);
        self.touched_round_collators.insert(key);

        // Missing samples count as zero.
        let dropped_round = earned.checked_sub(APR_SAMPLES);
        let dropped_exists = dropped_round
            .map(|r| self.state.round_collators.contains_key(&round_collator_id(r, stash_id)))
            .unwrap_or(false);
        let dropped_apr = self.sample_apr(stash_id, dropped_round).unwrap_or(0.0);
        let current_avg = self.state.stakers.get(staker_id).and_then(|s| s.apr24h).unwrap_or(0.0);

        let apr24h = if !dropped_exists || dropped_apr <= 0.0 {
            apr / APR_SAMPLES as f64
        } else if current_avg * APR_SAMPLES as f64 > 0.0 {
            (current_avg * APR_SAMPLES as f64 - dropped_apr + apr) / APR_SAMPLES as f64
        } else {
            let previous: f64 = (1..APR_SAMPLES)
                .map(|back| self.sample_apr(stash_id, earned.checked_sub(back)).unwrap_or(0.0))
                .sum();
            (previous + apr) / APR_SAMPLES as f64
        };

        if let Some(staker) = self.state.stakers.get_mut(staker_id) {
            staker.apr24h = Some(apr24h);
        }
    }

    /// Rows to persist. Only entities touched by the fold are returned.
    pub fn finish(mut self) -> LedgerChanges {
        let stakers = self
            .touched_stakers
            .iter()
            .filter_map(|id| self.state.stakers.remove(id))
            .collect();
        let round_collators = self
            .touched_round_collators
            .iter()
            .filter_map(|id| self.state.round_collators.remove(id))
            .collect();
        let collators = self
            .new_collators
            .iter()
            .filter_map(|id| self.state.collators.remove(id))
            .collect();
        let delegators = self
            .new_delegators
            .iter()
            .filter_map(|id| self.state.delegators.remove(id))
            .collect();

        LedgerChanges {
            stakers,
            round_collators,
            collators,
            delegators,
            history_elements: self.history_elements,
            rewards: self.rewards,
        }
    }
}
