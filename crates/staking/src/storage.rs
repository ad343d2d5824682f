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

//! Version-aware reads of the staking pallet's storage.
//!
//! Storage items were renamed and reshaped several times over the chain's life. A logical item
//! is read through a chain of physical items, newest first: the first one the block's runtime
//! exposes is decoded with the layout matching its version.

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::future::try_join3;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use crate::{
    error::StakingError,
    names::{constant, storage},
    runtime::{ItemKind, RuntimeContext, SchemaVersionOracle, VersionTag},
    types::{
        AccountId, BlockHeader, CandidateState, Delegation, DelegatorState, RoundInfo,
        WireBalance, WireBond,
    },
    DEFAULT_REWARD_PAYMENT_DELAY,
};

/// Raw access to chain state at a given block.
#[async_trait]
pub trait ChainStorage: Send + Sync {
    /// Reads `item` for every key. The result has one entry per key, in key order.
    async fn get_many(
        &self,
        block: &BlockHeader,
        item: &str,
        keys: &[AccountId],
    ) -> anyhow::Result<Vec<Option<Value>>>;

    /// Reads a plain storage value.
    async fn get(&self, block: &BlockHeader, item: &str) -> anyhow::Result<Option<Value>>;
}

/// Keyed logical items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapItem {
    CandidateState,
    DelegatorState,
}

/// Plain logical items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueItem {
    SelectedCandidates,
    CurrentRound,
    CollatorCommission,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageValue {
    Candidate(CandidateState),
    Delegator(DelegatorState),
    Accounts(Vec<AccountId>),
    Round(RoundInfo),
    Commission(u32),
}

const CANDIDATE_CHAIN: &[&str] = &[
    storage::CANDIDATE_INFO,
    storage::CANDIDATE_STATE,
    storage::COLLATOR_STATE2,
    storage::COLLATOR_STATE,
];

const DELEGATOR_CHAIN: &[&str] =
    &[storage::DELEGATOR_STATE, storage::NOMINATOR_STATE2, storage::NOMINATOR_STATE];

#[derive(Deserialize)]
struct CandidateInfoWire {
    bond: WireBalance,
}

#[derive(Deserialize)]
struct DelegationsWire {
    delegations: Vec<WireBond>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateStateWire {
    bond: WireBalance,
    #[serde(alias = "topNominators")]
    top_delegations: Vec<WireBond>,
    #[serde(alias = "bottomNominators")]
    bottom_delegations: Vec<WireBond>,
}

#[derive(Deserialize)]
struct CollatorStateWire {
    bond: WireBalance,
    nominators: Vec<WireBond>,
}

#[derive(Deserialize)]
struct DelegatorStateWire {
    #[serde(alias = "nominations")]
    delegations: Vec<WireBond>,
    total: WireBalance,
}

fn bonds(list: Vec<WireBond>) -> Vec<Delegation> {
    list.into_iter().map(Delegation::from).collect()
}

fn decode<T: DeserializeOwned>(
    name: &str,
    version: VersionTag,
    value: Value,
) -> Result<T, StakingError> {
    serde_json::from_value(value).map_err(|source| StakingError::Payload {
        name: name.to_string(),
        version,
        source,
    })
}

fn decode_each<T, W: DeserializeOwned>(
    name: &str,
    version: VersionTag,
    values: Vec<Option<Value>>,
    convert: impl Fn(W) -> T,
) -> Result<Vec<Option<T>>, StakingError> {
    values
        .into_iter()
        .map(|value| value.map(|v| decode::<W>(name, version, v).map(&convert)).transpose())
        .collect()
}

fn unknown_layout(name: &str, runtime: &RuntimeContext) -> StakingError {
    StakingError::UnknownVersion {
        kind: ItemKind::Storage,
        name: name.to_string(),
        hash: runtime.type_hash(ItemKind::Storage, name),
    }
}

/// Reads canonical staking state regardless of the storage layout active at a block.
///
/// Every method returns `Ok(None)` when no item of the fallback chain exists in the block's
/// runtime, which is distinct from a present item with no entry for a key.
pub struct CanonicalStorageReader<'a, S: ?Sized> {
    storage: &'a S,
    oracle: &'a SchemaVersionOracle,
}

impl<S: ?Sized> Clone for CanonicalStorageReader<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: ?Sized> Copy for CanonicalStorageReader<'_, S> {}

impl<'a, S: ChainStorage + ?Sized> CanonicalStorageReader<'a, S> {
    pub fn new(storage: &'a S, oracle: &'a SchemaVersionOracle) -> Self {
        Self { storage, oracle }
    }

    fn first_present(
        &self,
        chain: &[&'static str],
        runtime: &RuntimeContext,
    ) -> Result<Option<(&'static str, VersionTag)>, StakingError> {
        for &name in chain {
            if let Some(version) = self.oracle.resolve(ItemKind::Storage, name, runtime)? {
                return Ok(Some((name, version)));
            }
        }
        Ok(None)
    }

    async fn fetch_many(
        &self,
        block: &BlockHeader,
        item: &str,
        keys: &[AccountId],
    ) -> Result<Vec<Option<Value>>, StakingError> {
        let values = self.storage.get_many(block, item, keys).await?;
        if values.len() != keys.len() {
            return Err(StakingError::Storage(anyhow!(
                "{item} returned {} values for {} keys at block {}",
                values.len(),
                keys.len(),
                block.height
            )));
        }
        Ok(values)
    }

    pub async fn read_many(
        &self,
        item: MapItem,
        block: &BlockHeader,
        keys: &[AccountId],
    ) -> Result<Option<Vec<Option<StorageValue>>>, StakingError> {
        Ok(match item {
            MapItem::CandidateState => self.candidate_states(block, keys).await?.map(|states| {
                states.into_iter().map(|s| s.map(StorageValue::Candidate)).collect()
            }),
            MapItem::DelegatorState => self.delegator_states(block, keys).await?.map(|states| {
                states.into_iter().map(|s| s.map(StorageValue::Delegator)).collect()
            }),
        })
    }

    pub async fn read_single(
        &self,
        item: ValueItem,
        block: &BlockHeader,
    ) -> Result<Option<StorageValue>, StakingError> {
        Ok(match item {
            ValueItem::SelectedCandidates => {
                self.selected_candidates(block).await?.map(StorageValue::Accounts)
            }
            ValueItem::CurrentRound => self.current_round(block).await?.map(StorageValue::Round),
            ValueItem::CollatorCommission => {
                self.collator_commission(block).await?.map(StorageValue::Commission)
            }
        })
    }

    /// Candidate states for `keys`, in key order.
    pub async fn candidate_states(
        &self,
        block: &BlockHeader,
        keys: &[AccountId],
    ) -> Result<Option<Vec<Option<CandidateState>>>, StakingError> {
        let Some((name, version)) = self.first_present(CANDIDATE_CHAIN, &block.runtime)? else {
            return Ok(None);
        };

        let states = match (name, version.0) {
            (storage::CANDIDATE_INFO, 1201) => self.composed_candidates(block, keys).await?,
            (storage::CANDIDATE_STATE, 1001) | (storage::COLLATOR_STATE2, 53) => {
                let values = self.fetch_many(block, name, keys).await?;
                decode_each(name, version, values, |w: CandidateStateWire| CandidateState {
                    bond: w.bond.0,
                    top_delegations: bonds(w.top_delegations),
                    bottom_delegations: bonds(w.bottom_delegations),
                })?
            }
            (storage::COLLATOR_STATE, 49) => {
                let values = self.fetch_many(block, name, keys).await?;
                decode_each(name, version, values, |w: CollatorStateWire| CandidateState {
                    bond: w.bond.0,
                    top_delegations: bonds(w.nominators),
                    bottom_delegations: Vec::new(),
                })?
            }
            _ => return Err(unknown_layout(name, &block.runtime)),
        };
        Ok(Some(states))
    }

    /// Candidate metadata plus both delegation tiers, stored as three separate maps.
    async fn composed_candidates(
        &self,
        block: &BlockHeader,
        keys: &[AccountId],
    ) -> Result<Vec<Option<CandidateState>>, StakingError> {
        for tier in [storage::TOP_DELEGATIONS, storage::BOTTOM_DELEGATIONS] {
            match self.oracle.resolve(ItemKind::Storage, tier, &block.runtime)? {
                Some(VersionTag(1201)) => {}
                Some(_) => return Err(unknown_layout(tier, &block.runtime)),
                None => return Err(StakingError::ItemAbsent { item: tier, block: block.height }),
            }
        }

        let (infos, tops, bottoms) = try_join3(
            self.fetch_many(block, storage::CANDIDATE_INFO, keys),
            self.fetch_many(block, storage::TOP_DELEGATIONS, keys),
            self.fetch_many(block, storage::BOTTOM_DELEGATIONS, keys),
        )
        .await?;

        let version = VersionTag(1201);
        let infos =
            decode_each(storage::CANDIDATE_INFO, version, infos, |w: CandidateInfoWire| w.bond.0)?;
        let tops =
            decode_each(storage::TOP_DELEGATIONS, version, tops, |w: DelegationsWire| w.delegations)?;
        let bottoms = decode_each(storage::BOTTOM_DELEGATIONS, version, bottoms, |w: DelegationsWire| {
            w.delegations
        })?;

        let missing = |item: &'static str, account: &AccountId| StakingError::MissingState {
            item,
            account: format!("{account:#x}"),
            block: block.height,
        };

        keys.iter()
            .zip(infos)
            .zip(tops.into_iter().zip(bottoms))
            .map(|((account, bond), (top, bottom))| {
                let Some(bond) = bond else {
                    return Ok(None);
                };
                let top = top.ok_or_else(|| missing(storage::TOP_DELEGATIONS, account))?;
                let bottom = bottom.ok_or_else(|| missing(storage::BOTTOM_DELEGATIONS, account))?;
                Ok(Some(CandidateState {
                    bond,
                    top_delegations: bonds(top),
                    bottom_delegations: bonds(bottom),
                }))
            })
            .collect()
    }

    /// Delegator states for `keys`, in key order.
    pub async fn delegator_states(
        &self,
        block: &BlockHeader,
        keys: &[AccountId],
    ) -> Result<Option<Vec<Option<DelegatorState>>>, StakingError> {
        let Some((name, version)) = self.first_present(DELEGATOR_CHAIN, &block.runtime)? else {
            return Ok(None);
        };

        match (name, version.0) {
            (storage::DELEGATOR_STATE, 1001 | 1502)
            | (storage::NOMINATOR_STATE2, 200 | 1001)
            | (storage::NOMINATOR_STATE, 49) => {
                let values = self.fetch_many(block, name, keys).await?;
                let states = decode_each(name, version, values, |w: DelegatorStateWire| {
                    DelegatorState { total: w.total.0, delegations: bonds(w.delegations) }
                })?;
                Ok(Some(states))
            }
            _ => Err(unknown_layout(name, &block.runtime)),
        }
    }

    async fn read_value<T: DeserializeOwned>(
        &self,
        block: &BlockHeader,
        name: &'static str,
        known: VersionTag,
    ) -> Result<Option<T>, StakingError> {
        let Some(version) = self.oracle.resolve(ItemKind::Storage, name, &block.runtime)? else {
            return Ok(None);
        };
        if version != known {
            return Err(unknown_layout(name, &block.runtime));
        }
        let value = self
            .storage
            .get(block, name)
            .await?
            .ok_or(StakingError::ItemAbsent { item: name, block: block.height })?;
        decode(name, version, value).map(Some)
    }

    pub async fn selected_candidates(
        &self,
        block: &BlockHeader,
    ) -> Result<Option<Vec<AccountId>>, StakingError> {
        self.read_value(block, storage::SELECTED_CANDIDATES, VersionTag(49)).await
    }

    pub async fn current_round(
        &self,
        block: &BlockHeader,
    ) -> Result<Option<RoundInfo>, StakingError> {
        self.read_value(block, storage::ROUND, VersionTag(49)).await
    }

    /// Flat collator commission, in parts per billion.
    pub async fn collator_commission(
        &self,
        block: &BlockHeader,
    ) -> Result<Option<u32>, StakingError> {
        self.read_value(block, storage::COLLATOR_COMMISSION, VersionTag(49)).await
    }

    /// Number of rounds between a round and the payout of its rewards. Runtimes that predate the
    /// constant use the pallet default.
    pub fn reward_payment_delay(&self, runtime: &RuntimeContext) -> Result<u32, StakingError> {
        let name = constant::REWARD_PAYMENT_DELAY;
        match self.oracle.resolve(ItemKind::Constant, name, runtime)? {
            None => Ok(DEFAULT_REWARD_PAYMENT_DELAY),
            Some(version @ VersionTag(200)) => {
                let value = runtime.constant_value(name).cloned().unwrap_or(Value::Null);
                decode(name, version, value)
            }
            Some(_) => Err(StakingError::UnknownVersion {
                kind: ItemKind::Constant,
                name: name.to_string(),
                hash: runtime.type_hash(ItemKind::Constant, name),
            }),
        }
    }
}
