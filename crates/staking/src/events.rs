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

//! Decoding of staking events into a version-independent shape.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{
    de::{self, IgnoredAny, Unexpected},
    Deserialize,
};
use serde_json::Value;

use crate::{
    error::StakingError,
    names::event,
    runtime::{ItemKind, SchemaVersionOracle, VersionTag},
    types::{AccountId, Balance, Block, BlockHeader, RawEvent, WireBalance},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CanonicalKind {
    NewRound,
    BondChanged,
    DelegationChanged,
    Rewarded,
    Compounded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    NewRound { starting_block: u64, round_index: u32, collators_selected: u32, total_stake: Balance },
    BondChanged { account: AccountId, amount: Balance, new_total: Balance, is_decrease: bool },
    DelegationChanged { delegator: AccountId, candidate: AccountId, amount: Balance, is_decrease: bool },
    Rewarded { account: AccountId, amount: Balance },
    Compounded { account: AccountId, amount: Balance },
}

impl EventPayload {
    pub fn kind(&self) -> CanonicalKind {
        match self {
            EventPayload::NewRound { .. } => CanonicalKind::NewRound,
            EventPayload::BondChanged { .. } => CanonicalKind::BondChanged,
            EventPayload::DelegationChanged { .. } => CanonicalKind::DelegationChanged,
            EventPayload::Rewarded { .. } => CanonicalKind::Rewarded,
            EventPayload::Compounded { .. } => CanonicalKind::Compounded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    pub id: String,
    pub block_height: u64,
    pub timestamp: DateTime<Utc>,
    /// Position within the block.
    pub index: u32,
    pub payload: EventPayload,
}

type DecodeFn = fn(&Value, bool) -> serde_json::Result<EventPayload>;

struct VersionDecoder {
    version: VersionTag,
    decode: DecodeFn,
}

const fn at(version: u32, decode: DecodeFn) -> VersionDecoder {
    VersionDecoder { version: VersionTag(version), decode }
}

struct WireName {
    name: &'static str,
    kind: CanonicalKind,
    /// Newest name of the rename chain this wire name belongs to.
    family: &'static str,
    /// Position in the rename chain, higher is newer.
    generation: u8,
    is_decrease: bool,
    decoders: &'static [VersionDecoder],
}

static WIRE_NAMES: &[WireName] = &[
    WireName {
        name: event::NEW_ROUND,
        kind: CanonicalKind::NewRound,
        family: event::NEW_ROUND,
        generation: 0,
        is_decrease: false,
        decoders: &[at(49, new_round_positional), at(1300, new_round_named)],
    },
    WireName {
        name: event::JOINED_COLLATOR_CANDIDATES,
        kind: CanonicalKind::BondChanged,
        family: event::JOINED_COLLATOR_CANDIDATES,
        generation: 0,
        is_decrease: false,
        decoders: &[at(49, bond_positional), at(1300, joined_named)],
    },
    WireName {
        name: event::COLLATOR_BONDED_MORE,
        kind: CanonicalKind::BondChanged,
        family: event::CANDIDATE_BONDED_MORE,
        generation: 0,
        is_decrease: false,
        decoders: &[at(49, bond_positional)],
    },
    WireName {
        name: event::CANDIDATE_BONDED_MORE,
        kind: CanonicalKind::BondChanged,
        family: event::CANDIDATE_BONDED_MORE,
        generation: 1,
        is_decrease: false,
        decoders: &[at(1001, bond_positional), at(1300, bonded_more_named)],
    },
    WireName {
        name: event::COLLATOR_BONDED_LESS,
        kind: CanonicalKind::BondChanged,
        family: event::CANDIDATE_BONDED_LESS,
        generation: 0,
        is_decrease: true,
        decoders: &[at(49, bond_positional)],
    },
    WireName {
        name: event::CANDIDATE_BONDED_LESS,
        kind: CanonicalKind::BondChanged,
        family: event::CANDIDATE_BONDED_LESS,
        generation: 1,
        is_decrease: true,
        decoders: &[at(1001, bond_positional), at(1300, bonded_less_named)],
    },
    WireName {
        name: event::NOMINATION,
        kind: CanonicalKind::DelegationChanged,
        family: event::DELEGATION,
        generation: 0,
        is_decrease: false,
        decoders: &[
            at(49, delegation_positional),
            at(53, delegation_positional),
            at(155, delegation_positional),
            at(900, delegation_positional),
        ],
    },
    WireName {
        name: event::DELEGATION,
        kind: CanonicalKind::DelegationChanged,
        family: event::DELEGATION,
        generation: 1,
        is_decrease: false,
        decoders: &[
            at(1001, delegation_positional),
            at(1300, delegation_named),
            at(1901, delegation_named),
        ],
    },
    WireName {
        name: event::NOMINATION_INCREASED,
        kind: CanonicalKind::DelegationChanged,
        family: event::DELEGATION_INCREASED,
        generation: 0,
        is_decrease: false,
        decoders: &[at(49, delta_positional), at(53, delta_positional_v53), at(501, delta_positional)],
    },
    WireName {
        name: event::DELEGATION_INCREASED,
        kind: CanonicalKind::DelegationChanged,
        family: event::DELEGATION_INCREASED,
        generation: 1,
        is_decrease: false,
        decoders: &[at(1001, delta_positional), at(1300, delta_named)],
    },
    WireName {
        name: event::NOMINATION_DECREASED,
        kind: CanonicalKind::DelegationChanged,
        family: event::DELEGATION_DECREASED,
        generation: 0,
        is_decrease: true,
        decoders: &[at(49, delta_positional), at(53, delta_positional_v53), at(501, delta_positional)],
    },
    WireName {
        name: event::DELEGATION_DECREASED,
        kind: CanonicalKind::DelegationChanged,
        family: event::DELEGATION_DECREASED,
        generation: 1,
        is_decrease: true,
        decoders: &[at(1001, delta_positional), at(1300, delta_named)],
    },
    WireName {
        name: event::DELEGATION_REVOKED,
        kind: CanonicalKind::DelegationChanged,
        family: event::DELEGATION_REVOKED,
        generation: 0,
        is_decrease: true,
        decoders: &[at(1001, revoked_positional), at(1300, revoked_named)],
    },
    WireName {
        name: event::REWARDED,
        kind: CanonicalKind::Rewarded,
        family: event::REWARDED,
        generation: 0,
        is_decrease: false,
        decoders: &[at(49, rewarded_positional), at(1300, rewarded_named)],
    },
    WireName {
        name: event::COMPOUNDED,
        kind: CanonicalKind::Compounded,
        family: event::COMPOUNDED,
        generation: 0,
        is_decrease: false,
        decoders: &[at(1901, compounded_named)],
    },
];

fn wire_name(name: &str) -> Option<&'static WireName> {
    WIRE_NAMES.iter().find(|w| w.name == name)
}

/// Turns raw archive events into [`CanonicalEvent`]s, choosing the payload layout from the
/// runtime version active at the event's block.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalEventDecoder<'a> {
    oracle: &'a SchemaVersionOracle,
}

impl<'a> CanonicalEventDecoder<'a> {
    pub fn new(oracle: &'a SchemaVersionOracle) -> Self {
        Self { oracle }
    }

    /// Every wire name, across all historical renames, that decodes to `kind`.
    pub fn names_for(kind: CanonicalKind) -> Vec<&'static str> {
        WIRE_NAMES.iter().filter(|w| w.kind == kind).map(|w| w.name).collect()
    }

    /// Whether `name` is one of the staking events this decoder understands.
    pub fn is_staking_event(name: &str) -> bool {
        wire_name(name).is_some()
    }

    pub fn decode(
        &self,
        raw: &RawEvent,
        header: &BlockHeader,
    ) -> Result<CanonicalEvent, StakingError> {
        let wire = wire_name(&raw.name)
            .ok_or_else(|| StakingError::UnsupportedEvent(raw.name.clone()))?;
        self.decode_wire(wire, raw, header)
    }

    fn decode_wire(
        &self,
        wire: &WireName,
        raw: &RawEvent,
        header: &BlockHeader,
    ) -> Result<CanonicalEvent, StakingError> {
        let unknown = || StakingError::UnknownVersion {
            kind: ItemKind::Event,
            name: wire.name.to_string(),
            hash: header.runtime.type_hash(ItemKind::Event, wire.name),
        };
        let version = self.oracle.resolve(ItemKind::Event, wire.name, &header.runtime)?;
        let version = version.ok_or_else(unknown)?;
        let decoder =
            wire.decoders.iter().find(|d| d.version == version).ok_or_else(unknown)?;

        let payload = (decoder.decode)(&raw.args, wire.is_decrease).map_err(|source| {
            StakingError::Payload { name: wire.name.to_string(), version, source }
        })?;

        Ok(CanonicalEvent {
            id: raw.id.clone(),
            block_height: header.height,
            timestamp: header.timestamp,
            index: raw.index,
            payload,
        })
    }

    /// Decodes the staking events of a block in order, skipping events of other pallets.
    ///
    /// An occurrence reported under both a legacy name and its successor is decoded once, with
    /// the newer generation's decoder.
    pub fn decode_block(&self, block: &Block) -> Result<Vec<CanonicalEvent>, StakingError> {
        let mut decoded: Vec<(CanonicalEvent, u8)> = Vec::new();
        let mut seen: HashMap<(u32, &'static str), usize> = HashMap::new();

        for raw in &block.events {
            let Some(wire) = wire_name(&raw.name) else {
                continue;
            };
            let event = self.decode_wire(wire, raw, &block.header)?;
            match seen.get(&(raw.index, wire.family)) {
                Some(&pos) => {
                    if wire.generation > decoded[pos].1 {
                        decoded[pos] = (event, wire.generation);
                    } else {
                        tracing::debug!(
                            "Skipping {} at {}: already decoded under a newer name",
                            raw.name,
                            raw.id
                        );
                    }
                }
                None => {
                    seen.insert((raw.index, wire.family), decoded.len());
                    decoded.push((event, wire.generation));
                }
            }
        }

        Ok(decoded.into_iter().map(|(event, _)| event).collect())
    }
}

/// Decodes a named-record payload. Derived struct deserializers also accept sequences, so a
/// positional payload under a named layout is rejected here.
fn record<'de, T: Deserialize<'de>>(v: &'de Value) -> serde_json::Result<T> {
    if !v.is_object() {
        let unexpected = match v {
            Value::Array(_) => Unexpected::Seq,
            Value::Null => Unexpected::Unit,
            Value::Bool(b) => Unexpected::Bool(*b),
            Value::String(s) => Unexpected::Str(s),
            _ => Unexpected::Other("number"),
        };
        return Err(de::Error::invalid_type(unexpected, &"a named record"));
    }
    T::deserialize(v)
}

#[derive(Deserialize)]
struct NewRoundV49(u64, u32, u32, WireBalance);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewRoundV1300 {
    starting_block: u64,
    round: u32,
    selected_collators_number: u32,
    total_balance: WireBalance,
}

fn new_round_positional(v: &Value, _: bool) -> serde_json::Result<EventPayload> {
    let NewRoundV49(starting_block, round_index, collators_selected, total) =
        NewRoundV49::deserialize(v)?;
    Ok(EventPayload::NewRound {
        starting_block,
        round_index,
        collators_selected,
        total_stake: total.0,
    })
}

fn new_round_named(v: &Value, _: bool) -> serde_json::Result<EventPayload> {
    let e: NewRoundV1300 = record(v)?;
    Ok(EventPayload::NewRound {
        starting_block: e.starting_block,
        round_index: e.round,
        collators_selected: e.selected_collators_number,
        total_stake: e.total_balance.0,
    })
}

#[derive(Deserialize)]
struct BondTriple(AccountId, WireBalance, WireBalance);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinedV1300 {
    account: AccountId,
    amount_locked: WireBalance,
    new_total_amt_locked: WireBalance,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BondedMoreV1300 {
    candidate: AccountId,
    amount: WireBalance,
    new_total_bond: WireBalance,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BondedLessV1300 {
    candidate: AccountId,
    amount: WireBalance,
    new_bond: WireBalance,
}

fn bond(account: AccountId, amount: WireBalance, new_total: WireBalance, is_decrease: bool) -> EventPayload {
    EventPayload::BondChanged { account, amount: amount.0, new_total: new_total.0, is_decrease }
}

fn bond_positional(v: &Value, is_decrease: bool) -> serde_json::Result<EventPayload> {
    let BondTriple(account, amount, new_total) = BondTriple::deserialize(v)?;
    Ok(bond(account, amount, new_total, is_decrease))
}

fn joined_named(v: &Value, is_decrease: bool) -> serde_json::Result<EventPayload> {
    let e: JoinedV1300 = record(v)?;
    Ok(bond(e.account, e.amount_locked, e.new_total_amt_locked, is_decrease))
}

fn bonded_more_named(v: &Value, is_decrease: bool) -> serde_json::Result<EventPayload> {
    let e: BondedMoreV1300 = record(v)?;
    Ok(bond(e.candidate, e.amount, e.new_total_bond, is_decrease))
}

fn bonded_less_named(v: &Value, is_decrease: bool) -> serde_json::Result<EventPayload> {
    let e: BondedLessV1300 = record(v)?;
    Ok(bond(e.candidate, e.amount, e.new_bond, is_decrease))
}

/// `(delegator, amount, candidate, position)`
#[derive(Deserialize)]
struct DelegationQuad(AccountId, WireBalance, AccountId, IgnoredAny);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelegationV1300 {
    delegator: AccountId,
    locked_amount: WireBalance,
    candidate: AccountId,
}

/// `(delegator, candidate, amount, in_top | new_total)`
#[derive(Deserialize)]
struct DeltaQuad(AccountId, AccountId, WireBalance, IgnoredAny);

#[derive(Deserialize)]
struct DeltaQuint(AccountId, AccountId, WireBalance, IgnoredAny, IgnoredAny);

#[derive(Deserialize)]
struct DeltaNamed {
    delegator: AccountId,
    candidate: AccountId,
    amount: WireBalance,
}

#[derive(Deserialize)]
struct RevokedTriple(AccountId, AccountId, WireBalance);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RevokedV1300 {
    delegator: AccountId,
    candidate: AccountId,
    unstaked_amount: WireBalance,
}

fn delegation(
    delegator: AccountId,
    candidate: AccountId,
    amount: WireBalance,
    is_decrease: bool,
) -> EventPayload {
    EventPayload::DelegationChanged { delegator, candidate, amount: amount.0, is_decrease }
}

fn delegation_positional(v: &Value, is_decrease: bool) -> serde_json::Result<EventPayload> {
    let DelegationQuad(delegator, amount, candidate, _) = DelegationQuad::deserialize(v)?;
    Ok(delegation(delegator, candidate, amount, is_decrease))
}

fn delegation_named(v: &Value, is_decrease: bool) -> serde_json::Result<EventPayload> {
    let e: DelegationV1300 = record(v)?;
    Ok(delegation(e.delegator, e.candidate, e.locked_amount, is_decrease))
}

fn delta_positional(v: &Value, is_decrease: bool) -> serde_json::Result<EventPayload> {
    let DeltaQuad(delegator, candidate, amount, _) = DeltaQuad::deserialize(v)?;
    Ok(delegation(delegator, candidate, amount, is_decrease))
}

fn delta_positional_v53(v: &Value, is_decrease: bool) -> serde_json::Result<EventPayload> {
    let DeltaQuint(delegator, candidate, amount, _, _) = DeltaQuint::deserialize(v)?;
    Ok(delegation(delegator, candidate, amount, is_decrease))
}

fn delta_named(v: &Value, is_decrease: bool) -> serde_json::Result<EventPayload> {
    let e: DeltaNamed = record(v)?;
    Ok(delegation(e.delegator, e.candidate, e.amount, is_decrease))
}

fn revoked_positional(v: &Value, is_decrease: bool) -> serde_json::Result<EventPayload> {
    let RevokedTriple(delegator, candidate, amount) = RevokedTriple::deserialize(v)?;
    Ok(delegation(delegator, candidate, amount, is_decrease))
}

fn revoked_named(v: &Value, is_decrease: bool) -> serde_json::Result<EventPayload> {
    let e: RevokedV1300 = record(v)?;
    Ok(delegation(e.delegator, e.candidate, e.unstaked_amount, is_decrease))
}

#[derive(Deserialize)]
struct RewardedPair(AccountId, WireBalance);

#[derive(Deserialize)]
struct RewardedV1300 {
    account: AccountId,
    rewards: WireBalance,
}

#[derive(Deserialize)]
struct CompoundedV1901 {
    #[allow(dead_code)]
    candidate: AccountId,
    delegator: AccountId,
    amount: WireBalance,
}

fn rewarded_positional(v: &Value, _: bool) -> serde_json::Result<EventPayload> {
    let RewardedPair(account, amount) = RewardedPair::deserialize(v)?;
    Ok(EventPayload::Rewarded { account, amount: amount.0 })
}

fn rewarded_named(v: &Value, _: bool) -> serde_json::Result<EventPayload> {
    let e: RewardedV1300 = record(v)?;
    Ok(EventPayload::Rewarded { account: e.account, amount: e.rewards.0 })
}

fn compounded_named(v: &Value, _: bool) -> serde_json::Result<EventPayload> {
    let e: CompoundedV1901 = record(v)?;
    Ok(EventPayload::Compounded { account: e.delegator, amount: e.amount.0 })
}
