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

use std::collections::BTreeMap;

use dpos_staking::{
    names::{constant, event, storage},
    AccountId, AddressCodec, Balance, HexAddressCodec, ItemKind, RuntimeContext, VersionTag,
};
use dpos_staking_indexer::{
    archive::JsonArchive,
    db::{StakingDb, StakingDbObj},
    staking::{StakingIndexerService, StakingIndexerServiceConfig},
};
use serde_json::{json, Map, Value};
use tempfile::NamedTempFile;
use tokio::time::Duration;

pub const SPEC_VERSION: u32 = 1300;
pub const LEGACY_SPEC_VERSION: u32 = 1001;

pub const COLLATOR_COMMISSION: u32 = 200_000_000;

pub fn account(byte: u8) -> AccountId {
    AccountId::repeat_byte(byte)
}

pub fn id(byte: u8) -> String {
    HexAddressCodec.encode(&account(byte))
}

fn with_items(mut runtime: RuntimeContext, items: &[(ItemKind, &str, u32)]) -> RuntimeContext {
    for &(kind, name, version) in items {
        runtime = runtime.with_item(kind, name, VersionTag(version)).expect("known item shape");
    }
    runtime
}

/// Runtime with named events, split candidate storage and the payment delay constant.
pub fn runtime() -> RuntimeContext {
    with_items(
        RuntimeContext::new("moonriver", SPEC_VERSION),
        &[
            (ItemKind::Event, event::NEW_ROUND, 1300),
            (ItemKind::Event, event::CANDIDATE_BONDED_MORE, 1300),
            (ItemKind::Event, event::CANDIDATE_BONDED_LESS, 1300),
            (ItemKind::Event, event::DELEGATION, 1300),
            (ItemKind::Event, event::DELEGATION_INCREASED, 1300),
            (ItemKind::Event, event::DELEGATION_DECREASED, 1300),
            (ItemKind::Event, event::REWARDED, 1300),
            (ItemKind::Event, event::COMPOUNDED, 1901),
            (ItemKind::Storage, storage::CANDIDATE_INFO, 1201),
            (ItemKind::Storage, storage::TOP_DELEGATIONS, 1201),
            (ItemKind::Storage, storage::BOTTOM_DELEGATIONS, 1201),
            (ItemKind::Storage, storage::DELEGATOR_STATE, 1502),
            (ItemKind::Storage, storage::SELECTED_CANDIDATES, 49),
            (ItemKind::Storage, storage::ROUND, 49),
            (ItemKind::Storage, storage::COLLATOR_COMMISSION, 49),
            (ItemKind::Constant, constant::REWARD_PAYMENT_DELAY, 200),
        ],
    )
    .with_constant_value(constant::REWARD_PAYMENT_DELAY, json!(2))
}

/// Runtime that predates the candidate storage split and the payment delay constant.
pub fn legacy_runtime() -> RuntimeContext {
    with_items(
        RuntimeContext::new("moonriver", LEGACY_SPEC_VERSION),
        &[
            (ItemKind::Event, event::NEW_ROUND, 49),
            (ItemKind::Event, event::REWARDED, 49),
            (ItemKind::Storage, storage::CANDIDATE_STATE, 1001),
            (ItemKind::Storage, storage::DELEGATOR_STATE, 1001),
            (ItemKind::Storage, storage::SELECTED_CANDIDATES, 49),
            (ItemKind::Storage, storage::ROUND, 49),
            (ItemKind::Storage, storage::COLLATOR_COMMISSION, 49),
        ],
    )
}

/// A selected candidate and its delegation tiers.
pub struct Candidate {
    pub account: u8,
    pub bond: Balance,
    pub top: Vec<(u8, Balance)>,
    pub bottom: Vec<(u8, Balance)>,
}

impl Candidate {
    pub fn new(account: u8, bond: Balance) -> Self {
        Self { account, bond, top: Vec::new(), bottom: Vec::new() }
    }

    pub fn top(mut self, delegator: u8, amount: Balance) -> Self {
        self.top.push((delegator, amount));
        self
    }

    pub fn bottom(mut self, delegator: u8, amount: Balance) -> Self {
        self.bottom.push((delegator, amount));
        self
    }

    fn backing(&self) -> Balance {
        self.bond + self.top.iter().chain(&self.bottom).map(|(_, amount)| amount).sum::<Balance>()
    }
}

fn bonds(list: &[(u8, Balance)]) -> Value {
    Value::Array(
        list.iter()
            .map(|(owner, amount)| json!({ "owner": id(*owner), "amount": amount.to_string() }))
            .collect(),
    )
}

/// One archived block. The `Round` storage value is always present.
pub struct BlockFixture {
    height: u64,
    spec_version: u32,
    events: Vec<Value>,
    values: Map<String, Value>,
    maps: Map<String, Value>,
}

impl BlockFixture {
    /// Block at `height` inside `round`, where round `r` started at block `r * 10`.
    pub fn new(height: u64, round: u32) -> Self {
        let mut values = Map::new();
        values.insert(
            storage::ROUND.to_string(),
            json!({ "current": round, "first": round as u64 * 10, "length": 10 }),
        );
        Self { height, spec_version: SPEC_VERSION, events: Vec::new(), values, maps: Map::new() }
    }

    pub fn spec_version(mut self, spec_version: u32) -> Self {
        self.spec_version = spec_version;
        self
    }

    pub fn event(mut self, name: &str, args: Value) -> Self {
        let index = self.events.len();
        self.events.push(json!({ "index": index, "name": name, "args": args }));
        self
    }

    pub fn value(mut self, item: &str, value: Value) -> Self {
        self.values.insert(item.to_string(), value);
        self
    }

    pub fn entry(mut self, item: &str, key: u8, value: Value) -> Self {
        let entries = self.maps.entry(item.to_string()).or_insert_with(|| json!({}));
        if let Value::Object(entries) = entries {
            entries.insert(id(key), value);
        }
        self
    }

    /// A `NewRound` event for `round` plus the storage the round snapshot reads, in the split
    /// candidate layout.
    pub fn new_round(self, round: u32, candidates: &[Candidate]) -> Self {
        let total: Balance = candidates.iter().map(Candidate::backing).sum();
        let selected: Vec<String> = candidates.iter().map(|c| id(c.account)).collect();
        let height = self.height;

        let mut block = self
            .event(
                event::NEW_ROUND,
                json!({
                    "startingBlock": height,
                    "round": round,
                    "selectedCollatorsNumber": candidates.len(),
                    "totalBalance": total.to_string(),
                }),
            )
            .value(storage::SELECTED_CANDIDATES, json!(selected))
            .value(storage::COLLATOR_COMMISSION, json!(COLLATOR_COMMISSION));

        let mut delegators: BTreeMap<u8, Vec<(u8, Balance)>> = BTreeMap::new();
        for candidate in candidates {
            block = block
                .entry(
                    storage::CANDIDATE_INFO,
                    candidate.account,
                    json!({
                        "bond": candidate.bond.to_string(),
                        "delegationCount": candidate.top.len() + candidate.bottom.len(),
                    }),
                )
                .entry(
                    storage::TOP_DELEGATIONS,
                    candidate.account,
                    json!({ "delegations": bonds(&candidate.top) }),
                )
                .entry(
                    storage::BOTTOM_DELEGATIONS,
                    candidate.account,
                    json!({ "delegations": bonds(&candidate.bottom) }),
                );
            for &(delegator, amount) in candidate.top.iter().chain(&candidate.bottom) {
                delegators.entry(delegator).or_default().push((candidate.account, amount));
            }
        }
        for (delegator, delegations) in delegators {
            let total: Balance = delegations.iter().map(|(_, amount)| amount).sum();
            block = block.entry(
                storage::DELEGATOR_STATE,
                delegator,
                json!({
                    "id": id(delegator),
                    "delegations": bonds(&delegations),
                    "total": total.to_string(),
                }),
            );
        }
        block
    }

    fn into_json(self) -> Value {
        json!({
            "height": self.height,
            "timestamp": 1_650_000_000_000i64 + self.height as i64 * 6_000,
            "specVersion": self.spec_version,
            "events": self.events,
            "storage": { "values": self.values, "maps": self.maps },
        })
    }
}

pub fn archive(runtimes: &[RuntimeContext], blocks: Vec<BlockFixture>) -> JsonArchive {
    let blocks: Vec<Value> = blocks.into_iter().map(BlockFixture::into_json).collect();
    JsonArchive::from_value(json!({ "runtimes": runtimes, "blocks": blocks }))
        .expect("Failed to build archive")
}

// Keeps the temp file alive as long as the database is in use
pub struct TestDb {
    pub db: StakingDbObj,
    _temp_file: NamedTempFile,
}

pub async fn setup_test_db() -> TestDb {
    let temp_file = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = temp_file.path().to_str().expect("Invalid temp path");
    let db_url = format!("sqlite:{}", db_path);

    let db: StakingDbObj =
        std::sync::Arc::new(StakingDb::new(&db_url).await.expect("Failed to create database"));
    TestDb { db, _temp_file: temp_file }
}

pub fn config(start_block: u64, end_block: u64, batch_size: u64) -> StakingIndexerServiceConfig {
    StakingIndexerServiceConfig {
        batch_size,
        interval: Duration::from_secs(600),
        retries: 3,
        start_block: Some(start_block),
        end_block: Some(end_block),
    }
}

pub fn service(
    archive: JsonArchive,
    test_db: &TestDb,
    config: StakingIndexerServiceConfig,
) -> StakingIndexerService<JsonArchive> {
    StakingIndexerService::with_db(archive, test_db.db.clone(), config)
}
