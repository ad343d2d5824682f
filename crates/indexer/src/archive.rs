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

//! Block source backed by a JSON archive export.
//!
//! An export carries the metadata of every runtime it spans and, per block, the header, the
//! ordered events and a snapshot of the storage entries read at that block:
//!
//! ```json
//! {
//!   "runtimes": [{ "specName": "moonriver", "specVersion": 1300, "events": {}, "storage": {} }],
//!   "blocks": [{
//!     "height": 1000, "timestamp": 1650000000000, "specVersion": 1300,
//!     "events": [{ "index": 0, "name": "ParachainStaking.NewRound", "args": {} }],
//!     "storage": { "values": { "ParachainStaking.Round": {} }, "maps": { "ParachainStaking.CandidateInfo": { "0x..": {} } } }
//!   }]
//! }
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use dpos_staking::{
    AccountId, AddressCodec, Block, BlockHeader, ChainStorage, HexAddressCodec, RawEvent,
    RuntimeContext,
};
use serde::Deserialize;
use serde_json::Value;

/// Ordered block source that can also serve storage reads at any block it returns.
#[async_trait]
pub trait Archive: ChainStorage {
    /// Highest block available, if any.
    async fn head(&self) -> Result<Option<u64>>;

    /// Blocks with height in `[from, to]`, ascending, events in on-chain order.
    async fn blocks(&self, from: u64, to: u64) -> Result<Vec<Block>>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveExport {
    runtimes: Vec<RuntimeContext>,
    blocks: Vec<ExportedBlock>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportedBlock {
    height: u64,
    /// Milliseconds since the unix epoch.
    timestamp: i64,
    spec_version: u32,
    #[serde(default)]
    events: Vec<ExportedEvent>,
    #[serde(default)]
    storage: ExportedStorage,
}

#[derive(Deserialize)]
struct ExportedEvent {
    id: Option<String>,
    index: u32,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Default, Deserialize)]
struct ExportedStorage {
    #[serde(default)]
    values: HashMap<String, Value>,
    #[serde(default)]
    maps: HashMap<String, HashMap<String, Value>>,
}

struct ArchivedBlock {
    block: Block,
    values: HashMap<String, Value>,
    maps: HashMap<String, HashMap<AccountId, Value>>,
}

pub struct JsonArchive {
    blocks: BTreeMap<u64, ArchivedBlock>,
}

impl JsonArchive {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read archive {}", path.display()))?;
        let export: ArchiveExport = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed archive export {}", path.display()))?;
        Self::from_export(export)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let export: ArchiveExport =
            serde_json::from_value(value).context("Malformed archive export")?;
        Self::from_export(export)
    }

    fn from_export(export: ArchiveExport) -> Result<Self> {
        let runtimes: HashMap<u32, Arc<RuntimeContext>> = export
            .runtimes
            .into_iter()
            .map(|runtime| (runtime.spec_version, Arc::new(runtime)))
            .collect();

        let mut blocks = BTreeMap::new();
        for exported in export.blocks {
            let height = exported.height;
            let runtime = runtimes.get(&exported.spec_version).cloned().ok_or_else(|| {
                anyhow!("Block {} uses unknown runtime version {}", height, exported.spec_version)
            })?;
            let timestamp = DateTime::from_timestamp_millis(exported.timestamp)
                .ok_or_else(|| anyhow!("Block {} has invalid timestamp", height))?;

            let mut events = exported
                .events
                .into_iter()
                .map(|event| {
                    let mut raw = RawEvent::new(height, event.index, event.name, event.args);
                    if let Some(id) = event.id {
                        raw.id = id;
                    }
                    raw
                })
                .collect::<Vec<_>>();
            events.sort_by_key(|event| event.index);

            let mut maps = HashMap::with_capacity(exported.storage.maps.len());
            for (item, entries) in exported.storage.maps {
                let entries = entries
                    .into_iter()
                    .map(|(key, value)| Ok((HexAddressCodec.decode(&key)?, value)))
                    .collect::<Result<HashMap<_, _>>>()
                    .with_context(|| format!("Invalid key in {} at block {}", item, height))?;
                maps.insert(item, entries);
            }

            let archived = ArchivedBlock {
                block: Block { header: BlockHeader { height, timestamp, runtime }, events },
                values: exported.storage.values,
                maps,
            };
            if blocks.insert(height, archived).is_some() {
                bail!("Block {} appears twice in archive", height);
            }
        }

        tracing::debug!("Loaded archive with {} blocks", blocks.len());
        Ok(Self { blocks })
    }

    fn archived(&self, height: u64) -> Result<&ArchivedBlock> {
        self.blocks.get(&height).ok_or_else(|| anyhow!("Block {} is not in the archive", height))
    }
}

#[async_trait]
impl ChainStorage for JsonArchive {
    async fn get_many(
        &self,
        block: &BlockHeader,
        item: &str,
        keys: &[AccountId],
    ) -> Result<Vec<Option<Value>>> {
        let archived = self.archived(block.height)?;
        let entries = archived.maps.get(item);
        Ok(keys.iter().map(|key| entries.and_then(|entries| entries.get(key)).cloned()).collect())
    }

    async fn get(&self, block: &BlockHeader, item: &str) -> Result<Option<Value>> {
        Ok(self.archived(block.height)?.values.get(item).cloned())
    }
}

#[async_trait]
impl Archive for JsonArchive {
    async fn head(&self) -> Result<Option<u64>> {
        Ok(self.blocks.keys().next_back().copied())
    }

    async fn blocks(&self, from: u64, to: u64) -> Result<Vec<Block>> {
        Ok(self.blocks.range(from..=to).map(|(_, archived)| archived.block.clone()).collect())
    }
}
