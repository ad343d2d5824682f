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
use chrono::{TimeZone, Utc};
use serde_json::Value;

use crate::{
    runtime::RuntimeContext,
    storage::ChainStorage,
    types::{AccountId, BlockHeader},
};

pub(crate) fn account(byte: u8) -> AccountId {
    AccountId::repeat_byte(byte)
}

/// Header at `height`, six seconds per block.
pub(crate) fn header_at(height: u64, runtime: RuntimeContext) -> BlockHeader {
    BlockHeader {
        height,
        timestamp: Utc
            .timestamp_millis_opt(1_650_000_000_000 + height as i64 * 6_000)
            .single()
            .expect("valid timestamp"),
        runtime: Arc::new(runtime),
    }
}

/// In-memory chain state keyed by block height.
#[derive(Default)]
pub(crate) struct MockStorage {
    values: HashMap<(u64, String), Value>,
    entries: HashMap<(u64, String, AccountId), Value>,
}

impl MockStorage {
    pub(crate) fn with_value(mut self, height: u64, item: &str, value: Value) -> Self {
        self.values.insert((height, item.to_string()), value);
        self
    }

    pub(crate) fn with_entry(
        mut self,
        height: u64,
        item: &str,
        key: AccountId,
        value: Value,
    ) -> Self {
        self.entries.insert((height, item.to_string(), key), value);
        self
    }
}

#[async_trait]
impl ChainStorage for MockStorage {
    async fn get_many(
        &self,
        block: &BlockHeader,
        item: &str,
        keys: &[AccountId],
    ) -> anyhow::Result<Vec<Option<Value>>> {
        Ok(keys
            .iter()
            .map(|key| self.entries.get(&(block.height, item.to_string(), *key)).cloned())
            .collect())
    }

    async fn get(&self, block: &BlockHeader, item: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.values.get(&(block.height, item.to_string())).cloned())
    }
}
