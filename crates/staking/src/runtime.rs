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

//! Runtime metadata and version resolution.
//!
//! Every runtime upgrade may change the shape of a pallet item. The chain identifies a shape by
//! the hash of its type definition, so the version of an item at a given block is found by
//! looking up the type hash the block's runtime reports for that item.

use std::{collections::HashMap, fmt};

use alloy_primitives::{b256, B256};
use serde::{Deserialize, Serialize};

use crate::{
    error::StakingError,
    names::{constant, event, storage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Event,
    Storage,
    Constant,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Event => f.write_str("event"),
            ItemKind::Storage => f.write_str("storage"),
            ItemKind::Constant => f.write_str("constant"),
        }
    }
}

/// Label of a known item shape, named after the first runtime spec version that introduced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionTag(pub u32);

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConstant {
    pub hash: B256,
    pub value: serde_json::Value,
}

/// Metadata of the runtime active at a block: the type hash of every item it exposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeContext {
    pub spec_name: String,
    pub spec_version: u32,
    #[serde(default)]
    pub events: HashMap<String, B256>,
    #[serde(default)]
    pub storage: HashMap<String, B256>,
    #[serde(default)]
    pub constants: HashMap<String, RuntimeConstant>,
}

impl RuntimeContext {
    pub fn new(spec_name: impl Into<String>, spec_version: u32) -> Self {
        Self { spec_name: spec_name.into(), spec_version, ..Default::default() }
    }

    pub fn type_hash(&self, kind: ItemKind, name: &str) -> Option<B256> {
        match kind {
            ItemKind::Event => self.events.get(name).copied(),
            ItemKind::Storage => self.storage.get(name).copied(),
            ItemKind::Constant => self.constants.get(name).map(|c| c.hash),
        }
    }

    pub fn constant_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.constants.get(name).map(|c| &c.value)
    }

    /// Registers the known shape `version` of `name`. Returns `None` when no such shape exists.
    pub fn with_item(mut self, kind: ItemKind, name: &str, version: VersionTag) -> Option<Self> {
        let hash = known_shape_hash(kind, name, version)?;
        match kind {
            ItemKind::Event => {
                self.events.insert(name.to_string(), hash);
            }
            ItemKind::Storage => {
                self.storage.insert(name.to_string(), hash);
            }
            ItemKind::Constant => {
                self.constants.insert(
                    name.to_string(),
                    RuntimeConstant { hash, value: serde_json::Value::Null },
                );
            }
        }
        Some(self)
    }

    pub fn with_constant_value(mut self, name: &str, value: serde_json::Value) -> Self {
        if let Some(constant) = self.constants.get_mut(name) {
            constant.value = value;
        }
        self
    }
}

struct KnownShape {
    kind: ItemKind,
    name: &'static str,
    hash: B256,
    version: VersionTag,
}

const fn shape(kind: ItemKind, name: &'static str, version: u32, hash: B256) -> KnownShape {
    KnownShape { kind, name, hash, version: VersionTag(version) }
}

const BOND_TRIPLE: B256 = b256!("7d53ab304de2c1ff2ac70be085ea6ab305e3a4df52dde9c25829171c7376cebc");
const DELEGATION_QUAD: B256 =
    b256!("9e88e3dd4dec21ca4744b0264c96a88bfef8fa4f3a42c495ba697dcf51165507");
const DELEGATION_DELTA: B256 =
    b256!("cb87cf94019b8ebc544a6a9a05c01f439fe3dea8cbed08c97f1a1e60dd6ad4f3");
const DELEGATION_DELTA_NAMED: B256 =
    b256!("8ae2ca952b0b00ca6619c82b53d155a37de0be62eb9e8c32f4dad72b695e010b");
const NOMINATION_DELTA_V49: B256 =
    b256!("c5569fad693da6ab49df69c2cc3a1767b0c18bfc1f206847e0946659f6cd24ef");
const NOMINATION_DELTA_V53: B256 =
    b256!("0802fb52e763fad9c1e2d7470ade03f120ed84392caab7558db05d830982247c");
const DELEGATIONS_LIST: B256 =
    b256!("e681b7cbb9992622456e4ee66d20daa7968a64b6a52ef599f5992850855cc3ee");

use ItemKind::{Constant, Event, Storage};

static KNOWN_SHAPES: &[KnownShape] = &[
    // Events
    shape(Event, event::NEW_ROUND, 49, b256!("40ffda4d99fbb38b23cc20386a7f622d64120f24ccc70b9f85ce7612cd87c3b7")),
    shape(Event, event::NEW_ROUND, 1300, b256!("36b479d535ff0b4066a6ca7641a4dba5e090be428fc6b6e9fe8fec13d953fcfb")),
    shape(Event, event::JOINED_COLLATOR_CANDIDATES, 49, BOND_TRIPLE),
    shape(Event, event::JOINED_COLLATOR_CANDIDATES, 1300, b256!("227a8d2310a3cd3b98057acb86b906dcde376e61a13f5a50db8589a31b218c17")),
    shape(Event, event::COLLATOR_BONDED_MORE, 49, BOND_TRIPLE),
    shape(Event, event::COLLATOR_BONDED_LESS, 49, BOND_TRIPLE),
    shape(Event, event::CANDIDATE_BONDED_MORE, 1001, BOND_TRIPLE),
    shape(Event, event::CANDIDATE_BONDED_MORE, 1300, b256!("d6e6bcd7c6de9403e85285e3685e6774d7d1d129d84c7cfe9a4806c5ff5a4e54")),
    shape(Event, event::CANDIDATE_BONDED_LESS, 1001, BOND_TRIPLE),
    shape(Event, event::CANDIDATE_BONDED_LESS, 1300, b256!("03199d60c293c383f981694ba4310b187ed4a6b79fcc52e6fbccc691153b8f28")),
    shape(Event, event::NOMINATION, 49, b256!("f83c084062244bcc7149405c98c7c4e2a16809a87e76da05297caea15bec2db3")),
    shape(Event, event::NOMINATION, 53, b256!("6b1ea86c75c5868b590dc10b5fb591ae19af540ceb6b063e8c19ff6f924cad7a")),
    shape(Event, event::NOMINATION, 155, b256!("b20b7a0c9860b9c403f33608bd1e5665b56580246c923ac0e54358b89c7d757f")),
    shape(Event, event::NOMINATION, 900, DELEGATION_QUAD),
    shape(Event, event::NOMINATION_INCREASED, 49, NOMINATION_DELTA_V49),
    shape(Event, event::NOMINATION_INCREASED, 53, NOMINATION_DELTA_V53),
    shape(Event, event::NOMINATION_INCREASED, 501, DELEGATION_DELTA),
    shape(Event, event::NOMINATION_DECREASED, 49, NOMINATION_DELTA_V49),
    shape(Event, event::NOMINATION_DECREASED, 53, NOMINATION_DELTA_V53),
    shape(Event, event::NOMINATION_DECREASED, 501, DELEGATION_DELTA),
    shape(Event, event::DELEGATION, 1001, DELEGATION_QUAD),
    shape(Event, event::DELEGATION, 1300, b256!("a85b3e0f4dad63b1b710d554a6b0a8aa64b90a755bcae7ea3f4b677b36e5df82")),
    shape(Event, event::DELEGATION, 1901, b256!("b79250d65573f20264ea546d6964696800161f34e3e18c9e5f5cc68ab741883d")),
    shape(Event, event::DELEGATION_INCREASED, 1001, DELEGATION_DELTA),
    shape(Event, event::DELEGATION_INCREASED, 1300, DELEGATION_DELTA_NAMED),
    shape(Event, event::DELEGATION_DECREASED, 1001, DELEGATION_DELTA),
    shape(Event, event::DELEGATION_DECREASED, 1300, DELEGATION_DELTA_NAMED),
    shape(Event, event::DELEGATION_REVOKED, 1001, b256!("dfcae516f053c47e7cb49e0718f01587efcb64cea4e3baf4c6973a29891f7841")),
    shape(Event, event::DELEGATION_REVOKED, 1300, b256!("013eacc8d6813b22ecdad778ecfffcc25ea1f31117d857d64978c177696e8697")),
    shape(Event, event::REWARDED, 49, b256!("e4f02aa7cee015102b6cbc171f5d7e84370e60deba2166a27195187adde0407f")),
    shape(Event, event::REWARDED, 1300, b256!("44a7364018ebad92746e4ca7c7c23d24d5da43cda2e63a90c665b522994ef1e2")),
    shape(Event, event::COMPOUNDED, 1901, b256!("8266cbb073e59a0e3396d5560489030a068acf3b9e5df48c17dfbe42dc02e748")),
    // Storage
    shape(Storage, storage::CANDIDATE_INFO, 1201, b256!("248231639cd86f1a3ffea0da2b9ed3fc64e1b7784d3759f68d733ac1ef08db19")),
    shape(Storage, storage::TOP_DELEGATIONS, 1201, DELEGATIONS_LIST),
    shape(Storage, storage::BOTTOM_DELEGATIONS, 1201, DELEGATIONS_LIST),
    shape(Storage, storage::CANDIDATE_STATE, 1001, b256!("84ab01b9f5d971571bb4cd8288174dc552c917250ba2c5256263959a40438f09")),
    shape(Storage, storage::COLLATOR_STATE2, 53, b256!("a4d9c3541b410bd0ebf9e6919cad26ad7aa3481dd09c1495650af46ea30787a9")),
    shape(Storage, storage::COLLATOR_STATE, 49, b256!("e021f25b8536c116b9fa878663be6fd4f263d9d967d77a19134dc59a9cee73f6")),
    shape(Storage, storage::DELEGATOR_STATE, 1001, b256!("03dfb3b8e1ca16deb35d7040cc81f72b135e75c4caeea578cfc2294e1f1f41ad")),
    shape(Storage, storage::DELEGATOR_STATE, 1502, b256!("637263cfee3190d24faafd4e41f925a782ec1a9b5d80de08bd6ae287d0f0a10a")),
    shape(Storage, storage::NOMINATOR_STATE2, 200, b256!("adc9b2765bcd5aa9c2ac9f93cd108b87d508a8d5494c318bf18ee6f4b599b8ed")),
    shape(Storage, storage::NOMINATOR_STATE2, 1001, b256!("c33bf4fdf125c8070ffd27253f9a811a9a2b244a0af652bf531999872325e904")),
    shape(Storage, storage::NOMINATOR_STATE, 49, b256!("f801fe87581f7dbb6db044ddd5a7adbe0d0ea1596ad42a8ccd22aa28f6be3e8f")),
    shape(Storage, storage::SELECTED_CANDIDATES, 49, b256!("d14508def9da76532021b53d553e9048fd079e2e735d2393e6d531e6d1fd29ca")),
    shape(Storage, storage::ROUND, 49, b256!("b5f3d49d6ba2e559d598977dc55516a649f67db6a4edb6de43b94edb90800928")),
    shape(Storage, storage::COLLATOR_COMMISSION, 49, b256!("81bbbe8e62451cbcc227306706c919527aa2538970bd6d67a9969dd52c257d02")),
    // Constants
    shape(Constant, constant::REWARD_PAYMENT_DELAY, 200, b256!("b76f37d33f64f2d9b3234e29034ab4a73ee9da01a61ab139c27f8c841971e469")),
];

/// Type hash of a known item shape.
pub fn known_shape_hash(kind: ItemKind, name: &str, version: VersionTag) -> Option<B256> {
    KNOWN_SHAPES
        .iter()
        .find(|s| s.kind == kind && s.name == name && s.version == version)
        .map(|s| s.hash)
}

/// Maps the type hash a runtime reports for an item to the version tag of that shape.
#[derive(Debug, Clone)]
pub struct SchemaVersionOracle {
    table: HashMap<(ItemKind, &'static str), Vec<(B256, VersionTag)>>,
}

impl Default for SchemaVersionOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaVersionOracle {
    pub fn new() -> Self {
        let mut table: HashMap<(ItemKind, &'static str), Vec<(B256, VersionTag)>> = HashMap::new();
        for known in KNOWN_SHAPES {
            table.entry((known.kind, known.name)).or_default().push((known.hash, known.version));
        }
        Self { table }
    }

    /// Resolves the version of `name` under `runtime`.
    ///
    /// Returns `Ok(None)` when the runtime does not expose the item at all, and
    /// [`StakingError::UnknownVersion`] when it does but with a shape no known version matches.
    pub fn resolve(
        &self,
        kind: ItemKind,
        name: &str,
        runtime: &RuntimeContext,
    ) -> Result<Option<VersionTag>, StakingError> {
        let Some(hash) = runtime.type_hash(kind, name) else {
            return Ok(None);
        };
        self.table
            .get(&(kind, name))
            .and_then(|shapes| shapes.iter().find(|(known, _)| *known == hash))
            .map(|(_, version)| Some(*version))
            .ok_or_else(|| StakingError::UnknownVersion {
                kind,
                name: name.to_string(),
                hash: Some(hash),
            })
    }

    /// Known versions of an item, oldest first.
    pub fn versions(&self, kind: ItemKind, name: &str) -> Vec<VersionTag> {
        let mut versions: Vec<_> = self
            .table
            .get(&(kind, name))
            .map(|shapes| shapes.iter().map(|(_, v)| *v).collect())
            .unwrap_or_default();
        versions.sort();
        versions
    }
}
