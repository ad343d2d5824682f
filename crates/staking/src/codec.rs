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

use std::str::FromStr;

use crate::{error::StakingError, types::AccountId};

/// Text form of account ids used as entity keys.
pub trait AddressCodec: Send + Sync {
    fn encode(&self, account: &AccountId) -> String;
    fn decode(&self, text: &str) -> Result<AccountId, StakingError>;
}

/// Lowercase `0x`-prefixed hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexAddressCodec;

impl AddressCodec for HexAddressCodec {
    fn encode(&self, account: &AccountId) -> String {
        format!("{account:#x}")
    }

    fn decode(&self, text: &str) -> Result<AccountId, StakingError> {
        AccountId::from_str(text).map_err(|e| StakingError::InvalidAddress(format!("{text}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_lowercase_hex() {
        let account = AccountId::repeat_byte(0xab);
        let text = HexAddressCodec.encode(&account);
        assert_eq!(text, format!("0x{}", "ab".repeat(20)));
        assert_eq!(HexAddressCodec.decode(&text).unwrap(), account);
        assert!(HexAddressCodec.decode("0x1234").is_err());
    }
}
