// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::str::FromStr;

use ethers::signers::LocalWallet;
use ethers::types::H256;
use serde::Deserialize;

/// An Ethereum private key.
///
/// Deserializes from a `0x` prefixed hex string or from `$ENV_VAR` holding one.
#[derive(Clone)]
pub struct PrivateKey(H256);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").finish()
    }
}

impl From<H256> for PrivateKey {
    fn from(secret: H256) -> Self {
        PrivateKey(secret)
    }
}

impl std::ops::Deref for PrivateKey {
    type Target = H256;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PrivateKey {
    /// Builds the local wallet for this key, bound to `chain_id`.
    pub fn wallet(
        &self,
        chain_id: u64,
    ) -> Result<LocalWallet, ethers::signers::WalletError> {
        use ethers::signers::Signer;
        let wallet = LocalWallet::from_bytes(self.0.as_bytes())?;
        Ok(wallet.with_chain_id(chain_id))
    }
}

fn parse_secret<E>(value: &str) -> Result<H256, E>
where
    E: serde::de::Error,
{
    if !value.starts_with("0x") {
        return Err(serde::de::Error::custom(
            "expected a 0x prefixed hex string",
        ));
    }
    H256::from_str(value).map_err(|e| {
        serde::de::Error::custom(format!(
            "{e}\n got {} chars but expected a 66 chars string (including the 0x prefix)",
            value.len()
        ))
    })
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrivateKeyVistor;
        impl<'de> serde::de::Visitor<'de> for PrivateKeyVistor {
            type Value = H256;

            fn expecting(
                &self,
                formatter: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                formatter.write_str(
                    "hex string or an env var containing a hex string in it",
                )
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let raw = crate::env::resolve::<E>(value)?;
                parse_secret(raw.trim())
            }
        }

        let secret = deserializer.deserialize_str(PrivateKeyVistor)?;
        Ok(Self(secret))
    }
}
