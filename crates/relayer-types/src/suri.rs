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

use serde::Deserialize;
use subxt_signer::sr25519::Keypair as Sr25519Pair;

/// The sr25519 key the relayer signs parachain extrinsics with.
///
/// Deserializes from a secret URI (`//Alice`, hex seed with derivation
/// path), a mnemonic phrase, or `$ENV_VAR` holding either of those.
#[derive(Clone)]
pub struct Suri(pub Sr25519Pair);

impl std::fmt::Debug for Suri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Substrate Uri").finish()
    }
}

impl From<Suri> for Sr25519Pair {
    fn from(suri: Suri) -> Self {
        suri.0
    }
}

impl std::ops::Deref for Suri {
    type Target = Sr25519Pair;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Suri {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct SuriVistor;
        impl<'de> serde::de::Visitor<'de> for SuriVistor {
            type Value = Sr25519Pair;

            fn expecting(
                &self,
                formatter: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                formatter.write_str(
                    "secret uri, mnemonic or an env var containing one of them",
                )
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let raw = crate::env::resolve::<E>(value)?;
                parse_suri(raw.trim())
            }
        }

        let pair = deserializer.deserialize_str(SuriVistor)?;
        Ok(Self(pair))
    }
}

fn parse_suri<E>(val: &str) -> Result<Sr25519Pair, E>
where
    E: serde::de::Error,
{
    use subxt_signer::bip39::Mnemonic;
    use subxt_signer::SecretUri;

    if let Ok(secret_uri) = SecretUri::from_str(val) {
        return Sr25519Pair::from_uri(&secret_uri)
            .map_err(|e| serde::de::Error::custom(e.to_string()));
    }
    if let Ok(mnemonic) = Mnemonic::from_str(val) {
        return Sr25519Pair::from_phrase(&mnemonic, None)
            .map_err(|e| serde::de::Error::custom(e.to_string()));
    }

    Err(serde::de::Error::custom(
        "Failed to parse the value as a secret uri or mnemonic",
    ))
}

#[cfg(test)]
mod tests {
    use subxt_signer::sr25519::dev;

    use super::*;

    #[test]
    fn parses_dev_uri() {
        let suri: Suri = serde_json::from_str("\"//Alice\"").unwrap();
        assert_eq!(suri.public_key().0, dev::alice().public_key().0);
    }

    #[test]
    fn reads_uri_from_env() {
        std::env::set_var("ARTEMIS_TEST_PARACHAIN_SURI", "//Bob");
        let suri: Suri =
            serde_json::from_str("\"$ARTEMIS_TEST_PARACHAIN_SURI\"").unwrap();
        assert_eq!(suri.public_key().0, dev::bob().public_key().0);
    }
}
