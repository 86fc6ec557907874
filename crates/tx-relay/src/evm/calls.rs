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


//! Calldata of the contracts the relayer talks to.

use artemis_relayer_types::beefy::{
    claims_bitfield, BeefyRelayInfo, VerifiedSignature,
};
use artemis_relayer_types::merkle::validator_proof;
use artemis_relayer_types::message::{EthereumMessage, SubstrateCommitment};
use artemis_relayer_utils::{Error, Result};
use ethers::abi::{encode, Token};
use ethers::types::{Bytes, H256, U256};
use ethers::utils::id;

/// Application contracts.
pub const APP_SUBMIT: &str = "submit(bytes,bytes)";
/// Inbound channel contracts.
pub const INBOUND_SUBMIT: &str = "submit((address,uint64,bytes)[],bytes32)";
/// First step of the BEEFY light client.
pub const SUBMIT_INITIAL: &str = "submitInitialSignatureCommitment(bytes32,uint256[],bytes,uint256,address,bytes32[])";
/// Second step of the BEEFY light client.
pub const SUBMIT_COMPLETE: &str = "submitCompleteSignatureCommitment(uint256,bytes32,(bytes32,uint64,uint64),bytes[],uint256[],address[],bytes32[][])";

fn call(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(encode(tokens));
    data.into()
}

fn hash(h: H256) -> Token {
    Token::FixedBytes(h.as_bytes().to_vec())
}

/// The light client expects `v` as 27 or 28.
fn ethereum_signature(signature: &[u8; 65]) -> Vec<u8> {
    let mut out = signature.to_vec();
    if out[64] < 27 {
        out[64] += 27;
    }
    out
}

/// `submit(data, signature)` of an application contract.
pub fn app_submit(message: &EthereumMessage) -> Bytes {
    call(
        APP_SUBMIT,
        &[
            Token::Bytes(message.data.clone()),
            Token::Bytes(message.signature.clone()),
        ],
    )
}

/// `submit(messages, commitment)` of an inbound channel contract.
pub fn inbound_submit(commitment: &SubstrateCommitment) -> Bytes {
    let messages = commitment
        .messages
        .iter()
        .map(|m| {
            Token::Tuple(vec![
                Token::Address(m.target()),
                Token::Uint(m.nonce.into()),
                Token::Bytes(m.payload.clone()),
            ])
        })
        .collect();
    call(
        INBOUND_SUBMIT,
        &[Token::Array(messages), hash(commitment.commitment_hash)],
    )
}

fn proof_of(info: &BeefyRelayInfo, signature: &VerifiedSignature) -> Result<Token> {
    let proof = validator_proof(&info.validator_addresses, signature.position)
        .ok_or_else(|| {
            Error::InvalidSignature(format!(
                "no validator at position {}",
                signature.position
            ))
        })?;
    Ok(Token::Array(proof.proof.into_iter().map(hash).collect()))
}

/// The initial signature commitment, proving the signature of `chosen`
/// and claiming every validator in `signed`.
pub fn submit_initial(
    info: &BeefyRelayInfo,
    chosen: &VerifiedSignature,
    signed: &[VerifiedSignature],
) -> Result<Bytes> {
    let bitfield = claims_bitfield(
        signed.iter().map(|s| s.position),
        info.validator_addresses.len(),
    );
    Ok(call(
        SUBMIT_INITIAL,
        &[
            hash(info.commitment_hash),
            Token::Array(bitfield.into_iter().map(Token::Uint).collect()),
            Token::Bytes(ethereum_signature(&chosen.signature)),
            Token::Uint(chosen.position.into()),
            Token::Address(chosen.address),
            proof_of(info, chosen)?,
        ],
    ))
}

/// The completion of the verification started under `validation_id`,
/// carrying every verified signature.
pub fn submit_complete(
    info: &BeefyRelayInfo,
    validation_id: U256,
    signed: &[VerifiedSignature],
) -> Result<Bytes> {
    let commitment = Token::Tuple(vec![
        Token::FixedBytes(info.commitment.payload.to_vec()),
        Token::Uint(info.commitment.block_number.into()),
        Token::Uint(info.commitment.validator_set_id.into()),
    ]);
    let proofs = signed
        .iter()
        .map(|s| proof_of(info, s))
        .collect::<Result<Vec<_>>>()?;
    Ok(call(
        SUBMIT_COMPLETE,
        &[
            Token::Uint(validation_id),
            hash(info.commitment_hash),
            commitment,
            Token::Array(
                signed
                    .iter()
                    .map(|s| Token::Bytes(ethereum_signature(&s.signature)))
                    .collect(),
            ),
            Token::Array(
                signed.iter().map(|s| Token::Uint(s.position.into())).collect(),
            ),
            Token::Array(signed.iter().map(|s| Token::Address(s.address)).collect()),
            Token::Array(proofs),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use artemis_relayer_types::message::{ChannelId, CommitmentMessage};
    use ethers::abi::{decode, ParamType};

    use super::*;

    #[test]
    fn inbound_submit_layout() {
        let commitment = SubstrateCommitment {
            channel_id: ChannelId::BASIC,
            commitment_hash: H256::repeat_byte(9),
            block_number: 3,
            messages: vec![CommitmentMessage {
                target: [0x11; 20],
                nonce: 4,
                payload: vec![1, 2, 3],
            }],
        };
        let data = inbound_submit(&commitment);
        assert_eq!(&data[..4], &id(INBOUND_SUBMIT)[..]);
        let tokens = decode(
            &[
                ParamType::Array(Box::new(ParamType::Tuple(vec![
                    ParamType::Address,
                    ParamType::Uint(64),
                    ParamType::Bytes,
                ]))),
                ParamType::FixedBytes(32),
            ],
            &data[4..],
        )
        .unwrap();
        let Token::Array(messages) = &tokens[0] else {
            panic!("expected an array")
        };
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0],
            Token::Tuple(vec![
                Token::Address([0x11; 20].into()),
                Token::Uint(4u64.into()),
                Token::Bytes(vec![1, 2, 3]),
            ])
        );
        assert_eq!(tokens[1], Token::FixedBytes(vec![9; 32]));
    }

    #[test]
    fn recovery_id_is_shifted_for_the_light_client() {
        let mut signature = [0u8; 65];
        signature[64] = 1;
        assert_eq!(ethereum_signature(&signature)[64], 28);
        signature[64] = 27;
        assert_eq!(ethereum_signature(&signature)[64], 27);
    }
}
