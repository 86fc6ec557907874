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


//! The values flowing through the listener → writer channels.

use codec::{Decode, Encode};
use derive_more::Display;
use ethers::types::{Address, Block, Log, H256, U256};
use ethers::utils::keccak256;
use ethers::utils::rlp::RlpStream;
use serde::{Deserialize, Serialize};

/// Prefix of the off-chain storage keys the commitments pallet writes to.
pub const COMMITMENT_INDEXING_PREFIX: &[u8] = b"commitment";

/// Identifies a lane of the bridge.
///
/// Encoded as a single byte, the same layout as the channel enum on the
/// parachain (`0` basic, `1` incentivized).
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
#[display(fmt = "{}", _0)]
#[serde(transparent)]
pub struct ChannelId(pub u8);

impl ChannelId {
    /// The basic outbound channel.
    pub const BASIC: Self = Self(0);
    /// The incentivized outbound channel.
    pub const INCENTIVIZED: Self = Self(1);
}

/// A single application message bundled into a parachain commitment.
#[derive(
    Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize,
)]
pub struct CommitmentMessage {
    /// The Ethereum contract the message is delivered to.
    pub target: [u8; 20],
    /// The per-channel message nonce.
    pub nonce: u64,
    /// ABI encoded call data.
    pub payload: Vec<u8>,
}

impl CommitmentMessage {
    /// The target contract address.
    pub fn target(&self) -> Address {
        Address::from(self.target)
    }
}

/// The digest item the commitments pallet deposits into a block header.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum AuxiliaryDigestItem {
    /// The hash of the commitment of `channel` built in this block.
    #[codec(index = 0)]
    Commitment(ChannelId, [u8; 32]),
}

impl AuxiliaryDigestItem {
    /// The channel this commitment belongs to.
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Self::Commitment(channel_id, _) => *channel_id,
        }
    }

    /// The commitment hash carried by this item.
    pub fn commitment_hash(&self) -> H256 {
        match self {
            Self::Commitment(_, hash) => H256(*hash),
        }
    }

    /// The key under which the commitment was indexed in off-chain storage.
    pub fn offchain_key(&self) -> Vec<u8> {
        match self {
            Self::Commitment(channel_id, hash) => {
                (COMMITMENT_INDEXING_PREFIX, channel_id, hash).encode()
            }
        }
    }
}

/// A `pallet.call` pair on the parachain.
#[derive(
    Clone, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[display(fmt = "{}.{}", pallet, call)]
pub struct CallName {
    /// Pallet name, as in the runtime metadata.
    pub pallet: String,
    /// Call name, as in the runtime metadata.
    pub call: String,
}

impl CallName {
    /// Creates a new call name.
    pub fn new(pallet: impl Into<String>, call: impl Into<String>) -> Self {
        Self {
            pallet: pallet.into(),
            call: call.into(),
        }
    }
}

/// A call to dispatch on the parachain, with its SCALE encoded arguments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParachainMessage {
    /// The call to dispatch.
    pub call: CallName,
    /// The SCALE encoded call arguments.
    pub args: Vec<u8>,
}

impl subxt::tx::TxPayload for ParachainMessage {
    fn encode_call_data_to(
        &self,
        metadata: &subxt::Metadata,
        out: &mut Vec<u8>,
    ) -> Result<(), subxt::Error> {
        let pallet = metadata.pallet_by_name_err(&self.call.pallet)?;
        let call = pallet.call_variant_by_name(&self.call.call).ok_or_else(
            || {
                subxt::error::MetadataError::CallNameNotFound(
                    self.call.call.clone(),
                )
            },
        )?;
        pallet.index().encode_to(out);
        call.index.encode_to(out);
        out.extend_from_slice(&self.args);
        Ok(())
    }
}

/// An application event observed on Ethereum, with the relayer's proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumMessage {
    /// The application contract that emitted the event.
    pub app_id: Address,
    /// The block the event was emitted in.
    pub block_number: u64,
    /// `RLP(address, topics, data)` of the log.
    pub data: Vec<u8>,
    /// Signature over `keccak256(data)`.
    pub signature: Vec<u8>,
}

impl EthereumMessage {
    /// RLP encodes the parts of a log that identify the event.
    pub fn encode_log(log: &Log) -> Vec<u8> {
        let mut stream = RlpStream::new_list(3);
        stream.append(&log.address);
        stream.append_list(&log.topics);
        stream.append(&log.data.to_vec());
        stream.out().to_vec()
    }

    /// The hash the proof signature is computed over.
    pub fn digest(&self) -> H256 {
        H256(keccak256(&self.data))
    }

    /// Recovers the address that signed this message.
    pub fn recover_signer(
        &self,
    ) -> Result<Address, ethers::types::SignatureError> {
        let signature =
            ethers::types::Signature::try_from(self.signature.as_slice())?;
        signature.recover(self.digest())
    }
}

/// A parachain commitment to deliver to the inbound channel on Ethereum.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstrateCommitment {
    /// The channel the commitment belongs to.
    pub channel_id: ChannelId,
    /// The hash committed to in the parachain header digest.
    pub commitment_hash: H256,
    /// The parachain block that carried the commitment.
    pub block_number: u64,
    /// The committed messages, in order.
    pub messages: Vec<CommitmentMessage>,
}

/// Everything a listener may hand to a writer.
///
/// The variant decides which writer can turn it into a transaction; a
/// writer receiving a variant it cannot handle reports
/// `Error::UnsupportedMessage`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// A call to dispatch on the parachain.
    Parachain(ParachainMessage),
    /// An Ethereum application event together with its proof.
    Ethereum(EthereumMessage),
    /// A parachain commitment bound for the Ethereum inbound channel.
    Commitment(SubstrateCommitment),
}

impl Message {
    /// A short tag naming the variant, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Parachain(_) => "parachain",
            Message::Ethereum(_) => "ethereum",
            Message::Commitment(_) => "commitment",
        }
    }
}

/// Identifies an Ethereum block.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
pub struct HeaderId {
    /// The block hash.
    pub hash: [u8; 32],
    /// The block number.
    pub number: u64,
}

/// A raw header and the proof that goes with it.
///
/// Both are opaque to the listener; the writer on the other chain knows
/// how to submit them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// The number of the header, for logging.
    pub number: u64,
    /// The encoded header.
    pub header_data: Vec<u8>,
    /// The encoded proof.
    pub proof_data: Vec<u8>,
}

/// The Ethereum header layout the parachain light client imports.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct EthereumHeader {
    pub parent_hash: [u8; 32],
    pub timestamp: u64,
    pub number: u64,
    pub author: [u8; 20],
    pub transactions_root: [u8; 32],
    pub ommers_hash: [u8; 32],
    pub extra_data: Vec<u8>,
    pub state_root: [u8; 32],
    pub receipts_root: [u8; 32],
    pub logs_bloom: [u8; 256],
    pub gas_used: [u64; 4],
    pub gas_limit: [u64; 4],
    pub difficulty: [u64; 4],
    pub seal: Vec<Vec<u8>>,
}

impl EthereumHeader {
    /// Converts a block returned by the node.
    ///
    /// Returns `None` for pending blocks, which have no number or hash yet.
    pub fn from_block(block: &Block<H256>) -> Option<Self> {
        let number = block.number?.as_u64();
        let mut seal = Vec::with_capacity(2);
        if let Some(mix_hash) = block.mix_hash {
            seal.push(ethers::utils::rlp::encode(&mix_hash).to_vec());
        }
        if let Some(nonce) = block.nonce {
            seal.push(ethers::utils::rlp::encode(&nonce).to_vec());
        }
        Some(Self {
            parent_hash: block.parent_hash.0,
            timestamp: low_u64(block.timestamp),
            number,
            author: block.author.unwrap_or_default().0,
            transactions_root: block.transactions_root.0,
            ommers_hash: block.uncles_hash.0,
            extra_data: block.extra_data.to_vec(),
            state_root: block.state_root.0,
            receipts_root: block.receipts_root.0,
            logs_bloom: block.logs_bloom.unwrap_or_default().0,
            gas_used: block.gas_used.0,
            gas_limit: block.gas_limit.0,
            difficulty: block.difficulty.0,
            seal,
        })
    }

    /// Encodes the header and an empty proof set into a [`Header`].
    pub fn into_header(self) -> Header {
        // TODO: produce ethash proofs once the light client verifies PoW.
        let proof: Vec<Vec<u8>> = Vec::new();
        Header {
            number: self.number,
            header_data: self.encode(),
            proof_data: proof.encode(),
        }
    }
}

fn low_u64(value: U256) -> u64 {
    value.low_u64()
}

#[cfg(test)]
mod tests {
    use ethers::types::{Bytes, U64};
    use ethers::utils::rlp::Rlp;

    use super::*;

    #[test]
    fn log_encoding_is_rlp_of_address_topics_and_data() {
        let log = Log {
            address: Address::repeat_byte(0xaa),
            topics: vec![H256::repeat_byte(1), H256::repeat_byte(2)],
            data: Bytes::from(vec![1u8, 2, 3]),
            block_number: Some(U64::from(100)),
            ..Default::default()
        };
        let encoded = EthereumMessage::encode_log(&log);
        let rlp = Rlp::new(&encoded);
        assert_eq!(rlp.item_count().unwrap(), 3);
        let address: Address = rlp.val_at(0).unwrap();
        let topics: Vec<H256> = rlp.list_at(1).unwrap();
        let data: Vec<u8> = rlp.val_at(2).unwrap();
        assert_eq!(address, log.address);
        assert_eq!(topics, log.topics);
        assert_eq!(data, vec![1u8, 2, 3]);
    }

    #[test]
    fn offchain_key_matches_pallet_layout() {
        let item =
            AuxiliaryDigestItem::Commitment(ChannelId::INCENTIVIZED, [7u8; 32]);
        let key = item.offchain_key();
        // compact length prefix of "commitment", the prefix, channel, hash.
        assert_eq!(key[0], (COMMITMENT_INDEXING_PREFIX.len() as u8) << 2);
        assert_eq!(&key[1..11], COMMITMENT_INDEXING_PREFIX);
        assert_eq!(key[11], 1);
        assert_eq!(&key[12..], &[7u8; 32]);
    }

    #[test]
    fn digest_item_decodes_from_header_bytes() {
        let raw = [vec![0u8, 0u8], vec![9u8; 32]].concat();
        let item = AuxiliaryDigestItem::decode(&mut raw.as_slice()).unwrap();
        assert_eq!(item.channel_id(), ChannelId::BASIC);
        assert_eq!(item.commitment_hash(), H256::repeat_byte(9));
    }

    #[test]
    fn pending_blocks_are_not_headers() {
        let block = Block::<H256>::default();
        assert!(EthereumHeader::from_block(&block).is_none());
        let block = Block::<H256> {
            number: Some(U64::from(12)),
            ..Default::default()
        };
        let header = EthereumHeader::from_block(&block).unwrap().into_header();
        assert_eq!(header.number, 12);
        assert_eq!(header.proof_data, vec![0u8]);
    }
}
