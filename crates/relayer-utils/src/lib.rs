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


//! # Relayer Utils Module 🛠️
//!
//! Shared error type, retry policy, probe events and task supervision
//! used by every crate of the Artemis relayer.

#![warn(missing_docs)]

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Provider, Ws};
use ethers::signers::LocalWallet;

/// A module used for debugging relayer lifecycle, sync state, or other relayer state.
pub mod probe;
/// Retry functionality
pub mod retry;
/// Fail-fast supervision of the relayer tasks.
pub mod task_group;

/// The signing client used to send transactions to Ethereum.
pub type EthereumSignerClient = SignerMiddleware<Provider<Ws>, LocalWallet>;

/// An enum of all possible errors that could be encountered during the execution of the
/// Artemis Relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Sled transaction error.
    #[error(transparent)]
    SledTransaction(
        #[from] sled::transaction::TransactionError<std::io::Error>,
    ),
    /// Error in the ethers provider.
    #[error(transparent)]
    EthersProvider(#[from] ethers::providers::ProviderError),
    /// Error while signing or sending a transaction through the signer middleware.
    #[error(transparent)]
    EthersSigner(
        #[from]
        ethers::middleware::signer::SignerMiddlewareError<
            Provider<Ws>,
            LocalWallet,
        >,
    ),
    /// Contract ABI encoding or decoding error.
    #[error(transparent)]
    EthersAbi(#[from] ethers::abi::Error),
    /// Ether wallet errors.
    #[error(transparent)]
    EtherWalletError(#[from] ethers::signers::WalletError),
    /// Malformed or unrecoverable ECDSA signature.
    #[error(transparent)]
    Signature(#[from] ethers::types::SignatureError),
    /// Invalid secp256k1 public key.
    #[error(transparent)]
    EcdsaKey(#[from] ethers::core::k256::ecdsa::Error),
    /// Basic error for the substrate runtime.
    #[error(transparent)]
    SubxtError(#[from] subxt::Error),
    /// Runtime metadata error.
    #[error(transparent)]
    Metadata(#[from] subxt::error::MetadataError),
    /// SCALE Codec error.
    #[error(transparent)]
    ScaleCodec(#[from] codec::Error),
    /// Hex decoding error.
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// The surrounding task group was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
    /// A remote read failed in a way that is expected to heal on its own.
    #[error("Transient error: {}", _0)]
    Transient(String),
    /// A block is not yet finalized.
    #[error("Block {block} is not finalized yet (finalized head: {finalized})")]
    NotFinalized {
        /// The block we are waiting for.
        block: u64,
        /// The current finalized head.
        finalized: u64,
    },
    /// The commitment referenced by a header digest is missing in off-chain storage.
    #[error("Commitment {} not found in off-chain storage", _0)]
    OffchainStorageMiss(String),
    /// A writer received a message variant it cannot turn into a call.
    #[error("{writer} cannot handle message of kind {kind}")]
    UnsupportedMessage {
        /// The name of the writer.
        writer: &'static str,
        /// The message variant tag.
        kind: &'static str,
    },
    /// A relay status transition that would move backwards or skip a step.
    #[error("Invalid relay status transition from {from} to {to}")]
    InvalidStatusTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },
    /// A status requires a transaction hash that the record does not carry.
    #[error("Status {status} requires the {field} to be set")]
    MissingTransactionHash {
        /// The requested status.
        status: String,
        /// The missing field.
        field: &'static str,
    },
    /// A relay record already exists for this commitment hash.
    #[error("Relay record for commitment {} already exists", _0)]
    RecordAlreadyExists(String),
    /// No relay record exists for this commitment hash.
    #[error("Relay record for commitment {} not found", _0)]
    RecordNotFound(String),
    /// A submission for this nonce is already in flight.
    #[error("An extrinsic with nonce {} is already in flight", _0)]
    DuplicateNonce(u64),
    /// A signature did not verify against the expected signer.
    #[error("Invalid signature: {}", _0)]
    InvalidSignature(String),
    /// A message was signed by a key outside the trusted signer set.
    #[error("Message signed by untrusted signer {}", _0)]
    UntrustedSigner(ethers::types::Address),
    /// A chain was started before its sender/receiver channels were set.
    #[error("{} needs a sender and/or receiver before starting", _0)]
    MissingSender(&'static str),
    /// A configuration section required by a component is missing.
    #[error("Missing configuration: {}", _0)]
    MissingConfig(&'static str),
    /// No contract is configured for the given target.
    #[error("No contract configured for {}", _0)]
    ContractNotFound(String),
    /// A receipt or block that must exist was not returned by the node.
    #[error("{} not found", _0)]
    NotFound(String),
    /// A transaction was mined but reverted.
    #[error("Transaction {} reverted", _0)]
    TransactionReverted(String),
    /// A task panicked while running inside the task group.
    #[error("Task {} panicked", _0)]
    TaskPanicked(String),
    /// A payload could not be decoded into the expected shape.
    #[error("Decode error: {}", _0)]
    Decode(String),
    /// The peer end of a channel was dropped.
    #[error("Channel {} closed", _0)]
    ChannelClosed(&'static str),
}

impl Error {
    /// Returns true if retrying the failed operation may succeed.
    ///
    /// Remote RPC failures, unfinalized blocks and off-chain storage misses
    /// are transient. Decode, validation and configuration errors are not,
    /// and neither is an extrinsic the transaction pool refused.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::SubxtError(e) => is_transient_subxt(e),
            _ => matches!(
                self,
                Error::Io(_)
                    | Error::EthersProvider(_)
                    | Error::Transient(_)
                    | Error::NotFinalized { .. }
                    | Error::OffchainStorageMiss(_)
                    | Error::NotFound(_)
            ),
        }
    }
}

/// Messages of the transaction pool errors a node answers a submission
/// with. The same extrinsic is refused again when resubmitted.
const POOL_REJECTIONS: &[&str] = &[
    "Invalid Transaction",
    "Unknown Transaction Validity",
    "Transaction is temporarily banned",
    "Transaction Already Imported",
    "Priority is too low",
    "bad signature",
];

fn is_transient_subxt(e: &subxt::Error) -> bool {
    use subxt::error::{RpcError, TransactionError};
    match e {
        subxt::Error::Io(_) => true,
        subxt::Error::Rpc(RpcError::SubscriptionDropped) => true,
        subxt::Error::Rpc(RpcError::ClientError(e)) => {
            let message = e.to_string();
            !POOL_REJECTIONS.iter().any(|r| message.contains(r))
        }
        subxt::Error::Transaction(TransactionError::Dropped(_)) => true,
        _ => false,
    }
}

/// A type alias for the result for artemis relayer, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;
