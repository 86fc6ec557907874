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


use std::future::Future;

use artemis_relayer_utils::Result;
use tokio::sync::Mutex;

/// Assigns nonces of one account, one submission at a time.
///
/// The nonce is held locked for the whole submission, so concurrent callers
/// are served in turn and never see the same nonce twice. It is incremented
/// only when the submission succeeds.
#[derive(Debug)]
pub struct NonceSequencer {
    next: Mutex<u64>,
}

impl NonceSequencer {
    /// Starts at `nonce`, usually the account nonce read from the chain.
    pub fn new(nonce: u64) -> Self {
        Self {
            next: Mutex::new(nonce),
        }
    }

    /// The nonce the next submission will use.
    pub async fn current(&self) -> u64 {
        *self.next.lock().await
    }

    /// Runs `submit` with the next nonce.
    ///
    /// On error the nonce is left untouched and the error is returned.
    pub async fn submit<T, F, Fut>(&self, submit: F) -> Result<T>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut next = self.next.lock().await;
        let output = submit(*next).await?;
        *next += 1;
        Ok(output)
    }
}
