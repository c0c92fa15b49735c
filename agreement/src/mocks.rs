//! Scripted block production for engine tests.

use crate::{Agent, Block, Error};
use commonware_cryptography::{sha256::Digest, Hasher, Sha256};
use commonware_runtime::Clock;
use fastchain_committee::{PbftSign, SwitchInfos, VoteResult};
use fastchain_crypto::PrivateKey;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::trace;

/// How an [Application] votes on blocks it is asked to verify.
#[derive(Clone, Debug)]
pub enum Strategy {
    Agree,
    Against,
    /// Agree after waiting for the given duration.
    Slow(Duration),
    /// Reject every block with [Error::InvalidBlock].
    Invalid,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FastBlock {
    pub committee: u64,
    pub height: u64,
    /// Number of membership changes described by the block.
    pub switches: usize,
}

impl FastBlock {
    pub fn new(committee: u64, height: u64) -> Self {
        Self {
            committee,
            height,
            switches: 0,
        }
    }
}

impl Block for FastBlock {
    fn height(&self) -> u64 {
        self.height
    }

    fn digest(&self) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(&self.committee.to_be_bytes());
        hasher.update(&self.height.to_be_bytes());
        hasher.update(&(self.switches as u64).to_be_bytes());
        hasher.finalize()
    }
}

/// Chain state shared by clones of an [Application].
#[derive(Debug)]
pub struct Chain {
    pub height: u64,
    /// Whether a candidate block can be produced.
    pub ready: bool,
    pub committed: Vec<FastBlock>,
    pub broadcast: Vec<FastBlock>,
}

#[derive(Clone)]
pub struct Application<E: Clock> {
    context: E,
    signer: PrivateKey,
    namespace: Vec<u8>,
    strategy: Strategy,
    fetch_delay: Option<Duration>,
    chain: Arc<Mutex<Chain>>,
}

impl<E: Clock> Application<E> {
    pub fn new(context: E, signer: PrivateKey, namespace: &[u8], strategy: Strategy) -> Self {
        Self {
            context,
            signer,
            namespace: namespace.to_vec(),
            strategy,
            fetch_delay: None,
            chain: Arc::new(Mutex::new(Chain {
                height: 0,
                ready: true,
                committed: Vec::new(),
                broadcast: Vec::new(),
            })),
        }
    }

    /// Wait `delay` before producing each candidate.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn chain(&self) -> Arc<Mutex<Chain>> {
        self.chain.clone()
    }
}

impl<E: Clock> Agent for Application<E> {
    type Block = FastBlock;

    async fn fetch_fast_block(
        &mut self,
        committee_id: u64,
        switches: Option<SwitchInfos>,
    ) -> Result<FastBlock, Error> {
        if let Some(delay) = self.fetch_delay {
            self.context.sleep(delay).await;
        }
        let chain = self.chain.lock().unwrap();
        if !chain.ready {
            return Err(Error::NoCandidate);
        }
        Ok(FastBlock {
            committee: committee_id,
            height: chain.height + 1,
            switches: switches.map(|infos| infos.vals.len()).unwrap_or_default(),
        })
    }

    async fn verify_fast_block(&mut self, block: FastBlock) -> Result<PbftSign, Error> {
        let result = match &self.strategy {
            Strategy::Agree => VoteResult::Agree,
            Strategy::Against => VoteResult::Against,
            Strategy::Slow(delay) => {
                self.context.sleep(*delay).await;
                VoteResult::Agree
            }
            Strategy::Invalid => return Err(Error::InvalidBlock),
        };
        trace!(height = block.height, ?result, "verified");
        Ok(PbftSign::sign(
            &self.signer,
            &self.namespace,
            block.height,
            block.digest(),
            result,
        ))
    }

    fn broadcast_fast_block(&mut self, block: FastBlock) {
        self.chain.lock().unwrap().broadcast.push(block);
    }

    async fn broadcast_consensus(&mut self, block: FastBlock) -> Result<(), Error> {
        let mut chain = self.chain.lock().unwrap();
        if block.height <= chain.height {
            return Err(Error::StaleHeight(block.height, chain.height));
        }
        chain.height = block.height;
        chain.committed.push(block);
        Ok(())
    }

    fn current_height(&self) -> u64 {
        self.chain.lock().unwrap().height
    }
}
