use crate::{metrics::Metrics, Action, Agent, Block, Config, Error, Server, State};
use commonware_cryptography::sha256::Digest;
use commonware_macros::select;
use commonware_runtime::{Clock, Metrics as RuntimeMetrics};
use commonware_utils::SystemTimeExt;
use fastchain_committee::{
    handoff, validate, CommitteeInfo, CommitteeNode, EncryptNodeMessage, PbftSign, SwitchInfos,
    VoteResult,
};
use fastchain_crypto::{Address, PrivateKey, PublicKey, PublicKeyExt};
use futures::{stream::FuturesUnordered, StreamExt};
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use tracing::{debug, info, warn};

/// Result of recording a vote.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// No quorum yet. Counts are for the block the vote was cast on.
    Pending { agree: usize, against: usize },
    /// A quorum of members voted the same way on the block.
    Finalized(VoteResult),
}

/// Votes cast on blocks at a single height, keyed by the voter's coinbase.
struct Tally {
    height: u64,
    votes: HashMap<Address, PbftSign>,
    /// Block that reached a quorum and how it was decided.
    decided: Option<(Digest, VoteResult)>,
}

impl Tally {
    fn new(height: u64) -> Self {
        Self {
            height,
            votes: HashMap::new(),
            decided: None,
        }
    }

    fn count(&self, digest: &Digest, result: VoteResult) -> usize {
        self.votes
            .values()
            .filter(|vote| &vote.fast_hash == digest && vote.result == result)
            .count()
    }
}

/// Everything tracked for one installed committee.
struct Committee {
    info: CommitteeInfo,
    state: State,
    nodes: BTreeMap<Address, CommitteeNode>,
    stop_height: Option<u64>,
    tally: Tally,
}

impl Committee {
    fn new(info: CommitteeInfo) -> Self {
        let tally = Tally::new(info.start_height);
        Self {
            info,
            state: State::Pending,
            nodes: BTreeMap::new(),
            stop_height: None,
            tally,
        }
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.state == State::Stopped {
            return Err(Error::CommitteeTerminated(self.info.id));
        }
        Ok(())
    }

    /// Replace the membership, dropping endpoints and votes of members that left.
    fn install(&mut self, info: CommitteeInfo) {
        self.nodes
            .retain(|coinbase, _| info.participant(coinbase).is_some());
        self.tally
            .votes
            .retain(|voter, _| info.member(voter).is_some());
        self.info = info;
    }

    /// Check and count a vote. Nothing is recorded unless the vote is valid.
    fn record(
        &mut self,
        namespace: &[u8],
        vote: &PbftSign,
        voter: &PublicKey,
    ) -> Result<Outcome, Error> {
        if !self.state.is_active() {
            return Err(Error::NotActive(self.info.id));
        }
        let coinbase = voter.address();
        if self.info.member(&coinbase).is_none() {
            return Err(Error::UnknownVoter(coinbase));
        }
        vote.verify(namespace, voter)?;
        if vote.fast_height < self.tally.height {
            return Err(Error::StaleHeight(vote.fast_height, self.tally.height));
        }
        if vote.fast_height > self.tally.height {
            return Err(Error::UnexpectedHeight(vote.fast_height, self.tally.height));
        }
        match self.tally.votes.get(&coinbase) {
            Some(existing) if existing.hash_with_no_sign() != vote.hash_with_no_sign() => {
                return Err(Error::ConflictingVote(coinbase));
            }
            Some(_) => {}
            None => {
                self.tally.votes.insert(coinbase, vote.clone());
            }
        }
        if let Some((_, result)) = self.tally.decided {
            return Ok(Outcome::Finalized(result));
        }

        let quorum = self.info.quorum();
        let agree = self.tally.count(&vote.fast_hash, VoteResult::Agree);
        let against = self.tally.count(&vote.fast_hash, VoteResult::Against);
        let decided = if agree >= quorum {
            VoteResult::Agree
        } else if against >= quorum {
            VoteResult::Against
        } else {
            return Ok(Outcome::Pending { agree, against });
        };
        self.tally.decided = Some((vote.fast_hash, decided));
        Ok(Outcome::Finalized(decided))
    }

    fn status(&self) -> BTreeMap<String, Value> {
        let members = self
            .info
            .members
            .iter()
            .map(|member| {
                json!({
                    "coinbase": member.coinbase.to_string(),
                    "public_key": member.public_key.to_string(),
                    "flag": member.flag as u8,
                    "reachable": self.nodes.contains_key(&member.coinbase),
                })
            })
            .collect::<Vec<_>>();
        let back_members = self
            .info
            .back_members
            .iter()
            .map(|member| member.coinbase.to_string())
            .collect::<Vec<_>>();
        let agree = self
            .tally
            .votes
            .values()
            .filter(|vote| vote.result == VoteResult::Agree)
            .count();
        let against = self.tally.votes.len() - agree;

        let mut status = BTreeMap::new();
        status.insert("id".to_string(), json!(self.info.id));
        status.insert("state".to_string(), json!(self.state.to_string()));
        status.insert("start_height".to_string(), json!(self.info.start_height));
        status.insert("members".to_string(), json!(members));
        status.insert("back_members".to_string(), json!(back_members));
        status.insert("nodes".to_string(), json!(self.nodes.len()));
        status.insert("height".to_string(), json!(self.tally.height));
        status.insert(
            "votes".to_string(),
            json!({ "agree": agree, "against": against }),
        );
        status.insert("stop_height".to_string(), json!(self.stop_height));
        status
    }
}

#[derive(Default)]
struct Registry {
    committees: HashMap<u64, Arc<Mutex<Committee>>>,
    /// Id of the last committee installed.
    last_id: Option<u64>,
    /// Height at which the most recent committee was retired.
    retired: u64,
}

/// Reference [Server] that tracks committee lifecycles and tallies votes.
pub struct Engine<E: Clock + RuntimeMetrics, A: Agent> {
    context: E,
    agent: A,

    namespace: Vec<u8>,
    max_members: usize,
    handoff_freshness: Duration,
    handoff_synchrony_bound: Duration,

    registry: Mutex<Registry>,

    metrics: Metrics,
}

impl<E: Clock + RuntimeMetrics, A: Agent> Engine<E, A> {
    pub fn new(context: E, agent: A, cfg: Config) -> Self {
        let metrics = Metrics::init(&context);
        Self {
            context,
            agent,
            namespace: cfg.namespace,
            max_members: cfg.max_members,
            handoff_freshness: cfg.handoff_freshness,
            handoff_synchrony_bound: cfg.handoff_synchrony_bound,
            registry: Mutex::new(Registry::default()),
            metrics,
        }
    }

    fn committee(&self, id: u64) -> Result<Arc<Mutex<Committee>>, Error> {
        self.registry
            .lock()
            .unwrap()
            .committees
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownCommittee(id))
    }

    fn check_size(&self, info: &CommitteeInfo) -> Result<(), Error> {
        let size = info.members.len().max(info.back_members.len());
        if size > self.max_members {
            return Err(Error::TooManyMembers(size, self.max_members));
        }
        Ok(())
    }

    fn retire(&self, id: u64, height: u64) {
        let mut registry = self.registry.lock().unwrap();
        registry.retired = registry.retired.max(height);
        info!(id, height, "committee retired");
    }

    /// Apply a membership delta to committee `id` and return the resulting snapshot.
    pub fn switch(&self, id: u64, infos: &SwitchInfos) -> Result<CommitteeInfo, Error> {
        let committee = self.committee(id)?;
        let mut committee = committee.lock().unwrap();
        committee.ensure_live()?;
        let next = committee.info.apply(infos)?;
        self.check_size(&next)?;
        validate(&next, None)?;
        committee.install(next.clone());
        info!(
            id,
            members = next.members.len(),
            changes = infos.vals.len(),
            "switched committee"
        );
        Ok(next)
    }

    /// Verify a hand-off message from `sender` and register the endpoint sealed for `recipient`.
    ///
    /// Returns [None] if no endpoint in the message is addressed to `recipient`.
    pub fn accept_handoff(
        &self,
        msg: &EncryptNodeMessage,
        sender: &PublicKey,
        recipient: &PrivateKey,
    ) -> Result<Option<CommitteeNode>, Error> {
        let now = self.context.current().epoch_millis();
        handoff::verify(
            &self.namespace,
            msg,
            sender,
            now,
            self.handoff_freshness,
            self.handoff_synchrony_bound,
        )?;
        let Some(node) = msg.open(recipient, &self.namespace) else {
            debug!(id = msg.committee_id, "hand-off not addressed to us");
            return Ok(None);
        };
        if &node.public_key != sender {
            return Err(Error::SenderMismatch);
        }
        self.put_nodes(msg.committee_id, vec![node.clone()])?;
        Ok(Some(node))
    }

    /// Record `vote`, cast by `voter`, for committee `id`.
    ///
    /// Only voting members are counted. Standbys are rejected until a delta promotes them.
    pub fn vote(&self, id: u64, vote: &PbftSign, voter: &PublicKey) -> Result<Outcome, Error> {
        let committee = self.committee(id)?;
        let result = committee
            .lock()
            .unwrap()
            .record(&self.namespace, vote, voter);
        match &result {
            Ok(outcome) => {
                self.metrics.votes_accepted.inc();
                debug!(id, height = vote.fast_height, voter = %voter.address(), ?outcome, "recorded vote");
            }
            Err(err) => {
                self.metrics.votes_rejected.inc();
                debug!(id, voter = %voter.address(), ?err, "rejected vote");
            }
        }
        result
    }

    /// Note that the block at `height` was committed.
    ///
    /// Vote collection moves on to the next height and every committee whose stop height has been
    /// reached is stopped.
    pub fn finalized(&self, height: u64) {
        let committees: Vec<_> = self
            .registry
            .lock()
            .unwrap()
            .committees
            .iter()
            .map(|(id, committee)| (*id, committee.clone()))
            .collect();
        for (id, committee) in committees {
            let mut committee = committee.lock().unwrap();
            if committee.state == State::Stopped {
                continue;
            }
            if committee.tally.height <= height {
                committee.tally = Tally::new(height + 1);
            }
            let Some(stop_height) = committee.stop_height else {
                continue;
            };
            if height >= stop_height {
                committee.state = State::Stopped;
                drop(committee);
                self.metrics.transitions.inc();
                warn!(id, stop_height, "committee reached stop height");
                self.retire(id, stop_height);
            }
        }
        self.metrics.height.set(height as i64);
    }

    /// Ask the [Agent] for the next candidate block for committee `id`.
    ///
    /// Fails with [Error::Timeout] if no candidate is produced before `deadline`.
    pub async fn propose(
        &self,
        id: u64,
        switches: Option<SwitchInfos>,
        deadline: SystemTime,
    ) -> Result<A::Block, Error> {
        self.ensure_active(id)?;
        let mut agent = self.agent.clone();
        let result = select! {
            _ = self.context.sleep_until(deadline) => {
                Err(Error::Timeout)
            },
            result = agent.fetch_fast_block(id, switches) => {
                result
            },
        };
        match &result {
            Ok(block) => debug!(id, height = block.height(), "proposed block"),
            Err(err) => warn!(id, ?err, "failed to propose"),
        }
        result
    }

    /// Collect votes on `block` from `voters` until a quorum decides it or `deadline` passes.
    ///
    /// Each voter is asked through its own [Agent]. A voter that does not answer before
    /// `deadline`, returns an error, or casts an invalid vote is counted as absent. The round
    /// fails with [Error::QuorumUnreachable] as soon as neither outcome can reach a quorum.
    ///
    /// If votes already recorded through [Engine::vote] decided the block, that result is
    /// returned without asking any voter.
    pub async fn collect(
        &self,
        id: u64,
        block: &A::Block,
        voters: Vec<(PublicKey, A)>,
        deadline: SystemTime,
    ) -> Result<VoteResult, Error> {
        let digest = block.digest();
        let (quorum, mut agree, mut against) = {
            let committee = self.committee(id)?;
            let committee = committee.lock().unwrap();
            if !committee.state.is_active() {
                return Err(Error::NotActive(id));
            }
            if let Some((decided, result)) = committee.tally.decided {
                if committee.tally.height == block.height() && decided == digest {
                    debug!(id, height = block.height(), ?result, "round already decided");
                    return Ok(result);
                }
            }
            (
                committee.info.quorum(),
                committee.tally.count(&digest, VoteResult::Agree),
                committee.tally.count(&digest, VoteResult::Against),
            )
        };

        let mut pending: FuturesUnordered<_> = voters
            .into_iter()
            .map(|(voter, mut agent)| {
                let context = self.context.clone();
                let block = block.clone();
                async move {
                    let vote = select! {
                        _ = context.sleep_until(deadline) => {
                            None
                        },
                        result = agent.verify_fast_block(block) => {
                            Some(result)
                        },
                    };
                    (voter, vote)
                }
            })
            .collect();
        while let Some((voter, vote)) = pending.next().await {
            match vote {
                None => {
                    self.metrics.timeouts.inc();
                    warn!(id, voter = %voter.address(), "voter missed deadline");
                }
                Some(Err(err)) => {
                    debug!(id, voter = %voter.address(), ?err, "voter failed to verify");
                }
                Some(Ok(vote)) if vote.fast_height != block.height() || vote.fast_hash != digest => {
                    debug!(id, voter = %voter.address(), "vote for another block");
                }
                Some(Ok(vote)) => match self.vote(id, &vote, &voter) {
                    Ok(Outcome::Finalized(result)) => {
                        self.metrics.finalized.inc();
                        info!(id, height = block.height(), ?result, "round decided");
                        return Ok(result);
                    }
                    Ok(Outcome::Pending {
                        agree: a,
                        against: b,
                    }) => {
                        agree = a;
                        against = b;
                    }
                    Err(_) => {}
                },
            }

            let remaining = pending.len();
            if agree + remaining < quorum && against + remaining < quorum {
                break;
            }
        }

        let possible = agree.max(against) + pending.len();
        warn!(id, height = block.height(), possible, quorum, "quorum unreachable");
        Err(Error::QuorumUnreachable(possible, quorum))
    }

    /// Commit a decided block and disseminate it.
    pub async fn commit(&self, block: A::Block) -> Result<(), Error> {
        let mut agent = self.agent.clone();
        agent.broadcast_consensus(block.clone()).await?;
        let height = block.height();
        agent.broadcast_fast_block(block);
        self.finalized(height);
        Ok(())
    }

    fn ensure_active(&self, id: u64) -> Result<(), Error> {
        let committee = self.committee(id)?;
        let committee = committee.lock().unwrap();
        if !committee.state.is_active() {
            return Err(Error::NotActive(id));
        }
        Ok(())
    }
}

impl<E: Clock + RuntimeMetrics, A: Agent> Server for Engine<E, A> {
    fn put_committee(&self, info: CommitteeInfo) -> Result<(), Error> {
        self.check_size(&info)?;
        let mut registry = self.registry.lock().unwrap();
        validate(&info, registry.last_id)?;
        if info.start_height < registry.retired {
            return Err(Error::StartHeightRegression(
                info.start_height,
                registry.retired,
            ));
        }
        let id = info.id;
        let members = info.members.len();
        let start_height = info.start_height;
        registry.last_id = Some(id);
        registry
            .committees
            .insert(id, Arc::new(Mutex::new(Committee::new(info))));
        drop(registry);

        self.metrics.committees.inc();
        info!(id, members, start_height, "installed committee");
        Ok(())
    }

    fn update_committee(&self, info: CommitteeInfo) -> Result<(), Error> {
        self.check_size(&info)?;
        validate(&info, None)?;
        let id = info.id;
        let committee = self.committee(id)?;
        let mut committee = committee.lock().unwrap();
        committee.ensure_live()?;
        let members = info.members.len();
        committee.install(info);
        info!(id, members, "updated committee");
        Ok(())
    }

    fn put_nodes(&self, id: u64, nodes: Vec<CommitteeNode>) -> Result<(), Error> {
        let committee = self.committee(id)?;
        let mut committee = committee.lock().unwrap();
        committee.ensure_live()?;
        for node in &nodes {
            if !node.verify() {
                return Err(fastchain_committee::Error::InvalidMember(node.coinbase).into());
            }
            if committee.info.participant(&node.coinbase).is_none() {
                return Err(Error::UnknownNode(node.coinbase));
            }
        }
        for node in nodes {
            committee.nodes.insert(node.coinbase, node);
        }
        debug!(id, nodes = committee.nodes.len(), "registered endpoints");
        Ok(())
    }

    fn notify(&self, id: u64, action: Action) -> Result<(), Error> {
        let committee = self.committee(id)?;
        let mut committee = committee.lock().unwrap();
        committee.ensure_live()?;
        let previous = committee.state;
        let Some(next) = previous.next(action) else {
            return Err(Error::InvalidTransition(id, previous, action));
        };
        if action == Action::Start {
            let height = committee
                .info
                .start_height
                .max(self.agent.current_height() + 1);
            committee.tally = Tally::new(height);
        }
        committee.state = next;
        drop(committee);

        self.metrics.transitions.inc();
        info!(id, ?action, %previous, %next, "committee transitioned");
        if next == State::Stopped {
            self.retire(id, self.agent.current_height());
        }
        Ok(())
    }

    fn set_committee_stop(&self, id: u64, stop_height: u64) -> Result<(), Error> {
        let committee = self.committee(id)?;
        let mut committee = committee.lock().unwrap();
        committee.ensure_live()?;
        let current = self.agent.current_height();
        if stop_height > current {
            committee.stop_height = Some(stop_height);
            info!(id, stop_height, "scheduled committee stop");
            return Ok(());
        }
        committee.stop_height = Some(stop_height);
        committee.state = State::Stopped;
        drop(committee);
        self.metrics.transitions.inc();
        warn!(id, stop_height, current, "stopped committee");
        self.retire(id, stop_height);
        Ok(())
    }

    fn committee_status(&self, id: u64) -> BTreeMap<String, Value> {
        let Ok(committee) = self.committee(id) else {
            return BTreeMap::new();
        };
        let committee = committee.lock().unwrap();
        committee.status()
    }
}
