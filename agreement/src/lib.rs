//! Drive committee lifecycles and collect fast-block votes.
//!
//! # Overview
//!
//! A node is split into two halves that drive each other through the traits in this crate:
//!
//! - [Agent] is implemented by block production. The agreement side asks it for candidate fast
//!   blocks, for this node's vote on blocks proposed by others, and hands it finalized blocks.
//! - [Server] is implemented by the agreement side. Committee management installs committees and
//!   member endpoints through it and notifies it of lifecycle [Action]s.
//!
//! [Engine] is the reference [Server]. Every committee it knows about moves through the following
//! states:
//!
//! ```txt
//! Pending --Start--> Running --Switchover--> Switching --Over--> Stopped
//!                       |                        |
//!                       +----------Stop----------+-------------> Stopped
//! ```
//!
//! `Stopped` is terminal: every later [Action] fails with [Error::CommitteeTerminated].
//!
//! # Concurrency
//!
//! [Server] methods take `&self` and may be called from any number of tasks. Each committee is
//! guarded by its own lock, so calls for the same committee are linearized while the outgoing and
//! incoming committees of a hand-off proceed independently. Calls into the [Agent] (which may block
//! on I/O) are never made while a committee lock is held and are raced against caller-supplied
//! deadlines. A member that misses a deadline is counted as absent, never as a vote against.

use commonware_cryptography::sha256::Digest;
use fastchain_committee::{
    CommitteeInfo, CommitteeNode, Error as CommitteeError, PbftSign, SwitchInfos,
};
use fastchain_crypto::Address;
use std::{collections::BTreeMap, fmt::Display, future::Future};
use thiserror::Error;

mod config;
pub use config::Config;
mod engine;
pub use engine::{Engine, Outcome};
mod metrics;
#[cfg(test)]
pub mod mocks;

/// A fast block, as far as the agreement protocol is concerned.
pub trait Block: Clone + Send + Sync + 'static {
    /// Height of the block on the fast chain.
    fn height(&self) -> u64;

    /// Digest members vote on.
    fn digest(&self) -> Digest;
}

/// Block production, as seen by the agreement protocol.
pub trait Agent: Clone + Send + Sync + 'static {
    type Block: Block;

    /// Produce the next candidate block for committee `committee_id`.
    ///
    /// If `switches` is provided, the block describes the membership that results from applying
    /// it. Fails with [Error::NoCandidate] if nothing is ready to be proposed.
    fn fetch_fast_block(
        &mut self,
        committee_id: u64,
        switches: Option<SwitchInfos>,
    ) -> impl Future<Output = Result<Self::Block, Error>> + Send;

    /// Check a block proposed by another member and return this node's vote on it.
    ///
    /// An invalid block yields either a vote against it or [Error::InvalidBlock]. It is never
    /// silently ignored.
    fn verify_fast_block(
        &mut self,
        block: Self::Block,
    ) -> impl Future<Output = Result<PbftSign, Error>> + Send;

    /// Disseminate a finalized block. Must not block the caller.
    fn broadcast_fast_block(&mut self, block: Self::Block);

    /// Append a finalized block to the canonical chain.
    ///
    /// Fails with [Error::StaleHeight] if a block at that height is already committed.
    fn broadcast_consensus(
        &mut self,
        block: Self::Block,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Latest committed fast height.
    fn current_height(&self) -> u64;
}

/// The agreement protocol, as seen by committee management.
pub trait Server: Send + Sync {
    /// Install a newly elected committee in the `Pending` state.
    fn put_committee(&self, info: CommitteeInfo) -> Result<(), Error>;

    /// Replace the membership of an installed committee without restarting it.
    fn update_committee(&self, info: CommitteeInfo) -> Result<(), Error>;

    /// Register the endpoints of members of committee `id`.
    ///
    /// Either every endpoint is registered or none is.
    fn put_nodes(&self, id: u64, nodes: Vec<CommitteeNode>) -> Result<(), Error>;

    /// Apply a lifecycle [Action] to committee `id`.
    fn notify(&self, id: u64, action: Action) -> Result<(), Error>;

    /// Stop committee `id` once the fast chain reaches `stop_height`.
    fn set_committee_stop(&self, id: u64, stop_height: u64) -> Result<(), Error>;

    /// Diagnostic snapshot of committee `id` (empty if the committee is unknown).
    fn committee_status(&self, id: u64) -> BTreeMap<String, serde_json::Value>;
}

/// Lifecycle action delivered to a committee.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Action {
    Start = 0,
    Stop = 1,
    Switchover = 2,
    Over = 3,
}

impl TryFrom<u8> for Action {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Start),
            1 => Ok(Self::Stop),
            2 => Ok(Self::Switchover),
            3 => Ok(Self::Over),
            other => Err(Error::InvalidAction(other)),
        }
    }
}

/// Lifecycle state of a committee.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum State {
    Pending,
    Running,
    Switching,
    Stopped,
}

impl State {
    /// Returns the state reached by applying `action`, if the transition exists.
    pub fn next(self, action: Action) -> Option<State> {
        match (self, action) {
            (State::Pending, Action::Start) => Some(State::Running),
            (State::Running, Action::Switchover) => Some(State::Switching),
            (State::Switching, Action::Over) => Some(State::Stopped),
            (State::Running | State::Switching, Action::Stop) => Some(State::Stopped),
            _ => None,
        }
    }

    /// Returns true if the committee may vote.
    pub fn is_active(self) -> bool {
        matches!(self, State::Running | State::Switching)
    }
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Pending => write!(f, "pending"),
            State::Running => write!(f, "running"),
            State::Switching => write!(f, "switching"),
            State::Stopped => write!(f, "stopped"),
        }
    }
}

/// Class of an [Error], which determines how a caller reacts to it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Malformed, duplicate or unauthorized input. Discarded without touching local state.
    Validation,
    /// Bad or stale signature. Discarded without touching local state.
    Signature,
    /// Invalid lifecycle transition or height. The caller must resynchronize.
    State,
    /// A peer or the round did not complete in time.
    Timeout,
}

/// Errors that can occur when driving committees.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid committee: {0}")]
    Committee(#[from] CommitteeError),
    #[error("too many members: {0} (max {1})")]
    TooManyMembers(usize, usize),
    #[error("unknown node: {0}")]
    UnknownNode(Address),
    #[error("unknown voter: {0}")]
    UnknownVoter(Address),
    #[error("conflicting vote from {0}")]
    ConflictingVote(Address),
    #[error("invalid block")]
    InvalidBlock,
    #[error("invalid action: {0}")]
    InvalidAction(u8),
    #[error("hand-off endpoint does not belong to sender")]
    SenderMismatch,

    #[error("unknown committee: {0}")]
    UnknownCommittee(u64),
    #[error("committee {0} cannot apply {2:?} while {1}")]
    InvalidTransition(u64, State, Action),
    #[error("committee {0} is terminated")]
    CommitteeTerminated(u64),
    #[error("committee {0} is not active")]
    NotActive(u64),
    #[error("stale height: {0} (current {1})")]
    StaleHeight(u64, u64),
    #[error("unexpected height: {0} (current {1})")]
    UnexpectedHeight(u64, u64),
    #[error("start height {0} precedes retired height {1}")]
    StartHeightRegression(u64, u64),
    #[error("no candidate block")]
    NoCandidate,

    #[error("timeout")]
    Timeout,
    #[error("quorum unreachable: {0} of {1} required votes possible")]
    QuorumUnreachable(usize, usize),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Committee(err) => match err {
                CommitteeError::BadSignature
                | CommitteeError::Stale(..)
                | CommitteeError::Future(..) => ErrorKind::Signature,
                CommitteeError::Crypto(_) => ErrorKind::Signature,
                _ => ErrorKind::Validation,
            },
            Error::TooManyMembers(..)
            | Error::UnknownNode(_)
            | Error::UnknownVoter(_)
            | Error::ConflictingVote(_)
            | Error::InvalidBlock
            | Error::InvalidAction(_) => ErrorKind::Validation,
            Error::SenderMismatch => ErrorKind::Signature,
            Error::UnknownCommittee(_)
            | Error::InvalidTransition(..)
            | Error::CommitteeTerminated(_)
            | Error::NotActive(_)
            | Error::StaleHeight(..)
            | Error::UnexpectedHeight(..)
            | Error::StartHeightRegression(..)
            | Error::NoCandidate => ErrorKind::State,
            Error::Timeout | Error::QuorumUnreachable(..) => ErrorKind::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let actions = [Action::Start, Action::Stop, Action::Switchover, Action::Over];

        // From pending, only start succeeds
        for action in actions {
            let expected = (action == Action::Start).then_some(State::Running);
            assert_eq!(State::Pending.next(action), expected);
        }

        assert_eq!(State::Running.next(Action::Switchover), Some(State::Switching));
        assert_eq!(State::Running.next(Action::Stop), Some(State::Stopped));
        assert_eq!(State::Running.next(Action::Start), None);
        assert_eq!(State::Running.next(Action::Over), None);
        assert_eq!(State::Switching.next(Action::Over), Some(State::Stopped));
        assert_eq!(State::Switching.next(Action::Stop), Some(State::Stopped));
        assert_eq!(State::Switching.next(Action::Switchover), None);

        // Stopped is terminal
        for action in actions {
            assert_eq!(State::Stopped.next(action), None);
        }
    }

    #[test]
    fn test_action_tags() {
        for action in [Action::Start, Action::Stop, Action::Switchover, Action::Over] {
            assert_eq!(Action::try_from(action as u8), Ok(action));
        }
        assert_eq!(Action::try_from(4), Err(Error::InvalidAction(4)));
    }

    #[test]
    fn test_kind() {
        assert_eq!(
            Error::Committee(CommitteeError::DuplicateMember(Address::default())).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            Error::Committee(CommitteeError::BadSignature).kind(),
            ErrorKind::Signature
        );
        assert_eq!(
            Error::Committee(CommitteeError::Future(10_000, 4_999)).kind(),
            ErrorKind::Signature
        );
        assert_eq!(Error::CommitteeTerminated(1).kind(), ErrorKind::State);
        assert_eq!(Error::QuorumUnreachable(2, 3).kind(), ErrorKind::Timeout);
    }
}
