use std::time::Duration;

/// Configuration for the [crate::Engine].
#[derive(Clone, Debug)]
pub struct Config {
    /// The application namespace used to sign votes and hand-off messages.
    /// Used to prevent replay attacks on other applications.
    pub namespace: Vec<u8>,

    /// Maximum number of members (voting or standby) a committee may have.
    pub max_members: usize,

    /// How old a hand-off message may be before it is rejected as stale.
    pub handoff_freshness: Duration,

    /// How far ahead of the local clock a hand-off message may be dated.
    pub handoff_synchrony_bound: Duration,
}
