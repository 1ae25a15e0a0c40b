/// Largest counter gap a receive chain will skip ahead, and the size of its
/// skipped message key cache.
pub const MAX_COUNTER_GAP: u32 = 1000;

/// Number of receive chains a session state keeps.
pub const MAX_RECV_CHAINS: usize = 5;

/// Number of session states a session keeps.
pub const MAX_SESSION_STATES: usize = 100;

/// Bounds applied to a session and all of its states.
///
/// Both peers should use the same values; the defaults match the protocol
/// constants above.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum counter gap accepted on a receive chain, also the capacity of
    /// its skipped message key cache.
    pub max_counter_gap: u32,
    /// Maximum number of receive chains kept per session state.
    pub max_recv_chains: usize,
    /// Maximum number of session states kept per session.
    pub max_session_states: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_counter_gap: MAX_COUNTER_GAP,
            max_recv_chains: MAX_RECV_CHAINS,
            max_session_states: MAX_SESSION_STATES,
        }
    }
}
