mod types;
pub use types::*;

mod identity_key;
pub use identity_key::*;

mod pre_key;
pub use pre_key::*;

mod derived;
pub use derived::*;

mod message;
pub use message::*;

mod session;
pub use session::{MemoryPreKeyStore, PendingPreKey, PreKeyStore, Session};

mod proto;

mod error;
pub use error::{DecodeError, DecryptError, Error};

mod config;
pub use config::{MAX_COUNTER_GAP, MAX_RECV_CHAINS, MAX_SESSION_STATES, SessionConfig};
