//! The matchmaking engine.
//!
//! Admission places waiters into language-keyed FIFO queues and announces
//! them on their native-language topic; one matcher worker per supported
//! language consumes that topic, takes a TTL-guarded hold on the oldest
//! compatible waiter, commits the pair as a session record, and notifies
//! both sides over the push fabric.

pub mod admission;
pub mod entry;
pub mod error;
pub mod hold;
pub mod matcher;

pub use admission::AdmissionService;
pub use entry::WaiterEntry;
pub use error::MatchmakingError;
pub use hold::{HoldProtocol, HOLD_TTL};
pub use matcher::{MatchFoundPayload, MatcherWorker, MATCH_FOUND};
