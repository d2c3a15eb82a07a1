//! Real-time two-sided matchmaking backend for a language-exchange platform.
//!
//! Two users match when one's native language is the other's practice target
//! and vice versa. The engine keeps waiters in language-keyed FIFO queues
//! inside a shared state store, wakes one matcher worker per supported
//! language over a fan-out topic, protects in-flight candidates with a
//! TTL-guarded hold, commits matches as persistent session records, and
//! delivers the result over each user's live WebSocket channel.

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::Config;
