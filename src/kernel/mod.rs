//! Kernel module - shared infrastructure underneath the domains.

pub mod memory_store;
pub mod push_fabric;
pub mod redis_store;
pub mod service_host;
pub mod state_store;

pub use memory_store::MemoryStore;
pub use push_fabric::{BoundChannel, Envelope, HeartbeatConfig, PushFabric, SendOutcome};
pub use redis_store::RedisStore;
pub use service_host::{Service, ServiceHost};
pub use state_store::{keys, StateOp, StateStore, StoreError};
