pub mod worker_pool;

pub use worker_pool::{PoolRuntimeSnapshot, WorkerPool, WorkerRuntimeSnapshot, WorkerTask};
