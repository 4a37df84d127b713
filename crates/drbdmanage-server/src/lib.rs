//! # drbdmanage-server: the server façade
//!
//! Ties the persistence gateway, domain model, reconciliation engine,
//! storage backend and deployer policy together into the mutator/query API
//! an RPC layer (out of scope for this core) would expose to clients.

mod alloc;
mod auto;
mod bootstrap;
mod deployer;
mod error;
mod facade;
mod mutate;
mod query;
mod snapshot;
mod validate;

pub use deployer::{BalancedDeployer, Deployer};
pub use error::ServerError;
pub use facade::{ServerFacade, MAX_RES_VOLS};
