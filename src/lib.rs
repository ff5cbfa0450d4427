pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod network;
pub mod peer_id;
pub mod prelude;
pub mod queue;
mod reconcile;
pub mod store;
pub mod transfer;
pub mod tth;

#[cfg(test)]
pub(crate) mod testutil;
