#[macro_use]
extern crate slog;
#[macro_use]
extern crate serde_derive;

pub mod candidate;
pub mod config;
pub mod election;
pub mod follower;
pub mod fsm;
pub mod leader;
pub mod log;
pub mod progress;
pub mod raft;
pub mod rpc;
pub mod server;
pub mod store;
pub mod tcp;
pub mod timer;
