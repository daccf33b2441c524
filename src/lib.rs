//! Captain moves running containers between two hosts with checkpoint and
//! restore, and measures how long it takes.
//!
//! The pieces, bottom-up:
//!
//! - [`node`]: hosts that run commands and move files
//! - [`capability`]: what each host has, and what the pair can do together
//! - [`transfer`]: copying paths between hosts by the best available route
//! - [`storage`]: NFS shared storage between the hosts
//! - [`migration`]: checkpoint, copy, restore
//! - [`benchmark`]: repeated round-trip migrations with statistics
//! - [`session`]: ties them to one configured pair of hosts

pub mod benchmark;
pub mod capability;
pub mod config;
pub mod error;
pub mod migration;
pub mod node;
pub mod remote;
pub mod session;
pub mod storage;
pub mod transfer;

pub use error::{CaptainError, Error, Result};
pub use session::Session;
