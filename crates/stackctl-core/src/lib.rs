pub mod backend;
pub mod certs;
pub mod compose;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod health;
pub mod io;
pub mod launcher;
pub mod liveness;
pub mod paths;
pub mod profile;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, StackError};
