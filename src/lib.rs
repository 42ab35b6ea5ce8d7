//! rdbms-engine: network front end for a database engine.
//!
//! The server accepts TCP connections and answers every received chunk
//! (up to 1024 bytes per read) with `SERVER_ACK: <chunk>`. A command
//! engine can be plugged in through [`executor::Executor`]; without one the
//! server runs in echo mode.
//!
//! Components:
//! - `server`: listening socket and accept loop
//! - `connection`: per-connection read/acknowledge loop
//! - `registry`: in-flight connections, used to drain on stop
//! - `config`: CLI arguments and TOML file

pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod shutdown;

pub use config::Config;
pub use error::{ConnectionError, ServerError, ServerResult};
pub use executor::Executor;
pub use server::{Accept, Server, ServerState};
