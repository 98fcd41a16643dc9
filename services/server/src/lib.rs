// server: BeSMART cloud simulator.
// Exposes modules for integration testing.

pub mod config;
pub mod cseq;
pub mod db;
pub mod dispatcher;
pub mod restapi;
pub mod sender;
pub mod shadow;
pub mod weather;

pub use config::Config;
pub use cseq::ReplyValue;
pub use db::{Db, DbError};
pub use dispatcher::Dispatcher;
pub use restapi::{AppState, build_router};
pub use sender::Sender;
pub use shadow::{Device, Peer, Room, Shadow, SharedShadow};
pub use weather::Weather;
