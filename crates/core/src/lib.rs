//! drover: a broker for pools of remote, stateful browser sessions.
//!
//! Clients ask for a session matching a requirement set (browser profile,
//! node, tags, reservation state); the broker hands back a compatible
//! existing session or provisions a new one on an execution node, tracks its
//! lifecycle in a transactionally consistent registry, and reclaims it on
//! teardown or failed health check.

pub mod config;
pub mod error;
pub mod keys;
pub mod matcher;
pub mod model;
pub mod nodes;
pub mod provisioner;
pub mod refresher;
pub mod registry;
pub mod remote;
pub mod service;
pub mod store;

pub use config::BrokerConfig;
pub use error::{DroverError, Result};
pub use model::{Requirements, SessionRecord, SessionView};
pub use refresher::SweepReport;
pub use service::BrokerService;
