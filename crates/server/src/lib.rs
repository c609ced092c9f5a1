//! drover-server: HTTP surface for the session broker.

pub mod logging;
pub mod routes;
