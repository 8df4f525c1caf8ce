//! HTTP API surface exposed to the dashboard.

pub mod routes;

pub use routes::{get_graph_data, get_scenarios, health_check, post_scenario};
