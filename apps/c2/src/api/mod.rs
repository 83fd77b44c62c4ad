//! API endpoint modules.

pub mod environments;
pub mod executions;
pub mod sessions;
pub mod test_sets;

pub use environments::configure_routes as configure_environment_routes;
pub use executions::configure_routes as configure_execution_routes;
pub use sessions::configure_routes as configure_session_routes;
pub use test_sets::configure_routes as configure_test_set_routes;
