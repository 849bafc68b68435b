pub mod free_target;
pub mod middleware;
pub mod presence;
pub mod protocol;
pub mod rest;
pub mod signaling;
pub mod state;
pub mod sweeper;
pub mod ws_handler;

// Re-export the main WebSocket handler to make it easily accessible
// to the binary that will build the web server router.
pub use middleware::require_auth;
pub use ws_handler::ws_handler;
