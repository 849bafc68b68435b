//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use std::sync::Arc;

use hostline_core::free_target::FreeTargetService;
use hostline_core::ledger::CallLedger;
use hostline_core::ports::{HostStore, TokenVerifier};

use crate::config::Config;
use crate::web::presence::PresenceRegistry;
use crate::web::signaling::SignalingRouter;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: Arc<CallLedger>,
    pub free_targets: Arc<FreeTargetService>,
    pub hosts: Arc<dyn HostStore>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub presence: Arc<PresenceRegistry>,
    pub signaling: Arc<SignalingRouter>,
}
