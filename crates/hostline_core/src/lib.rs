pub mod billing;
pub mod domain;
pub mod free_target;
pub mod ledger;
pub mod ports;

#[cfg(test)]
pub(crate) mod testutil;

pub use domain::{
    AuthContext, Call, CallState, DayStatus, DayTarget, FreeTarget, HostAccount, HostStatus,
    RateKind, RateQuote, SettlementSummary, Transaction, TransactionStatus, TransactionType,
    UserAccount, UserRole, WeekStatus, WeekTarget,
};
pub use free_target::{DayOutcome, FreeTargetService};
pub use ledger::CallLedger;
pub use ports::{
    AccountStore, CallStore, CallTransition, FreeTargetStore, HostStore, LeaderboardStore,
    PortError, PortResult, RateSource, TokenVerifier, TransactionLog,
};
