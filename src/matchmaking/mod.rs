//! Matchmaking
//!
//! Pairwise FIFO queue and the service facade wrapping the lobby core.

pub mod queue;
pub mod service;

pub use queue::{
    JoinOutcome, JoinReport, LeaveOutcome, MatchPair, MatchReport, MatchmakingQueue, QueueError,
};
pub use service::Matchmaker;
