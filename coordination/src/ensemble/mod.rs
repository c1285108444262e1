//! Multi-worker coordination module
//!
//! A tier decides how many workers attempt a subtask. Their proposals are
//! collected concurrently and reduced to one candidate.
//!
//! # Architecture
//!
//! ```text
//!                  ProduceRequest (subtask, tier, history)
//!                               │
//!                               ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │                   WorkerCoordinator                        │
//! │  • team size from TierPolicy (solo / pair / team)          │
//! │  • every call bounded by timeout + cancellation            │
//! └─────────────────────────┬─────────────────────────────────┘
//!           ┌───────────────┼───────────────┐
//!           ▼               ▼               ▼
//!      worker 0        worker 1        worker 2
//!           └───────────────┼───────────────┘
//!                           ▼
//!            MergePolicy: delegate | first | majority
//!                           │
//!                           ▼
//!                       Candidate
//! ```

pub mod coordinator;
pub mod voting;

pub use coordinator::{
    CoordinatorError, CoordinatorResult, ProduceRequest, TierWorkers, WorkerCoordinator,
};
pub use voting::{majority_vote, normalize_whitespace, MergePolicy, VoteOutcome};
