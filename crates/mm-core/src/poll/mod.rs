//! The voting core: polls, votes, per-poll controllers and their routing.

pub mod command;
pub mod controller;
pub mod model;
pub mod router;
pub mod service;
pub mod state;
pub mod store;
pub mod tally;
pub mod throttle;
pub(crate) mod writer;

pub use controller::{ReactionKind, VoteOutcome};
pub use model::{Choice, NewChoice, NewPoll, Poll, Vote};
pub use router::{ReactionEvent, ReactionRouter};
pub use service::{PollResult, PollService};
pub use state::{PollSnapshot, PollState};
pub use store::{JsonPollStore, MemoryPollStore, PollStore};
