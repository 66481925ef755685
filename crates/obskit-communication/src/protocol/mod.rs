//! Line protocol: framing, exchange execution, and poll cycles

pub mod codec;
pub mod executor;
pub mod poll;

pub use codec::{decode_boundary, encode, Command, ResponseTerminators};
pub use executor::{CommandExecutor, RetryPolicy};
pub use poll::{CoordinatorState, PollCoordinator, PollQuery};
