//! Scrape engine: the coordinator loop and the per-item executor.

pub mod coordinator;
pub mod executor;
pub mod parser;
pub mod pause;
pub mod request;

pub use coordinator::{Coordinator, Phase, RunReport};
pub use executor::{AttemptOutcome, Executor, RetryAttempt, Settlement, TransientCause};
pub use request::RequestTemplate;
