//! The Stateline execution engine
//!
//! Runs validated definitions: the [`interpreter`] drives the state
//! loop, [`eval`] resolves both query dialects against live data,
//! [`retry`] applies Retry/Catch policy, and [`concurrency`] fans out
//! Parallel branches and Map iterations. Distributed Maps source items
//! through [`item_reader`], persist outcomes through [`result_writer`],
//! and keep a reentrant identity in [`map_run`]. Everything external
//! enters through the [`store`] traits, so the engine itself stays
//! infrastructure-free.

#![deny(unsafe_code)]

pub mod concurrency;
pub mod eval;
pub mod interpreter;
pub mod item_reader;
pub mod map_run;
pub mod recorder;
pub mod result_writer;
pub mod retry;
pub mod store;

// Re-export main types
pub use eval::EvalScope;
pub use interpreter::{ExecutionReport, Interpreter, MapRunReport};
pub use item_reader::{MAX_ITEMS_CEILING, read_items};
pub use map_run::{MapRun, MapRunRegistry};
pub use recorder::{BranchCursor, EventRecorder};
pub use result_writer::{IterationResults, write_results};
pub use retry::{RetryDecision, RetryTracker, compute_delay, select_catcher};
pub use store::{
    FnInvoker, InMemoryStore, NullInvoker, ObjectStore, StoreError, TaskInvoker,
};
