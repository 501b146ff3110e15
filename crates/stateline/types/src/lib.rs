//! Domain types for the Stateline workflow engine
//!
//! Definitions are the immutable blueprints ([`StateMachine`], [`State`]
//! and friends), executions are runs of a definition identified by an
//! [`ExecutionId`], and every observable transition of a run is recorded
//! as an [`Event`]. Runtime failures are modeled as [`StateError`], the
//! value Retry/Catch policies match against.
//!
//! This crate holds data only; parsing and creation-time validation live
//! in `stateline-dsl`, and execution semantics in `stateline-engine`.

#![deny(unsafe_code)]

pub mod definition;
pub mod errors;
pub mod event;
pub mod execution;

// Re-export main types
pub use definition::{
    Catcher, ChoiceRule, ChoiceState, Comparison, CsvHeaderLocation, FailState, InputType,
    ItemBatcherConfig, ItemProcessor, ItemReaderConfig, JitterStrategy, MapState, ParallelState,
    PassState, ProcessorConfig, ProcessorMode, QueryLanguage, ReaderConfig, ResultWriterConfig,
    Retrier, State, StateIo, StateMachine, SucceedState, TaskState, Transition, WaitState,
};
pub use errors::{error_name, StateError, StateResult};
pub use event::{Event, EventType};
pub use execution::{
    ExecutionId, ExecutionOutcome, ExecutionStatus, MapRunId, MapRunKey, ResultFileRef,
    ResultFiles, ResultWriterManifest,
};
