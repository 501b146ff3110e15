//! State-machine definitions: the immutable blueprint an execution runs
//!
//! A definition is parsed once from its JSON wire form, validated once at
//! creation (by the dsl crate), and never mutated afterwards. Field names
//! follow the states-language wire format, so everything here carries
//! PascalCase serde renames. One of two evaluation dialects applies to a
//! machine: path-based addressing (`InputPath`, `Parameters`, ...) or the
//! expression language (`Arguments`, `Output`, `Condition`, ...); the
//! validator enforces that fields of the wrong dialect are rejected at
//! creation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

// ── Evaluation dialect ───────────────────────────────────────────────

/// The data-addressing dialect a definition is written in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryLanguage {
    #[default]
    #[serde(rename = "JSONPath")]
    JsonPath,
    #[serde(rename = "JSONata")]
    Jsonata,
}

// ── State machine ────────────────────────────────────────────────────

/// A complete state-machine definition (also used for Parallel branches
/// and Map item processors, which are state machines in their own right).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateMachine {
    pub start_at: String,
    pub states: HashMap<String, State>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_language: Option<QueryLanguage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl StateMachine {
    /// The effective dialect; path-based unless declared otherwise.
    pub fn dialect(&self) -> QueryLanguage {
        self.query_language.unwrap_or_default()
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}

// ── States ───────────────────────────────────────────────────────────

/// One state of a definition, keyed by name in [`StateMachine::states`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum State {
    Task(TaskState),
    Parallel(ParallelState),
    Map(MapState),
    Choice(ChoiceState),
    Wait(WaitState),
    Pass(PassState),
    Succeed(SucceedState),
    Fail(FailState),
}

impl State {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Task(_) => "Task",
            Self::Parallel(_) => "Parallel",
            Self::Map(_) => "Map",
            Self::Choice(_) => "Choice",
            Self::Wait(_) => "Wait",
            Self::Pass(_) => "Pass",
            Self::Succeed(_) => "Succeed",
            Self::Fail(_) => "Fail",
        }
    }

    /// Input/output selection fields, for states that carry them.
    pub fn io(&self) -> Option<&StateIo> {
        match self {
            Self::Task(s) => Some(&s.io),
            Self::Parallel(s) => Some(&s.io),
            Self::Map(s) => Some(&s.io),
            Self::Choice(s) => Some(&s.io),
            Self::Wait(s) => Some(&s.io),
            Self::Pass(s) => Some(&s.io),
            Self::Succeed(s) => Some(&s.io),
            Self::Fail(_) => None,
        }
    }

    /// Next/End transition fields, for non-terminal state types.
    pub fn transition(&self) -> Option<&Transition> {
        match self {
            Self::Task(s) => Some(&s.transition),
            Self::Parallel(s) => Some(&s.transition),
            Self::Map(s) => Some(&s.transition),
            Self::Wait(s) => Some(&s.transition),
            Self::Pass(s) => Some(&s.transition),
            Self::Choice(_) | Self::Succeed(_) | Self::Fail(_) => None,
        }
    }

    pub fn retriers(&self) -> &[Retrier] {
        match self {
            Self::Task(s) => &s.retry,
            Self::Parallel(s) => &s.retry,
            Self::Map(s) => &s.retry,
            _ => &[],
        }
    }

    pub fn catchers(&self) -> &[Catcher] {
        match self {
            Self::Task(s) => &s.catch,
            Self::Parallel(s) => &s.catch,
            Self::Map(s) => &s.catch,
            _ => &[],
        }
    }
}

/// Input/output selection fields shared across state types.
///
/// Path-dialect machines use the `*Path` / `Parameters` / `ResultSelector`
/// family; expression-dialect machines use `Arguments` / `Output`.
/// `Assign` exists in both dialects and is evaluated after the state's
/// main output is computed.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateIo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_selector: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assign: Option<Map<String, Value>>,
}

/// Next/End transition of a non-terminal state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
}

impl Transition {
    pub fn is_end(&self) -> bool {
        self.end.unwrap_or(false)
    }
}

// ── Task ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskState {
    pub resource: String,
    #[serde(flatten)]
    pub io: StateIo,
    #[serde(flatten)]
    pub transition: Transition,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry: Vec<Retrier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<Catcher>,
    /// Literal seconds or an embedded expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_seconds: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_seconds_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

// ── Parallel ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParallelState {
    /// Branch order is declaration order; the state's output array
    /// preserves it regardless of completion order.
    pub branches: Vec<StateMachine>,
    #[serde(flatten)]
    pub io: StateIo,
    #[serde(flatten)]
    pub transition: Transition,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry: Vec<Retrier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<Catcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

// ── Map ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapState {
    /// The per-item sub-machine. The legacy `Iterator` field name is
    /// accepted and normalized here.
    #[serde(alias = "Iterator", skip_serializing_if = "Option::is_none")]
    pub item_processor: Option<ItemProcessor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_path: Option<String>,
    /// Expression-dialect item source: a literal array or an expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
    /// Per-item input template. The legacy `Parameters` field name is a
    /// Map-state alias for this, not for the common payload template.
    #[serde(alias = "Parameters", skip_serializing_if = "Option::is_none")]
    pub item_selector: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_reader: Option<ItemReaderConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_batcher: Option<ItemBatcherConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_writer: Option<ResultWriterConfig>,
    /// Literal bound or an embedded expression; 0 means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerated_failure_count: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerated_failure_count_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerated_failure_percentage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerated_failure_percentage_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub io: StateIo,
    #[serde(flatten)]
    pub transition: Transition,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry: Vec<Retrier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<Catcher>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl MapState {
    /// The effective processing mode; inline unless declared distributed.
    pub fn mode(&self) -> ProcessorMode {
        self.item_processor
            .as_ref()
            .and_then(|p| p.processor_config.as_ref())
            .and_then(|c| c.mode)
            .unwrap_or(ProcessorMode::Inline)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemProcessor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor_config: Option<ProcessorConfig>,
    #[serde(flatten)]
    pub machine: StateMachine,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ProcessorMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_type: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessorMode {
    #[serde(rename = "INLINE")]
    Inline,
    #[serde(rename = "DISTRIBUTED")]
    Distributed,
}

// ── Item reader / batcher / result writer ────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemReaderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reader_config: Option<ReaderConfig>,
    /// Path-dialect source template (Bucket/Key).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Expression-dialect source template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReaderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<InputType>,
    #[serde(rename = "CSVHeaderLocation", skip_serializing_if = "Option::is_none")]
    pub csv_header_location: Option<CsvHeaderLocation>,
    #[serde(rename = "CSVHeaders", skip_serializing_if = "Option::is_none")]
    pub csv_headers: Option<Vec<String>>,
    /// Literal bound or an embedded expression; validated before any
    /// reading begins and clamped to the engine ceiling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items_path: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputType {
    #[serde(rename = "CSV")]
    Csv,
    #[serde(rename = "JSON")]
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CsvHeaderLocation {
    #[serde(rename = "FIRST_ROW")]
    FirstRow,
    #[serde(rename = "GIVEN")]
    Given,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemBatcherConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items_per_batch: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_input_bytes_per_batch: Option<Value>,
    /// Merged into every batch's input object under `BatchInput`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_input: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultWriterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Destination template (Bucket/Prefix).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

// ── Choice ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceState {
    pub choices: Vec<ChoiceRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(flatten)]
    pub io: StateIo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// One rule of a Choice state. Rules are evaluated in declaration order;
/// the first match wins.
///
/// Path-dialect rules combine `Variable` with exactly one comparison (or
/// nest through And/Or/Not); expression-dialect rules carry `Condition`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
    /// Expression-dialect condition: boolean literal or expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<ChoiceRule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<ChoiceRule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<ChoiceRule>>,
    /// Required on top-level rules, forbidden on nested ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl ChoiceRule {
    pub fn is_composite(&self) -> bool {
        self.and.is_some() || self.or.is_some() || self.not.is_some()
    }
}

/// The comparison operators of path-dialect choice rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Comparison {
    StringEquals(String),
    StringEqualsPath(String),
    StringLessThan(String),
    StringLessThanPath(String),
    StringGreaterThan(String),
    StringGreaterThanPath(String),
    StringLessThanEquals(String),
    StringLessThanEqualsPath(String),
    StringGreaterThanEquals(String),
    StringGreaterThanEqualsPath(String),
    StringMatches(String),
    NumericEquals(serde_json::Number),
    NumericEqualsPath(String),
    NumericLessThan(serde_json::Number),
    NumericLessThanPath(String),
    NumericGreaterThan(serde_json::Number),
    NumericGreaterThanPath(String),
    NumericLessThanEquals(serde_json::Number),
    NumericLessThanEqualsPath(String),
    NumericGreaterThanEquals(serde_json::Number),
    NumericGreaterThanEqualsPath(String),
    BooleanEquals(bool),
    BooleanEqualsPath(String),
    TimestampEquals(String),
    TimestampEqualsPath(String),
    TimestampLessThan(String),
    TimestampLessThanPath(String),
    TimestampGreaterThan(String),
    TimestampGreaterThanPath(String),
    TimestampLessThanEquals(String),
    TimestampLessThanEqualsPath(String),
    TimestampGreaterThanEquals(String),
    TimestampGreaterThanEqualsPath(String),
    IsPresent(bool),
    IsNull(bool),
    IsString(bool),
    IsNumeric(bool),
    IsBoolean(bool),
    IsTimestamp(bool),
}

// ── Wait / Pass / Succeed / Fail ─────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaitState {
    /// Literal non-negative integer or an embedded expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_path: Option<String>,
    /// Literal strict ISO-8601 timestamp or an embedded expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_path: Option<String>,
    #[serde(flatten)]
    pub io: StateIo,
    #[serde(flatten)]
    pub transition: Transition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PassState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(flatten)]
    pub io: StateIo,
    #[serde(flatten)]
    pub transition: Transition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SucceedState {
    #[serde(flatten)]
    pub io: StateIo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailState {
    /// Literal error name or an embedded expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

// ── Retry / Catch policies ───────────────────────────────────────────

/// Backoff jitter strategies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JitterStrategy {
    /// Use the computed delay exactly.
    #[default]
    #[serde(rename = "NONE")]
    None,
    /// Sample uniformly in `[0, computed]`.
    #[serde(rename = "FULL")]
    Full,
}

/// A declarative retry policy entry. Selection is first-match over the
/// state's ordered `Retry` list.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Retrier {
    pub error_equals: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_rate: Option<f64>,
    /// Upper bound on the computed delay, applied before jitter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_strategy: Option<JitterStrategy>,
}

impl Retrier {
    pub fn interval_seconds(&self) -> u64 {
        self.interval_seconds.unwrap_or(1)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(3)
    }

    pub fn backoff_rate(&self) -> f64 {
        self.backoff_rate.unwrap_or(2.0)
    }

    pub fn jitter_strategy(&self) -> JitterStrategy {
        self.jitter_strategy.unwrap_or_default()
    }
}

/// A declarative catch entry routing a matched error to `Next`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Catcher {
    pub error_equals: Vec<String>,
    pub next: String,
    /// Where the error object is injected into the state input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
}
