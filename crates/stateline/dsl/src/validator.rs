//! Whole-definition validation at creation time
//!
//! A definition that parses as JSON can still be structurally broken:
//! transitions to states that do not exist, fields of the wrong dialect,
//! literal values out of range, embedded paths or expressions that do
//! not parse. All of that is rejected here, before any execution is
//! created. Values that only become known at runtime (path-resolved
//! configuration, expression results) are validated by the engine
//! instead, with `States.Runtime` semantics.

use crate::errors::{DslError, DslResult};
use crate::parser::{self, is_expression};
use crate::paths::Path;
use crate::timestamp;
use serde_json::Value;
use stateline_types::{
    Catcher, ChoiceRule, ChoiceState, Comparison, FailState, MapState, ParallelState,
    ProcessorMode, QueryLanguage, Retrier, State, StateIo, StateMachine, TaskState, Transition,
    WaitState, error_name,
};

/// Intrinsic functions usable in payload-template bindings.
const INTRINSICS: &[&str] = &[
    "States.Format",
    "States.Array",
    "States.StringToJson",
    "States.JsonToString",
];

/// Parse a JSON definition and validate it.
pub fn parse_definition(json_text: &str) -> DslResult<StateMachine> {
    let machine: StateMachine = serde_json::from_str(json_text)?;
    validate(&machine)?;
    Ok(machine)
}

/// Validate an already-decoded definition.
pub fn validate(machine: &StateMachine) -> DslResult<()> {
    validate_machine(machine, machine.dialect())
}

fn validate_machine(machine: &StateMachine, inherited: QueryLanguage) -> DslResult<()> {
    let dialect = machine.query_language.unwrap_or(inherited);

    if machine.states.is_empty() {
        return Err(DslError::ValidationError(
            "definition declares no states".into(),
        ));
    }
    if !machine.states.contains_key(&machine.start_at) {
        return Err(DslError::ValidationError(format!(
            "StartAt target '{}' is not a state",
            machine.start_at
        )));
    }

    for (name, state) in &machine.states {
        validate_state(name, state, machine, dialect)?;
    }
    Ok(())
}

fn validate_state(
    name: &str,
    state: &State,
    machine: &StateMachine,
    dialect: QueryLanguage,
) -> DslResult<()> {
    if let Some(transition) = state.transition() {
        validate_transition(name, transition, machine)?;
    }
    if let Some(io) = state.io() {
        validate_io(name, io, dialect)?;
    }
    validate_retriers(name, state.retriers())?;
    validate_catchers(name, state.catchers(), machine)?;

    match state {
        State::Task(task) => validate_task(name, task, dialect),
        State::Parallel(parallel) => validate_parallel(name, parallel, dialect),
        State::Map(map) => validate_map(name, map, dialect),
        State::Choice(choice) => validate_choice(name, choice, machine, dialect),
        State::Wait(wait) => validate_wait(name, wait, dialect),
        State::Fail(fail) => validate_fail(name, fail, dialect),
        State::Pass(_) | State::Succeed(_) => Ok(()),
    }
}

// ── Transitions ──────────────────────────────────────────────────────

fn validate_transition(name: &str, transition: &Transition, machine: &StateMachine) -> DslResult<()> {
    match (&transition.next, transition.end) {
        (Some(target), None | Some(false)) => {
            if !machine.states.contains_key(target) {
                return Err(DslError::in_state(
                    name,
                    format!("Next target '{}' is not a state", target),
                ));
            }
            Ok(())
        }
        (None, Some(true)) => Ok(()),
        (Some(_), Some(true)) => Err(DslError::in_state(
            name,
            "state declares both Next and End: true",
        )),
        (None, _) => Err(DslError::in_state(
            name,
            "state declares neither Next nor End: true",
        )),
    }
}

// ── Dialect consistency and embedded grammar checks ──────────────────

fn validate_io(name: &str, io: &StateIo, dialect: QueryLanguage) -> DslResult<()> {
    match dialect {
        QueryLanguage::JsonPath => {
            if io.arguments.is_some() {
                return Err(DslError::in_state(name, "Arguments requires JSONata"));
            }
            if io.output.is_some() {
                return Err(DslError::in_state(name, "Output requires JSONata"));
            }
            if let Some(path) = &io.input_path {
                parse_path_field(name, "InputPath", path)?;
            }
            if let Some(path) = &io.output_path {
                parse_path_field(name, "OutputPath", path)?;
            }
            if let Some(path) = &io.result_path {
                parse_reference_field(name, "ResultPath", path)?;
            }
            if let Some(template) = &io.parameters {
                validate_template(name, template)?;
            }
            if let Some(template) = &io.result_selector {
                validate_template(name, template)?;
            }
            if let Some(assign) = &io.assign {
                for value in assign.values() {
                    validate_template(name, value)?;
                }
            }
        }
        QueryLanguage::Jsonata => {
            for (field, present) in [
                ("InputPath", io.input_path.is_some()),
                ("Parameters", io.parameters.is_some()),
                ("ResultSelector", io.result_selector.is_some()),
                ("ResultPath", io.result_path.is_some()),
                ("OutputPath", io.output_path.is_some()),
            ] {
                if present {
                    return Err(DslError::in_state(
                        name,
                        format!("{} is not allowed with JSONata", field),
                    ));
                }
            }
            if let Some(arguments) = &io.arguments {
                validate_expressions(name, arguments)?;
            }
            if let Some(output) = &io.output {
                validate_expressions(name, output)?;
            }
            if let Some(assign) = &io.assign {
                for value in assign.values() {
                    validate_expressions(name, value)?;
                }
            }
        }
    }
    Ok(())
}

/// Path-dialect payload template: keys ending `.$` bind a path query or
/// an intrinsic call; everything else is literal and descended into.
fn validate_template(name: &str, template: &Value) -> DslResult<()> {
    match template {
        Value::Object(map) => {
            for (key, value) in map {
                if key.ends_with(".$") {
                    let Value::String(binding) = value else {
                        return Err(DslError::in_state(
                            name,
                            format!("template key '{}' must bind a string", key),
                        ));
                    };
                    validate_binding(name, binding)?;
                } else {
                    validate_template(name, value)?;
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                validate_template(name, item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn validate_binding(name: &str, binding: &str) -> DslResult<()> {
    if binding.starts_with("States.") {
        let call_name = binding.split('(').next().unwrap_or(binding);
        if !binding.contains('(') || !binding.ends_with(')') {
            return Err(DslError::in_state(
                name,
                format!("malformed intrinsic call '{}'", binding),
            ));
        }
        if !INTRINSICS.contains(&call_name) {
            return Err(DslError::UnknownIntrinsic(call_name.to_string()));
        }
        return Ok(());
    }
    Path::parse(binding).map_err(|e| DslError::in_state(name, e.to_string()))?;
    Ok(())
}

/// Expression-dialect value: every `{% ... %}` string anywhere inside
/// must parse, which also rejects invalid string escapes at creation.
fn validate_expressions(name: &str, value: &Value) -> DslResult<()> {
    match value {
        Value::String(text) if is_expression(text) => {
            parser::parse_delimited(text).map_err(|e| DslError::in_state(name, e.to_string()))?;
            Ok(())
        }
        Value::Object(map) => {
            for nested in map.values() {
                validate_expressions(name, nested)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                validate_expressions(name, item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn parse_path_field(name: &str, field: &str, text: &str) -> DslResult<Path> {
    Path::parse(text).map_err(|e| DslError::in_state(name, format!("{}: {}", field, e)))
}

fn parse_reference_field(name: &str, field: &str, text: &str) -> DslResult<Path> {
    Path::parse_reference(text).map_err(|e| DslError::in_state(name, format!("{}: {}", field, e)))
}

// ── Numeric configuration fields ─────────────────────────────────────

/// A field holding a literal integer or, under JSONata, an expression.
/// Literals must be integral and at least `min`; strings are rejected
/// outright in the path dialect.
fn validate_int_field(
    name: &str,
    field: &str,
    value: &Value,
    dialect: QueryLanguage,
    min: i64,
) -> DslResult<()> {
    match value {
        Value::Number(n) => {
            let Some(v) = n.as_i64() else {
                return Err(DslError::InvalidValue {
                    field: format!("{}.{}", name, field),
                    message: format!("'{}' is not an integer", n),
                });
            };
            if v < min {
                return Err(DslError::InvalidValue {
                    field: format!("{}.{}", name, field),
                    message: format!("{} is below the minimum of {}", v, min),
                });
            }
            Ok(())
        }
        Value::String(text) if dialect == QueryLanguage::Jsonata && is_expression(text) => {
            parser::parse_delimited(text).map_err(|e| DslError::in_state(name, e.to_string()))?;
            Ok(())
        }
        other => Err(DslError::InvalidValue {
            field: format!("{}.{}", name, field),
            message: format!("expected an integer, got {}", other),
        }),
    }
}

// ── Retry / Catch ────────────────────────────────────────────────────

fn validate_retriers(name: &str, retriers: &[Retrier]) -> DslResult<()> {
    for (i, retrier) in retriers.iter().enumerate() {
        validate_error_matchers(name, &retrier.error_equals, i, retriers.len())?;
        if retrier.backoff_rate() < 1.0 {
            return Err(DslError::in_state(name, "BackoffRate must be at least 1.0"));
        }
    }
    Ok(())
}

fn validate_catchers(name: &str, catchers: &[Catcher], machine: &StateMachine) -> DslResult<()> {
    for (i, catcher) in catchers.iter().enumerate() {
        validate_error_matchers(name, &catcher.error_equals, i, catchers.len())?;
        if !machine.states.contains_key(&catcher.next) {
            return Err(DslError::in_state(
                name,
                format!("Catch Next target '{}' is not a state", catcher.next),
            ));
        }
        if let Some(path) = &catcher.result_path {
            parse_reference_field(name, "Catch.ResultPath", path)?;
        }
    }
    Ok(())
}

fn validate_error_matchers(
    name: &str,
    matchers: &[String],
    index: usize,
    total: usize,
) -> DslResult<()> {
    if matchers.is_empty() {
        return Err(DslError::in_state(name, "ErrorEquals must not be empty"));
    }
    if matchers.iter().any(|m| m == error_name::ALL) {
        if matchers.len() > 1 {
            return Err(DslError::in_state(
                name,
                "States.ALL must be the only matcher in its ErrorEquals",
            ));
        }
        if index + 1 != total {
            return Err(DslError::in_state(
                name,
                "the States.ALL policy must come last",
            ));
        }
    }
    Ok(())
}

// ── Per-type rules ───────────────────────────────────────────────────

fn validate_task(name: &str, task: &TaskState, dialect: QueryLanguage) -> DslResult<()> {
    if task.resource.is_empty() {
        return Err(DslError::MissingField(format!("{}.Resource", name)));
    }
    if let Some(value) = &task.timeout_seconds {
        validate_int_field(name, "TimeoutSeconds", value, dialect, 1)?;
    }
    if let Some(value) = &task.heartbeat_seconds {
        validate_int_field(name, "HeartbeatSeconds", value, dialect, 1)?;
    }
    for (field, path) in [
        ("TimeoutSecondsPath", &task.timeout_seconds_path),
        ("HeartbeatSecondsPath", &task.heartbeat_seconds_path),
    ] {
        if let Some(path) = path {
            require_path_dialect(name, field, dialect)?;
            parse_path_field(name, field, path)?;
        }
    }
    Ok(())
}

fn validate_parallel(name: &str, parallel: &ParallelState, dialect: QueryLanguage) -> DslResult<()> {
    if parallel.branches.is_empty() {
        return Err(DslError::in_state(name, "Parallel declares no branches"));
    }
    for branch in &parallel.branches {
        validate_machine(branch, dialect)?;
    }
    Ok(())
}

fn validate_map(name: &str, map: &MapState, dialect: QueryLanguage) -> DslResult<()> {
    let Some(processor) = &map.item_processor else {
        return Err(DslError::MissingField(format!("{}.ItemProcessor", name)));
    };
    validate_machine(&processor.machine, dialect)?;

    let distributed = map.mode() == ProcessorMode::Distributed;
    if map.item_reader.is_some() && !distributed {
        return Err(DslError::in_state(
            name,
            "ItemReader requires the DISTRIBUTED processing mode",
        ));
    }
    if map.result_writer.is_some() && !distributed {
        return Err(DslError::in_state(
            name,
            "ResultWriter requires the DISTRIBUTED processing mode",
        ));
    }

    match dialect {
        QueryLanguage::JsonPath => {
            if map.items.is_some() {
                return Err(DslError::in_state(name, "Items requires JSONata"));
            }
            if let Some(path) = &map.items_path {
                parse_path_field(name, "ItemsPath", path)?;
            }
            if let Some(template) = &map.item_selector {
                validate_template(name, template)?;
            }
        }
        QueryLanguage::Jsonata => {
            for (field, present) in [
                ("ItemsPath", map.items_path.is_some()),
                ("MaxConcurrencyPath", map.max_concurrency_path.is_some()),
                (
                    "ToleratedFailureCountPath",
                    map.tolerated_failure_count_path.is_some(),
                ),
                (
                    "ToleratedFailurePercentagePath",
                    map.tolerated_failure_percentage_path.is_some(),
                ),
            ] {
                if present {
                    return Err(DslError::in_state(
                        name,
                        format!("{} is not allowed with JSONata", field),
                    ));
                }
            }
            if let Some(items) = &map.items {
                match items {
                    Value::Array(_) | Value::String(_) => validate_expressions(name, items)?,
                    other => {
                        return Err(DslError::InvalidValue {
                            field: format!("{}.Items", name),
                            message: format!("expected an array or expression, got {}", other),
                        });
                    }
                }
            }
            if let Some(selector) = &map.item_selector {
                validate_expressions(name, selector)?;
            }
        }
    }

    if let Some(value) = &map.max_concurrency {
        validate_int_field(name, "MaxConcurrency", value, dialect, 0)?;
    }
    if let Some(value) = &map.tolerated_failure_count {
        validate_int_field(name, "ToleratedFailureCount", value, dialect, 0)?;
    }
    if let Some(value) = &map.tolerated_failure_percentage {
        validate_percentage_field(name, value, dialect)?;
    }
    for (field, path) in [
        ("MaxConcurrencyPath", &map.max_concurrency_path),
        ("ToleratedFailureCountPath", &map.tolerated_failure_count_path),
        (
            "ToleratedFailurePercentagePath",
            &map.tolerated_failure_percentage_path,
        ),
    ] {
        if let Some(path) = path {
            parse_path_field(name, field, path)?;
        }
    }

    if let Some(reader) = &map.item_reader {
        if let Some(config) = &reader.reader_config {
            if let Some(value) = &config.max_items {
                validate_int_field(name, "MaxItems", value, dialect, 0)?;
            }
            if let Some(path) = &config.max_items_path {
                require_path_dialect(name, "MaxItemsPath", dialect)?;
                parse_path_field(name, "MaxItemsPath", path)?;
            }
        }
        match dialect {
            QueryLanguage::JsonPath => {
                if let Some(template) = &reader.parameters {
                    validate_template(name, template)?;
                }
            }
            QueryLanguage::Jsonata => {
                if reader.parameters.is_some() {
                    return Err(DslError::in_state(
                        name,
                        "ItemReader Parameters is not allowed with JSONata",
                    ));
                }
                if let Some(arguments) = &reader.arguments {
                    validate_expressions(name, arguments)?;
                }
            }
        }
    }

    if let Some(batcher) = &map.item_batcher {
        if let Some(value) = &batcher.max_items_per_batch {
            validate_int_field(name, "MaxItemsPerBatch", value, dialect, 1)?;
        }
        if let Some(value) = &batcher.max_input_bytes_per_batch {
            validate_int_field(name, "MaxInputBytesPerBatch", value, dialect, 1)?;
        }
    }

    Ok(())
}

fn validate_percentage_field(name: &str, value: &Value, dialect: QueryLanguage) -> DslResult<()> {
    match value {
        Value::Number(n) => {
            let v = n.as_f64().unwrap_or(-1.0);
            if !(0.0..=100.0).contains(&v) {
                return Err(DslError::InvalidValue {
                    field: format!("{}.ToleratedFailurePercentage", name),
                    message: format!("{} is outside [0, 100]", n),
                });
            }
            Ok(())
        }
        Value::String(text) if dialect == QueryLanguage::Jsonata && is_expression(text) => {
            parser::parse_delimited(text).map_err(|e| DslError::in_state(name, e.to_string()))?;
            Ok(())
        }
        other => Err(DslError::InvalidValue {
            field: format!("{}.ToleratedFailurePercentage", name),
            message: format!("expected a number, got {}", other),
        }),
    }
}

fn validate_choice(
    name: &str,
    choice: &ChoiceState,
    machine: &StateMachine,
    dialect: QueryLanguage,
) -> DslResult<()> {
    if choice.choices.is_empty() {
        return Err(DslError::in_state(name, "Choice declares no rules"));
    }
    if let Some(default) = &choice.default {
        if !machine.states.contains_key(default) {
            return Err(DslError::in_state(
                name,
                format!("Default target '{}' is not a state", default),
            ));
        }
    }
    for rule in &choice.choices {
        let Some(next) = &rule.next else {
            return Err(DslError::in_state(name, "top-level rule is missing Next"));
        };
        if !machine.states.contains_key(next) {
            return Err(DslError::in_state(
                name,
                format!("rule Next target '{}' is not a state", next),
            ));
        }
        validate_choice_rule(name, rule, dialect, false)?;
    }
    Ok(())
}

fn validate_choice_rule(
    name: &str,
    rule: &ChoiceRule,
    dialect: QueryLanguage,
    nested: bool,
) -> DslResult<()> {
    if nested && rule.next.is_some() {
        return Err(DslError::in_state(name, "nested rule must not carry Next"));
    }

    if dialect == QueryLanguage::Jsonata {
        if rule.variable.is_some() || rule.comparison.is_some() || rule.is_composite() {
            return Err(DslError::in_state(
                name,
                "path-style rule fields are not allowed with JSONata",
            ));
        }
        let Some(condition) = &rule.condition else {
            return Err(DslError::in_state(name, "rule is missing Condition"));
        };
        match condition {
            Value::Bool(_) => {}
            Value::String(text) if is_expression(text) => {
                parser::parse_delimited(text)
                    .map_err(|e| DslError::in_state(name, e.to_string()))?;
            }
            other => {
                return Err(DslError::InvalidValue {
                    field: format!("{}.Condition", name),
                    message: format!("expected a boolean or expression, got {}", other),
                });
            }
        }
        return Ok(());
    }

    if rule.condition.is_some() {
        return Err(DslError::in_state(name, "Condition requires JSONata"));
    }

    let shapes = [
        rule.comparison.is_some() || rule.variable.is_some(),
        rule.and.is_some(),
        rule.or.is_some(),
        rule.not.is_some(),
    ];
    if shapes.iter().filter(|set| **set).count() != 1 {
        return Err(DslError::in_state(
            name,
            "rule must use exactly one of a comparison, And, Or, or Not",
        ));
    }

    if let Some(comparison) = &rule.comparison {
        let Some(variable) = &rule.variable else {
            return Err(DslError::in_state(name, "comparison rule is missing Variable"));
        };
        parse_path_field(name, "Variable", variable)?;
        validate_comparison_operand(name, comparison)?;
    } else if rule.variable.is_some() {
        return Err(DslError::in_state(
            name,
            "Variable without a comparison operator",
        ));
    }

    for branch in rule.and.iter().flatten().chain(rule.or.iter().flatten()) {
        validate_choice_rule(name, branch, dialect, true)?;
    }
    if rule.and.as_ref().is_some_and(|l| l.is_empty()) {
        return Err(DslError::in_state(name, "And must not be empty"));
    }
    if rule.or.as_ref().is_some_and(|l| l.is_empty()) {
        return Err(DslError::in_state(name, "Or must not be empty"));
    }
    if let Some(inner) = &rule.not {
        validate_choice_rule(name, inner, dialect, true)?;
    }
    Ok(())
}

fn validate_comparison_operand(name: &str, comparison: &Comparison) -> DslResult<()> {
    use Comparison::*;
    match comparison {
        StringEqualsPath(p) | StringLessThanPath(p) | StringGreaterThanPath(p)
        | StringLessThanEqualsPath(p) | StringGreaterThanEqualsPath(p) | NumericEqualsPath(p)
        | NumericLessThanPath(p) | NumericGreaterThanPath(p) | NumericLessThanEqualsPath(p)
        | NumericGreaterThanEqualsPath(p) | BooleanEqualsPath(p) | TimestampEqualsPath(p)
        | TimestampLessThanPath(p) | TimestampGreaterThanPath(p)
        | TimestampLessThanEqualsPath(p) | TimestampGreaterThanEqualsPath(p) => {
            parse_path_field(name, "comparison path", p)?;
            Ok(())
        }
        TimestampEquals(t) | TimestampLessThan(t) | TimestampGreaterThan(t)
        | TimestampLessThanEquals(t) | TimestampGreaterThanEquals(t) => {
            timestamp::parse_timestamp(t).map_err(|e| DslError::in_state(name, e.to_string()))?;
            Ok(())
        }
        _ => Ok(()),
    }
}

fn validate_wait(name: &str, wait: &WaitState, dialect: QueryLanguage) -> DslResult<()> {
    let sources = [
        wait.seconds.is_some(),
        wait.seconds_path.is_some(),
        wait.timestamp.is_some(),
        wait.timestamp_path.is_some(),
    ];
    if sources.iter().filter(|set| **set).count() != 1 {
        return Err(DslError::in_state(
            name,
            "Wait must declare exactly one of Seconds, SecondsPath, Timestamp, TimestampPath",
        ));
    }

    if let Some(seconds) = &wait.seconds {
        validate_int_field(name, "Seconds", seconds, dialect, 0)?;
    }
    if let Some(timestamp_value) = &wait.timestamp {
        match timestamp_value {
            Value::String(text) if dialect == QueryLanguage::Jsonata && is_expression(text) => {
                parser::parse_delimited(text)
                    .map_err(|e| DslError::in_state(name, e.to_string()))?;
            }
            Value::String(text) => {
                // A literal timestamp (including a stray {% %} under the
                // path dialect) must already be strictly valid.
                timestamp::parse_timestamp(text)?;
            }
            other => {
                return Err(DslError::InvalidValue {
                    field: format!("{}.Timestamp", name),
                    message: format!("expected a timestamp string, got {}", other),
                });
            }
        }
    }
    for (field, path) in [
        ("SecondsPath", &wait.seconds_path),
        ("TimestampPath", &wait.timestamp_path),
    ] {
        if let Some(path) = path {
            require_path_dialect(name, field, dialect)?;
            parse_path_field(name, field, path)?;
        }
    }
    Ok(())
}

fn validate_fail(name: &str, fail: &FailState, dialect: QueryLanguage) -> DslResult<()> {
    if fail.error.is_some() && fail.error_path.is_some() {
        return Err(DslError::in_state(name, "Fail declares both Error and ErrorPath"));
    }
    if fail.cause.is_some() && fail.cause_path.is_some() {
        return Err(DslError::in_state(name, "Fail declares both Cause and CausePath"));
    }

    for (field, value) in [("Error", &fail.error), ("Cause", &fail.cause)] {
        if let Some(value) = value {
            match value {
                Value::String(text) if is_expression(text) => {
                    if dialect != QueryLanguage::Jsonata {
                        return Err(DslError::in_state(
                            name,
                            format!("expression-valued {} requires JSONata", field),
                        ));
                    }
                    parser::parse_delimited(text)
                        .map_err(|e| DslError::in_state(name, e.to_string()))?;
                }
                Value::String(_) => {}
                other => {
                    return Err(DslError::InvalidValue {
                        field: format!("{}.{}", name, field),
                        message: format!("expected a string, got {}", other),
                    });
                }
            }
        }
    }
    for (field, path) in [("ErrorPath", &fail.error_path), ("CausePath", &fail.cause_path)] {
        if let Some(path) = path {
            require_path_dialect(name, field, dialect)?;
            parse_reference_field(name, field, path)?;
        }
    }
    Ok(())
}

fn require_path_dialect(name: &str, field: &str, dialect: QueryLanguage) -> DslResult<()> {
    if dialect == QueryLanguage::Jsonata {
        return Err(DslError::in_state(
            name,
            format!("{} is not allowed with JSONata", field),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(def: Value) -> DslResult<StateMachine> {
        parse_definition(&def.to_string())
    }

    fn minimal_pass() -> Value {
        json!({
            "StartAt": "Done",
            "States": {"Done": {"Type": "Pass", "End": true}}
        })
    }

    #[test]
    fn test_minimal_definition_passes() {
        assert!(parse(minimal_pass()).is_ok());
    }

    #[test]
    fn test_missing_start_at_target() {
        let err = parse(json!({
            "StartAt": "Nope",
            "States": {"Done": {"Type": "Pass", "End": true}}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("StartAt"));
    }

    #[test]
    fn test_dangling_next_target() {
        let err = parse(json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Pass", "Next": "Ghost"}}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn test_next_and_end_conflict() {
        assert!(parse(json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Pass", "Next": "A", "End": true}}
        }))
        .is_err());
    }

    #[test]
    fn test_dialect_mixing_rejected() {
        // Arguments under the path dialect
        assert!(parse(json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Pass", "Arguments": {}, "End": true}}
        }))
        .is_err());

        // InputPath under JSONata
        assert!(parse(json!({
            "QueryLanguage": "JSONata",
            "StartAt": "A",
            "States": {"A": {"Type": "Pass", "InputPath": "$.x", "End": true}}
        }))
        .is_err());
    }

    #[test]
    fn test_invalid_literal_timestamp_is_creation_error() {
        for bad in [
            "2016-03-14 01:59:00Z",  // no T
            "2016-03-14T01:59:00",   // no timezone
            "2016-13-14T01:59:00Z",  // impossible month
            "2016-03-14T25:59:00Z",  // impossible hour
            "{% $.when %}",          // expression under the path dialect
        ] {
            let result = parse(json!({
                "StartAt": "W",
                "States": {"W": {"Type": "Wait", "Timestamp": bad, "End": true}}
            }));
            assert!(result.is_err(), "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_valid_literal_timestamp_passes() {
        assert!(parse(json!({
            "StartAt": "W",
            "States": {"W": {"Type": "Wait", "Timestamp": "2016-03-14T01:59:00Z", "End": true}}
        }))
        .is_ok());
    }

    #[test]
    fn test_wait_requires_exactly_one_source() {
        assert!(parse(json!({
            "StartAt": "W",
            "States": {"W": {"Type": "Wait", "Seconds": 1, "SecondsPath": "$.s", "End": true}}
        }))
        .is_err());
        assert!(parse(json!({
            "StartAt": "W",
            "States": {"W": {"Type": "Wait", "End": true}}
        }))
        .is_err());
    }

    #[test]
    fn test_negative_and_fractional_literals_rejected() {
        let map_def = |value: Value| {
            json!({
                "StartAt": "M",
                "States": {"M": {
                    "Type": "Map",
                    "ItemsPath": "$.items",
                    "MaxConcurrency": value,
                    "ItemProcessor": {
                        "StartAt": "P",
                        "States": {"P": {"Type": "Pass", "End": true}}
                    },
                    "End": true
                }}
            })
        };
        assert!(parse(map_def(json!(-1))).is_err());
        assert!(parse(map_def(json!(1.5))).is_err());
        assert!(parse(map_def(json!(0))).is_ok());
    }

    #[test]
    fn test_tolerated_percentage_range() {
        let def = |value: Value| {
            json!({
                "StartAt": "M",
                "States": {"M": {
                    "Type": "Map",
                    "ItemsPath": "$.items",
                    "ToleratedFailurePercentage": value,
                    "ItemProcessor": {
                        "StartAt": "P",
                        "States": {"P": {"Type": "Pass", "End": true}}
                    },
                    "End": true
                }}
            })
        };
        assert!(parse(def(json!(100))).is_ok());
        assert!(parse(def(json!(101))).is_err());
        assert!(parse(def(json!(-5))).is_err());
    }

    #[test]
    fn test_states_all_must_be_last_and_alone() {
        let def = |retry: Value| {
            json!({
                "StartAt": "T",
                "States": {"T": {
                    "Type": "Task", "Resource": "arn:test:fn",
                    "Retry": retry, "End": true
                }}
            })
        };
        assert!(parse(def(json!([
            {"ErrorEquals": ["States.ALL"]},
            {"ErrorEquals": ["States.Timeout"]}
        ])))
        .is_err());
        assert!(parse(def(json!([
            {"ErrorEquals": ["States.ALL", "States.Timeout"]}
        ])))
        .is_err());
        assert!(parse(def(json!([
            {"ErrorEquals": ["States.Timeout"]},
            {"ErrorEquals": ["States.ALL"]}
        ])))
        .is_ok());
    }

    #[test]
    fn test_choice_rule_shapes() {
        // Nested Next is rejected
        assert!(parse(json!({
            "StartAt": "C",
            "States": {
                "C": {"Type": "Choice", "Choices": [
                    {"Not": {"Variable": "$.x", "IsPresent": true, "Next": "D"}, "Next": "D"}
                ], "Default": "D"},
                "D": {"Type": "Succeed"}
            }
        }))
        .is_err());

        // Variable without an operator is rejected
        assert!(parse(json!({
            "StartAt": "C",
            "States": {
                "C": {"Type": "Choice", "Choices": [
                    {"Variable": "$.x", "Next": "D"}
                ]},
                "D": {"Type": "Succeed"}
            }
        }))
        .is_err());
    }

    #[test]
    fn test_jsonata_condition_rules() {
        assert!(parse(json!({
            "QueryLanguage": "JSONata",
            "StartAt": "C",
            "States": {
                "C": {"Type": "Choice", "Choices": [
                    {"Condition": "{% $states.input.value > 3 %}", "Next": "D"}
                ], "Default": "D"},
                "D": {"Type": "Succeed"}
            }
        }))
        .is_ok());

        // A path-style rule under JSONata is rejected
        assert!(parse(json!({
            "QueryLanguage": "JSONata",
            "StartAt": "C",
            "States": {
                "C": {"Type": "Choice", "Choices": [
                    {"Variable": "$.x", "IsPresent": true, "Next": "D"}
                ], "Default": "D"},
                "D": {"Type": "Succeed"}
            }
        }))
        .is_err());
    }

    #[test]
    fn test_invalid_escape_in_expression_is_creation_error() {
        let err = parse(json!({
            "QueryLanguage": "JSONata",
            "StartAt": "A",
            "States": {"A": {
                "Type": "Pass",
                "Output": "{% 'bad \\q escape' %}",
                "End": true
            }}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("escape"));
    }

    #[test]
    fn test_item_reader_requires_distributed() {
        assert!(parse(json!({
            "StartAt": "M",
            "States": {"M": {
                "Type": "Map",
                "ItemReader": {"Parameters": {"Bucket": "b", "Key": "k"}},
                "ItemProcessor": {
                    "StartAt": "P",
                    "States": {"P": {"Type": "Pass", "End": true}}
                },
                "End": true
            }}
        }))
        .is_err());

        assert!(parse(json!({
            "StartAt": "M",
            "States": {"M": {
                "Type": "Map",
                "ItemReader": {"Parameters": {"Bucket": "b", "Key": "k"}},
                "ItemProcessor": {
                    "ProcessorConfig": {"Mode": "DISTRIBUTED"},
                    "StartAt": "P",
                    "States": {"P": {"Type": "Pass", "End": true}}
                },
                "End": true
            }}
        }))
        .is_ok());
    }

    #[test]
    fn test_unknown_intrinsic_rejected() {
        let err = parse(json!({
            "StartAt": "A",
            "States": {"A": {
                "Type": "Pass",
                "Parameters": {"x.$": "States.MysteryFn($.a)"},
                "End": true
            }}
        }))
        .unwrap_err();
        assert!(matches!(err, DslError::UnknownIntrinsic(_)));
    }

    #[test]
    fn test_known_intrinsic_and_path_bindings_pass() {
        assert!(parse(json!({
            "StartAt": "A",
            "States": {"A": {
                "Type": "Pass",
                "Parameters": {
                    "formatted.$": "States.Format('{}-{}', $.a, $.b)",
                    "value.$": "$.nested.value",
                    "literal": {"kept": true}
                },
                "End": true
            }}
        }))
        .is_ok());
    }

    #[test]
    fn test_fail_dual_sources_rejected() {
        assert!(parse(json!({
            "StartAt": "F",
            "States": {"F": {"Type": "Fail", "Error": "Oops", "ErrorPath": "$.err"}}
        }))
        .is_err());
    }
}
