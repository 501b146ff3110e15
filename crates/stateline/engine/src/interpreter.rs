//! The execution interpreter
//!
//! Drives one execution of a validated definition: resolves each state's
//! effective input, executes the state, consults Retry/Catch on failure,
//! applies the output pipeline and Assign bindings, records history
//! events, and follows transitions until a terminal state or an
//! unhandled error. Parallel and Map execution live in the concurrency
//! module; this file owns the loop and the scalar state types.

use crate::concurrency;
use crate::eval::{self, EvalScope};
use crate::map_run::MapRunRegistry;
use crate::recorder::{BranchCursor, EventRecorder};
use crate::retry::{self, RetryDecision, RetryTracker};
use crate::store::{ObjectStore, TaskInvoker};
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use stateline_dsl::paths::Path;
use stateline_dsl::{parse_timestamp, parser};
use stateline_types::{
    ChoiceRule, ChoiceState, Comparison, Event, EventType, ExecutionId, ExecutionOutcome,
    ExecutionStatus, FailState, MapRunId, QueryLanguage, State, StateError, StateMachine,
    StateResult, TaskState, WaitState, error_name,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Everything an execution produced: final outcome, the full event
/// history, and the histories of any Distributed Map Runs it owned.
#[derive(Debug)]
pub struct ExecutionReport {
    pub execution_id: ExecutionId,
    pub outcome: ExecutionOutcome,
    pub events: Vec<Event>,
    pub map_runs: Vec<MapRunReport>,
}

/// Snapshot of one Map Run's separate history.
#[derive(Debug)]
pub struct MapRunReport {
    pub id: MapRunId,
    pub arn: String,
    /// Whether this invocation resumed an existing Map Run.
    pub resumed: bool,
    pub events: Vec<Event>,
}

/// Shared handles threaded through a run, cheap to clone into spawned
/// branch and iteration tasks.
#[derive(Clone)]
pub(crate) struct RunShared {
    pub execution_id: ExecutionId,
    pub recorder: Arc<EventRecorder>,
    pub store: Arc<dyn ObjectStore>,
    pub invoker: Arc<dyn TaskInvoker>,
    pub map_runs: Arc<MapRunRegistry>,
    pub variables: Arc<Mutex<Map<String, Value>>>,
    pub map_run_reports: Arc<Mutex<Vec<MapRunReport>>>,
    /// The `Execution` part of the context object, fixed for the run.
    pub execution_context: Value,
}

/// Interprets definitions against the configured collaborators.
pub struct Interpreter {
    store: Arc<dyn ObjectStore>,
    invoker: Arc<dyn TaskInvoker>,
    map_runs: Arc<MapRunRegistry>,
}

impl Interpreter {
    pub fn new(store: Arc<dyn ObjectStore>, invoker: Arc<dyn TaskInvoker>) -> Self {
        Self {
            store,
            invoker,
            map_runs: Arc::new(MapRunRegistry::new()),
        }
    }

    /// Share a Map Run registry across interpreters (or inspect it from
    /// tests); required for re-invocations to observe prior Map Runs.
    pub fn with_registry(
        store: Arc<dyn ObjectStore>,
        invoker: Arc<dyn TaskInvoker>,
        map_runs: Arc<MapRunRegistry>,
    ) -> Self {
        Self {
            store,
            invoker,
            map_runs,
        }
    }

    pub fn registry(&self) -> Arc<MapRunRegistry> {
        Arc::clone(&self.map_runs)
    }

    /// Run a definition to completion with a fresh execution id.
    pub async fn execute(&self, machine: &StateMachine, input: Value) -> ExecutionReport {
        self.execute_as(machine, input, ExecutionId::generate()).await
    }

    /// Run a definition under a caller-chosen execution id. Re-running
    /// with the same id after a failure resumes that execution's Map
    /// Runs.
    pub async fn execute_as(
        &self,
        machine: &StateMachine,
        input: Value,
        execution_id: ExecutionId,
    ) -> ExecutionReport {
        let started_at = Utc::now();
        let recorder = Arc::new(EventRecorder::new());
        let shared = RunShared {
            execution_id: execution_id.clone(),
            recorder: Arc::clone(&recorder),
            store: Arc::clone(&self.store),
            invoker: Arc::clone(&self.invoker),
            map_runs: Arc::clone(&self.map_runs),
            variables: Arc::new(Mutex::new(Map::new())),
            map_run_reports: Arc::new(Mutex::new(Vec::new())),
            execution_context: json!({
                "Execution": {
                    "Id": execution_id.to_string(),
                    "Input": input,
                    "StartTime": started_at.to_rfc3339(),
                }
            }),
        };

        let mut cursor = BranchCursor::root();
        recorder.append(
            &mut cursor,
            EventType::ExecutionStarted,
            Some(json!({"input": input})),
        );
        tracing::info!(execution = %execution_id.short(), "execution started");

        let dialect = machine.dialect();
        let run = run_machine(&shared, machine, dialect, input, &mut cursor, None);
        let result = match machine.timeout_seconds {
            Some(limit) => tokio::time::timeout(Duration::from_secs(limit), run)
                .await
                .unwrap_or_else(|_| {
                    Err(StateError::named(error_name::TIMEOUT))
                }),
            None => run.await,
        };

        let stopped_at = Utc::now();
        let outcome = match result {
            Ok(output) => {
                recorder.append(
                    &mut cursor,
                    EventType::ExecutionSucceeded,
                    Some(json!({"output": output})),
                );
                tracing::info!(execution = %execution_id.short(), "execution succeeded");
                ExecutionOutcome {
                    status: ExecutionStatus::Succeeded,
                    output: Some(output),
                    error: None,
                    started_at,
                    stopped_at,
                }
            }
            Err(error) if error.error == error_name::TIMEOUT => {
                recorder.append(
                    &mut cursor,
                    EventType::ExecutionTimedOut,
                    Some(error.as_error_object()),
                );
                tracing::warn!(execution = %execution_id.short(), "execution timed out");
                ExecutionOutcome {
                    status: ExecutionStatus::TimedOut,
                    output: None,
                    error: Some(error),
                    started_at,
                    stopped_at,
                }
            }
            Err(error) => {
                recorder.append(
                    &mut cursor,
                    EventType::ExecutionFailed,
                    Some(error.as_error_object()),
                );
                tracing::warn!(
                    execution = %execution_id.short(),
                    error = %error.error,
                    "execution failed"
                );
                ExecutionOutcome {
                    status: ExecutionStatus::Failed,
                    output: None,
                    error: Some(error),
                    started_at,
                    stopped_at,
                }
            }
        };

        let map_runs = std::mem::take(
            &mut *shared.map_run_reports.lock().expect("report lock poisoned"),
        );
        ExecutionReport {
            execution_id,
            outcome,
            events: recorder.snapshot(),
            map_runs,
        }
    }
}

/// Context object and variable snapshot for one state's evaluation.
pub(crate) fn state_scope_parts(
    shared: &RunShared,
    state_name: &str,
    extra_context: Option<&Value>,
) -> (Value, Map<String, Value>) {
    let mut context = shared.execution_context.clone();
    if let Value::Object(object) = &mut context {
        object.insert(
            "State".to_string(),
            json!({"Name": state_name, "EnteredTime": Utc::now().to_rfc3339()}),
        );
        if let Some(Value::Object(extra)) = extra_context {
            for (key, value) in extra {
                object.insert(key.clone(), value.clone());
            }
        }
    }
    let variables = shared.variables.lock().expect("variable lock poisoned").clone();
    (context, variables)
}

enum StepOutcome {
    Transition { next: String, output: Value },
    Complete(Value),
}

/// Drive one (sub-)machine to completion. Boxed because Parallel and
/// Map recurse through it.
pub(crate) fn run_machine<'a>(
    shared: &'a RunShared,
    machine: &'a StateMachine,
    dialect: QueryLanguage,
    input: Value,
    cursor: &'a mut BranchCursor,
    extra_context: Option<&'a Value>,
) -> BoxFuture<'a, StateResult<Value>> {
    Box::pin(async move {
        let dialect = machine.query_language.unwrap_or(dialect);
        let mut current = machine.start_at.clone();
        let mut data = input;
        loop {
            let state = machine.state(&current).ok_or_else(|| {
                StateError::runtime(format!("transition to unknown state '{}'", current))
            })?;
            shared.recorder.append(
                cursor,
                EventType::StateEntered,
                Some(json!({"name": current, "input": data})),
            );
            tracing::debug!(state = %current, kind = state.type_name(), "state entered");

            let step =
                exec_state(shared, machine, dialect, &current, state, &data, cursor, extra_context)
                    .await?;
            match step {
                StepOutcome::Transition { next, output } => {
                    shared.recorder.append(
                        cursor,
                        EventType::StateExited,
                        Some(json!({"name": current, "output": output})),
                    );
                    current = next;
                    data = output;
                }
                StepOutcome::Complete(output) => {
                    shared.recorder.append(
                        cursor,
                        EventType::StateExited,
                        Some(json!({"name": current, "output": output})),
                    );
                    return Ok(output);
                }
            }
        }
    })
}

#[allow(clippy::too_many_arguments)]
async fn exec_state(
    shared: &RunShared,
    machine: &StateMachine,
    dialect: QueryLanguage,
    name: &str,
    state: &State,
    data: &Value,
    cursor: &mut BranchCursor,
    extra_context: Option<&Value>,
) -> StateResult<StepOutcome> {
    let (context, variables) = state_scope_parts(shared, name, extra_context);
    let scope = EvalScope {
        dialect,
        context: &context,
        variables: &variables,
    };

    match state {
        State::Pass(pass) => {
            let effective = eval::state_input(&pass.io, data, &scope)?;
            let result = pass.result.clone().unwrap_or(effective);
            let output = eval::state_output(&pass.io, data, &result, &scope)?;
            apply_assign(shared, &pass.io.assign, data, &result, &scope)?;
            finish(&pass.transition, output)
        }
        State::Succeed(succeed) => {
            let effective = eval::state_input(&succeed.io, data, &scope)?;
            let output = eval::state_output(&succeed.io, data, &effective, &scope)?;
            Ok(StepOutcome::Complete(output))
        }
        State::Fail(fail) => Err(resolve_failure(fail, data, &scope)?),
        State::Wait(wait) => {
            let effective = eval::state_input(&wait.io, data, &scope)?;
            let delay = resolve_wait(wait, &effective, &scope)?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let output = eval::state_output(&wait.io, data, &effective, &scope)?;
            apply_assign(shared, &wait.io.assign, data, &effective, &scope)?;
            finish(&wait.transition, output)
        }
        State::Choice(choice) => exec_choice(shared, choice, data, &scope),
        State::Task(_) | State::Parallel(_) | State::Map(_) => {
            exec_with_policies(shared, machine, dialect, name, state, data, cursor, extra_context)
                .await
        }
    }
}

/// Task/Parallel/Map execution wrapped in the Retry/Catch policy loop.
#[allow(clippy::too_many_arguments)]
async fn exec_with_policies(
    shared: &RunShared,
    _machine: &StateMachine,
    dialect: QueryLanguage,
    name: &str,
    state: &State,
    data: &Value,
    cursor: &mut BranchCursor,
    extra_context: Option<&Value>,
) -> StateResult<StepOutcome> {
    let retriers = state.retriers();
    let catchers = state.catchers();
    let mut tracker = RetryTracker::new(retriers.len());

    loop {
        let (context, variables) = state_scope_parts(shared, name, extra_context);
        let scope = EvalScope {
            dialect,
            context: &context,
            variables: &variables,
        };

        let attempt_cursor = &mut *cursor;
        let attempt: StateResult<(Value, Value)> = async {
            match state {
                State::Task(task) => {
                    let effective = eval::state_input(&task.io, data, &scope)?;
                    let result =
                        attempt_task(shared, task, effective.clone(), &scope, attempt_cursor)
                            .await?;
                    Ok((effective, result))
                }
                State::Parallel(parallel) => {
                    let effective = eval::state_input(&parallel.io, data, &scope)?;
                    let result = concurrency::exec_parallel(
                        shared,
                        parallel,
                        dialect,
                        &effective,
                        attempt_cursor,
                        extra_context,
                    )
                    .await?;
                    Ok((effective, result))
                }
                State::Map(map) => {
                    let effective = eval::state_input(&map.io, data, &scope)?;
                    let result = concurrency::exec_map(
                        shared,
                        name,
                        map,
                        dialect,
                        &effective,
                        &scope,
                        attempt_cursor,
                    )
                    .await?;
                    Ok((effective, result))
                }
                _ => unreachable!("policy loop only wraps Task, Parallel and Map"),
            }
        }
        .await;

        // Output-pipeline failures are state failures and consult the
        // same policies as the attempt itself.
        let error = match attempt {
            Ok((_effective, result)) => {
                let io = state.io().expect("Task, Parallel and Map carry io");
                let finished = eval::state_output(io, data, &result, &scope).and_then(|output| {
                    apply_assign(shared, &io.assign, data, &result, &scope)?;
                    Ok(output)
                });
                match finished {
                    Ok(output) => {
                        let transition = state.transition().expect("non-terminal state");
                        return finish(transition, output);
                    }
                    Err(error) => error,
                }
            }
            Err(error) => error,
        };

        match tracker.next_attempt(retriers, &error) {
            RetryDecision::Retry {
                attempt, delay, ..
            } => {
                shared.recorder.append(
                    cursor,
                    EventType::TaskRetryScheduled,
                    Some(json!({
                        "name": name,
                        "error": error.error,
                        "attempt": attempt,
                        "delaySeconds": delay.as_secs_f64(),
                    })),
                );
                tracing::debug!(state = %name, attempt, "retry scheduled");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            RetryDecision::Exhausted { matched_retrier } => {
                // A matched retrier that is out of attempts (including
                // MaxAttempts 0) still marks the attempt boundary.
                if let Some(index) = matched_retrier {
                    shared.recorder.append(
                        cursor,
                        EventType::TaskRetriesExhausted,
                        Some(json!({
                            "name": name,
                            "error": error.error,
                            "attempts": tracker.attempts_for(index),
                        })),
                    );
                }
                if let Some(catcher) = retry::select_catcher(catchers, &error) {
                    let mut output = data.clone();
                    match &catcher.result_path {
                        Some(text) => {
                            let path = Path::parse_reference(text)
                                .map_err(|e| StateError::runtime(e.to_string()))?;
                            path.inject(&mut output, error.as_error_object()).map_err(
                                |e| {
                                    StateError::new(
                                        error_name::RESULT_PATH_MATCH_FAILURE,
                                        e.to_string(),
                                    )
                                },
                            )?;
                        }
                        None => output = error.as_error_object(),
                    }
                    tracing::debug!(state = %name, error = %error.error, to = %catcher.next, "error caught");
                    return Ok(StepOutcome::Transition {
                        next: catcher.next.clone(),
                        output,
                    });
                }
                return Err(error);
            }
        }
    }
}

async fn attempt_task(
    shared: &RunShared,
    task: &TaskState,
    input: Value,
    scope: &EvalScope<'_>,
    cursor: &mut BranchCursor,
) -> StateResult<Value> {
    let timeout = eval::resolve_u64_setting(
        "TimeoutSeconds",
        task.timeout_seconds.as_ref(),
        task.timeout_seconds_path.as_ref(),
        &input,
        scope,
    )?;

    shared.recorder.append(
        cursor,
        EventType::TaskScheduled,
        Some(json!({"resource": task.resource, "input": input})),
    );
    shared.recorder.append(cursor, EventType::TaskStarted, None);

    let invocation = shared.invoker.invoke(&task.resource, input);
    let result = match timeout {
        Some(limit) if limit > 0 => {
            match tokio::time::timeout(Duration::from_secs(limit), invocation).await {
                Ok(inner) => inner,
                Err(_) => Err(StateError::new(
                    error_name::TIMEOUT,
                    format!("task did not complete within {} second(s)", limit),
                )),
            }
        }
        _ => invocation.await,
    };

    match result {
        Ok(output) => {
            shared.recorder.append(
                cursor,
                EventType::TaskSucceeded,
                Some(json!({"output": output})),
            );
            Ok(output)
        }
        Err(error) => {
            shared
                .recorder
                .append(cursor, EventType::TaskFailed, Some(error.as_error_object()));
            Err(error)
        }
    }
}

fn exec_choice(
    _shared: &RunShared,
    choice: &ChoiceState,
    data: &Value,
    scope: &EvalScope<'_>,
) -> StateResult<StepOutcome> {
    let effective = eval::state_input(&choice.io, data, scope)?;

    for rule in &choice.choices {
        if eval_choice_rule(rule, &effective, scope)? {
            let next = rule
                .next
                .clone()
                .ok_or_else(|| StateError::runtime("matched rule has no Next"))?;
            let output = eval::state_output(&choice.io, data, &effective, scope)?;
            return Ok(StepOutcome::Transition { next, output });
        }
    }
    if let Some(default) = &choice.default {
        let output = eval::state_output(&choice.io, data, &effective, scope)?;
        return Ok(StepOutcome::Transition {
            next: default.clone(),
            output,
        });
    }
    Err(StateError::new(
        error_name::NO_CHOICE_MATCHED,
        "no rule matched and no Default is declared",
    ))
}

fn eval_choice_rule(rule: &ChoiceRule, data: &Value, scope: &EvalScope<'_>) -> StateResult<bool> {
    if let Some(condition) = &rule.condition {
        return match condition {
            Value::Bool(b) => Ok(*b),
            Value::String(text) if parser::is_expression(text) => {
                let states = json!({"input": data, "context": scope.context});
                let value = eval::eval_expression_str(text, data, &states, scope)?;
                value.as_bool().ok_or_else(|| {
                    StateError::query_evaluation("Condition must evaluate to a boolean")
                })
            }
            _ => Err(StateError::query_evaluation("Condition must be a boolean")),
        };
    }
    if let Some(rules) = &rule.and {
        for inner in rules {
            if !eval_choice_rule(inner, data, scope)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }
    if let Some(rules) = &rule.or {
        for inner in rules {
            if eval_choice_rule(inner, data, scope)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    if let Some(inner) = &rule.not {
        return Ok(!eval_choice_rule(inner, data, scope)?);
    }

    let variable = rule
        .variable
        .as_ref()
        .ok_or_else(|| StateError::runtime("rule has no Variable"))?;
    let path = Path::parse(variable).map_err(|e| StateError::runtime(e.to_string()))?;
    let value = eval::resolve_path(&path, data, scope);
    let comparison = rule
        .comparison
        .as_ref()
        .ok_or_else(|| StateError::runtime("rule has no comparison operator"))?;
    Ok(eval_comparison(comparison, value.as_ref(), data, scope))
}

fn eval_comparison(
    comparison: &Comparison,
    value: Option<&Value>,
    data: &Value,
    scope: &EvalScope<'_>,
) -> bool {
    use Comparison::*;

    let operand_path = |text: &str| -> Option<Value> {
        let path = Path::parse(text).ok()?;
        eval::resolve_path(&path, data, scope)
    };
    let as_str = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
    let as_num = |v: Option<&Value>| v.and_then(Value::as_f64);
    let as_time = |s: &str| parse_timestamp(s).ok();

    match comparison {
        IsPresent(expected) => value.is_some() == *expected,
        IsNull(expected) => value.map(Value::is_null).unwrap_or(false) == *expected,
        IsString(expected) => value.map(Value::is_string).unwrap_or(false) == *expected,
        IsNumeric(expected) => value.map(Value::is_number).unwrap_or(false) == *expected,
        IsBoolean(expected) => value.map(Value::is_boolean).unwrap_or(false) == *expected,
        IsTimestamp(expected) => {
            let is_ts = value
                .and_then(Value::as_str)
                .map(|s| parse_timestamp(s).is_ok())
                .unwrap_or(false);
            is_ts == *expected
        }

        StringEquals(rhs) => as_str(value).is_some_and(|lhs| lhs == *rhs),
        StringLessThan(rhs) => as_str(value).is_some_and(|lhs| lhs < *rhs),
        StringGreaterThan(rhs) => as_str(value).is_some_and(|lhs| lhs > *rhs),
        StringLessThanEquals(rhs) => as_str(value).is_some_and(|lhs| lhs <= *rhs),
        StringGreaterThanEquals(rhs) => as_str(value).is_some_and(|lhs| lhs >= *rhs),
        StringMatches(pattern) => as_str(value).is_some_and(|lhs| glob_match(pattern, &lhs)),
        StringEqualsPath(p) => match (as_str(value), as_str(operand_path(p).as_ref())) {
            (Some(lhs), Some(rhs)) => lhs == rhs,
            _ => false,
        },
        StringLessThanPath(p) => match (as_str(value), as_str(operand_path(p).as_ref())) {
            (Some(lhs), Some(rhs)) => lhs < rhs,
            _ => false,
        },
        StringGreaterThanPath(p) => match (as_str(value), as_str(operand_path(p).as_ref())) {
            (Some(lhs), Some(rhs)) => lhs > rhs,
            _ => false,
        },
        StringLessThanEqualsPath(p) => match (as_str(value), as_str(operand_path(p).as_ref())) {
            (Some(lhs), Some(rhs)) => lhs <= rhs,
            _ => false,
        },
        StringGreaterThanEqualsPath(p) => {
            match (as_str(value), as_str(operand_path(p).as_ref())) {
                (Some(lhs), Some(rhs)) => lhs >= rhs,
                _ => false,
            }
        }

        NumericEquals(rhs) => match (as_num(value), rhs.as_f64()) {
            (Some(lhs), Some(rhs)) => lhs == rhs,
            _ => false,
        },
        NumericLessThan(rhs) => match (as_num(value), rhs.as_f64()) {
            (Some(lhs), Some(rhs)) => lhs < rhs,
            _ => false,
        },
        NumericGreaterThan(rhs) => match (as_num(value), rhs.as_f64()) {
            (Some(lhs), Some(rhs)) => lhs > rhs,
            _ => false,
        },
        NumericLessThanEquals(rhs) => match (as_num(value), rhs.as_f64()) {
            (Some(lhs), Some(rhs)) => lhs <= rhs,
            _ => false,
        },
        NumericGreaterThanEquals(rhs) => match (as_num(value), rhs.as_f64()) {
            (Some(lhs), Some(rhs)) => lhs >= rhs,
            _ => false,
        },
        NumericEqualsPath(p) => match (as_num(value), as_num(operand_path(p).as_ref())) {
            (Some(lhs), Some(rhs)) => lhs == rhs,
            _ => false,
        },
        NumericLessThanPath(p) => match (as_num(value), as_num(operand_path(p).as_ref())) {
            (Some(lhs), Some(rhs)) => lhs < rhs,
            _ => false,
        },
        NumericGreaterThanPath(p) => match (as_num(value), as_num(operand_path(p).as_ref())) {
            (Some(lhs), Some(rhs)) => lhs > rhs,
            _ => false,
        },
        NumericLessThanEqualsPath(p) => match (as_num(value), as_num(operand_path(p).as_ref())) {
            (Some(lhs), Some(rhs)) => lhs <= rhs,
            _ => false,
        },
        NumericGreaterThanEqualsPath(p) => {
            match (as_num(value), as_num(operand_path(p).as_ref())) {
                (Some(lhs), Some(rhs)) => lhs >= rhs,
                _ => false,
            }
        }

        BooleanEquals(rhs) => value.and_then(Value::as_bool).is_some_and(|lhs| lhs == *rhs),
        BooleanEqualsPath(p) => {
            match (
                value.and_then(Value::as_bool),
                operand_path(p).and_then(|v| v.as_bool()),
            ) {
                (Some(lhs), Some(rhs)) => lhs == rhs,
                _ => false,
            }
        }

        TimestampEquals(rhs) => timestamp_cmp(value, as_time(rhs), |o| o.is_eq()),
        TimestampLessThan(rhs) => timestamp_cmp(value, as_time(rhs), |o| o.is_lt()),
        TimestampGreaterThan(rhs) => timestamp_cmp(value, as_time(rhs), |o| o.is_gt()),
        TimestampLessThanEquals(rhs) => timestamp_cmp(value, as_time(rhs), |o| o.is_le()),
        TimestampGreaterThanEquals(rhs) => timestamp_cmp(value, as_time(rhs), |o| o.is_ge()),
        TimestampEqualsPath(p) => {
            let rhs = operand_path(p).and_then(|v| v.as_str().and_then(as_time));
            timestamp_cmp(value, rhs, |o| o.is_eq())
        }
        TimestampLessThanPath(p) => {
            let rhs = operand_path(p).and_then(|v| v.as_str().and_then(as_time));
            timestamp_cmp(value, rhs, |o| o.is_lt())
        }
        TimestampGreaterThanPath(p) => {
            let rhs = operand_path(p).and_then(|v| v.as_str().and_then(as_time));
            timestamp_cmp(value, rhs, |o| o.is_gt())
        }
        TimestampLessThanEqualsPath(p) => {
            let rhs = operand_path(p).and_then(|v| v.as_str().and_then(as_time));
            timestamp_cmp(value, rhs, |o| o.is_le())
        }
        TimestampGreaterThanEqualsPath(p) => {
            let rhs = operand_path(p).and_then(|v| v.as_str().and_then(as_time));
            timestamp_cmp(value, rhs, |o| o.is_ge())
        }
    }
}

fn timestamp_cmp(
    value: Option<&Value>,
    rhs: Option<chrono::DateTime<Utc>>,
    check: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    let lhs = value.and_then(Value::as_str).and_then(|s| parse_timestamp(s).ok());
    match (lhs, rhs) {
        (Some(lhs), Some(rhs)) => check(lhs.cmp(&rhs)),
        _ => false,
    }
}

/// `*` wildcard matching with `\*` escaping for literal asterisks.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[char], t: &[char]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some('\\') if p.get(1).is_some() => {
                t.first() == p.get(1) && inner(&p[2..], &t[1..])
            }
            Some('*') => {
                (0..=t.len()).any(|skip| inner(&p[1..], &t[skip..]))
            }
            Some(c) => t.first() == Some(c) && inner(&p[1..], &t[1..]),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    inner(&p, &t)
}

fn resolve_wait(wait: &WaitState, data: &Value, scope: &EvalScope<'_>) -> StateResult<Duration> {
    if wait.seconds.is_some() || wait.seconds_path.is_some() {
        let seconds = eval::resolve_u64_setting(
            "Seconds",
            wait.seconds.as_ref(),
            wait.seconds_path.as_ref(),
            data,
            scope,
        )?
        .unwrap_or(0);
        return Ok(Duration::from_secs(seconds));
    }

    let target = match (&wait.timestamp, &wait.timestamp_path) {
        (Some(Value::String(text)), _) if parser::is_expression(text) => {
            let states = json!({"input": data, "context": scope.context});
            eval::eval_expression_str(text, data, &states, scope)?
        }
        (Some(value), _) => value.clone(),
        (None, Some(path_text)) => {
            let path = Path::parse(path_text).map_err(|e| StateError::runtime(e.to_string()))?;
            eval::resolve_path(&path, data, scope).ok_or_else(|| {
                StateError::runtime(format!(
                    "TimestampPath '{}' selected nothing",
                    path_text
                ))
            })?
        }
        (None, None) => return Ok(Duration::ZERO),
    };

    let Value::String(text) = &target else {
        return Err(StateError::runtime("Timestamp resolved to a non-string value"));
    };
    let when = parse_timestamp(text)
        .map_err(|_| StateError::runtime(format!("'{}' is not a valid timestamp", text)))?;
    let delta = when - Utc::now();
    Ok(delta.to_std().unwrap_or(Duration::ZERO))
}

fn resolve_failure(fail: &FailState, data: &Value, scope: &EvalScope<'_>) -> StateResult<StateError> {
    let resolve_part = |literal: &Option<Value>, path: &Option<String>, field: &str| -> StateResult<Option<String>> {
        if let Some(value) = literal {
            let resolved = match value {
                Value::String(text) if parser::is_expression(text) => {
                    let states = json!({"input": data, "context": scope.context});
                    eval::eval_expression_str(text, data, &states, scope)?
                }
                other => other.clone(),
            };
            return match resolved {
                Value::String(s) => Ok(Some(s)),
                _ => Err(StateError::runtime(format!(
                    "{} resolved to a non-string value",
                    field
                ))),
            };
        }
        if let Some(text) = path {
            let parsed = Path::parse(text).map_err(|e| StateError::runtime(e.to_string()))?;
            let value = eval::resolve_path(&parsed, data, scope).ok_or_else(|| {
                StateError::runtime(format!("{} '{}' selected nothing", field, text))
            })?;
            return match value {
                Value::String(s) => Ok(Some(s)),
                _ => Err(StateError::runtime(format!(
                    "{} must select a string",
                    field
                ))),
            };
        }
        Ok(None)
    };

    let error = resolve_part(&fail.error, &fail.error_path, "Error")?
        .unwrap_or_else(|| "States.Error".to_string());
    let cause = resolve_part(&fail.cause, &fail.cause_path, "Cause")?;
    Ok(StateError { error, cause })
}

fn apply_assign(
    shared: &RunShared,
    assign: &Option<Map<String, Value>>,
    raw_input: &Value,
    result: &Value,
    scope: &EvalScope<'_>,
) -> StateResult<()> {
    let Some(assign) = assign else { return Ok(()) };
    let bindings = eval::eval_assign(assign, raw_input, result, scope)?;
    let mut variables = shared.variables.lock().expect("variable lock poisoned");
    for (name, value) in bindings {
        variables.insert(name, value);
    }
    Ok(())
}

fn finish(transition: &stateline_types::Transition, output: Value) -> StateResult<StepOutcome> {
    if transition.is_end() {
        Ok(StepOutcome::Complete(output))
    } else {
        let next = transition
            .next
            .clone()
            .ok_or_else(|| StateError::runtime("state has neither Next nor End"))?;
        Ok(StepOutcome::Transition { next, output })
    }
}
