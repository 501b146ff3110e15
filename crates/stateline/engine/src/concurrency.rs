//! Parallel branches and Map iteration
//!
//! Parallel fans each branch out as its own task and aggregates outputs
//! in declaration order. Map sources its items (state input, ItemsPath,
//! Items, or an ItemReader for Distributed mode), optionally batches
//! them, and runs the item processor over them under a bounded
//! admission window. Distributed Maps run as a Map Run: a separate
//! event recorder, a reentrant identity in the registry, and optional
//! result persistence through the result writer.

use crate::eval::{self, EvalScope};
use crate::interpreter::{MapRunReport, RunShared, run_machine};
use crate::item_reader;
use crate::recorder::BranchCursor;
use crate::result_writer::{self, IterationResults};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::{Map, Value, json};
use stateline_dsl::parser;
use stateline_dsl::paths::Path;
use stateline_types::{
    EventType, ItemBatcherConfig, MapRunKey, MapState, ParallelState, ProcessorMode,
    QueryLanguage, StateError, StateResult, error_name,
};
use std::sync::Arc;

// ── Parallel ─────────────────────────────────────────────────────────

/// Run every branch concurrently; the output is the array of branch
/// outputs in declaration order. The first failing branch (again in
/// declaration order) fails the whole state after all branches drain.
pub(crate) async fn exec_parallel(
    shared: &RunShared,
    parallel: &ParallelState,
    dialect: QueryLanguage,
    input: &Value,
    cursor: &mut BranchCursor,
    extra_context: Option<&Value>,
) -> StateResult<Value> {
    shared.recorder.append(
        cursor,
        EventType::ParallelStateStarted,
        Some(json!({"branches": parallel.branches.len()})),
    );

    let mut handles = Vec::with_capacity(parallel.branches.len());
    for (index, branch) in parallel.branches.iter().enumerate() {
        let mut branch_cursor = cursor.fork();
        shared.recorder.append(
            &mut branch_cursor,
            EventType::ParallelBranchStarted,
            Some(json!({"index": index})),
        );
        let shared_task = shared.clone();
        let machine = branch.clone();
        let branch_input = input.clone();
        let extra = extra_context.cloned();
        handles.push(tokio::spawn(async move {
            let mut cursor = branch_cursor;
            run_machine(
                &shared_task,
                &machine,
                dialect,
                branch_input,
                &mut cursor,
                extra.as_ref(),
            )
            .await
        }));
    }

    let mut outputs = Vec::with_capacity(handles.len());
    let mut failure: Option<StateError> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(output)) => outputs.push(output),
            Ok(Err(error)) => {
                if failure.is_none() {
                    failure = Some(error);
                }
            }
            Err(join_error) => {
                if failure.is_none() {
                    failure = Some(StateError::new(
                        error_name::BRANCH_FAILED,
                        join_error.to_string(),
                    ));
                }
            }
        }
    }

    match failure {
        Some(error) => {
            shared.recorder.append(
                cursor,
                EventType::ParallelStateFailed,
                Some(error.as_error_object()),
            );
            Err(error)
        }
        None => {
            shared
                .recorder
                .append(cursor, EventType::ParallelStateSucceeded, None);
            Ok(Value::Array(outputs))
        }
    }
}

// ── Map ──────────────────────────────────────────────────────────────

pub(crate) async fn exec_map(
    shared: &RunShared,
    state_name: &str,
    map: &MapState,
    dialect: QueryLanguage,
    input: &Value,
    scope: &EvalScope<'_>,
    cursor: &mut BranchCursor,
) -> StateResult<Value> {
    let processor = map
        .item_processor
        .as_ref()
        .ok_or_else(|| StateError::runtime("Map state has no ItemProcessor"))?;
    let mode = map.mode();

    let items = source_items(shared, map, mode, input, scope).await?;
    let mut iterations: Vec<(Value, Value)> = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        iterations.push(select_item(map, dialect, input, scope, index, item)?);
    }
    if mode == ProcessorMode::Distributed {
        if let Some(batcher) = &map.item_batcher {
            iterations = batch_items(iterations, batcher, input, scope)?;
        }
    }
    let total = iterations.len();

    let max_concurrency = eval::resolve_u64_setting(
        "MaxConcurrency",
        map.max_concurrency.as_ref(),
        map.max_concurrency_path.as_ref(),
        input,
        scope,
    )?;
    let tolerated_count = eval::resolve_u64_setting(
        "ToleratedFailureCount",
        map.tolerated_failure_count.as_ref(),
        map.tolerated_failure_count_path.as_ref(),
        input,
        scope,
    )?;
    let tolerated_percentage = eval::resolve_percentage_setting(
        "ToleratedFailurePercentage",
        map.tolerated_failure_percentage.as_ref(),
        map.tolerated_failure_percentage_path.as_ref(),
        input,
        scope,
    )?;

    shared.recorder.append(
        cursor,
        EventType::MapStateStarted,
        Some(json!({"name": state_name, "itemCount": total})),
    );

    // Distributed iterations record into the Map Run's own id space.
    let (run, resumed) = match mode {
        ProcessorMode::Distributed => {
            let key = MapRunKey::new(shared.execution_id.clone(), state_name);
            let (run, resumed) = shared.map_runs.obtain(key, map.label.clone());
            shared.recorder.append(
                cursor,
                EventType::MapRunStarted,
                Some(json!({
                    "mapRunArn": run.arn(),
                    "resumed": resumed,
                    "itemCount": total,
                })),
            );
            tracing::info!(arn = %run.arn(), resumed, items = total, "map run started");
            (Some(run), resumed)
        }
        ProcessorMode::Inline => (None, false),
    };
    let shared_iter = match &run {
        Some(run) => RunShared {
            recorder: Arc::clone(&run.recorder),
            ..shared.clone()
        },
        None => shared.clone(),
    };

    let machine = Arc::new(processor.machine.clone());
    let limit = match max_concurrency {
        Some(n) if n > 0 => n as usize,
        _ => usize::MAX,
    };

    let mut in_flight = FuturesUnordered::new();
    let mut next = 0usize;
    let mut outputs: Vec<Option<Value>> = (0..total).map(|_| None).collect();
    let mut errors: Vec<Option<StateError>> = (0..total).map(|_| None).collect();
    let mut failed = 0u64;
    let mut stop = false;

    loop {
        while !stop && in_flight.len() < limit && next < total {
            let (item_input, extra) = iterations[next].clone();
            let index = next;
            let shared_task = shared_iter.clone();
            let machine = Arc::clone(&machine);
            let iter_cursor = match &run {
                Some(_) => BranchCursor::root(),
                None => cursor.fork(),
            };
            in_flight.push(tokio::spawn(async move {
                let mut cursor = iter_cursor;
                shared_task.recorder.append(
                    &mut cursor,
                    EventType::MapIterationStarted,
                    Some(json!({"index": index})),
                );
                let result = run_machine(
                    &shared_task,
                    machine.as_ref(),
                    dialect,
                    item_input,
                    &mut cursor,
                    Some(&extra),
                )
                .await;
                match &result {
                    Ok(output) => {
                        shared_task.recorder.append(
                            &mut cursor,
                            EventType::MapIterationSucceeded,
                            Some(json!({"index": index, "output": output})),
                        );
                    }
                    Err(error) => {
                        shared_task.recorder.append(
                            &mut cursor,
                            EventType::MapIterationFailed,
                            Some(json!({"index": index, "error": error.as_error_object()})),
                        );
                    }
                }
                (index, result)
            }));
            next += 1;
        }

        let Some(joined) = in_flight.next().await else {
            break;
        };
        let (index, result) = joined.map_err(|e| StateError::runtime(e.to_string()))?;
        match result {
            Ok(output) => outputs[index] = Some(output),
            Err(error) => {
                failed += 1;
                errors[index] = Some(error);
            }
        }
        // Once the tolerance is breached, admit nothing further and let
        // in-flight iterations drain.
        if !stop && tolerance_breached(failed, total as u64, tolerated_count, tolerated_percentage)
        {
            stop = true;
        }
    }

    let breached = tolerance_breached(failed, total as u64, tolerated_count, tolerated_percentage);
    let results = IterationResults {
        succeeded: outputs.iter().flatten().cloned().collect(),
        failed: errors
            .iter()
            .flatten()
            .map(StateError::as_error_object)
            .collect(),
    };

    match &run {
        Some(run) => {
            let key = run.key.clone();
            let report = MapRunReport {
                id: run.id.clone(),
                arn: run.arn(),
                resumed,
                events: run.recorder.snapshot(),
            };
            shared
                .map_run_reports
                .lock()
                .expect("report lock poisoned")
                .push(report);

            let written = match &map.result_writer {
                Some(writer) => {
                    let write = result_writer::write_results(
                        shared.store.as_ref(),
                        writer,
                        run,
                        input,
                        scope,
                        &results,
                    )
                    .await;
                    match write {
                        Ok(output) => Some(output),
                        Err(error) => {
                            shared.recorder.append(
                                cursor,
                                EventType::MapRunFailed,
                                Some(error.as_error_object()),
                            );
                            shared.recorder.append(
                                cursor,
                                EventType::MapStateFailed,
                                Some(error.as_error_object()),
                            );
                            tracing::warn!(arn = %run.arn(), error = %error.error, "result write failed");
                            // The run stays registered so a re-entry resumes it.
                            return Err(error);
                        }
                    }
                }
                None => None,
            };

            if breached {
                let error = StateError::new(
                    error_name::EXCEED_TOLERATED_FAILURE_THRESHOLD,
                    format!("{} of {} iterations failed", failed, total),
                );
                shared.recorder.append(
                    cursor,
                    EventType::MapRunFailed,
                    Some(error.as_error_object()),
                );
                shared.recorder.append(
                    cursor,
                    EventType::MapStateFailed,
                    Some(error.as_error_object()),
                );
                tracing::warn!(arn = %run.arn(), failed, total, "map run failed");
                // The run stays registered so a re-entry resumes it.
                return Err(error);
            }

            shared.recorder.append(cursor, EventType::MapRunSucceeded, None);
            shared.recorder.append(cursor, EventType::MapStateSucceeded, None);
            shared.map_runs.complete(&key);
            Ok(written.unwrap_or_else(|| Value::Array(results.succeeded)))
        }
        None => {
            if breached {
                let tolerance_declared =
                    tolerated_count.is_some() || tolerated_percentage.is_some();
                let error = if tolerance_declared {
                    StateError::new(
                        error_name::EXCEED_TOLERATED_FAILURE_THRESHOLD,
                        format!("{} of {} iterations failed", failed, total),
                    )
                } else {
                    // Without a declared tolerance the first failing
                    // iteration, in item order, is the state's error.
                    errors
                        .iter()
                        .flatten()
                        .next()
                        .cloned()
                        .unwrap_or_else(|| StateError::runtime("iteration failed"))
                };
                shared.recorder.append(
                    cursor,
                    EventType::MapStateFailed,
                    Some(error.as_error_object()),
                );
                return Err(error);
            }
            shared.recorder.append(cursor, EventType::MapStateSucceeded, None);
            Ok(Value::Array(results.succeeded))
        }
    }
}

/// A breach needs at least one failure; with no tolerance declared any
/// failure breaches.
fn tolerance_breached(failed: u64, total: u64, count: Option<u64>, percentage: Option<f64>) -> bool {
    if failed == 0 {
        return false;
    }
    match (count, percentage) {
        (None, None) => true,
        _ => {
            count.is_some_and(|c| failed > c)
                || percentage.is_some_and(|p| {
                    total > 0 && (failed as f64) * 100.0 / (total as f64) > p
                })
        }
    }
}

async fn source_items(
    shared: &RunShared,
    map: &MapState,
    mode: ProcessorMode,
    input: &Value,
    scope: &EvalScope<'_>,
) -> StateResult<Vec<Value>> {
    if mode == ProcessorMode::Distributed {
        if let Some(reader) = &map.item_reader {
            // ItemsPath narrows the reader's document, not the state input.
            return item_reader::read_items(
                shared.store.as_ref(),
                reader,
                map.items_path.as_deref(),
                input,
                scope,
            )
            .await;
        }
    }
    if let Some(items) = &map.items {
        let states = json!({"input": input, "context": scope.context});
        let resolved = match items {
            Value::String(text) if parser::is_expression(text) => {
                eval::eval_expression_str(text, input, &states, scope)?
            }
            other => eval::eval_embedded(other, input, &states, scope)?,
        };
        return match resolved {
            Value::Array(items) => Ok(items),
            _ => Err(StateError::query_evaluation(
                "Items must evaluate to an array",
            )),
        };
    }
    if let Some(text) = &map.items_path {
        let path = Path::parse(text).map_err(|e| StateError::runtime(e.to_string()))?;
        let value = eval::resolve_path(&path, input, scope).ok_or_else(|| {
            StateError::runtime(format!("ItemsPath '{}' selected nothing", text))
        })?;
        return match value {
            Value::Array(items) => Ok(items),
            _ => Err(StateError::runtime(format!(
                "ItemsPath '{}' did not select an array",
                text
            ))),
        };
    }
    match input {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(StateError::runtime("Map state input is not an array")),
    }
}

/// The per-iteration processor input and the `Map.Item` context carried
/// into its states.
fn select_item(
    map: &MapState,
    dialect: QueryLanguage,
    input: &Value,
    scope: &EvalScope<'_>,
    index: usize,
    item: &Value,
) -> StateResult<(Value, Value)> {
    let extra = json!({"Map": {"Item": {"Index": index, "Value": item}}});
    let selected = match &map.item_selector {
        Some(selector) => {
            let mut item_context = scope.context.clone();
            if let Value::Object(object) = &mut item_context {
                object.insert("Map".to_string(), extra["Map"].clone());
            }
            let item_scope = EvalScope {
                dialect,
                context: &item_context,
                variables: scope.variables,
            };
            match dialect {
                QueryLanguage::JsonPath => eval::eval_template(selector, input, &item_scope)?,
                QueryLanguage::Jsonata => {
                    let states = json!({"input": input, "context": item_context.clone()});
                    eval::eval_embedded(selector, input, &states, &item_scope)?
                }
            }
        }
        None => item.clone(),
    };
    Ok((selected, extra))
}

/// Group selected items into batch objects, re-deriving the iteration
/// contexts for the batch indexes.
fn batch_items(
    iterations: Vec<(Value, Value)>,
    batcher: &ItemBatcherConfig,
    input: &Value,
    scope: &EvalScope<'_>,
) -> StateResult<Vec<(Value, Value)>> {
    let max_per_batch = eval::resolve_u64_setting(
        "MaxItemsPerBatch",
        batcher.max_items_per_batch.as_ref(),
        None,
        input,
        scope,
    )?
    .unwrap_or(u64::MAX)
    .max(1);
    let max_bytes = eval::resolve_u64_setting(
        "MaxInputBytesPerBatch",
        batcher.max_input_bytes_per_batch.as_ref(),
        None,
        input,
        scope,
    )?;
    let batch_input = match &batcher.batch_input {
        Some(template) => Some(match scope.dialect {
            QueryLanguage::JsonPath => eval::eval_template(template, input, scope)?,
            QueryLanguage::Jsonata => {
                let states = json!({"input": input, "context": scope.context});
                eval::eval_embedded(template, input, &states, scope)?
            }
        }),
        None => None,
    };

    let mut groups: Vec<Vec<Value>> = Vec::new();
    let mut current: Vec<Value> = Vec::new();
    let mut current_bytes = 0u64;
    for (item, _) in iterations {
        let size = serde_json::to_vec(&item)
            .map(|b| b.len() as u64)
            .unwrap_or(0);
        let full = !current.is_empty()
            && (current.len() as u64 >= max_per_batch
                || max_bytes.is_some_and(|limit| current_bytes + size > limit));
        if full {
            groups.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(item);
    }
    if !current.is_empty() {
        groups.push(current);
    }

    Ok(groups
        .into_iter()
        .enumerate()
        .map(|(index, items)| {
            let mut batch = Map::new();
            if let Some(extra) = &batch_input {
                batch.insert("BatchInput".to_string(), extra.clone());
            }
            batch.insert("Items".to_string(), Value::Array(items));
            let batch = Value::Object(batch);
            let extra = json!({"Map": {"Item": {"Index": index, "Value": batch}}});
            (batch, extra)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::store::{FnInvoker, InMemoryStore, ObjectStore, StoreError, TaskInvoker};
    use async_trait::async_trait;
    use stateline_types::{ExecutionId, ExecutionStatus, ResultWriterManifest, StateMachine};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn machine(def: Value) -> StateMachine {
        stateline_dsl::parse_definition(&def.to_string()).unwrap()
    }

    struct SlowFirstInvoker;

    #[async_trait]
    impl TaskInvoker for SlowFirstInvoker {
        async fn invoke(&self, resource: &str, _input: Value) -> StateResult<Value> {
            if resource.ends_with("slow") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(json!(resource.rsplit(':').next().unwrap()))
        }
    }

    #[tokio::test]
    async fn test_parallel_outputs_keep_declaration_order() {
        let machine = machine(json!({
            "StartAt": "Fan",
            "States": {
                "Fan": {
                    "Type": "Parallel",
                    "Branches": [
                        {"StartAt": "A", "States": {"A": {"Type": "Task", "Resource": "arn:test:slow", "End": true}}},
                        {"StartAt": "B", "States": {"B": {"Type": "Task", "Resource": "arn:test:fast", "End": true}}}
                    ],
                    "End": true
                }
            }
        }));
        let interpreter =
            Interpreter::new(Arc::new(InMemoryStore::new()), Arc::new(SlowFirstInvoker));
        let report = interpreter.execute(&machine, json!({})).await;
        // The slow branch finishes last but stays first in the output.
        assert_eq!(report.outcome.output, Some(json!(["slow", "fast"])));
    }

    #[tokio::test]
    async fn test_parallel_branch_failure_propagates() {
        let invoker = FnInvoker::new(|resource: &str, _| {
            if resource.ends_with("bad") {
                Err(StateError::task_failed("branch exploded"))
            } else {
                Ok(json!("ok"))
            }
        });
        let machine = machine(json!({
            "StartAt": "Fan",
            "States": {
                "Fan": {
                    "Type": "Parallel",
                    "Branches": [
                        {"StartAt": "A", "States": {"A": {"Type": "Task", "Resource": "arn:test:good", "End": true}}},
                        {"StartAt": "B", "States": {"B": {"Type": "Task", "Resource": "arn:test:bad", "End": true}}}
                    ],
                    "End": true
                }
            }
        }));
        let interpreter = Interpreter::new(Arc::new(InMemoryStore::new()), Arc::new(invoker));
        let report = interpreter.execute(&machine, json!({})).await;
        assert_eq!(report.outcome.status, ExecutionStatus::Failed);
        assert_eq!(
            report.outcome.error.unwrap().error,
            error_name::TASK_FAILED
        );
        assert!(
            report
                .events
                .iter()
                .any(|e| e.event_type == EventType::ParallelStateFailed)
        );
    }

    #[tokio::test]
    async fn test_inline_map_preserves_item_order() {
        let invoker =
            FnInvoker::new(|_, input| Ok(json!(input["n"].as_i64().unwrap() * input["n"].as_i64().unwrap())));
        let machine = machine(json!({
            "StartAt": "Squares",
            "States": {
                "Squares": {
                    "Type": "Map",
                    "MaxConcurrency": 2,
                    "ItemSelector": {"n.$": "$$.Map.Item.Value"},
                    "ItemProcessor": {
                        "StartAt": "Square",
                        "States": {
                            "Square": {"Type": "Task", "Resource": "arn:test:square", "End": true}
                        }
                    },
                    "End": true
                }
            }
        }));
        let interpreter = Interpreter::new(Arc::new(InMemoryStore::new()), Arc::new(invoker));
        let report = interpreter.execute(&machine, json!([1, 2, 3, 4])).await;
        assert_eq!(report.outcome.output, Some(json!([1, 4, 9, 16])));
        assert!(
            report
                .events
                .iter()
                .any(|e| e.event_type == EventType::MapStateSucceeded)
        );
    }

    #[tokio::test]
    async fn test_inline_map_without_tolerance_fails_on_first_error() {
        let invoker = FnInvoker::new(|_, input| {
            if input == json!(2) {
                Err(StateError::task_failed("item 2 is cursed"))
            } else {
                Ok(input)
            }
        });
        let machine = machine(json!({
            "StartAt": "Work",
            "States": {
                "Work": {
                    "Type": "Map",
                    "ItemProcessor": {
                        "StartAt": "Step",
                        "States": {"Step": {"Type": "Task", "Resource": "arn:test:step", "End": true}}
                    },
                    "End": true
                }
            }
        }));
        let interpreter = Interpreter::new(Arc::new(InMemoryStore::new()), Arc::new(invoker));
        let report = interpreter.execute(&machine, json!([1, 2, 3])).await;
        let error = report.outcome.error.unwrap();
        assert_eq!(error.error, error_name::TASK_FAILED);
        assert_eq!(error.cause.as_deref(), Some("item 2 is cursed"));
    }

    #[tokio::test]
    async fn test_tolerated_failure_count_boundary() {
        let build = || {
            machine(json!({
                "StartAt": "Work",
                "States": {
                    "Work": {
                        "Type": "Map",
                        "ToleratedFailureCount": 1,
                        "ItemProcessor": {
                            "StartAt": "Step",
                            "States": {"Step": {"Type": "Task", "Resource": "arn:test:step", "End": true}}
                        },
                        "End": true
                    }
                }
            }))
        };
        let invoker = || {
            FnInvoker::new(|_, input| {
                if input.as_i64().unwrap() < 0 {
                    Err(StateError::task_failed("negative"))
                } else {
                    Ok(input)
                }
            })
        };

        // One failure is within tolerance; the state succeeds with the
        // surviving outputs.
        let interpreter = Interpreter::new(Arc::new(InMemoryStore::new()), Arc::new(invoker()));
        let report = interpreter.execute(&build(), json!([1, -1, 3])).await;
        assert_eq!(report.outcome.output, Some(json!([1, 3])));

        // Two failures exceed it.
        let interpreter = Interpreter::new(Arc::new(InMemoryStore::new()), Arc::new(invoker()));
        let report = interpreter.execute(&build(), json!([1, -1, -2])).await;
        assert_eq!(
            report.outcome.error.unwrap().error,
            error_name::EXCEED_TOLERATED_FAILURE_THRESHOLD
        );
    }

    fn distributed_definition() -> StateMachine {
        machine(json!({
            "StartAt": "Big",
            "States": {
                "Big": {
                    "Type": "Map",
                    "ItemProcessor": {
                        "ProcessorConfig": {"Mode": "DISTRIBUTED"},
                        "StartAt": "Step",
                        "States": {"Step": {"Type": "Task", "Resource": "arn:test:step", "End": true}}
                    },
                    "ItemReader": {
                        "Parameters": {"Bucket": "data", "Key": "items.json"}
                    },
                    "ResultWriter": {
                        "Parameters": {"Bucket": "results"}
                    },
                    "End": true
                }
            }
        }))
    }

    #[tokio::test]
    async fn test_distributed_map_reads_writes_and_reports() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("data", "items.json", "[1, 2, 3]");
        let invoker = FnInvoker::new(|_, input| Ok(json!(input.as_i64().unwrap() + 10)));
        let interpreter = Interpreter::new(Arc::clone(&store) as Arc<dyn ObjectStore>, Arc::new(invoker));
        let report = interpreter
            .execute(&distributed_definition(), json!({}))
            .await;

        assert_eq!(report.outcome.status, ExecutionStatus::Succeeded);
        let output = report.outcome.output.unwrap();
        assert!(output["MapRunArn"].is_string());
        let manifest_key = output["ResultWriterDetails"]["Key"].as_str().unwrap();
        let manifest: ResultWriterManifest =
            serde_json::from_slice(&store.object("results", manifest_key).unwrap()).unwrap();
        assert_eq!(manifest.result_files.succeeded.len(), 1);
        assert!(manifest.result_files.failed.is_empty());

        // The Map Run history lives in its own id space, disjoint from
        // the parent execution's.
        assert_eq!(report.map_runs.len(), 1);
        let run = &report.map_runs[0];
        assert!(!run.resumed);
        assert!(run.events.iter().any(|e| e.id == 1));
        assert!(
            run.events
                .iter()
                .filter(|e| e.event_type == EventType::MapIterationSucceeded)
                .count()
                == 3
        );
        // Completed successfully, so the registry no longer holds it.
        assert!(interpreter.registry().is_empty());
    }

    #[tokio::test]
    async fn test_distributed_map_items_path_narrows_reader_document() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("data", "items.json", r#"{"meta": "nightly", "items": [1, 2, 3]}"#);
        let invoker = FnInvoker::new(|_, input| Ok(json!(input.as_i64().unwrap() + 10)));
        let machine = machine(json!({
            "StartAt": "Big",
            "States": {
                "Big": {
                    "Type": "Map",
                    "ItemsPath": "$.items",
                    "ItemProcessor": {
                        "ProcessorConfig": {"Mode": "DISTRIBUTED"},
                        "StartAt": "Step",
                        "States": {"Step": {"Type": "Task", "Resource": "arn:test:step", "End": true}}
                    },
                    "ItemReader": {
                        "Parameters": {"Bucket": "data", "Key": "items.json"}
                    },
                    "End": true
                }
            }
        }));
        let interpreter = Interpreter::new(Arc::clone(&store) as Arc<dyn ObjectStore>, Arc::new(invoker));
        let report = interpreter.execute(&machine, json!({})).await;
        assert_eq!(report.outcome.status, ExecutionStatus::Succeeded);
        assert_eq!(report.outcome.output, Some(json!([11, 12, 13])));
    }

    /// Accepts reads, rejects every write.
    struct ReadOnlyStore(InMemoryStore);

    #[async_trait]
    impl ObjectStore for ReadOnlyStore {
        async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
            self.0.get(bucket, key).await
        }

        async fn put(&self, _: &str, _: &str, _: Vec<u8>) -> Result<(), StoreError> {
            Err(StoreError::Backend("bucket is read-only".into()))
        }
    }

    #[tokio::test]
    async fn test_result_writer_failure_closes_map_run_history() {
        let inner = InMemoryStore::new();
        inner.seed("data", "items.json", "[1, 2, 3]");
        let store = Arc::new(ReadOnlyStore(inner));
        let invoker = FnInvoker::new(|_, input| Ok(input));
        let interpreter = Interpreter::new(store, Arc::new(invoker));
        let report = interpreter
            .execute(&distributed_definition(), json!({}))
            .await;

        assert_eq!(report.outcome.status, ExecutionStatus::Failed);
        assert_eq!(
            report.outcome.error.unwrap().error,
            error_name::RESULT_WRITER_FAILED
        );
        // The run's history still reaches a terminal marker and its
        // report is still surfaced.
        assert!(
            report
                .events
                .iter()
                .any(|e| e.event_type == EventType::MapRunFailed)
        );
        assert!(
            report
                .events
                .iter()
                .any(|e| e.event_type == EventType::MapStateFailed)
        );
        assert_eq!(report.map_runs.len(), 1);
        // Not completed, so a re-entry can retry the write.
        assert_eq!(interpreter.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_distributed_map_run_is_reentrant_across_invocations() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("data", "items.json", "[1, 2, 3]");
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        // Fails every item on the first invocation, succeeds afterwards.
        let invoker = FnInvoker::new(move |_, input| {
            if seen.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(StateError::task_failed("warming up"))
            } else {
                Ok(input)
            }
        });
        let interpreter = Interpreter::new(Arc::clone(&store) as Arc<dyn ObjectStore>, Arc::new(invoker));
        let execution_id = ExecutionId::new("exec-retry");

        let first = interpreter
            .execute_as(&distributed_definition(), json!({}), execution_id.clone())
            .await;
        assert_eq!(first.outcome.status, ExecutionStatus::Failed);
        assert_eq!(
            first.outcome.error.unwrap().error,
            error_name::EXCEED_TOLERATED_FAILURE_THRESHOLD
        );
        assert_eq!(interpreter.registry().len(), 1);

        let second = interpreter
            .execute_as(&distributed_definition(), json!({}), execution_id)
            .await;
        assert_eq!(second.outcome.status, ExecutionStatus::Succeeded);
        // Same logical Map state, same execution: the run resumed under
        // its original identity instead of minting a new one.
        assert!(second.map_runs[0].resumed);
        assert_eq!(second.map_runs[0].id, first.map_runs[0].id);
        assert!(interpreter.registry().is_empty());
    }

    #[tokio::test]
    async fn test_item_batcher_groups_items() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("data", "items.json", "[1, 2, 3, 4, 5]");
        let invoker = FnInvoker::new(|_, input| Ok(input));
        let machine = machine(json!({
            "StartAt": "Batched",
            "States": {
                "Batched": {
                    "Type": "Map",
                    "ItemProcessor": {
                        "ProcessorConfig": {"Mode": "DISTRIBUTED"},
                        "StartAt": "Step",
                        "States": {"Step": {"Type": "Task", "Resource": "arn:test:step", "End": true}}
                    },
                    "ItemReader": {
                        "Parameters": {"Bucket": "data", "Key": "items.json"}
                    },
                    "ItemBatcher": {
                        "MaxItemsPerBatch": 2,
                        "BatchInput": {"source": "nightly"}
                    },
                    "End": true
                }
            }
        }));
        let interpreter = Interpreter::new(Arc::clone(&store) as Arc<dyn ObjectStore>, Arc::new(invoker));
        let report = interpreter.execute(&machine, json!({})).await;
        assert_eq!(
            report.outcome.output,
            Some(json!([
                {"BatchInput": {"source": "nightly"}, "Items": [1, 2]},
                {"BatchInput": {"source": "nightly"}, "Items": [3, 4]},
                {"BatchInput": {"source": "nightly"}, "Items": [5]}
            ]))
        );
    }

    #[tokio::test]
    async fn test_items_path_and_context_selector() {
        let invoker = FnInvoker::new(|_, input| Ok(input));
        let machine = machine(json!({
            "StartAt": "Tagged",
            "States": {
                "Tagged": {
                    "Type": "Map",
                    "ItemsPath": "$.records",
                    "ItemSelector": {
                        "position.$": "$$.Map.Item.Index",
                        "record.$": "$$.Map.Item.Value",
                        "batch.$": "$.batchName"
                    },
                    "ItemProcessor": {
                        "StartAt": "Step",
                        "States": {"Step": {"Type": "Task", "Resource": "arn:test:step", "End": true}}
                    },
                    "End": true
                }
            }
        }));
        let interpreter = Interpreter::new(Arc::new(InMemoryStore::new()), Arc::new(invoker));
        let report = interpreter
            .execute(&machine, json!({"batchName": "b-7", "records": ["x", "y"]}))
            .await;
        assert_eq!(
            report.outcome.output,
            Some(json!([
                {"position": 0, "record": "x", "batch": "b-7"},
                {"position": 1, "record": "y", "batch": "b-7"}
            ]))
        );
    }

    #[test]
    fn test_tolerance_breach_rules() {
        // No tolerance declared: any failure breaches.
        assert!(tolerance_breached(1, 10, None, None));
        assert!(!tolerance_breached(0, 10, None, None));
        // Count: breach only beyond the declared count.
        assert!(!tolerance_breached(2, 10, Some(2), None));
        assert!(tolerance_breached(3, 10, Some(2), None));
        // Percentage: strict comparison against failed/total.
        assert!(!tolerance_breached(5, 10, None, Some(50.0)));
        assert!(tolerance_breached(6, 10, None, Some(50.0)));
        // Either limit may trip it.
        assert!(tolerance_breached(3, 100, Some(2), Some(50.0)));
    }
}
