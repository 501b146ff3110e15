//! Map Run result persistence
//!
//! When a Distributed Map declares a ResultWriter, iteration outputs are
//! chunked into result files under `mapJobs/<map-run-uuid>/` in the
//! destination bucket, and a manifest describing them is written as
//! `manifest.json` alongside. The Map state's own output then references
//! the manifest instead of inlining the results.

use crate::eval::{self, EvalScope};
use crate::map_run::MapRun;
use crate::store::ObjectStore;
use serde_json::{Value, json};
use stateline_types::{
    QueryLanguage, ResultFileRef, ResultFiles, ResultWriterConfig, ResultWriterManifest,
    StateError, StateResult,
};

/// Iteration outcomes collected by a Map Run, in item order.
#[derive(Clone, Debug, Default)]
pub struct IterationResults {
    pub succeeded: Vec<Value>,
    /// Error objects (`{"Error", "Cause"}`) of failed iterations.
    pub failed: Vec<Value>,
}

/// Persist result files and the manifest; returns the Map state output
/// referencing them.
pub async fn write_results(
    store: &dyn ObjectStore,
    config: &ResultWriterConfig,
    map_run: &MapRun,
    state_input: &Value,
    scope: &EvalScope<'_>,
    results: &IterationResults,
) -> StateResult<Value> {
    let destination = resolve_destination(config, state_input, scope)?;
    let bucket = destination
        .get("Bucket")
        .and_then(Value::as_str)
        .ok_or_else(|| StateError::result_writer_failed("ResultWriter is missing 'Bucket'"))?
        .to_string();
    let prefix = destination
        .get("Prefix")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let base = format!("{}mapJobs/{}/", prefix, map_run.id);

    let mut files = ResultFiles::default();
    if !results.succeeded.is_empty() {
        files.succeeded.push(
            put_result_file(store, &bucket, &base, "SUCCEEDED_0.json", &results.succeeded).await?,
        );
    }
    if !results.failed.is_empty() {
        files
            .failed
            .push(put_result_file(store, &bucket, &base, "FAILED_0.json", &results.failed).await?);
    }

    let manifest = ResultWriterManifest {
        destination_bucket: bucket.clone(),
        map_run_arn: map_run.arn(),
        result_files: files,
    };
    let manifest_key = format!("{}manifest.json", base);
    let body = serde_json::to_vec(&manifest)
        .map_err(|e| StateError::result_writer_failed(e.to_string()))?;
    store
        .put(&bucket, &manifest_key, body)
        .await
        .map_err(|e| StateError::result_writer_failed(e.to_string()))?;

    Ok(json!({
        "MapRunArn": map_run.arn(),
        "ResultWriterDetails": {"Bucket": bucket, "Key": manifest_key},
    }))
}

async fn put_result_file(
    store: &dyn ObjectStore,
    bucket: &str,
    base: &str,
    name: &str,
    entries: &[Value],
) -> StateResult<ResultFileRef> {
    let key = format!("{}{}", base, name);
    let body = serde_json::to_vec(entries)
        .map_err(|e| StateError::result_writer_failed(e.to_string()))?;
    let size = body.len() as u64;
    store
        .put(bucket, &key, body)
        .await
        .map_err(|e| StateError::result_writer_failed(e.to_string()))?;
    Ok(ResultFileRef { key, size })
}

fn resolve_destination(
    config: &ResultWriterConfig,
    state_input: &Value,
    scope: &EvalScope<'_>,
) -> StateResult<Value> {
    match scope.dialect {
        QueryLanguage::JsonPath => match &config.parameters {
            Some(template) => eval::eval_template(template, state_input, scope),
            None => Err(StateError::result_writer_failed(
                "ResultWriter declares no destination Parameters",
            )),
        },
        QueryLanguage::Jsonata => match &config.arguments {
            Some(arguments) => {
                let states = json!({"input": state_input, "context": scope.context});
                eval::eval_embedded(arguments, state_input, &states, scope)
            }
            None => Err(StateError::result_writer_failed(
                "ResultWriter declares no destination Arguments",
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_run::MapRunRegistry;
    use crate::store::InMemoryStore;
    use stateline_types::{ExecutionId, MapRunKey};

    fn scope<'a>(context: &'a Value, vars: &'a serde_json::Map<String, Value>) -> EvalScope<'a> {
        EvalScope {
            dialect: QueryLanguage::JsonPath,
            context,
            variables: vars,
        }
    }

    #[tokio::test]
    async fn test_manifest_and_result_files() {
        let store = InMemoryStore::new();
        let registry = MapRunRegistry::new();
        let (run, _) = registry.obtain(
            MapRunKey::new(ExecutionId::new("exec-1"), "MapState"),
            None,
        );
        let config: ResultWriterConfig =
            serde_json::from_value(json!({"Parameters": {"Bucket": "results"}})).unwrap();
        let results = IterationResults {
            succeeded: vec![json!({"ok": 1}), json!({"ok": 2})],
            failed: vec![json!({"Error": "States.TaskFailed", "Cause": "boom"})],
        };

        let ctx = json!({});
        let vars = serde_json::Map::new();
        let output = write_results(&store, &config, &run, &json!({}), &scope(&ctx, &vars), &results)
            .await
            .unwrap();

        let manifest_key = format!("mapJobs/{}/manifest.json", run.id);
        assert_eq!(output["ResultWriterDetails"]["Key"], json!(manifest_key));
        assert_eq!(output["MapRunArn"], json!(run.arn()));

        let manifest: ResultWriterManifest =
            serde_json::from_slice(&store.object("results", &manifest_key).unwrap()).unwrap();
        assert_eq!(manifest.destination_bucket, "results");
        assert_eq!(manifest.map_run_arn, run.arn());
        assert_eq!(manifest.result_files.succeeded.len(), 1);
        assert_eq!(manifest.result_files.failed.len(), 1);
        assert!(manifest.result_files.pending.is_empty());

        let succeeded_ref = &manifest.result_files.succeeded[0];
        let body = store.object("results", &succeeded_ref.key).unwrap();
        assert_eq!(succeeded_ref.size, body.len() as u64);
        let entries: Vec<Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(entries, results.succeeded);
    }

    #[tokio::test]
    async fn test_empty_results_write_manifest_only() {
        let store = InMemoryStore::new();
        let registry = MapRunRegistry::new();
        let (run, _) = registry.obtain(
            MapRunKey::new(ExecutionId::new("exec-1"), "MapState"),
            None,
        );
        let config: ResultWriterConfig =
            serde_json::from_value(json!({"Parameters": {"Bucket": "results", "Prefix": "out/"}}))
                .unwrap();

        let ctx = json!({});
        let vars = serde_json::Map::new();
        write_results(
            &store,
            &config,
            &run,
            &json!({}),
            &scope(&ctx, &vars),
            &IterationResults::default(),
        )
        .await
        .unwrap();

        let keys = store.keys("results");
        assert_eq!(keys, vec![format!("out/mapJobs/{}/manifest.json", run.id)]);
    }
}
