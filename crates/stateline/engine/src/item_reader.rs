//! Distributed Map item sourcing
//!
//! Reads the item dataset from the object store and decodes it into the
//! item array a Map Run iterates over. CSV rows become objects keyed by
//! header; JSON sources decode as whole documents, optionally narrowed
//! by the Map state's `ItemsPath` before the array requirement applies.
//! `MaxItems` is validated and clamped before any decoding happens.

use crate::eval::{self, EvalScope};
use crate::store::{ObjectStore, StoreError};
use serde_json::{Map, Value, json};
use stateline_dsl::paths::Path;
use stateline_types::{
    CsvHeaderLocation, InputType, ItemReaderConfig, QueryLanguage, StateError, StateResult,
};

/// Upper bound on items read per Map Run; larger requests are clamped,
/// not rejected.
pub const MAX_ITEMS_CEILING: u64 = 100_000_000;

/// Clamp a resolved MaxItems to the engine ceiling. `0` disables the
/// limit, like an absent field.
pub fn clamp_max_items(resolved: Option<u64>) -> Option<u64> {
    match resolved {
        None | Some(0) => None,
        Some(n) => Some(n.min(MAX_ITEMS_CEILING)),
    }
}

/// Read and decode the item dataset for one Map Run. `items_path`
/// narrows the decoded document before the items must form an array.
pub async fn read_items(
    store: &dyn ObjectStore,
    config: &ItemReaderConfig,
    items_path: Option<&str>,
    state_input: &Value,
    scope: &EvalScope<'_>,
) -> StateResult<Vec<Value>> {
    let source = resolve_source(config, state_input, scope)?;
    let bucket = require_str(&source, "Bucket")?;
    let key = require_str(&source, "Key")?;

    let reader_config = config.reader_config.clone().unwrap_or_default();
    let max_items = clamp_max_items(eval::resolve_u64_setting(
        "MaxItems",
        reader_config.max_items.as_ref(),
        reader_config.max_items_path.as_ref(),
        state_input,
        scope,
    )?);

    let bytes = store.get(&bucket, &key).await.map_err(|e| match e {
        StoreError::NotFound { .. } => {
            StateError::item_reader_failed(format!("source object {}/{} does not exist", bucket, key))
        }
        StoreError::Backend(message) => StateError::item_reader_failed(message),
    })?;
    let text = String::from_utf8(bytes)
        .map_err(|_| StateError::item_reader_failed("source object is not valid UTF-8"))?;

    let document = match reader_config.input_type.unwrap_or(InputType::Json) {
        InputType::Json => decode_json(&text)?,
        InputType::Csv => Value::Array(decode_csv(
            &text,
            reader_config
                .csv_header_location
                .unwrap_or(CsvHeaderLocation::FirstRow),
            reader_config.csv_headers.as_deref(),
        )?),
    };
    let narrowed = match items_path {
        Some(text) => {
            let path =
                Path::parse(text).map_err(|e| StateError::item_reader_failed(e.to_string()))?;
            eval::resolve_path(&path, &document, scope).ok_or_else(|| {
                StateError::item_reader_failed(format!(
                    "ItemsPath '{}' selected nothing in the item source",
                    text
                ))
            })?
        }
        None => document,
    };
    let mut items = match narrowed {
        Value::Array(items) => items,
        _ => {
            return Err(StateError::item_reader_failed(
                "item source did not yield an array",
            ));
        }
    };

    if let Some(limit) = max_items {
        items.truncate(limit as usize);
    }
    Ok(items)
}

fn resolve_source(
    config: &ItemReaderConfig,
    state_input: &Value,
    scope: &EvalScope<'_>,
) -> StateResult<Value> {
    match scope.dialect {
        QueryLanguage::JsonPath => match &config.parameters {
            Some(template) => eval::eval_template(template, state_input, scope),
            None => Err(StateError::item_reader_failed(
                "ItemReader declares no source Parameters",
            )),
        },
        QueryLanguage::Jsonata => match &config.arguments {
            Some(arguments) => {
                let states = json!({"input": state_input, "context": scope.context});
                eval::eval_embedded(arguments, state_input, &states, scope)
            }
            None => Err(StateError::item_reader_failed(
                "ItemReader declares no source Arguments",
            )),
        },
    }
}

fn require_str(source: &Value, field: &str) -> StateResult<String> {
    source
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            StateError::item_reader_failed(format!("ItemReader source is missing '{}'", field))
        })
}

fn decode_json(text: &str) -> StateResult<Value> {
    serde_json::from_str(text)
        .map_err(|e| StateError::item_reader_failed(format!("source is not valid JSON: {}", e)))
}

/// Decode CSV rows into objects.
///
/// Headers come from the first record or the declared list. When the
/// same header appears twice the later column wins. Rows shorter than
/// the header list are padded with empty strings; fields beyond it are
/// dropped.
fn decode_csv(
    text: &str,
    header_location: CsvHeaderLocation,
    declared_headers: Option<&[String]>,
) -> StateResult<Vec<Value>> {
    let mut records = parse_csv(text);
    let headers: Vec<String> = match header_location {
        CsvHeaderLocation::FirstRow => {
            if records.is_empty() {
                return Ok(Vec::new());
            }
            records.remove(0)
        }
        CsvHeaderLocation::Given => declared_headers
            .map(<[String]>::to_vec)
            .ok_or_else(|| {
                StateError::item_reader_failed("CSVHeaderLocation GIVEN requires CSVHeaders")
            })?,
    };

    let items = records
        .into_iter()
        .map(|row| {
            let mut object = Map::with_capacity(headers.len());
            for (i, header) in headers.iter().enumerate() {
                let field = row.get(i).cloned().unwrap_or_default();
                object.insert(header.clone(), Value::String(field));
            }
            Value::Object(object)
        })
        .collect();
    Ok(items)
}

/// Minimal CSV record parser: quoted fields, `""` escapes, CRLF line
/// endings. Blank trailing lines are ignored.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => {
                record.push(std::mem::take(&mut field));
            }
            '\r' if !in_quotes => {}
            '\n' if !in_quotes => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}
