//! Dual-dialect data evaluation
//!
//! Every state's input and output pass through here. The path dialect
//! runs the selection pipeline `InputPath → Parameters` on entry and
//! `ResultSelector → ResultPath → OutputPath` on exit; the expression
//! dialect evaluates `Arguments` on entry and `Output` on exit. Assign
//! bindings are computed after the main output in both dialects.
//!
//! Expression evaluation works on [`EvalValue`], which admits function
//! values as intermediates; only the conversion back to JSON rejects
//! them, so a function may be applied inside an expression but can
//! never become a state's output.

use serde_json::{Map, Number, Value, json};
use stateline_dsl::ast::{BinOp, Expr};
use stateline_dsl::parser;
use stateline_dsl::paths::{Path, PathRoot};
use stateline_types::{QueryLanguage, StateError, StateIo, StateResult, error_name};
use std::collections::HashMap;

/// Everything evaluation needs besides the data document itself.
pub struct EvalScope<'a> {
    pub dialect: QueryLanguage,
    /// The context object addressed by `$$`.
    pub context: &'a Value,
    /// Variable bindings produced by earlier Assign fields.
    pub variables: &'a Map<String, Value>,
}

impl<'a> EvalScope<'a> {
    /// Pick the base document for a path's root.
    fn base<'b>(&'b self, path: &'b Path, data: &'b Value) -> Option<&'b Value> {
        match &path.root {
            PathRoot::Data => Some(data),
            PathRoot::Context => Some(self.context),
            PathRoot::Variable(name) => self.variables.get(name.as_str()),
        }
    }
}

/// Resolve a parsed path against the right base for its root.
pub fn resolve_path(path: &Path, data: &Value, scope: &EvalScope) -> Option<Value> {
    path.query(scope.base(path, data)?)
}

// ── State entry / exit pipelines ─────────────────────────────────────

/// The effective input a state's work sees.
pub fn state_input(io: &StateIo, raw: &Value, scope: &EvalScope) -> StateResult<Value> {
    match scope.dialect {
        QueryLanguage::JsonPath => {
            let mut data = match &io.input_path {
                Some(text) => {
                    let path = parse_runtime_path(text)?;
                    resolve_path(&path, raw, scope).ok_or_else(|| {
                        StateError::runtime(format!("InputPath '{}' selected nothing", text))
                    })?
                }
                None => raw.clone(),
            };
            if let Some(template) = &io.parameters {
                data = eval_template(template, &data, scope)?;
            }
            Ok(data)
        }
        QueryLanguage::Jsonata => match &io.arguments {
            Some(arguments) => {
                let states = json!({"input": raw, "context": scope.context});
                eval_embedded(arguments, raw, &states, scope)
            }
            None => Ok(raw.clone()),
        },
    }
}

/// The effective output of a state, given its raw input and the result
/// its work produced.
pub fn state_output(
    io: &StateIo,
    raw_input: &Value,
    result: &Value,
    scope: &EvalScope,
) -> StateResult<Value> {
    match scope.dialect {
        QueryLanguage::JsonPath => {
            let selected = match &io.result_selector {
                Some(template) => eval_template(template, result, scope)?,
                None => result.clone(),
            };
            let mut merged = match &io.result_path {
                Some(text) => {
                    let path = Path::parse_reference(text)
                        .map_err(|e| StateError::runtime(e.to_string()))?;
                    let mut doc = raw_input.clone();
                    path.inject(&mut doc, selected).map_err(|e| {
                        StateError::new(error_name::RESULT_PATH_MATCH_FAILURE, e.to_string())
                    })?;
                    doc
                }
                None => selected,
            };
            if let Some(text) = &io.output_path {
                let path = parse_runtime_path(text)?;
                merged = resolve_path(&path, &merged, scope).ok_or_else(|| {
                    StateError::runtime(format!("OutputPath '{}' selected nothing", text))
                })?;
            }
            Ok(merged)
        }
        QueryLanguage::Jsonata => match &io.output {
            Some(output) => {
                let states = json!({
                    "input": raw_input,
                    "result": result,
                    "context": scope.context,
                });
                eval_embedded(output, result, &states, scope)
            }
            None => Ok(result.clone()),
        },
    }
}

/// Evaluate Assign bindings, after the state's main output is known.
/// Returns the new bindings in declaration order.
pub fn eval_assign(
    assign: &Map<String, Value>,
    raw_input: &Value,
    result: &Value,
    scope: &EvalScope,
) -> StateResult<Vec<(String, Value)>> {
    let mut bindings = Vec::with_capacity(assign.len());
    match scope.dialect {
        QueryLanguage::JsonPath => {
            for (name, template) in assign {
                let (name, value) = if let Some(stripped) = name.strip_suffix(".$") {
                    let Value::String(binding) = template else {
                        return Err(StateError::runtime(format!(
                            "Assign binding '{}' must be a string",
                            name
                        )));
                    };
                    (stripped, resolve_binding(binding, result, scope)?)
                } else {
                    (name.as_str(), eval_template(template, result, scope)?)
                };
                bindings.push((name.to_string(), value));
            }
        }
        QueryLanguage::Jsonata => {
            let states = json!({
                "input": raw_input,
                "result": result,
                "context": scope.context,
            });
            for (name, value) in assign {
                bindings.push((
                    name.clone(),
                    eval_embedded(value, result, &states, scope)?,
                ));
            }
        }
    }
    Ok(bindings)
}

// ── Path-dialect payload templates ───────────────────────────────────

/// Expand a payload template: keys ending `.$` bind a path query or an
/// intrinsic call against `data`; everything else is copied literally.
pub fn eval_template(template: &Value, data: &Value, scope: &EvalScope) -> StateResult<Value> {
    match template {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                if let Some(stripped) = key.strip_suffix(".$") {
                    let Value::String(binding) = value else {
                        return Err(StateError::new(
                            error_name::PARAMETER_PATH_FAILURE,
                            format!("template key '{}' must bind a string", key),
                        ));
                    };
                    out.insert(stripped.to_string(), resolve_binding(binding, data, scope)?);
                } else {
                    out.insert(key.clone(), eval_template(value, data, scope)?);
                }
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| eval_template(item, data, scope))
                .collect::<StateResult<_>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn resolve_binding(binding: &str, data: &Value, scope: &EvalScope) -> StateResult<Value> {
    if binding.starts_with("States.") {
        return eval_intrinsic(binding, data, scope);
    }
    let path = parse_runtime_path(binding)?;
    resolve_path(&path, data, scope).ok_or_else(|| {
        StateError::new(
            error_name::PARAMETER_PATH_FAILURE,
            format!("the binding '{}' selected nothing", binding),
        )
    })
}

fn parse_runtime_path(text: &str) -> StateResult<Path> {
    Path::parse(text).map_err(|e| StateError::runtime(e.to_string()))
}

// ── Intrinsic functions ──────────────────────────────────────────────

fn eval_intrinsic(call: &str, data: &Value, scope: &EvalScope) -> StateResult<Value> {
    let open = call
        .find('(')
        .ok_or_else(|| StateError::runtime(format!("malformed intrinsic call '{}'", call)))?;
    if !call.ends_with(')') {
        return Err(StateError::runtime(format!(
            "malformed intrinsic call '{}'",
            call
        )));
    }
    let name = &call[..open];
    let args = split_intrinsic_args(&call[open + 1..call.len() - 1])
        .into_iter()
        .map(|arg| eval_intrinsic_arg(&arg, data, scope))
        .collect::<StateResult<Vec<Value>>>()?;

    match name {
        "States.Format" => {
            let Some(Value::String(template)) = args.first() else {
                return Err(StateError::runtime(
                    "States.Format requires a string template",
                ));
            };
            let mut out = String::new();
            let mut rest = template.as_str();
            let mut fill = args[1..].iter();
            while let Some(idx) = rest.find("{}") {
                out.push_str(&rest[..idx]);
                let value = fill.next().ok_or_else(|| {
                    StateError::runtime("States.Format has more placeholders than arguments")
                })?;
                out.push_str(&stringify(value));
                rest = &rest[idx + 2..];
            }
            out.push_str(rest);
            Ok(Value::String(out))
        }
        "States.Array" => Ok(Value::Array(args)),
        "States.StringToJson" => {
            let Some(Value::String(text)) = args.first() else {
                return Err(StateError::runtime("States.StringToJson requires a string"));
            };
            serde_json::from_str(text)
                .map_err(|e| StateError::runtime(format!("States.StringToJson: {}", e)))
        }
        "States.JsonToString" => {
            let value = args
                .first()
                .ok_or_else(|| StateError::runtime("States.JsonToString requires an argument"))?;
            Ok(Value::String(value.to_string()))
        }
        other => Err(StateError::runtime(format!(
            "unknown intrinsic function '{}'",
            other
        ))),
    }
}

/// Split an intrinsic argument list on top-level commas.
///
/// Quoted arguments keep their surrounding quotes for the arg parser.
/// Escape sequences inside intrinsic string literals are passed through
/// verbatim rather than validated.
fn split_intrinsic_args(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '\\' if in_quote => {
                current.push(c);
                if let Some(next) = chars.peek().copied() {
                    current.push(next);
                    chars.next();
                }
            }
            ',' if !in_quote => {
                args.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    let last = current.trim();
    if !last.is_empty() {
        args.push(last.to_string());
    }
    args
}

fn eval_intrinsic_arg(arg: &str, data: &Value, scope: &EvalScope) -> StateResult<Value> {
    if let Some(inner) = arg.strip_prefix('\'').and_then(|a| a.strip_suffix('\'')) {
        return Ok(Value::String(
            inner.replace("\\'", "'").replace("\\\\", "\\"),
        ));
    }
    if arg.starts_with('$') {
        let path = parse_runtime_path(arg)?;
        return resolve_path(&path, data, scope).ok_or_else(|| {
            StateError::new(
                error_name::PARAMETER_PATH_FAILURE,
                format!("intrinsic argument '{}' selected nothing", arg),
            )
        });
    }
    match arg {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }
    if let Ok(n) = arg.parse::<f64>() {
        return Ok(json_number(n));
    }
    Err(StateError::runtime(format!(
        "malformed intrinsic argument '{}'",
        arg
    )))
}

// ── Expression evaluation ────────────────────────────────────────────

/// An evaluation result: JSON, or a function value usable only as an
/// intermediate.
#[derive(Clone, Debug)]
pub enum EvalValue {
    Json(Value),
    Function {
        params: Vec<String>,
        body: Expr,
        captures: HashMap<String, EvalValue>,
    },
}

impl EvalValue {
    /// Convert to JSON for use as state output; function values are a
    /// query-evaluation failure here.
    pub fn into_json(self) -> StateResult<Value> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Function { .. } => Err(StateError::query_evaluation(
                "a function value cannot be used as state output",
            )),
        }
    }
}

struct Env<'a> {
    current: &'a Value,
    context: &'a Value,
    vars: HashMap<String, EvalValue>,
}

/// Evaluate every `{% ... %}` string inside `value`, leaving other JSON
/// untouched. `current` is what a bare `$` addresses.
pub fn eval_embedded(
    value: &Value,
    current: &Value,
    states: &Value,
    scope: &EvalScope,
) -> StateResult<Value> {
    match value {
        Value::String(text) if parser::is_expression(text) => {
            eval_expression_str(text, current, states, scope)
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, nested) in map {
                out.insert(key.clone(), eval_embedded(nested, current, states, scope)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| eval_embedded(item, current, states, scope))
                .collect::<StateResult<_>>()?,
        )),
        other => Ok(other.clone()),
    }
}

/// Evaluate one delimited expression string to JSON.
pub fn eval_expression_str(
    text: &str,
    current: &Value,
    states: &Value,
    scope: &EvalScope,
) -> StateResult<Value> {
    let expr = parser::parse_delimited(text)
        .map_err(|e| StateError::query_evaluation(e.to_string()))?;
    let mut vars: HashMap<String, EvalValue> = scope
        .variables
        .iter()
        .map(|(k, v)| (k.clone(), EvalValue::Json(v.clone())))
        .collect();
    vars.insert("states".to_string(), EvalValue::Json(states.clone()));
    let env = Env {
        current,
        context: scope.context,
        vars,
    };
    eval_expr(&expr, &env)?.into_json()
}

fn eval_expr(expr: &Expr, env: &Env<'_>) -> StateResult<EvalValue> {
    match expr {
        Expr::Null => Ok(EvalValue::Json(Value::Null)),
        Expr::Bool(b) => Ok(EvalValue::Json(Value::Bool(*b))),
        Expr::Number(n) => Ok(EvalValue::Json(json_number(*n))),
        Expr::Str(s) => Ok(EvalValue::Json(Value::String(s.clone()))),
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(item, env)?.into_json()?);
            }
            Ok(EvalValue::Json(Value::Array(out)))
        }
        Expr::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, value) in fields {
                out.insert(key.clone(), eval_expr(value, env)?.into_json()?);
            }
            Ok(EvalValue::Json(Value::Object(out)))
        }
        Expr::Input => Ok(EvalValue::Json(env.current.clone())),
        Expr::Context => Ok(EvalValue::Json(env.context.clone())),
        Expr::Var(name) => env.vars.get(name).cloned().ok_or_else(|| {
            StateError::query_evaluation(format!("unknown variable '${}'", name))
        }),
        Expr::Field(base, name) => {
            let base = eval_expr(base, env)?.into_json()?;
            Ok(EvalValue::Json(
                base.get(name).cloned().unwrap_or(Value::Null),
            ))
        }
        Expr::Index(base, index) => {
            let base = eval_expr(base, env)?.into_json()?;
            let index = expect_number(eval_expr(index, env)?, "index")?;
            let value = base
                .as_array()
                .and_then(|items| items.get(index as usize))
                .cloned()
                .unwrap_or(Value::Null);
            Ok(EvalValue::Json(value))
        }
        Expr::Neg(inner) => {
            let n = expect_number(eval_expr(inner, env)?, "unary '-'")?;
            Ok(EvalValue::Json(json_number(-n)))
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, env),
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => {
            let cond = expect_bool(eval_expr(cond, env)?, "'?' condition")?;
            if cond {
                eval_expr(then, env)
            } else {
                eval_expr(otherwise, env)
            }
        }
        Expr::Function { params, body } => Ok(EvalValue::Function {
            params: params.clone(),
            body: (**body).clone(),
            captures: env.vars.clone(),
        }),
        Expr::Call { callee, args } => eval_call(callee, args, env),
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, env: &Env<'_>) -> StateResult<EvalValue> {
    // Short-circuit forms first.
    if matches!(op, BinOp::And | BinOp::Or) {
        let left = expect_bool(eval_expr(lhs, env)?, "boolean operand")?;
        let value = match (op, left) {
            (BinOp::And, false) => false,
            (BinOp::Or, true) => true,
            _ => expect_bool(eval_expr(rhs, env)?, "boolean operand")?,
        };
        return Ok(EvalValue::Json(Value::Bool(value)));
    }

    let left = eval_expr(lhs, env)?.into_json()?;
    let right = eval_expr(rhs, env)?.into_json()?;
    let value = match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
            let (a, b) = (
                expect_number(EvalValue::Json(left), "arithmetic operand")?,
                expect_number(EvalValue::Json(right), "arithmetic operand")?,
            );
            match op {
                BinOp::Add => json_number(a + b),
                BinOp::Sub => json_number(a - b),
                BinOp::Mul => json_number(a * b),
                BinOp::Div => {
                    if b == 0.0 {
                        return Err(StateError::query_evaluation("division by zero"));
                    }
                    json_number(a / b)
                }
                _ => unreachable!(),
            }
        }
        BinOp::Concat => Value::String(format!("{}{}", stringify(&left), stringify(&right))),
        BinOp::Eq => Value::Bool(json_eq(&left, &right)),
        BinOp::Ne => Value::Bool(!json_eq(&left, &right)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(&left, &right)?;
            Value::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            })
        }
        BinOp::And | BinOp::Or => unreachable!(),
    };
    Ok(EvalValue::Json(value))
}

fn eval_call(callee: &Expr, args: &[Expr], env: &Env<'_>) -> StateResult<EvalValue> {
    // Built-ins apply when the name is not shadowed by a binding.
    if let Expr::Var(name) = callee {
        if !env.vars.contains_key(name) {
            let mut evaluated = Vec::with_capacity(args.len());
            for arg in args {
                evaluated.push(eval_expr(arg, env)?.into_json()?);
            }
            return call_builtin(name, evaluated);
        }
    }

    let callee = eval_expr(callee, env)?;
    let EvalValue::Function {
        params,
        body,
        captures,
    } = callee
    else {
        return Err(StateError::query_evaluation("cannot apply a non-function"));
    };
    if params.len() != args.len() {
        return Err(StateError::query_evaluation(format!(
            "function expects {} argument(s), got {}",
            params.len(),
            args.len()
        )));
    }
    let mut vars = captures;
    for (param, arg) in params.iter().zip(args) {
        let value = eval_expr(arg, env)?;
        vars.insert(param.clone(), value);
    }
    let inner = Env {
        current: env.current,
        context: env.context,
        vars,
    };
    eval_expr(&body, &inner)
}

fn call_builtin(name: &str, args: Vec<Value>) -> StateResult<EvalValue> {
    let value = match (name, args.as_slice()) {
        ("string", [v]) => Value::String(stringify(v)),
        ("number", [Value::Number(n)]) => Value::Number(n.clone()),
        ("number", [Value::String(s)]) => {
            let n = s
                .trim()
                .parse::<f64>()
                .map_err(|_| StateError::query_evaluation(format!("'{}' is not a number", s)))?;
            json_number(n)
        }
        ("count", [Value::Array(items)]) => json!(items.len()),
        ("count", [Value::Null]) => json!(0),
        ("count", [_]) => json!(1),
        ("sum", [Value::Array(items)]) => {
            let mut total = 0.0;
            for item in items {
                total += item
                    .as_f64()
                    .ok_or_else(|| StateError::query_evaluation("$sum requires numbers"))?;
            }
            json_number(total)
        }
        ("uppercase", [Value::String(s)]) => Value::String(s.to_uppercase()),
        ("lowercase", [Value::String(s)]) => Value::String(s.to_lowercase()),
        ("split", [Value::String(s), Value::String(sep)]) => {
            json!(s.split(sep.as_str()).collect::<Vec<_>>())
        }
        ("join", [Value::Array(items), Value::String(sep)]) => {
            let parts: Vec<String> = items.iter().map(stringify).collect();
            Value::String(parts.join(sep))
        }
        ("now", []) => Value::String(chrono::Utc::now().to_rfc3339()),
        _ => {
            return Err(StateError::query_evaluation(format!(
                "unknown function '${}' or wrong arguments",
                name
            )));
        }
    };
    Ok(EvalValue::Json(value))
}

// ── Value helpers ────────────────────────────────────────────────────

fn json_number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        json!(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn expect_number(value: EvalValue, what: &str) -> StateResult<f64> {
    match value {
        EvalValue::Json(Value::Number(n)) => Ok(n.as_f64().unwrap_or(f64::NAN)),
        _ => Err(StateError::query_evaluation(format!(
            "{} must be a number",
            what
        ))),
    }
}

fn expect_bool(value: EvalValue, what: &str) -> StateResult<bool> {
    match value {
        EvalValue::Json(Value::Bool(b)) => Ok(b),
        _ => Err(StateError::query_evaluation(format!(
            "{} must be a boolean",
            what
        ))),
    }
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> StateResult<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y)
                .ok_or_else(|| StateError::query_evaluation("values are not comparable"))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(StateError::query_evaluation(
            "comparison requires two numbers or two strings",
        )),
    }
}

/// Stringification used by `&` concatenation and `$string`.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Runtime configuration fields ─────────────────────────────────────

/// Resolve a numeric configuration field (MaxConcurrency, MaxItems,
/// ToleratedFailureCount...) from its literal/expression form or its
/// `...Path` companion. Values that resolve to something negative or
/// non-integral are `States.Runtime` failures.
pub fn resolve_u64_setting(
    field: &str,
    literal: Option<&Value>,
    path: Option<&String>,
    data: &Value,
    scope: &EvalScope,
) -> StateResult<Option<u64>> {
    let resolved = match (literal, path) {
        (Some(value), _) => match value {
            Value::String(text) => {
                let states = json!({"input": data, "context": scope.context});
                eval_expression_str(text, data, &states, scope)?
            }
            other => other.clone(),
        },
        (None, Some(text)) => {
            let parsed = parse_runtime_path(text)?;
            resolve_path(&parsed, data, scope).ok_or_else(|| {
                StateError::runtime(format!("{} path '{}' selected nothing", field, text))
            })?
        }
        (None, None) => return Ok(None),
    };

    let Value::Number(n) = &resolved else {
        return Err(StateError::runtime(format!(
            "{} resolved to a non-numeric value",
            field
        )));
    };
    n.as_u64().map(Some).ok_or_else(|| {
        StateError::runtime(format!(
            "{} resolved to {}, which is not a non-negative integer",
            field, n
        ))
    })
}

/// Like [`resolve_u64_setting`], for percentage fields bounded to
/// `[0, 100]`.
pub fn resolve_percentage_setting(
    field: &str,
    literal: Option<&Value>,
    path: Option<&String>,
    data: &Value,
    scope: &EvalScope,
) -> StateResult<Option<f64>> {
    let resolved = match (literal, path) {
        (Some(value), _) => match value {
            Value::String(text) => {
                let states = json!({"input": data, "context": scope.context});
                eval_expression_str(text, data, &states, scope)?
            }
            other => other.clone(),
        },
        (None, Some(text)) => {
            let parsed = parse_runtime_path(text)?;
            resolve_path(&parsed, data, scope).ok_or_else(|| {
                StateError::runtime(format!("{} path '{}' selected nothing", field, text))
            })?
        }
        (None, None) => return Ok(None),
    };

    let value = resolved.as_f64().ok_or_else(|| {
        StateError::runtime(format!("{} resolved to a non-numeric value", field))
    })?;
    if !(0.0..=100.0).contains(&value) {
        return Err(StateError::runtime(format!(
            "{} resolved to {}, outside [0, 100]",
            field, value
        )));
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope<'a>(
        dialect: QueryLanguage,
        context: &'a Value,
        variables: &'a Map<String, Value>,
    ) -> EvalScope<'a> {
        EvalScope {
            dialect,
            context,
            variables,
        }
    }

    fn path_scope<'a>(context: &'a Value, variables: &'a Map<String, Value>) -> EvalScope<'a> {
        scope(QueryLanguage::JsonPath, context, variables)
    }

    #[test]
    fn test_input_pipeline_path_dialect() {
        let ctx = json!({"Execution": {"Id": "e-1"}});
        let vars = Map::new();
        let io = StateIo {
            input_path: Some("$.order".into()),
            parameters: Some(json!({
                "id.$": "$.id",
                "execution.$": "$$.Execution.Id",
                "fixed": 7
            })),
            ..Default::default()
        };
        let raw = json!({"order": {"id": 42}, "noise": true});
        let got = state_input(&io, &raw, &path_scope(&ctx, &vars)).unwrap();
        assert_eq!(got, json!({"id": 42, "execution": "e-1", "fixed": 7}));
    }

    #[test]
    fn test_missing_binding_is_parameter_path_failure() {
        let ctx = json!({});
        let vars = Map::new();
        let io = StateIo {
            parameters: Some(json!({"x.$": "$.missing"})),
            ..Default::default()
        };
        let err = state_input(&io, &json!({}), &path_scope(&ctx, &vars)).unwrap_err();
        assert_eq!(err.error, error_name::PARAMETER_PATH_FAILURE);
    }

    #[test]
    fn test_output_pipeline_with_result_path() {
        let ctx = json!({});
        let vars = Map::new();
        let io = StateIo {
            result_selector: Some(json!({"doubled.$": "$.value"})),
            result_path: Some("$.task".into()),
            output_path: Some("$.task".into()),
            ..Default::default()
        };
        let raw = json!({"original": 1});
        let result = json!({"value": 84, "noise": []});
        let got = state_output(&io, &raw, &result, &path_scope(&ctx, &vars)).unwrap();
        assert_eq!(got, json!({"doubled": 84}));
    }

    #[test]
    fn test_result_path_through_scalar_fails() {
        let ctx = json!({});
        let vars = Map::new();
        let io = StateIo {
            result_path: Some("$.a.b".into()),
            ..Default::default()
        };
        let err =
            state_output(&io, &json!({"a": 3}), &json!(1), &path_scope(&ctx, &vars)).unwrap_err();
        assert_eq!(err.error, error_name::RESULT_PATH_MATCH_FAILURE);
    }

    #[test]
    fn test_intrinsic_format_and_array() {
        let ctx = json!({});
        let vars = Map::new();
        let template = json!({
            "label.$": "States.Format('{}-{}', $.a, $.b)",
            "pair.$": "States.Array($.a, $.b)"
        });
        let data = json!({"a": "x", "b": 2});
        let got = eval_template(&template, &data, &path_scope(&ctx, &vars)).unwrap();
        assert_eq!(got, json!({"label": "x-2", "pair": ["x", 2]}));
    }

    #[test]
    fn test_intrinsic_json_conversions() {
        let ctx = json!({});
        let vars = Map::new();
        let data = json!({"text": "{\"k\": 1}", "doc": {"k": 1}});
        let template = json!({
            "parsed.$": "States.StringToJson($.text)",
            "encoded.$": "States.JsonToString($.doc)"
        });
        let got = eval_template(&template, &data, &path_scope(&ctx, &vars)).unwrap();
        assert_eq!(got["parsed"], json!({"k": 1}));
        assert_eq!(got["encoded"], json!("{\"k\":1}"));
    }

    #[test]
    fn test_expression_arguments_and_output() {
        let ctx = json!({"Execution": {"Id": "e-2"}});
        let vars = Map::new();
        let s = scope(QueryLanguage::Jsonata, &ctx, &vars);

        let io = StateIo {
            arguments: Some(json!({"total": "{% $states.input.value * 2 %}"})),
            ..Default::default()
        };
        let got = state_input(&io, &json!({"value": 21}), &s).unwrap();
        assert_eq!(got, json!({"total": 42}));

        let io = StateIo {
            output: Some(json!("{% $states.result.total & '!' %}")),
            ..Default::default()
        };
        let got = state_output(&io, &json!({}), &json!({"total": 42}), &s).unwrap();
        assert_eq!(got, json!("42!"));
    }

    #[test]
    fn test_function_value_applies_but_cannot_escape() {
        let ctx = json!({});
        let vars = Map::new();
        let s = scope(QueryLanguage::Jsonata, &ctx, &vars);
        let states = json!({"input": {}});

        let applied =
            eval_expression_str("{% function($x) { $x * 2 }(21) %}", &json!({}), &states, &s)
                .unwrap();
        assert_eq!(applied, json!(42));

        let err = eval_expression_str("{% function($x) { $x } %}", &json!({}), &states, &s)
            .unwrap_err();
        assert_eq!(err.error, error_name::QUERY_EVALUATION_ERROR);
    }

    #[test]
    fn test_variable_bindings_in_both_dialects() {
        let ctx = json!({});
        let mut vars = Map::new();
        vars.insert("threshold".to_string(), json!(10));

        // Path dialect reads variables through $threshold paths.
        let io = StateIo {
            parameters: Some(json!({"limit.$": "$threshold"})),
            ..Default::default()
        };
        let got = state_input(&io, &json!({}), &path_scope(&ctx, &vars)).unwrap();
        assert_eq!(got, json!({"limit": 10}));

        // Expression dialect reads them as $threshold.
        let s = scope(QueryLanguage::Jsonata, &ctx, &vars);
        let states = json!({"input": {}});
        let got =
            eval_expression_str("{% $threshold + 1 %}", &json!({}), &states, &s).unwrap();
        assert_eq!(got, json!(11));
    }

    #[test]
    fn test_eval_assign_both_dialects() {
        let ctx = json!({});
        let vars = Map::new();

        let mut assign = Map::new();
        assign.insert("total.$".to_string(), json!("$.value"));
        let got = eval_assign(&assign, &json!({}), &json!({"value": 5}), &path_scope(&ctx, &vars))
            .unwrap();
        assert_eq!(got, vec![("total".to_string(), json!(5))]);

        let s = scope(QueryLanguage::Jsonata, &ctx, &vars);
        let mut assign = Map::new();
        assign.insert("total".to_string(), json!("{% $states.result.value %}"));
        let got = eval_assign(&assign, &json!({}), &json!({"value": 5}), &s).unwrap();
        assert_eq!(got, vec![("total".to_string(), json!(5))]);
    }

    #[test]
    fn test_resolve_u64_setting_rejects_bad_values() {
        let ctx = json!({});
        let vars = Map::new();
        let s = path_scope(&ctx, &vars);
        let data = json!({"negative": -2, "fractional": 1.5, "fine": 3});

        let path = |p: &str| Some(p.to_string());
        assert_eq!(
            resolve_u64_setting("MaxConcurrency", None, path("$.fine").as_ref(), &data, &s)
                .unwrap(),
            Some(3)
        );
        for bad in ["$.negative", "$.fractional", "$.absent"] {
            let err = resolve_u64_setting("MaxConcurrency", None, path(bad).as_ref(), &data, &s)
                .unwrap_err();
            assert_eq!(err.error, error_name::RUNTIME, "value at {}", bad);
        }
    }

    #[test]
    fn test_resolve_percentage_bounds() {
        let ctx = json!({});
        let vars = Map::new();
        let s = path_scope(&ctx, &vars);
        let data = json!({"ok": 50.5, "over": 101});
        let path = |p: &str| Some(p.to_string());

        assert_eq!(
            resolve_percentage_setting("Tolerated", None, path("$.ok").as_ref(), &data, &s)
                .unwrap(),
            Some(50.5)
        );
        assert!(
            resolve_percentage_setting("Tolerated", None, path("$.over").as_ref(), &data, &s)
                .is_err()
        );
    }
}
