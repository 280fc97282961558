//! MongoDB-style predicate filters.
//!
//! A filter is a JSON object. Plain `{field: value}` pairs test equality;
//! operator objects (`{field: {"$gt": 3}}`) test everything else; `$and`,
//! `$or` and `$nor` combine sub-filters. Field names may be dotted paths into
//! nested objects, and a path that crosses an array matches if any element
//! matches.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ValidationError;

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

fn invalid(reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidFilter {
        reason: reason.into(),
    }
}

fn cached_regex(pattern: &str) -> Result<Regex, ValidationError> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Ok(guard) = cache.read() {
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled =
        Regex::new(pattern).map_err(|e| invalid(format!("invalid regex '{pattern}': {e}")))?;

    if let Ok(mut guard) = cache.write() {
        if guard.len() >= REGEX_CACHE_MAX {
            guard.clear();
        }
        guard
            .entry(pattern.to_string())
            .or_insert_with(|| compiled.clone());
    }
    Ok(compiled)
}

#[derive(Debug, Clone)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Nor(Vec<Node>),
    Field { path: Vec<String>, ops: Vec<Op> },
}

#[derive(Debug, Clone)]
enum Op {
    Eq(Value),
    Ne(Value),
    Cmp(Ordering, bool, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
    Size(usize),
    Not(Vec<Op>),
}

/// A compiled predicate filter.
#[derive(Debug, Clone)]
pub struct Filter {
    root: Node,
}

impl Filter {
    /// Compiles a filter document.
    ///
    /// # Errors
    /// `ValidationError::InvalidFilter` for unknown operators, operands of the
    /// wrong type, invalid regular expressions, or a non-object filter.
    pub fn parse(filter: &Value) -> Result<Self, ValidationError> {
        let Value::Object(map) = filter else {
            return Err(invalid("filter must be a JSON object"));
        };
        Ok(Self {
            root: parse_object(map)?,
        })
    }

    /// Returns true if `document` satisfies the filter.
    #[must_use]
    pub fn matches(&self, document: &Value) -> bool {
        eval_node(&self.root, document)
    }
}

fn parse_object(map: &Map<String, Value>) -> Result<Node, ValidationError> {
    let mut clauses = Vec::with_capacity(map.len());
    for (key, value) in map {
        let node = match key.as_str() {
            "$and" => Node::And(parse_clauses(key, value)?),
            "$or" => Node::Or(parse_clauses(key, value)?),
            "$nor" => Node::Nor(parse_clauses(key, value)?),
            k if k.starts_with('$') => {
                return Err(invalid(format!("unknown top-level operator '{k}'")));
            }
            k => Node::Field {
                path: k.split('.').map(str::to_string).collect(),
                ops: parse_condition(value)?,
            },
        };
        clauses.push(node);
    }
    Ok(Node::And(clauses))
}

fn parse_clauses(op: &str, value: &Value) -> Result<Vec<Node>, ValidationError> {
    let Value::Array(items) = value else {
        return Err(invalid(format!("{op} expects an array of filters")));
    };
    if items.is_empty() {
        return Err(invalid(format!("{op} expects a non-empty array")));
    }
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => parse_object(map),
            _ => Err(invalid(format!("{op} entries must be objects"))),
        })
        .collect()
}

fn is_operator_object(value: &Value) -> Result<bool, ValidationError> {
    let Value::Object(map) = value else {
        return Ok(false);
    };
    let operators = map.keys().filter(|k| k.starts_with('$')).count();
    match operators {
        0 => Ok(false),
        n if n == map.len() => Ok(true),
        _ => Err(invalid("cannot mix operators and plain fields in one condition")),
    }
}

fn parse_condition(value: &Value) -> Result<Vec<Op>, ValidationError> {
    if !is_operator_object(value)? {
        return Ok(vec![Op::Eq(value.clone())]);
    }
    let Value::Object(map) = value else {
        return Ok(vec![Op::Eq(value.clone())]);
    };

    let flags = match map.get("$options") {
        None => String::new(),
        Some(Value::String(options)) => {
            if let Some(bad) = options.chars().find(|c| !matches!(c, 'i' | 'm' | 's' | 'x')) {
                return Err(invalid(format!("unsupported $options flag '{bad}'")));
            }
            options.clone()
        }
        Some(_) => return Err(invalid("$options must be a string")),
    };

    let mut ops = Vec::with_capacity(map.len());
    for (op, operand) in map {
        let parsed = match op.as_str() {
            "$eq" => Op::Eq(operand.clone()),
            "$ne" => Op::Ne(operand.clone()),
            "$gt" => Op::Cmp(Ordering::Greater, false, operand.clone()),
            "$gte" => Op::Cmp(Ordering::Greater, true, operand.clone()),
            "$lt" => Op::Cmp(Ordering::Less, false, operand.clone()),
            "$lte" => Op::Cmp(Ordering::Less, true, operand.clone()),
            "$in" => Op::In(array_operand(op, operand)?),
            "$nin" => Op::Nin(array_operand(op, operand)?),
            "$exists" => Op::Exists(match operand {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                _ => return Err(invalid("$exists expects a boolean")),
            }),
            "$regex" => {
                let Value::String(pattern) = operand else {
                    return Err(invalid("$regex expects a string"));
                };
                Op::Regex(regex_with_flags(pattern, &flags)?)
            }
            "$options" => continue,
            "$size" => Op::Size(
                operand
                    .as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| invalid("$size expects a non-negative integer"))?,
            ),
            "$not" => match operand {
                Value::Object(_) if is_operator_object(operand)? => {
                    Op::Not(parse_condition(operand)?)
                }
                Value::String(pattern) => Op::Not(vec![Op::Regex(cached_regex(pattern)?)]),
                _ => return Err(invalid("$not expects an operator object or a regex")),
            },
            other => return Err(invalid(format!("unknown operator '{other}'"))),
        };
        ops.push(parsed);
    }
    if ops.is_empty() {
        return Err(invalid("$options requires $regex"));
    }
    Ok(ops)
}

fn regex_with_flags(pattern: &str, flags: &str) -> Result<Regex, ValidationError> {
    if flags.is_empty() {
        cached_regex(pattern)
    } else {
        cached_regex(&format!("(?{flags}){pattern}"))
    }
}

fn array_operand(op: &str, operand: &Value) -> Result<Vec<Value>, ValidationError> {
    match operand {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(invalid(format!("{op} expects an array"))),
    }
}

// ---------------------------------------------------------------------------

fn eval_node(node: &Node, doc: &Value) -> bool {
    match node {
        Node::And(nodes) => nodes.iter().all(|n| eval_node(n, doc)),
        Node::Or(nodes) => nodes.iter().any(|n| eval_node(n, doc)),
        Node::Nor(nodes) => !nodes.iter().any(|n| eval_node(n, doc)),
        Node::Field { path, ops } => {
            let mut found = Vec::new();
            resolve(doc, path, &mut found);
            ops.iter().all(|op| eval_op(op, &found))
        }
    }
}

/// Collects every value reachable at `path`, descending into arrays.
fn resolve<'a>(value: &'a Value, path: &[String], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = path.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(head) {
                resolve(child, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(child) = items.get(index) {
                    resolve(child, rest, out);
                }
            } else {
                for item in items {
                    resolve(item, path, out);
                }
            }
        }
        _ => {}
    }
}

/// The value itself plus, for arrays, each element.
fn candidates<'a, 'b>(found: &'b [&'a Value]) -> impl Iterator<Item = &'a Value> + 'b
where
    'a: 'b,
{
    found.iter().copied().flat_map(|v: &'a Value| {
        let elements: &'a [Value] = match v {
            Value::Array(items) => items,
            _ => &[],
        };
        std::iter::once(v).chain(elements.iter())
    })
}

fn equals(found: &[&Value], expected: &Value) -> bool {
    if expected.is_null() && found.iter().all(|v| v.is_null()) {
        // Missing fields match null.
        return true;
    }
    candidates(found).any(|v| values_equal(v, expected))
}

fn eval_op(op: &Op, found: &[&Value]) -> bool {
    match op {
        Op::Eq(expected) => equals(found, expected),
        Op::Ne(expected) => !equals(found, expected),
        Op::Cmp(ordering, inclusive, bound) => candidates(found).any(|v| {
            compare(v, bound).is_some_and(|ord| ord == *ordering || (*inclusive && ord == Ordering::Equal))
        }),
        Op::In(options) => options.iter().any(|o| equals(found, o)),
        Op::Nin(options) => !options.iter().any(|o| equals(found, o)),
        Op::Exists(should) => !found.is_empty() == *should,
        Op::Regex(re) => candidates(found).any(|v| matches!(v, Value::String(s) if re.is_match(s))),
        Op::Size(n) => found
            .iter()
            .any(|v| matches!(v, Value::Array(items) if items.len() == *n)),
        Op::Not(inner) => !inner.iter().all(|op| eval_op(op, found)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Orders two values of the same kind; mixed kinds are incomparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
