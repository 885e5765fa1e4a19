//! Filter predicates
//!
//! A predicate key is a field path plus an operation, joined by `__`:
//! `name__icontains`, `security_groups__name__exact_any`.

use crate::error::{Error, Result};
use crate::resource::{FieldValue, PATH_SEPARATOR};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Re,
    Contains,
    IContains,
    Exact,
    IExact,
    StartsWith,
    EndsWith,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Operator {
    pub const ALL: [Operator; 11] = [
        Operator::Re,
        Operator::Contains,
        Operator::IContains,
        Operator::Exact,
        Operator::IExact,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Lt,
        Operator::Lte,
        Operator::Gt,
        Operator::Gte,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operator::Re => "re",
            Operator::Contains => "contains",
            Operator::IContains => "icontains",
            Operator::Exact => "exact",
            Operator::IExact => "iexact",
            Operator::StartsWith => "startswith",
            Operator::EndsWith => "endswith",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
        }
    }
}

/// How a list operand combines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    /// The operand is a single value
    Single,
    /// At least one operand element must match
    Any,
    /// Every operand element must match
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub operator: Operator,
    pub quantifier: Quantifier,
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (base, quantifier) = if let Some(base) = s.strip_suffix("_any") {
            (base, Quantifier::Any)
        } else if let Some(base) = s.strip_suffix("_all") {
            (base, Quantifier::All)
        } else {
            (s, Quantifier::Single)
        };

        let operator = Operator::ALL
            .into_iter()
            .find(|op| op.name() == base)
            .ok_or_else(|| {
                Error::config(format!(
                    "{} is not a recognized filter operation; valid operations are {}",
                    s,
                    valid_operations().join(", ")
                ))
            })?;

        Ok(Operation {
            operator,
            quantifier,
        })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.quantifier {
            Quantifier::Single => write!(f, "{}", self.operator.name()),
            Quantifier::Any => write!(f, "{}_any", self.operator.name()),
            Quantifier::All => write!(f, "{}_all", self.operator.name()),
        }
    }
}

/// Every accepted operation name, including `_any`/`_all` variants
pub fn valid_operations() -> Vec<String> {
    Operator::ALL
        .iter()
        .flat_map(|op| {
            let name = op.name();
            [name.to_string(), format!("{}_any", name), format!("{}_all", name)]
        })
        .collect()
}

/// Why a leaf could not be evaluated; such leaves never match
#[derive(Debug, Error)]
pub enum LeafError {
    #[error("{operation} does not apply to a {found} value")]
    TypeMismatch {
        operation: &'static str,
        found: &'static str,
    },

    #[error("cannot compare a {found} value with {operand}")]
    Incomparable { found: &'static str, operand: String },
}

/// One parsed `path__operation = operand` condition
#[derive(Debug, Clone)]
pub struct Predicate {
    key: String,
    path: Vec<String>,
    operation: Operation,
    operand: Value,
    /// Compiled patterns for `re`, one per operand element
    patterns: Vec<Regex>,
}

impl Predicate {
    pub fn parse(key: &str, operand: Value) -> Result<Self> {
        let mut segments: Vec<String> = key.split(PATH_SEPARATOR).map(|s| s.to_string()).collect();
        let op_name = segments.pop().unwrap_or_default();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(Error::config(format!(
                "{} must be a field path followed by an operation",
                key
            )));
        }
        let operation: Operation = op_name.parse()?;

        let operands: Vec<&Value> = match operation.quantifier {
            Quantifier::Single => vec![&operand],
            Quantifier::Any | Quantifier::All => match &operand {
                Value::Array(items) => items.iter().collect(),
                other => {
                    return Err(Error::config(format!(
                        "{} expects a list operand, got {}",
                        key, other
                    )))
                }
            },
        };

        let patterns = if operation.operator == Operator::Re {
            operands
                .iter()
                .map(|value| {
                    let pattern = value.as_str().ok_or_else(|| {
                        Error::config(format!("{} patterns must be strings, got {}", key, value))
                    })?;
                    // Anchored at the start, like a prefix match
                    Regex::new(&format!("^(?:{})", pattern)).map_err(|e| {
                        Error::config(format!("{} has an invalid pattern {}: {}", key, pattern, e))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        Ok(Self {
            key: key.to_string(),
            path: segments,
            operation,
            operand,
            patterns,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn operand(&self) -> &Value {
        &self.operand
    }

    /// Evaluate against one leaf; a null leaf never matches
    pub fn evaluate(&self, leaf: &FieldValue) -> std::result::Result<bool, LeafError> {
        if leaf.is_null() {
            return Ok(false);
        }

        match self.operation.quantifier {
            Quantifier::Single => self.test(leaf, &self.operand, 0),
            Quantifier::Any | Quantifier::All => {
                let operands = self.operand.as_array().map(Vec::as_slice).unwrap_or_default();
                let mut hits = Vec::with_capacity(operands.len());
                for (index, operand) in operands.iter().enumerate() {
                    hits.push(self.test(leaf, operand, index)?);
                }
                Ok(match self.operation.quantifier {
                    Quantifier::All => hits.into_iter().all(|hit| hit),
                    _ => hits.into_iter().any(|hit| hit),
                })
            }
        }
    }

    fn test(&self, leaf: &FieldValue, operand: &Value, index: usize) -> std::result::Result<bool, LeafError> {
        let operator = self.operation.operator;
        let mismatch = || LeafError::TypeMismatch {
            operation: operator.name(),
            found: leaf.type_name(),
        };

        match operator {
            Operator::Re => {
                let text = leaf.as_str().ok_or_else(mismatch)?;
                Ok(self.patterns.get(index).is_some_and(|re| re.is_match(text)))
            }
            Operator::Contains => match leaf {
                FieldValue::String(text) => {
                    let needle = operand.as_str().ok_or_else(mismatch)?;
                    Ok(text.contains(needle))
                }
                FieldValue::List(items) => Ok(items.iter().any(|item| scalar_eq(item, operand))),
                _ => Err(mismatch()),
            },
            Operator::IContains => match leaf {
                FieldValue::String(text) => {
                    let needle = operand.as_str().ok_or_else(mismatch)?;
                    Ok(text.to_lowercase().contains(&needle.to_lowercase()))
                }
                FieldValue::List(items) => {
                    let needle = operand.as_str().ok_or_else(mismatch)?.to_lowercase();
                    Ok(items
                        .iter()
                        .filter_map(FieldValue::as_str)
                        .any(|item| item.to_lowercase() == needle))
                }
                _ => Err(mismatch()),
            },
            Operator::Exact => match leaf {
                FieldValue::Relation(_) => Err(mismatch()),
                other => Ok(scalar_eq(other, operand)),
            },
            Operator::IExact => {
                let text = leaf.as_str().ok_or_else(mismatch)?;
                let other = operand.as_str().ok_or_else(mismatch)?;
                Ok(text.to_lowercase() == other.to_lowercase())
            }
            Operator::StartsWith => {
                let text = leaf.as_str().ok_or_else(mismatch)?;
                Ok(text.starts_with(operand.as_str().ok_or_else(mismatch)?))
            }
            Operator::EndsWith => {
                let text = leaf.as_str().ok_or_else(mismatch)?;
                Ok(text.ends_with(operand.as_str().ok_or_else(mismatch)?))
            }
            Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
                let ordering = compare(leaf, operand)?;
                Ok(match operator {
                    Operator::Lt => ordering == Ordering::Less,
                    Operator::Lte => ordering != Ordering::Greater,
                    Operator::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }
        }
    }
}

/// Equality with numbers compared by value (`1 == 1.0`)
fn scalar_eq(leaf: &FieldValue, operand: &Value) -> bool {
    match (leaf, operand) {
        (FieldValue::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (FieldValue::String(a), Value::String(b)) => a == b,
        (FieldValue::Bool(a), Value::Bool(b)) => a == b,
        (FieldValue::Relation(_), _) => false,
        (other, operand) => other.to_json() == *operand,
    }
}

/// Numbers order numerically, strings lexicographically
fn compare(leaf: &FieldValue, operand: &Value) -> std::result::Result<Ordering, LeafError> {
    let incomparable = || LeafError::Incomparable {
        found: leaf.type_name(),
        operand: operand.to_string(),
    };

    match (leaf, operand) {
        (FieldValue::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().ok_or_else(incomparable)?, b.as_f64().ok_or_else(incomparable)?);
            a.partial_cmp(&b).ok_or_else(incomparable)
        }
        (FieldValue::String(a), Value::String(b)) => Ok(a.as_str().cmp(b.as_str())),
        _ => Err(incomparable()),
    }
}
