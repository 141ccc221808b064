// src/optimize/params.rs

//! Parameter and goal descriptors of an optimization request.
//!
//! Descriptors arrive loosely typed (`{key, values, type?}` and
//! `{key, target}`) from a flow file or from code and are validated into
//! [`Parameter`] and [`Goal`] before any node runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{FlowError, Result};

/// Raw parameter descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Node variable the value is written to.
    pub key: String,
    pub values: Vec<Value>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Restrict the override to this template step.
    #[serde(default)]
    pub step: Option<String>,
    /// Restrict the override to this index of `step`.
    #[serde(default)]
    pub index: Option<u32>,
}

impl ParameterSpec {
    pub fn new(key: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            values,
            kind: None,
            step: None,
            index: None,
        }
    }

    pub fn with_type(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn at(mut self, step: impl Into<String>, index: Option<u32>) -> Self {
        self.step = Some(step.into());
        self.index = index;
        self
    }
}

/// Raw goal descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSpec {
    /// Metric name read from the measurement nodes.
    pub key: String,
    pub target: String,
}

impl GoalSpec {
    pub fn new(key: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            target: target.into(),
        }
    }
}

/// Search space of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    Float { lo: f64, hi: f64 },
    Int { lo: i64, hi: i64 },
    Discrete(Vec<f64>),
    Bool,
    Enum(Vec<String>),
}

impl Domain {
    pub fn type_name(&self) -> &'static str {
        match self {
            Domain::Float { .. } => "float",
            Domain::Int { .. } => "int",
            Domain::Discrete(_) => "discrete",
            Domain::Bool => "bool",
            Domain::Enum(_) => "enum",
        }
    }
}

/// A concrete value chosen for a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

/// Validated parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub key: String,
    pub domain: Domain,
    pub step: Option<String>,
    pub index: Option<u32>,
}

impl TryFrom<ParameterSpec> for Parameter {
    type Error = FlowError;

    fn try_from(spec: ParameterSpec) -> Result<Self> {
        if spec.key.trim().is_empty() {
            return Err(FlowError::validation("parameter key must not be empty"));
        }
        if spec.index.is_some() && spec.step.is_none() {
            return Err(FlowError::validation(format!(
                "parameter '{}' sets an index without a step",
                spec.key
            )));
        }
        let kind = match spec.kind.as_deref() {
            Some(kind) => kind.trim().to_lowercase(),
            None => infer_type(&spec.values).to_string(),
        };
        let domain = domain_for(&spec.key, &kind, &spec.values)?;
        Ok(Parameter {
            key: spec.key,
            domain,
            step: spec.step,
            index: spec.index,
        })
    }
}

/// Best guess at a parameter type from its values.
fn infer_type(values: &[Value]) -> &'static str {
    if values.iter().all(Value::is_boolean) && !values.is_empty() {
        "bool"
    } else if values.iter().any(Value::is_string) {
        "enum"
    } else if values.len() == 2 && values.iter().all(|v| v.is_i64() || v.is_u64()) {
        "int"
    } else if values.len() == 2 {
        "float"
    } else {
        "discrete"
    }
}

fn domain_for(key: &str, kind: &str, values: &[Value]) -> Result<Domain> {
    let numbers = || -> Result<Vec<f64>> {
        values
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    FlowError::validation(format!("parameter '{key}': {v} is not a number"))
                })
            })
            .collect()
    };
    let range = || -> Result<(f64, f64)> {
        let nums = numbers()?;
        match nums.as_slice() {
            [lo, hi] if lo <= hi => Ok((*lo, *hi)),
            [lo, hi] => Err(FlowError::validation(format!(
                "parameter '{key}': lower bound {lo} exceeds upper bound {hi}"
            ))),
            _ => Err(FlowError::validation(format!(
                "parameter '{key}': {kind} needs exactly two values [low, high]"
            ))),
        }
    };

    match kind {
        "float" => {
            let (lo, hi) = range()?;
            Ok(Domain::Float { lo, hi })
        }
        "int" => {
            let (lo, hi) = range()?;
            if lo.fract() != 0.0 || hi.fract() != 0.0 {
                return Err(FlowError::validation(format!(
                    "parameter '{key}': int bounds must be whole numbers"
                )));
            }
            Ok(Domain::Int {
                lo: lo as i64,
                hi: hi as i64,
            })
        }
        "discrete" => {
            let nums = numbers()?;
            if nums.is_empty() {
                return Err(FlowError::validation(format!(
                    "parameter '{key}': discrete needs at least one value"
                )));
            }
            Ok(Domain::Discrete(nums))
        }
        "bool" => Ok(Domain::Bool),
        "enum" => {
            let choices: Vec<String> = values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            if choices.is_empty() {
                return Err(FlowError::validation(format!(
                    "parameter '{key}': enum needs at least one value"
                )));
            }
            Ok(Domain::Enum(choices))
        }
        other => Err(FlowError::validation(format!(
            "parameter '{key}': {other} is not a supported parameter type"
        ))),
    }
}

/// Optimization direction of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Maximize,
    Minimize,
}

impl Direction {
    /// `a` is strictly better than `b`.
    pub fn better(self, a: f64, b: f64) -> bool {
        match self {
            Direction::Maximize => a > b,
            Direction::Minimize => a < b,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Goal {
    pub key: String,
    pub direction: Direction,
}

impl TryFrom<GoalSpec> for Goal {
    type Error = FlowError;

    fn try_from(spec: GoalSpec) -> Result<Self> {
        let direction = match spec.target.trim() {
            "max" => Direction::Maximize,
            "min" => Direction::Minimize,
            other => {
                return Err(FlowError::validation(format!(
                    "goal '{}': {other} is not a supported goal",
                    spec.key
                )));
            }
        };
        Ok(Goal {
            key: spec.key,
            direction,
        })
    }
}
