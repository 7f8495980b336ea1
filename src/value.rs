//! Payloads carried by events: the value delivered to waiters on success,
//! or the failure raised into them.

// ── Value ─────────────────────────────────────────────────────────────

/// Result payload of a successful event or a finished process.
///
/// Kept deliberately small; models that need richer results keep them in
/// their own state and hand back an identifier (`Int`) here.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// No payload (plain timeouts, processes that return nothing).
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Empty
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Empty => write!(f, "()"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{:?}", s),
        }
    }
}

// ── Failure ───────────────────────────────────────────────────────────

/// A failure travelling along the awaiting chain.
///
/// Raised by a computation (`Step::Fail`), by `Environment::fail`, or
/// injected by `Environment::interrupt`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Failure {
    /// The process was interrupted while waiting; carries the cause.
    #[error("interrupted ({0})")]
    Interrupted(Value),

    /// A computation gave up with a message.
    #[error("{0}")]
    Raised(String),
}

impl Failure {
    /// Shorthand for `Failure::Raised`.
    pub fn raised(msg: impl Into<String>) -> Self {
        Failure::Raised(msg.into())
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Failure::Interrupted(_))
    }
}

/// What an event resolves to once triggered.
pub type Outcome = Result<Value, Failure>;
