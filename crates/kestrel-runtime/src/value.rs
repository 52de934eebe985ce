//! The dynamic value model.
//!
//! Deliberately small: enough for dispatch with metamethods, coroutines and
//! async tasks. Reference types (tables, coroutines, tasks) compare and hash
//! by identity.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kestrel_ir::{Builtin, Constant, FunctionId};
use serde::{Deserialize, Serialize};

use crate::coroutine::CoroutineRef;
use crate::errors::{RuntimeError, RuntimeResult};
use crate::task::AsyncTask;

/// Something that can be invoked without metamethod lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Callable {
    Compiled(FunctionId),
    Builtin(Builtin),
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Compiled(id) => write!(f, "function: {id}"),
            Callable::Builtin(builtin) => write!(f, "function: builtin: {builtin}"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Table(TableRef),
    Function(Callable),
    Coroutine(CoroutineRef),
    Task(AsyncTask),
}

impl Value {
    pub fn from_constant(constant: &Constant) -> Self {
        match constant {
            Constant::Nil => Value::Nil,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Float(x) => Value::Float(*x),
            Constant::Str(s) => Value::Str(Arc::from(s.as_str())),
            Constant::Function(id) => Value::Function(Callable::Compiled(*id)),
            Constant::Builtin(builtin) => Value::Function(Callable::Builtin(*builtin)),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
            Value::Coroutine(_) => "thread",
            Value::Task(_) => "userdata",
        }
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(x) if x.fract() == 0.0 => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn table() -> Self {
        Value::Table(TableRef::new())
    }

    /// The metatable consulted for metamethods, if any.
    pub fn metatable(&self) -> Option<TableRef> {
        match self {
            Value::Table(table) => table.metatable(),
            _ => None,
        }
    }

    /// Look up `name` in this value's metatable.
    pub fn metamethod(&self, name: &str) -> Option<Value> {
        let handler = self.metatable()?.get(&Value::from(name));
        (!handler.is_nil()).then_some(handler)
    }
}

impl PartialEq for Value {
    /// Raw equality: no `__eq`.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Coroutine(a), Value::Coroutine(b)) => a == b,
            (Value::Task(a), Value::Task(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{x:.1}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Table(table) => write!(f, "table: {:p}", Arc::as_ptr(&table.0)),
            Value::Function(callable) => write!(f, "{callable}"),
            Value::Coroutine(co) => write!(f, "thread: {:p}", co.as_ptr()),
            Value::Task(task) => write!(f, "task: {}", task.description()),
        }
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

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

/// Hashable form of a table key. Integral floats are normalized to
/// integers so that `t[1]` and `t[1.0]` are the same entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum TableKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(Arc<str>),
    Table(TableRef),
    Function(Callable),
    Coroutine(CoroutineRef),
    Task(AsyncTask),
}

impl TableKey {
    fn new(value: &Value) -> RuntimeResult<Self> {
        Ok(match value {
            Value::Nil => return Err(RuntimeError::message("table index is nil")),
            Value::Bool(b) => TableKey::Bool(*b),
            Value::Int(i) => TableKey::Int(*i),
            Value::Float(x) if x.is_nan() => {
                return Err(RuntimeError::message("table index is NaN"));
            }
            Value::Float(x) if x.fract() == 0.0 && x.abs() < i64::MAX as f64 => {
                TableKey::Int(*x as i64)
            }
            Value::Float(x) => TableKey::Float(x.to_bits()),
            Value::Str(s) => TableKey::Str(s.clone()),
            Value::Table(t) => TableKey::Table(t.clone()),
            Value::Function(c) => TableKey::Function(*c),
            Value::Coroutine(c) => TableKey::Coroutine(c.clone()),
            Value::Task(t) => TableKey::Task(t.clone()),
        })
    }
}

#[derive(Debug, Default)]
pub struct Table {
    entries: HashMap<TableKey, Value>,
    metatable: Option<TableRef>,
}

/// Shared handle to a table.
#[derive(Clone, Default)]
pub struct TableRef(Arc<Mutex<Table>>);

impl fmt::Debug for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableRef({:p})", Arc::as_ptr(&self.0))
    }
}

impl TableRef {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw read; nil for missing keys.
    pub fn get(&self, key: &Value) -> Value {
        match TableKey::new(key) {
            Ok(key) => self.lock().entries.get(&key).cloned().unwrap_or(Value::Nil),
            Err(_) => Value::Nil,
        }
    }

    /// Raw write; assigning nil removes the entry.
    pub fn set(&self, key: &Value, value: Value) -> RuntimeResult<()> {
        let key = TableKey::new(key)?;
        let mut table = self.lock();
        if value.is_nil() {
            table.entries.remove(&key);
        } else {
            table.entries.insert(key, value);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.lock().metatable.clone()
    }

    pub fn set_metatable(&self, metatable: Option<TableRef>) {
        self.lock().metatable = metatable;
    }
}

impl PartialEq for TableRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TableRef {}

impl Hash for TableRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_float_keys_alias_integers() {
        let t = TableRef::new();
        t.set(&Value::Int(1), Value::from("one")).unwrap();
        assert_eq!(t.get(&Value::Float(1.0)), Value::from("one"));
        t.set(&Value::Float(1.0), Value::Nil).unwrap();
        assert!(t.is_empty());
    }

    #[test]
    fn nil_and_nan_keys_are_rejected() {
        let t = TableRef::new();
        assert!(t.set(&Value::Nil, Value::Int(1)).is_err());
        assert!(t.set(&Value::Float(f64::NAN), Value::Int(1)).is_err());
        assert_eq!(t.get(&Value::Nil), Value::Nil);
    }

    #[test]
    fn tables_compare_by_identity() {
        let a = Value::table();
        let b = Value::table();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::from("2"), Value::Int(2));
    }

    #[test]
    fn display_matches_script_conventions() {
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(0.5).to_string(), "0.5");
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(
            Value::Function(Callable::Builtin(Builtin::Pcall)).to_string(),
            "function: builtin: pcall"
        );
    }

    #[test]
    fn metamethods_come_from_the_metatable() {
        let mt = TableRef::new();
        mt.set(&Value::from("__add"), Value::Function(Callable::Builtin(Builtin::Error)))
            .unwrap();
        let t = TableRef::new();
        t.set_metatable(Some(mt));
        let value = Value::Table(t);
        assert!(value.metamethod("__add").is_some());
        assert!(value.metamethod("__sub").is_none());
        assert!(Value::Int(1).metamethod("__add").is_none());
    }
}
