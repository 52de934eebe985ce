use smallvec::SmallVec;

use crate::value::Value;

/// The argument/return buffer shared by one call.
///
/// Every dispatched operation leaves its results here; compiled code picks
/// them up with `Receive` right after the operation's resumption point. A
/// function returning with a tail call stores a call descriptor instead of
/// values, and the caller evaluates it without growing the stack.
#[derive(Debug, Default)]
pub struct ReturnBuffer {
    values: SmallVec<[Value; 4]>,
    call: Option<(Value, Vec<Value>)>,
}

impl ReturnBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_to(&mut self, values: impl IntoIterator<Item = Value>) {
        self.call = None;
        self.values.clear();
        self.values.extend(values);
    }

    pub fn set_single(&mut self, value: Value) {
        self.set_to([value]);
    }

    pub fn clear(&mut self) {
        self.set_to([]);
    }

    /// Replace the contents with a pending tail call.
    pub fn set_tail_call(&mut self, target: Value, args: Vec<Value>) {
        self.values.clear();
        self.call = Some((target, args));
    }

    pub fn is_call(&self) -> bool {
        self.call.is_some()
    }

    pub fn call_target(&self) -> Option<&Value> {
        self.call.as_ref().map(|(target, _)| target)
    }

    pub fn take_call(&mut self) -> Option<(Value, Vec<Value>)> {
        self.call.take()
    }

    /// The `index`-th value, nil when out of range.
    pub fn get(&self, index: usize) -> Value {
        self.values.get(index).cloned().unwrap_or(Value::Nil)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    pub fn prepend(&mut self, value: Value) {
        self.values.insert(0, value);
    }

    pub fn take_values(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.values).into_vec()
    }
}
