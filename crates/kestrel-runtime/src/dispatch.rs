//! Dispatched operations.
//!
//! Arithmetic, comparison, indexing and calls first try the primitive
//! behaviour and otherwise fall back to a metamethod. A metamethod is an
//! ordinary call, so it may suspend; its frames then end up on the signal
//! below the frame of the compiled function that performed the operation.
//! Results are left in the return buffer.

use kestrel_ir::{ArithOp, CompareOp};

use crate::builtins;
use crate::context::ExecutionContext;
use crate::errors::{RuntimeError, RuntimeResult};
use crate::exec;
use crate::signal::{ExecResult, Flow};
use crate::value::{Callable, Value};

/// Bound on `__index` and `__call` chains.
const MAX_META_CHAIN: usize = 100;

pub fn arith(ctx: &mut ExecutionContext<'_>, op: ArithOp, lhs: Value, rhs: Value) -> ExecResult {
    if let Some(result) = arith_raw(op, &lhs, &rhs)? {
        ctx.rbuf.set_single(result);
        return Ok(Flow::Completed);
    }
    let handler = lhs
        .metamethod(op.metamethod())
        .or_else(|| rhs.metamethod(op.metamethod()));
    match handler {
        Some(handler) => call(ctx, handler, vec![lhs, rhs]),
        None => {
            let culprit = if op == ArithOp::Concat {
                if is_concatable(&lhs) { &rhs } else { &lhs }
            } else if lhs.as_float().is_some() {
                &rhs
            } else {
                &lhs
            };
            let verb = if op == ArithOp::Concat {
                "concatenate"
            } else {
                "perform arithmetic on"
            };
            Err(RuntimeError::message(format_args!(
                "attempt to {verb} a {} value",
                culprit.type_name()
            )))
        }
    }
}

fn is_concatable(value: &Value) -> bool {
    matches!(value, Value::Str(_) | Value::Int(_) | Value::Float(_))
}

/// Primitive arithmetic. `Ok(None)` means the operands need a metamethod.
pub fn arith_raw(op: ArithOp, lhs: &Value, rhs: &Value) -> RuntimeResult<Option<Value>> {
    match (op, lhs, rhs) {
        (ArithOp::Concat, _, _) => Ok((is_concatable(lhs) && is_concatable(rhs))
            .then(|| Value::from(format!("{lhs}{rhs}")))),
        (_, Value::Int(a), Value::Int(b)) => int_arith(op, *a, *b).map(Some),
        _ => Ok(lhs
            .as_float()
            .zip(rhs.as_float())
            .map(|(a, b)| float_arith(op, a, b))),
    }
}

fn int_arith(op: ArithOp, a: i64, b: i64) -> RuntimeResult<Value> {
    Ok(match op {
        ArithOp::Add => Value::Int(a.wrapping_add(b)),
        ArithOp::Sub => Value::Int(a.wrapping_sub(b)),
        ArithOp::Mul => Value::Int(a.wrapping_mul(b)),
        ArithOp::Div => Value::Float(a as f64 / b as f64),
        ArithOp::Mod => {
            if b == 0 {
                return Err(RuntimeError::message("attempt to perform 'n%0'"));
            }
            let r = a.wrapping_rem(b);
            Value::Int(if r != 0 && (r ^ b) < 0 { r + b } else { r })
        }
        ArithOp::Concat => Value::from(format!("{a}{b}")),
    })
}

fn float_arith(op: ArithOp, a: f64, b: f64) -> Value {
    match op {
        ArithOp::Add => Value::Float(a + b),
        ArithOp::Sub => Value::Float(a - b),
        ArithOp::Mul => Value::Float(a * b),
        ArithOp::Div => Value::Float(a / b),
        ArithOp::Mod => Value::Float(a - (a / b).floor() * b),
        ArithOp::Concat => Value::from(format!("{}{}", Value::Float(a), Value::Float(b))),
    }
}

pub fn compare(
    ctx: &mut ExecutionContext<'_>,
    op: CompareOp,
    lhs: Value,
    rhs: Value,
) -> ExecResult {
    let primitive = match op {
        CompareOp::Eq => {
            if lhs == rhs {
                Some(true)
            } else if matches!((&lhs, &rhs), (Value::Table(_), Value::Table(_))) {
                None
            } else {
                Some(false)
            }
        }
        CompareOp::Lt | CompareOp::Le => order(op, &lhs, &rhs),
    };
    if let Some(result) = primitive {
        ctx.rbuf.set_single(Value::Bool(result));
        return Ok(Flow::Completed);
    }

    let handler = lhs
        .metamethod(op.metamethod())
        .or_else(|| rhs.metamethod(op.metamethod()));
    match (handler, op) {
        (Some(handler), _) => call(ctx, handler, vec![lhs, rhs]),
        (None, CompareOp::Eq) => {
            ctx.rbuf.set_single(Value::Bool(false));
            Ok(Flow::Completed)
        }
        (None, _) => Err(RuntimeError::message(format_args!(
            "attempt to compare {} with {}",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn order(op: CompareOp, lhs: &Value, rhs: &Value) -> Option<bool> {
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        _ => {
            let (a, b) = (lhs.as_float()?, rhs.as_float()?);
            match a.partial_cmp(&b) {
                Some(ordering) => Some(ordering),
                // NaN compares false both ways.
                None => return Some(false),
            }
        }
    }?;
    Some(match op {
        CompareOp::Lt => ordering.is_lt(),
        _ => ordering.is_le(),
    })
}

pub fn index(ctx: &mut ExecutionContext<'_>, target: Value, key: Value) -> ExecResult {
    let mut current = target;
    for _ in 0..MAX_META_CHAIN {
        let Value::Table(table) = &current else {
            return Err(RuntimeError::message(format_args!(
                "attempt to index a {} value",
                current.type_name()
            )));
        };
        let value = table.get(&key);
        if !value.is_nil() {
            ctx.rbuf.set_single(value);
            return Ok(Flow::Completed);
        }
        match current.metamethod("__index") {
            None => {
                ctx.rbuf.set_single(Value::Nil);
                return Ok(Flow::Completed);
            }
            Some(next @ Value::Table(_)) => current = next,
            Some(handler) => return call(ctx, handler, vec![current, key]),
        }
    }
    Err(RuntimeError::message("'__index' chain too long; possible loop"))
}

/// Raw store used by `SetIndex`.
pub fn raw_set(target: &Value, key: &Value, value: Value) -> RuntimeResult<()> {
    match target {
        Value::Table(table) => table.set(key, value),
        other => Err(RuntimeError::message(format_args!(
            "attempt to index a {} value",
            other.type_name()
        ))),
    }
}

/// Call `target` and evaluate any tail calls it leaves behind.
pub fn call(ctx: &mut ExecutionContext<'_>, target: Value, args: Vec<Value>) -> ExecResult {
    match invoke(ctx, target, args)? {
        Flow::Completed => evaluate_tail_calls(ctx),
        suspended => Ok(suspended),
    }
}

/// Run pending tail calls one after another until a callee returns values
/// or suspends. Each callee replaces its caller, so the stack never grows.
pub fn evaluate_tail_calls(ctx: &mut ExecutionContext<'_>) -> ExecResult {
    while let Some((target, args)) = ctx.rbuf.take_call() {
        match invoke(ctx, target, args)? {
            Flow::Completed => {}
            suspended => return Ok(suspended),
        }
    }
    Ok(Flow::Completed)
}

/// Invoke once, without evaluating tail calls.
fn invoke(ctx: &mut ExecutionContext<'_>, target: Value, mut args: Vec<Value>) -> ExecResult {
    let mut target = target;
    for _ in 0..MAX_META_CHAIN {
        match target {
            Value::Function(Callable::Compiled(id)) => return exec::invoke_compiled(ctx, id, args),
            Value::Function(Callable::Builtin(builtin)) => {
                return builtins::invoke(ctx, builtin, args);
            }
            other => {
                let Some(handler) = other.metamethod("__call") else {
                    return Err(RuntimeError::message(format_args!(
                        "attempt to call a {} value",
                        other.type_name()
                    )));
                };
                args.insert(0, other);
                target = handler;
            }
        }
    }
    Err(RuntimeError::message("'__call' chain too long; possible loop"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_stays_integral() {
        let add = arith_raw(ArithOp::Add, &Value::Int(2), &Value::Int(3)).unwrap();
        assert_eq!(add, Some(Value::Int(5)));
        let div = arith_raw(ArithOp::Div, &Value::Int(7), &Value::Int(2)).unwrap();
        assert!(matches!(div, Some(Value::Float(x)) if x == 3.5));
    }

    #[test]
    fn modulo_follows_the_divisor_sign() {
        let m = |a, b| arith_raw(ArithOp::Mod, &Value::Int(a), &Value::Int(b)).unwrap();
        assert_eq!(m(7, 3), Some(Value::Int(1)));
        assert_eq!(m(-7, 3), Some(Value::Int(2)));
        assert_eq!(m(7, -3), Some(Value::Int(-2)));
        assert!(arith_raw(ArithOp::Mod, &Value::Int(1), &Value::Int(0)).is_err());
    }

    #[test]
    fn concat_accepts_numbers() {
        let s = arith_raw(ArithOp::Concat, &Value::from("n="), &Value::Int(4)).unwrap();
        assert_eq!(s, Some(Value::from("n=4")));
        let t = arith_raw(ArithOp::Concat, &Value::table(), &Value::from("x")).unwrap();
        assert_eq!(t, None);
    }

    #[test]
    fn tables_need_metamethods() {
        assert_eq!(
            arith_raw(ArithOp::Add, &Value::table(), &Value::Int(1)).unwrap(),
            None
        );
        assert_eq!(order(CompareOp::Lt, &Value::table(), &Value::Int(1)), None);
        assert_eq!(order(CompareOp::Le, &Value::Int(1), &Value::Float(1.0)), Some(true));
        assert_eq!(order(CompareOp::Lt, &Value::from("a"), &Value::from("b")), Some(true));
    }
}
