//! Programmatic construction of IR programs.
//!
//! The frontend is not part of this workspace, so embedders and tests build
//! programs directly:
//!
//! ```
//! use kestrel_ir::{ArithOp, ProgramBuilder, FunctionBuilder};
//!
//! let mut program = ProgramBuilder::new();
//! let mut main = FunctionBuilder::new("main", 0);
//! let a = main.int(40);
//! let b = main.int(2);
//! let sum = main.slot();
//! main.arith(ArithOp::Add, sum, a, b);
//! main.ret(&[sum]);
//! let id = program.add(main.finish());
//! program.set_main(id);
//! let program = program.finish().unwrap();
//! assert_eq!(program.functions.len(), 1);
//! ```

use cranelift_entity::EntityRef;
use derive_more::Display;

use crate::{ArithOp, Builtin, CompareOp, Constant, FunctionId, Inst, LabelId, Program, Proto, Slot};

#[derive(Debug, Display, PartialEq, Eq)]
pub enum BuildError {
    #[display("function {_0} was declared but never defined")]
    Undefined(String),
    #[display("program has no main function")]
    NoMain,
}

impl std::error::Error for BuildError {}

#[derive(Default)]
pub struct ProgramBuilder {
    functions: Vec<(String, Option<Proto>)>,
    main: Option<FunctionId>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for a function defined later, so that mutually
    /// recursive functions can reference each other.
    pub fn declare(&mut self, name: impl Into<String>) -> FunctionId {
        let id = FunctionId::new(self.functions.len());
        self.functions.push((name.into(), None));
        id
    }

    pub fn define(&mut self, id: FunctionId, proto: Proto) {
        self.functions[id.index()].1 = Some(proto);
    }

    pub fn add(&mut self, proto: Proto) -> FunctionId {
        let id = self.declare(proto.name.clone());
        self.define(id, proto);
        id
    }

    pub fn set_main(&mut self, id: FunctionId) {
        self.main = Some(id);
    }

    pub fn finish(self) -> Result<Program, BuildError> {
        let main = self.main.ok_or(BuildError::NoMain)?;
        let functions = self
            .functions
            .into_iter()
            .map(|(name, proto)| proto.ok_or(BuildError::Undefined(name)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Program { functions, main })
    }
}

pub struct FunctionBuilder {
    name: String,
    num_params: u32,
    num_slots: u32,
    is_vararg: bool,
    next_label: u32,
    body: Vec<Inst>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, num_params: u32) -> Self {
        Self {
            name: name.into(),
            num_params,
            num_slots: num_params,
            is_vararg: false,
            next_label: 0,
            body: Vec::new(),
        }
    }

    pub fn vararg(mut self) -> Self {
        self.is_vararg = true;
        self
    }

    pub fn param(&self, index: u32) -> Slot {
        assert!(index < self.num_params, "parameter {index} out of range");
        Slot::from_u32(index)
    }

    pub fn slot(&mut self) -> Slot {
        let slot = Slot::from_u32(self.num_slots);
        self.num_slots += 1;
        slot
    }

    pub fn label(&mut self) -> LabelId {
        let label = LabelId::from_u32(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn bind(&mut self, label: LabelId) {
        self.body.push(Inst::Label(label));
    }

    pub fn push(&mut self, inst: Inst) {
        self.body.push(inst);
    }

    /// Load `value` into a fresh slot.
    pub fn constant(&mut self, value: Constant) -> Slot {
        let dest = self.slot();
        self.load(dest, value);
        dest
    }

    pub fn int(&mut self, value: i64) -> Slot {
        self.constant(Constant::Int(value))
    }

    pub fn builtin(&mut self, builtin: Builtin) -> Slot {
        self.constant(Constant::Builtin(builtin))
    }

    pub fn function(&mut self, id: FunctionId) -> Slot {
        self.constant(Constant::Function(id))
    }

    pub fn load(&mut self, dest: Slot, value: Constant) {
        self.push(Inst::LoadConst { dest, value });
    }

    pub fn mov(&mut self, dest: Slot, src: Slot) {
        self.push(Inst::Move { dest, src });
    }

    pub fn not(&mut self, dest: Slot, src: Slot) {
        self.push(Inst::Not { dest, src });
    }

    pub fn arith(&mut self, op: ArithOp, dest: Slot, lhs: Slot, rhs: Slot) {
        self.push(Inst::Arith { op, dest, lhs, rhs });
    }

    pub fn compare(&mut self, op: CompareOp, dest: Slot, lhs: Slot, rhs: Slot) {
        self.push(Inst::Compare { op, dest, lhs, rhs });
    }

    pub fn new_table(&mut self, dest: Slot) {
        self.push(Inst::NewTable { dest });
    }

    pub fn get_index(&mut self, dest: Slot, table: Slot, key: Slot) {
        self.push(Inst::GetIndex { dest, table, key });
    }

    pub fn set_index(&mut self, table: Slot, key: Slot, value: Slot) {
        self.push(Inst::SetIndex { table, key, value });
    }

    pub fn vararg_at(&mut self, dest: Slot, index: u32) {
        self.push(Inst::Vararg { dest, index });
    }

    pub fn call(&mut self, target: Slot, args: &[Slot], results: &[Slot]) {
        self.push(Inst::Call {
            target,
            args: args.to_vec(),
            spread_varargs: false,
            results: results.to_vec(),
        });
    }

    pub fn call_spread(&mut self, target: Slot, args: &[Slot], results: &[Slot]) {
        self.push(Inst::Call {
            target,
            args: args.to_vec(),
            spread_varargs: true,
            results: results.to_vec(),
        });
    }

    pub fn tail_call(&mut self, target: Slot, args: &[Slot]) {
        self.push(Inst::TailCall {
            target,
            args: args.to_vec(),
            spread_varargs: false,
        });
    }

    pub fn ret(&mut self, values: &[Slot]) {
        self.push(Inst::Return {
            values: values.to_vec(),
            spread_varargs: false,
        });
    }

    pub fn ret_spread(&mut self, values: &[Slot]) {
        self.push(Inst::Return {
            values: values.to_vec(),
            spread_varargs: true,
        });
    }

    pub fn jump(&mut self, target: LabelId) {
        self.push(Inst::Jump(target));
    }

    pub fn jump_unless(&mut self, cond: Slot, target: LabelId) {
        self.push(Inst::JumpUnless { cond, target });
    }

    pub fn checkpoint(&mut self, ticks: u32) {
        self.push(Inst::Checkpoint { ticks });
    }

    pub fn finish(self) -> Proto {
        Proto {
            name: self.name,
            num_params: self.num_params,
            num_slots: self.num_slots,
            is_vararg: self.is_vararg,
            body: self.body,
        }
    }
}
