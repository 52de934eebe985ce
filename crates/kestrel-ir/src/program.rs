use cranelift_entity::EntityRef;
use serde::{Deserialize, Serialize};

use crate::{FunctionId, Inst};

/// A function prototype after slot allocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Proto {
    pub name: String,
    /// Parameters occupy slots `0..num_params`.
    pub num_params: u32,
    pub num_slots: u32,
    #[serde(default)]
    pub is_vararg: bool,
    pub body: Vec<Inst>,
}

/// The closed set of functions making up one program.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<Proto>,
    pub main: FunctionId,
}

impl Program {
    pub fn function(&self, id: FunctionId) -> Option<&Proto> {
        self.functions.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (FunctionId, &Proto)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(index, proto)| (FunctionId::new(index), proto))
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
