//! # IR Modules
//!
//! A module is an ordered collection of functions. Passes iterate functions
//! in module order so diagnostics come out in a stable sequence.

use index_vec::IndexVec;

use crate::{Function, FunctionId, IrResult, PrettyPrint};

/// A compilation unit holding IR functions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    pub functions: IndexVec<FunctionId, Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function and returns its id
    pub fn push_function(&mut self, function: Function) -> FunctionId {
        self.functions.push(function)
    }

    pub fn get_function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id)
    }

    pub fn get_function_mut(&mut self, id: FunctionId) -> Option<&mut Function> {
        self.functions.get_mut(id)
    }

    /// Validates every function in the module
    pub fn validate(&self) -> IrResult<()> {
        for function in self.functions.iter() {
            function.validate()?;
        }
        Ok(())
    }
}

impl PrettyPrint for Module {
    fn pretty_print(&self, indent: usize) -> String {
        let mut result = String::new();
        for function in self.functions.iter() {
            result.push_str(&function.pretty_print(indent));
            result.push('\n');
        }
        result
    }
}
