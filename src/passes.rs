//! # IR Passes
//!
//! Pass trait and pass manager. Passes run per function and report whether
//! they changed anything; the manager runs them in sequence.

pub mod definite_init;

pub use definite_init::{DefiniteInit, DefiniteInitConfig, DefiniteInitStats};

use crate::Function;

/// A transformation or analysis over a single function
pub trait IrPass {
    /// Apply this pass to a function; returns true if it was modified
    fn run(&mut self, function: &mut Function) -> bool;

    /// Name of this pass for debugging
    fn name(&self) -> &'static str;
}

/// Runs multiple passes in sequence
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn IrPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Adds a pass to the manager
    pub fn add_pass<P: IrPass + 'static>(mut self, pass: P) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Runs all passes on the function; returns true if any modified it
    pub fn run(&mut self, function: &mut Function) -> bool {
        let mut modified = false;
        for pass in &mut self.passes {
            if pass.run(function) {
                modified = true;
                log::debug!(
                    "pass '{}' modified function '{}'",
                    pass.name(),
                    function.name
                );
            }
        }
        modified
    }
}
