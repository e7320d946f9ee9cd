//! Source-to-result convenience layer

use crate::compiler::{CompileErrors, Compiler, CompilerOptions};
use crate::error::VmError;
use crate::scope::Scope;
use crate::value::Value;
use crate::vm::Vm;
use quill_bytecode::Program;
use quill_parser::ParseError;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("compile error:\n{0}")]
    Compile(#[from] CompileErrors),

    #[error(transparent)]
    Runtime(#[from] VmError),
}

impl EngineError {
    /// The script panic, when the failure is one
    pub fn as_panic(&self) -> Option<&crate::error::VmPanic> {
        match self {
            EngineError::Runtime(e) => e.as_panic(),
            _ => None,
        }
    }
}

/// Parses, compiles and runs source text on one VM
pub struct Engine {
    vm: Vm,
    options: CompilerOptions,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_vm(Vm::new())
    }

    pub fn with_vm(vm: Vm) -> Self {
        Self {
            vm,
            options: CompilerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn compile(&self, source: &str) -> Result<Program, EngineError> {
        self.compile_named("main", source)
    }

    /// Compiles with a file name used in panic traces
    pub fn compile_named(&self, name: &str, source: &str) -> Result<Program, EngineError> {
        let ast = quill_parser::parse(source)?;
        let mut options = self.options.clone();
        if options.strict_symbols {
            options.externs.extend(self.vm.global_names());
        }
        let program = Compiler::new(options)
            .with_source(name, source)
            .compile(&ast)?;
        Ok(program)
    }

    /// Runs source in a fresh root scope and returns the value of the
    /// last expression statement, or the value of a top-level `return`
    pub fn run(&self, source: &str) -> Result<Value, EngineError> {
        let program = self.compile(source)?;
        Ok(self.vm.run(&program)?)
    }

    /// Runs source in `scope`, so top-level variables stay inspectable
    pub fn run_in(&self, source: &str, scope: &Arc<Scope>) -> Result<Value, EngineError> {
        let program = self.compile(source)?;
        Ok(self.vm.run_in(&program, scope)?)
    }

    pub fn run_program(&self, program: &Program) -> Result<Value, EngineError> {
        Ok(self.vm.run(program)?)
    }

    /// Reads a top-level variable of the last program run in `scope`
    pub fn eval(&self, scope: &Arc<Scope>, expr: &str) -> Result<Value, EngineError> {
        self.vm.eval(scope, expr)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
