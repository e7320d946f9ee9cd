//! VM configuration and builder

use crate::builtins;
use crate::debug::DebugHook;
use crate::native::NativeFunction;
use crate::operators::Dialect;
use crate::tasks::CancelToken;
use crate::value::Value;
use crate::vm::Vm;
use anyhow::{bail, Result};
use rustc_hash::FxHashMap;
use std::io::Write;
use std::sync::Arc;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub dialect: Dialect,
    /// Silences diagnostics about unresolved globals
    pub sandbox: bool,
    /// Emit a `trace!` event per instruction
    pub trace: bool,
    pub max_call_depth: usize,
    /// Verify stack, iterator and scope balance when the top level finishes
    pub check_balance: bool,
    /// Wait for outstanding `go` units before `run` returns
    pub wait_on_exit: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Quill,
            sandbox: false,
            trace: false,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            check_balance: cfg!(debug_assertions),
            wait_on_exit: true,
        }
    }
}

/// Builder for constructing a VM with injected natives, globals and hooks
pub struct VmBuilder {
    config: VmConfig,
    natives: FxHashMap<String, Value>,
    globals: FxHashMap<String, Value>,
    hook: Option<Arc<dyn DebugHook>>,
    cancel: Option<CancelToken>,
    output: Option<Box<dyn Write + Send>>,
    prelude: bool,
}

impl VmBuilder {
    pub fn new() -> Self {
        Self {
            config: VmConfig::default(),
            natives: FxHashMap::default(),
            globals: FxHashMap::default(),
            hook: None,
            cancel: None,
            output: None,
            prelude: true,
        }
    }

    pub fn with_config(mut self, config: VmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.config.dialect = dialect;
        self
    }

    /// Register a host function under its own name
    pub fn with_native(mut self, native: NativeFunction) -> Self {
        let name = native.name().to_string();
        self.natives.insert(name, Value::Native(Arc::new(native)));
        self
    }

    /// Add a read-only global value
    pub fn with_global(mut self, name: &str, value: Value) -> Self {
        self.globals.insert(name.to_string(), value);
        self
    }

    /// Skip the built-in `len`, `append`, `print` and friends
    pub fn without_prelude(mut self) -> Self {
        self.prelude = false;
        self
    }

    pub fn with_sandbox_mode(mut self, sandbox: bool) -> Self {
        self.config.sandbox = sandbox;
        self
    }

    pub fn with_trace_mode(mut self, trace: bool) -> Self {
        self.config.trace = trace;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.config.max_call_depth = depth;
        self
    }

    pub fn with_balance_check(mut self, check: bool) -> Self {
        self.config.check_balance = check;
        self
    }

    pub fn with_wait_on_exit(mut self, wait: bool) -> Self {
        self.config.wait_on_exit = wait;
        self
    }

    pub fn with_debug_hook(mut self, hook: Arc<dyn DebugHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Share a cancellation token with the host
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Redirect `print`/`println` output
    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn build(self) -> Result<Vm> {
        if self.config.max_call_depth == 0 {
            bail!("max call depth must be at least 1");
        }
        let mut natives = if self.prelude {
            builtins::prelude()
        } else {
            FxHashMap::default()
        };
        // embedder natives override prelude entries of the same name
        natives.extend(self.natives);
        if let Some(name) = self.globals.keys().find(|name| natives.contains_key(*name)) {
            bail!("global `{}` collides with a native function", name);
        }
        let output = self
            .output
            .unwrap_or_else(|| Box::new(std::io::stdout()));
        Ok(Vm::from_parts(
            self.config,
            natives,
            self.globals,
            self.hook,
            self.cancel.unwrap_or_default(),
            output,
        ))
    }
}

impl Default for VmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
