//! Host functions callable from scripts

use crate::error::{VmError, VmResult};
use crate::tasks::CancelToken;
use crate::value::{FromValue, IntoValue, Value};
use crate::vm::{TaskState, Vm};
use std::fmt;

pub type NativeFn = dyn Fn(&mut NativeCall<'_>, Vec<Value>) -> VmResult<Value> + Send + Sync;

/// A named host function. `arity` of `None` accepts any argument count.
pub struct NativeFunction {
    name: String,
    arity: Option<usize>,
    func: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, arity: Option<usize>, func: F) -> Self
    where
        F: Fn(&mut NativeCall<'_>, Vec<Value>) -> VmResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity,
            func: Box::new(func),
        }
    }

    /// Accepts any number of arguments
    pub fn variadic<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut NativeCall<'_>, Vec<Value>) -> VmResult<Value> + Send + Sync + 'static,
    {
        Self::new(name, None, func)
    }

    pub fn fn0<R, F>(name: impl Into<String>, func: F) -> Self
    where
        R: IntoValue,
        F: Fn() -> R + Send + Sync + 'static,
    {
        Self::new(name, Some(0), move |_, _| func().into_value())
    }

    /// One typed argument, converted with [`FromValue`]
    pub fn fn1<A, R, F>(name: impl Into<String>, func: F) -> Self
    where
        A: FromValue,
        R: IntoValue,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self::new(name, Some(1), move |_, args| {
            let a = A::from_value(&args[0])?;
            func(a).into_value()
        })
    }

    pub fn fn2<A, B, R, F>(name: impl Into<String>, func: F) -> Self
    where
        A: FromValue,
        B: FromValue,
        R: IntoValue,
        F: Fn(A, B) -> R + Send + Sync + 'static,
    {
        Self::new(name, Some(2), move |_, args| {
            let a = A::from_value(&args[0])?;
            let b = B::from_value(&args[1])?;
            func(a, b).into_value()
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    pub fn invoke(&self, ctx: &mut NativeCall<'_>, args: Vec<Value>) -> VmResult<Value> {
        if let Some(n) = self.arity {
            if args.len() != n {
                return Err(VmError::panic(format!(
                    "{} expects {} arguments, got {}",
                    self.name,
                    n,
                    args.len()
                )));
            }
        }
        (self.func)(ctx, args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// What a native function sees of the running VM
pub struct NativeCall<'a> {
    pub(crate) vm: &'a Vm,
    pub(crate) task: &'a mut TaskState,
}

impl<'a> NativeCall<'a> {
    /// Calls a script or native function value on the current unit
    pub fn call(&mut self, callee: &Value, args: Vec<Value>) -> VmResult<Value> {
        self.vm.call_value(self.task, callee, args)
    }

    pub fn vm(&self) -> &Vm {
        self.vm
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.vm.cancel_token()
    }

    /// Writes to the VM's configured output
    pub fn write_output(&self, text: &str) -> VmResult<()> {
        self.vm.write_output(text)
    }

    pub fn truthy(&self, value: &Value) -> bool {
        self.vm.operators().truthy(value)
    }
}
