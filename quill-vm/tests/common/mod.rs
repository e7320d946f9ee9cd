//! Shared helpers for the integration suites

#![allow(dead_code)]

use anyhow::Result;
use parking_lot::Mutex;
use quill_vm::{Engine, Vm, VmBuilder};
use std::io;
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Routes engine logs to the test harness; set `RUST_LOG=trace` to see them
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// In-memory sink for `print`/`println`
#[derive(Clone, Default)]
pub struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An engine over `builder` with balance checks on and output captured
pub fn engine_with(builder: VmBuilder) -> Result<(Engine, Output)> {
    init_tracing();
    let out = Output::default();
    let vm = builder
        .with_balance_check(true)
        .with_output(Box::new(out.clone()))
        .build()?;
    Ok((Engine::with_vm(vm), out))
}

pub fn engine() -> Result<(Engine, Output)> {
    engine_with(Vm::builder())
}

/// Runs `source` and renders its result
pub fn run(source: &str) -> Result<String> {
    let (engine, _) = engine()?;
    Ok(engine.run(source)?.to_string())
}

/// Runs `source` and returns what it printed
pub fn run_output(source: &str) -> Result<String> {
    let (engine, out) = engine()?;
    engine.run(source)?;
    Ok(out.text())
}
