//! In-memory stand-ins for processes and stop hooks used by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;

use super::error::ShutdownError;
use super::process::Terminate;
use super::shutdown::StopHook;

/// Shared, ordered record of which fakes were stopped.
#[derive(Clone, Default)]
pub struct TerminationLog(Arc<Mutex<Vec<String>>>);

impl TerminationLog {
    pub fn push(&self, name: &str) {
        self.0.lock().unwrap().push(name.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Clone, Default)]
pub struct FakeProcess {
    count: Arc<AtomicUsize>,
    log: Option<(TerminationLog, String)>,
    fail: bool,
    delay: Duration,
}

impl FakeProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logged(log: &TerminationLog, name: &str) -> Self {
        Self {
            log: Some((log.clone(), name.to_string())),
            ..Self::default()
        }
    }

    pub fn failing(log: &TerminationLog, name: &str) -> Self {
        Self {
            fail: true,
            ..Self::logged(log, name)
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn terminations(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Terminate for FakeProcess {
    fn terminate(&self) -> BoxFuture<'_, Result<(), ShutdownError>> {
        Box::pin(async move {
            self.count.fetch_add(1, Ordering::SeqCst);
            if let Some((log, name)) = &self.log {
                log.push(name);
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                let name = self.log.as_ref().map(|(_, n)| n.clone()).unwrap_or_default();
                return Err(ShutdownError::Terminate {
                    name,
                    message: "simulated failure".into(),
                });
            }
            Ok(())
        })
    }
}

pub struct FakeHook {
    name: String,
    log: TerminationLog,
    fail: bool,
}

impl FakeHook {
    pub fn new(log: &TerminationLog, name: &str) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            fail: false,
        }
    }

    pub fn failing(log: &TerminationLog, name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(log, name)
        }
    }
}

impl StopHook for FakeHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), ShutdownError>> {
        Box::pin(async move {
            self.log.push(&format!("hook:{}", self.name));
            if self.fail {
                return Err(ShutdownError::Hook {
                    name: self.name.clone(),
                    message: "simulated failure".into(),
                });
            }
            Ok(())
        })
    }
}
