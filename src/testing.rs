//! Scripted in-memory isolation provider for tests.
//!
//! Every call is recorded so tests can assert the unit lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{IsolationProvider, OutputFrame, UnitConstraints, UnitExit, UnitHandle};
use crate::error::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create {
        image: String,
        argv: Vec<String>,
        constraints: UnitConstraints,
    },
    Start(UnitHandle),
    Wait(UnitHandle),
    Fetch(UnitHandle),
    Remove(UnitHandle),
}

#[derive(Debug, Clone, Copy)]
pub enum WaitBehavior {
    /// Exit with `status` after `after` of (tokio) time.
    Exit { after: Duration, status: i64 },
    /// The wait channel reports an error.
    Fail,
    /// Never exits.
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveBehavior {
    Ok,
    /// Succeeds after `Duration` of (tokio) time.
    Delayed(Duration),
    NotFound,
    Fail,
}

#[derive(Debug)]
pub struct ScriptedProvider {
    fail_create: bool,
    fail_start: bool,
    fail_fetch: bool,
    wait: WaitBehavior,
    remove: RemoveBehavior,
    frames: Vec<OutputFrame>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicUsize,
    removed: AtomicUsize,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self {
            fail_create: false,
            fail_start: false,
            fail_fetch: false,
            wait: WaitBehavior::Exit {
                after: Duration::ZERO,
                status: 0,
            },
            remove: RemoveBehavior::Ok,
            frames: Vec::new(),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
        }
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, frames: Vec<OutputFrame>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_stdout(self, text: &str) -> Self {
        self.with_output(vec![OutputFrame::Stdout(text.as_bytes().to_vec())])
    }

    pub fn with_wait(mut self, wait: WaitBehavior) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_remove(mut self, remove: RemoveBehavior) -> Self {
        self.remove = remove;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created_units(&self) -> Vec<UnitHandle> {
        (0..self.next_id.load(Ordering::SeqCst))
            .map(|n| UnitHandle::new(format!("unit-{n}")))
            .collect()
    }

    pub fn create_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create { .. }))
            .count()
    }

    pub fn removals_of(&self, unit: &UnitHandle) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Remove(u) if u == unit))
            .count()
    }

    /// Removals that ran to completion and succeeded.
    pub fn completed_removals(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Fetch(_)))
            .count()
    }
}

#[async_trait]
impl IsolationProvider for ScriptedProvider {
    async fn create_unit(
        &self,
        image: &str,
        argv: &[String],
        constraints: &UnitConstraints,
    ) -> Result<UnitHandle, ProviderError> {
        self.record(Call::Create {
            image: image.to_string(),
            argv: argv.to_vec(),
            constraints: constraints.clone(),
        });
        if self.fail_create {
            return Err(ProviderError::Connect("connection refused".to_string()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(UnitHandle::new(format!("unit-{n}")))
    }

    async fn start_unit(&self, unit: &UnitHandle) -> Result<(), ProviderError> {
        self.record(Call::Start(unit.clone()));
        if self.fail_start {
            return Err(ProviderError::Start {
                unit: unit.to_string(),
                message: "image not found".to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for_exit(&self, unit: &UnitHandle) -> Result<UnitExit, ProviderError> {
        self.record(Call::Wait(unit.clone()));
        match self.wait {
            WaitBehavior::Exit { after, status } => {
                tokio::time::sleep(after).await;
                Ok(UnitExit {
                    status_code: status,
                })
            }
            WaitBehavior::Fail => Err(ProviderError::Wait {
                unit: unit.to_string(),
                message: "event stream closed".to_string(),
            }),
            WaitBehavior::Hang => std::future::pending().await,
        }
    }

    async fn fetch_output(&self, unit: &UnitHandle) -> Result<Vec<OutputFrame>, ProviderError> {
        self.record(Call::Fetch(unit.clone()));
        if self.fail_fetch {
            return Err(ProviderError::Fetch {
                unit: unit.to_string(),
                message: "log driver unavailable".to_string(),
            });
        }
        Ok(self.frames.clone())
    }

    async fn force_remove(&self, unit: &UnitHandle) -> Result<(), ProviderError> {
        self.record(Call::Remove(unit.clone()));
        match self.remove {
            RemoveBehavior::Ok => {
                self.removed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            RemoveBehavior::Delayed(after) => {
                tokio::time::sleep(after).await;
                self.removed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            RemoveBehavior::NotFound => Err(ProviderError::NotFound(unit.to_string())),
            RemoveBehavior::Fail => Err(ProviderError::Remove {
                unit: unit.to_string(),
                message: "device busy".to_string(),
            }),
        }
    }
}
