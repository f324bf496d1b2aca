//! Recording fakes shared by the stage and orchestrator tests.

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use twinaos_core::{CommandConfig, InstallDefaults, InstallEvent};

use crate::actions::{ActionContext, CommandResult, CommandRunner, Operation};
use crate::events::EventSink;
use crate::paths::TargetLayout;

type Predicate = Box<dyn Fn(&Operation) -> bool + Send + Sync>;

/// Records every operation and answers from a script of failures and canned output.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<Operation>>,
    failures: Vec<Predicate>,
    responses: Vec<(String, String)>,
    gate: Option<Arc<Gate>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_when(mut self, predicate: impl Fn(&Operation) -> bool + Send + Sync + 'static) -> Self {
        self.failures.push(Box::new(predicate));
        self
    }

    pub fn respond(mut self, program: &str, stdout: &str) -> Self {
        self.responses.push((program.to_string(), stdout.to_string()));
        self
    }

    /// Block every call until the gate opens.
    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }
}

impl CommandRunner for FakeRunner {
    fn execute(&self, operation: &Operation, _timeout: Duration) -> CommandResult {
        if let Some(gate) = self.gate.as_ref() {
            gate.wait();
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(operation.clone());
        }
        if self.failures.iter().any(|predicate| predicate(operation)) {
            return CommandResult::failed(Some(1), "simulated failure");
        }
        let stdout = self
            .responses
            .iter()
            .find(|(program, _)| program == operation.program())
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();
        CommandResult::ok(stdout)
    }
}

#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        if let Ok(mut open) = self.open.lock() {
            *open = true;
        }
        self.changed.notify_all();
    }

    fn wait(&self) {
        let Ok(mut open) = self.open.lock() else {
            return;
        };
        while !*open {
            open = match self.changed.wait(open) {
                Ok(guard) => guard,
                Err(_) => return,
            };
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<InstallEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<InstallEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub fn progress_values(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                InstallEvent::Progress { percent, .. } => Some(percent),
                InstallEvent::Error { .. } => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                InstallEvent::Error { reason } => Some(reason),
                InstallEvent::Progress { .. } => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: InstallEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// A temporary target root plus the settings a stage context borrows.
pub struct Harness {
    _dir: TempDir,
    pub runner: Arc<FakeRunner>,
    pub layout: TargetLayout,
    pub install: InstallDefaults,
    pub commands: CommandConfig,
}

impl Harness {
    pub fn new(runner: FakeRunner) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("target");
        let install = InstallDefaults {
            target_root: root.clone(),
            ..InstallDefaults::default()
        };
        Self {
            _dir: dir,
            runner: Arc::new(runner),
            layout: TargetLayout::new(root),
            install,
            commands: CommandConfig::default(),
        }
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn context(&self) -> ActionContext<'_> {
        ActionContext {
            runner: self.runner.as_ref(),
            layout: &self.layout,
            install: &self.install,
            commands: &self.commands,
        }
    }
}
