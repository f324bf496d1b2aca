//! Run sequencing, progress emission, and ownership of the run state.
//!
//! One run at a time. `start` flips the state to running under the lock and
//! hands the pipeline to a dedicated thread; observers only ever see clones.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};
use twinaos_core::{
    CommandConfig, InstallConfig, InstallDefaults, InstallEvent, RunState, RunStatus, Stage,
    COMPLETE_MESSAGE, COMPLETE_PROGRESS,
};

use crate::actions::{run_stage, unmount_all, ActionContext, CommandRunner, MountPlan};
use crate::error::{StageError, StartError};
use crate::events::EventSink;
use crate::paths::TargetLayout;

/// Cheap to clone; all clones drive the same run state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<RunState>,
    /// Signalled whenever a run leaves `running`.
    settled: Condvar,
    runner: Arc<dyn CommandRunner>,
    sink: Arc<dyn EventSink>,
    layout: TargetLayout,
    install: InstallDefaults,
    commands: CommandConfig,
}

/// Handle to the worker thread of a started run.
pub struct RunHandle {
    worker: JoinHandle<()>,
}

impl RunHandle {
    /// Wait for the run to reach a terminal state.
    pub fn join(self) {
        if self.worker.join().is_err() {
            error!("installation worker panicked");
        }
    }
}

impl Orchestrator {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        sink: Arc<dyn EventSink>,
        install: InstallDefaults,
        commands: CommandConfig,
    ) -> Self {
        let layout = TargetLayout::new(install.target_root.clone());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RunState::default()),
                settled: Condvar::new(),
                runner,
                sink,
                layout,
                install,
                commands,
            }),
        }
    }

    pub fn snapshot(&self) -> RunState {
        self.inner.lock_state().clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_state().status == RunStatus::Running
    }

    /// Block until no run is active. Returns immediately when idle.
    pub fn wait_until_idle(&self) {
        let state = self.inner.lock_state();
        let _idle = self
            .inner
            .settled
            .wait_while(state, |state| state.status == RunStatus::Running)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Begin a run with an already validated configuration.
    pub fn start(&self, config: InstallConfig) -> Result<RunHandle, StartError> {
        if !self.inner.lock_state().begin() {
            warn!("installation already running; start rejected");
            return Err(StartError::AlreadyRunning);
        }
        info!(disk = %config.disk, mode = config.mode.as_str(), "installation started");

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("twinaos-install".to_string())
            .spawn(move || inner.execute(config));
        match spawned {
            Ok(worker) => Ok(RunHandle { worker }),
            Err(err) => {
                self.inner.settle(|state| {
                    state.fail(format!("failed to start installation worker: {err}"))
                });
                Err(StartError::Spawn(err))
            }
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, update: impl FnOnce(&mut RunState)) {
        update(&mut *self.lock_state());
        self.settled.notify_all();
    }

    fn context(&self) -> ActionContext<'_> {
        ActionContext {
            runner: self.runner.as_ref(),
            layout: &self.layout,
            install: &self.install,
            commands: &self.commands,
        }
    }

    fn execute(&self, config: InstallConfig) {
        let ctx = self.context();
        let mut plan = MountPlan::new();

        match self.run_pipeline(&ctx, &config, &mut plan) {
            Ok(()) => {
                self.settle(RunState::complete);
                info!(disk = %config.disk, "installation completed");
                self.sink.publish(InstallEvent::Progress {
                    percent: COMPLETE_PROGRESS,
                    message: COMPLETE_MESSAGE.to_string(),
                });
            }
            Err(err) => {
                // Finalize drains the plan itself; for earlier stages this is the only cleanup.
                if let Err(unmount) = unmount_all(&ctx, &mut plan) {
                    warn!(%unmount, "cleanup after failure left mounts behind");
                }
                let reason = err.to_string();
                error!(stage = %err.stage, %reason, "installation failed");
                self.settle(|state| state.fail(reason.clone()));
                self.sink.publish(InstallEvent::Error { reason });
            }
        }
    }

    fn run_pipeline(
        &self,
        ctx: &ActionContext,
        config: &InstallConfig,
        plan: &mut MountPlan,
    ) -> Result<(), StageError> {
        for stage in Stage::ORDERED {
            let progress = {
                let mut state = self.lock_state();
                state.enter_stage(stage);
                state.progress
            };
            info!(%stage, progress, "stage started");
            self.sink.publish(InstallEvent::Progress {
                percent: progress,
                message: stage.message().to_string(),
            });
            run_stage(stage, ctx, config, plan).map_err(|source| StageError { stage, source })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use twinaos_core::InstallRequest;

    use super::*;
    use crate::test_support::{FakeRunner, Gate, Harness, RecordingSink};

    fn config(mode: &str) -> InstallConfig {
        let request = InstallRequest {
            disk: "/dev/sda".to_string(),
            mode: mode.to_string(),
            username: "alice".to_string(),
            password: "p@ss".to_string(),
            ..InstallRequest::default()
        };
        InstallConfig::from_request(request, &InstallDefaults::default()).expect("valid")
    }

    fn orchestrator(harness: &Harness, sink: &Arc<RecordingSink>) -> Orchestrator {
        Orchestrator::new(
            harness.runner.clone(),
            sink.clone(),
            harness.install.clone(),
            harness.commands.clone(),
        )
    }

    fn run(harness: &Harness, mode: &str) -> (Orchestrator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(harness, &sink);
        orchestrator.start(config(mode)).expect("started").join();
        (orchestrator, sink)
    }

    fn unmount_targets(harness: &Harness) -> Vec<String> {
        harness
            .runner
            .calls()
            .iter()
            .filter(|op| op.program() == "umount")
            .flat_map(|op| op.arguments().to_vec())
            .collect()
    }

    #[test]
    fn successful_run_reports_every_checkpoint() {
        let harness = Harness::new(FakeRunner::new());
        let (orchestrator, sink) = run(&harness, "auto");

        assert_eq!(sink.progress_values(), vec![10, 30, 70, 90, 100]);
        assert!(sink.errors().is_empty());
        let state = orchestrator.snapshot();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.progress, 100);
        assert_eq!(state.stage, Some(Stage::Finalize));
        assert!(state.error.is_none());
        assert_eq!(unmount_targets(&harness).len(), 5);
    }

    #[test]
    fn manual_mode_fails_without_touching_the_disk() {
        let harness = Harness::new(FakeRunner::new());
        let (orchestrator, sink) = run(&harness, "manual");

        assert!(harness.runner.calls().is_empty());
        assert_eq!(sink.progress_values(), vec![10]);
        assert_eq!(
            sink.errors(),
            vec!["Partitioning failed: manual partitioning not implemented".to_string()]
        );
        let state = orchestrator.snapshot();
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.error.as_deref(), Some(sink.errors()[0].as_str()));
    }

    #[test]
    fn format_failure_stops_before_bootstrap() {
        let runner = FakeRunner::new().fail_when(|op| op.program() == "mkfs.ext4");
        let harness = Harness::new(runner);
        let (orchestrator, sink) = run(&harness, "auto");

        let programs: Vec<String> = harness
            .runner
            .calls()
            .iter()
            .map(|op| op.program().to_string())
            .collect();
        assert_eq!(programs.last().map(String::as_str), Some("mkfs.ext4"));
        assert!(!programs.iter().any(|p| p == "mount" || p == "debootstrap" || p == "chroot"));
        assert!(unmount_targets(&harness).is_empty());
        assert_eq!(sink.progress_values(), vec![10]);
        assert_eq!(sink.errors().len(), 1);
        assert!(sink.errors()[0].starts_with("Partitioning failed: mkfs.ext4 -F /dev/sda2 failed"));
        assert_eq!(orchestrator.snapshot().status, RunStatus::Failed);
    }

    #[test]
    fn bootloader_failure_unmounts_in_reverse() {
        let runner = FakeRunner::new().fail_when(|op| {
            op.program() == "chroot"
                && op
                    .arguments()
                    .iter()
                    .any(|arg| arg.ends_with("install_grub.sh"))
        });
        let harness = Harness::new(runner);
        let (orchestrator, sink) = run(&harness, "auto");

        let root = harness.root();
        let expected: Vec<String> = [
            root.join("sys"),
            root.join("proc"),
            root.join("dev"),
            root.join("boot/efi"),
            root.to_path_buf(),
        ]
        .iter()
        .map(|path| path.display().to_string())
        .collect();
        assert_eq!(unmount_targets(&harness), expected);
        assert_eq!(sink.progress_values(), vec![10, 30]);
        assert!(sink.errors()[0].starts_with("System installation failed:"));
        assert_eq!(orchestrator.snapshot().status, RunStatus::Failed);
    }

    #[test]
    fn second_start_while_running_is_rejected() {
        let gate = Gate::new();
        let harness = Harness::new(FakeRunner::new().gated(gate.clone()));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(&harness, &sink);

        let handle = orchestrator.start(config("auto")).expect("first start");
        let before = orchestrator.snapshot();
        assert_eq!(before.status, RunStatus::Running);
        assert!(matches!(
            orchestrator.start(config("auto")),
            Err(StartError::AlreadyRunning)
        ));
        assert_eq!(orchestrator.snapshot().started_at, before.started_at);

        gate.open();
        handle.join();
        assert_eq!(orchestrator.snapshot().status, RunStatus::Completed);
        assert_eq!(sink.progress_values(), vec![10, 30, 70, 90, 100]);
    }

    #[test]
    fn concurrent_starts_admit_exactly_one_run() {
        let gate = Gate::new();
        let harness = Harness::new(FakeRunner::new().gated(gate.clone()));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(&harness, &sink);

        let results: Vec<_> = (0..4)
            .map(|_| {
                let orchestrator = orchestrator.clone();
                thread::spawn(move || orchestrator.start(config("auto")))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().expect("starter thread"))
            .collect();

        let (started, rejected): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
        assert_eq!(started.len(), 1);
        assert!(rejected
            .iter()
            .all(|result| matches!(result, Err(StartError::AlreadyRunning))));

        gate.open();
        for handle in started.into_iter().flatten() {
            handle.join();
        }
        assert_eq!(orchestrator.snapshot().status, RunStatus::Completed);
    }

    #[test]
    fn wait_until_idle_returns_once_the_run_settles() {
        let gate = Gate::new();
        let harness = Harness::new(FakeRunner::new().gated(gate.clone()));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(&harness, &sink);
        orchestrator.wait_until_idle();

        let _handle = orchestrator.start(config("auto")).expect("started");
        let waiter = {
            let orchestrator = orchestrator.clone();
            thread::spawn(move || {
                orchestrator.wait_until_idle();
                orchestrator.snapshot()
            })
        };
        thread::sleep(std::time::Duration::from_millis(50));
        assert!(!waiter.is_finished());

        gate.open();
        let state = waiter.join().expect("waiter");
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(unmount_targets(&harness).len(), 5);
    }

    #[test]
    fn finished_run_can_be_started_again() {
        let runner = FakeRunner::new().fail_when(|op| op.program() == "wipefs");
        let harness = Harness::new(runner);
        let (orchestrator, _sink) = run(&harness, "auto");
        assert_eq!(orchestrator.snapshot().status, RunStatus::Failed);

        orchestrator.start(config("auto")).expect("restart").join();
        assert_eq!(orchestrator.snapshot().status, RunStatus::Failed);
        assert_eq!(
            harness
                .runner
                .calls()
                .iter()
                .filter(|op| op.program() == "wipefs")
                .count(),
            2
        );
    }

    #[test]
    fn password_never_reaches_events_or_command_lines() {
        let runner = FakeRunner::new().fail_when(|op| {
            op.arguments().iter().any(|arg| arg.ends_with("create_user.sh"))
        });
        let harness = Harness::new(runner);
        let (_orchestrator, sink) = run(&harness, "auto");

        assert_eq!(sink.errors().len(), 1);
        assert!(sink.errors()[0].starts_with("User creation failed:"));
        for event in sink.events() {
            assert!(!format!("{event:?}").contains("p@ss"));
        }
        assert!(harness
            .runner
            .command_lines()
            .iter()
            .all(|line| !line.contains("p@ss")));
    }
}
