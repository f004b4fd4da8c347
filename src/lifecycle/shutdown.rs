//! Shutdown sequence
//!
//! Teardown runs at most once per process, in a fixed order:
//! business (cancel tasks) -> ui -> resources -> final. Each phase is
//! isolated, so a failure is logged and the next phase still runs. Only a
//! failure inside FINAL takes the emergency path.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow, bail};

use super::{ShutdownPhase, panic_message};

/// Stops application work during the BUSINESS phase
pub trait BusinessTeardown: Send + Sync {
    /// Refuse new work and signal cancellation to whatever is running
    fn stop_business(&self) -> Result<()>;
}

/// View-layer teardown hooks
pub trait UiTeardown: Send + Sync {
    /// Release window handles and listeners; must not touch application state
    fn release_ui(&self) -> Result<()>;

    fn close_main_window(&self) -> Result<()>;
}

/// Releases every managed external resource
pub trait ResourceLifecycle: Send + Sync {
    /// Returns whether every resource closed cleanly
    fn release_all(&self) -> bool;
}

/// Terminates the process
///
/// Injected so tests can observe the exit status instead of exiting.
pub trait ProcessExit: Send + Sync {
    fn exit(&self, code: i32);
}

/// Calls [`std::process::exit`]
#[derive(Debug, Default, Clone, Copy)]
pub struct StdProcessExit;

impl ProcessExit for StdProcessExit {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Result of a single phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Failed(String),
}

/// Per-phase outcomes of the shutdown that ran
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub reason: Option<String>,
    pub phases: Vec<(ShutdownPhase, PhaseOutcome)>,
}

impl ShutdownReport {
    pub fn outcome(&self, phase: ShutdownPhase) -> Option<&PhaseOutcome> {
        self.phases
            .iter()
            .find(|(candidate, _)| *candidate == phase)
            .map(|(_, outcome)| outcome)
    }

    pub fn ran(&self) -> Vec<ShutdownPhase> {
        self.phases.iter().map(|(phase, _)| *phase).collect()
    }
}

/// Drives the four-phase teardown exactly once
pub struct ShutdownOrchestrator {
    started: AtomicBool,
    completed: AtomicBool,
    phase: AtomicU8,
    business: Arc<dyn BusinessTeardown>,
    ui: Arc<dyn UiTeardown>,
    resources: Arc<dyn ResourceLifecycle>,
    process: Arc<dyn ProcessExit>,
    exit_on_complete: bool,
    report: Mutex<Option<ShutdownReport>>,
}

impl ShutdownOrchestrator {
    pub fn new(
        business: Arc<dyn BusinessTeardown>,
        ui: Arc<dyn UiTeardown>,
        resources: Arc<dyn ResourceLifecycle>,
        process: Arc<dyn ProcessExit>,
    ) -> Self {
        Self {
            started: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            phase: AtomicU8::new(ShutdownPhase::None.as_u8()),
            business,
            ui,
            resources,
            process,
            exit_on_complete: true,
            report: Mutex::new(None),
        }
    }

    /// When false, FINAL skips the process exit and the caller returns from
    /// `main` itself. The emergency exit is never skipped.
    pub fn exit_on_complete(mut self, exit: bool) -> Self {
        self.exit_on_complete = exit;
        self
    }

    /// Run the shutdown sequence; every call after the first is a no-op
    ///
    /// Safe to call from any thread, including error handlers.
    pub fn initiate(&self, reason: Option<&str>) {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::info!(
                target: "roster::shutdown",
                "Shutdown already in progress, ignoring request ({})",
                reason.unwrap_or("no reason given")
            );
            return;
        }

        log::info!(
            target: "roster::shutdown",
            "Shutdown initiated: {}",
            reason.unwrap_or("no reason given")
        );

        let mut report = ShutdownReport {
            reason: reason.map(str::to_string),
            phases: Vec::with_capacity(4),
        };

        report.phases.push((
            ShutdownPhase::Business,
            self.run_phase(ShutdownPhase::Business, || self.business.stop_business()),
        ));

        report.phases.push((
            ShutdownPhase::Ui,
            self.run_phase(ShutdownPhase::Ui, || self.ui.release_ui()),
        ));

        report.phases.push((
            ShutdownPhase::Resources,
            self.run_phase(ShutdownPhase::Resources, || {
                if !self.resources.release_all() {
                    bail!("Some resources did not close cleanly");
                }
                Ok(())
            }),
        ));

        self.set_phase(ShutdownPhase::Final);
        let final_result = match panic::catch_unwind(AssertUnwindSafe(|| self.finish(&mut report))) {
            Ok(result) => result,
            Err(payload) => Err(anyhow!("FINAL panicked: {}", panic_message(payload.as_ref()))),
        };

        if let Err(err) = final_result {
            self.emergency(report, err);
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Outcomes of the sequence, once FINAL or the emergency path has
    /// recorded them
    pub fn report(&self) -> Option<ShutdownReport> {
        self.report.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
        log::debug!(target: "roster::shutdown", "Entering phase {}", phase);
    }

    fn run_phase<F>(&self, phase: ShutdownPhase, body: F) -> PhaseOutcome
    where
        F: FnOnce() -> Result<()>,
    {
        self.set_phase(phase);
        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(())) => PhaseOutcome::Completed,
            Ok(Err(err)) => {
                log::error!(target: "roster::shutdown", "Phase {} failed: {:#}", phase, err);
                PhaseOutcome::Failed(format!("{:#}", err))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!(target: "roster::shutdown", "Phase {} panicked: {}", phase, message);
                PhaseOutcome::Failed(message)
            }
        }
    }

    fn finish(&self, report: &mut ShutdownReport) -> Result<()> {
        self.ui.close_main_window()?;

        report.phases.push((ShutdownPhase::Final, PhaseOutcome::Completed));
        *self.report.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        self.completed.store(true, Ordering::Release);

        log::info!(target: "roster::shutdown", "Shutdown complete");
        log::logger().flush();

        if self.exit_on_complete {
            self.process.exit(0);
        }
        Ok(())
    }

    /// Last resort after FINAL failed: keep the partial report, one log
    /// attempt, then a failing exit
    fn emergency(&self, mut report: ShutdownReport, err: anyhow::Error) {
        self.set_phase(ShutdownPhase::Emergency);
        report.phases.retain(|(phase, _)| *phase != ShutdownPhase::Final);
        report
            .phases
            .push((ShutdownPhase::Final, PhaseOutcome::Failed(format!("{:#}", err))));
        *self.report.lock().unwrap_or_else(PoisonError::into_inner) = Some(report);

        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
            log::error!(target: "roster::shutdown", "Emergency exit after FINAL failed: {:#}", err);
            log::logger().flush();
        }));
        self.process.exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TaskRegistry;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeUi {
        fail_release: bool,
        fail_close: bool,
        released: AtomicUsize,
        closed: AtomicUsize,
    }

    impl UiTeardown for FakeUi {
        fn release_ui(&self) -> Result<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            if self.fail_release {
                bail!("listener still attached");
            }
            Ok(())
        }

        fn close_main_window(&self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                bail!("window already destroyed");
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeResources {
        calls: AtomicUsize,
    }

    impl ResourceLifecycle for FakeResources {
        fn release_all(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[derive(Default)]
    struct RecordedExit {
        codes: Mutex<Vec<i32>>,
    }

    impl ProcessExit for RecordedExit {
        fn exit(&self, code: i32) {
            self.codes.lock().unwrap().push(code);
        }
    }

    struct Fixture {
        orchestrator: Arc<ShutdownOrchestrator>,
        ui: Arc<FakeUi>,
        resources: Arc<FakeResources>,
        exit: Arc<RecordedExit>,
        tasks: Arc<TaskRegistry>,
    }

    fn fixture(ui: FakeUi) -> Fixture {
        let tasks = Arc::new(TaskRegistry::current().unwrap());
        let ui = Arc::new(ui);
        let resources = Arc::new(FakeResources::default());
        let exit = Arc::new(RecordedExit::default());
        let orchestrator = Arc::new(ShutdownOrchestrator::new(
            tasks.clone(),
            ui.clone(),
            resources.clone(),
            exit.clone(),
        ));
        Fixture {
            orchestrator,
            ui,
            resources,
            exit,
            tasks,
        }
    }

    #[tokio::test]
    async fn test_phases_run_in_order_and_exit_zero() {
        let f = fixture(FakeUi::default());
        f.orchestrator.initiate(Some("test"));

        let report = f.orchestrator.report().unwrap();
        assert_eq!(
            report.ran(),
            vec![
                ShutdownPhase::Business,
                ShutdownPhase::Ui,
                ShutdownPhase::Resources,
                ShutdownPhase::Final
            ]
        );
        assert_eq!(report.reason.as_deref(), Some("test"));
        assert!(f.orchestrator.is_completed());
        assert!(f.tasks.is_closed());
        assert_eq!(*f.exit.codes.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_second_initiate_is_a_no_op() {
        let f = fixture(FakeUi::default());
        f.orchestrator.initiate(None);
        f.orchestrator.initiate(Some("again"));

        assert_eq!(f.ui.released.load(Ordering::SeqCst), 1);
        assert_eq!(f.resources.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.exit.codes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ui_failure_does_not_stop_later_phases() {
        let f = fixture(FakeUi {
            fail_release: true,
            ..FakeUi::default()
        });
        f.orchestrator.initiate(None);

        let report = f.orchestrator.report().unwrap();
        assert!(matches!(report.outcome(ShutdownPhase::Ui), Some(PhaseOutcome::Failed(_))));
        assert_eq!(report.outcome(ShutdownPhase::Resources), Some(&PhaseOutcome::Completed));
        assert_eq!(f.resources.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*f.exit.codes.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_final_failure_takes_emergency_path() {
        let f = fixture(FakeUi {
            fail_close: true,
            ..FakeUi::default()
        });
        f.orchestrator.initiate(Some("crash"));

        assert_eq!(f.orchestrator.current_phase(), ShutdownPhase::Emergency);
        assert!(!f.orchestrator.is_completed());
        assert_eq!(*f.exit.codes.lock().unwrap(), vec![1]);

        let report = f.orchestrator.report().unwrap();
        assert_eq!(report.reason.as_deref(), Some("crash"));
        assert_eq!(report.outcome(ShutdownPhase::Resources), Some(&PhaseOutcome::Completed));
        assert!(matches!(
            report.outcome(ShutdownPhase::Final),
            Some(PhaseOutcome::Failed(message)) if message.contains("window already destroyed")
        ));
    }

    struct PanickingBusiness;

    impl BusinessTeardown for PanickingBusiness {
        fn stop_business(&self) -> Result<()> {
            panic!("task table corrupted");
        }
    }

    #[tokio::test]
    async fn test_business_failure_does_not_stop_later_phases() {
        let ui = Arc::new(FakeUi::default());
        let resources = Arc::new(FakeResources::default());
        let exit = Arc::new(RecordedExit::default());
        let orchestrator =
            ShutdownOrchestrator::new(Arc::new(PanickingBusiness), ui.clone(), resources.clone(), exit.clone());

        orchestrator.initiate(Some("quit"));

        let report = orchestrator.report().unwrap();
        assert!(matches!(
            report.outcome(ShutdownPhase::Business),
            Some(PhaseOutcome::Failed(message)) if message.contains("task table corrupted")
        ));
        assert_eq!(report.outcome(ShutdownPhase::Ui), Some(&PhaseOutcome::Completed));
        assert_eq!(report.outcome(ShutdownPhase::Resources), Some(&PhaseOutcome::Completed));
        assert_eq!(report.outcome(ShutdownPhase::Final), Some(&PhaseOutcome::Completed));
        assert_eq!(resources.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ui.closed.load(Ordering::SeqCst), 1);
        assert_eq!(*exit.codes.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_exit_can_be_left_to_caller() {
        let tasks = Arc::new(TaskRegistry::current().unwrap());
        let exit = Arc::new(RecordedExit::default());
        let orchestrator = ShutdownOrchestrator::new(
            tasks,
            Arc::new(FakeUi::default()),
            Arc::new(FakeResources::default()),
            exit.clone(),
        )
        .exit_on_complete(false);

        orchestrator.initiate(None);
        assert!(orchestrator.is_completed());
        assert_eq!(orchestrator.current_phase(), ShutdownPhase::Final);
        assert!(exit.codes.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_initiate_runs_sequence_once() {
        let f = fixture(FakeUi::default());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let orchestrator = f.orchestrator.clone();
                std::thread::spawn(move || orchestrator.initiate(Some(&format!("handler {}", i))))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(f.orchestrator.is_started());
        assert_eq!(f.ui.released.load(Ordering::SeqCst), 1);
        assert_eq!(f.ui.closed.load(Ordering::SeqCst), 1);
        assert_eq!(f.exit.codes.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_business_phase_cancels_running_work() {
        let f = fixture(FakeUi::default());
        let (tx, rx) = std::sync::mpsc::channel();
        f.tasks.launch("export", move |token| {
            while !token.is_cancelled() {
                std::thread::sleep(Duration::from_millis(2));
            }
            tx.send(()).ok();
            Ok(())
        });

        f.orchestrator.initiate(Some("quit"));
        tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .await
            .unwrap();
        assert!(f.tasks.is_empty());
    }
}
