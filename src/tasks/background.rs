use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SatchelConfig;

/// Card count used when auto-continuation fires before the user configures.
pub const DEFAULT_CARD_COUNT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackgroundTaskKind {
    Extracting,
    WaitingConfig,
    Generating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundTaskStatus {
    Running,
    Waiting,
    Completed,
    Failed,
}

/// The single long-running extraction → generation pipeline record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: Uuid,
    pub kind: BackgroundTaskKind,
    pub status: BackgroundTaskStatus,
    /// 0–100.
    pub progress: u8,
    pub extracted_text: Option<String>,
    pub card_count: u32,
    pub result_id: Option<Uuid>,
    pub error: Option<String>,
}

/// Timer delays, injectable so tests can drive them under a paused clock.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundTaskDelays {
    pub auto_continue: Duration,
    pub complete_clear: Duration,
    pub fail_clear: Duration,
}

impl Default for BackgroundTaskDelays {
    fn default() -> Self {
        Self {
            auto_continue: Duration::from_millis(5000),
            complete_clear: Duration::from_millis(1000),
            fail_clear: Duration::from_millis(3000),
        }
    }
}

impl BackgroundTaskDelays {
    pub fn from_config(config: &SatchelConfig) -> Self {
        Self {
            auto_continue: config.auto_continue_delay(),
            complete_clear: config.complete_clear_delay(),
            fail_clear: config.fail_clear_delay(),
        }
    }
}

type GenerationCallback = Arc<dyn Fn(&str, u32) + Send + Sync>;
type ConfigListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct MachineInner {
    task: Option<BackgroundTask>,
    /// Bumped by every timer-cancelling transition. Armed timers carry the
    /// epoch they were armed under and refuse to commit against a newer
    /// one, so a timer that slipped past `abort()` still cannot fire a
    /// stale transition.
    epoch: u64,
    timer: Option<JoinHandle<()>>,
    on_generate: Option<GenerationCallback>,
    config_listeners: HashMap<u64, ConfigListener>,
    next_listener: u64,
}

impl MachineInner {
    fn disarm_timer(&mut self) {
        self.epoch += 1;
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

/// State machine for the one mutually-exclusive background pipeline:
/// image text extraction → (optional wait for configuration) → generation.
///
/// A task in `WaitingConfig` auto-continues into generation after a fixed
/// delay unless the user intervenes; completed and failed tasks auto-clear
/// after a short display window. Must be used inside a tokio runtime (the
/// timers are spawned tasks).
#[derive(Clone)]
pub struct BackgroundTaskMachine {
    delays: BackgroundTaskDelays,
    inner: Arc<Mutex<MachineInner>>,
}

impl Default for BackgroundTaskMachine {
    fn default() -> Self {
        Self::new(BackgroundTaskDelays::default())
    }
}

impl BackgroundTaskMachine {
    pub fn new(delays: BackgroundTaskDelays) -> Self {
        Self {
            delays,
            inner: Arc::new(Mutex::new(MachineInner {
                task: None,
                epoch: 0,
                timer: None,
                on_generate: None,
                config_listeners: HashMap::new(),
                next_listener: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MachineInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the callback invoked when generation starts (auto-continue
    /// or explicit). Replaces any earlier registration.
    pub fn set_generation_callback(&self, f: impl Fn(&str, u32) + Send + Sync + 'static) {
        self.lock().on_generate = Some(Arc::new(f));
    }

    /// Subscribe to "user asked to configure" notifications.
    pub fn on_config_requested(&self, f: impl Fn() + Send + Sync + 'static) -> ListenerId {
        let mut inner = self.lock();
        let id = inner.next_listener;
        inner.next_listener += 1;
        inner.config_listeners.insert(id, Arc::new(f));
        ListenerId(id)
    }

    pub fn remove_config_listener(&self, id: ListenerId) {
        self.lock().config_listeners.remove(&id.0);
    }

    pub fn get_task(&self) -> Option<BackgroundTask> {
        self.lock().task.clone()
    }

    pub fn is_active(&self) -> bool {
        self.lock().task.is_some()
    }

    /// Begin a new pipeline. Returns false (and leaves the current task
    /// untouched) if one is already active.
    pub fn start_task(&self, kind: BackgroundTaskKind, card_count: Option<u32>) -> bool {
        let mut inner = self.lock();
        if inner.task.is_some() {
            log::debug!("background task already active, ignoring start");
            return false;
        }
        inner.disarm_timer();
        let task = BackgroundTask {
            id: Uuid::new_v4(),
            kind,
            status: BackgroundTaskStatus::Running,
            progress: 0,
            extracted_text: None,
            card_count: card_count.unwrap_or(DEFAULT_CARD_COUNT),
            result_id: None,
            error: None,
        };
        log::info!("background task {} started ({:?})", task.id, kind);
        inner.task = Some(task);
        true
    }

    /// Extraction finished: hold the text, wait for configuration, and arm
    /// the auto-continue timer. If nothing disarms it, generation starts
    /// with the default card count.
    pub fn set_extracted_text_and_wait(&self, text: impl Into<String>) {
        let mut inner = self.lock();
        inner.disarm_timer();
        let Some(task) = inner.task.as_mut() else {
            return;
        };
        task.kind = BackgroundTaskKind::WaitingConfig;
        task.status = BackgroundTaskStatus::Waiting;
        task.extracted_text = Some(text.into());

        let epoch = inner.epoch;
        let machine = self.clone();
        let delay = self.delays.auto_continue;
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            machine.auto_continue(epoch);
        }));
    }

    fn auto_continue(&self, armed_epoch: u64) {
        let fired = {
            let mut inner = self.lock();
            if inner.epoch != armed_epoch {
                // A transition got there first; this timer is stale.
                return;
            }
            inner.timer = None;
            let Some(task) = inner.task.as_mut() else {
                return;
            };
            if task.status != BackgroundTaskStatus::Waiting {
                return;
            }
            task.kind = BackgroundTaskKind::Generating;
            task.status = BackgroundTaskStatus::Running;
            task.card_count = DEFAULT_CARD_COUNT;
            let text = task.extracted_text.clone().unwrap_or_default();
            log::info!("background task {} auto-continuing into generation", task.id);
            inner.on_generate.clone().map(|cb| (cb, text))
        };
        if let Some((callback, text)) = fired {
            callback(&text, DEFAULT_CARD_COUNT);
        }
    }

    /// The user wants to configure before generation: disarm the
    /// auto-continue timer and tell listeners to open the config surface.
    pub fn request_config(&self) {
        let listeners: Vec<ConfigListener> = {
            let mut inner = self.lock();
            inner.disarm_timer();
            inner.config_listeners.values().cloned().collect()
        };
        for listener in listeners {
            listener();
        }
    }

    /// Explicit configuration done: move straight into generation.
    pub fn start_generation(&self, card_count: u32) {
        let fired = {
            let mut inner = self.lock();
            inner.disarm_timer();
            let Some(task) = inner.task.as_mut() else {
                return;
            };
            task.kind = BackgroundTaskKind::Generating;
            task.status = BackgroundTaskStatus::Running;
            task.card_count = card_count;
            let text = task.extracted_text.clone().unwrap_or_default();
            inner.on_generate.clone().map(|cb| (cb, text))
        };
        if let Some((callback, text)) = fired {
            callback(&text, card_count);
        }
    }

    /// Progress on the active task; no-op when none exists.
    pub fn update_progress(&self, progress: u8) {
        let mut inner = self.lock();
        if let Some(task) = inner.task.as_mut() {
            task.progress = progress.min(100);
        }
    }

    /// Mark the pipeline done. The task stays visible at 100% for the
    /// complete-clear delay, then clears itself.
    pub fn complete_task(&self, result_id: Option<Uuid>) {
        let mut inner = self.lock();
        inner.disarm_timer();
        let Some(task) = inner.task.as_mut() else {
            return;
        };
        task.status = BackgroundTaskStatus::Completed;
        task.progress = 100;
        task.result_id = result_id;
        log::info!("background task {} completed", task.id);
        self.arm_clear(&mut inner, self.delays.complete_clear);
    }

    /// Mark the pipeline failed. The error stays visible for the fail-clear
    /// delay so the user can read it, then clears itself.
    pub fn fail_task(&self, error: impl Into<String>) {
        let mut inner = self.lock();
        inner.disarm_timer();
        let Some(task) = inner.task.as_mut() else {
            return;
        };
        let error = error.into();
        task.status = BackgroundTaskStatus::Failed;
        task.error = Some(error.clone());
        log::warn!("background task {} failed: {}", task.id, error);
        self.arm_clear(&mut inner, self.delays.fail_clear);
    }

    /// Immediately drop the task and any pending timer. Valid in any state.
    pub fn clear_task(&self) {
        let mut inner = self.lock();
        inner.disarm_timer();
        inner.task = None;
    }

    fn arm_clear(&self, inner: &mut MachineInner, delay: Duration) {
        let epoch = inner.epoch;
        let machine = self.clone();
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = machine.lock();
            if inner.epoch == epoch {
                inner.timer = None;
                inner.task = None;
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn delays() -> BackgroundTaskDelays {
        BackgroundTaskDelays::default()
    }

    /// Recorded (text, card_count) pairs from the generation callback.
    fn record_generations(machine: &BackgroundTaskMachine) -> Arc<Mutex<Vec<(String, u32)>>> {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls2 = Arc::clone(&calls);
        machine.set_generation_callback(move |text, count| {
            calls2.lock().unwrap().push((text.to_string(), count));
        });
        calls
    }

    async fn past_auto_continue() {
        tokio::time::sleep(Duration::from_millis(5100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_active_keeps_original_task() {
        let machine = BackgroundTaskMachine::new(delays());
        assert!(machine.start_task(BackgroundTaskKind::Extracting, None));
        let original = machine.get_task().unwrap().id;
        assert!(!machine.start_task(BackgroundTaskKind::Extracting, Some(20)));
        assert_eq!(machine.get_task().unwrap().id, original);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_continue_fires_once_with_stored_text() {
        let machine = BackgroundTaskMachine::new(delays());
        let calls = record_generations(&machine);

        machine.start_task(BackgroundTaskKind::Extracting, None);
        machine.set_extracted_text_and_wait("chapter three notes");
        assert_eq!(machine.get_task().unwrap().status, BackgroundTaskStatus::Waiting);

        past_auto_continue().await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[("chapter three notes".to_string(), DEFAULT_CARD_COUNT)]);
        let task = machine.get_task().unwrap();
        assert_eq!(task.kind, BackgroundTaskKind::Generating);
        assert_eq!(task.status, BackgroundTaskStatus::Running);
        assert_eq!(task.card_count, DEFAULT_CARD_COUNT);
    }

    #[tokio::test(start_paused = true)]
    async fn request_config_blocks_auto_continue_until_explicit_start() {
        let machine = BackgroundTaskMachine::new(delays());
        let calls = record_generations(&machine);
        let notified = Arc::new(AtomicUsize::new(0));
        let notified2 = Arc::clone(&notified);
        machine.on_config_requested(move || {
            notified2.fetch_add(1, Ordering::SeqCst);
        });

        machine.start_task(BackgroundTaskKind::Extracting, None);
        machine.set_extracted_text_and_wait("kinetics summary");
        machine.request_config();
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        past_auto_continue().await;
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(machine.get_task().unwrap().status, BackgroundTaskStatus::Waiting);

        machine.start_generation(15);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[("kinetics summary".to_string(), 15)]);
    }

    #[tokio::test(start_paused = true)]
    async fn complete_shows_full_progress_then_auto_clears() {
        let machine = BackgroundTaskMachine::new(delays());
        machine.start_task(BackgroundTaskKind::Generating, Some(12));
        machine.update_progress(80);

        let result = Uuid::new_v4();
        machine.complete_task(Some(result));
        let task = machine.get_task().unwrap();
        assert_eq!(task.status, BackgroundTaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.result_id, Some(result));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(machine.get_task().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_message_until_auto_clear() {
        let machine = BackgroundTaskMachine::new(delays());
        machine.start_task(BackgroundTaskKind::Generating, None);
        machine.fail_task("model unavailable");

        let task = machine.get_task().unwrap();
        assert_eq!(task.status, BackgroundTaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("model unavailable"));

        // Still visible before the fail-clear delay elapses.
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(machine.get_task().is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(machine.get_task().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_task_disarms_pending_auto_continue() {
        let machine = BackgroundTaskMachine::new(delays());
        let calls = record_generations(&machine);

        machine.start_task(BackgroundTaskKind::Extracting, None);
        machine.set_extracted_text_and_wait("orphaned text");
        machine.clear_task();
        assert!(machine.get_task().is_none());

        past_auto_continue().await;
        assert!(calls.lock().unwrap().is_empty());
        assert!(machine.get_task().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_timer_does_not_wipe_a_newer_task() {
        let machine = BackgroundTaskMachine::new(delays());
        machine.start_task(BackgroundTaskKind::Generating, None);
        machine.complete_task(None);
        // Replace the task before the 1 s clear timer fires.
        machine.clear_task();
        machine.start_task(BackgroundTaskKind::Extracting, None);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        // The stale clear timer must not have removed the new task.
        let task = machine.get_task().expect("new task survives stale clear timer");
        assert_eq!(task.kind, BackgroundTaskKind::Extracting);
    }

    #[test]
    fn delays_come_from_config() {
        let config = SatchelConfig {
            auto_continue_ms: 100,
            complete_clear_ms: 20,
            fail_clear_ms: 50,
            ..Default::default()
        };
        let d = BackgroundTaskDelays::from_config(&config);
        assert_eq!(d.auto_continue, Duration::from_millis(100));
        assert_eq!(d.complete_clear, Duration::from_millis(20));
        assert_eq!(d.fail_clear, Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn update_progress_without_task_is_a_no_op() {
        let machine = BackgroundTaskMachine::new(delays());
        machine.update_progress(50);
        assert!(machine.get_task().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn removed_config_listener_is_not_notified() {
        let machine = BackgroundTaskMachine::new(delays());
        let notified = Arc::new(AtomicUsize::new(0));
        let notified2 = Arc::clone(&notified);
        let id = machine.on_config_requested(move || {
            notified2.fetch_add(1, Ordering::SeqCst);
        });
        machine.remove_config_listener(id);

        machine.start_task(BackgroundTaskKind::Extracting, None);
        machine.set_extracted_text_and_wait("text");
        machine.request_config();
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }
}
