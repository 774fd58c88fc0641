//! In-crate mock collaborators for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;

use crate::audio::{
    AcquisitionError, AudioBackend, AudioContextHandle, AudioContextState, CaptureConstraints,
    CaptureStream, MediaInput,
};
use crate::classifier::{
    ClassifierEngine, ClassifierError, ListenOptions, ModelSource, Recognizer, ScoreCallback,
};
use crate::notify::{DeliveryChannel, NotificationOptions, NotificationPlatform, Permission};
use crate::reminders::Clock;
use crate::resilience::{WakeLockHandle, WakeLockProvider};

// --- Notifications ---

#[derive(Debug, Clone)]
pub struct ShownNotification {
    pub channel: DeliveryChannel,
    pub title: String,
    pub options: NotificationOptions,
}

pub struct MockNotifier {
    permission: Option<Permission>,
    prompt_answer: Mutex<Permission>,
    background: AtomicBool,
    failures_left: AtomicU32,
    show_calls: AtomicUsize,
    prompt_calls: AtomicUsize,
    shown: Mutex<Vec<ShownNotification>>,
}

impl MockNotifier {
    pub fn with_permission(permission: Option<Permission>) -> Self {
        Self {
            permission,
            prompt_answer: Mutex::new(Permission::Granted),
            background: AtomicBool::new(false),
            failures_left: AtomicU32::new(0),
            show_calls: AtomicUsize::new(0),
            prompt_calls: AtomicUsize::new(0),
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn granted() -> Self {
        Self::with_permission(Some(Permission::Granted))
    }

    pub fn set_prompt_answer(&self, answer: Permission) {
        *self.prompt_answer.lock() = answer;
    }

    pub fn set_background_channel(&self, available: bool) {
        self.background.store(available, Ordering::SeqCst);
    }

    pub fn fail_next_shows(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Every `show` call, failed ones included.
    pub fn show_calls(&self) -> usize {
        self.show_calls.load(Ordering::SeqCst)
    }

    pub fn prompt_calls(&self) -> usize {
        self.prompt_calls.load(Ordering::SeqCst)
    }

    /// Successfully shown notifications, in order.
    pub fn shown(&self) -> Vec<ShownNotification> {
        self.shown.lock().clone()
    }

    pub fn shown_titles(&self) -> Vec<String> {
        self.shown.lock().iter().map(|n| n.title.clone()).collect()
    }
}

impl NotificationPlatform for MockNotifier {
    fn current_permission(&self) -> Option<Permission> {
        self.permission
    }

    fn request_permission(&self) -> BoxFuture<'_, Permission> {
        async move {
            self.prompt_calls.fetch_add(1, Ordering::SeqCst);
            *self.prompt_answer.lock()
        }
        .boxed()
    }

    fn background_channel_available(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }

    fn show<'a>(
        &'a self,
        channel: DeliveryChannel,
        title: &'a str,
        options: &'a NotificationOptions,
    ) -> BoxFuture<'a, Result<(), String>> {
        async move {
            self.show_calls.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err("show failed".to_string());
            }
            self.shown.lock().push(ShownNotification {
                channel,
                title: title.to_string(),
                options: options.clone(),
            });
            Ok(())
        }
        .boxed()
    }
}

// --- Classifier ---

#[derive(Default)]
pub struct MockRecognizer {
    listening: AtomicBool,
    fail_listen: AtomicBool,
    listen_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    callback: Mutex<Option<ScoreCallback>>,
    last_options: Mutex<Option<ListenOptions>>,
}

impl MockRecognizer {
    pub fn listen_calls(&self) -> usize {
        self.listen_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<ListenOptions> {
        *self.last_options.lock()
    }

    pub fn fail_next_listen(&self) {
        self.fail_listen.store(true, Ordering::SeqCst);
    }

    /// Deliver one raw score array to the subscribed callback.
    pub fn emit(&self, scores: Vec<f32>) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(scores);
        }
    }
}

impl Recognizer for MockRecognizer {
    fn listen(
        &self,
        options: ListenOptions,
        callback: ScoreCallback,
    ) -> BoxFuture<'_, Result<(), ClassifierError>> {
        async move {
            self.listen_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_listen.swap(false, Ordering::SeqCst) {
                return Err(ClassifierError::Listen("mock listen failure".into()));
            }
            *self.callback.lock() = Some(callback);
            *self.last_options.lock() = Some(options);
            self.listening.store(true, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn stop_listening(&self) -> BoxFuture<'_, Result<(), ClassifierError>> {
        async move {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            *self.callback.lock() = None;
            self.listening.store(false, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MockEngine {
    failing: Mutex<Vec<String>>,
    created: Mutex<HashMap<String, Arc<MockRecognizer>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail loads whose base URL contains `fragment`.
    pub fn fail_for(&self, fragment: &str) {
        self.failing.lock().push(fragment.to_string());
    }

    pub fn recognizer(&self, fragment: &str) -> Option<Arc<MockRecognizer>> {
        self.created
            .lock()
            .iter()
            .find(|(url, _)| url.contains(fragment))
            .map(|(_, r)| Arc::clone(r))
    }
}

impl ClassifierEngine for MockEngine {
    fn create<'a>(
        &'a self,
        source: &'a ModelSource,
    ) -> BoxFuture<'a, Result<Arc<dyn Recognizer>, ClassifierError>> {
        async move {
            let url = source.base_url().to_string();
            if self.failing.lock().iter().any(|f| url.contains(f.as_str())) {
                return Err(ClassifierError::Load(format!("mock load failure: {url}")));
            }
            let recognizer = Arc::new(MockRecognizer::default());
            self.created.lock().insert(url, Arc::clone(&recognizer));
            Ok(recognizer as Arc<dyn Recognizer>)
        }
        .boxed()
    }
}

// --- Audio ---

#[derive(Default)]
struct BackendShared {
    fail_create: AtomicBool,
    fail_resume: AtomicBool,
    create_calls: AtomicUsize,
    resume_calls: AtomicUsize,
    close_calls: AtomicUsize,
    current: Mutex<Option<Arc<Mutex<AudioContextState>>>>,
}

#[derive(Default)]
pub struct MockAudioBackend {
    shared: Arc<BackendShared>,
}

impl MockAudioBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BackendShared::default()),
        }
    }

    pub fn fail_create(&self, fail: bool) {
        self.shared.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_resume(&self, fail: bool) {
        self.shared.fail_resume.store(fail, Ordering::SeqCst);
    }

    pub fn suspend_current(&self) {
        if let Some(state) = self.shared.current.lock().as_ref() {
            *state.lock() = AudioContextState::Suspended;
        }
    }

    pub fn create_calls(&self) -> usize {
        self.shared.create_calls.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> usize {
        self.shared.resume_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }
}

impl AudioBackend for MockAudioBackend {
    fn create_context(&self) -> Result<Box<dyn AudioContextHandle>, AcquisitionError> {
        self.shared.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_create.load(Ordering::SeqCst) {
            return Err(AcquisitionError::ContextUnavailable("mock create failure".into()));
        }
        let state = Arc::new(Mutex::new(AudioContextState::Running));
        *self.shared.current.lock() = Some(Arc::clone(&state));
        Ok(Box::new(MockContext {
            state,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MockContext {
    state: Arc<Mutex<AudioContextState>>,
    shared: Arc<BackendShared>,
}

impl AudioContextHandle for MockContext {
    fn state(&self) -> AudioContextState {
        *self.state.lock()
    }

    fn resume(&self) -> BoxFuture<'_, Result<(), AcquisitionError>> {
        async move {
            self.shared.resume_calls.fetch_add(1, Ordering::SeqCst);
            if self.shared.fail_resume.load(Ordering::SeqCst) {
                return Err(AcquisitionError::ContextUnavailable("mock resume failure".into()));
            }
            *self.state.lock() = AudioContextState::Running;
            Ok(())
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
            *self.state.lock() = AudioContextState::Closed;
        }
        .boxed()
    }

    fn connect(&self, capture: &dyn CaptureStream) -> Result<(), AcquisitionError> {
        if *self.state.lock() != AudioContextState::Running {
            return Err(AcquisitionError::ContextUnavailable("not running".into()));
        }
        if !capture.is_active() {
            return Err(AcquisitionError::StreamFailed("inactive".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockMediaInput {
    deny: AtomicBool,
    acquire_calls: AtomicUsize,
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl MockMediaInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// End the most recent stream as if the device went away.
    pub fn kill_current(&self) {
        if let Some(active) = self.current.lock().as_ref() {
            active.store(false, Ordering::SeqCst);
        }
    }

    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }
}

impl MediaInput for MockMediaInput {
    fn acquire<'a>(
        &'a self,
        _constraints: &'a CaptureConstraints,
    ) -> BoxFuture<'a, Result<Box<dyn CaptureStream>, AcquisitionError>> {
        async move {
            self.acquire_calls.fetch_add(1, Ordering::SeqCst);
            if self.deny.load(Ordering::SeqCst) {
                return Err(AcquisitionError::PermissionDenied);
            }
            let active = Arc::new(AtomicBool::new(true));
            *self.current.lock() = Some(Arc::clone(&active));
            Ok(Box::new(MockCapture { active }) as Box<dyn CaptureStream>)
        }
        .boxed()
    }
}

struct MockCapture {
    active: Arc<AtomicBool>,
}

impl CaptureStream for MockCapture {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

// --- Wake lock ---

#[derive(Default)]
pub struct MockWakeLock {
    failures_left: AtomicU32,
    request_calls: AtomicUsize,
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl MockWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// The platform drops the lock.
    pub fn release_current(&self) {
        if let Some(held) = self.current.lock().as_ref() {
            held.store(false, Ordering::SeqCst);
        }
    }

    pub fn request_calls(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }
}

impl WakeLockProvider for MockWakeLock {
    fn request(&self) -> BoxFuture<'_, Result<Box<dyn WakeLockHandle>, AcquisitionError>> {
        async move {
            self.request_calls.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(AcquisitionError::Unsupported("wake lock request rejected".into()));
            }
            let held = Arc::new(AtomicBool::new(true));
            *self.current.lock() = Some(Arc::clone(&held));
            Ok(Box::new(MockWakeHandle { held }) as Box<dyn WakeLockHandle>)
        }
        .boxed()
    }
}

struct MockWakeHandle {
    held: Arc<AtomicBool>,
}

impl WakeLockHandle for MockWakeHandle {
    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

// --- Clock ---

/// Wall clock pinned to `base` at creation, advancing with tokio time, so
/// paused-time tests move both timers and the clock together.
pub struct TestClock {
    base: NaiveDateTime,
    origin: tokio::time::Instant,
}

impl TestClock {
    pub fn new(base: NaiveDateTime) -> Self {
        Self {
            base,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TestClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.base + elapsed
    }
}
