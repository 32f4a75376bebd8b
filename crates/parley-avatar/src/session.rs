//! Avatar session actor.
//!
//! One task owns the [`StateMachine`], the live [`AvatarSession`] and the
//! speak queue. [`AvatarHandle`] is the cloneable front door: every call is a
//! message on the actor's queue, processed one at a time.
//!
//! Speak instructions are queued FIFO per session and sent one at a time.
//! Tearing a session down aborts the speaker, dropping anything not yet sent,
//! and returns to `Absent` before the remote stop call goes out.
//!
//! Media events carry the session id they were raised for; events for any
//! other session are ignored.

use std::sync::Arc;
use std::time::Duration;

use parley_core::config::{AvatarConfig, SpeakMode};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::client::{AvatarService, AvatarStream};
use crate::error::AvatarError;
use crate::media::MediaSink;
use crate::state::{AvatarState, StateMachine, Transition};

/// Tuning for the session actor.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub speak_mode: SpeakMode,
    /// How long `Initializing` may wait for the stream-ready signal.
    pub ready_timeout: Duration,
    /// Speak instructions buffered per session before new ones are dropped.
    pub speak_queue: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            speak_mode: SpeakMode::Repeat,
            ready_timeout: Duration::from_secs(30),
            speak_queue: 16,
        }
    }
}

impl From<&AvatarConfig> for SessionOptions {
    fn from(config: &AvatarConfig) -> Self {
        Self {
            speak_mode: config.speak_mode,
            ready_timeout: Duration::from_secs(config.ready_timeout_secs),
            ..Self::default()
        }
    }
}

/// Signals raised by the media side of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvatarEvent {
    StreamReady,
    Disconnected,
    StartTalking,
}

/// A live session: the token it was opened with and its media handle.
#[derive(Debug, Clone)]
pub struct AvatarSession {
    pub token: String,
    pub stream: AvatarStream,
}

enum Command {
    Start(oneshot::Sender<Result<AvatarStream, AvatarError>>),
    Stop(oneshot::Sender<()>),
    Event(AvatarEvent, String, oneshot::Sender<AvatarState>),
    Speak(String, oneshot::Sender<bool>),
    ReadyTimeout(u64),
}

struct Speaker {
    queue: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

struct Actor {
    service: Arc<dyn AvatarService>,
    sink: Arc<dyn MediaSink>,
    options: SessionOptions,
    machine: StateMachine,
    session: Option<AvatarSession>,
    speaker: Option<Speaker>,
    generation: u64,
    self_tx: mpsc::WeakSender<Command>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Start(reply) => {
                    let result = self.start().await;
                    let _ = reply.send(result);
                }
                Command::Stop(reply) => {
                    self.teardown("stopped by user");
                    let _ = reply.send(());
                }
                Command::Event(event, session_id, reply) => {
                    self.on_event(event, &session_id);
                    let _ = reply.send(self.machine.current());
                }
                Command::Speak(text, reply) => {
                    let _ = reply.send(self.enqueue_speak(text));
                }
                Command::ReadyTimeout(generation) => {
                    if generation == self.generation
                        && self.machine.current() == AvatarState::Initializing
                    {
                        tracing::warn!(
                            timeout_secs = self.options.ready_timeout.as_secs(),
                            "Avatar stream never became ready"
                        );
                        self.teardown("ready timeout");
                    }
                }
            }
        }
        self.teardown("handle dropped");
    }

    async fn start(&mut self) -> Result<AvatarStream, AvatarError> {
        let current = self.machine.current();
        if current != AvatarState::Absent {
            return Err(AvatarError::AlreadyStarted(current));
        }
        self.machine.transition(AvatarState::Initializing)?;
        self.generation += 1;

        match self.open_session().await {
            Ok(session) => {
                tracing::info!(session_id = %session.stream.session_id, "Avatar session opened");
                self.sink.attach(&session.stream);
                let stream = session.stream.clone();
                self.session = Some(session);
                self.arm_ready_timeout();
                Ok(stream)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Avatar session failed to start");
                self.sink.clear();
                self.enter(AvatarState::Absent);
                Err(e)
            }
        }
    }

    async fn open_session(&self) -> Result<AvatarSession, AvatarError> {
        let token = self.service.create_token().await?;
        let stream = self.service.create_session(&token).await?;
        if let Err(e) = self.service.start_session(&token, &stream.session_id).await {
            if let Err(stop_err) = self.service.stop_session(&token, &stream.session_id).await {
                tracing::debug!(error = %stop_err, "Releasing half-open avatar session failed");
            }
            return Err(e);
        }
        Ok(AvatarSession { token, stream })
    }

    fn arm_ready_timeout(&self) {
        let generation = self.generation;
        let timeout = self.options.ready_timeout;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::ReadyTimeout(generation)).await;
            }
        });
    }

    fn on_event(&mut self, event: AvatarEvent, session_id: &str) {
        let current = self.machine.current();
        let live = self.session.as_ref().map(|s| s.stream.session_id.as_str());
        if live != Some(session_id) {
            tracing::debug!(event = ?event, session_id, "Avatar event for another session ignored");
            return;
        }
        match (event, current) {
            (AvatarEvent::StreamReady, AvatarState::Initializing) => {
                self.enter(AvatarState::Active);
                self.spawn_speaker();
            }
            (AvatarEvent::Disconnected, AvatarState::Initializing | AvatarState::Active) => {
                self.teardown("stream disconnected");
            }
            (AvatarEvent::StartTalking, AvatarState::Active) => {
                tracing::debug!("Avatar started talking");
            }
            _ => {
                tracing::debug!(event = ?event, state = %current, "Avatar event ignored");
            }
        }
    }

    fn spawn_speaker(&mut self) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let (queue, rx) = mpsc::channel(self.options.speak_queue.max(1));
        let task = tokio::spawn(speaker_loop(
            Arc::clone(&self.service),
            session,
            self.options.speak_mode,
            rx,
        ));
        self.speaker = Some(Speaker { queue, task });
    }

    fn enqueue_speak(&self, text: String) -> bool {
        if self.machine.current() != AvatarState::Active {
            return false;
        }
        let Some(speaker) = &self.speaker else {
            return false;
        };
        match speaker.queue.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Avatar speak queue full; instruction dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Release everything the current session holds and return to `Absent`.
    ///
    /// The remote stop call runs on its own task so a slow provider never
    /// holds up the queue.
    fn teardown(&mut self, reason: &str) {
        if self.machine.current() == AvatarState::Absent {
            return;
        }
        if let Some(speaker) = self.speaker.take() {
            speaker.task.abort();
        }
        self.sink.clear();
        let session = self.session.take();
        self.enter(AvatarState::Absent);
        tracing::info!(reason, "Avatar session closed");

        if let Some(session) = session {
            let service = Arc::clone(&self.service);
            tokio::spawn(async move {
                if let Err(e) = service
                    .stop_session(&session.token, &session.stream.session_id)
                    .await
                {
                    tracing::warn!(error = %e, "Avatar stop call failed; session released locally");
                }
            });
        }
    }

    fn enter(&mut self, target: AvatarState) {
        if let Err(e) = self.machine.transition(target) {
            tracing::error!(error = %e, "Avatar state machine rejected transition");
        }
    }
}

async fn speaker_loop(
    service: Arc<dyn AvatarService>,
    session: AvatarSession,
    mode: SpeakMode,
    mut rx: mpsc::Receiver<String>,
) {
    while let Some(text) = rx.recv().await {
        match service
            .speak(&session.token, &session.stream.session_id, &text, mode)
            .await
        {
            Ok(()) => tracing::debug!(chars = text.len(), "Avatar speak sent"),
            Err(e) => tracing::warn!(error = %e, "Avatar speak failed"),
        }
    }
}

// =============================================================================
// AvatarHandle
// =============================================================================

/// Cloneable handle to the session actor.
///
/// The actor runs until the last handle is dropped, then tears down any
/// open session.
#[derive(Clone)]
pub struct AvatarHandle {
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<AvatarState>,
    transitions: broadcast::Sender<Transition>,
}

impl AvatarHandle {
    /// Spawn the actor on the current tokio runtime.
    pub fn spawn(
        service: Arc<dyn AvatarService>,
        sink: Arc<dyn MediaSink>,
        options: SessionOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let machine = StateMachine::new();
        let state = machine.watch();
        let transitions = machine.transitions();

        let actor = Actor {
            service,
            sink,
            options,
            machine,
            session: None,
            speaker: None,
            generation: 0,
            self_tx: tx.downgrade(),
        };
        tokio::spawn(actor.run(rx));

        Self {
            tx,
            state,
            transitions,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AvatarError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| AvatarError::Unavailable)?;
        reply_rx.await.map_err(|_| AvatarError::Unavailable)
    }

    /// Open a session. Fails with `AlreadyStarted` unless the state is `Absent`.
    pub async fn start(&self) -> Result<AvatarStream, AvatarError> {
        self.request(Command::Start).await?
    }

    /// Tear down the session, if any.
    pub async fn stop(&self) -> Result<(), AvatarError> {
        self.request(Command::Stop).await
    }

    /// Deliver a media-side event raised for `session_id`; returns the state
    /// after handling it.
    pub async fn notify(
        &self,
        event: AvatarEvent,
        session_id: impl Into<String>,
    ) -> Result<AvatarState, AvatarError> {
        let session_id = session_id.into();
        self.request(|reply| Command::Event(event, session_id, reply))
            .await
    }

    /// Queue `text` for the avatar. Returns false when no session is active.
    pub async fn speak(&self, text: impl Into<String>) -> Result<bool, AvatarError> {
        let text = text.into();
        self.request(|reply| Command::Speak(text, reply)).await
    }

    pub fn state(&self) -> AvatarState {
        *self.state.borrow()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::media::BroadcastMediaSink;

    #[derive(Default)]
    struct MockService {
        calls: Mutex<Vec<String>>,
        spoken: Mutex<Vec<String>>,
        sessions: AtomicUsize,
        fail_token: bool,
        fail_start: bool,
        stop_delay: Option<Duration>,
    }

    impl MockService {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, name: &str) -> usize {
            self.calls().iter().filter(|c| c.as_str() == name).count()
        }
    }

    #[async_trait]
    impl AvatarService for MockService {
        async fn create_token(&self) -> Result<String, AvatarError> {
            self.calls.lock().unwrap().push("token".to_string());
            if self.fail_token {
                return Err(AvatarError::Http {
                    status: 401,
                    body: "bad key".to_string(),
                });
            }
            Ok("tok".to_string())
        }

        async fn create_session(&self, _token: &str) -> Result<AvatarStream, AvatarError> {
            self.calls.lock().unwrap().push("new".to_string());
            let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AvatarStream {
                session_id: format!("sess-{}", n),
                url: "wss://media.example".to_string(),
                access_token: "media-token".to_string(),
            })
        }

        async fn start_session(&self, _token: &str, _session_id: &str) -> Result<(), AvatarError> {
            self.calls.lock().unwrap().push("start".to_string());
            if self.fail_start {
                return Err(AvatarError::Session("start refused".to_string()));
            }
            Ok(())
        }

        async fn speak(
            &self,
            _token: &str,
            _session_id: &str,
            text: &str,
            _mode: SpeakMode,
        ) -> Result<(), AvatarError> {
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn stop_session(&self, _token: &str, _session_id: &str) -> Result<(), AvatarError> {
            if let Some(delay) = self.stop_delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().unwrap().push("stop".to_string());
            Ok(())
        }
    }

    fn spawn(service: Arc<MockService>) -> (AvatarHandle, Arc<BroadcastMediaSink>) {
        let sink = Arc::new(BroadcastMediaSink::default());
        let handle = AvatarHandle::spawn(service, sink.clone(), SessionOptions::default());
        (handle, sink)
    }

    fn drain(rx: &mut broadcast::Receiver<Transition>) -> Vec<(AvatarState, AvatarState)> {
        let mut seen = Vec::new();
        while let Ok(t) = rx.try_recv() {
            seen.push((t.from, t.to));
        }
        seen
    }

    async fn wait_for_spoken(service: &MockService, n: usize) {
        for _ in 0..200 {
            if service.spoken.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("speaker did not deliver {} instructions", n);
    }

    async fn wait_for_stops(service: &MockService, n: usize) {
        for _ in 0..200 {
            if service.count("stop") >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} stop calls, saw {}", n, service.count("stop"));
    }

    #[tokio::test]
    async fn test_start_then_ready_reaches_active() {
        let service = Arc::new(MockService::default());
        let (handle, sink) = spawn(service.clone());
        let mut feed = handle.subscribe_transitions();

        let stream = handle.start().await.unwrap();
        assert_eq!(stream.session_id, "sess-1");
        assert_eq!(handle.state(), AvatarState::Initializing);
        assert_eq!(sink.bound(), Some(stream));

        let state = handle.notify(AvatarEvent::StreamReady, "sess-1").await.unwrap();
        assert_eq!(state, AvatarState::Active);
        assert_eq!(
            drain(&mut feed),
            vec![
                (AvatarState::Absent, AvatarState::Initializing),
                (AvatarState::Initializing, AvatarState::Active),
            ]
        );
        assert_eq!(service.calls(), vec!["token", "new", "start"]);
    }

    #[tokio::test]
    async fn test_stop_clears_media_and_releases_session() {
        let service = Arc::new(MockService::default());
        let (handle, sink) = spawn(service.clone());
        handle.start().await.unwrap();
        handle.notify(AvatarEvent::StreamReady, "sess-1").await.unwrap();

        handle.stop().await.unwrap();

        assert_eq!(handle.state(), AvatarState::Absent);
        assert!(sink.bound().is_none());
        wait_for_stops(&service, 1).await;
    }

    #[tokio::test]
    async fn test_disconnect_clears_media_and_releases_session() {
        let service = Arc::new(MockService::default());
        let (handle, sink) = spawn(service.clone());
        handle.start().await.unwrap();
        handle.notify(AvatarEvent::StreamReady, "sess-1").await.unwrap();
        let mut feed = handle.subscribe_transitions();

        let state = handle
            .notify(AvatarEvent::Disconnected, "sess-1")
            .await
            .unwrap();

        assert_eq!(state, AvatarState::Absent);
        assert!(sink.bound().is_none());
        wait_for_stops(&service, 1).await;
        assert_eq!(
            drain(&mut feed),
            vec![(AvatarState::Active, AvatarState::Absent)]
        );
    }

    #[tokio::test]
    async fn test_token_failure_falls_back_to_absent() {
        let service = Arc::new(MockService {
            fail_token: true,
            ..MockService::default()
        });
        let (handle, sink) = spawn(service.clone());
        let mut feed = handle.subscribe_transitions();

        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, AvatarError::Http { status: 401, .. }));
        assert_eq!(handle.state(), AvatarState::Absent);
        assert!(sink.bound().is_none());
        assert_eq!(
            drain(&mut feed),
            vec![
                (AvatarState::Absent, AvatarState::Initializing),
                (AvatarState::Initializing, AvatarState::Absent),
            ]
        );
    }

    #[tokio::test]
    async fn test_start_failure_releases_half_open_session() {
        let service = Arc::new(MockService {
            fail_start: true,
            ..MockService::default()
        });
        let (handle, _sink) = spawn(service.clone());

        assert!(handle.start().await.is_err());
        assert_eq!(service.calls(), vec!["token", "new", "start", "stop"]);
        assert_eq!(handle.state(), AvatarState::Absent);
    }

    #[tokio::test]
    async fn test_concurrent_starts_open_one_session() {
        let service = Arc::new(MockService::default());
        let (handle, _sink) = spawn(service.clone());

        let (a, b) = tokio::join!(handle.start(), handle.start());
        let outcomes = [a.is_ok(), b.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);

        let err = if a.is_err() { a } else { b }.unwrap_err();
        assert!(matches!(
            err,
            AvatarError::AlreadyStarted(AvatarState::Initializing)
        ));
        assert_eq!(service.count("token"), 1);
    }

    #[tokio::test]
    async fn test_start_while_active_is_rejected() {
        let service = Arc::new(MockService::default());
        let (handle, _sink) = spawn(service.clone());
        handle.start().await.unwrap();
        handle.notify(AvatarEvent::StreamReady, "sess-1").await.unwrap();

        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, AvatarError::AlreadyStarted(AvatarState::Active)));
    }

    #[tokio::test]
    async fn test_speak_only_when_active() {
        let service = Arc::new(MockService::default());
        let (handle, _sink) = spawn(service.clone());

        assert!(!handle.speak("too early").await.unwrap());
        handle.start().await.unwrap();
        assert!(!handle.speak("still initializing").await.unwrap());

        handle.notify(AvatarEvent::StreamReady, "sess-1").await.unwrap();
        assert!(handle.speak("hello").await.unwrap());
        wait_for_spoken(&service, 1).await;
        assert_eq!(*service.spoken.lock().unwrap(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_overlapping_speaks_are_delivered_in_order() {
        let service = Arc::new(MockService::default());
        let (handle, _sink) = spawn(service.clone());
        handle.start().await.unwrap();
        handle.notify(AvatarEvent::StreamReady, "sess-1").await.unwrap();

        for text in ["first", "second", "third"] {
            assert!(handle.speak(text).await.unwrap());
        }
        wait_for_spoken(&service, 3).await;
        assert_eq!(
            *service.spoken.lock().unwrap(),
            vec!["first", "second", "third"]
        );
    }

    #[tokio::test]
    async fn test_stop_when_absent_is_noop() {
        let service = Arc::new(MockService::default());
        let (handle, _sink) = spawn(service.clone());
        handle.stop().await.unwrap();
        assert_eq!(handle.state(), AvatarState::Absent);
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_events_ignored_when_absent() {
        let service = Arc::new(MockService::default());
        let (handle, _sink) = spawn(service);
        assert_eq!(
            handle.notify(AvatarEvent::StreamReady, "sess-1").await.unwrap(),
            AvatarState::Absent
        );
        assert_eq!(
            handle.notify(AvatarEvent::StartTalking, "sess-1").await.unwrap(),
            AvatarState::Absent
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_timeout_tears_down() {
        let service = Arc::new(MockService::default());
        let (handle, sink) = spawn(service.clone());
        handle.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;

        // Round-trip through the actor so the timeout has been handled.
        assert!(!handle.speak("late").await.unwrap());
        assert_eq!(handle.state(), AvatarState::Absent);
        assert!(sink.bound().is_none());
        wait_for_stops(&service, 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timeout_does_not_end_new_session() {
        let service = Arc::new(MockService::default());
        let (handle, _sink) = spawn(service.clone());

        handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.stop().await.unwrap();
        handle.start().await.unwrap();
        handle.notify(AvatarEvent::StreamReady, "sess-2").await.unwrap();

        // First session's timer fires here and must be ignored.
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(handle.speak("still here").await.unwrap());
        assert_eq!(handle.state(), AvatarState::Active);
    }

    #[tokio::test]
    async fn test_event_for_previous_session_is_ignored() {
        let service = Arc::new(MockService::default());
        let (handle, sink) = spawn(service.clone());

        handle.start().await.unwrap();
        handle.notify(AvatarEvent::StreamReady, "sess-1").await.unwrap();
        handle.stop().await.unwrap();
        let stream = handle.start().await.unwrap();
        assert_eq!(stream.session_id, "sess-2");

        // The old room's disconnect lands after the new session opened.
        let state = handle
            .notify(AvatarEvent::Disconnected, "sess-1")
            .await
            .unwrap();
        assert_eq!(state, AvatarState::Initializing);
        assert_eq!(sink.bound(), Some(stream));

        let state = handle
            .notify(AvatarEvent::StreamReady, "sess-2")
            .await
            .unwrap();
        assert_eq!(state, AvatarState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_remote_stop_does_not_block_actor() {
        let service = Arc::new(MockService {
            stop_delay: Some(Duration::from_secs(5)),
            ..MockService::default()
        });
        let (handle, sink) = spawn(service.clone());
        handle.start().await.unwrap();
        handle.notify(AvatarEvent::StreamReady, "sess-1").await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("stop waited on the remote call")
            .unwrap();
        assert_eq!(handle.state(), AvatarState::Absent);
        assert!(sink.bound().is_none());

        let spoke = tokio::time::timeout(Duration::from_secs(1), handle.speak("after stop"))
            .await
            .expect("speak waited on the remote call")
            .unwrap();
        assert!(!spoke);
        assert_eq!(service.count("stop"), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(service.count("stop"), 1);
    }

    #[test]
    fn test_event_wire_names() {
        let event: AvatarEvent = serde_json::from_str("\"stream_ready\"").unwrap();
        assert_eq!(event, AvatarEvent::StreamReady);
        assert_eq!(
            serde_json::to_string(&AvatarEvent::StartTalking).unwrap(),
            "\"start_talking\""
        );
    }

    #[test]
    fn test_options_from_config() {
        let config = AvatarConfig {
            ready_timeout_secs: 5,
            speak_mode: SpeakMode::Chat,
            ..AvatarConfig::default()
        };
        let options = SessionOptions::from(&config);
        assert_eq!(options.ready_timeout, Duration::from_secs(5));
        assert_eq!(options.speak_mode, SpeakMode::Chat);
    }
}
