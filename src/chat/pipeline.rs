//! single-flight chat pipeline: `Idle -> Sending -> Streaming -> {Completed | Failed} -> Idle`.
//!
//! the pipeline itself never awaits anything. [`ChatPipeline::submit`] hands
//! back a [`PendingReply`] for the caller to run with [`stream_reply`], and the
//! events that produces are fed back through [`ChatPipeline::apply`]. that
//! keeps every state change a synchronous step on the owner's thread, while
//! the network wait happens wherever the owner chooses to drive it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bevy::prelude::*;
use futures_lite::StreamExt;

use super::content::{OFFLINE_FALLBACK, RETRY_APOLOGY};
use super::service::{CompletionRequest, CompletionService, connect};
use super::transcript::{self, Transcript};
use crate::config::ChatConfig;
use crate::error::ChatError;

/// per-request settings taken from [`ChatConfig`] (everything but the key).
#[derive(Clone, Debug, PartialEq)]
pub struct ChatSettings {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
    pub timeout: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

impl From<&ChatConfig> for ChatSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stream: config.stream,
            timeout: config.timeout(),
        }
    }
}

/// identifies one dispatched request so late events can be told apart.
/// ids are unique across every pipeline in the process, so a session whose
/// pipeline was replaced mid-reply still sees the old reply as stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// request handed out, nothing received yet.
    Sending,
    /// at least one fragment applied.
    Streaming,
}

/// how the last submission resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    /// no credential configured; the canned contact message was shown.
    Offline,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitRejected {
    /// nothing left after trimming whitespace.
    Empty,
    /// a previous submission is still in flight.
    Busy,
}

impl fmt::Display for SubmitRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty message"),
            Self::Busy => f.write_str("a reply is still in flight"),
        }
    }
}

/// a request the owner must drive with [`stream_reply`].
#[derive(Clone)]
pub struct PendingReply {
    pub id: RequestId,
    pub request: CompletionRequest,
    pub service: Arc<dyn CompletionService>,
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply")
            .field("id", &self.id)
            .field("messages", &self.request.messages.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Submission {
    /// resolved on the spot with [`OFFLINE_FALLBACK`].
    Offline,
    Dispatched(PendingReply),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEventKind {
    Fragment(String),
    Completed,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEvent {
    pub request: RequestId,
    pub kind: StreamEventKind,
}

impl StreamEvent {
    pub fn fragment(request: RequestId, text: impl Into<String>) -> Self {
        Self { request, kind: StreamEventKind::Fragment(text.into()) }
    }

    pub fn completed(request: RequestId) -> Self {
        Self { request, kind: StreamEventKind::Completed }
    }

    pub fn failed(request: RequestId, reason: impl fmt::Display) -> Self {
        Self { request, kind: StreamEventKind::Failed(reason.to_string()) }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, StreamEventKind::Fragment(_))
    }
}

/// what [`ChatPipeline::apply`] did with an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// the transcript moved; `Some` when the request also resolved.
    Updated(Option<Outcome>),
    /// the event carried nothing to apply (empty fragment).
    Skipped,
    /// the event belongs to a request that is no longer active.
    Stale,
}

#[derive(Clone, Copy, Debug)]
struct InFlight {
    id: RequestId,
    started_at: Duration,
}

/// transcript owner and single-flight guard for one chat session.
#[derive(Component)]
pub struct ChatPipeline {
    service: Option<Arc<dyn CompletionService>>,
    settings: ChatSettings,
    transcript: Transcript,
    phase: Phase,
    in_flight: Option<InFlight>,
    last_outcome: Option<Outcome>,
    /// clock reading of the latest `submit_at`/`expire` call.
    clock: Duration,
}

impl ChatPipeline {
    /// `service: None` is the no-credential configuration; every submission
    /// then resolves offline without touching the network.
    pub fn new(service: Option<Arc<dyn CompletionService>>, settings: ChatSettings) -> Self {
        Self {
            service,
            settings,
            transcript: Transcript::new(),
            phase: Phase::Idle,
            in_flight: None,
            last_outcome: None,
            clock: Duration::ZERO,
        }
    }

    pub fn offline(settings: ChatSettings) -> Self {
        Self::new(None, settings)
    }

    /// connects to the configured service once; a config without a key gives
    /// an offline pipeline.
    pub fn from_config(config: &ChatConfig) -> Result<Self, ChatError> {
        Ok(Self::new(connect(config)?, ChatSettings::from(config)))
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn is_offline(&self) -> bool {
        self.service.is_none()
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.last_outcome
    }

    pub fn active_request(&self) -> Option<RequestId> {
        self.in_flight.map(|f| f.id)
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn submit(&mut self, message: &str) -> Result<Submission, SubmitRejected> {
        let now = self.clock;
        self.submit_at(message, now)
    }

    /// like [`submit`](Self::submit), stamping the request with `now` for the
    /// timeout check.
    pub fn submit_at(&mut self, message: &str, now: Duration) -> Result<Submission, SubmitRejected> {
        self.clock = self.clock.max(now);
        if message.trim().is_empty() {
            return Err(SubmitRejected::Empty);
        }
        if self.is_busy() {
            debug!(target: "linetab::chat", "submission rejected: {:?} in flight", self.in_flight.map(|f| f.id));
            return Err(SubmitRejected::Busy);
        }

        // history as it stood before this message
        let prior: Vec<_> = self.transcript.turns().cloned().collect();
        self.transcript = transcript::open_reply(&transcript::push_user(&self.transcript, message));

        let Some(service) = self.service.clone() else {
            self.transcript = transcript::replace_reply(&self.transcript, OFFLINE_FALLBACK);
            self.last_outcome = Some(Outcome::Offline);
            info!(target: "linetab::chat", "offline fallback reply (turns={})", self.transcript.len());
            return Ok(Submission::Offline);
        };

        let id = RequestId::next();
        self.phase = Phase::Sending;
        self.in_flight = Some(InFlight { id, started_at: now });

        let mut messages = prior;
        messages.push(transcript::ConversationTurn::user(message));
        let request = CompletionRequest {
            model: self.settings.model.clone(),
            system: self.settings.system_prompt.clone(),
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            stream: self.settings.stream,
        };
        info!(target: "linetab::chat",
            "dispatch {}: model={} stream={} msgs={}",
            id, request.model, request.stream, request.messages.len()
        );
        Ok(Submission::Dispatched(PendingReply { id, request, service }))
    }

    /// folds one stream event into the transcript.
    pub fn apply(&mut self, event: StreamEvent) -> Applied {
        let Some(active) = self.in_flight.filter(|f| f.id == event.request) else {
            debug!(target: "linetab::chat", "dropping stale event for {}", event.request);
            return Applied::Stale;
        };

        match event.kind {
            StreamEventKind::Fragment(text) => {
                if text.is_empty() {
                    return Applied::Skipped;
                }
                self.phase = Phase::Streaming;
                self.transcript = transcript::apply_fragment(&self.transcript, &text);
                Applied::Updated(None)
            }
            StreamEventKind::Completed => {
                self.transcript = transcript::finish_reply(&self.transcript);
                let len = self.transcript.last().map_or(0, |t| t.content.len());
                info!(target: "linetab::chat", "{} completed: final_len={}", active.id, len);
                Applied::Updated(Some(self.resolve(Outcome::Completed)))
            }
            StreamEventKind::Failed(reason) => {
                warn!(target: "linetab::chat", "{} failed: {}", active.id, reason);
                self.transcript = transcript::replace_reply(&self.transcript, RETRY_APOLOGY);
                Applied::Updated(Some(self.resolve(Outcome::Failed)))
            }
        }
    }

    /// fails the in-flight request once it has outlived the configured
    /// timeout. returns the id that was expired.
    pub fn expire(&mut self, now: Duration) -> Option<RequestId> {
        self.clock = self.clock.max(now);
        let in_flight = self.in_flight?;
        let timeout = self.settings.timeout;
        if now.saturating_sub(in_flight.started_at) < timeout {
            return None;
        }
        self.apply(StreamEvent::failed(in_flight.id, ChatError::Timeout(timeout)));
        Some(in_flight.id)
    }

    /// drops the transcript (widget closed). an in-flight request is
    /// abandoned and anything it still produces becomes stale.
    pub fn reset(&mut self) {
        if let Some(f) = self.in_flight.take() {
            debug!(target: "linetab::chat", "reset abandons {}", f.id);
        }
        self.transcript = Transcript::new();
        self.phase = Phase::Idle;
        self.last_outcome = None;
    }

    fn resolve(&mut self, outcome: Outcome) -> Outcome {
        self.in_flight = None;
        self.phase = Phase::Idle;
        self.last_outcome = Some(outcome);
        outcome
    }
}

/// runs a dispatched request to the end, handing every event to `emit` in
/// arrival order. the future `emit` returns is awaited before the next event,
/// so a full channel makes the reply wait instead of blocking a worker; its
/// output is ignored.
///
/// exactly one terminal event ([`StreamEventKind::Completed`] or
/// [`StreamEventKind::Failed`]) is emitted, whatever happens; setup and
/// mid-stream errors never escape.
pub async fn stream_reply<F, Fut>(pending: PendingReply, mut emit: F)
where
    F: FnMut(StreamEvent) -> Fut,
    Fut: Future,
{
    let PendingReply { id, request, service } = pending;
    let mut stream = match service.complete(&request).await {
        Ok(s) => s,
        Err(err) => {
            error!(target: "linetab::chat", "{} could not start: {}", id, err);
            emit(StreamEvent::failed(id, err)).await;
            return;
        }
    };

    let mut received = 0usize;
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => {
                if let Some(text) = fragment.as_text() {
                    received += text.len();
                    emit(StreamEvent::fragment(id, text)).await;
                }
            }
            Err(err) => {
                error!(target: "linetab::chat", "{} streaming error after {} bytes: {}", id, received, err);
                emit(StreamEvent::failed(id, err)).await;
                return;
            }
        }
    }
    emit(StreamEvent::completed(id)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::content::SYSTEM_PROMPT;
    use crate::chat::service::{Fragment, FragmentStream};
    use crate::chat::transcript::{ConversationTurn, Role};
    use async_trait::async_trait;
    use futures_lite::stream;
    use pretty_assertions::assert_eq;
    use std::future;
    use std::sync::Mutex;

    /// replays a fixed script and records what it was asked.
    #[derive(Default)]
    struct Scripted {
        open_error: Option<String>,
        items: Vec<Result<Fragment, String>>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl CompletionService for Scripted {
        async fn complete(&self, request: &CompletionRequest) -> Result<FragmentStream, ChatError> {
            self.seen.lock().unwrap().push(request.clone());
            if let Some(e) = &self.open_error {
                return Err(ChatError::Stream(e.clone()));
            }
            let items: Vec<_> = self.items.iter().cloned().map(|r| r.map_err(ChatError::Stream)).collect();
            Ok(Box::pin(stream::iter(items)))
        }
    }

    fn live(script: Scripted) -> (ChatPipeline, Arc<Scripted>) {
        let svc = Arc::new(script);
        (ChatPipeline::new(Some(svc.clone()), ChatSettings::default()), svc)
    }

    fn run(pipeline: &mut ChatPipeline, msg: &str) -> Vec<Transcript> {
        let Submission::Dispatched(pending) = pipeline.submit(msg).unwrap() else {
            panic!("expected a dispatched request");
        };
        let mut snapshots = Vec::new();
        pollster::block_on(stream_reply(pending, |ev| {
            pipeline.apply(ev);
            snapshots.push(pipeline.transcript().clone());
            future::ready(())
        }));
        snapshots
    }

    #[test]
    fn offline_submit_uses_fallback_without_calling_out() {
        let mut p = ChatPipeline::offline(ChatSettings::default());
        let sub = p.submit("What is the price?").unwrap();
        assert!(matches!(sub, Submission::Offline));
        assert_eq!(p.transcript().len(), 2);
        assert_eq!(p.transcript().last().unwrap().content, OFFLINE_FALLBACK);
        assert_eq!(p.transcript().streaming_count(), 0);
        assert!(!p.is_busy());
        assert_eq!(p.last_outcome(), Some(Outcome::Offline));
    }

    #[test]
    fn config_without_key_builds_offline_pipeline() {
        let p = ChatPipeline::from_config(&ChatConfig::default()).unwrap();
        assert!(p.is_offline());
        assert_eq!(p.settings().timeout, Duration::from_secs(30));
        let p = ChatPipeline::from_config(&ChatConfig::default().with_api_key("sk-test")).unwrap();
        assert!(!p.is_offline());
    }

    #[test]
    fn blank_input_changes_nothing() {
        let (mut p, svc) = live(Scripted::default());
        assert_eq!(p.submit("").unwrap_err(), SubmitRejected::Empty);
        assert_eq!(p.submit("   ").unwrap_err(), SubmitRejected::Empty);
        assert!(p.transcript().is_empty());
        assert!(!p.is_busy());
        assert!(svc.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn second_submit_while_busy_is_rejected() {
        let (mut p, _svc) = live(Scripted::default());
        let first = p.submit("one").unwrap();
        assert!(matches!(first, Submission::Dispatched(_)));
        assert_eq!(p.phase(), Phase::Sending);
        assert_eq!(p.submit("two").unwrap_err(), SubmitRejected::Busy);
        assert_eq!(p.transcript().len(), 2);
    }

    #[test]
    fn fragments_show_up_before_the_stream_ends() {
        let (mut p, _svc) = live(Scripted {
            items: vec![Ok(Fragment::text("$35 ")), Ok(Fragment::empty()), Ok(Fragment::text("per bottle"))],
            ..Scripted::default()
        });
        let snaps = run(&mut p, "price?");
        // two fragments + completion
        assert_eq!(snaps.len(), 3);
        assert_eq!(snaps[0].last().unwrap().content, "$35 ");
        assert!(snaps[0].last().unwrap().is_streaming);
        assert_eq!(snaps[1].last().unwrap().content, "$35 per bottle");
        assert_eq!(snaps[2].streaming_count(), 0);
        assert_eq!(p.last_outcome(), Some(Outcome::Completed));
        assert!(!p.is_busy());
    }

    #[test]
    fn request_carries_system_history_and_new_message() {
        let (mut p, svc) = live(Scripted { items: vec![Ok(Fragment::text("hello"))], ..Scripted::default() });
        run(&mut p, "hi");
        run(&mut p, "price?");
        let seen = svc.seen.lock().unwrap();
        let req = &seen[1];
        assert_eq!(req.system, SYSTEM_PROMPT);
        assert_eq!(req.model, "gpt-4");
        assert_eq!(req.max_tokens, 500);
        assert!(req.stream);
        let roles: Vec<_> = req.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(req.messages[1], ConversationTurn::assistant("hello"));
        assert_eq!(req.latest_user_text(), Some("price?"));
    }

    #[test]
    fn setup_failure_becomes_apology() {
        let (mut p, _svc) = live(Scripted { open_error: Some("dns".into()), ..Scripted::default() });
        run(&mut p, "hi");
        assert_eq!(p.transcript().last().unwrap().content, RETRY_APOLOGY);
        assert_eq!(p.transcript().streaming_count(), 0);
        assert_eq!(p.last_outcome(), Some(Outcome::Failed));
        assert!(!p.is_busy());
    }

    #[test]
    fn mid_stream_failure_overwrites_partial_text() {
        let (mut p, _svc) = live(Scripted {
            items: vec![Ok(Fragment::text("partial")), Err("reset by peer".into()), Ok(Fragment::text("never"))],
            ..Scripted::default()
        });
        run(&mut p, "hi");
        assert_eq!(p.transcript().last().unwrap().content, RETRY_APOLOGY);
        assert!(!p.is_busy());
        // and the pipeline accepts new input again
        assert!(p.submit("again").is_ok());
    }

    #[test]
    fn timeout_fails_the_request_and_late_events_are_stale() {
        let (mut p, _svc) = live(Scripted::default());
        let Submission::Dispatched(pending) = p.submit_at("hi", Duration::from_secs(1)).unwrap() else {
            panic!("expected dispatch");
        };
        assert_eq!(p.expire(Duration::from_secs(30)), None);
        assert_eq!(p.expire(Duration::from_secs(31)), Some(pending.id));
        assert_eq!(p.transcript().last().unwrap().content, RETRY_APOLOGY);
        assert!(!p.is_busy());

        let before = p.transcript().clone();
        assert_eq!(p.apply(StreamEvent::fragment(pending.id, "late")), Applied::Stale);
        assert_eq!(p.apply(StreamEvent::completed(pending.id)), Applied::Stale);
        assert_eq!(p.transcript(), &before);
    }

    #[test]
    fn reset_discards_transcript_and_abandons_request() {
        let (mut p, _svc) = live(Scripted::default());
        let Submission::Dispatched(pending) = p.submit("hi").unwrap() else {
            panic!("expected dispatch");
        };
        p.reset();
        assert!(p.transcript().is_empty());
        assert!(!p.is_busy());
        assert_eq!(p.apply(StreamEvent::fragment(pending.id, "late")), Applied::Stale);
        assert!(p.transcript().is_empty());
    }

    #[test]
    fn replacement_pipeline_ignores_the_old_reply() {
        let (mut old, _svc) = live(Scripted::default());
        let Submission::Dispatched(old_reply) = old.submit("old question").unwrap() else {
            panic!("expected dispatch");
        };
        let (mut fresh, _svc) = live(Scripted::default());
        let Submission::Dispatched(new_reply) = fresh.submit("new question").unwrap() else {
            panic!("expected dispatch");
        };
        assert_ne!(old_reply.id, new_reply.id);

        assert_eq!(fresh.apply(StreamEvent::fragment(old_reply.id, "answer to old")), Applied::Stale);
        assert_eq!(fresh.apply(StreamEvent::completed(old_reply.id)), Applied::Stale);
        assert_eq!(fresh.transcript().last().unwrap().content, "");
        assert_eq!(fresh.active_request(), Some(new_reply.id));
    }

    #[test]
    fn request_ids_are_unique() {
        let (mut p, _svc) = live(Scripted { items: vec![Ok(Fragment::text("x"))], ..Scripted::default() });
        let mut ids = Vec::new();
        for _ in 0..3 {
            let Submission::Dispatched(pending) = p.submit("q").unwrap() else { panic!() };
            ids.push(pending.id);
            p.apply(StreamEvent::completed(pending.id));
        }
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }
}
