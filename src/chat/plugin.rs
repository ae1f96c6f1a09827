//! bevy wiring for the chat assistant.
//!
//! - a session is any entity carrying a [`ChatPipeline`] component.
//! - input arrives as a one-shot [`ChatInput`] component (see [`send_user_text`]).
//! - replies never block the main thread: on native the stream is driven on a
//!   tiny tokio runtime, on wasm on bevy's async pool, which yields to the
//!   browser event loop.
//! - stream events cross back through a bounded inbox drained once per frame in
//!   [`ChatSet::Drain`]; every state change happens in that system.

use bevy::prelude::*;
use bevy::tasks::AsyncComputeTaskPool;
use flume::r#async::SendFut;
use flume::{Receiver, Sender, TryRecvError};
#[cfg(not(target_arch = "wasm32"))]
use std::sync::Arc;

use super::pipeline::{Applied, ChatPipeline, Outcome, RequestId, StreamEvent, Submission, SubmitRejected, stream_reply};

/// on native we keep a tiny tokio runtime to drive provider futures.
/// we spawn onto this rt from compute tasks so neither the main thread
/// nor bevy's compute pools block.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Resource, Clone)]
pub struct TokioRt(pub Arc<tokio::runtime::Runtime>);

#[cfg(not(target_arch = "wasm32"))]
impl Default for TokioRt {
    fn default() -> Self {
        info!(target: "linetab::chat", "ChatAssistantPlugin: initializing Tokio multi-thread runtime (native)");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("linetab-chat")
            .enable_all()
            .build()
            .expect("tokio runtime");
        Self(Arc::new(rt))
    }
}

/// system ordering so uis can run after chat events are emitted
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum ChatSet {
    /// closes sessions and turns `ChatInput` into requests
    Dispatch,
    /// applies stream events and timeouts, emits `TranscriptChanged` / `ChatResolved`
    Drain,
}

/// insert on a session entity to submit a message; removed once handled.
#[derive(Component, Clone, Debug)]
pub struct ChatInput {
    pub text: String,
}

/// insert on a session entity to discard its transcript (widget closed).
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct ChatClosed;

/// helper to submit a user message on a session entity.
pub fn send_user_text(commands: &mut Commands, target: Entity, text: impl Into<String>) {
    let text = text.into();
    debug!(target: "linetab::chat", "send_user_text -> entity={:?} (len={})", target, text.len());
    commands.entity(target).insert(ChatInput { text });
}

/// helper to reset a session when its widget closes.
pub fn close_chat(commands: &mut Commands, target: Entity) {
    commands.entity(target).insert(ChatClosed);
}

#[derive(Event, Debug)]
pub struct ChatSubmitted {
    pub entity: Entity,
    /// `None` when the session is offline and the reply was already written.
    pub request: Option<RequestId>,
}

#[derive(Event, Debug)]
pub struct ChatRejected {
    pub entity: Entity,
    pub reason: SubmitRejected,
}

/// the session's transcript has a new snapshot; re-render it.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptChanged {
    pub entity: Entity,
}

#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatResolved {
    pub entity: Entity,
    pub outcome: Outcome,
}

#[derive(Debug)]
pub struct StreamMsg {
    pub entity: Entity,
    pub event: StreamEvent,
}

/// cross-thread inbox for streaming; producers send, main thread drains.
/// bounded to avoid unbounded growth when the frame stalls briefly.
#[derive(Resource, Clone)]
pub struct StreamInbox {
    tx: Sender<StreamMsg>,
    rx: Receiver<StreamMsg>,
}

impl Default for StreamInbox {
    fn default() -> Self {
        let (tx, rx) = flume::bounded(2048);
        Self { tx, rx }
    }
}

impl StreamInbox {
    pub fn sender(&self) -> Sender<StreamMsg> {
        self.tx.clone()
    }
}

/// feeds one session's stream events into the inbox. a full inbox makes the
/// reply task wait rather than block its worker thread; a disconnected one
/// (app shutting down) is ignored.
fn inbox_emitter(tx: Sender<StreamMsg>, entity: Entity) -> impl FnMut(StreamEvent) -> SendFut<'static, StreamMsg> {
    move |event| tx.clone().into_send_async(StreamMsg { entity, event })
}

/// bevy plugin: wires systems, events, resources.
/// sessions are spawned by the app with a `ChatPipeline` component.
/// on native, also inserts a tiny tokio runtime resource by default.
pub struct ChatAssistantPlugin;

impl Plugin for ChatAssistantPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "linetab::chat", "ChatAssistantPlugin: build()");
        app.init_resource::<StreamInbox>()
            .add_event::<ChatSubmitted>()
            .add_event::<ChatRejected>()
            .add_event::<TranscriptChanged>()
            .add_event::<ChatResolved>()
            .configure_sets(Update, (ChatSet::Dispatch, ChatSet::Drain).chain())
            .add_systems(Update, (reset_closed_chats, dispatch_chat_input).chain().in_set(ChatSet::Dispatch))
            .add_systems(Update, (drain_chat_inbox, expire_stalled_chats).chain().in_set(ChatSet::Drain));

        #[cfg(not(target_arch = "wasm32"))]
        if app.world().get_resource::<TokioRt>().is_none() {
            app.insert_resource(TokioRt::default());
        }
    }
}

fn reset_closed_chats(
    mut commands: Commands,
    mut q: Query<(Entity, &mut ChatPipeline), With<ChatClosed>>,
    mut ev_changed: EventWriter<TranscriptChanged>,
) {
    for (e, mut pipeline) in &mut q {
        info!(target: "linetab::chat", "chat closed: entity={:?} turns={}", e, pipeline.transcript().len());
        pipeline.reset();
        commands.entity(e).remove::<ChatClosed>();
        ev_changed.write(TranscriptChanged { entity: e });
    }
}

/// submits pending input and spawns async tasks for dispatched requests.
fn dispatch_chat_input(
    mut commands: Commands,
    inbox: Res<StreamInbox>,
    time: Res<Time<Real>>,
    mut q: Query<(Entity, &mut ChatPipeline, &ChatInput)>,
    mut ev_submitted: EventWriter<ChatSubmitted>,
    mut ev_rejected: EventWriter<ChatRejected>,
    mut ev_changed: EventWriter<TranscriptChanged>,
    mut ev_resolved: EventWriter<ChatResolved>,

    // native-only: small runtime to drive network futures
    #[cfg(not(target_arch = "wasm32"))] rt: Res<TokioRt>,
) {
    for (e, mut pipeline, input) in &mut q {
        // one-shot marker removal
        commands.entity(e).remove::<ChatInput>();

        let pending = match pipeline.submit_at(&input.text, time.elapsed()) {
            Err(reason) => {
                debug!(target: "linetab::chat", "input rejected for entity={:?}: {}", e, reason);
                ev_rejected.write(ChatRejected { entity: e, reason });
                continue;
            }
            Ok(Submission::Offline) => {
                ev_submitted.write(ChatSubmitted { entity: e, request: None });
                ev_changed.write(TranscriptChanged { entity: e });
                ev_resolved.write(ChatResolved { entity: e, outcome: Outcome::Offline });
                continue;
            }
            Ok(Submission::Dispatched(pending)) => pending,
        };

        ev_submitted.write(ChatSubmitted { entity: e, request: Some(pending.id) });
        ev_changed.write(TranscriptChanged { entity: e });

        let inbox_tx = inbox.sender();
        let pool = AsyncComputeTaskPool::get();
        #[cfg(not(target_arch = "wasm32"))]
        let rt = rt.0.clone();

        // spawn an async compute task; internally we hand off to tokio (native).
        pool.spawn(async move {
            let run = stream_reply(pending, inbox_emitter(inbox_tx, e));

            #[cfg(target_arch = "wasm32")]
            {
                // wasm path: just await directly (no tokio).
                run.await;
            }
            #[cfg(not(target_arch = "wasm32"))]
            {
                // native: hand off to tokio so bevy pools stay free.
                let _ = rt.spawn(run).await;
            }
        })
        .detach();
    }
}

/// drains the inbox in arrival order and applies each event to its session.
pub(crate) fn drain_chat_inbox(
    inbox: Res<StreamInbox>,
    mut q: Query<&mut ChatPipeline>,
    mut ev_changed: EventWriter<TranscriptChanged>,
    mut ev_resolved: EventWriter<ChatResolved>,
) {
    // drain up to a cap per frame to avoid long frames on bursty streams
    const MAX_PER_FRAME: usize = 512;
    let mut touched: Vec<Entity> = Vec::new();
    let mut resolved: Vec<ChatResolved> = Vec::new();

    for _ in 0..MAX_PER_FRAME {
        let StreamMsg { entity, event } = match inbox.rx.try_recv() {
            Ok(m) => m,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        };
        // the session may have been despawned while its reply was in flight
        let Ok(mut pipeline) = q.get_mut(entity) else {
            debug!(target: "linetab::chat", "event for missing session {:?} ignored", entity);
            continue;
        };
        match pipeline.apply(event) {
            Applied::Updated(outcome) => {
                if !touched.contains(&entity) {
                    touched.push(entity);
                }
                if let Some(outcome) = outcome {
                    resolved.push(ChatResolved { entity, outcome });
                }
            }
            Applied::Skipped | Applied::Stale => {}
        }
    }

    // one redraw per session per frame, before the resolutions
    for entity in touched {
        ev_changed.write(TranscriptChanged { entity });
    }
    for r in resolved {
        ev_resolved.write(r);
    }
}

fn expire_stalled_chats(
    time: Res<Time<Real>>,
    mut q: Query<(Entity, &mut ChatPipeline)>,
    mut ev_changed: EventWriter<TranscriptChanged>,
    mut ev_resolved: EventWriter<ChatResolved>,
) {
    let now = time.elapsed();
    for (e, mut pipeline) in &mut q {
        if let Some(id) = pipeline.expire(now) {
            warn!(target: "linetab::chat", "{} timed out for entity={:?}", id, e);
            ev_changed.write(TranscriptChanged { entity: e });
            ev_resolved.write(ChatResolved { entity: e, outcome: Outcome::Failed });
        }
    }
}
