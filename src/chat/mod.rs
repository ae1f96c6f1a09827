//! the site's product assistant: a transcript, a single-flight streaming
//! pipeline in front of a completion service, and the bevy plugin that drives
//! it.

pub mod content;
pub mod pipeline;
pub mod plugin;
pub mod service;
pub mod transcript;

pub use content::{INPUT_PLACEHOLDER, OFFLINE_FALLBACK, RETRY_APOLOGY, SYSTEM_PROMPT};
pub use pipeline::{
    Applied, ChatPipeline, ChatSettings, Outcome, PendingReply, Phase, RequestId, StreamEvent,
    StreamEventKind, Submission, SubmitRejected, stream_reply,
};
#[cfg(not(target_arch = "wasm32"))]
pub use plugin::TokioRt;
pub use plugin::{
    ChatAssistantPlugin, ChatClosed, ChatInput, ChatRejected, ChatResolved, ChatSet, ChatSubmitted,
    StreamInbox, StreamMsg, TranscriptChanged, close_chat, send_user_text,
};
pub use service::{
    CompletionRequest, CompletionService, Fragment, FragmentStream, LlmCompletionService, connect,
};
pub use transcript::{
    ConversationTurn, Role, Transcript, apply_fragment, finish_reply, open_reply, push_user,
    replace_reply,
};
