//! conversation transcript and the reducers that move it forward.
//!
//! a [`Transcript`] is an immutable snapshot. every reducer takes a snapshot
//! and returns a new one; finished turns are shared between snapshots through
//! `Arc`, so only the streaming tail is ever rebuilt. renderers can hold on to
//! whatever snapshot they last saw without observing a half-applied update.

use std::sync::Arc;

use llm::chat::ChatMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// one message in the chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    /// true only while the assistant reply is still being appended to.
    pub is_streaming: bool,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), is_streaming: false }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), is_streaming: false }
    }

    /// empty assistant turn waiting for fragments.
    pub fn placeholder() -> Self {
        Self { role: Role::Assistant, content: String::new(), is_streaming: true }
    }

    /// the `llm` message for this turn.
    pub fn to_chat_message(&self) -> ChatMessage {
        match self.role {
            Role::User => ChatMessage::user().content(self.content.clone()).build(),
            Role::Assistant => ChatMessage::assistant().content(self.content.clone()).build(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transcript {
    turns: Vec<Arc<ConversationTurn>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> impl ExactSizeIterator<Item = &ConversationTurn> + '_ {
        self.turns.iter().map(Arc::as_ref)
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last().map(Arc::as_ref)
    }

    /// the in-progress reply, if any.
    pub fn streaming_turn(&self) -> Option<&ConversationTurn> {
        self.last().filter(|t| t.is_streaming)
    }

    pub fn streaming_count(&self) -> usize {
        self.turns().filter(|t| t.is_streaming).count()
    }

    /// true when `other` still shares the turn at `index` with `self`.
    pub fn shares_turn(&self, other: &Transcript, index: usize) -> bool {
        match (self.turns.get(index), other.turns.get(index)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn appended(&self, turn: ConversationTurn) -> Self {
        let mut turns = self.turns.clone();
        turns.push(Arc::new(turn));
        Self { turns }
    }

    /// rebuilds the tail if it is streaming; anything else returns an
    /// unchanged copy.
    fn with_streaming_tail(&self, edit: impl FnOnce(&mut ConversationTurn)) -> Self {
        let mut turns = self.turns.clone();
        if let Some(last) = turns.last_mut()
            && last.is_streaming
        {
            let mut tail = (**last).clone();
            edit(&mut tail);
            *last = Arc::new(tail);
        }
        Self { turns }
    }
}

pub fn push_user(transcript: &Transcript, text: impl Into<String>) -> Transcript {
    transcript.appended(ConversationTurn::user(text))
}

/// appends the streaming placeholder. a transcript that already has one is
/// returned unchanged so the single-streaming-turn invariant holds.
pub fn open_reply(transcript: &Transcript) -> Transcript {
    if transcript.streaming_turn().is_some() {
        return transcript.clone();
    }
    transcript.appended(ConversationTurn::placeholder())
}

/// concatenates one fragment onto the streaming reply. empty fragments and
/// transcripts without a streaming tail come back unchanged.
pub fn apply_fragment(transcript: &Transcript, fragment: &str) -> Transcript {
    if fragment.is_empty() {
        return transcript.clone();
    }
    transcript.with_streaming_tail(|turn| turn.content.push_str(fragment))
}

/// marks the streaming reply as done; it becomes immutable history.
pub fn finish_reply(transcript: &Transcript) -> Transcript {
    transcript.with_streaming_tail(|turn| turn.is_streaming = false)
}

/// overwrites the streaming reply with fixed text and closes it.
pub fn replace_reply(transcript: &Transcript, text: &str) -> Transcript {
    transcript.with_streaming_tail(|turn| {
        turn.content.clear();
        turn.content.push_str(text);
        turn.is_streaming = false;
    })
}
