use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatRecord, Message};
use crate::directory::ChatDirectory;
use crate::error::TurnError;
use crate::models::LanguageModel;
use crate::storage::ChatStore;

/// Synthetic assistant message substituted when the completion stream fails
/// mid-turn. Kept in memory only; the next explicit save persists it.
pub const STREAM_FAILED_MESSAGE: &str = "ERROR: CONNECTION TERMINATED. RETRY SEQUENCE.";

/// System notice appended when the assistant turn finished streaming but the
/// final persist failed, so the visible answer is ahead of the store.
pub const SAVE_FAILED_NOTICE: &str = "ERROR: ARCHIVE WRITE FAILED. RESPONSE NOT SAVED.";

/// The client's in-memory view of a chat, possibly ahead of the store while
/// a turn is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingChat {
    pub id: String,
    pub name: String,
    pub messages: Vec<Message>,
}

impl From<ChatRecord> for WorkingChat {
    fn from(record: ChatRecord) -> Self {
        Self { id: record.id, name: record.name, messages: record.messages }
    }
}

/// Terminal state of one submitted turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Empty prompt and no attachments: nothing happened.
    Skipped,
    /// Stream ended normally; assistant message appended and persisted.
    Completed,
    /// Stream ended normally but the final persist failed; the transcript
    /// carries the assistant message plus a save-failed notice, the store
    /// still holds only the user turn.
    CompletedSaveFailed,
    /// User stop: transcript holds only the user turn, nothing of the
    /// partial response survives.
    Cancelled,
    /// Stream error: a synthetic assistant message was appended in memory.
    Failed,
}

/// Drives one turn at a time against the store and the completion API.
///
/// Holds the single-writer guard and the cancellation handle for the turn in
/// flight; all per-turn state lives in the caller's [`WorkingChat`].
pub struct Orchestrator<S, M> {
    store: Arc<S>,
    model: Arc<M>,
    directory: ChatDirectory<S>,
    in_flight: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

enum StreamEnd {
    Completed,
    Cancelled,
    Failed(anyhow::Error),
}

impl<S: ChatStore, M: LanguageModel> Orchestrator<S, M> {
    pub fn new(store: Arc<S>, model: Arc<M>) -> Self {
        let directory = ChatDirectory::new(store.clone());
        Self {
            store,
            model,
            directory,
            in_flight: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    pub fn directory(&self) -> &ChatDirectory<S> {
        &self.directory
    }

    /// Handle for the turn in flight, if any. Cloned per caller; cleared at
    /// every terminal transition.
    pub fn cancel_handle(&self) -> Option<CancellationToken> {
        self.cancel.lock().expect("cancel lock poisoned").clone()
    }

    /// Request cooperative cancellation of the turn in flight. No-op when
    /// idle.
    pub fn cancel(&self) {
        if let Some(token) = self.cancel_handle() {
            token.cancel();
        }
    }

    /// Submit one turn: append the user message, persist, stream the
    /// response into `on_live` (called with the full accumulated text after
    /// each fragment), then commit exactly once.
    ///
    /// `chat` is `None` when no session is active; one is created and
    /// adopted before anything is persisted.
    pub async fn submit(
        &self,
        chat: &mut Option<WorkingChat>,
        prompt: &str,
        model_id: &str,
        mut on_live: impl FnMut(&str),
    ) -> Result<TurnOutcome, TurnError> {
        // Orchestration-level guard: two concurrent streams must never race
        // their final saves. The flag is released on every exit path.
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(TurnError::TurnInFlight);
        }
        let _guard = TurnGuard(self);

        let attachments = match chat.as_ref() {
            Some(active) => self.store.load_attachments(&active.id).await?,
            None => Vec::new(),
        };
        if prompt.trim().is_empty() && attachments.is_empty() {
            return Ok(TurnOutcome::Skipped);
        }

        if chat.is_none() {
            *chat = Some(self.directory.create_chat().await?.into());
        }
        let active = chat.as_mut().expect("active chat just ensured");

        // Optimistic pre-turn persist: the user's input must survive even if
        // the completion call fails outright.
        active.messages.push(Message::user(prompt));
        if let Err(e) = self
            .store
            .save_chat(&active.id, Some(&active.name), Some(&active.messages))
            .await
        {
            tracing::error!(chat = %active.id, error = %e, "pre-turn save failed, turn aborted");
            active.messages.push(Message::system(format!("ERROR: SESSION ARCHIVE OFFLINE: {e}")));
            return Err(TurnError::PersistUserTurn(e));
        }

        let outbound = assemble_outbound(
            &self.system_prompt_or_empty().await,
            &active.messages,
            &attachments.iter().map(|f| f.content.as_str()).collect::<Vec<_>>(),
        );

        let token = CancellationToken::new();
        *self.cancel.lock().expect("cancel lock poisoned") = Some(token.clone());

        let mut stream = match self.model.stream_chat(model_id, &outbound).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(chat = %active.id, error = %e, "completion call failed to start");
                active.messages.push(Message::assistant(STREAM_FAILED_MESSAGE));
                return Ok(TurnOutcome::Failed);
            }
        };

        let mut accumulator = String::new();
        let end = loop {
            tokio::select! {
                // Cancellation wins over an already-arrived fragment: late
                // increments are discarded, not applied.
                biased;
                _ = token.cancelled() => break StreamEnd::Cancelled,
                next = stream.next() => match next {
                    Some(Ok(fragment)) => {
                        accumulator.push_str(&fragment);
                        on_live(&accumulator);
                    }
                    Some(Err(e)) => break StreamEnd::Failed(e),
                    None => break StreamEnd::Completed,
                },
            }
        };
        drop(stream);

        match end {
            StreamEnd::Completed => {
                active.messages.push(Message::assistant(accumulator));
                match self
                    .store
                    .save_chat(&active.id, Some(&active.name), Some(&active.messages))
                    .await
                {
                    Ok(()) => {
                        tracing::info!(chat = %active.id, "turn completed");
                        Ok(TurnOutcome::Completed)
                    }
                    Err(e) => {
                        tracing::error!(chat = %active.id, error = %e, "post-turn save failed");
                        active.messages.push(Message::system(SAVE_FAILED_NOTICE));
                        Ok(TurnOutcome::CompletedSaveFailed)
                    }
                }
            }
            StreamEnd::Cancelled => {
                tracing::info!(chat = %active.id, "turn cancelled, partial response discarded");
                Ok(TurnOutcome::Cancelled)
            }
            StreamEnd::Failed(e) => {
                tracing::warn!(chat = %active.id, error = %e, "stream failed mid-turn");
                active.messages.push(Message::assistant(STREAM_FAILED_MESSAGE));
                Ok(TurnOutcome::Failed)
            }
        }
    }

    async fn system_prompt_or_empty(&self) -> String {
        match self.store.load_system_prompt().await {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!(error = %e, "system prompt unreadable, sending without it");
                String::new()
            }
        }
    }
}

/// Releases the single-writer flag and the cancellation handle on every exit
/// path out of `submit`.
struct TurnGuard<'a, S, M>(&'a Orchestrator<S, M>);

impl<S, M> Drop for TurnGuard<'_, S, M> {
    fn drop(&mut self) {
        *self.0.cancel.lock().expect("cancel lock poisoned") = None;
        self.0.in_flight.store(false, Ordering::Release);
    }
}

/// The outbound sequence for one completion call: system prompt first (only
/// if non-empty), then the working transcript, then one system message with
/// all attachment contents joined by newlines (only if any).
fn assemble_outbound(
    system_prompt: &str,
    transcript: &[Message],
    attachment_contents: &[&str],
) -> Vec<Message> {
    let mut outbound = Vec::with_capacity(transcript.len() + 2);
    if !system_prompt.is_empty() {
        outbound.push(Message::system(system_prompt));
    }
    outbound.extend_from_slice(transcript);
    if !attachment_contents.is_empty() {
        outbound.push(Message::system(attachment_contents.join("\n")));
    }
    outbound
}
