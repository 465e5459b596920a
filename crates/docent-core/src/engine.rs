//! The grounded answer engine: retrieve → assemble → generate → cite.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use docent_index::IndexError;
use docent_index::retriever::Retriever;
use docent_llm::provider::ChatStream;
use docent_llm::{LlmError, LlmProvider};

use crate::context::{AssemblerConfig, Citation, PromptPayload, assemble};
use crate::error::{EngineError, Result};
use crate::history::{ConversationHistory, Turn};

/// Fixed response when retrieval finds nothing above the relevance floor.
/// Generation is skipped entirely so the model cannot answer off-corpus
/// questions from pretrained knowledge.
pub const INSUFFICIENT_INFORMATION: &str = "I don't have enough information in the \
documentation to answer that. Try rephrasing your question, or ask about a topic \
the documentation covers.";

/// Apology for transient upstream trouble; a retry from the caller may
/// succeed.
pub const TRANSIENT_APOLOGY: &str = "The documentation assistant is temporarily \
unavailable. Please try again in a moment.";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retries after rate-limited generation attempts before degrading.
    pub max_retries: u32,
    pub embed_timeout: Duration,
    pub generate_timeout: Duration,
    pub assembler: AssemblerConfig,
    /// Conversation turns kept per session.
    pub history_turns: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            embed_timeout: Duration::from_secs(15),
            generate_timeout: Duration::from_secs(90),
            assembler: AssemblerConfig::default(),
            history_turns: 5,
        }
    }
}

/// The answer returned to the caller, with the citations that ground it
/// and flags describing how it was produced.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
    /// Context was dropped to fit the generation budget.
    pub truncated: bool,
    /// Upstream trouble replaced the answer with an apology.
    pub degraded: bool,
    /// The caller cancelled mid-stream; `text` is the partial output.
    pub cancelled: bool,
    pub provider: String,
    pub elapsed: Duration,
}

enum Prepared {
    Ready(PromptPayload),
    NoContext,
    Unavailable,
}

enum Generated {
    Text(String),
    Degraded,
}

/// One engine serves many sessions. The retriever and generator are
/// injected so tests run against fakes; each session owns its bounded
/// history; the index snapshot is shared read-only.
pub struct Engine<G: LlmProvider, E: LlmProvider> {
    generator: Arc<G>,
    retriever: Retriever<E>,
    sessions: Mutex<HashMap<String, ConversationHistory>>,
    config: EngineConfig,
}

impl<G: LlmProvider, E: LlmProvider> Engine<G, E> {
    #[must_use]
    pub fn new(generator: Arc<G>, retriever: Retriever<E>, config: EngineConfig) -> Self {
        Self {
            generator,
            retriever,
            sessions: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Answer a question from the corpus, blocking until generation
    /// completes.
    ///
    /// Transient upstream failures degrade into an apology answer;
    /// `Err` means operator attention is needed.
    ///
    /// # Errors
    ///
    /// `EngineError::Fatal` on non-retryable provider failures,
    /// `EngineError::Index` on index/configuration errors.
    ///
    /// # Panics
    ///
    /// Panics if the session table mutex is poisoned.
    pub async fn ask(&self, question: &str, session_id: &str) -> Result<Answer> {
        let start = Instant::now();

        let payload = match self.prepare(question, session_id).await? {
            Prepared::Ready(payload) => payload,
            Prepared::NoContext => {
                let answer = self.no_context_answer(start);
                self.record_turn(session_id, question, &answer);
                return Ok(answer);
            }
            Prepared::Unavailable => return Ok(self.degraded_answer(start)),
        };

        let text = match self.generate_with_retry(&payload).await? {
            Generated::Text(text) => text,
            Generated::Degraded => return Ok(self.degraded_answer(start)),
        };

        let answer = self.finish(text, &payload, start, false);
        self.record_turn(session_id, question, &answer);
        Ok(answer)
    }

    /// Streaming variant: tokens are forwarded to `sink` in generation
    /// order, whole; cancellation is checked between emissions, so the
    /// sink never sees a half-written citation marker. On cancellation
    /// the partial answer is returned with `cancelled = true`.
    ///
    /// # Errors
    ///
    /// Same contract as [`Engine::ask`].
    ///
    /// # Panics
    ///
    /// Panics if the session table mutex is poisoned.
    pub async fn ask_stream(
        &self,
        question: &str,
        session_id: &str,
        sink: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<Answer> {
        let start = Instant::now();

        let payload = match self.prepare(question, session_id).await? {
            Prepared::Ready(payload) => payload,
            Prepared::NoContext => {
                let answer = self.no_context_answer(start);
                let _ = sink.send(answer.text.clone()).await;
                self.record_turn(session_id, question, &answer);
                return Ok(answer);
            }
            Prepared::Unavailable => {
                let answer = self.degraded_answer(start);
                let _ = sink.send(answer.text.clone()).await;
                return Ok(answer);
            }
        };

        let stream = match self.open_stream_with_retry(&payload).await? {
            Some(stream) => stream,
            None => {
                let answer = self.degraded_answer(start);
                let _ = sink.send(answer.text.clone()).await;
                return Ok(answer);
            }
        };

        let (text, cancelled, mid_stream_failure) =
            self.consume_stream(stream, &sink, &cancel).await;

        if text.is_empty() && mid_stream_failure {
            let answer = self.degraded_answer(start);
            let _ = sink.send(answer.text.clone()).await;
            return Ok(answer);
        }

        let mut answer = self.finish(text, &payload, start, mid_stream_failure);
        answer.cancelled = cancelled;
        self.record_turn(session_id, question, &answer);
        Ok(answer)
    }

    /// Recent turns for a session, oldest first. Empty for unknown
    /// sessions.
    ///
    /// # Panics
    ///
    /// Panics if the session table mutex is poisoned.
    #[must_use]
    pub fn recent_turns(&self, session_id: &str, n: usize) -> Vec<Turn> {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(session_id).map_or_else(Vec::new, |history| {
            history.recent(n).into_iter().cloned().collect()
        })
    }

    /// Drop a session's history, ending the conversation.
    ///
    /// # Panics
    ///
    /// Panics if the session table mutex is poisoned.
    pub fn end_session(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    async fn prepare(&self, question: &str, session_id: &str) -> Result<Prepared> {
        let recent_questions = {
            let sessions = self.sessions.lock().unwrap();
            sessions.get(session_id).map_or_else(Vec::new, |h| {
                h.recent_questions(self.config.history_turns)
            })
        };

        let retrieval = tokio::time::timeout(
            self.config.embed_timeout,
            self.retriever.retrieve(question, &recent_questions),
        )
        .await;

        let hits = match retrieval {
            Err(_) => {
                tracing::warn!("query embedding timed out");
                return Ok(Prepared::Unavailable);
            }
            Ok(Err(IndexError::Llm(e))) => {
                if is_fatal(&e) {
                    return Err(EngineError::Fatal(e));
                }
                tracing::warn!("query embedding failed: {e}");
                return Ok(Prepared::Unavailable);
            }
            Ok(Err(e)) => return Err(EngineError::Index(e)),
            Ok(Ok(hits)) => hits,
        };

        if hits.is_empty() {
            tracing::info!("no chunks above relevance floor, skipping generation");
            return Ok(Prepared::NoContext);
        }

        let history: Vec<Turn> = {
            let sessions = self.sessions.lock().unwrap();
            sessions.get(session_id).map_or_else(Vec::new, |h| {
                h.recent(self.config.history_turns)
                    .into_iter()
                    .cloned()
                    .collect()
            })
        };
        let history_refs: Vec<&Turn> = history.iter().collect();

        Ok(Prepared::Ready(assemble(
            question,
            &hits,
            &history_refs,
            &self.config.assembler,
        )))
    }

    /// The degradation state machine for one generation request:
    /// rate-limited attempts back off and retry up to the bound, timeouts
    /// and transport failures degrade, non-retryable upstream errors are
    /// fatal. No state resumes after a degraded or fatal outcome.
    async fn generate_with_retry(&self, payload: &PromptPayload) -> Result<Generated> {
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::time::timeout(
                self.config.generate_timeout,
                self.generator.chat(&payload.messages),
            )
            .await;

            match outcome {
                Err(_) => {
                    tracing::warn!("generation timed out");
                    return Ok(Generated::Degraded);
                }
                Ok(Ok(text)) => return Ok(Generated::Text(text)),
                Ok(Err(e)) => {
                    if !self.handle_attempt_error(e, &mut attempt).await? {
                        return Ok(Generated::Degraded);
                    }
                }
            }
        }
    }

    async fn open_stream_with_retry(&self, payload: &PromptPayload) -> Result<Option<ChatStream>> {
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::time::timeout(
                self.config.generate_timeout,
                self.generator.chat_stream(&payload.messages),
            )
            .await;

            match outcome {
                Err(_) => {
                    tracing::warn!("streaming generation timed out before first token");
                    return Ok(None);
                }
                Ok(Ok(stream)) => return Ok(Some(stream)),
                Ok(Err(e)) => {
                    if !self.handle_attempt_error(e, &mut attempt).await? {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Returns `Ok(true)` to retry the attempt, `Ok(false)` to degrade.
    async fn handle_attempt_error(&self, e: LlmError, attempt: &mut u32) -> Result<bool> {
        match e {
            LlmError::RateLimited { retry_after_secs } if *attempt < self.config.max_retries => {
                let delay =
                    Duration::from_secs(retry_after_secs.unwrap_or(1 << *attempt));
                tracing::warn!(
                    attempt = *attempt + 1,
                    max = self.config.max_retries,
                    "rate limited, retrying in {}s",
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
                *attempt += 1;
                Ok(true)
            }
            LlmError::RateLimited { .. } => {
                tracing::warn!("rate limit retries exhausted");
                Ok(false)
            }
            e if is_fatal(&e) => Err(EngineError::Fatal(e)),
            e => {
                tracing::warn!("generation attempt failed: {e}");
                Ok(false)
            }
        }
    }

    async fn consume_stream(
        &self,
        mut stream: ChatStream,
        sink: &mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> (String, bool, bool) {
        let deadline = tokio::time::Instant::now() + self.config.generate_timeout;
        let mut text = String::new();
        let mut cancelled = false;
        let mut failed = false;

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                item = tokio::time::timeout_at(deadline, stream.next()) => item,
            };

            match next {
                Err(_) => {
                    tracing::warn!("generation timed out mid-stream");
                    failed = true;
                    break;
                }
                Ok(None) => break,
                Ok(Some(Ok(token))) => {
                    if sink.send(token.clone()).await.is_err() {
                        // Receiver gone; treat like cancellation.
                        cancelled = true;
                        break;
                    }
                    text.push_str(&token);
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!("stream failed mid-generation: {e}");
                    failed = true;
                    break;
                }
            }
        }

        (text, cancelled, failed)
    }

    fn finish(
        &self,
        text: String,
        payload: &PromptPayload,
        start: Instant,
        degraded: bool,
    ) -> Answer {
        let citations = extract_citations(&text, &payload.citations);
        if citations.is_empty() && !payload.citations.is_empty() && !text.is_empty() {
            // Quality signal, not an error: the model answered from
            // retrieved context without citing it.
            tracing::warn!("groundedness: answer carries no citation markers");
        }

        Answer {
            text,
            citations,
            truncated: payload.truncated,
            degraded,
            cancelled: false,
            provider: self.generator.name().to_owned(),
            elapsed: start.elapsed(),
        }
    }

    fn no_context_answer(&self, start: Instant) -> Answer {
        Answer {
            text: INSUFFICIENT_INFORMATION.to_owned(),
            citations: Vec::new(),
            truncated: false,
            degraded: false,
            cancelled: false,
            provider: self.generator.name().to_owned(),
            elapsed: start.elapsed(),
        }
    }

    fn degraded_answer(&self, start: Instant) -> Answer {
        Answer {
            text: TRANSIENT_APOLOGY.to_owned(),
            citations: Vec::new(),
            truncated: false,
            degraded: true,
            cancelled: false,
            provider: self.generator.name().to_owned(),
            elapsed: start.elapsed(),
        }
    }

    fn record_turn(&self, session_id: &str, question: &str, answer: &Answer) {
        if answer.degraded {
            return;
        }
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| ConversationHistory::new(self.config.history_turns))
            .append(Turn {
                question: question.to_owned(),
                answer: answer.text.clone(),
                citations: answer.citations.clone(),
            });
    }
}

fn is_fatal(e: &LlmError) -> bool {
    match e {
        LlmError::Auth { .. } => true,
        // 4xx means the request itself is wrong; retrying identical
        // input cannot succeed.
        LlmError::Api { status, .. } => (400..500).contains(status),
        _ => false,
    }
}

/// Map `[n]` markers found in the answer back to the citations assigned
/// at assembly time. Markers that match nothing are dropped silently: a
/// hallucinated marker must never surface as a citation.
fn extract_citations(text: &str, assigned: &[Citation]) -> Vec<Citation> {
    let found = marker_set(text);
    assigned
        .iter()
        .filter(|c| found.contains(&c.marker))
        .cloned()
        .collect()
}

fn marker_set(text: &str) -> BTreeSet<usize> {
    let mut markers = BTreeSet::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b']'
                && let Ok(marker) = text[i + 1..j].parse()
            {
                markers.insert(marker);
            }
            i = j;
        } else {
            i += 1;
        }
    }
    markers
}
