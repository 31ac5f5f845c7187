//! Session controller: the state machine behind one document conversation.
//!
//! A session owns at most one document at a time. Uploading runs extraction
//! and a one-time summarisation; afterwards free-form questions are answered
//! against the full replayed transcript. The session is an explicit value
//! handed to every operation, never ambient state.

use thiserror::Error;

use crate::extract::{self, DocumentFormat, ExtractError};
use crate::gateway::{CompletionGateway, GatewayError};
use crate::transcript::{Message, Transcript};

/// Prompt template for the one-time summarisation request.
const SUMMARY_PROMPT_PREFIX: &str = "Summarize the following content:";

/// Lead-in prepended to the model's summary before it enters the transcript.
const SUMMARY_LEAD_IN: &str = "**Based on the document you uploaded, here's a summary:**";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("document contains no extractable text")]
    NothingToSummarize,
    #[error("no document uploaded")]
    NoDocument,
    #[error("document summary is not ready yet")]
    SummaryPending,
    #[error("question must not be empty")]
    EmptyQuestion,
}

/// The uploaded document, after its bytes have been consumed by extraction.
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub format: DocumentFormat,
    /// Tabular rows dropped by the row cap, surfaced as a truncation note.
    pub skipped_rows: usize,
}

/// Where the session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No document uploaded.
    Empty,
    /// Document present, summary not yet produced.
    Ingesting,
    /// Summary produced; questions are accepted.
    Ready,
}

/// One user's document conversation: document, transcript, and the
/// once-per-document summarisation milestone.
#[derive(Debug)]
pub struct Session {
    document: Option<Document>,
    content: String,
    transcript: Transcript,
    summarized: bool,
}

impl Session {
    pub fn new(directive: &str) -> Self {
        Self {
            document: None,
            content: String::new(),
            transcript: Transcript::new(directive),
            summarized: false,
        }
    }

    pub fn state(&self) -> SessionState {
        match (&self.document, self.summarized) {
            (None, _) => SessionState::Empty,
            (Some(_), false) => SessionState::Ingesting,
            (Some(_), true) => SessionState::Ready,
        }
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }
}

/// Drives sessions through upload, one-shot summarisation, and Q&A turns.
///
/// Methods take `&mut Session`, so at most one gateway call is outstanding
/// per session by construction.
pub struct SessionController<G: CompletionGateway> {
    gateway: G,
    directive: String,
    row_cap: usize,
}

impl<G: CompletionGateway> SessionController<G> {
    pub fn new(gateway: G, directive: impl Into<String>, row_cap: usize) -> Self {
        Self {
            gateway,
            directive: directive.into(),
            row_cap,
        }
    }

    /// Create a session initialised with this controller's system directive.
    pub fn new_session(&self) -> Session {
        Session::new(&self.directive)
    }

    /// Accept an upload: replace any current document, extract its text, and
    /// summarise it once.
    ///
    /// On extraction failure or an empty document the session stays in
    /// `Ingesting` with the error surfaced to the caller; on a gateway
    /// failure the extracted text is retained and `summarize` may be called
    /// again to retry.
    pub async fn upload(
        &self,
        session: &mut Session,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<(), SessionError> {
        // A new upload while a document is present implies a reset first.
        self.remove(session);

        let format = DocumentFormat::from_filename(filename)
            .ok_or_else(|| ExtractError::UnsupportedFormat(filename.to_string()))?;

        session.document = Some(Document {
            filename: filename.to_string(),
            format,
            skipped_rows: 0,
        });

        let extraction = extract::extract(filename, bytes, self.row_cap)?;
        if let Some(doc) = session.document.as_mut() {
            doc.skipped_rows = extraction.skipped_rows;
        }
        session.content = extraction.text;

        self.summarize(session).await
    }

    /// Run the one-time summarisation for the current document.
    ///
    /// The synthetic prompt and the reply are only appended together after
    /// the gateway call succeeds, keeping the append-only transcript free of
    /// dangling prompts; a failed attempt leaves the session unchanged and
    /// retryable.
    pub async fn summarize(&self, session: &mut Session) -> Result<(), SessionError> {
        if session.document.is_none() {
            return Err(SessionError::NoDocument);
        }
        if session.summarized {
            return Ok(());
        }
        if session.content.trim().is_empty() {
            return Err(SessionError::NothingToSummarize);
        }

        let prompt = Message::synthetic(format!(
            "{SUMMARY_PROMPT_PREFIX}\n\n{}",
            session.content
        ));

        let mut messages = session.transcript.for_completion().to_vec();
        messages.push(prompt.clone());
        let summary = self.gateway.complete(&messages).await?;

        session.transcript.append(prompt);
        session
            .transcript
            .append(Message::assistant(format!("{SUMMARY_LEAD_IN}\n\n{summary}")));
        session.summarized = true;
        Ok(())
    }

    /// Answer one user question against the full transcript.
    ///
    /// Only valid in `Ready`. A gateway failure is absorbed into the
    /// transcript as an assistant-rendered error message so the conversation
    /// can continue; the returned text is whatever was appended.
    pub async fn ask(&self, session: &mut Session, text: &str) -> Result<String, SessionError> {
        match session.state() {
            SessionState::Empty => return Err(SessionError::NoDocument),
            SessionState::Ingesting => return Err(SessionError::SummaryPending),
            SessionState::Ready => {}
        }
        if text.trim().is_empty() {
            return Err(SessionError::EmptyQuestion);
        }

        session.transcript.append(Message::user(text));

        let reply = match self
            .gateway
            .complete(session.transcript.for_completion())
            .await
        {
            Ok(reply) => reply,
            Err(e) => format!("API error: {e}"),
        };
        session.transcript.append(Message::assistant(reply.clone()));
        Ok(reply)
    }

    /// Drop the document and return to the initial state.
    pub fn remove(&self, session: &mut Session) {
        session.document = None;
        session.content.clear();
        session.summarized = false;
        session.transcript.reset(&self.directive);
    }
}

#[cfg(test)]
mod tests {
    use super::{Session, SessionController, SessionError, SessionState};
    use crate::gateway::{CompletionGateway, GatewayError};
    use crate::transcript::{Message, Role};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const DIRECTIVE: &str = "You are a helpful assistant.";

    /// Gateway double that replays scripted outcomes and records call counts.
    struct ScriptedGateway {
        outcomes: Mutex<Vec<Result<String, GatewayError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedGateway {
        fn replying(replies: &[&str]) -> Self {
            Self {
                outcomes: Mutex::new(
                    replies.iter().rev().map(|r| Ok(r.to_string())).collect(),
                ),
                calls: Mutex::new(0),
            }
        }

        fn failing_then(replies: &[&str]) -> Self {
            let mut outcomes: Vec<Result<String, GatewayError>> =
                replies.iter().rev().map(|r| Ok(r.to_string())).collect();
            outcomes.push(Err(GatewayError::Status(
                reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            )));
            Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl<'a> CompletionGateway for &'a ScriptedGateway {
        async fn complete(&self, _messages: &[Message]) -> Result<String, GatewayError> {
            *self.calls.lock().unwrap() += 1;
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("default reply".to_string()))
        }
    }

    fn controller(gateway: &ScriptedGateway) -> SessionController<&ScriptedGateway> {
        SessionController::new(gateway, DIRECTIVE, 20)
    }

    async fn ready_session(
        controller: &SessionController<&ScriptedGateway>,
    ) -> Session {
        let mut session = controller.new_session();
        controller
            .upload(&mut session, "notes.txt", b"hello world".to_vec())
            .await
            .expect("upload should succeed");
        session
    }

    #[tokio::test]
    async fn upload_summarises_once_and_reaches_ready() {
        let gateway = ScriptedGateway::replying(&["a fine summary"]);
        let controller = controller(&gateway);
        let session = ready_session(&controller).await;

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(gateway.calls(), 1);

        // Display snapshot: exactly one assistant message, the summary.
        let display = session.transcript().for_display();
        assert_eq!(display.len(), 1);
        assert_eq!(display[0].role, Role::Assistant);
        assert!(display[0].content.contains("a fine summary"));
        assert!(display[0]
            .content
            .starts_with("**Based on the document you uploaded"));
    }

    #[tokio::test]
    async fn ask_before_summary_is_rejected_without_side_effects() {
        let gateway = ScriptedGateway::failing_then(&[]);
        let controller = controller(&gateway);
        let mut session = controller.new_session();

        // Summarisation fails, leaving the session ingesting.
        let err = controller
            .upload(&mut session, "notes.txt", b"hello world".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Gateway(_)));
        assert_eq!(session.state(), SessionState::Ingesting);
        assert_eq!(session.transcript().len(), 1);

        let before = session.transcript().len();
        let calls_before = gateway.calls();
        let err = controller
            .ask(&mut session, "what page mentions X?")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::SummaryPending));
        assert_eq!(session.transcript().len(), before);
        assert_eq!(gateway.calls(), calls_before);
    }

    #[tokio::test]
    async fn failed_summarisation_can_be_retried() {
        let gateway = ScriptedGateway::failing_then(&["second time lucky"]);
        let controller = controller(&gateway);
        let mut session = controller.new_session();

        controller
            .upload(&mut session, "notes.txt", b"hello world".to_vec())
            .await
            .unwrap_err();
        assert_eq!(session.state(), SessionState::Ingesting);

        controller
            .summarize(&mut session)
            .await
            .expect("retry should succeed");
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.transcript().len(), 3);
    }

    #[tokio::test]
    async fn summarize_is_a_noop_once_summarised() {
        let gateway = ScriptedGateway::replying(&["summary"]);
        let controller = controller(&gateway);
        let mut session = ready_session(&controller).await;

        controller.summarize(&mut session).await.unwrap();
        assert_eq!(gateway.calls(), 1);
        assert_eq!(session.transcript().len(), 3);
    }

    #[tokio::test]
    async fn ask_appends_user_turn_and_reply() {
        let gateway = ScriptedGateway::replying(&["summary", "the answer"]);
        let controller = controller(&gateway);
        let mut session = ready_session(&controller).await;

        let reply = controller
            .ask(&mut session, "what does it say?")
            .await
            .unwrap();
        assert_eq!(reply, "the answer");

        let display = session.transcript().for_display();
        assert_eq!(display.len(), 3); // summary, question, answer
        assert_eq!(display[1].role, Role::User);
        assert_eq!(display[2].content, "the answer");
        // The synthetic prompt is still replayed to the service.
        assert_eq!(session.transcript().for_completion().len(), 5);
    }

    #[tokio::test]
    async fn gateway_failure_during_ask_is_absorbed() {
        let gateway = ScriptedGateway::replying(&["summary"]);
        let controller = controller(&gateway);
        let mut session = ready_session(&controller).await;

        {
            let mut outcomes = gateway.outcomes.lock().unwrap();
            outcomes.push(Err(GatewayError::Status(
                reqwest::StatusCode::BAD_GATEWAY,
            )));
        }

        let before = session.transcript().len();
        let reply = controller.ask(&mut session, "still there?").await.unwrap();
        assert!(reply.contains("API error"));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.transcript().len(), before + 2);
        assert_eq!(
            session.transcript().last().unwrap().role,
            Role::Assistant
        );

        // The next turn still works.
        let reply = controller.ask(&mut session, "and now?").await.unwrap();
        assert_eq!(reply, "default reply");
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let gateway = ScriptedGateway::replying(&["summary"]);
        let controller = controller(&gateway);
        let mut session = ready_session(&controller).await;

        let before = session.transcript().len();
        let err = controller.ask(&mut session, "   ").await.unwrap_err();
        assert!(matches!(err, SessionError::EmptyQuestion));
        assert_eq!(session.transcript().len(), before);
    }

    #[tokio::test]
    async fn ask_without_a_document_is_rejected() {
        let gateway = ScriptedGateway::replying(&[]);
        let controller = controller(&gateway);
        let mut session = controller.new_session();

        let err = controller.ask(&mut session, "hello?").await.unwrap_err();
        assert!(matches!(err, SessionError::NoDocument));
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn remove_returns_to_empty_from_any_state() {
        let gateway = ScriptedGateway::replying(&["summary", "answer"]);
        let controller = controller(&gateway);
        let mut session = ready_session(&controller).await;
        controller.ask(&mut session, "q").await.unwrap();

        controller.remove(&mut session);
        assert_eq!(session.state(), SessionState::Empty);
        assert_eq!(session.transcript().len(), 1);
        assert_eq!(session.transcript().for_completion()[0].role, Role::System);
        assert!(session.document().is_none());

        // Removing again is harmless.
        controller.remove(&mut session);
        assert_eq!(session.state(), SessionState::Empty);
        assert_eq!(session.transcript().len(), 1);
    }

    #[tokio::test]
    async fn new_upload_resets_the_previous_conversation() {
        let gateway = ScriptedGateway::replying(&["first summary", "second summary"]);
        let controller = controller(&gateway);
        let mut session = ready_session(&controller).await;

        controller
            .upload(&mut session, "other.txt", b"different content".to_vec())
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.document().unwrap().filename, "other.txt");
        let display = session.transcript().for_display();
        assert_eq!(display.len(), 1);
        assert!(display[0].content.contains("second summary"));
    }

    #[tokio::test]
    async fn extraction_failure_keeps_session_ingesting() {
        let gateway = ScriptedGateway::replying(&[]);
        let controller = controller(&gateway);
        let mut session = controller.new_session();

        let err = controller
            .upload(&mut session, "notes.txt", vec![0xff, 0xfe])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Extract(_)));
        assert_eq!(session.state(), SessionState::Ingesting);
        assert_eq!(session.transcript().len(), 1);
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn empty_document_is_not_summarised() {
        let gateway = ScriptedGateway::replying(&[]);
        let controller = controller(&gateway);
        let mut session = controller.new_session();

        let err = controller
            .upload(&mut session, "blank.txt", b"   \n".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NothingToSummarize));
        assert_eq!(session.state(), SessionState::Ingesting);
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn unsupported_upload_leaves_the_session_empty() {
        let gateway = ScriptedGateway::replying(&[]);
        let controller = controller(&gateway);
        let mut session = controller.new_session();

        let err = controller
            .upload(&mut session, "image.png", vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Extract(_)));
        assert_eq!(session.state(), SessionState::Empty);
    }

    #[tokio::test]
    async fn truncation_is_reported_on_the_document() {
        let gateway = ScriptedGateway::replying(&["summary"]);
        let controller = controller(&gateway);
        let mut session = controller.new_session();

        let mut data = String::from("id,name\n");
        for i in 0..50 {
            data.push_str(&format!("{i},row{i}\n"));
        }
        controller
            .upload(&mut session, "big.csv", data.into_bytes())
            .await
            .unwrap();
        assert_eq!(session.document().unwrap().skipped_rows, 31);
    }
}
