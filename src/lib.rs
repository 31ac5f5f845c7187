//! # Dossier
//!
//! A CLI application for chatting with local documents through LLMs.
//!
//! ## Features
//!
//! - **Single-pass ingestion**: TXT, PDF, CSV, and XLSX files become plain text, with tabular input capped to bound prompt size
//! - **One summary per document**: every upload is summarised exactly once before Q&A opens
//! - **Replayable transcript**: the full ordered conversation is resent on each completion call, so the remote service stays stateless

pub mod config;
pub mod extract;
pub mod gateway;
pub mod session;
pub mod transcript;

pub use config::Config;
pub use gateway::{CompletionGateway, OpenRouterGateway};
pub use session::{Session, SessionController, SessionState};
pub use transcript::{Message, Role, Transcript};
