//! JDK upgrade assistant.
//!
//! Wires the `buildfix` loop to an OpenAI-compatible chat endpoint, a
//! terminal reviewer and an optional plan of initial changes.

pub mod cli;
pub mod config;
pub mod llm;
pub mod plan;
pub mod review;

pub use config::EndpointConfig;
pub use llm::ChatClient;
pub use review::TerminalReviewer;
