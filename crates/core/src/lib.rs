//! Rabbit Hole Core
//!
//! The research/narration state machine behind a curiosity walk: starting from
//! a topic, the model explores it, proposes tangents, picks the most intriguing
//! unvisited one, and repeats for a bounded number of hops before narrating
//! the journey as streamed prose.
//!
//! The task runner, the live narration transport and the model provider are
//! collaborators reached through narrow interfaces: [`llm_client::LLMClient`],
//! [`relay::NarrationSink`] and [`progress::ProgressReporter`].

pub mod error;
pub mod gateway;
pub mod gemini;
pub mod journey;
pub mod llm_client;
pub mod personality;
pub mod progress;
pub mod relay;
pub mod walk;

pub use error::{Error, Result};
pub use gateway::ModelGateway;
pub use journey::{Hop, Journey, RabbitHoleInput, RabbitHoleResult};
pub use personality::Personality;
pub use walk::WalkController;
