//! VocabVoyage dispatch core.
//!
//! Routes free-text vocabulary-learning requests to one of the registered
//! content-generation capabilities (word lookup, topic vocabulary, quiz
//! generation) or to a direct conversational answer, then assembles the
//! result into the conversation state.
//!
//! # Architecture
//!
//! One turn is one pass through an explicit state machine:
//!
//! 1. **Route** (`workflow`) - one classification call to the generation
//!    adapter over the full history
//! 2. **Invoke or answer directly** - at most one capability from the
//!    read-only `registry` runs, optionally pulling passages through the
//!    `retrieval` adapter
//! 3. **Assemble** (`conversation`) - the produced text is appended as one
//!    assistant message
//!
//! Recoverable adapter failures degrade inside the workflow instead of
//! surfacing to the caller; persistence and presentation live outside this
//! crate, which only exposes `TurnWorkflow::process_turn`.

pub mod capabilities;
pub mod conversation;
pub mod error;
pub mod generation;
pub mod prompts;
pub mod registry;
pub mod retrieval;
pub mod workflow;

pub use conversation::{ConversationState, DIRECT_ORIGIN, Message, Role, assemble};
pub use error::{GenerationError, RegistryError, RetrievalError, TurnError};
pub use generation::{Decision, GenerationClient, OpenAiGenerationClient};
pub use registry::{
    CapabilityDescriptor, CapabilityHandler, CapabilityOutput, CapabilityRegistry, CapabilitySpec,
};
pub use retrieval::{HttpRetriever, RetrievedPassage, Retriever};
pub use workflow::TurnWorkflow;
