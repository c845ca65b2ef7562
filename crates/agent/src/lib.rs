//! The codeclaw agent: session tracking, prompt assembly, tool dispatch and
//! the turn loop that ties them together.
//!
//! A turn moves through **Building → Calling → Streaming → ToolDispatch /
//! Continuation** until the model answers without tool calls:
//!
//! 1. **Build** the system context (refreshed only when its fingerprint changes)
//! 2. **Call** the provider, streaming deltas to observers
//! 3. **Dispatch** tool calls: parallel when harmless, approved one by one when sensitive
//! 4. **Continue** when a response was cut off by the token limit
//! 5. **Commit** the turn to the transcript and memory, compressing when due

pub mod agent;
pub mod callbacks;
pub mod compression;
pub mod dispatch;
pub mod insight;
pub mod prompt;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod token;
pub mod turn;

pub use agent::{Agent, AgentSettings, CONTINUE_PROMPT};
pub use callbacks::{StatusCallback, StreamCallback, ToolCallbacks};
pub use dispatch::Dispatcher;
pub use prompt::{PromptBuilder, TaskContext};
pub use session::{ContextStats, SessionManager};
pub use turn::TurnState;
