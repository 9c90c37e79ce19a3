//! # Lumen Core
//!
//! Resilient client for multi-endpoint LLM gateways.
//!
//! The UI layers sitting on top of this crate present a single operation —
//! send a chat-completion request, get a structured reply or a well-defined
//! degraded response — and this crate does the hard part behind it:
//!
//! - **[`gateway`]**: credential pool rotation, per-endpoint circuit
//!   breaking with auto-healing, ordered proxy-then-direct fallback,
//!   exponential-backoff retries, diagnostic probing, and offline-response
//!   synthesis when every path fails.
//!
//! - **[`config`]**: layered configuration (compiled defaults, TOML file,
//!   `LUMEN_*` environment overrides) validated at load time.
//!
//! - **[`types`]**: OpenAI-compatible chat-completion wire types with typed
//!   content parts (text and inline image data for document OCR).
//!
//! ## Degraded mode
//!
//! `Dispatcher::send` never turns remote failures into errors. After the
//! whole policy is exhausted it returns a reply that is shape-identical to
//! a real one with `offline: true` set; callers must check that marker
//! before presenting content as genuine.
//!
//! ```no_run
//! # use lumen_core::config::GatewayConfig;
//! # use lumen_core::gateway::Dispatcher;
//! # use lumen_core::types::{ChatCompletionRequest, ChatMessage};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Dispatcher::new(GatewayConfig::load()?)?;
//!
//! let request = ChatCompletionRequest::new(
//!     "gpt-4o-mini",
//!     vec![ChatMessage::user("Summarize the attached term sheet.")],
//! );
//! let reply = dispatcher.send(&request).await?;
//! if reply.offline {
//!     // surface a degraded-mode notice instead of the canned apology
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod gateway;
pub mod types;
