//! # Chatline Enrich
//!
//! Network-bound collaborators for image enrichment.
//!
//! - [`HeadImagePredicate`]: issues a `HEAD` request and checks whether the
//!   response `Content-Type` is `image/*`
//! - [`OpenRouterDescriber`]: asks a vision model behind an OpenAI-compatible
//!   chat-completions endpoint to describe the image
//! - [`OpenRouterResponder`]: turns a description into a chat reply through
//!   the same endpoint
//!
//! Each implements the traits from `chatline-core` so the enrichment fan-out
//! never depends on HTTP directly.

pub mod openrouter;
pub mod probe;

pub use openrouter::{OpenRouterConfig, OpenRouterDescriber, OpenRouterResponder};
pub use probe::{HeadImagePredicate, ProbeConfig, normalize_url};
