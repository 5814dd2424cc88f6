//! Flag Evaluation Engine for Flagwork
//!
//! Vendor-neutral feature flag evaluation: pluggable providers, layered
//! evaluation contexts, a four-stage hook pipeline, provider lifecycle
//! events and per-evaluation deadlines with cooperative cancellation.
//!
//! # Features
//!
//! - 🔌 **Providers** - Any backend behind the [`FeatureProvider`] trait
//! - 🧬 **Context Merging** - Global, domain, client and invocation layers
//! - 🪝 **Hooks** - `before`/`after`/`error`/`finally` around every evaluation
//! - 📡 **Events** - Provider readiness, errors and configuration changes
//! - ⏱️ **Deadlines** - Timeouts and cancellation tokens per evaluation
//!
//! # Quick Start
//!
//! ```
//! use flagwork_core::*;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let api = FlagApi::new();
//! let provider = InMemoryProvider::new()
//!     .with_flag("new-ui", FlagDefinition::boolean(true));
//! api.set_provider_and_wait(Arc::new(provider)).await.unwrap();
//!
//! let client = api.client();
//! let enabled = client.get_boolean_value("new-ui", false, None, None).await;
//! assert!(enabled);
//! # });
//! ```
//!
//! # Evaluation Details
//!
//! Evaluation never fails. When anything goes wrong the caller's default
//! value comes back, together with an error code and message:
//!
//! ```
//! use flagwork_core::*;
//!
//! # tokio_test::block_on(async {
//! let api = FlagApi::new();
//! api.set_provider_and_wait(std::sync::Arc::new(InMemoryProvider::new()))
//!     .await
//!     .unwrap();
//!
//! let details = api
//!     .client()
//!     .get_string_details("missing", "fallback", None, None)
//!     .await;
//! assert_eq!(details.value, "fallback");
//! assert_eq!(details.error_code, Some(ErrorCode::FlagNotFound));
//! # });
//! ```
//!
//! # Timeouts and Cancellation
//!
//! ```
//! use flagwork_core::*;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let api = FlagApi::new();
//! let token = CancellationToken::new();
//! token.cancel();
//!
//! let options = EvaluationOptions::new()
//!     .with_timeout(Duration::from_millis(50))
//!     .with_cancellation(token);
//! let details = api
//!     .client()
//!     .get_boolean_details("flag", false, None, Some(&options))
//!     .await;
//! assert_eq!(details.error_code, Some(ErrorCode::General));
//! # });
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod details;
pub mod error;
pub mod event;
pub mod guard;
pub mod hook;
pub mod logging_hook;
pub mod pipeline;
pub mod provider;
pub mod registry;
pub mod status;
pub mod value;

pub use client::{Client, ClientMetadata, EvaluationOptions};
pub use config::{FlagApiBuilder, FlagApiConfig};
pub use context::{merge, EvaluationContext, TARGETING_KEY};
pub use details::{
    EvaluationDetails, FlagMetadata, FlagMetadataValue, Reason, ResolutionDetails,
    ResolutionResult,
};
pub use error::{
    Error, ErrorCode, EvaluationError, EventHandlerError, GuardError, HookError, ProviderError,
    Result,
};
pub use event::{handler, EventDetails, EventEmitter, EventHandler, ProviderEventType, SharedEventHandler};
pub use guard::EvaluationGuard;
pub use hook::{Hook, HookContext, HookData, HookDataArena, HookHints};
pub use logging_hook::LoggingHook;
pub use pipeline::{evaluate_hooked, HookPipeline, ResolveStep};
pub use provider::{
    Condition, FeatureProvider, FlagDefinition, FlagRequest, InMemoryProvider, NoopProvider,
    Paradigm, ProviderMetadata, TargetingRule, TrackingEventDetails,
};
pub use registry::{FlagApi, ProviderOptions};
pub use status::{aggregate_status, ProviderStatus, StatusTracker};
pub use value::{FlagType, FlagValue, FlagValueType, Value};

// Re-exported for provider implementations
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
