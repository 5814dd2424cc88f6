//! Multi-Provider Aggregation for Flagwork
//!
//! Combines several flag providers behind one [`FeatureProvider`] under a
//! pluggable [`Strategy`]:
//!
//! - **First match** - consult members in order until one knows the flag
//! - **First successful** - consult members in order until one succeeds
//! - **Comparison** - consult all members concurrently and require agreement
//!
//! The group reports one status derived from its members by severity
//! (Fatal > NotReady > Error > Stale > Ready) and emits an event only when
//! that derived status changes.
//!
//! # Quick Start
//!
//! ```
//! use flagwork_core::{FlagApi, FlagDefinition, InMemoryProvider};
//! use flagwork_multi::{FirstMatchStrategy, MultiProvider, ProviderEntry};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let overrides = InMemoryProvider::new().with_name("overrides");
//! let defaults = InMemoryProvider::new()
//!     .with_name("defaults")
//!     .with_flag("new-ui", FlagDefinition::boolean(true));
//!
//! let multi = MultiProvider::new(
//!     vec![
//!         ProviderEntry::new(Arc::new(overrides)),
//!         ProviderEntry::new(Arc::new(defaults)),
//!     ],
//!     FirstMatchStrategy::new(),
//! )
//! .unwrap();
//!
//! let api = FlagApi::new();
//! api.set_provider_and_wait(Arc::new(multi)).await.unwrap();
//! assert!(api.client().get_boolean_value("new-ui", false, None, None).await);
//! # });
//! ```
//!
//! [`FeatureProvider`]: flagwork_core::FeatureProvider

pub mod error;
pub mod provider;
mod status;
pub mod strategy;

pub use error::{MultiProviderError, ProviderFailure};
pub use provider::{MultiProvider, ProviderEntry, RegisteredProvider};
pub use strategy::{
    ComparisonStrategy, FinalResult, FirstMatchStrategy, FirstSuccessfulStrategy, MemberContext,
    MemberResult, MismatchHandler, RunMode, Strategy,
};
