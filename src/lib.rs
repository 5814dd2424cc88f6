// Flagwork - vendor-neutral feature flag evaluation for Rust
//
// This library bundles the evaluation engine with the multi-provider
// aggregator behind a single dependency.

// Re-export core functionality
pub use flagwork_core::*;

// Re-export optional crates
#[cfg(feature = "multi")]
pub use flagwork_multi as multi;

#[cfg(feature = "multi")]
pub use flagwork_multi::{
    ComparisonStrategy, FirstMatchStrategy, FirstSuccessfulStrategy, MultiProvider,
    MultiProviderError, ProviderEntry, Strategy,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use flagwork_core::{
        Client, ErrorCode, EvaluationContext, EvaluationDetails, EvaluationOptions,
        FeatureProvider, FlagApi, FlagValue, Hook, HookContext, HookData, HookHints,
        InMemoryProvider, ProviderEventType, ProviderStatus, Reason, ResolutionDetails,
        async_trait,
    };

    #[cfg(feature = "multi")]
    pub use flagwork_multi::{
        ComparisonStrategy, FirstMatchStrategy, FirstSuccessfulStrategy, MultiProvider,
        ProviderEntry,
    };
}
