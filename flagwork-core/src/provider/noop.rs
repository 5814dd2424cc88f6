//! Provider bound to every scope before anything else is registered.

use super::{FeatureProvider, FlagRequest, ProviderMetadata};
use crate::details::{Reason, ResolutionDetails, ResolutionResult};
use async_trait::async_trait;

/// Returns the caller's default value for every flag
#[derive(Debug)]
pub struct NoopProvider {
    metadata: ProviderMetadata,
}

impl NoopProvider {
    pub fn new() -> Self {
        Self {
            metadata: ProviderMetadata::new("No-op Provider"),
        }
    }
}

impl Default for NoopProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeatureProvider for NoopProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn resolve(&self, request: &FlagRequest<'_>) -> ResolutionResult {
        Ok(ResolutionDetails::new(request.default_value.clone()).with_reason(Reason::Default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EvaluationContext;
    use crate::value::{FlagType, FlagValue};

    #[tokio::test]
    async fn test_returns_default() {
        let default = FlagValue::Number(3.0);
        let ctx = EvaluationContext::new();
        let request = FlagRequest::new("n", FlagType::Number, &default, &ctx);

        let details = NoopProvider::new().resolve(&request).await.unwrap();
        assert_eq!(details.value, FlagValue::Number(3.0));
        assert_eq!(details.reason, Some(Reason::Default));
    }
}
