//! Integration tests for flagwork-multi

use flagwork_core::*;
use flagwork_multi::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn boolean_provider(name: &str, value: bool) -> Arc<InMemoryProvider> {
    Arc::new(
        InMemoryProvider::new()
            .with_name(name)
            .with_flag("f", FlagDefinition::boolean(value)),
    )
}

/// Records the context each member's hook sees and adds its own field
struct BranchHook {
    field: &'static str,
    seen: Arc<Mutex<Vec<EvaluationContext>>>,
}

#[async_trait]
impl Hook for BranchHook {
    async fn before(
        &self,
        context: &HookContext,
        _data: &mut HookData,
        _hints: &HookHints,
    ) -> std::result::Result<Option<EvaluationContext>, HookError> {
        self.seen.lock().push(context.context().clone());
        Ok(Some(EvaluationContext::new().with_field(self.field, true)))
    }
}

#[tokio::test]
async fn test_member_hook_contexts_are_isolated() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let hook = |field: &'static str| -> Arc<dyn Hook> {
        Arc::new(BranchHook {
            field,
            seen: seen.clone(),
        })
    };
    let first = InMemoryProvider::new()
        .with_name("first")
        .with_hook(hook("from_first"));
    let second = InMemoryProvider::new()
        .with_name("second")
        .with_flag("f", FlagDefinition::boolean(true))
        .with_hook(hook("from_second"));

    let multi = MultiProvider::new(
        vec![
            ProviderEntry::new(Arc::new(first)),
            ProviderEntry::new(Arc::new(second)),
        ],
        FirstMatchStrategy::new(),
    )
    .unwrap();

    let api = FlagApi::new();
    api.set_provider_and_wait(Arc::new(multi)).await.unwrap();
    assert!(api.client().get_boolean_value("f", false, None, None).await);

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert!(seen[1].get("from_first").is_none());
}

#[tokio::test]
async fn test_comparison_through_api() {
    let a = boolean_provider("a", true);
    let b = boolean_provider("b", true);
    let c = boolean_provider("c", true);
    let mismatches = Arc::new(AtomicUsize::new(0));
    let counter = mismatches.clone();

    let strategy = ComparisonStrategy::new()
        .with_fallback(b.clone())
        .with_mismatch_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    let multi = MultiProvider::new(
        vec![
            ProviderEntry::new(a.clone()),
            ProviderEntry::new(b.clone()),
            ProviderEntry::new(c.clone()),
        ],
        strategy,
    )
    .unwrap();

    let api = FlagApi::new();
    api.set_provider_and_wait(Arc::new(multi)).await.unwrap();
    let client = api.client();

    assert!(client.get_boolean_value("f", false, None, None).await);
    assert_eq!(mismatches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_group_status_follows_members_through_api() {
    let a = boolean_provider("a", true);
    let b = boolean_provider("b", true);
    let multi = MultiProvider::new(
        vec![ProviderEntry::new(a.clone()), ProviderEntry::new(b.clone())],
        FirstSuccessfulStrategy::new(),
    )
    .unwrap();

    let api = FlagApi::new();
    api.set_provider_and_wait(Arc::new(multi)).await.unwrap();
    assert_eq!(api.provider_status(None), ProviderStatus::Ready);

    let stale = Arc::new(AtomicUsize::new(0));
    let counter = stale.clone();
    api.add_handler(
        ProviderEventType::Stale,
        handler(move |_: &EventDetails| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    a.events()
        .unwrap()
        .emit(ProviderEventType::Stale, &EventDetails::new("a"));
    b.events()
        .unwrap()
        .emit(ProviderEventType::Stale, &EventDetails::new("b"));

    assert_eq!(api.provider_status(None), ProviderStatus::Stale);
    assert_eq!(stale.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_all_members_missing_flag_is_not_found() {
    let multi = MultiProvider::new(
        vec![
            ProviderEntry::new(Arc::new(InMemoryProvider::new().with_name("a"))),
            ProviderEntry::new(Arc::new(InMemoryProvider::new().with_name("b"))),
        ],
        FirstMatchStrategy::new(),
    )
    .unwrap();

    let api = FlagApi::new();
    api.set_provider_and_wait(Arc::new(multi)).await.unwrap();

    let details = api
        .client()
        .get_boolean_details("missing", true, None, None)
        .await;
    assert!(details.value);
    assert_eq!(details.error_code, Some(ErrorCode::FlagNotFound));
}
