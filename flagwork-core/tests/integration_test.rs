//! Integration tests for flagwork-core

use flagwork_core::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Provider that counts calls and resolves every boolean to `true`
struct CountingProvider {
    metadata: ProviderMetadata,
    calls: AtomicUsize,
    fail: bool,
}

impl CountingProvider {
    fn new() -> Self {
        Self {
            metadata: ProviderMetadata::new("counting"),
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureProvider for CountingProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn resolve_boolean(
        &self,
        _flag_key: &str,
        _default_value: bool,
        _context: &EvaluationContext,
    ) -> ResolutionResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EvaluationError::general("backend unreachable"));
        }
        Ok(ResolutionDetails::new(true).with_reason(Reason::Static))
    }
}

#[tokio::test]
async fn test_pre_cancelled_evaluation_never_calls_provider() {
    let api = FlagApi::new();
    let provider = Arc::new(CountingProvider::new());
    api.set_provider_and_wait(provider.clone()).await.unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let options = EvaluationOptions::new().with_cancellation(token);

    let details = api
        .client()
        .get_boolean_details("flag", false, None, Some(&options))
        .await;

    assert!(!details.value);
    assert_eq!(details.error_code, Some(ErrorCode::General));
    assert!(details.error_message.unwrap().contains("cancelled"));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_evaluation_deadline_while_provider_initializes() {
    let api = FlagApi::builder()
        .evaluation_timeout(Duration::from_millis(50))
        .build();
    let provider = InMemoryProvider::new()
        .with_flag("flag", FlagDefinition::boolean(true))
        .with_initialization_delay(Duration::from_millis(200));
    api.set_provider(Arc::new(provider)).await;

    let details = api
        .client()
        .get_boolean_details("flag", false, None, None)
        .await;

    assert!(!details.value);
    assert_eq!(details.reason, Some(Reason::Error));
    assert_eq!(details.error_code, Some(ErrorCode::Timeout));
    assert!(
        details
            .error_message
            .unwrap()
            .contains("timed out after 50ms")
    );
}

#[tokio::test]
async fn test_provider_fault_returns_default() {
    let api = FlagApi::new();
    api.set_provider_and_wait(Arc::new(CountingProvider::failing()))
        .await
        .unwrap();

    let details = api
        .client()
        .get_boolean_details("flag", true, None, None)
        .await;

    assert!(details.value);
    assert_eq!(details.reason, Some(Reason::Error));
    assert_eq!(details.error_code, Some(ErrorCode::General));
    assert_eq!(details.error_message.as_deref(), Some("backend unreachable"));
}

/// Writes its label under a shared key and checks it reads back its own value
struct ScratchHook {
    label: &'static str,
    observed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Hook for ScratchHook {
    async fn before(
        &self,
        _context: &HookContext,
        data: &mut HookData,
        _hints: &HookHints,
    ) -> std::result::Result<Option<EvaluationContext>, HookError> {
        // a fresh store for every evaluation
        assert!(data.is_empty());
        data.set("key", self.label.to_string());
        Ok(None)
    }

    async fn after(
        &self,
        _context: &HookContext,
        _details: &EvaluationDetails,
        data: &mut HookData,
        _hints: &HookHints,
    ) -> std::result::Result<(), HookError> {
        let value = data.get::<String>("key").cloned().unwrap_or_default();
        self.observed.lock().push(value);
        Ok(())
    }
}

#[tokio::test]
async fn test_hook_scratch_is_isolated() {
    let api = FlagApi::new();
    api.set_provider_and_wait(Arc::new(CountingProvider::new()))
        .await
        .unwrap();

    let observed = Arc::new(Mutex::new(Vec::new()));
    let client = api.client();
    client.add_hooks([
        Arc::new(ScratchHook {
            label: "first",
            observed: observed.clone(),
        }) as Arc<dyn Hook>,
        Arc::new(ScratchHook {
            label: "second",
            observed: observed.clone(),
        }) as Arc<dyn Hook>,
    ]);

    client.get_boolean_value("a", false, None, None).await;
    client.get_boolean_value("b", false, None, None).await;

    assert_eq!(
        *observed.lock(),
        vec!["second", "first", "second", "first"]
    );
}

#[tokio::test]
async fn test_ready_handler_replays_for_ready_provider() {
    let api = FlagApi::new();
    api.set_provider_and_wait(Arc::new(InMemoryProvider::new().with_name("memory")))
        .await
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    api.add_handler(
        ProviderEventType::Ready,
        handler(move |details: &EventDetails| {
            sink.lock().push(details.provider_name.clone());
            Ok(())
        }),
    );

    assert_eq!(*seen.lock(), vec!["memory".to_string()]);
}

#[tokio::test]
async fn test_hook_order_across_levels() {
    struct Named {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Hook for Named {
        async fn before(
            &self,
            _context: &HookContext,
            _data: &mut HookData,
            _hints: &HookHints,
        ) -> std::result::Result<Option<EvaluationContext>, HookError> {
            self.log.lock().push(format!("before:{}", self.name));
            Ok(None)
        }

        async fn finally(
            &self,
            _context: &HookContext,
            _details: &EvaluationDetails,
            _data: &mut HookData,
            _hints: &HookHints,
        ) -> std::result::Result<(), HookError> {
            self.log.lock().push(format!("finally:{}", self.name));
            Ok(())
        }
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let named = |name: &'static str| -> Arc<dyn Hook> {
        Arc::new(Named {
            name,
            log: log.clone(),
        })
    };

    let provider = InMemoryProvider::new()
        .with_flag("flag", FlagDefinition::boolean(true))
        .with_hook(named("provider"));
    let api = FlagApi::builder().hook(named("api")).build();
    api.set_provider_and_wait(Arc::new(provider)).await.unwrap();

    let client = api.client();
    client.add_hooks([named("client")]);
    let options = EvaluationOptions::new().with_hook(named("invocation"));

    client
        .get_boolean_value("flag", false, None, Some(&options))
        .await;

    assert_eq!(
        *log.lock(),
        vec![
            "before:api",
            "before:client",
            "before:invocation",
            "before:provider",
            "finally:provider",
            "finally:invocation",
            "finally:client",
            "finally:api",
        ]
    );
}

#[tokio::test]
async fn test_rebinding_domain_takes_effect_for_existing_client() {
    let api = FlagApi::new();
    let client = api.domain_client("checkout");

    let first = InMemoryProvider::new().with_flag("flag", FlagDefinition::single("a", "one"));
    let second = InMemoryProvider::new().with_flag("flag", FlagDefinition::single("b", "two"));

    api.set_domain_provider_and_wait("checkout", Arc::new(first))
        .await
        .unwrap();
    assert_eq!(client.get_string_value("flag", "none", None, None).await, "one");

    api.set_domain_provider_and_wait("checkout", Arc::new(second))
        .await
        .unwrap();
    assert_eq!(client.get_string_value("flag", "none", None, None).await, "two");
}

#[tokio::test]
async fn test_client_handlers_follow_domain_binding() {
    let api = FlagApi::new();
    let default_client = api.client();
    let domain_client = api.domain_client("billing");

    let default_errors = Arc::new(AtomicUsize::new(0));
    let domain_errors = Arc::new(AtomicUsize::new(0));
    let (d, b) = (default_errors.clone(), domain_errors.clone());
    default_client.add_handler(
        ProviderEventType::Error,
        handler(move |_: &EventDetails| {
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );
    domain_client.add_handler(
        ProviderEventType::Error,
        handler(move |_: &EventDetails| {
            b.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    let broken = InMemoryProvider::new()
        .with_initialization_error(ProviderError::General("no config".into()));
    let _ = api
        .set_domain_provider_and_wait("billing", Arc::new(broken))
        .await;

    assert_eq!(domain_errors.load(Ordering::SeqCst), 1);
    assert_eq!(default_errors.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Provider Lifecycle
// =============================================================================

/// Provider whose initialization panics
struct PanickingInit {
    metadata: ProviderMetadata,
}

impl PanickingInit {
    fn new() -> Self {
        Self {
            metadata: ProviderMetadata::new("panicking"),
        }
    }
}

#[async_trait]
impl FeatureProvider for PanickingInit {
    fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn initialize(
        &self,
        _context: &EvaluationContext,
    ) -> std::result::Result<(), ProviderError> {
        panic!("credentials file missing");
    }
}

#[tokio::test]
async fn test_panicking_initialization_settles_as_error() {
    let api = FlagApi::new();
    let errors = Arc::new(AtomicUsize::new(0));
    let seen = errors.clone();
    api.add_handler(
        ProviderEventType::Error,
        handler(move |_: &EventDetails| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    api.set_provider(Arc::new(PanickingInit::new())).await;

    // no deadline configured: the evaluation must not wait forever
    let details = tokio::time::timeout(
        Duration::from_millis(500),
        api.client().get_boolean_details("flag", true, None, None),
    )
    .await
    .expect("evaluation settles once initialization fails");

    assert!(details.value);
    assert_eq!(details.reason, Some(Reason::Error));
    assert_eq!(api.provider_status(None), ProviderStatus::Error);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panicking_initialization_is_returned_when_waiting() {
    let api = FlagApi::new();

    let err = api
        .set_provider_and_wait(Arc::new(PanickingInit::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Initialization { .. }));
    assert!(err.to_string().contains("initialization panicked"));
    assert_eq!(api.provider_status(None), ProviderStatus::Error);
}

#[tokio::test]
async fn test_context_change_during_initialization_waits_for_ready() {
    let api = FlagApi::new();
    let provider = Arc::new(
        InMemoryProvider::new()
            .with_paradigm(Paradigm::Static)
            .with_flag("flag", FlagDefinition::boolean(true))
            .with_initialization_delay(Duration::from_millis(200)),
    );
    api.set_provider(provider.clone()).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    for event in [ProviderEventType::Ready, ProviderEventType::ContextChanged] {
        let sink = events.clone();
        api.add_handler(
            event,
            handler(move |_: &EventDetails| {
                sink.lock().push(event);
                Ok(())
            }),
        );
    }

    api.set_context(EvaluationContext::new().with_targeting_key("user-1"))
        .await
        .unwrap();

    assert_eq!(api.provider_status(None), ProviderStatus::NotReady);
    assert_eq!(provider.context_change_count(), 0);
    let details = api
        .client()
        .get_boolean_details("flag", false, None, None)
        .await;
    assert!(!details.value);
    assert_eq!(details.error_code, Some(ErrorCode::ProviderNotReady));

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(api.provider_status(None), ProviderStatus::Ready);
    assert_eq!(provider.context_change_count(), 1);
    assert_eq!(*events.lock(), vec![ProviderEventType::Ready]);
    assert!(api.client().get_boolean_value("flag", false, None, None).await);
}

#[tokio::test]
async fn test_replaced_provider_finishing_late_stays_silent() {
    let api = FlagApi::new();
    let slow = Arc::new(
        InMemoryProvider::new()
            .with_name("slow")
            .with_initialization_delay(Duration::from_millis(150)),
    );
    let quick = Arc::new(InMemoryProvider::new().with_name("quick"));

    api.set_provider(slow.clone()).await;

    let ready = Arc::new(Mutex::new(Vec::new()));
    let sink = ready.clone();
    api.add_handler(
        ProviderEventType::Ready,
        handler(move |details: &EventDetails| {
            sink.lock().push(details.provider_name.clone());
            Ok(())
        }),
    );

    api.set_provider_and_wait(quick.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(*ready.lock(), vec!["quick".to_string()]);
    assert_eq!(api.provider_metadata(None).name, "quick");
    assert_eq!(api.provider_status(None), ProviderStatus::Ready);
    assert_eq!(slow.shutdown_count(), 1);
}

#[tokio::test]
async fn test_late_error_handler_sees_fatal_code() {
    let api = FlagApi::new();
    let provider = InMemoryProvider::new()
        .with_initialization_error(ProviderError::Fatal("license revoked".into()));
    assert!(api.set_provider_and_wait(Arc::new(provider)).await.is_err());

    let codes = Arc::new(Mutex::new(Vec::new()));
    let (api_sink, client_sink) = (codes.clone(), codes.clone());
    api.add_handler(
        ProviderEventType::Error,
        handler(move |details: &EventDetails| {
            api_sink.lock().push(details.error_code);
            Ok(())
        }),
    );
    api.client().add_handler(
        ProviderEventType::Error,
        handler(move |details: &EventDetails| {
            client_sink.lock().push(details.error_code);
            Ok(())
        }),
    );

    assert_eq!(
        *codes.lock(),
        vec![Some(ErrorCode::ProviderFatal), Some(ErrorCode::ProviderFatal)]
    );
}

#[tokio::test]
async fn test_failed_after_hook_reports_through_error_and_finally() {
    struct RejectingAfter(Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl Hook for RejectingAfter {
        async fn after(
            &self,
            _context: &HookContext,
            _details: &EvaluationDetails,
            _data: &mut HookData,
            _hints: &HookHints,
        ) -> std::result::Result<(), HookError> {
            self.0.lock().push("after");
            Err(HookError::new("value failed validation"))
        }

        async fn error(
            &self,
            _context: &HookContext,
            _error: &EvaluationError,
            _data: &mut HookData,
            _hints: &HookHints,
        ) -> std::result::Result<(), HookError> {
            self.0.lock().push("error");
            Ok(())
        }

        async fn finally(
            &self,
            _context: &HookContext,
            _details: &EvaluationDetails,
            _data: &mut HookData,
            _hints: &HookHints,
        ) -> std::result::Result<(), HookError> {
            self.0.lock().push("finally");
            Ok(())
        }
    }

    let api = FlagApi::new();
    api.set_provider_and_wait(Arc::new(
        InMemoryProvider::new().with_flag("flag", FlagDefinition::boolean(true)),
    ))
    .await
    .unwrap();

    let stages = Arc::new(Mutex::new(Vec::new()));
    let client = api.client();
    client.add_hooks([Arc::new(RejectingAfter(stages.clone())) as Arc<dyn Hook>]);

    let details = client.get_boolean_details("flag", false, None, None).await;

    assert!(!details.value);
    assert_eq!(details.reason, Some(Reason::Error));
    assert_eq!(details.error_code, Some(ErrorCode::General));
    assert_eq!(*stages.lock(), vec!["after", "error", "finally"]);
}
