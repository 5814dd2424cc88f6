//! Provider registry
//!
//! [`FlagApi`] owns the provider bindings (one default binding plus one per
//! domain), the global and per-domain evaluation contexts, API-level hooks
//! and API-level event handlers. Clients created from it resolve their
//! provider through the registry at every evaluation, so rebinding a domain
//! takes effect immediately.
//!
//! Changes to bindings and contexts are serialized: each one completes,
//! including listener notification, before the next begins. A context change
//! that reaches a static provider whose initialization is still running is
//! applied once initialization finishes, before the provider turns ready.
//!
//! ## Example
//!
//! ```
//! use flagwork_core::{FlagApi, FlagDefinition, InMemoryProvider, ProviderStatus};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let api = FlagApi::new();
//! let provider = InMemoryProvider::new().with_flag("beta", FlagDefinition::boolean(true));
//! api.set_provider_and_wait(Arc::new(provider)).await?;
//! assert_eq!(api.provider_status(None), ProviderStatus::Ready);
//!
//! let client = api.client();
//! let enabled = client.get_boolean_value("beta", false, None, None).await;
//! assert!(enabled);
//! # Ok::<(), flagwork_core::Error>(())
//! # }).unwrap();
//! ```

use crate::client::{Client, ClientMetadata};
use crate::config::{FlagApiBuilder, FlagApiConfig};
use crate::context::EvaluationContext;
use crate::error::{Error, ErrorCode, EventHandlerError, ProviderError, Result};
use crate::event::{
    run_handler, EventDetails, EventEmitter, EventHandler, ProviderEventType,
    SharedEventHandler,
};
use crate::guard::EvaluationGuard;
use crate::hook::Hook;
use crate::provider::{FeatureProvider, NoopProvider, Paradigm, ProviderMetadata};
use crate::status::{ProviderStatus, StatusTracker};
use dashmap::DashMap;
use futures::FutureExt;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

static GLOBAL: Lazy<FlagApi> = Lazy::new(|| FlagApi::with_config(FlagApiConfig::from_env()));

/// One registered provider instance and its lifecycle state.
///
/// A provider bound to several scopes shares a single entry.
pub(crate) struct ProviderEntry {
    pub(crate) provider: Arc<dyn FeatureProvider>,
    pub(crate) tracker: StatusTracker,
    initializing: AtomicBool,
    forwarders: Mutex<Vec<(ProviderEventType, SharedEventHandler)>>,
}

impl ProviderEntry {
    fn new(provider: Arc<dyn FeatureProvider>) -> Self {
        let tracker = StatusTracker::new(provider.metadata().name.clone());
        Self {
            provider,
            tracker,
            initializing: AtomicBool::new(false),
            forwarders: Mutex::new(Vec::new()),
        }
    }

    /// Entry for a provider that needs no initialization
    fn ready(provider: Arc<dyn FeatureProvider>) -> Self {
        let entry = Self::new(provider);
        entry.tracker.set(ProviderStatus::Ready);
        entry
    }

    pub(crate) fn name(&self) -> String {
        self.provider.metadata().name.clone()
    }

    pub(crate) fn status(&self) -> ProviderStatus {
        self.tracker.status()
    }

    /// Whether initialization is currently in flight.
    ///
    /// Read this before [`ProviderEntry::status`]: the status is settled
    /// before the flag is cleared.
    pub(crate) fn is_initializing(&self) -> bool {
        self.initializing.load(Ordering::Acquire)
    }

    /// Event details describing the current status to a late listener
    fn status_details(&self) -> EventDetails {
        let details = EventDetails::new(self.name());
        if self.status() == ProviderStatus::Fatal {
            details.with_error_code(ErrorCode::ProviderFatal)
        } else {
            details
        }
    }

    /// Record a lifecycle failure and announce it while the entry is bound
    fn fail(&self, api: &ApiInner, status: ProviderStatus, message: String, code: ErrorCode) {
        self.tracker.set(status);
        if api.is_bound(self) {
            let details = EventDetails::new(self.name())
                .with_message(message)
                .with_error_code(code);
            api.dispatch(self, ProviderEventType::Error, &details);
        }
    }

    fn fail_with(&self, api: &ApiInner, source: &ProviderError) {
        let status = if source.is_fatal() {
            ProviderStatus::Fatal
        } else {
            ProviderStatus::Error
        };
        self.fail(api, status, source.to_string(), source.error_code());
    }

    fn holds(&self, provider: &Arc<dyn FeatureProvider>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.provider), Arc::as_ptr(provider))
    }

    fn detach_forwarders(&self) {
        let forwarders = std::mem::take(&mut *self.forwarders.lock());
        if let Some(events) = self.provider.events() {
            for (event, handler) in &forwarders {
                events.remove_handler(*event, handler);
            }
        }
    }
}

/// How a provider registration should proceed
#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    /// Wait for initialization and propagate its failure
    pub wait: bool,
    /// Initialization deadline; overrides the registry default
    pub timeout: Option<Duration>,
    /// Abort a waiting initialization
    pub cancellation: Option<CancellationToken>,
}

impl ProviderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait(mut self) -> Self {
        self.wait = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

pub(crate) struct ApiInner {
    pub(crate) config: FlagApiConfig,
    default_entry: RwLock<Arc<ProviderEntry>>,
    domain_entries: RwLock<HashMap<String, Arc<ProviderEntry>>>,
    global_context: RwLock<EvaluationContext>,
    domain_contexts: RwLock<HashMap<String, EvaluationContext>>,
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
    api_events: EventEmitter,
    client_events: DashMap<Option<String>, Arc<EventEmitter>>,
    changes: tokio::sync::Mutex<()>,
}

impl ApiInner {
    /// Entry a scope currently resolves to
    pub(crate) fn entry_for(&self, domain: Option<&str>) -> Arc<ProviderEntry> {
        if let Some(domain) = domain
            && let Some(entry) = self.domain_entries.read().get(domain)
        {
            return entry.clone();
        }
        self.default_entry.read().clone()
    }

    /// Distinct registered entries, default first
    fn entries(&self) -> Vec<Arc<ProviderEntry>> {
        let mut entries = vec![self.default_entry.read().clone()];
        for entry in self.domain_entries.read().values() {
            if !entries.iter().any(|e| Arc::ptr_eq(e, entry)) {
                entries.push(entry.clone());
            }
        }
        entries
    }

    fn find_entry(&self, provider: &Arc<dyn FeatureProvider>) -> Option<Arc<ProviderEntry>> {
        self.entries().into_iter().find(|entry| entry.holds(provider))
    }

    fn is_bound(&self, entry: &ProviderEntry) -> bool {
        self.entries()
            .iter()
            .any(|e| std::ptr::eq(Arc::as_ptr(e), entry))
    }

    pub(crate) fn hooks(&self) -> Vec<Arc<dyn Hook>> {
        self.hooks.read().clone()
    }

    /// Global context merged with the scope's own context
    pub(crate) fn scope_context(&self, domain: Option<&str>) -> EvaluationContext {
        let global = self.global_context.read().clone();
        match domain.and_then(|d| self.domain_contexts.read().get(d).cloned()) {
            Some(own) => global.merged_with(&own),
            None => global,
        }
    }

    pub(crate) fn client_emitter(&self, domain: Option<&str>) -> Arc<EventEmitter> {
        self.client_events
            .entry(domain.map(str::to_string))
            .or_insert_with(|| Arc::new(EventEmitter::new()))
            .clone()
    }

    /// Deliver an event to API handlers and to every client scope bound to the entry
    fn dispatch(&self, entry: &ProviderEntry, event: ProviderEventType, details: &EventDetails) {
        self.api_events.emit(event, details);

        // Snapshot so handlers may register further handlers
        let scopes: Vec<(Option<String>, Arc<EventEmitter>)> = self
            .client_events
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (scope, emitter) in scopes {
            if std::ptr::eq(Arc::as_ptr(&self.entry_for(scope.as_deref())), entry) {
                emitter.emit(event, &details.clone().with_domain(scope));
            }
        }
    }

    /// Deliver an event to the handlers of a single client scope
    fn dispatch_scope(&self, scope: Option<&str>, event: ProviderEventType, details: &EventDetails) {
        let key = scope.map(str::to_string);
        let emitter = self.client_events.get(&key).map(|e| e.value().clone());
        if let Some(emitter) = emitter {
            emitter.emit(event, &details.clone().with_domain(key));
        }
    }

    /// Run a late-registered handler once if the provider already sits in
    /// the state the event announces
    pub(crate) fn replay(
        &self,
        entry: &ProviderEntry,
        event: ProviderEventType,
        handler: &SharedEventHandler,
        domain: Option<String>,
    ) {
        if ProviderEventType::for_status(entry.status()) == Some(event) {
            let details = entry.status_details().with_domain(domain);
            run_handler(event, handler, &details);
        }
    }
}

/// Re-broadcasts events emitted by a provider and keeps its status current
struct ProviderEventForwarder {
    api: Weak<ApiInner>,
    entry: Weak<ProviderEntry>,
    event: ProviderEventType,
}

impl EventHandler for ProviderEventForwarder {
    fn handle(&self, details: &EventDetails) -> std::result::Result<(), EventHandlerError> {
        let (Some(api), Some(entry)) = (self.api.upgrade(), self.entry.upgrade()) else {
            return Ok(());
        };

        let mut details = details.clone();
        if details.provider_name.is_empty() {
            details.provider_name = entry.name();
        }

        let before = entry.status();
        let requested = ProviderStatus::after_event(self.event, &details);
        if before == ProviderStatus::Fatal
            && requested.is_some_and(|s| s != ProviderStatus::Fatal)
        {
            return Ok(());
        }
        if let Some(status) = entry.tracker.apply(self.event, &details) {
            debug!(provider = %details.provider_name, status = %status, "Provider status changed");
        }

        api.dispatch(&entry, self.event, &details);
        Ok(())
    }
}

fn attach_forwarders(api: &Arc<ApiInner>, entry: &Arc<ProviderEntry>) {
    let Some(events) = entry.provider.events() else {
        return;
    };
    let mut forwarders = entry.forwarders.lock();
    for event in ProviderEventType::ALL {
        let handler: SharedEventHandler = Arc::new(ProviderEventForwarder {
            api: Arc::downgrade(api),
            entry: Arc::downgrade(entry),
            event,
        });
        events.add_handler(event, handler.clone());
        forwarders.push((event, handler));
    }
}

/// Run a provider lifecycle call, turning a panic into a provider error
async fn contained<F>(operation: &str, call: F) -> std::result::Result<(), ProviderError>
where
    F: Future<Output = std::result::Result<(), ProviderError>>,
{
    AssertUnwindSafe(call).catch_unwind().await.unwrap_or_else(|_| {
        Err(ProviderError::General(format!("{} panicked", operation)))
    })
}

/// Initialize a freshly registered entry and publish the outcome.
///
/// A static provider is then told about any context change to its scope that
/// was held back while it initialized.
async fn initialize_entry(
    api: Arc<ApiInner>,
    entry: Arc<ProviderEntry>,
    domain: Option<String>,
    context: EvaluationContext,
    guard: EvaluationGuard,
) -> Result<()> {
    let name = entry.name();
    debug!(provider = %name, "Initializing provider");

    let outcome = guard
        .run(|| contained("initialization", entry.provider.initialize(&context)))
        .await;

    let _change = api.changes.lock().await;
    let result = match outcome {
        Ok(Ok(())) => {
            let latest = api.scope_context(domain.as_deref());
            let caught_up = if entry.provider.metadata().paradigm == Paradigm::Static
                && latest != context
            {
                debug!(provider = %name, "Applying context change deferred during initialization");
                contained(
                    "context change",
                    entry.provider.on_context_changed(&context, &latest),
                )
                .await
            } else {
                Ok(())
            };

            match caught_up {
                Ok(()) => {
                    if entry.tracker.set(ProviderStatus::Ready) && api.is_bound(&entry) {
                        info!(provider = %name, "Provider ready");
                        api.dispatch(&entry, ProviderEventType::Ready, &EventDetails::new(&name));
                    }
                    Ok(())
                }
                Err(source) => {
                    warn!(provider = %name, "Context reconciliation failed: {}", source);
                    entry.fail_with(&api, &source);
                    Err(Error::ContextChange {
                        provider: name.clone(),
                        source,
                    })
                }
            }
        }
        Ok(Err(source)) => {
            error!(provider = %name, "Provider initialization failed: {}", source);
            entry.fail_with(&api, &source);
            Err(Error::Initialization {
                provider: name.clone(),
                source,
            })
        }
        Err(source) => {
            warn!(provider = %name, "Provider initialization aborted: {}", source);
            entry.fail(
                &api,
                ProviderStatus::Error,
                source.to_string(),
                source.error_code(),
            );
            Err(Error::InitializationAborted {
                provider: name.clone(),
                source,
            })
        }
    };

    entry.initializing.store(false, Ordering::Release);
    result
}

/// Detach and shut down an entry that is no longer bound anywhere
async fn retire(entry: Arc<ProviderEntry>) -> Result<()> {
    entry.detach_forwarders();
    let name = entry.name();
    debug!(provider = %name, "Shutting down provider");
    entry.provider.shutdown().await.map_err(|source| {
        error!(provider = %name, "Provider shutdown failed: {}", source);
        Error::Shutdown {
            provider: name.clone(),
            source,
        }
    })
}

/// Feature flag registry
#[derive(Clone)]
pub struct FlagApi {
    inner: Arc<ApiInner>,
}

impl FlagApi {
    pub fn new() -> Self {
        Self::with_config(FlagApiConfig::default())
    }

    pub fn with_config(config: FlagApiConfig) -> Self {
        let noop: Arc<dyn FeatureProvider> = Arc::new(NoopProvider::new());
        Self {
            inner: Arc::new(ApiInner {
                config,
                default_entry: RwLock::new(Arc::new(ProviderEntry::ready(noop))),
                domain_entries: RwLock::new(HashMap::new()),
                global_context: RwLock::new(EvaluationContext::new()),
                domain_contexts: RwLock::new(HashMap::new()),
                hooks: RwLock::new(Vec::new()),
                api_events: EventEmitter::new(),
                client_events: DashMap::new(),
                changes: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn builder() -> FlagApiBuilder {
        FlagApiBuilder::new()
    }

    /// Process-wide instance, configured from the environment
    pub fn global() -> &'static FlagApi {
        &GLOBAL
    }

    pub fn config(&self) -> &FlagApiConfig {
        &self.inner.config
    }

    // ========== Providers ==========

    /// Bind the default provider; initialization runs in the background
    pub async fn set_provider(&self, provider: Arc<dyn FeatureProvider>) {
        let _ = self.register(None, provider, ProviderOptions::new()).await;
    }

    /// Bind the default provider and wait for its initialization
    pub async fn set_provider_and_wait(&self, provider: Arc<dyn FeatureProvider>) -> Result<()> {
        self.register(None, provider, ProviderOptions::new().wait()).await
    }

    /// Bind a provider to a domain; initialization runs in the background
    pub async fn set_domain_provider(&self, domain: &str, provider: Arc<dyn FeatureProvider>) {
        let _ = self.register(Some(domain), provider, ProviderOptions::new()).await;
    }

    /// Bind a provider to a domain and wait for its initialization
    pub async fn set_domain_provider_and_wait(
        &self,
        domain: &str,
        provider: Arc<dyn FeatureProvider>,
    ) -> Result<()> {
        self.register(Some(domain), provider, ProviderOptions::new().wait())
            .await
    }

    /// Bind a provider to a scope (`None` for the default binding).
    ///
    /// A provider instance already registered elsewhere keeps its state and
    /// is not initialized again. The replaced provider is shut down once no
    /// scope references it.
    pub async fn register(
        &self,
        domain: Option<&str>,
        provider: Arc<dyn FeatureProvider>,
        options: ProviderOptions,
    ) -> Result<()> {
        let inner = &self.inner;
        let change = inner.changes.lock().await;

        let (entry, fresh) = match inner.find_entry(&provider) {
            Some(entry) => (entry, false),
            None => {
                let entry = Arc::new(ProviderEntry::new(provider));
                entry.initializing.store(true, Ordering::Release);
                attach_forwarders(inner, &entry);
                (entry, true)
            }
        };

        let previous = match domain {
            Some(domain) => inner
                .domain_entries
                .write()
                .insert(domain.to_string(), entry.clone()),
            None => Some(std::mem::replace(
                &mut *inner.default_entry.write(),
                entry.clone(),
            )),
        };
        info!(
            provider = %entry.name(),
            domain = domain.unwrap_or("<default>"),
            "Provider bound"
        );

        if let Some(previous) = previous
            && !Arc::ptr_eq(&previous, &entry)
            && !inner.is_bound(&previous)
        {
            let _ = retire(previous).await;
        }

        if !fresh {
            if let Some(event) = ProviderEventType::for_status(entry.status()) {
                inner.dispatch_scope(domain, event, &entry.status_details());
            }
            return Ok(());
        }

        let context = inner.scope_context(domain);
        let guard = EvaluationGuard::new(
            options.timeout.or(inner.config.initialization_timeout),
            options.cancellation,
        );
        drop(change);

        let initialization = initialize_entry(
            inner.clone(),
            entry,
            domain.map(str::to_string),
            context,
            guard,
        );
        if options.wait {
            initialization.await
        } else {
            tokio::spawn(initialization);
            Ok(())
        }
    }

    pub fn provider_metadata(&self, domain: Option<&str>) -> ProviderMetadata {
        self.inner.entry_for(domain).provider.metadata().clone()
    }

    pub fn provider_status(&self, domain: Option<&str>) -> ProviderStatus {
        self.inner.entry_for(domain).status()
    }

    // ========== Context ==========

    pub fn context(&self) -> EvaluationContext {
        self.inner.global_context.read().clone()
    }

    pub fn domain_context(&self, domain: &str) -> Option<EvaluationContext> {
        self.inner.domain_contexts.read().get(domain).cloned()
    }

    /// Replace the global context.
    ///
    /// Static-paradigm providers of every scope without its own context are
    /// told to reconcile; the first reconciliation failure is returned after
    /// all of them have run.
    pub async fn set_context(&self, context: EvaluationContext) -> Result<()> {
        let inner = &self.inner;
        let _change = inner.changes.lock().await;

        let mut scopes: Vec<Option<String>> = vec![None];
        {
            let own = inner.domain_contexts.read();
            scopes.extend(
                inner
                    .domain_entries
                    .read()
                    .keys()
                    .filter(|d| !own.contains_key(*d))
                    .map(|d| Some(d.clone())),
            );
        }

        let before: Vec<EvaluationContext> =
            scopes.iter().map(|s| inner.scope_context(s.as_deref())).collect();
        *inner.global_context.write() = context;

        let mut seen: Vec<Arc<ProviderEntry>> = Vec::new();
        let mut first_failure = None;
        for (scope, old) in scopes.iter().zip(before) {
            let entry = inner.entry_for(scope.as_deref());
            if seen.iter().any(|e| Arc::ptr_eq(e, &entry)) {
                continue;
            }
            seen.push(entry.clone());
            let new = inner.scope_context(scope.as_deref());
            if let Err(e) = self.reconcile(&entry, &old, &new).await {
                first_failure.get_or_insert(e);
            }
        }

        first_failure.map_or(Ok(()), Err)
    }

    /// Replace the context of one domain
    pub async fn set_domain_context(&self, domain: &str, context: EvaluationContext) -> Result<()> {
        let inner = &self.inner;
        let _change = inner.changes.lock().await;

        let old = inner.scope_context(Some(domain));
        inner
            .domain_contexts
            .write()
            .insert(domain.to_string(), context);
        let new = inner.scope_context(Some(domain));

        let entry = inner.entry_for(Some(domain));
        self.reconcile(&entry, &old, &new).await
    }

    /// Notify a static-paradigm provider of a context change.
    ///
    /// Deferred while the provider initializes; [`initialize_entry`] picks
    /// up the latest context when it finishes.
    async fn reconcile(
        &self,
        entry: &Arc<ProviderEntry>,
        old: &EvaluationContext,
        new: &EvaluationContext,
    ) -> Result<()> {
        if entry.provider.metadata().paradigm != Paradigm::Static
            || entry.status() == ProviderStatus::Fatal
            || old == new
        {
            return Ok(());
        }

        let name = entry.name();
        if entry.is_initializing() {
            debug!(provider = %name, "Deferring context change until initialization finishes");
            return Ok(());
        }

        match contained("context change", entry.provider.on_context_changed(old, new)).await {
            Ok(()) => {
                entry.tracker.set(ProviderStatus::Ready);
                self.inner
                    .dispatch(entry, ProviderEventType::ContextChanged, &EventDetails::new(&name));
                Ok(())
            }
            Err(source) => {
                warn!(provider = %name, "Context reconciliation failed: {}", source);
                entry.fail_with(&self.inner, &source);
                Err(Error::ContextChange {
                    provider: name,
                    source,
                })
            }
        }
    }

    // ========== Hooks ==========

    pub fn add_hooks(&self, hooks: impl IntoIterator<Item = Arc<dyn Hook>>) {
        self.inner.hooks.write().extend(hooks);
    }

    pub fn hooks(&self) -> Vec<Arc<dyn Hook>> {
        self.inner.hooks()
    }

    pub fn clear_hooks(&self) {
        self.inner.hooks.write().clear();
    }

    // ========== Events ==========

    /// Register an API-level handler.
    ///
    /// Runs once immediately for every provider already in the state the
    /// event announces.
    pub fn add_handler(&self, event: ProviderEventType, handler: SharedEventHandler) {
        self.inner.api_events.add_handler(event, handler.clone());
        for entry in self.inner.entries() {
            self.inner.replay(&entry, event, &handler, None);
        }
    }

    pub fn remove_handler(&self, event: ProviderEventType, handler: &SharedEventHandler) -> bool {
        self.inner.api_events.remove_handler(event, handler)
    }

    pub fn handlers(&self, event: ProviderEventType) -> Vec<SharedEventHandler> {
        self.inner.api_events.handlers(event)
    }

    // ========== Clients ==========

    /// Client bound to the default provider
    pub fn client(&self) -> Client {
        Client::new(self.inner.clone(), ClientMetadata::default())
    }

    /// Client bound to a domain; falls back to the default provider while
    /// the domain has no binding of its own
    pub fn domain_client(&self, domain: impl Into<String>) -> Client {
        Client::new(
            self.inner.clone(),
            ClientMetadata {
                domain: Some(domain.into()),
                version: None,
            },
        )
    }

    // ========== Lifecycle ==========

    /// Shut down every registered provider and reset all bindings to the
    /// no-op provider. Handlers, hooks and contexts are kept.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        let _change = inner.changes.lock().await;

        let entries = inner.entries();
        let noop: Arc<dyn FeatureProvider> = Arc::new(NoopProvider::new());
        *inner.default_entry.write() = Arc::new(ProviderEntry::ready(noop));
        inner.domain_entries.write().clear();

        let mut first_failure = None;
        for entry in entries {
            if let Err(e) = retire(entry).await {
                first_failure.get_or_insert(e);
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}

impl Default for FlagApi {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FlagApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let domains: Vec<String> = self.inner.domain_entries.read().keys().cloned().collect();
        f.debug_struct("FlagApi")
            .field("config", &self.inner.config)
            .field("default_provider", &self.inner.entry_for(None).name())
            .field("domains", &domains)
            .finish()
    }
}
