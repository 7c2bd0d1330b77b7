//! Application state and wiring
//!
//! Startup constructs the whole component graph explicitly: storage,
//! NLU stack (primary, fallback, breaker), dispatcher, turn engine,
//! session manager, rate limiter, error monitor. Everything downstream
//! receives its collaborators through this state; there are no globals.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use task_router_config::{default_catalog, load_catalog, Settings};
use task_router_core::{
    BreakerState, Cache, CatalogHandle, CircuitBreaker, ErrorMonitor, FunctionExecutor, Nlu,
    Result, SessionStore,
};
use task_router_engine::{Dispatcher, IntentResolver, QuestionGenerator, ResolverConfig, TurnEngine};
use task_router_nlu::{HttpNlu, HttpNluConfig, KeywordNlu, ResilientNlu};
use task_router_persistence::{InMemoryCache, InMemoryStore};

use crate::rate_limit::RateLimiter;
use crate::session::SessionManager;

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub catalog: CatalogHandle,
    pub engine: Arc<TurnEngine>,
    pub sessions: Arc<SessionManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub monitor: Arc<ErrorMonitor>,
    pub store: Arc<dyn SessionStore>,
    pub cache: Arc<dyn Cache>,
    pub nlu_breaker: Arc<CircuitBreaker>,
    pub started_at: Instant,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build the full graph from settings with the default in-memory
    /// backends.
    pub fn build(settings: Settings) -> Result<Self> {
        let store: Arc<dyn SessionStore> = Arc::new(InMemoryStore::new());
        let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        Self::build_with(settings, store, cache, None)
    }

    /// Build with explicit backends; tests inject their own executor.
    pub fn build_with(
        settings: Settings,
        store: Arc<dyn SessionStore>,
        cache: Arc<dyn Cache>,
        executor_override: Option<Arc<dyn FunctionExecutor>>,
    ) -> Result<Self> {
        let settings = Arc::new(settings);

        // Catalog: file when present, shipped defaults otherwise.
        let catalog_path = Path::new(&settings.catalog_path);
        let catalog = if catalog_path.exists() {
            load_catalog(catalog_path, 1)?
        } else {
            tracing::info!(
                path = %settings.catalog_path,
                "catalog file not found, using shipped default catalog"
            );
            default_catalog(1)
        };
        let catalog = CatalogHandle::new(catalog);

        // NLU stack: HTTP primary when configured, keyword fallback
        // behind the breaker either way.
        let fallback: Arc<dyn Nlu> = Arc::new(KeywordNlu::new(catalog.clone()));
        let primary: Arc<dyn Nlu> = if settings.nlu.endpoint.is_empty() {
            tracing::warn!("no NLU endpoint configured, keyword matching only");
            fallback.clone()
        } else {
            Arc::new(HttpNlu::new(HttpNluConfig {
                endpoint: settings.nlu.endpoint.clone(),
                timeout: Duration::from_millis(settings.nlu.timeout_ms),
            }))
        };
        let nlu_breaker = Arc::new(CircuitBreaker::new("nlu", settings.breaker.clone().into()));
        let nlu: Arc<dyn Nlu> = Arc::new(ResilientNlu::new(
            primary,
            fallback,
            nlu_breaker.clone(),
        ));

        let executor: Arc<dyn FunctionExecutor> = match executor_override {
            Some(executor) => executor,
            None if settings.functions.endpoint.is_empty() => {
                tracing::warn!("no function endpoint configured, using canned executor");
                Arc::new(crate::functions::CannedExecutor)
            },
            None => Arc::new(crate::functions::HttpFunctionExecutor::new(
                settings.functions.endpoint.clone(),
            )),
        };

        let monitor = Arc::new(ErrorMonitor::default());
        let engine = Arc::new(
            TurnEngine::new(
                catalog.clone(),
                nlu,
                store.clone(),
                IntentResolver::new(ResolverConfig {
                    margin: settings.resolver.margin,
                    switch_threshold: settings.resolver.switch_threshold,
                    ambiguity_window: settings.resolver.ambiguity_window,
                    ambiguity_floor: settings.resolver.ambiguity_floor,
                }),
                QuestionGenerator::new(settings.dialogue.question_candidates),
                Dispatcher::new(
                    executor,
                    Duration::from_millis(settings.dialogue.function_timeout_ms),
                ),
                monitor.clone(),
            )
            .with_retry_policy(settings.retry.clone().into()),
        );

        let sessions = Arc::new(
            SessionManager::new(store.clone(), cache.clone(), settings.session.clone())
                .with_dialogue_defaults(
                    settings.dialogue.default_engagement,
                    settings.dialogue.default_time_pressure,
                ),
        );
        let rate_limiter = Arc::new(RateLimiter::new(settings.rate_limit.clone()));

        // The recorder is process-global; later states reuse the handle.
        let metrics = PROMETHEUS
            .get_or_try_init(|| PrometheusBuilder::new().install_recorder())
            .ok()
            .cloned();

        Ok(Self {
            settings,
            catalog,
            engine,
            sessions,
            rate_limiter,
            monitor,
            store,
            cache,
            nlu_breaker,
            started_at: Instant::now(),
            metrics,
        })
    }

    /// Dependency health for `/health`.
    pub async fn dependency_health(&self) -> Vec<(&'static str, &'static str)> {
        let nlu = match self.nlu_breaker.state() {
            BreakerState::Closed => "healthy",
            BreakerState::HalfOpen => "degraded",
            BreakerState::Open => "down",
        };

        let cache = match self.cache.get("health:probe").await {
            Ok(_) => "healthy",
            Err(_) => "down",
        };
        let store = match self.store.get_session("health:probe").await {
            Ok(_) => "healthy",
            Err(_) => "down",
        };

        vec![("nlu", nlu), ("store", store), ("cache", cache)]
    }
}
