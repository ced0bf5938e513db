//! Poll loop feeding probe results into the history stores

use crate::config::Config;
use crate::derived::DerivedMetrics;
use crate::errors::{FailureKind, MonitorError, Result};
use crate::history::{HistoryPoint, Observation, RollingHistoryStore, TickCommit};
use crate::liveness::{LivenessRule, require_endpoint_success_count};
use crate::probe::{EndpointKind, EndpointProbe, HttpProbe, ProbeResult};
use crate::registry::{Service, ServiceRegistry};

use chrono::Utc;
use futures::future::join_all;
use futures::join;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior, interval, interval_at};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Which history a liveness tick writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryView {
    /// Per-endpoint windows behind the health/ready/live views
    Status,
    /// Background history refreshed on the slow timer
    Aggregate,
}

/// Drives every probe on its own timer and owns the resulting state
pub struct Poller {
    config: Config,
    registry: Arc<ServiceRegistry>,
    probe: Arc<dyn EndpointProbe>,
    selected: Service,
    status_history: Arc<RwLock<RollingHistoryStore>>,
    aggregate_history: Arc<RwLock<RollingHistoryStore>>,
    latest_status: Arc<RwLock<HashMap<EndpointKind, Vec<ProbeResult>>>>,
    latest_metrics: Arc<RwLock<Option<DerivedMetrics>>>,
    next_refresh_in: Arc<AtomicU64>,
    poller_id: String,
}

impl Poller {
    pub fn new(
        config: Config,
        registry: ServiceRegistry,
        probe: Arc<dyn EndpointProbe>,
    ) -> Result<Self> {
        let selected = match &config.selected_service {
            Some(name) => registry.get(name).cloned().ok_or_else(|| {
                MonitorError::Config(format!("selected service {} is not registered", name))
            })?,
            None => registry
                .first()
                .cloned()
                .ok_or_else(|| MonitorError::Config("no services registered".to_string()))?,
        };

        let countdown = config.status_poll_interval.as_secs();

        Ok(Self {
            config,
            registry: Arc::new(registry),
            probe,
            selected,
            status_history: Arc::new(RwLock::new(RollingHistoryStore::new())),
            aggregate_history: Arc::new(RwLock::new(RollingHistoryStore::new())),
            latest_status: Arc::new(RwLock::new(HashMap::new())),
            latest_metrics: Arc::new(RwLock::new(None)),
            next_refresh_in: Arc::new(AtomicU64::new(countdown)),
            poller_id: Uuid::new_v4().to_string(),
        })
    }

    /// Build a poller probing over HTTP with the configured registry
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate().map_err(MonitorError::Config)?;

        let registry = config.load_registry()?;
        let probe = HttpProbe::new(config.http_timeout)?;

        Self::new(config, registry, Arc::new(probe))
    }

    /// Run every timer until `shutdown` resolves.
    ///
    /// Each timer drives its own task, so a slow service on one view never
    /// holds back another. Ticks within one task run back to back and each
    /// store has a single writer.
    #[instrument(skip(self, shutdown), fields(poller_id = %self.poller_id))]
    pub async fn run<S>(&self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        info!(
            "Polling {} services (status every {:?}, metrics every {:?}, history every {:?})",
            self.registry.len(),
            self.config.status_poll_interval,
            self.config.metrics_poll_interval,
            self.config.history_poll_interval
        );

        let status_poller = self.clone_for_task();
        let metrics_poller = self.clone_for_task();
        let history_poller = self.clone_for_task();
        let countdown_poller = self.clone_for_task();

        let tasks: Vec<JoinHandle<()>> = vec![
            tokio::spawn(async move { status_poller.status_loop().await }),
            tokio::spawn(async move { metrics_poller.metrics_loop().await }),
            tokio::spawn(async move { history_poller.history_loop().await }),
            tokio::spawn(async move { countdown_poller.countdown_loop().await }),
        ];

        shutdown.await;
        info!("Shutdown requested, stopping poll timers");

        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            match task.await {
                Err(e) if !e.is_cancelled() => error!("Poll task failed: {}", e),
                _ => {}
            }
        }

        let stats = self.stats().await;
        info!(
            "Poller stopped - {} services, {} status points, {} aggregate points",
            stats.services, stats.status_points, stats.aggregate_points
        );
    }

    async fn status_loop(&self) {
        let mut timer = timer(self.config.status_poll_interval);
        loop {
            timer.tick().await;
            self.refresh_status_views().await;
        }
    }

    async fn metrics_loop(&self) {
        let mut timer = timer(self.config.metrics_poll_interval);
        loop {
            timer.tick().await;
            self.metrics_tick().await;
        }
    }

    async fn history_loop(&self) {
        let mut timer = timer(self.config.history_poll_interval);
        loop {
            timer.tick().await;
            self.liveness_tick(
                HistoryView::Aggregate,
                EndpointKind::Health,
                LivenessRule::Delta,
                now_ms(),
            )
            .await;
        }
    }

    async fn countdown_loop(&self) {
        let second = Duration::from_secs(1);
        let mut timer = interval_at(Instant::now() + second, second);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            timer.tick().await;
            self.tick_countdown();
        }
    }

    /// One refresh of the health, ready and live views.
    ///
    /// The scrape and the three status rounds are issued together, so a
    /// hanging service costs one timeout per refresh.
    pub async fn refresh_status_views(&self) {
        let now = now_ms();
        let [health, ready, live] = EndpointKind::STATUS_VIEWS;

        let (scrapes, _, _, _) = join!(
            self.scrape_all(),
            self.status_tick(health),
            self.status_tick(ready),
            self.status_tick(live)
        );

        for kind in EndpointKind::STATUS_VIEWS {
            self.commit_liveness(HistoryView::Status, kind, LivenessRule::Absolute, &scrapes, now)
                .await;
        }

        self.next_refresh_in
            .store(self.config.status_poll_interval.as_secs(), Ordering::Relaxed);
    }

    /// Probe `kind` on every service concurrently and keep the results
    pub async fn status_tick(&self, kind: EndpointKind) -> Vec<ProbeResult> {
        let results = join_all(self.registry.iter().map(|service| self.probe.probe(service, kind)))
            .await;

        let healthy = results.iter().filter(|r| r.is_healthy()).count();
        info!(
            "{} check complete: {}/{} services healthy",
            kind,
            healthy,
            results.len()
        );

        self.latest_status.write().await.insert(kind, results.clone());
        results
    }

    /// Scrape `/metrics` on every service and record liveness for `kind`
    pub async fn liveness_tick(
        &self,
        view: HistoryView,
        kind: EndpointKind,
        rule: LivenessRule,
        now: i64,
    ) -> Vec<Observation> {
        let scrapes = self.scrape_all().await;
        self.commit_liveness(view, kind, rule, &scrapes, now).await
    }

    /// Derived metrics for the selected service
    pub async fn metrics_tick(&self) -> DerivedMetrics {
        let metrics = self.metrics_for(&self.selected).await;
        *self.latest_metrics.write().await = Some(metrics.clone());
        metrics
    }

    /// Derived metrics for any service, without touching poller state
    pub async fn metrics_for(&self, service: &Service) -> DerivedMetrics {
        let scrape = self.probe.probe(service, EndpointKind::Metrics).await;
        let now = Utc::now();

        match scrape.samples() {
            Some(samples) => DerivedMetrics::from_samples(samples, now),
            None => DerivedMetrics::unavailable(now),
        }
    }

    async fn scrape_all(&self) -> Vec<ProbeResult> {
        join_all(
            self.registry
                .iter()
                .map(|service| self.probe.probe(service, EndpointKind::Metrics)),
        )
        .await
    }

    /// Evaluate scrapes against the counters seen before this tick, then commit in one step
    async fn commit_liveness(
        &self,
        view: HistoryView,
        kind: EndpointKind,
        rule: LivenessRule,
        scrapes: &[ProbeResult],
        now: i64,
    ) -> Vec<Observation> {
        let store = self.history(view);
        let previous = store.read().await.previous_counts(kind);

        let observations: Vec<Observation> = scrapes
            .iter()
            .map(|scrape| {
                let (count, failure) = match scrape.samples() {
                    Some(samples) => match require_endpoint_success_count(samples, kind) {
                        Ok(count) => (Some(count), None),
                        Err(e) => {
                            warn!("Scrape of {} has no {} count: {}", scrape.service, kind, e);
                            (None, Some(e.kind()))
                        }
                    },
                    None => (None, Some(scrape.failure.unwrap_or(FailureKind::NetworkFailure))),
                };

                Observation {
                    service: scrape.service.clone(),
                    count,
                    recorded_count: rule.recorded_count(count),
                    status: rule.evaluate(previous.get(&scrape.service).copied(), count),
                    failure,
                }
            })
            .collect();

        let down = observations.iter().filter(|o| !o.status.is_up()).count();
        if down > 0 {
            warn!(
                "{} of {} services down on {} ({:?} rule)",
                down,
                observations.len(),
                kind,
                rule
            );
        }

        store.write().await.commit(TickCommit {
            kind,
            timestamp: now,
            observations: observations.clone(),
        });

        observations
    }

    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            registry: Arc::clone(&self.registry),
            probe: Arc::clone(&self.probe),
            selected: self.selected.clone(),
            status_history: Arc::clone(&self.status_history),
            aggregate_history: Arc::clone(&self.aggregate_history),
            latest_status: Arc::clone(&self.latest_status),
            latest_metrics: Arc::clone(&self.latest_metrics),
            next_refresh_in: Arc::clone(&self.next_refresh_in),
            poller_id: self.poller_id.clone(),
        }
    }

    fn tick_countdown(&self) {
        let reset = self.config.status_poll_interval.as_secs();
        let _ = self
            .next_refresh_in
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |remaining| {
                Some(if remaining > 0 { remaining - 1 } else { reset })
            });
    }

    /// Shared handle to one of the history stores
    pub fn history(&self, view: HistoryView) -> Arc<RwLock<RollingHistoryStore>> {
        match view {
            HistoryView::Status => Arc::clone(&self.status_history),
            HistoryView::Aggregate => Arc::clone(&self.aggregate_history),
        }
    }

    pub async fn snapshot(
        &self,
        view: HistoryView,
        service: &str,
        kind: EndpointKind,
    ) -> Vec<HistoryPoint> {
        self.history(view).read().await.snapshot(service, kind)
    }

    pub async fn latest_status(&self, kind: EndpointKind) -> Vec<ProbeResult> {
        self.latest_status
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn latest_metrics(&self) -> Option<DerivedMetrics> {
        self.latest_metrics.read().await.clone()
    }

    /// Seconds until the next status refresh, for display only
    pub fn next_refresh_in(&self) -> u64 {
        self.next_refresh_in.load(Ordering::Relaxed)
    }

    pub fn selected_service(&self) -> &Service {
        &self.selected
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub async fn stats(&self) -> PollerStats {
        PollerStats {
            poller_id: self.poller_id.clone(),
            services: self.registry.len(),
            status_points: self.status_history.read().await.total_points(),
            aggregate_points: self.aggregate_history.read().await.total_points(),
            next_refresh_in: self.next_refresh_in(),
        }
    }
}

/// Poller statistics
#[derive(Debug, Clone)]
pub struct PollerStats {
    pub poller_id: String,
    pub services: usize,
    pub status_points: usize,
    pub aggregate_points: usize,
    pub next_refresh_in: u64,
}

fn timer(period: Duration) -> Interval {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

/// Current time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;
    use crate::exposition;
    use crate::liveness::Status;
    use crate::probe::{HEALTHY, ProbeBody};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves queued `/metrics` bodies per service; `None` simulates a network error
    #[derive(Default)]
    struct ScriptedProbe {
        scrapes: Mutex<HashMap<String, VecDeque<Option<String>>>>,
        unreachable: Vec<String>,
        delays: HashMap<String, Duration>,
    }

    impl ScriptedProbe {
        fn unreachable(names: &[&str]) -> Self {
            Self {
                unreachable: names.iter().map(|n| n.to_string()).collect(),
                ..Self::default()
            }
        }

        /// Every request to `service` takes `delay` before answering
        fn slow(service: &str, delay: Duration) -> Self {
            Self {
                delays: HashMap::from([(service.to_string(), delay)]),
                ..Self::default()
            }
        }

        fn queue(&self, service: &str, body: Option<&str>) {
            self.scrapes
                .lock()
                .unwrap()
                .entry(service.to_string())
                .or_default()
                .push_back(body.map(str::to_string));
        }
    }

    #[async_trait]
    impl EndpointProbe for ScriptedProbe {
        async fn probe(&self, service: &Service, kind: EndpointKind) -> ProbeResult {
            if let Some(delay) = self.delays.get(&service.name) {
                tokio::time::sleep(*delay).await;
            }
            if self.unreachable.contains(&service.name) {
                return ProbeResult::failed(&service.name, kind, FailureKind::NetworkFailure);
            }

            match kind {
                EndpointKind::Metrics => {
                    let body = self
                        .scrapes
                        .lock()
                        .unwrap()
                        .get_mut(&service.name)
                        .and_then(VecDeque::pop_front)
                        .flatten();
                    match body {
                        Some(text) => ProbeResult::success(
                            &service.name,
                            kind,
                            HEALTHY,
                            ProbeBody::Metrics(exposition::parse(&text)),
                        ),
                        None => {
                            ProbeResult::failed(&service.name, kind, FailureKind::NetworkFailure)
                        }
                    }
                }
                _ => ProbeResult::success(
                    &service.name,
                    kind,
                    HEALTHY,
                    ProbeBody::Text(HEALTHY.to_string()),
                ),
            }
        }
    }

    fn health_count(count: u64) -> String {
        format!(
            "http_request_duration_seconds_count{{endpoint=\"/health\",code=\"200\"}} {}\n",
            count
        )
    }

    fn poller(probe: ScriptedProbe) -> Poller {
        let registry = ServiceRegistry::from_inline("orders=http://orders,billing=http://billing")
            .unwrap();
        Poller::new(Config::default(), registry, Arc::new(probe)).unwrap()
    }

    #[tokio::test]
    async fn test_delta_rule_needs_two_increasing_polls() {
        let probe = ScriptedProbe::default();
        probe.queue("orders", Some(&health_count(10)));
        probe.queue("orders", Some(&health_count(15)));
        let poller = poller(probe);

        for minute in 0..2 {
            poller
                .liveness_tick(
                    HistoryView::Aggregate,
                    EndpointKind::Health,
                    LivenessRule::Delta,
                    1_000 + minute * 60_000,
                )
                .await;
        }

        let statuses: Vec<Status> = poller
            .snapshot(HistoryView::Aggregate, "orders", EndpointKind::Health)
            .await
            .iter()
            .map(|p| p.status)
            .collect();
        assert_eq!(statuses, vec![Status::Down, Status::Up]);

        let counts: Vec<Option<f64>> = poller
            .snapshot(HistoryView::Aggregate, "orders", EndpointKind::Health)
            .await
            .iter()
            .map(|p| p.count)
            .collect();
        assert_eq!(counts, vec![Some(10.0), Some(15.0)]);
    }

    #[tokio::test]
    async fn test_failing_service_does_not_block_others() {
        let probe = ScriptedProbe::unreachable(&["billing"]);
        probe.queue("orders", Some(&health_count(3)));
        let poller = poller(probe);

        let statuses = poller.status_tick(EndpointKind::Live).await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().find(|r| r.service == "orders").unwrap().is_healthy());
        let billing = statuses.iter().find(|r| r.service == "billing").unwrap();
        assert!(billing.error);
        assert_eq!(billing.failure, Some(FailureKind::NetworkFailure));

        let observations = poller
            .liveness_tick(HistoryView::Status, EndpointKind::Health, LivenessRule::Absolute, 0)
            .await;
        let orders = observations.iter().find(|o| o.service == "orders").unwrap();
        let billing = observations.iter().find(|o| o.service == "billing").unwrap();
        assert_eq!(orders.status, Status::Up);
        assert_eq!(orders.count, Some(3.0));
        assert_eq!(billing.status, Status::Down);
        assert_eq!(billing.count, None);
        assert_eq!(billing.failure, Some(FailureKind::NetworkFailure));
        assert!(billing.error());

        // The status view records zero for the failed scrape but keeps no counter
        let points = poller
            .snapshot(HistoryView::Status, "billing", EndpointKind::Health)
            .await;
        assert_eq!(points[0].count, Some(0.0));
        let store = poller.history(HistoryView::Status);
        assert_eq!(store.read().await.last_count("billing", EndpointKind::Health), None);
    }

    #[tokio::test]
    async fn test_missing_endpoint_sample_is_no_matching_metric() {
        let source = ScriptedProbe::default();
        source.queue("orders", Some("process_working_set_bytes 1048576\n"));
        source.queue("billing", Some(&health_count(5)));
        let poller = poller(source);

        let observations = poller
            .liveness_tick(HistoryView::Status, EndpointKind::Health, LivenessRule::Absolute, 0)
            .await;

        let orders = observations.iter().find(|o| o.service == "orders").unwrap();
        assert_eq!(orders.status, Status::Down);
        assert_eq!(orders.failure, Some(FailureKind::NoMatchingMetric));
        assert_eq!(orders.recorded_count, Some(0.0));

        let billing = observations.iter().find(|o| o.service == "billing").unwrap();
        assert_eq!(billing.status, Status::Up);
        assert_eq!(billing.failure, None);
    }

    #[tokio::test]
    async fn test_delta_history_keeps_missing_count_unknown() {
        let poller = poller(ScriptedProbe::unreachable(&["billing"]));

        poller
            .liveness_tick(HistoryView::Aggregate, EndpointKind::Health, LivenessRule::Delta, 0)
            .await;

        let points = poller
            .snapshot(HistoryView::Aggregate, "billing", EndpointKind::Health)
            .await;
        assert_eq!(points[0].count, None);
        assert_eq!(points[0].status, Status::Down);
    }

    #[tokio::test]
    async fn test_status_views_share_one_scrape() {
        let probe = ScriptedProbe::default();
        probe.queue(
            "orders",
            Some(
                "http_request_duration_seconds_count{code=\"200\",endpoint=\"/ready\"} 4\n\
                 http_request_duration_seconds_count{code=\"200\",endpoint=\"/live\"} 0\n",
            ),
        );
        let poller = poller(probe);

        poller.refresh_status_views().await;

        let ready = poller
            .snapshot(HistoryView::Status, "orders", EndpointKind::Ready)
            .await;
        let live = poller
            .snapshot(HistoryView::Status, "orders", EndpointKind::Live)
            .await;
        let health = poller
            .snapshot(HistoryView::Status, "orders", EndpointKind::Health)
            .await;

        assert_eq!(ready[0].status, Status::Up);
        assert_eq!(live[0].status, Status::Down);
        assert_eq!(live[0].count, Some(0.0));
        assert_eq!(health[0].count, Some(0.0));
        assert_eq!(poller.latest_status(EndpointKind::Ready).await.len(), 2);
        assert_eq!(poller.next_refresh_in(), 30);
    }

    #[tokio::test]
    async fn test_metrics_tick_for_selected_service() {
        let probe = ScriptedProbe::default();
        probe.queue(
            "orders",
            Some(
                "http_request_duration_seconds_count{endpoint=\"/health\",code=\"200\"} 42\n\
                 process_working_set_bytes 104857600\n",
            ),
        );
        let poller = poller(probe);
        assert_eq!(poller.selected_service().name, "orders");

        let metrics = poller.metrics_tick().await;
        assert_eq!(metrics.requests_per_second, Some(42.0));
        assert_eq!(metrics.memory_mb, Some(100.0));
        assert_eq!(metrics.failure_rate_percent, Some(0.0));
        assert_eq!(poller.latest_metrics().await, Some(metrics));

        // Nothing queued any more: the scrape fails and every figure is unknown
        let degraded = poller.metrics_tick().await;
        assert_eq!(degraded.requests_per_second, None);
        assert_eq!(degraded.memory_mb, None);
    }

    #[tokio::test]
    async fn test_unknown_selected_service_rejected() {
        let registry = ServiceRegistry::from_inline("orders=http://orders").unwrap();
        let config = Config {
            selected_service: Some("billing".to_string()),
            ..Config::default()
        };
        let result = Poller::new(config, registry, Arc::new(ScriptedProbe::default()));
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }

    #[tokio::test]
    async fn test_countdown_wraps() {
        let poller = poller(ScriptedProbe::default());
        assert_eq!(poller.next_refresh_in(), 30);

        for _ in 0..30 {
            poller.tick_countdown();
        }
        assert_eq!(poller.next_refresh_in(), 0);

        poller.tick_countdown();
        assert_eq!(poller.next_refresh_in(), 30);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let probe = ScriptedProbe::default();
        for count in [1, 2, 3, 4] {
            probe.queue("orders", Some(&health_count(count)));
        }
        let poller = poller(probe);

        poller
            .run(tokio::time::sleep(Duration::from_millis(200)))
            .await;

        let stats = poller.stats().await;
        assert_eq!(stats.services, 2);
        // Every timer fires once immediately: three status windows and one
        // aggregate window per service
        assert_eq!(stats.status_points, 6);
        assert_eq!(stats.aggregate_points, 2);
        assert!(poller.latest_metrics().await.is_some());
    }

    #[tokio::test]
    async fn test_slow_service_costs_one_timeout_per_refresh() {
        let delay = Duration::from_millis(400);
        let poller = poller(ScriptedProbe::slow("billing", delay));

        let started = std::time::Instant::now();
        poller.refresh_status_views().await;
        let elapsed = started.elapsed();

        assert!(elapsed >= delay);
        assert!(elapsed < delay * 2, "refresh took {:?}", elapsed);
        assert_eq!(poller.latest_status(EndpointKind::Live).await.len(), 2);
    }

    #[tokio::test]
    async fn test_slow_service_does_not_stall_other_timers() {
        let source = ScriptedProbe::slow("billing", Duration::from_secs(1));
        for count in [1, 2, 3, 4] {
            source.queue("orders", Some(&health_count(count)));
        }
        let poller = poller(source);

        poller
            .run(tokio::time::sleep(Duration::from_millis(2500)))
            .await;

        // The countdown kept ticking after the slow refresh reset it
        assert!(poller.next_refresh_in() < 30);
        assert!(poller.latest_metrics().await.is_some());

        let stats = poller.stats().await;
        assert_eq!(stats.status_points, 6);
        assert_eq!(stats.aggregate_points, 2);
    }
}
