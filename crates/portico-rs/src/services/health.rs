//! Periodic backend health checking.
//!
//! One probe task runs per configured backend, supervised by the checker.
//! Each tick the task skips the probe when the backend saw live traffic
//! recently (real requests are their own health signal), resolves the
//! upstream host via DNS, then issues an HTTP GET against the backend's
//! health endpoint and records the outcome. Status records are swapped under
//! a per-backend lock so readers always get a consistent snapshot.

use crate::models::settings::HealthCheckSettings;
use crate::services::circuit_breaker::CircuitSnapshot;
use ahash::HashMap as AHashMap;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Callback exposing circuit-breaker state alongside health snapshots.
pub type CircuitBreakerProvider =
    Arc<dyn Fn() -> HashMap<String, CircuitSnapshot> + Send + Sync>;

/// Serializable per-backend health record.
#[derive(Debug, Clone, Serialize, Default)]
pub struct HealthStatus {
    pub healthy: bool,
    pub dns_resolved: bool,
    pub resolved_ips: Vec<String>,
    pub last_check: Option<DateTime<Utc>>,
    pub checks_total: u64,
    pub checks_success: u64,
    pub checks_failed: u64,
    pub checks_skipped: u64,
    pub last_response_time_ms: Option<u64>,
    pub last_error: Option<String>,
    /// Seconds since the routing engine last sent live traffic to this backend.
    pub last_request_ago_secs: Option<u64>,
}

#[derive(Debug)]
struct BackendState {
    status: HealthStatus,
    last_request: Option<Instant>,
}

#[derive(Debug)]
struct BackendEntry {
    url: String,
    state: RwLock<BackendState>,
}

/// Periodic health checker for all configured backends.
///
/// The checker owns one tokio task per backend. Tasks re-read their backend
/// entry from the shared map on every tick, so [`HealthChecker::update_backends`]
/// takes effect without restarting: a removed id makes its task exit, an
/// added id gets a fresh task, a changed URL is picked up in place.
///
/// Stop closes a watch channel; every probe task returns on its next tick or
/// mid-probe via select. Restart after stop is supported.
pub struct HealthChecker {
    settings: HealthCheckSettings,
    client: reqwest::Client,
    backends: Arc<RwLock<AHashMap<String, Arc<BackendEntry>>>>,
    stop: Mutex<Option<watch::Sender<bool>>>,
    running: AtomicBool,
    breaker_provider: RwLock<Option<CircuitBreakerProvider>>,
}

impl HealthChecker {
    /// Creates a checker over `backends` (id → base URL) sharing the
    /// gateway's pooled HTTP client.
    pub fn new(
        settings: HealthCheckSettings,
        backends: HashMap<String, String>,
        client: reqwest::Client,
    ) -> Arc<Self> {
        let entries = backends
            .into_iter()
            .map(|(id, url)| {
                (
                    id,
                    Arc::new(BackendEntry {
                        url,
                        state: RwLock::new(BackendState {
                            status: HealthStatus::default(),
                            last_request: None,
                        }),
                    }),
                )
            })
            .collect();

        Arc::new(Self {
            settings,
            client,
            backends: Arc::new(RwLock::new(entries)),
            stop: Mutex::new(None),
            running: AtomicBool::new(false),
            breaker_provider: RwLock::new(None),
        })
    }

    /// Starts the probe tasks. A no-op when already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let (tx, _) = watch::channel(false);
        *self.stop.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

        let ids: Vec<String> = self
            .backends
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        for id in ids {
            self.spawn_probe_task(id);
        }
        info!("health checker started");
    }

    /// Signals every probe task to stop. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(tx) = self.stop.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = tx.send(true);
        }
        info!("health checker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn stop_receiver(&self) -> Option<watch::Receiver<bool>> {
        self.stop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|tx| tx.subscribe())
    }

    fn spawn_probe_task(self: &Arc<Self>, id: String) {
        let Some(mut stop_rx) = self.stop_receiver() else { return };
        let checker = Arc::clone(self);

        let per_backend = checker.settings.per_backend.get(&id);
        let interval = per_backend
            .filter(|pb| pb.interval > 0)
            .map(|pb| Duration::from_secs(pb.interval))
            .unwrap_or_else(|| checker.settings.interval());

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; keep it so new backends get
            // an initial status without waiting a full interval.
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let entry = {
                            let map = checker.backends.read().unwrap_or_else(|e| e.into_inner());
                            map.get(&id).cloned()
                        };
                        match entry {
                            Some(entry) => checker.probe(&id, &entry).await,
                            // Backend removed by update_backends.
                            None => break,
                        }
                    }
                }
            }
            debug!("health probe task for '{}' exited", id);
        });
    }

    async fn probe(&self, id: &str, entry: &BackendEntry) {
        // Live traffic within the threshold is its own probe.
        let recently_used = {
            let state = entry.state.read().unwrap_or_else(|e| e.into_inner());
            state
                .last_request
                .map(|t| t.elapsed() < self.settings.recent_request_threshold())
                .unwrap_or(false)
        };
        if recently_used {
            let mut state = entry.state.write().unwrap_or_else(|e| e.into_inner());
            state.status.checks_total += 1;
            state.status.checks_skipped += 1;
            state.status.last_check = Some(Utc::now());
            return;
        }

        let started = Instant::now();
        let outcome = self.run_probe(id, &entry.url).await;

        let mut state = entry.state.write().unwrap_or_else(|e| e.into_inner());
        let status = &mut state.status;
        status.checks_total += 1;
        status.last_check = Some(Utc::now());
        status.last_response_time_ms = Some(started.elapsed().as_millis() as u64);

        match outcome {
            Ok(ips) => {
                status.healthy = true;
                status.dns_resolved = true;
                status.resolved_ips = ips;
                status.checks_success += 1;
                status.last_error = None;
            }
            Err(ProbeError::Dns(e)) => {
                status.healthy = false;
                status.dns_resolved = false;
                status.resolved_ips.clear();
                status.checks_failed += 1;
                status.last_error = Some(e);
            }
            Err(ProbeError::Http(e)) => {
                status.healthy = false;
                status.dns_resolved = true;
                status.checks_failed += 1;
                status.last_error = Some(e);
            }
        }

        if !status.healthy {
            warn!(
                "health check failed for backend '{}': {}",
                id,
                status.last_error.as_deref().unwrap_or("unknown")
            );
        }
    }

    /// Resolves DNS then issues the HTTP probe. DNS failure fails fast
    /// without an HTTP attempt.
    async fn run_probe(&self, id: &str, base_url: &str) -> Result<Vec<String>, ProbeError> {
        let probe_url = self.probe_url(id, base_url);
        let url = reqwest::Url::parse(&probe_url)
            .map_err(|e| ProbeError::Http(format!("invalid health URL '{}': {}", probe_url, e)))?;

        let host = url
            .host_str()
            .ok_or_else(|| ProbeError::Dns(format!("no host in URL '{}'", probe_url)))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let addrs = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| ProbeError::Dns(format!("DNS resolution failed for '{}': {}", host, e)))?;
        let ips: Vec<String> = addrs.map(|a| a.ip().to_string()).collect();
        if ips.is_empty() {
            return Err(ProbeError::Dns(format!("DNS returned no addresses for '{}'", host)));
        }

        let per_backend = self.settings.per_backend.get(id);
        let timeout = per_backend
            .filter(|pb| pb.timeout > 0)
            .map(|pb| Duration::from_secs(pb.timeout))
            .unwrap_or_else(|| self.settings.timeout());
        let expected = per_backend
            .filter(|pb| !pb.expected_status_codes.is_empty())
            .map(|pb| pb.expected_status_codes.clone())
            .unwrap_or_else(|| self.settings.expected_status_codes());

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ProbeError::Http(format!("probe request failed: {}", e)))?;

        let status = response.status().as_u16();
        if expected.contains(&status) {
            Ok(ips)
        } else {
            Err(ProbeError::Http(format!("unexpected probe status {}", status)))
        }
    }

    /// The URL probed for a backend: the configured health endpoint (joined
    /// onto the base URL unless absolute), else the base URL itself.
    fn probe_url(&self, id: &str, base_url: &str) -> String {
        match self.settings.health_endpoints.get(id) {
            Some(ep) if ep.starts_with("http://") || ep.starts_with("https://") => ep.clone(),
            Some(ep) => format!("{}{}", base_url.trim_end_matches('/'), ep),
            None => base_url.to_string(),
        }
    }

    /// Records live traffic to a backend, feeding probe suppression.
    pub fn record_request(&self, id: &str) {
        let entry = {
            let map = self.backends.read().unwrap_or_else(|e| e.into_inner());
            map.get(id).cloned()
        };
        if let Some(entry) = entry {
            let mut state = entry.state.write().unwrap_or_else(|e| e.into_inner());
            state.last_request = Some(Instant::now());
        }
    }

    /// Diff-updates the probed backend set: adds new ids, removes missing
    /// ones, updates changed URLs in place (preserving counters).
    pub fn update_backends(self: &Arc<Self>, new_backends: HashMap<String, String>) {
        let mut added: Vec<String> = Vec::new();
        {
            let mut map = self.backends.write().unwrap_or_else(|e| e.into_inner());
            map.retain(|id, _| new_backends.contains_key(id));

            for (id, url) in new_backends {
                let existing = map.get(&id).cloned();
                match existing {
                    Some(entry) if entry.url == url => {}
                    Some(entry) => {
                        let state = {
                            let mut s = entry.state.write().unwrap_or_else(|e| e.into_inner());
                            std::mem::take(&mut s.status)
                        };
                        map.insert(
                            id,
                            Arc::new(BackendEntry {
                                url,
                                state: RwLock::new(BackendState {
                                    status: state,
                                    last_request: None,
                                }),
                            }),
                        );
                    }
                    None => {
                        map.insert(
                            id.clone(),
                            Arc::new(BackendEntry {
                                url,
                                state: RwLock::new(BackendState {
                                    status: HealthStatus::default(),
                                    last_request: None,
                                }),
                            }),
                        );
                        added.push(id);
                    }
                }
            }
        }

        if self.is_running() {
            for id in added {
                self.spawn_probe_task(id);
            }
        }
    }

    /// Installs the callback that exposes breaker state in health snapshots.
    pub fn set_circuit_breaker_provider(&self, provider: CircuitBreakerProvider) {
        *self.breaker_provider.write().unwrap_or_else(|e| e.into_inner()) = Some(provider);
    }

    /// Consistent per-backend snapshot for operational endpoints.
    pub fn snapshot(&self) -> HashMap<String, HealthStatus> {
        let map = self.backends.read().unwrap_or_else(|e| e.into_inner());
        map.iter()
            .map(|(id, entry)| {
                let state = entry.state.read().unwrap_or_else(|e| e.into_inner());
                let mut status = state.status.clone();
                status.last_request_ago_secs = state.last_request.map(|t| t.elapsed().as_secs());
                (id.clone(), status)
            })
            .collect()
    }

    /// Breaker snapshots from the installed provider, if any.
    pub fn circuit_breakers(&self) -> Option<HashMap<String, CircuitSnapshot>> {
        let provider = self.breaker_provider.read().unwrap_or_else(|e| e.into_inner());
        provider.as_ref().map(|p| p())
    }
}

enum ProbeError {
    Dns(String),
    Http(String),
}
