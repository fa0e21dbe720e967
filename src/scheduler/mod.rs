//! Scheduler module for running probes and recording their outcomes.
//!
//! One ticker drives every configured probe. Ticks are anchored to the
//! start of the first tick, so the cadence is `last start + interval` and
//! slow probes never push later ticks back; ticks missed because a tick ran
//! long are skipped.

mod stamp;

use stamp::Stamper;

use crate::config::{ConfigSource, MonitorConfig, ProbeDefinition};
use crate::db::{ProbeOutcome, Store};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::Instrument;

/// What happened during one tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Probes started
    pub dispatched: usize,
    /// Definitions skipped for an unknown agent kind
    pub skipped: usize,
    /// Outcomes written to the store
    pub recorded: usize,
    /// Outcomes lost to storage errors
    pub lost: usize,
}

/// The main scheduler that orchestrates probe execution.
pub struct Scheduler {
    store: Arc<Store>,
    config: Arc<ConfigSource>,
    stamps: Arc<Stamper>,
    stop_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, config: Arc<ConfigSource>) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            store,
            config,
            stamps: Arc::new(Stamper::default()),
            stop_tx,
        }
    }

    /// Tick until `stop` is called.
    ///
    /// Stopping abandons probes still in flight; each of them either wrote
    /// its single row already or writes nothing.
    pub async fn run(&self) {
        let mut stop_rx = self.stop_tx.subscribe();

        let mut period = self.config.current().await.settings.interval;
        let mut ticker = new_ticker(Instant::now(), period);
        tracing::info!("Scheduler: ticking every {:?}", period);

        loop {
            let tick_start = tokio::select! {
                _ = stop_rx.recv() => break,
                start = ticker.tick() => start,
            };

            let cfg = self.config.current().await;
            let report = tokio::select! {
                _ = stop_rx.recv() => break,
                report = self.tick(&cfg) => report,
            };

            let took = tick_start.elapsed();
            tracing::debug!(
                "Tick finished in {:?}: {} dispatched, {} recorded, {} lost, {} skipped",
                took, report.dispatched, report.recorded, report.lost, report.skipped
            );
            if took > period {
                tracing::warn!("Tick took {:?}, longer than the {:?} interval; skipping missed ticks", took, period);
            }

            if cfg.settings.interval != period {
                tracing::info!("Scheduler: interval changed from {:?} to {:?}", period, cfg.settings.interval);
                period = cfg.settings.interval;
                ticker = new_ticker(tick_start + period, period);
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Ask a running `run` loop to exit.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }

    /// Run a single tick against the current configuration.
    pub async fn run_tick(&self) -> TickReport {
        let cfg = self.config.current().await;
        self.tick(&cfg).await
    }

    async fn tick(&self, cfg: &MonitorConfig) -> TickReport {
        let mut report = TickReport::default();

        for rejected in &cfg.rejected {
            tracing::error!(
                "Skipping service {}: unknown agent type {:?}",
                rejected.name, rejected.agent
            );
            report.skipped += 1;
        }

        self.stamps.retain(cfg.services.iter().map(|def| def.name.as_str()));

        let mut tasks = JoinSet::new();
        for def in cfg.services.iter().cloned() {
            let span = tracing::info_span!("probe", service = %def.name, agent = %def.kind());
            tasks.spawn(
                check_and_record(def, self.store.clone(), self.stamps.clone()).instrument(span),
            );
            report.dispatched += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => report.recorded += 1,
                Ok(false) => report.lost += 1,
                Err(e) => {
                    tracing::error!("Probe task failed: {}", e);
                    report.lost += 1;
                }
            }
        }

        report
    }
}

fn new_ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Probe one service and append its outcome. Returns whether it was stored.
async fn check_and_record(def: ProbeDefinition, store: Arc<Store>, stamps: Arc<Stamper>) -> bool {
    let result = def.probe.execute(def.timeout).await;

    let outcome = ProbeOutcome {
        id: 0,
        service_name: def.name.clone(),
        agent_type: def.kind(),
        target: def.target().to_string(),
        timestamp: stamps.stamp(&def.name, Utc::now()),
        success: result.success,
        response_time: result.latency_ms,
    };

    match tokio::task::spawn_blocking(move || store.append(&outcome)).await {
        Ok(Ok(_)) => {
            tracing::debug!("Recorded success={} latency={:?}", result.success, result.latency_ms);
            true
        }
        Ok(Err(e)) => {
            tracing::error!("Failed to record outcome for {}: {}", def.name, e);
            false
        }
        Err(e) => {
            tracing::error!("Store task failed for {}: {}", def.name, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::AgentKind;
    use tempfile::TempDir;
    use tokio::net::{TcpListener, UdpSocket};

    fn setup(yaml: &str) -> (TempDir, Arc<Store>, Arc<Scheduler>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path().join("monitoring.db")).unwrap());
        let config = Arc::new(ConfigSource::fixed(MonitorConfig::parse(yaml).unwrap()));
        let scheduler = Arc::new(Scheduler::new(store.clone(), config));
        (dir, store, scheduler)
    }

    /// TCP endpoint that accepts and then never answers.
    async fn hanging_http() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });
        format!("http://{}/", addr)
    }

    /// Nameserver answering every query with one A record.
    async fn fast_nameserver() -> String {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
                let mut resp = buf[..n].to_vec();
                resp[2] |= 0x80;
                resp[6..8].copy_from_slice(&1u16.to_be_bytes());
                resp.extend_from_slice(&[0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 0, 60, 0, 4, 127, 0, 0, 1]);
                let _ = socket.send_to(&resp, peer).await;
            }
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn test_three_ticks_three_rows() {
        let (_dir, store, scheduler) = setup(
            "settings: { interval: 1, logLevel: info }\nservices:\n  - { name: web1, agent: ping, target: 127.0.0.1, timeout: 0.5 }\n",
        );

        for _ in 0..3 {
            let report = scheduler.run_tick().await;
            assert_eq!(report.dispatched, 1);
            assert_eq!(report.recorded, 1);
        }

        let history = store.history(None, None).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|o| o.service_name == "web1"));
        assert!(history.iter().all(|o| o.success || o.response_time.is_none()));

        let latest = store.latest_status().unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].timestamp, history[0].timestamp);
        assert!(history[1..].iter().all(|o| o.timestamp < latest[0].timestamp));
    }

    #[tokio::test]
    async fn test_unknown_agent_is_skipped_not_fatal() {
        let (_dir, store, scheduler) = setup(
            "settings: { interval: 1, logLevel: info }\nservices:\n  - { name: odd, agent: smtp, target: mail.local }\n  - { name: web1, agent: ping, target: 127.0.0.1, timeout: 0.5 }\n",
        );

        let report = scheduler.run_tick().await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.recorded, 1);

        let history = store.history(None, None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].service_name, "web1");
    }

    #[tokio::test]
    async fn test_hung_probe_does_not_delay_others() {
        let slow = hanging_http().await;
        let dns = fast_nameserver().await;
        let yaml = format!(
            "settings: {{ interval: 1, logLevel: info }}\nservices:\n  - {{ name: svcA, agent: http, target: '{}', timeout: 1.5 }}\n  - {{ name: svcB, agent: dns, target: '{}', domain: svc.local }}\n",
            slow, dns
        );
        let (_dir, store, scheduler) = setup(&yaml);

        let tick = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run_tick().await }
        });

        tokio::time::sleep(Duration::from_millis(600)).await;
        let early = store.history(None, None).unwrap();
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].service_name, "svcB");
        assert!(early[0].success);

        let report = tick.await.unwrap();
        assert_eq!(report.recorded, 2);

        let a = store.service_history("svcA", None).unwrap();
        assert_eq!(a.len(), 1);
        assert!(!a[0].success);
        assert_eq!(a[0].response_time, None);
        assert_eq!(a[0].agent_type, AgentKind::Http);
        assert!(a[0].timestamp > early[0].timestamp);
    }

    #[tokio::test]
    async fn test_run_and_stop() {
        let (_dir, store, scheduler) = setup(
            "settings: { interval: 1, logLevel: info }\nservices:\n  - { name: web1, agent: ping, target: 127.0.0.1, timeout: 0.2 }\n",
        );

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.stop();
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        let rows = store.history(None, None).unwrap().len();
        assert!((1..=3).contains(&rows), "unexpected row count {}", rows);
    }

    #[tokio::test]
    async fn test_cadence_is_anchored_to_tick_start() {
        // Each check burns most of the interval; rows must still be one
        // interval apart rather than interval + probe time.
        let slow = hanging_http().await;
        let yaml = format!(
            "settings: {{ interval: 1, logLevel: info }}\nservices:\n  - {{ name: slow, agent: http, target: '{}', timeout: 0.7 }}\n",
            slow
        );
        let (_dir, store, scheduler) = setup(&yaml);

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        tokio::time::sleep(Duration::from_millis(3850)).await;
        scheduler.stop();
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        let rows = store.service_history("slow", None).unwrap();
        assert!(rows.len() >= 3, "only {} rows", rows.len());
        for pair in rows.windows(2) {
            let gap = (pair[0].timestamp - pair[1].timestamp).num_milliseconds();
            assert!((800..=1300).contains(&gap), "gap {}ms drifted from the interval", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_skips_missed_ticks() {
        let start = Instant::now();
        let period = Duration::from_secs(1);
        let mut ticker = new_ticker(start, period);

        assert_eq!(ticker.tick().await, start);

        // A tick that runs for 2.5 intervals
        tokio::time::advance(Duration::from_millis(2500)).await;

        // The late tick fires once, right away
        assert_eq!(ticker.tick().await, start + period);
        assert_eq!(Instant::now(), start + Duration::from_millis(2500));

        // No burst for the tick at 2s; the next one stays on the original grid
        assert!(tokio::time::timeout(Duration::from_millis(100), ticker.tick()).await.is_err());
        assert_eq!(ticker.tick().await, start + 3 * period);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearmed_ticker_starts_one_period_after_tick() {
        let tick_start = Instant::now();
        let period = Duration::from_secs(5);
        let mut ticker = new_ticker(tick_start + period, period);

        assert_eq!(ticker.tick().await, tick_start + period);
        assert_eq!(ticker.tick().await, tick_start + 2 * period);
    }

    #[tokio::test]
    async fn test_reloaded_probe_set_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "settings: { interval: 1, logLevel: info }\nservices:\n  - { name: a, agent: ping, target: 127.0.0.1, timeout: 0.2 }\n",
        )
        .unwrap();

        let store = Arc::new(Store::new(dir.path().join("monitoring.db")).unwrap());
        let source = ConfigSource::file(&path, MonitorConfig::load(&path).unwrap());
        let scheduler = Scheduler::new(store.clone(), Arc::new(source));

        scheduler.run_tick().await;

        std::fs::write(
            &path,
            "settings: { interval: 1, logLevel: info }\nservices:\n  - { name: b, agent: ping, target: 127.0.0.1, timeout: 0.2 }\n",
        )
        .unwrap();
        scheduler.run_tick().await;
        assert_eq!(scheduler.stamps.tracked(), 1);

        let names: Vec<String> = store
            .latest_status()
            .unwrap()
            .into_iter()
            .map(|o| o.service_name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"b".to_string()));
    }
}
