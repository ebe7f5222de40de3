//! # Integration Tests
//!
//! Cross-crate scenarios:
//! - configuration file reloads driving the supervisor
//! - source -> bus -> sink data flow
//! - command interfacer end to end
//! - watchdog heartbeat windows

#[cfg(test)]
mod support {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use contracts::{ApplySettings, ReadingEnvelope, Settings, SettingsCell};
    use interfacers::{HubContext, Interfacer, InterfacerContext, PreparedInterfacer, Registry};
    use serde::{Deserialize, Serialize};
    use supervisor::Notifier;

    pub fn table(s: &str) -> Settings {
        toml::from_str(s).unwrap()
    }

    /// Collects every envelope delivered to it
    #[derive(Clone, Default)]
    pub struct Collector(Arc<Mutex<Vec<ReadingEnvelope>>>);

    impl Collector {
        pub fn handler(&self) -> bus::EnvelopeHandler {
            let seen = self.0.clone();
            Arc::new(move |env: &ReadingEnvelope| {
                seen.lock().unwrap().push(env.clone());
                Ok(())
            })
        }

        pub fn received(&self) -> Vec<ReadingEnvelope> {
            self.0.lock().unwrap().clone()
        }

        pub async fn wait_for(&self, count: usize, limit: Duration) -> Vec<ReadingEnvelope> {
            let deadline = Instant::now() + limit;
            while Instant::now() < deadline {
                if self.0.lock().unwrap().len() >= count {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            self.received()
        }
    }

    /// Notifier keeping every state string with its send time
    #[derive(Clone, Default)]
    pub struct Recorder(Arc<Mutex<Vec<(Instant, String)>>>);

    impl Notifier for Recorder {
        fn notify(&self, state: &str) -> std::io::Result<()> {
            self.0.lock().unwrap().push((Instant::now(), state.to_string()));
            Ok(())
        }
    }

    impl Recorder {
        pub fn heartbeats(&self) -> Vec<Instant> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, s)| s == "WATCHDOG=1")
                .map(|(t, _)| *t)
                .collect()
        }

        pub fn clear(&self) {
            self.0.lock().unwrap().clear();
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct QuitterSettings {
        subchannels: Vec<String>,
        pubchannels: Vec<String>,
    }

    /// Interfacer whose loop returns immediately
    struct Quitter(Arc<SettingsCell<QuitterSettings>>);

    impl Interfacer for Quitter {
        fn settings(&self) -> Arc<dyn ApplySettings> {
            self.0.clone()
        }

        fn receiver(&self, _hub: &HubContext) -> Option<bus::EnvelopeHandler> {
            None
        }

        async fn run(self, _ctx: InterfacerContext) {}
    }

    /// Built-in kinds plus `quitter`
    pub fn registry() -> Registry {
        let mut registry = Registry::with_defaults();
        registry.register("quitter", |_: &str, _: &Settings| {
            Ok(PreparedInterfacer::new(Quitter(Arc::new(SettingsCell::new(
                QuitterSettings {
                    subchannels: vec![],
                    pubchannels: vec![],
                },
            )))))
        });
        registry
    }
}

#[cfg(test)]
mod reconfiguration_tests {
    use std::io::Write;
    use std::time::{Duration, SystemTime};

    use bus::Bus;
    use config_loader::FileConfigSource;
    use contracts::ReadingEnvelope;
    use interfacers::Registry;
    use supervisor::{Supervisor, SupervisorOptions, TeardownReason};

    use crate::support::Collector;

    fn options() -> SupervisorOptions {
        SupervisorOptions {
            tick: Duration::from_millis(10),
            teardown_timeout: Duration::from_secs(1),
        }
    }

    fn hub_toml(node: u32, interval: f64, sink_path: &str) -> String {
        format!(
            r#"
[hub]
loglevel = "debug"

[nodes.{node}]
nodename = "bench"
names = ["power"]

[interfacers.gen]
type = "generator"
[interfacers.gen.init_settings]
node = {node}
[interfacers.gen.runtime_settings]
interval_secs = {interval:?}
pubchannels = ["readings"]

[interfacers.archive]
type = "file"
[interfacers.archive.init_settings]
path = {sink_path:?}
[interfacers.archive.runtime_settings]
subchannels = ["readings"]
"#
        )
    }

    fn rewrite(file: &mut tempfile::NamedTempFile, content: &str, offset_secs: u64) {
        let f = file.as_file_mut();
        f.set_len(0).unwrap();
        std::io::Seek::rewind(f).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.sync_all().unwrap();
        f.set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
            .unwrap();
    }

    fn archived(path: &std::path::Path) -> Vec<ReadingEnvelope> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    async fn wait_archived(path: &std::path::Path, node: u32) -> bool {
        for _ in 0..200 {
            if archived(path).iter().any(|e| e.node_id == node) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_file_reload_drives_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("readings.jsonl");
        let sink_path = sink.display().to_string();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        rewrite(&mut file, &hub_toml(3, 0.02, &sink_path), 0);

        let source = FileConfigSource::open(file.path()).unwrap();
        let mut sup = Supervisor::new(source, Registry::with_defaults(), Bus::new(), options());
        let plan = sup.reconcile_now().await;
        assert_eq!(plan.create, vec!["archive", "gen"]);
        assert!(wait_archived(&sink, 3).await);

        let gen_id = sup.interfacer("gen").unwrap().instance_id();
        let archive_id = sup.interfacer("archive").unwrap().instance_id();

        // Runtime-only change: same instances
        rewrite(&mut file, &hub_toml(3, 0.05, &sink_path), 10);
        let plan = sup.tick().await.expect("change detected");
        assert!(plan.teardown.is_empty());
        assert_eq!(sup.interfacer("gen").unwrap().instance_id(), gen_id);
        assert_eq!(sup.interfacer("archive").unwrap().instance_id(), archive_id);

        // Init change: one teardown then one creation, only for `gen`
        rewrite(&mut file, &hub_toml(4, 0.02, &sink_path), 20);
        let plan = sup.tick().await.expect("change detected");
        assert_eq!(plan.teardown, vec![("gen".to_string(), TeardownReason::InitChanged)]);
        assert_eq!(plan.create, vec!["gen"]);
        assert_eq!(sup.lingering(), 0);
        assert_ne!(sup.interfacer("gen").unwrap().instance_id(), gen_id);
        assert_eq!(sup.interfacer("archive").unwrap().instance_id(), archive_id);
        assert!(wait_archived(&sink, 4).await);

        // Unparsable file: previous snapshot kept, nothing touched
        rewrite(&mut file, "[interfacers.gen\n", 30);
        assert!(sup.tick().await.is_none());
        assert_eq!(sup.names(), vec!["archive", "gen"]);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_type_removal_and_readd() {
        let dir = tempfile::tempdir().unwrap();
        let sink_path = dir.path().join("readings.jsonl").display().to_string();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let full = hub_toml(3, 0.02, &sink_path);
        rewrite(&mut file, &full, 0);

        let source = FileConfigSource::open(file.path()).unwrap();
        let mut sup = Supervisor::new(source, Registry::with_defaults(), Bus::new(), options());
        sup.reconcile_now().await;
        let first = sup.interfacer("gen").unwrap().instance_id();
        assert_eq!(sup.bus().subscriber_count("readings"), 1);

        let untyped = full.replacen("type = \"generator\"", "", 1);
        rewrite(&mut file, &untyped, 10);
        let plan = sup.tick().await.expect("change detected");
        assert_eq!(plan.teardown, vec![("gen".to_string(), TeardownReason::Disabled)]);
        assert!(sup.interfacer("gen").is_none());

        let without_sink = full.split("[interfacers.archive]").next().unwrap().to_string();
        rewrite(&mut file, &without_sink, 20);
        let plan = sup.tick().await.expect("change detected");
        assert_eq!(plan.teardown, vec![("archive".to_string(), TeardownReason::Removed)]);
        assert_eq!(sup.bus().subscriber_count("readings"), 0);

        rewrite(&mut file, &full, 30);
        sup.tick().await.expect("change detected");
        assert_ne!(sup.interfacer("gen").unwrap().instance_id(), first);
        assert_eq!(sup.bus().subscriber_count("readings"), 1);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_loglevel_does_not_block_reload() {
        let dir = tempfile::tempdir().unwrap();
        let sink_path = dir.path().join("readings.jsonl").display().to_string();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let full = hub_toml(3, 0.02, &sink_path);
        rewrite(&mut file, &full, 0);

        let source = FileConfigSource::open(file.path()).unwrap();
        let mut sup = Supervisor::new(source, Registry::with_defaults(), Bus::new(), options());
        sup.reconcile_now().await;

        let edited = format!(
            "{}\n[interfacers.console]\ntype = \"log\"\n[interfacers.console.init_settings]\n\
             [interfacers.console.runtime_settings]\nsubchannels = [\"readings\"]\n",
            full.replacen("loglevel = \"debug\"", "loglevel = \"verbose\"", 1)
        );
        rewrite(&mut file, &edited, 10);
        let plan = sup.tick().await.expect("change detected");
        assert_eq!(plan.create, vec!["console"]);
        assert!(plan.teardown.is_empty());
        assert!(sup.interfacer("console").unwrap().is_alive());
        assert_eq!(sup.bus().subscriber_count("readings"), 2);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_socket_lines_reach_subscribers() {
        use tokio::io::AsyncWriteExt;

        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = format!(
            r#"
[interfacers.listener]
type = "socket"
[interfacers.listener.init_settings]
host = "127.0.0.1"
port = {port}
[interfacers.listener.runtime_settings]
pubchannels = ["raw"]
"#
        );
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        rewrite(&mut file, &config, 0);

        let source = FileConfigSource::open(file.path()).unwrap();
        let mut sup = Supervisor::new(source, Registry::with_defaults(), Bus::new(), options());
        sup.reconcile_now().await;
        assert!(sup.interfacer("listener").is_some());

        let collector = Collector::default();
        sup.bus().subscribe("raw", "collector", collector.handler()).unwrap();

        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(b"7 1.5 2.5\n").await.unwrap();

        let got = collector.wait_for(1, Duration::from_secs(2)).await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].node_id, 7);
        assert_eq!(got[0].decoded_values, vec![1.5, 2.5]);

        drop(stream);
        sup.shutdown().await;
    }
}

#[cfg(test)]
mod bus_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bus::Bus;
    use contracts::{ContractError, ReadingEnvelope};

    use crate::support::Collector;

    #[tokio::test]
    async fn test_ch2_delivery_survives_failing_handler() {
        let bus = Bus::new();
        let first = Collector::default();
        let last = Collector::default();
        let other = Collector::default();

        bus.subscribe("ch2", "first", first.handler()).unwrap();
        bus.subscribe(
            "ch2",
            "broken",
            Arc::new(|_: &ReadingEnvelope| -> Result<(), ContractError> {
                Err(ContractError::config_parse("boom"))
            }),
        )
        .unwrap();
        bus.subscribe("ch2", "last", last.handler()).unwrap();
        bus.subscribe("ch3", "other", other.handler()).unwrap();

        assert_eq!(bus.publish("ch2", ReadingEnvelope::new(9, "test://bus")), 3);

        assert_eq!(first.wait_for(1, Duration::from_secs(2)).await.len(), 1);
        assert_eq!(last.wait_for(1, Duration::from_secs(2)).await.len(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(other.received().is_empty());

        bus.unsubscribe("ch2", "first");
        bus.publish("ch2", ReadingEnvelope::new(10, "test://bus"));
        assert_eq!(last.wait_for(2, Duration::from_secs(2)).await.len(), 2);
        assert_eq!(first.received().len(), 1);

        tokio::task::spawn_blocking(move || bus.close()).await.unwrap();
    }
}

#[cfg(all(test, unix, feature = "command"))]
mod command_tests {
    use std::time::{Duration, Instant};

    use config_loader::MemoryConfigSource;
    use contracts::{HubConfig, InterfacerSpec, Settings};
    use interfacers::Registry;
    use supervisor::{Supervisor, SupervisorOptions};

    use crate::support::{table, Collector};

    fn supervisor(runtime: &str) -> Supervisor<MemoryConfigSource> {
        let mut config = HubConfig::default();
        config.interfacers.insert(
            "power".into(),
            InterfacerSpec::new("command", Settings::new(), table(runtime)),
        );
        let (source, _handle) = MemoryConfigSource::new(config);
        Supervisor::new(
            source,
            Registry::with_defaults(),
            bus::Bus::new(),
            SupervisorOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_one_reading_per_interval() {
        let mut sup = supervisor(
            r#"
execute_every_secs = 0.3
pubchannels = ["ch2"]
"#,
        );
        let collector = Collector::default();
        sup.bus().subscribe("ch2", "collector", collector.handler()).unwrap();
        sup.reconcile_now().await;

        let got = collector.wait_for(3, Duration::from_secs(3)).await;
        assert!(got.len() >= 3);
        for env in &got {
            assert_eq!(env.node_id, 31);
            assert_eq!(env.decoded_values, vec![1234.0]);
            assert_eq!(env.origin_uri, "command://power");
        }
        for pair in got.windows(2) {
            let gap = pair[1].timestamp - pair[0].timestamp;
            assert!(gap > 0.2 && gap < 0.6, "gap {gap}");
        }

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_timed_out_command_publishes_nothing() {
        let mut sup = supervisor(
            r#"
execute_every_secs = 0.1
timeout = 0.2
command = "sleep 5; echo 'Total Power = 1'"
pubchannels = ["ch2"]
"#,
        );
        let collector = Collector::default();
        sup.bus().subscribe("ch2", "collector", collector.handler()).unwrap();
        sup.reconcile_now().await;

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(collector.received().is_empty());
        assert!(sup.interfacer("power").unwrap().is_alive());

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_join_within_poll_bound() {
        let mut sup = supervisor(
            r#"
execute_every_secs = 60.0
"#,
        );
        sup.reconcile_now().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        sup.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

#[cfg(test)]
mod watchdog_tests {
    use std::time::{Duration, Instant};

    use bus::Bus;
    use config_loader::{MemoryConfigHandle, MemoryConfigSource};
    use contracts::{HubConfig, HubSettings, InterfacerSpec, Settings};
    use supervisor::{HealthMonitor, Supervisor, SupervisorOptions};

    use crate::support::{registry, table, Recorder};

    const TICK: Duration = Duration::from_millis(10);
    const WATCHDOG_SECS: f64 = 0.4;

    fn setup() -> (Supervisor<MemoryConfigSource>, MemoryConfigHandle, Recorder) {
        let hub = HubSettings {
            systemd_watchdog_timeout_secs: Some(WATCHDOG_SECS),
            ..HubSettings::default()
        };
        let mut config = HubConfig {
            hub: hub.clone(),
            ..HubConfig::default()
        };
        config.interfacers.insert(
            "gen".into(),
            InterfacerSpec::new("generator", table("node = 1"), table("interval_secs = 0.1")),
        );
        let (source, handle) = MemoryConfigSource::new(config);

        let recorder = Recorder::default();
        let health = HealthMonitor::new(Some(Box::new(recorder.clone())), None, &hub);
        let sup = Supervisor::new(
            source,
            registry(),
            Bus::new(),
            SupervisorOptions {
                tick: TICK,
                teardown_timeout: Duration::from_secs(1),
            },
        )
        .with_health(health);
        (sup, handle, recorder)
    }

    async fn run_for(sup: &mut Supervisor<MemoryConfigSource>, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            sup.tick().await;
            tokio::time::sleep(TICK).await;
        }
    }

    #[tokio::test]
    async fn test_heartbeat_in_every_half_interval() {
        let (mut sup, _cfg, recorder) = setup();
        sup.reconcile_now().await;
        run_for(&mut sup, Duration::from_secs(2)).await;

        let beats = recorder.heartbeats();
        assert!(beats.len() >= 5, "only {} heartbeats", beats.len());
        let bound = Duration::from_secs_f64(WATCHDOG_SECS / 2.0) + TICK * 10;
        for pair in beats.windows(2) {
            assert!(pair[1] - pair[0] <= bound, "gap {:?}", pair[1] - pair[0]);
        }

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_strict_mode_withholds_until_alive() {
        let (mut sup, cfg, recorder) = setup();
        sup.reconcile_now().await;
        run_for(&mut sup, Duration::from_millis(300)).await;

        cfg.update(|c| {
            c.interfacers.insert(
                "dead".into(),
                InterfacerSpec::new("quitter", Settings::new(), Settings::new()),
            );
        });
        run_for(&mut sup, Duration::from_millis(100)).await;
        recorder.clear();

        run_for(&mut sup, Duration::from_secs(1)).await;
        assert!(recorder.heartbeats().is_empty());

        cfg.update(|c| {
            c.interfacers.remove("dead");
        });
        run_for(&mut sup, Duration::from_millis(100)).await;
        assert!(!recorder.heartbeats().is_empty());

        sup.shutdown().await;
    }
}
