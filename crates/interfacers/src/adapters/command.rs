//! External command interfacer
//!
//! Runs a command every `execute_every_secs`, extracts numeric values from
//! its standard output with the configured regular expressions and publishes
//! them as one reading for `node`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bus::EnvelopeHandler;
use contracts::{deserialize_flag, ApplySettings, ContractError, NodeId, ReadingEnvelope, Settings, SettingsCell};
use metrics::counter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

use crate::adapters::common::{positive_secs, reject_unknown_init, Channels};
use crate::error::{InterfacerError, Result};
use crate::interfacer::{HubContext, Interfacer, InterfacerContext, PreparedInterfacer};

/// Type designator
pub const KIND: &str = "command";

const POLL: Duration = Duration::from_millis(100);

/// Runtime settings of the command interfacer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSettings {
    /// Channels readings are received from
    pub subchannels: Vec<String>,
    /// Channels readings are published to
    pub pubchannels: Vec<String>,
    /// Seconds between two executions
    pub execute_every_secs: f64,
    /// Seconds a single execution may take before it is killed
    pub timeout: f64,
    /// Run the command through the platform shell
    #[serde(deserialize_with = "deserialize_flag")]
    pub withshell: bool,
    /// Command line
    pub command: String,
    /// Patterns whose first capture group is a value
    pub command_regexes: Vec<String>,
    /// Node the extracted values belong to
    pub node: NodeId,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            subchannels: vec!["ch1".into()],
            pubchannels: vec!["ch2".into()],
            execute_every_secs: 30.0,
            timeout: 8.0,
            withshell: true,
            command: r#"echo "Total Power = 1234""#.into(),
            command_regexes: vec![r"Total Power\s*=\s([0-9.,]+)".into()],
            node: 31,
        }
    }
}

impl_channels!(CommandSettings);

impl CommandSettings {
    fn validate(&self) -> std::result::Result<(), ContractError> {
        positive_secs("execute_every_secs", self.execute_every_secs)?;
        positive_secs("timeout", self.timeout)?;
        if self.command.trim().is_empty() {
            return Err(ContractError::invalid_setting("command", "must not be empty"));
        }
        for pattern in &self.command_regexes {
            Regex::new(pattern)
                .map_err(|e| ContractError::invalid_setting("command_regexes", e.to_string()))?;
        }
        Ok(())
    }
}

/// Compiled form of `command_regexes`, rebuilt when the setting changes
#[derive(Default)]
struct Patterns {
    source: Vec<String>,
    compiled: Vec<Regex>,
}

impl Patterns {
    fn refresh(&mut self, source: &[String]) -> &[Regex] {
        if self.source != source {
            self.compiled = source
                .iter()
                .filter_map(|p| match Regex::new(p) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(pattern = %p, error = %e, "skipping invalid pattern");
                        None
                    }
                })
                .collect();
            self.source = source.to_vec();
        }
        &self.compiled
    }
}

/// Extract values from `output`
///
/// Every match of every pattern contributes its first capture group. A
/// capture that does not parse as a number is logged and skipped; the other
/// values are kept.
pub fn extract_values(patterns: &[Regex], output: &str) -> Vec<f64> {
    let mut values = Vec::new();
    for re in patterns {
        for caps in re.captures_iter(output) {
            let Some(m) = caps.get(1) else {
                trace!(pattern = %re, "match without capture group");
                continue;
            };
            match m.as_str().trim().parse::<f64>() {
                Ok(v) => values.push(v),
                Err(e) => warn!(value = m.as_str(), error = %e, "discarding unparsable value"),
            }
        }
    }
    values
}

/// Periodically executed external command
pub struct CommandInterfacer {
    settings: Arc<SettingsCell<CommandSettings>>,
}

impl CommandInterfacer {
    /// Create with default settings
    pub fn new() -> Self {
        Self {
            settings: Arc::new(
                SettingsCell::new(CommandSettings::default()).with_validator(CommandSettings::validate),
            ),
        }
    }

    #[instrument(name = "command_execute", skip(settings, ctx), fields(interfacer = %ctx.name()))]
    async fn execute(settings: &CommandSettings, ctx: &InterfacerContext) -> Result<Option<String>> {
        let mut cmd = build_command(settings)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        let timeout = Duration::from_secs_f64(settings.timeout);

        // Dropping the pending future kills the child
        let output = tokio::select! {
            _ = ctx.stop().requested() => return Ok(None),
            out = tokio::time::timeout(timeout, child.wait_with_output()) => out,
        };

        let output = output.map_err(|_| {
            InterfacerError::Runtime(format!("command timed out after {timeout:?}"))
        })??;

        if !output.status.success() {
            return Err(InterfacerError::Runtime(format!(
                "command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }
}

impl Default for CommandInterfacer {
    fn default() -> Self {
        Self::new()
    }
}

fn build_command(settings: &CommandSettings) -> Result<Command> {
    if settings.withshell {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C");
            cmd
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            cmd.arg("-c");
            cmd
        };
        cmd.arg(&settings.command);
        return Ok(cmd);
    }

    let mut parts = settings.command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| InterfacerError::Runtime("empty command".into()))?;
    let mut cmd = Command::new(program);
    cmd.args(parts);
    Ok(cmd)
}

impl Interfacer for CommandInterfacer {
    fn settings(&self) -> Arc<dyn ApplySettings> {
        self.settings.clone()
    }

    fn receiver(&self, _hub: &HubContext) -> Option<EnvelopeHandler> {
        None
    }

    async fn run(self, ctx: InterfacerContext) {
        let mut patterns = Patterns::default();
        let mut last = Instant::now();

        while !ctx.stop().is_requested() {
            let settings = self.settings.get();
            let every = Duration::from_secs_f64(settings.execute_every_secs);

            if last.elapsed() < every {
                ctx.stop().sleep(POLL).await;
                continue;
            }
            last = Instant::now();

            let stdout = match Self::execute(&settings, &ctx).await {
                Ok(Some(stdout)) => stdout,
                Ok(None) => break,
                Err(e) => {
                    warn!(interfacer = %ctx.name(), error = %e, "command failed");
                    counter!("hub_command_failures_total", "interfacer" => ctx.name().to_string())
                        .increment(1);
                    continue;
                }
            };

            let values = extract_values(patterns.refresh(&settings.command_regexes), &stdout);
            if values.is_empty() {
                debug!(interfacer = %ctx.name(), "no values extracted");
                continue;
            }

            let envelope = ReadingEnvelope::new(settings.node, format!("command://{}", ctx.name()))
                .with_raw(stdout)
                .with_values(values);
            ctx.publish(settings.pubchannels(), envelope);
        }

        debug!(interfacer = %ctx.name(), "command loop stopped");
    }
}

/// Factory: the command interfacer takes no init settings
pub fn factory(name: &str, init: &Settings) -> Result<PreparedInterfacer> {
    reject_unknown_init(name, init, &[])?;
    Ok(PreparedInterfacer::new(CommandInterfacer::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use bus::Bus;

    use crate::handle::InterfacerHandle;

    fn patterns(p: &[&str]) -> Vec<Regex> {
        p.iter().map(|p| Regex::new(p).unwrap()).collect()
    }

    #[test]
    fn test_defaults_validate() {
        let defaults = CommandSettings::default();
        assert!(defaults.validate().is_ok());
        assert_eq!(defaults.node, 31);
        assert_eq!(defaults.execute_every_secs, 30.0);
        assert_eq!(defaults.timeout, 8.0);
        assert_eq!(defaults.pubchannels, vec!["ch2".to_string()]);
    }

    #[test]
    fn test_extract_default_pattern() {
        let p = patterns(&[r"Total Power\s*=\s([0-9.,]+)"]);
        assert_eq!(extract_values(&p, "Total Power = 1234\n"), vec![1234.0]);
        assert!(extract_values(&p, "nothing here").is_empty());
    }

    #[test]
    fn test_extract_skips_bad_values_only() {
        let p = patterns(&[r"a=([0-9.,]+)", r"b=(\d+)"]);
        let values = extract_values(&p, "a=1,2 a=3.5 b=7 b=8");
        assert_eq!(values, vec![3.5, 7.0, 8.0]);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let cell = SettingsCell::new(CommandSettings::default()).with_validator(CommandSettings::validate);
        let bad: Settings = toml::from_str(r#"command_regexes = ["("]"#).unwrap();
        assert!(cell.apply(&bad).is_err());

        let bad: Settings = toml::from_str("execute_every_secs = 0").unwrap();
        assert!(cell.apply(&bad).is_err());
        assert_eq!(cell.get(), CommandSettings::default());

        let flag: Settings = toml::from_str(r#"withshell = "no""#).unwrap();
        cell.apply(&flag).unwrap();
        assert!(!cell.get().withshell);
    }

    #[test]
    fn test_factory_rejects_init_settings() {
        let init: Settings = toml::from_str("port = 1").unwrap();
        assert!(factory("cmd", &init).is_err());
        assert!(factory("cmd", &Settings::new()).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_publishes_extracted_values() {
        let bus = Bus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(
            "out",
            "collector",
            Arc::new(move |env: &ReadingEnvelope| {
                sink.lock().unwrap().push(env.clone());
                Ok(())
            }),
        )
        .unwrap();

        let mut handle = InterfacerHandle::new(
            "cmd",
            KIND,
            Settings::new(),
            factory("cmd", &Settings::new()).unwrap(),
            HubContext::detached(bus.clone()),
        );
        let updates: Settings = toml::from_str(
            r#"
            execute_every_secs = 0.2
            pubchannels = ["out"]
            command = "echo 'Total Power = 42.5'"
            node = 5
            "#,
        )
        .unwrap();
        handle.apply_runtime_settings(&updates).unwrap();
        handle.start().unwrap();

        for _ in 0..100 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        handle.request_stop();
        assert!(handle.join(Duration::from_secs(2)).await);

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert_eq!(seen[0].node_id, 5);
        assert_eq!(seen[0].decoded_values, vec![42.5]);
        assert_eq!(seen[0].origin_uri, "command://cmd");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_command_times_out() {
        let settings = CommandSettings {
            command: "sleep 5".into(),
            timeout: 0.1,
            ..CommandSettings::default()
        };
        let bus = Bus::new();
        let ctx = InterfacerContext::new("slow", HubContext::detached(bus), Default::default());

        let start = std::time::Instant::now();
        let result = CommandInterfacer::execute(&settings, &ctx).await;
        assert!(matches!(result, Err(InterfacerError::Runtime(_))));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    /// Log sink shared with the test body
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_cycle_warns_and_publishes_nothing() {
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        // Current-thread runtime: the interfacer task logs on this thread
        let _guard = tracing::subscriber::set_default(subscriber);

        let bus = Bus::new();
        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();
        bus.subscribe(
            "out",
            "collector",
            Arc::new(move |_: &ReadingEnvelope| {
                *sink.lock().unwrap() += 1;
                Ok(())
            }),
        )
        .unwrap();

        let mut handle = InterfacerHandle::new(
            "slow",
            KIND,
            Settings::new(),
            factory("slow", &Settings::new()).unwrap(),
            HubContext::detached(bus.clone()),
        );
        let updates: Settings = toml::from_str(
            r#"
            execute_every_secs = 0.2
            timeout = 0.1
            pubchannels = ["out"]
            command = "sleep 2; echo 'Total Power = 1234'"
            "#,
        )
        .unwrap();
        handle.apply_runtime_settings(&updates).unwrap();
        handle.start().unwrap();

        for _ in 0..100 {
            if logs.text().contains("timed out") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.request_stop();
        assert!(handle.join(Duration::from_secs(2)).await);

        let text = logs.text();
        assert!(text.contains("WARN"), "{text}");
        assert!(text.contains("command failed"), "{text}");
        assert!(text.contains("command timed out"), "{text}");
        assert!(text.contains("interfacer=slow"), "{text}");
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_interrupts_running_command() {
        let settings = CommandSettings {
            command: "sleep 5".into(),
            timeout: 10.0,
            ..CommandSettings::default()
        };
        let bus = Bus::new();
        let ctx = InterfacerContext::new("stopped", HubContext::detached(bus), Default::default());
        let stop = ctx.stop().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.request();
        });

        let start = std::time::Instant::now();
        let result = CommandInterfacer::execute(&settings, &ctx).await.unwrap();
        assert!(result.is_none());
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_reports_error() {
        let settings = CommandSettings {
            command: "exit 3".into(),
            ..CommandSettings::default()
        };
        let ctx = InterfacerContext::new("fail", HubContext::detached(Bus::new()), Default::default());
        assert!(CommandInterfacer::execute(&settings, &ctx).await.is_err());
    }
}
