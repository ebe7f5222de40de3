//! TCP line interfacer
//!
//! Listens on `port` and turns every received line of the form
//! `<node> <value> <value> ...` into a reading. Lines longer than
//! [`MAX_LINE_LEN`] bytes are discarded.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use bus::EnvelopeHandler;
use contracts::{ApplySettings, NodeId, ReadingEnvelope, Settings, SettingsCell};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, trace, warn};

use crate::adapters::common::{init_value, reject_unknown_init, require_init, Channels};
use crate::error::{InterfacerError, Result};
use crate::interfacer::{HubContext, Interfacer, InterfacerContext, PreparedInterfacer};

/// Type designator
pub const KIND: &str = "socket";

/// Longest accepted line in bytes
pub const MAX_LINE_LEN: usize = 4096;

/// Pause after a failed accept (e.g. descriptor exhaustion)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(250);

/// Runtime settings of the socket interfacer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketSettings {
    pub subchannels: Vec<String>,
    pub pubchannels: Vec<String>,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            subchannels: vec!["ch1".into()],
            pubchannels: vec!["ch1".into()],
        }
    }
}

impl_channels!(SocketSettings);

/// Parse one received line
///
/// Returns `None` when the line is blank or the node id is invalid. Values
/// that fail to parse are skipped individually.
pub fn parse_line(line: &str) -> Option<(NodeId, Vec<f64>)> {
    let mut fields = line.split_whitespace();
    let first = fields.next()?;
    let node = match first.parse::<NodeId>() {
        Ok(node) => node,
        Err(e) => {
            warn!(field = first, error = %e, "invalid node id");
            return None;
        }
    };

    let values = fields
        .filter_map(|f| match f.parse::<f64>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(node, field = f, "discarding unparsable value");
                None
            }
        })
        .collect();
    Some((node, values))
}

/// Line-oriented TCP listener
pub struct SocketInterfacer {
    settings: Arc<SettingsCell<SocketSettings>>,
    listener: StdTcpListener,
}

impl SocketInterfacer {
    /// Bind `addr` right away so a busy port fails construction
    pub fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = StdTcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            settings: Arc::new(SettingsCell::new(SocketSettings::default())),
            listener,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    settings: Arc<SettingsCell<SocketSettings>>,
    ctx: InterfacerContext,
) {
    let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    loop {
        let line = tokio::select! {
            _ = ctx.stop().requested() => break,
            line = lines.next() => line,
        };

        let line = match line {
            Some(Ok(line)) => line,
            None => break,
            // The codec skips ahead to the next newline
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!(interfacer = %ctx.name(), %peer, max = MAX_LINE_LEN, "line too long, discarded");
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                warn!(interfacer = %ctx.name(), %peer, error = %e, "read failed");
                break;
            }
        };

        let Some((node, values)) = parse_line(&line) else {
            continue;
        };
        trace!(interfacer = %ctx.name(), node, values = values.len(), "line received");

        let envelope = ReadingEnvelope::new(node, format!("tcp://{peer}"))
            .with_raw(line)
            .with_values(values);
        let pubchannels = settings.read().pubchannels().to_vec();
        ctx.publish(&pubchannels, envelope);
    }
    debug!(interfacer = %ctx.name(), %peer, "connection closed");
}

impl Interfacer for SocketInterfacer {
    fn settings(&self) -> Arc<dyn ApplySettings> {
        self.settings.clone()
    }

    fn receiver(&self, _hub: &HubContext) -> Option<EnvelopeHandler> {
        None
    }

    async fn run(self, ctx: InterfacerContext) {
        let listener = match TcpListener::from_std(self.listener) {
            Ok(listener) => listener,
            Err(e) => {
                warn!(interfacer = %ctx.name(), error = %e, "cannot register listener");
                return;
            }
        };
        if let Ok(addr) = listener.local_addr() {
            info!(interfacer = %ctx.name(), %addr, "listening");
        }

        let mut connections = JoinSet::new();
        loop {
            let accepted = tokio::select! {
                _ = ctx.stop().requested() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(interfacer = %ctx.name(), %peer, "connection accepted");
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        self.settings.clone(),
                        ctx.clone(),
                    ));
                }
                Err(e) => {
                    warn!(interfacer = %ctx.name(), error = %e, "accept failed");
                    if ctx.stop().sleep(ACCEPT_BACKOFF).await {
                        break;
                    }
                }
            }

            // Reap finished connections
            while connections.try_join_next().is_some() {}
        }

        while connections.join_next().await.is_some() {}
        debug!(interfacer = %ctx.name(), "socket loop stopped");
    }
}

/// Factory: requires `port`, accepts `host` (default `0.0.0.0`)
pub fn factory(name: &str, init: &Settings) -> Result<PreparedInterfacer> {
    reject_unknown_init(name, init, &["port", "host"])?;
    let port: u16 = require_init(name, init, "port")?;
    let host: String = init_value(name, init, "host")?.unwrap_or_else(|| "0.0.0.0".into());

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| InterfacerError::init(name, format!("invalid address {host}:{port}: {e}")))?;
    let interfacer = SocketInterfacer::bind(addr)
        .map_err(|e| InterfacerError::init(name, format!("cannot bind {addr}: {e}")))?;
    Ok(PreparedInterfacer::new(interfacer))
}
