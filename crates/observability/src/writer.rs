//! Log destinations
//!
//! - [`RotatingFile`]: size-capped log file with one backup (`<file>.1`)
//! - [`SyslogWriter`]: RFC 3164 datagrams to the local syslog socket

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;

/// Rotate once the file would exceed this size (5 MiB)
pub const ROTATE_BYTES: u64 = 5000 * 1024;

struct RotatingState {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
}

impl RotatingState {
    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".1");
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        fs::rename(&self.path, self.backup_path())?;
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }
}

/// Size-rotating log file
///
/// Clones share the same file. Each formatted event is written in a single
/// call so rotation never splits a line.
#[derive(Clone)]
pub struct RotatingFile {
    state: Arc<Mutex<RotatingState>>,
}

impl RotatingFile {
    /// Open `path` for appending, rotating at `max_bytes`
    pub fn open(path: impl AsRef<Path>, max_bytes: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            state: Arc::new(Mutex::new(RotatingState {
                path,
                file,
                written,
                max_bytes,
            })),
        })
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .file
            .flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFile {
    type Writer = RotatingFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Default local syslog socket
pub const SYSLOG_SOCKET: &str = "/dev/log";

/// `user` facility
const FACILITY_USER: u8 = 1;

fn severity(level: &Level) -> u8 {
    match *level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        Level::DEBUG | Level::TRACE => 7,
    }
}

#[cfg(unix)]
type SyslogSocket = std::os::unix::net::UnixDatagram;

/// Syslog sink tagging every message with `<tag>[<pid>]:`
#[derive(Clone)]
pub struct SyslogWriter {
    #[cfg(unix)]
    socket: Arc<SyslogSocket>,
    tag: Arc<str>,
}

impl SyslogWriter {
    /// Connect to the syslog socket at `path`
    #[cfg(unix)]
    pub fn connect(path: impl AsRef<Path>, tag: &str) -> io::Result<Self> {
        let socket = SyslogSocket::unbound()?;
        socket.connect(path)?;
        Ok(Self {
            socket: Arc::new(socket),
            tag: format!("{tag}[{}]", std::process::id()).into(),
        })
    }

    /// Syslog is only available on unix
    #[cfg(not(unix))]
    pub fn connect(_path: impl AsRef<Path>, _tag: &str) -> io::Result<Self> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "syslog requires a unix socket"))
    }

    fn message(&self, level: Level) -> SyslogMessage {
        SyslogMessage {
            writer: self.clone(),
            priority: FACILITY_USER * 8 + severity(&level),
            buf: Vec::new(),
        }
    }

    /// Render one RFC 3164 datagram
    fn frame(&self, priority: u8, body: &[u8]) -> Vec<u8> {
        let stamp = chrono::Local::now().format("%b %e %H:%M:%S");
        let body = String::from_utf8_lossy(body);
        format!("<{priority}>{stamp} {}: {}", self.tag, body.trim_end()).into_bytes()
    }

    #[cfg(unix)]
    fn send(&self, datagram: &[u8]) -> io::Result<()> {
        self.socket.send(datagram).map(|_| ())
    }

    #[cfg(not(unix))]
    fn send(&self, _datagram: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

/// One event, sent as a datagram when dropped
pub struct SyslogMessage {
    writer: SyslogWriter,
    priority: u8,
    buf: Vec<u8>,
}

impl Write for SyslogMessage {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogMessage {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let datagram = self.writer.frame(self.priority, &self.buf);
        // Nowhere left to report a failed log write
        let _ = self.writer.send(&datagram);
    }
}

impl<'a> MakeWriter<'a> for SyslogWriter {
    type Writer = SyslogMessage;

    fn make_writer(&'a self) -> Self::Writer {
        self.message(Level::INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        self.message(*meta.level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_keeps_one_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.log");
        let mut file = RotatingFile::open(&path, 32).unwrap();

        file.write_all(b"first line, 20 bytes").unwrap();
        file.write_all(b"second line, 21 bytes").unwrap();
        file.write_all(b"third line, 20 bytes").unwrap();
        file.flush().unwrap();

        let backup = dir.path().join("hub.log.1");
        assert_eq!(fs::read_to_string(&path).unwrap(), "third line, 20 bytes");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "second line, 21 bytes");
        assert!(!dir.path().join("hub.log.2").exists());
    }

    #[test]
    fn test_open_appends_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.log");
        fs::write(&path, "old\n").unwrap();

        let mut file = RotatingFile::open(&path, ROTATE_BYTES).unwrap();
        file.write_all(b"new\n").unwrap();
        file.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "old\nnew\n");
    }

    #[test]
    fn test_severity() {
        assert_eq!(FACILITY_USER * 8 + severity(&Level::ERROR), 11);
        assert_eq!(FACILITY_USER * 8 + severity(&Level::DEBUG), 15);
    }

    #[cfg(unix)]
    #[test]
    fn test_syslog_datagram() {
        use std::os::unix::net::UnixDatagram;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.sock");
        let server = UnixDatagram::bind(&path).unwrap();

        let writer = SyslogWriter::connect(&path, "sensor-hub").unwrap();
        {
            let mut msg = writer.message(Level::WARN);
            msg.write_all(b"interfacer thread is dead\n").unwrap();
        }

        let mut buf = [0u8; 512];
        let n = server.recv(&mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.starts_with("<12>"));
        assert!(text.contains(&format!("sensor-hub[{}]: ", std::process::id())));
        assert!(text.ends_with("interfacer thread is dead"));
    }
}
