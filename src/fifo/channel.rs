//! Watched named pipe.

use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::error::FifoError;
use crate::process::{EventBus, SupervisorEvent};

/// Self-written lines remembered for echo suppression.
const MAX_ECHOES: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointKind {
    /// A real named pipe: reading consumes the data.
    Pipe,
    /// A regular file: tailed by byte offset.
    Regular,
}

/// Open handle plus the read/suppression state of a connected fifo.
#[derive(Debug)]
struct FifoEndpoint {
    file: File,
    kind: EndpointKind,
    offset: u64,
    pending: Vec<u8>,
    /// Change notifications still owed to our own writes.
    suppressed: usize,
    /// Lines we wrote that may still be read back.
    echoes: VecDeque<String>,
}

impl FifoEndpoint {
    fn open(path: &Path) -> Result<Self, FifoError> {
        let mut options = OpenOptions::new();
        options.read(true).append(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(nix::fcntl::OFlag::O_NONBLOCK.bits());
        }

        let file = options.open(path).map_err(|source| FifoError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let metadata = file.metadata()?;
        let kind = if is_pipe(&metadata) {
            EndpointKind::Pipe
        } else {
            EndpointKind::Regular
        };

        Ok(Self {
            file,
            kind,
            // Existing content of a regular file predates the connection.
            offset: metadata.len(),
            pending: Vec::new(),
            suppressed: 0,
            echoes: VecDeque::new(),
        })
    }

    /// React to a data change on the watched path.
    fn on_change(&mut self) -> Vec<String> {
        if self.suppressed > 0 {
            self.suppressed -= 1;
            tracing::trace!("Ignoring self-written fifo change");
            return Vec::new();
        }
        if let Err(e) = self.fill() {
            tracing::warn!(error = %e, "Failed to read fifo");
        }
        self.take_lines()
    }

    /// Read everything currently available into `pending`.
    fn fill(&mut self) -> io::Result<()> {
        if self.kind == EndpointKind::Regular {
            let len = self.file.metadata()?.len();
            if len < self.offset {
                tracing::warn!(
                    old_offset = self.offset,
                    new_len = len,
                    "Fifo file truncated, resetting offset to 0"
                );
                self.offset = 0;
            }
            self.file.seek(SeekFrom::Start(self.offset))?;
        }

        let mut buf = [0u8; 4096];
        loop {
            match self.file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.pending.extend_from_slice(&buf[..n]);
                    if self.kind == EndpointKind::Regular {
                        self.offset += n as u64;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Split complete lines off `pending`, dropping blanks and our own echoes.
    fn take_lines(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if text.is_empty() {
                continue;
            }
            if let Some(idx) = self.echoes.iter().position(|echo| *echo == text) {
                self.echoes.remove(idx);
                continue;
            }
            messages.push(text);
        }
        messages
    }

    fn write_line(&mut self, text: &str) -> Result<(), FifoError> {
        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()?;

        self.suppressed += 1;
        for echo in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if self.echoes.len() == MAX_ECHOES {
                self.echoes.pop_front();
            }
            self.echoes.push_back(echo.to_string());
        }
        Ok(())
    }
}

#[cfg(unix)]
fn is_pipe(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.file_type().is_fifo()
}

#[cfg(not(unix))]
fn is_pipe(_metadata: &std::fs::Metadata) -> bool {
    false
}

/// Create a named pipe at `path` unless something already exists there.
fn ensure_pipe(path: &Path) -> Result<(), FifoError> {
    if path.exists() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use nix::sys::stat::Mode;

        nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|errno| {
            FifoError::Create {
                path: path.to_path_buf(),
                source: errno.into(),
            }
        })
    }

    #[cfg(not(unix))]
    {
        File::create(path)
            .map(|_| ())
            .map_err(|source| FifoError::Create {
                path: path.to_path_buf(),
                source,
            })
    }
}

fn is_data_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
    )
}

struct Connection {
    path: PathBuf,
    endpoint: Arc<Mutex<FifoEndpoint>>,
    /// Dropping the watcher removes the watch.
    _watcher: RecommendedWatcher,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A named pipe watched for lines written by other processes.
///
/// Lines written through [`write`](Self::write) are never reported back as
/// incoming messages.
#[derive(Debug)]
pub struct FifoChannel {
    bus: EventBus,
    connection: Option<Connection>,
}

impl FifoChannel {
    /// Create a disconnected channel publishing to `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            connection: None,
        }
    }

    /// Open (creating if needed) the pipe at `path` and start watching it.
    ///
    /// Connecting to the path already open is a no-op; connecting to a
    /// different path closes the old one first.
    ///
    /// # Errors
    ///
    /// Returns `FifoError` if the pipe cannot be created, opened or watched.
    pub fn connect(&mut self, path: &Path) -> Result<(), FifoError> {
        if let Some(conn) = &self.connection {
            if conn.path == path {
                return Ok(());
            }
            self.disconnect();
        }

        ensure_pipe(path)?;
        let endpoint = Arc::new(Mutex::new(FifoEndpoint::open(path)?));
        let watcher = Self::watch(path, Arc::clone(&endpoint), self.bus.clone())?;

        tracing::debug!(path = %path.display(), "Fifo connected");
        self.connection = Some(Connection {
            path: path.to_path_buf(),
            endpoint,
            _watcher: watcher,
        });
        Ok(())
    }

    fn watch(
        path: &Path,
        endpoint: Arc<Mutex<FifoEndpoint>>,
        bus: EventBus,
    ) -> Result<RecommendedWatcher, FifoError> {
        let watched = path.to_path_buf();
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| match result {
                Ok(event) if is_data_change(&event.kind) => {
                    let messages = lock(&endpoint).on_change();
                    for message in messages {
                        bus.emit(SupervisorEvent::FifoMessage { message });
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %watched.display(), error = %e, "Fifo watch error");
                }
            })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }

    /// Stop watching and close the pipe. No-op when not connected.
    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            tracing::debug!(path = %conn.path.display(), "Fifo disconnected");
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.connection.as_ref().map(|conn| conn.path.as_path())
    }

    /// Append `text` and a newline to the pipe.
    ///
    /// # Errors
    ///
    /// Returns `FifoError::NotConnected` without a connection,
    /// `FifoError::Missing` if the path was removed, or an I/O error if the
    /// write fails (for example a full pipe).
    pub fn write(&self, text: &str) -> Result<(), FifoError> {
        let conn = self.connection.as_ref().ok_or(FifoError::NotConnected)?;
        if !conn.path.exists() {
            return Err(FifoError::Missing(conn.path.clone()));
        }
        lock(&conn.endpoint).write_line(text)
    }
}
