//! Platform-specific pipe/socket channel.
//!
//! - Unix: Unix Domain Socket
//! - Windows: Named Pipe
//!
//! One pipe per volume. The provisioner binds it, announces it to the
//! provider as a JSON line, and waits for the provider to connect. Batches
//! then travel length-prefixed (see [`BatchStream`]).
//!
//! # Example
//!
//! ```ignore
//! use fsvirt::transport::PipeProvisioner;
//! use fsvirt::VolumeManager;
//!
//! let manager = VolumeManager::builder()
//!     .provisioner(PipeProvisioner::new())
//!     .build()?;
//! // Prints {"volume":"V1","pipe":"/tmp/fsvirt-…","version":…} on stdout
//! // and returns once a provider has connected.
//! let volume = manager.create("V1", Vec::new()).await?;
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;

use super::channel::{Channel, ChannelProvisioner, Exchange};
use super::stream::BatchStream;
use crate::config::ChannelConfig;
use crate::control::{write_stdout_line, Announcement};
use crate::dispatch::BoxFuture;
use crate::error::{FsvirtError, Result};

/// Longest identity fragment embedded in a pipe path.
const PATH_IDENTITY_LEN: usize = 32;

/// Generate a unique pipe path for a volume.
///
/// Format:
/// - Unix: `/tmp/fsvirt-{pid}-{identity}-{random}.sock`
/// - Windows: `\\.\pipe\fsvirt-{pid}-{identity}-{random}`
///
/// Characters other than ASCII alphanumerics, `-` and `_` in the identity
/// are replaced, and the fragment is truncated to keep socket paths short.
pub fn generate_pipe_path(identity: &str) -> String {
    let pid = std::process::id();
    let rand: u64 = rand_u64();
    let name: String = identity
        .chars()
        .take(PATH_IDENTITY_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    #[cfg(unix)]
    {
        format!("/tmp/fsvirt-{}-{}-{:x}.sock", pid, name, rand)
    }

    #[cfg(windows)]
    {
        format!(r"\\.\pipe\fsvirt-{}-{}-{:x}", pid, name, rand)
    }
}

/// Simple random u64 using system time, process ID and a counter.
fn rand_u64() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);

    let pid = std::process::id() as u64;
    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid ^ seq.rotate_left(32)
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::path::Path;
    use tokio::net::{UnixListener, UnixStream};

    /// Unix Domain Socket listener.
    pub struct PipeListener {
        listener: UnixListener,
        path: String,
    }

    /// Unix Domain Socket stream (connected).
    pub struct PipeStream {
        stream: UnixStream,
    }

    impl PipeListener {
        /// Bind to a Unix socket path.
        ///
        /// Removes any existing socket file at the path before binding.
        pub async fn bind(path: &str) -> Result<Self> {
            if Path::new(path).exists() {
                std::fs::remove_file(path)?;
            }

            let listener = UnixListener::bind(path)?;

            Ok(Self {
                listener,
                path: path.to_string(),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&self) -> Result<PipeStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(PipeStream { stream })
        }

        /// Get the socket path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            // Clean up socket file when listener is dropped
            let _ = std::fs::remove_file(&self.path);
        }
    }

    impl PipeStream {
        /// Connect to a listening pipe (provider side).
        pub async fn connect(path: &str) -> Result<Self> {
            Ok(Self {
                stream: UnixStream::connect(path).await?,
            })
        }
    }

    impl AsyncRead for PipeStream {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for PipeStream {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.stream).poll_write(cx, buf)
        }

        fn poll_write_vectored(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            bufs: &[std::io::IoSlice<'_>],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::pin::Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
        }

        fn is_write_vectored(&self) -> bool {
            self.stream.is_write_vectored()
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_flush(cx)
        }

        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::pin::Pin::new(&mut self.stream).poll_shutdown(cx)
        }
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    /// Windows Named Pipe listener.
    pub struct PipeListener {
        server: parking_lot::Mutex<Option<NamedPipeServer>>,
        path: String,
    }

    enum Inner {
        Server(NamedPipeServer),
        Client(NamedPipeClient),
    }

    /// Windows Named Pipe stream (connected).
    pub struct PipeStream {
        pipe: Inner,
    }

    impl PipeListener {
        /// Create the first instance of a Named Pipe.
        pub async fn bind(path: &str) -> Result<Self> {
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .create(path)?;

            Ok(Self {
                server: parking_lot::Mutex::new(Some(server)),
                path: path.to_string(),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&self) -> Result<PipeStream> {
            let existing = self.server.lock().take();
            let server = match existing {
                Some(server) => server,
                None => ServerOptions::new()
                    .first_pipe_instance(false)
                    .create(&self.path)?,
            };

            server.connect().await?;

            Ok(PipeStream {
                pipe: Inner::Server(server),
            })
        }

        /// Get the pipe path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl PipeStream {
        /// Connect to a listening pipe (provider side).
        pub async fn connect(path: &str) -> Result<Self> {
            let client = ClientOptions::new().open(path)?;
            Ok(Self {
                pipe: Inner::Client(client),
            })
        }
    }

    impl AsyncRead for PipeStream {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match &mut self.pipe {
                Inner::Server(p) => std::pin::Pin::new(p).poll_read(cx, buf),
                Inner::Client(p) => std::pin::Pin::new(p).poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for PipeStream {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            match &mut self.pipe {
                Inner::Server(p) => std::pin::Pin::new(p).poll_write(cx, buf),
                Inner::Client(p) => std::pin::Pin::new(p).poll_write(cx, buf),
            }
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match &mut self.pipe {
                Inner::Server(p) => std::pin::Pin::new(p).poll_flush(cx),
                Inner::Client(p) => std::pin::Pin::new(p).poll_flush(cx),
            }
        }

        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match &mut self.pipe {
                Inner::Server(p) => std::pin::Pin::new(p).poll_shutdown(cx),
                Inner::Client(p) => std::pin::Pin::new(p).poll_shutdown(cx),
            }
        }
    }
}

// ============================================================================
// Platform-independent re-exports
// ============================================================================

#[cfg(unix)]
pub use unix_impl::{PipeListener, PipeStream};

#[cfg(windows)]
pub use windows_impl::{PipeListener, PipeStream};

/// Host side of a pipe channel.
pub struct PipeChannel<S> {
    stream: BatchStream<S>,
}

impl<S> PipeChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a connected stream. Response batches above
    /// `max_response_bytes` are a protocol error.
    pub fn new(stream: S, max_response_bytes: usize) -> Self {
        Self {
            stream: BatchStream::new(stream, max_response_bytes),
        }
    }
}

impl<S> Channel for PipeChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn exchange<'a>(
        &'a mut self,
        outbound: Bytes,
        inbound_capacity: usize,
        wake: &'a Notify,
    ) -> BoxFuture<'a, Result<Exchange>> {
        Box::pin(async move {
            let consumed = outbound.len();
            if !outbound.is_empty() {
                self.stream.write_batch(&outbound).await?;
            }

            tokio::select! {
                biased;
                batch = self.stream.read_batch() => match batch? {
                    Some(batch) if batch.len() > inbound_capacity => {
                        Err(FsvirtError::Protocol(format!(
                            "Response batch of {} bytes exceeds capacity {}",
                            batch.len(),
                            inbound_capacity
                        )))
                    }
                    Some(batch) => Ok(Exchange { inbound: batch, consumed }),
                    None => Err(FsvirtError::ChannelClosed),
                },
                _ = wake.notified() => Ok(Exchange::idle(consumed)),
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.stream.shutdown().await })
    }
}

/// Receives each announcement line.
pub type Announcer = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Provisions one pipe per volume and waits for its provider to connect.
pub struct PipeProvisioner {
    announcer: Announcer,
}

impl PipeProvisioner {
    /// Announce pipes on stdout.
    pub fn new() -> Self {
        Self::with_announcer(write_stdout_line)
    }

    /// Announce pipes through `announcer` instead of stdout.
    pub fn with_announcer<F>(announcer: F) -> Self
    where
        F: Fn(&str) -> std::io::Result<()> + Send + Sync + 'static,
    {
        Self {
            announcer: Arc::new(announcer),
        }
    }
}

impl Default for PipeProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelProvisioner for PipeProvisioner {
    fn provision<'a>(
        &'a self,
        identity: &'a str,
        config: &'a ChannelConfig,
    ) -> BoxFuture<'a, Result<Box<dyn Channel>>> {
        Box::pin(async move {
            let path = generate_pipe_path(identity);
            let listener = PipeListener::bind(&path).await?;

            let line = Announcement::new(identity, listener.path(), config).to_line()?;
            (self.announcer)(&line)?;
            tracing::info!(volume = identity, pipe = %path, "waiting for provider");

            let accepted = tokio::time::timeout(config.accept_timeout, listener.accept()).await;
            let stream = match accepted {
                Ok(stream) => stream?,
                Err(_elapsed) => {
                    tracing::warn!(
                        volume = identity,
                        timeout_ms = config.accept_timeout.as_millis() as u64,
                        "provider did not connect"
                    );
                    return Err(FsvirtError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "provider did not connect",
                    )));
                }
            };
            tracing::debug!(volume = identity, "provider connected");
            Ok(Box::new(PipeChannel::new(stream, config.max_response_bytes)) as Box<dyn Channel>)
        })
    }
}
