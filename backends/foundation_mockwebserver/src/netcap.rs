//! Accepted connection streams, plain or TLS, and the registry shutdown
//! uses to force every live connection closed.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::request::TlsSessionInfo;
use crate::synca::RunOnDrop;

pub enum ServerStream {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ServerConnection, TcpStream>>),
}

impl ServerStream {
    /// Wraps `tcp` in a server-side TLS session and drives the handshake to
    /// completion so session details are known before any request is read.
    pub fn accept_tls(
        config: Arc<rustls::ServerConfig>,
        mut tcp: TcpStream,
    ) -> io::Result<Self> {
        let mut connection = rustls::ServerConnection::new(config)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        while connection.is_handshaking() {
            connection.complete_io(&mut tcp)?;
        }

        Ok(Self::Tls(Box::new(rustls::StreamOwned::new(connection, tcp))))
    }

    #[must_use]
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(tcp) => tcp,
            Self::Tls(stream) => &stream.sock,
        }
    }

    #[must_use]
    pub fn tls_info(&self) -> Option<TlsSessionInfo> {
        let Self::Tls(stream) = self else {
            return None;
        };

        let connection = &stream.conn;
        Some(TlsSessionInfo {
            protocol_version: connection
                .protocol_version()
                .map(|version| format!("{version:?}"))
                .unwrap_or_default(),
            cipher_suite: connection
                .negotiated_cipher_suite()
                .map(|suite| format!("{:?}", suite.suite()))
                .unwrap_or_default(),
            server_name: connection.server_name().map(str::to_string),
            alpn_protocol: connection
                .alpn_protocol()
                .map(|proto| String::from_utf8_lossy(proto).into_owned()),
        })
    }

    /// Ends a TLS session cleanly with close_notify. Plain streams have
    /// nothing to send.
    pub fn finish(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(tcp) => tcp.flush(),
            Self::Tls(stream) => {
                stream.conn.send_close_notify();
                stream.flush()
            }
        }
    }

    /// Closes both directions of the underlying socket without any TLS
    /// close_notify, which is what a faulting peer looks like.
    pub fn close(&self) {
        if let Err(err) = self.tcp().shutdown(Shutdown::Both) {
            tracing::debug!("Socket shutdown failed: {err}");
        }
    }
}

impl Read for ServerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(tcp) => tcp.read(buf),
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for ServerStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(tcp) => tcp.write(buf),
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(tcp) => tcp.flush(),
            Self::Tls(stream) => stream.flush(),
        }
    }
}

/// Clones of every live connection's socket, keyed by connection id.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    sockets: Mutex<HashMap<u64, TcpStream>>,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, TcpStream>> {
        match self.sockets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `socket` until the returned guard is dropped.
    pub fn register(&self, socket: &TcpStream) -> io::Result<RunOnDrop<impl FnOnce()>> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().insert(id, socket.try_clone()?);

        let inner = Arc::clone(&self.inner);
        Ok(RunOnDrop::new(move || {
            inner.lock().remove(&id);
        }))
    }

    /// Number of connections currently tracked.
    #[must_use]
    pub fn live(&self) -> usize {
        self.inner.lock().len()
    }

    /// Shuts down every tracked socket, failing any blocked read or write
    /// on them.
    pub fn close_all(&self) {
        let sockets = self.inner.lock();
        for (id, socket) in sockets.iter() {
            if let Err(err) = socket.shutdown(Shutdown::Both) {
                tracing::debug!("Closing connection {id} failed: {err}");
            }
        }
    }
}
