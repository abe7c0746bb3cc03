//! # UDP Client
//!
//! Connection state machine for a game client talking to one server.
//!
//! ```text
//! Disconnected --connect--> Connecting --ConnectionAccepted--> Connected
//!                               |                                  |
//!                  timeout / denied / error        Disconnect / keep-alive / disconnect()
//!                               v                                  v
//!                        ConnectionFailed --retry--> Connecting   Disconnected
//! ```
//!
//! Two background tasks run per connection attempt:
//! - **retry task**: fixed-period tick that times out `Connecting` and
//!   re-issues `connect` from `ConnectionFailed` when retry is enabled
//! - **poll task**: drains the socket with `try_recv_from`, sleeping
//!   `poll_interval` between empty polls, and dispatches each datagram
//!
//! Both are cancelled and joined by [`UdpClient::disconnect`] before it
//! returns. Tasks hold a weak reference to the client, so dropping the last
//! handle also stops them.
//!
//! ## Channels
//! Plain datagrams are `[tag][payload][CRC32C]` and must verify before they
//! are decoded. Once a secure session is established, `Reliable` and
//! `Unreliable` traffic travels as `[header][sealed payload]` with no CRC.
//!
//! ## Cookie exchange
//! A server may answer the first `Connect` with a `Cookie` instead of
//! `ConnectionAccepted`. The client then repeats `Connect` with its public key
//! and the cookie, once per attempt, while the connect timeout keeps running.
//! Like `Connect`, the cookie may arrive without a signature.

use crate::config::NetworkConfig;
use crate::config::MAX_DATAGRAM_SIZE;
use crate::core::header::{Channel, HeaderFlags, PacketHeader, HEADER_SIZE};
use crate::core::packet::{ConnectionAccepted, Packet, PacketType, COOKIE_SIZE, PUBLIC_KEY_SIZE};
use crate::core::wire_buffer::{WireBuffer, SIGNATURE_SIZE};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::integrity::IntegrityTable;
use crate::protocol::session::{ClientKeyPair, SecureSession, TAG_SIZE};
use crate::transport::events::TransportEvents;
use crate::utils::buffer_pool::BufferPool;
use crate::utils::metrics::global_metrics;
use std::future::Future;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Shortest period handed to the background timers.
const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

/// Externally visible connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    ConnectionFailed,
}

/// Mutable connection bookkeeping, guarded by one lock.
struct LinkState {
    status: ConnectionStatus,
    /// Bumped by every connect attempt and teardown; stale attempts compare
    /// against it before publishing their socket.
    generation: u64,
    last_host: Option<String>,
    last_port: u16,
    remote: Option<SocketAddr>,
    retry_count: u32,
    client_id: Option<u32>,
    /// Start of the current `Connecting` or `ConnectionFailed` phase.
    phase_started: Instant,
    last_activity: Instant,
    keypair: Option<ClientKeyPair>,
    /// Set once the current attempt has echoed a server cookie.
    cookie_answered: bool,
    connect_timeout: Duration,
    retry_interval: Duration,
    retry_enabled: bool,
}

impl LinkState {
    fn enter(&mut self, status: ConnectionStatus) {
        self.status = status;
        self.phase_started = Instant::now();
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    async fn stop(self, name: &'static str) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!(task = name, "background task panicked");
            }
        }
    }
}

#[derive(Default)]
struct Workers {
    retry: Option<Worker>,
    poll: Option<Worker>,
}

enum RetryAction {
    Wait,
    Reconnect,
    Stop,
}

struct Inner {
    config: NetworkConfig,
    link: Mutex<LinkState>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    session: Mutex<Option<SecureSession>>,
    events: Arc<dyn TransportEvents>,
    integrity: IntegrityTable,
    pool: BufferPool,
    workers: tokio::sync::Mutex<Workers>,
}

/// Cheaply cloneable handle to one client connection.
#[derive(Clone)]
pub struct UdpClient {
    inner: Arc<Inner>,
}

fn bind_socket(remote: SocketAddr, recv_buffer_size: usize) -> Result<UdpSocket> {
    let local: SocketAddr = if remote.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = std::net::UdpSocket::bind(local)?;
    if let Err(e) = set_recv_buffer(&socket, recv_buffer_size) {
        warn!(error = %e, requested = recv_buffer_size, "could not enlarge receive buffer");
    }
    socket.set_nonblocking(true)?;

    Ok(UdpSocket::from_std(socket)?)
}

#[cfg(unix)]
fn set_recv_buffer(socket: &std::net::UdpSocket, size: usize) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let value = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
    // SAFETY: the fd is owned by `socket` for the duration of the call and
    // `value` outlives it.
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_recv_buffer(_socket: &std::net::UdpSocket, _size: usize) -> std::io::Result<()> {
    Ok(())
}

impl UdpClient {
    /// Create a disconnected client with a freshly generated integrity table.
    pub fn new(config: NetworkConfig, events: impl TransportEvents) -> Self {
        Self::with_integrity_table(config, events, IntegrityTable::generate())
    }

    /// Create a disconnected client answering integrity challenges from `table`.
    pub fn with_integrity_table(
        config: NetworkConfig,
        events: impl TransportEvents,
        table: IntegrityTable,
    ) -> Self {
        for problem in config.validate() {
            warn!(%problem, "questionable network configuration");
        }

        let pool = BufferPool::new(config.performance.buffer_capacity);
        pool.preallocate(config.performance.pool_prealloc);

        let now = Instant::now();
        let link = LinkState {
            status: ConnectionStatus::Disconnected,
            generation: 0,
            last_host: None,
            last_port: 0,
            remote: None,
            retry_count: 0,
            client_id: None,
            phase_started: now,
            last_activity: now,
            keypair: None,
            cookie_answered: false,
            connect_timeout: config.client.connect_timeout,
            retry_interval: config.client.retry_interval,
            retry_enabled: config.client.retry_enabled,
        };

        Self {
            inner: Arc::new(Inner {
                config,
                link: Mutex::new(link),
                socket: RwLock::new(None),
                session: Mutex::new(None),
                events: Arc::new(events),
                integrity: table,
                pool,
                workers: tokio::sync::Mutex::new(Workers::default()),
            }),
        }
    }

    /// Start connecting to `host:port`.
    ///
    /// Returns once the `Connect` packet is on the wire; the outcome arrives
    /// through [`TransportEvents`].
    ///
    /// # Errors
    /// - `ProtocolError::InvalidState` while already connecting or connected
    /// - `ProtocolError::AddressResolution` if `host` does not resolve
    /// - `ProtocolError::Io` if the socket cannot be opened or written
    ///
    /// Resolution and socket failures also raise `on_connection_error` and
    /// leave the client in `ConnectionFailed`, where retry picks it up.
    #[instrument(skip(self))]
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.inner.start(host, port, false).await
    }

    /// [`connect`](Self::connect) to the server named in the client config.
    pub async fn connect_configured(&self) -> Result<()> {
        let client = &self.inner.config.client;
        self.connect(&client.server_address, client.server_port).await
    }

    /// Send an application buffer (`[tag][app id][fields..]`).
    ///
    /// Does nothing when not connected or when `buffer` is empty. The buffer
    /// itself is not modified; the signature or sealing happens on a copy.
    ///
    /// # Errors
    /// `ProtocolError::MalformedPacket` if the datagram would exceed the
    /// configured packet size, `ProtocolError::Io` if the socket write fails.
    #[instrument(skip(self, buffer), fields(len = buffer.len()))]
    pub async fn send(&self, buffer: &WireBuffer) -> Result<()> {
        if buffer.is_empty() {
            trace!("empty buffer not sent");
            return Ok(());
        }
        let Some((socket, remote)) = self.inner.connected_route() else {
            trace!("send while not connected dropped");
            return Ok(());
        };

        let bytes = buffer.as_slice();
        if let Some(datagram) = self.inner.seal_outbound(bytes)? {
            return self.inner.transmit(&socket, remote, &datagram).await;
        }

        let signed = self.inner.sign(bytes)?;
        let result = self.inner.transmit(&socket, remote, signed.as_slice()).await;
        self.inner.recycle(signed);
        result
    }

    /// Send an `Ack` for `sequence`. Nothing waits on it.
    pub async fn send_ack(&self, sequence: u16) -> Result<()> {
        let Some((socket, remote)) = self.inner.route() else {
            return Err(ProtocolError::InvalidState(constants::ERR_NO_SOCKET));
        };
        let mut buf = self.inner.pool.acquire();
        Packet::Ack { sequence }.encode(&mut buf);
        buf.write_sign();
        let result = self.inner.transmit(&socket, remote, buf.as_slice()).await;
        self.inner.recycle(buf);
        result
    }

    /// Close the socket, stop both tasks and wait for them to finish.
    ///
    /// Safe to call in any state and more than once.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        {
            let mut link = self.inner.link();
            link.generation += 1;
        }
        self.inner.stop_workers().await;
        self.inner.drop_link();

        let mut link = self.inner.link();
        link.retry_count = 0;
        link.keypair = None;
        info!("disconnected");
    }

    /// Re-derive the session keys in step with the server.
    ///
    /// # Errors
    /// `ProtocolError::InvalidState` without an established secure session.
    pub fn rekey(&self) -> Result<()> {
        let mut guard = self.inner.session();
        let session = guard
            .as_mut()
            .ok_or(ProtocolError::InvalidState(constants::ERR_SESSION_MISSING))?;
        session.perform_rekey()
    }

    /// Whether the secure session has crossed its byte or age threshold.
    pub fn needs_rekey(&self) -> bool {
        self.inner
            .session()
            .as_ref()
            .is_some_and(SecureSession::should_rekey)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.link().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Whether outbound data uses the secure channel.
    pub fn is_secure(&self) -> bool {
        self.inner.session().is_some()
    }

    /// Retries issued since the last explicit `connect`.
    pub fn retry_count(&self) -> u32 {
        self.inner.link().retry_count
    }

    /// Id from the last `ConnectionAccepted`, if it carried one.
    pub fn client_id(&self) -> Option<u32> {
        self.inner.link().client_id
    }

    pub fn connect_timeout(&self) -> Duration {
        self.inner.link().connect_timeout
    }

    pub fn set_connect_timeout(&self, timeout: Duration) {
        self.inner.link().connect_timeout = timeout;
    }

    pub fn retry_interval(&self) -> Duration {
        self.inner.link().retry_interval
    }

    pub fn set_retry_interval(&self, interval: Duration) {
        self.inner.link().retry_interval = interval;
    }

    pub fn retry_enabled(&self) -> bool {
        self.inner.link().retry_enabled
    }

    pub fn set_retry_enabled(&self, enabled: bool) {
        self.inner.link().retry_enabled = enabled;
    }

    /// Local address of the open socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.socket().and_then(|s| s.local_addr().ok())
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.inner.pool
    }
}

impl std::fmt::Debug for UdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpClient")
            .field("status", &self.status())
            .field("retry_count", &self.retry_count())
            .field("secure", &self.is_secure())
            .finish()
    }
}

impl Inner {
    fn link(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> MutexGuard<'_, Option<SecureSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.socket
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_socket(&self, socket: Option<Arc<UdpSocket>>) {
        *self.socket.write().unwrap_or_else(PoisonError::into_inner) = socket;
    }

    /// Return a buffer released after an `.await`. The task may have moved
    /// threads, so the buffer is published to the global list right away.
    fn recycle(&self, buffer: WireBuffer) {
        self.pool.release(buffer);
        self.pool.merge();
    }

    fn route(&self) -> Option<(Arc<UdpSocket>, SocketAddr)> {
        let remote = self.link().remote?;
        Some((self.socket()?, remote))
    }

    fn connected_route(&self) -> Option<(Arc<UdpSocket>, SocketAddr)> {
        if self.link().status != ConnectionStatus::Connected {
            return None;
        }
        self.route()
    }

    /// Shared body of `connect` and automatic retries.
    ///
    /// A retry only proceeds from `ConnectionFailed`, so a retry racing an
    /// explicit `disconnect` gives up instead of reconnecting.
    async fn start(self: &Arc<Self>, host: &str, port: u16, is_retry: bool) -> Result<()> {
        let generation = {
            let mut link = self.link();
            let allowed = if is_retry {
                link.status == ConnectionStatus::ConnectionFailed
            } else {
                !matches!(
                    link.status,
                    ConnectionStatus::Connecting | ConnectionStatus::Connected
                )
            };
            if !allowed {
                debug!(status = ?link.status, "connect rejected");
                return Err(ProtocolError::InvalidState(constants::ERR_ALREADY_CONNECTING));
            }

            link.enter(ConnectionStatus::Connecting);
            link.generation += 1;
            link.last_host = Some(host.to_owned());
            link.last_port = port;
            if !is_retry {
                link.retry_count = 0;
            }
            link.client_id = None;
            link.remote = None;
            link.keypair = None;
            link.cookie_answered = false;
            link.last_activity = Instant::now();
            link.generation
        };

        self.stop_workers().await;
        self.set_socket(None);
        *self.session() = None;
        global_metrics().connect_attempt();
        self.spawn_retry().await;

        match self.open(host, port, generation).await {
            Ok(Some(socket)) => {
                self.spawn_poll(socket).await;
                info!(host, port, "connect sent");
                Ok(())
            }
            Ok(None) => {
                debug!("connect attempt superseded");
                Ok(())
            }
            Err(e) => {
                warn!(host, port, error = %e, "connect failed");
                self.fail_attempt(generation);
                Err(e)
            }
        }
    }

    /// Resolve, bind and send `Connect`. Returns `None` if a newer attempt
    /// or a teardown happened meanwhile.
    async fn open(&self, host: &str, port: u16, generation: u64) -> Result<Option<Arc<UdpSocket>>> {
        let remote = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ProtocolError::AddressResolution(format!("{host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| {
                ProtocolError::AddressResolution(format!(
                    "{host}:{port}: {}",
                    constants::ERR_NO_ADDRESS
                ))
            })?;

        let socket = Arc::new(bind_socket(remote, self.config.client.recv_buffer_size)?);
        let keypair = self
            .config
            .security
            .encryption_enabled
            .then(ClientKeyPair::generate);

        let mut hello = WireBuffer::with_capacity(1 + PUBLIC_KEY_SIZE);
        Packet::Connect {
            client_public: keypair.as_ref().map(|k| *k.public()),
            cookie: None,
        }
        .encode(&mut hello);
        socket.send_to(hello.as_slice(), remote).await?;
        global_metrics().datagram_sent(hello.len() as u64);
        debug!(%remote, secure = keypair.is_some(), "Connect sent");

        {
            let mut link = self.link();
            if link.generation != generation || link.status != ConnectionStatus::Connecting {
                return Ok(None);
            }
            link.remote = Some(remote);
            link.keypair = keypair;
        }
        self.set_socket(Some(socket.clone()));
        Ok(Some(socket))
    }

    fn fail_attempt(&self, generation: u64) {
        {
            let mut link = self.link();
            if link.generation != generation {
                return;
            }
            link.enter(ConnectionStatus::ConnectionFailed);
        }
        global_metrics().connection_error();
        self.events.on_connection_error();
    }

    /// Forget the socket and session and move to `Disconnected`.
    fn drop_link(&self) {
        {
            let mut link = self.link();
            link.enter(ConnectionStatus::Disconnected);
            link.generation += 1;
            link.client_id = None;
            link.remote = None;
        }
        self.set_socket(None);
        *self.session() = None;
    }

    async fn stop_workers(&self) {
        let (retry, poll) = {
            let mut workers = self.workers.lock().await;
            (workers.retry.take(), workers.poll.take())
        };
        if let Some(worker) = retry {
            worker.stop("retry").await;
        }
        if let Some(worker) = poll {
            worker.stop("poll").await;
        }
    }

    async fn spawn_retry(self: &Arc<Self>) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(retry_loop(
            Arc::downgrade(self),
            cancel.clone(),
            self.config.client.retry_tick,
        ));
        let previous = self
            .workers
            .lock()
            .await
            .retry
            .replace(Worker { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    async fn spawn_poll(self: &Arc<Self>, socket: Arc<UdpSocket>) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::downgrade(self),
            socket,
            cancel.clone(),
            self.config.client.poll_interval,
        ));
        let previous = self
            .workers
            .lock()
            .await
            .poll
            .replace(Worker { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    fn retry_tick(&self) -> RetryAction {
        let mut link = self.link();
        let status = link.status;
        match status {
            ConnectionStatus::Connecting => {
                if link.phase_started.elapsed() < link.connect_timeout {
                    return RetryAction::Wait;
                }
                link.enter(ConnectionStatus::ConnectionFailed);
                let retry_enabled = link.retry_enabled;
                drop(link);

                warn!(retry_enabled, "connect timed out");
                global_metrics().connection_error();
                self.events.on_connection_error();
                RetryAction::Wait
            }
            ConnectionStatus::ConnectionFailed => {
                if !link.retry_enabled
                    || link.last_host.is_none()
                    || link.phase_started.elapsed() < link.retry_interval
                {
                    return RetryAction::Wait;
                }
                link.retry_count += 1;
                link.phase_started = Instant::now();
                info!(attempt = link.retry_count, "retrying connection");
                RetryAction::Reconnect
            }
            ConnectionStatus::Connected | ConnectionStatus::Disconnected => RetryAction::Stop,
        }
    }

    /// Boxed so the task spawning it does not embed `start` in its own type.
    fn reconnect(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let target = {
                let link = self.link();
                link.last_host.clone().map(|host| (host, link.last_port))
            };
            let Some((host, port)) = target else {
                return;
            };
            if let Err(e) = self.start(&host, port, true).await {
                debug!(error = %e, "retry attempt did not start");
            }
        })
    }

    /// Drain every pending datagram. `Break` ends the poll task.
    fn poll_once(
        &self,
        socket: &UdpSocket,
        scratch: &mut [u8],
        cancel: &CancellationToken,
    ) -> ControlFlow<()> {
        let remote = {
            let link = self.link();
            let status = link.status;
            match status {
                ConnectionStatus::Connected
                    if link.last_activity.elapsed() > self.config.client.keepalive_timeout =>
                {
                    drop(link);
                    info!("keep-alive expired");
                    self.drop_link();
                    self.events.on_disconnect();
                    return ControlFlow::Break(());
                }
                ConnectionStatus::Connected | ConnectionStatus::Connecting => link.remote,
                ConnectionStatus::ConnectionFailed => return ControlFlow::Continue(()),
                ConnectionStatus::Disconnected => return ControlFlow::Break(()),
            }
        };
        let Some(remote) = remote else {
            return ControlFlow::Continue(());
        };

        let flow = loop {
            if cancel.is_cancelled() {
                break ControlFlow::Break(());
            }
            match socket.try_recv_from(scratch) {
                Ok((len, from)) => {
                    if from != remote {
                        trace!(%from, "datagram from unknown peer dropped");
                        continue;
                    }
                    global_metrics().datagram_received(len as u64);
                    if len == 0 {
                        continue;
                    }
                    if self.handle_datagram(socket, remote, &scratch[..len]).is_break() {
                        break ControlFlow::Break(());
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break ControlFlow::Continue(()),
                Err(e) => {
                    debug!(error = %e, "receive failed");
                    break ControlFlow::Continue(());
                }
            }
        };
        self.pool.merge();
        flow
    }

    fn handle_datagram(&self, socket: &UdpSocket, remote: SocketAddr, bytes: &[u8]) -> ControlFlow<()> {
        if self.try_open_secure(bytes) {
            return ControlFlow::Continue(());
        }
        if bytes.len() == 1 + COOKIE_SIZE && bytes[0] == PacketType::Cookie as u8 {
            let mut cookie = [0u8; COOKIE_SIZE];
            cookie.copy_from_slice(&bytes[1..]);
            self.answer_cookie(socket, remote, cookie);
            return ControlFlow::Continue(());
        }

        let mut buf = if bytes.len() <= self.pool.buffer_capacity() {
            let mut pooled = self.pool.acquire();
            pooled.load(bytes);
            pooled
        } else {
            WireBuffer::from_slice(bytes)
        };
        let flow = self.handle_plain(socket, remote, &mut buf);
        self.pool.release(buf);
        flow
    }

    /// Open a secure datagram for the current session. Returns false when
    /// the datagram does not belong to the secure channel.
    fn try_open_secure(&self, bytes: &[u8]) -> bool {
        if bytes.len() < HEADER_SIZE + TAG_SIZE {
            return false;
        }
        let mut guard = self.session();
        let Some(session) = guard.as_mut() else {
            return false;
        };
        let Ok(header) = PacketHeader::from_bytes(&bytes[..HEADER_SIZE]) else {
            return false;
        };
        if header.connection_id != session.connection_id() || !header.is_encrypted() {
            return false;
        }

        let opened = session.decrypt_payload_compressed(
            &bytes[HEADER_SIZE..],
            &header.aad(),
            header.sequence,
            header.is_compressed(),
        );
        drop(guard);

        match opened {
            Ok(plaintext) => {
                self.link().last_activity = Instant::now();
                let tag = match header.channel {
                    Channel::Unreliable => PacketType::Unreliable,
                    Channel::ReliableOrdered | Channel::ReliableUnordered => PacketType::Reliable,
                };
                let mut buf = WireBuffer::with_capacity(1 + plaintext.len());
                buf.write::<u8>(tag as u8);
                buf.write_bytes(&plaintext);
                buf.set_position(1);
                self.events.on_data_received(&buf);
            }
            Err(e) => debug!(error = %e, sequence = header.sequence, "secure datagram dropped"),
        }
        true
    }

    fn handle_plain(&self, socket: &UdpSocket, remote: SocketAddr, buf: &mut WireBuffer) -> ControlFlow<()> {
        if let Err(e) = buf.verify_sign() {
            global_metrics().checksum_failure();
            warn!(security = true, error = %e, len = buf.len(), "datagram failed checksum");
            return ControlFlow::Continue(());
        }

        let packet = match Packet::decode(buf) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(error = %e, "undecodable datagram dropped");
                return ControlFlow::Continue(());
            }
        };
        self.link().last_activity = Instant::now();

        match packet {
            Packet::Ping { timestamp } => {
                self.reply(socket, remote, &Packet::Pong { timestamp });
            }
            Packet::Reliable | Packet::Unreliable => self.events.on_data_received(buf),
            Packet::ConnectionAccepted(accepted) => self.accept(accepted),
            Packet::ConnectionDenied => {
                {
                    let mut link = self.link();
                    if link.status != ConnectionStatus::Connecting {
                        debug!(status = ?link.status, "unexpected ConnectionDenied ignored");
                        return ControlFlow::Continue(());
                    }
                    link.enter(ConnectionStatus::ConnectionFailed);
                }
                warn!("connection denied by server");
                self.events.on_connect_denied();
                return ControlFlow::Break(());
            }
            Packet::Disconnect => {
                info!("server closed the connection");
                self.drop_link();
                self.events.on_disconnect();
                return ControlFlow::Break(());
            }
            Packet::CheckIntegrity { index } => {
                if self.config.security.integrity_check_enabled {
                    let key = self.integrity.key(index);
                    trace!(index, "answering integrity challenge");
                    self.reply(socket, remote, &Packet::CheckIntegrity { index: key });
                } else {
                    debug!(index, "integrity challenge ignored");
                }
            }
            Packet::Cookie { cookie } => self.answer_cookie(socket, remote, cookie),
            Packet::Pong { .. } | Packet::Ack { .. } | Packet::Connect { .. } | Packet::Error => {
                trace!(packet = ?packet.packet_type(), "packet ignored");
            }
        }
        ControlFlow::Continue(())
    }

    /// Handle `ConnectionAccepted`. Only the first one while `Connecting`
    /// counts; duplicates are ignored.
    fn accept(&self, accepted: ConnectionAccepted) {
        let (generation, keypair) = {
            let mut link = self.link();
            if link.status != ConnectionStatus::Connecting {
                trace!(status = ?link.status, "duplicate ConnectionAccepted ignored");
                return;
            }
            (link.generation, link.keypair.take())
        };

        match (keypair, accepted.keys, accepted.client_id) {
            (Some(keypair), Some(keys), Some(connection_id)) => {
                let session = SecureSession::initialize_as_client(
                    &keypair.private_bytes(),
                    &keys.server_public,
                    &keys.salt,
                    connection_id,
                );
                match session {
                    Ok(session) => {
                        let security = &self.config.security;
                        *self.session() = Some(
                            session
                                .with_rekey_policy(
                                    security.rekey_bytes_threshold,
                                    security.rekey_interval,
                                )
                                .with_compression_threshold(security.compression_threshold),
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "secure session setup failed");
                        self.fail_attempt(generation);
                        return;
                    }
                }
            }
            (Some(_), _, _) => {
                warn!(security = true, "server skipped key exchange; refusing plaintext link");
                self.fail_attempt(generation);
                return;
            }
            (None, _, _) => {}
        }

        {
            let mut link = self.link();
            if link.generation != generation {
                drop(link);
                *self.session() = None;
                return;
            }
            link.enter(ConnectionStatus::Connected);
            link.client_id = accepted.client_id;
            link.last_activity = Instant::now();
        }
        global_metrics().connection_established();
        info!(client_id = ?accepted.client_id, secure = self.session().is_some(), "connected");
        self.events.on_connect(accepted.client_id);
    }

    /// Repeat `Connect` with the server's cookie attached.
    fn answer_cookie(&self, socket: &UdpSocket, remote: SocketAddr, cookie: [u8; COOKIE_SIZE]) {
        let client_public = {
            let mut link = self.link();
            if link.status != ConnectionStatus::Connecting || link.cookie_answered {
                trace!(status = ?link.status, "cookie ignored");
                return;
            }
            let Some(public) = link.keypair.as_ref().map(|k| *k.public()) else {
                debug!("cookie ignored without a key exchange");
                return;
            };
            link.cookie_answered = true;
            public
        };

        let mut hello = WireBuffer::with_capacity(1 + PUBLIC_KEY_SIZE + COOKIE_SIZE);
        Packet::Connect {
            client_public: Some(client_public),
            cookie: Some(cookie),
        }
        .encode(&mut hello);
        match socket.try_send_to(hello.as_slice(), remote) {
            Ok(sent) => {
                global_metrics().datagram_sent(sent as u64);
                debug!("Connect with cookie sent");
            }
            Err(e) => warn!(error = %e, "Connect with cookie not sent"),
        }
    }

    /// Sign and send a transport-originated reply from the poll task.
    fn reply(&self, socket: &UdpSocket, remote: SocketAddr, packet: &Packet) {
        let mut buf = self.pool.acquire();
        packet.encode(&mut buf);
        buf.write_sign();
        match socket.try_send_to(buf.as_slice(), remote) {
            Ok(sent) => global_metrics().datagram_sent(sent as u64),
            Err(e) => debug!(error = %e, packet = ?packet.packet_type(), "reply not sent"),
        }
        self.pool.release(buf);
    }

    /// Seal a data buffer for the secure channel. `None` means the plain
    /// path applies: no session, or a tag other than `Reliable`/`Unreliable`.
    fn seal_outbound(&self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let channel = match PacketType::try_from(bytes[0]) {
            Ok(PacketType::Reliable) => Channel::ReliableOrdered,
            Ok(PacketType::Unreliable) => Channel::Unreliable,
            _ => return Ok(None),
        };

        let mut guard = self.session();
        let Some(session) = guard.as_mut() else {
            return Ok(None);
        };

        let mut header = PacketHeader::new(
            session.connection_id(),
            channel,
            HeaderFlags::ENCRYPTED | HeaderFlags::AEAD_CHACHA20_POLY1305,
            session.seq_tx(),
        );
        let payload = &bytes[1..];
        let (sealed, compressed) = if self.config.security.compression_enabled {
            session.encrypt_payload_compressed(payload, &header.aad())?
        } else {
            (session.encrypt_payload(payload, &header.aad())?, false)
        };
        if session.should_rekey() {
            debug!(connection_id = session.connection_id(), "session due for rekey");
        }
        drop(guard);

        if compressed {
            header.flags |= HeaderFlags::COMPRESSED;
        }
        let mut datagram = Vec::with_capacity(HEADER_SIZE + sealed.len());
        datagram.extend_from_slice(&header.to_bytes());
        datagram.extend_from_slice(&sealed);
        self.check_size(datagram.len())?;
        Ok(Some(datagram))
    }

    /// Copy `bytes` into a pooled buffer and append the CRC32C.
    fn sign(&self, bytes: &[u8]) -> Result<WireBuffer> {
        self.check_size(bytes.len() + SIGNATURE_SIZE)?;
        let mut buf = self.pool.acquire();
        if bytes.len() + SIGNATURE_SIZE > buf.capacity() {
            self.pool.release(buf);
            return Err(ProtocolError::MalformedPacket(format!(
                "{} byte datagram exceeds buffer capacity",
                bytes.len() + SIGNATURE_SIZE
            )));
        }
        buf.write_bytes(bytes);
        buf.write_sign();
        Ok(buf)
    }

    fn check_size(&self, len: usize) -> Result<()> {
        let limit = self.config.performance.max_packet_size.min(MAX_DATAGRAM_SIZE);
        if len > limit {
            return Err(ProtocolError::MalformedPacket(format!(
                "{len} byte datagram exceeds the {limit} byte limit"
            )));
        }
        Ok(())
    }

    async fn transmit(&self, socket: &UdpSocket, remote: SocketAddr, bytes: &[u8]) -> Result<()> {
        match socket.send_to(bytes, remote).await {
            Ok(sent) => {
                global_metrics().datagram_sent(sent as u64);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, %remote, "send failed");
                global_metrics().connection_error();
                self.events.on_connection_error();
                Err(e.into())
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let workers = self.workers.get_mut();
        for worker in [workers.retry.as_ref(), workers.poll.as_ref()]
            .into_iter()
            .flatten()
        {
            worker.cancel.cancel();
        }
    }
}

async fn retry_loop(inner: Weak<Inner>, cancel: CancellationToken, tick: Duration) {
    let mut interval = tokio::time::interval(tick.max(MIN_TIMER_PERIOD));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match inner.retry_tick() {
            RetryAction::Wait => {}
            RetryAction::Stop => break,
            RetryAction::Reconnect => {
                // `start` joins this task, so it must run on its own.
                tokio::spawn(inner.reconnect());
                break;
            }
        }
    }
    trace!("retry task stopped");
}

async fn poll_loop(
    inner: Weak<Inner>,
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
    poll_interval: Duration,
) {
    let mut scratch = vec![0u8; MAX_DATAGRAM_SIZE];
    let poll_interval = poll_interval.max(MIN_TIMER_PERIOD);
    loop {
        let Some(strong) = inner.upgrade() else {
            break;
        };
        if strong.poll_once(&socket, &mut scratch, &cancel).is_break() {
            break;
        }
        drop(strong);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    trace!("poll task stopped");
}
