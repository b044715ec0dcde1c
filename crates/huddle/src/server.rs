//! `HuddleServer` builder and accept loop.
//!
//! This is the entry point for running a Huddle server. It ties together
//! all the layers: transport → protocol → coordinator (sessions, rooms,
//! cache) and starts the background sweeper.

use std::sync::Arc;
use std::time::Duration;

use huddle_cache::{CacheBackend, SecureCache};
use huddle_room::RoomConfig;
use huddle_session::{Authenticator, RateLimitConfig, SessionConfig};
use huddle_transport::{Transport, WebSocketTransport};
use tokio::sync::watch;

use crate::coordinator::{ConnectionCoordinator, CoordinatorConfig};
use crate::handler::handle_connection;
use crate::hooks::RoomHooks;
use crate::sweeper::{SweepConfig, spawn_sweeper};
use crate::HuddleError;

/// Builder for configuring and starting a Huddle server.
///
/// # Example
///
/// ```rust,no_run
/// # async fn run() -> Result<(), huddle::HuddleError> {
/// use std::sync::Arc;
/// use huddle::prelude::*;
///
/// struct DevAuth;
/// impl Authenticator for DevAuth {
///     async fn verify(&self, token: &str, _: TokenKind) -> Option<Claims> {
///         Some(Claims::new(token))
///     }
/// }
///
/// let cache = Arc::new(SecureCache::in_memory(&EncryptionKey::generate())?);
/// let server = HuddleServer::<DevAuth, MemoryBackend>::builder()
///     .bind("0.0.0.0:8080")
///     .build(DevAuth, cache)
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct HuddleServerBuilder {
    bind_addr: String,
    config: CoordinatorConfig,
    sweep: SweepConfig,
    idle_timeout: Duration,
    hooks: Vec<Arc<dyn RoomHooks>>,
}

impl HuddleServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            config: CoordinatorConfig::default(),
            sweep: SweepConfig::default(),
            idle_timeout: Duration::from_secs(60),
            hooks: Vec::new(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.config.room = config;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    pub fn rate_limits(mut self, config: RateLimitConfig) -> Self {
        self.config.rate_limits = config;
        self
    }

    pub fn sweep_config(mut self, config: SweepConfig) -> Self {
        self.sweep = config;
        self
    }

    /// Closes a connection that sends nothing for this long. Clients keep
    /// themselves alive with `heartbeat`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Registers a lifecycle hook.
    pub fn hook(mut self, hook: impl RoomHooks) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Binds the listener and wires the coordinator over `cache`.
    pub async fn build<A, B>(
        self,
        auth: A,
        cache: Arc<SecureCache<B>>,
    ) -> Result<HuddleServer<A, B>, HuddleError>
    where
        A: Authenticator,
        B: CacheBackend,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let coordinator = self
            .hooks
            .into_iter()
            .fold(ConnectionCoordinator::new(auth, cache, self.config), |c, hook| {
                c.with_hook(hook)
            });
        let (shutdown, _) = watch::channel(false);

        Ok(HuddleServer {
            transport,
            coordinator: Arc::new(coordinator),
            sweep: self.sweep,
            idle_timeout: self.idle_timeout,
            shutdown: Arc::new(shutdown),
        })
    }
}

impl Default for HuddleServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Stops a running server from another task.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Stops the accept loop and the sweeper. Open connections are left
    /// to finish on their own.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// A bound Huddle server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct HuddleServer<A: Authenticator, B: CacheBackend> {
    transport: WebSocketTransport,
    coordinator: Arc<ConnectionCoordinator<A, B>>,
    sweep: SweepConfig,
    idle_timeout: Duration,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<A: Authenticator, B: CacheBackend> HuddleServer<A, B> {
    /// Creates a new builder.
    pub fn builder() -> HuddleServerBuilder {
        HuddleServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    pub fn coordinator(&self) -> &Arc<ConnectionCoordinator<A, B>> {
        &self.coordinator
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    /// Runs the accept loop and the sweeper until shut down.
    ///
    /// Each accepted connection gets its own handler task. Upgrades run
    /// off this loop under a deadline, so a peer that stalls its handshake
    /// delays nobody.
    pub async fn run(mut self) -> Result<(), HuddleError> {
        let mut shutdown = self.shutdown.subscribe();
        let sweeper = spawn_sweeper(
            Arc::clone(&self.coordinator),
            self.sweep.clone(),
            self.shutdown.subscribe(),
        );
        tracing::info!("Huddle server running");

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let coordinator = Arc::clone(&self.coordinator);
                        let idle_timeout = self.idle_timeout;
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, coordinator, idle_timeout).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "listener stopped");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Huddle server shutting down");
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "sweeper task failed");
        }
        Ok(())
    }
}
