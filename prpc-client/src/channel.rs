//! Load-balanced channel over a set of backend connections.

use crate::balancer::{LoadBalancer, LoadBalancerKind};
use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use crate::naming::{self, NamingService};
use crate::registry::{Backend, BackendRegistry};
use prost::Message;
use prpc_protocol::DEFAULT_MAX_BODY_SIZE;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Options applied to every connection a channel opens.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Option<Duration>,
    pub max_body_size: u32,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Some(Duration::from_secs(30)),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl ChannelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_body_size(mut self, size: u32) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn connection_config(&self, addr: &str) -> ConnectionConfig {
        ConnectionConfig::new(addr)
            .with_connect_timeout(self.connect_timeout)
            .with_request_timeout(self.request_timeout)
            .with_max_body_size(self.max_body_size)
    }
}

/// Counts from a [`Channel::reload`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: usize,
    pub removed: usize,
}

/// Sends each call to one backend picked by the channel's strategy.
///
/// There is no failover: an error from the chosen backend is returned as is.
/// A backend whose connection a call leaves unusable is dropped from the
/// registry so the strategy only picks live connections; [`Channel::reload`]
/// or [`Channel::add_backend`] dials it again.
pub struct Channel {
    registry: Arc<BackendRegistry>,
    balancer: LoadBalancer,
    options: ChannelOptions,
}

impl Channel {
    /// Resolves `naming_url` and connects to every backend it lists.
    pub async fn init(
        naming_url: &str,
        kind: LoadBalancerKind,
        options: ChannelOptions,
    ) -> Result<Self, ClientError> {
        let naming = naming::from_url(naming_url)?;
        let addrs = naming.servers()?;
        Self::connect(&addrs, kind, options).await
    }

    /// Connects to every address in `addrs`.
    ///
    /// All or nothing: the first dial failure is returned and connections
    /// already opened are dropped.
    pub async fn connect<S: AsRef<str>>(
        addrs: &[S],
        kind: LoadBalancerKind,
        options: ChannelOptions,
    ) -> Result<Self, ClientError> {
        naming::validate_addresses(addrs)?;

        let registry = Arc::new(BackendRegistry::new());
        for addr in addrs {
            let addr = addr.as_ref();
            let conn = Connection::connect(options.connection_config(addr)).await?;
            registry.add(addr, Arc::new(conn));
        }

        tracing::info!(
            "Channel connected to {} backend(s), load balancer {}",
            registry.len(),
            kind
        );

        Ok(Self::with_registry(registry, kind, options))
    }

    /// Builds a channel over a registry managed elsewhere.
    pub fn with_registry(
        registry: Arc<BackendRegistry>,
        kind: LoadBalancerKind,
        options: ChannelOptions,
    ) -> Self {
        Self {
            registry,
            balancer: LoadBalancer::new(kind),
            options,
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn load_balancer(&self) -> LoadBalancerKind {
        self.balancer.kind()
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Calls `service_method` on one backend.
    ///
    /// With content hashing, the encoded request is the hash key.
    pub async fn call_method<Req, Resp>(
        &self,
        service_method: &str,
        request: &Req,
    ) -> Result<Resp, ClientError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let payload = request.encode_to_vec();
        let backend = self.select(Some(payload.as_slice()))?;
        self.call_backend(&backend, service_method, &payload).await
    }

    /// Calls `service_method` on the backend `key` hashes to.
    pub async fn call_method_with_key<Req, Resp>(
        &self,
        key: &[u8],
        service_method: &str,
        request: &Req,
    ) -> Result<Resp, ClientError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let backend = self.select(Some(key))?;
        self.call_backend(&backend, service_method, &request.encode_to_vec())
            .await
    }

    /// Dials `addr` and adds it. Returns false if it was already registered.
    pub async fn add_backend(&self, addr: &str) -> Result<bool, ClientError> {
        naming::validate_address(addr)?;
        if self.registry.contains(addr) {
            return Ok(false);
        }
        let conn = Connection::connect(self.options.connection_config(addr)).await?;
        let added = self.registry.add(addr, Arc::new(conn));
        if added {
            tracing::info!("Added backend {}", addr);
        }
        Ok(added)
    }

    /// Removes `addr`. Calls already running on it finish normally.
    pub fn remove_backend(&self, addr: &str) -> bool {
        let removed = self.registry.remove(addr).is_some();
        if removed {
            tracing::info!("Removed backend {}", addr);
        }
        removed
    }

    /// Brings the registry in line with what `naming` reports.
    ///
    /// New addresses are dialed first; if any dial fails nothing is removed
    /// and the error is returned.
    pub async fn reload(&self, naming: &dyn NamingService) -> Result<ReloadSummary, ClientError> {
        let wanted = naming.servers()?;
        let wanted_set: HashSet<&str> = wanted.iter().map(String::as_str).collect();
        let current = self.registry.ids();

        let mut summary = ReloadSummary::default();
        for addr in &wanted {
            if self.add_backend(addr).await? {
                summary.added += 1;
            }
        }

        let gone: Vec<&String> = current
            .iter()
            .filter(|id| !wanted_set.contains(id.as_str()))
            .collect();
        summary.removed = self.registry.remove_batch(&gone).len();

        tracing::info!(
            "Reloaded backends: {} added, {} removed, {} total",
            summary.added,
            summary.removed,
            self.registry.len()
        );
        Ok(summary)
    }

    /// Unregisters and closes every backend.
    pub async fn close(&self) {
        for backend in self.registry.clear() {
            if let Err(e) = backend.conn.close().await {
                tracing::debug!("Error closing {}: {}", backend.id, e);
            }
        }
    }

    async fn call_backend<Resp: Message + Default>(
        &self,
        backend: &Backend,
        service_method: &str,
        payload: &[u8],
    ) -> Result<Resp, ClientError> {
        let result = backend.conn.call_encoded(service_method, payload).await;
        if result.is_err()
            && !backend.conn.is_connected()
            && self.registry.remove_conn(&backend.id, &backend.conn)
        {
            tracing::warn!("Dropped unusable backend {}", backend.id);
        }
        result
    }

    fn select(&self, key: Option<&[u8]>) -> Result<Backend, ClientError> {
        let backend = self
            .registry
            .select(&self.balancer, key)
            .ok_or(ClientError::NoAvailableBackend)?;
        tracing::debug!("Selected backend {}", backend.id);
        Ok(backend)
    }
}
