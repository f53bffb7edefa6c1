use crate::error::EmitterError;
use crate::routingtable::{RoutingEventKind, RoutingEvents};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info};

/// One TCP route mapping as the routing API consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpRouteMapping {
    pub router_group_guid: String,
    pub external_port: u16,
    pub host: String,
    pub port: u16,
    pub ttl: u64,
}

/// TCP-routing API HTTP client.
#[derive(Clone)]
pub struct RoutingApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl RoutingApiClient {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        if url.is_empty() {
            anyhow::bail!("routing api url cannot be empty");
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn upsert_tcp_route_mappings(
        &self,
        mappings: &[TcpRouteMapping],
    ) -> anyhow::Result<()> {
        self.post("/routing/v1/tcp_routes/create", mappings).await
    }

    pub async fn delete_tcp_route_mappings(
        &self,
        mappings: &[TcpRouteMapping],
    ) -> anyhow::Result<()> {
        self.post("/routing/v1/tcp_routes/delete", mappings).await
    }

    async fn post(&self, path: &str, mappings: &[TcpRouteMapping]) -> anyhow::Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.http.post(&url).json(mappings).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(
                EmitterError::RoutingApi(format!("{} returned {}: {}", path, status, text)).into(),
            );
        }
        Ok(())
    }
}

/// The TCP sink. Seamed as a trait for handler tests.
pub trait TcpRouteEmitter: Clone + Send + Sync + 'static {
    fn emit(&self, events: RoutingEvents) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Groups routing events into upsert and delete batches and asserts them
/// against the routing API. The first error aborts the call with no partial
/// retry; the next sync re-asserts the full state.
#[derive(Clone)]
pub struct TcpRoutingApiEmitter {
    client: Option<RoutingApiClient>,
    ttl: u64,
    /// Map the container address instead of the host-side NATed address.
    direct_instance_routes: bool,
}

impl TcpRoutingApiEmitter {
    pub fn new(client: RoutingApiClient, ttl: u64, direct_instance_routes: bool) -> Self {
        Self {
            client: Some(client),
            ttl,
            direct_instance_routes,
        }
    }

    /// An emitter with no routing API configured; every emit is a no-op.
    pub fn disabled() -> Self {
        Self {
            client: None,
            ttl: 0,
            direct_instance_routes: false,
        }
    }

    /// Split a batch of routing events into upsert and delete mapping
    /// requests, filtering out events that cannot be mapped.
    pub fn mapping_requests(
        &self,
        events: &RoutingEvents,
    ) -> (Vec<TcpRouteMapping>, Vec<TcpRouteMapping>) {
        let mut upserts = Vec::new();
        let mut deletes = Vec::new();

        for event in events {
            if !event.valid() {
                error!(
                    "tcp-emitter: invalid-routing-event, process_guid={}, container_port={}",
                    event.key.process_guid, event.key.container_port
                );
                continue;
            }
            let batch = match event.kind {
                RoutingEventKind::Registration => &mut upserts,
                RoutingEventKind::Unregistration => &mut deletes,
            };
            for external in &event.external_endpoints {
                for endpoint in &event.endpoints {
                    let (host, port) = if self.direct_instance_routes {
                        (endpoint.container_ip.clone(), endpoint.container_port)
                    } else {
                        (endpoint.host.clone(), endpoint.port)
                    };
                    batch.push(TcpRouteMapping {
                        router_group_guid: external.router_group_guid.clone(),
                        external_port: external.port as u16,
                        host,
                        port: port as u16,
                        ttl: self.ttl,
                    });
                }
            }
        }

        (upserts, deletes)
    }
}

impl TcpRouteEmitter for TcpRoutingApiEmitter {
    fn emit(&self, events: RoutingEvents) -> impl Future<Output = anyhow::Result<()>> + Send {
        let emitter = self.clone();
        async move {
            let Some(client) = emitter.client.as_ref() else {
                return Ok(());
            };
            if events.is_empty() {
                return Ok(());
            }

            let (upserts, deletes) = emitter.mapping_requests(&events);

            if !upserts.is_empty() {
                if let Err(e) = client.upsert_tcp_route_mappings(&upserts).await {
                    error!("tcp-emitter: unable-to-upsert, count={}, error={}", upserts.len(), e);
                    return Err(e);
                }
                debug!("tcp-emitter: upserted mappings, count={}", upserts.len());
            }

            if !deletes.is_empty() {
                if let Err(e) = client.delete_tcp_route_mappings(&deletes).await {
                    error!("tcp-emitter: unable-to-delete, count={}, error={}", deletes.len(), e);
                    return Err(e);
                }
                debug!("tcp-emitter: deleted mappings, count={}", deletes.len());
            }

            info!(
                "tcp-emitter: emitted, upserts={}, deletes={}",
                upserts.len(),
                deletes.len()
            );
            Ok(())
        }
    }
}
