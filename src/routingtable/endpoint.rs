use crate::bbs::{ActualLrp, ModificationTag};
use std::collections::HashMap;

/// Identifies one fan-out class: all routes and endpoints advertised for a
/// process's container port.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct RoutingKey {
    pub process_guid: String,
    pub container_port: u32,
}

impl RoutingKey {
    pub fn new(process_guid: &str, container_port: u32) -> Self {
        Self {
            process_guid: process_guid.to_string(),
            container_port,
        }
    }
}

/// A backend instance realising a routing key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Endpoint {
    pub instance_guid: String,
    pub index: i32,
    /// Node IP.
    pub host: String,
    pub container_ip: String,
    pub domain: String,
    /// Node-side NATed port.
    pub port: u32,
    pub container_port: u32,
    pub tls_proxy_port: Option<u32>,
    pub container_tls_proxy_port: Option<u32>,
    pub evacuating: bool,
    pub modification_tag: ModificationTag,
}

impl Endpoint {
    pub fn key(&self) -> EndpointKey {
        EndpointKey {
            instance_guid: self.instance_guid.clone(),
            evacuating: self.evacuating,
        }
    }

    pub fn address(&self) -> Address {
        Address {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// Per-key endpoint map key. The evacuating flag is part of the identity so
/// an evacuating record and its running replacement can coexist during
/// handoff.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct EndpointKey {
    pub instance_guid: String,
    pub evacuating: bool,
}

/// A node-side address, collision-detectable across instances.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u32,
}

/// An HTTP (or service-discovery) route advertised for a key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Route {
    pub hostname: String,
    pub log_guid: String,
    pub route_service_url: String,
    pub isolation_segment: String,
    pub router_group_guid: String,
}

/// A TCP fan-out target: an external port on a router group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEndpoint {
    pub router_group_guid: String,
    pub port: u32,
}

/// Everything the table knows about one HTTP routing key.
#[derive(Debug, Clone, Default)]
pub struct RoutableEndpoints {
    pub routes: Vec<Route>,
    pub internal_routes: Vec<Route>,
    pub endpoints: HashMap<EndpointKey, Endpoint>,
    pub domain: String,
    pub modification_tag: ModificationTag,
}

impl RoutableEndpoints {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.internal_routes.is_empty() && self.endpoints.is_empty()
    }

    /// Whether another endpoint for the same instance remains, under the
    /// opposite evacuation flag. Used to shadow handoff transitions.
    pub fn has_sibling_of(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.values().any(|e| {
            e.instance_guid == endpoint.instance_guid && e.evacuating != endpoint.evacuating
        })
    }
}

/// Everything the table knows about one TCP routing key.
#[derive(Debug, Clone, Default)]
pub struct TcpRoutableEndpoints {
    pub external_endpoints: Vec<ExternalEndpoint>,
    pub endpoints: HashMap<EndpointKey, Endpoint>,
    pub domain: String,
    pub modification_tag: ModificationTag,
}

impl TcpRoutableEndpoints {
    pub fn is_empty(&self) -> bool {
        self.external_endpoints.is_empty() && self.endpoints.is_empty()
    }

    pub fn has_sibling_of(&self, endpoint: &Endpoint) -> bool {
        self.endpoints.values().any(|e| {
            e.instance_guid == endpoint.instance_guid && e.evacuating != endpoint.evacuating
        })
    }
}

/// Project an actual LRP into one endpoint per port mapping, keyed by
/// container port. Actuals without port mappings yield nothing.
pub fn endpoints_from_actual(actual: &ActualLrp) -> Vec<(u32, Endpoint)> {
    actual
        .ports
        .iter()
        .map(|mapping| {
            (
                mapping.container_port,
                Endpoint {
                    instance_guid: actual.instance_guid.clone(),
                    index: actual.index,
                    host: actual.address.clone(),
                    container_ip: actual.instance_address.clone(),
                    domain: actual.domain.clone(),
                    port: mapping.host_port,
                    container_port: mapping.container_port,
                    tls_proxy_port: mapping.host_tls_proxy_port,
                    container_tls_proxy_port: mapping.container_tls_proxy_port,
                    evacuating: actual.evacuating,
                    modification_tag: actual.modification_tag.clone(),
                },
            )
        })
        .collect()
}
