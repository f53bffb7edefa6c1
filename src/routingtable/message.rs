use super::endpoint::{Endpoint, Route};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wire-level registration/unregistration published to the HTTP router.
/// Empty optional fields are omitted from the JSON payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryMessage {
    pub host: String,
    pub port: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_port: Option<u32>,
    pub uris: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_instance_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_instance_index: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub route_service_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub router_group_guid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub isolation_segment: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// Reply payload for `router.greet` requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterGreetingMessage {
    #[serde(rename = "minimumRegisterIntervalInSeconds")]
    pub minimum_register_interval: u64,
    #[serde(rename = "pruneThresholdInSeconds")]
    pub prune_threshold_in_seconds: u64,
}

fn component_tags() -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert("component".to_string(), "route-emitter".to_string());
    tags
}

/// How registration messages source their address fields. Selected once at
/// table construction, never per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageBuilder {
    /// Node IP and NATed port.
    HostPort,
    /// Container IP and container port.
    InternalAddress,
    /// Container address with per-index `N.hostname` URIs, for the
    /// service-discovery sink.
    InternalEndpoint,
}

impl MessageBuilder {
    pub fn registry_message(&self, endpoint: &Endpoint, route: &Route) -> RegistryMessage {
        let private_instance_index = if endpoint.instance_guid.is_empty() {
            String::new()
        } else {
            endpoint.index.to_string()
        };

        let (host, port, tls_port, uris) = match self {
            MessageBuilder::HostPort => (
                endpoint.host.clone(),
                endpoint.port,
                endpoint.tls_proxy_port,
                vec![route.hostname.clone()],
            ),
            MessageBuilder::InternalAddress => (
                endpoint.container_ip.clone(),
                endpoint.container_port,
                endpoint.container_tls_proxy_port,
                vec![route.hostname.clone()],
            ),
            MessageBuilder::InternalEndpoint => (
                endpoint.container_ip.clone(),
                endpoint.container_port,
                endpoint.container_tls_proxy_port,
                vec![
                    route.hostname.clone(),
                    format!("{}.{}", endpoint.index, route.hostname),
                ],
            ),
        };

        RegistryMessage {
            host,
            port,
            tls_port,
            uris,
            app: route.log_guid.clone(),
            private_instance_id: endpoint.instance_guid.clone(),
            private_instance_index,
            route_service_url: route.route_service_url.clone(),
            router_group_guid: route.router_group_guid.clone(),
            isolation_segment: route.isolation_segment.clone(),
            tags: component_tags(),
        }
    }
}

/// The diff produced by a table operation: exactly the messages needed to
/// transition the external sinks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagesToEmit {
    pub registrations: Vec<RegistryMessage>,
    pub unregistrations: Vec<RegistryMessage>,
    pub internal_registrations: Vec<RegistryMessage>,
    pub internal_unregistrations: Vec<RegistryMessage>,
}

impl MessagesToEmit {
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
            && self.unregistrations.is_empty()
            && self.internal_registrations.is_empty()
            && self.internal_unregistrations.is_empty()
    }

    pub fn merge(&mut self, other: MessagesToEmit) {
        self.registrations.extend(other.registrations);
        self.unregistrations.extend(other.unregistrations);
        self.internal_registrations.extend(other.internal_registrations);
        self.internal_unregistrations
            .extend(other.internal_unregistrations);
    }

    pub fn route_registration_count(&self) -> u64 {
        (self.registrations.len() + self.internal_registrations.len()) as u64
    }

    pub fn route_unregistration_count(&self) -> u64 {
        (self.unregistrations.len() + self.internal_unregistrations.len()) as u64
    }
}
