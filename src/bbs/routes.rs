use super::models::SchedulingInfo;
use serde::{Deserialize, Serialize};

/// Schema key for HTTP routes in a scheduling info's routing blob.
pub const CF_ROUTER_KEY: &str = "cf-router";
/// Schema key for TCP routes.
pub const TCP_ROUTER_KEY: &str = "tcp-router";
/// Schema key for container-to-container service-discovery routes.
pub const INTERNAL_ROUTER_KEY: &str = "internal-router";

/// One HTTP route group: a set of hostnames bound to a container port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CfRoute {
    #[serde(default)]
    pub hostnames: Vec<String>,
    pub port: u32,
    #[serde(default)]
    pub route_service_url: String,
    #[serde(default)]
    pub isolation_segment: String,
}

/// One TCP route: an external port on a router group forwarded to a
/// container port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpRoute {
    #[serde(default)]
    pub router_group_guid: String,
    pub external_port: u32,
    pub container_port: u32,
}

/// One service-discovery route: a hostname resolvable to container IPs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternalRoute {
    pub hostname: String,
}

/// Extract the `cf-router` routes from a scheduling info's routing blob.
/// A missing key yields an empty list; a malformed value is an error the
/// caller reports once per process.
pub fn cf_routes_from(info: &SchedulingInfo) -> anyhow::Result<Vec<CfRoute>> {
    routes_under(info, CF_ROUTER_KEY)
}

pub fn tcp_routes_from(info: &SchedulingInfo) -> anyhow::Result<Vec<TcpRoute>> {
    routes_under(info, TCP_ROUTER_KEY)
}

pub fn internal_routes_from(info: &SchedulingInfo) -> anyhow::Result<Vec<InternalRoute>> {
    routes_under(info, INTERNAL_ROUTER_KEY)
}

fn routes_under<T: serde::de::DeserializeOwned>(
    info: &SchedulingInfo,
    key: &str,
) -> anyhow::Result<Vec<T>> {
    match info.routes.get(key) {
        None => Ok(Vec::new()),
        Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| anyhow::anyhow!("malformed {} routes: {}", key, e)),
    }
}
