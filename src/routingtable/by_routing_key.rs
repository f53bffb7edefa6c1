use super::endpoint::{endpoints_from_actual, Endpoint, ExternalEndpoint, Route, RoutingKey};
use crate::bbs::routes::{cf_routes_from, internal_routes_from, tcp_routes_from};
use crate::bbs::{ActualLrp, SchedulingInfo};
use std::collections::{HashMap, HashSet};

/// Project a scheduling info's `cf-router` blob into one `Route` per hostname
/// per port, keyed by `(process_guid, port)`. A missing or nil blob yields
/// nothing; a malformed blob is an error the caller logs once per process.
pub fn routes_by_routing_key(
    info: &SchedulingInfo,
) -> anyhow::Result<HashMap<RoutingKey, Vec<Route>>> {
    let mut result: HashMap<RoutingKey, Vec<Route>> = HashMap::new();
    for cf_route in cf_routes_from(info)? {
        let key = RoutingKey::new(&info.process_guid, cf_route.port);
        let routes = result.entry(key).or_default();
        for hostname in &cf_route.hostnames {
            routes.push(Route {
                hostname: hostname.clone(),
                log_guid: info.log_guid.clone(),
                route_service_url: cf_route.route_service_url.clone(),
                isolation_segment: cf_route.isolation_segment.clone(),
                router_group_guid: String::new(),
            });
        }
    }
    Ok(result)
}

/// Project the `internal-router` blob into service-discovery routes. Internal
/// routes have no port of their own; they apply to every port the process
/// advertises HTTP routes for, falling back to every known container port.
pub fn internal_routes_by_routing_key(
    info: &SchedulingInfo,
) -> anyhow::Result<HashMap<RoutingKey, Vec<Route>>> {
    let internal = internal_routes_from(info)?;
    if internal.is_empty() {
        return Ok(HashMap::new());
    }

    let mut ports: Vec<u32> = cf_routes_from(info)
        .unwrap_or_default()
        .iter()
        .map(|r| r.port)
        .collect();
    ports.sort_unstable();
    ports.dedup();

    let mut result: HashMap<RoutingKey, Vec<Route>> = HashMap::new();
    for port in ports {
        let key = RoutingKey::new(&info.process_guid, port);
        let routes = result.entry(key).or_default();
        for route in &internal {
            routes.push(Route {
                hostname: route.hostname.clone(),
                log_guid: info.log_guid.clone(),
                route_service_url: String::new(),
                isolation_segment: String::new(),
                router_group_guid: String::new(),
            });
        }
    }
    Ok(result)
}

/// Project the `tcp-router` blob into external endpoints keyed by
/// `(process_guid, container_port)`.
pub fn tcp_routes_by_routing_key(
    info: &SchedulingInfo,
) -> anyhow::Result<HashMap<RoutingKey, Vec<ExternalEndpoint>>> {
    let mut result: HashMap<RoutingKey, Vec<ExternalEndpoint>> = HashMap::new();
    for tcp_route in tcp_routes_from(info)? {
        let key = RoutingKey::new(&info.process_guid, tcp_route.container_port);
        result.entry(key).or_default().push(ExternalEndpoint {
            router_group_guid: tcp_route.router_group_guid.clone(),
            port: tcp_route.external_port,
        });
    }
    Ok(result)
}

/// Project a snapshot of actuals into endpoints keyed by
/// `(process_guid, container_port)`. Actuals without port mappings are
/// skipped, as are actuals whose process is absent from `desired_index`.
pub fn endpoints_by_routing_key(
    actuals: &[ActualLrp],
    desired_index: &HashSet<String>,
) -> HashMap<RoutingKey, Vec<Endpoint>> {
    let mut result: HashMap<RoutingKey, Vec<Endpoint>> = HashMap::new();
    for actual in actuals {
        if !desired_index.contains(&actual.process_guid) {
            continue;
        }
        for (container_port, endpoint) in endpoints_from_actual(actual) {
            let key = RoutingKey::new(&actual.process_guid, container_port);
            result.entry(key).or_default().push(endpoint);
        }
    }
    result
}

/// The routing keys an actual LRP participates in.
pub fn routing_keys_from_actual(actual: &ActualLrp) -> Vec<RoutingKey> {
    actual
        .ports
        .iter()
        .map(|mapping| RoutingKey::new(&actual.process_guid, mapping.container_port))
        .collect()
}

/// The routing keys a scheduling info advertises routes for.
pub fn routing_keys_from_scheduling_info(info: &SchedulingInfo) -> Vec<RoutingKey> {
    let mut keys: Vec<RoutingKey> = Vec::new();
    if let Ok(routes) = cf_routes_from(info) {
        for cf_route in routes {
            keys.push(RoutingKey::new(&info.process_guid, cf_route.port));
        }
    }
    if let Ok(routes) = tcp_routes_from(info) {
        for tcp_route in routes {
            keys.push(RoutingKey::new(&info.process_guid, tcp_route.container_port));
        }
    }
    keys.sort_by(|a, b| {
        a.process_guid
            .cmp(&b.process_guid)
            .then(a.container_port.cmp(&b.container_port))
    });
    keys.dedup();
    keys
}
