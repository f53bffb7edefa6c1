use super::by_routing_key::tcp_routes_by_routing_key;
use super::endpoint::{
    endpoints_from_actual, Endpoint, ExternalEndpoint, RoutingKey, TcpRoutableEndpoints,
};
use crate::bbs::{ActualLrp, DomainSet, ModificationTag, SchedulingInfo};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingEventKind {
    Registration,
    Unregistration,
}

/// One TCP routing transition: the cross product of `external_endpoints` and
/// `endpoints` is to be upserted or deleted.
#[derive(Debug, Clone)]
pub struct RoutingEvent {
    pub kind: RoutingEventKind,
    pub key: RoutingKey,
    pub external_endpoints: Vec<ExternalEndpoint>,
    pub endpoints: Vec<Endpoint>,
}

impl RoutingEvent {
    /// An event with nothing to map, or with a zero external port, cannot be
    /// turned into a mapping request.
    pub fn valid(&self) -> bool {
        if self.endpoints.is_empty() || self.external_endpoints.is_empty() {
            return false;
        }
        self.external_endpoints.iter().all(|e| e.port != 0)
    }
}

pub type RoutingEvents = Vec<RoutingEvent>;

/// TCP variant of the routing table: keyed identically, but each key carries
/// the external (router-group, port) fan-out targets instead of hostnames.
/// Mutations yield `RoutingEvent` batches for the TCP emitter.
pub struct TcpRoutingTable {
    entries: HashMap<RoutingKey, TcpRoutableEndpoints>,
}

impl TcpRoutingTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn set_routes(
        &mut self,
        before: Option<&SchedulingInfo>,
        after: &SchedulingInfo,
    ) -> (usize, RoutingEvents) {
        let mut events = RoutingEvents::new();
        let mut touched = 0;

        let after_routes = match tcp_routes_by_routing_key(after) {
            Ok(routes) => routes,
            Err(e) => {
                warn!(
                    "tcp-routing-table: failed-to-extract-routes, process_guid={}, error={}",
                    after.process_guid, e
                );
                return (0, events);
            }
        };

        if let Some(before_info) = before {
            if let Ok(before_routes) = tcp_routes_by_routing_key(before_info) {
                for key in before_routes.keys() {
                    if !after_routes.contains_key(key) {
                        let (n, evs) = self.remove_routes_for_key(key, &after.modification_tag);
                        touched += n;
                        events.extend(evs);
                    }
                }
            }
        }

        for (key, external_endpoints) in after_routes {
            let gate_ok = match self.entries.get(&key) {
                Some(entry) => entry.modification_tag.succeeded_by(&after.modification_tag),
                None => true,
            };
            if !gate_ok {
                continue;
            }

            let entry = self.entries.entry(key.clone()).or_default();
            let old_external =
                std::mem::replace(&mut entry.external_endpoints, external_endpoints);
            entry.modification_tag = after.modification_tag.clone();
            entry.domain = after.domain.clone();

            let added: Vec<ExternalEndpoint> = entry
                .external_endpoints
                .iter()
                .filter(|e| !old_external.contains(e))
                .cloned()
                .collect();
            let removed: Vec<ExternalEndpoint> = old_external
                .iter()
                .filter(|e| !entry.external_endpoints.contains(e))
                .cloned()
                .collect();

            let endpoints: Vec<Endpoint> = entry.endpoints.values().cloned().collect();
            if endpoints.is_empty() {
                continue;
            }
            if !added.is_empty() {
                events.push(RoutingEvent {
                    kind: RoutingEventKind::Registration,
                    key: key.clone(),
                    external_endpoints: added,
                    endpoints: endpoints.clone(),
                });
                touched += endpoints.len();
            }
            if !removed.is_empty() {
                events.push(RoutingEvent {
                    kind: RoutingEventKind::Unregistration,
                    key,
                    external_endpoints: removed,
                    endpoints,
                });
            }
        }

        (touched, events)
    }

    pub fn remove_routes(&mut self, info: &SchedulingInfo) -> (usize, RoutingEvents) {
        let mut events = RoutingEvents::new();
        let mut touched = 0;

        let keys: Vec<RoutingKey> = match tcp_routes_by_routing_key(info) {
            Ok(routes) => routes.into_keys().collect(),
            Err(e) => {
                warn!(
                    "tcp-routing-table: failed-to-extract-routes, process_guid={}, error={}",
                    info.process_guid, e
                );
                return (0, events);
            }
        };

        for key in keys {
            let (n, evs) = self.remove_routes_for_key(&key, &info.modification_tag);
            touched += n;
            events.extend(evs);
        }

        (touched, events)
    }

    fn remove_routes_for_key(
        &mut self,
        key: &RoutingKey,
        tag: &ModificationTag,
    ) -> (usize, RoutingEvents) {
        let accepted = match self.entries.get(key) {
            Some(entry) => {
                entry.modification_tag == *tag || entry.modification_tag.succeeded_by(tag)
            }
            None => false,
        };
        if !accepted {
            return (0, RoutingEvents::new());
        }

        let entry = self.entries.remove(key).expect("entry gated above");
        let endpoints: Vec<Endpoint> = entry.endpoints.values().cloned().collect();
        if endpoints.is_empty() {
            return (0, RoutingEvents::new());
        }
        let touched = endpoints.len();
        let events = vec![RoutingEvent {
            kind: RoutingEventKind::Unregistration,
            key: key.clone(),
            external_endpoints: entry.external_endpoints,
            endpoints,
        }];
        (touched, events)
    }

    pub fn add_endpoint(&mut self, actual: &ActualLrp) -> (usize, RoutingEvents) {
        let mut events = RoutingEvents::new();
        let mut touched = 0;

        for (container_port, endpoint) in endpoints_from_actual(actual) {
            let key = RoutingKey::new(&actual.process_guid, container_port);
            let entry = self.entries.entry(key.clone()).or_default();
            if entry.domain.is_empty() {
                entry.domain = endpoint.domain.clone();
            }

            let endpoint_key = endpoint.key();
            match entry.endpoints.get(&endpoint_key) {
                Some(existing) => {
                    let accepted = existing.modification_tag == endpoint.modification_tag
                        || existing
                            .modification_tag
                            .succeeded_by(&endpoint.modification_tag);
                    if !accepted {
                        continue;
                    }
                    entry.endpoints.insert(endpoint_key, endpoint);
                }
                None => {
                    let shadowed = entry.has_sibling_of(&endpoint);
                    entry.endpoints.insert(endpoint_key, endpoint.clone());
                    if !shadowed && !entry.external_endpoints.is_empty() {
                        events.push(RoutingEvent {
                            kind: RoutingEventKind::Registration,
                            key,
                            external_endpoints: entry.external_endpoints.clone(),
                            endpoints: vec![endpoint],
                        });
                    }
                }
            }
            touched += 1;
        }

        (touched, events)
    }

    pub fn remove_endpoint(&mut self, actual: &ActualLrp) -> (usize, RoutingEvents) {
        let mut events = RoutingEvents::new();
        let mut touched = 0;

        for (container_port, endpoint) in endpoints_from_actual(actual) {
            let key = RoutingKey::new(&actual.process_guid, container_port);
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };

            let endpoint_key = endpoint.key();
            let Some(existing) = entry.endpoints.get(&endpoint_key) else {
                continue;
            };
            let accepted = existing.modification_tag == endpoint.modification_tag
                || existing
                    .modification_tag
                    .succeeded_by(&endpoint.modification_tag);
            if !accepted {
                continue;
            }

            let removed = entry
                .endpoints
                .remove(&endpoint_key)
                .expect("endpoint gated above");
            let shadowed = entry.has_sibling_of(&removed);
            if !shadowed && !entry.external_endpoints.is_empty() {
                events.push(RoutingEvent {
                    kind: RoutingEventKind::Unregistration,
                    key: key.clone(),
                    external_endpoints: entry.external_endpoints.clone(),
                    endpoints: vec![removed],
                });
            }
            touched += 1;

            if entry.is_empty() {
                self.entries.remove(&key);
            }
        }

        (touched, events)
    }

    pub fn remove_overflow_endpoints(
        &mut self,
        process_guid: &str,
        instances: i32,
    ) -> (usize, RoutingEvents) {
        let mut events = RoutingEvents::new();
        let mut touched = 0;
        let mut emptied: Vec<RoutingKey> = Vec::new();

        for (key, entry) in self.entries.iter_mut() {
            if key.process_guid != process_guid {
                continue;
            }
            let overflow: Vec<_> = entry
                .endpoints
                .iter()
                .filter(|(_, e)| e.index >= instances)
                .map(|(k, _)| k.clone())
                .collect();
            for endpoint_key in overflow {
                let removed = entry
                    .endpoints
                    .remove(&endpoint_key)
                    .expect("endpoint key collected above");
                if !entry.has_sibling_of(&removed) && !entry.external_endpoints.is_empty() {
                    events.push(RoutingEvent {
                        kind: RoutingEventKind::Unregistration,
                        key: key.clone(),
                        external_endpoints: entry.external_endpoints.clone(),
                        endpoints: vec![removed],
                    });
                }
                touched += 1;
            }
            if entry.is_empty() {
                emptied.push(key.clone());
            }
        }

        for key in emptied {
            self.entries.remove(&key);
        }

        (touched, events)
    }

    pub fn swap(
        &mut self,
        new_table: TcpRoutingTable,
        domains: &DomainSet,
    ) -> (usize, RoutingEvents) {
        let old_entries = std::mem::take(&mut self.entries);
        let mut merged = new_table.entries;
        let mut events = RoutingEvents::new();
        let mut touched = 0;

        for (key, old_entry) in &old_entries {
            match merged.get_mut(key) {
                None => {
                    if domains.contains(&old_entry.domain) {
                        if !old_entry.endpoints.is_empty() {
                            events.push(RoutingEvent {
                                kind: RoutingEventKind::Unregistration,
                                key: key.clone(),
                                external_endpoints: old_entry.external_endpoints.clone(),
                                endpoints: old_entry.endpoints.values().cloned().collect(),
                            });
                            touched += old_entry.endpoints.len();
                        }
                    } else {
                        merged.insert(key.clone(), old_entry.clone());
                    }
                }
                Some(new_entry) => {
                    if domains.contains(&old_entry.domain) {
                        let gone: Vec<Endpoint> = old_entry
                            .endpoints
                            .iter()
                            .filter(|(endpoint_key, endpoint)| {
                                !new_entry.endpoints.contains_key(endpoint_key)
                                    && !new_entry
                                        .endpoints
                                        .values()
                                        .any(|e| e.instance_guid == endpoint.instance_guid)
                            })
                            .map(|(_, e)| e.clone())
                            .collect();
                        if !gone.is_empty() {
                            touched += gone.len();
                            events.push(RoutingEvent {
                                kind: RoutingEventKind::Unregistration,
                                key: key.clone(),
                                external_endpoints: old_entry.external_endpoints.clone(),
                                endpoints: gone,
                            });
                        }

                        let dropped_external: Vec<ExternalEndpoint> = old_entry
                            .external_endpoints
                            .iter()
                            .filter(|e| !new_entry.external_endpoints.contains(e))
                            .cloned()
                            .collect();
                        if !dropped_external.is_empty() {
                            let survivors: Vec<Endpoint> = old_entry
                                .endpoints
                                .iter()
                                .filter(|(endpoint_key, _)| {
                                    new_entry.endpoints.contains_key(endpoint_key)
                                })
                                .map(|(_, e)| e.clone())
                                .collect();
                            if !survivors.is_empty() {
                                events.push(RoutingEvent {
                                    kind: RoutingEventKind::Unregistration,
                                    key: key.clone(),
                                    external_endpoints: dropped_external,
                                    endpoints: survivors,
                                });
                            }
                        }
                    } else {
                        for (endpoint_key, endpoint) in &old_entry.endpoints {
                            new_entry
                                .endpoints
                                .entry(endpoint_key.clone())
                                .or_insert_with(|| endpoint.clone());
                        }
                        for external in &old_entry.external_endpoints {
                            if !new_entry.external_endpoints.contains(external) {
                                new_entry.external_endpoints.push(external.clone());
                            }
                        }
                    }
                }
            }
        }

        for (key, new_entry) in &merged {
            let old_entry = old_entries.get(key);

            let fresh_endpoints: Vec<Endpoint> = new_entry
                .endpoints
                .values()
                .filter(|endpoint| {
                    let endpoint_is_new =
                        old_entry.map_or(true, |o| !o.endpoints.contains_key(&endpoint.key()));
                    let handoff = old_entry.is_some_and(|o| {
                        o.endpoints
                            .values()
                            .any(|e| e.instance_guid == endpoint.instance_guid)
                    });
                    endpoint_is_new && !handoff
                })
                .cloned()
                .collect();
            if !fresh_endpoints.is_empty() && !new_entry.external_endpoints.is_empty() {
                touched += fresh_endpoints.len();
                events.push(RoutingEvent {
                    kind: RoutingEventKind::Registration,
                    key: key.clone(),
                    external_endpoints: new_entry.external_endpoints.clone(),
                    endpoints: fresh_endpoints,
                });
            }

            let added_external: Vec<ExternalEndpoint> = new_entry
                .external_endpoints
                .iter()
                .filter(|e| old_entry.map_or(true, |o| !o.external_endpoints.contains(e)))
                .cloned()
                .collect();
            if !added_external.is_empty() {
                let survivors: Vec<Endpoint> = new_entry
                    .endpoints
                    .values()
                    .filter(|endpoint| {
                        old_entry.is_some_and(|o| o.endpoints.contains_key(&endpoint.key()))
                    })
                    .cloned()
                    .collect();
                if !survivors.is_empty() {
                    events.push(RoutingEvent {
                        kind: RoutingEventKind::Registration,
                        key: key.clone(),
                        external_endpoints: added_external,
                        endpoints: survivors,
                    });
                }
            }
        }

        self.entries = merged;

        (touched, events)
    }

    /// Heartbeat: a registration event per key with anything to map.
    pub fn emit(&self) -> RoutingEvents {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.endpoints.is_empty() && !entry.external_endpoints.is_empty())
            .map(|(key, entry)| RoutingEvent {
                kind: RoutingEventKind::Registration,
                key: key.clone(),
                external_endpoints: entry.external_endpoints.clone(),
                endpoints: entry.endpoints.values().cloned().collect(),
            })
            .collect()
    }

    /// Whether the table holds external endpoints for any key of the process.
    pub fn has_external_routes_for_process(&self, process_guid: &str) -> bool {
        self.entries.iter().any(|(key, entry)| {
            key.process_guid == process_guid && !entry.external_endpoints.is_empty()
        })
    }

    pub fn tcp_route_count(&self) -> usize {
        self.entries
            .values()
            .map(|e| e.external_endpoints.len())
            .sum()
    }
}

impl Default for TcpRoutingTable {
    fn default() -> Self {
        Self::new()
    }
}
