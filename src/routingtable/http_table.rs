use super::by_routing_key::{internal_routes_by_routing_key, routes_by_routing_key};
use super::endpoint::{
    endpoints_from_actual, Address, Endpoint, RoutableEndpoints, Route, RoutingKey,
};
use super::message::{MessageBuilder, MessagesToEmit};
use crate::bbs::{ActualLrp, DomainSet, ModificationTag, SchedulingInfo};
use std::collections::HashMap;
use tracing::warn;

/// Bidirectional index from routing keys to the routes advertised for them
/// and the endpoints realising them. Every mutation returns the diff of
/// messages needed to transition the external sinks, plus the number of
/// endpoints touched.
///
/// Not internally synchronized; the dispatcher owns it.
pub struct RoutingTable {
    entries: HashMap<RoutingKey, RoutableEndpoints>,
    /// Node-side address index for collision detection.
    addresses: HashMap<Address, String>,
    builder: MessageBuilder,
}

impl RoutingTable {
    pub fn new(builder: MessageBuilder) -> Self {
        Self {
            entries: HashMap::new(),
            addresses: HashMap::new(),
            builder,
        }
    }

    pub fn builder(&self) -> MessageBuilder {
        self.builder
    }

    /// Apply an authoritative route set for every key the scheduling info
    /// advertises. `before` is the superseded record, used to drop keys the
    /// new record no longer mentions. Stale tags are dropped silently.
    pub fn set_routes(
        &mut self,
        before: Option<&SchedulingInfo>,
        after: &SchedulingInfo,
    ) -> (usize, MessagesToEmit) {
        let builder = self.builder;
        let mut messages = MessagesToEmit::default();
        let mut touched = 0;

        let after_routes = match routes_by_routing_key(after) {
            Ok(routes) => routes,
            Err(e) => {
                warn!(
                    "routing-table: failed-to-extract-routes, process_guid={}, error={}",
                    after.process_guid, e
                );
                return (0, messages);
            }
        };
        let after_internal = internal_routes_by_routing_key(after).unwrap_or_default();

        // Keys the superseded record advertised that the new one dropped.
        if let Some(before_info) = before {
            if let Ok(before_routes) = routes_by_routing_key(before_info) {
                for key in before_routes.keys() {
                    if !after_routes.contains_key(key) {
                        let (n, msgs) = self.remove_routes_for_key(key, &after.modification_tag);
                        touched += n;
                        messages.merge(msgs);
                    }
                }
            }
        }

        for (key, routes) in after_routes {
            let gate_ok = match self.entries.get(&key) {
                Some(entry) => entry.modification_tag.succeeded_by(&after.modification_tag),
                None => true,
            };
            if !gate_ok {
                continue;
            }

            let internal_routes = after_internal.get(&key).cloned().unwrap_or_default();
            let entry = self.entries.entry(key.clone()).or_default();
            let old_routes = std::mem::replace(&mut entry.routes, routes);
            let old_internal = std::mem::replace(&mut entry.internal_routes, internal_routes);
            entry.modification_tag = after.modification_tag.clone();
            entry.domain = after.domain.clone();

            // Routes present now but not before (by full value, so a changed
            // route service URL re-registers) pick up every endpoint.
            for route in &entry.routes {
                if !old_routes.contains(route) {
                    for endpoint in entry.endpoints.values() {
                        messages
                            .registrations
                            .push(builder.registry_message(endpoint, route));
                    }
                }
            }
            // Hostnames no longer advertised are unregistered.
            for route in &old_routes {
                if !entry.routes.iter().any(|r| r.hostname == route.hostname) {
                    for endpoint in entry.endpoints.values() {
                        messages
                            .unregistrations
                            .push(builder.registry_message(endpoint, route));
                    }
                }
            }

            for route in &entry.internal_routes {
                if !old_internal.iter().any(|r| r.hostname == route.hostname) {
                    for endpoint in entry.endpoints.values() {
                        messages.internal_registrations.push(
                            MessageBuilder::InternalEndpoint.registry_message(endpoint, route),
                        );
                    }
                }
            }
            for route in &old_internal {
                if !entry
                    .internal_routes
                    .iter()
                    .any(|r| r.hostname == route.hostname)
                {
                    for endpoint in entry.endpoints.values() {
                        messages.internal_unregistrations.push(
                            MessageBuilder::InternalEndpoint.registry_message(endpoint, route),
                        );
                    }
                }
            }

            if old_routes != entry.routes || old_internal != entry.internal_routes {
                touched += entry.endpoints.len();
            }
            if entry.is_empty() {
                self.entries.remove(&key);
            }
        }

        (touched, messages)
    }

    /// Drop every key the scheduling info advertises, unregistering all
    /// (endpoint × route) pairs. Stale tags are dropped silently.
    pub fn remove_routes(&mut self, info: &SchedulingInfo) -> (usize, MessagesToEmit) {
        let mut messages = MessagesToEmit::default();
        let mut touched = 0;

        let keys: Vec<RoutingKey> = match routes_by_routing_key(info) {
            Ok(routes) => routes.into_keys().collect(),
            Err(e) => {
                warn!(
                    "routing-table: failed-to-extract-routes, process_guid={}, error={}",
                    info.process_guid, e
                );
                return (0, messages);
            }
        };

        for key in keys {
            let (n, msgs) = self.remove_routes_for_key(&key, &info.modification_tag);
            touched += n;
            messages.merge(msgs);
        }

        (touched, messages)
    }

    fn remove_routes_for_key(
        &mut self,
        key: &RoutingKey,
        tag: &ModificationTag,
    ) -> (usize, MessagesToEmit) {
        let builder = self.builder;
        let mut messages = MessagesToEmit::default();

        let accepted = match self.entries.get(key) {
            Some(entry) => {
                entry.modification_tag == *tag || entry.modification_tag.succeeded_by(tag)
            }
            None => false,
        };
        if !accepted {
            return (0, messages);
        }

        let entry = self.entries.remove(key).expect("entry gated above");
        for endpoint in entry.endpoints.values() {
            for route in &entry.routes {
                messages
                    .unregistrations
                    .push(builder.registry_message(endpoint, route));
            }
            for route in &entry.internal_routes {
                messages
                    .internal_unregistrations
                    .push(MessageBuilder::InternalEndpoint.registry_message(endpoint, route));
            }
        }
        for endpoint in entry.endpoints.values() {
            self.release_address(endpoint);
        }

        (entry.endpoints.len(), messages)
    }

    /// Add or update one endpoint record per port mapping of the actual.
    /// Updates to an already-known record are stored silently; only a
    /// genuinely new record registers, and evacuation handoff shadows
    /// suppress emission entirely.
    pub fn add_endpoint(&mut self, actual: &ActualLrp) -> (usize, MessagesToEmit) {
        let builder = self.builder;
        let mut messages = MessagesToEmit::default();
        let mut touched = 0;

        for (container_port, endpoint) in endpoints_from_actual(actual) {
            self.detect_collision(&endpoint);

            let key = RoutingKey::new(&actual.process_guid, container_port);
            let entry = self.entries.entry(key).or_default();
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
                    entry.endpoints.insert(endpoint_key, endpoint.clone());
                }
                None => {
                    let shadowed = entry.has_sibling_of(&endpoint);
                    entry.endpoints.insert(endpoint_key, endpoint.clone());
                    if !shadowed {
                        for route in &entry.routes {
                            messages
                                .registrations
                                .push(builder.registry_message(&endpoint, route));
                        }
                        for route in &entry.internal_routes {
                            messages.internal_registrations.push(
                                MessageBuilder::InternalEndpoint.registry_message(&endpoint, route),
                            );
                        }
                    }
                }
            }

            self.addresses
                .insert(endpoint.address(), endpoint.instance_guid.clone());
            touched += 1;
        }

        (touched, messages)
    }

    /// Remove one endpoint record per port mapping of the actual. A record
    /// still covered by its handoff sibling is removed without emission.
    pub fn remove_endpoint(&mut self, actual: &ActualLrp) -> (usize, MessagesToEmit) {
        let builder = self.builder;
        let mut messages = MessagesToEmit::default();
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
            if !shadowed {
                for route in &entry.routes {
                    messages
                        .unregistrations
                        .push(builder.registry_message(&removed, route));
                }
                for route in &entry.internal_routes {
                    messages.internal_unregistrations.push(
                        MessageBuilder::InternalEndpoint.registry_message(&removed, route),
                    );
                }
            }
            touched += 1;

            if entry.is_empty() {
                self.entries.remove(&key);
            }
            self.release_address(&removed);
        }

        (touched, messages)
    }

    /// Unregister and drop endpoints whose ordinal is at or above the desired
    /// instance count. Applied when a process scales down, so routes stop
    /// pointing at instances that are no longer desired.
    pub fn remove_overflow_endpoints(
        &mut self,
        process_guid: &str,
        instances: i32,
    ) -> (usize, MessagesToEmit) {
        let builder = self.builder;
        let mut messages = MessagesToEmit::default();
        let mut touched = 0;
        let mut emptied: Vec<RoutingKey> = Vec::new();
        let mut released: Vec<Endpoint> = Vec::new();

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
                if !entry.has_sibling_of(&removed) {
                    for route in &entry.routes {
                        messages
                            .unregistrations
                            .push(builder.registry_message(&removed, route));
                    }
                    for route in &entry.internal_routes {
                        messages.internal_unregistrations.push(
                            MessageBuilder::InternalEndpoint.registry_message(&removed, route),
                        );
                    }
                }
                released.push(removed);
                touched += 1;
            }
            if entry.is_empty() {
                emptied.push(key.clone());
            }
        }

        for key in emptied {
            self.entries.remove(&key);
        }
        for endpoint in released {
            self.release_address(&endpoint);
        }

        (touched, messages)
    }

    /// Atomically replace this table with one built from an authoritative
    /// snapshot. Emits registrations for state that is new and, for keys
    /// whose domain is fresh, unregistrations for state that disappeared.
    /// State under a stale domain is carried over untouched so nothing is
    /// pruned on the authority's behalf.
    pub fn swap(&mut self, new_table: RoutingTable, domains: &DomainSet) -> (usize, MessagesToEmit) {
        let builder = self.builder;
        let old_entries = std::mem::take(&mut self.entries);
        let mut merged = new_table.entries;
        let mut messages = MessagesToEmit::default();
        let mut touched = 0;

        for (key, old_entry) in &old_entries {
            match merged.get_mut(key) {
                None => {
                    if domains.contains(&old_entry.domain) {
                        for endpoint in old_entry.endpoints.values() {
                            for route in &old_entry.routes {
                                messages
                                    .unregistrations
                                    .push(builder.registry_message(endpoint, route));
                            }
                            for route in &old_entry.internal_routes {
                                messages.internal_unregistrations.push(
                                    MessageBuilder::InternalEndpoint
                                        .registry_message(endpoint, route),
                                );
                            }
                        }
                        touched += old_entry.endpoints.len();
                    } else {
                        merged.insert(key.clone(), old_entry.clone());
                    }
                }
                Some(new_entry) => {
                    if domains.contains(&old_entry.domain) {
                        for (endpoint_key, endpoint) in &old_entry.endpoints {
                            let survives = new_entry.endpoints.contains_key(endpoint_key);
                            let handoff = new_entry
                                .endpoints
                                .values()
                                .any(|e| e.instance_guid == endpoint.instance_guid);
                            if !survives && !handoff {
                                for route in &old_entry.routes {
                                    messages
                                        .unregistrations
                                        .push(builder.registry_message(endpoint, route));
                                }
                                for route in &old_entry.internal_routes {
                                    messages.internal_unregistrations.push(
                                        MessageBuilder::InternalEndpoint
                                            .registry_message(endpoint, route),
                                    );
                                }
                                touched += 1;
                            }
                        }
                        for route in &old_entry.routes {
                            if !new_entry.routes.iter().any(|r| r.hostname == route.hostname) {
                                for (endpoint_key, endpoint) in &old_entry.endpoints {
                                    if new_entry.endpoints.contains_key(endpoint_key) {
                                        messages
                                            .unregistrations
                                            .push(builder.registry_message(endpoint, route));
                                    }
                                }
                            }
                        }
                        for route in &old_entry.internal_routes {
                            if !new_entry
                                .internal_routes
                                .iter()
                                .any(|r| r.hostname == route.hostname)
                            {
                                for (endpoint_key, endpoint) in &old_entry.endpoints {
                                    if new_entry.endpoints.contains_key(endpoint_key) {
                                        messages.internal_unregistrations.push(
                                            MessageBuilder::InternalEndpoint
                                                .registry_message(endpoint, route),
                                        );
                                    }
                                }
                            }
                        }
                    } else {
                        // Stale domain: nothing may be pruned, so the old
                        // state is folded into the incoming entry.
                        for (endpoint_key, endpoint) in &old_entry.endpoints {
                            new_entry
                                .endpoints
                                .entry(endpoint_key.clone())
                                .or_insert_with(|| endpoint.clone());
                        }
                        for route in &old_entry.routes {
                            if !new_entry.routes.iter().any(|r| r.hostname == route.hostname) {
                                new_entry.routes.push(route.clone());
                            }
                        }
                        for route in &old_entry.internal_routes {
                            if !new_entry
                                .internal_routes
                                .iter()
                                .any(|r| r.hostname == route.hostname)
                            {
                                new_entry.internal_routes.push(route.clone());
                            }
                        }
                    }
                }
            }
        }

        for (key, new_entry) in &merged {
            let old_entry = old_entries.get(key);
            for endpoint in new_entry.endpoints.values() {
                let endpoint_is_new =
                    old_entry.map_or(true, |o| !o.endpoints.contains_key(&endpoint.key()));
                let handoff = old_entry.is_some_and(|o| {
                    o.endpoints
                        .values()
                        .any(|e| e.instance_guid == endpoint.instance_guid)
                });
                if endpoint_is_new && handoff {
                    continue;
                }

                let mut registered = false;
                for route in &new_entry.routes {
                    let pair_existed =
                        !endpoint_is_new && old_entry.is_some_and(|o| o.routes.contains(route));
                    if !pair_existed {
                        messages
                            .registrations
                            .push(builder.registry_message(endpoint, route));
                        registered = true;
                    }
                }
                for route in &new_entry.internal_routes {
                    let pair_existed = !endpoint_is_new
                        && old_entry.is_some_and(|o| {
                            o.internal_routes
                                .iter()
                                .any(|r| r.hostname == route.hostname)
                        });
                    if !pair_existed {
                        messages.internal_registrations.push(
                            MessageBuilder::InternalEndpoint.registry_message(endpoint, route),
                        );
                        registered = true;
                    }
                }
                if registered && endpoint_is_new {
                    touched += 1;
                }
            }
        }

        self.entries = merged;
        self.rebuild_addresses();

        (touched, messages)
    }

    /// Heartbeat: registrations for every (endpoint × route) pair currently
    /// present. Idempotent by construction.
    pub fn emit(&self) -> MessagesToEmit {
        let mut messages = MessagesToEmit::default();
        for entry in self.entries.values() {
            for endpoint in entry.endpoints.values() {
                for route in &entry.routes {
                    messages
                        .registrations
                        .push(self.builder.registry_message(endpoint, route));
                }
                for route in &entry.internal_routes {
                    messages.internal_registrations.push(
                        MessageBuilder::InternalEndpoint.registry_message(endpoint, route),
                    );
                }
            }
        }
        messages
    }

    pub fn http_endpoint_count(&self) -> usize {
        self.entries.values().map(|e| e.endpoints.len()).sum()
    }

    pub fn route_count(&self) -> usize {
        self.entries.values().map(|e| e.routes.len()).sum()
    }

    /// Whether the table holds routes for any key of the process. Used to
    /// decide whether a running actual belongs to a process we have never
    /// seen a desired record for.
    pub fn has_routes_for_process(&self, process_guid: &str) -> bool {
        self.entries.iter().any(|(key, entry)| {
            key.process_guid == process_guid
                && (!entry.routes.is_empty() || !entry.internal_routes.is_empty())
        })
    }

    fn detect_collision(&self, endpoint: &Endpoint) {
        if endpoint.evacuating {
            return;
        }
        if let Some(owner) = self.addresses.get(&endpoint.address()) {
            if owner != &endpoint.instance_guid {
                warn!(
                    "routing-table: collision-detected-with-endpoint, host={}, port={}, instance_guid_a={}, instance_guid_b={}",
                    endpoint.host, endpoint.port, owner, endpoint.instance_guid
                );
            }
        }
    }

    fn release_address(&mut self, endpoint: &Endpoint) {
        if self
            .addresses
            .get(&endpoint.address())
            .is_some_and(|owner| owner == &endpoint.instance_guid)
        {
            self.addresses.remove(&endpoint.address());
        }
    }

    fn rebuild_addresses(&mut self) {
        self.addresses.clear();
        for entry in self.entries.values() {
            for endpoint in entry.endpoints.values() {
                self.addresses
                    .insert(endpoint.address(), endpoint.instance_guid.clone());
            }
        }
    }
}
