#[cfg(test)]
mod tests;

use crate::bbs::{ActualLrp, DomainSet, Event, SchedulingInfo};
use crate::emitter::{RegistryEmitter, TcpRouteEmitter};
use crate::routingtable::by_routing_key::routing_keys_from_actual;
use crate::routingtable::{
    MessageBuilder, MessagesToEmit, RoutingEvents, RoutingTable, TcpRoutingTable,
};
use std::collections::HashSet;
use tracing::{debug, error, info};

/// Applies change events and snapshot syncs to the routing tables and
/// forwards the resulting diffs to the emitters.
///
/// Never run concurrently with itself: the watcher's dispatcher serialises
/// every call.
pub struct RouteHandler<R: RegistryEmitter, T: TcpRouteEmitter> {
    table: RoutingTable,
    tcp_table: TcpRoutingTable,
    registry_emitter: R,
    tcp_emitter: T,
    /// When set, actual-LRP events from other cells are ignored.
    cell_id: String,
}

impl<R: RegistryEmitter, T: TcpRouteEmitter> RouteHandler<R, T> {
    pub fn new(builder: MessageBuilder, registry_emitter: R, tcp_emitter: T, cell_id: String) -> Self {
        Self {
            table: RoutingTable::new(builder),
            tcp_table: TcpRoutingTable::new(),
            registry_emitter,
            tcp_emitter,
            cell_id,
        }
    }

    /// Apply one change-stream event. Errors on this path are logged and
    /// swallowed; the stream must keep flowing.
    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::DesiredCreated { desired } => self.handle_desired_create(desired).await,
            Event::DesiredChanged { before, after } => {
                self.handle_desired_update(before, after).await
            }
            Event::DesiredRemoved { desired } => self.handle_desired_delete(desired).await,
            Event::ActualCreated { actual } => self.handle_actual_create(actual).await,
            Event::ActualChanged { before, after } => {
                self.handle_actual_update(before, after).await
            }
            Event::ActualRemoved { actual } => self.handle_actual_delete(actual).await,
            Event::Unknown { kind } => {
                debug!("handler: ignoring unrecognized event, kind={}", kind);
            }
        }
    }

    async fn handle_desired_create(&mut self, desired: SchedulingInfo) {
        debug!(
            "handler: desired-created, process_guid={}",
            desired.process_guid
        );
        let (_, messages) = self.table.set_routes(None, &desired);
        let (_, events) = self.tcp_table.set_routes(None, &desired);
        self.emit(messages, events).await;
    }

    async fn handle_desired_update(&mut self, before: SchedulingInfo, after: SchedulingInfo) {
        debug!(
            "handler: desired-changed, process_guid={}",
            after.process_guid
        );
        let (_, mut messages) = self.table.set_routes(Some(&before), &after);
        let (_, mut events) = self.tcp_table.set_routes(Some(&before), &after);

        // Scaling down: endpoints at or above the new instance count are no
        // longer desired and their routes must come down now, not at the
        // next sync.
        if after.instances < before.instances {
            let (_, overflow_messages) = self
                .table
                .remove_overflow_endpoints(&after.process_guid, after.instances);
            messages.merge(overflow_messages);
            let (_, overflow_events) = self
                .tcp_table
                .remove_overflow_endpoints(&after.process_guid, after.instances);
            events.extend(overflow_events);
        }

        self.emit(messages, events).await;
    }

    async fn handle_desired_delete(&mut self, desired: SchedulingInfo) {
        debug!(
            "handler: desired-removed, process_guid={}",
            desired.process_guid
        );
        let (_, messages) = self.table.remove_routes(&desired);
        let (_, events) = self.tcp_table.remove_routes(&desired);
        self.emit(messages, events).await;
    }

    fn from_another_cell(&self, actual: &ActualLrp) -> bool {
        !self.cell_id.is_empty() && actual.cell_id != self.cell_id
    }

    async fn handle_actual_create(&mut self, actual: ActualLrp) {
        if self.from_another_cell(&actual) {
            return;
        }
        if !actual.is_running() {
            return;
        }
        debug!(
            "handler: actual-created, process_guid={}, instance_guid={}, address={}",
            actual.process_guid, actual.instance_guid, actual.address
        );
        let (_, messages) = self.table.add_endpoint(&actual);
        let (_, events) = self.tcp_table.add_endpoint(&actual);
        self.emit(messages, events).await;
    }

    async fn handle_actual_update(&mut self, before: ActualLrp, after: ActualLrp) {
        if after.is_running() {
            if self.from_another_cell(&after) {
                return;
            }
            debug!(
                "handler: actual-changed, process_guid={}, instance_guid={}, address={}",
                after.process_guid, after.instance_guid, after.address
            );
            let (_, messages) = self.table.add_endpoint(&after);
            let (_, events) = self.tcp_table.add_endpoint(&after);
            self.emit(messages, events).await;
        } else if before.is_running() {
            if self.from_another_cell(&before) {
                return;
            }
            debug!(
                "handler: actual-left-running, process_guid={}, instance_guid={}",
                before.process_guid, before.instance_guid
            );
            let (_, messages) = self.table.remove_endpoint(&before);
            let (_, events) = self.tcp_table.remove_endpoint(&before);
            self.emit(messages, events).await;
        }
    }

    async fn handle_actual_delete(&mut self, actual: ActualLrp) {
        if self.from_another_cell(&actual) {
            return;
        }
        if !actual.is_running() {
            return;
        }
        debug!(
            "handler: actual-removed, process_guid={}, instance_guid={}",
            actual.process_guid, actual.instance_guid
        );
        let (_, messages) = self.table.remove_endpoint(&actual);
        let (_, events) = self.tcp_table.remove_endpoint(&actual);
        self.emit(messages, events).await;
    }

    /// Reconcile against an authoritative snapshot: build shadow tables from
    /// scratch, swap them in, and emit whatever changed.
    pub async fn sync(
        &mut self,
        desired: Vec<SchedulingInfo>,
        actuals: Vec<ActualLrp>,
        domains: DomainSet,
    ) {
        let mut shadow = RoutingTable::new(self.table.builder());
        let mut tcp_shadow = TcpRoutingTable::new();

        let desired_index: HashSet<String> =
            desired.iter().map(|d| d.process_guid.clone()).collect();

        for info in &desired {
            shadow.set_routes(None, info);
            tcp_shadow.set_routes(None, info);
        }
        for actual in &actuals {
            if !actual.is_running() {
                continue;
            }
            // Actuals whose process is absent from the snapshot's desired set
            // carry no routes and would only pollute the table.
            if !desired_index.contains(&actual.process_guid) {
                continue;
            }
            shadow.add_endpoint(actual);
            tcp_shadow.add_endpoint(actual);
        }

        let (_, messages) = self.table.swap(shadow, &domains);
        let (_, events) = self.tcp_table.swap(tcp_shadow, &domains);
        info!(
            "handler: sync complete, registrations={}, unregistrations={}, tcp_events={}",
            messages.route_registration_count(),
            messages.route_unregistration_count(),
            events.len()
        );
        self.emit(messages, events).await;
    }

    /// Heartbeat: re-assert every route currently in the tables.
    pub async fn emit_all(&mut self) {
        let messages = self.table.emit();
        let events = self.tcp_table.emit();
        self.emit(messages, events).await;
    }

    /// Whether a running actual belongs to a process the table has no routes
    /// for, meaning its scheduling info was outside our (cell-scoped)
    /// snapshot filter and must be fetched on demand.
    pub fn should_refresh_desired(&self, actual: &ActualLrp) -> bool {
        if routing_keys_from_actual(actual).is_empty() {
            return false;
        }
        !self.table.has_routes_for_process(&actual.process_guid)
            && !self
                .tcp_table
                .has_external_routes_for_process(&actual.process_guid)
    }

    /// Apply freshly fetched scheduling infos for processes discovered via
    /// `should_refresh_desired`.
    pub async fn refresh_desired(&mut self, desired: Vec<SchedulingInfo>) {
        let mut messages = MessagesToEmit::default();
        let mut events = RoutingEvents::new();
        for info in &desired {
            let (_, msgs) = self.table.set_routes(None, info);
            messages.merge(msgs);
            let (_, evs) = self.tcp_table.set_routes(None, info);
            events.extend(evs);
        }
        self.emit(messages, events).await;
    }

    pub fn route_count(&self) -> usize {
        self.table.route_count()
    }

    pub fn tcp_route_count(&self) -> usize {
        self.tcp_table.tcp_route_count()
    }

    pub fn http_endpoint_count(&self) -> usize {
        self.table.http_endpoint_count()
    }

    async fn emit(&self, messages: MessagesToEmit, events: RoutingEvents) {
        if !messages.is_empty() {
            self.registry_emitter.emit(messages).await;
        }
        if !events.is_empty() {
            if let Err(e) = self.tcp_emitter.emit(events).await {
                // The next sync re-asserts the mappings.
                error!("handler: tcp emit failed, error={}", e);
            }
        }
    }
}
