use super::RouteHandler;
use crate::bbs::{
    ActualLrp, ActualLrpState, DomainSet, Event, ModificationTag, PortMapping, SchedulingInfo,
};
use crate::emitter::{RegistryEmitter, TcpRouteEmitter};
use crate::routingtable::{MessageBuilder, MessagesToEmit, RoutingEvents};
use std::future::Future;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct FakeRegistryEmitter {
    batches: Arc<Mutex<Vec<MessagesToEmit>>>,
}

impl FakeRegistryEmitter {
    fn batches(&self) -> Vec<MessagesToEmit> {
        self.batches.lock().unwrap().clone()
    }

    fn registrations(&self) -> Vec<String> {
        self.batches()
            .iter()
            .flat_map(|b| b.registrations.iter())
            .flat_map(|m| m.uris.clone())
            .collect()
    }

    fn unregistrations(&self) -> Vec<String> {
        self.batches()
            .iter()
            .flat_map(|b| b.unregistrations.iter())
            .flat_map(|m| m.uris.clone())
            .collect()
    }
}

impl RegistryEmitter for FakeRegistryEmitter {
    fn emit(&self, messages: MessagesToEmit) -> impl Future<Output = ()> + Send {
        let batches = self.batches.clone();
        async move {
            batches.lock().unwrap().push(messages);
        }
    }
}

#[derive(Clone, Default)]
struct FakeTcpEmitter {
    batches: Arc<Mutex<Vec<RoutingEvents>>>,
    fail: Arc<Mutex<bool>>,
}

impl FakeTcpEmitter {
    fn batches(&self) -> Vec<RoutingEvents> {
        self.batches.lock().unwrap().clone()
    }
}

impl TcpRouteEmitter for FakeTcpEmitter {
    fn emit(&self, events: RoutingEvents) -> impl Future<Output = anyhow::Result<()>> + Send {
        let batches = self.batches.clone();
        let fail = self.fail.clone();
        async move {
            batches.lock().unwrap().push(events);
            if *fail.lock().unwrap() {
                anyhow::bail!("routing api unavailable");
            }
            Ok(())
        }
    }
}

fn handler(
    cell_id: &str,
) -> (
    RouteHandler<FakeRegistryEmitter, FakeTcpEmitter>,
    FakeRegistryEmitter,
    FakeTcpEmitter,
) {
    let registry = FakeRegistryEmitter::default();
    let tcp = FakeTcpEmitter::default();
    let handler = RouteHandler::new(
        MessageBuilder::HostPort,
        registry.clone(),
        tcp.clone(),
        cell_id.to_string(),
    );
    (handler, registry, tcp)
}

fn tag(index: u32) -> ModificationTag {
    ModificationTag::new("abc", index)
}

fn desired(process_guid: &str, hostnames: &[&str], tag: ModificationTag) -> SchedulingInfo {
    desired_with_instances(process_guid, hostnames, tag, 3)
}

fn desired_with_instances(
    process_guid: &str,
    hostnames: &[&str],
    tag: ModificationTag,
    instances: i32,
) -> SchedulingInfo {
    SchedulingInfo {
        process_guid: process_guid.to_string(),
        domain: "fresh-domain".to_string(),
        log_guid: "log-guid".to_string(),
        instances,
        routes: [(
            "cf-router".to_string(),
            serde_json::json!([{ "hostnames": hostnames, "port": 8080 }]),
        )]
        .into_iter()
        .collect(),
        modification_tag: tag,
    }
}

fn desired_tcp(process_guid: &str, external_port: u32, tag: ModificationTag) -> SchedulingInfo {
    SchedulingInfo {
        process_guid: process_guid.to_string(),
        domain: "fresh-domain".to_string(),
        log_guid: "log-guid".to_string(),
        instances: 3,
        routes: [(
            "tcp-router".to_string(),
            serde_json::json!([{
                "router_group_guid": "rg-1",
                "external_port": external_port,
                "container_port": 8080,
            }]),
        )]
        .into_iter()
        .collect(),
        modification_tag: tag,
    }
}

fn actual(process_guid: &str, instance_guid: &str, index: i32, state: ActualLrpState) -> ActualLrp {
    ActualLrp {
        process_guid: process_guid.to_string(),
        instance_guid: instance_guid.to_string(),
        cell_id: "cell-1".to_string(),
        domain: "fresh-domain".to_string(),
        index,
        address: "1.1.1.1".to_string(),
        instance_address: "1.2.3.4".to_string(),
        ports: vec![PortMapping {
            host_port: 21 + index as u32,
            container_port: 8080,
            host_tls_proxy_port: None,
            container_tls_proxy_port: None,
        }],
        state,
        evacuating: false,
        modification_tag: tag(1),
    }
}

fn running(process_guid: &str, instance_guid: &str, index: i32) -> ActualLrp {
    actual(process_guid, instance_guid, index, ActualLrpState::Running)
}

#[tokio::test]
async fn desired_then_actual_registers_routes() {
    let (mut handler, registry, _) = handler("");

    handler
        .handle_event(Event::DesiredCreated {
            desired: desired("p-1", &["foo.example.com"], tag(1)),
        })
        .await;
    assert!(registry.batches().is_empty());

    handler
        .handle_event(Event::ActualCreated {
            actual: running("p-1", "ig-1", 0),
        })
        .await;
    assert_eq!(registry.registrations(), vec!["foo.example.com".to_string()]);
}

#[tokio::test]
async fn non_running_actual_is_ignored() {
    let (mut handler, registry, _) = handler("");

    handler
        .handle_event(Event::DesiredCreated {
            desired: desired("p-1", &["foo.example.com"], tag(1)),
        })
        .await;
    handler
        .handle_event(Event::ActualCreated {
            actual: actual("p-1", "ig-1", 0, ActualLrpState::Claimed),
        })
        .await;
    assert!(registry.batches().is_empty());
}

#[tokio::test]
async fn transition_out_of_running_unregisters() {
    let (mut handler, registry, _) = handler("");

    handler
        .handle_event(Event::DesiredCreated {
            desired: desired("p-1", &["foo.example.com"], tag(1)),
        })
        .await;
    handler
        .handle_event(Event::ActualCreated {
            actual: running("p-1", "ig-1", 0),
        })
        .await;

    handler
        .handle_event(Event::ActualChanged {
            before: running("p-1", "ig-1", 0),
            after: actual("p-1", "ig-1", 0, ActualLrpState::Crashed),
        })
        .await;
    assert_eq!(
        registry.unregistrations(),
        vec!["foo.example.com".to_string()]
    );
}

#[tokio::test]
async fn transition_that_never_touches_running_is_ignored() {
    let (mut handler, registry, _) = handler("");

    handler
        .handle_event(Event::DesiredCreated {
            desired: desired("p-1", &["foo.example.com"], tag(1)),
        })
        .await;
    handler
        .handle_event(Event::ActualChanged {
            before: actual("p-1", "ig-1", 0, ActualLrpState::Unclaimed),
            after: actual("p-1", "ig-1", 0, ActualLrpState::Claimed),
        })
        .await;
    assert!(registry.batches().is_empty());
}

#[tokio::test]
async fn actual_events_from_other_cells_are_ignored() {
    let (mut handler, registry, _) = handler("cell-2");

    handler
        .handle_event(Event::DesiredCreated {
            desired: desired("p-1", &["foo.example.com"], tag(1)),
        })
        .await;
    handler
        .handle_event(Event::ActualCreated {
            actual: running("p-1", "ig-1", 0), // cell-1
        })
        .await;
    assert!(registry.batches().is_empty());
}

#[tokio::test]
async fn desired_removed_unregisters_everything() {
    let (mut handler, registry, _) = handler("");

    handler
        .handle_event(Event::DesiredCreated {
            desired: desired("p-1", &["foo.example.com", "bar.example.com"], tag(1)),
        })
        .await;
    handler
        .handle_event(Event::ActualCreated {
            actual: running("p-1", "ig-1", 0),
        })
        .await;

    handler
        .handle_event(Event::DesiredRemoved {
            desired: desired("p-1", &["foo.example.com", "bar.example.com"], tag(2)),
        })
        .await;

    let mut unregistered = registry.unregistrations();
    unregistered.sort();
    assert_eq!(
        unregistered,
        vec!["bar.example.com".to_string(), "foo.example.com".to_string()]
    );
}

#[tokio::test]
async fn desired_change_scaling_down_unregisters_overflow_instances() {
    let (mut handler, registry, _) = handler("");

    handler
        .handle_event(Event::DesiredCreated {
            desired: desired_with_instances("p-1", &["foo.example.com"], tag(1), 2),
        })
        .await;
    handler
        .handle_event(Event::ActualCreated {
            actual: running("p-1", "ig-0", 0),
        })
        .await;
    handler
        .handle_event(Event::ActualCreated {
            actual: running("p-1", "ig-1", 1),
        })
        .await;

    handler
        .handle_event(Event::DesiredChanged {
            before: desired_with_instances("p-1", &["foo.example.com"], tag(1), 2),
            after: desired_with_instances("p-1", &["foo.example.com"], tag(2), 1),
        })
        .await;

    assert_eq!(
        registry.unregistrations(),
        vec!["foo.example.com".to_string()]
    );
    assert_eq!(handler.http_endpoint_count(), 1);
}

#[tokio::test]
async fn unknown_schema_keys_are_tolerated() {
    let (mut handler, registry, _) = handler("");

    let mut info = desired("p-1", &["foo.example.com"], tag(1));
    info.routes.insert(
        "diego-ssh".to_string(),
        serde_json::json!({ "container_port": 2222, "private_key": "---" }),
    );
    handler
        .handle_event(Event::DesiredCreated { desired: info })
        .await;
    handler
        .handle_event(Event::ActualCreated {
            actual: running("p-1", "ig-1", 0),
        })
        .await;
    assert_eq!(registry.registrations(), vec!["foo.example.com".to_string()]);
}

#[tokio::test]
async fn unknown_events_are_ignored() {
    let (mut handler, registry, tcp) = handler("");
    handler
        .handle_event(Event::Unknown {
            kind: "task_created".to_string(),
        })
        .await;
    assert!(registry.batches().is_empty());
    assert!(tcp.batches().is_empty());
}

#[tokio::test]
async fn tcp_routes_flow_to_the_tcp_emitter() {
    let (mut handler, _, tcp) = handler("");

    handler
        .handle_event(Event::DesiredCreated {
            desired: desired_tcp("p-1", 61000, tag(1)),
        })
        .await;
    handler
        .handle_event(Event::ActualCreated {
            actual: running("p-1", "ig-1", 0),
        })
        .await;

    let batches = tcp.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[0][0].external_endpoints[0].port, 61000);
}

#[tokio::test]
async fn tcp_emitter_errors_are_swallowed() {
    let (mut handler, _, tcp) = handler("");
    *tcp.fail.lock().unwrap() = true;

    handler
        .handle_event(Event::DesiredCreated {
            desired: desired_tcp("p-1", 61000, tag(1)),
        })
        .await;
    handler
        .handle_event(Event::ActualCreated {
            actual: running("p-1", "ig-1", 0),
        })
        .await;
    // No panic, and the handler keeps processing further events.
    handler
        .handle_event(Event::ActualRemoved {
            actual: running("p-1", "ig-1", 0),
        })
        .await;
    assert_eq!(tcp.batches().len(), 2);
}

#[tokio::test]
async fn sync_swaps_in_the_snapshot() {
    let (mut handler, registry, _) = handler("");

    handler
        .sync(
            vec![desired("p-1", &["foo.example.com"], tag(1))],
            vec![running("p-1", "ig-1", 0)],
            DomainSet::new(vec!["fresh-domain".to_string()]),
        )
        .await;
    assert_eq!(registry.registrations(), vec!["foo.example.com".to_string()]);

    // An identical snapshot produces no further messages.
    handler
        .sync(
            vec![desired("p-1", &["foo.example.com"], tag(1))],
            vec![running("p-1", "ig-1", 0)],
            DomainSet::new(vec!["fresh-domain".to_string()]),
        )
        .await;
    assert_eq!(registry.batches().len(), 1);
}

#[tokio::test]
async fn sync_skips_actuals_without_a_desired_record() {
    let (mut handler, _registry, _) = handler("");

    handler
        .sync(
            vec![desired("p-1", &["foo.example.com"], tag(1))],
            vec![running("p-1", "ig-1", 0), running("p-orphan", "ig-9", 0)],
            DomainSet::new(vec!["fresh-domain".to_string()]),
        )
        .await;
    assert_eq!(handler.http_endpoint_count(), 1);
}

#[tokio::test]
async fn sync_then_replayed_removal_never_leaves_the_endpoint_registered() {
    let (mut handler, registry, _) = handler("");

    // Snapshot still contains the endpoint that was removed mid-sync.
    handler
        .sync(
            vec![desired("p-1", &["foo.example.com"], tag(1))],
            vec![running("p-1", "ig-2", 0)],
            DomainSet::new(vec!["fresh-domain".to_string()]),
        )
        .await;

    // The buffered removal replays after the swap.
    handler
        .handle_event(Event::ActualRemoved {
            actual: running("p-1", "ig-2", 0),
        })
        .await;

    assert_eq!(registry.registrations(), vec!["foo.example.com".to_string()]);
    assert_eq!(
        registry.unregistrations(),
        vec!["foo.example.com".to_string()]
    );
    assert_eq!(handler.http_endpoint_count(), 0);
}

#[tokio::test]
async fn emit_all_re_asserts_current_state() {
    let (mut handler, registry, _) = handler("");

    handler
        .sync(
            vec![desired("p-1", &["foo.example.com"], tag(1))],
            vec![running("p-1", "ig-1", 0)],
            DomainSet::new(vec!["fresh-domain".to_string()]),
        )
        .await;

    handler.emit_all().await;
    handler.emit_all().await;

    let batches = registry.batches();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[1], batches[2]);
}

#[tokio::test]
async fn refresh_desired_round_trip() {
    let (mut handler, registry, _) = handler("cell-1");

    let unknown = running("p-unknown", "ig-1", 0);
    assert!(handler.should_refresh_desired(&unknown));

    handler
        .refresh_desired(vec![desired("p-unknown", &["late.example.com"], tag(1))])
        .await;
    assert!(!handler.should_refresh_desired(&unknown));

    // The endpoint that triggered the refresh now registers.
    handler
        .handle_event(Event::ActualCreated { actual: unknown })
        .await;
    assert_eq!(registry.registrations(), vec!["late.example.com".to_string()]);
}

#[tokio::test]
async fn should_refresh_desired_is_false_without_port_mappings() {
    let (handler, _, _) = handler("cell-1");
    let mut no_ports = running("p-unknown", "ig-1", 0);
    no_ports.ports.clear();
    assert!(!handler.should_refresh_desired(&no_ports));
}
