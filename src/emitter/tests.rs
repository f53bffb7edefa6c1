use super::routing_api::TcpRoutingApiEmitter;
use crate::routingtable::{
    Endpoint, ExternalEndpoint, RoutingEvent, RoutingEventKind, RoutingKey,
};
use crate::bbs::ModificationTag;

fn endpoint(host: &str, port: u32, container_ip: &str, container_port: u32) -> Endpoint {
    Endpoint {
        instance_guid: "ig-1".to_string(),
        index: 0,
        host: host.to_string(),
        container_ip: container_ip.to_string(),
        domain: "domain".to_string(),
        port,
        container_port,
        tls_proxy_port: None,
        container_tls_proxy_port: None,
        evacuating: false,
        modification_tag: ModificationTag::new("abc", 1),
    }
}

fn event(kind: RoutingEventKind, external_port: u32, endpoints: Vec<Endpoint>) -> RoutingEvent {
    RoutingEvent {
        kind,
        key: RoutingKey::new("process-guid-1", 8080),
        external_endpoints: vec![ExternalEndpoint {
            router_group_guid: "rg-1".to_string(),
            port: external_port,
        }],
        endpoints,
    }
}

fn emitter(direct: bool) -> TcpRoutingApiEmitter {
    let client = super::routing_api::RoutingApiClient::new(
        "http://routing-api.internal:3000",
        std::time::Duration::from_secs(5),
    )
    .unwrap();
    TcpRoutingApiEmitter::new(client, 120, direct)
}

#[test]
fn mapping_requests_split_upserts_and_deletes() {
    let events = vec![
        event(
            RoutingEventKind::Registration,
            61000,
            vec![endpoint("1.1.1.1", 22, "1.2.3.4", 8080)],
        ),
        event(
            RoutingEventKind::Unregistration,
            62000,
            vec![endpoint("2.2.2.2", 33, "2.3.4.5", 8080)],
        ),
    ];

    let (upserts, deletes) = emitter(false).mapping_requests(&events);
    assert_eq!(upserts.len(), 1);
    assert_eq!(deletes.len(), 1);

    assert_eq!(upserts[0].router_group_guid, "rg-1");
    assert_eq!(upserts[0].external_port, 61000);
    assert_eq!(upserts[0].host, "1.1.1.1");
    assert_eq!(upserts[0].port, 22);
    assert_eq!(upserts[0].ttl, 120);

    assert_eq!(deletes[0].external_port, 62000);
    assert_eq!(deletes[0].host, "2.2.2.2");
}

#[test]
fn mapping_requests_use_container_address_when_configured() {
    let events = vec![event(
        RoutingEventKind::Registration,
        61000,
        vec![endpoint("1.1.1.1", 22, "1.2.3.4", 8080)],
    )];

    let (upserts, _) = emitter(true).mapping_requests(&events);
    assert_eq!(upserts[0].host, "1.2.3.4");
    assert_eq!(upserts[0].port, 8080);
}

#[test]
fn invalid_events_are_filtered_but_the_batch_proceeds() {
    let events = vec![
        // Zero external port: invalid.
        event(
            RoutingEventKind::Registration,
            0,
            vec![endpoint("1.1.1.1", 22, "1.2.3.4", 8080)],
        ),
        // No endpoints: invalid.
        event(RoutingEventKind::Registration, 61000, vec![]),
        // Valid.
        event(
            RoutingEventKind::Registration,
            61000,
            vec![endpoint("1.1.1.1", 22, "1.2.3.4", 8080)],
        ),
    ];

    let (upserts, deletes) = emitter(false).mapping_requests(&events);
    assert_eq!(upserts.len(), 1);
    assert!(deletes.is_empty());
}

#[test]
fn cross_product_of_externals_and_endpoints() {
    let mut event = event(
        RoutingEventKind::Registration,
        61000,
        vec![
            endpoint("1.1.1.1", 22, "1.2.3.4", 8080),
            endpoint("2.2.2.2", 33, "2.3.4.5", 8080),
        ],
    );
    event.external_endpoints.push(ExternalEndpoint {
        router_group_guid: "rg-1".to_string(),
        port: 61001,
    });

    let (upserts, _) = emitter(false).mapping_requests(&vec![event]);
    assert_eq!(upserts.len(), 4);
}

#[test]
fn disabled_emitter_is_a_no_op() {
    use super::routing_api::TcpRouteEmitter;

    let events = vec![event(
        RoutingEventKind::Registration,
        61000,
        vec![endpoint("1.1.1.1", 22, "1.2.3.4", 8080)],
    )];
    let result = tokio_test::block_on(TcpRoutingApiEmitter::disabled().emit(events));
    assert!(result.is_ok());
}
