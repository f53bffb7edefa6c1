use super::models::*;
use super::routes;

fn scheduling_info_with_routes(blob: serde_json::Value) -> SchedulingInfo {
    SchedulingInfo {
        process_guid: "process-guid-1".to_string(),
        domain: "fresh-domain".to_string(),
        log_guid: "log-guid-1".to_string(),
        instances: 3,
        routes: serde_json::from_value(blob).unwrap(),
        modification_tag: ModificationTag::new("abc", 1),
    }
}

#[test]
fn modification_tag_ordering() {
    let current = ModificationTag::new("abc", 1);
    let older = ModificationTag::new("abc", 0);
    let newer_same_epoch = ModificationTag::new("abc", 2);
    let other_epoch = ModificationTag::new("def", 0);
    let empty = ModificationTag::default();

    assert!(!current.succeeded_by(&older));
    assert!(!current.succeeded_by(&current.clone()));
    assert!(current.succeeded_by(&newer_same_epoch));
    assert!(current.succeeded_by(&other_epoch));
    assert!(current.succeeded_by(&empty));
    assert!(empty.succeeded_by(&current));
}

#[test]
fn cf_routes_parsed_from_blob() {
    let info = scheduling_info_with_routes(serde_json::json!({
        "cf-router": [
            {
                "hostnames": ["foo.example.com", "bar.example.com"],
                "port": 8080,
                "route_service_url": "https://rs.example.com"
            },
            { "hostnames": ["baz.example.com"], "port": 9090 }
        ],
        "diego-ssh": { "container_port": 2222, "private_key": "---" }
    }));

    let routes = routes::cf_routes_from(&info).unwrap();
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0].hostnames.len(), 2);
    assert_eq!(routes[0].port, 8080);
    assert_eq!(routes[0].route_service_url, "https://rs.example.com");
    assert_eq!(routes[1].port, 9090);
    assert_eq!(routes[1].route_service_url, "");
}

#[test]
fn tcp_routes_parsed_from_blob() {
    let info = scheduling_info_with_routes(serde_json::json!({
        "tcp-router": [
            { "router_group_guid": "rg-1", "external_port": 61000, "container_port": 8080 }
        ]
    }));

    let routes = routes::tcp_routes_from(&info).unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].router_group_guid, "rg-1");
    assert_eq!(routes[0].external_port, 61000);
    assert_eq!(routes[0].container_port, 8080);
}

#[test]
fn missing_schema_key_yields_no_routes() {
    let info = scheduling_info_with_routes(serde_json::json!({
        "diego-ssh": { "container_port": 2222 }
    }));
    assert!(routes::cf_routes_from(&info).unwrap().is_empty());
    assert!(routes::tcp_routes_from(&info).unwrap().is_empty());
    assert!(routes::internal_routes_from(&info).unwrap().is_empty());
}

#[test]
fn null_schema_value_yields_no_routes() {
    let info = scheduling_info_with_routes(serde_json::json!({ "cf-router": null }));
    assert!(routes::cf_routes_from(&info).unwrap().is_empty());
}

#[test]
fn malformed_schema_value_is_an_error() {
    let info = scheduling_info_with_routes(serde_json::json!({
        "cf-router": { "not": "a list" }
    }));
    assert!(routes::cf_routes_from(&info).is_err());
}

#[test]
fn domain_set_membership() {
    let domains = DomainSet::new(vec!["fresh-domain".to_string()]);
    assert!(domains.contains("fresh-domain"));
    assert!(!domains.contains("stale-domain"));
    assert!(DomainSet::default().is_empty());
}

#[test]
fn parse_actual_lrp_created_event() {
    let data = serde_json::json!({
        "actual_lrp": {
            "process_guid": "process-guid-1",
            "instance_guid": "instance-guid-1",
            "cell_id": "cell-1",
            "domain": "fresh-domain",
            "index": 0,
            "address": "1.1.1.1",
            "instance_address": "1.2.3.4",
            "ports": [{ "host_port": 11, "container_port": 8080 }],
            "state": "RUNNING",
            "evacuating": false,
            "modification_tag": { "epoch": "abc", "index": 1 }
        }
    });

    let event = Event::parse("actual_lrp_created", &data.to_string()).unwrap();
    match event {
        Event::ActualCreated { actual } => {
            assert_eq!(actual.instance_guid, "instance-guid-1");
            assert!(actual.is_running());
            assert_eq!(actual.ports[0].host_port, 11);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn parse_desired_lrp_changed_event() {
    let data = serde_json::json!({
        "before": { "process_guid": "p1", "instances": 3 },
        "after": { "process_guid": "p1", "instances": 1 }
    });

    let event = Event::parse("desired_lrp_changed", &data.to_string()).unwrap();
    match event {
        Event::DesiredChanged { before, after } => {
            assert_eq!(before.instances, 3);
            assert_eq!(after.instances, 1);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn unknown_event_kind_is_preserved() {
    let event = Event::parse("task_created", "{}").unwrap();
    assert_eq!(
        event,
        Event::Unknown {
            kind: "task_created".to_string()
        }
    );
}
