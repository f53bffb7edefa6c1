use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Optimistic write-ordering tag carried by every workload-store record.
///
/// `epoch` changes whenever the record is recreated; `index` increments on
/// every in-place update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationTag {
    #[serde(default)]
    pub epoch: String,
    #[serde(default)]
    pub index: u32,
}

impl ModificationTag {
    pub fn new(epoch: &str, index: u32) -> Self {
        Self {
            epoch: epoch.to_string(),
            index,
        }
    }

    /// Whether `other` is an acceptable replacement for `self`.
    ///
    /// True when either epoch is empty, when the epochs differ (a recreated
    /// record always supersedes), or when the epochs match and `other` has a
    /// strictly greater index. Equal tags are equal, not succeeding.
    pub fn succeeded_by(&self, other: &ModificationTag) -> bool {
        if self.epoch.is_empty() || other.epoch.is_empty() {
            return true;
        }
        self.epoch != other.epoch || other.index > self.index
    }
}

/// One host-side port mapping of a running instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u32,
    pub container_port: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_tls_proxy_port: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_tls_proxy_port: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActualLrpState {
    #[default]
    Unclaimed,
    Claimed,
    Running,
    Crashed,
}

/// A running (or transitioning) instance of a desired process on a cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActualLrp {
    pub process_guid: String,
    #[serde(default)]
    pub instance_guid: String,
    #[serde(default)]
    pub cell_id: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub index: i32,
    /// Node IP the instance's ports are NATed onto.
    #[serde(default)]
    pub address: String,
    /// IP of the instance's container.
    #[serde(default)]
    pub instance_address: String,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub state: ActualLrpState,
    #[serde(default)]
    pub evacuating: bool,
    #[serde(default)]
    pub modification_tag: ModificationTag,
}

impl ActualLrp {
    pub fn is_running(&self) -> bool {
        self.state == ActualLrpState::Running
    }
}

/// The declarative spec for a process, reduced to what routing needs:
/// identity, instance count, and the routing-info blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingInfo {
    pub process_guid: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub log_guid: String,
    #[serde(default)]
    pub instances: i32,
    /// Routing info keyed by schema (`cf-router`, `tcp-router`, ...). Keys the
    /// emitter does not understand are preserved untouched.
    #[serde(default)]
    pub routes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub modification_tag: ModificationTag,
}

/// Snapshot filter for actual LRPs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActualLrpFilter {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cell_id: String,
}

/// Snapshot filter for scheduling infos.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulingInfoFilter {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub process_guids: Vec<String>,
}

/// The authority domains marked fresh at sync time. Pruning during a table
/// swap is gated on membership.
#[derive(Debug, Clone, Default)]
pub struct DomainSet(HashSet<String>);

impl DomainSet {
    pub fn new(domains: Vec<String>) -> Self {
        Self(domains.into_iter().collect())
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.0.contains(domain)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A change-stream event from the workload store.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    DesiredCreated {
        desired: SchedulingInfo,
    },
    DesiredChanged {
        before: SchedulingInfo,
        after: SchedulingInfo,
    },
    DesiredRemoved {
        desired: SchedulingInfo,
    },
    ActualCreated {
        actual: ActualLrp,
    },
    ActualChanged {
        before: ActualLrp,
        after: ActualLrp,
    },
    ActualRemoved {
        actual: ActualLrp,
    },
    /// An event kind this emitter does not understand. Ignored without
    /// closing the subscription.
    Unknown {
        kind: String,
    },
}

impl Event {
    /// Parse a server-sent event by its type name.
    pub fn parse(kind: &str, data: &str) -> anyhow::Result<Event> {
        #[derive(Deserialize)]
        struct DesiredWrapper {
            desired_lrp: SchedulingInfo,
        }
        #[derive(Deserialize)]
        struct DesiredChangeWrapper {
            before: SchedulingInfo,
            after: SchedulingInfo,
        }
        #[derive(Deserialize)]
        struct ActualWrapper {
            actual_lrp: ActualLrp,
        }
        #[derive(Deserialize)]
        struct ActualChangeWrapper {
            before: ActualLrp,
            after: ActualLrp,
        }

        let event = match kind {
            "desired_lrp_created" => {
                let w: DesiredWrapper = serde_json::from_str(data)?;
                Event::DesiredCreated { desired: w.desired_lrp }
            }
            "desired_lrp_changed" => {
                let w: DesiredChangeWrapper = serde_json::from_str(data)?;
                Event::DesiredChanged {
                    before: w.before,
                    after: w.after,
                }
            }
            "desired_lrp_removed" => {
                let w: DesiredWrapper = serde_json::from_str(data)?;
                Event::DesiredRemoved { desired: w.desired_lrp }
            }
            "actual_lrp_created" => {
                let w: ActualWrapper = serde_json::from_str(data)?;
                Event::ActualCreated { actual: w.actual_lrp }
            }
            "actual_lrp_changed" => {
                let w: ActualChangeWrapper = serde_json::from_str(data)?;
                Event::ActualChanged {
                    before: w.before,
                    after: w.after,
                }
            }
            "actual_lrp_removed" => {
                let w: ActualWrapper = serde_json::from_str(data)?;
                Event::ActualRemoved { actual: w.actual_lrp }
            }
            other => Event::Unknown {
                kind: other.to_string(),
            },
        };
        Ok(event)
    }
}
