pub mod client;
pub mod models;
pub mod routes;

#[cfg(test)]
mod tests;

pub use client::{BbsClient, EventSource, EventSubscriber, WorkloadSnapshots};
pub use models::{
    ActualLrp, ActualLrpFilter, ActualLrpState, DomainSet, Event, ModificationTag, PortMapping,
    SchedulingInfo, SchedulingInfoFilter,
};
