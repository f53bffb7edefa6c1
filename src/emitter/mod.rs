pub mod nats_emitter;
pub mod routing_api;

#[cfg(test)]
mod tests;

pub use nats_emitter::{spawn_greet_responder, NatsEmitter, RegistryEmitter};
pub use routing_api::{RoutingApiClient, TcpRouteEmitter, TcpRouteMapping, TcpRoutingApiEmitter};
