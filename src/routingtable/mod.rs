pub mod by_routing_key;
pub mod endpoint;
pub mod http_table;
pub mod message;
pub mod tcp_table;


pub use endpoint::{
    endpoints_from_actual, Address, Endpoint, EndpointKey, ExternalEndpoint, RoutableEndpoints,
    Route, RoutingKey, TcpRoutableEndpoints,
};
pub use http_table::RoutingTable;
pub use message::{MessageBuilder, MessagesToEmit, RegistryMessage, RouterGreetingMessage};
pub use tcp_table::{RoutingEvent, RoutingEventKind, RoutingEvents, TcpRoutingTable};
