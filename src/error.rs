use std::fmt;

#[derive(Debug)]
#[allow(dead_code)]
pub enum EmitterError {
    Bbs(String),
    Nats(String),
    RoutingApi(String),
    Config(String),
    SubscriptionLost(String),
    Internal(String),
}

impl fmt::Display for EmitterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmitterError::Bbs(msg) => write!(f, "bbs error: {}", msg),
            EmitterError::Nats(msg) => write!(f, "nats error: {}", msg),
            EmitterError::RoutingApi(msg) => write!(f, "routing api error: {}", msg),
            EmitterError::Config(msg) => write!(f, "config error: {}", msg),
            EmitterError::SubscriptionLost(msg) => write!(f, "event subscription lost: {}", msg),
            EmitterError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for EmitterError {}
