use crate::routingtable::{MessagesToEmit, RegistryMessage, RouterGreetingMessage};
use bytes::Bytes;
use futures_util::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, info};

const REGISTER_SUBJECT: &str = "router.register";
const UNREGISTER_SUBJECT: &str = "router.unregister";
const INTERNAL_REGISTER_SUBJECT: &str = "service-discovery.register";
const INTERNAL_UNREGISTER_SUBJECT: &str = "service-discovery.unregister";
const GREET_SUBJECT: &str = "router.greet";

/// Worker tasks draining the publish queue. Bounded so one slow subject
/// cannot block the dispatcher.
const PUBLISH_WORKERS: usize = 8;
const PUBLISH_QUEUE_DEPTH: usize = 4096;

/// The HTTP-router sink. Seamed as a trait so the handler can be driven by a
/// recording fake in tests.
pub trait RegistryEmitter: Clone + Send + Sync + 'static {
    fn emit(&self, messages: MessagesToEmit) -> impl Future<Output = ()> + Send;
}

struct PublishJob {
    subject: &'static str,
    payload: Bytes,
}

/// Publishes registration/unregistration messages onto the pub/sub bus.
/// Publishing is fire-and-forget: jobs are fanned out over a bounded worker
/// pool and failures are logged, never surfaced. The next heartbeat
/// re-asserts the state.
#[derive(Clone)]
pub struct NatsEmitter {
    tx: mpsc::Sender<PublishJob>,
}

impl NatsEmitter {
    pub fn new(client: async_nats::Client) -> Self {
        let (tx, rx) = mpsc::channel::<PublishJob>(PUBLISH_QUEUE_DEPTH);
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..PUBLISH_WORKERS {
            let client = client.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else {
                        debug!("nats-emitter: publish queue closed, worker={}", worker);
                        return;
                    };
                    if let Err(e) = client.publish(job.subject, job.payload).await {
                        error!(
                            "nats-emitter: publish failed, subject={}, error={}",
                            job.subject, e
                        );
                    }
                }
            });
        }

        Self { tx }
    }

    async fn enqueue(&self, subject: &'static str, messages: &[RegistryMessage]) {
        for message in messages {
            let payload = match serde_json::to_vec(message) {
                Ok(payload) => Bytes::from(payload),
                Err(e) => {
                    error!("nats-emitter: encode failed, subject={}, error={}", subject, e);
                    continue;
                }
            };
            if self
                .tx
                .send(PublishJob { subject, payload })
                .await
                .is_err()
            {
                error!("nats-emitter: publish queue closed, subject={}", subject);
                return;
            }
        }
    }
}

impl RegistryEmitter for NatsEmitter {
    fn emit(&self, messages: MessagesToEmit) -> impl Future<Output = ()> + Send {
        let emitter = self.clone();
        async move {
            metrics::counter!("RoutesRegistered").increment(messages.route_registration_count());
            metrics::counter!("RoutesUnregistered")
                .increment(messages.route_unregistration_count());

            emitter
                .enqueue(REGISTER_SUBJECT, &messages.registrations)
                .await;
            emitter
                .enqueue(UNREGISTER_SUBJECT, &messages.unregistrations)
                .await;
            emitter
                .enqueue(INTERNAL_REGISTER_SUBJECT, &messages.internal_registrations)
                .await;
            emitter
                .enqueue(
                    INTERNAL_UNREGISTER_SUBJECT,
                    &messages.internal_unregistrations,
                )
                .await;
        }
    }
}

/// Reply to `router.greet` requests with this emitter's registration
/// cadence, until shutdown is signalled.
pub fn spawn_greet_responder(
    client: async_nats::Client,
    greeting: RouterGreetingMessage,
    shutdown: Arc<Notify>,
) {
    tokio::spawn(async move {
        let mut subscription = match client.subscribe(GREET_SUBJECT).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("nats-emitter: greet subscription failed, error={}", e);
                return;
            }
        };
        info!("nats-emitter: greet responder started, subject={}", GREET_SUBJECT);

        let payload = match serde_json::to_vec(&greeting) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                error!("nats-emitter: greet encode failed, error={}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                message = subscription.next() => {
                    let Some(message) = message else {
                        error!("nats-emitter: greet subscription closed");
                        return;
                    };
                    if let Some(reply) = message.reply {
                        if let Err(e) = client.publish(reply, payload.clone()).await {
                            error!("nats-emitter: greet reply failed, error={}", e);
                        }
                    }
                }
                _ = shutdown.notified() => {
                    debug!("nats-emitter: greet responder shutting down");
                    return;
                }
            }
        }
    });
}
