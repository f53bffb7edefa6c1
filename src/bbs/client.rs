use super::models::{
    ActualLrp, ActualLrpFilter, Event, SchedulingInfo, SchedulingInfoFilter,
};
use crate::error::EmitterError;
use bytes::BytesMut;
use futures_util::StreamExt;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error};

/// Authoritative snapshot reads against the workload store. Seamed as a trait
/// so the watcher and handler can be driven by an in-memory store in tests.
pub trait WorkloadSnapshots: Clone + Send + Sync + 'static {
    fn actual_lrps(
        &self,
        filter: ActualLrpFilter,
    ) -> impl Future<Output = anyhow::Result<Vec<ActualLrp>>> + Send;

    fn scheduling_infos(
        &self,
        filter: SchedulingInfoFilter,
    ) -> impl Future<Output = anyhow::Result<Vec<SchedulingInfo>>> + Send;

    /// Fetch the scheduling info for a single process. `None` when the
    /// process is unknown to the store.
    fn scheduling_info(
        &self,
        process_guid: String,
    ) -> impl Future<Output = anyhow::Result<Option<SchedulingInfo>>> + Send;

    fn domains(&self) -> impl Future<Output = anyhow::Result<Vec<String>>> + Send;
}

/// An open change-stream subscription.
pub trait EventSource: Send + 'static {
    /// The next event, an error for a decode/transport fault, or `None` when
    /// the stream has ended and the caller should resubscribe.
    fn next_event(&mut self) -> impl Future<Output = Option<anyhow::Result<Event>>> + Send;
}

/// Factory for change-stream subscriptions.
pub trait EventSubscriber: Clone + Send + Sync + 'static {
    type Stream: EventSource;

    fn subscribe(&self) -> impl Future<Output = anyhow::Result<Self::Stream>> + Send;
}

/// Workload-store HTTP/JSON client (gRPC-gateway style endpoints, avoiding a
/// protoc dependency). Snapshots are plain POSTs; the change stream is
/// server-sent events parsed incrementally off the response body.
///
/// Cheaply cloneable; the underlying `reqwest::Client` is an `Arc`
/// internally.
#[derive(Clone)]
pub struct BbsClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ActualLrpsResponse {
    #[serde(default)]
    actual_lrps: Vec<ActualLrp>,
}

#[derive(Deserialize)]
struct SchedulingInfosResponse {
    #[serde(default)]
    desired_lrp_scheduling_infos: Vec<SchedulingInfo>,
}

#[derive(Deserialize)]
struct SchedulingInfoResponse {
    desired_lrp_scheduling_info: Option<SchedulingInfo>,
}

#[derive(Deserialize)]
struct DomainsResponse {
    #[serde(default)]
    domains: Vec<String>,
}

#[derive(serde::Serialize)]
struct SchedulingInfoRequest<'a> {
    process_guid: &'a str,
}

impl BbsClient {
    pub fn new(address: &str, timeout: Duration) -> anyhow::Result<Self> {
        if address.is_empty() {
            anyhow::bail!("bbs address cannot be empty");
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base_url: address.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.http.post(&url).json(body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(
                EmitterError::Bbs(format!("{} returned {}: {}", path, status, text)).into(),
            );
        }
        Ok(resp)
    }

    /// Open the change stream. The returned stream lives until the server
    /// closes it or a transport error occurs; reconnecting is the caller's
    /// job.
    pub async fn subscribe_to_events(&self) -> anyhow::Result<BbsEventStream> {
        let url = format!("{}/v1/events", self.base_url);
        // The event stream must outlive the snapshot timeout, so it uses a
        // dedicated client without a total-request deadline.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        let resp = http
            .get(&url)
            .header("accept", "text/event-stream")
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("bbs event subscription returned {}", resp.status());
        }
        debug!("bbs: event stream opened, url={}", url);
        Ok(BbsEventStream {
            stream: Box::pin(resp.bytes_stream()),
            buf: BytesMut::with_capacity(4096),
        })
    }
}

impl WorkloadSnapshots for BbsClient {
    fn actual_lrps(
        &self,
        filter: ActualLrpFilter,
    ) -> impl Future<Output = anyhow::Result<Vec<ActualLrp>>> + Send {
        let client = self.clone();
        async move {
            let resp: ActualLrpsResponse = client
                .post_json("/v1/actual_lrps/list", &filter)
                .await?
                .json()
                .await?;
            Ok(resp.actual_lrps)
        }
    }

    fn scheduling_infos(
        &self,
        filter: SchedulingInfoFilter,
    ) -> impl Future<Output = anyhow::Result<Vec<SchedulingInfo>>> + Send {
        let client = self.clone();
        async move {
            let resp: SchedulingInfosResponse = client
                .post_json("/v1/desired_lrp_scheduling_infos/list", &filter)
                .await?
                .json()
                .await?;
            Ok(resp.desired_lrp_scheduling_infos)
        }
    }

    fn scheduling_info(
        &self,
        process_guid: String,
    ) -> impl Future<Output = anyhow::Result<Option<SchedulingInfo>>> + Send {
        let client = self.clone();
        async move {
            let resp: SchedulingInfoResponse = client
                .post_json(
                    "/v1/desired_lrp_scheduling_infos/get",
                    &SchedulingInfoRequest {
                        process_guid: &process_guid,
                    },
                )
                .await?
                .json()
                .await?;
            Ok(resp.desired_lrp_scheduling_info)
        }
    }

    fn domains(&self) -> impl Future<Output = anyhow::Result<Vec<String>>> + Send {
        let client = self.clone();
        async move {
            let resp: DomainsResponse = client
                .post_json("/v1/domains/list", &serde_json::json!({}))
                .await?
                .json()
                .await?;
            Ok(resp.domains)
        }
    }
}

impl EventSubscriber for BbsClient {
    type Stream = BbsEventStream;

    fn subscribe(&self) -> impl Future<Output = anyhow::Result<Self::Stream>> + Send {
        let client = self.clone();
        async move { client.subscribe_to_events().await }
    }
}

/// A streaming change-stream connection parsing server-sent events.
pub struct BbsEventStream {
    stream: std::pin::Pin<
        Box<dyn futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
    >,
    buf: BytesMut,
}

impl BbsEventStream {
    /// Read the next event frame from the stream. Returns `None` when the
    /// stream ends or the transport fails; the caller resubscribes.
    async fn next_frame(&mut self) -> Option<Event> {
        let mut kind = String::new();
        let mut data = String::new();

        loop {
            // Consume complete lines from the buffer first.
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line_bytes = self.buf.split_to(pos + 1);
                let line = String::from_utf8_lossy(&line_bytes)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();

                if line.is_empty() {
                    // Frame boundary.
                    if kind.is_empty() && data.is_empty() {
                        continue;
                    }
                    match Event::parse(&kind, &data) {
                        Ok(event) => return Some(event),
                        Err(e) => {
                            error!("bbs: event parse failed, kind={}, error={}", kind, e);
                            kind.clear();
                            data.clear();
                            continue;
                        }
                    }
                } else if let Some(rest) = line.strip_prefix("event:") {
                    kind = rest.trim().to_string();
                } else if let Some(rest) = line.strip_prefix("data:") {
                    if !data.is_empty() {
                        data.push('\n');
                    }
                    data.push_str(rest.trim_start());
                }
                // `id:` fields and comment lines are ignored.
                continue;
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    self.buf.extend_from_slice(&chunk);
                }
                Some(Err(e)) => {
                    error!("bbs: event stream error: {}", e);
                    return None;
                }
                None => return None,
            }
        }
    }
}

impl EventSource for BbsEventStream {
    fn next_event(&mut self) -> impl Future<Output = Option<anyhow::Result<Event>>> + Send {
        async move { self.next_frame().await.map(Ok) }
    }
}
