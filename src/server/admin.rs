use super::AdminState;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn handle_admin(
    req: Request<Incoming>,
    state: AdminState,
) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/health" | "/healthz" => Ok(Response::builder()
            .status(200)
            .body(full_body(r#"{"status":"ok"}"#))
            .unwrap()),

        // Ready once the first reconciliation has completed.
        "/ready" | "/readyz" => {
            let stats = state.stats.load();
            let status = if stats.synced { 200 } else { 503 };
            Ok(Response::builder()
                .status(status)
                .body(full_body(format!(
                    r#"{{"status":"{}","routes_total":{}}}"#,
                    if stats.synced { "ready" } else { "waiting-for-sync" },
                    stats.routes_total,
                )))
                .unwrap())
        }

        "/metrics" => {
            let body = state.metrics.render();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        "/routes" => {
            let stats = state.stats.load();
            let body = serde_json::json!({
                "routes_total": stats.routes_total,
                "tcp_routes_total": stats.tcp_routes_total,
                "http_endpoints": stats.http_endpoints,
                "synced": stats.synced,
            });
            Ok(Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(full_body(body.to_string()))
                .unwrap())
        }

        _ => Ok(Response::builder()
            .status(404)
            .body(full_body(r#"{"error":"not found"}"#))
            .unwrap()),
    }
}
