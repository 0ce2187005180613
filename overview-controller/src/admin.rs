use futures::future;
use hyper::{Body, Request, Response};
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument};

/// Serves `/live`, `/ready`, and `/metrics` for probes and scraping.
#[instrument(skip(registry, ready))]
pub async fn serve(
    addr: SocketAddr,
    registry: Arc<Registry>,
    ready: watch::Receiver<bool>,
) -> Result<(), hyper::Error> {
    let server =
        hyper::server::Server::bind(&addr).serve(hyper::service::make_service_fn(move |_conn| {
            let registry = registry.clone();
            let ready = ready.clone();
            future::ok::<_, hyper::Error>(hyper::service::service_fn(
                move |req: Request<Body>| {
                    let response = match req.uri().path() {
                        "/live" => text_response(hyper::StatusCode::OK, "live\n".to_string()),
                        "/ready" => handle_ready(&ready),
                        "/metrics" => handle_metrics(&registry),
                        _ => hyper::Response::builder()
                            .status(hyper::StatusCode::NOT_FOUND)
                            .body(Body::default())
                            .expect("not found response must be valid"),
                    };
                    future::ok::<_, hyper::Error>(response)
                },
            ))
        }));
    let addr = server.local_addr();
    info!(%addr, "HTTP admin server listening");
    server.await
}

fn handle_ready(ready: &watch::Receiver<bool>) -> Response<Body> {
    if *ready.borrow() {
        text_response(hyper::StatusCode::OK, "ready\n".to_string())
    } else {
        text_response(
            hyper::StatusCode::INTERNAL_SERVER_ERROR,
            "not ready\n".to_string(),
        )
    }
}

fn handle_metrics(registry: &Registry) -> Response<Body> {
    let mut body = String::new();
    match prometheus_client::encoding::text::encode(&mut body, registry) {
        Ok(()) => Response::builder()
            .status(hyper::StatusCode::OK)
            .header(
                hyper::header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )
            .body(body.into())
            .expect("metrics response must be valid"),
        Err(_) => Response::builder()
            .status(hyper::StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::default())
            .expect("error response must be valid"),
    }
}

fn text_response(status: hyper::StatusCode, body: String) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(body.into())
        .expect("text response must be valid")
}
