use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use quai_rpc::hex::{decode_biguint, encode_biguint};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::engine::{Cycle, ViewerHandle};
use crate::error::ViewerError;
use crate::rates::{ConversionRates, Direction};
use crate::ChartStore;

type HttpResult = Result<Response<Full<Bytes>>, hyper::http::Error>;

/// Everything a request handler needs.
#[derive(Clone)]
pub struct WebState {
    pub store: Arc<ChartStore>,
    pub handle: ViewerHandle,
    pub rates: Arc<ConversionRates>,
    /// Chart age in seconds past which `/health` fails; `None` disables the check
    pub stale_after_secs: Option<u64>,
}

pub async fn run_http_server(
    address: String,
    state: WebState,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(&address).await?;
    info!("🌐 kQuai viewer listening on http://{}", address);
    serve(listener, state).await?;
    Ok(())
}

/// Accept connections on `listener` until accepting fails.
pub async fn serve(listener: TcpListener, state: WebState) -> std::io::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { handle_request(req, state).await }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("Error serving connection: {:?}", err);
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: WebState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = route(req.method(), req.uri().path(), req.uri().query(), &state).await;

    Ok(response.unwrap_or_else(|e| {
        error!("Failed to build response: {}", e);
        let mut response = Response::new(Full::new(Bytes::from("Internal Server Error")));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    }))
}

async fn route(method: &Method, path: &str, query: Option<&str>, state: &WebState) -> HttpResult {
    debug!("{} {}", method, path);
    match (method, path) {
        (&Method::GET, "/api/chart") => match state.store.chart() {
            Some(chart) => json_response(StatusCode::OK, json!(chart)),
            None => json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"error": "No chart rendered yet"}),
            ),
        },
        (&Method::GET, "/api/status") => json_response(
            StatusCode::OK,
            json!({
                "status": state.store.status(),
                "busy": state.handle.is_busy(),
            }),
        ),
        (&Method::POST, "/api/refresh") => start_cycle(state, Cycle::Refresh),
        (&Method::POST, "/api/timeframe") => {
            match parse_positive(query, "blocks") {
                Ok(blocks) => start_cycle(state, Cycle::ChangeTimeframe(blocks)),
                Err(e) => error_response(&e),
            }
        }
        (&Method::POST, "/api/chunk") => {
            let result = parse_positive(query, "size").and_then(|size| {
                let size = usize::try_from(size)
                    .map_err(|_| ViewerError::InvalidRequest("size too large".to_string()))?;
                state.handle.change_chunk_size(size)
            });
            match result {
                Ok(chunks) => json_response(StatusCode::OK, json!({"chunks": chunks})),
                Err(e) => error_response(&e),
            }
        }
        (&Method::GET, "/api/convert") => convert(query, state).await,
        (&Method::GET, "/health") => {
            let stale = state
                .stale_after_secs
                .is_some_and(|threshold| state.store.is_stale(threshold));
            let healthy = state.store.is_healthy() && !stale;
            let status_code = if healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            json_response(
                status_code,
                json!({
                    "healthy": healthy,
                    "stale": stale,
                    "step": state.store.status().step,
                }),
            )
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found"))),
    }
}

fn start_cycle(state: &WebState, cycle: Cycle) -> HttpResult {
    match state.handle.spawn_cycle(cycle) {
        // The outcome reaches the status line; the task is left detached
        Ok(_task) => json_response(StatusCode::ACCEPTED, json!({"started": true})),
        Err(e) => error_response(&e),
    }
}

async fn convert(query: Option<&str>, state: &WebState) -> HttpResult {
    let direction = match query_param(query, "direction")
        .ok_or_else(|| ViewerError::InvalidRequest("missing direction".to_string()))
        .and_then(str::parse::<Direction>)
    {
        Ok(direction) => direction,
        Err(e) => return error_response(&e),
    };
    let amount = match query_param(query, "amount")
        .ok_or_else(|| ViewerError::InvalidRequest("missing amount".to_string()))
        .and_then(|amount| {
            decode_biguint(amount).map_err(|e| ViewerError::InvalidRequest(e.to_string()))
        }) {
        Ok(amount) => amount,
        Err(e) => return error_response(&e),
    };

    match state.rates.convert(direction, &amount).await {
        Ok(converted) => json_response(
            StatusCode::OK,
            json!({
                "direction": direction.as_str(),
                "amount": encode_biguint(&amount),
                "result": encode_biguint(&converted),
            }),
        ),
        Err(e) => {
            error!("Conversion {} failed: {}", direction.as_str(), e);
            error_response(&e)
        }
    }
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn parse_positive(query: Option<&str>, name: &str) -> Result<u64, ViewerError> {
    let value = query_param(query, name)
        .ok_or_else(|| ViewerError::InvalidRequest(format!("missing {}", name)))?;
    match value.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ViewerError::InvalidRequest(format!(
            "{} must be a positive integer, got {:?}",
            name, value
        ))),
    }
}

fn error_status(error: &ViewerError) -> StatusCode {
    match error {
        ViewerError::Busy => StatusCode::CONFLICT,
        ViewerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ViewerError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
        ViewerError::Rpc(_) => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(error: &ViewerError) -> HttpResult {
    json_response(error_status(error), json!({"error": error.to_string()}))
}

fn json_response(status: StatusCode, body: Value) -> HttpResult {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
}
