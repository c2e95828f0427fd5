//! HTTP front end for Prometheus.
//!
//! `GET /metrics?ip=&port=&password=&game=` runs one poll cycle against the
//! given server and answers with its metrics, or with the unavailable
//! document when the poll fails. `GET /` serves a short usage page.

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use tokio::net::TcpListener;

use crate::{
    error::{ExporterError, QueryError},
    games::Game,
    poll::{self, Target},
};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9591";

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

const HOMEPAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>rcon-exporter</title></head>
<body>
<h1>rcon-exporter</h1>
<p>Scrape <code>/metrics?ip=&lt;host&gt;&amp;port=&lt;port&gt;&amp;password=&lt;rcon password&gt;&amp;game=&lt;game&gt;</code></p>
<p>Games: csgo, css, tf2, gmod, hl2, l4d2</p>
</body>
</html>"#;

/// Binds the listener for [run_metrics_server].
pub async fn bind(addr: &str) -> Result<TcpListener, ExporterError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ExporterError::Listen {
            addr: addr.to_string(),
            source,
        })
}

/// Serves requests on `listener` until the task is dropped. `timeout` is
/// handed to every poll, for connecting and for each command.
pub async fn run_metrics_server(listener: TcpListener, timeout: Duration) {
    if let Ok(addr) = listener.local_addr() {
        info!("metrics server listening on http://{}/metrics", addr);
    }

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| handle_request(req, timeout));
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        debug!("metrics connection from {} failed: {}", peer, err);
                    }
                });
            }
            Err(err) => error!("metrics server accept error: {}", err),
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    timeout: Duration,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let uri = req.uri().clone();
    let response = match uri.path() {
        "/" => respond(StatusCode::OK, "text/html", HOMEPAGE),
        "/metrics" => match parse_target(uri.query().unwrap_or_default(), timeout) {
            Ok(target) => {
                debug!("scraping {} ({})", target.server(), target.game);
                respond(StatusCode::OK, TEXT_FORMAT, poll::scrape(&target).await)
            }
            Err(err) => {
                debug!("rejecting scrape request: {}", err);
                respond(StatusCode::BAD_REQUEST, "text/plain", err.to_string())
            }
        },
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };

    Ok(response)
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Builds the poll target out of the `/metrics` query string. The game is
/// checked first so a typo there is reported even if other fields are off.
fn parse_target(query: &str, timeout: Duration) -> Result<Target, QueryError> {
    let params = query_pairs(query);
    let param = |name: &'static str| params.get(name).ok_or(QueryError::Missing(name));

    let game = param("game")?;
    let game = game
        .parse::<Game>()
        .map_err(|_| QueryError::UnknownGame(game.clone()))?;
    let host = param("ip")?;
    let port = param("port")?;
    let port = port
        .parse::<u16>()
        .map_err(|_| QueryError::InvalidPort(port.clone()))?;
    let password = param("password")?;

    Ok(Target {
        host: host.clone(),
        port,
        password: password.clone(),
        game,
        timeout,
    })
}

fn query_pairs(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

/// Form decoding: `+` is a space and `%XX` a byte. Broken escapes are kept
/// as they are.
fn decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            b'%' => match text
                .get(i + 1..i + 3)
                .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                Some(byte) => {
                    decoded.push(byte);
                    i += 3;
                }
                None => {
                    decoded.push(b'%');
                    i += 1;
                }
            },
            byte => {
                decoded.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
