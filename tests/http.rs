use std::net::SocketAddr;
use std::time::Duration;

use rcon_exporter::{
    http,
    server::{srcds_reply, Server},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const PASSWORD: &str = "hunter2";

const TF2_STATUS: &str = "hostname: Badwater 24/7\n\
version : 8622567/24 8622567 secure\n\
udp/ip  : 0.0.0.0:27015\n\
map     : pl_badwater at: 0 x, 0 y, 0 z\n\
players : 0 humans, 0 bots (24 max)\n";

const TF2_STATS: &str = "CPU    In (KB/s)  Out (KB/s)  Uptime  Map changes  FPS      Players  Connects\n\
0.00   0.00       0.00        12      2            66.67    0        4\n";

fn tf2(command: &str) -> String {
    match command {
        "status" => TF2_STATUS.to_string(),
        "stats" => TF2_STATS.to_string(),
        _ => String::new(),
    }
}

async fn exporter() -> SocketAddr {
    let listener = http::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(http::run_metrics_server(listener, Duration::from_secs(2)));
    addr
}

/// Sends a bare HTTP/1.1 GET and returns the status code and the raw response.
async fn get(addr: SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();
    (status, response)
}

#[tokio::test]
async fn serves_homepage() {
    let addr = exporter().await;
    let (status, response) = get(addr, "/").await;

    assert_eq!(status, 200);
    assert!(response.contains("text/html"));
    assert!(response.contains("/metrics?ip="));
}

#[tokio::test]
async fn scrapes_the_requested_server() {
    let server = Server::start("127.0.0.1:0", |packet| srcds_reply(PASSWORD, packet, tf2))
        .await
        .unwrap();
    let port = server.local_addr().port();
    let addr = exporter().await;

    let path = format!(
        "/metrics?ip=127.0.0.1&port={}&password={}&game=tf2",
        port, PASSWORD
    );
    let (status, response) = get(addr, &path).await;

    assert_eq!(status, 200);
    assert!(response.contains("text/plain; version=0.0.4"));
    assert!(response.contains(r#"hostname="Badwater 24/7""#));
    assert!(response.contains("srcds_connects{"));
    assert!(response.contains(&format!(r#"server="127.0.0.1:{}""#, port)));
}

#[tokio::test]
async fn unreachable_server_is_reported_down() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let addr = exporter().await;

    let path = format!("/metrics?ip=127.0.0.1&port={}&password=x&game=css", port);
    let (status, response) = get(addr, &path).await;

    assert_eq!(status, 200);
    let status_line = response
        .lines()
        .find(|line| line.starts_with("srcds_status{"))
        .unwrap();
    assert!(status_line.contains(r#"game="css""#));
    assert!(status_line.ends_with(" 0"));
}

#[tokio::test]
async fn unknown_game_is_a_bad_request() {
    let addr = exporter().await;
    let (status, response) = get(addr, "/metrics?ip=127.0.0.1&port=27015&password=x&game=quake").await;

    assert_eq!(status, 400);
    assert!(response.contains("available games: csgo, css, tf2"));
}

#[tokio::test]
async fn missing_parameters_are_a_bad_request() {
    let addr = exporter().await;
    let (status, response) = get(addr, "/metrics?game=tf2&ip=127.0.0.1").await;

    assert_eq!(status, 400);
    assert!(response.contains("missing query parameter `port`"));
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let addr = exporter().await;
    let (status, _) = get(addr, "/favicon.ico").await;
    assert_eq!(status, 404);
}
