//! Prometheus rendering of a poll result.
//!
//! Every scrape gets a fresh registry, so players that left the server since
//! the previous scrape simply do not show up anymore.

use std::collections::HashMap;

use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::games::{ExtraStats, Game, Report};

/// Namespace of every exported metric.
pub const NAMESPACE: &str = "srcds";

/// Value of `srcds_status` when the server could not be polled.
pub const STATUS_DOWN: f64 = 0.0;
/// Value of `srcds_status` for a server that answered.
pub const STATUS_UP: f64 = 1.0;
/// Value of `srcds_status` for a CS:GO server that is hibernating.
pub const STATUS_HIBERNATING: f64 = 2.0;

const PLAYER_LABELS: [&str; 3] = ["id", "name", "uniqueid"];

/// Renders the metrics of a successful poll in Prometheus text format.
pub fn render(server: &str, report: &Report) -> Result<String, prometheus::Error> {
    let status = &report.status;
    let mut labels = base_labels(server, report.game);
    labels.insert("version".to_string(), status.version.clone());
    labels.insert("hostname".to_string(), status.hostname.clone());
    labels.insert("map".to_string(), status.map.clone());
    if let Some(os) = &status.os {
        labels.insert("os".to_string(), os.clone());
    }
    if let Some(server_type) = &status.server_type {
        labels.insert("type".to_string(), server_type.clone());
    }
    let registry = Registry::new_custom(Some(NAMESPACE.to_string()), Some(labels))?;

    let up = if status.hibernating {
        STATUS_HIBERNATING
    } else {
        STATUS_UP
    };
    gauge(&registry, "status", "0 if the server is unreachable, 1 if up, 2 if hibernating", up)?;

    let stats = &report.stats;
    gauge(&registry, "cpu", "CPU usage in percent", stats.cpu)?;
    gauge(&registry, "netin", "Incoming traffic in KB/s", stats.netin)?;
    gauge(&registry, "netout", "Outgoing traffic in KB/s", stats.netout)?;
    gauge(&registry, "uptime", "Server uptime in minutes", stats.uptime)?;
    gauge(&registry, "maps", "Map changes since start", stats.maps)?;
    gauge(&registry, "fps", "Server frames per second", stats.fps)?;
    gauge(&registry, "players", "Connected players", stats.players)?;

    match stats.extra {
        ExtraStats::Csgo { svms, varms, tick } => {
            gauge(&registry, "svms", "Milliseconds per server frame", svms)?;
            gauge(&registry, "varms", "Variance of svms in milliseconds", varms)?;
            gauge(&registry, "tick", "Milliseconds per tick", tick)?;
        }
        ExtraStats::Connects(connects) => {
            gauge(&registry, "connects", "Connections since start", connects)?;
        }
    }

    if report.game.is_csgo() {
        let ping = player_gauge(&registry, "player_ping", "Player ping in milliseconds")?;
        let loss = player_gauge(&registry, "player_loss", "Player packet loss in percent")?;
        let rate = player_gauge(&registry, "player_rate", "Player network rate")?;

        for player in &status.players {
            let values = [
                player.userid.as_str(),
                player.name.as_str(),
                player.uniqueid.as_str(),
            ];
            ping.with_label_values(&values).set(f64::from(player.ping));
            loss.with_label_values(&values).set(f64::from(player.loss));
            rate.with_label_values(&values).set(f64::from(player.rate));
        }
    }

    encode(&registry)
}

/// Renders the document served when the server could not be polled: only
/// `srcds_status 0` labelled with the server and game.
pub fn render_unavailable(server: &str, game: Game) -> Result<String, prometheus::Error> {
    let registry = Registry::new_custom(
        Some(NAMESPACE.to_string()),
        Some(base_labels(server, game)),
    )?;
    gauge(&registry, "status", "0 if the server is unreachable, 1 if up, 2 if hibernating", STATUS_DOWN)?;
    encode(&registry)
}

fn base_labels(server: &str, game: Game) -> HashMap<String, String> {
    HashMap::from([
        ("server".to_string(), server.to_string()),
        ("game".to_string(), game.to_string()),
    ])
}

fn gauge(registry: &Registry, name: &str, help: &str, value: f64) -> Result<(), prometheus::Error> {
    let gauge = Gauge::with_opts(Opts::new(name, help))?;
    gauge.set(value);
    registry.register(Box::new(gauge))
}

fn player_gauge(registry: &Registry, name: &str, help: &str) -> Result<GaugeVec, prometheus::Error> {
    let gauge = GaugeVec::new(Opts::new(name, help), &PLAYER_LABELS)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn encode(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::{Player, Stats, Status};

    fn csgo_report() -> Report {
        Report {
            game: Game::Csgo,
            status: Status {
                hostname: "Dust Only".to_string(),
                version: "1.38.2.2".to_string(),
                map: "de_dust2".to_string(),
                listen_address: Some("0.0.0.0:27015".to_string()),
                os: Some("Linux".to_string()),
                server_type: Some("community dedicated".to_string()),
                hibernating: false,
                players: vec![Player {
                    userid: "2".to_string(),
                    name: "Alice".to_string(),
                    uniqueid: "STEAM_1:0:12345".to_string(),
                    connected: "01:23".to_string(),
                    ping: 50,
                    loss: 1,
                    state: "active".to_string(),
                    rate: 196608,
                    address: "198.51.100.7".to_string(),
                    port: 27005,
                }],
            },
            stats: Stats {
                cpu: 10.0,
                netin: 1.5,
                netout: 2.5,
                uptime: 5.0,
                maps: 1.0,
                fps: 128.0,
                players: 1.0,
                extra: ExtraStats::Csgo {
                    svms: 1.23,
                    varms: 0.5,
                    tick: 0.1,
                },
            },
        }
    }

    #[test]
    fn renders_server_and_player_metrics() {
        let text = render("203.0.113.4:27015", &csgo_report()).unwrap();

        assert!(text.contains("# TYPE srcds_cpu gauge"));
        assert!(text.contains("srcds_fps{"));
        assert!(text.contains("srcds_tick{"));
        assert!(!text.contains("srcds_connects"));
        assert!(text.contains(r#"server="203.0.113.4:27015""#));
        assert!(text.contains(r#"map="de_dust2""#));
        assert!(text.contains(r#"type="community dedicated""#));
        assert!(text.contains(r#"uniqueid="STEAM_1:0:12345""#));

        let ping = text
            .lines()
            .find(|line| line.starts_with("srcds_player_ping{"))
            .unwrap();
        assert!(ping.ends_with(" 50"));
        let status = text
            .lines()
            .find(|line| line.starts_with("srcds_status{"))
            .unwrap();
        assert!(status.ends_with(" 1"));
    }

    #[test]
    fn hibernation_is_status_two() {
        let mut report = csgo_report();
        report.status.hibernating = true;
        let text = render("203.0.113.4:27015", &report).unwrap();
        let status = text
            .lines()
            .find(|line| line.starts_with("srcds_status{"))
            .unwrap();
        assert!(status.ends_with(" 2"));
    }

    #[test]
    fn unavailable_has_only_status() {
        let text = render_unavailable("203.0.113.4:27015", Game::Tf2).unwrap();
        let samples: Vec<&str> = text.lines().filter(|line| !line.starts_with('#')).collect();

        assert_eq!(samples.len(), 1);
        assert!(samples[0].starts_with("srcds_status{"));
        assert!(samples[0].contains(r#"game="tf2""#));
        assert!(samples[0].ends_with(" 0"));
    }
}
