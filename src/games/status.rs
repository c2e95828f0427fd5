use crate::error::ParseError;

use super::Game;

/// The parts of `status` output we export.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Status {
    pub hostname: String,
    pub version: String,
    pub map: String,
    pub listen_address: Option<String>,
    pub os: Option<String>,
    pub server_type: Option<String>,
    pub hibernating: bool,
    pub players: Vec<Player>,
}

/// A row of the CS:GO player table.
///
/// ```text
/// # userid name uniqueid connected ping loss state rate adr
/// # 2 1 "Alice" STEAM_1:0:12345 01:23 50 0 active 196608 198.51.100.7:27005
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub userid: String,
    pub name: String,
    pub uniqueid: String,
    pub connected: String,
    pub ping: u32,
    pub loss: u32,
    pub state: String,
    pub rate: u32,
    pub address: String,
    pub port: u16,
}

impl Status {
    pub fn parse(game: Game, output: &str) -> Result<Self, ParseError> {
        let field = |name: &str| {
            output.lines().find_map(|line| {
                let (key, value) = line.split_once(':')?;
                (key.trim() == name).then(|| value.trim())
            })
        };

        let hostname = field("hostname").ok_or(ParseError::MissingField("hostname"))?;
        let version = field("version").ok_or(ParseError::MissingField("version"))?;
        let map = field("map").ok_or(ParseError::MissingField("map"))?;

        let mut status = Status {
            hostname: hostname.to_string(),
            version: first_part(version, "/").to_string(),
            map: first_part(map, " ").to_string(),
            ..Status::default()
        };

        if game.is_csgo() {
            status.listen_address = field("udp/ip").map(|value| first_part(value, "  ").to_string());
            status.os = field("os").map(str::to_string);
            status.server_type = field("type").map(str::to_string);
            status.hibernating = field("players")
                .map(|value| value.contains("(hibernating)"))
                .unwrap_or(false);
            status.players = player_table(output).filter_map(Player::parse).collect();
        }

        Ok(status)
    }
}

impl Player {
    /// Parses one table row. Bots and anything else without a Steam id yield
    /// `None`.
    pub fn parse(row: &str) -> Option<Self> {
        let row = row.strip_prefix('#')?;
        let userid = row.split_whitespace().next()?;
        if !userid.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let open = row.find('"')?;
        let close = row.rfind('"')?;
        if close <= open {
            return None;
        }
        let name = &row[open + 1..close];

        let columns: Vec<&str> = row[close + 1..].split_whitespace().collect();
        // uniqueid connected ping loss state.. rate adr
        if columns.len() < 7 {
            return None;
        }
        let uniqueid = columns[0];
        let connected = columns[1];
        if !is_steam_id(uniqueid) || !connected.contains(':') {
            return None;
        }

        let rate = columns[columns.len() - 2];
        let (address, port) = columns[columns.len() - 1].rsplit_once(':')?;

        Some(Player {
            userid: userid.to_string(),
            name: name.to_string(),
            uniqueid: uniqueid.to_string(),
            connected: connected.to_string(),
            ping: columns[2].parse().ok()?,
            loss: columns[3].parse().ok()?,
            state: columns[4..columns.len() - 2].join(" "),
            rate: rate.parse().ok()?,
            address: address.to_string(),
            port: port.parse().ok()?,
        })
    }
}

/// Rows between the `# userid` header and `#end`.
fn player_table(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("# userid"))
        .skip(1)
        .take_while(|line| line.trim() != "#end")
}

fn first_part<'a>(value: &'a str, separator: &str) -> &'a str {
    value.split(separator).next().unwrap_or(value).trim()
}

/// `STEAM_X:Y:Z` with X and Y being 0 or 1.
fn is_steam_id(value: &str) -> bool {
    let Some(rest) = value.strip_prefix("STEAM_") else {
        return false;
    };
    let parts: Vec<&str> = rest.split(':').collect();
    matches!(parts.as_slice(), [universe, auth, account]
        if matches!(*universe, "0" | "1")
            && matches!(*auth, "0" | "1")
            && !account.is_empty()
            && account.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSGO: &str = "hostname: Friendly Fire: Dust Only\n\
version : 1.38.2.2/13822 1300/8012 secure  [G:1:1234567] \n\
udp/ip  : 0.0.0.0:27015  (public ip: 203.0.113.4)\n\
os      :  Linux\n\
type    :  community dedicated\n\
map     : de_dust2\n\
players : 1 humans, 1 bots (16/0 max) (hibernating)\n\
\n\
# userid name uniqueid connected ping loss state rate adr\n\
# 2 1 \"Alice\" STEAM_1:0:12345 01:23 50 0 active 196608 198.51.100.7:27005\n\
#3 \"BOT Bob\" BOT active 64\n\
#end\n";

    const TF2: &str = "hostname: Payload Central\r\n\
version : 6543211/24 6543211 secure\r\n\
udp/ip  : 0.0.0.0:27015  (public ip: 203.0.113.9)\r\n\
steamid : [G:1:123] (85568392920040000)\r\n\
account : not logged in  (No account specified)\r\n\
map     : pl_badwater at: 0 x, 0 y, 0 z\r\n\
tags    : payload\r\n\
players : 0 humans, 0 bots (24 max)\r\n";

    #[test]
    fn parses_csgo_status() {
        let status = Status::parse(Game::Csgo, CSGO).unwrap();
        assert_eq!(status.hostname, "Friendly Fire: Dust Only");
        assert_eq!(status.version, "1.38.2.2");
        assert_eq!(status.map, "de_dust2");
        assert_eq!(status.listen_address.as_deref(), Some("0.0.0.0:27015"));
        assert_eq!(status.os.as_deref(), Some("Linux"));
        assert_eq!(status.server_type.as_deref(), Some("community dedicated"));
        assert!(status.hibernating);

        assert_eq!(
            status.players,
            vec![Player {
                userid: "2".to_string(),
                name: "Alice".to_string(),
                uniqueid: "STEAM_1:0:12345".to_string(),
                connected: "01:23".to_string(),
                ping: 50,
                loss: 0,
                state: "active".to_string(),
                rate: 196608,
                address: "198.51.100.7".to_string(),
                port: 27005,
            }]
        );
    }

    #[test]
    fn parses_tf2_status() {
        let status = Status::parse(Game::Tf2, TF2).unwrap();
        assert_eq!(status.hostname, "Payload Central");
        assert_eq!(status.version, "6543211");
        assert_eq!(status.map, "pl_badwater");
        assert_eq!(status.os, None);
        assert!(status.players.is_empty());
    }

    #[test]
    fn missing_map_is_an_error() {
        let output = "hostname: x\nversion : 1/2\n";
        assert_eq!(
            Status::parse(Game::Css, output),
            Err(ParseError::MissingField("map"))
        );
    }

    #[test]
    fn player_names_may_contain_quotes() {
        let row = "# 7 4 \"the \"real\" one\" STEAM_0:1:99 1:02:03 80 2 spawning 80000 10.0.0.1:27005";
        let player = Player::parse(row).unwrap();
        assert_eq!(player.name, "the \"real\" one");
        assert_eq!(player.connected, "1:02:03");
        assert_eq!(player.state, "spawning");
    }

    #[test]
    fn skips_bots_and_garbage() {
        assert_eq!(Player::parse("#3 \"BOT Bob\" BOT active 64"), None);
        assert_eq!(Player::parse("# userid name uniqueid"), None);
        assert_eq!(Player::parse("#end"), None);
    }
}
