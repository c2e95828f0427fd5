use crate::error::ParseError;

use super::Game;

const COMMON_COLUMNS: [&str; 7] = ["cpu", "netin", "netout", "uptime", "maps", "fps", "players"];

/// One row of `stats` output.
///
/// ```text
/// CPU    NetIn   NetOut    Uptime  Maps   FPS   Players  Svms    +-ms   ~tick
/// 10.0      0.0      0.0       5     0  128.00       0    1.23    0.50    0.10
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub cpu: f64,
    pub netin: f64,
    pub netout: f64,
    pub uptime: f64,
    pub maps: f64,
    pub fps: f64,
    pub players: f64,
    pub extra: ExtraStats,
}

/// The columns after `players`, which depend on the game.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtraStats {
    Csgo { svms: f64, varms: f64, tick: f64 },
    Connects(f64),
}

impl Stats {
    pub fn parse(game: Game, output: &str) -> Result<Self, ParseError> {
        // first line is the header, the data row follows
        let row = output
            .lines()
            .skip(1)
            .find(|line| !line.trim().is_empty())
            .ok_or(ParseError::MissingStats)?;
        let values: Vec<&str> = row.split_whitespace().collect();

        let extra_columns: &[&'static str] = if game.is_csgo() {
            &["svms", "varms", "tick"]
        } else {
            &["connects"]
        };
        let expected = COMMON_COLUMNS.len() + extra_columns.len();
        if values.len() < expected {
            return Err(ParseError::ShortStats {
                got: values.len(),
                expected,
            });
        }

        let numbers = COMMON_COLUMNS
            .iter()
            .chain(extra_columns)
            .zip(&values)
            .map(|(column, value)| number(*column, value))
            .collect::<Result<Vec<f64>, _>>()?;

        let extra = if game.is_csgo() {
            ExtraStats::Csgo {
                svms: numbers[7],
                varms: numbers[8],
                tick: numbers[9],
            }
        } else {
            ExtraStats::Connects(numbers[7])
        };

        let stats = Stats {
            cpu: numbers[0],
            netin: numbers[1],
            netout: numbers[2],
            uptime: numbers[3],
            maps: numbers[4],
            fps: numbers[5],
            players: numbers[6],
            extra,
        };
        Ok(stats)
    }
}

fn number(column: &'static str, value: &str) -> Result<f64, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidNumber {
        column,
        value: value.to_string(),
    })
}
