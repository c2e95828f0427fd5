//! Parsers for the plain-text output of `status` and `stats`.
//!
//! The layout of both commands differs slightly between Source games. CS:GO
//! prints more status fields, a player table and three extra stats columns;
//! everything else shares the older layout.

mod stats;
mod status;

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

pub use stats::{ExtraStats, Stats};
pub use status::{Player, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Game {
    Csgo,
    Css,
    Tf2,
    Gmod,
    Hl2,
    L4d2,
}

impl Game {
    pub const ALL: [Game; 6] = [
        Game::Csgo,
        Game::Css,
        Game::Tf2,
        Game::Gmod,
        Game::Hl2,
        Game::L4d2,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Game::Csgo => "csgo",
            Game::Css => "css",
            Game::Tf2 => "tf2",
            Game::Gmod => "gmod",
            Game::Hl2 => "hl2",
            Game::L4d2 => "l4d2",
        }
    }

    /// Whether the server speaks the CS:GO flavour of `status` and `stats`.
    pub fn is_csgo(&self) -> bool {
        matches!(self, Game::Csgo)
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Game {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Game::ALL
            .into_iter()
            .find(|game| game.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseError::UnknownGame(s.to_string()))
    }
}

/// Everything one poll learned about a server.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub game: Game,
    pub status: Status,
    pub stats: Stats,
}

impl Report {
    pub fn parse(game: Game, status: &str, stats: &str) -> Result<Self, ParseError> {
        Ok(Report {
            game,
            status: Status::parse(game, status)?,
            stats: Stats::parse(game, stats)?,
        })
    }
}
