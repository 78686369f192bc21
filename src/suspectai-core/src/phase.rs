//! Game phases and the legal transitions between them.
//!
//! The progression is fixed:
//! ```text
//! Lobby → Connecting → ModeratorIntro → Round1 → Elimination1 → Round2
//!       → Elimination2 → Round3 → Verdict → GameOver
//! ```
//! plus the fast path `EliminationN → GameOver` when the human is voted out.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    Lobby,
    Connecting,
    ModeratorIntro,
    Round1,
    Elimination1,
    Round2,
    Elimination2,
    Round3,
    Verdict,
    GameOver,
}

impl GamePhase {
    /// All phases in progression order.
    pub const ALL: [GamePhase; 10] = [
        GamePhase::Lobby,
        GamePhase::Connecting,
        GamePhase::ModeratorIntro,
        GamePhase::Round1,
        GamePhase::Elimination1,
        GamePhase::Round2,
        GamePhase::Elimination2,
        GamePhase::Round3,
        GamePhase::Verdict,
        GamePhase::GameOver,
    ];

    /// The phase that follows this one in the normal progression.
    pub fn next(self) -> Option<GamePhase> {
        let idx = GamePhase::ALL.iter().position(|p| *p == self)?;
        GamePhase::ALL.get(idx + 1).copied()
    }

    pub fn is_round(self) -> bool {
        self.round_number().is_some()
    }

    pub fn is_elimination(self) -> bool {
        matches!(self, GamePhase::Elimination1 | GamePhase::Elimination2)
    }

    pub fn is_terminal(self) -> bool {
        self == GamePhase::GameOver
    }

    /// 1-based round number.
    pub fn round_number(self) -> Option<u8> {
        match self {
            GamePhase::Round1 => Some(1),
            GamePhase::Round2 => Some(2),
            GamePhase::Round3 => Some(3),
            _ => None,
        }
    }

    /// 1-based elimination number.
    pub fn elimination_number(self) -> Option<u8> {
        match self {
            GamePhase::Elimination1 => Some(1),
            GamePhase::Elimination2 => Some(2),
            _ => None,
        }
    }

    /// Whether `self → to` is an edge of the phase graph.
    pub fn can_transition_to(self, to: GamePhase) -> bool {
        if self.next() == Some(to) {
            return true;
        }
        // Human identified: the game ends straight from the ballot.
        self.is_elimination() && to == GamePhase::GameOver
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GamePhase::Lobby => "lobby",
            GamePhase::Connecting => "connecting",
            GamePhase::ModeratorIntro => "moderator-intro",
            GamePhase::Round1 => "round-1",
            GamePhase::Elimination1 => "elimination-1",
            GamePhase::Round2 => "round-2",
            GamePhase::Elimination2 => "elimination-2",
            GamePhase::Round3 => "round-3",
            GamePhase::Verdict => "verdict",
            GamePhase::GameOver => "game-over",
        };
        f.write_str(name)
    }
}
