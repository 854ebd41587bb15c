use serde::{Deserialize, Serialize};

/// White's opening name keyed by the first move
const WHITE_OPENING_BY_FIRST_MOVE: &[(&str, &str)] = &[
    ("e2e4", "King's Pawn Opening"),
    ("d2d4", "Queen's Pawn Opening"),
    ("c2c4", "English Opening"),
    ("g1f3", "Zukertort Opening"),
    ("b2b3", "Larsen Opening"),
    ("f2f4", "Bird Opening"),
];

/// Black's defense keyed by (first move, reply)
const BLACK_DEFENSE_BY_REPLY: &[(&str, &str, &str)] = &[
    ("e2e4", "e7e5", "Open Game"),
    ("e2e4", "c7c5", "Sicilian Defense"),
    ("e2e4", "e7e6", "French Defense"),
    ("e2e4", "c7c6", "Caro-Kann Defense"),
    ("e2e4", "d7d5", "Scandinavian Defense"),
    ("e2e4", "g7g6", "Modern Defense"),
    ("e2e4", "d7d6", "Pirc Setup"),
    ("d2d4", "d7d5", "Queen's Pawn Symmetry"),
    ("d2d4", "g8f6", "Indian Defense"),
    ("d2d4", "f7f5", "Dutch Defense"),
    ("d2d4", "e7e6", "QGD Setup"),
    ("d2d4", "d7d6", "Old Indian Setup"),
    ("c2c4", "e7e5", "Reversed Sicilian Setup"),
    ("c2c4", "c7c5", "Symmetrical English"),
    ("c2c4", "g8f6", "English / Indian Setup"),
    ("c2c4", "e7e6", "English / Neo-Catalan Setup"),
];

struct BookLine {
    moves: &'static [&'static str],
    white: &'static str,
    black: &'static str,
}

/// Named lines; when several match the history, the last one wins.
const OPENING_LINE_BOOK: &[BookLine] = &[
    BookLine {
        moves: &["e2e4", "e7e5", "g1f3", "b8c6", "f1b5"],
        white: "Ruy Lopez",
        black: "Open Game (Ruy Lopez)",
    },
    BookLine {
        moves: &["e2e4", "e7e5", "g1f3", "b8c6", "f1c4"],
        white: "Italian Game",
        black: "Open Game (Italian)",
    },
    BookLine {
        moves: &["e2e4", "c7c5", "g1f3", "d7d6", "d2d4", "c5d4", "f3d4", "g8f6", "b1c3"],
        white: "Open Sicilian",
        black: "Sicilian Najdorf/Scheveningen Setup",
    },
    BookLine {
        moves: &["d2d4", "d7d5", "c2c4"],
        white: "Queen's Gambit",
        black: "Queen's Gambit Declined/Accepted Setup",
    },
    BookLine {
        moves: &["d2d4", "g8f6", "c2c4", "e7e6", "b1c3", "f8b4"],
        white: "Nimzo-Indian Attack Setup",
        black: "Nimzo-Indian Defense",
    },
    BookLine {
        moves: &["d2d4", "g8f6", "c2c4", "g7g6"],
        white: "Queen's Pawn with c4",
        black: "King's Indian / Grunfeld Setup",
    },
    BookLine {
        moves: &["e2e3", "d7d5", "d2d3"],
        white: "Cow Opening (Anna Cramling)",
        black: "d5 Setup vs Cow",
    },
    BookLine {
        moves: &["e2e3", "d7d5", "d2d3", "e7e5", "g1e2", "f8d6", "e2g3", "g8f6", "b1d2"],
        white: "Cow Opening (Anna Cramling)",
        black: "Classical Setup vs Cow",
    },
];

/// Opening names for both sides
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OpeningLabel {
    pub white: String,
    pub black: String,
    pub line: String,
}

impl OpeningLabel {
    fn new(white: &str, black: &str) -> Self {
        OpeningLabel {
            white: white.to_string(),
            black: black.to_string(),
            line: format!("{} / {}", white, black),
        }
    }
}

impl Default for OpeningLabel {
    fn default() -> Self {
        describe_opening::<&str>(&[])
    }
}

/// Label a game from its UCI move history
pub fn describe_opening<S: AsRef<str>>(history: &[S]) -> OpeningLabel {
    if history.is_empty() {
        return OpeningLabel {
            white: "Start Position".to_string(),
            black: "Awaiting White move".to_string(),
            line: "Unclassified".to_string(),
        };
    }

    let first = history[0].as_ref();
    let mut white = WHITE_OPENING_BY_FIRST_MOVE
        .iter()
        .find(|(mv, _)| *mv == first)
        .map_or("Unclassified Opening", |(_, name)| *name);

    let mut black = match history.get(1) {
        None => "Awaiting Black reply",
        Some(second) => BLACK_DEFENSE_BY_REPLY
            .iter()
            .find(|(a, b, _)| *a == first && *b == second.as_ref())
            .map_or("Unclassified Defense", |(_, _, name)| *name),
    };

    for line in OPENING_LINE_BOOK {
        if line.moves.len() > history.len() {
            continue;
        }
        let matched = line
            .moves
            .iter()
            .zip(history.iter())
            .all(|(book, played)| *book == played.as_ref());
        if matched {
            white = line.white;
            black = line.black;
        }
    }

    OpeningLabel::new(white, black)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_is_start_position() {
        let label = describe_opening::<&str>(&[]);
        assert_eq!(label.white, "Start Position");
        assert_eq!(label.black, "Awaiting White move");
        assert_eq!(label.line, "Unclassified");
    }

    #[test]
    fn single_move_awaits_reply() {
        let label = describe_opening(&["d2d4"]);
        assert_eq!(label.white, "Queen's Pawn Opening");
        assert_eq!(label.black, "Awaiting Black reply");
    }

    #[test]
    fn ruy_lopez_is_recognised() {
        let label = describe_opening(&["e2e4", "e7e5", "g1f3", "b8c6", "f1b5", "a7a6"]);
        assert_eq!(label.white, "Ruy Lopez");
        assert_eq!(label.black, "Open Game (Ruy Lopez)");
        assert_eq!(label.line, "Ruy Lopez / Open Game (Ruy Lopez)");
    }

    #[test]
    fn later_book_line_wins() {
        let history = ["e2e3", "d7d5", "d2d3", "e7e5", "g1e2", "f8d6", "e2g3", "g8f6", "b1d2"];
        assert_eq!(describe_opening(&history).black, "Classical Setup vs Cow");
        assert_eq!(describe_opening(&history[..4]).black, "d5 Setup vs Cow");
    }

    #[test]
    fn unknown_moves_fall_back() {
        let label = describe_opening(&["a2a3", "h7h6"]);
        assert_eq!(label.white, "Unclassified Opening");
        assert_eq!(label.black, "Unclassified Defense");
    }
}
