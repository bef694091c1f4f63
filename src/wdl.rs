use std::fmt;

use shakmaty_syzygy::Wdl;

/// Win/draw/loss classification from the point of view of the side to move.
///
/// The discriminants are the canonical scale every engine encoding is mapped
/// onto. Keep them in sync with the `TryFrom<i8>` implementation below.
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WdlClass {
    Loss = -2,
    /// Lost, but saved by the 50-move rule.
    BlessedLoss = -1,
    Draw = 0,
    /// Won, but spoiled by the 50-move rule.
    CursedWin = 1,
    Win = 2,
}

impl WdlClass {
    pub const ALL: [WdlClass; 5] = [
        WdlClass::Loss,
        WdlClass::BlessedLoss,
        WdlClass::Draw,
        WdlClass::CursedWin,
        WdlClass::Win,
    ];

    /// Map the engine's probe code (`0..=4`, Fathom order) onto the canonical scale.
    pub fn from_engine_code(code: u32) -> Option<Self> {
        use WdlClass::*;
        Some(match code {
            4 => Win,
            3 => CursedWin,
            2 => Draw,
            1 => BlessedLoss,
            0 => Loss,
            _ => return None,
        })
    }

    pub fn engine_code(self) -> u32 {
        (i8::from(self) + 2) as u32
    }

    /// The label the engine prints next to its probe code.
    pub fn engine_label(self) -> &'static str {
        match self {
            WdlClass::Loss => "Loss",
            WdlClass::BlessedLoss => "Draw: Loss (blessed)",
            WdlClass::Draw => "Draw",
            WdlClass::CursedWin => "Draw: Win (cursed)",
            WdlClass::Win => "Win",
        }
    }

    /// Parse a textual classification.
    ///
    /// Exact engine labels are tried first. Older engine builds printed
    /// looser wording, so a keyword fallback follows.
    pub fn from_label(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(class) = Self::ALL.into_iter().find(|c| c.engine_label() == text) {
            return Some(class);
        }

        let lower = text.to_lowercase();
        if lower.contains("loss") && lower.contains("blessed") {
            Some(WdlClass::BlessedLoss)
        } else if lower.contains("win") && lower.contains("cursed") {
            Some(WdlClass::CursedWin)
        } else if lower.contains("loss") {
            Some(WdlClass::Loss)
        } else if lower.contains("win") {
            Some(WdlClass::Win)
        } else if lower.contains("draw") {
            Some(WdlClass::Draw)
        } else {
            None
        }
    }

    /// Three-valued result word, as written in `TB_RESULT` annotations.
    pub fn result_word(self) -> &'static str {
        match self {
            WdlClass::Win | WdlClass::CursedWin => "Win",
            WdlClass::Draw => "Draw",
            WdlClass::Loss | WdlClass::BlessedLoss => "Loss",
        }
    }
}

impl fmt::Display for WdlClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WdlClass::Win => "Win",
            WdlClass::CursedWin => "Cursed Win",
            WdlClass::Draw => "Draw",
            WdlClass::BlessedLoss => "Blessed Loss",
            WdlClass::Loss => "Loss",
        };
        write!(f, "{name} ({})", i8::from(*self))
    }
}

impl From<WdlClass> for i8 {
    fn from(value: WdlClass) -> Self {
        value as i8
    }
}

impl TryFrom<i8> for WdlClass {
    type Error = ();

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        use WdlClass::*;
        Ok(match value {
            -2 => Loss,
            -1 => BlessedLoss,
            0 => Draw,
            1 => CursedWin,
            2 => Win,
            _ => return Err(()),
        })
    }
}

impl From<Wdl> for WdlClass {
    fn from(wdl: Wdl) -> Self {
        match wdl {
            Wdl::Loss => WdlClass::Loss,
            Wdl::BlessedLoss => WdlClass::BlessedLoss,
            Wdl::Draw => WdlClass::Draw,
            Wdl::CursedWin => WdlClass::CursedWin,
            Wdl::Win => WdlClass::Win,
        }
    }
}
