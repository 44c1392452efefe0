use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CompileResources,
    LinkResources,
    CompileSources,
    Dex,
    Merge,
    Align,
    Sign,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::CompileResources,
        Stage::LinkResources,
        Stage::CompileSources,
        Stage::Dex,
        Stage::Merge,
        Stage::Align,
        Stage::Sign,
    ];

    pub fn number(self) -> u8 {
        match self {
            Stage::CompileResources => 1,
            Stage::LinkResources => 2,
            Stage::CompileSources => 3,
            Stage::Dex => 4,
            Stage::Merge => 5,
            Stage::Align => 6,
            Stage::Sign => 7,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::CompileResources => "compile resources",
            Stage::LinkResources => "link resources",
            Stage::CompileSources => "compile sources",
            Stage::Dex => "dex",
            Stage::Merge => "merge dex into package",
            Stage::Align => "align",
            Stage::Sign => "sign",
        }
    }

    /// Progress reported once this stage has finished.
    pub fn percent_done(self) -> u32 {
        u32::from(self.number()) * 100 / Stage::ALL.len() as u32
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step {} ({})", self.number(), self.label())
    }
}
