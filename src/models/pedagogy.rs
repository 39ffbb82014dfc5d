//! Pedagogy modes: the closed set of teaching strategies a session can run in.
//!
//! The variant itself is a plain tag. Everything a mode "knows" (its
//! description, its prompt resource, which retired names fold into it) lives
//! in the lookup tables below.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PedagogyMode {
    #[default]
    Explanatory,
    Debugging,
    Practice,
}

impl PedagogyMode {
    /// Every current mode, in listing order.
    pub const ALL: [PedagogyMode; 3] = [
        PedagogyMode::Explanatory,
        PedagogyMode::Debugging,
        PedagogyMode::Practice,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PedagogyMode::Explanatory => "explanatory",
            PedagogyMode::Debugging => "debugging",
            PedagogyMode::Practice => "practice",
        }
    }
}

impl fmt::Display for PedagogyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid pedagogy mode: '{given}'. Valid modes are: {valid}", valid = valid_mode_list())]
pub struct UnknownPedagogyMode {
    pub given: String,
}

impl FromStr for PedagogyMode {
    type Err = UnknownPedagogyMode;

    /// Case-insensitive match against the current enumeration only.
    /// Retired names are rejected here; see [`migrate_stored_mode`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        PedagogyMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == lowered)
            .ok_or_else(|| UnknownPedagogyMode {
                given: s.to_string(),
            })
    }
}

/// Static facts about a mode.
#[derive(Debug, Clone, Copy)]
pub struct ModeProfile {
    pub mode: PedagogyMode,
    pub description: &'static str,
}

const MODE_PROFILES: [ModeProfile; 3] = [
    ModeProfile {
        mode: PedagogyMode::Explanatory,
        description: "Direct instruction with clear explanations and examples",
    },
    ModeProfile {
        mode: PedagogyMode::Debugging,
        description: "Hint-based problem solving without giving away solutions",
    },
    ModeProfile {
        mode: PedagogyMode::Practice,
        description: "Guided questions and active testing for deeper understanding",
    },
];

/// Retired mode names from the five-mode scheme and the current mode each one
/// now resolves to.
pub const LEGACY_MODE_MIGRATIONS: [(&str, PedagogyMode); 3] = [
    ("socratic", PedagogyMode::Practice),
    ("assessment", PedagogyMode::Practice),
    ("review", PedagogyMode::Explanatory),
];

pub fn profile(mode: PedagogyMode) -> &'static ModeProfile {
    // MODE_PROFILES is indexed in the same order as PedagogyMode::ALL
    &MODE_PROFILES[mode as usize]
}

pub fn description(mode: PedagogyMode) -> &'static str {
    profile(mode).description
}

/// Name of the instruction-text resource backing a mode.
pub fn resource_name(mode: PedagogyMode) -> String {
    format!("{}_mode_prompt", mode.as_str())
}

/// Where a retired mode name now points, if it is one.
pub fn legacy_target(raw: &str) -> Option<PedagogyMode> {
    let lowered = raw.trim().to_lowercase();
    LEGACY_MODE_MIGRATIONS
        .iter()
        .find(|(name, _)| *name == lowered)
        .map(|(_, target)| *target)
}

/// Resolve a mode value read back from session storage.
///
/// Current names map to themselves, retired names go through
/// [`LEGACY_MODE_MIGRATIONS`], and anything else falls back to the default.
/// Never fails: stored data is migrated at read time, not rejected.
pub fn migrate_stored_mode(raw: &str) -> PedagogyMode {
    if let Ok(mode) = raw.parse::<PedagogyMode>() {
        return mode;
    }

    if let Some(target) = legacy_target(raw) {
        tracing::debug!("Migrated legacy pedagogy mode '{}' to '{}'", raw, target);
        return target;
    }

    tracing::warn!(
        "Unrecognized stored pedagogy mode '{}', using '{}'",
        raw,
        PedagogyMode::default()
    );
    PedagogyMode::default()
}

pub fn valid_mode_list() -> String {
    PedagogyMode::ALL
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
