//! Level progression derived from XP.
//!
//! Levels advance every 100 XP and cap at level 10.

use serde::Serialize;

/// XP needed to advance one level.
pub const XP_PER_LEVEL: i64 = 100;

/// Highest reachable level.
pub const MAX_LEVEL: u32 = 10;

/// Level reached at a given XP total.
///
/// Level 1 covers 0-99 XP, level 2 covers 100-199, and so on. Negative XP
/// (which balances never hold after a successful mutation) maps to level 1.
pub fn level_for_xp(xp: i64) -> u32 {
    if xp < 0 {
        return 1;
    }
    let level = (xp / XP_PER_LEVEL).saturating_add(1);
    level.min(MAX_LEVEL as i64) as u32
}

/// Minimum XP for one level, for the level-up table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelThreshold {
    pub level: u32,
    pub xp: i64,
}

/// Thresholds for every level from 1 to `MAX_LEVEL`.
pub fn level_thresholds() -> Vec<LevelThreshold> {
    (1..=MAX_LEVEL)
        .map(|level| LevelThreshold {
            level,
            xp: (level as i64 - 1) * XP_PER_LEVEL,
        })
        .collect()
}
