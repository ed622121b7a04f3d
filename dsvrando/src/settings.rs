use std::ops::Range;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use dsvrando_game::{ContextRule, GameVariant, ItemId};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LogicSettings {
    #[serde(default)]
    pub game: GameVariant,
    #[serde(default)]
    pub enable_glitch_requirements: bool,
    #[serde(default)]
    pub open_world_map: bool,
}

impl LogicSettings {
    pub fn load(path: &Path) -> Result<LogicSettings> {
        let settings_str = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read {}", path.display()))?;
        serde_json::from_str(&settings_str)
            .with_context(|| format!("unable to parse {}", path.display()))
    }

    /// The context rule a symbol names in this game, if any.
    pub fn context_rule(&self, name: &str) -> Option<ContextRule> {
        match ContextRule::from_str(name) {
            Ok(ContextRule::OpenWorldMap) if self.game == GameVariant::Ooe => {
                Some(ContextRule::OpenWorldMap)
            }
            _ => None,
        }
    }

    pub fn context_value(&self, rule: ContextRule) -> bool {
        match rule {
            ContextRule::OpenWorldMap => self.open_world_map,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StartingItemSettings {
    pub item_ids: Range<ItemId>,  // Consumables and equipment
    pub skill_ids: Range<ItemId>, // Souls, subweapons, spells or glyphs, depending on the game
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StartingRoomSettings {
    pub max_difficulty: f32,
    #[serde(default)]
    pub removed_portrait_areas: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonlinear_is_ooe_only() {
        let mut settings = LogicSettings {
            game: GameVariant::Por,
            enable_glitch_requirements: false,
            open_world_map: true,
        };
        assert_eq!(settings.context_rule("nonlinear"), None);
        settings.game = GameVariant::Ooe;
        assert_eq!(settings.context_rule("nonlinear"), Some(ContextRule::OpenWorldMap));
        assert!(settings.context_value(ContextRule::OpenWorldMap));
        assert_eq!(settings.context_rule("beat_game"), None);
    }

    #[test]
    fn test_settings_defaults() -> Result<()> {
        let settings: LogicSettings = serde_json::from_str(r#"{"game": "Ooe"}"#)?;
        assert_eq!(settings.game, GameVariant::Ooe);
        assert!(!settings.enable_glitch_requirements);
        assert!(!settings.open_world_map);
        Ok(())
    }
}
