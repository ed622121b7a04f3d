use std::ops::Range;

use anyhow::{Context, Result, bail};
use dsvrando_game::{GameVariant, ItemId, RoomKey, Token};
use log::info;
use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::checker::CompletabilityChecker;
use crate::settings::{StartingItemSettings, StartingRoomSettings};

// Attack glyphs that don't need a glyph statue. One is always given in OoE so the player can
// break the first statue.
pub const OOE_FREE_ATTACK_GLYPHS: [ItemId; 13] = [
    0x1D, 0x1F, 0x20, 0x22, 0x24, 0x26, 0x27, 0x2A, 0x2B, 0x2F, 0x30, 0x31, 0x32,
];

// Rooms at or below this map row of the sector are in the lower part of the Mine of Judgment.
const CONDEMNED_TOWER_LOWEST_START_Y: u8 = 0x17;
const MASTERS_KEEP_DRACULA_DEATH_SECTOR: u8 = 0xC;
const MIN_ACCESSIBLE_LOCATIONS: usize = 3;

pub fn non_progression_pickups(progression_tokens: &[Token], ids: Range<ItemId>) -> Vec<ItemId> {
    ids.filter(|&id| !progression_tokens.contains(&Token::Item(id)))
        .collect()
}

/// Picks the pickups placed in the starting room. None of them is a progression token.
pub fn select_starting_items<R: Rng>(
    checker: &CompletabilityChecker,
    settings: &StartingItemSettings,
    rng: &mut R,
) -> Result<Vec<ItemId>> {
    let progression_tokens = checker.progression_tokens()?;
    let items = non_progression_pickups(progression_tokens, settings.item_ids.clone());
    let mut skills = non_progression_pickups(progression_tokens, settings.skill_ids.clone());

    let mut starting_pickups = vec![];
    let num_skills = if checker.settings.game == GameVariant::Ooe {
        let glyph = *OOE_FREE_ATTACK_GLYPHS
            .choose(rng)
            .context("No free attack glyphs")?;
        skills.retain(|&id| id != glyph);
        starting_pickups.push(glyph);
        2
    } else {
        3
    };
    starting_pickups.extend(items.choose_multiple(rng, 3));
    starting_pickups.extend(skills.choose_multiple(rng, num_skills));

    for id in &starting_pickups {
        info!("Starting pickup: {id:03X}");
    }
    Ok(starting_pickups)
}

/// A room that could be chosen to start in, as described by the caller's room data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartingRoomCandidate {
    pub room: RoomKey,
    pub area_name: String,
    pub sector_name: String,
    pub map_y: u8,
    pub num_layers: usize,
    pub num_usable_doors: usize, // Left or right doors that are reachable and not underwater
    pub has_save_point: bool,
    pub has_warp_point: bool,
    pub has_boss: bool,
    #[serde(default)]
    pub unused: bool,
    pub subsector_difficulty: Option<f32>,
}

pub fn is_valid_starting_room(
    candidate: &StartingRoomCandidate,
    game: GameVariant,
    removed_portrait_areas: &[u8],
) -> bool {
    let area = candidate.area_name.as_str();
    let sector = candidate.sector_name.as_str();
    let room = candidate.room;

    if candidate.num_layers == 0 || candidate.num_usable_doors == 0 {
        return false;
    }
    let has_teleport = match game {
        GameVariant::Dos => candidate.has_save_point,
        GameVariant::Por | GameVariant::Ooe => candidate.has_warp_point,
    };
    if !has_teleport {
        return false;
    }
    if area.contains("Boss Rush") || sector.contains("Boss Rush") {
        return false;
    }
    if sector == "The Abyss"
        || (sector == "Condemned Tower & Mine of Judgment"
            && candidate.map_y >= CONDEMNED_TOWER_LOWEST_START_Y)
    {
        return false;
    }
    if area == "Nest of Evil"
        || sector == "The Throne Room"
        || (sector == "Master's Keep" && room.sector_index == MASTERS_KEEP_DRACULA_DEATH_SECTOR)
    {
        return false;
    }
    if game == GameVariant::Por && removed_portrait_areas.contains(&room.area_index) {
        return false;
    }
    if area == "Training Hall" || area == "Large Cavern" || sector == "Final Approach" {
        return false;
    }
    if game == GameVariant::Ooe && room.area_index == 0 {
        return false;
    }
    !(candidate.has_boss || candidate.unused)
}

/// Chooses where the player starts. `probe` reports how many locations are accessible when
/// starting in a given room.
pub fn select_starting_room<'c, R, F>(
    candidates: &'c [StartingRoomCandidate],
    game: GameVariant,
    settings: &StartingRoomSettings,
    rng: &mut R,
    mut probe: F,
) -> Result<&'c StartingRoomCandidate>
where
    R: Rng,
    F: FnMut(&StartingRoomCandidate) -> Result<usize>,
{
    let mut rooms: Vec<&StartingRoomCandidate> = candidates
        .iter()
        .filter(|c| is_valid_starting_room(c, game, &settings.removed_portrait_areas))
        .collect();

    let mut rooms_with_progress = vec![];
    for &room in &rooms {
        let num_accessible = probe(room).with_context(|| format!("Probing room {}", room.room))?;
        if num_accessible > MIN_ACCESSIBLE_LOCATIONS {
            rooms_with_progress.push(room);
        }
    }
    if !rooms_with_progress.is_empty() {
        rooms = rooms_with_progress;
    }

    let rated: Vec<(&StartingRoomCandidate, f32)> = rooms
        .iter()
        .filter_map(|&r| r.subsector_difficulty.map(|d| (r, d)))
        .collect();
    let mut possible: Vec<&StartingRoomCandidate> = rated
        .iter()
        .filter(|(_, d)| *d <= settings.max_difficulty)
        .map(|(r, _)| *r)
        .collect();
    if possible.is_empty() {
        let min_difficulty = rated.iter().map(|(_, d)| *d).fold(f32::INFINITY, f32::min);
        possible = rated
            .iter()
            .filter(|(_, d)| *d == min_difficulty)
            .map(|(r, _)| *r)
            .collect();
    }

    let Some(&room) = possible.choose(rng) else {
        bail!("No valid starting room");
    };
    info!("Starting room: {}", room.room);
    Ok(room)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::LogicSettings;
    use dsvrando_game::{GameData, NamedFlagSets};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn game_data() -> GameData {
        GameData::load_str(
            r#"{
                "Defs": {"a": 1, "b": 2, "c": 20, "d": 21, "glyph": 31},
                "Rooms": {}
            }"#,
            NamedFlagSets::default(),
        )
        .unwrap()
    }

    fn item_settings() -> StartingItemSettings {
        StartingItemSettings {
            item_ids: 0..10,
            skill_ids: 20..50,
        }
    }

    #[test]
    fn test_non_progression_pickups() {
        let tokens = [Token::Item(1), Token::Item(3), Token::Flag("villagerjacob".to_string())];
        assert_eq!(non_progression_pickups(&tokens, 0..5), vec![0, 2, 4]);
    }

    #[test]
    fn test_starting_items() -> Result<()> {
        let game_data = game_data();
        let mut checker = CompletabilityChecker::new(&game_data, LogicSettings::default());
        let mut rng = StdRng::seed_from_u64(0);
        assert!(select_starting_items(&checker, &item_settings(), &mut rng).is_err());

        checker.initialize_progression_tokens()?;
        let pickups = select_starting_items(&checker, &item_settings(), &mut rng)?;
        assert_eq!(pickups.len(), 6);
        assert!(pickups[..3].iter().all(|id| (0..10).contains(id) && *id != 1 && *id != 2));
        assert!(pickups[3..].iter().all(|id| (20..50).contains(id) && ![20, 21, 31].contains(id)));
        for (i, id) in pickups.iter().enumerate() {
            assert!(!pickups[i + 1..].contains(id));
        }

        let again = select_starting_items(&checker, &item_settings(), &mut StdRng::seed_from_u64(7))?;
        let same = select_starting_items(&checker, &item_settings(), &mut StdRng::seed_from_u64(7))?;
        assert_eq!(again, same);
        Ok(())
    }

    #[test]
    fn test_starting_items_ooe_glyph() -> Result<()> {
        let game_data = game_data();
        let settings = LogicSettings {
            game: GameVariant::Ooe,
            ..LogicSettings::default()
        };
        let mut checker = CompletabilityChecker::new(&game_data, settings);
        checker.initialize_progression_tokens()?;
        for seed in 0..20 {
            let pickups = select_starting_items(&checker, &item_settings(), &mut StdRng::seed_from_u64(seed))?;
            assert_eq!(pickups.len(), 6);
            assert!(OOE_FREE_ATTACK_GLYPHS.contains(&pickups[0]));
            assert!(!pickups[4..].contains(&pickups[0]));
        }
        Ok(())
    }

    fn candidate(room: &str, difficulty: Option<f32>) -> StartingRoomCandidate {
        StartingRoomCandidate {
            room: room.parse().unwrap(),
            area_name: "Dracula's Castle".to_string(),
            sector_name: "Lost Village".to_string(),
            map_y: 4,
            num_layers: 1,
            num_usable_doors: 2,
            has_save_point: true,
            has_warp_point: true,
            has_boss: false,
            unused: false,
            subsector_difficulty: difficulty,
        }
    }

    #[test]
    fn test_starting_room_filter() {
        let valid = candidate("00-01-02", Some(1.0));
        assert!(is_valid_starting_room(&valid, GameVariant::Dos, &[]));
        assert!(!is_valid_starting_room(&valid, GameVariant::Ooe, &[]));

        let no_save = StartingRoomCandidate {
            has_save_point: false,
            ..valid.clone()
        };
        assert!(!is_valid_starting_room(&no_save, GameVariant::Dos, &[]));
        assert!(is_valid_starting_room(&no_save, GameVariant::Por, &[]));
        assert!(!is_valid_starting_room(&no_save, GameVariant::Por, &[0]));

        let lower_mine = StartingRoomCandidate {
            sector_name: "Condemned Tower & Mine of Judgment".to_string(),
            map_y: 0x17,
            ..valid.clone()
        };
        assert!(!is_valid_starting_room(&lower_mine, GameVariant::Dos, &[]));

        let keep = StartingRoomCandidate {
            room: "00-0C-01".parse().unwrap(),
            sector_name: "Master's Keep".to_string(),
            ..valid.clone()
        };
        assert!(!is_valid_starting_room(&keep, GameVariant::Por, &[]));

        let boss = StartingRoomCandidate {
            has_boss: true,
            ..valid.clone()
        };
        assert!(!is_valid_starting_room(&boss, GameVariant::Dos, &[]));

        let no_doors = StartingRoomCandidate {
            num_usable_doors: 0,
            ..valid
        };
        assert!(!is_valid_starting_room(&no_doors, GameVariant::Dos, &[]));
    }

    #[test]
    fn test_select_starting_room() -> Result<()> {
        let settings = StartingRoomSettings {
            max_difficulty: 2.0,
            removed_portrait_areas: vec![],
        };
        let candidates = vec![
            candidate("00-01-00", Some(1.0)),
            candidate("00-01-01", Some(1.5)),
            candidate("00-01-02", Some(3.0)),
            candidate("00-01-03", None),
        ];
        let mut rng = StdRng::seed_from_u64(0);

        // Only 00-01-01 opens up enough locations.
        let probe = |c: &StartingRoomCandidate| Ok(if c.room.room_index == 1 { 4 } else { 3 });
        let room = select_starting_room(&candidates, GameVariant::Dos, &settings, &mut rng, probe)?;
        assert_eq!(room.room.to_string(), "00-01-01");

        // Nothing opens up enough, so every valid room stays; 00-01-02 is too hard and 00-01-03
        // is unrated.
        for _ in 0..10 {
            let room = select_starting_room(&candidates, GameVariant::Dos, &settings, &mut rng, |_| Ok(0))?;
            assert!(room.room.room_index <= 1);
        }

        // When everything is too hard, the easiest rooms are used.
        let hard = StartingRoomSettings {
            max_difficulty: 0.5,
            removed_portrait_areas: vec![],
        };
        let room = select_starting_room(&candidates, GameVariant::Dos, &hard, &mut rng, |_| Ok(0))?;
        assert_eq!(room.room.to_string(), "00-01-00");

        let result = select_starting_room(&candidates, GameVariant::Ooe, &settings, &mut rng, |_| Ok(0));
        assert!(result.is_err());
        Ok(())
    }
}
