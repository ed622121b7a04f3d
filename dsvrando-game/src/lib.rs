pub mod requirement;

pub use crate::requirement::{
    Atom, Clause, ContextRule, Expression, Requirement, normalize_name, parse_requirement,
    parse_requirement_text,
};

use anyhow::{Context, Result, bail, ensure};
use hashbrown::HashMap;
use json::{self, JsonValue};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::hash::Hash;
use std::path::Path;
use std::str::FromStr;
use strum_macros::{EnumString, VariantNames};

pub type ItemId = u32; // Global pickup id, as written in the requirements file
pub type LocationIdx = usize; // Index into GameData.locations
pub type Weight = f32; // Placement preference weight for a progression token

pub const BEAT_GAME: &str = "beat_game";
pub const NEST_OF_EVIL_PORTRAIT: &str = "portrait_nest_of_evil";
pub const DEFAULT_SEAL_BOSSES: [&str; 4] = ["bosswerewolf", "bossmummy", "bossmedusa", "bosscreature"];

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString, VariantNames,
)]
#[strum(ascii_case_insensitive)]
pub enum GameVariant {
    #[default]
    Dos,
    Por,
    Ooe,
}

pub struct PortraitInfo {
    pub portrait: &'static str,
    pub boss: &'static str, // Boss guarding the portrait's seal
    pub area: &'static str, // Symbol for having cleared the portrait's area
}

// Every portrait except Nest of Evil, which is never removed.
pub const PORTRAITS: [PortraitInfo; 8] = [
    PortraitInfo {
        portrait: "portrait_city_of_haze",
        boss: "bossdullahan",
        area: "cityofhaze",
    },
    PortraitInfo {
        portrait: "portrait_sandy_grave",
        boss: "bossastarte",
        area: "sandygrave",
    },
    PortraitInfo {
        portrait: "portrait_nation_of_fools",
        boss: "bosslegion",
        area: "nationoffools",
    },
    PortraitInfo {
        portrait: "portrait_forest_of_doom",
        boss: "bossdagon",
        area: "forestofdoom",
    },
    PortraitInfo {
        portrait: "portrait_dark_academy",
        boss: "bosscreature",
        area: "darkacademy",
    },
    PortraitInfo {
        portrait: "portrait_burnt_paradise",
        boss: "bossmedusa",
        area: "burntparadise",
    },
    PortraitInfo {
        portrait: "portrait_forgotten_city",
        boss: "bossmummy",
        area: "forgottencity",
    },
    PortraitInfo {
        portrait: "portrait_13th_street",
        boss: "bosswerewolf",
        area: "13thstreet",
    },
];

pub fn get_portrait_info(portrait: &str) -> Result<&'static PortraitInfo> {
    PORTRAITS
        .iter()
        .find(|p| p.portrait == portrait)
        .with_context(|| format!("Invalid portrait name: {portrait}"))
}

/// Something that can be held in an inventory: a pickup, or a categorical flag such as a
/// recruited villager or an unlocked portrait.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Token {
    Item(ItemId),
    Flag(String),
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Token::Item(id) => write!(f, "{id:03X}"),
            Token::Flag(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IndexedVec<T: Hash + Eq> {
    pub keys: Vec<T>,
    pub index_by_key: HashMap<T, usize>,
}

impl<T: Hash + Eq> Default for IndexedVec<T> {
    fn default() -> Self {
        IndexedVec {
            keys: vec![],
            index_by_key: HashMap::new(),
        }
    }
}

impl<T: Hash + Eq + Clone> IndexedVec<T> {
    pub fn add<U: ToOwned<Owned = T> + ?Sized>(&mut self, name: &U) -> usize {
        let key = name.to_owned();
        if let Some(&idx) = self.index_by_key.get(&key) {
            idx
        } else {
            let idx = self.keys.len();
            self.index_by_key.insert(key.clone(), idx);
            self.keys.push(key);
            idx
        }
    }

    pub fn contains(&self, key: &T) -> bool {
        self.index_by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// The two closed name sets whose members are inventory flags rather than definitions.
#[derive(Default, Clone, Debug)]
pub struct NamedFlagSets {
    pub villagers: IndexedVec<String>,
    pub portraits: IndexedVec<String>,
}

impl NamedFlagSets {
    pub fn new<S: AsRef<str>>(villagers: &[S], portraits: &[S]) -> Self {
        let mut sets = NamedFlagSets::default();
        for name in villagers {
            sets.villagers.add(&normalize_name(name.as_ref()));
        }
        for name in portraits {
            sets.portraits.add(&normalize_name(name.as_ref()));
        }
        sets
    }

    pub fn contains(&self, name: &str) -> bool {
        self.villagers.index_by_key.contains_key(name) || self.portraits.index_by_key.contains_key(name)
    }
}

/// Mapping from symbol names to requirements, in the order they were defined.
#[derive(Default, Clone, Debug)]
pub struct DefinitionTable {
    names: IndexedVec<String>,
    bindings: Vec<Requirement>,
}

impl DefinitionTable {
    pub fn get(&self, name: &str) -> Option<&Requirement> {
        self.names.index_by_key.get(name).map(|&idx| &self.bindings[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.index_by_key.contains_key(name)
    }

    /// Binds `name`, replacing any earlier binding in place.
    pub fn set(&mut self, name: &str, req: Requirement) {
        let idx = self.names.add(name);
        if idx == self.bindings.len() {
            self.bindings.push(req);
        } else {
            self.bindings[idx] = req;
        }
    }

    pub fn merge(&mut self, other: &DefinitionTable) {
        for (name, req) in other.iter() {
            self.set(name, req.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Requirement)> {
        self.names
            .keys
            .iter()
            .map(|x| x.as_str())
            .zip(self.bindings.iter())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomKey {
    pub area_index: u8,
    pub sector_index: u8,
    pub room_index: u8,
}

impl Display for RoomKey {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{:02X}-{:02X}-{:02X}",
            self.area_index, self.sector_index, self.room_index
        )
    }
}

impl FromStr for RoomKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        ensure!(parts.len() == 3, "Room key should look like AA-BB-CC: {s}");
        let parse_part = |p: &str| -> Result<u8> {
            ensure!(p.len() == 2, "Room key should look like AA-BB-CC: {s}");
            u8::from_str_radix(p, 16).with_context(|| format!("Invalid hex in room key {s}"))
        };
        Ok(RoomKey {
            area_index: parse_part(parts[0])?,
            sector_index: parse_part(parts[1])?,
            room_index: parse_part(parts[2])?,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationKey {
    pub room: RoomKey,
    pub entity_index: u16,
}

impl Display for LocationKey {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}_{:02X}", self.room, self.entity_index)
    }
}

impl FromStr for LocationKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (room_str, entity_str) = s
            .trim()
            .split_once('_')
            .with_context(|| format!("Location key should look like AA-BB-CC_EE: {s}"))?;
        Ok(LocationKey {
            room: room_str.parse()?,
            entity_index: u16::from_str_radix(entity_str, 16)
                .with_context(|| format!("Invalid entity index in location key {s}"))?,
        })
    }
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, VariantNames,
)]
pub enum LocationTag {
    Enemy,
    Event,
    #[strum(serialize = "Easter egg")]
    EasterEgg,
    Villager,
    Hidden,
    Mirror,
    #[strum(serialize = "No souls")]
    NoSouls,
    #[strum(serialize = "No glyphs")]
    NoGlyphs,
    #[strum(serialize = "No progression")]
    NoProgression,
    Portrait,
}

#[derive(Clone, Debug)]
pub struct Location {
    pub key: LocationKey,
    pub room_requirement: Requirement,
    pub entity_requirement: Requirement,
    pub tags: Vec<LocationTag>,
}

impl Location {
    pub fn has_tag(&self, tag: LocationTag) -> bool {
        self.tags.contains(&tag)
    }
}

#[derive(Default, Clone, Debug)]
pub struct GameData {
    pub named_flags: NamedFlagSets,
    pub defs: DefinitionTable,
    pub glitch_defs: DefinitionTable,
    pub preferences: HashMap<Token, Weight>,
    pub location_isv: IndexedVec<LocationKey>,
    pub locations: Vec<Location>, // Corresponds to location_isv.keys
}

fn read_json(path: &Path) -> Result<JsonValue> {
    let file = File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    let json_str = std::io::read_to_string(file)
        .with_context(|| format!("unable to read {}", path.display()))?;
    let json_data =
        json::parse(&json_str).with_context(|| format!("unable to parse {}", path.display()))?;
    Ok(json_data)
}

// "03 (Magic Ticket) (Hidden)" -> 0x03 with the Hidden tag. Parenthesized groups that
// aren't tags are display names and are ignored.
fn parse_entity_key(key: &str) -> Result<(u16, Vec<LocationTag>)> {
    let key = key.trim();
    let hex_len = key
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(key.len());
    ensure!(hex_len > 0, "Expected a hex entity index: {key}");
    let entity_index = u16::from_str_radix(&key[..hex_len], 16)
        .with_context(|| format!("Invalid entity index: {key}"))?;

    let mut tags = vec![];
    let mut rest = &key[hex_len..];
    while let Some(start) = rest.find('(') {
        let Some(len) = rest[start..].find(')') else {
            bail!("Unbalanced parenthesis in entity key: {key}");
        };
        if let Ok(tag) = LocationTag::from_str(&rest[start + 1..start + len]) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        rest = &rest[start + len + 1..];
    }
    Ok((entity_index, tags))
}

impl GameData {
    pub fn load(path: &Path, named_flags: NamedFlagSets) -> Result<GameData> {
        let requirements_json = read_json(path)?;
        GameData::from_json(&requirements_json, named_flags)
            .with_context(|| format!("Loading requirements from {}", path.display()))
    }

    pub fn load_str(json_str: &str, named_flags: NamedFlagSets) -> Result<GameData> {
        let requirements_json = json::parse(json_str).context("unable to parse requirements")?;
        GameData::from_json(&requirements_json, named_flags)
    }

    pub fn from_json(requirements_json: &JsonValue, named_flags: NamedFlagSets) -> Result<GameData> {
        let mut game_data = GameData {
            named_flags,
            ..GameData::default()
        };
        game_data.defs = game_data
            .load_defs(&requirements_json["Defs"])
            .context("Processing Defs")?;
        game_data.glitch_defs = game_data
            .load_defs(&requirements_json["Glitch defs"])
            .context("Processing Glitch defs")?;
        game_data
            .load_preferences(&requirements_json["Preferences"])
            .context("Processing Preferences")?;
        game_data
            .load_rooms(&requirements_json["Rooms"])
            .context("Processing Rooms")?;
        info!(
            "Loaded {} definitions, {} glitch definitions, {} locations",
            game_data.defs.len(),
            game_data.glitch_defs.len(),
            game_data.locations.len()
        );
        Ok(game_data)
    }

    fn load_defs(&self, defs_json: &JsonValue) -> Result<DefinitionTable> {
        let mut defs = DefinitionTable::default();
        if defs_json.is_null() {
            return Ok(defs);
        }
        ensure!(defs_json.is_object(), "Expected an object of definitions");
        for (name, req_json) in defs_json.entries() {
            let req = parse_requirement(req_json, &self.named_flags)
                .with_context(|| format!("Parsing definition '{name}'"))?;
            defs.set(&normalize_name(name), req);
        }
        Ok(defs)
    }

    fn load_preferences(&mut self, preferences_json: &JsonValue) -> Result<()> {
        if preferences_json.is_null() {
            return Ok(());
        }
        ensure!(preferences_json.is_object(), "Expected an object of preferences");
        for (name, weight_json) in preferences_json.entries() {
            let name = normalize_name(name);
            let weight = weight_json
                .as_f32()
                .with_context(|| format!("Expecting numeric weight for preference '{name}'"))?;
            let req = self
                .defs
                .get(&name)
                .or_else(|| self.glitch_defs.get(&name))
                .with_context(|| format!("Preference for undefined pickup '{name}'"))?;
            let token = match req {
                Requirement::Atom(Atom::Item(id)) => Token::Item(*id),
                Requirement::Atom(Atom::Flag(flag)) => Token::Flag(flag.clone()),
                _ => bail!("Preference '{name}' does not name a pickup"),
            };
            self.preferences.insert(token, weight);
        }
        Ok(())
    }

    fn load_rooms(&mut self, rooms_json: &JsonValue) -> Result<()> {
        ensure!(rooms_json.is_object(), "Expected an object of rooms");
        for (room_str, room_json) in rooms_json.entries() {
            let room: RoomKey = room_str.parse()?;
            ensure!(room_json.is_object(), "Expected an object for room {room}");
            let mut room_requirement = Requirement::Free;
            let mut entities: Vec<(u16, Requirement, Vec<LocationTag>)> = vec![];
            for (applies_to, req_json) in room_json.entries() {
                let req = parse_requirement(req_json, &self.named_flags)
                    .with_context(|| format!("Parsing requirement for {room} '{applies_to}'"))?;
                if applies_to.trim() == "room" {
                    room_requirement = req;
                } else {
                    let (entity_index, tags) = parse_entity_key(applies_to)
                        .with_context(|| format!("Processing room {room}"))?;
                    entities.push((entity_index, req, tags));
                }
            }
            for (entity_index, entity_requirement, tags) in entities {
                let key = LocationKey { room, entity_index };
                if self.location_isv.contains(&key) {
                    bail!("Duplicate location {key}");
                }
                self.location_isv.add(&key);
                self.locations.push(Location {
                    key,
                    room_requirement: room_requirement.clone(),
                    entity_requirement,
                    tags,
                });
            }
        }
        Ok(())
    }

    pub fn get_location(&self, key: &LocationKey) -> Option<&Location> {
        self.location_isv
            .index_by_key
            .get(key)
            .map(|&idx| &self.locations[idx])
    }

    pub fn locations_tagged(&self, tag: LocationTag) -> Vec<LocationKey> {
        self.locations
            .iter()
            .filter(|loc| loc.has_tag(tag))
            .map(|loc| loc.key)
            .collect()
    }
}
