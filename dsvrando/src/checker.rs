use anyhow::{Context, Result, bail, ensure};
use dsvrando_game::{
    Atom, BEAT_GAME, DEFAULT_SEAL_BOSSES, DefinitionTable, GameData, GameVariant, ItemId, Location,
    LocationIdx, LocationKey, LocationTag, NEST_OF_EVIL_PORTRAIT, PORTRAITS, Requirement, Token,
    get_portrait_info,
};
use dsvrando_logic::{Inventory, ScopedInventory};
use hashbrown::{HashMap, HashSet};
use log::{debug, info};

use crate::settings::LogicSettings;
use crate::traverse::{Evaluator, LogicContext, evaluate, evaluate_symbol};

pub const MAX_NEST_OF_EVIL_MAP_PERCENT: usize = 888;

/// Answers reachability questions for one randomization session: whether the game can be
/// beaten, which locations can be reached, and how much each missing token would open up.
///
/// The game data is shared; definitions are copied so that overrides stay local to the session.
#[derive(Clone)]
pub struct CompletabilityChecker<'a> {
    pub game_data: &'a GameData,
    pub settings: LogicSettings,
    defs: DefinitionTable,
    inventory: Inventory,
    progression_tokens: Option<Vec<Token>>,
    removed_portraits: Vec<String>,
}

fn is_location_accessible(loc: &Location, cx: LogicContext, inventory: &Inventory) -> Result<bool> {
    Ok(evaluate(&loc.room_requirement, cx, inventory)?
        && evaluate(&loc.entity_requirement, cx, inventory)?)
}

fn get_reachable_idxs(
    game_data: &GameData,
    cx: LogicContext,
    inventory: &Inventory,
    ignore_tag: LocationTag,
) -> Result<HashSet<LocationIdx>> {
    let mut reachable = HashSet::new();
    for (idx, loc) in game_data.locations.iter().enumerate() {
        if loc.has_tag(ignore_tag) {
            continue;
        }
        if is_location_accessible(loc, cx, inventory)
            .with_context(|| format!("Checking location {}", loc.key))?
        {
            reachable.insert(idx);
        }
    }
    Ok(reachable)
}

impl<'a> CompletabilityChecker<'a> {
    pub fn new(game_data: &'a GameData, settings: LogicSettings) -> Self {
        let mut defs = game_data.defs.clone();
        if settings.enable_glitch_requirements {
            defs.merge(&game_data.glitch_defs);
        }
        CompletabilityChecker {
            game_data,
            settings,
            defs,
            inventory: Inventory::new(),
            progression_tokens: None,
            removed_portraits: vec![],
        }
    }

    pub fn logic_context(&self) -> LogicContext<'_> {
        LogicContext {
            defs: &self.defs,
            glitch_defs: &self.game_data.glitch_defs,
            settings: &self.settings,
        }
    }

    pub fn defs(&self) -> &DefinitionTable {
        &self.defs
    }

    pub fn check_requirement(&self, req: &Requirement) -> Result<bool> {
        evaluate(req, self.logic_context(), &self.inventory)
    }

    pub fn check_named_rule(&self, name: &str) -> Result<bool> {
        evaluate_symbol(name, self.logic_context(), &self.inventory)
            .with_context(|| format!("Checking {name}"))
    }

    pub fn is_game_beatable(&self) -> Result<bool> {
        self.check_named_rule(BEAT_GAME)
    }

    pub fn all_locations(&self) -> Vec<LocationKey> {
        self.game_data.location_isv.keys.clone()
    }

    pub fn is_accessible(&self, key: &LocationKey) -> Result<bool> {
        let loc = self
            .game_data
            .get_location(key)
            .with_context(|| format!("Unknown location {key}"))?;
        is_location_accessible(loc, self.logic_context(), &self.inventory)
            .with_context(|| format!("Checking location {key}"))
    }

    /// Filters `candidates` (all locations when `None`) down to the accessible ones, in the
    /// order each first appears.
    pub fn accessible_locations(&self, candidates: Option<&[LocationKey]>) -> Result<Vec<LocationKey>> {
        let mut accessible = vec![];
        match candidates {
            Some(keys) => {
                let mut seen: HashSet<LocationKey> = HashSet::new();
                for key in keys {
                    if seen.insert(*key) && self.is_accessible(key)? {
                        accessible.push(*key);
                    }
                }
            }
            None => {
                let cx = self.logic_context();
                for loc in &self.game_data.locations {
                    if is_location_accessible(loc, cx, &self.inventory)
                        .with_context(|| format!("Checking location {}", loc.key))?
                    {
                        accessible.push(loc.key);
                    }
                }
            }
        }
        Ok(accessible)
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn add_to_inventory(&mut self, token: Token) {
        self.inventory.add(token);
    }

    pub fn set_inventory<I: IntoIterator<Item = Token>>(&mut self, tokens: I) {
        self.inventory = tokens.into_iter().collect();
    }

    /// Replaces the binding of `name` for all later checks.
    pub fn override_definition(&mut self, name: &str, req: Requirement) {
        debug!("Overriding {name}: {req}");
        self.defs.set(name, req);
    }

    /// Symbols referenced somewhere that would fail to resolve when checked.
    pub fn undefined_references(&self) -> Vec<String> {
        let settings = &self.settings;
        let is_defined = |name: &str| {
            settings.context_rule(name).is_some()
                || self.defs.contains(name)
                || (!settings.enable_glitch_requirements
                    && self.game_data.glitch_defs.contains(name))
        };
        let mut seen: HashSet<&str> = HashSet::new();
        let mut undefined = vec![];
        let reqs = self
            .defs
            .iter()
            .map(|(_, req)| req)
            .chain(self.game_data.locations.iter().flat_map(|loc| {
                [&loc.room_requirement, &loc.entity_requirement].into_iter()
            }));
        for req in reqs {
            for name in req.references() {
                if seen.insert(name) && !is_defined(name) {
                    undefined.push(name.to_string());
                }
            }
        }
        undefined
    }

    pub fn initialize_progression_tokens(&mut self) -> Result<()> {
        if self.progression_tokens.is_some() {
            bail!("Progression tokens were already initialized");
        }

        let mut tokens: Vec<Token> = vec![];
        let mut seen: HashSet<ItemId> = HashSet::new();
        for (_, req) in self.defs.iter() {
            if let Requirement::Atom(Atom::Item(item_id)) = req {
                if seen.insert(*item_id) {
                    tokens.push(Token::Item(*item_id));
                }
            }
        }
        let named_flags = &self.game_data.named_flags;
        match self.settings.game {
            GameVariant::Ooe => {
                tokens.extend(named_flags.villagers.keys.iter().cloned().map(Token::Flag));
            }
            GameVariant::Por => {
                tokens.extend(
                    named_flags
                        .portraits
                        .keys
                        .iter()
                        .filter(|p| !self.removed_portraits.contains(p))
                        .cloned()
                        .map(Token::Flag),
                );
            }
            GameVariant::Dos => {}
        }
        info!("{} progression tokens", tokens.len());
        self.progression_tokens = Some(tokens);
        Ok(())
    }

    pub fn progression_tokens(&self) -> Result<&[Token]> {
        self.progression_tokens
            .as_deref()
            .context("Progression tokens have not been initialized")
    }

    /// For each progression token not yet held, the number of locations that would become
    /// accessible by adding just that token to the current inventory. Locations tagged with
    /// `ignore_tag` are not counted. The inventory is left as it was, even on error.
    pub fn rank_progression_tokens(&mut self, ignore_tag: LocationTag) -> Result<HashMap<Token, usize>> {
        let candidates: Vec<Token> = self
            .progression_tokens()?
            .iter()
            .filter(|t| !self.inventory.contains(t))
            .cloned()
            .collect();

        let game_data = self.game_data;
        let cx = LogicContext {
            defs: &self.defs,
            glitch_defs: &game_data.glitch_defs,
            settings: &self.settings,
        };
        let mut inventory = ScopedInventory::new(&mut self.inventory);
        let baseline = get_reachable_idxs(game_data, cx, &inventory, ignore_tag)?;
        debug!(
            "{} locations reachable before ranking {} tokens",
            baseline.len(),
            candidates.len()
        );

        let mut ranking = HashMap::new();
        for token in candidates {
            inventory.reset();
            inventory.add(token.clone());
            let reachable = get_reachable_idxs(game_data, cx, &inventory, ignore_tag)
                .with_context(|| format!("Ranking token {token}"))?;
            ranking.insert(token, reachable.difference(&baseline).count());
        }
        Ok(ranking)
    }

    /// Evaluates several symbols against the current inventory, sharing one evaluator.
    pub fn check_named_rules(&self, names: &[&str]) -> Result<Vec<bool>> {
        let mut evaluator = Evaluator::new(self.logic_context(), &self.inventory);
        names
            .iter()
            .map(|&name| evaluator.evaluate_symbol(name))
            .collect()
    }

    pub fn set_red_wall_souls(&mut self, souls: [ItemId; 4]) {
        for (i, soul) in souls.into_iter().enumerate() {
            self.override_definition(
                &format!("red_wall_soul_{i}"),
                Requirement::Atom(Atom::Item(soul)),
            );
        }
    }

    /// Drops portraits from the game. Their tokens stop being progression, and the seal boss and
    /// Nest of Evil requirements only ask for what remains. Returns the map percentage the Nest of
    /// Evil quest should require, if it changed.
    pub fn set_removed_portraits(&mut self, removed_portraits: &[String]) -> Result<Option<usize>> {
        ensure!(
            self.settings.game == GameVariant::Por,
            "Cannot set removed portraits in any game but PoR"
        );
        ensure!(
            self.progression_tokens.is_none(),
            "Portraits must be removed before progression tokens are initialized"
        );
        let mut removed = vec![];
        for portrait in removed_portraits {
            if portrait == NEST_OF_EVIL_PORTRAIT {
                continue;
            }
            get_portrait_info(portrait)?;
            removed.push(portrait.clone());
        }
        self.removed_portraits = removed;

        if removed_portraits.is_empty() {
            self.override_definition(
                "four_seal_bosses_killed",
                Requirement::all_of(&DEFAULT_SEAL_BOSSES),
            );
            return Ok(None);
        }

        let mut bosses_needed = vec![];
        let mut areas_needed = vec![];
        for info in &PORTRAITS {
            if self.removed_portraits.iter().any(|p| p == info.portrait) {
                continue;
            }
            bosses_needed.push(info.boss);
            areas_needed.push(info.area);
        }
        self.override_definition("four_seal_bosses_killed", Requirement::all_of(&bosses_needed));
        self.override_definition(
            "can_complete_nest_of_evil_quest",
            Requirement::all_of(&areas_needed),
        );

        let percent = usize::min(MAX_NEST_OF_EVIL_MAP_PERCENT, 111 * areas_needed.len());
        info!("Nest of Evil now requires {percent}% of the map");
        Ok(Some(percent))
    }

    /// For when the patcher removes the boss-death checks on these two portraits.
    pub fn remove_portrait_boss_prerequisites(&mut self) {
        self.override_definition(
            "13thstreet",
            Requirement::Atom(Atom::Flag("portrait_13th_street".to_string())),
        );
        self.override_definition(
            "burntparadise",
            Requirement::Atom(Atom::Flag("portrait_burnt_paradise".to_string())),
        );
    }

    /// Paranoia isn't needed to reach Aguni once bosses are shuffled.
    pub fn remove_aguni_paranoia_requirement(&mut self) {
        self.override_definition("can_kill_aguni", Requirement::Atom(Atom::Literal(true)));
    }
}
