use anyhow::{Context, Result, bail};
use clap::Parser;
use dsvrando::checker::CompletabilityChecker;
use dsvrando::settings::LogicSettings;
use dsvrando_game::{GameData, GameVariant, ItemId, LocationTag, NamedFlagSets, Token, normalize_name};
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use strum::VariantNames;

#[derive(Parser)]
struct Args {
    #[arg(long)]
    requirements: PathBuf,

    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long)]
    game: Option<String>,

    /// Comma-separated villager names
    #[arg(long, default_value = "")]
    villagers: String,

    /// Comma-separated portrait names
    #[arg(long, default_value = "")]
    portraits: String,

    #[arg(long)]
    enable_glitches: bool,

    #[arg(long)]
    open_world: bool,

    /// Comma-separated hex item ids held at the start
    #[arg(long, default_value = "")]
    items: String,

    /// Comma-separated villager or portrait flags held at the start
    #[arg(long, default_value = "")]
    flags: String,

    #[arg(long, default_value = "")]
    remove_portraits: String,

    #[arg(long)]
    rank: bool,

    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct Report {
    beatable: bool,
    accessible_locations: Vec<String>,
    ranking: Vec<(String, usize)>,
    nest_of_evil_map_percent: Option<usize>,
    undefined_references: Vec<String>,
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(normalize_name)
        .filter(|x| !x.is_empty())
        .collect()
}

fn get_settings(args: &Args) -> Result<LogicSettings> {
    let mut settings = match &args.settings {
        Some(path) => LogicSettings::load(path)?,
        None => LogicSettings::default(),
    };
    if let Some(game) = &args.game {
        settings.game = match GameVariant::from_str(game) {
            Ok(g) => g,
            Err(_) => bail!("Unknown game {game}; expected one of {:?}", GameVariant::VARIANTS),
        };
    }
    settings.enable_glitch_requirements |= args.enable_glitches;
    settings.open_world_map |= args.open_world;
    Ok(settings)
}

fn get_starting_tokens(args: &Args) -> Result<Vec<Token>> {
    let mut tokens = vec![];
    for item_str in split_list(&args.items) {
        let item_str = item_str.trim_start_matches("0x");
        let item_id = ItemId::from_str_radix(item_str, 16)
            .with_context(|| format!("Invalid item id {item_str}"))?;
        tokens.push(Token::Item(item_id));
    }
    tokens.extend(split_list(&args.flags).into_iter().map(Token::Flag));
    Ok(tokens)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let settings = get_settings(&args)?;
    let named_flags = NamedFlagSets::new(&split_list(&args.villagers), &split_list(&args.portraits));
    let game_data = GameData::load(&args.requirements, named_flags)?;

    let mut checker = CompletabilityChecker::new(&game_data, settings);
    let undefined_references = checker.undefined_references();
    for name in &undefined_references {
        warn!("Undefined requirement: {name}");
    }

    let removed_portraits = split_list(&args.remove_portraits);
    let nest_of_evil_map_percent = if removed_portraits.is_empty() {
        None
    } else {
        checker.set_removed_portraits(&removed_portraits)?
    };
    checker.initialize_progression_tokens()?;
    checker.set_inventory(get_starting_tokens(&args)?);

    let beatable = checker.is_game_beatable()?;
    let accessible = checker.accessible_locations(None)?;
    info!(
        "Beatable: {beatable}, {}/{} locations accessible",
        accessible.len(),
        checker.all_locations().len()
    );

    let mut ranking = vec![];
    if args.rank {
        let mut ranked: Vec<(Token, usize)> = checker
            .rank_progression_tokens(LocationTag::NoProgression)?
            .into_iter()
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for (token, count) in &ranked {
            info!("{token}: {count}");
        }
        ranking = ranked
            .into_iter()
            .map(|(token, count)| (token.to_string(), count))
            .collect();
    }

    if let Some(output_path) = &args.output {
        let report = Report {
            beatable,
            accessible_locations: accessible.iter().map(|k| k.to_string()).collect(),
            ranking,
            nest_of_evil_map_percent,
            undefined_references,
        };
        let report_str = serde_json::to_string_pretty(&report)?;
        std::fs::write(output_path, report_str)
            .with_context(|| format!("Unable to write {}", output_path.display()))?;
        info!("Wrote report to {}", output_path.display());
    }
    Ok(())
}
