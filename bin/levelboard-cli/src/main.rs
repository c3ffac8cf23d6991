//! Levelboard CLI - operator tool for guild shards
//!
//! Opens shard databases directly through the registry. Must not run while
//! another process has the same data directory open.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use levelboard_common::{Config, GuildId, UserId, unix_now};
use levelboard_store::{GuildShard, LevelProgress, LevelReward, ShardRegistry, UserRecord};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "levelboard-cli")]
#[command(about = "Levelboard operator CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "levelboard.toml")]
    config: PathBuf,

    /// Data directory (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Print JSON instead of tables
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show a page of the leaderboard
    Leaderboard {
        /// Guild ID
        guild: u64,
        /// First rank to show (1-based)
        #[arg(long, default_value = "1")]
        start: u64,
        /// Number of entries
        #[arg(long, default_value = "20")]
        count: usize,
    },
    /// Show a user's rank
    Rank {
        /// Guild ID
        guild: u64,
        /// User ID
        user: u64,
    },
    /// Show a user's stored record
    User {
        /// Guild ID
        guild: u64,
        /// User ID
        user: u64,
    },
    /// Grant XP to a user, ignoring the cooldown
    Grant {
        /// Guild ID
        guild: u64,
        /// User ID
        user: u64,
        /// Amount of XP (> 0)
        amount: i64,
    },
    /// Guild configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    /// Unlink a user from the leaderboard and erase the record
    RemoveUser {
        /// Guild ID
        guild: u64,
        /// User ID
        user: u64,
    },
    /// Check leaderboard chain consistency
    Verify {
        /// Guild ID
        guild: u64,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the guild configuration
    Show {
        /// Guild ID
        guild: u64,
    },
    /// Change guild settings
    Set {
        /// Guild ID
        guild: u64,
        #[arg(long)]
        min_xp: Option<u32>,
        #[arg(long)]
        max_xp: Option<u32>,
        /// Seconds between grants
        #[arg(long)]
        cooldown: Option<u32>,
        /// Minimum level for level-up notifications
        #[arg(long)]
        notify_level: Option<u32>,
        /// Display name for leaderboard pages
        #[arg(long)]
        name: Option<String>,
        /// Zone to exempt from XP (repeatable)
        #[arg(long)]
        restrict_zone: Vec<u64>,
        /// Zone to stop exempting (repeatable)
        #[arg(long)]
        unrestrict_zone: Vec<u64>,
        /// Reward as LEVEL:REWARD (repeatable)
        #[arg(long, value_parser = parse_reward)]
        add_reward: Vec<LevelReward>,
        /// Remove every configured reward before adding
        #[arg(long)]
        clear_rewards: bool,
    },
}

/// Parse "LEVEL:REWARD" into a reward entry.
fn parse_reward(s: &str) -> Result<LevelReward> {
    let (level, reward) = s
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Invalid reward '{s}': expected LEVEL:REWARD"))?;
    Ok(LevelReward {
        level: level
            .trim()
            .parse()
            .with_context(|| format!("Invalid level in '{s}'"))?,
        reward: reward
            .trim()
            .parse()
            .with_context(|| format!("Invalid reward id in '{s}'"))?,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn display_name(user: &UserRecord) -> String {
    user.last_known_name
        .clone()
        .unwrap_or_else(|| user.id.to_string())
}

fn print_user(user: &UserRecord, rank: Option<u64>) {
    let progress = LevelProgress::from(user);
    println!("User: {}", user.id);
    println!("==========");
    println!("Name:        {}", display_name(user));
    println!(
        "Rank:        {}",
        rank.map_or_else(|| "-".to_string(), |r| r.to_string())
    );
    println!("Total XP:    {}", user.total_xp);
    println!("Level:       {}", progress.level);
    println!("Progress:    {} / {}", progress.partial_xp, progress.needed);
    println!("Last grant:  {}", user.last_grant_time);
}

#[derive(Serialize)]
struct UserView<'a> {
    record: &'a UserRecord,
    rank: Option<u64>,
    progress: LevelProgress,
}

fn open_shard(registry: &ShardRegistry, guild: u64) -> Result<Arc<GuildShard>> {
    registry
        .get_or_create(GuildId::new(guild))
        .with_context(|| format!("Failed to open shard for guild {guild}"))
}

fn run(args: Args, registry: &ShardRegistry) -> Result<()> {
    match args.command {
        Commands::Leaderboard {
            guild,
            start,
            count,
        } => {
            let shard = open_shard(registry, guild)?;
            let entries = shard.walk_leaderboard(start, count)?;
            if args.json {
                return print_json(&entries);
            }
            let config = shard.config();
            println!(
                "Leaderboard for {} ({} users)",
                config.display_name.unwrap_or_else(|| guild.to_string()),
                shard.user_count()?
            );
            println!("{:<6} {:<22} {:<32} {:>6} {:>12}", "RANK", "USER ID", "NAME", "LEVEL", "XP");
            println!("{}", "-".repeat(82));
            for entry in &entries {
                println!(
                    "{:<6} {:<22} {:<32} {:>6} {:>12}",
                    entry.rank,
                    entry.record.id,
                    display_name(&entry.record),
                    entry.record.level,
                    entry.record.total_xp
                );
            }
        }
        Commands::Rank { guild, user } | Commands::User { guild, user } => {
            let shard = open_shard(registry, guild)?;
            let record = shard.get_user(UserId::new(user))?;
            let rank = shard.rank_of(UserId::new(user))?;
            if args.json {
                return print_json(&UserView {
                    record: &record,
                    rank,
                    progress: LevelProgress::from(&record),
                });
            }
            if !record.is_linked() {
                println!("User {user} is unknown or has never received XP");
                return Ok(());
            }
            print_user(&record, rank);
        }
        Commands::Grant {
            guild,
            user,
            amount,
        } => {
            let shard = open_shard(registry, guild)?;
            let outcome = shard.grant_xp(UserId::new(user), amount, unix_now())?;
            if args.json {
                return print_json(&outcome.record);
            }
            println!("Granted {amount} XP to {user}");
            if outcome.leveled_up() {
                println!(
                    "Level up: {} -> {}",
                    outcome.previous_level, outcome.record.level
                );
            }
            print_user(&outcome.record, shard.rank_of(UserId::new(user))?);
        }
        Commands::Config { action } => match action {
            ConfigCommands::Show { guild } => {
                let shard = open_shard(registry, guild)?;
                print_json(&shard.config())?;
            }
            ConfigCommands::Set {
                guild,
                min_xp,
                max_xp,
                cooldown,
                notify_level,
                name,
                restrict_zone,
                unrestrict_zone,
                add_reward,
                clear_rewards,
            } => {
                let shard = open_shard(registry, guild)?;
                let updated = shard.update_config(|c| {
                    if let Some(v) = min_xp {
                        c.min_xp_per_grant = v;
                    }
                    if let Some(v) = max_xp {
                        c.max_xp_per_grant = v;
                    }
                    if let Some(v) = cooldown {
                        c.seconds_between_grants = v;
                    }
                    if let Some(v) = notify_level {
                        c.minimum_level_for_notification = v;
                    }
                    if name.is_some() {
                        c.display_name = name;
                    }
                    c.restricted_zones.extend(restrict_zone);
                    for zone in &unrestrict_zone {
                        c.restricted_zones.remove(zone);
                    }
                    if clear_rewards {
                        c.level_rewards.clear();
                    }
                    c.level_rewards.extend(add_reward);
                })?;
                info!(guild, "Guild config updated");
                print_json(&updated)?;
            }
        },
        Commands::RemoveUser { guild, user } => {
            let shard = open_shard(registry, guild)?;
            if shard.remove_user(UserId::new(user))? {
                println!("Removed user {user}");
            } else {
                println!("User {user} not found");
            }
        }
        Commands::Verify { guild } => {
            let shard = open_shard(registry, guild)?;
            let report = shard.verify()?;
            if args.json {
                return print_json(&report);
            }
            println!("Chain OK: {} linked / {} stored", report.linked, report.stored);
            if !report.undecodable.is_empty() {
                warn!(guild, count = report.undecodable.len(), "Undecodable records skipped");
                println!("Undecodable user keys: {:?}", report.undecodable);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load config file if it exists, CLI takes precedence
    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(dir) = &args.data_dir {
        config.storage.data_dir.clone_from(dir);
    }
    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(data_dir = %config.storage.data_dir.display(), "Opening shard registry");
    let registry = ShardRegistry::new(config)?;

    let result = run(args, &registry);
    let report = registry.shutdown_all();
    if !report.failed.is_empty() {
        anyhow::bail!("Failed to close {} shard(s)", report.failed.len());
    }
    result
}
