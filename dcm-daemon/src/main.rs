//! Data Call Manager Daemon
//!
//! Runs the data call engine for every SIM slot against virtual modems.
//!
//! - `run` loads the settings, brings data up and tears everything down on Ctrl-C
//! - `check` reports APN entries that would be dropped at load
//! - `example-config` prints a settings file to start from, optionally saving it

mod run;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dcm_engine::Settings;
use dcm_protocol::{ApnProfile, Purpose, SlotId};
use tracing_subscriber::EnvFilter;

/// Cellular data call manager.
#[derive(Parser, Debug)]
#[command(name = "datacalld", about = "Cellular data call manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the manager against simulated modems
    Run {
        /// Settings file (defaults to the XDG config location)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of SIM slots to simulate
        #[arg(long)]
        slots: Option<usize>,

        /// Delay applied to every simulated modem response, in milliseconds
        #[arg(long)]
        latency_ms: Option<u64>,
    },

    /// Validate a settings file
    Check {
        /// Settings file (defaults to the XDG config location)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print an example settings file
    ExampleConfig {
        /// Also write it to the XDG config location
        #[arg(long)]
        write: bool,
    },
}

/// Group profiles the way the supervisor will share connections
fn connection_groups(profiles: &[ApnProfile]) -> Vec<(String, Vec<Purpose>)> {
    let mut groups: Vec<(&ApnProfile, Vec<Purpose>)> = Vec::new();
    for profile in profiles {
        match groups.iter_mut().find(|(p, _)| p.shares_with(profile)) {
            Some((_, purposes)) => purposes.extend(profile.purposes.iter().copied()),
            None => groups.push((profile, profile.purposes.clone())),
        }
    }
    groups
        .into_iter()
        .map(|(profile, purposes)| (profile.apn.clone(), purposes))
        .collect()
}

fn load_settings(config: Option<PathBuf>) -> anyhow::Result<Settings> {
    match config {
        Some(path) => Settings::load_from(&path)
            .with_context(|| format!("loading settings from {}", path.display())),
        None => Ok(Settings::load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "datacalld=info,dcm_engine=info,dcm_protocol=info,dcm_sim=info".into()
        }))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            slots,
            latency_ms,
        } => {
            let settings = load_settings(config)?;
            let options = run::RunOptions {
                slots: slots.unwrap_or(settings.slots.len()).max(1),
                latency: latency_ms.map(std::time::Duration::from_millis),
            };
            run::run(settings, options).await
        }
        Command::Check { config } => {
            let settings = load_settings(config)?;
            for index in 0..settings.slots.len() {
                let profiles = settings.slot_profiles(SlotId(index)).unwrap_or_default();
                for (apn, purposes) in connection_groups(&profiles) {
                    println!("slot {index}: {apn} -> {purposes:?}");
                }
            }
            let problems = settings.validate();
            if problems.is_empty() {
                println!("settings OK ({} slots)", settings.slots.len());
                return Ok(());
            }
            for problem in &problems {
                println!("{problem}");
            }
            anyhow::bail!("{} problems found", problems.len())
        }
        Command::ExampleConfig { write } => {
            let settings = Settings::example();
            println!("{}", serde_json::to_string_pretty(&settings)?);
            if write {
                settings.save().context("writing example settings")?;
                if let Some(path) = Settings::settings_path() {
                    eprintln!("wrote {}", path.display());
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_groups_follow_sharing() {
        let profiles = vec![
            ApnProfile::new("internet").with_purposes([Purpose::Default]),
            ApnProfile::new("internet").with_purposes([Purpose::Supl]),
            ApnProfile::new("mms").with_purposes([Purpose::Mms]),
        ];
        assert_eq!(
            connection_groups(&profiles),
            vec![
                ("internet".to_string(), vec![Purpose::Default, Purpose::Supl]),
                ("mms".to_string(), vec![Purpose::Mms]),
            ]
        );
    }

    #[test]
    fn test_cli_parses_run_options() {
        let cli = Cli::parse_from(["datacalld", "run", "--slots", "2"]);
        assert!(matches!(
            cli.command,
            Command::Run { slots: Some(2), config: None, latency_ms: None }
        ));
    }
}
