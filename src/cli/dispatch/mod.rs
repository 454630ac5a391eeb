use crate::{cli::actions::Action, exporter::Settings};
use anyhow::{Result, anyhow};
use clap::ArgMatches;
use std::{path::PathBuf, time::Duration};
use tracing::info;

const RESERVED_PATHS: &[&str] = &["/metrics", "/health"];

pub fn handler(matches: &ArgMatches) -> Result<Action> {
    // Get the port or return an error
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .ok_or_else(|| anyhow!("Port is required. Please provide it using the --port flag."))?;

    // Get the listen address (None means auto-detect)
    let listen = matches.get_one::<String>("listen").cloned();

    let config_file = matches
        .get_one::<String>("config.file")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("Configuration file is required, use --config.file"))?;

    let basic_path = required(matches, "web.basic-telemetry-path")?;
    let enhanced_path = required(matches, "web.enhanced-telemetry-path")?;

    if basic_path == enhanced_path
        || RESERVED_PATHS
            .iter()
            .any(|p| *p == basic_path || *p == enhanced_path)
    {
        return Err(anyhow!(
            "telemetry paths {basic_path} and {enhanced_path} must differ from each other and from {}",
            RESERVED_PATHS.join(", ")
        ));
    }

    let basic_exclude = basic_excludes(matches);

    if !basic_exclude.is_empty() {
        info!(excluded = ?basic_exclude, "basic metrics excluded");
    }

    Ok(Action::Run {
        port,
        listen,
        settings: Settings {
            config_file,
            basic_path,
            enhanced_path,
            basic_exclude,
            scrape_timeout: matches
                .get_one::<u64>("scrape-timeout")
                .map(|secs| Duration::from_secs(*secs)),
            trace: matches.get_flag("log.trace"),
        },
    })
}

fn required(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .ok_or_else(|| anyhow!("--{id} is required"))
}

fn basic_excludes(matches: &ArgMatches) -> Vec<String> {
    matches
        .get_many::<String>("basic.exclude")
        .map(|vals| {
            vals.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
