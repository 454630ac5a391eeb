use crate::exporter::GIT_COMMIT_HASH;
use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

/// HTTP paths must be absolute to be routed.
fn telemetry_path(path: &str) -> Result<String, String> {
    if path.starts_with('/') && path.len() > 1 {
        Ok(path.to_string())
    } else {
        Err(format!("'{path}' must start with '/' and name a path"))
    }
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("rds_exporter")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(GIT_COMMIT_HASH)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("9042")
                .env("RDS_EXPORTER_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("listen")
                .short('l')
                .long("listen")
                .help("IP address to bind to, default tries [::] then 0.0.0.0")
                .env("RDS_EXPORTER_LISTEN")
                .value_name("IP"),
        )
        .arg(
            Arg::new("config.file")
                .short('c')
                .long("config.file")
                .help("Path to the instances configuration file")
                .default_value("config.yml")
                .env("RDS_EXPORTER_CONFIG_FILE")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("web.basic-telemetry-path")
                .long("web.basic-telemetry-path")
                .help("Path under which to expose basic metrics")
                .default_value("/basic")
                .value_parser(telemetry_path),
        )
        .arg(
            Arg::new("web.enhanced-telemetry-path")
                .long("web.enhanced-telemetry-path")
                .help("Path under which to expose enhanced metrics")
                .default_value("/enhanced")
                .value_parser(telemetry_path),
        )
        .arg(
            Arg::new("basic.exclude")
                .long("basic.exclude")
                .help("Comma-separated list of basic metric names to exclude")
                .env("RDS_EXPORTER_BASIC_EXCLUDE")
                .value_name("aws_rds_deadlocks_average,...")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("scrape-timeout")
                .long("scrape-timeout")
                .help("Per-instance scrape deadline in seconds, no deadline if unset")
                .env("RDS_EXPORTER_SCRAPE_TIMEOUT")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("log.trace")
                .long("log.trace")
                .help("Log every AWS request and response (will log credentials)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase verbosity, -vv for debug")
                .action(ArgAction::Count),
        )
}
