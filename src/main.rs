mod ansi;
mod archive;
mod auth;
mod commands;
mod configuration;
mod connection;
mod desktop;
mod fetch;
mod installer;
mod layout;
mod license;
mod locations;
mod monitor;
mod sequence;
mod settings;
mod site;
mod status;
mod system;
mod uninstall;
mod updater;
mod vpn_cli;

use std::process::ExitCode;

use clap::Parser;

use crate::{
    commands::{Cli, Context},
    configuration::AppConfig,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "adguardvpn_manager=debug"
    } else {
        "adguardvpn_manager=info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    log::info!(
        "adguardvpn-manager v{} starting (RUST_LOG={})",
        env!("CARGO_PKG_VERSION"),
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("<default: {default_filter}>")),
    );

    if system::platform::is_root() {
        log::error!("[startup] refusing to run as root");
        eprintln!(
            "Run adguardvpn-manager as a regular user; it asks for the password when needed."
        );
        return ExitCode::FAILURE;
    }

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);
    let mut context = Context::new(config, config_path, cli.json);

    let result = match cli.command {
        Some(command) => commands::run(&mut context, command),
        None => commands::startup(&mut context),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            log::error!("[startup] {error:#}");
            eprintln!("Error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
