use std::{
    io::BufRead,
    path::PathBuf,
    sync::Arc,
    thread,
};

use anyhow::{Context as _, Result, bail};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use dialoguer::{Password, theme::ColorfulTheme};
use serde::Serialize;

use crate::{
    auth::{self, LOGIN_POLL_ATTEMPTS, LOGIN_POLL_INTERVAL, LoginSession},
    configuration::{AppConfig, ElevationMethod},
    connection::{CONFIRM_ATTEMPTS, CONFIRM_INTERVAL, Connection, confirm_connected},
    desktop::DesktopEntries,
    fetch::HttpFetcher,
    installer::{InstallError, Installer},
    layout::InstallLayout,
    license::{CliLicenseSource, LicenseReport, LicenseSource, Tier},
    locations::fetch_locations,
    monitor::{MonitorUpdate, StatusMonitor},
    sequence::SequenceReport,
    settings::{Settings, TunRoutingMode, UpdateChannel, VpnMode},
    site::{SiteCache, account_link},
    status::{CliStatusSource, StatusSource},
    system::{
        elevation::Elevator,
        platform::{self, find_cli_binary},
    },
    uninstall::{UninstallComponents, Uninstaller},
    updater::{MANAGER_VERSION, ToolUpdate, ToolUpdater, apply_manager_update, check_manager_update},
    vpn_cli::VpnCli,
};

#[derive(Parser)]
#[command(name = "adguardvpn-manager")]
#[command(version)]
#[command(about = "Installs, signs in to and watches the AdGuard VPN command-line client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file (defaults to ~/.config/adguardvpn-manager/config.toml)
    #[arg(long, global = true, env = "ADGUARDVPN_MANAGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print status, license, locations, settings and update checks as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show whether the VPN is connected and where to
    Status,

    /// Keep polling status and license, printing every change
    Watch,

    /// Connect, optionally to a city, country or ISO code
    Connect {
        #[arg(short, long)]
        location: Option<String>,
    },

    Disconnect,

    /// Sign in through the browser
    Login,

    /// Sign out, disconnecting first
    Logout,

    /// List available locations
    Locations,

    /// Show the subscription
    License,

    /// Read or change settings of the VPN client
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },

    /// Show or edit the manager's own configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },

    /// Download and install the VPN client
    Install {
        /// Client release to install (defaults to cli_version)
        #[arg(long)]
        version: Option<String>,

        /// Do not create launcher entries
        #[arg(long)]
        no_desktop_entries: bool,

        #[command(flatten)]
        password: PasswordArgs,
    },

    /// Remove installed components
    Uninstall {
        /// Keep the client binary, install directory and symlink
        #[arg(long)]
        keep_vpn: bool,

        /// Also remove the client's account and settings
        #[arg(long)]
        configuration: bool,

        /// Keep the manager directory and launcher entries
        #[arg(long)]
        keep_manager: bool,

        #[command(flatten)]
        password: PasswordArgs,
    },

    /// Check for or apply updates of the VPN client
    Update {
        #[command(subcommand)]
        action: UpdateCommand,
    },

    /// Update the manager from the configured version manifest
    SelfUpdate {
        /// Only report whether an update exists
        #[arg(long)]
        check: bool,
    },

    /// Print the reachable AdGuard VPN website for the account
    Site {
        /// Open it in the browser
        #[arg(long)]
        open: bool,
    },

    /// Manage launcher entries
    Desktop {
        #[command(subcommand)]
        action: DesktopCommand,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommand {
    Show,
    /// SOCKS or TUN
    Mode { value: Option<String> },
    SocksPort { value: Option<String> },
    /// Dotted IPv4 address or "default"
    Dns { value: Option<String> },
    /// AUTO or NONE
    TunRouting { value: Option<String> },
    /// release or beta
    UpdateChannel { value: Option<String> },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    Show,
    Path,
    Set { key: String, value: String },
}

#[derive(Subcommand)]
pub enum UpdateCommand {
    Check,
    Apply,
}

#[derive(Subcommand)]
pub enum DesktopCommand {
    Create,
    Remove,
}

#[derive(Args, Default)]
pub struct PasswordArgs {
    /// Administrator password for sudo
    #[arg(long, env = "ADGUARDVPN_MANAGER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Read the administrator password from the first line of stdin
    #[arg(long)]
    pub password_stdin: bool,
}

/// What the commands share: the loaded configuration and the client.
pub struct Context {
    pub config: AppConfig,
    pub config_path: PathBuf,
    pub json: bool,
    cli: VpnCli,
}

impl Context {
    pub fn new(config: AppConfig, config_path: PathBuf, json: bool) -> Self {
        let (binary, found) = find_cli_binary(&config.binary);
        log::info!("[startup] client binary: {binary} (found={found})");
        Self {
            config,
            config_path,
            json,
            cli: VpnCli::new(binary),
        }
    }

    fn status_source(&self) -> CliStatusSource<VpnCli> {
        CliStatusSource::new(self.cli.clone(), self.config.status_timeout())
    }

    fn license_source(&self) -> CliLicenseSource<VpnCli> {
        CliLicenseSource::new(self.cli.clone(), self.config.license_timeout())
    }

    fn layout(&self) -> Result<InstallLayout> {
        self.config.layout().map_err(anyhow::Error::msg)
    }

    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }
}

pub fn run(context: &mut Context, command: Commands) -> Result<()> {
    match command {
        Commands::Status => status(context),
        Commands::Watch => watch(context),
        Commands::Connect { location } => connect(context, location.as_deref()),
        Commands::Disconnect => {
            Connection::new(&context.cli)
                .disconnect()
                .map_err(anyhow::Error::msg)?;
            println!("Disconnected");
            Ok(())
        }
        Commands::Login => login(context),
        Commands::Logout => {
            auth::logout(&context.cli, &context.status_source()).map_err(anyhow::Error::msg)?;
            println!("Signed out");
            Ok(())
        }
        Commands::Locations => locations(context),
        Commands::License => license(context),
        Commands::Settings { action } => settings(context, action),
        Commands::Config { action } => config(context, action),
        Commands::Install {
            version,
            no_desktop_entries,
            password,
        } => install(context, version.as_deref(), !no_desktop_entries, &password),
        Commands::Uninstall {
            keep_vpn,
            configuration,
            keep_manager,
            password,
        } => uninstall(
            context,
            UninstallComponents {
                vpn: !keep_vpn,
                configuration,
                manager: !keep_manager,
            },
            &password,
        ),
        Commands::Update { action } => update(context, action),
        Commands::SelfUpdate { check } => self_update(context, check),
        Commands::Site { open } => site(context, open),
        Commands::Desktop { action } => desktop(context, action),
    }
}

/// No subcommand: install when missing, sign in when signed out, then watch.
pub fn startup(context: &mut Context) -> Result<()> {
    let layout = context.layout()?;
    if !layout.is_installed() {
        println!("AdGuard VPN client is not installed; installing it now.");
        install(context, None, true, &PasswordArgs::default())?;
        if !layout.is_installed() {
            return Ok(());
        }
        *context = Context::new(
            context.config.clone(),
            context.config_path.clone(),
            context.json,
        );
    }

    if !auth::is_logged_in(&context.cli) {
        login(context)?;
    }

    watch(context)
}

fn status(context: &Context) -> Result<()> {
    let state = context.status_source().current_status();
    context.print(&state, || state.to_string())
}

fn watch(context: &Context) -> Result<()> {
    let mut monitor = StatusMonitor::new(
        Arc::new(context.status_source()),
        Arc::new(context.license_source()),
        context.config.license_refresh_ticks,
    );
    let json = context.json;

    monitor.run(context.config.poll_interval(), |update| {
        if json {
            match serde_json::to_string(update) {
                Ok(line) => println!("{line}"),
                Err(error) => log::warn!("[monitor] failed to serialize update: {error}"),
            }
            return true;
        }

        match update {
            MonitorUpdate::Status(state) => println!("{state}"),
            MonitorUpdate::License(LicenseReport::Available(info)) => {
                if let Some(label) = info.account_label(Local::now().date_naive()) {
                    println!("Account: {label}");
                }
            }
            MonitorUpdate::License(LicenseReport::Unavailable(reason)) => {
                println!("License unavailable: {reason:?}");
            }
        }
        true
    });
    Ok(())
}

fn connect(context: &Context, location: Option<&str>) -> Result<()> {
    Connection::new(&context.cli)
        .connect(location)
        .map_err(anyhow::Error::msg)?;

    let state = confirm_connected(&context.status_source(), CONFIRM_ATTEMPTS, || {
        thread::sleep(CONFIRM_INTERVAL)
    });
    if !state.is_connected() {
        bail!("The client did not report a connection after {CONFIRM_ATTEMPTS} checks");
    }
    println!("{state}");
    Ok(())
}

fn login(context: &Context) -> Result<()> {
    let session = LoginSession::start(context.cli.binary()).map_err(anyhow::Error::msg)?;
    println!("Open this link to sign in:\n{}", session.url);
    platform::open_url(&session.url);

    let signed_in = auth::wait_for_login(&context.cli, LOGIN_POLL_ATTEMPTS, |attempt| {
        println!(
            "Waiting for sign-in ({attempt}/{LOGIN_POLL_ATTEMPTS}), next check in {}s",
            LOGIN_POLL_INTERVAL.as_secs()
        );
        thread::sleep(LOGIN_POLL_INTERVAL);
    });
    session.finish();

    if !signed_in {
        bail!("Sign-in was not completed");
    }
    println!("Signed in");
    Ok(())
}

fn locations(context: &Context) -> Result<()> {
    let locations =
        fetch_locations(&context.cli, context.config.status_timeout()).map_err(anyhow::Error::msg)?;
    context.print(&locations, || {
        locations
            .iter()
            .map(|location| {
                format!(
                    "{:<4} {:<24} {:<24} {:>5}",
                    location.iso, location.country, location.city, location.ping
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

fn license(context: &Context) -> Result<()> {
    let report = context.license_source().license();
    context.print(&report, || match &report {
        LicenseReport::Available(info) => info.summary(Local::now().date_naive()),
        LicenseReport::Unavailable(reason) => format!("License unavailable: {reason:?}"),
    })
}

fn settings(context: &Context, action: SettingsCommand) -> Result<()> {
    let settings = Settings::new(&context.cli);
    let message = |result: Result<String, String>| -> Result<()> {
        println!("{}", result.map_err(anyhow::Error::msg)?);
        Ok(())
    };

    match action {
        SettingsCommand::Show => {
            let snapshot = settings.snapshot();
            context.print(&snapshot, || format!("{snapshot:#?}"))
        }
        SettingsCommand::Mode { value: None } => {
            message(settings.mode().map(|mode| mode.to_string()))
        }
        SettingsCommand::Mode { value: Some(value) } => {
            let mode: VpnMode = value.parse().map_err(anyhow::Error::msg)?;
            message(settings.set_mode(mode).map(|()| format!("Mode set to {mode}")))
        }
        SettingsCommand::SocksPort { value: None } => message(settings.socks_port()),
        SettingsCommand::SocksPort { value: Some(value) } => message(
            settings
                .set_socks_port(&value)
                .map(|port| format!("SOCKS port set to {port}")),
        ),
        SettingsCommand::Dns { value: None } => message(settings.dns()),
        SettingsCommand::Dns { value: Some(value) } => message(
            settings
                .set_dns(&value)
                .map(|address| format!("DNS set to {address}")),
        ),
        SettingsCommand::TunRouting { value: None } => {
            message(settings.tun_routing_mode().map(|mode| mode.to_string()))
        }
        SettingsCommand::TunRouting { value: Some(value) } => {
            let mode: TunRoutingMode = value.parse().map_err(anyhow::Error::msg)?;
            message(
                settings
                    .set_tun_routing_mode(mode)
                    .map(|()| format!("TUN routing set to {mode}")),
            )
        }
        SettingsCommand::UpdateChannel { value: None } => {
            message(settings.update_channel().map(|channel| channel.to_string()))
        }
        SettingsCommand::UpdateChannel { value: Some(value) } => {
            let channel: UpdateChannel = value.parse().map_err(anyhow::Error::msg)?;
            message(
                settings
                    .set_update_channel(&channel)
                    .map(|()| format!("Update channel set to {channel}")),
            )
        }
    }
}

fn config(context: &mut Context, action: ConfigCommand) -> Result<()> {
    match action {
        ConfigCommand::Show => {
            print!("{}", toml::to_string_pretty(&context.config)?);
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", context.config_path.display());
            Ok(())
        }
        ConfigCommand::Set { key, value } => {
            context.config.set(&key, &value).map_err(anyhow::Error::msg)?;
            context
                .config
                .save(&context.config_path)
                .map_err(anyhow::Error::msg)
        }
    }
}

/// Reads the sudo password from the flag, stdin or a hidden prompt.
/// `None` means the user entered nothing.
fn read_password(arguments: &PasswordArgs) -> Result<Option<String>> {
    if let Some(password) = &arguments.password {
        return Ok(Some(password.clone()).filter(|password| !password.is_empty()));
    }

    let password = if arguments.password_stdin {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read the password")?;
        line.trim_end_matches(['\r', '\n']).to_string()
    } else {
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt("Administrator password")
            .allow_empty_password(true)
            .interact()
            .context("Failed to read the password")?
    };
    Ok(Some(password).filter(|password| !password.is_empty()))
}

/// `Ok(None)` when the password prompt was cancelled.
fn build_elevator(
    context: &Context,
    arguments: &PasswordArgs,
) -> Result<Option<Box<dyn Elevator>>> {
    let password = match context.config.elevation {
        ElevationMethod::Sudo => match read_password(arguments)? {
            Some(password) => Some(password),
            None => return Ok(None),
        },
        ElevationMethod::Pkexec | ElevationMethod::None => None,
    };
    context
        .config
        .elevation
        .elevator(password.as_deref())
        .map(Some)
        .map_err(anyhow::Error::msg)
}

fn print_report(report: &SequenceReport) {
    for step in &report.steps {
        println!("{step}");
    }
}

fn install(
    context: &Context,
    version: Option<&str>,
    desktop_entries: bool,
    password: &PasswordArgs,
) -> Result<()> {
    let layout = context.layout()?;
    let user = platform::current_user().map_err(anyhow::Error::msg)?;
    let Some(elevator) = build_elevator(context, password)? else {
        println!("Installation cancelled");
        return Ok(());
    };

    let version = version.unwrap_or(&context.config.cli_version);
    let result = Installer::new(&layout, elevator.as_ref(), &HttpFetcher, user)
        .with_desktop_entries(desktop_entries)
        .install(version);

    match result {
        Ok(summary) => {
            print_report(&summary.report);
            println!("Installed {}", summary.binary.display());
            Ok(())
        }
        Err(error) => {
            if let InstallError::Step { report, .. } = &error {
                print_report(report);
            }
            Err(error.into())
        }
    }
}

fn uninstall(
    context: &Context,
    components: UninstallComponents,
    password: &PasswordArgs,
) -> Result<()> {
    let layout = context.layout()?;
    let Some(elevator) = build_elevator(context, password)? else {
        println!("Uninstall cancelled");
        return Ok(());
    };

    let report = Uninstaller::new(&layout, elevator.as_ref()).uninstall(components)?;
    print_report(&report);
    Ok(())
}

fn update(context: &Context, action: UpdateCommand) -> Result<()> {
    let updater = ToolUpdater::new(&context.cli);
    match action {
        UpdateCommand::Check => {
            let current = updater.current_version();
            let result = updater.check()?;
            context.print(&result, || match &result {
                ToolUpdate::Available { version: Some(version) } => {
                    format!("Update available: {version}")
                }
                ToolUpdate::Available { version: None } => "Update available".into(),
                ToolUpdate::UpToDate => format!(
                    "Up to date ({})",
                    current.as_deref().unwrap_or("version unknown")
                ),
                ToolUpdate::Unknown => "Could not tell whether an update exists".into(),
            })?;
        }
        UpdateCommand::Apply => {
            let output = updater.update()?;
            println!("{}", output.trim());
        }
    }
    Ok(())
}

fn self_update(context: &Context, check_only: bool) -> Result<()> {
    let Some(manifest_url) = context.config.version_url.as_deref() else {
        bail!("No version_url is configured; set it with `config set version_url <url>`");
    };

    let Some(manifest) = check_manager_update(&HttpFetcher, manifest_url, MANAGER_VERSION) else {
        println!("adguardvpn-manager {MANAGER_VERSION} is up to date");
        return Ok(());
    };

    println!("adguardvpn-manager {} is available", manifest.version);
    if check_only {
        return Ok(());
    }

    let layout = context.layout()?;
    apply_manager_update(&HttpFetcher, &manifest, &layout.manager_directory)?;
    println!("Updated; restart the manager to use {}", manifest.version);
    Ok(())
}

fn site(context: &Context, open: bool) -> Result<()> {
    let tier = match context.license_source().license() {
        LicenseReport::Available(info) => info.tier,
        LicenseReport::Unavailable(_) => Tier::Unknown,
    };
    let link = account_link(tier, SiteCache::system().available_site());
    println!("{}: {}", link.label, link.url);
    if open && !platform::open_url(&link.url) {
        bail!("Could not open {}", link.url);
    }
    Ok(())
}

fn desktop(context: &Context, action: DesktopCommand) -> Result<()> {
    let layout = context.layout()?;
    let entries = DesktopEntries::new(&layout);
    let actions = match action {
        DesktopCommand::Create => entries.create().map_err(anyhow::Error::msg)?,
        DesktopCommand::Remove => entries.remove(),
    };
    for action in actions {
        println!("{action}");
    }
    Ok(())
}
