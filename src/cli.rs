use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use clap::{Parser, Subcommand, ValueEnum};
use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::config::store::{FilePreferences, PreferenceStore};
use crate::config::types::Rgb;
use crate::device::btle::BtleTransport;
use crate::device::codec::{Command, Effect};
use crate::device::connection::ConnectionManager;
use crate::device::types::{ConnectionState, DeviceEvent, FailureReason};
use crate::error::{AppRunError, DeviceError, TransportError};

#[derive(Parser, Debug)]
#[command(name = "bledob-control", version, about = "Control BLE LED strip controllers")]
pub struct Cli {
    /// Config file to use instead of the standard location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Device address, defaults to the last used device
    #[arg(long, short, global = true)]
    pub address: Option<String>,

    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    fn is_on(self) -> bool {
        self == Switch::On
    }
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// List nearby controllers
    Scan {
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },
    /// List the built-in effects
    Effects,
    Power {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Set a static color, as `<red> <green> <blue>` or as `#rrggbb`
    Color {
        #[arg(required = true, num_args = 1..=3)]
        values: Vec<String>,
    },
    Brightness {
        level: u8,
    },
    /// Start an effect, by name or by id (e.g. 0x8b)
    Effect {
        effect: String,
        #[arg(long)]
        speed: Option<u8>,
    },
    /// Connect to the last used device on startup of `watch`
    AutoConnect {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Stay connected and print connection events until interrupted
    Watch,
}

fn parse_effect(value: &str) -> Result<Effect, DeviceError> {
    let by_id = value
        .strip_prefix("0x")
        .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        .and_then(Effect::from_id);

    by_id
        .or_else(|| Effect::from_name(value))
        .ok_or_else(|| DeviceError::InvalidCommand { reason: format!("unknown effect {:?}", value) })
}

fn parse_color(values: &[String]) -> Result<Command, DeviceError> {
    let component = |value: &String| {
        value.parse::<u32>().map_err(|_| DeviceError::invalid_command(format!("invalid color component {:?}", value)))
    };

    match values {
        [hex] => Rgb::from_hex(hex)
            .map(|color| Command::SetColor { red: color.red, green: color.green, blue: color.blue })
            .ok_or_else(|| DeviceError::invalid_command(format!("invalid color {:?}, expected #rrggbb", hex))),
        [red, green, blue] => Command::color(component(red)?, component(green)?, component(blue)?),
        _ => Err(DeviceError::invalid_command("expected #rrggbb or three color components")),
    }
}

fn failure_error(reason: FailureReason, attempts: u32) -> DeviceError {
    match reason {
        FailureReason::ScanUnavailable => DeviceError::ScanUnavailable { source: TransportError::AdapterUnavailable },
        FailureReason::NoCompatibleService => DeviceError::NoCompatibleService,
        FailureReason::ReconnectExhausted => DeviceError::ReconnectExhausted { attempts },
    }
}

async fn wait_connected(events: &mut UnboundedReceiver<DeviceEvent>, attempts: u32) -> Result<(), DeviceError> {
    while let Some(event) = events.next().await {
        match event {
            DeviceEvent::StateChange(ConnectionState::Connected { .. }) => return Ok(()),
            DeviceEvent::StateChange(ConnectionState::Failed { reason }) => return Err(failure_error(reason, attempts)),
            DeviceEvent::StateChange(state) => info!("{}", state),
            DeviceEvent::Error(kind) => info!("{:?}", kind),
        }
    }
    Err(DeviceError::UnexpectedDisconnect)
}

async fn new_manager(preferences: &Arc<FilePreferences>) -> Result<ConnectionManager<BtleTransport>, DeviceError> {
    let transport = BtleTransport::new()
        .await
        .map_err(|source| DeviceError::ScanUnavailable { source })?;
    Ok(ConnectionManager::new(Arc::new(transport), preferences.connection(), preferences.clone()))
}

async fn send(address: String, command: Command, preferences: &Arc<FilePreferences>) -> Result<(), AppRunError> {
    let manager = new_manager(preferences).await?;
    let attempts = preferences.connection().max_reconnect_attempts;
    let mut events = manager.subscribe();

    let result = async {
        manager.connect(&address)?;
        wait_connected(&mut events, attempts).await?;
        manager.send_command(command).await
    }.await;

    manager.shutdown().await;
    result?;
    println!("Sent {:?} to {}", command, address);
    Ok(())
}

async fn scan(timeout: Duration, preferences: &Arc<FilePreferences>) -> Result<(), AppRunError> {
    let manager = new_manager(preferences).await?;
    let mut session = manager.scanner().scan(timeout, manager.filter()).await?;

    while let Some(record) = session.next().await {
        println!("{}", record);
    }

    let records = session.finish().await;
    if records.is_empty() {
        println!("No devices found");
    }
    Ok(())
}

async fn watch(address: Option<String>, preferences: &Arc<FilePreferences>) -> Result<(), AppRunError> {
    let manager = new_manager(preferences).await?;
    let mut events = manager.subscribe();

    match address {
        Some(address) => manager.connect(&address)?,
        None => {
            if !manager.auto_connect()? {
                let address = preferences.last_device().ok_or(AppRunError::NoDeviceAddress)?;
                manager.connect(&address)?;
            }
        },
    }

    'mainloop: loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                break 'mainloop;
            },
            event = events.next() => match event {
                Some(DeviceEvent::StateChange(state)) => println!("{}", state),
                Some(DeviceEvent::Error(kind)) => println!("Error: {:?}", kind),
                None => break 'mainloop,
            },
        }
    }

    manager.shutdown().await;
    Ok(())
}

async fn dispatch(cli: Cli, preferences: &Arc<FilePreferences>) -> Result<(), AppRunError> {
    let device_address = || {
        cli.address.clone()
            .or_else(|| preferences.last_device())
            .ok_or(AppRunError::NoDeviceAddress)
    };

    match &cli.command {
        CliCommand::Scan { timeout } => {
            let timeout = timeout.unwrap_or_else(|| preferences.connection().scan_timeout());
            scan(timeout, preferences).await
        },
        CliCommand::Effects => {
            for effect in Effect::all() {
                println!("{}", effect);
            }
            Ok(())
        },
        CliCommand::AutoConnect { state } => {
            preferences.set_auto_connect(state.is_on());
            println!("Auto-connect {}", if state.is_on() { "enabled" } else { "disabled" });
            Ok(())
        },
        CliCommand::Power { state } => send(device_address()?, Command::power(state.is_on()), preferences).await,
        CliCommand::Color { values } => {
            let command = parse_color(values)?;
            send(device_address()?, command, preferences).await
        },
        CliCommand::Brightness { level } => {
            send(device_address()?, Command::SetBrightness { level: *level }, preferences).await
        },
        CliCommand::Effect { effect, speed } => {
            let effect = parse_effect(effect)?;
            let speed = speed.unwrap_or_else(|| preferences.last_effect().map(|(_, speed)| speed).unwrap_or(50));
            send(device_address()?, Command::effect(effect, speed), preferences).await
        },
        CliCommand::Watch => watch(cli.address.clone(), preferences).await,
    }
}

pub async fn execute(cli: Cli) -> Result<(), AppRunError> {
    let config_io = match &cli.config {
        Some(path) => ConfigIO::open_sync(path)?,
        None => ConfigIO::new_sync()?,
    };

    // obtain an exclusive file lock so that this config file is used by only one instance
    let mut locker = config_io.locker()?;
    let _lock = locker.lock()?;

    let app_cancel = CancellationToken::new();
    let (preferences, saver) = FilePreferences::open(config_io, app_cancel.child_token()).await;

    let result = dispatch(cli, &preferences).await;

    app_cancel.cancel();
    if let Err(err) = saver.await {
        error!("Failed to join config saver task: {:?}", err);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effects_by_name_or_id() {
        assert_eq!(parse_effect("0x8b").unwrap().name(), "red fade");
        assert_eq!(parse_effect("seven color jump").unwrap().id(), 0x88);
        assert!(parse_effect("0x01").is_err());
        assert!(parse_effect("sparkle").is_err());
    }

    #[test]
    fn colors_as_components_or_hex() {
        let values = |list: &[&str]| list.iter().map(|value| value.to_string()).collect::<Vec<_>>();

        assert_eq!(parse_color(&values(&["#7e57c2"])).unwrap(), Command::SetColor { red: 0x7e, green: 0x57, blue: 0xc2 });
        assert_eq!(parse_color(&values(&["1", "2", "3"])).unwrap(), Command::SetColor { red: 1, green: 2, blue: 3 });
        assert!(parse_color(&values(&["256", "0", "0"])).is_err());
        assert!(parse_color(&values(&["red"])).is_err());
        assert!(parse_color(&values(&["1", "2"])).is_err());
    }

    #[test]
    fn parses_device_commands() {
        let cli = Cli::parse_from(["bledob-control", "--address", "AA:BB:CC:DD:EE:FF", "color", "255", "0", "10"]);
        assert_eq!(cli.address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        let CliCommand::Color { values } = cli.command else {
            panic!("expected the color command");
        };
        assert_eq!(parse_color(&values).unwrap(), Command::SetColor { red: 255, green: 0, blue: 10 });

        let cli = Cli::parse_from(["bledob-control", "scan", "--timeout", "10s"]);
        assert!(matches!(cli.command, CliCommand::Scan { timeout: Some(t) } if t == Duration::from_secs(10)));

        let cli = Cli::parse_from(["bledob-control", "power", "off"]);
        assert!(matches!(cli.command, CliCommand::Power { state: Switch::Off }));
    }
}
