use std::sync::{Arc, Mutex};
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::StreamExt;
use log::{error, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::config::types::{Config, ConnectionConfig, Rgb};
use crate::error::ConfigError;

/// The device related preferences read and written by the connection manager.
pub trait PreferenceStore: Send + Sync {
    fn last_device(&self) -> Option<String>;
    fn set_last_device(&self, address: &str);
    fn auto_connect(&self) -> bool;
    fn set_auto_connect(&self, enabled: bool);
    fn last_color(&self) -> Rgb;
    fn set_last_color(&self, color: Rgb);
    fn last_brightness(&self) -> u8;
    fn set_last_brightness(&self, level: u8);
    fn last_effect(&self) -> Option<(u8, u8)>;
    fn set_last_effect(&self, mode: u8, speed: u8);
    fn power_state(&self) -> bool;
    fn set_power_state(&self, on: bool);
}

/// Storage for a [`Config`] document; every type implementing it is a [`PreferenceStore`].
pub trait ConfigCell: Send + Sync {
    fn snapshot(&self) -> Config;
    fn update(&self, change: &mut dyn FnMut(&mut Config));
}

impl<C: ConfigCell> PreferenceStore for C {
    fn last_device(&self) -> Option<String> {
        self.snapshot().last_device
    }

    fn set_last_device(&self, address: &str) {
        self.update(&mut |config| config.last_device = Some(address.to_string()));
    }

    fn auto_connect(&self) -> bool {
        self.snapshot().auto_connect
    }

    fn set_auto_connect(&self, enabled: bool) {
        self.update(&mut |config| config.auto_connect = enabled);
    }

    fn last_color(&self) -> Rgb {
        self.snapshot().last_color
    }

    fn set_last_color(&self, color: Rgb) {
        self.update(&mut |config| config.last_color = color);
    }

    fn last_brightness(&self) -> u8 {
        self.snapshot().last_brightness
    }

    fn set_last_brightness(&self, level: u8) {
        self.update(&mut |config| config.last_brightness = level);
    }

    fn last_effect(&self) -> Option<(u8, u8)> {
        let config = self.snapshot();
        config.last_effect.map(|mode| (mode, config.last_effect_speed))
    }

    fn set_last_effect(&self, mode: u8, speed: u8) {
        self.update(&mut |config| {
            config.last_effect = Some(mode);
            config.last_effect_speed = speed;
        });
    }

    fn power_state(&self) -> bool {
        self.snapshot().power_state
    }

    fn set_power_state(&self, on: bool) {
        self.update(&mut |config| config.power_state = on);
    }
}

#[derive(Default)]
pub struct MemoryPreferences {
    config: Mutex<Config>,
}

impl MemoryPreferences {
    pub fn new(config: Config) -> Self {
        MemoryPreferences { config: Mutex::new(config) }
    }
}

impl ConfigCell for MemoryPreferences {
    fn snapshot(&self) -> Config {
        self.config.lock().expect("Failed to lock preferences").clone()
    }

    fn update(&self, change: &mut dyn FnMut(&mut Config)) {
        change(&mut self.config.lock().expect("Failed to lock preferences"));
    }
}

/// Preferences backed by the config file. Every change is written through by a background task.
pub struct FilePreferences {
    memory: Arc<MemoryPreferences>,
    dirty: Mutex<Sender<()>>,
}

// Saves read the newest document at save time, so a signal that could not be queued is never lost:
// the one already pending covers it.
async fn save_task(config_io: ConfigIO, memory: Arc<MemoryPreferences>, mut dirty: Receiver<()>, cancel: CancellationToken) {
    async fn save(config_io: &ConfigIO, memory: &MemoryPreferences) {
        if let Err(err) = config_io.save(memory.snapshot()).await {
            error!("Failed to save config: {:?}", &err);
        }
    }

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            Some(()) = dirty.next() => {
                save(&config_io, &memory).await;
            },
        }
    }

    if dirty.try_recv().is_ok() {
        save(&config_io, &memory).await;
    }
}

impl FilePreferences {
    /// Loads the config file and starts the saver task, which flushes pending changes and stops
    /// when `cancel` is cancelled.
    pub async fn open(config_io: ConfigIO, cancel: CancellationToken) -> (Arc<FilePreferences>, JoinHandle<()>) {
        let config = match config_io.read().await {
            Ok(config) => config,
            Err(err) => {
                if err.is_file_not_found_error() {
                    // this is probably the first start of the app
                    info!("Config file not found, using defaults");
                } else {
                    error!("Failed to load config: {:?}", &err);
                }
                Config::default()
            },
        };

        let memory = Arc::new(MemoryPreferences::new(config));
        let (sender, receiver) = channel::<()>(0);
        let handle = spawn(save_task(config_io, memory.clone(), receiver, cancel));

        let preferences = FilePreferences {
            memory,
            dirty: Mutex::new(sender),
        };
        (Arc::new(preferences), handle)
    }

    pub fn connection(&self) -> ConnectionConfig {
        self.memory.snapshot().connection
    }
}

impl ConfigCell for FilePreferences {
    fn snapshot(&self) -> Config {
        self.memory.snapshot()
    }

    fn update(&self, change: &mut dyn FnMut(&mut Config)) {
        self.memory.update(change);

        let mut dirty = self.dirty.lock().expect("Failed to lock config saver");
        if let Err(err) = dirty.try_send(()) {
            // a full channel means a save is pending, it will include this change
            if err.is_disconnected() {
                warn!("{}", ConfigError::from(err.into_send_error()));
            }
        }
    }
}
