// ABOUTME: The application handle handed to the housekeeper, front-end server and shutdown sequence.
// ABOUTME: Owns the loaded config and the broker/housekeeper once they are attached.

use crate::broker::BrokerServer;
use crate::housekeeper::Housekeeper;
use augur_fleet_core::Config;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// What collaborators may ask of the application.
pub trait AppHandle: Send + Sync {
    fn config(&self) -> &Config;

    /// Path the config was loaded from, if any
    fn config_path(&self) -> Option<&Path> {
        None
    }

    /// Release the application's own resources. Must be idempotent.
    fn shutdown(&self);
}

#[derive(Default)]
struct Components {
    broker: Option<BrokerServer>,
    housekeeper: Option<Housekeeper>,
}

pub struct Application {
    config: Config,
    config_path: Option<PathBuf>,
    components: Mutex<Components>,
}

impl Application {
    pub fn new(config: Config, config_path: Option<PathBuf>) -> Self {
        Self {
            config,
            config_path,
            components: Mutex::new(Components::default()),
        }
    }

    /// Hand the broker and housekeeper to the application so shutdown releases them
    pub fn attach(&self, broker: BrokerServer, housekeeper: Housekeeper) {
        let mut components = self.components.lock().unwrap_or_else(|e| e.into_inner());
        components.broker = Some(broker);
        components.housekeeper = Some(housekeeper);
    }
}

impl AppHandle for Application {
    fn config(&self) -> &Config {
        &self.config
    }

    fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    fn shutdown(&self) {
        let (broker, housekeeper) = {
            let mut components = self.components.lock().unwrap_or_else(|e| e.into_inner());
            (components.broker.take(), components.housekeeper.take())
        };

        if let Some(housekeeper) = housekeeper {
            housekeeper.shutdown();
        }
        if let Some(broker) = broker {
            broker.close();
        }
    }
}
