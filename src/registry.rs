use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::bus::Bus;
use crate::devices::{Adc, BusDevice, Dac};

enum Entry {
    Bus(Arc<dyn Bus>),
    Adc(Arc<Adc>),
    Dac(Arc<Dac>),
}

/// Name-to-device map, constructed once by the application and handed to
/// every module constructor. Registration is insert-once: a duplicate name is
/// a wiring mistake and is reported as a typed error, never silently
/// overwritten.
pub struct Registry {
    devices: Mutex<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(HashMap::new()),
        })
    }

    pub fn register_bus(&self, name: &str, bus: Arc<dyn Bus>) -> Result<(), RegistryError> {
        self.insert(name, Entry::Bus(bus))
    }

    pub fn register_adc(&self, adc: Arc<Adc>) -> Result<(), RegistryError> {
        self.insert(&adc.name().to_owned(), Entry::Adc(adc))
    }

    pub fn register_dac(&self, dac: Arc<Dac>) -> Result<(), RegistryError> {
        self.insert(&dac.name().to_owned(), Entry::Dac(dac))
    }

    pub fn bus(&self, name: &str) -> Option<Arc<dyn Bus>> {
        match self.devices.lock().ok()?.get(name)? {
            Entry::Bus(bus) => Some(bus.clone()),
            _ => None,
        }
    }

    pub fn adc(&self, name: &str) -> Option<Arc<Adc>> {
        match self.devices.lock().ok()?.get(name)? {
            Entry::Adc(adc) => Some(adc.clone()),
            _ => None,
        }
    }

    pub fn dac(&self, name: &str) -> Option<Arc<Dac>> {
        match self.devices.lock().ok()?.get(name)? {
            Entry::Dac(dac) => Some(dac.clone()),
            _ => None,
        }
    }

    fn insert(&self, name: &str, entry: Entry) -> Result<(), RegistryError> {
        let mut devices = self
            .devices
            .lock()
            .map_err(|_| RegistryError::Poisoned)?;
        if devices.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_owned()));
        }
        devices.insert(name.to_owned(), entry);
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate device {0:?}")]
    Duplicate(String),

    #[error("no device registered under {0:?}")]
    NotFound(String),

    #[error("registry lock poisoned")]
    Poisoned,
}
