use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::bus::{Bus, BusError};

/// One ADC count in Volts.
pub const ADC_VOLTS_PER_BIT: f64 = 0.3125e-3;

pub const WATER_FREEZE_TEMP: f64 = 273.15;

/// A physical device attached to the bus. The serial is fixed at
/// construction; the node id is assigned exactly once during bus boot, when
/// the discovered serials are matched against the registered handles.
#[async_trait]
pub trait BusDevice: Send + Sync {
    fn name(&self) -> &str;
    fn serial(&self) -> &str;

    /// `None` until bus boot has completed. Boot completion is the readiness
    /// gate; drivers must not address a device before it.
    fn node(&self) -> Option<u8>;

    fn assign_node(&self, id: u8) -> Result<(), DeviceError>;

    /// Per-device configuration hook, run after discovery and before the bus
    /// goes ready.
    async fn init(&self, bus: &dyn Bus) -> Result<(), BusError>;
}

pub struct Adc {
    name: String,
    serial: String,
    tx: u16,
    node: OnceLock<u8>,
}

impl Adc {
    pub fn new(name: impl Into<String>, serial: impl Into<String>, tx: u16) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            serial: serial.into(),
            tx,
            node: OnceLock::new(),
        })
    }

    /// Transmission type configured for this ADC's channels.
    pub fn tx(&self) -> u16 {
        self.tx
    }

    pub fn volts(&self, raw: i64) -> f64 {
        raw as f64 * ADC_VOLTS_PER_BIT
    }
}

#[async_trait]
impl BusDevice for Adc {
    fn name(&self) -> &str {
        &self.name
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    fn node(&self) -> Option<u8> {
        self.node.get().copied()
    }

    fn assign_node(&self, id: u8) -> Result<(), DeviceError> {
        self.node
            .set(id)
            .map_err(|_| DeviceError::NodeAlreadyAssigned {
                device: self.name.clone(),
                node: id,
            })
    }

    async fn init(&self, _bus: &dyn Bus) -> Result<(), BusError> {
        // Channel configuration (wsdo of the transmission type to 0x1801 and
        // 0x1802, subindex 2) goes here once the firmware accepts it.
        debug!(device = %self.name, "adc init");
        Ok(())
    }
}

pub struct Dac {
    name: String,
    serial: String,
    node: OnceLock<u8>,
}

impl Dac {
    pub fn new(name: impl Into<String>, serial: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            serial: serial.into(),
            node: OnceLock::new(),
        })
    }
}

#[async_trait]
impl BusDevice for Dac {
    fn name(&self) -> &str {
        &self.name
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    fn node(&self) -> Option<u8> {
        self.node.get().copied()
    }

    fn assign_node(&self, id: u8) -> Result<(), DeviceError> {
        self.node
            .set(id)
            .map_err(|_| DeviceError::NodeAlreadyAssigned {
                device: self.name.clone(),
                node: id,
            })
    }

    async fn init(&self, _bus: &dyn Bus) -> Result<(), BusError> {
        debug!(device = %self.name, "dac init");
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device {device:?} already has a node id (rejected 0x{node:x})")]
    NodeAlreadyAssigned { device: String, node: u8 },

    #[error("device {0:?} has no node id yet (bus not booted?)")]
    NotReady(String),
}
