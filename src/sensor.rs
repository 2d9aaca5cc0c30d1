use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::debug;

use crate::app::{Cancel, Module, ModuleError};
use crate::bus::{Bus, BusError};
use crate::devices::{BusDevice, ADC_VOLTS_PER_BIT};
use crate::protocol::{Command, ProtocolError, Verb};
use crate::registry::{Registry, RegistryError};

/// SDO index of the probe's measurement channels on the ADC.
pub const HD2001_INDEX: u16 = 0x2404;

/// What the probe measures. Each quantity maps a raw ADC count to a physical
/// unit through a fixed linear transform:
/// `value = raw * 0.3125e-3 * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Temperature,
    Humidity,
    Pressure,
}

impl Quantity {
    fn subindex(self) -> u8 {
        match self {
            Quantity::Temperature => 0x1,
            Quantity::Humidity => 0x2,
            Quantity::Pressure => 0x3,
        }
    }

    fn scale(self) -> f64 {
        match self {
            Quantity::Temperature => 100.0,
            Quantity::Humidity => 100.0,
            Quantity::Pressure => 600.0,
        }
    }

    fn offset(self) -> f64 {
        match self {
            Quantity::Temperature => -50.0,
            Quantity::Humidity => 0.0,
            Quantity::Pressure => 800.0,
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Quantity::Temperature => "degC",
            Quantity::Humidity => "%RH",
            Quantity::Pressure => "hPa",
        }
    }
}

/// HD2001 combined temperature/humidity/pressure probe, read through the
/// bus ADC one `rsdo` per quantity.
pub struct Hd2001 {
    name: String,
    bus_name: String,
    registry: Arc<Registry>,
    bus: OnceLock<Arc<dyn Bus>>,
    index: u16,
}

impl Hd2001 {
    pub fn new(
        name: impl Into<String>,
        registry: Arc<Registry>,
        bus_name: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            bus_name: bus_name.into(),
            registry,
            bus: OnceLock::new(),
            index: HD2001_INDEX,
        })
    }

    pub async fn temperature(&self) -> Result<f64, BusError> {
        self.read(Quantity::Temperature).await
    }

    pub async fn humidity(&self) -> Result<f64, BusError> {
        self.read(Quantity::Humidity).await
    }

    pub async fn pressure(&self) -> Result<f64, BusError> {
        self.read(Quantity::Pressure).await
    }

    pub async fn read(&self, quantity: Quantity) -> Result<f64, BusError> {
        let raw = self.read_raw(quantity.subindex()).await?;
        let value = raw as f64 * ADC_VOLTS_PER_BIT * quantity.scale() + quantity.offset();
        debug!(
            sensor = %self.name,
            ?quantity,
            raw,
            value,
            unit = quantity.unit(),
            "reading"
        );
        Ok(value)
    }

    /// Raw ADC count from one of the probe's channels.
    async fn read_raw(&self, subindex: u8) -> Result<i64, BusError> {
        let bus = self
            .bus
            .get()
            .ok_or_else(|| BusError::Unresolved(self.name.clone()))?;
        let adc = bus.adc();
        let node = adc
            .node()
            .ok_or_else(|| BusError::Unresolved(adc.name().to_owned()))?;

        let req = Command::new(
            Verb::Rsdo,
            format!("{:x},{:x},{:x}", node, self.index, subindex),
        );
        let reply = bus.send(req).await?;
        if reply.verb != Verb::Rsdo {
            return Err(ProtocolError::UnexpectedCommand(reply.to_string()).into());
        }
        Ok(reply.rsdo_value()?)
    }
}

#[async_trait]
impl Module for Hd2001 {
    fn name(&self) -> &str {
        &self.name
    }

    async fn boot(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        debug!(sensor = %self.name, bus = %self.bus_name, "resolving bus");
        let bus = self
            .registry
            .bus(&self.bus_name)
            .ok_or_else(|| RegistryError::NotFound(self.bus_name.clone()))?;
        let _ = self.bus.set(bus);
        Ok(())
    }
}
