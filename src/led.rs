use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::app::{Cancel, Module, ModuleError};
use crate::bus::{Bus, BusError};
use crate::devices::BusDevice;
use crate::protocol::{Command, ProtocolError, Verb};
use crate::registry::{Registry, RegistryError};

/// SDO index of the DAC output register driving the LED.
const LED_INDEX: u16 = 0x6411;
const LED_SUBCHANNEL: u8 = 0x2;
const LED_ON: u32 = 0x14000;
const LED_OFF: u32 = 0x0;

/// LED driven through a DAC output channel. One `wsdo` per on/off
/// transition; the decoded status error of the reply is surfaced verbatim.
pub struct Led {
    name: String,
    bus_name: String,
    registry: Arc<Registry>,
    bus: OnceLock<Arc<dyn Bus>>,
    cid: u8,
}

impl Led {
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
            cid: 0x1,
        })
    }

    pub async fn on(&self) -> Result<(), BusError> {
        self.write(LED_ON).await
    }

    pub async fn off(&self) -> Result<(), BusError> {
        self.write(LED_OFF).await
    }

    pub async fn blink(&self, duration: Duration) -> Result<(), BusError> {
        self.on().await?;
        tokio::time::sleep(duration).await;
        self.off().await
    }

    async fn write(&self, value: u32) -> Result<(), BusError> {
        let bus = self
            .bus
            .get()
            .ok_or_else(|| BusError::Unresolved(self.name.clone()))?;
        let dac = bus.dac();
        let node = dac
            .node()
            .ok_or_else(|| BusError::Unresolved(dac.name().to_owned()))?;

        let req = Command::new(
            Verb::Wsdo,
            format!(
                "{:x},{:x},{:x},{:x},{:x}",
                node, LED_INDEX, self.cid, LED_SUBCHANNEL, value
            ),
        );
        let reply = bus.send(req).await?;
        if reply.verb != Verb::Wsdo {
            return Err(ProtocolError::UnexpectedCommand(reply.to_string()).into());
        }
        reply.sdo_status()?;
        Ok(())
    }
}

#[async_trait]
impl Module for Led {
    fn name(&self) -> &str {
        &self.name
    }

    async fn boot(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        debug!(led = %self.name, bus = %self.bus_name, "resolving bus");
        let bus = self
            .registry
            .bus(&self.bus_name)
            .ok_or_else(|| RegistryError::NotFound(self.bus_name.clone()))?;
        let _ = self.bus.set(bus);
        Ok(())
    }

    async fn stop(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        self.off().await?;
        Ok(())
    }
}
