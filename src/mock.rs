use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::app::{Cancel, Module, ModuleError};
use crate::bus::{Bus, BusError};
use crate::devices::{Adc, BusDevice, Dac};
use crate::protocol::{Command, ProtocolError, Verb};

pub const MOCK_ADC_NODE: u8 = 0x41;
pub const MOCK_DAC_NODE: u8 = 0x42;

/// Mid-scale reading of a 16-bit converter.
const MOCK_ADC_READING: u32 = (2 << 14) / 2;

/// In-memory bus for exercising drivers and the lifecycle runner without
/// hardware or a socket. Boot assigns fixed node ids; requests are answered
/// synchronously and deterministically by verb, always with status 0.
pub struct MockBus {
    name: String,
    adc: Arc<Adc>,
    dac: Arc<Dac>,
}

impl MockBus {
    pub fn new(name: impl Into<String>, adc: Arc<Adc>, dac: Arc<Dac>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            adc,
            dac,
        })
    }
}

#[async_trait]
impl Bus for MockBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn adc(&self) -> Arc<Adc> {
        self.adc.clone()
    }

    fn dac(&self) -> Arc<Dac> {
        self.dac.clone()
    }

    async fn send(&self, req: Command) -> Result<Command, BusError> {
        debug!(bus = %self.name, "request: {req}");
        match req.verb {
            Verb::Quit => Ok(req),

            Verb::Rsdo => {
                let fields = hex_fields(&req.data, 3)?;
                Ok(Command::new(
                    Verb::Rsdo,
                    format!("{:x},0,{:x}", fields[0], MOCK_ADC_READING),
                ))
            }

            Verb::Wsdo => {
                let fields = hex_fields(&req.data, 2)?;
                Ok(Command::new(Verb::Wsdo, format!("{:x},0", fields[0])))
            }

            _ => Err(ProtocolError::UnexpectedCommand(req.to_string()).into()),
        }
    }
}

#[async_trait]
impl Module for MockBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn boot(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        self.adc.assign_node(MOCK_ADC_NODE)?;
        self.dac.assign_node(MOCK_DAC_NODE)?;
        info!(bus = %self.name, adc = MOCK_ADC_NODE, dac = MOCK_DAC_NODE, "mock nodes assigned");

        self.adc.init(self).await?;
        self.dac.init(self).await?;
        Ok(())
    }

    async fn shutdown(&self, _cancel: &Cancel) -> Result<(), ModuleError> {
        info!(bus = %self.name, "shutdown...");
        self.send(Command::bare(Verb::Quit)).await?;
        Ok(())
    }
}

/// Parses at least `min` comma-separated hex fields from a payload.
fn hex_fields(payload: &str, min: usize) -> Result<Vec<u32>, ProtocolError> {
    let fields: Result<Vec<u32>, _> = payload
        .split(',')
        .map(|f| u32::from_str_radix(f.trim(), 16))
        .collect();
    let fields = fields.map_err(|_| ProtocolError::MalformedPayload(payload.to_owned()))?;
    if fields.len() < min {
        return Err(ProtocolError::MalformedPayload(payload.to_owned()));
    }
    Ok(fields)
}
