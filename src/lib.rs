//! # Camera-Control Hardware Command Bus
//!
//! Framework and device driver for the hardware command bus of a
//! camera-control subsystem. The remote side is a "c-wrapper" process running
//! on the embedded controller, bridging this line-oriented protocol onto the
//! physical CAN bus; the local side discovers the attached nodes at boot time
//! and serializes concurrent requests into a single ordered request/reply
//! exchange over one TCP connection.
//!
//! ## Architecture
//!
//! - [`protocol`] - wire command encode/decode and SDO status interpretation
//! - [`transport`] - accept-one TCP transport and remote peer launcher
//! - [`bus`] - the protocol engine: boot handshake, node discovery and the
//!   single-consumer command loop
//! - [`mock`] - in-memory bus implementation for tests and dry runs
//! - [`devices`] - ADC/DAC handles resolved during discovery
//! - [`led`], [`sensor`] - instrument drivers issuing bus requests
//! - [`registry`] - name-to-device map wiring drivers to their bus
//! - [`app`] - module lifecycle runner (Boot/Start/Stop/Shutdown)
//!
//! ## Quick Start
//!
//! ```rust
//! use cambus::{App, BusConfig, Registry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Registry::new();
//!     let mut app = App::new("bench");
//!
//!     let adc = cambus::Adc::new("adc", "04x1541", 1);
//!     let dac = cambus::Dac::new("dac", "04x1540");
//!     let _bus = cambus::create_bus("canbus", BusConfig::Mock, adc, dac, &registry, &mut app)
//!         .expect("wiring");
//!
//!     app.run().await.expect("lifecycle");
//! }
//! ```

pub mod app;
pub mod bus;
pub mod devices;
pub mod led;
pub mod mock;
pub mod protocol;
pub mod registry;
pub mod sensor;
pub mod transport;

// Re-export the main public types for convenience
pub use app::{App, AppError, Cancel, CancelSource, Module, ModuleError};
pub use bus::{create_bus, Bus, BusConfig, BusError, CanBus, Message};
pub use devices::{Adc, BusDevice, Dac};
pub use led::Led;
pub use mock::MockBus;
pub use protocol::{Command, NodeInfo, ProtocolError, Verb};
pub use registry::{Registry, RegistryError};
pub use sensor::{Hd2001, Quantity};
pub use transport::{PeerConfig, TcpTransport, Transport, TransportError};
