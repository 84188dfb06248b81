//! Bluetooth Low Energy session for the Emerald Electricity Advisor.
//!
//! The advisor clips onto an electricity meter, counts the meter's LED
//! pulses and reports them over BLE every 30 seconds. This crate holds the
//! device session that turns those reports into energy samples:
//!
//! - **Session**: connect, identify, calibrate, stream, tear down
//! - **Observers**: identity and energy callbacks, isolated from each other
//! - **Transports**: btleplug for real hardware, a mock for tests
//! - **Cancellation**: cooperative shutdown through a [`CancellationToken`]
//!
//! # Platform Differences
//!
//! On Linux and Windows the advisor is addressed by its MAC address
//! (`AA:BB:CC:DD:EE:FF`). On macOS CoreBluetooth hides MAC addresses and the
//! advisor is addressed by the UUID the Mac assigned to it.
//!
//! # Quick Start
//!
//! ```no_run
//! use emerald_core::{AdvisorSession, BleTransport};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = AdvisorSession::new(BleTransport::new("AA:BB:CC:DD:EE:FF"));
//!     session.register_identity_observer(|id| println!("Connected to {}", id));
//!     session.register_measurement_observer(|wh| println!("{:.2} Wh", wh));
//!
//!     let cancel = CancellationToken::new();
//!     let stop = cancel.clone();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         stop.cancel();
//!     });
//!
//!     session.run(cancel).await?;
//!     Ok(())
//! }
//! ```
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod device;
pub mod error;
pub mod mock;
pub mod observers;
pub mod scan;
pub mod session;
pub mod state;
pub mod traits;
pub mod util;

pub use emerald_types::types;
pub use emerald_types::uuid;

pub use device::{BleTransport, ConnectionConfig};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use mock::{MockCall, MockFailure, MockTransport, MockTransportBuilder};
pub use observers::{IdentityObserver, MeasurementObserver, ObserverRegistry};
pub use scan::ScanOptions;
pub use session::{AdvisorSession, SessionConfig};
pub use state::{SessionState, SessionStats, StatsSnapshot};
pub use traits::GattTransport;
pub use util::format_peripheral_id;

pub use emerald_types::{CalibrationState, DeviceIdentity, EnergySample};
