//! Client for sending job success heartbeats to CronMonitor.
//!
//! Three ways to report a successful run, all built on [`Notifier::ping`]:
//!
//! ```no_run
//! use cronmonitor::{Notifier, NotifierConfig};
//!
//! fn backup() -> Result<(), std::io::Error> { Ok(()) }
//!
//! let monitor = Notifier::new(NotifierConfig::new("YOUR_TOKEN")).unwrap();
//!
//! // Direct call
//! if backup().is_ok() {
//!     monitor.ping();
//! }
//!
//! // Wrapped job
//! let mut job = monitor.wrap(|_: ()| backup());
//! job(()).unwrap();
//!
//! // Scoped block
//! monitor.run(|| backup()).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod notifier;
pub mod transport;

pub use config::NotifierConfig;
pub use error::{ConfigError, DeliveryError};
pub use notifier::{Notifier, Scope, monitored, ping};
pub use transport::{HttpTransport, Sleeper, ThreadSleeper, Transport};
