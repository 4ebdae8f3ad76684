//! freqwatch service: supervises detection sessions over a sample source,
//! persists or forwards anomalies and exposes a monitoring API.

pub mod api;
pub mod forwarder;
pub mod persistence;
pub mod settings;
pub mod supervisor;

pub use forwarder::{ForwarderConfig, HttpSink};
pub use persistence::JsonlSink;
pub use settings::{Cli, Settings, SettingsError};
pub use supervisor::{RestartPolicy, SessionRegistry, SlotExit, SlotReport, Supervisor};
