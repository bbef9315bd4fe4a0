//! camtopo Tools - Shared pieces of the command-line programs
//!
//! - `gige-config` lists GigE cameras by interface, looks one up by serial
//!   or MAC address, and runs automatic IP configuration
//! - `enumeration-events` prints hot-plug events until Enter is pressed

pub mod config;
pub mod console;
pub mod events;
pub mod gige_config;
pub mod logging;

pub use config::{load_config, Config};
pub use console::Console;
