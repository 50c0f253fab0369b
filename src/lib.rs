pub mod cli;
pub mod config;
pub mod constants;
pub mod controller;
mod error;
pub mod layout;
pub mod logging;
pub mod resize;
pub mod session;
pub mod sync;
pub mod transport;
pub mod util;

pub use config::{CoreConfig, ResolvedConfig};
pub use controller::TerminalController;
pub use error::{Error, Result};
