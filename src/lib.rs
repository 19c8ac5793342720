pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod midi;
pub mod registry;
pub mod router;
pub mod system;
pub mod timing;
pub mod ui;

pub use cli::Args;
pub use config::Settings;
pub use error::{Error, Result};
pub use midi::{ClockGenerator, MidiBackend, MidiMessage, SimulatedBackend};
pub use router::MidiRouter;
pub use system::{Conductor, SystemEvent};
pub use timing::{TimingEngine, TimingState};
