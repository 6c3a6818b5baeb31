mod settings;

pub use settings::{Command, Config, HostSettings, Settings};
