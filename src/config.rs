use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{channel::ChannelConfig, error::Error};

/// The configuration used for running the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// The control channels, in the order they are shown and recorded.
    pub channels: Vec<ChannelConfig>,

    /// A directory of static files (e.g. a web UI) to serve at `/`.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl Default for Config {
    /// A five axis robot arm.
    fn default() -> Self {
        Self {
            channels: vec![
                ChannelConfig::slider("base", "Base", "BASE:", 0, 180, 90),
                ChannelConfig::slider("shoulder", "Shoulder", "SHO:", 0, 180, 90),
                ChannelConfig::slider("elbow", "Elbow", "ELB:", 0, 180, 90),
                ChannelConfig::slider("wrist", "Wrist", "WRI:", 0, 180, 90),
                ChannelConfig::slider("gripper", "Gripper", "GRIP:", 0, 90, 45),
            ],
            static_dir: None,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        let mut config = Self::default();

        config.channels.push(
            ChannelConfig::toggle("lamp", "Lamp", "LAMP:")
                .with_switch_commands("LAMP ON", "LAMP OFF"),
        );
        config.static_dir = Some("ui/dist".into());

        config
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap_or_else(|e| format!("Could not serialize configuration: {e}"))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(p)?;

        Self::deserialize(&s)
    }

    fn check_duplicate_ids(&self) -> Result<(), Error> {
        let duplicates = self
            .channels
            .iter()
            .map(|channel| &channel.id)
            .duplicates()
            .collect::<Vec<_>>();

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Error::BadConfig(format!(
                "Channel ids must be unique. Duplicates: {duplicates:?}"
            )))
        }
    }

    /// Check that the configuration makes sense.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_duplicate_ids()?;

        for channel in &self.channels {
            channel.validate()?;
        }

        Ok(())
    }
}
