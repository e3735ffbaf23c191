//! Runtime configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `HEMIRT_`-prefixed environment variables (e.g. `HEMIRT_VERBOSITY=2`).

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::codec::{ByteOrder, CodecConfig, DEFAULT_MAX_STRING};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Verbose/debug output level (0 = quiet)
    pub verbosity: u8,
    /// Keep the last-error slot per thread
    pub threaded: bool,
    /// Target byte order for new data sources
    pub byte_order: ByteOrder,
    /// Interleave type tags in encoded data
    pub debug_tags: bool,
    /// Longest string accepted from a data source
    pub max_string_len: usize,
    /// Directories searched for class modules
    pub module_dirs: Vec<PathBuf>,
    /// Milliseconds per timer tick when driven by `run_timers`
    pub tick_ms: u64,
    pub data_paths: Vec<PathBuf>,
    pub font_paths: Vec<PathBuf>,
    pub temp_paths: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbosity: 0,
            threaded: true,
            byte_order: ByteOrder::Big,
            debug_tags: false,
            max_string_len: DEFAULT_MAX_STRING,
            module_dirs: Vec::new(),
            tick_ms: 10,
            data_paths: Vec::new(),
            font_paths: Vec::new(),
            temp_paths: vec![std::env::temp_dir()],
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(file: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("HEMIRT_")).extract()
    }

    /// Codec settings for data sources created by the runtime
    pub fn codec(&self) -> CodecConfig {
        CodecConfig {
            byte_order: self.byte_order,
            debug_tags: self.debug_tags,
            max_string_len: self.max_string_len,
        }
    }
}
