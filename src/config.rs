//! On-disk configuration, loaded once at CLI startup.
//!
//! `home::home_dir()` + `.config/<name>.toml` lookup; a missing file is
//! fine (defaults apply), a malformed one is a hard error via
//! `anyhow::Context`; `byte_unit::Byte` backs the one human-writable size
//! field.

use std::{fs, io};

use anyhow::{Context, Result, anyhow};
use byte_unit::Byte;
use camino::Utf8PathBuf;
use serde_derive::Deserialize;

fn default_worker_pool_width() -> usize {
    num_cpus::get().max(1)
}

fn default_archiver_binary() -> String {
    "7z".to_string()
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct Configuration {
    /// Overrides the local scratch directory used for staging pending
    /// writes and offsite working directories; `None` uses the system
    /// temp directory.
    #[serde(default)]
    pub cache_dir: Option<Utf8PathBuf>,

    /// Hint for how wide a worker pool to build when a store's
    /// `execute_in_parallel` is true; ignored when it's false.
    #[serde(default = "default_worker_pool_width")]
    pub worker_pool_width: usize,

    /// Name (or path) of the archiver binary `CommandArchiver` shells out
    /// to when offsite compression/encryption is requested.
    #[serde(default = "default_archiver_binary")]
    pub archiver_binary: String,

    /// Buffer size hint for streaming reads/writes; a bulk store may use
    /// it to size its upload buffer.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: Byte,
}

fn default_buffer_size() -> Byte {
    Byte::from_u64(8 * 1024 * 1024)
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            cache_dir: None,
            worker_pool_width: default_worker_pool_width(),
            archiver_binary: default_archiver_binary(),
            buffer_size: default_buffer_size(),
        }
    }
}

pub fn load() -> Result<Configuration> {
    let mut confpath: Utf8PathBuf = home::home_dir()
        .ok_or_else(|| anyhow!("Can't find home directory"))?
        .try_into()
        .context("Home directory isn't UTF-8")?;
    confpath.extend([".config", "snapvault.toml"]);
    let s = match fs::read_to_string(&confpath) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Configuration::default()),
        found => found,
    }
    .with_context(|| format!("Couldn't open {confpath}"))?;
    let conf = toml::from_str(&s).with_context(|| format!("Couldn't parse {confpath}"))?;
    Ok(conf)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_has_sane_worker_width() {
        let conf = Configuration::default();
        assert!(conf.worker_pool_width >= 1);
        assert_eq!(conf.archiver_binary, "7z");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let conf: Configuration = toml::from_str("worker_pool_width = 4\n").unwrap();
        assert_eq!(conf.worker_pool_width, 4);
        assert_eq!(conf.archiver_binary, "7z");
        assert_eq!(conf.cache_dir, None);
    }
}
