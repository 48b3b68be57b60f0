//! Minimal `.properties` reader, enough to find the world directory in a
//! server's `server.properties`.

use crate::schema::DiskConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use telemetry_core::Result;
use tracing::{debug, warn};

pub const SERVER_PROPERTIES: &str = "server.properties";
pub const LEVEL_NAME_KEY: &str = "level-name";

/// Parsed `key=value` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: HashMap<String, String>,
}

impl Properties {
    /// Parse properties text. Blank lines and lines starting with `#` or `!`
    /// are skipped; the key ends at the first `=`, `:` or whitespace.
    pub fn parse(raw: &str) -> Self {
        let entries = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
            .map(|line| {
                let split = line
                    .find(|c: char| c == '=' || c == ':' || c.is_whitespace())
                    .unwrap_or(line.len());
                let (key, rest) = line.split_at(split);
                let value = rest
                    .trim_start()
                    .strip_prefix(['=', ':'])
                    .unwrap_or(rest)
                    .trim();
                (key.to_string(), value.to_string())
            })
            .collect();

        Self { entries }
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::parse(&raw))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

/// Work out which directory the disk poller should measure.
///
/// An explicit `world_dir` wins (relative paths are taken from `server_dir`).
/// Otherwise `level-name` is looked up in `<server_dir>/server.properties`.
/// Returns `None` if neither source names a directory.
pub fn resolve_world_dir(config: &DiskConfig) -> Option<PathBuf> {
    if let Some(dir) = &config.world_dir {
        return Some(config.server_dir.join(dir));
    }

    let path = config.server_dir.join(SERVER_PROPERTIES);
    let properties = match Properties::read(&path) {
        Ok(p) => p,
        Err(e) => {
            warn!("Unable to read '{}': {e}", path.display());
            return None;
        }
    };

    match properties.get(LEVEL_NAME_KEY) {
        Some(level) if !level.is_empty() => {
            let dir = config.server_dir.join(level);
            debug!("World directory resolved from {SERVER_PROPERTIES}: {}", dir.display());
            Some(dir)
        }
        _ => {
            warn!("'{}' has no {LEVEL_NAME_KEY} entry", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("telemetry-props-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn parses_common_separators_and_comments() {
        let props = Properties::parse(
            "#Minecraft server properties\n\
             ! bang comment\n\
             level-name=world\n\
             motd = A Server \n\
             max-players: 20\n\
             online-mode true\n\
             empty=\n",
        );
        assert_eq!(props.get("level-name"), Some("world"));
        assert_eq!(props.get("motd"), Some("A Server"));
        assert_eq!(props.get("max-players"), Some("20"));
        assert_eq!(props.get("online-mode"), Some("true"));
        assert_eq!(props.get("empty"), Some(""));
        assert_eq!(props.get("#Minecraft"), None);
    }

    #[test]
    fn explicit_world_dir_wins() {
        let config = DiskConfig {
            server_dir: PathBuf::from("/srv/mc"),
            world_dir: Some(PathBuf::from("saves/alpha")),
            ..Default::default()
        };
        assert_eq!(resolve_world_dir(&config), Some(PathBuf::from("/srv/mc/saves/alpha")));

        let absolute = DiskConfig {
            world_dir: Some(PathBuf::from("/data/world")),
            ..config
        };
        assert_eq!(resolve_world_dir(&absolute), Some(PathBuf::from("/data/world")));
    }

    #[test]
    fn level_name_is_read_from_server_properties() {
        let dir = scratch_dir("level");
        std::fs::write(dir.join(SERVER_PROPERTIES), "level-name=my_world\n").unwrap();

        let config = DiskConfig { server_dir: dir.clone(), ..Default::default() };
        assert_eq!(resolve_world_dir(&config), Some(dir.join("my_world")));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_properties_resolves_to_none() {
        let dir = scratch_dir("missing");
        let config = DiskConfig { server_dir: dir.clone(), ..Default::default() };
        assert_eq!(resolve_world_dir(&config), None);

        std::fs::write(dir.join(SERVER_PROPERTIES), "motd=hi\n").unwrap();
        assert_eq!(resolve_world_dir(&config), None);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
