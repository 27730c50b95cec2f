use std::{path::Path, str::FromStr};

use tilefuse_ir::BlockShape;

use super::logger::{LoggerConfig, TransformLogLevel};
use crate::{
    error::{ConfigError, TransformError},
    tiling::{TileConfig, TileSize},
};

/// Name of the configuration file looked up from the current directory upwards.
pub const CONFIG_FILE_NAME: &str = "tilefuse.toml";

const DEFAULT_TILE_SIZE: i64 = 32;
const DEFAULT_LOG_FILE: &str = "/tmp/tilefuse.log";

/// One entry of `tile-sizes`: a size, or `"full"` to leave the dimension untiled.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum TileSizeSetting {
    Size(i64),
    Keyword(String),
}

impl TileSizeSetting {
    fn parse(value: &str) -> Self {
        match value.trim().parse::<i64>() {
            Ok(size) => TileSizeSetting::Size(size),
            Err(_) => TileSizeSetting::Keyword(value.trim().to_string()),
        }
    }

    fn resolve(&self) -> Result<TileSize, TransformError> {
        match self {
            TileSizeSetting::Size(size) if *size > 0 => Ok(TileSize::Fixed(*size as u64)),
            TileSizeSetting::Size(size) => Err(TransformError::InvalidTileConfiguration {
                reason: format!("tile size {size} is not positive"),
            }),
            TileSizeSetting::Keyword(word) if word == "full" => Ok(TileSize::Full),
            TileSizeSetting::Keyword(word) => Err(TransformError::InvalidTileConfiguration {
                reason: format!("unknown tile size `{word}`"),
            }),
        }
    }
}

/// Configuration of the tile-and-fuse transformation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TileFuseConfig {
    /// Tile sizes for M, N and K.
    #[serde(default = "tile_sizes_default")]
    pub tile_sizes: Vec<TileSizeSetting>,

    /// Lower to the blocked mmt4d layout when applicable.
    #[serde(default)]
    pub lower_to_mmt4d: bool,

    /// Fuse element-wise consumers into the tiles.
    #[serde(default = "fuse_default")]
    pub fuse: bool,

    /// Default `[m0, n0, k0]` inner block of the mmt4d layout.
    #[serde(default = "mmt4d_block_default")]
    pub mmt4d_block: [u64; 3],

    #[serde(default)]
    pub logger: LoggerConfig,
}

impl Default for TileFuseConfig {
    fn default() -> Self {
        Self {
            tile_sizes: tile_sizes_default(),
            lower_to_mmt4d: false,
            fuse: fuse_default(),
            mmt4d_block: mmt4d_block_default(),
            logger: LoggerConfig::default(),
        }
    }
}

fn tile_sizes_default() -> Vec<TileSizeSetting> {
    vec![TileSizeSetting::Size(DEFAULT_TILE_SIZE); 3]
}

fn fuse_default() -> bool {
    true
}

fn mmt4d_block_default() -> [u64; 3] {
    [8, 8, 1]
}

/// Validated options consumed by the transformation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileFuseOptions {
    pub tiles: TileConfig,
    pub lower_to_mmt4d: bool,
    pub fuse: bool,
    pub mmt4d_block: BlockShape,
}

impl TileFuseConfig {
    /// Validates the configuration. Fails before anything is rewritten.
    pub fn options(&self) -> Result<TileFuseOptions, TransformError> {
        let sizes = self
            .tile_sizes
            .iter()
            .map(TileSizeSetting::resolve)
            .collect::<Result<Vec<_>, _>>()?;
        let tiles = TileConfig::new(&sizes)?;

        let [m0, n0, k0] = self.mmt4d_block;
        if m0 == 0 || n0 == 0 || k0 == 0 {
            return Err(TransformError::InvalidTileConfiguration {
                reason: format!("mmt4d block {:?} has a zero entry", self.mmt4d_block),
            });
        }

        Ok(TileFuseOptions {
            tiles,
            lower_to_mmt4d: self.lower_to_mmt4d,
            fuse: self.fuse,
            mmt4d_block: BlockShape::new(m0, n0, k0),
        })
    }

    /// Loads `tilefuse.toml` from the current directory or its parents, then applies environment
    /// overrides. Falls back to the default configuration when no file is found.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_current_dir()?.override_from_env()
    }

    /// Traverses up the directory tree until a configuration file is found or the root is reached.
    pub fn from_current_dir() -> Result<Self, ConfigError> {
        let mut dir = std::env::current_dir()?;

        loop {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                return Self::from_file_path(candidate);
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(Self::default())
    }

    pub fn from_file_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Overrides configuration fields based on environment variables.
    pub fn override_from_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var("TILEFUSE_TILE_SIZES") {
            self.tile_sizes = parse_list(&val);
        }

        if let Ok(val) = std::env::var("TILEFUSE_LOWER_TO_MMT4D") {
            self.lower_to_mmt4d = parse_bool("TILEFUSE_LOWER_TO_MMT4D", &val)?;
        }

        if let Ok(val) = std::env::var("TILEFUSE_DEBUG_LOG") {
            self.logger.level = TransformLogLevel::Full;

            match val.as_str() {
                "stdout" => self.logger.stdout = true,
                "stderr" => self.logger.stderr = true,
                "1" | "true" => self.logger.file = Some(DEFAULT_LOG_FILE.into()),
                "0" | "false" => self.logger.level = TransformLogLevel::Disabled,
                file_path => self.logger.file = Some(file_path.into()),
            }
        }

        Ok(self)
    }

    /// Saves the configuration as TOML.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|err| ConfigError::InvalidOption {
            option: "config".into(),
            reason: err.to_string(),
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Parses pass options of the form `tile-sizes=8,4,2 lower-to-mmt4d=true`.
impl FromStr for TileFuseConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config = Self::default();

        for option in s.split_whitespace() {
            let (key, value) = option
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidOption {
                    option: option.into(),
                    reason: "expected `key=value`".into(),
                })?;

            match key {
                "tile-sizes" => config.tile_sizes = parse_list(value),
                "lower-to-mmt4d" => config.lower_to_mmt4d = parse_bool(key, value)?,
                "fuse" => config.fuse = parse_bool(key, value)?,
                "mmt4d-block" => {
                    let block = value
                        .split(',')
                        .map(|it| it.trim().parse::<u64>())
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|err| ConfigError::InvalidOption {
                            option: key.into(),
                            reason: err.to_string(),
                        })?;
                    config.mmt4d_block = block
                        .try_into()
                        .map_err(|block: Vec<u64>| ConfigError::InvalidOption {
                            option: key.into(),
                            reason: format!("expected 3 entries, found {}", block.len()),
                        })?;
                }
                _ => {
                    return Err(ConfigError::InvalidOption {
                        option: key.into(),
                        reason: "unknown option".into(),
                    });
                }
            }
        }

        Ok(config)
    }
}

fn parse_list(value: &str) -> Vec<TileSizeSetting> {
    value
        .split(',')
        .filter(|it| !it.trim().is_empty())
        .map(TileSizeSetting::parse)
        .collect()
}

fn parse_bool(option: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(ConfigError::InvalidOption {
            option: option.into(),
            reason: format!("expected a boolean, found `{value}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    use super::*;

    #[test]
    fn parse_toml() {
        let content = r#"
            tile-sizes = [8, 4, "full"]
            lower-to-mmt4d = true

            [logger]
            stderr = true
            level = "basic"
        "#;
        let config: TileFuseConfig = toml::from_str(content).unwrap();

        assert_eq!(
            config.tile_sizes,
            vec![
                TileSizeSetting::Size(8),
                TileSizeSetting::Size(4),
                TileSizeSetting::Keyword("full".into()),
            ]
        );
        assert!(config.lower_to_mmt4d);
        assert!(config.fuse);
        assert_eq!(config.mmt4d_block, [8, 8, 1]);
        assert_eq!(config.logger.level, TransformLogLevel::Basic);

        let options = config.options().unwrap();
        assert_eq!(
            options.tiles.sizes(),
            [TileSize::Fixed(8), TileSize::Fixed(4), TileSize::Full]
        );
    }

    #[test]
    fn parse_pass_options() {
        let config: TileFuseConfig = "tile-sizes=8,4,2 lower-to-mmt4d=false fuse=0"
            .parse()
            .unwrap();

        assert_eq!(
            config.tile_sizes,
            vec![
                TileSizeSetting::Size(8),
                TileSizeSetting::Size(4),
                TileSizeSetting::Size(2),
            ]
        );
        assert!(!config.lower_to_mmt4d);
        assert!(!config.fuse);
    }

    #[test]
    fn unknown_pass_option() {
        let err = "tile-size=8".parse::<TileFuseConfig>().unwrap_err();

        assert!(matches!(err, ConfigError::InvalidOption { option, .. } if option == "tile-size"));
    }

    #[test]
    fn non_positive_tile_size_is_rejected() {
        let config: TileFuseConfig = "tile-sizes=8,0,2".parse().unwrap();

        assert!(matches!(
            config.options(),
            Err(TransformError::InvalidTileConfiguration { .. })
        ));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let config: TileFuseConfig = "tile-sizes=8,4".parse().unwrap();

        assert!(matches!(
            config.options(),
            Err(TransformError::InvalidTileConfiguration { .. })
        ));
    }

    #[test]
    fn save_and_reload() {
        let path = std::env::temp_dir().join("tilefuse-config-roundtrip.toml");
        let config: TileFuseConfig = "tile-sizes=16,full,4 mmt4d-block=4,4,1".parse().unwrap();

        config.save(&path).unwrap();
        let loaded = TileFuseConfig::from_file_path(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    #[serial]
    fn env_overrides() {
        std::env::set_var("TILEFUSE_TILE_SIZES", "4,4,full");
        std::env::set_var("TILEFUSE_LOWER_TO_MMT4D", "true");
        std::env::set_var("TILEFUSE_DEBUG_LOG", "stderr");

        let config = TileFuseConfig::default().override_from_env().unwrap();

        std::env::remove_var("TILEFUSE_TILE_SIZES");
        std::env::remove_var("TILEFUSE_LOWER_TO_MMT4D");
        std::env::remove_var("TILEFUSE_DEBUG_LOG");

        assert_eq!(config.tile_sizes.len(), 3);
        assert_eq!(config.tile_sizes[2], TileSizeSetting::Keyword("full".into()));
        assert!(config.lower_to_mmt4d);
        assert!(config.logger.stderr);
        assert_eq!(config.logger.level, TransformLogLevel::Full);
    }

    #[test]
    #[serial]
    fn invalid_env_boolean() {
        std::env::set_var("TILEFUSE_LOWER_TO_MMT4D", "maybe");
        let result = TileFuseConfig::default().override_from_env();
        std::env::remove_var("TILEFUSE_LOWER_TO_MMT4D");

        assert!(matches!(result, Err(ConfigError::InvalidOption { .. })));
    }
}
