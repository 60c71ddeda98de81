use crate::error::{ConvError, Result};
use crate::pack::KERNEL;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Input lanes per width tile.
pub const DEFAULT_TILE_SIZE: usize = 1024;
/// Output rows accumulated before a row-block is stored.
pub const DEFAULT_ROW_BLOCK: usize = 6;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvConfig {
    /// Lane budget of a width tile, halo included; a tile emits `tile_size - 2` columns.
    pub tile_size: usize,
    /// Output rows held in the accumulator bank before they are stored.
    pub row_block: usize,
    /// Accept channel counts that do not fill the last group; missing channels read as zero.
    pub partial_groups: bool,
    /// Reject activation/filter values wider than their precision.
    pub check_ranges: bool,
    /// Spread output channels over the rayon pool.
    pub parallel: bool,
}

impl Default for ConvConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            row_block: DEFAULT_ROW_BLOCK,
            partial_groups: false,
            check_ranges: true,
            parallel: false,
        }
    }
}

impl ConvConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tile_size < KERNEL {
            return Err(ConvError::InvalidConfig(format!(
                "tile_size {} leaves no output lanes for a {}x{} kernel",
                self.tile_size, KERNEL, KERNEL
            )));
        }
        if self.row_block == 0 {
            return Err(ConvError::InvalidConfig("row_block must be at least 1".into()));
        }
        Ok(())
    }

    /// Output columns produced by one full tile.
    pub fn tile_out(&self) -> usize { self.tile_size + 1 - KERNEL }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("open conv config: {}", path.as_ref().display()))?;
        let cfg: ConvConfig = serde_json::from_str(&text).context("parse conv config")?;
        cfg.validate()?;
        Ok(cfg)
    }
}
