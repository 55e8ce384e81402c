//! Schematron meta-stylesheets shipped inside the binary.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};

/// One fixed file of the support set
#[derive(Debug, Clone, Copy)]
pub struct SupportAsset {
    pub name: &'static str,
    pub contents: &'static [u8],
}

/// Meta-stylesheet applied to a rules file to compile it
pub const META_STYLESHEET: &str = "schematron_message.xsl";

pub const SUPPORT_ASSETS: &[SupportAsset] = &[
    SupportAsset {
        name: META_STYLESHEET,
        contents: include_bytes!("../assets/schematron/schematron_message.xsl"),
    },
    SupportAsset {
        name: "schematron_skeleton.xsl",
        contents: include_bytes!("../assets/schematron/schematron_skeleton.xsl"),
    },
];

/// Copies the support assets out of the binary on first use
#[derive(Debug, Clone)]
pub struct ResourceMaterializer {
    assets: &'static [SupportAsset],
}

impl ResourceMaterializer {
    pub fn new() -> Self {
        Self {
            assets: SUPPORT_ASSETS,
        }
    }

    pub fn with_assets(assets: &'static [SupportAsset]) -> Self {
        Self { assets }
    }

    /// Write every missing asset into `output_dir`.
    ///
    /// Existing copies are left alone; assets change only with the binary. Returns
    /// the path of the meta-stylesheet entry point.
    pub fn ensure_support_assets_on_disk(&self, output_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(output_dir).map_err(|e| Error::resource_io(output_dir, e))?;

        for asset in self.assets {
            let target = output_dir.join(asset.name);
            if target.exists() {
                continue;
            }

            let mut temp =
                NamedTempFile::new_in(output_dir).map_err(|e| Error::resource_io(output_dir, e))?;
            temp.write_all(asset.contents)
                .map_err(|e| Error::resource_io(temp.path(), e))?;

            match temp.persist_noclobber(&target) {
                Ok(_) => debug!(asset = asset.name, dir = %output_dir.display(), "materialized support asset"),
                // Another process won the race; its copy is identical.
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(Error::resource_io(&target, e.error)),
            }
        }

        Ok(output_dir.join(META_STYLESHEET))
    }
}

impl Default for ResourceMaterializer {
    fn default() -> Self {
        Self::new()
    }
}
