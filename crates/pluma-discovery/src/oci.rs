//! Discovery from an OCI image whose payload is a directory of `CLIPlugin`
//! resources.

use crate::resource::load_resources;
use crate::{DiscoveredPlugin, DiscoveryError};
use pluma_distribution::ImagePuller;
use pluma_types::DiscoveryType;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciDiscovery {
    pub name: String,
    pub image: String,
}

impl OciDiscovery {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
        }
    }

    pub(crate) async fn list(&self, puller: &dyn ImagePuller) -> Result<Vec<DiscoveredPlugin>, DiscoveryError> {
        let staging = tempfile::tempdir().map_err(|e| DiscoveryError::io(std::env::temp_dir(), e))?;
        debug!("Pulling discovery image {}", self.image);
        puller.pull(&self.image, staging.path()).await?;

        Ok(load_resources(staging.path())?
            .into_iter()
            .map(|resource| resource.into_discovered(&self.name, DiscoveryType::Oci))
            .collect())
    }
}
