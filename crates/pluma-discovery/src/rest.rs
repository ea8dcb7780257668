//! Discovery from a REST endpoint serving plugin inventories as JSON.

use crate::resource::{CliPlugin, CliPluginSpec};
use crate::{DiscoveredPlugin, DiscoveryError};
use pluma_types::DiscoveryType;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_REST_BASE_PATH: &str = "v1alpha1/system/binaries/plugins";

fn default_base_path() -> String {
    DEFAULT_REST_BASE_PATH.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestDiscovery {
    pub name: String,
    pub endpoint: String,
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    cli_plugins: Vec<RestPlugin>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeResponse {
    cli_plugin: RestPlugin,
}

#[derive(Debug, Deserialize)]
struct RestPlugin {
    name: String,
    #[serde(flatten)]
    spec: CliPluginSpec,
}

impl RestPlugin {
    fn into_discovered(self, source_name: &str) -> DiscoveredPlugin {
        CliPlugin::new(self.name, self.spec).into_discovered(source_name, DiscoveryType::Rest)
    }
}

impl RestDiscovery {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            base_path: default_base_path(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.base_path.trim_matches('/')
        )
    }

    pub(crate) async fn list(&self, client: &Client) -> Result<Vec<DiscoveredPlugin>, DiscoveryError> {
        let url = self.url();
        let body: ListResponse = match get_json(client, &url).await? {
            Some(body) => body,
            None => {
                return Err(DiscoveryError::Http {
                    url,
                    status: StatusCode::NOT_FOUND.as_u16(),
                })
            }
        };

        Ok(body
            .cli_plugins
            .into_iter()
            .map(|p| p.into_discovered(&self.name))
            .collect())
    }

    pub(crate) async fn describe(&self, client: &Client, name: &str) -> Result<DiscoveredPlugin, DiscoveryError> {
        let url = format!("{}/{}", self.url(), name);
        match get_json::<DescribeResponse>(client, &url).await? {
            Some(body) => Ok(body.cli_plugin.into_discovered(&self.name)),
            None => Err(DiscoveryError::NotFound {
                plugin: name.to_string(),
                source_name: self.name.clone(),
            }),
        }
    }
}

/// GET `url` and decode the JSON body; `None` on 404.
async fn get_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<Option<T>, DiscoveryError> {
    debug!("GET {}", url);
    let resp = client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await?;

    if resp.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !resp.status().is_success() {
        return Err(DiscoveryError::Http {
            url: url.to_string(),
            status: resp.status().as_u16(),
        });
    }

    let text = resp.text().await?;
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| DiscoveryError::MalformedResponse {
            origin: url.to_string(),
            source,
        })
}
