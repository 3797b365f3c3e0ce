//! Release resolver for the GitHub releases API

use std::sync::atomic::AtomicBool;

use serde::Deserialize;

use crate::error::InstallError;
use crate::http::{self, Timeouts};
use crate::logging::log_info;
use crate::retry::RetryPolicy;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const ACCEPT_RELEASE_JSON: &str = "application/vnd.github+json";

/// GitHub release metadata
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Release {
    #[serde(rename = "tag_name")]
    pub tag: String,
    #[serde(rename = "body", default, deserialize_with = "null_as_empty")]
    pub notes: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// GitHub release asset
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Asset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
    #[serde(default)]
    pub size: u64,
}

impl Release {
    pub fn find_asset(&self, predicate: impl Fn(&Asset) -> bool) -> Option<&Asset> {
        self.assets.iter().find(|a| predicate(a))
    }

    pub fn asset_named(&self, name: &str) -> Option<&Asset> {
        self.find_asset(|a| a.name == name)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Fetches release metadata; stateless, every call goes to the network.
pub struct ReleaseResolver {
    agent: ureq::Agent,
    api_base: String,
    retry: RetryPolicy,
}

impl ReleaseResolver {
    pub fn new(api_base: &str, timeouts: &Timeouts, retry: RetryPolicy) -> Self {
        Self {
            agent: http::api_agent(timeouts),
            api_base: api_base.trim_end_matches('/').to_string(),
            retry,
        }
    }

    pub fn fetch_latest(&self, owner: &str, repo: &str, cancel: &AtomicBool) -> Result<Release, InstallError> {
        let url = format!("{}/repos/{}/{}/releases/latest", self.api_base, owner, repo);
        self.fetch(&url, cancel)
    }

    pub fn fetch_by_tag(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
        cancel: &AtomicBool,
    ) -> Result<Release, InstallError> {
        let url = format!("{}/repos/{}/{}/releases/tags/{}", self.api_base, owner, repo, tag);
        self.fetch(&url, cancel)
    }

    fn fetch(&self, url: &str, cancel: &AtomicBool) -> Result<Release, InstallError> {
        let release = self.retry.run(cancel, "Release lookup", |_| {
            let response = http::get(&self.agent, url, Some(ACCEPT_RELEASE_JSON))?;
            response
                .into_json::<Release>()
                .map_err(|e| InstallError::Decode {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
        })?;

        if release.tag.trim().is_empty() {
            return Err(InstallError::Decode {
                url: url.to_string(),
                reason: "release has an empty tag".to_string(),
            });
        }

        log_info(&format!(
            "Resolved {} ({} assets) from {}",
            release.tag,
            release.assets.len(),
            url
        ));
        Ok(release)
    }
}
