//! HTTP agents and response classification

use std::time::Duration;

use crate::error::InstallError;

pub const USER_AGENT: &str = concat!("kitup/", env!("CARGO_PKG_VERSION"));

/// Timeouts for the two kinds of network traffic the pipeline makes.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Per-attempt limit for release metadata and checksum files
    pub api: Duration,
    /// Overall limit for a single binary download
    pub download: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            api: Duration::from_secs(30),
            download: Duration::from_secs(600),
        }
    }
}

/// Agent for short metadata calls.
pub fn api_agent(timeouts: &Timeouts) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(timeouts.api.min(Duration::from_secs(15)))
        .timeout(timeouts.api)
        .user_agent(USER_AGENT)
        .build()
}

/// Agent for large binary downloads.
pub fn download_agent(timeouts: &Timeouts) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(15))
        .timeout(timeouts.download)
        .user_agent(USER_AGENT)
        .build()
}

/// Issue a GET and map failures onto the install error taxonomy.
pub fn get(agent: &ureq::Agent, url: &str, accept: Option<&str>) -> Result<ureq::Response, InstallError> {
    let mut request = agent.get(url);
    if let Some(accept) = accept {
        request = request.set("Accept", accept);
    }
    let response = request.call().map_err(|e| classify(url, e))?;
    if !(200..300).contains(&response.status()) {
        return Err(InstallError::HttpStatus {
            url: url.to_string(),
            code: response.status(),
        });
    }
    Ok(response)
}

fn classify(url: &str, err: ureq::Error) -> InstallError {
    match err {
        ureq::Error::Status(code, _) => InstallError::HttpStatus {
            url: url.to_string(),
            code,
        },
        ureq::Error::Transport(t) => InstallError::Network {
            url: url.to_string(),
            reason: t.to_string(),
        },
    }
}
