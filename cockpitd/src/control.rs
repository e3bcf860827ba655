//! Control API client (HTTP).

use cockpit::model::{GalaxyId, MetricMapping, PlanetId, Position};
use cockpit::protocol::{
    ControlReplyBody, MetricMappingBody, PlanetStatusBody, PositionBody, StartOptimizationBody,
    StopOptimizationBody,
};
use futures_util::future::BoxFuture;
use reqwest::{Client, Method, Url};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("invalid API base `{0}`")]
    InvalidBase(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Outcome of an accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    Done,
    /// 409 `already_running` from the optimizer: the desired state already holds.
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    SetPosition {
        galaxy_id: GalaxyId,
        position: Position,
    },
    SetPlanetStatus {
        galaxy_id: GalaxyId,
        planet_id: PlanetId,
        status: String,
    },
    SetMetricMapping {
        galaxy_id: GalaxyId,
        mapping: MetricMapping,
    },
    StartOptimization(StartOptimizationBody),
    StopOptimization {
        planet_id: PlanetId,
    },
    DeleteAgent {
        galaxy_id: GalaxyId,
    },
}

impl ControlRequest {
    pub fn method(&self) -> Method {
        match self {
            ControlRequest::SetPosition { .. }
            | ControlRequest::SetPlanetStatus { .. }
            | ControlRequest::SetMetricMapping { .. } => Method::PUT,
            ControlRequest::StartOptimization(_) | ControlRequest::StopOptimization { .. } => {
                Method::POST
            }
            ControlRequest::DeleteAgent { .. } => Method::DELETE,
        }
    }

    /// Path segments below the API base.
    pub fn segments(&self) -> Vec<&str> {
        match self {
            ControlRequest::SetPosition { galaxy_id, .. } => vec!["agent", galaxy_id.as_str(), "position"],
            ControlRequest::SetPlanetStatus {
                galaxy_id,
                planet_id,
                ..
            } => vec!["agent", galaxy_id.as_str(), "planet", planet_id.as_str(), "status"],
            ControlRequest::SetMetricMapping { galaxy_id, .. } => {
                vec!["agent", galaxy_id.as_str(), "metric_mapping"]
            }
            ControlRequest::StartOptimization(_) => vec!["optimizer", "start"],
            ControlRequest::StopOptimization { .. } => vec!["optimizer", "stop"],
            ControlRequest::DeleteAgent { galaxy_id } => vec!["agent", galaxy_id.as_str()],
        }
    }

    pub fn body(&self) -> Result<Option<Value>, serde_json::Error> {
        let body = match self {
            ControlRequest::SetPosition { position, .. } => serde_json::to_value(PositionBody {
                position: *position,
            })?,
            ControlRequest::SetPlanetStatus { status, .. } => {
                serde_json::to_value(PlanetStatusBody {
                    status: status.clone(),
                })?
            }
            ControlRequest::SetMetricMapping { mapping, .. } => {
                serde_json::to_value(MetricMappingBody {
                    metric_mapping: mapping.clone(),
                })?
            }
            ControlRequest::StartOptimization(body) => serde_json::to_value(body)?,
            ControlRequest::StopOptimization { planet_id } => {
                serde_json::to_value(StopOptimizationBody {
                    planet_id: planet_id.clone(),
                })?
            }
            ControlRequest::DeleteAgent { .. } => return Ok(None),
        };
        Ok(Some(body))
    }
}

/// Classify a control API response.
pub fn interpret(status: u16, body: &str) -> Result<ControlReply, ControlError> {
    if (200..300).contains(&status) {
        return Ok(ControlReply::Done);
    }
    let parsed: ControlReplyBody = serde_json::from_str(body).unwrap_or_default();
    if status == 409 && parsed.status.as_deref() == Some("already_running") {
        return Ok(ControlReply::AlreadyRunning);
    }
    let message = parsed
        .message
        .or(parsed.detail)
        .unwrap_or_else(|| {
            let text = body.trim();
            if text.is_empty() {
                format!("HTTP {status}")
            } else {
                text.to_string()
            }
        });
    Err(ControlError::Rejected { status, message })
}

pub trait ControlApi: Send + Sync + 'static {
    fn send(&self, request: ControlRequest) -> BoxFuture<'_, Result<ControlReply, ControlError>>;
}

pub struct HttpControlApi {
    client: Client,
    base: Url,
}

impl HttpControlApi {
    pub fn new(base: &str) -> Result<Self, ControlError> {
        let base = Url::parse(base).map_err(|_| ControlError::InvalidBase(base.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ControlError::InvalidBase(base.to_string()));
        }
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, base })
    }

    pub fn url_for(&self, request: &ControlRequest) -> Result<Url, ControlError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ControlError::InvalidBase(self.base.to_string()))?
            .pop_if_empty()
            .extend(request.segments());
        Ok(url)
    }
}

impl ControlApi for HttpControlApi {
    fn send(&self, request: ControlRequest) -> BoxFuture<'_, Result<ControlReply, ControlError>> {
        Box::pin(async move {
            let url = self.url_for(&request)?;
            let mut builder = self.client.request(request.method(), url);
            if let Some(body) = request.body()? {
                builder = builder.json(&body);
            }
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let text = response.text().await?;
            interpret(status, &text)
        })
    }
}
