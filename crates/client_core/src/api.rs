use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{FireMode, RelayOutput, TableDirection, ToggleChannel},
    error::ApiError,
    protocol::{
        CommandResponse, FanResponse, FireRequest, LightsResponse, RelaySetRequest, RelayStatus,
        ServoStatusResponse, TableMoveRequest, TableMoveResponse, TableStatus,
        TableStatusResponse, TimingConfig,
    },
};
use tracing::debug;
use url::Url;

use crate::error::ControlError;

/// The workstation's device-control API. Implementations only return bodies
/// whose `status` is `success`; anything else surfaces as
/// [`ControlError::Rejected`].
#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn fire(
        &self,
        channel: ToggleChannel,
        mode: FireMode,
    ) -> Result<CommandResponse, ControlError>;
    async fn stop_firing(&self) -> Result<CommandResponse, ControlError>;
    async fn estop(&self) -> Result<CommandResponse, ControlError>;
    async fn servo_status(&self) -> Result<ServoStatusResponse, ControlError>;
    async fn set_relay(
        &self,
        relay: RelayOutput,
        request: RelaySetRequest,
    ) -> Result<RelayStatus, ControlError>;
    async fn relay_status(&self, relay: RelayOutput) -> Result<RelayStatus, ControlError>;
    async fn move_table(
        &self,
        direction: TableDirection,
        state: bool,
    ) -> Result<TableMoveResponse, ControlError>;
    async fn table_status(&self) -> Result<TableStatus, ControlError>;
    async fn timing_config(&self) -> Result<TimingConfig, ControlError>;
}

pub struct HttpControlApi {
    http: Client,
    server_url: String,
}

impl HttpControlApi {
    pub fn new(server_url: impl Into<String>) -> Result<Self, ControlError> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: impl Into<String>) -> Result<Self, ControlError> {
        let server_url = server_url.into();
        let parsed =
            Url::parse(&server_url).map_err(|err| ControlError::InvalidUrl(err.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ControlError::InvalidUrl(format!(
                "server_url must start with http:// or https://, got {server_url}"
            )));
        }
        Ok(Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ControlError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        debug!("control api: POST {path}");
        let res = self.http.post(self.endpoint(path)).json(body).send().await?;
        decode(path, res).await
    }

    async fn get_json<R>(&self, path: &str) -> Result<R, ControlError>
    where
        R: DeserializeOwned,
    {
        let res = self.http.get(self.endpoint(path)).send().await?;
        decode(path, res).await
    }
}

async fn decode<R: DeserializeOwned>(path: &str, res: Response) -> Result<R, ControlError> {
    let status = res.status();
    if !status.is_success() {
        // Error bodies usually still carry `{status, message}`.
        let message = res
            .json::<CommandResponse>()
            .await
            .ok()
            .and_then(|body| body.message);
        return Err(ControlError::HttpStatus {
            status: status.as_u16(),
            message,
        });
    }
    res.json::<R>()
        .await
        .map_err(|err| ControlError::Transport(format!("failed to decode {path} response: {err}")))
}

fn checked(path: &str, body: CommandResponse) -> Result<CommandResponse, ControlError> {
    if body.simulated == Some(true) {
        debug!("control api: {path} answered by simulated backend");
    }
    Ok(body.into_result()?)
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn fire(
        &self,
        channel: ToggleChannel,
        mode: FireMode,
    ) -> Result<CommandResponse, ControlError> {
        let path = channel.fire_path();
        let body: CommandResponse = self.post_json(path, &FireRequest { mode }).await?;
        checked(path, body)
    }

    async fn stop_firing(&self) -> Result<CommandResponse, ControlError> {
        let body: CommandResponse = self.post_json("/stop_firing", &serde_json::json!({})).await?;
        checked("/stop_firing", body)
    }

    async fn estop(&self) -> Result<CommandResponse, ControlError> {
        let body: CommandResponse = self.post_json("/estop", &serde_json::json!({})).await?;
        checked("/estop", body)
    }

    async fn servo_status(&self) -> Result<ServoStatusResponse, ControlError> {
        let body: ServoStatusResponse = self.get_json("/servo_status").await?;
        if !body.status.is_success() {
            return Err(ApiError::from_status(body.status, body.message.as_deref()).into());
        }
        Ok(body)
    }

    async fn set_relay(
        &self,
        relay: RelayOutput,
        request: RelaySetRequest,
    ) -> Result<RelayStatus, ControlError> {
        let status = match relay {
            RelayOutput::Fan => {
                let body: FanResponse = self.post_json(relay.set_path(), &request).await?;
                body.into_relay_status()?
            }
            RelayOutput::Lights => {
                let body: LightsResponse = self.post_json(relay.set_path(), &request).await?;
                body.into_relay_status()?
            }
        };
        Ok(status)
    }

    async fn relay_status(&self, relay: RelayOutput) -> Result<RelayStatus, ControlError> {
        let status = match relay {
            RelayOutput::Fan => {
                let body: FanResponse = self.get_json(relay.status_path()).await?;
                body.into_relay_status()?
            }
            RelayOutput::Lights => {
                let body: LightsResponse = self.get_json(relay.status_path()).await?;
                body.into_relay_status()?
            }
        };
        Ok(status)
    }

    async fn move_table(
        &self,
        direction: TableDirection,
        state: bool,
    ) -> Result<TableMoveResponse, ControlError> {
        let body: TableMoveResponse = self
            .post_json(direction.path(), &TableMoveRequest { state })
            .await?;
        if !body.status.is_success() {
            return Err(ApiError::from_status(body.status, body.message.as_deref()).into());
        }
        Ok(body)
    }

    async fn table_status(&self) -> Result<TableStatus, ControlError> {
        let body: TableStatusResponse = self.get_json("/table/status").await?;
        if !body.status.is_success() {
            return Err(ApiError::from_status(body.status, None).into());
        }
        Ok(body.table)
    }

    async fn timing_config(&self) -> Result<TimingConfig, ControlError> {
        self.get_json("/api/config/timing").await
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
