use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::daemon::{
    collection::{events::RequestAction, native::MAX_OUTBOUND_MESSAGE},
    storage::{
        entities::AggregateStore,
        merge::{ImportError, parse_snapshot},
    },
};

/// A validated request from one of the extension pages.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    GetTimeData,
    SaveTimeData,
    ClearTimeDataCache,
    UpdateTimeDataCache(AggregateStore),
    ImportTimeData(AggregateStore),
}

impl Request {
    /// Requests carrying statistics are validated here, so a bad payload is rejected before
    /// it can touch the store.
    pub fn parse(action: RequestAction, data: Option<Value>) -> Result<Self, ImportError> {
        let snapshot = || {
            let data = data.as_ref().ok_or_else(|| ImportError::InvalidFormat {
                reason: "request has no data".into(),
            })?;
            parse_snapshot(data)
        };

        Ok(match action {
            RequestAction::GetTimeData => Request::GetTimeData,
            RequestAction::SaveTimeData => Request::SaveTimeData,
            RequestAction::ClearTimeDataCache => Request::ClearTimeDataCache,
            RequestAction::UpdateTimeDataCache => Request::UpdateTimeDataCache(snapshot()?),
            RequestAction::ImportTimeData => Request::ImportTimeData(snapshot()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: u64,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_data: Option<AggregateStore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    pub fn success(id: u64) -> Self {
        Self {
            id,
            status: Status::Success,
            time_data: None,
            message: None,
        }
    }

    pub fn time_data(id: u64, store: AggregateStore) -> Self {
        Self {
            time_data: Some(store),
            ..Self::success(id)
        }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            status: Status::Error,
            time_data: None,
            message: Some(message.into()),
        }
    }

    /// Swaps a response the browser would refuse for an error with the same id.
    pub fn fit_for_browser(self) -> Self {
        match serde_json::to_vec(&self) {
            Ok(payload) if payload.len() <= MAX_OUTBOUND_MESSAGE => self,
            Ok(payload) => {
                error!("Response {} is {} bytes, sending an error instead", self.id, payload.len());
                Self::error(self.id, "response exceeds 1 MiB")
            }
            Err(e) => {
                error!("Couldn't serialize response {}: {e}", self.id);
                Self::error(self.id, "response could not be serialized")
            }
        }
    }
}
