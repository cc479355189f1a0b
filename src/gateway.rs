use crate::errors::{SyncError, SyncResult};
use crate::models::Table;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayRequest {
    Select {
        table: Table,
        filter: Option<Filter>,
    },
    Insert {
        table: Table,
        payload: Value,
    },
    Update {
        table: Table,
        id: String,
        payload: Value,
    },
    Delete {
        table: Table,
        id: String,
    },
}

impl GatewayRequest {
    pub fn table(&self) -> Table {
        match self {
            Self::Select { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. } => *table,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub code: String,
    pub message: String,
}

impl GatewayError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(value: anyhow::Error) -> Self {
        Self::new("GATEWAY_FAILURE", value.to_string())
    }
}

/// Thin pass-through to the hosted data service. Implemented by the hosting
/// application; the sync core never sees transport details.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn execute(&self, request: GatewayRequest) -> Result<Vec<Value>, GatewayError>;
}

pub(crate) async fn select_rows<T: DeserializeOwned>(
    gateway: &dyn RemoteGateway,
    table: Table,
    filter: Option<Filter>,
) -> SyncResult<Vec<T>> {
    let rows = gateway
        .execute(GatewayRequest::Select { table, filter })
        .await
        .map_err(SyncError::from)?;
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(SyncError::from))
        .collect()
}

pub(crate) async fn insert_returning<T: DeserializeOwned>(
    gateway: &dyn RemoteGateway,
    table: Table,
    payload: Value,
) -> SyncResult<T> {
    let rows = gateway
        .execute(GatewayRequest::Insert { table, payload })
        .await
        .map_err(SyncError::from)?;
    single_row(rows, table)
}

pub(crate) async fn update_returning<T: DeserializeOwned>(
    gateway: &dyn RemoteGateway,
    table: Table,
    id: &str,
    payload: Value,
) -> SyncResult<T> {
    let rows = gateway
        .execute(GatewayRequest::Update {
            table,
            id: id.to_string(),
            payload,
        })
        .await
        .map_err(SyncError::from)?;
    single_row(rows, table)
}

pub(crate) async fn delete_by_id(
    gateway: &dyn RemoteGateway,
    table: Table,
    id: &str,
) -> SyncResult<()> {
    gateway
        .execute(GatewayRequest::Delete {
            table,
            id: id.to_string(),
        })
        .await
        .map_err(SyncError::from)?;
    Ok(())
}

fn single_row<T: DeserializeOwned>(rows: Vec<Value>, table: Table) -> SyncResult<T> {
    let row = rows.into_iter().next().ok_or_else(|| {
        SyncError::Internal(format!(
            "{} write returned no canonical row",
            table.as_str()
        ))
    })?;
    serde_json::from_value(row).map_err(SyncError::from)
}
