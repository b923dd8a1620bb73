use serde::Serialize;

use crate::container_management::ContainerDetail;

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
}

/// One row of `GET /containers`.
#[derive(Debug, Serialize)]
pub struct ContainerEntry {
    pub director: String,
    #[serde(flatten)]
    pub detail: ContainerDetail,
}

#[derive(Debug, Serialize)]
pub struct RemovedResponse {
    pub name: String,
    pub director: String,
}
