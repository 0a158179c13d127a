use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use data_model::{EnrichedDatasetRecord, OwnerSnapshot};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

/// Workflow failure taxonomy. Each kind carries the human-readable detail
/// returned to the caller; anything internal stays in the logs.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Storage(String),
    #[error("{0}")]
    Persistence(String),
}

#[derive(Debug, ToSchema, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(skip)]
    status_code: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status_code: StatusCode, detail: &str) -> Self {
        Self {
            status_code,
            detail: detail.to_string(),
        }
    }

    pub fn unauthorized(detail: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, detail)
    }

    pub fn bad_request(detail: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn not_found(detail: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn internal_error(detail: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        match &e {
            WorkflowError::Authentication(detail) => Self::unauthorized(detail),
            WorkflowError::Validation(detail) => Self::bad_request(detail),
            WorkflowError::NotFound(detail) => Self::not_found(detail),
            WorkflowError::Storage(detail) | WorkflowError::Persistence(detail) => {
                Self::internal_error(detail)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("API Error: {} - {}", self.status_code, self.detail);
        let body = Json(serde_json::json!({ "detail": self.detail }));
        (self.status_code, body).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OwnerInfo {
    pub id: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

impl From<OwnerSnapshot> for OwnerInfo {
    fn from(snapshot: OwnerSnapshot) -> Self {
        Self {
            id: snapshot.id,
            name: snapshot.name,
            picture: snapshot.picture,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub filename: String,
    pub original_name: String,
    pub description: String,
    pub file_url: String,
    pub size: u64,
    pub created_at: u64,
    pub user: OwnerInfo,
}

impl From<EnrichedDatasetRecord> for Dataset {
    fn from(enriched: EnrichedDatasetRecord) -> Self {
        Self {
            id: enriched.record.id.to_string(),
            filename: enriched.record.filename,
            original_name: enriched.record.original_name,
            description: enriched.record.description,
            file_url: enriched.record.file_url,
            size: enriched.record.size,
            created_at: enriched.record.created_at,
            user: enriched.user.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DatasetList {
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub id: String,
    pub filename: String,
    pub original_name: String,
    pub description: String,
    pub file_url: String,
    pub size: u64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

impl From<data_model::UserProfile> for UserProfile {
    fn from(profile: data_model::UserProfile) -> Self {
        Self {
            name: profile.name,
            bio: profile.bio,
            location: profile.location,
            website: profile.website,
            company: profile.company,
            picture: profile.picture,
        }
    }
}

impl From<UserProfile> for data_model::UserProfile {
    fn from(profile: UserProfile) -> Self {
        Self {
            name: profile.name,
            bio: profile.bio,
            location: profile.location,
            website: profile.website,
            company: profile.company,
            picture: profile.picture,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub profile: Option<UserProfile>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyTokenResponse {
    pub user: AuthenticatedUser,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}
