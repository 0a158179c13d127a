use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, MatchedPath, Multipart, Request, State},
    http::{HeaderMap, Method},
    routing::{get, post, put},
    Json,
    Router,
};
use blob_store::BlobStorage;
use bytes::Bytes;
use catalog_store::DatasetCatalog;
use data_model::{derive_storage_filename, DatasetRecord, DatasetRecordBuilder, UserIdentity};
use futures::stream;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{bearer_token, TokenVerifier},
    http_objects::{
        ApiError,
        AuthenticatedUser,
        Dataset,
        DatasetList,
        MessageResponse,
        OwnerInfo,
        UploadResponse,
        UserProfile,
        VerifyTokenResponse,
        WorkflowError,
    },
};

#[derive(OpenApi)]
#[openapi(
        paths(
            get_datasets,
            get_my_datasets,
            upload_dataset,
            verify_auth_token,
            get_profile,
            update_profile,
        ),
        components(
            schemas(
                ApiError,
                Dataset,
                DatasetList,
                OwnerInfo,
                UploadResponse,
                UploadRequestType,
                UserProfile,
                AuthenticatedUser,
                VerifyTokenResponse,
                MessageResponse,
            )
        ),
        tags(
            (name = "dbhive", description = "DbHive dataset catalog API")
        )
    )]
struct ApiDoc;

#[derive(Clone)]
pub struct RouteState {
    pub catalog: DatasetCatalog,
    pub blob_storage: Arc<BlobStorage>,
    pub token_verifier: Arc<dyn TokenVerifier>,
}

pub fn create_routes(route_state: RouteState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/docs/swagger").url("/docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(index))
        .route(
            "/api/v1/datasets",
            get(get_datasets).with_state(route_state.clone()),
        )
        .route(
            "/api/v1/my-datasets",
            get(get_my_datasets).with_state(route_state.clone()),
        )
        .route(
            "/api/v1/upload",
            post(upload_dataset).with_state(route_state.clone()),
        )
        .route(
            "/api/v1/auth/verify-token",
            post(verify_auth_token).with_state(route_state.clone()),
        )
        .route(
            "/api/v1/auth/profile",
            get(get_profile).with_state(route_state.clone()),
        )
        .route(
            "/api/v1/auth/profile",
            put(update_profile).with_state(route_state.clone()),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let method = req.method();
                    let uri = req.uri();

                    let matched_path = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::debug_span!("request", %method, %uri, matched_path)
                })
                .on_failure(()),
        )
        .layer(cors)
        .layer(DefaultBodyLimit::max(usize::MAX))
}

async fn index() -> &'static str {
    "DbHive Server"
}

/// Resolves the caller from the `Authorization: Bearer` header. Header
/// problems fail here; everything else is the provider's verdict, and
/// both surface as 401.
pub async fn authorize(
    state: &RouteState,
    headers: &HeaderMap,
) -> Result<UserIdentity, WorkflowError> {
    let token = bearer_token(headers).ok_or_else(|| {
        WorkflowError::Authentication("Invalid authentication credentials".to_string())
    })?;
    state
        .token_verifier
        .verify(token)
        .await
        .map_err(|e| WorkflowError::Authentication(format!("Invalid token: {}", e)))
}

/// One file pulled out of the multipart upload body.
pub struct UploadedFile {
    pub original_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// The upload workflow: the payload is stored before any metadata is
/// written, so a persisted record always references a resolvable blob.
/// If the metadata write fails the blob is left behind for an
/// out-of-band reconciliation sweep.
pub async fn perform_upload(
    state: &RouteState,
    user: &UserIdentity,
    file: UploadedFile,
    description: String,
) -> Result<DatasetRecord, WorkflowError> {
    let filename = derive_storage_filename(&file.original_name);
    let content_type = file
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    let key = format!("datasets/{}/{}", user.id, filename);

    let payload = stream::iter(vec![Ok(file.bytes)]);
    let put_result = state
        .blob_storage
        .put(&key, Box::pin(payload), content_type)
        .await
        .map_err(|e| {
            error!("failed to store file {}: {:?}", key, e);
            WorkflowError::Storage("failed to store file".to_string())
        })?;
    info!("file uploaded to blob store: {}", put_result.url);

    let record = DatasetRecordBuilder::default()
        .filename(filename)
        .original_name(file.original_name)
        .description(description)
        .file_url(put_result.url.clone())
        .size(put_result.size_bytes)
        .user_id(user.id.clone())
        .build()
        .map_err(|e| WorkflowError::Persistence(e.to_string()))?;
    state.catalog.create_dataset(&record).await.map_err(|e| {
        // no compensating delete; the blob at this URL is orphaned
        error!(
            "failed to persist metadata for blob {}: {:?}",
            put_result.url, e
        );
        WorkflowError::Persistence("failed to persist dataset metadata".to_string())
    })?;
    info!("dataset metadata saved with id: {}", record.id);
    Ok(record)
}

/// List all datasets
#[utoipa::path(
    get,
    path = "/api/v1/datasets",
    tag = "datasets",
    responses(
        (status = 200, description = "All uploaded datasets", body = DatasetList),
        (status = UNAUTHORIZED, description = "Invalid or missing credentials"),
        (status = INTERNAL_SERVER_ERROR, description = "Unable to list datasets")
    ),
)]
async fn get_datasets(
    State(state): State<RouteState>,
    headers: HeaderMap,
) -> Result<Json<DatasetList>, ApiError> {
    authorize(&state, &headers).await?;
    let datasets = state.catalog.list_datasets(None).await.map_err(|e| {
        error!("error listing datasets: {:?}", e);
        WorkflowError::Persistence("failed to list datasets".to_string())
    })?;
    Ok(Json(DatasetList {
        datasets: datasets.into_iter().map(Into::into).collect(),
    }))
}

/// List the caller's datasets
#[utoipa::path(
    get,
    path = "/api/v1/my-datasets",
    tag = "datasets",
    responses(
        (status = 200, description = "Datasets owned by the caller", body = DatasetList),
        (status = UNAUTHORIZED, description = "Invalid or missing credentials"),
        (status = INTERNAL_SERVER_ERROR, description = "Unable to list datasets")
    ),
)]
async fn get_my_datasets(
    State(state): State<RouteState>,
    headers: HeaderMap,
) -> Result<Json<DatasetList>, ApiError> {
    let user = authorize(&state, &headers).await?;
    let datasets = state
        .catalog
        .list_datasets(Some(&user.id))
        .await
        .map_err(|e| {
            error!("error listing datasets for {}: {:?}", user.id, e);
            WorkflowError::Persistence("failed to list datasets".to_string())
        })?;
    Ok(Json(DatasetList {
        datasets: datasets.into_iter().map(Into::into).collect(),
    }))
}

#[allow(dead_code)]
#[derive(ToSchema)]
struct UploadRequestType {
    #[schema(format = "binary")]
    file: String,
    name: String,
    description: Option<String>,
}

/// Upload a dataset file with its metadata
#[utoipa::path(
    post,
    path = "/api/v1/upload",
    tag = "datasets",
    request_body(content_type = "multipart/form-data", content = inline(UploadRequestType)),
    responses(
        (status = 200, description = "Dataset stored and cataloged", body = UploadResponse),
        (status = BAD_REQUEST, description = "Missing file or name field"),
        (status = UNAUTHORIZED, description = "Invalid or missing credentials"),
        (status = INTERNAL_SERVER_ERROR, description = "Storage or persistence failure")
    ),
)]
async fn upload_dataset(
    State(state): State<RouteState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let user = authorize(&state, &headers).await?;

    let mut file: Option<UploadedFile> = None;
    let mut name: Option<String> = None;
    let mut description: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(&e.to_string()))?
    {
        match field.name() {
            Some("file") => {
                let original_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(|ct| ct.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(&e.to_string()))?;
                file = Some(UploadedFile {
                    original_name,
                    content_type,
                    bytes,
                });
            }
            Some("name") => {
                name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(&e.to_string()))?,
                );
            }
            Some("description") => {
                description = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(&e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ApiError::bad_request("file is required"))?;
    let name = name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("name is required"))?;
    info!(
        "receiving upload - file: {}, name: {}, user: {}",
        file.original_name, name, user.id
    );

    let record = perform_upload(&state, &user, file, description.unwrap_or_default()).await?;
    Ok(Json(UploadResponse {
        id: record.id.to_string(),
        filename: record.filename,
        original_name: record.original_name,
        description: record.description,
        file_url: record.file_url,
        size: record.size,
        status: "success".to_string(),
    }))
}

/// Verify the caller's token and return their identity with profile
#[utoipa::path(
    post,
    path = "/api/v1/auth/verify-token",
    tag = "auth",
    responses(
        (status = 200, description = "Verified caller identity", body = VerifyTokenResponse),
        (status = UNAUTHORIZED, description = "Invalid or missing credentials")
    ),
)]
async fn verify_auth_token(
    State(state): State<RouteState>,
    headers: HeaderMap,
) -> Result<Json<VerifyTokenResponse>, ApiError> {
    let user = authorize(&state, &headers).await?;
    let profile = state.catalog.profiles().get(&user.id).await.map_err(|e| {
        error!("error reading profile for {}: {:?}", user.id, e);
        WorkflowError::Persistence("failed to read profile".to_string())
    })?;
    Ok(Json(VerifyTokenResponse {
        user: AuthenticatedUser {
            id: user.id,
            email: user.email,
            name: user.name,
            picture: user.picture,
            profile: profile.map(Into::into),
        },
    }))
}

/// Fetch the caller's profile
#[utoipa::path(
    get,
    path = "/api/v1/auth/profile",
    tag = "auth",
    responses(
        (status = 200, description = "The caller's profile", body = UserProfile),
        (status = UNAUTHORIZED, description = "Invalid or missing credentials"),
        (status = NOT_FOUND, description = "No profile document exists")
    ),
)]
async fn get_profile(
    State(state): State<RouteState>,
    headers: HeaderMap,
) -> Result<Json<UserProfile>, ApiError> {
    let user = authorize(&state, &headers).await?;
    let profile = state.catalog.profiles().get(&user.id).await.map_err(|e| {
        error!("error reading profile for {}: {:?}", user.id, e);
        WorkflowError::Persistence("failed to read profile".to_string())
    })?;
    match profile {
        Some(profile) => Ok(Json(profile.into())),
        None => Err(ApiError::not_found("Profile not found")),
    }
}

/// Create or update the caller's profile
#[utoipa::path(
    put,
    path = "/api/v1/auth/profile",
    tag = "auth",
    request_body = UserProfile,
    responses(
        (status = 200, description = "Profile merged", body = MessageResponse),
        (status = BAD_REQUEST, description = "Missing or empty name"),
        (status = UNAUTHORIZED, description = "Invalid or missing credentials"),
        (status = INTERNAL_SERVER_ERROR, description = "Unable to write profile")
    ),
)]
async fn update_profile(
    State(state): State<RouteState>,
    headers: HeaderMap,
    Json(profile): Json<UserProfile>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = authorize(&state, &headers).await?;
    if profile.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    state
        .catalog
        .profiles()
        .upsert(&user.id, &profile.into())
        .await
        .map_err(|e| {
            error!("error updating profile for {}: {:?}", user.id, e);
            WorkflowError::Persistence("failed to update profile".to_string())
        })?;
    Ok(Json(MessageResponse {
        message: "Profile updated successfully".to_string(),
    }))
}
