//! Thin JSON surface over the services. Handlers validate input, call one
//! service operation and render its result; errors become `{error, code}`.

use std::collections::HashMap;

use axum::Router;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, patch, post, put};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq as _;
use tower_http::trace::TraceLayer;

use super::Services;
use super::blob_store::ARTIFACTS_ROUTE;
use crate::error::Error;
use crate::pipeline::{ChapterEdit, DetailsUpdate, Kickoff};
use crate::payment::Provider;
use crate::plan::{Billing, PlanName, UserPlan};
use crate::project::{NewProject, Project, ProjectStatus};
use crate::render::docx::DOCX_CONTENT_TYPE;

const WEBHOOK_TOKEN_HEADERS: [&str; 2] = ["x-webhook-token", "asaas-access-token"];

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Error::Internal(err) = &self {
            tracing::error!(err = ?err, "request failed");
        }
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body())).into_response()
    }
}

type ApiResult<T> = Result<T, Error>;

pub fn router(services: Services) -> Router {
    let admin = Router::new()
        .route("/leads", get(list_leads))
        .route("/leads/:id", delete(delete_lead))
        .route("/credits", post(grant_credits))
        .route("/plans", post(activate_plan))
        .route("/projects", get(list_projects).post(create_admin_project))
        .route("/projects/:id/regenerate", post(regenerate))
        .route("/projects/:id/deliver", post(deliver))
        .route("/settings/payment-bypass", put(set_payment_bypass))
        .route_layer(middleware::from_fn_with_state(services.clone(), require_admin));

    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/access", get(check_access))
        .route("/api/projects", post(create_project))
        .route("/api/projects/:id", get(get_project))
        .route("/api/projects/:id/research", post(start_research))
        .route("/api/projects/:id/title", post(select_title))
        .route("/api/projects/:id/structure", patch(update_structure))
        .route("/api/projects/:id/content", post(generate_content))
        .route("/api/projects/:id/details", patch(update_details))
        .route("/api/projects/:id/status", post(update_status))
        .route("/api/projects/:id/translate", post(translate))
        .route("/api/webhooks/:provider", post(webhook))
        .route(&format!("{ARTIFACTS_ROUTE}/*path"), get(download_artifact))
        .nest("/api/admin", admin)
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}

async fn require_admin(
    State(services): State<Services>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = services.settings.admin_token.as_deref().filter(|t| !t.is_empty()) else {
        return Error::Unauthorized.into_response();
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();
    if !bool::from(expected.as_bytes().ct_eq(presented.trim().as_bytes())) {
        return Error::Unauthorized.into_response();
    }
    next.run(request).await
}

#[derive(Debug, Deserialize)]
struct AccessQuery {
    email: String,
}

async fn check_access(
    State(services): State<Services>,
    Query(q): Query<AccessQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(services.entitlement.check_access(&q.email).await?))
}

async fn create_project(
    State(services): State<Services>,
    Json(request): Json<NewProject>,
) -> ApiResult<impl IntoResponse> {
    let project = services.pipeline.create(request).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<Json<Project>> {
    Ok(Json(services.pipeline.get(&id).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StageResponse {
    started: bool,
    project: Project,
}

async fn stage_response(services: &Services, id: &str, kickoff: Kickoff) -> ApiResult<Response> {
    let started = kickoff.is_started();
    let project = services.pipeline.get(id).await?;
    let status = if started {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(StageResponse { started, project })).into_response())
}

async fn start_research(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let kickoff = services.pipeline.start_research(&id).await?;
    stage_response(&services, &id, kickoff).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TitleRequest {
    title: String,
    #[serde(default, alias = "subtitle")]
    sub_title: String,
}

async fn select_title(
    State(services): State<Services>,
    Path(id): Path<String>,
    Json(body): Json<TitleRequest>,
) -> ApiResult<Response> {
    let kickoff = services
        .pipeline
        .select_title(&id, &body.title, &body.sub_title)
        .await?;
    stage_response(&services, &id, kickoff).await
}

async fn update_structure(
    State(services): State<Services>,
    Path(id): Path<String>,
    Json(edits): Json<Vec<ChapterEdit>>,
) -> ApiResult<Json<Project>> {
    Ok(Json(services.pipeline.update_structure(&id, edits).await?))
}

async fn generate_content(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let kickoff = services.pipeline.generate_content(&id).await?;
    stage_response(&services, &id, kickoff).await
}

async fn update_details(
    State(services): State<Services>,
    Path(id): Path<String>,
    Json(details): Json<DetailsUpdate>,
) -> ApiResult<Json<Project>> {
    Ok(Json(services.pipeline.update_details(&id, details).await?))
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: ProjectStatus,
}

async fn update_status(
    State(services): State<Services>,
    Path(id): Path<String>,
    Json(body): Json<StatusRequest>,
) -> ApiResult<Json<Project>> {
    Ok(Json(services.pipeline.update_status(&id, body.status).await?))
}

#[derive(Debug, Deserialize)]
struct TranslateRequest {
    language: String,
}

async fn translate(
    State(services): State<Services>,
    Path(id): Path<String>,
    Json(body): Json<TranslateRequest>,
) -> ApiResult<Response> {
    let kickoff = services.pipeline.translate(&id, &body.language).await?;
    stage_response(&services, &id, kickoff).await
}

fn webhook_token<'a>(headers: &'a HeaderMap, query: &'a HashMap<String, String>) -> Option<&'a str> {
    WEBHOOK_TOKEN_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .or_else(|| query.get("token").map(String::as_str))
}

async fn webhook(
    State(services): State<Services>,
    Path(provider): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let provider = Provider::parse(&provider)
        .ok_or_else(|| Error::not_found("payment provider", provider.clone()))?;
    let outcome = services
        .payments
        .handle(provider, webhook_token(&headers, &query), &payload)
        .await?;
    Ok(Json(outcome))
}

async fn download_artifact(
    State(services): State<Services>,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    let Some(bytes) = services.blobs.download(&path).await? else {
        return Err(Error::not_found("artifact", path));
    };
    let content_type = if path.ends_with(".docx") {
        DOCX_CONTENT_TYPE
    } else {
        "application/octet-stream"
    };
    let file_name = path.rsplit('/').next().unwrap_or("artifact");
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .map_err(|err| Error::Internal(err.into()))?;

    let mut response = Response::new(axum::body::Body::from(bytes));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

async fn list_leads(State(services): State<Services>) -> ApiResult<impl IntoResponse> {
    Ok(Json(services.entitlement.leads().list().await?))
}

async fn delete_lead(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(services.entitlement.delete_lead(&id).await?))
}

#[derive(Debug, Deserialize)]
struct GrantRequest {
    email: String,
    amount: i64,
}

async fn grant_credits(
    State(services): State<Services>,
    Json(body): Json<GrantRequest>,
) -> ApiResult<impl IntoResponse> {
    let balance = services
        .entitlement
        .grant_credit(&body.email, body.amount)
        .await?;
    Ok(Json(serde_json::json!({ "email": body.email, "credits": balance })))
}

#[derive(Debug, Deserialize)]
struct PlanRequest {
    email: String,
    plan: String,
    #[serde(default)]
    billing: Option<String>,
}

async fn activate_plan(
    State(services): State<Services>,
    Json(body): Json<PlanRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = PlanName::parse(&body.plan)
        .ok_or_else(|| Error::validation(format!("unknown plan: {}", body.plan)))?;
    let billing = match body.billing.as_deref() {
        None => Billing::Monthly,
        Some(raw) => Billing::parse(raw)
            .ok_or_else(|| Error::validation(format!("unknown billing: {raw}")))?,
    };
    let plan = services
        .entitlement
        .activate_plan(&body.email, UserPlan::active(name, billing, chrono::Utc::now()))
        .await?;
    Ok(Json(plan))
}

async fn list_projects(State(services): State<Services>) -> ApiResult<impl IntoResponse> {
    Ok(Json(services.pipeline.projects().list().await?))
}

async fn create_admin_project(
    State(services): State<Services>,
    Json(request): Json<NewProject>,
) -> ApiResult<impl IntoResponse> {
    let project = services.pipeline.create_for_admin(request).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn regenerate(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<Json<Project>> {
    Ok(Json(services.pipeline.regenerate(&id).await?))
}

async fn deliver(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(services.pipeline.deliver(&id).await?))
}

#[derive(Debug, Deserialize)]
struct BypassRequest {
    enabled: bool,
}

async fn set_payment_bypass(
    State(services): State<Services>,
    Json(body): Json<BypassRequest>,
) -> ApiResult<impl IntoResponse> {
    services
        .entitlement
        .settings()
        .set_payment_bypass(body.enabled)
        .await?;
    tracing::warn!(enabled = body.enabled, "payment bypass changed");
    Ok(Json(serde_json::json!({ "paymentBypass": body.enabled })))
}
