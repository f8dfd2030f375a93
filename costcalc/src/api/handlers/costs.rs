//! HTTP handlers for the cost tree endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::instrument;

use crate::{
    AppState,
    api::models::costs::{PartialTreeResponse, TreeQuery},
    auth::current_user::CurrentUser,
    cost::{CostWithChildren, Period, TreeRequest},
    errors::{Error, Result},
    types::CostType,
};

/// Resolves whose tree is computed and over which window.
fn tree_request(state: &AppState, user: CurrentUser, query: &TreeQuery) -> Result<TreeRequest> {
    let user_id = match &query.for_user {
        Some(other) if *other != user.id => {
            if !user.is_admin {
                return Err(Error::Forbidden {
                    message: "only admins may request the costs of other users".to_string(),
                });
            }
            other.clone()
        }
        _ => user.id,
    };
    let period = Period::resolve(query.start, query.end, query.skip_estimation, state.controller.now())?;
    Ok(TreeRequest {
        user_id,
        token: user.token,
        is_admin: user.is_admin,
        skip_estimation: query.skip_estimation,
        period,
    })
}

#[utoipa::path(
    get,
    path = "/tree",
    tag = "costs",
    summary = "Get cost tree",
    description = "Costs of the current month (or of an explicit window) for all six domains. \
Domains without cost are left out. If a domain fails, the response is a 500 carrying the error \
and the tree of the domains that succeeded.",
    params(TreeQuery),
    responses(
        (status = 200, description = "Cost tree", body = CostWithChildren),
        (status = 400, description = "Invalid window"),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "for_user given by a non-admin"),
        (status = 500, description = "Some domains failed", body = PartialTreeResponse),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_cost_tree(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<TreeQuery>,
) -> Result<Response> {
    let request = tree_request(&state, user, &query)?;
    let (tree, error) = state.controller.build_cost_tree(request).await;

    let mut root = CostWithChildren::default();
    for node in tree.values() {
        root.cost += node.cost;
    }
    root.children = tree;

    match error {
        None => Ok(Json(root).into_response()),
        Some(e) if e.status_code() != StatusCode::INTERNAL_SERVER_ERROR => Err(e),
        Some(e) => {
            e.log();
            let body = PartialTreeResponse {
                message: e.user_message(),
                tree: root,
            };
            Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response())
        }
    }
}

#[utoipa::path(
    get,
    path = "/tree/{cost_type}",
    tag = "costs",
    summary = "Get cost tree of one domain",
    params(
        ("cost_type" = String, Path, description = "One of `analytics`, `imports`, `process`, `API Calls`, `Devices`, `Exports`"),
        TreeQuery,
    ),
    responses(
        (status = 200, description = "Cost tree of the domain", body = CostWithChildren),
        (status = 400, description = "Unknown cost type or invalid window"),
        (status = 401, description = "Missing or invalid token"),
        (status = 500, description = "The domain failed"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(user_id = %user.id, cost_type = %cost_type))]
pub async fn get_domain_tree(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(cost_type): Path<String>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<CostWithChildren>> {
    let domain: CostType = cost_type.parse()?;
    let request = tree_request(&state, user, &query)?;
    let node = state.controller.build_domain_subtree(domain, &request).await?;
    Ok(Json(node))
}
