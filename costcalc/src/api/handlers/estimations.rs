//! HTTP handlers for flow and import estimations.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use tracing::instrument;

use crate::{
    AppState,
    auth::current_user::CurrentUser,
    cost::Estimation,
    errors::{Error, Result},
};

fn ids(body: std::result::Result<Json<Vec<String>>, JsonRejection>) -> Result<Vec<String>> {
    body.map(|Json(ids)| ids).map_err(|e| Error::BadRequest {
        message: format!("expected a JSON array of ids: {}", e.body_text()),
    })
}

#[utoipa::path(
    get,
    path = "/estimation/flow/{id}",
    tag = "estimations",
    summary = "Estimate a flow",
    params(("id" = String, Path, description = "Flow id")),
    responses(
        (status = 200, description = "Estimation of the flow, as a one-element list", body = Vec<Estimation>),
        (status = 401, description = "Missing or invalid token"),
        (status = 500, description = "Flow not accessible or estimation failed"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(user_id = %user.id, flow_id = %id))]
pub async fn get_flow_estimation(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Estimation>>> {
    let estimations = state.controller.flow_estimations(&user.id, &user.token, &[id]).await?;
    Ok(Json(estimations))
}

#[utoipa::path(
    post,
    path = "/estimation/flow",
    tag = "estimations",
    summary = "Estimate flows",
    request_body(content = Vec<String>, description = "Flow ids"),
    responses(
        (status = 200, description = "One estimation per flow, in request order", body = Vec<Estimation>),
        (status = 400, description = "Body is not a list of ids"),
        (status = 401, description = "Missing or invalid token"),
        (status = 500, description = "A flow is not accessible or estimation failed"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn post_flow_estimations(
    State(state): State<AppState>,
    user: CurrentUser,
    body: std::result::Result<Json<Vec<String>>, JsonRejection>,
) -> Result<Json<Vec<Estimation>>> {
    let flow_ids = ids(body)?;
    let estimations = state.controller.flow_estimations(&user.id, &user.token, &flow_ids).await?;
    Ok(Json(estimations))
}

#[utoipa::path(
    get,
    path = "/estimation/import/{id}",
    tag = "estimations",
    summary = "Estimate an import type",
    params(("id" = String, Path, description = "Import type id")),
    responses(
        (status = 200, description = "Estimation of one import of this type", body = Estimation),
        (status = 401, description = "Missing or invalid token"),
        (status = 500, description = "Estimation failed"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(user_id = %user.id, import_type_id = %id))]
pub async fn get_import_estimation(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Estimation>> {
    Ok(Json(state.controller.import_estimation(&id).await?))
}

#[utoipa::path(
    post,
    path = "/estimation/import",
    tag = "estimations",
    summary = "Estimate import types",
    request_body(content = Vec<String>, description = "Import type ids"),
    responses(
        (status = 200, description = "One estimation per import type, in request order", body = Vec<Estimation>),
        (status = 400, description = "Body is not a list of ids"),
        (status = 401, description = "Missing or invalid token"),
        (status = 500, description = "Estimation failed"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn post_import_estimations(
    State(state): State<AppState>,
    user: CurrentUser,
    body: std::result::Result<Json<Vec<String>>, JsonRejection>,
) -> Result<Json<Vec<Estimation>>> {
    let import_type_ids = ids(body)?;
    Ok(Json(state.controller.import_estimations(&import_type_ids).await?))
}

#[cfg(test)]
mod tests {
    use crate::{
        auth::current_user::test_token,
        clients::{Operator, Pipeline, QueryValue, Sample},
        test_utils::{FakePipelines, Fakes, MockMetrics},
    };
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn fakes() -> Fakes {
        let mut fakes = Fakes::default();
        fakes.pipelines = Arc::new(FakePipelines::new([(
            "f1",
            Pipeline {
                flow_id: "f1".to_string(),
                operators: vec![Operator {
                    id: "o1".to_string(),
                    operator_id: "adder".to_string(),
                }],
            },
        )]));
        fakes.metrics = Arc::new(
            MockMetrics::new()
                .on(
                    "container_cpu_usage_seconds_total:avg_rate_1h{namespace=\"ana\"}",
                    QueryValue::Vector(vec![Sample::new(
                        [("namespace", "ana"), ("pod", "a-0"), ("container", "pipe--o1")],
                        1.0,
                    )]),
                )
                .on(
                    "container_cpu_usage_seconds_total:avg_rate_1h{namespace=\"imp\"}",
                    QueryValue::Vector(vec![Sample::new(
                        [
                            ("namespace", "imp"),
                            ("pod", "i-0"),
                            ("container", "import"),
                            ("label_import_type_id", "urn_infai_ses_import-type_x"),
                        ],
                        1.0,
                    )]),
                ),
        );
        fakes
    }

    #[tokio::test]
    async fn test_flow_estimation_shape() {
        let fakes = fakes();
        let response = fakes
            .server()
            .get("/estimation/flow/f1")
            .add_header("authorization", test_token(&fakes.user_id, false))
            .await;

        response.assert_status_ok();
        let body: Value = response.json();
        let estimations = body.as_array().unwrap();
        assert_eq!(estimations.len(), 1);
        for key in ["min", "max", "mean", "median"] {
            assert!(estimations[0][key].as_f64().unwrap() > 0.0);
        }
    }

    #[tokio::test]
    async fn test_post_flows_keeps_order_and_checks_access() {
        let fakes = fakes();
        let server = fakes.server();
        let token = test_token(&fakes.user_id, false);

        let response = server
            .post("/estimation/flow")
            .add_header("authorization", token.clone())
            .json(&json!(["f1", "f1"]))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body[0], body[1]);

        let response = server
            .post("/estimation/flow")
            .add_header("authorization", token)
            .json(&json!(["f1", "not-mine"]))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let fakes = fakes();
        let response = fakes
            .server()
            .post("/estimation/import")
            .add_header("authorization", test_token(&fakes.user_id, false))
            .json(&json!({"ids": ["x"]}))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_import_estimations() {
        let fakes = fakes();
        let server = fakes.server();
        let token = test_token(&fakes.user_id, false);

        let single: Value = server
            .get("/estimation/import/urn:infai:ses:import-type:x")
            .add_header("authorization", token.clone())
            .await
            .json();
        assert!(single["mean"].as_f64().unwrap() > 0.0);

        let many: Value = server
            .post("/estimation/import")
            .add_header("authorization", token)
            .json(&json!(["urn:infai:ses:import-type:x", "urn:infai:ses:import-type:y"]))
            .await
            .json();
        assert_eq!(many[0], single);
        assert_eq!(many[1], json!({"min": 0.0, "max": 0.0, "mean": 0.0, "median": 0.0}));
    }
}
