//! OpenAPI documentation, served with Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{
    api::{handlers, models::costs::PartialTreeResponse},
    cost::{CostEntry, CostWithChildren, CostWithEstimation, Estimation},
};

/// Bearer token issued by the platform's identity provider.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Platform access token. The caller is the token's `sub` claim; the `admin` realm \
                            role allows `for_user`:\n\n```\nAuthorization: Bearer YOUR_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "costcalc",
        description = "Per-tenant cost attribution. Costs are priced from cluster metrics and \
grouped into a tree per domain: analytics, imports, process, API Calls, Devices and Exports.",
    ),
    paths(
        handlers::costs::get_cost_tree,
        handlers::costs::get_domain_tree,
        handlers::estimations::get_flow_estimation,
        handlers::estimations::post_flow_estimations,
        handlers::estimations::get_import_estimation,
        handlers::estimations::post_import_estimations,
        handlers::health::health,
    ),
    components(schemas(CostEntry, CostWithEstimation, CostWithChildren, Estimation, PartialTreeResponse)),
    modifiers(&SecurityAddon),
    tags(
        (name = "costs", description = "Cost trees of the current month or an explicit window"),
        (name = "estimations", description = "Expected cost of a single flow or import run"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;
