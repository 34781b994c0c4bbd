//! OpenAPI specification generated from handler annotations via utoipa.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Top-level OpenAPI document for the Calendar Backend API.
///
/// Each handler module contributes its own paths and schemas via per-module
/// `#[derive(OpenApi)]` structs that are merged into this root document.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Calendar Backend API",
        description = "Database backup, verification and restore administration.",
        version = "1.0.0",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Current server"),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "backups", description = "Database backup, verification and restore"),
        (name = "health", description = "Health and readiness checks"),
    ),
    components(schemas(ErrorResponse))
)]
pub struct ApiDoc;

/// Standard error response body returned by all endpoints on failure.
#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g. "NOT_FOUND", "BACKUP_IN_PROGRESS")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Corrective hint for operators, when one is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Adds Bearer JWT security scheme to the OpenAPI spec.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Build the merged OpenAPI document from all handler modules.
pub fn build_openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.merge(super::handlers::health::HealthApiDoc::openapi());
    doc.merge(super::handlers::backups::BackupsApiDoc::openapi());
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use utoipa::openapi::PathItemType;

    #[test]
    fn test_openapi_spec_is_valid() {
        let spec = build_openapi();
        assert_eq!(spec.info.title, "Calendar Backend API");

        let components = spec.components.as_ref().expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
        for schema in ["ErrorResponse", "BackupRecord", "VerifyResult", "RestoreRequest"] {
            assert!(
                components.schemas.contains_key(schema),
                "Missing schema {schema}"
            );
        }
    }

    #[test]
    fn test_all_backup_routes_documented() {
        let spec = build_openapi();
        let paths: Vec<&str> = spec.paths.paths.keys().map(|k| k.as_str()).collect();

        for expected in [
            "/health",
            "/ready",
            "/api/v1/backups/create",
            "/api/v1/backups/list",
            "/api/v1/backups/stats",
            "/api/v1/backups/config",
            "/api/v1/backups/test",
            "/api/v1/backups/cleanup",
            "/api/v1/backups/{id}/verify",
            "/api/v1/backups/{id}/restore",
            "/api/v1/backups/{id}",
        ] {
            assert!(
                paths.contains(&expected),
                "Missing {expected} in OpenAPI spec. Registered paths: {paths:?}"
            );
        }
    }

    #[test]
    fn test_restore_operation_requires_bearer_auth() {
        let spec = build_openapi();
        let item = spec
            .paths
            .paths
            .get("/api/v1/backups/{id}/restore")
            .expect("restore path");
        let operation = item
            .operations
            .get(&PathItemType::Post)
            .expect("restore is POST");
        assert!(operation.security.is_some());
    }
}
