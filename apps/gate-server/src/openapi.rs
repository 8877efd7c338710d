use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Gate Verification API",
        description = "Internal authentication gateway: credential verification plus companion supervision."
    ),
    paths(
        crate::api::meta::index,
        crate::api::meta::health,
        crate::api::meta::state_companion,
        crate::api::auth::search_user,
        crate::api::auth::login,
        crate::api::auth::user_info,
        crate::api::auth::create_account,
    ),
    components(schemas(
        crate::api::auth::VerifyRequest,
        crate::api::auth::VerifyResponse,
        crate::api::auth::AccountProfile,
        crate::api::auth::CreateAccountRequest,
    )),
    tags(
        (name = "Meta", description = "Service metadata and probes"),
        (name = "Auth", description = "Credential verification"),
        (name = "Admin", description = "Administrative surface"),
    )
)]
pub(crate) struct ApiDoc;

/// Write the generated spec to `OPENAPI_OUT` when requested; returns the
/// path so the caller can exit without serving.
pub(crate) fn ensure_openapi_export() -> Result<Option<String>, std::io::Error> {
    if let Ok(path) = std::env::var("OPENAPI_OUT") {
        if let Some(parent) = std::path::Path::new(&path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = ApiDoc::openapi()
            .to_yaml()
            .unwrap_or_else(|_| "openapi: 3.0.3".into());
        std::fs::write(&path, yaml)?;
        return Ok(Some(path));
    }
    Ok(None)
}
