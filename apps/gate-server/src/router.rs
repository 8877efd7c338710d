use axum::{
    routing::{get, post},
    Router,
};

use crate::{api, AppState};

pub(crate) mod paths {
    pub const INDEX: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const SEARCH_USER: &str = "/search_user";
    pub const VERIFY: &str = "/verify";
    pub const LOGIN: &str = "/login";
    pub const USER_INFO: &str = "/user/info";
    pub const ADMIN_ACCOUNTS: &str = "/admin/accounts";
    pub const STATE_COMPANION: &str = "/state/companion";
}

pub(crate) fn build_router() -> Router<AppState> {
    Router::new()
        .route(paths::INDEX, get(api::meta::index))
        .route(paths::HEALTH, get(api::meta::health))
        .route(paths::SEARCH_USER, post(api::auth::search_user))
        .route(paths::VERIFY, post(api::auth::search_user))
        .route(paths::LOGIN, post(api::auth::login))
        .route(paths::USER_INFO, post(api::auth::user_info))
        .route(paths::ADMIN_ACCOUNTS, post(api::auth::create_account))
        .route(paths::STATE_COMPANION, get(api::meta::state_companion))
}
