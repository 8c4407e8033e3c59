//! GET /health

use std::sync::Arc;

use axum::extract::State;
use serde::Serialize;

use crate::app::AppState;
use crate::http::{ok, ApiResult};

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub tenant_id: String,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> ApiResult<Health> {
    ok(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tenant_id: state.config.tenant.tenant_id.clone(),
    })
}
