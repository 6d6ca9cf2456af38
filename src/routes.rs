//! API 路由表：所有路由挂载在可配置的前缀下。

use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::storage::Storage;
use crate::{files, http, upload};

/// 构建带共享状态的路由；`max_upload_size` 为 0 时不限制上传大小。
pub fn build_router(
    storage: Arc<Storage>,
    config: Arc<ServiceConfig>,
    max_upload_size: usize,
) -> Router {
    let body_limit = if max_upload_size == 0 {
        DefaultBodyLimit::disable()
    } else {
        DefaultBodyLimit::max(max_upload_size)
    };

    let api = Router::new()
        .route(
            "/file/upload/audio",
            post(upload::upload_audio).layer(body_limit),
        )
        .route("/audio/list", get(files::list_audio))
        .route("/audio/file/{*filename}", get(files::get_audio_file))
        .route("/audio/health", get(files::audio_health));

    let app = if config.api_prefix.is_empty() {
        api
    } else {
        Router::new().nest(&config.api_prefix, api)
    };

    app.layer(middleware::from_fn(http::add_security_headers))
        .layer(Extension(storage))
        .layer(Extension(config))
}
