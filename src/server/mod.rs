// Web服务器模块

pub mod error;
pub mod handlers;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub use error::{ApiError, ApiResult};
pub use state::AppState;

/// 健康检查响应结构
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "file-manager-rust".to_string(),
    })
}

/// 根据配置构建 CORS 层，`*` 表示允许任意来源
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("忽略无效的 CORS 源: {}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

/// 构建完整路由
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    // 文件管理 API
    let fm_routes = Router::new()
        .route("/tree", post(handlers::get_tree))
        .route("/children", post(handlers::get_children))
        .route("/content", post(handlers::get_content))
        .route("/content/save", post(handlers::save_content))
        .route("/file", post(handlers::create_file))
        .route("/folder", post(handlers::create_folder))
        .route("/copy", post(handlers::copy))
        .route("/cut", post(handlers::cut))
        .route("/rename", post(handlers::rename))
        .route("/delete", post(handlers::delete))
        .route("/compress", post(handlers::compress))
        .route("/extract", post(handlers::extract))
        .route(
            "/upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(config.server.max_upload_bytes)),
        )
        .with_state(state);

    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http()) // HTTP 请求日志
        .layer(cors_layer(&config.server.cors_origins));

    let app = Router::new()
        .nest("/api/v1/fm", fm_routes)
        .route("/health", get(health_check));

    // 可选的前端静态资源
    let app = match &config.server.static_dir {
        Some(dir) if dir.is_dir() => {
            tracing::info!("✓ 前端资源目录: {:?}", dir);
            app.fallback_service(ServeDir::new(dir))
        }
        Some(dir) => {
            tracing::warn!("前端资源目录不存在，跳过静态文件服务: {:?}", dir);
            app
        }
        None => app,
    };

    app.layer(middleware)
}
