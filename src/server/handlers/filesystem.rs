// 文件管理 API 处理器
//
// 处理器只负责解析请求，文件操作在阻塞线程池中同步执行

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Multipart, State},
    Json,
};
use tracing::info;

use crate::filesystem::{
    ChildrenData, CompressRequest, CreateRequest, CreatedFileData, ExtractRequest, FileContent,
    ItemsData, OperationResult, PathRequest, RenameRequest, SaveContentRequest, TransferRequest,
    TreeData, TreeRequest,
};
use crate::server::error::{ApiError, ApiResult};
use crate::server::state::AppState;

type Envelope<T> = ApiResult<Json<OperationResult<T>>>;

/// 在阻塞线程池中执行文件操作
async fn run_blocking<T, F>(f: F) -> Envelope<T>
where
    F: FnOnce() -> OperationResult<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f).await?;
    Ok(Json(result))
}

/// 压缩/解压：额外受超时约束
///
/// 超时后阻塞任务仍会在后台跑完，写了一半的压缩包由调用方视为失败
async fn run_archive<T, F>(state: &AppState, f: F) -> Envelope<T>
where
    F: FnOnce() -> OperationResult<T> + Send + 'static,
    T: Send + 'static,
{
    let secs = state.config.archive.timeout_secs;
    match tokio::time::timeout(Duration::from_secs(secs), tokio::task::spawn_blocking(f)).await {
        Ok(joined) => Ok(Json(joined?)),
        Err(_) => {
            tracing::warn!("压缩/解压超时: {} 秒", secs);
            Err(ApiError::Timeout(secs))
        }
    }
}

/// POST /api/v1/fm/tree
/// 根目录树（按 open 展开）
pub async fn get_tree(State(state): State<AppState>, Json(req): Json<TreeRequest>) -> Envelope<TreeData> {
    let fs = state.filesystem.clone();
    run_blocking(move || fs.list_base(&req.open)).await
}

/// POST /api/v1/fm/children
/// 目录的直接子条目
pub async fn get_children(
    State(state): State<AppState>,
    Json(req): Json<PathRequest>,
) -> Envelope<ChildrenData> {
    let fs = state.filesystem.clone();
    run_blocking(move || fs.list_children(&req.path)).await
}

/// POST /api/v1/fm/content
/// 读取文件内容
pub async fn get_content(
    State(state): State<AppState>,
    Json(req): Json<PathRequest>,
) -> Envelope<FileContent> {
    let fs = state.filesystem.clone();
    run_blocking(move || fs.read_file(&req.path)).await
}

/// POST /api/v1/fm/content/save
/// 保存文件内容
pub async fn save_content(
    State(state): State<AppState>,
    Json(req): Json<SaveContentRequest>,
) -> Envelope<()> {
    let fs = state.filesystem.clone();
    run_blocking(move || fs.write_file(&req.path, &req.content)).await
}

/// POST /api/v1/fm/file
pub async fn create_file(
    State(state): State<AppState>,
    Json(req): Json<CreateRequest>,
) -> Envelope<CreatedFileData> {
    info!("API: 新建文件 parent={} name={}", req.parent, req.name);
    let fs = state.filesystem.clone();
    run_blocking(move || fs.create_file(&req.parent, &req.name, &req.open)).await
}

/// POST /api/v1/fm/folder
pub async fn create_folder(
    State(state): State<AppState>,
    Json(req): Json<CreateRequest>,
) -> Envelope<ItemsData> {
    info!("API: 新建文件夹 parent={} name={}", req.parent, req.name);
    let fs = state.filesystem.clone();
    run_blocking(move || fs.create_folder(&req.parent, &req.name, &req.open)).await
}

/// POST /api/v1/fm/copy
pub async fn copy(State(state): State<AppState>, Json(req): Json<TransferRequest>) -> Envelope<ItemsData> {
    info!("API: 复制 {} -> {}", req.from, req.to);
    let fs = state.filesystem.clone();
    run_blocking(move || fs.copy(&req.from, &req.to, &req.name, &req.open)).await
}

/// POST /api/v1/fm/cut
pub async fn cut(State(state): State<AppState>, Json(req): Json<TransferRequest>) -> Envelope<ItemsData> {
    info!("API: 移动 {} -> {}", req.from, req.to);
    let fs = state.filesystem.clone();
    run_blocking(move || fs.move_item(&req.from, &req.to, &req.name, &req.open)).await
}

/// POST /api/v1/fm/rename
pub async fn rename(State(state): State<AppState>, Json(req): Json<RenameRequest>) -> Envelope<ItemsData> {
    info!("API: 重命名 {} -> {}", req.path, req.name);
    let fs = state.filesystem.clone();
    run_blocking(move || fs.rename(&req.path, &req.name, &req.open)).await
}

/// POST /api/v1/fm/delete
pub async fn delete(State(state): State<AppState>, Json(req): Json<PathRequest>) -> Envelope<ItemsData> {
    info!("API: 删除 {}", req.path);
    let fs = state.filesystem.clone();
    run_blocking(move || fs.delete(&req.path, &req.open)).await
}

/// POST /api/v1/fm/compress
pub async fn compress(
    State(state): State<AppState>,
    Json(req): Json<CompressRequest>,
) -> Envelope<ItemsData> {
    info!("API: 压缩 {} -> {}", req.path, req.name);
    let fs = state.filesystem.clone();
    run_archive(&state, move || fs.compress(&req.path, &req.name, &req.open)).await
}

/// POST /api/v1/fm/extract
pub async fn extract(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Envelope<ItemsData> {
    info!("API: 解压 {} -> {}", req.path, req.target);
    let fs = state.filesystem.clone();
    run_archive(&state, move || fs.extract(&req.path, &req.target, &req.open)).await
}

/// POST /api/v1/fm/upload
/// multipart 字段：target、open[]（可重复）、file
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Envelope<ItemsData> {
    let bad_request = |e: axum::extract::multipart::MultipartError| ApiError::BadRequest(e.to_string());

    let mut target = String::new();
    let mut open = Vec::new();
    let mut file: Option<(String, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "target" => target = field.text().await.map_err(bad_request)?,
            "open" | "open[]" => open.push(field.text().await.map_err(bad_request)?),
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(bad_request)?;
                file = Some((file_name, data));
            }
            other => tracing::debug!("忽略未知的上传字段: {}", other),
        }
    }

    let (file_name, data) =
        file.ok_or_else(|| ApiError::BadRequest("缺少 file 字段".to_string()))?;
    info!("API: 上传 {} ({} 字节) -> {}", file_name, data.len(), target);

    let fs = state.filesystem.clone();
    run_blocking(move || fs.upload(&target, &file_name, &data[..], &open)).await
}
