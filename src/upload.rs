//! 录音上传处理器：multipart 中的 `file` 与 `metadata` 两部分。

use axum::body::Bytes;
use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{Extension, Multipart};
use axum::response::Json as JsonResponse;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::atomic::AtomicFile;
use crate::error::{ApiError, RecordingError, StorageError};
use crate::naming::RecordingName;
use crate::storage::Storage;
use crate::timestamp::{RecordingInstant, normalize};

/// 元数据中必须出现的字段；`userId` 与 `size` 只检查存在性。
const REQUIRED_FIELDS: [&str; 6] = ["userId", "name", "startTime", "endTime", "mac", "size"];

#[derive(Serialize)]
pub(crate) struct UploadResponse {
    code: u16,
    message: &'static str,
    data: UploadData,
}

#[derive(Serialize)]
pub(crate) struct UploadData {
    filename: String,
    size: u64,
    recording_local: RecordingWindow,
}

#[derive(Serialize)]
pub(crate) struct RecordingWindow {
    start: RecordingInstant,
    end: RecordingInstant,
}

/// 已解析的上传元数据。
#[derive(Debug, PartialEq)]
pub(crate) struct UploadMetadata {
    pub(crate) name: RecordingName,
    pub(crate) raw_mac: String,
}

#[derive(Default)]
struct UploadParts {
    file: Option<AtomicFile>,
    metadata: Option<Bytes>,
}

impl UploadParts {
    async fn discard(self) {
        if let Some(file) = self.file {
            file.cleanup().await;
        }
    }
}

/// 接收录音文件，按录音时间与设备号生成文件名后落盘。
pub async fn upload_audio(
    Extension(storage): Extension<Arc<Storage>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let multipart =
        multipart.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let parts = receive_parts(&storage, multipart).await?;
    let UploadParts { file, metadata } = parts;
    let Some(file) = file else {
        return Err(RecordingError::InvalidMetadata("Missing part: file".into()).into());
    };
    let parsed = match metadata
        .ok_or_else(|| RecordingError::InvalidMetadata("Missing part: metadata".into()))
        .and_then(|bytes| parse_metadata(&bytes))
    {
        Ok(parsed) => parsed,
        Err(err) => {
            file.cleanup().await;
            return Err(err.into());
        }
    };

    let filename = parsed.name.to_string();
    let received = file.written();
    debug!(filename, bytes = received, "received recording");
    debug!(
        start = %parsed.name.start,
        end = %parsed.name.end,
        "recording time (local)"
    );

    let size = storage
        .commit_upload(file, &filename)
        .await
        .map_err(|err| match err {
            StorageError::InvalidPath => {
                ApiError::BadRequest("name/mac produce an invalid filename".into())
            }
            other => other.into(),
        })?;
    info!(filename, mac = parsed.raw_mac, size, "saved recording");

    Ok(JsonResponse(UploadResponse {
        code: 200,
        message: "success",
        data: UploadData {
            filename,
            size,
            recording_local: RecordingWindow {
                start: parsed.name.start,
                end: parsed.name.end,
            },
        },
    }))
}

/// 读取 multipart 各部分；`file` 直接流式写入暂存文件，出错时清理。
async fn receive_parts(
    storage: &Storage,
    mut multipart: Multipart,
) -> Result<UploadParts, ApiError> {
    let mut parts = UploadParts::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(parts),
            Err(err) => {
                parts.discard().await;
                return Err(ApiError::BadRequest(format!("invalid multipart body: {err}")));
            }
        };
        let name = field.name().map(str::to_owned);
        let result = match name.as_deref() {
            Some("file") => stage_file(storage, field)
                .await
                .map(|file| parts.file.replace(file)),
            Some("metadata") => field
                .bytes()
                .await
                .map(|bytes| {
                    parts.metadata = Some(bytes);
                    None
                })
                .map_err(|err| ApiError::BadRequest(format!("invalid multipart body: {err}"))),
            _ => Ok(None),
        };
        match result {
            Ok(Some(previous)) => previous.cleanup().await,
            Ok(None) => {}
            Err(err) => {
                parts.discard().await;
                return Err(err);
            }
        }
    }
}

async fn stage_file(storage: &Storage, mut field: Field<'_>) -> Result<AtomicFile, ApiError> {
    let mut staged = storage.stage_upload().await?;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return Ok(staged),
            Err(err) => {
                staged.cleanup().await;
                return Err(ApiError::BadRequest(format!("invalid multipart body: {err}")));
            }
        };
        if let Err(err) = staged.write_chunk(&chunk).await {
            staged.cleanup().await;
            return Err(err.into());
        }
    }
}

/// 校验元数据文本并生成目标文件名。
pub(crate) fn parse_metadata(bytes: &[u8]) -> Result<UploadMetadata, RecordingError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| RecordingError::InvalidMetadata("Metadata is not valid UTF-8 text".into()))?;
    debug!(metadata = text, "raw metadata");
    let value: Value = serde_json::from_str(text)
        .map_err(|_| RecordingError::InvalidMetadata("Metadata is not valid JSON".into()))?;
    let Value::Object(meta) = value else {
        return Err(RecordingError::InvalidMetadata(
            "Metadata must be a JSON object".into(),
        ));
    };
    for field in REQUIRED_FIELDS {
        if !meta.contains_key(field) {
            return Err(RecordingError::InvalidMetadata(format!(
                "Missing field: {field}"
            )));
        }
    }

    let start = normalize(&meta["startTime"])?;
    let end = normalize(&meta["endTime"])?;
    let raw_mac = text_field(&meta, "mac");
    let name = RecordingName::new(start, end, &raw_mac, &text_field(&meta, "name"));
    if name.original_name.is_empty() {
        return Err(RecordingError::InvalidMetadata(
            "name must contain a file name".into(),
        ));
    }
    Ok(UploadMetadata { name, raw_mac })
}

fn text_field(meta: &Map<String, Value>, key: &str) -> String {
    match &meta[key] {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
