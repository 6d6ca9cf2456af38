//! 录音列表、文件下载与健康检查处理器。

use axum::body::Body as AxumBody;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use httpdate::{fmt_http_date, parse_http_date};
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::ServiceConfig;
use crate::error::{ApiError, RecordingError};
use crate::http::request_base_url;
use crate::listing::{DEFAULT_LIST_LIMIT, ListFilter, RecordingRecord, list_recordings};
use crate::media::content_type_for;
use crate::naming::{RecordingName, basename};
use crate::storage::Storage;
use crate::timestamp::parse_query_datetime;

#[derive(Deserialize)]
pub(crate) struct ListQuery {
    mac: Option<String>,
    from_time: Option<String>,
    to_time: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_LIST_LIMIT
}

impl ListQuery {
    /// 空字符串视为未提供；时间格式错误时整个请求失败。
    fn filter(&self) -> Result<ListFilter, RecordingError> {
        let parse = |value: &Option<String>| {
            non_empty(value)
                .map(parse_query_datetime)
                .transpose()
        };
        Ok(ListFilter {
            device_id: non_empty(&self.mac).map(str::to_string),
            from: parse(&self.from_time)?,
            to: parse(&self.to_time)?,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

#[derive(Serialize)]
pub(crate) struct ListResponse {
    code: u16,
    count: usize,
    data: Vec<RecordingRecord>,
}

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    code: u16,
    status: &'static str,
    upload_dir: String,
    files: usize,
    public_base_url: Option<String>,
}

/// 列出录音，支持设备、时间窗与数量过滤。
pub async fn list_audio(
    query: Result<Query<ListQuery>, QueryRejection>,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(config): Extension<Arc<ServiceConfig>>,
) -> Result<JsonResponse<ListResponse>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let filter = query.filter()?;
    let base_url = request_base_url(&headers, &config);
    let files = storage.list_files().await?;
    let listing = list_recordings(files, &filter, query.limit, |name| {
        format!("{base_url}{}/audio/file/{name}", config.api_prefix)
    });
    info!(
        mac = filter.device_id.as_deref().unwrap_or(""),
        total = listing.total,
        returned = listing.records.len(),
        "list recordings"
    );
    Ok(JsonResponse(ListResponse {
        code: 200,
        count: listing.total,
        data: listing.records,
    }))
}

/// 按文件名下载录音，只使用路径的 basename，支持单段 Range 请求。
/// 不符合录音命名规则的文件不对外提供。
pub async fn get_audio_file(
    Path(requested): Path<String>,
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let name = basename(&requested);
    if RecordingName::parse(name).is_none() {
        return Err(ApiError::NotFound("File not found".into()));
    }
    let target = storage
        .resolve_file(name)
        .await
        .map_err(ApiError::not_found_from)?;
    let metadata = fs::metadata(&target)
        .await
        .map_err(|err| ApiError::not_found_from(err.into()))?;
    let file_size = metadata.len();
    let modified = metadata.modified().ok();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(name)),
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    insert_header(
        &mut response_headers,
        header::CONTENT_DISPOSITION,
        &content_disposition(name),
    )?;
    insert_header(&mut response_headers, header::ETAG, &weak_etag(&metadata))?;
    if let Some(modified) = modified {
        insert_header(
            &mut response_headers,
            header::LAST_MODIFIED,
            &fmt_http_date(modified),
        )?;
    }

    let if_range_matches = match request_headers
        .get(header::IF_RANGE)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => match parse_http_date(value) {
            Ok(date) => modified.is_some_and(|ts| ts <= date),
            Err(_) => false,
        },
        None => true,
    };
    let range = match request_headers.get(header::RANGE) {
        Some(value) if if_range_matches => parse_range(value, file_size)?,
        _ => None,
    };

    let mut file = File::open(&target)
        .await
        .map_err(|err| ApiError::not_found_from(err.into()))?;

    let Some(ByteRange { start, end }) = range else {
        insert_header(
            &mut response_headers,
            header::CONTENT_LENGTH,
            &file_size.to_string(),
        )?;
        info!(name, size = file_size, "serve recording");
        return Ok((
            StatusCode::OK,
            response_headers,
            AxumBody::from_stream(ReaderStream::new(file)),
        )
            .into_response());
    };

    let length = end - start + 1;
    debug!(name, start, end, length, "serve recording range");
    file.seek(SeekFrom::Start(start))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    insert_header(
        &mut response_headers,
        header::CONTENT_RANGE,
        &format!("bytes {start}-{end}/{file_size}"),
    )?;
    insert_header(
        &mut response_headers,
        header::CONTENT_LENGTH,
        &length.to_string(),
    )?;
    Ok((
        StatusCode::PARTIAL_CONTENT,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file.take(length))),
    )
        .into_response())
}

/// 健康检查：返回目录中普通文件的数量。
pub async fn audio_health(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(config): Extension<Arc<ServiceConfig>>,
) -> Result<JsonResponse<HealthResponse>, ApiError> {
    let files = storage.count_files().await?;
    Ok(JsonResponse(HealthResponse {
        code: 200,
        status: "ok",
        upload_dir: config.upload_dir.display().to_string(),
        files,
        public_base_url: config.public_base_url.clone(),
    }))
}

fn insert_header(
    headers: &mut HeaderMap,
    name: header::HeaderName,
    value: &str,
) -> Result<(), ApiError> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| ApiError::Internal(format!("invalid {name} header value")))?;
    headers.insert(name, value);
    Ok(())
}

/// 以附件形式下载；非 ASCII 或引号字符替换为 `_`。
fn content_disposition(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|ch| {
            if (ch.is_ascii_graphic() && ch != '"' && ch != '\\') || ch == ' ' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

/// 由大小与修改时间生成弱 ETag。
fn weak_etag(metadata: &Metadata) -> String {
    match metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
    {
        Some(duration) => format!(
            "W/\"{}-{}-{}\"",
            metadata.len(),
            duration.as_secs(),
            duration.subsec_nanos()
        ),
        None => format!("W/\"{}\"", metadata.len()),
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ByteRange {
    start: u64,
    end: u64,
}

/// 解析单段 `Range: bytes=` 请求头；后缀长度为 0 或末位置小于起始位置时忽略，返回完整文件。
fn parse_range(value: &HeaderValue, file_size: u64) -> Result<Option<ByteRange>, ApiError> {
    let invalid = || ApiError::BadRequest("invalid Range header".into());
    let bounds = value
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("bytes="))
        .ok_or_else(invalid)?;
    if bounds.contains(',') {
        return Err(ApiError::BadRequest("multiple ranges not supported".into()));
    }
    let (first, last) = bounds.split_once('-').ok_or_else(invalid)?;
    let parse = |text: &str| text.trim().parse::<u64>().map_err(|_| invalid());

    let (start, end) = match (first.trim().is_empty(), last.trim().is_empty()) {
        (true, true) => return Err(invalid()),
        (true, false) => {
            let suffix = parse(last)?;
            if suffix == 0 {
                return Ok(None);
            }
            (file_size.saturating_sub(suffix), file_size.saturating_sub(1))
        }
        (false, true) => (parse(first)?, file_size.saturating_sub(1)),
        (false, false) => {
            let (start, last) = (parse(first)?, parse(last)?);
            if last < start {
                return Ok(None);
            }
            (start, last.min(file_size.saturating_sub(1)))
        }
    };

    if file_size == 0 || start > end || start >= file_size {
        return Err(ApiError::RangeNotSatisfiable(file_size));
    }
    Ok(Some(ByteRange { start, end }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::path::PathBuf;
    use tempfile::tempdir;

    const MANAGED: &str = "20260204_100000_000_20260204_103000_000_4CFF01A007C2_clip.wav";

    fn make_storage() -> (tempfile::TempDir, Arc<Storage>, Arc<ServiceConfig>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("uploads");
        std::fs::create_dir_all(&root).expect("create storage root");
        let config = Arc::new(ServiceConfig {
            upload_dir: root.clone(),
            public_base_url: Some("https://api.example.com".into()),
            api_prefix: "/thingx/api".into(),
        });
        (temp, Arc::new(Storage::new(root)), config)
    }

    fn list_query(mac: Option<&str>, from_time: Option<&str>, limit: i64) -> ListQuery {
        ListQuery {
            mac: mac.map(str::to_string),
            from_time: from_time.map(str::to_string),
            to_time: None,
            limit,
        }
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn list_audio_builds_links_and_counts_matches() {
        let (_temp, storage, config) = make_storage();
        let root = storage.root_path();
        std::fs::write(root.join(MANAGED), b"abcd").expect("write managed");
        std::fs::write(root.join("readme.txt"), b"x").expect("write foreign");

        let JsonResponse(response) = list_audio(
            Ok(Query(list_query(Some("4cff01a007c2"), Some(""), 500))),
            HeaderMap::new(),
            Extension(storage),
            Extension(config),
        )
        .await
        .unwrap_or_else(|_| panic!("list failed"));

        assert_eq!(response.count, 1);
        let record = &response.data[0];
        assert_eq!(record.filename, MANAGED);
        assert_eq!(record.size, 4);
        assert_eq!(
            record.url,
            format!("https://api.example.com/thingx/api/audio/file/{MANAGED}")
        );
    }

    #[tokio::test]
    async fn list_audio_rejects_malformed_time() {
        let (_temp, storage, config) = make_storage();
        let result = list_audio(
            Ok(Query(list_query(None, Some("not-a-date"), 500))),
            HeaderMap::new(),
            Extension(storage),
            Extension(config),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn get_audio_file_uses_basename_only() {
        let (temp, storage, _config) = make_storage();
        std::fs::write(temp.path().join("passwd"), b"outside").expect("write outside");

        let result = get_audio_file(
            Path("../passwd".to_string()),
            HeaderMap::new(),
            Extension(storage.clone()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));

        std::fs::write(storage.root_path().join("passwd"), b"inside").expect("write inside");
        let result = get_audio_file(
            Path("../../etc/passwd".to_string()),
            HeaderMap::new(),
            Extension(storage.clone()),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));

        std::fs::write(storage.root_path().join(MANAGED), b"inside").expect("write managed");
        let response = get_audio_file(
            Path(format!("../../etc/{MANAGED}")),
            HeaderMap::new(),
            Extension(storage),
        )
        .await
        .unwrap_or_else(|_| panic!("download failed"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"inside");
    }

    #[tokio::test]
    async fn get_audio_file_rejects_empty_and_directory_names() {
        let (_temp, storage, _config) = make_storage();
        std::fs::create_dir(storage.root_path().join("nested")).expect("create dir");
        for requested in ["nested", "dir/", "..", "."] {
            let result = get_audio_file(
                Path(requested.to_string()),
                HeaderMap::new(),
                Extension(storage.clone()),
            )
            .await;
            assert!(
                matches!(result, Err(ApiError::NotFound(_))),
                "{requested:?}"
            );
        }
    }

    #[tokio::test]
    async fn get_audio_file_sets_media_headers() {
        let (_temp, storage, _config) = make_storage();
        std::fs::write(storage.root_path().join(MANAGED), b"RIFFdata").expect("write file");

        let response = get_audio_file(
            Path(MANAGED.to_string()),
            HeaderMap::new(),
            Extension(storage),
        )
        .await
        .unwrap_or_else(|_| panic!("download failed"));
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "audio/wav");
        assert_eq!(headers[header::CONTENT_LENGTH], "8");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            format!("attachment; filename=\"{MANAGED}\"").as_str()
        );
        assert!(headers.contains_key(header::ETAG));
    }

    #[tokio::test]
    async fn get_audio_file_serves_ranges() {
        let (_temp, storage, _config) = make_storage();
        std::fs::write(storage.root_path().join(MANAGED), b"0123456789").expect("write file");

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=2-5"));
        let response = get_audio_file(
            Path(MANAGED.to_string()),
            headers,
            Extension(storage.clone()),
        )
        .await
        .unwrap_or_else(|_| panic!("range failed"));
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
        assert_eq!(body_bytes(response).await, b"2345");

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=20-"));
        let result = get_audio_file(Path(MANAGED.to_string()), headers, Extension(storage)).await;
        assert!(matches!(result, Err(ApiError::RangeNotSatisfiable(10))));
    }

    #[test]
    fn parse_range_variants() {
        let range = |value: &'static str, size| {
            parse_range(&HeaderValue::from_static(value), size)
                .unwrap_or_else(|_| panic!("range {value} rejected"))
        };
        assert_eq!(range("bytes=0-", 10), Some(ByteRange { start: 0, end: 9 }));
        assert_eq!(range("bytes=-3", 10), Some(ByteRange { start: 7, end: 9 }));
        assert_eq!(range("bytes=4-100", 10), Some(ByteRange { start: 4, end: 9 }));
        assert_eq!(range("bytes=-0", 10), None);
        assert_eq!(range("bytes=5-3", 10), None);
        assert!(matches!(
            parse_range(&HeaderValue::from_static("bytes=0-1,3-4"), 10),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            parse_range(&HeaderValue::from_static("items=0-1"), 10),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn health_counts_every_regular_file() {
        let (_temp, storage, config) = make_storage();
        std::fs::write(storage.root_path().join(MANAGED), b"a").expect("write managed");
        std::fs::write(storage.root_path().join("other.bin"), b"b").expect("write other");

        let JsonResponse(health) = audio_health(Extension(storage), Extension(config.clone()))
            .await
            .unwrap_or_else(|_| panic!("health failed"));
        assert_eq!(health.files, 2);
        assert_eq!(health.status, "ok");
        assert_eq!(
            PathBuf::from(&health.upload_dir),
            config.upload_dir,
            "health should report the configured directory"
        );
    }
}
