//! 录音列表：解析文件名、按设备与时间窗过滤、按开始时间排序并截断。

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::media::content_type_for;
use crate::naming::RecordingName;
use crate::storage::StoredFile;
use crate::timestamp::RecordingInstant;

pub const DEFAULT_LIST_LIMIT: i64 = 500;

/// 列表过滤条件；时间窗按区间重叠判断，而非完全包含。
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    pub device_id: Option<String>,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}

impl ListFilter {
    pub fn matches(&self, name: &RecordingName) -> bool {
        if let Some(device_id) = self.device_id.as_deref()
            && !name.device_matches(device_id)
        {
            return false;
        }
        if let Some(from) = self.from
            && name.end.naive() < from
        {
            return false;
        }
        if let Some(to) = self.to
            && name.start.naive() > to
        {
            return false;
        }
        true
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingRecord {
    pub id: String,
    pub filename: String,
    #[serde(rename = "mac")]
    pub device_id: String,
    pub start_local: RecordingInstant,
    pub end_local: RecordingInstant,
    pub size: u64,
    pub content_type: &'static str,
    pub url: String,
}

#[derive(Debug)]
pub struct Listing {
    /// 截断前匹配的记录数。
    pub total: usize,
    pub records: Vec<RecordingRecord>,
}

/// 过滤并排序目录快照；无法解析的文件名静默忽略。
///
/// `limit` 小于 1 时按 1 处理。`file_url` 根据文件名生成下载地址。
pub fn list_recordings<F>(
    files: Vec<StoredFile>,
    filter: &ListFilter,
    limit: i64,
    file_url: F,
) -> Listing
where
    F: Fn(&str) -> String,
{
    let mut matched: Vec<(RecordingName, StoredFile)> = files
        .into_iter()
        .filter_map(|file| RecordingName::parse(&file.name).map(|name| (name, file)))
        .filter(|(name, _)| filter.matches(name))
        .collect();
    // 稳定排序，同一开始时间保持枚举顺序
    matched.sort_by_key(|(name, _)| name.start);

    let total = matched.len();
    let cap = usize::try_from(limit.max(1)).unwrap_or(usize::MAX);
    let records = matched
        .into_iter()
        .take(cap)
        .map(|(name, file)| RecordingRecord {
            id: file.name.clone(),
            url: file_url(&file.name),
            content_type: content_type_for(&file.name),
            device_id: name.device_id,
            start_local: name.start,
            end_local: name.end,
            size: file.size,
            filename: file.name,
        })
        .collect();

    Listing { total, records }
}
