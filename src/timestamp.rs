//! 录音时间戳归一化：秒/毫秒自动识别，并转换为服务器本地时间。

use chrono::{
    DateTime, Datelike, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc,
};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use crate::error::RecordingError;

/// 绝对值不小于该阈值的 epoch 值按毫秒解释，否则按秒解释。
pub const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

const QUERY_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// 服务器本地时间下、毫秒精度的录音时间点。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordingInstant(NaiveDateTime);

impl RecordingInstant {
    /// 由本地时间构造，超出毫秒的部分被截断。
    pub fn from_naive(datetime: NaiveDateTime) -> Self {
        let millis = datetime.nanosecond() / 1_000_000;
        Self(
            datetime
                .with_nanosecond(millis * 1_000_000)
                .unwrap_or(datetime),
        )
    }

    /// 按秒/毫秒启发式解释 epoch 值。
    pub fn from_epoch(value: i64) -> Result<Self, RecordingError> {
        let utc = if value.unsigned_abs() >= MILLIS_THRESHOLD.unsigned_abs() {
            DateTime::<Utc>::from_timestamp_millis(value)
        } else {
            DateTime::<Utc>::from_timestamp(value, 0)
        }
        .ok_or(RecordingError::InvalidTimestamp)?;
        let local = utc.with_timezone(&Local).naive_local();
        if !(1..=9999).contains(&local.year()) {
            return Err(RecordingError::InvalidTimestamp);
        }
        Ok(Self::from_naive(local))
    }

    pub fn naive(&self) -> NaiveDateTime {
        self.0
    }

    pub fn millisecond(&self) -> u32 {
        (self.0.nanosecond() / 1_000_000).min(999)
    }
}

impl fmt::Display for RecordingInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:03}",
            self.0.format("%Y-%m-%d %H:%M:%S"),
            self.millisecond()
        )
    }
}

impl Serialize for RecordingInstant {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 将元数据中的 startTime/endTime 归一化为本地时间点。
///
/// 接受 JSON 整数、浮点数（向零截断）以及内容为整数的字符串。
pub fn normalize(value: &Value) -> Result<RecordingInstant, RecordingError> {
    RecordingInstant::from_epoch(coerce_epoch(value)?)
}

fn coerce_epoch(value: &Value) -> Result<i64, RecordingError> {
    match value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Ok(int);
            }
            match number.as_f64() {
                Some(float) if float.is_finite() && float.abs() < i64::MAX as f64 => {
                    Ok(float.trunc() as i64)
                }
                _ => Err(RecordingError::InvalidTimestamp),
            }
        }
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| RecordingError::InvalidTimestamp),
        _ => Err(RecordingError::InvalidTimestamp),
    }
}

/// 解析列表查询中的 ISO 本地时间；带时区偏移的输入会换算到本地时间。
pub fn parse_query_datetime(value: &str) -> Result<NaiveDateTime, RecordingError> {
    let value = value.trim();
    for format in QUERY_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(datetime);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    parse_offset_datetime(value)
        .map(|datetime| datetime.with_timezone(&Local).naive_local())
        .ok_or(RecordingError::InvalidTimeRange)
}

fn parse_offset_datetime(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z"))
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M%:z"))
        .ok()
}
