//! 录音文件名编码与解析。
//!
//! 存储目录中的文件名即唯一索引，格式为：
//! `{YYYYMMDD_HHMMSS_mmm}_{YYYYMMDD_HHMMSS_mmm}_{deviceId}_{originalName}`，
//! 例如 `20260204_133555_069_20260204_133655_619_4CFF01A007C2_foo.wav`。
//! 原始文件名中的下划线不做转义。

use chrono::NaiveDate;
use regex::{Captures, Regex};
use std::fmt;
use std::sync::LazyLock;

use crate::timestamp::RecordingInstant;

static RECORDING_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<start>[0-9]{8}_[0-9]{6}_[0-9]{3})_(?P<end>[0-9]{8}_[0-9]{6}_[0-9]{3})_(?P<device>[A-Fa-f0-9]+)_(?P<rest>.+)$",
    )
    .expect("recording name pattern")
});

/// 由文件名唯一确定的录音身份。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingName {
    pub start: RecordingInstant,
    pub end: RecordingInstant,
    pub device_id: String,
    pub original_name: String,
}

impl RecordingName {
    /// 构造待编码的文件名：设备号去掉 `:`/`-`，原始名只保留 basename。
    pub fn new(
        start: RecordingInstant,
        end: RecordingInstant,
        device_id: &str,
        original_name: &str,
    ) -> Self {
        Self {
            start,
            end,
            device_id: normalize_device_id(device_id),
            original_name: basename(original_name).to_string(),
        }
    }

    /// 解析文件名；不符合格式的返回 `None`，调用方应将其视为非托管文件。
    pub fn parse(filename: &str) -> Option<Self> {
        let captures = RECORDING_NAME_RE.captures(filename)?;
        Some(Self {
            start: parse_instant(&captures, "start")?,
            end: parse_instant(&captures, "end")?,
            device_id: captures.name("device")?.as_str().to_string(),
            original_name: captures.name("rest")?.as_str().to_string(),
        })
    }

    /// 设备号比较不区分大小写。
    pub fn device_matches(&self, device_id: &str) -> bool {
        self.device_id.eq_ignore_ascii_case(device_id)
    }
}

impl fmt::Display for RecordingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            format_instant(&self.start),
            format_instant(&self.end),
            self.device_id,
            self.original_name
        )
    }
}

/// 去掉 MAC 地址风格的分隔符，其余内容与大小写保持不变。
pub fn normalize_device_id(raw: &str) -> String {
    raw.replace([':', '-'], "")
}

/// 取路径的最后一段，防止路径穿越。
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn format_instant(instant: &RecordingInstant) -> String {
    format!(
        "{}_{:03}",
        instant.naive().format("%Y%m%d_%H%M%S"),
        instant.millisecond()
    )
}

fn parse_instant(captures: &Captures<'_>, group: &str) -> Option<RecordingInstant> {
    let text = captures.name(group)?.as_str();
    let number = |range: std::ops::Range<usize>| text.get(range)?.parse::<u32>().ok();
    let year = i32::try_from(number(0..4)?).ok()?;
    let datetime = NaiveDate::from_ymd_opt(year, number(4..6)?, number(6..8)?)?
        .and_hms_milli_opt(
            number(9..11)?,
            number(11..13)?,
            number(13..15)?,
            number(16..19)?,
        )?;
    Some(RecordingInstant::from_naive(datetime))
}
