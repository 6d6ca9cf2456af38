//! 按扩展名推断音频文件的 Content-Type。

const AUDIO_TYPES: [(&str, &str); 4] = [
    (".wav", "audio/wav"),
    (".mp3", "audio/mpeg"),
    (".m4a", "audio/mp4"),
    (".aac", "audio/aac"),
];

pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// 扩展名匹配不区分大小写，未知扩展名返回 `application/octet-stream`。
pub fn content_type_for(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    AUDIO_TYPES
        .iter()
        .find(|(suffix, _)| lower.ends_with(*suffix))
        .map(|(_, content_type)| *content_type)
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}
