//! 工具函数模块
//!
//! 提供毫秒时间戳相关的通用工具函数

use chrono::{DateTime, TimeZone, Utc};

/// 获取当前时间戳（毫秒）
pub fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 毫秒数转换为 DateTime
pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// 格式化毫秒时间戳，用于日志输出
pub fn format_millis(ms: i64) -> String {
    millis_to_datetime(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

/// 单调不减的时间戳：取当前时间与已知时间戳中的较大值
pub fn monotonic_millis(floor: Option<i64>) -> i64 {
    let now = current_millis();
    match floor {
        Some(prev) if prev > now => prev,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_millis_never_goes_backwards() {
        let future = current_millis() + 60_000;
        assert_eq!(monotonic_millis(Some(future)), future);
        assert!(monotonic_millis(Some(0)) > 0);
        assert!(monotonic_millis(None) > 0);
    }

    #[test]
    fn test_format_millis_roundtrips_epoch() {
        assert_eq!(format_millis(0), "1970-01-01T00:00:00+00:00");
    }
}
