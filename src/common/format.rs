const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// 日志里的可读字节数，1024 进制，B 以上保留两位小数
pub fn format_bytes(bytes: u64) -> String {
    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    match unit {
        0 => format!("{} B", bytes),
        _ => format!("{:.2} {}", value, UNITS[unit]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536 * 1024 * 1024), "1.50 GB");
        assert_eq!(format_bytes(3 * 1024u64.pow(4)), "3.00 TB");
        assert_eq!(format_bytes(2048 * 1024u64.pow(4)), "2048.00 TB");
    }
}
