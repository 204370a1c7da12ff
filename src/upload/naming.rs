use crate::tree::RelativePath;

/// 无法推导时的文件夹显示名
pub const FALLBACK_UPLOAD_NAME: &str = "Upload";

/// 文件夹上传的显示名：所有输入共同的第一段路径
///
/// 单个文件（没有目录段）或首段不一致时退回 `Upload`
pub fn directory_display_name<'a>(paths: impl IntoIterator<Item = &'a RelativePath>) -> String {
    let mut common: Option<&str> = None;
    let mut any = false;
    for path in paths {
        any = true;
        if path.depth() < 2 {
            return FALLBACK_UPLOAD_NAME.to_string();
        }
        let first = path.segments()[0].as_str();
        match common {
            None => common = Some(first),
            Some(existing) if existing == first => {}
            Some(_) => return FALLBACK_UPLOAD_NAME.to_string(),
        }
    }
    match common {
        Some(name) if any => name.to_string(),
        _ => FALLBACK_UPLOAD_NAME.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(raw: &[&str]) -> Vec<RelativePath> {
        raw.iter().map(|p| RelativePath::parse(p).unwrap()).collect()
    }

    #[test]
    fn test_common_first_segment() {
        let p = paths(&["/photos/a.jpg", "/photos/2024/b.jpg"]);
        assert_eq!(directory_display_name(&p), "photos");
    }

    #[test]
    fn test_fallbacks() {
        assert_eq!(directory_display_name(&paths(&[])), FALLBACK_UPLOAD_NAME);
        assert_eq!(directory_display_name(&paths(&["/a.txt"])), FALLBACK_UPLOAD_NAME);
        assert_eq!(
            directory_display_name(&paths(&["/x/a.txt", "/y/b.txt"])),
            FALLBACK_UPLOAD_NAME
        );
    }
}
