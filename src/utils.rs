use indicatif::ProgressStyle;

use crate::error::{Error, Result};

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// 根据文件头猜测图片的 MIME 类型，无法识别时当作 JPEG
pub fn guess_mime(data: &[u8]) -> &'static str {
    match data {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/jpeg",
    }
}

/// MIME 类型对应的文件后缀
pub fn mime_extension(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

/// 按字符截断字符串，超出部分用 `...` 表示
pub fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}...", &s[..i]),
        None => s.to_owned(),
    }
}

/// 集合名会被用作目录名，只允许字母、数字、`_`、`-`、`.`，且不能以 `.` 开头
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("无效的集合名: {name:?}")))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(b"\xFF\xD8\xFF\xE0", "image/jpeg")]
    #[case(b"\x89PNG\r\n\x1a\n", "image/png")]
    #[case(b"GIF89a", "image/gif")]
    #[case(b"RIFF\0\0\0\0WEBPVP8 ", "image/webp")]
    #[case(b"??", "image/jpeg")]
    fn test_guess_mime(#[case] data: &[u8], #[case] mime: &str) {
        assert_eq!(guess_mime(data), mime);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 5), "hello");
        assert_eq!(truncate("hello", 2), "he...");
        assert_eq!(truncate("你好世界", 2), "你好...");
    }

    #[rstest]
    #[case("photos", true)]
    #[case("my-gallery_2.v1", true)]
    #[case("", false)]
    #[case(".hidden", false)]
    #[case("a/b", false)]
    #[case("..", false)]
    #[case("中文", false)]
    fn test_validate_collection_name(#[case] name: &str, #[case] ok: bool) {
        assert_eq!(validate_collection_name(name).is_ok(), ok);
    }
}
