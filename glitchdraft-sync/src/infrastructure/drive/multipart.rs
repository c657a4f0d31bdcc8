//! multipart/related 请求体组装（元数据 JSON + 文件内容）

use crate::domain::errors::SyncResult;
use crate::domain::model::NewFile;

/// 固定分隔符
pub const BOUNDARY: &str = "boundary";

pub fn content_type() -> String {
    format!("multipart/related; boundary={}", BOUNDARY)
}

/// 组装请求体：
/// `--boundary` 元数据段、`--boundary` 内容段、`--boundary--` 结束
pub fn build_body(metadata: &NewFile, content_mime: &str, content: &[u8]) -> SyncResult<Vec<u8>> {
    let metadata_json = serde_json::to_vec(metadata)?;
    let delimiter = format!("--{}\r\n", BOUNDARY);
    let close_delimiter = format!("\r\n--{}--", BOUNDARY);

    let mut body = Vec::with_capacity(metadata_json.len() + content.len() + 160);
    body.extend_from_slice(delimiter.as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(&metadata_json);
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(delimiter.as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_mime).as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(close_delimiter.as_bytes());
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_layout() {
        let metadata = NewFile::in_folder("messenger_sync.json", "folder-1", "application/json");
        let body = build_body(&metadata, "application/json", br#"{"a":1}"#).unwrap();
        let text = String::from_utf8(body).unwrap();

        let expected = concat!(
            "--boundary\r\n",
            "Content-Type: application/json; charset=UTF-8\r\n\r\n",
            r#"{"name":"messenger_sync.json","mimeType":"application/json","parents":["folder-1"]}"#,
            "\r\n--boundary\r\n",
            "Content-Type: application/json\r\n\r\n",
            r#"{"a":1}"#,
            "\r\n--boundary--"
        );
        assert_eq!(text, expected);
        assert_eq!(content_type(), "multipart/related; boundary=boundary");
    }

    #[test]
    fn test_binary_content_is_kept_verbatim() {
        let metadata = NewFile::in_folder("draft-1-a.png", "f", "image/png");
        let payload = [0u8, 159, 146, 150, 255];
        let body = build_body(&metadata, "image/png", &payload).unwrap();
        assert!(body.windows(payload.len()).any(|w| w == payload));
        assert!(body.ends_with(b"\r\n--boundary--"));
    }
}
