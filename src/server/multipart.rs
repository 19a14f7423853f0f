//! `multipart/form-data` uploads: the first part that carries a file name.

use multer::{Field, Multipart};
use percent_encoding::percent_decode_str;
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Boundary of a `multipart/form-data` content type; `None` for anything else.
pub fn boundary(content_type: &str) -> Option<String> {
    multer::parse_boundary(content_type).ok()
}

/// First part with a `filename` (or RFC 5987 `filename*`) in its
/// `Content-Disposition`. `Ok(None)` when the body has no file part.
pub async fn first_file_part(body: Vec<u8>, boundary: &str) -> Result<Option<FilePart>, multer::Error> {
    let mut multipart = Multipart::with_reader(Cursor::new(body), boundary);

    while let Some(field) = multipart.next_field().await? {
        let file_name = match field.file_name() {
            Some(name) => Some(name.to_string()),
            None => extended_file_name(&field),
        };
        if let Some(file_name) = file_name {
            let data = field.bytes().await?.to_vec();
            return Ok(Some(FilePart { file_name, data }));
        }
    }
    Ok(None)
}

/// `filename*=UTF-8''Q1%20final.xlsx`
fn extended_file_name(field: &Field<'_>) -> Option<String> {
    let disposition = field.headers().get("content-disposition")?.to_str().ok()?;
    let (_, rest) = disposition.split_once("filename*=")?;
    let value = rest.split(';').next()?.trim().trim_matches('"');
    let encoded = value.splitn(3, '\'').nth(2)?;
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|name| name.into_owned())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary() {
        assert_eq!(
            boundary("multipart/form-data; boundary=----abc123").as_deref(),
            Some("----abc123")
        );
        assert_eq!(
            boundary("multipart/form-data; charset=utf-8; boundary=\"xyz\"").as_deref(),
            Some("xyz")
        );
        assert_eq!(boundary("application/zip"), None);
    }

    #[tokio::test]
    async fn test_first_file_part_skips_plain_fields() {
        let body = b"--XX\r\n\
Content-Disposition: form-data; name=\"note\"\r\n\r\n\
hello\r\n--XX\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"data.zip\"\r\n\
Content-Type: application/zip\r\n\r\n\
PK\x03\x04\r\nbinary\r\n--XX--\r\n";
        let part = first_file_part(body.to_vec(), "XX").await.unwrap().unwrap();
        assert_eq!(part.file_name, "data.zip");
        assert_eq!(part.data, b"PK\x03\x04\r\nbinary");
    }

    #[tokio::test]
    async fn test_quoted_file_name_keeps_semicolons() {
        let body = b"--XX\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"Q1; final.xlsx\"\r\n\r\n\
PK\r\n--XX--\r\n";
        let part = first_file_part(body.to_vec(), "XX").await.unwrap().unwrap();
        assert_eq!(part.file_name, "Q1; final.xlsx");
        assert_eq!(part.data, b"PK");
    }

    #[tokio::test]
    async fn test_extended_file_name() {
        let body = b"--XX\r\n\
Content-Disposition: form-data; name=\"file\"; filename*=UTF-8''Q1%20r%C3%A9sum%C3%A9.xlsx\r\n\r\n\
PK\r\n--XX--\r\n";
        let part = first_file_part(body.to_vec(), "XX").await.unwrap().unwrap();
        assert_eq!(part.file_name, "Q1 r\u{e9}sum\u{e9}.xlsx");
    }

    #[tokio::test]
    async fn test_no_file_part() {
        let body = b"--XX\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--XX--\r\n";
        assert!(first_file_part(body.to_vec(), "XX").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unterminated_body_is_an_error() {
        let body = b"--XX\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.zip\"\r\n\r\nPK";
        assert!(first_file_part(body.to_vec(), "XX").await.is_err());
    }
}
