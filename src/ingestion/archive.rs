//! Archive unpacking for uploads
//!
//! Lists the spreadsheet members of an uploaded ZIP under entry and size
//! limits, and recognises an upload that is itself an OOXML workbook.

use crate::error::{Result, SheetError};
use crate::ingestion::xlsx_reader::is_workbook_package;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::result::ZipError;
use zip::ZipArchive;

const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";
const OLE2_SIGNATURE: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    pub max_entries: usize,
    pub max_member_bytes: u64,
    pub max_total_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_member_bytes: 256 * 1024 * 1024,
            max_total_bytes: 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberFormat {
    Workbook,
    Csv,
    Tsv,
}

impl MemberFormat {
    /// Format implied by the file extension alone.
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" | "xlsm" => Some(MemberFormat::Workbook),
            "csv" => Some(MemberFormat::Csv),
            "tsv" => Some(MemberFormat::Tsv),
            _ => None,
        }
    }

    /// Check the member's leading bytes against its claimed format.
    pub fn check_signature(self, bytes: &[u8]) -> std::result::Result<(), String> {
        match self {
            MemberFormat::Workbook if !bytes.starts_with(ZIP_SIGNATURE) => {
                Err("workbook does not start with a ZIP signature".to_string())
            }
            MemberFormat::Csv | MemberFormat::Tsv if bytes.starts_with(ZIP_SIGNATURE) => {
                Err("delimited text carries a ZIP signature".to_string())
            }
            MemberFormat::Csv | MemberFormat::Tsv if bytes.starts_with(OLE2_SIGNATURE) => {
                Err("delimited text carries a legacy Office (OLE2) signature".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// One candidate member, in archive listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    pub name: String,
    index: Option<usize>,
}

impl ArchiveMember {
    /// File name without directories or extension.
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Bytes of one member, or why it was passed over.
#[derive(Debug)]
pub enum MemberBytes {
    Read(Vec<u8>),
    Skipped(String),
}

enum Upload {
    Bundle(ZipArchive<Cursor<Vec<u8>>>),
    Workbook { name: String, bytes: Option<Vec<u8>> },
}

pub struct ArchiveReader {
    upload: Upload,
    limits: ArchiveLimits,
    total_read: u64,
}

impl ArchiveReader {
    /// Open an upload. `file_name` names the member when the upload is a
    /// bare workbook.
    pub fn open(file_name: &str, bytes: Vec<u8>, limits: ArchiveLimits) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|err| match err {
            ZipError::InvalidArchive(_) | ZipError::UnsupportedArchive(_) => {
                SheetError::InvalidArchive("upload is not a valid ZIP archive".to_string())
            }
            other => SheetError::InvalidArchive(other.to_string()),
        })?;

        if archive.len() > limits.max_entries {
            return Err(SheetError::InvalidArchive(format!(
                "archive has too many entries: {} (limit: {})",
                archive.len(),
                limits.max_entries
            )));
        }

        let upload = if is_workbook_package(&mut archive) {
            let bytes = archive.into_inner().into_inner();
            if bytes.len() as u64 > limits.max_total_bytes {
                return Err(SheetError::InvalidArchive(format!(
                    "workbook exceeds {} bytes",
                    limits.max_total_bytes
                )));
            }
            Upload::Workbook {
                name: workbook_member_name(file_name),
                bytes: Some(bytes),
            }
        } else {
            Upload::Bundle(archive)
        };

        Ok(Self {
            upload,
            limits,
            total_read: 0,
        })
    }

    pub fn is_bare_workbook(&self) -> bool {
        matches!(self.upload, Upload::Workbook { .. })
    }

    /// Members worth looking at. Directories, `__MACOSX/` metadata and
    /// dot-files are left out silently.
    pub fn members(&mut self) -> Result<Vec<ArchiveMember>> {
        match &mut self.upload {
            Upload::Workbook { name, .. } => Ok(vec![ArchiveMember {
                name: name.clone(),
                index: None,
            }]),
            Upload::Bundle(archive) => {
                let mut members = Vec::new();
                for index in 0..archive.len() {
                    let entry = archive
                        .by_index_raw(index)
                        .map_err(|e| SheetError::InvalidArchive(e.to_string()))?;
                    let name = entry.name().to_string();
                    if entry.is_dir() || is_hidden_entry(&name) {
                        continue;
                    }
                    members.push(ArchiveMember {
                        name,
                        index: Some(index),
                    });
                }
                Ok(members)
            }
        }
    }

    /// Decompress one member.
    ///
    /// A member over the per-member limit, or one that cannot be decoded, is
    /// skipped. Crossing the archive-wide total is fatal.
    pub fn read_member(&mut self, member: &ArchiveMember) -> Result<MemberBytes> {
        let limits = self.limits;
        let archive = match (&mut self.upload, member.index) {
            (Upload::Workbook { bytes, .. }, _) => {
                return Ok(match bytes.take() {
                    Some(bytes) => MemberBytes::Read(bytes),
                    None => MemberBytes::Skipped("workbook already consumed".to_string()),
                });
            }
            (Upload::Bundle(archive), Some(_)) => archive,
            (Upload::Bundle(_), None) => {
                return Ok(MemberBytes::Skipped("member is not part of this archive".to_string()));
            }
        };
        let index = member.index.unwrap_or_default();

        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(e) => return Ok(MemberBytes::Skipped(format!("cannot open member: {}", e))),
        };

        let declared = file.size();
        if declared > limits.max_member_bytes {
            return Ok(MemberBytes::Skipped(format!(
                "member is too large: {} bytes (limit: {} bytes)",
                declared, limits.max_member_bytes
            )));
        }
        if self.total_read.saturating_add(declared) > limits.max_total_bytes {
            return Err(total_exceeded(limits));
        }

        let mut buf = Vec::with_capacity(declared as usize);
        // Headers can understate the real size; never inflate past the limit.
        if let Err(e) = (&mut file)
            .take(limits.max_member_bytes + 1)
            .read_to_end(&mut buf)
        {
            return Ok(MemberBytes::Skipped(format!("cannot decompress member: {}", e)));
        }
        let actual = buf.len() as u64;
        if actual > limits.max_member_bytes {
            return Ok(MemberBytes::Skipped(format!(
                "member is too large: more than {} bytes",
                limits.max_member_bytes
            )));
        }

        self.total_read = self.total_read.saturating_add(actual);
        if self.total_read > limits.max_total_bytes {
            return Err(total_exceeded(limits));
        }

        Ok(MemberBytes::Read(buf))
    }
}

fn total_exceeded(limits: ArchiveLimits) -> SheetError {
    SheetError::InvalidArchive(format!(
        "total uncompressed size exceeds limit of {} bytes",
        limits.max_total_bytes
    ))
}

fn is_hidden_entry(name: &str) -> bool {
    if name.starts_with("__MACOSX/") || name.contains("/__MACOSX/") {
        return true;
    }
    name.rsplit('/').next().map_or(false, |base| base.starts_with('.'))
}

fn workbook_member_name(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name).trim();
    if base.is_empty() {
        "workbook.xlsx".to_string()
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_formats_by_extension_and_signature() {
        assert_eq!(MemberFormat::from_name("a/Report.XLSX"), Some(MemberFormat::Workbook));
        assert_eq!(MemberFormat::from_name("data.tsv"), Some(MemberFormat::Tsv));
        assert_eq!(MemberFormat::from_name("legacy.xls"), None);
        assert_eq!(MemberFormat::from_name("README"), None);

        assert!(MemberFormat::Workbook.check_signature(b"PK\x03\x04rest").is_ok());
        assert!(MemberFormat::Workbook.check_signature(b"Name,Qty").is_err());
        assert!(MemberFormat::Csv.check_signature(b"Name,Qty\n").is_ok());
        assert!(MemberFormat::Csv.check_signature(b"PK\x03\x04").is_err());
        assert!(MemberFormat::Csv
            .check_signature(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1])
            .is_err());
    }

    #[test]
    fn test_members_skip_metadata() {
        let bytes = build_zip(&[
            ("reports/", b""),
            ("reports/q1.csv", b"a\n1\n"),
            ("__MACOSX/reports/._q1.csv", b"junk"),
            (".DS_Store", b"junk"),
            ("notes.txt", b"hi"),
        ]);
        let mut reader = ArchiveReader::open("upload.zip", bytes, ArchiveLimits::default()).unwrap();
        assert!(!reader.is_bare_workbook());

        let members = reader.members().unwrap();
        let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["reports/q1.csv", "notes.txt"]);
        assert_eq!(members[0].stem(), "q1");

        match reader.read_member(&members[0]).unwrap() {
            MemberBytes::Read(bytes) => assert_eq!(bytes, b"a\n1\n"),
            MemberBytes::Skipped(reason) => panic!("unexpected skip: {}", reason),
        }
    }

    #[test]
    fn test_not_a_zip_is_invalid() {
        let err = ArchiveReader::open("x.zip", b"Name,Qty\n".to_vec(), ArchiveLimits::default())
            .err()
            .unwrap();
        assert!(matches!(err, SheetError::InvalidArchive(_)));
    }

    #[test]
    fn test_entry_limit() {
        let bytes = build_zip(&[("a.csv", b"x"), ("b.csv", b"y"), ("c.csv", b"z")]);
        let limits = ArchiveLimits {
            max_entries: 2,
            ..ArchiveLimits::default()
        };
        let err = ArchiveReader::open("x.zip", bytes, limits).err().unwrap();
        assert!(matches!(err, SheetError::InvalidArchive(_)));
    }

    #[test]
    fn test_member_and_total_limits() {
        let big = vec![b'a'; 64];
        let bytes = build_zip(&[("big.csv", &big), ("small.csv", b"x\n1\n"), ("other.csv", &big)]);
        let limits = ArchiveLimits {
            max_entries: 10,
            max_member_bytes: 32,
            max_total_bytes: 40,
        };
        let mut reader = ArchiveReader::open("x.zip", bytes, limits).unwrap();
        let members = reader.members().unwrap();

        assert!(matches!(
            reader.read_member(&members[0]).unwrap(),
            MemberBytes::Skipped(_)
        ));
        assert!(matches!(
            reader.read_member(&members[1]).unwrap(),
            MemberBytes::Read(_)
        ));

        let limits = ArchiveLimits {
            max_entries: 10,
            max_member_bytes: 1024,
            max_total_bytes: 100,
        };
        let bytes = build_zip(&[("one.csv", &big), ("two.csv", &big)]);
        let mut reader = ArchiveReader::open("x.zip", bytes, limits).unwrap();
        let members = reader.members().unwrap();
        assert!(reader.read_member(&members[0]).is_ok());
        assert!(matches!(
            reader.read_member(&members[1]),
            Err(SheetError::InvalidArchive(_))
        ));
    }

    #[test]
    fn test_bare_workbook_is_one_member() {
        let bytes = build_zip(&[
            ("[Content_Types].xml", b"<Types/>"),
            ("xl/workbook.xml", b"<workbook/>"),
        ]);
        let mut reader =
            ArchiveReader::open("uploads/Budget 2024.xlsx", bytes.clone(), ArchiveLimits::default())
                .unwrap();
        assert!(reader.is_bare_workbook());

        let members = reader.members().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "Budget 2024.xlsx");
        assert_eq!(members[0].stem(), "Budget 2024");
        match reader.read_member(&members[0]).unwrap() {
            MemberBytes::Read(read) => assert_eq!(read, bytes),
            MemberBytes::Skipped(reason) => panic!("unexpected skip: {}", reason),
        }
    }
}
