// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The `.dist-info/RECORD` integrity manifest.

Each archive member other than `RECORD` itself gets one line of the form
`path,sha256=<digest>,<length>`, where the digest is SHA-256 encoded as
URL-safe base64 without padding (PEP 376, PEP 427). Lines follow archive
order. `RECORD` lists itself last with empty hash and length fields, as
it cannot contain its own digest.
*/

use {
    crate::artifact::{ArtifactKind, PackagedArtifact},
    base64::Engine,
    mailparse::MailHeaderMap,
    sha2::Digest,
    std::io::{Read, Seek},
    thiserror::Error,
};

/// Name of the hash algorithm recorded in `RECORD` lines.
pub const RECORD_HASH_ALGORITHM: &str = "sha256";

/// Compute the `RECORD` digest of content.
pub fn record_digest(data: &[u8]) -> String {
    let mut digest = sha2::Sha256::new();
    digest.update(data);

    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.finalize())
}

/// Quote a path for a CSV field, if needed.
fn csv_field(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn parse_csv_field(value: &str) -> String {
    match value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\"\"", "\""),
        None => value.to_string(),
    }
}

/// Digest and size of one archive member.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IntegrityRecord {
    pub path: String,
    /// URL-safe base64 SHA-256 digest, without padding.
    pub digest: String,
    pub length: usize,
}

impl IntegrityRecord {
    /// Compute the record for finalized artifact content.
    pub fn compute(artifact: &PackagedArtifact) -> Self {
        Self {
            path: artifact.path().to_string(),
            digest: record_digest(artifact.data()),
            length: artifact.data().len(),
        }
    }

    /// Render the `RECORD` line, without a trailing newline.
    pub fn to_line(&self) -> String {
        format!(
            "{},{}={},{}",
            csv_field(&self.path),
            RECORD_HASH_ALGORITHM,
            self.digest,
            self.length
        )
    }

    /// Parse a `RECORD` line carrying a hash and length.
    pub fn parse_line(line: &str) -> Result<Self, RecordVerificationError> {
        let malformed = || RecordVerificationError::MalformedLine(line.to_string());

        // The path may contain commas. The digest and length never do.
        let mut fields = line.rsplitn(3, ',');
        let length = fields.next().ok_or_else(malformed)?;
        let hash = fields.next().ok_or_else(malformed)?;
        let path = parse_csv_field(fields.next().ok_or_else(malformed)?);

        let (algorithm, digest) = hash.split_once('=').ok_or_else(malformed)?;
        if algorithm != RECORD_HASH_ALGORITHM {
            return Err(RecordVerificationError::UnsupportedAlgorithm {
                path,
                algorithm: algorithm.to_string(),
            });
        }

        Ok(Self {
            path,
            digest: digest.to_string(),
            length: length.parse::<usize>().map_err(|_| malformed())?,
        })
    }
}

/// The records for a wheel plus the rendered `RECORD` artifact.
#[derive(Clone, Debug)]
pub struct IntegrityManifest {
    /// One record per input artifact, in input order.
    pub records: Vec<IntegrityRecord>,
    /// The `RECORD` file, of kind [ArtifactKind::Manifest].
    pub artifact: PackagedArtifact,
}

/// Derive the `RECORD` file for artifacts in final archive order.
///
/// `dist_info_path` is the `.dist-info` directory the manifest lives in.
pub fn build_integrity_manifest(
    artifacts: &[PackagedArtifact],
    dist_info_path: &str,
) -> IntegrityManifest {
    let records = artifacts
        .iter()
        .map(IntegrityRecord::compute)
        .collect::<Vec<_>>();

    let record_path = format!("{}/RECORD", dist_info_path);

    let mut content = String::new();
    for record in &records {
        content.push_str(&record.to_line());
        content.push('\n');
    }
    content.push_str(&format!("{},,\n", csv_field(&record_path)));

    IntegrityManifest {
        records,
        artifact: PackagedArtifact::new(record_path, content, ArtifactKind::Manifest),
    }
}

/// A wheel failed integrity verification.
#[derive(Debug, Error)]
pub enum RecordVerificationError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive has no .dist-info/RECORD member")]
    MissingRecord,

    #[error("archive has {0} RECORD members")]
    MultipleRecords(usize),

    #[error("RECORD must be the last archive member; found {0}")]
    RecordNotLast(String),

    #[error("RECORD is not valid UTF-8")]
    RecordEncoding,

    #[error("malformed RECORD line: {0}")]
    MalformedLine(String),

    #[error("unsupported hash algorithm {algorithm} for {path}")]
    UnsupportedAlgorithm { path: String, algorithm: String },

    #[error("RECORD has {records} entries; archive has {members} other members")]
    CountMismatch { records: usize, members: usize },

    #[error("archive member {index} is {actual}; RECORD lists {expected}")]
    OrderMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("digest mismatch for {path}: RECORD has {expected}; content hashes to {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("length mismatch for {path}: RECORD has {expected}; content is {actual} bytes")]
    LengthMismatch {
        path: String,
        expected: usize,
        actual: usize,
    },

    #[error("error parsing WHEEL file: {0}")]
    WheelParse(#[from] mailparse::MailParseError),

    #[error("WHEEL file missing or lacks Wheel-Version")]
    MissingWheelVersion,

    #[error("unsupported Wheel-Version: {0}")]
    UnsupportedWheelVersion(String),
}

/// Verify a wheel archive against its `RECORD`.
///
/// Checks that `RECORD` is present exactly once and is the last member, that
/// it lists every other member in archive order, that each listed digest and
/// length matches the member content, and that `WHEEL` declares a 1.x format.
///
/// Returns the verified records.
pub fn verify_wheel(
    reader: impl Read + Seek,
) -> Result<Vec<IntegrityRecord>, RecordVerificationError> {
    let mut archive = zip::ZipArchive::new(reader)?;

    let mut members = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        // The declared size comes from the archive itself and is not trusted.
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        members.push((file.name().to_string(), data));
    }

    let record_count = members
        .iter()
        .filter(|(name, _)| name.ends_with(".dist-info/RECORD"))
        .count();

    match record_count {
        0 => return Err(RecordVerificationError::MissingRecord),
        1 => {}
        n => return Err(RecordVerificationError::MultipleRecords(n)),
    }

    let (record_path, record_data) = members
        .pop()
        .ok_or(RecordVerificationError::MissingRecord)?;
    if !record_path.ends_with(".dist-info/RECORD") {
        return Err(RecordVerificationError::RecordNotLast(record_path));
    }

    let text =
        std::str::from_utf8(&record_data).map_err(|_| RecordVerificationError::RecordEncoding)?;
    let mut lines = text.lines().filter(|l| !l.is_empty()).collect::<Vec<_>>();

    let self_line = format!("{},,", csv_field(&record_path));
    if lines.last() != Some(&self_line.as_str()) {
        return Err(RecordVerificationError::MalformedLine(
            lines.last().map(|l| l.to_string()).unwrap_or_default(),
        ));
    }
    lines.pop();

    let records = lines
        .into_iter()
        .map(IntegrityRecord::parse_line)
        .collect::<Result<Vec<_>, _>>()?;

    if records.len() != members.len() {
        return Err(RecordVerificationError::CountMismatch {
            records: records.len(),
            members: members.len(),
        });
    }

    for (index, (record, (name, data))) in records.iter().zip(members.iter()).enumerate() {
        if &record.path != name {
            return Err(RecordVerificationError::OrderMismatch {
                index,
                expected: record.path.clone(),
                actual: name.clone(),
            });
        }

        let actual = record_digest(data);
        if actual != record.digest {
            return Err(RecordVerificationError::DigestMismatch {
                path: name.clone(),
                expected: record.digest.clone(),
                actual,
            });
        }

        if data.len() != record.length {
            return Err(RecordVerificationError::LengthMismatch {
                path: name.clone(),
                expected: record.length,
                actual: data.len(),
            });
        }
    }

    let dist_info = record_path.trim_end_matches("RECORD");
    let wheel_path = format!("{}WHEEL", dist_info);
    let (_, wheel_data) = members
        .iter()
        .find(|(name, _)| name == &wheel_path)
        .ok_or(RecordVerificationError::MissingWheelVersion)?;

    let (headers, _) = mailparse::parse_headers(wheel_data)?;
    let version = headers
        .get_first_value("Wheel-Version")
        .ok_or(RecordVerificationError::MissingWheelVersion)?;
    if !version.starts_with("1.") {
        return Err(RecordVerificationError::UnsupportedWheelVersion(version));
    }

    Ok(records)
}

#[cfg(test)]
mod test {
    use {super::*, anyhow::Result};

    #[test]
    fn digest_encoding() {
        // sha256 of the empty string.
        assert_eq!(
            record_digest(b""),
            "47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU"
        );
    }

    #[test]
    fn manifest_content() {
        let artifacts = vec![
            PackagedArtifact::new("app/main.py", b"".to_vec(), ArtifactKind::Source),
            PackagedArtifact::new("a,b.txt", b"x".to_vec(), ArtifactKind::Source),
        ];

        let manifest = build_integrity_manifest(&artifacts, "demo-1.0.dist-info");

        assert_eq!(manifest.records.len(), 2);
        assert_eq!(manifest.records[1].length, 1);
        assert_eq!(manifest.artifact.path(), "demo-1.0.dist-info/RECORD");
        assert_eq!(manifest.artifact.kind(), ArtifactKind::Manifest);
        assert_eq!(
            std::str::from_utf8(manifest.artifact.data()).unwrap(),
            format!(
                "app/main.py,sha256=47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU,0\n\
                 \"a,b.txt\",sha256={},1\n\
                 demo-1.0.dist-info/RECORD,,\n",
                record_digest(b"x")
            )
        );
    }

    /// A single stored `hello` member whose central directory entry claims
    /// an absurd zip64 uncompressed size.
    fn oversized_zip64_archive() -> Vec<u8> {
        let name = b"app/main.py";
        let content = b"hello";
        let crc: u32 = 0x3610a686;

        let mut data = Vec::new();

        // Local file header.
        data.extend_from_slice(&0x04034b50u32.to_le_bytes());
        data.extend_from_slice(&45u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0x21u16.to_le_bytes());
        data.extend_from_slice(&crc.to_le_bytes());
        data.extend_from_slice(&(content.len() as u32).to_le_bytes());
        data.extend_from_slice(&(content.len() as u32).to_le_bytes());
        data.extend_from_slice(&(name.len() as u16).to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(name);
        data.extend_from_slice(content);

        let cd_offset = data.len() as u32;

        // Central directory header with a zip64 extra field.
        data.extend_from_slice(&0x02014b50u32.to_le_bytes());
        data.extend_from_slice(&45u16.to_le_bytes());
        data.extend_from_slice(&45u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0x21u16.to_le_bytes());
        data.extend_from_slice(&crc.to_le_bytes());
        data.extend_from_slice(&(content.len() as u32).to_le_bytes());
        data.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
        data.extend_from_slice(&(name.len() as u16).to_le_bytes());
        data.extend_from_slice(&12u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(name);
        data.extend_from_slice(&0x0001u16.to_le_bytes());
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(&0x7fff_ffff_ffff_fff0u64.to_le_bytes());

        let cd_size = data.len() as u32 - cd_offset;

        // End of central directory record.
        data.extend_from_slice(&0x06054b50u32.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&cd_size.to_le_bytes());
        data.extend_from_slice(&cd_offset.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());

        data
    }

    #[test]
    fn oversized_member_is_rejected() {
        // Must fail verification rather than abort on allocation.
        assert!(verify_wheel(std::io::Cursor::new(oversized_zip64_archive())).is_err());
    }

    #[test]
    fn parse_lines() -> Result<()> {
        let record = IntegrityRecord {
            path: "we\"ird,name.py".to_string(),
            digest: record_digest(b"abc"),
            length: 3,
        };
        assert_eq!(IntegrityRecord::parse_line(&record.to_line())?, record);

        assert!(matches!(
            IntegrityRecord::parse_line("foo.py,md5=abc,3"),
            Err(RecordVerificationError::UnsupportedAlgorithm { .. })
        ));
        assert!(matches!(
            IntegrityRecord::parse_line("foo.py,sha256=abc,three"),
            Err(RecordVerificationError::MalformedLine(_))
        ));
        assert!(matches!(
            IntegrityRecord::parse_line("foo.py"),
            Err(RecordVerificationError::MalformedLine(_))
        ));

        Ok(())
    }
}
