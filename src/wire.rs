//! Wire codec for the TCP transfer protocol.
//!
//! One envelope per connection: a single tag byte, then a tag-specific
//! header (manifest for Files/Folder, a lone string for Text), then the
//! raw file bytes concatenated in manifest order with no separators.
//!
//! Strings are a 7-bit variable-length byte-count prefix (least
//! significant group first, high bit means another group follows)
//! followed by UTF-8 bytes. Counts are i32 LE, sizes i64 LE.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::{tag, MAX_MANIFEST_ENTRIES, MAX_STRING_LEN};

/// One file's metadata inside a Files/Folder envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// File name (Files) or path relative to the root (Folder).
    pub name: String,
    /// Declared size; exactly this many raw bytes follow for the entry.
    pub size: i64,
}

/// The decoded header of one connection's payload. File bytes are not
/// part of the envelope; they are streamed separately in manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Files(Vec<ManifestEntry>),
    Text(String),
    Folder {
        root: String,
        entries: Vec<ManifestEntry>,
    },
}

// ---------------------------------------------------------------------
// Encoding (pure, appends to a buffer)
// ---------------------------------------------------------------------

/// Append a 7-bit variable-length unsigned value.
fn put_varint(buf: &mut Vec<u8>, mut v: u32) {
    loop {
        let b = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(b);
            break;
        }
        buf.push(b | 0x80);
    }
}

/// Append a length-prefixed UTF-8 string.
pub fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_varint(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

pub fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn put_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Encode a Files envelope header: tag, count, then (name, size) pairs.
pub fn encode_files_header(entries: &[ManifestEntry]) -> Vec<u8> {
    let mut buf = vec![tag::FILES];
    put_i32(&mut buf, entries.len() as i32);
    for e in entries {
        put_str(&mut buf, &e.name);
        put_i64(&mut buf, e.size);
    }
    buf
}

/// Encode a Folder envelope header: tag, root name, count, then pairs.
pub fn encode_folder_header(root: &str, entries: &[ManifestEntry]) -> Vec<u8> {
    let mut buf = vec![tag::FOLDER];
    put_str(&mut buf, root);
    put_i32(&mut buf, entries.len() as i32);
    for e in entries {
        put_str(&mut buf, &e.name);
        put_i64(&mut buf, e.size);
    }
    buf
}

/// Encode a complete Text envelope (nothing follows the string).
pub fn encode_text(payload: &str) -> Vec<u8> {
    let mut buf = vec![tag::TEXT];
    put_str(&mut buf, payload);
    buf
}

// ---------------------------------------------------------------------
// Decoding (async, from any byte stream)
// ---------------------------------------------------------------------

pub async fn read_u8<R: AsyncRead + Unpin>(r: &mut R) -> Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b).await.context("read tag byte")?;
    Ok(b[0])
}

pub async fn read_i32<R: AsyncRead + Unpin>(r: &mut R) -> Result<i32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b).await.context("read i32")?;
    Ok(i32::from_le_bytes(b))
}

pub async fn read_i64<R: AsyncRead + Unpin>(r: &mut R) -> Result<i64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).await.context("read i64")?;
    Ok(i64::from_le_bytes(b))
}

/// Read the 7-bit variable-length byte-count prefix. At most 5 groups
/// are legal for a 32-bit count.
async fn read_varint<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32> {
    let mut v: u32 = 0;
    let mut shift = 0u32;
    loop {
        let b = read_u8(r).await.context("read string length")?;
        if shift == 28 && b > 0x0f {
            bail!("string length prefix overflows 32 bits");
        }
        v |= ((b & 0x7f) as u32) << shift;
        if b & 0x80 == 0 {
            return Ok(v);
        }
        shift += 7;
        if shift > 28 {
            bail!("string length prefix longer than 5 bytes");
        }
    }
}

/// Read one length-prefixed UTF-8 string.
pub async fn read_str<R: AsyncRead + Unpin>(r: &mut R) -> Result<String> {
    let len = read_varint(r).await? as usize;
    if len > MAX_STRING_LEN {
        bail!("string length {} exceeds limit {}", len, MAX_STRING_LEN);
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await.context("read string bytes")?;
    String::from_utf8(buf).context("string is not valid UTF-8")
}

async fn read_manifest<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<ManifestEntry>> {
    let count = read_i32(r).await.context("read manifest entry count")?;
    if !(0..=MAX_MANIFEST_ENTRIES).contains(&count) {
        bail!("manifest entry count {} out of range", count);
    }
    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count {
        let name = read_str(r)
            .await
            .with_context(|| format!("read manifest entry {} name", i))?;
        let size = read_i64(r)
            .await
            .with_context(|| format!("read manifest entry {} size", i))?;
        if size < 0 {
            bail!("manifest entry {} has negative size {}", i, size);
        }
        entries.push(ManifestEntry { name, size });
    }
    Ok(entries)
}

/// Read the envelope header of one connection: tag byte plus the
/// tag-specific structures, leaving the stream positioned at the first
/// file byte (Files/Folder) or at EOF (Text).
pub async fn read_envelope<R: AsyncRead + Unpin>(r: &mut R) -> Result<Envelope> {
    match read_u8(r).await.context("read content tag")? {
        tag::FILES => Ok(Envelope::Files(read_manifest(r).await?)),
        tag::TEXT => Ok(Envelope::Text(read_str(r).await.context("read text payload")?)),
        tag::FOLDER => {
            let root = read_str(r).await.context("read folder root name")?;
            Ok(Envelope::Folder {
                root,
                entries: read_manifest(r).await?,
            })
        }
        t => bail!("unknown content tag 0x{:02x}", t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_single_and_multi_byte() {
        let mut buf = Vec::new();
        put_varint(&mut buf, 5);
        assert_eq!(buf, [5]);

        buf.clear();
        put_varint(&mut buf, 0x7f);
        assert_eq!(buf, [0x7f]);

        buf.clear();
        put_varint(&mut buf, 300);
        // 300 = 0b10_0101100 -> 0xAC 0x02
        assert_eq!(buf, [0xac, 0x02]);
    }

    #[tokio::test]
    async fn string_roundtrip() -> anyhow::Result<()> {
        for s in ["", "a.txt", "日本語ファイル.bin", &"x".repeat(300)] {
            let mut buf = Vec::new();
            put_str(&mut buf, s);
            let mut r = &buf[..];
            assert_eq!(read_str(&mut r).await?, s);
            assert!(r.is_empty(), "string decode must consume exactly its bytes");
        }
        Ok(())
    }

    #[tokio::test]
    async fn truncated_string_fails() {
        let mut buf = Vec::new();
        put_str(&mut buf, "hello");
        buf.truncate(3);
        let mut r = &buf[..];
        assert!(read_str(&mut r).await.is_err());
    }

    #[tokio::test]
    async fn oversized_string_length_fails() {
        let mut buf = Vec::new();
        put_varint(&mut buf, (MAX_STRING_LEN + 1) as u32);
        buf.extend_from_slice(b"irrelevant");
        let mut r = &buf[..];
        assert!(read_str(&mut r).await.is_err());
    }

    #[tokio::test]
    async fn runaway_length_prefix_fails() {
        // Six continuation bytes can never be a valid 32-bit count
        let buf = [0xffu8, 0xff, 0xff, 0xff, 0xff, 0xff];
        let mut r = &buf[..];
        assert!(read_str(&mut r).await.is_err());
    }

    #[tokio::test]
    async fn files_envelope_roundtrip() -> anyhow::Result<()> {
        let entries = vec![
            ManifestEntry {
                name: "a.txt".into(),
                size: 5,
            },
            ManifestEntry {
                name: "b.bin".into(),
                size: 1000,
            },
        ];
        let buf = encode_files_header(&entries);
        let mut r = &buf[..];
        assert_eq!(read_envelope(&mut r).await?, Envelope::Files(entries));
        assert!(r.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn folder_envelope_roundtrip() -> anyhow::Result<()> {
        let entries = vec![
            ManifestEntry {
                name: "src/a.go".into(),
                size: 10,
            },
            ManifestEntry {
                name: "README.md".into(),
                size: 3,
            },
        ];
        let buf = encode_folder_header("proj", &entries);
        let mut r = &buf[..];
        assert_eq!(
            read_envelope(&mut r).await?,
            Envelope::Folder {
                root: "proj".into(),
                entries
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn text_envelope_roundtrip() -> anyhow::Result<()> {
        let buf = encode_text("https://example.com");
        let mut r = &buf[..];
        assert_eq!(
            read_envelope(&mut r).await?,
            Envelope::Text("https://example.com".into())
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_tag_fails() {
        let buf = [0x7fu8];
        let mut r = &buf[..];
        assert!(read_envelope(&mut r).await.is_err());
    }

    #[tokio::test]
    async fn negative_entry_count_fails() {
        let mut buf = vec![tag::FILES];
        put_i32(&mut buf, -1);
        let mut r = &buf[..];
        assert!(read_envelope(&mut r).await.is_err());
    }

    #[tokio::test]
    async fn negative_entry_size_fails() {
        let mut buf = vec![tag::FILES];
        put_i32(&mut buf, 1);
        put_str(&mut buf, "evil");
        put_i64(&mut buf, -5);
        let mut r = &buf[..];
        assert!(read_envelope(&mut r).await.is_err());
    }
}
