//! Transparent decompression of source datasets.
//!
//! Shards handed to transform programs are always plain text, but the dataset
//! being split may be stored compressed. Codecs are detected by file extension
//! first and by magic bytes second; anything unrecognized is read as-is.
//!
//! ## Built-in codecs
//! - **Gzip** (`.gz`) via `flate2` (feature: `compression-gzip`)
//! - **Zstd** (`.zst`) via `zstd` (feature: `compression-zstd`)
//!
//! Further codecs can be plugged in with [`register_codec`].

use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::debug;

static CODEC_REGISTRY: RwLock<Option<Vec<Arc<dyn CompressionCodec>>>> = RwLock::new(None);

fn builtin_codecs() -> Vec<Arc<dyn CompressionCodec>> {
    vec![
        #[cfg(feature = "compression-gzip")]
        Arc::new(GzipCodec),
        #[cfg(feature = "compression-zstd")]
        Arc::new(ZstdCodec),
    ]
}

fn registry() -> Vec<Arc<dyn CompressionCodec>> {
    if let Ok(lock) = CODEC_REGISTRY.read()
        && let Some(codecs) = lock.as_ref()
    {
        return codecs.clone();
    }
    let mut lock = CODEC_REGISTRY
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    lock.get_or_insert_with(builtin_codecs).clone()
}

/// Register an additional codec, consulted after the built-in ones.
pub fn register_codec(codec: Arc<dyn CompressionCodec>) {
    let mut lock = CODEC_REGISTRY
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    lock.get_or_insert_with(builtin_codecs).push(codec);
}

/// A decompression algorithm for source datasets.
///
/// Implementations are stored in a global registry, hence `Send + Sync`.
pub trait CompressionCodec: Send + Sync {
    /// Human-readable codec name (e.g., "gzip").
    fn name(&self) -> &str;

    /// Lowercase file extensions including the leading dot.
    fn extensions(&self) -> &[&str];

    /// Signature at the start of a stream, if the format has a reliable one.
    fn magic_bytes(&self) -> Option<&[u8]>;

    /// Wrap `reader` so it yields decompressed bytes.
    fn wrap_reader(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>>;
}

fn detect_from_extension(path: &Path) -> Option<Arc<dyn CompressionCodec>> {
    let name = path.to_string_lossy().to_lowercase();
    registry()
        .into_iter()
        .find(|codec| codec.extensions().iter().any(|ext| name.ends_with(ext)))
}

fn detect_from_magic<R: BufRead>(reader: &mut R) -> io::Result<Option<Arc<dyn CompressionCodec>>> {
    let head = reader.fill_buf()?;
    if head.is_empty() {
        return Ok(None);
    }
    Ok(registry().into_iter().find(|codec| {
        codec
            .magic_bytes()
            .is_some_and(|magic| head.starts_with(magic))
    }))
}

/// Open-file adapter: decompress `reader` if `path_hint` or its first bytes
/// name a registered codec, and hand back a buffered line source either way.
///
/// # Errors
/// Returns an error if peeking at the stream or constructing the decoder fails.
pub fn auto_detect_reader<R: Read + 'static>(
    reader: R,
    path_hint: impl AsRef<Path>,
) -> io::Result<Box<dyn BufRead>> {
    let path_hint = path_hint.as_ref();
    if let Some(codec) = detect_from_extension(path_hint) {
        debug!(codec = codec.name(), path = %path_hint.display(), "decompressing by extension");
        let decoded = codec.wrap_reader(Box::new(reader))?;
        return Ok(Box::new(BufReader::new(decoded)));
    }

    let mut buffered = BufReader::new(reader);
    if let Some(codec) = detect_from_magic(&mut buffered)? {
        debug!(codec = codec.name(), path = %path_hint.display(), "decompressing by magic bytes");
        let decoded = codec.wrap_reader(Box::new(buffered))?;
        return Ok(Box::new(BufReader::new(decoded)));
    }
    Ok(Box::new(buffered))
}

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn wrap_reader(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>> {
        // Multi-member streams are what `gzip -c a b > ab.gz` and parallel gzip tools emit.
        Ok(Box::new(flate2::read::MultiGzDecoder::new(reader)))
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn extensions(&self) -> &[&str] {
        &[".zst", ".zstd"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x28, 0xb5, 0x2f, 0xfd])
    }

    fn wrap_reader(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read>)
    }
}
