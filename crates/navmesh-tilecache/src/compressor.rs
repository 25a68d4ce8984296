//! Pluggable compression for stored tile layers

use recast_common::{Error, Result};

/// Compresses and decompresses the payload of a tile layer.
///
/// The cache owns one compressor for its whole lifetime; every stored layer is
/// produced and consumed by the same implementation.
pub trait TileCacheCompressor: std::fmt::Debug + Send + Sync {
    /// Upper bound on the compressed size of `buffer_size` input bytes
    fn max_compressed_size(&self, buffer_size: usize) -> usize;

    /// Compresses `buffer`
    fn compress(&self, buffer: &[u8]) -> Result<Vec<u8>>;

    /// Decompresses `len` bytes of `compressed` starting at `offset`.
    ///
    /// `out_len` is the exact decompressed size the caller expects.
    fn decompress(
        &self,
        compressed: &[u8],
        offset: usize,
        len: usize,
        out_len: usize,
    ) -> Result<Vec<u8>>;
}

fn payload_slice(compressed: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| compressed.get(offset..end))
        .ok_or_else(|| {
            Error::Compression(format!(
                "payload range {offset}+{len} exceeds buffer of {} bytes",
                compressed.len()
            ))
        })
}

/// LZ4 block compression
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl TileCacheCompressor for Lz4Compressor {
    fn max_compressed_size(&self, buffer_size: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(buffer_size)
    }

    fn compress(&self, buffer: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::block::compress(buffer))
    }

    fn decompress(
        &self,
        compressed: &[u8],
        offset: usize,
        len: usize,
        out_len: usize,
    ) -> Result<Vec<u8>> {
        let payload = payload_slice(compressed, offset, len)?;
        let out = lz4_flex::block::decompress(payload, out_len).map_err(|e| {
            log::error!("LZ4 decompression failed: {:?}", e);
            Error::Compression(e.to_string())
        })?;
        if out.len() != out_len {
            return Err(Error::Compression(format!(
                "expected {out_len} decompressed bytes, got {}",
                out.len()
            )));
        }
        Ok(out)
    }
}

/// Stores payloads verbatim
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCompressor;

impl TileCacheCompressor for PassthroughCompressor {
    fn max_compressed_size(&self, buffer_size: usize) -> usize {
        buffer_size
    }

    fn compress(&self, buffer: &[u8]) -> Result<Vec<u8>> {
        Ok(buffer.to_vec())
    }

    fn decompress(
        &self,
        compressed: &[u8],
        offset: usize,
        len: usize,
        out_len: usize,
    ) -> Result<Vec<u8>> {
        let payload = payload_slice(compressed, offset, len)?;
        if payload.len() != out_len {
            return Err(Error::Compression(format!(
                "expected {out_len} bytes, payload has {}",
                payload.len()
            )));
        }
        Ok(payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_with_offset() {
        let codec = Lz4Compressor;
        let raw: Vec<u8> = (0..300u32).map(|i| (i % 7) as u8).collect();
        let packed = codec.compress(&raw).unwrap();
        assert!(packed.len() <= codec.max_compressed_size(raw.len()));

        let mut framed = vec![0xAA; 5];
        framed.extend_from_slice(&packed);
        let out = codec.decompress(&framed, 5, packed.len(), raw.len()).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn test_lz4_rejects_wrong_length() {
        let codec = Lz4Compressor;
        let packed = codec.compress(&[1, 2, 3, 4]).unwrap();
        assert!(codec.decompress(&packed, 0, packed.len(), 8).is_err());
        assert!(codec.decompress(&packed, 2, packed.len(), 4).is_err());
    }

    #[test]
    fn test_passthrough() {
        let codec = PassthroughCompressor;
        let packed = codec.compress(&[9, 8, 7]).unwrap();
        assert_eq!(packed, vec![9, 8, 7]);
        assert_eq!(codec.decompress(&[0, 9, 8, 7], 1, 3, 3).unwrap(), vec![9, 8, 7]);
        assert!(matches!(
            codec.decompress(&[0, 9, 8, 7], 1, 3, 4),
            Err(Error::Compression(_))
        ));
    }
}
