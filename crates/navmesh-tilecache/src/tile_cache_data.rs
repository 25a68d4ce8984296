//! Tile layer data structures and their wire format
//!
//! A stored tile is a fixed-size [`TileCacheLayerHeader`] followed by the
//! compressor's encoding of three parallel per-cell arrays: heights, area ids
//! and connection masks. The header uses the byte order chosen in
//! [`TileCacheStorageParams`] and can be padded to match the C struct layout.

use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use recast_common::{Error, Result};

use crate::compressor::TileCacheCompressor;

/// Magic number for tile layer data ('DTLR')
pub const TILECACHE_MAGIC: u32 =
    (b'D' as u32) << 24 | (b'T' as u32) << 16 | (b'L' as u32) << 8 | b'R' as u32;

/// Version number for tile layer data
pub const TILECACHE_VERSION: u32 = 1;

/// Area id of cells that cannot be walked on
pub const NULL_AREA: u8 = 0;
/// Area id assigned to ordinary walkable cells
pub const WALKABLE_AREA: u8 = 63;
/// Region id of cells without a region
pub const NULL_REGION: u8 = 0xff;

/// Size of the packed header in bytes
pub const HEADER_SIZE: usize = 54;
/// Size of the header when padded to the C struct layout
pub const HEADER_SIZE_C_COMPAT: usize = 56;

/// Byte order of the stored header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum LayerByteOrder {
    #[default]
    Little,
    Big,
}

/// How tile layers are framed when stored in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileCacheStorageParams {
    /// Byte order of header fields
    pub byte_order: LayerByteOrder,
    /// Pad the header to the 4-byte aligned size used by the C layout
    pub c_compatibility: bool,
}

impl Default for TileCacheStorageParams {
    fn default() -> Self {
        Self {
            byte_order: LayerByteOrder::Little,
            c_compatibility: true,
        }
    }
}

impl TileCacheStorageParams {
    /// Size of the header as stored with these params
    pub fn header_size(&self) -> usize {
        if self.c_compatibility {
            HEADER_SIZE_C_COMPAT
        } else {
            HEADER_SIZE
        }
    }
}

/// Tile layer header
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileCacheLayerHeader {
    /// Magic number for validation
    pub magic: u32,
    /// Version of the layer format
    pub version: u32,
    /// Tile position X
    pub tx: i32,
    /// Tile position Y
    pub ty: i32,
    /// Layer index within the tile column
    pub tlayer: i32,
    /// World-space bounds minimum
    pub bmin: [f32; 3],
    /// World-space bounds maximum
    pub bmax: [f32; 3],
    /// Lowest height of the layer (in cells)
    pub hmin: u16,
    /// Highest height of the layer (in cells)
    pub hmax: u16,
    /// Width of the layer grid (in cells)
    pub width: u8,
    /// Height of the layer grid (in cells)
    pub height: u8,
    /// Usable sub-region minimum x
    pub minx: u8,
    /// Usable sub-region maximum x
    pub maxx: u8,
    /// Usable sub-region minimum y
    pub miny: u8,
    /// Usable sub-region maximum y
    pub maxy: u8,
}

impl Default for TileCacheLayerHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl TileCacheLayerHeader {
    /// Creates an empty header with the current magic and version
    pub fn new() -> Self {
        Self {
            magic: TILECACHE_MAGIC,
            version: TILECACHE_VERSION,
            tx: 0,
            ty: 0,
            tlayer: 0,
            bmin: [0.0; 3],
            bmax: [0.0; 3],
            hmin: 0,
            hmax: 0,
            width: 0,
            height: 0,
            minx: 0,
            maxx: 0,
            miny: 0,
            maxy: 0,
        }
    }

    /// Number of cells in the layer grid
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Validates the header
    pub fn validate(&self) -> Result<()> {
        if self.magic != TILECACHE_MAGIC {
            return Err(Error::MalformedLayer(format!("bad magic {:#x}", self.magic)));
        }
        if self.version != TILECACHE_VERSION {
            return Err(Error::MalformedLayer(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::MalformedLayer(format!(
                "empty grid {}x{}",
                self.width, self.height
            )));
        }
        if self.minx > self.maxx
            || self.maxx >= self.width
            || self.miny > self.maxy
            || self.maxy >= self.height
        {
            return Err(Error::MalformedLayer(format!(
                "usable region x {}..={} y {}..={} outside {}x{} grid",
                self.minx, self.maxx, self.miny, self.maxy, self.width, self.height
            )));
        }
        Ok(())
    }

    fn write_fields<B: ByteOrder, W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<B>(self.magic)?;
        w.write_u32::<B>(self.version)?;
        w.write_i32::<B>(self.tx)?;
        w.write_i32::<B>(self.ty)?;
        w.write_i32::<B>(self.tlayer)?;
        for v in self.bmin {
            w.write_f32::<B>(v)?;
        }
        for v in self.bmax {
            w.write_f32::<B>(v)?;
        }
        w.write_u16::<B>(self.hmin)?;
        w.write_u16::<B>(self.hmax)?;
        w.write_u8(self.width)?;
        w.write_u8(self.height)?;
        w.write_u8(self.minx)?;
        w.write_u8(self.maxx)?;
        w.write_u8(self.miny)?;
        w.write_u8(self.maxy)?;
        Ok(())
    }

    fn read_fields<B: ByteOrder, R: Read>(r: &mut R) -> std::io::Result<Self> {
        let magic = r.read_u32::<B>()?;
        let version = r.read_u32::<B>()?;
        let tx = r.read_i32::<B>()?;
        let ty = r.read_i32::<B>()?;
        let tlayer = r.read_i32::<B>()?;
        let mut bmin = [0.0f32; 3];
        for v in &mut bmin {
            *v = r.read_f32::<B>()?;
        }
        let mut bmax = [0.0f32; 3];
        for v in &mut bmax {
            *v = r.read_f32::<B>()?;
        }
        Ok(Self {
            magic,
            version,
            tx,
            ty,
            tlayer,
            bmin,
            bmax,
            hmin: r.read_u16::<B>()?,
            hmax: r.read_u16::<B>()?,
            width: r.read_u8()?,
            height: r.read_u8()?,
            minx: r.read_u8()?,
            maxx: r.read_u8()?,
            miny: r.read_u8()?,
            maxy: r.read_u8()?,
        })
    }

    /// Writes the header using the given storage params
    pub fn write_to<W: Write>(&self, w: &mut W, storage: &TileCacheStorageParams) -> Result<()> {
        match storage.byte_order {
            LayerByteOrder::Little => self.write_fields::<LittleEndian, W>(w)?,
            LayerByteOrder::Big => self.write_fields::<BigEndian, W>(w)?,
        }
        if storage.c_compatibility {
            w.write_all(&[0u8; HEADER_SIZE_C_COMPAT - HEADER_SIZE])?;
        }
        Ok(())
    }

    /// Serializes the header to bytes
    pub fn to_bytes(&self, storage: &TileCacheStorageParams) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(storage.header_size());
        self.write_to(&mut bytes, storage)?;
        Ok(bytes)
    }

    /// Deserializes and validates a header from the start of `data`
    pub fn from_bytes(data: &[u8], storage: &TileCacheStorageParams) -> Result<Self> {
        if data.len() < storage.header_size() {
            return Err(Error::MalformedLayer(format!(
                "{} bytes is shorter than the {}-byte header",
                data.len(),
                storage.header_size()
            )));
        }

        let mut cursor = Cursor::new(data);
        let header = match storage.byte_order {
            LayerByteOrder::Little => Self::read_fields::<LittleEndian, _>(&mut cursor)?,
            LayerByteOrder::Big => Self::read_fields::<BigEndian, _>(&mut cursor)?,
        };

        header.validate()?;
        Ok(header)
    }
}

/// Decompressed tile layer, the working grid of a rebuild
#[derive(Debug, Clone, PartialEq)]
pub struct TileCacheLayer {
    /// Header information
    pub header: TileCacheLayerHeader,
    /// Cell heights relative to the layer's bmin.y (in cells)
    pub heights: Vec<u8>,
    /// Cell area ids
    pub areas: Vec<u8>,
    /// Cell connections: low nibble neighbour links, high nibble portals
    pub cons: Vec<u8>,
    /// Cell region ids, filled by the region builder
    pub regs: Vec<u8>,
    /// Number of regions after region building
    pub reg_count: u8,
}

impl TileCacheLayer {
    /// Creates a layer from its three per-cell arrays
    pub fn new(
        header: TileCacheLayerHeader,
        heights: Vec<u8>,
        areas: Vec<u8>,
        cons: Vec<u8>,
    ) -> Result<Self> {
        let cells = header.cell_count();
        if heights.len() != cells || areas.len() != cells || cons.len() != cells {
            return Err(Error::MalformedLayer(format!(
                "layer arrays ({}, {}, {}) do not match {} cells",
                heights.len(),
                areas.len(),
                cons.len(),
                cells
            )));
        }
        Ok(Self {
            header,
            heights,
            areas,
            cons,
            regs: vec![NULL_REGION; cells],
            reg_count: 0,
        })
    }

    /// Width of the grid in cells
    pub fn width(&self) -> i32 {
        self.header.width as i32
    }

    /// Height of the grid in cells
    pub fn height(&self) -> i32 {
        self.header.height as i32
    }
}

/// Encodes a layer for storage: header followed by the compressed cell arrays.
pub fn compress_tile_cache_layer(
    compressor: &dyn TileCacheCompressor,
    header: &TileCacheLayerHeader,
    heights: &[u8],
    areas: &[u8],
    cons: &[u8],
    storage: &TileCacheStorageParams,
) -> Result<Vec<u8>> {
    header.validate()?;
    let cells = header.cell_count();
    if heights.len() != cells || areas.len() != cells || cons.len() != cells {
        return Err(Error::MalformedLayer(format!(
            "layer arrays do not match {cells} cells"
        )));
    }

    let mut grids = Vec::with_capacity(cells * 3);
    grids.extend_from_slice(heights);
    grids.extend_from_slice(areas);
    grids.extend_from_slice(cons);
    let compressed = compressor.compress(&grids)?;

    let mut data = Vec::with_capacity(storage.header_size() + compressed.len());
    header.write_to(&mut data, storage)?;
    data.extend_from_slice(&compressed);
    Ok(data)
}

/// Decompresses a stored layer into its working grid
pub fn decompress_tile_cache_layer(
    compressor: &dyn TileCacheCompressor,
    data: &[u8],
    storage: &TileCacheStorageParams,
) -> Result<TileCacheLayer> {
    let header = TileCacheLayerHeader::from_bytes(data, storage)?;
    let header_size = storage.header_size();
    let cells = header.cell_count();

    let grids = compressor.decompress(data, header_size, data.len() - header_size, cells * 3)?;
    if grids.len() != cells * 3 {
        return Err(Error::MalformedLayer(format!(
            "decompressed {} bytes, expected {}",
            grids.len(),
            cells * 3
        )));
    }

    let heights = grids[..cells].to_vec();
    let areas = grids[cells..cells * 2].to_vec();
    let cons = grids[cells * 2..].to_vec();
    TileCacheLayer::new(header, heights, areas, cons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::{Lz4Compressor, PassthroughCompressor};

    fn sample_header() -> TileCacheLayerHeader {
        let mut header = TileCacheLayerHeader::new();
        header.tx = 3;
        header.ty = -2;
        header.tlayer = 1;
        header.bmin = [1.0, 2.0, 3.0];
        header.bmax = [4.0, 5.5, 6.0];
        header.hmin = 7;
        header.hmax = 300;
        header.width = 4;
        header.height = 2;
        header.maxx = 3;
        header.maxy = 1;
        header
    }

    #[test]
    fn test_magic_spells_dtlr() {
        assert_eq!(TILECACHE_MAGIC.to_be_bytes(), *b"DTLR");
    }

    #[test]
    fn test_header_sizes_and_padding() {
        let header = sample_header();
        let packed = TileCacheStorageParams {
            byte_order: LayerByteOrder::Little,
            c_compatibility: false,
        };
        let padded = TileCacheStorageParams::default();

        let bytes = header.to_bytes(&packed).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let bytes = header.to_bytes(&padded).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE_C_COMPAT);
        assert_eq!(&bytes[HEADER_SIZE..], &[0, 0]);
        assert_eq!(TileCacheLayerHeader::from_bytes(&bytes, &padded).unwrap(), header);
    }

    #[test]
    fn test_header_byte_order() {
        let header = sample_header();
        let big = TileCacheStorageParams {
            byte_order: LayerByteOrder::Big,
            c_compatibility: false,
        };
        let bytes = header.to_bytes(&big).unwrap();
        assert_eq!(&bytes[..4], b"DTLR");
        assert_eq!(TileCacheLayerHeader::from_bytes(&bytes, &big).unwrap(), header);

        // Reading big-endian data as little-endian trips the magic check
        let little = TileCacheStorageParams {
            byte_order: LayerByteOrder::Little,
            c_compatibility: false,
        };
        assert!(matches!(
            TileCacheLayerHeader::from_bytes(&bytes, &little),
            Err(Error::MalformedLayer(_))
        ));
    }

    #[test]
    fn test_header_validation() {
        let storage = TileCacheStorageParams::default();
        assert!(TileCacheLayerHeader::from_bytes(&[0u8; 10], &storage).is_err());

        let mut header = sample_header();
        header.version = 2;
        assert!(header.validate().is_err());

        let mut header = sample_header();
        header.maxx = 4;
        assert!(header.validate().is_err());

        let mut header = sample_header();
        header.width = 0;
        assert!(header.validate().is_err());
    }

    #[test]
    fn test_layer_encode_decode() {
        let header = sample_header();
        let heights: Vec<u8> = (0..8).collect();
        let areas = vec![WALKABLE_AREA; 8];
        let cons = vec![0x0f; 8];
        let storage = TileCacheStorageParams::default();

        for codec in [
            &Lz4Compressor as &dyn TileCacheCompressor,
            &PassthroughCompressor,
        ] {
            let data =
                compress_tile_cache_layer(codec, &header, &heights, &areas, &cons, &storage).unwrap();
            let layer = decompress_tile_cache_layer(codec, &data, &storage).unwrap();
            assert_eq!(layer.header, header);
            assert_eq!(layer.heights, heights);
            assert_eq!(layer.areas, areas);
            assert_eq!(layer.cons, cons);
            assert_eq!(layer.regs, vec![NULL_REGION; 8]);
        }
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let header = sample_header();
        let storage = TileCacheStorageParams::default();
        let data = compress_tile_cache_layer(
            &PassthroughCompressor,
            &header,
            &[0; 8],
            &[0; 8],
            &[0; 8],
            &storage,
        )
        .unwrap();
        let truncated = &data[..data.len() - 3];
        assert!(decompress_tile_cache_layer(&PassthroughCompressor, truncated, &storage).is_err());
    }

    #[test]
    fn test_mismatched_arrays_are_rejected() {
        let header = sample_header();
        assert!(matches!(
            TileCacheLayer::new(header, vec![0; 8], vec![0; 7], vec![0; 8]),
            Err(Error::MalformedLayer(_))
        ));
    }
}
