//! Codec pipeline: ordered, reversible byte transforms applied per chunk

use crate::attributes::{AttributeValue, Attributes};
use crate::error::{Result, ZarrError};
use crate::types::DataType;
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

/// Identifiers of every codec this crate can build
pub const KNOWN_CODECS: &[&str] = &["bytes", "identity", "gzip", "zstd", "shuffle", "crc32c"];

/// Default zstd level
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

const CHECKSUM_SIZE: usize = 4;

/// A codec as recorded in array metadata: a name plus its configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub configuration: Attributes,
}

impl CodecDescriptor {
    pub fn new(name: impl Into<String>, configuration: Attributes) -> Self {
        Self {
            name: name.into(),
            configuration,
        }
    }

    /// Byte-order codec
    pub fn bytes(endian: Endian) -> Self {
        Self::new(
            "bytes",
            Attributes::from([("endian".to_string(), endian.name().into())]),
        )
    }

    /// Pass-through codec
    pub fn identity() -> Self {
        Self::new("identity", Attributes::new())
    }

    pub fn gzip(level: CompressionLevel) -> Self {
        Self::new(
            "gzip",
            Attributes::from([("level".to_string(), i64::from(level.value()).into())]),
        )
    }

    pub fn zstd(level: i32) -> Self {
        Self::new(
            "zstd",
            Attributes::from([("level".to_string(), i64::from(level).into())]),
        )
    }

    /// Byte-shuffle filter for elements of `elementsize` bytes
    pub fn shuffle(elementsize: usize) -> Self {
        Self::new(
            "shuffle",
            Attributes::from([("elementsize".to_string(), (elementsize as i64).into())]),
        )
    }

    /// Trailing CRC32C checksum
    pub fn crc32c() -> Self {
        Self::new("crc32c", Attributes::new())
    }

    fn int_field(&self, field: &str) -> Result<i64> {
        self.configuration
            .get(field)
            .and_then(AttributeValue::as_i64)
            .ok_or_else(|| {
                ZarrError::Codec(format!(
                    "{} codec requires an integer `{}` configuration",
                    self.name, field
                ))
            })
    }
}

/// Byte order of encoded elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub fn name(&self) -> &'static str {
        match self {
            Endian::Little => "little",
            Endian::Big => "big",
        }
    }
}

/// Compression level (0-9, where 0 is no compression and 9 is maximum)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    pub fn fast() -> Self {
        Self(1)
    }

    pub fn best() -> Self {
        Self(9)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(5)
    }
}

/// A pure, stateless, reversible byte transform
pub trait Codec: Send + Sync + fmt::Debug {
    /// Encode data
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decode data produced by [`Codec::encode`]
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// The descriptor that recreates this codec
    fn descriptor(&self) -> CodecDescriptor;
}

/// Pass-through codec
#[derive(Debug, Default)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn descriptor(&self) -> CodecDescriptor {
        CodecDescriptor::identity()
    }
}

/// Byte-order codec. Decoded chunks are little-endian, so only `big` does work.
#[derive(Debug)]
pub struct BytesCodec {
    endian: Endian,
    element_size: usize,
}

impl BytesCodec {
    pub fn new(endian: Endian, element_size: usize) -> Self {
        Self {
            endian,
            element_size,
        }
    }

    fn swap(&self, data: &[u8]) -> Result<Vec<u8>> {
        if self.endian == Endian::Little || self.element_size == 1 {
            return Ok(data.to_vec());
        }
        if data.len() % self.element_size != 0 {
            return Err(ZarrError::Codec(format!(
                "bytes codec input length {} is not a multiple of element size {}",
                data.len(),
                self.element_size
            )));
        }
        let mut out = data.to_vec();
        for element in out.chunks_exact_mut(self.element_size) {
            element.reverse();
        }
        Ok(out)
    }
}

impl Codec for BytesCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.swap(data)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.swap(data)
    }

    fn descriptor(&self) -> CodecDescriptor {
        CodecDescriptor::bytes(self.endian)
    }
}

/// Gzip compression
#[derive(Debug, Default)]
pub struct GzipCodec {
    level: CompressionLevel,
}

impl GzipCodec {
    pub fn new(level: CompressionLevel) -> Self {
        Self { level }
    }
}

impl Codec for GzipCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(data, FlateCompression::new(self.level.value() as u32));
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(|e| ZarrError::Codec(format!("gzip encode: {e}")))?;
        Ok(compressed)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| ZarrError::Codec(format!("gzip decode: {e}")))?;
        Ok(decompressed)
    }

    fn descriptor(&self) -> CodecDescriptor {
        CodecDescriptor::gzip(self.level)
    }
}

/// Zstandard compression
#[derive(Debug)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ZSTD_LEVEL)
    }
}

impl Codec for ZstdCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::encode_all(data, self.level)
            .map_err(|e| ZarrError::Codec(format!("zstd encode: {e}")))
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| ZarrError::Codec(format!("zstd decode: {e}")))
    }

    fn descriptor(&self) -> CodecDescriptor {
        CodecDescriptor::zstd(self.level)
    }
}

/// Byte shuffle: groups byte `k` of every element together
#[derive(Debug)]
pub struct ShuffleCodec {
    elementsize: usize,
}

impl ShuffleCodec {
    pub fn new(elementsize: usize) -> Self {
        Self { elementsize }
    }

    fn check_len(&self, len: usize) -> Result<usize> {
        if len % self.elementsize != 0 {
            return Err(ZarrError::Codec(format!(
                "shuffle codec input length {} is not a multiple of elementsize {}",
                len, self.elementsize
            )));
        }
        Ok(len / self.elementsize)
    }
}

impl Codec for ShuffleCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let count = self.check_len(data.len())?;
        let mut encoded = vec![0u8; data.len()];
        for i in 0..count {
            let offset = i * self.elementsize;
            for byte_index in 0..self.elementsize {
                encoded[byte_index * count + i] = data[offset + byte_index];
            }
        }
        Ok(encoded)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let count = self.check_len(data.len())?;
        let mut decoded = vec![0u8; data.len()];
        for byte_index in 0..self.elementsize {
            let offset = byte_index * count;
            for i in 0..count {
                decoded[i * self.elementsize + byte_index] = data[offset + i];
            }
        }
        Ok(decoded)
    }

    fn descriptor(&self) -> CodecDescriptor {
        CodecDescriptor::shuffle(self.elementsize)
    }
}

/// Appends a little-endian CRC32C of the payload and verifies it on decode
#[derive(Debug, Default)]
pub struct Crc32cCodec;

impl Codec for Crc32cCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoded = Vec::with_capacity(data.len() + CHECKSUM_SIZE);
        encoded.extend_from_slice(data);
        encoded.extend_from_slice(&crc32c::crc32c(data).to_le_bytes());
        Ok(encoded)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < CHECKSUM_SIZE {
            return Err(ZarrError::Codec(format!(
                "crc32c payload of {} bytes is shorter than its checksum",
                data.len()
            )));
        }
        let (payload, stored) = data.split_at(data.len() - CHECKSUM_SIZE);
        if crc32c::crc32c(payload).to_le_bytes() != stored {
            return Err(ZarrError::Codec("crc32c checksum mismatch".to_string()));
        }
        Ok(payload.to_vec())
    }

    fn descriptor(&self) -> CodecDescriptor {
        CodecDescriptor::crc32c()
    }
}

/// Build the codec a descriptor names, for chunks of `data_type`
pub fn codec_from_descriptor(
    descriptor: &CodecDescriptor,
    data_type: DataType,
) -> Result<Box<dyn Codec>> {
    match descriptor.name.as_str() {
        "identity" => Ok(Box::new(IdentityCodec)),
        "bytes" => {
            let endian = match descriptor.configuration.get("endian") {
                None => Endian::Little,
                Some(value) => match value.as_str() {
                    Some("little") => Endian::Little,
                    Some("big") => Endian::Big,
                    _ => {
                        return Err(ZarrError::Codec(format!(
                            "bytes codec endian must be \"little\" or \"big\", got {value:?}"
                        )))
                    }
                },
            };
            Ok(Box::new(BytesCodec::new(endian, data_type.size_in_bytes())))
        }
        "gzip" => {
            let level = descriptor.int_field("level")?;
            let level = u8::try_from(level)
                .ok()
                .filter(|level| *level <= 9)
                .ok_or_else(|| ZarrError::Codec(format!("gzip level {level} not in 0..=9")))?;
            Ok(Box::new(GzipCodec::new(CompressionLevel::new(level))))
        }
        "zstd" => {
            let level = descriptor.int_field("level")?;
            let level = i32::try_from(level)
                .ok()
                .filter(|level| zstd::compression_level_range().contains(level))
                .ok_or_else(|| ZarrError::Codec(format!("zstd level {level} out of range")))?;
            Ok(Box::new(ZstdCodec::new(level)))
        }
        "shuffle" => {
            let elementsize = descriptor.int_field("elementsize")?;
            let elementsize = usize::try_from(elementsize)
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| {
                    ZarrError::Codec(format!("shuffle elementsize {elementsize} must be positive"))
                })?;
            Ok(Box::new(ShuffleCodec::new(elementsize)))
        }
        "crc32c" => Ok(Box::new(Crc32cCodec)),
        other => Err(ZarrError::Codec(format!("unknown codec: {other}"))),
    }
}

/// An ordered codec chain: applied in order on encode, in reverse on decode
#[derive(Debug)]
pub struct CodecChain {
    codecs: Vec<Box<dyn Codec>>,
}

impl CodecChain {
    /// Build a chain from descriptors
    pub fn from_descriptors(descriptors: &[CodecDescriptor], data_type: DataType) -> Result<Self> {
        let codecs = descriptors
            .iter()
            .map(|descriptor| codec_from_descriptor(descriptor, data_type))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { codecs })
    }

    /// Number of codecs
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Descriptors of the chain, in encode order
    pub fn descriptors(&self) -> Vec<CodecDescriptor> {
        self.codecs.iter().map(|codec| codec.descriptor()).collect()
    }

    /// Encode a dense decoded chunk of exactly `chunk_len` bytes
    pub fn encode(&self, chunk: &[u8], chunk_len: usize) -> Result<Vec<u8>> {
        if chunk.len() != chunk_len {
            return Err(ZarrError::Shape(format!(
                "chunk buffer is {} bytes, expected {}",
                chunk.len(),
                chunk_len
            )));
        }
        let mut data = chunk.to_vec();
        for codec in &self.codecs {
            data = codec.encode(&data)?;
        }
        Ok(data)
    }

    /// Decode a stored chunk; the result must be exactly `chunk_len` bytes
    pub fn decode(&self, encoded: &[u8], chunk_len: usize) -> Result<Vec<u8>> {
        let mut data = encoded.to_vec();
        for codec in self.codecs.iter().rev() {
            data = codec.decode(&data)?;
        }
        if data.len() != chunk_len {
            return Err(ZarrError::Codec(format!(
                "decoded chunk is {} bytes, expected {}",
                data.len(),
                chunk_len
            )));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 7) as u8).collect()
    }

    #[test]
    fn test_identity() {
        let data = b"Hello, world!";
        let encoded = IdentityCodec.encode(data).unwrap();
        assert_eq!(encoded, data);
        assert_eq!(IdentityCodec.decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_gzip() {
        let codec = GzipCodec::default();
        let data = b"Hello, world! ".repeat(100);
        let compressed = codec.encode(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
        assert_eq!(codec.decode(&compressed).unwrap(), data);
    }

    #[test]
    fn test_zstd() {
        let codec = ZstdCodec::default();
        let data = b"Hello, world! ".repeat(100);
        let compressed = codec.encode(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(codec.decode(&compressed).unwrap(), data);
    }

    #[test]
    fn test_corrupt_payload_is_codec_error() {
        let data = b"Hello, world! ".repeat(100);
        for codec in [
            Box::new(GzipCodec::default()) as Box<dyn Codec>,
            Box::new(ZstdCodec::default()),
        ] {
            let compressed = codec.encode(&data).unwrap();
            let truncated = &compressed[..compressed.len() / 2];
            assert!(matches!(codec.decode(truncated), Err(ZarrError::Codec(_))));
        }
    }

    #[test]
    fn test_shuffle() {
        let codec = ShuffleCodec::new(4);
        let data: Vec<u8> = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let shuffled = codec.encode(&data).unwrap();
        assert_eq!(shuffled, vec![1, 5, 2, 6, 3, 7, 4, 8]);
        assert_eq!(codec.decode(&shuffled).unwrap(), data);
        assert!(codec.encode(&data[..7]).is_err());
    }

    #[test]
    fn test_bytes_big_endian() {
        let codec = BytesCodec::new(Endian::Big, 2);
        let encoded = codec.encode(&[1, 0, 2, 0]).unwrap();
        assert_eq!(encoded, vec![0, 1, 0, 2]);
        assert_eq!(codec.decode(&encoded).unwrap(), vec![1, 0, 2, 0]);
        let little = BytesCodec::new(Endian::Little, 2);
        assert_eq!(little.encode(&[1, 0]).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_crc32c() {
        let codec = Crc32cCodec;
        let data = sample(64);
        let mut encoded = codec.encode(&data).unwrap();
        assert_eq!(encoded.len(), data.len() + 4);
        assert_eq!(codec.decode(&encoded).unwrap(), data);

        encoded[3] ^= 0xff;
        assert!(matches!(codec.decode(&encoded), Err(ZarrError::Codec(_))));
        assert!(matches!(codec.decode(&[1, 2]), Err(ZarrError::Codec(_))));
    }

    #[test]
    fn test_chain_order() {
        let descriptors = vec![
            CodecDescriptor::bytes(Endian::Little),
            CodecDescriptor::shuffle(4),
            CodecDescriptor::zstd(3),
            CodecDescriptor::crc32c(),
        ];
        let chain = CodecChain::from_descriptors(&descriptors, DataType::Float32).unwrap();
        assert_eq!(chain.len(), 4);
        assert_eq!(chain.descriptors(), descriptors);

        let data = sample(400);
        let encoded = chain.encode(&data, 400).unwrap();
        // The checksum is the outermost layer
        let inner = Crc32cCodec.decode(&encoded).unwrap();
        assert_eq!(
            zstd::decode_all(&inner[..]).unwrap(),
            ShuffleCodec::new(4).encode(&data).unwrap()
        );
        assert_eq!(chain.decode(&encoded, 400).unwrap(), data);
    }

    #[test]
    fn test_chain_length_contract() {
        let chain = CodecChain::from_descriptors(
            &[CodecDescriptor::gzip(CompressionLevel::fast())],
            DataType::UInt8,
        )
        .unwrap();
        assert!(matches!(chain.encode(&sample(10), 12), Err(ZarrError::Shape(_))));

        let encoded = chain.encode(&sample(10), 10).unwrap();
        assert!(matches!(chain.decode(&encoded, 12), Err(ZarrError::Codec(_))));
    }

    #[test]
    fn test_descriptor_validation() {
        let unknown = CodecDescriptor::new("blosc", Attributes::new());
        assert!(matches!(
            codec_from_descriptor(&unknown, DataType::UInt8),
            Err(ZarrError::Codec(_))
        ));

        let missing_level = CodecDescriptor::new("gzip", Attributes::new());
        assert!(codec_from_descriptor(&missing_level, DataType::UInt8).is_err());
        let best = CodecDescriptor::gzip(CompressionLevel::best());
        assert!(codec_from_descriptor(&best, DataType::UInt8).is_ok());

        let bad_endian = CodecDescriptor::new(
            "bytes",
            Attributes::from([("endian".to_string(), "middle".into())]),
        );
        assert!(codec_from_descriptor(&bad_endian, DataType::Int32).is_err());

        let json = serde_json::to_string(&CodecDescriptor::zstd(3)).unwrap();
        assert_eq!(json, r#"{"name":"zstd","configuration":{"level":3}}"#);
        let json = serde_json::to_string(&CodecDescriptor::crc32c()).unwrap();
        assert_eq!(json, r#"{"name":"crc32c"}"#);
    }
}
