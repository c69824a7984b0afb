//! Node metadata documents
//!
//! Every node stores one `zarr.json` document. Arrays describe their shape,
//! chunk grid, element type, fill value and codec chain; groups carry only
//! attributes. Documents are validated on load and fail closed with
//! [`ZarrError::Metadata`] naming the offending key.

use crate::attributes::{AttributeValue, Attributes};
use crate::codec::{CodecChain, CodecDescriptor, Endian};
use crate::error::{Result, ZarrError};
use crate::layout::ChunkGrid;
use crate::types::{DataType, Element};
use crate::utils::{elements_to_bytes, join_path};
use num_traits::NumCast;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Metadata format version
pub const ZARR_FORMAT: u8 = 3;

/// Kind of hierarchy node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Array,
    Group,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Array => f.write_str("array"),
            NodeType::Group => f.write_str("group"),
        }
    }
}

/// Array fill value as written in metadata
#[derive(Debug, Clone, Copy)]
pub enum FillValueMetadata {
    Bool(bool),
    Int(i64),
    /// Only for integers above `i64::MAX`
    UInt(u64),
    Float(f64),
}

impl FillValueMetadata {
    /// The zero value of a data type
    pub fn zero(data_type: DataType) -> Self {
        match data_type {
            DataType::Bool => FillValueMetadata::Bool(false),
            dt if dt.is_float() => FillValueMetadata::Float(0.0),
            _ => FillValueMetadata::Int(0),
        }
    }

    /// Encode as one little-endian element of `data_type`.
    ///
    /// Fails with a dtype error if the value is not representable.
    pub fn to_bytes(&self, data_type: DataType) -> Result<Vec<u8>> {
        match data_type {
            DataType::Bool => match self {
                FillValueMetadata::Bool(value) => Ok(vec![<u8 as From<bool>>::from(*value)]),
                _ => Err(self.unrepresentable(data_type)),
            },
            DataType::Int8 => self.cast::<i8>(data_type),
            DataType::Int16 => self.cast::<i16>(data_type),
            DataType::Int32 => self.cast::<i32>(data_type),
            DataType::Int64 => self.cast::<i64>(data_type),
            DataType::UInt8 => self.cast::<u8>(data_type),
            DataType::UInt16 => self.cast::<u16>(data_type),
            DataType::UInt32 => self.cast::<u32>(data_type),
            DataType::UInt64 => self.cast::<u64>(data_type),
            DataType::Float32 => {
                let value = self.as_float(data_type)?;
                if value.is_finite() && value.abs() > <f64 as From<f32>>::from(f32::MAX) {
                    return Err(self.unrepresentable(data_type));
                }
                Ok(elements_to_bytes(&[value as f32]))
            }
            DataType::Float64 => Ok(elements_to_bytes(&[self.as_float(data_type)?])),
        }
    }

    fn cast<T: Element + NumCast>(&self, data_type: DataType) -> Result<Vec<u8>> {
        let value: Option<T> = match *self {
            FillValueMetadata::Int(value) => T::from(value),
            FillValueMetadata::UInt(value) => T::from(value),
            FillValueMetadata::Float(value) if value.is_finite() && value.fract() == 0.0 => {
                T::from(value)
            }
            _ => None,
        };
        value
            .map(|value| elements_to_bytes(&[value]))
            .ok_or_else(|| self.unrepresentable(data_type))
    }

    fn as_float(&self, data_type: DataType) -> Result<f64> {
        match *self {
            FillValueMetadata::Int(value) => Ok(value as f64),
            FillValueMetadata::UInt(value) => Ok(value as f64),
            FillValueMetadata::Float(value) => Ok(value),
            FillValueMetadata::Bool(_) => Err(self.unrepresentable(data_type)),
        }
    }

    fn unrepresentable(&self, data_type: DataType) -> ZarrError {
        ZarrError::Dtype(format!(
            "fill value {} is not representable as {}",
            self, data_type
        ))
    }
}

impl PartialEq for FillValueMetadata {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FillValueMetadata::Bool(a), FillValueMetadata::Bool(b)) => a == b,
            (FillValueMetadata::Int(a), FillValueMetadata::Int(b)) => a == b,
            (FillValueMetadata::UInt(a), FillValueMetadata::UInt(b)) => a == b,
            (FillValueMetadata::Float(a), FillValueMetadata::Float(b)) => {
                a == b || (a.is_nan() && b.is_nan())
            }
            _ => false,
        }
    }
}

impl fmt::Display for FillValueMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillValueMetadata::Bool(value) => write!(f, "{}", value),
            FillValueMetadata::Int(value) => write!(f, "{}", value),
            FillValueMetadata::UInt(value) => write!(f, "{}", value),
            FillValueMetadata::Float(value) => write!(f, "{}", value),
        }
    }
}

impl From<bool> for FillValueMetadata {
    fn from(value: bool) -> Self {
        FillValueMetadata::Bool(value)
    }
}

impl From<i32> for FillValueMetadata {
    fn from(value: i32) -> Self {
        FillValueMetadata::Int(value.into())
    }
}

impl From<i64> for FillValueMetadata {
    fn from(value: i64) -> Self {
        FillValueMetadata::Int(value)
    }
}

impl From<u64> for FillValueMetadata {
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or(FillValueMetadata::UInt(value), FillValueMetadata::Int)
    }
}

impl From<f32> for FillValueMetadata {
    fn from(value: f32) -> Self {
        FillValueMetadata::Float(value.into())
    }
}

impl From<f64> for FillValueMetadata {
    fn from(value: f64) -> Self {
        FillValueMetadata::Float(value)
    }
}

impl Serialize for FillValueMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match *self {
            FillValueMetadata::Bool(value) => serializer.serialize_bool(value),
            FillValueMetadata::Int(value) => serializer.serialize_i64(value),
            FillValueMetadata::UInt(value) => serializer.serialize_u64(value),
            FillValueMetadata::Float(value) if value.is_nan() => serializer.serialize_str("NaN"),
            FillValueMetadata::Float(value) if value == f64::INFINITY => {
                serializer.serialize_str("Infinity")
            }
            FillValueMetadata::Float(value) if value == f64::NEG_INFINITY => {
                serializer.serialize_str("-Infinity")
            }
            FillValueMetadata::Float(value) => serializer.serialize_f64(value),
        }
    }
}

struct FillValueVisitor;

impl<'de> Visitor<'de> for FillValueVisitor {
    type Value = FillValueMetadata;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number, a boolean, \"NaN\", \"Infinity\" or \"-Infinity\"")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> std::result::Result<Self::Value, E> {
        Ok(FillValueMetadata::Bool(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<Self::Value, E> {
        Ok(FillValueMetadata::Int(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<Self::Value, E> {
        Ok(FillValueMetadata::from(value))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> std::result::Result<Self::Value, E> {
        Ok(FillValueMetadata::Float(value))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Self::Value, E> {
        match value {
            "NaN" => Ok(FillValueMetadata::Float(f64::NAN)),
            "Infinity" => Ok(FillValueMetadata::Float(f64::INFINITY)),
            "-Infinity" => Ok(FillValueMetadata::Float(f64::NEG_INFINITY)),
            other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
        }
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
        Err(E::custom("fill_value must not be null"))
    }
}

impl<'de> Deserialize<'de> for FillValueMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(FillValueVisitor)
    }
}

/// Separator between chunk key components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkKeySeparator {
    #[serde(rename = "/")]
    Slash,
    #[serde(rename = ".")]
    Dot,
}

impl ChunkKeySeparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKeySeparator::Slash => "/",
            ChunkKeySeparator::Dot => ".",
        }
    }
}

/// How chunk coordinates map to store keys below the array path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChunkKeyEncodingDocument", into = "ChunkKeyEncodingDocument")]
pub enum ChunkKeyEncoding {
    /// `c/0/1` (or `c.0.1`)
    Default { separator: ChunkKeySeparator },
    /// `0.1` (or `0/1`)
    V2 { separator: ChunkKeySeparator },
}

impl Default for ChunkKeyEncoding {
    fn default() -> Self {
        ChunkKeyEncoding::Default {
            separator: ChunkKeySeparator::Slash,
        }
    }
}

impl ChunkKeyEncoding {
    /// Legacy encoding with its usual `.` separator
    pub fn v2() -> Self {
        ChunkKeyEncoding::V2 {
            separator: ChunkKeySeparator::Dot,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChunkKeyEncoding::Default { .. } => "default",
            ChunkKeyEncoding::V2 { .. } => "v2",
        }
    }

    pub fn separator(&self) -> ChunkKeySeparator {
        match self {
            ChunkKeyEncoding::Default { separator } | ChunkKeyEncoding::V2 { separator } => {
                *separator
            }
        }
    }

    /// Key of a chunk relative to its array
    pub fn encode(&self, coords: &[usize]) -> String {
        let separator = self.separator().as_str();
        let indices: Vec<String> = coords.iter().map(|index| index.to_string()).collect();
        match self {
            ChunkKeyEncoding::Default { .. } => {
                let mut key = String::from("c");
                for index in &indices {
                    key.push_str(separator);
                    key.push_str(index);
                }
                key
            }
            ChunkKeyEncoding::V2 { .. } if indices.is_empty() => "0".to_string(),
            ChunkKeyEncoding::V2 { .. } => indices.join(separator),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkKeyEncodingDocument {
    name: String,
    #[serde(default)]
    configuration: SeparatorConfiguration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SeparatorConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    separator: Option<ChunkKeySeparator>,
}

impl TryFrom<ChunkKeyEncodingDocument> for ChunkKeyEncoding {
    type Error = String;

    fn try_from(document: ChunkKeyEncodingDocument) -> std::result::Result<Self, String> {
        let separator = document.configuration.separator;
        match document.name.as_str() {
            "default" => Ok(ChunkKeyEncoding::Default {
                separator: separator.unwrap_or(ChunkKeySeparator::Slash),
            }),
            "v2" => Ok(ChunkKeyEncoding::V2 {
                separator: separator.unwrap_or(ChunkKeySeparator::Dot),
            }),
            other => Err(format!("unknown chunk key encoding {other:?}")),
        }
    }
}

impl From<ChunkKeyEncoding> for ChunkKeyEncodingDocument {
    fn from(encoding: ChunkKeyEncoding) -> Self {
        Self {
            name: encoding.name().to_string(),
            configuration: SeparatorConfiguration {
                separator: Some(encoding.separator()),
            },
        }
    }
}

/// The `chunk_grid` entry of an array document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkGridMetadata {
    pub name: String,
    pub configuration: RegularGridConfiguration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegularGridConfiguration {
    pub chunk_shape: Vec<usize>,
}

impl ChunkGridMetadata {
    pub fn regular(chunk_shape: Vec<usize>) -> Self {
        Self {
            name: "regular".to_string(),
            configuration: RegularGridConfiguration { chunk_shape },
        }
    }
}

/// Complete metadata for an array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMetadata {
    pub zarr_format: u8,
    pub node_type: NodeType,
    pub shape: Vec<usize>,
    pub data_type: DataType,
    pub chunk_grid: ChunkGridMetadata,
    pub chunk_key_encoding: ChunkKeyEncoding,
    pub fill_value: FillValueMetadata,
    pub codecs: Vec<CodecDescriptor>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension_names: Option<Vec<String>>,
}

impl ArrayMetadata {
    /// Create array metadata with the default key encoding and a
    /// little-endian `bytes` codec chain
    pub fn new(
        shape: Vec<usize>,
        chunk_shape: Vec<usize>,
        data_type: DataType,
        fill_value: impl Into<FillValueMetadata>,
    ) -> Self {
        Self {
            zarr_format: ZARR_FORMAT,
            node_type: NodeType::Array,
            shape,
            data_type,
            chunk_grid: ChunkGridMetadata::regular(chunk_shape),
            chunk_key_encoding: ChunkKeyEncoding::default(),
            fill_value: fill_value.into(),
            codecs: vec![CodecDescriptor::bytes(Endian::Little)],
            attributes: Attributes::new(),
            dimension_names: None,
        }
    }

    /// Set the codec chain
    pub fn with_codecs(mut self, codecs: Vec<CodecDescriptor>) -> Self {
        self.codecs = codecs;
        self
    }

    /// Set attributes
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Add a single attribute
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_dimension_names<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.dimension_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_chunk_key_encoding(mut self, encoding: ChunkKeyEncoding) -> Self {
        self.chunk_key_encoding = encoding;
        self
    }

    pub fn chunk_shape(&self) -> &[usize] {
        &self.chunk_grid.configuration.chunk_shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Build the chunk grid
    pub fn chunk_grid(&self) -> Result<ChunkGrid> {
        ChunkGrid::new(self.shape.clone(), self.chunk_shape().to_vec())
    }

    /// Build the codec chain
    pub fn codec_chain(&self) -> Result<CodecChain> {
        CodecChain::from_descriptors(&self.codecs, self.data_type)
    }

    /// The fill value as one little-endian element
    pub fn fill_bytes(&self) -> Result<Vec<u8>> {
        self.fill_value.to_bytes(self.data_type)
    }

    /// Decoded size of one chunk in bytes
    pub fn chunk_byte_len(&self) -> usize {
        self.chunk_shape().iter().product::<usize>() * self.data_type.size_in_bytes()
    }

    /// Store key of the chunk at `coords` for an array at `path`
    pub fn chunk_key(&self, path: &str, coords: &[usize]) -> String {
        join_path(path, &self.chunk_key_encoding.encode(coords))
    }

    /// Check the document is internally consistent.
    ///
    /// Errors keep their kind (shape, codec, dtype); loading wraps them as
    /// metadata errors.
    pub fn validate(&self) -> Result<()> {
        if self.zarr_format != ZARR_FORMAT {
            return Err(ZarrError::Metadata(format!(
                "unsupported zarr_format {}",
                self.zarr_format
            )));
        }
        if self.node_type != NodeType::Array {
            return Err(ZarrError::Metadata(format!(
                "node_type is {}, expected array",
                self.node_type
            )));
        }
        if self.chunk_grid.name != "regular" {
            return Err(ZarrError::Metadata(format!(
                "unsupported chunk grid {:?}",
                self.chunk_grid.name
            )));
        }
        let grid = self.chunk_grid()?;
        grid.num_elements()
            .checked_mul(self.data_type.size_in_bytes())
            .filter(|len| *len <= isize::MAX as usize)
            .ok_or_else(|| {
                ZarrError::Shape(format!(
                    "shape {:?} of {} is too large to address",
                    self.shape, self.data_type
                ))
            })?;
        if let Some(names) = &self.dimension_names {
            if names.len() != self.ndim() {
                return Err(ZarrError::Shape(format!(
                    "{} dimension names for {} dimensions",
                    names.len(),
                    self.ndim()
                )));
            }
        }
        self.codec_chain()?;
        self.fill_bytes()?;
        Ok(())
    }

    /// Serialize to a pretty-printed document with sorted keys
    pub fn to_json(&self) -> Result<Vec<u8>> {
        to_sorted_json(self)
    }

    /// Parse and validate the document stored at `key`
    pub fn from_json(bytes: &[u8], key: &str) -> Result<Self> {
        let metadata: Self = serde_json::from_slice(bytes).map_err(|e| malformed(key, e))?;
        metadata.validate().map_err(|e| malformed(key, e))?;
        Ok(metadata)
    }
}

/// Complete metadata for a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub zarr_format: u8,
    pub node_type: NodeType,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Default for GroupMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupMetadata {
    pub fn new() -> Self {
        Self {
            zarr_format: ZARR_FORMAT,
            node_type: NodeType::Group,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.zarr_format != ZARR_FORMAT {
            return Err(ZarrError::Metadata(format!(
                "unsupported zarr_format {}",
                self.zarr_format
            )));
        }
        if self.node_type != NodeType::Group {
            return Err(ZarrError::Metadata(format!(
                "node_type is {}, expected group",
                self.node_type
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        to_sorted_json(self)
    }

    pub fn from_json(bytes: &[u8], key: &str) -> Result<Self> {
        let metadata: Self = serde_json::from_slice(bytes).map_err(|e| malformed(key, e))?;
        metadata.validate().map_err(|e| malformed(key, e))?;
        Ok(metadata)
    }
}

/// Metadata of either kind of node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeMetadata {
    Array(ArrayMetadata),
    Group(GroupMetadata),
}

impl NodeMetadata {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeMetadata::Array(_) => NodeType::Array,
            NodeMetadata::Group(_) => NodeType::Group,
        }
    }

    pub fn attributes(&self) -> &Attributes {
        match self {
            NodeMetadata::Array(metadata) => &metadata.attributes,
            NodeMetadata::Group(metadata) => &metadata.attributes,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, NodeMetadata::Array(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self, NodeMetadata::Group(_))
    }

    pub fn as_array(&self) -> Option<&ArrayMetadata> {
        match self {
            NodeMetadata::Array(metadata) => Some(metadata),
            NodeMetadata::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&GroupMetadata> {
        match self {
            NodeMetadata::Group(metadata) => Some(metadata),
            NodeMetadata::Array(_) => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            NodeMetadata::Array(metadata) => metadata.validate(),
            NodeMetadata::Group(metadata) => metadata.validate(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        to_sorted_json(self)
    }

    /// Parse and validate the document stored at `key`, whatever its node type
    pub fn from_json(bytes: &[u8], key: &str) -> Result<Self> {
        let metadata: Self = serde_json::from_slice(bytes).map_err(|e| malformed(key, e))?;
        metadata.validate().map_err(|e| malformed(key, e))?;
        Ok(metadata)
    }
}

impl From<ArrayMetadata> for NodeMetadata {
    fn from(metadata: ArrayMetadata) -> Self {
        NodeMetadata::Array(metadata)
    }
}

impl From<GroupMetadata> for NodeMetadata {
    fn from(metadata: GroupMetadata) -> Self {
        NodeMetadata::Group(metadata)
    }
}

impl<'de> Deserialize<'de> for NodeMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value.get("node_type").and_then(serde_json::Value::as_str) {
            Some("array") => serde_json::from_value(value)
                .map(NodeMetadata::Array)
                .map_err(de::Error::custom),
            Some("group") => serde_json::from_value(value)
                .map(NodeMetadata::Group)
                .map_err(de::Error::custom),
            Some(other) => Err(de::Error::custom(format!("unknown node_type {other:?}"))),
            None => Err(de::Error::missing_field("node_type")),
        }
    }
}

/// Round-trip through `serde_json::Value` so object keys come out sorted
fn to_sorted_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec_pretty(&value)?)
}

fn malformed(key: &str, error: impl fmt::Display) -> ZarrError {
    ZarrError::Metadata(format!("{}: {}", key, error))
}
