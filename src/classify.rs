//! Structural classification of a class from its array-access profile and
//! source text: vertex data, texture data, world data, and a few coarser
//! buckets.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::behavior::ArrayMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    VertexData,
    TextureData,
    WorldData,
    Buffer,
    Cache,
    NetworkBuffer,
    GenericArray,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPattern {
    #[default]
    None,
    Sequential,
    Block,
    Random,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Classification {
    pub kind: StructureKind,
    /// Share of the category's attainable evidence that was observed, 0..=1.
    pub confidence: f64,
    pub dimensions: u8,
    pub element_size: u8,
    pub access_pattern: AccessPattern,
    pub domain_flags: BTreeMap<String, bool>,
}

static VERTEX_ARRAYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"anIntArray\d+\[.*\]\s*=.*anIntArray\d+\[.*\]").unwrap());
static TRANSFORMS_3D: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"anIntArray\d+\[.*\]\s*[+\-*/]\s*anIntArray\d+\[.*\]").unwrap()
});
static FACE_INDICES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"anIntArray\d+\[.*\]\s*=\s*stream.*readUnsignedWord").unwrap()
});
static PIXEL_MANIPULATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"anIntArray\d+\[.*\]\s*=\s*stream.*readUnsignedByte").unwrap()
});
static IMAGE_DIMENSIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"anIntArray\d+\.length\s*\*\s*anIntArray\d+\.length").unwrap()
});
static COLOR_OPERATIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"anIntArray\d+\[.*\]\s*&\s*0x[0-9a-fA-F]+").unwrap());
static TILE_GRID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+Array\w*\[.*\]\[.*\]").unwrap());
static CHUNK_LOADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"load.*anIntArrayArray\d+").unwrap());
static HEIGHT_MAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\w+Array\w*\[.*\]\[.*\]\s*=\s*stream.*readUnsignedByte").unwrap()
});

const VERTEX_MAX: u32 = 10;
const TEXTURE_MAX: u32 = 8;
const WORLD_MAX: u32 = 10;

pub fn classify(metrics: &ArrayMetrics, source: &str) -> Classification {
    let vertex = vertex_score(metrics, source);
    let texture = texture_score(metrics, source);
    let world = world_score(metrics, source);

    let (kind, confidence) = if vertex >= 4 {
        (StructureKind::VertexData, f64::from(vertex) / f64::from(VERTEX_MAX))
    } else if texture >= 3 {
        (StructureKind::TextureData, f64::from(texture) / f64::from(TEXTURE_MAX))
    } else if world >= 3 {
        (StructureKind::WorldData, f64::from(world) / f64::from(WORLD_MAX))
    } else if source.contains("buffer") || source.contains("stream") || metrics.bulk_operations > 2 {
        (StructureKind::Buffer, 0.5)
    } else if source.contains("cache")
        || source.contains("Cache")
        || (source.contains("Node") && metrics.single_dim_access > 5)
    {
        (StructureKind::Cache, 0.5)
    } else if source.contains("socket") || source.contains("network") || source.contains("connection") {
        (StructureKind::NetworkBuffer, 0.5)
    } else if metrics.single_dim_access > 0 || metrics.multi_dim_access > 0 {
        (StructureKind::GenericArray, 0.3)
    } else {
        (StructureKind::Unknown, 0.0)
    };

    Classification {
        kind,
        confidence: confidence.min(1.0),
        dimensions: dimensionality(metrics),
        element_size: element_size(source),
        access_pattern: access_pattern(metrics),
        domain_flags: domain_flags(source),
    }
}

fn vertex_score(metrics: &ArrayMetrics, source: &str) -> u32 {
    let mut score = 0;
    if metrics.single_dim_access > 30 {
        score += 2;
    }
    if TRANSFORMS_3D.is_match(source) {
        score += 3;
    }
    if FACE_INDICES.is_match(source) {
        score += 2;
    }
    if metrics.loop_array_access > 10 {
        score += 2;
    }
    if metrics.bulk_operations > 1 {
        score += 1;
    }
    score
}

fn texture_score(metrics: &ArrayMetrics, source: &str) -> u32 {
    let mut score = 0;
    if PIXEL_MANIPULATION.is_match(source) {
        score += 3;
    }
    if COLOR_OPERATIONS.is_match(source) {
        score += 2;
    }
    if IMAGE_DIMENSIONS.is_match(source) {
        score += 2;
    }
    if metrics.single_dim_access > 15 && metrics.single_dim_access < 40 {
        score += 1;
    }
    score
}

fn world_score(metrics: &ArrayMetrics, source: &str) -> u32 {
    let mut score = 0;
    if TILE_GRID.is_match(source) {
        score += 3;
    }
    if HEIGHT_MAP.is_match(source) {
        score += 2;
    }
    if CHUNK_LOADING.is_match(source) {
        score += 2;
    }
    if metrics.multi_dim_access > 8 {
        score += 2;
    }
    if metrics.loop_array_access > 8 {
        score += 1;
    }
    score
}

fn dimensionality(metrics: &ArrayMetrics) -> u8 {
    if metrics.multi_dim_access > metrics.single_dim_access / 2 {
        if metrics.multi_dim_access > 10 { 3 } else { 2 }
    } else {
        1
    }
}

fn element_size(source: &str) -> u8 {
    if source.contains("byte[") || source.contains("Byte") {
        1
    } else if source.contains("short[") || source.contains("Short") {
        2
    } else if source.contains("double[") || source.contains("Double") {
        8
    } else {
        4
    }
}

fn access_pattern(metrics: &ArrayMetrics) -> AccessPattern {
    let total = metrics.single_dim_access + metrics.multi_dim_access;
    if total == 0 {
        return AccessPattern::None;
    }
    if metrics.loop_array_access as f64 / total as f64 > 0.7 {
        AccessPattern::Sequential
    } else if metrics.bulk_operations > 3 {
        AccessPattern::Block
    } else {
        AccessPattern::Random
    }
}

fn domain_flags(source: &str) -> BTreeMap<String, bool> {
    let checks: [(&str, &LazyLock<Regex>); 9] = [
        ("vertex_arrays", &VERTEX_ARRAYS),
        ("3d_transforms", &TRANSFORMS_3D),
        ("face_indices", &FACE_INDICES),
        ("pixel_manipulation", &PIXEL_MANIPULATION),
        ("image_dimensions", &IMAGE_DIMENSIONS),
        ("color_operations", &COLOR_OPERATIONS),
        ("tile_grid", &TILE_GRID),
        ("chunk_loading", &CHUNK_LOADING),
        ("heightmap_operations", &HEIGHT_MAP),
    ];
    checks
        .iter()
        .map(|(name, re)| (name.to_string(), re.is_match(source)))
        .collect()
}
