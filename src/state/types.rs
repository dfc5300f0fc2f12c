//! Mirrored composition tree types.

use std::collections::BTreeMap;

/// A single typed value carried by a feedback message.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Float(f32),
    Int(i32),
    Text(String),
}

impl PropertyValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Float(_) => "float",
            PropertyValue::Int(_) => "int",
            PropertyValue::Text(_) => "string",
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Text(v) => write!(f, "\"{v}\""),
        }
    }
}

/// Untyped per-entity property bag for fields the dialect table does not map
/// to a dedicated flag. Kept only for the diagnostic tree dump.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// One clip slot, created lazily the first time feedback references it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipState {
    pub name: Option<String>,
    /// True once the mixer reported content for this slot (a non-empty name).
    pub exists: bool,
    pub playing: bool,
    pub selected: bool,
    /// Count of connect reports seen for this slot, redundant ones included.
    /// Lets the surface tell "no answer yet" from "answered with off".
    pub connect_seq: u64,
    pub properties: PropertyMap,
}

/// One layer, holding at most one playing clip at a time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerState {
    pub selected: bool,
    /// Keyed by column id; BTreeMap keeps dumps ordered by ascending column.
    pub clips: BTreeMap<u32, ClipState>,
    pub properties: PropertyMap,
}

/// Current selection. Every field defaults to an explicit "none".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub layer: Option<u32>,
    /// (column, layer) of the selected clip.
    pub clip: Option<(u32, u32)>,
    pub column: Option<u32>,
}

/// Display value of one grid cell, derived from the mirrored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellView {
    Absent,
    Exists,
    Playing,
}
