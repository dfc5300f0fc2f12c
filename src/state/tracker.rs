//! The mirrored composition tree.
//!
//! `CompositionTracker` is a plain data structure; all locking lives in
//! [`super::StateStore`]. The tree starts empty and gains entries only as
//! feedback references them, so queries about unseen entities return the
//! absent/none default rather than an error.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use tracing::debug;

use super::feedback::FeedbackUpdate;
use super::types::{CellView, ClipState, LayerState, PropertyMap, PropertyValue, Selection};

#[derive(Debug, Default)]
pub struct CompositionTracker {
    /// Keyed by layer id; BTreeMap keeps dumps ordered by ascending layer.
    layers: BTreeMap<u32, LayerState>,
    selection: Selection,
    connected_column: Option<u32>,
    tempo_playing: bool,
    current_deck: Option<u32>,
    properties: PropertyMap,
}

impl CompositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one matched field update. Called with the write lock held; the
    /// whole update is visible to readers atomically.
    pub fn apply_update(&mut self, update: FeedbackUpdate) {
        use FeedbackUpdate::*;
        match update {
            LayerSelected { layer, on } => self.set_layer_selected(layer, on),
            ClipSelected { layer, column, on } => self.set_clip_selected(layer, column, on),
            ClipPlaying { layer, column, on } => self.set_clip_playing(layer, column, on),
            ClipName {
                layer,
                column,
                name,
            } => {
                let clip = self.clip_mut(layer, column);
                clip.exists = !name.is_empty();
                clip.name = if name.is_empty() { None } else { Some(name) };
            }
            ColumnSelected { column, on } => {
                if on {
                    self.selection.column = Some(column);
                } else if self.selection.column == Some(column) {
                    self.selection.column = None;
                }
            }
            ColumnConnected { column, on } => {
                if on {
                    self.connected_column = Some(column);
                } else if self.connected_column == Some(column) {
                    self.connected_column = None;
                }
            }
            TempoPlaying { on } => self.tempo_playing = on,
            DeckSelected { deck } => self.switch_deck(deck),
            DeckScoped { deck, inner } => match self.current_deck {
                // First deck reference wins when nothing is initialized yet.
                None => {
                    self.current_deck = Some(deck);
                    self.apply_update(*inner);
                }
                Some(current) if current == deck => self.apply_update(*inner),
                Some(_) => {}
            },
            LayerProperty { layer, key, value } => {
                self.layer_mut(layer).properties.insert(key, value);
            }
            ClipProperty {
                layer,
                column,
                key,
                value,
            } => {
                self.clip_mut(layer, column).properties.insert(key, value);
            }
            CompositionProperty { key, value } => {
                self.properties.insert(key, value);
            }
        }
    }

    /// Discard every entity. Readers after this observe an empty tree.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn switch_deck(&mut self, deck: u32) {
        match self.current_deck {
            Some(current) if current != deck => {
                debug!("deck changed {current} -> {deck}, clearing mirrored state");
                self.reset();
                self.current_deck = Some(deck);
            }
            _ => self.current_deck = Some(deck),
        }
    }

    fn layer_mut(&mut self, layer: u32) -> &mut LayerState {
        self.layers.entry(layer).or_default()
    }

    fn clip_mut(&mut self, layer: u32, column: u32) -> &mut ClipState {
        self.layer_mut(layer).clips.entry(column).or_default()
    }

    fn set_layer_selected(&mut self, layer: u32, on: bool) {
        if on {
            if let Some(previous) = self.selection.layer.filter(|p| *p != layer) {
                if let Some(l) = self.layers.get_mut(&previous) {
                    l.selected = false;
                }
            }
            self.layer_mut(layer).selected = true;
            self.selection.layer = Some(layer);
        } else {
            if let Some(l) = self.layers.get_mut(&layer) {
                l.selected = false;
            }
            if self.selection.layer == Some(layer) {
                self.selection.layer = None;
            }
        }
    }

    fn set_clip_selected(&mut self, layer: u32, column: u32, on: bool) {
        if on {
            if let Some((prev_col, prev_layer)) = self.selection.clip.filter(|p| *p != (column, layer))
            {
                if let Some(clip) = self
                    .layers
                    .get_mut(&prev_layer)
                    .and_then(|l| l.clips.get_mut(&prev_col))
                {
                    clip.selected = false;
                }
            }
            self.clip_mut(layer, column).selected = true;
            self.selection.clip = Some((column, layer));
        } else {
            if let Some(clip) = self
                .layers
                .get_mut(&layer)
                .and_then(|l| l.clips.get_mut(&column))
            {
                clip.selected = false;
            }
            if self.selection.clip == Some((column, layer)) {
                self.selection.clip = None;
            }
        }
    }

    /// A layer holds at most one playing clip: asserting a new one clears the
    /// previous. The clearing is driven entirely by the feedback stream.
    fn set_clip_playing(&mut self, layer: u32, column: u32, on: bool) {
        let layer_state = self.layer_mut(layer);
        if on {
            for (col, clip) in layer_state.clips.iter_mut() {
                clip.playing = *col == column;
            }
        }
        let clip = layer_state.clips.entry(column).or_default();
        clip.playing = on;
        clip.connect_seq += 1;
    }

    // --- queries -----------------------------------------------------------

    fn clip(&self, column: u32, layer: u32) -> Option<&ClipState> {
        self.layers.get(&layer).and_then(|l| l.clips.get(&column))
    }

    pub fn clip_exists(&self, column: u32, layer: u32) -> bool {
        self.clip(column, layer).is_some_and(|c| c.exists)
    }

    pub fn clip_playing(&self, column: u32, layer: u32) -> bool {
        self.clip(column, layer).is_some_and(|c| c.playing)
    }

    pub fn clip_name(&self, column: u32, layer: u32) -> Option<&str> {
        self.clip(column, layer).and_then(|c| c.name.as_deref())
    }

    /// Count of connect reports seen for a cell, 0 for unseen cells.
    pub fn clip_connect_seq(&self, column: u32, layer: u32) -> u64 {
        self.clip(column, layer).map_or(0, |c| c.connect_seq)
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn selected_layer(&self) -> Option<u32> {
        self.selection.layer
    }

    /// (column, layer) of the selected clip.
    pub fn selected_clip(&self) -> Option<(u32, u32)> {
        self.selection.clip
    }

    pub fn selected_column(&self) -> Option<u32> {
        self.selection.column
    }

    pub fn connected_column(&self) -> Option<u32> {
        self.connected_column
    }

    pub fn tempo_playing(&self) -> bool {
        self.tempo_playing
    }

    pub fn current_deck(&self) -> Option<u32> {
        self.current_deck
    }

    /// Display value of one cell, before any selection overlay.
    pub fn cell_view(&self, column: u32, layer: u32) -> CellView {
        match self.clip(column, layer) {
            Some(c) if c.playing => CellView::Playing,
            Some(c) if c.exists => CellView::Exists,
            _ => CellView::Absent,
        }
    }

    /// Depth-first diagnostic dump, ascending layer id then column id.
    pub fn dump_tree(&self) -> String {
        let mut out = String::new();
        let fmt_id = |id: Option<u32>| id.map_or("none".to_string(), |v| v.to_string());

        let _ = writeln!(out, "composition");
        let _ = writeln!(out, "  deck: {}", fmt_id(self.current_deck));
        let _ = writeln!(
            out,
            "  tempo playing: {}",
            if self.tempo_playing { "yes" } else { "no" }
        );
        let _ = writeln!(
            out,
            "  selection: layer={} clip={} column={} connected-column={}",
            fmt_id(self.selection.layer),
            self.selection
                .clip
                .map_or("none".to_string(), |(c, l)| format!("({c},{l})")),
            fmt_id(self.selection.column),
            fmt_id(self.connected_column),
        );
        Self::dump_properties(&mut out, &self.properties, "  ");

        for (id, layer) in &self.layers {
            let marker = if layer.selected { " [selected]" } else { "" };
            let _ = writeln!(out, "  layer {id}{marker}");
            Self::dump_properties(&mut out, &layer.properties, "    ");
            for (col, clip) in &layer.clips {
                let mut flags = String::new();
                if clip.playing {
                    flags.push_str(" [playing]");
                }
                if clip.selected {
                    flags.push_str(" [selected]");
                }
                let name = clip
                    .name
                    .as_deref()
                    .map(|n| format!(" \"{n}\""))
                    .unwrap_or_default();
                let _ = writeln!(out, "    clip {col}{name}{flags}");
                Self::dump_properties(&mut out, &clip.properties, "      ");
            }
        }
        out
    }

    fn dump_properties(out: &mut String, properties: &PropertyMap, indent: &str) {
        for (key, value) in properties {
            let _ = writeln!(out, "{indent}{key} = {value} ({})", value.type_name());
        }
    }

    #[cfg(test)]
    pub(crate) fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}
