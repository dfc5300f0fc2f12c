//! Address-pattern table for the mixer's feedback dialect.
//!
//! The grammar is owned by the mixer application; this table maps the
//! addresses the bridge cares about onto typed field updates. Anything it
//! does not recognize yields `None` and is ignored upstream, which keeps the
//! bridge forward-compatible with newer mixer versions.

use super::types::PropertyValue;
use crate::osc::FeedbackMessage;

/// A typed field update produced by matching one feedback address.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackUpdate {
    LayerSelected { layer: u32, on: bool },
    ClipSelected { layer: u32, column: u32, on: bool },
    ClipPlaying { layer: u32, column: u32, on: bool },
    ClipName { layer: u32, column: u32, name: String },
    ColumnSelected { column: u32, on: bool },
    ColumnConnected { column: u32, on: bool },
    TempoPlaying { on: bool },
    /// A deck became active. A change of deck invalidates the whole tree.
    DeckSelected { deck: u32 },
    /// Layer-scoped update addressed through `/composition/decks/{n}/layers/...`;
    /// applied only when `deck` is the current one.
    DeckScoped { deck: u32, inner: Box<FeedbackUpdate> },
    LayerProperty { layer: u32, key: String, value: PropertyValue },
    ClipProperty { layer: u32, column: u32, key: String, value: PropertyValue },
    CompositionProperty { key: String, value: PropertyValue },
}

/// Match one feedback message against the dialect table.
pub fn parse_feedback(msg: &FeedbackMessage) -> Option<FeedbackUpdate> {
    let path = msg.addr.strip_prefix("/composition")?;
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    parse_composition(&segments, msg)
}

fn parse_composition(segments: &[&str], msg: &FeedbackMessage) -> Option<FeedbackUpdate> {
    use FeedbackUpdate::*;
    match segments {
        [] => None,
        ["layers", layer, rest @ ..] => parse_layer(entity_id(layer)?, rest, msg),
        ["columns", column, prop] => {
            let column = entity_id(column)?;
            let on = flag(msg)?;
            match *prop {
                "select" | "selected" => Some(ColumnSelected { column, on }),
                "connect" | "connected" => Some(ColumnConnected { column, on }),
                _ => None,
            }
        }
        ["tempocontroller", "play"] => Some(TempoPlaying { on: flag(msg)? }),
        ["decks", deck, rest @ ..] => parse_deck(entity_id(deck)?, rest, msg),
        // Mirrors of the selection, redundant with the per-entity flags.
        ["selectedlayer", ..] | ["selectedclip", ..] | ["selectedcolumn", ..] => None,
        rest => first_value(msg).map(|value| CompositionProperty {
            key: rest.join("/"),
            value,
        }),
    }
}

fn parse_layer(layer: u32, rest: &[&str], msg: &FeedbackMessage) -> Option<FeedbackUpdate> {
    use FeedbackUpdate::*;
    match rest {
        [] => None,
        ["select" | "selected"] => Some(LayerSelected {
            layer,
            on: flag(msg)?,
        }),
        ["clips", clip, clip_rest @ ..] => parse_clip(layer, entity_id(clip)?, clip_rest, msg),
        props => first_value(msg).map(|value| LayerProperty {
            layer,
            key: props.join("/"),
            value,
        }),
    }
}

fn parse_clip(
    layer: u32,
    column: u32,
    rest: &[&str],
    msg: &FeedbackMessage,
) -> Option<FeedbackUpdate> {
    use FeedbackUpdate::*;
    match rest {
        [] => None,
        ["select" | "selected"] => Some(ClipSelected {
            layer,
            column,
            on: flag(msg)?,
        }),
        ["connect" | "connected"] => Some(ClipPlaying {
            layer,
            column,
            on: flag(msg)?,
        }),
        ["name"] => msg.strings.first().map(|name| ClipName {
            layer,
            column,
            name: name.clone(),
        }),
        props => first_value(msg).map(|value| ClipProperty {
            layer,
            column,
            key: props.join("/"),
            value,
        }),
    }
}

fn parse_deck(deck: u32, rest: &[&str], msg: &FeedbackMessage) -> Option<FeedbackUpdate> {
    use FeedbackUpdate::*;
    match rest {
        // Only an asserted selection switches decks.
        ["select" | "selected"] => flag(msg)?.then_some(DeckSelected { deck }),
        ["layers", layer, layer_rest @ ..] => parse_layer(entity_id(layer)?, layer_rest, msg)
            .map(|inner| DeckScoped {
                deck,
                inner: Box::new(inner),
            }),
        _ => None,
    }
}

/// Extract a positive entity id from an address segment, tolerating
/// decorated segments like "layer3".
fn entity_id(segment: &str) -> Option<u32> {
    let digits: String = segment.chars().filter(char::is_ascii_digit).collect();
    digits.parse::<u32>().ok().filter(|id| *id >= 1)
}

/// Boolean flag per the mixer's encoding: first integer (or float) equal to 1.
fn flag(msg: &FeedbackMessage) -> Option<bool> {
    if let Some(i) = msg.ints.first() {
        return Some(*i == 1);
    }
    msg.floats.first().map(|f| *f == 1.0)
}

/// First argument by the dialect's precedence: float, then int, then string.
fn first_value(msg: &FeedbackMessage) -> Option<PropertyValue> {
    if let Some(f) = msg.floats.first() {
        return Some(PropertyValue::Float(*f));
    }
    if let Some(i) = msg.ints.first() {
        return Some(PropertyValue::Int(*i));
    }
    msg.strings.first().map(|s| PropertyValue::Text(s.clone()))
}
