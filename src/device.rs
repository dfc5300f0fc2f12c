//! Pad controller driver.
//!
//! Handles MIDI communication with a Push-style 8x8 grid controller: decoded
//! input events flow out through a bounded channel, LED writes go straight to
//! the output port. The rest of the bridge only sees the [`PadDevice`] trait
//! and [`InputEvent`] values.

use anyhow::{Context, Result};
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::error::{DeviceInitError, TransportError};

/// Note number of the bottom-left pad.
pub const FIRST_PAD_NOTE: u8 = 36;
/// Note number of the top-right pad.
pub const LAST_PAD_NOTE: u8 = 99;
/// CC range of the top-row encoders.
pub const ENCODER_CC_FIRST: u8 = 71;
pub const ENCODER_CC_LAST: u8 = 79;

/// Depth of the input event queue. The MIDI callback never blocks: events
/// beyond this depth are dropped.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Kind of physical control an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pad,
    Encoder,
    Button,
}

/// One decoded hardware input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: InputKind,
    /// Note number for pads, CC number for encoders and buttons.
    pub id: u8,
    /// Velocity for pads (0 = release), relative delta for encoders,
    /// 127/0 press/release for buttons.
    pub value: u8,
}

/// Decode a raw MIDI message from the controller into an [`InputEvent`].
pub fn decode_event(raw: &[u8]) -> Option<InputEvent> {
    if raw.len() < 3 {
        return None;
    }
    let (status, d1, d2) = (raw[0] & 0xF0, raw[1], raw[2]);
    match status {
        0x90 | 0x80 => {
            let value = if status == 0x80 { 0 } else { d2 };
            let kind = if (FIRST_PAD_NOTE..=LAST_PAD_NOTE).contains(&d1) {
                InputKind::Pad
            } else {
                InputKind::Button
            };
            Some(InputEvent { kind, id: d1, value })
        }
        0xB0 => {
            let kind = if (ENCODER_CC_FIRST..=ENCODER_CC_LAST).contains(&d1) {
                InputKind::Encoder
            } else {
                InputKind::Button
            };
            Some(InputEvent { kind, id: d1, value: d2 })
        }
        _ => None,
    }
}

/// Hardware output surface. Writes are best-effort; callers log and skip
/// failures rather than stopping the render loop.
pub trait PadDevice: Send {
    fn connect(&mut self) -> Result<(), DeviceInitError>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    fn write_cell(&mut self, pad: u8, color: u8) -> Result<(), TransportError>;

    /// Blank the whole pad matrix.
    fn clear_all(&mut self) -> Result<(), TransportError> {
        for pad in FIRST_PAD_NOTE..=LAST_PAD_NOTE {
            self.write_cell(pad, 0)?;
        }
        Ok(())
    }
}

/// midir-backed pad controller.
pub struct MidiPadDevice {
    input_conn: Option<MidiInputConnection<()>>,
    output_conn: Option<MidiOutputConnection>,
    event_tx: mpsc::Sender<InputEvent>,
    event_rx: Option<mpsc::Receiver<InputEvent>>,
    port_name: String,
}

impl MidiPadDevice {
    /// Create an unconnected driver matching MIDI ports whose name contains
    /// `port_name` (case-insensitive).
    pub fn new(port_name: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        Self {
            input_conn: None,
            output_conn: None,
            event_tx,
            event_rx: Some(event_rx),
            port_name: port_name.into(),
        }
    }

    /// Take the event receiver (consumed by the orchestrator's event loop).
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<InputEvent>> {
        self.event_rx.take()
    }

    fn find_input_port(
        midi_in: &MidiInput,
        pattern: &str,
    ) -> Option<(midir::MidiInputPort, String)> {
        for port in midi_in.ports() {
            if let Ok(name) = midi_in.port_name(&port) {
                if name.to_lowercase().contains(&pattern.to_lowercase()) {
                    return Some((port, name));
                }
            }
        }
        None
    }

    fn find_output_port(
        midi_out: &MidiOutput,
        pattern: &str,
    ) -> Option<(midir::MidiOutputPort, String)> {
        for port in midi_out.ports() {
            if let Ok(name) = midi_out.port_name(&port) {
                if name.to_lowercase().contains(&pattern.to_lowercase()) {
                    return Some((port, name));
                }
            }
        }
        None
    }
}

impl PadDevice for MidiPadDevice {
    fn connect(&mut self) -> Result<(), DeviceInitError> {
        self.disconnect();

        let midi_in =
            MidiInput::new("padbridge-in").map_err(|e| DeviceInitError::Midi(e.to_string()))?;
        let (in_port, in_name) = Self::find_input_port(&midi_in, &self.port_name)
            .ok_or_else(|| DeviceInitError::PortNotFound(self.port_name.clone()))?;
        info!("connecting to controller input '{in_name}'");

        let event_tx = self.event_tx.clone();
        let input_conn = midi_in
            .connect(
                &in_port,
                "padbridge",
                move |_ts, raw, _| {
                    if let Some(event) = decode_event(raw) {
                        // Post and return; a full queue drops the event so the
                        // MIDI callback never blocks on the consumer.
                        if event_tx.try_send(event).is_err() {
                            trace!(?event, "input queue full, dropping event");
                        }
                    }
                },
                (),
            )
            .map_err(|e| DeviceInitError::Midi(e.to_string()))?;

        let midi_out =
            MidiOutput::new("padbridge-out").map_err(|e| DeviceInitError::Midi(e.to_string()))?;
        let (out_port, out_name) = Self::find_output_port(&midi_out, &self.port_name)
            .ok_or_else(|| DeviceInitError::PortNotFound(self.port_name.clone()))?;
        info!("connecting to controller output '{out_name}'");

        let output_conn = midi_out
            .connect(&out_port, "padbridge")
            .map_err(|e| DeviceInitError::Midi(e.to_string()))?;

        self.input_conn = Some(input_conn);
        self.output_conn = Some(output_conn);
        info!("controller connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        let was_connected = self.is_connected();
        self.input_conn = None;
        self.output_conn = None;
        if was_connected {
            debug!("controller disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.input_conn.is_some() && self.output_conn.is_some()
    }

    fn write_cell(&mut self, pad: u8, color: u8) -> Result<(), TransportError> {
        let conn = self
            .output_conn
            .as_mut()
            .ok_or_else(|| TransportError::Midi("not connected".to_string()))?;
        conn.send(&[0x90, pad, color])
            .map_err(|e| TransportError::Midi(e.to_string()))
    }
}

/// Print available MIDI ports (for `--list-ports`).
pub fn print_ports() -> Result<()> {
    let midi_in = MidiInput::new("padbridge-scan").context("creating MIDI input")?;
    println!("MIDI input ports:");
    for port in midi_in.ports() {
        if let Ok(name) = midi_in.port_name(&port) {
            println!("  {name}");
        }
    }

    let midi_out = MidiOutput::new("padbridge-scan").context("creating MIDI output")?;
    println!("MIDI output ports:");
    for port in midi_out.ports() {
        if let Ok(name) = midi_out.port_name(&port) {
            println!("  {name}");
        }
    }
    Ok(())
}
