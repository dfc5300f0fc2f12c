//! Control-surface mapping layer.
//!
//! [`SurfaceController`] renders the mirrored state onto the pad matrix on a
//! fixed cadence and turns hardware input into outgoing mixer commands. It
//! never blocks on the mixer: commands are fire-and-forget, and a short-lived
//! optimistic intent keeps a triggered pad lit until authoritative feedback
//! arrives or the intent expires.

pub mod mapping;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::device::{InputEvent, InputKind, PadDevice};
use crate::error::DeviceInitError;
use crate::osc::{CommandSender, CommandValue};
use crate::state::{CellView, StateStore};
use mapping::GridMapping;

// Pad palette (Push-style color indices).
const COLOR_OFF: u8 = 0;
const COLOR_EXISTS: u8 = 10;
const COLOR_PLAYING: u8 = 21;
const COLOR_SELECTED: u8 = 122;

// Navigation and transport buttons (CC numbers).
const BTN_LEFT: u8 = 44;
const BTN_RIGHT: u8 = 45;
const BTN_UP: u8 = 46;
const BTN_DOWN: u8 = 47;
const BTN_PLAY: u8 = 85;

/// Encoder driving the composition master level, and its per-detent step.
const ENCODER_MASTER: u8 = 79;
const MASTER_STEP: f32 = 1.0 / 127.0;

/// How long an optimistic trigger stays lit without a matching connect
/// report.
const OPTIMISTIC_TTL: Duration = Duration::from_millis(250);

pub struct SurfaceController {
    store: StateStore,
    sender: Arc<dyn CommandSender>,
    device: Box<dyn PadDevice>,
    mapping: GridMapping,
    /// Last color written per pad. Cleared by `force_refresh` so the next
    /// tick rewrites every visible cell.
    last_written: HashMap<u8, u8>,
    /// (column, layer) -> (expiry, connect report count at press) of
    /// optimistic local intents.
    optimistic: HashMap<(u32, u32), (Instant, u64)>,
    optimistic_ttl: Duration,
    master_level: f32,
    rendering: bool,
}

impl SurfaceController {
    pub fn new(
        store: StateStore,
        sender: Arc<dyn CommandSender>,
        device: Box<dyn PadDevice>,
        mapping: GridMapping,
    ) -> Self {
        Self {
            store,
            sender,
            device,
            mapping,
            last_written: HashMap::new(),
            optimistic: HashMap::new(),
            optimistic_ttl: OPTIMISTIC_TTL,
            master_level: 1.0,
            rendering: false,
        }
    }

    /// Connect the hardware and enable rendering. On failure the caller may
    /// continue headless: feedback tracking and the command path stay live,
    /// only LED output and hardware input are inactive.
    pub fn initialize(&mut self) -> Result<(), DeviceInitError> {
        self.device.connect()?;
        self.rendering = true;
        if let Err(e) = self.device.clear_all() {
            warn!("could not blank pad matrix: {e}");
        }
        self.force_refresh();
        info!(
            "surface initialized ({}x{} matrix)",
            self.mapping.cols(),
            self.mapping.rows()
        );
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.rendering && self.device.is_connected()
    }

    /// The grid window currently mapped, for display mirroring.
    pub fn mapping(&self) -> &GridMapping {
        &self.mapping
    }

    /// Render one frame: read a single state snapshot, compute the desired
    /// color for every visible cell, and write only the cells that changed
    /// since the last successful write.
    pub fn render_tick(&mut self) {
        if !self.is_active() {
            return;
        }
        self.prune_optimistic();

        // One snapshot for the whole tick; the guard is dropped before any
        // hardware I/O happens.
        let desired: Vec<(u8, u8)> = {
            let tracker = self.store.read();
            let selected_clip = tracker.selected_clip();
            self.mapping
                .visible_cells()
                .map(|(x, y)| {
                    let (column, layer) = self.mapping.coord_at(x, y);
                    let color = color_for(
                        tracker.cell_view(column, layer),
                        self.optimistic.contains_key(&(column, layer)),
                        selected_clip == Some((column, layer)),
                    );
                    (self.mapping.pad_id(x, y), color)
                })
                .collect()
        };

        let mut writes = 0usize;
        for (pad, color) in desired {
            if self.last_written.get(&pad) == Some(&color) {
                continue;
            }
            match self.device.write_cell(pad, color) {
                Ok(()) => {
                    self.last_written.insert(pad, color);
                    writes += 1;
                }
                // Cache stays stale so the cell is retried next tick.
                Err(e) => warn!("skipping LED write for pad {pad}: {e}"),
            }
        }
        if writes > 0 {
            trace!(writes, "render tick");
        }
    }

    /// Map one hardware event to a logical action and emit the command.
    /// Never consults local state to decide whether to send: the mixer is
    /// authoritative and the protocol is fire-and-forget.
    pub fn handle_input(&mut self, event: &InputEvent) {
        match event.kind {
            InputKind::Pad => {
                if event.value == 0 {
                    return;
                }
                let Some((column, layer)) = self.mapping.coord_for_pad(event.id) else {
                    return;
                };
                debug!("pad {} -> trigger clip ({column},{layer})", event.id);
                self.sender.send(
                    &format!("/composition/layers/{layer}/clips/{column}/connect"),
                    CommandValue::Int(1),
                );
                let seq = self.store.read().clip_connect_seq(column, layer);
                self.optimistic
                    .insert((column, layer), (Instant::now() + self.optimistic_ttl, seq));
            }
            InputKind::Encoder => {
                if event.id != ENCODER_MASTER {
                    trace!("unmapped encoder {}", event.id);
                    return;
                }
                let delta = relative_delta(event.value);
                self.master_level =
                    (self.master_level + delta as f32 * MASTER_STEP).clamp(0.0, 1.0);
                self.sender
                    .send("/composition/master", CommandValue::Float(self.master_level));
            }
            InputKind::Button => {
                if event.value == 0 {
                    return;
                }
                match event.id {
                    BTN_LEFT => self.scroll(-1, 0),
                    BTN_RIGHT => self.scroll(1, 0),
                    BTN_UP => self.scroll(0, 1),
                    BTN_DOWN => self.scroll(0, -1),
                    BTN_PLAY => {
                        let playing = self.store.tempo_playing();
                        self.sender.send(
                            "/composition/tempocontroller/play",
                            CommandValue::Int(i32::from(!playing)),
                        );
                    }
                    other => trace!("unmapped button {other}"),
                }
            }
        }
    }

    /// Invalidate the per-cell cache; the next tick rewrites every visible
    /// cell. Used after reconnect or suspected desync.
    pub fn force_refresh(&mut self) {
        self.last_written.clear();
    }

    /// Blank the surface and release the hardware handle.
    pub fn shutdown(&mut self) {
        if self.is_active() {
            if let Err(e) = self.device.clear_all() {
                debug!("could not blank pad matrix on shutdown: {e}");
            }
        }
        self.device.disconnect();
        self.rendering = false;
    }

    fn scroll(&mut self, dx: i32, dy: i32) {
        self.mapping.scroll(dx, dy);
        debug!("scrolled grid window by ({dx},{dy})");
        // Every visible coordinate changed meaning.
        self.force_refresh();
    }

    /// Drop optimistic intents that expired or that got a connect report for
    /// their cell. Confirmation and rejection both hand the cell back to the
    /// mirrored state.
    fn prune_optimistic(&mut self) {
        if self.optimistic.is_empty() {
            return;
        }
        let now = Instant::now();
        let tracker = self.store.read();
        self.optimistic.retain(|&(column, layer), &mut (expiry, seq)| {
            expiry > now && tracker.clip_connect_seq(column, layer) == seq
        });
    }

    #[cfg(test)]
    fn set_optimistic_ttl(&mut self, ttl: Duration) {
        self.optimistic_ttl = ttl;
    }
}

fn color_for(view: CellView, optimistic: bool, selected: bool) -> u8 {
    if selected {
        return COLOR_SELECTED;
    }
    if optimistic || view == CellView::Playing {
        return COLOR_PLAYING;
    }
    match view {
        CellView::Exists => COLOR_EXISTS,
        _ => COLOR_OFF,
    }
}

/// Two's-complement relative encoder value: 1..63 clockwise, 127..65 counter.
fn relative_delta(value: u8) -> i32 {
    if value < 64 {
        i32::from(value)
    } else {
        i32::from(value) - 128
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::FeedbackMessage;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Shared {
        writes: Mutex<Vec<(u8, u8)>>,
        sent: Mutex<Vec<(String, CommandValue)>>,
    }

    struct FakeDevice {
        shared: Arc<Shared>,
        connected: bool,
        fail_connect: bool,
    }

    impl PadDevice for FakeDevice {
        fn connect(&mut self) -> Result<(), DeviceInitError> {
            if self.fail_connect {
                return Err(DeviceInitError::PortNotFound("fake".to_string()));
            }
            self.connected = true;
            Ok(())
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn write_cell(&mut self, pad: u8, color: u8) -> Result<(), crate::error::TransportError> {
            self.shared.writes.lock().push((pad, color));
            Ok(())
        }
    }

    struct FakeSender {
        shared: Arc<Shared>,
    }

    impl CommandSender for FakeSender {
        fn send(&self, addr: &str, value: CommandValue) {
            self.shared.sent.lock().push((addr.to_string(), value));
        }
    }

    fn make_surface(fail_connect: bool) -> (SurfaceController, StateStore, Arc<Shared>) {
        let shared = Arc::new(Shared::default());
        let store = StateStore::new();
        let device = Box::new(FakeDevice {
            shared: shared.clone(),
            connected: false,
            fail_connect,
        });
        let sender = Arc::new(FakeSender {
            shared: shared.clone(),
        });
        let surface = SurfaceController::new(store.clone(), sender, device, GridMapping::new(8, 8));
        (surface, store, shared)
    }

    fn apply_int(store: &StateStore, addr: &str, value: i32) {
        store.apply(&FeedbackMessage {
            addr: addr.to_string(),
            ints: vec![value],
            ..Default::default()
        });
    }

    fn apply_name(store: &StateStore, layer: u32, column: u32, name: &str) {
        store.apply(&FeedbackMessage {
            addr: format!("/composition/layers/{layer}/clips/{column}/name"),
            strings: vec![name.to_string()],
            ..Default::default()
        });
    }

    fn pad_press(surface: &mut SurfaceController, pad: u8) {
        surface.handle_input(&InputEvent {
            kind: InputKind::Pad,
            id: pad,
            value: 100,
        });
    }

    fn take_writes(shared: &Shared) -> Vec<(u8, u8)> {
        std::mem::take(&mut *shared.writes.lock())
    }

    #[test]
    fn first_tick_writes_every_visible_cell_once() {
        let (mut surface, _store, shared) = make_surface(false);
        surface.initialize().unwrap();
        take_writes(&shared); // discard the initialize blanking

        surface.render_tick();
        let writes = take_writes(&shared);
        assert_eq!(writes.len(), 64);
        let mut pads: Vec<u8> = writes.iter().map(|(p, _)| *p).collect();
        pads.sort_unstable();
        pads.dedup();
        assert_eq!(pads.len(), 64);

        // No state change: the next tick writes nothing.
        surface.render_tick();
        assert!(take_writes(&shared).is_empty());
    }

    #[test]
    fn force_refresh_rewrites_unchanged_cells() {
        let (mut surface, _store, shared) = make_surface(false);
        surface.initialize().unwrap();
        surface.render_tick();
        take_writes(&shared);

        surface.force_refresh();
        surface.render_tick();
        assert_eq!(take_writes(&shared).len(), 64);
    }

    #[test]
    fn render_policy_maps_state_to_colors() {
        let (mut surface, store, shared) = make_surface(false);
        surface.initialize().unwrap();
        apply_name(&store, 1, 1, "intro");
        apply_int(&store, "/composition/layers/1/clips/1/connect", 1);
        apply_name(&store, 1, 2, "verse");
        apply_int(&store, "/composition/layers/2/clips/3/selected", 1);
        take_writes(&shared);

        surface.render_tick();
        let writes: HashMap<u8, u8> = take_writes(&shared).into_iter().collect();

        // (1,1) bottom-left pad 36: playing. (2,1) pad 37: exists.
        assert_eq!(writes[&36], COLOR_PLAYING);
        assert_eq!(writes[&37], COLOR_EXISTS);
        // (3,2) pad 36+8+2: selected overlay wins.
        assert_eq!(writes[&46], COLOR_SELECTED);
        // Untouched cell renders off.
        assert_eq!(writes[&99], COLOR_OFF);
    }

    #[test]
    fn changed_cells_are_the_only_writes_after_feedback() {
        let (mut surface, store, shared) = make_surface(false);
        surface.initialize().unwrap();
        surface.render_tick();
        take_writes(&shared);

        apply_name(&store, 3, 5, "loop");
        surface.render_tick();
        let writes = take_writes(&shared);
        // (5,3) -> x=4, y=2 -> pad 36 + 2*8 + 4.
        assert_eq!(writes, vec![(56, COLOR_EXISTS)]);
    }

    #[test]
    fn pad_press_emits_trigger_even_for_unknown_clip() {
        let (mut surface, _store, shared) = make_surface(true);
        // Device init failed; the command path must still work.
        assert!(surface.initialize().is_err());

        // Pad for (column=4, layer=2): x=3, y=1 -> 36 + 8 + 3.
        pad_press(&mut surface, 47);
        let sent = std::mem::take(&mut *shared.sent.lock());
        assert_eq!(
            sent,
            vec![(
                "/composition/layers/2/clips/4/connect".to_string(),
                CommandValue::Int(1)
            )]
        );

        // And rendering stays inactive.
        surface.render_tick();
        assert!(take_writes(&shared).is_empty());
    }

    #[test]
    fn optimistic_trigger_lights_then_expires() {
        let (mut surface, _store, shared) = make_surface(false);
        surface.initialize().unwrap();
        surface.set_optimistic_ttl(Duration::from_millis(30));
        surface.render_tick();
        take_writes(&shared);

        pad_press(&mut surface, 36);
        surface.render_tick();
        assert_eq!(take_writes(&shared), vec![(36, COLOR_PLAYING)]);

        // Feedback never arrives; the intent times out and the pad goes dark.
        std::thread::sleep(Duration::from_millis(60));
        surface.render_tick();
        assert_eq!(take_writes(&shared), vec![(36, COLOR_OFF)]);
    }

    #[test]
    fn matching_feedback_replaces_the_optimistic_intent() {
        let (mut surface, store, shared) = make_surface(false);
        surface.initialize().unwrap();
        surface.render_tick();
        take_writes(&shared);

        pad_press(&mut surface, 36);
        apply_int(&store, "/composition/layers/1/clips/1/connect", 1);
        surface.render_tick();
        assert_eq!(take_writes(&shared), vec![(36, COLOR_PLAYING)]);
        assert!(surface.optimistic.is_empty());

        // Still lit on the next tick, now from authoritative state.
        surface.render_tick();
        assert!(take_writes(&shared).is_empty());
    }

    #[test]
    fn rejected_trigger_goes_dark_before_the_ttl() {
        let (mut surface, store, shared) = make_surface(false);
        surface.initialize().unwrap();
        surface.render_tick();
        take_writes(&shared);

        pad_press(&mut surface, 36);
        surface.render_tick();
        assert_eq!(take_writes(&shared), vec![(36, COLOR_PLAYING)]);

        // The mixer answers with off; the pad follows mirrored state without
        // waiting for the timeout.
        apply_int(&store, "/composition/layers/1/clips/1/connect", 0);
        surface.render_tick();
        assert_eq!(take_writes(&shared), vec![(36, COLOR_OFF)]);
        assert!(surface.optimistic.is_empty());
    }

    #[test]
    fn navigation_scrolls_input_and_render_coordinates() {
        let (mut surface, _store, shared) = make_surface(false);
        surface.initialize().unwrap();
        surface.render_tick();
        take_writes(&shared);

        surface.handle_input(&InputEvent {
            kind: InputKind::Button,
            id: BTN_RIGHT,
            value: 127,
        });

        // The window moved one column: pad 36 now triggers column 2.
        pad_press(&mut surface, 36);
        let sent = std::mem::take(&mut *shared.sent.lock());
        assert_eq!(sent[0].0, "/composition/layers/1/clips/2/connect");

        // Scroll invalidates the cache: the whole frame is rewritten.
        surface.render_tick();
        assert_eq!(take_writes(&shared).len(), 64);
    }

    #[test]
    fn master_encoder_accumulates_and_clamps() {
        let (mut surface, _store, shared) = make_surface(false);
        surface.initialize().unwrap();

        // Two detents down from full level.
        surface.handle_input(&InputEvent {
            kind: InputKind::Encoder,
            id: ENCODER_MASTER,
            value: 127, // -1
        });
        surface.handle_input(&InputEvent {
            kind: InputKind::Encoder,
            id: ENCODER_MASTER,
            value: 127,
        });
        // A large clockwise turn clamps back at 1.0.
        surface.handle_input(&InputEvent {
            kind: InputKind::Encoder,
            id: ENCODER_MASTER,
            value: 10,
        });

        let sent = std::mem::take(&mut *shared.sent.lock());
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|(addr, _)| addr == "/composition/master"));
        match (&sent[0].1, &sent[1].1, &sent[2].1) {
            (CommandValue::Float(a), CommandValue::Float(b), CommandValue::Float(c)) => {
                assert!(a > b);
                assert_eq!(*c, 1.0);
            }
            other => panic!("unexpected command values: {other:?}"),
        }
    }

    #[test]
    fn play_button_toggles_against_mirrored_transport() {
        let (mut surface, store, shared) = make_surface(false);
        surface.initialize().unwrap();

        surface.handle_input(&InputEvent {
            kind: InputKind::Button,
            id: BTN_PLAY,
            value: 127,
        });
        apply_int(&store, "/composition/tempocontroller/play", 1);
        surface.handle_input(&InputEvent {
            kind: InputKind::Button,
            id: BTN_PLAY,
            value: 127,
        });

        let sent = std::mem::take(&mut *shared.sent.lock());
        assert_eq!(
            sent,
            vec![
                (
                    "/composition/tempocontroller/play".to_string(),
                    CommandValue::Int(1)
                ),
                (
                    "/composition/tempocontroller/play".to_string(),
                    CommandValue::Int(0)
                ),
            ]
        );
    }

    #[test]
    fn releases_are_ignored() {
        let (mut surface, _store, shared) = make_surface(false);
        surface.initialize().unwrap();

        surface.handle_input(&InputEvent {
            kind: InputKind::Pad,
            id: 36,
            value: 0,
        });
        surface.handle_input(&InputEvent {
            kind: InputKind::Button,
            id: BTN_RIGHT,
            value: 0,
        });
        assert!(shared.sent.lock().is_empty());
        assert!(surface.mapping.coord_at(0, 0) == (1, 1));
    }
}
