//! Interactive console.
//!
//! A small REPL for inspecting the mirrored state while the bridge runs.
//! Line editing happens on a dedicated OS thread because rustyline blocks;
//! parsed commands cross into the async loop over a channel, same as
//! hardware input events.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tracing::debug;

use crate::state::{CellView, StateStore};
use crate::surface::mapping::GridMapping;

const PROMPT: &str = "padbridge> ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Print the clip grid around the current window.
    Grid,
    /// Print the full mirrored tree.
    Dump,
    /// Print connection and selection summary.
    Status,
    /// Drop all mirrored state.
    Reset,
    /// Rewrite every LED on the next tick.
    Refresh,
    Help,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "" => None,
            "grid" | "g" => Some(Self::Grid),
            "dump" | "d" => Some(Self::Dump),
            "status" | "s" => Some(Self::Status),
            "reset" => Some(Self::Reset),
            "refresh" | "r" => Some(Self::Refresh),
            "help" | "h" | "?" => Some(Self::Help),
            "quit" | "exit" | "q" => Some(Self::Quit),
            other => {
                println!("unknown command '{other}' (try 'help')");
                None
            }
        }
    }
}

/// Start the REPL thread. Commands arrive on the returned receiver; the
/// thread ends when it sends [`ConsoleCommand::Quit`] or the receiver is
/// dropped.
pub fn spawn_repl() -> mpsc::Receiver<ConsoleCommand> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                debug!("console unavailable: {e}");
                return;
            }
        };
        loop {
            match rl.readline(PROMPT) {
                Ok(line) => {
                    let _ = rl.add_history_entry(&line);
                    let Some(cmd) = ConsoleCommand::parse(&line) else {
                        continue;
                    };
                    let quit = cmd == ConsoleCommand::Quit;
                    if tx.blocking_send(cmd).is_err() || quit {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    let _ = tx.blocking_send(ConsoleCommand::Quit);
                    break;
                }
                Err(e) => {
                    debug!("console read error: {e}");
                    break;
                }
            }
        }
    });
    rx
}

pub fn print_help() {
    println!("commands:");
    println!("  grid     show the clip grid for the current window (O playing, X exists)");
    println!("  dump     show the full mirrored composition tree");
    println!("  status   show connection, deck and selection summary");
    println!("  reset    drop all mirrored state");
    println!("  refresh  rewrite every LED on the next tick");
    println!("  quit     shut down");
}

/// Text rendering of the grid window: one row per layer, lowest layer first.
pub fn render_grid(store: &StateStore, mapping: &GridMapping) -> String {
    let mut out = String::new();
    let tracker = store.read();
    for y in 0..mapping.rows() {
        let (_, layer) = mapping.coord_at(0, y);
        out.push_str(&format!("layer {layer:>3} |"));
        for x in 0..mapping.cols() {
            let (column, layer) = mapping.coord_at(x, y);
            let glyph = match tracker.cell_view(column, layer) {
                CellView::Playing => 'O',
                CellView::Exists => 'X',
                CellView::Absent => '_',
            };
            out.push(' ');
            out.push(glyph);
        }
        out.push('\n');
    }
    out.push_str("           ");
    for x in 0..mapping.cols() {
        let (column, _) = mapping.coord_at(x, 0);
        out.push_str(&format!("{column:>2}"));
    }
    out.push('\n');
    out
}

fn yes_no(on: bool) -> colored::ColoredString {
    if on {
        "yes".green()
    } else {
        "no".dimmed()
    }
}

pub fn print_status(store: &StateStore, surface_active: bool) {
    let tracker = store.read();
    let fmt_id = |id: Option<u32>| id.map_or("none".to_string(), |v| v.to_string());

    println!("{}: {}", "surface".bold(), yes_no(surface_active));
    println!("{}: {}", "deck".bold(), fmt_id(tracker.current_deck()));
    println!(
        "{}: {}",
        "tempo playing".bold(),
        yes_no(tracker.tempo_playing())
    );
    let selection = tracker.selection();
    println!(
        "{}: layer={} clip={} column={} connected-column={}",
        "selection".bold(),
        fmt_id(selection.layer),
        selection
            .clip
            .map_or("none".to_string(), |(c, l)| format!("({c},{l})")),
        fmt_id(selection.column),
        fmt_id(tracker.connected_column()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::FeedbackMessage;

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

    #[test]
    fn commands_parse_with_aliases() {
        assert_eq!(ConsoleCommand::parse("grid"), Some(ConsoleCommand::Grid));
        assert_eq!(ConsoleCommand::parse(" g "), Some(ConsoleCommand::Grid));
        assert_eq!(ConsoleCommand::parse("exit"), Some(ConsoleCommand::Quit));
        assert_eq!(ConsoleCommand::parse(""), None);
        assert_eq!(ConsoleCommand::parse("bogus"), None);
    }

    #[test]
    fn grid_renders_playing_exists_and_absent() {
        let store = StateStore::new();
        apply_name(&store, 1, 1, "intro");
        apply_int(&store, "/composition/layers/1/clips/1/connect", 1);
        apply_name(&store, 1, 2, "verse");

        let grid = render_grid(&store, &GridMapping::new(4, 2));
        let lines: Vec<&str> = grid.lines().collect();
        // Layer 1 is the first row; its glyphs come first.
        assert_eq!(lines[0], "layer   1 | O X _ _");
        assert_eq!(lines[1], "layer   2 | _ _ _ _");
        assert_eq!(lines[2], "            1 2 3 4");
    }

    #[test]
    fn grid_follows_the_scroll_window() {
        let store = StateStore::new();
        apply_name(&store, 3, 5, "loop");
        let mut mapping = GridMapping::new(4, 2);
        mapping.scroll(4, 2);

        let grid = render_grid(&store, &mapping);
        let lines: Vec<&str> = grid.lines().collect();
        assert_eq!(lines[0], "layer   3 | X _ _ _");
        assert_eq!(lines[1], "layer   4 | _ _ _ _");
        assert_eq!(lines[2], "            5 6 7 8");
    }

    #[test]
    fn column_labels_survive_two_digits() {
        let store = StateStore::new();
        let mut mapping = GridMapping::new(4, 2);
        mapping.scroll(8, 0);

        let grid = render_grid(&store, &mapping);
        let footer = grid.lines().last().unwrap();
        assert_eq!(footer, "            9101112");
    }
}
