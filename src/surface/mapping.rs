//! Pad-matrix to mixer-coordinate mapping.
//!
//! The physical matrix shows a window into the composition grid; the window
//! moves with a scroll/bank offset. The same mapping is used for rendering
//! and for input, so a pad press always targets the coordinate currently
//! displayed on it.

use crate::device::FIRST_PAD_NOTE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridMapping {
    cols: u8,
    rows: u8,
    col_offset: u32,
    row_offset: u32,
}

impl GridMapping {
    pub fn new(cols: u8, rows: u8) -> Self {
        Self {
            cols,
            rows,
            col_offset: 0,
            row_offset: 0,
        }
    }

    pub fn cols(&self) -> u8 {
        self.cols
    }

    pub fn rows(&self) -> u8 {
        self.rows
    }

    /// Pad note for cell (x, y); x runs left to right, y bottom to top, with
    /// the bottom row showing the lowest layer.
    pub fn pad_id(&self, x: u8, y: u8) -> u8 {
        FIRST_PAD_NOTE + y * self.cols + x
    }

    /// Inverse of [`pad_id`](Self::pad_id). None for notes outside the matrix.
    pub fn cell_for_pad(&self, pad: u8) -> Option<(u8, u8)> {
        let index = pad.checked_sub(FIRST_PAD_NOTE)?;
        let (x, y) = (index % self.cols, index / self.cols);
        (x < self.cols && y < self.rows).then_some((x, y))
    }

    /// Mixer (column, layer) currently shown at cell (x, y).
    pub fn coord_at(&self, x: u8, y: u8) -> (u32, u32) {
        (
            self.col_offset + u32::from(x) + 1,
            self.row_offset + u32::from(y) + 1,
        )
    }

    /// Mixer (column, layer) currently shown on a pad.
    pub fn coord_for_pad(&self, pad: u8) -> Option<(u32, u32)> {
        let (x, y) = self.cell_for_pad(pad)?;
        Some(self.coord_at(x, y))
    }

    /// Move the window. Offsets clamp at the composition origin.
    pub fn scroll(&mut self, dx: i32, dy: i32) {
        self.col_offset = add_clamped(self.col_offset, dx);
        self.row_offset = add_clamped(self.row_offset, dy);
    }

    /// All (x, y) cells of the matrix, row by row.
    pub fn visible_cells(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        (0..self.rows).flat_map(move |y| (0..self.cols).map(move |x| (x, y)))
    }
}

fn add_clamped(base: u32, delta: i32) -> u32 {
    if delta >= 0 {
        base.saturating_add(delta as u32)
    } else {
        base.saturating_sub(delta.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_and_cell_round_trip() {
        let mapping = GridMapping::new(8, 8);
        assert_eq!(mapping.pad_id(0, 0), 36);
        assert_eq!(mapping.pad_id(7, 7), 99);
        assert_eq!(mapping.cell_for_pad(36), Some((0, 0)));
        assert_eq!(mapping.cell_for_pad(99), Some((7, 7)));
        assert_eq!(mapping.cell_for_pad(35), None);
        assert_eq!(mapping.cell_for_pad(100), None);
    }

    #[test]
    fn origin_maps_to_column_and_layer_one() {
        let mapping = GridMapping::new(8, 8);
        assert_eq!(mapping.coord_at(0, 0), (1, 1));
        assert_eq!(mapping.coord_at(3, 1), (4, 2));
        assert_eq!(mapping.coord_for_pad(36 + 8 + 3), Some((4, 2)));
    }

    #[test]
    fn scroll_shifts_both_render_and_input_coordinates() {
        let mut mapping = GridMapping::new(8, 8);
        mapping.scroll(2, 1);
        assert_eq!(mapping.coord_at(0, 0), (3, 2));
        assert_eq!(mapping.coord_for_pad(36), Some((3, 2)));
    }

    #[test]
    fn scroll_clamps_at_origin() {
        let mut mapping = GridMapping::new(8, 8);
        mapping.scroll(-5, -5);
        assert_eq!(mapping.coord_at(0, 0), (1, 1));
        mapping.scroll(1, 0);
        mapping.scroll(-3, 0);
        assert_eq!(mapping.coord_at(0, 0), (1, 1));
    }

    #[test]
    fn visible_cells_covers_the_matrix_once() {
        let mapping = GridMapping::new(4, 2);
        let cells: Vec<_> = mapping.visible_cells().collect();
        assert_eq!(cells.len(), 8);
        assert_eq!(cells[0], (0, 0));
        assert_eq!(cells[7], (3, 1));
    }

    #[test]
    fn non_square_matrix_indexes_by_row() {
        let mapping = GridMapping::new(4, 2);
        assert_eq!(mapping.pad_id(0, 1), 40);
        assert_eq!(mapping.cell_for_pad(43), Some((3, 1)));
        assert_eq!(mapping.cell_for_pad(44), None);
    }
}
