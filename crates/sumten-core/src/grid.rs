use rand::rng;
use rand::seq::SliceRandom;

pub const GRID_COLS: usize = 17;
pub const GRID_ROWS: usize = 10;
pub const GRID_CELLS: usize = GRID_COLS * GRID_ROWS;

/// Two cells match when their values add up to this.
pub const TARGET_SUM: u8 = 10;

/// Self-complementary value used to pad the grid after the digit pairs.
pub const FILLER: u8 = 5;

/// How many `(d, 10 - d)` pairs each digit contributes.
const PAIRS_PER_DIGIT: usize = GRID_CELLS / 2 / 9;

/// Row-major board: `grid[row][col]`.
pub type Grid = [[u8; GRID_COLS]; GRID_ROWS];

/// The fixed cell composition every board is shuffled from.
///
/// Each digit `d` in 1..=9 is placed together with its complement `10 - d`,
/// so every non-filler cell has a partner somewhere on the board. The
/// integer-division remainder is padded with [`FILLER`].
pub fn cell_multiset() -> Vec<u8> {
    let mut cells = Vec::with_capacity(GRID_CELLS);
    for d in 1..TARGET_SUM {
        for _ in 0..PAIRS_PER_DIGIT {
            cells.push(d);
            cells.push(TARGET_SUM - d);
        }
    }
    cells.resize(GRID_CELLS, FILLER);
    cells
}

/// Generate a fresh board: a uniform random permutation of [`cell_multiset`].
pub fn generate_grid() -> Grid {
    let mut cells = cell_multiset();
    cells.shuffle(&mut rng());

    let mut grid = [[0u8; GRID_COLS]; GRID_ROWS];
    for (slot, value) in grid.iter_mut().flatten().zip(cells) {
        *slot = value;
    }
    grid
}

/// Count occurrences of each value 0..=9 on the board.
pub fn value_counts(grid: &Grid) -> [usize; 10] {
    let mut counts = [0usize; 10];
    for &v in grid.iter().flatten() {
        if let Some(slot) = counts.get_mut(v as usize) {
            *slot += 1;
        }
    }
    counts
}

/// Check that every value is a digit 1..=9 and that each digit appears
/// exactly as often as its complement.
pub fn is_solvable(grid: &Grid) -> bool {
    if grid.iter().flatten().any(|&v| !(1..TARGET_SUM).contains(&v)) {
        return false;
    }
    let counts = value_counts(grid);
    (1..TARGET_SUM as usize).all(|d| counts[d] == counts[TARGET_SUM as usize - d])
}
