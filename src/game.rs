use std::collections::HashSet;
use rand::Rng;

// ============================================================================
// Configuration
// ============================================================================

pub const GRID_COLS: usize = 8;
pub const GRID_ROWS: usize = 12;
pub const SPAWN_COLUMN: usize = 4;
pub const SPAWN_PALETTE_SIZE: usize = 4;

// Timing (in milliseconds)
pub const NORMAL_DROP_MS: u64 = 1000;
pub const FAST_DROP_MS: u64 = 100;
pub const REMOVAL_DELAY_MS: u64 = 250;

/// A group of four or more same-colored cells is removed.
pub const MIN_MATCH_SIZE: usize = 4;

const ADJACENCY: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

#[derive(Clone, Copy, Debug)]
pub struct GameConfig {
    pub rows: usize,
    pub cols: usize,
    /// Column of the pivot cell at spawn; the orbit cell spawns one to the right.
    pub spawn_x: usize,
    /// How many of the palette colors are drawn for new pieces.
    pub palette_size: usize,
    pub normal_drop_ms: u64,
    pub fast_drop_ms: u64,
    pub removal_delay_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            rows: GRID_ROWS,
            cols: GRID_COLS,
            spawn_x: SPAWN_COLUMN,
            palette_size: SPAWN_PALETTE_SIZE,
            normal_drop_ms: NORMAL_DROP_MS,
            fast_drop_ms: FAST_DROP_MS,
            removal_delay_ms: REMOVAL_DELAY_MS,
        }
    }
}

// ============================================================================
// Types
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PuyoColor {
    Blue,
    Purple,
    Pink,
    Orange,
    Green,
    Teal,
}

impl PuyoColor {
    pub const ALL: [PuyoColor; 6] = [
        PuyoColor::Blue,
        PuyoColor::Purple,
        PuyoColor::Pink,
        PuyoColor::Orange,
        PuyoColor::Green,
        PuyoColor::Teal,
    ];
}

/// A single colored cell occupying one board coordinate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Cell {
    pub x: usize,
    pub y: usize,
    pub color: PuyoColor,
    /// Set while the cell is fading out, before it is actually removed.
    pub removed: bool,
}

impl Cell {
    pub fn new(x: usize, y: usize, color: PuyoColor) -> Self {
        Self {
            x,
            y,
            color,
            removed: false,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    /// Piece under player/timer control; input accepted.
    Falling,
    /// Post-lock gravity steps and match scanning.
    Settling,
    /// Matched cells are marked and awaiting removal.
    Removing,
    GameOver,
}

/// Result of one discrete cascade step; tells the host how to pace the next one.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CascadeStep {
    Collapsed,
    MatchesMarked(usize),
    MatchesRemoved(usize),
    /// Cascade finished; the next piece has been spawned (or the game ended).
    Settled,
    /// No cascade in progress.
    Idle,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum GameEvent {
    PieceSpawned,
    PieceMoved,
    PieceRotated,
    PieceLocked,
    Collapsed,
    MatchesMarked(usize),
    MatchesRemoved(usize),
    BoardSettled,
    GameOver,
    GameRestarted,
}

// ============================================================================
// Color Provider Trait
// ============================================================================

pub trait ColorProvider {
    fn next_color(&mut self) -> PuyoColor;
}

pub struct RandomColorProvider {
    palette_size: usize,
}

impl RandomColorProvider {
    pub fn new(palette_size: usize) -> Self {
        Self {
            palette_size: palette_size.clamp(1, PuyoColor::ALL.len()),
        }
    }
}

impl ColorProvider for RandomColorProvider {
    fn next_color(&mut self) -> PuyoColor {
        let mut rng = rand::thread_rng();
        PuyoColor::ALL[rng.gen_range(0..self.palette_size)]
    }
}

pub struct SequenceColorProvider {
    colors: Vec<PuyoColor>,
    index: usize,
}

impl SequenceColorProvider {
    pub fn new(colors: Vec<PuyoColor>) -> Self {
        Self { colors, index: 0 }
    }
}

impl ColorProvider for SequenceColorProvider {
    fn next_color(&mut self) -> PuyoColor {
        let color = self.colors[self.index % self.colors.len()];
        self.index += 1;
        color
    }
}

// ============================================================================
// Board
// ============================================================================

/// Fixed-size grid of settled cells, indexed row-major as `x + y * cols`.
#[derive(Clone, Debug)]
pub struct Board {
    rows: usize,
    cols: usize,
    slots: Vec<Option<Cell>>,
}

impl Board {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            slots: vec![None; rows * cols],
        }
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn index_of(&self, x: usize, y: usize) -> usize {
        x + y * self.cols
    }

    pub fn coords_of(&self, index: usize) -> (usize, usize) {
        (index % self.cols, index / self.cols)
    }

    /// True iff (x, y) is on the board and the slot is empty. Takes signed
    /// coordinates so off-board proposals are expressible.
    pub fn is_legal(&self, x: i32, y: i32) -> bool {
        x >= 0
            && (x as usize) < self.cols
            && y >= 0
            && (y as usize) < self.rows
            && self.slots[self.index_of(x as usize, y as usize)].is_none()
    }

    pub fn get(&self, x: usize, y: usize) -> Option<&Cell> {
        if x >= self.cols || y >= self.rows {
            return None;
        }
        self.slots[self.index_of(x, y)].as_ref()
    }

    /// Writes a cell into its slot. Callers must gate through `is_legal`.
    pub fn place(&mut self, cell: Cell) {
        let index = self.index_of(cell.x, cell.y);
        debug_assert!(
            self.slots[index].is_none(),
            "slot ({}, {}) already occupied",
            cell.x,
            cell.y
        );
        self.slots[index] = Some(cell);
    }

    /// True iff some cell has an empty slot directly below it.
    pub fn can_collapse(&self) -> bool {
        (0..self.cols).any(|x| {
            (0..self.rows - 1).any(|y| {
                self.slots[self.index_of(x, y)].is_some()
                    && self.slots[self.index_of(x, y + 1)].is_none()
            })
        })
    }

    /// One discrete gravity step: every floating cell moves down exactly one
    /// row. Scanning bottom-up per column keeps a cell from falling more than
    /// one row per pass; call repeatedly until `can_collapse()` is false to
    /// settle fully.
    pub fn collapse(&mut self) {
        for x in 0..self.cols {
            for y in (1..self.rows).rev() {
                let below = self.index_of(x, y);
                let above = self.index_of(x, y - 1);
                if self.slots[below].is_none() {
                    if let Some(mut cell) = self.slots[above].take() {
                        cell.y = y;
                        self.slots[below] = Some(cell);
                    }
                }
            }
        }
    }

    /// Clears the listed slots to empty.
    pub fn remove(&mut self, indices: &HashSet<usize>) {
        for &index in indices {
            self.slots[index] = None;
        }
    }

    /// Flags the listed cells for the fade-out phase without removing them.
    pub fn mark_removed(&mut self, indices: &HashSet<usize>) {
        for &index in indices {
            if let Some(cell) = self.slots[index].as_mut() {
                cell.removed = true;
            }
        }
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    // ------------------------------------------------------------------------
    // Match detection
    // ------------------------------------------------------------------------

    /// Flood-fills every 4-connected same-color region and returns the union
    /// of all regions of size >= MIN_MATCH_SIZE, as board slot indices.
    ///
    /// All visited cells are marked visited whether or not their region is
    /// accepted; a color-connected component is exhausted on first contact,
    /// so each cell is scanned exactly once.
    pub fn find_matches(&self) -> HashSet<usize> {
        let mut matches = HashSet::new();
        let mut visited = vec![false; self.slots.len()];

        for start in 0..self.slots.len() {
            if visited[start] {
                continue;
            }
            let target = match &self.slots[start] {
                Some(cell) => cell.color,
                None => continue,
            };

            let mut region = Vec::new();
            let mut stack = vec![start];
            visited[start] = true;

            while let Some(index) = stack.pop() {
                region.push(index);
                let (x, y) = self.coords_of(index);
                for (dx, dy) in ADJACENCY {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx < 0 || nx >= self.cols as i32 || ny < 0 || ny >= self.rows as i32 {
                        continue;
                    }
                    let neighbor = self.index_of(nx as usize, ny as usize);
                    if visited[neighbor] {
                        continue;
                    }
                    if self.slots[neighbor].map(|cell| cell.color) == Some(target) {
                        visited[neighbor] = true;
                        stack.push(neighbor);
                    }
                }
            }

            if region.len() >= MIN_MATCH_SIZE {
                matches.extend(region);
            }
        }

        matches
    }
}

// ============================================================================
// Active Piece
// ============================================================================

/// The two-cell player-controlled piece: a pivot and a partner orbiting it at
/// 90-degree increments. The orbit offset is derived from the angle by rounded
/// trigonometric projection, so it is always a unit offset.
#[derive(Clone, Debug)]
pub struct ActivePiece {
    pivot: Cell,
    orbit: Cell,
    /// Degrees, one of 0, 90, 180, 270.
    angle: u16,
}

fn orbit_offset(angle: u16) -> (i32, i32) {
    let theta = f64::from(angle).to_radians();
    (theta.cos().round() as i32, theta.sin().round() as i32)
}

impl ActivePiece {
    fn spawn(spawn_x: usize, pivot_color: PuyoColor, orbit_color: PuyoColor) -> Self {
        Self {
            pivot: Cell::new(spawn_x, 0, pivot_color),
            orbit: Cell::new(spawn_x + 1, 0, orbit_color),
            angle: 0,
        }
    }

    pub fn cells(&self) -> [Cell; 2] {
        [self.pivot, self.orbit]
    }

    pub fn angle(&self) -> u16 {
        self.angle
    }

    pub fn can_descend(&self, board: &Board) -> bool {
        board.is_legal(self.pivot.x as i32, self.pivot.y as i32 + 1)
            && board.is_legal(self.orbit.x as i32, self.orbit.y as i32 + 1)
    }

    /// Moves both cells down one row; rejected atomically if either target is
    /// illegal.
    fn try_descend(&mut self, board: &Board) -> bool {
        if !self.can_descend(board) {
            return false;
        }
        self.pivot.y += 1;
        self.orbit.y += 1;
        true
    }

    pub fn can_rotate(&self, board: &Board) -> bool {
        let (dx, dy) = orbit_offset((self.angle + 90) % 360);
        board.is_legal(self.pivot.x as i32 + dx, self.pivot.y as i32 + dy)
    }

    fn try_rotate(&mut self, board: &Board) -> bool {
        if !self.can_rotate(board) {
            return false;
        }
        let angle = (self.angle + 90) % 360;
        let (dx, dy) = orbit_offset(angle);
        self.orbit.x = (self.pivot.x as i32 + dx) as usize;
        self.orbit.y = (self.pivot.y as i32 + dy) as usize;
        self.angle = angle;
        true
    }

    /// Rigid translation toward an external target for the pivot. The row is
    /// clamped so the piece never moves back upward, and the orbit cell keeps
    /// its current offset. Rejected atomically if either target is illegal.
    fn try_translate_to(&mut self, col: i32, row: i32, board: &Board) -> bool {
        let row = row.max(self.pivot.y as i32);
        let dx = self.orbit.x as i32 - self.pivot.x as i32;
        let dy = self.orbit.y as i32 - self.pivot.y as i32;
        if !board.is_legal(col, row) || !board.is_legal(col + dx, row + dy) {
            return false;
        }
        self.pivot.x = col as usize;
        self.pivot.y = row as usize;
        self.orbit.x = (col + dx) as usize;
        self.orbit.y = (row + dy) as usize;
        true
    }
}

// ============================================================================
// Game
// ============================================================================

/// The turn sequencer: spawn -> fall -> lock -> settle/match cascade -> spawn.
///
/// All mutation happens through `on_tick`, `step_cascade` and the `request_*`
/// commands, each of which couples its legality check with its state change.
/// The host drives `on_tick` at `drop_period_ms()` while input is accepted and
/// `step_cascade` at its own pacing while `is_busy()`.
pub struct Game {
    pub board: Board,
    piece: Option<ActivePiece>,
    phase: Phase,
    drop_ms: u64,
    pending_removal: HashSet<usize>,
    color_provider: Box<dyn ColorProvider>,
    events: Vec<GameEvent>,
    config: GameConfig,
}

impl Game {
    pub fn new() -> Self {
        let config = GameConfig::default();
        Self::with_config(config, Box::new(RandomColorProvider::new(config.palette_size)))
    }

    pub fn with_provider(provider: Box<dyn ColorProvider>) -> Self {
        Self::with_config(GameConfig::default(), provider)
    }

    pub fn with_config(config: GameConfig, provider: Box<dyn ColorProvider>) -> Self {
        Self::with_board(Board::new(config.rows, config.cols), config, provider)
    }

    /// Starts a game over a pre-populated board; the first piece spawns
    /// immediately.
    pub fn with_board(board: Board, config: GameConfig, provider: Box<dyn ColorProvider>) -> Self {
        debug_assert_eq!(board.dimensions(), (config.rows, config.cols));
        let mut game = Self {
            board,
            piece: None,
            phase: Phase::Falling,
            drop_ms: config.normal_drop_ms,
            pending_removal: HashSet::new(),
            color_provider: provider,
            events: Vec::new(),
            config,
        };
        game.spawn_piece();
        game
    }

    // ------------------------------------------------------------------------
    // Query surface
    // ------------------------------------------------------------------------

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.board.cells()
    }

    /// The active piece's cells: pivot first, then orbit. Empty between lock
    /// and the next spawn.
    pub fn player_cells(&self) -> Vec<Cell> {
        self.piece
            .as_ref()
            .map(|piece| piece.cells().to_vec())
            .unwrap_or_default()
    }

    pub fn orbit_angle(&self) -> u16 {
        self.piece.as_ref().map(ActivePiece::angle).unwrap_or(0)
    }

    pub fn accepting_input(&self) -> bool {
        self.phase == Phase::Falling && self.piece.is_some()
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.phase, Phase::Settling | Phase::Removing)
    }

    pub fn is_game_over(&self) -> bool {
        self.phase == Phase::GameOver
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current automatic-descent period; switches to the fast period after a
    /// player-initiated placement and resets at the next spawn.
    pub fn drop_period_ms(&self) -> u64 {
        self.drop_ms
    }

    pub fn removal_delay_ms(&self) -> u64 {
        self.config.removal_delay_ms
    }

    pub fn dimensions(&self) -> (usize, usize) {
        self.board.dimensions()
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Takes and clears all pending events.
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------------
    // Command surface
    // ------------------------------------------------------------------------

    /// One automatic-descent step, invoked by the external timer. Locks the
    /// piece when descent is illegal. Ignored while the cascade runs.
    pub fn on_tick(&mut self) {
        if self.phase != Phase::Falling {
            return;
        }
        let Some(piece) = self.piece.as_mut() else {
            return;
        };
        if piece.try_descend(&self.board) {
            self.events.push(GameEvent::PieceMoved);
        } else {
            self.lock_piece();
        }
    }

    /// Rotates the orbit cell 90 degrees around the pivot if the target slot
    /// is legal; otherwise a no-op returning false.
    pub fn request_rotate(&mut self) -> bool {
        if self.phase != Phase::Falling {
            return false;
        }
        let Some(piece) = self.piece.as_mut() else {
            return false;
        };
        if !piece.try_rotate(&self.board) {
            return false;
        }
        self.events.push(GameEvent::PieceRotated);
        true
    }

    /// Rigidly translates the piece so its pivot lands on (col, row), never
    /// upward. A successful move switches descent to the fast period.
    pub fn request_move_to(&mut self, col: i32, row: i32) -> bool {
        if self.phase != Phase::Falling {
            return false;
        }
        let Some(piece) = self.piece.as_mut() else {
            return false;
        };
        if !piece.try_translate_to(col, row, &self.board) {
            return false;
        }
        self.drop_ms = self.config.fast_drop_ms;
        self.events.push(GameEvent::PieceMoved);
        true
    }

    /// One discrete step of the post-lock cascade. The host paces calls with
    /// its settle/removal delays; tests call it in a loop.
    pub fn step_cascade(&mut self) -> CascadeStep {
        match self.phase {
            Phase::Falling | Phase::GameOver => CascadeStep::Idle,
            Phase::Settling => {
                if self.board.can_collapse() {
                    self.board.collapse();
                    self.events.push(GameEvent::Collapsed);
                    return CascadeStep::Collapsed;
                }
                let matches = self.board.find_matches();
                if matches.is_empty() {
                    self.events.push(GameEvent::BoardSettled);
                    self.spawn_piece();
                    return CascadeStep::Settled;
                }
                let count = matches.len();
                self.board.mark_removed(&matches);
                self.pending_removal = matches;
                self.phase = Phase::Removing;
                self.events.push(GameEvent::MatchesMarked(count));
                CascadeStep::MatchesMarked(count)
            }
            Phase::Removing => {
                let matches = std::mem::take(&mut self.pending_removal);
                let count = matches.len();
                self.board.remove(&matches);
                self.phase = Phase::Settling;
                self.events.push(GameEvent::MatchesRemoved(count));
                CascadeStep::MatchesRemoved(count)
            }
        }
    }

    /// Runs the cascade to completion with zero delays. Equivalent to calling
    /// `step_cascade` until it reports `Settled` or `Idle`.
    pub fn run_cascade(&mut self) {
        loop {
            match self.step_cascade() {
                CascadeStep::Settled | CascadeStep::Idle => break,
                _ => {}
            }
        }
    }

    pub fn restart(&mut self) {
        let (rows, cols) = (self.config.rows, self.config.cols);
        self.board = Board::new(rows, cols);
        self.piece = None;
        self.pending_removal.clear();
        self.events.clear();
        self.drop_ms = self.config.normal_drop_ms;
        self.events.push(GameEvent::GameRestarted);
        self.spawn_piece();
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn lock_piece(&mut self) {
        let Some(piece) = self.piece.take() else {
            return;
        };
        for cell in piece.cells() {
            self.board.place(cell);
        }
        self.phase = Phase::Settling;
        self.events.push(GameEvent::PieceLocked);
    }

    fn spawn_piece(&mut self) {
        self.drop_ms = self.config.normal_drop_ms;
        let spawn_x = self.config.spawn_x as i32;
        if !self.board.is_legal(spawn_x, 0) || !self.board.is_legal(spawn_x + 1, 0) {
            self.phase = Phase::GameOver;
            self.events.push(GameEvent::GameOver);
            return;
        }
        let pivot_color = self.color_provider.next_color();
        let orbit_color = self.color_provider.next_color();
        self.piece = Some(ActivePiece::spawn(self.config.spawn_x, pivot_color, orbit_color));
        self.phase = Phase::Falling;
        self.events.push(GameEvent::PieceSpawned);
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Test Helpers
// ============================================================================

pub mod test_helpers {
    use super::*;

    pub fn board_with_cells(rows: usize, cols: usize, cells: &[(usize, usize, PuyoColor)]) -> Board {
        let mut board = Board::new(rows, cols);
        for &(x, y, color) in cells {
            board.place(Cell::new(x, y, color));
        }
        board
    }

    pub fn colors(sequence: &[PuyoColor]) -> Box<dyn ColorProvider> {
        Box::new(SequenceColorProvider::new(sequence.to_vec()))
    }

    /// The 8-column, 6-row board used by the short-drop scenarios.
    pub fn short_board_config() -> GameConfig {
        GameConfig {
            rows: 6,
            cols: 8,
            ..GameConfig::default()
        }
    }
}
