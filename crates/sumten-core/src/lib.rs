pub mod grid;
pub mod protocol;

pub use grid::{Grid, generate_grid};
pub use protocol::{ClientMessage, ConnectionId, ServerMessage};
