//! Falling-pair matching puzzle: board simulation, piece control and the
//! settle/match cascade. The terminal front end lives in the binary.

pub mod game;
