//! Teams domain layer: entities, invite state machine, validation

pub mod entities;
pub mod state;
pub mod validation;
