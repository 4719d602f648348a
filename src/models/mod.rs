// src/models/mod.rs

pub mod answer;
pub mod campaign;
pub mod enrollment;
pub mod participant;
pub mod result;
pub mod test_definition;
