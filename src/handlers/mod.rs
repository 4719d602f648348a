// src/handlers/mod.rs

pub mod admin;
pub mod campaigns;
pub mod enrollments;
