// ABOUTME: Shared configuration crate for Voxcraft
// ABOUTME: Environment variable names and typed parsing helpers

pub mod constants;
pub mod env;
