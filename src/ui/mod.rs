pub mod build_progress;
pub mod icons;

pub use build_progress::BuildProgressUI;
