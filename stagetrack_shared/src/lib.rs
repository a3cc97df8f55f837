// stagetrack_shared: shared configuration, geometry and hardware traits for the stage host and tools

pub mod config;
pub mod geometry;
pub mod hardware_traits;

pub use geometry::{MoveClassification, MovementType, Position, WorkspaceDimensions};
pub use hardware_traits::{HardwareDelegate, HardwareError};
