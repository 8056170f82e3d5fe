pub mod controller;
pub mod scheduler;
pub mod trainer;

pub use controller::RetrainingController;
pub use scheduler::RetrainingScheduler;
pub use trainer::{CommandTrainer, Trainer, UnconfiguredTrainer};
