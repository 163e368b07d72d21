//! 物理后端
//!
//! rapier3d 实现的肌肉刚体集，同时作为 puppet 的 MuscleDriver
//! 和 biped 组件编辑的 ComponentSink。

mod rapier_driver;

pub use rapier_driver::{pin_force, MuscleBodyDesc, RapierMuscleSet};
