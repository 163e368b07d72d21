//! 自动收缩（AutoFlex）
//!
//! 由关节的距离/转角/角速度推导 [0, 1] 的收缩输出，
//! 供肌肉收缩、修正形变等消费方轮询。

mod binding;
mod engine;
mod target;

pub use binding::{AutoFlexBinding, Calibration, MAX_FLEX_TARGETS};
pub use engine::{AutoFlexEngine, AutoFlexHandle};
pub use target::{FlexTarget, RangeMode, SpeedGate, WeightShape};
