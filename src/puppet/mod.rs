//! 布娃娃肌肉系统
//!
//! - muscle_state / configuration: 固定字段表的肌肉状态与按名字的配置混合
//! - balance: 平衡值与状态机
//! - collision: 碰撞解钉沿肌肉树传播
//! - driver: 物理约束层接口（rapier 实现见 physics 模块）

mod balance;
mod collision;
mod configuration;
mod controller;
mod driver;
mod layout;
mod muscle_state;

pub use balance::{
    muscle_contribution, BalanceThresholds, MuscleDeviation, MuscleTarget, PuppetBalance, PuppetState,
};
pub use collision::CollisionUnpin;
pub use configuration::{PuppetConfigurationBlender, PuppetMuscleConfiguration, PuppetSpeeds};
pub use controller::{effective_drive, Puppet};
pub use driver::{MuscleDrive, MuscleDriver};
pub use layout::{MuscleDef, MuscleLayout};
pub use muscle_state::{MuscleFlags, MuscleState, NamedMuscleState};
