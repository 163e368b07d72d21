//! 角色程序化绑定运行时
//!
//! 两个核心：
//! - biped: 肢体长度/宽度参数化缩放，保持动画意图（脚/手位置、膝盖弯曲角）
//! - puppet: 布娃娃肌肉配置混合 + 平衡状态机 + 碰撞解钉传播
//!
//! 另有 flex（自动肌肉收缩驱动）与 runtime（宿主调度顺序）。
//! 物理引擎、蒙皮、动画本身都在外部，通过 trait 接入。

pub mod config;
pub mod math;
pub mod handle;
pub mod skeleton;
pub mod biped;
pub mod flex;
pub mod puppet;
pub mod physics;
pub mod runtime;

use thiserror::Error;

pub use config::{get_config, set_config, reset_config, RigConfig};
pub use handle::HandleTable;
pub use skeleton::{
    BoneSet, LocalPose, TransformId, TransformSnapshot, TransformSnapshotBuffer, TransformStore,
};
pub use biped::{
    BipedDescriptor, BipedHandle, BipedParameterController, BipedRegistry, ComponentEdit,
    ComponentSink, LimbData, SizeSource, Sizes,
};
pub use flex::{AutoFlexBinding, AutoFlexEngine, AutoFlexHandle, FlexTarget};
pub use puppet::{
    MuscleDriver, MuscleLayout, MuscleState, MuscleTarget, Puppet, PuppetBalance, PuppetConfigurationBlender,
    PuppetMuscleConfiguration, PuppetState,
};
pub use physics::RapierMuscleSet;
pub use runtime::{FramePhase, PuppetHandle, RigRuntime};

/// 运行时错误
///
/// 只在配置期（注册、构建配置、创建绑定）返回；逐帧操作从不报错。
#[derive(Debug, Error)]
pub enum RigError {
    #[error("transform {0:?} is missing or destroyed")]
    MissingTransform(TransformId),

    #[error("required bone '{bone}' is not mapped")]
    MissingBone { bone: &'static str },

    #[error("bind pose of '{bone}' is not finite")]
    NonFiniteBindPose { bone: &'static str },

    #[error("auto-flex binding has {count} targets, at most {max} supported")]
    TooManyFlexTargets { count: usize, max: usize },

    #[error("auto-flex binding needs at least one target")]
    EmptyFlexBinding,

    #[error("configuration '{name}' has {got} muscle states, puppet has {expected} muscles")]
    MuscleCountMismatch { name: String, expected: usize, got: usize },

    #[error("muscle parent index {parent} out of range for muscle {muscle}")]
    InvalidMuscleParent { muscle: usize, parent: usize },

    #[error("handle is stale or was never registered")]
    StaleHandle,
}

pub type Result<T> = std::result::Result<T, RigError>;
