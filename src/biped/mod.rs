//! 双足参数化缩放
//!
//! 核心设计思想：
//! - BipedRegistry: 全部实例的批处理数组 + 稳定句柄 + 后台求解任务
//! - solver: 尺寸增量 → 本地位姿增量（余弦定理重建膝/肘弯曲）
//! - BipedParameterController: 倍率设置、默认长度测量、组件编辑、宽度贡献

mod component_edit;
mod controller;
mod limb;
mod registry;
mod solver;
mod topology;
mod width;


pub use component_edit::{ColliderId, ComponentEdit, ComponentSink, JointId, NullSink};
pub use controller::BipedParameterController;
pub use limb::{split_width, LimbData, SizeSource, Sizes, SizesPair};
pub use registry::{BipedDescriptor, BipedHandle, BipedRegistry};
pub use solver::{solve_batch, SolverParams};
pub use topology::{BipedBone, LimbChain, Side, READ_COUNT, SPINE_SEGMENTS, WRITE_COUNT};
pub use width::{
    MuscleDataSource, Remap, WidthContributingMuscle, WidthContributionGroup, WidthContributions, WidthTargets,
};
