//! 骨骼快照系统 - 外部变换层的最小接口
//!
//! 核心设计思想：
//! - TransformStore: 宿主骨骼层（场景图、动画系统）的只读/写回接口
//! - TransformSnapshotBuffer: 读/写两组批次解耦的双缓冲快照
//! - BoneSet: 参考实现的骨骼层次，测试与无场景图的宿主可直接使用

mod bone_link;
mod bone_set;
mod snapshot_buffer;

pub use bone_link::{BoneFlags, BoneLink};
pub use bone_set::BoneSet;
pub use snapshot_buffer::{SnapshotFrame, TransformSnapshotBuffer};

use glam::{Quat, Vec3};

// ============================================================================
// 公共类型定义
// ============================================================================

/// 外部变换句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransformId(pub u32);

impl TransformId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// 单个变换的世界/本地快照
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformSnapshot {
    pub world_position: Vec3,
    pub world_rotation: Quat,
    pub local_position: Vec3,
    pub local_rotation: Quat,
}

impl Default for TransformSnapshot {
    fn default() -> Self {
        Self {
            world_position: Vec3::ZERO,
            world_rotation: Quat::IDENTITY,
            local_position: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
        }
    }
}

impl TransformSnapshot {
    /// 父骨骼世界旋转（由 world = parent * local 反推）
    #[inline]
    pub fn parent_rotation(&self) -> Quat {
        crate::math::parent_rotation(self.world_rotation, self.local_rotation)
    }

    /// 本地位姿部分
    #[inline]
    pub fn local_pose(&self) -> LocalPose {
        LocalPose {
            position: self.local_position,
            rotation: self.local_rotation,
        }
    }
}

/// 写回用的本地位姿
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalPose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for LocalPose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

// ============================================================================
// 宿主接口
// ============================================================================

/// 宿主变换层
///
/// 读取必须无副作用且可并发（fetch pass 在 rayon 上并行调用）。
/// 已销毁的变换返回 None / false，批处理会跳过该槽位。
pub trait TransformStore: Sync {
    /// 读取世界/本地快照
    fn snapshot(&self, id: TransformId) -> Option<TransformSnapshot>;

    /// 写回本地位姿，返回是否写入成功
    fn write_local(&mut self, id: TransformId, pose: LocalPose) -> bool;

    /// 批量写回，默认逐个写入
    fn write_locals(&mut self, writes: &[(TransformId, LocalPose)]) {
        for (id, pose) in writes {
            self.write_local(*id, *pose);
        }
    }
}
