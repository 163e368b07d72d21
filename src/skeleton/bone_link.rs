//! 骨骼节点 - 参考 nphysics MultibodyLink 设计
//!
//! BoneLink 是参考骨骼层次的核心单元，每个 BoneLink 代表层次中的一个节点。

use glam::{Mat4, Quat, Vec3};
use bitflags::bitflags;

// ============================================================================
// 骨骼标志
// ============================================================================

bitflags! {
    /// 骨骼标志位
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BoneFlags: u32 {
        /// 已被宿主销毁，读取返回 None
        const DESTROYED = 1 << 0;
        /// 本地变换已改，世界变换待刷新
        const DIRTY = 1 << 1;
    }
}

// ============================================================================
// 骨骼节点
// ============================================================================

/// 骨骼节点 - 类似 nphysics MultibodyLink
///
/// - 静态数据：名称、父子关系
/// - 动态数据：本地位姿 + 缓存的世界变换
/// - 变换计算：local_to_world = parent.local_to_world * local_to_parent
#[derive(Clone, Debug)]
pub struct BoneLink {
    // ========================================
    // 静态数据（初始化后不变）
    // ========================================

    /// 骨骼名称
    pub name: String,

    /// 父骨骼索引
    pub parent: Option<usize>,

    /// 骨骼标志
    pub flags: BoneFlags,

    // ========================================
    // 动态数据（每帧更新）
    // ========================================

    /// 本地平移
    pub local_position: Vec3,

    /// 本地旋转
    pub local_rotation: Quat,

    /// 本地变换矩阵 (local_to_parent)
    pub local_to_parent: Mat4,

    /// 全局变换矩阵 (local_to_world)
    pub local_to_world: Mat4,

    /// 世界旋转（缓存，避免从矩阵反解）
    pub world_rotation: Quat,
}

impl BoneLink {
    /// 创建新骨骼
    pub fn new(name: impl Into<String>, parent: Option<usize>) -> Self {
        Self {
            name: name.into(),
            parent,
            flags: BoneFlags::empty(),
            local_position: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
            local_to_parent: Mat4::IDENTITY,
            local_to_world: Mat4::IDENTITY,
            world_rotation: Quat::IDENTITY,
        }
    }

    /// 是否为根骨骼
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.flags.contains(BoneFlags::DESTROYED)
    }

    /// 获取世界位置
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.local_to_world.col(3).truncate()
    }

    /// 获取世界旋转
    #[inline]
    pub fn rotation(&self) -> Quat {
        self.world_rotation
    }

    /// 设置本地位姿并标脏
    #[inline]
    pub fn set_local(&mut self, position: Vec3, rotation: Quat) {
        self.local_position = position;
        self.local_rotation = rotation.normalize();
        self.flags.insert(BoneFlags::DIRTY);
    }

    /// 计算本地变换 (local_to_parent)
    pub fn compute_local_transform(&mut self) {
        self.local_to_parent = Mat4::from_rotation_translation(self.local_rotation, self.local_position);
    }

    /// 由父骨骼世界变换刷新自身世界变换
    pub fn compute_world_transform(&mut self, parent_to_world: Mat4, parent_rotation: Quat) {
        self.compute_local_transform();
        self.local_to_world = parent_to_world * self.local_to_parent;
        self.world_rotation = (parent_rotation * self.local_rotation).normalize();
        self.flags.remove(BoneFlags::DIRTY);
    }
}

impl Default for BoneLink {
    fn default() -> Self {
        Self::new(String::new(), None)
    }
}
