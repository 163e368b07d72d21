//! 随尺寸变化重新应用的组件编辑（碰撞体、关节锚点、变换）

use glam::Vec3;

use crate::skeleton::TransformId;

/// 外部碰撞体 id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColliderId(pub u32);

/// 外部关节 id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JointId(pub u32);

/// 组件写入端
///
/// 物理层（或测试记录器）实现；id 失效时静默忽略。
pub trait ComponentSink {
    /// 胶囊：中心、轴向、总高、半径
    fn set_capsule(&mut self, collider: ColliderId, center: Vec3, axis: Vec3, height: f32, radius: f32);

    /// 盒：中心、全尺寸
    fn set_box(&mut self, collider: ColliderId, center: Vec3, size: Vec3);

    /// 关节本体侧锚点与连接侧锚点
    fn set_joint_anchor(&mut self, joint: JointId, anchor: Vec3, connected_anchor: Vec3);

    fn set_local_position(&mut self, transform: TransformId, position: Vec3);
}

/// 丢弃全部写入
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl ComponentSink for NullSink {
    fn set_capsule(&mut self, _: ColliderId, _: Vec3, _: Vec3, _: f32, _: f32) {}
    fn set_box(&mut self, _: ColliderId, _: Vec3, _: Vec3) {}
    fn set_joint_anchor(&mut self, _: JointId, _: Vec3, _: Vec3) {}
    fn set_local_position(&mut self, _: TransformId, _: Vec3) {}
}

// ============================================================================
// 编辑记录
// ============================================================================

/// 绑定时捕获原始尺寸，resize(delta) 按 delta × multiplier 重新应用
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentEdit {
    Capsule {
        collider: ColliderId,
        /// 本地延伸轴（单位向量）
        axis: Vec3,
        original_center: Vec3,
        original_height: f32,
        radius: f32,
        /// 中心随高度移动的比例（0.5 = 一端固定）
        center_shift: f32,
        multiplier: f32,
    },
    Box {
        collider: ColliderId,
        axis: Vec3,
        original_center: Vec3,
        original_size: Vec3,
        center_shift: f32,
        multiplier: f32,
    },
    JointAnchor {
        joint: JointId,
        axis: Vec3,
        original_anchor: Vec3,
        original_connected_anchor: Vec3,
        /// true 时移动连接侧锚点，否则移动本体侧
        move_connected: bool,
        multiplier: f32,
    },
    Transform {
        transform: TransformId,
        axis: Vec3,
        original_position: Vec3,
        multiplier: f32,
    },
}

impl ComponentEdit {
    /// 胶囊（一端固定）
    pub fn capsule(collider: ColliderId, axis: Vec3, center: Vec3, height: f32, radius: f32) -> Self {
        ComponentEdit::Capsule {
            collider,
            axis: axis.normalize_or_zero(),
            original_center: center,
            original_height: height,
            radius,
            center_shift: 0.5,
            multiplier: 1.0,
        }
    }

    pub fn box_collider(collider: ColliderId, axis: Vec3, center: Vec3, size: Vec3) -> Self {
        ComponentEdit::Box {
            collider,
            axis: axis.normalize_or_zero(),
            original_center: center,
            original_size: size,
            center_shift: 0.5,
            multiplier: 1.0,
        }
    }

    pub fn joint_anchor(joint: JointId, axis: Vec3, anchor: Vec3, connected_anchor: Vec3) -> Self {
        ComponentEdit::JointAnchor {
            joint,
            axis: axis.normalize_or_zero(),
            original_anchor: anchor,
            original_connected_anchor: connected_anchor,
            move_connected: true,
            multiplier: 1.0,
        }
    }

    pub fn transform(transform: TransformId, axis: Vec3, position: Vec3) -> Self {
        ComponentEdit::Transform {
            transform,
            axis: axis.normalize_or_zero(),
            original_position: position,
            multiplier: 1.0,
        }
    }

    pub fn with_multiplier(mut self, value: f32) -> Self {
        match &mut self {
            ComponentEdit::Capsule { multiplier, .. }
            | ComponentEdit::Box { multiplier, .. }
            | ComponentEdit::JointAnchor { multiplier, .. }
            | ComponentEdit::Transform { multiplier, .. } => *multiplier = value,
        }
        self
    }

    /// delta = 真实长度 - 默认长度；delta 为 0 时恢复原始值
    pub fn resize(&self, delta: f32, sink: &mut dyn ComponentSink) {
        match *self {
            ComponentEdit::Capsule {
                collider,
                axis,
                original_center,
                original_height,
                radius,
                center_shift,
                multiplier,
            } => {
                let grow = delta * multiplier;
                let height = (original_height + grow).max(0.0);
                let center = original_center + axis * (grow * center_shift);
                sink.set_capsule(collider, center, axis, height, radius);
            }
            ComponentEdit::Box {
                collider,
                axis,
                original_center,
                original_size,
                center_shift,
                multiplier,
            } => {
                let grow = delta * multiplier;
                let size = (original_size + axis.abs() * grow).max(Vec3::ZERO);
                let center = original_center + axis * (grow * center_shift);
                sink.set_box(collider, center, size);
            }
            ComponentEdit::JointAnchor {
                joint,
                axis,
                original_anchor,
                original_connected_anchor,
                move_connected,
                multiplier,
            } => {
                let offset = axis * (delta * multiplier);
                if move_connected {
                    sink.set_joint_anchor(joint, original_anchor, original_connected_anchor + offset);
                } else {
                    sink.set_joint_anchor(joint, original_anchor + offset, original_connected_anchor);
                }
            }
            ComponentEdit::Transform {
                transform,
                axis,
                original_position,
                multiplier,
            } => {
                sink.set_local_position(transform, original_position + axis * (delta * multiplier));
            }
        }
    }
}
