//! rapier3d 肌肉刚体集
//!
//! 宿主持有 PhysicsPipeline 并负责 step；本结构持有刚体/碰撞体/关节集合，
//! 对 puppet 实现 MuscleDriver，对 biped 实现 ComponentSink。
//! 流程：每帧 [apply_pin_forces → 宿主 step → sync_contacts → Puppet::post_physics → mapped_pose 写回]

use std::collections::HashMap;

use glam::{Quat, Vec3};
use rapier3d::math::{Isometry, Point, Real, Rotation, Translation, Vector};
use rapier3d::na;
use rapier3d::prelude::*;

use crate::biped::{ColliderId, ComponentSink, JointId};
use crate::config::get_config;
use crate::puppet::{MuscleDrive, MuscleDriver, MuscleTarget};
use crate::skeleton::TransformId;

#[inline]
fn to_vector(v: Vec3) -> Vector<Real> {
    Vector::new(v.x, v.y, v.z)
}

#[inline]
fn to_point(v: Vec3) -> Point<Real> {
    Point::new(v.x, v.y, v.z)
}

fn to_isometry(position: Vec3, rotation: Quat) -> Isometry<Real> {
    let rotation = Rotation::from_quaternion(na::Quaternion::new(rotation.w, rotation.x, rotation.y, rotation.z));
    Isometry::from_parts(Translation::new(position.x, position.y, position.z), rotation)
}

fn from_isometry(iso: &Isometry<Real>) -> (Vec3, Quat) {
    let t = iso.translation.vector;
    let q = iso.rotation;
    (Vec3::new(t.x, t.y, t.z), Quat::from_xyzw(q.i, q.j, q.k, q.w))
}

/// 钉向目标的力，长度不超过 max_force
pub fn pin_force(position: Vec3, target: Vec3, stiffness: f32, drive: &MuscleDrive, max_force: f32) -> Vec3 {
    let force = (target - position) * stiffness * drive.pin_weight.max(0.0) * drive.muscle_weight.max(0.0);
    let cap = (max_force * drive.max_force_multiplier).max(0.0);
    let force = force.clamp_length_max(cap);
    if force.is_finite() {
        force
    } else {
        Vec3::ZERO
    }
}

/// 肌肉刚体的几何描述
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MuscleBodyDesc {
    pub position: Vec3,
    pub rotation: Quat,
    /// 胶囊半高（不含半球）
    pub half_height: f32,
    pub radius: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
}

impl MuscleBodyDesc {
    pub fn capsule(position: Vec3, half_height: f32, radius: f32) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            half_height,
            radius,
            linear_damping: 0.5,
            angular_damping: 0.5,
        }
    }
}

#[derive(Clone, Debug)]
struct RapierMuscle {
    body: RigidBodyHandle,
    colliders: Vec<ColliderHandle>,
    drive: MuscleDrive,
    linear_damping: f32,
    angular_damping: f32,
    contacts: u32,
}

/// rapier 刚体集合 + 肌肉映射
pub struct RapierMuscleSet {
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub impulse_joints: ImpulseJointSet,
    /// 钉住刚度（力 / 米）
    pub pin_stiffness: f32,
    /// 单块肌肉的最大钉住力
    pub max_force: f32,

    muscles: Vec<RapierMuscle>,
    targets: Vec<MuscleTarget>,
    /// ColliderId → handle
    collider_ids: Vec<ColliderHandle>,
    /// JointId → handle
    joint_ids: Vec<ImpulseJointHandle>,
    /// 由 ComponentEdit 的 Transform 变体驱动的碰撞体偏移
    transform_colliders: HashMap<TransformId, ColliderHandle>,
}

impl Default for RapierMuscleSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RapierMuscleSet {
    pub fn new() -> Self {
        Self {
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            pin_stiffness: 200.0,
            max_force: 500.0,
            muscles: Vec::new(),
            targets: Vec::new(),
            collider_ids: Vec::new(),
            joint_ids: Vec::new(),
            transform_colliders: HashMap::new(),
        }
    }

    /// 添加一块肌肉：动态刚体 + Y 向胶囊碰撞体，返回 (肌肉索引, 碰撞体 id)
    pub fn add_muscle(&mut self, desc: MuscleBodyDesc) -> (usize, ColliderId) {
        let body = RigidBodyBuilder::dynamic()
            .position(to_isometry(desc.position, desc.rotation))
            .linear_damping(desc.linear_damping)
            .angular_damping(desc.angular_damping)
            .build();
        let body = self.bodies.insert(body);
        let collider = ColliderBuilder::capsule_y(desc.half_height.max(0.0), desc.radius.max(0.0))
            .friction(0.8)
            .build();
        let collider = self.colliders.insert_with_parent(collider, body, &mut self.bodies);
        // 质量立即生效，step 之前的冲量也能换算成速度
        if let Some(body) = self.bodies.get_mut(body) {
            body.recompute_mass_properties_from_colliders(&self.colliders);
        }

        let index = self.muscles.len();
        self.muscles.push(RapierMuscle {
            body,
            colliders: vec![collider],
            drive: MuscleDrive::default(),
            linear_damping: desc.linear_damping,
            angular_damping: desc.angular_damping,
            contacts: 0,
        });
        self.targets.push(MuscleTarget {
            position: desc.position,
            rotation: desc.rotation,
        });
        let id = self.register_collider(collider);

        if get_config().debug_log {
            log::info!("[Rapier] 肌肉 {} 创建: 半高={:.3}, 半径={:.3}", index, desc.half_height, desc.radius);
        }
        (index, id)
    }

    /// 登记一个外部创建的碰撞体，供 ComponentSink 寻址
    pub fn register_collider(&mut self, collider: ColliderHandle) -> ColliderId {
        self.collider_ids.push(collider);
        ColliderId(self.collider_ids.len() as u32 - 1)
    }

    pub fn collider_handle(&self, id: ColliderId) -> Option<ColliderHandle> {
        self.collider_ids.get(id.0 as usize).copied()
    }

    pub fn body_handle(&self, muscle: usize) -> Option<RigidBodyHandle> {
        self.muscles.get(muscle).map(|m| m.body)
    }

    /// 用球关节连接两块肌肉，锚点在各自刚体本地空间
    pub fn connect(&mut self, parent: usize, child: usize, parent_anchor: Vec3, child_anchor: Vec3) -> Option<JointId> {
        let body1 = self.body_handle(parent)?;
        let body2 = self.body_handle(child)?;
        let joint = SphericalJointBuilder::new()
            .local_anchor1(to_point(parent_anchor))
            .local_anchor2(to_point(child_anchor))
            .build();
        let handle = self.impulse_joints.insert(body1, body2, joint, true);
        self.joint_ids.push(handle);
        Some(JointId(self.joint_ids.len() as u32 - 1))
    }

    pub fn joint_handle(&self, id: JointId) -> Option<ImpulseJointHandle> {
        self.joint_ids.get(id.0 as usize).copied()
    }

    /// 让某个变换的本地偏移驱动碰撞体相对父刚体的位置
    pub fn bind_transform(&mut self, transform: TransformId, collider: ColliderId) -> bool {
        match self.collider_handle(collider) {
            Some(handle) => {
                self.transform_colliders.insert(transform, handle);
                true
            }
            None => false,
        }
    }

    /// 当前驱动参数
    pub fn drive(&self, muscle: usize) -> Option<MuscleDrive> {
        self.muscles.get(muscle).map(|m| m.drive)
    }

    /// 动画目标位姿（物理前）
    pub fn set_targets(&mut self, targets: &[MuscleTarget]) {
        for (slot, target) in self.targets.iter_mut().zip(targets) {
            *slot = *target;
        }
    }

    /// 按钉住权重给动态刚体施加指向目标的力
    pub fn apply_pin_forces(&mut self) {
        for (muscle, target) in self.muscles.iter().zip(&self.targets) {
            let Some(body) = self.bodies.get_mut(muscle.body) else {
                continue;
            };
            body.reset_forces(false);
            if !body.is_dynamic() {
                continue;
            }
            let (position, _) = from_isometry(body.position());
            let force = pin_force(position, target.position, self.pin_stiffness, &muscle.drive, self.max_force);
            if force != Vec3::ZERO {
                body.add_force(to_vector(force), true);
            }
        }
    }

    /// 外部冲量（打击、爆炸等），按 impulse_multiplier 缩放
    pub fn apply_impulse(&mut self, muscle: usize, impulse: Vec3) {
        let Some(entry) = self.muscles.get(muscle) else {
            return;
        };
        let impulse = impulse * entry.drive.impulse_multiplier.max(0.0);
        if impulse == Vec3::ZERO || !impulse.is_finite() {
            return;
        }
        if let Some(body) = self.bodies.get_mut(entry.body) {
            body.apply_impulse(to_vector(impulse), true);
        }
    }

    /// 写回动画的位姿：mapping_weight 0 为动画目标，1 为刚体模拟结果
    pub fn mapped_pose(&self, muscle: usize) -> Option<(Vec3, Quat)> {
        let entry = self.muscles.get(muscle)?;
        let target = self.targets.get(muscle)?;
        let (position, rotation) = self.muscle_pose(muscle)?;
        let t = entry.drive.mapping_weight.clamp(0.0, 1.0);
        Some((
            target.position.lerp(position, t),
            target.rotation.normalize().slerp(rotation.normalize(), t),
        ))
    }

    /// 从窄相统计每块肌肉的活动接触数（宿主 step 之后调用）
    pub fn sync_contacts(&mut self, narrow_phase: &NarrowPhase) {
        for muscle in &mut self.muscles {
            muscle.contacts = muscle
                .colliders
                .iter()
                .map(|&collider| {
                    narrow_phase
                        .contact_pairs_with(collider)
                        .filter(|pair| pair.has_any_active_contact)
                        .count() as u32
                })
                .sum();
        }
    }

    fn collider_mut(&mut self, id: ColliderId) -> Option<&mut Collider> {
        let handle = self.collider_handle(id)?;
        self.colliders.get_mut(handle)
    }
}

impl MuscleDriver for RapierMuscleSet {
    fn muscle_count(&self) -> usize {
        self.muscles.len()
    }

    fn muscle_pose(&self, muscle: usize) -> Option<(Vec3, Quat)> {
        let body = self.bodies.get(self.muscles.get(muscle)?.body)?;
        let (position, rotation) = from_isometry(body.position());
        (position.is_finite() && rotation.is_finite()).then_some((position, rotation))
    }

    fn collision_count(&self, muscle: usize) -> u32 {
        self.muscles.get(muscle).map(|m| m.contacts).unwrap_or(0)
    }

    fn set_kinematic(&mut self, muscle: usize, kinematic: bool) {
        let Some(handle) = self.muscles.get(muscle).map(|m| m.body) else {
            return;
        };
        if let Some(body) = self.bodies.get_mut(handle) {
            let body_type = if kinematic {
                RigidBodyType::KinematicPositionBased
            } else {
                RigidBodyType::Dynamic
            };
            if body.body_type() != body_type {
                body.set_body_type(body_type, true);
            }
        }
    }

    fn set_colliders_enabled(&mut self, muscle: usize, enabled: bool) {
        let Some(entry) = self.muscles.get(muscle) else {
            return;
        };
        for &handle in &entry.colliders {
            if let Some(collider) = self.colliders.get_mut(handle) {
                collider.set_enabled(enabled);
            }
        }
    }

    fn set_drive(&mut self, muscle: usize, drive: MuscleDrive) {
        let Some(entry) = self.muscles.get_mut(muscle) else {
            return;
        };
        entry.drive = drive;
        let linear = (entry.linear_damping * drive.damper_multiplier + drive.damper_add).max(0.0);
        let angular = (entry.angular_damping * drive.damper_multiplier + drive.damper_add).max(0.0);
        if let Some(body) = self.bodies.get_mut(entry.body) {
            body.set_linear_damping(linear);
            body.set_angular_damping(angular);
        }
    }
}

impl ComponentSink for RapierMuscleSet {
    /// height 含两端半球
    fn set_capsule(&mut self, collider: ColliderId, center: Vec3, axis: Vec3, height: f32, radius: f32) {
        let Some(collider) = self.collider_mut(collider) else {
            return;
        };
        let radius = radius.max(0.0);
        let half = (height * 0.5 - radius).max(0.0);
        let axis = axis.normalize_or_zero();
        let a = to_point(center - axis * half);
        let b = to_point(center + axis * half);
        collider.set_shape(SharedShape::capsule(a, b, radius));
    }

    fn set_box(&mut self, collider: ColliderId, center: Vec3, size: Vec3) {
        let Some(collider) = self.collider_mut(collider) else {
            return;
        };
        let half = size.abs() * 0.5;
        collider.set_shape(SharedShape::cuboid(half.x, half.y, half.z));
        let rotation = collider
            .position_wrt_parent()
            .map(|p| p.rotation)
            .unwrap_or_else(Rotation::identity);
        collider.set_position_wrt_parent(Isometry::from_parts(
            Translation::new(center.x, center.y, center.z),
            rotation,
        ));
    }

    fn set_joint_anchor(&mut self, joint: JointId, anchor: Vec3, connected_anchor: Vec3) {
        let Some(handle) = self.joint_handle(joint) else {
            return;
        };
        if let Some(joint) = self.impulse_joints.get_mut(handle) {
            joint.data.set_local_anchor1(to_point(anchor));
            joint.data.set_local_anchor2(to_point(connected_anchor));
        }
    }

    fn set_local_position(&mut self, transform: TransformId, position: Vec3) {
        let Some(&handle) = self.transform_colliders.get(&transform) else {
            return;
        };
        if let Some(collider) = self.colliders.get_mut(handle) {
            let rotation = collider
                .position_wrt_parent()
                .map(|p| p.rotation)
                .unwrap_or_else(Rotation::identity);
            collider.set_position_wrt_parent(Isometry::from_parts(
                Translation::new(position.x, position.y, position.z),
                rotation,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biped::ComponentEdit;

    fn two_muscles() -> RapierMuscleSet {
        let mut set = RapierMuscleSet::new();
        set.add_muscle(MuscleBodyDesc::capsule(Vec3::new(0.0, 1.0, 0.0), 0.2, 0.1));
        set.add_muscle(MuscleBodyDesc::capsule(Vec3::new(0.0, 0.5, 0.0), 0.2, 0.08));
        set
    }

    #[test]
    fn test_pose_and_kinematic_toggle() {
        let mut set = two_muscles();
        let (position, rotation) = set.muscle_pose(1).unwrap();
        assert!((position - Vec3::new(0.0, 0.5, 0.0)).length() < 1e-6);
        assert!(rotation.angle_between(Quat::IDENTITY) < 1e-5);
        assert!(set.muscle_pose(5).is_none());

        set.set_kinematic(0, true);
        let body = &set.bodies[set.body_handle(0).unwrap()];
        assert_eq!(body.body_type(), RigidBodyType::KinematicPositionBased);
        set.set_kinematic(0, false);
        assert!(set.bodies[set.body_handle(0).unwrap()].is_dynamic());
    }

    #[test]
    fn test_colliders_and_damping() {
        let mut set = two_muscles();
        set.set_colliders_enabled(1, false);
        let handle = set.collider_handle(ColliderId(1)).unwrap();
        assert!(!set.colliders[handle].is_enabled());

        set.set_drive(
            0,
            MuscleDrive {
                damper_add: 1.0,
                damper_multiplier: 2.0,
                ..MuscleDrive::default()
            },
        );
        let body = &set.bodies[set.body_handle(0).unwrap()];
        assert!((body.linear_damping() - 2.0).abs() < 1e-6);
        assert_eq!(set.drive(0).map(|d| d.damper_multiplier), Some(2.0));
    }

    #[test]
    fn test_pin_force_is_capped() {
        let drive = MuscleDrive::default();
        let force = pin_force(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0), 100.0, &drive, 500.0);
        assert!((force.z - 100.0).abs() < 1e-4);
        let force = pin_force(Vec3::ZERO, Vec3::new(0.0, 0.0, 10.0), 100.0, &drive, 500.0);
        assert!((force.length() - 500.0).abs() < 1e-2);
        let unpinned = MuscleDrive {
            pin_weight: 0.0,
            ..drive
        };
        assert_eq!(pin_force(Vec3::ZERO, Vec3::X, 100.0, &unpinned, 500.0), Vec3::ZERO);
    }

    #[test]
    fn test_mapping_weight_blends_written_pose() {
        let mut set = two_muscles();
        set.set_targets(&[
            MuscleTarget::default(),
            MuscleTarget {
                position: Vec3::new(0.0, 1.5, 0.0),
                rotation: Quat::IDENTITY,
            },
        ]);

        // 默认 mapping_weight = 1：完全跟随刚体
        let (position, _) = set.mapped_pose(1).unwrap();
        assert!((position - Vec3::new(0.0, 0.5, 0.0)).length() < 1e-6);

        set.set_drive(
            1,
            MuscleDrive {
                mapping_weight: 0.0,
                ..MuscleDrive::default()
            },
        );
        let (position, _) = set.mapped_pose(1).unwrap();
        assert!((position - Vec3::new(0.0, 1.5, 0.0)).length() < 1e-6);

        set.set_drive(
            1,
            MuscleDrive {
                mapping_weight: 0.25,
                ..MuscleDrive::default()
            },
        );
        let (position, rotation) = set.mapped_pose(1).unwrap();
        assert!((position.y - 1.25).abs() < 1e-5);
        assert!(rotation.angle_between(Quat::IDENTITY) < 1e-5);
        assert!(set.mapped_pose(7).is_none());
    }

    #[test]
    fn test_impulse_multiplier_scales_impulse() {
        let mut set = two_muscles();
        set.set_drive(
            0,
            MuscleDrive {
                impulse_multiplier: 0.0,
                ..MuscleDrive::default()
            },
        );
        set.apply_impulse(0, Vec3::new(10.0, 0.0, 0.0));
        set.apply_impulse(1, Vec3::new(10.0, 0.0, 0.0));

        let still = set.bodies[set.body_handle(0).unwrap()].linvel().norm();
        let pushed = set.bodies[set.body_handle(1).unwrap()].linvel().norm();
        assert_eq!(still, 0.0);
        assert!(pushed > 0.0);
    }

    #[test]
    fn test_component_edits_resize_rapier_shapes() {
        let mut set = two_muscles();
        let edit = ComponentEdit::capsule(ColliderId(0), Vec3::Y, Vec3::ZERO, 0.6, 0.1);
        edit.resize(0.2, &mut set);

        let handle = set.collider_handle(ColliderId(0)).unwrap();
        let capsule = set.colliders[handle].shape().as_capsule().copied().unwrap();
        let length = (capsule.segment.b - capsule.segment.a).norm();
        // 高 0.8，扣掉两端半球
        assert!((length - 0.6).abs() < 1e-4);
        assert!((capsule.radius - 0.1).abs() < 1e-6);

        let joint = set.connect(0, 1, Vec3::new(0.0, -0.3, 0.0), Vec3::new(0.0, 0.3, 0.0)).unwrap();
        set.set_joint_anchor(joint, Vec3::new(0.0, -0.4, 0.0), Vec3::new(0.0, 0.35, 0.0));
        let data = &set.impulse_joints.get(set.joint_handle(joint).unwrap()).unwrap().data;
        assert!((data.local_anchor1().y + 0.4).abs() < 1e-6);
        assert!((data.local_anchor2().y - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_empty_narrow_phase_has_no_contacts() {
        let mut set = two_muscles();
        set.sync_contacts(&NarrowPhase::new());
        assert_eq!(set.collision_count(0), 0);
        assert_eq!(set.collision_count(9), 0);
    }
}
