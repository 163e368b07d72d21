//! 自动收缩绑定：标定 + 逐帧求值

use glam::{Quat, Vec3};

use super::target::FlexTarget;
use crate::math::{signed_angle_around, wrap_angle};
use crate::skeleton::TransformSnapshot;

/// 每个绑定最多的子目标数
pub const MAX_FLEX_TARGETS: usize = 4;

/// 绑定时捕获的标定状态（全部在 root 空间）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub start_position: Vec3,
    pub start_rotation_inv: Quat,
    /// 垂直于轴的参考向量，用来度量绕轴转角
    pub start_reference: Vec3,
    pub start_axis: Vec3,
}

/// target 相对 root 的 (位置, 旋转)
fn relative_pose(root: &TransformSnapshot, target: &TransformSnapshot) -> (Vec3, Quat) {
    let inv = root.world_rotation.inverse();
    (
        inv * (target.world_position - root.world_position),
        (inv * target.world_rotation).normalize(),
    )
}

/// 任取一个与 axis 垂直的单位向量
fn perpendicular(axis: Vec3) -> Vec3 {
    let candidate = if axis.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
    axis.cross(candidate).normalize_or_zero()
}

impl Calibration {
    pub fn capture(root: &TransformSnapshot, target: &TransformSnapshot, axis: Vec3) -> Self {
        let (position, rotation) = relative_pose(root, target);
        Self {
            start_position: position,
            start_rotation_inv: rotation.inverse(),
            start_reference: rotation * perpendicular(axis),
            start_axis: rotation * axis,
        }
    }
}

/// 子目标运行状态
#[derive(Clone, Copy, Debug)]
pub(crate) struct TargetState {
    pub config: FlexTarget,
    /// 追踪变换槽
    pub slot: usize,
    pub calibration: Calibration,
    pub distance_value: f32,
    pub angle_value: f32,
    pub previous_angle: Option<f32>,
}

/// 一个绑定：root + 至多 4 个子目标
#[derive(Clone, Debug)]
pub struct AutoFlexBinding {
    pub(crate) root_slot: usize,
    pub(crate) targets: Vec<TargetState>,
    output: f32,
}

impl AutoFlexBinding {
    pub(crate) fn new(root_slot: usize, targets: Vec<TargetState>) -> Self {
        Self {
            root_slot,
            targets,
            output: 0.0,
        }
    }

    /// 组合输出 [0, 1]
    #[inline]
    pub fn output(&self) -> f32 {
        self.output
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn target(&self, index: usize) -> Option<&FlexTarget> {
        self.targets.get(index).map(|t| &t.config)
    }

    /// 子目标的 (距离权重值, 角度权重值)
    pub fn target_values(&self, index: usize) -> Option<(f32, f32)> {
        self.targets.get(index).map(|t| (t.distance_value, t.angle_value))
    }

    pub fn calibration(&self, index: usize) -> Option<&Calibration> {
        self.targets.get(index).map(|t| &t.calibration)
    }

    /// 以当前姿态重新标定
    pub(crate) fn recalibrate(&mut self, snapshots: &[TransformSnapshot], valid: &[bool]) {
        if !valid.get(self.root_slot).copied().unwrap_or(false) {
            return;
        }
        let root = snapshots[self.root_slot];
        for target in &mut self.targets {
            if valid.get(target.slot).copied().unwrap_or(false) {
                target.calibration = Calibration::capture(&root, &snapshots[target.slot], target.config.axis);
                target.previous_angle = None;
            }
        }
    }

    /// 求值；root 或子目标失效时该路输出保持不变
    pub(crate) fn evaluate(&mut self, snapshots: &[TransformSnapshot], valid: &[bool], dt: f32) {
        if !valid.get(self.root_slot).copied().unwrap_or(false) {
            return;
        }
        let root = snapshots[self.root_slot];

        let mut output = 1.0f32;
        let mut total_weight = 0.0f32;
        for target in &mut self.targets {
            let config = target.config;
            total_weight += config.distance_weight + config.angle_weight;

            if valid.get(target.slot).copied().unwrap_or(false) {
                let (position, rotation) = relative_pose(&root, &snapshots[target.slot]);
                let calibration = target.calibration;

                if config.distance_weight > 0.0 {
                    let distance = (position - calibration.start_position).length();
                    if distance.is_finite() {
                        target.distance_value = config.distance.evaluate(distance);
                    }
                }

                if config.angle_weight > 0.0 {
                    let current_axis = rotation * config.axis;
                    let alignment = config.alignment(current_axis.dot(calibration.start_axis));
                    let reference = rotation * perpendicular(config.axis);
                    let angle = signed_angle_around(calibration.start_reference, reference, calibration.start_axis);

                    let speed_multiplier = match (config.speed_gate, target.previous_angle) {
                        (Some(gate), Some(previous)) if dt > 0.0 => {
                            gate.evaluate(wrap_angle(angle - previous) / dt)
                        }
                        (Some(gate), _) => gate.evaluate(0.0),
                        (None, _) => 1.0,
                    };
                    let value = config.angle.evaluate(angle) * alignment * speed_multiplier;
                    if value.is_finite() && reference.is_finite() {
                        target.angle_value = value;
                        target.previous_angle = Some(angle);
                    }
                }
            }

            // weight 插值到 1：weight 为 0 的一路不起作用
            if config.distance_weight > 0.0 {
                output *= 1.0 + (target.distance_value - 1.0) * config.distance_weight;
            }
            if config.angle_weight > 0.0 {
                output *= 1.0 + (target.angle_value - 1.0) * config.angle_weight;
            }
        }

        self.output = if total_weight > 0.0 { output.clamp(0.0, 1.0) } else { 0.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flex::target::{SpeedGate, WeightShape};
    use crate::skeleton::TransformId;
    use std::f32::consts::FRAC_PI_2;

    fn snapshot(position: Vec3, rotation: Quat) -> TransformSnapshot {
        TransformSnapshot {
            world_position: position,
            world_rotation: rotation,
            local_position: position,
            local_rotation: rotation,
        }
    }

    fn binding(config: FlexTarget, start: &[TransformSnapshot]) -> AutoFlexBinding {
        let state = TargetState {
            config,
            slot: 1,
            calibration: Calibration::capture(&start[0], &start[1], config.axis),
            distance_value: 0.0,
            angle_value: 0.0,
            previous_angle: None,
        };
        AutoFlexBinding::new(0, vec![state])
    }

    #[test]
    fn test_angle_weight_tracks_twist() {
        let start = [snapshot(Vec3::ZERO, Quat::IDENTITY), snapshot(Vec3::Y, Quat::IDENTITY)];
        let config = FlexTarget::angle(TransformId(1), Vec3::X, WeightShape::new(0.0, FRAC_PI_2));
        let mut b = binding(config, &start);

        let now = [start[0], snapshot(Vec3::Y, Quat::from_rotation_x(FRAC_PI_2 * 0.5))];
        b.evaluate(&now, &[true, true], 1.0 / 60.0);
        assert!((b.output() - 0.5).abs() < 1e-4);

        // 反向旋转被钳制为 0
        let now = [start[0], snapshot(Vec3::Y, Quat::from_rotation_x(-0.3))];
        b.evaluate(&now, &[true, true], 1.0 / 60.0);
        assert!(b.output().abs() < 1e-6);
    }

    #[test]
    fn test_speed_gate_follows_rotation_across_pi() {
        let start = [snapshot(Vec3::ZERO, Quat::IDENTITY), snapshot(Vec3::Y, Quat::IDENTITY)];
        let shape = WeightShape::new(-4.0, 4.0);
        let gate = SpeedGate {
            speed_min: -1.0,
            speed_max: 1.0,
            multiplier_min: 0.0,
            multiplier_max: 1.0,
        };
        let config = FlexTarget::angle(TransformId(1), Vec3::X, shape).with_speed_gate(gate);
        let mut b = binding(config, &start);
        let dt = 1.0 / 60.0;

        let now = [start[0], snapshot(Vec3::Y, Quat::from_rotation_x(3.13))];
        b.evaluate(&now, &[true, true], dt);
        // 0.02 rad 一帧 = 1.2 rad/s，门控全开
        let now = [start[0], snapshot(Vec3::Y, Quat::from_rotation_x(3.15))];
        b.evaluate(&now, &[true, true], dt);
        let expected = shape.evaluate(3.15 - 2.0 * std::f32::consts::PI);
        assert!(expected > 0.1);
        assert!((b.output() - expected).abs() < 1e-3, "output {}", b.output());
    }

    #[test]
    fn test_axis_misalignment_suppresses_angle() {
        let start = [snapshot(Vec3::ZERO, Quat::IDENTITY), snapshot(Vec3::Y, Quat::IDENTITY)];
        let config = FlexTarget::angle(TransformId(1), Vec3::X, WeightShape::new(0.0, 1.0));
        let mut b = binding(config, &start);

        // 轴被转到 Z 上：对齐 dot = 0
        let now = [start[0], snapshot(Vec3::Y, Quat::from_rotation_y(FRAC_PI_2) * Quat::from_rotation_x(0.8))];
        b.evaluate(&now, &[true, true], 1.0 / 60.0);
        assert!(b.output().abs() < 1e-5);
    }

    #[test]
    fn test_zero_weight_target_is_ignored() {
        let start = [
            snapshot(Vec3::ZERO, Quat::IDENTITY),
            snapshot(Vec3::Y, Quat::IDENTITY),
            snapshot(Vec3::X, Quat::IDENTITY),
        ];
        let moving = FlexTarget::distance(TransformId(1), WeightShape::new(0.0, 0.2));
        let ignored = FlexTarget::distance(TransformId(2), WeightShape::new(0.0, 0.2)).with_weights(0.0, 0.0);
        let mut b = binding(moving, &start);
        b.targets.push(TargetState {
            config: ignored,
            slot: 2,
            calibration: Calibration::capture(&start[0], &start[2], ignored.axis),
            distance_value: 0.0,
            angle_value: 0.0,
            previous_angle: None,
        });

        let now = [start[0], snapshot(Vec3::new(0.0, 1.2, 0.0), Quat::IDENTITY), start[2]];
        b.evaluate(&now, &[true, true, true], 1.0 / 60.0);
        assert!((b.output() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_all_zero_weights_output_zero() {
        let start = [snapshot(Vec3::ZERO, Quat::IDENTITY), snapshot(Vec3::Y, Quat::IDENTITY)];
        let config = FlexTarget::distance(TransformId(1), WeightShape::new(0.0, 0.2)).with_weights(0.0, 0.0);
        let mut b = binding(config, &start);
        b.evaluate(&start, &[true, true], 1.0 / 60.0);
        assert_eq!(b.output(), 0.0);
    }

    #[test]
    fn test_half_weight_lerps_towards_one() {
        let start = [snapshot(Vec3::ZERO, Quat::IDENTITY), snapshot(Vec3::Y, Quat::IDENTITY)];
        let config = FlexTarget::distance(TransformId(1), WeightShape::new(0.0, 0.2)).with_weights(0.5, 0.0);
        let mut b = binding(config, &start);
        // 未移动：距离值 0 → lerp(1, 0, 0.5) = 0.5
        b.evaluate(&start, &[true, true], 1.0 / 60.0);
        assert!((b.output() - 0.5).abs() < 1e-6);
    }
}
