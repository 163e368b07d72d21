//! 物理约束层接口

use glam::{Quat, Vec3};

/// 推给单块肌肉的驱动参数（已按 collision_blend 插值）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MuscleDrive {
    pub pin_weight: f32,
    pub mapping_weight: f32,
    pub muscle_weight: f32,
    pub damper_add: f32,
    pub damper_multiplier: f32,
    pub max_force_multiplier: f32,
    pub impulse_multiplier: f32,
}

impl Default for MuscleDrive {
    fn default() -> Self {
        Self {
            pin_weight: 1.0,
            mapping_weight: 1.0,
            muscle_weight: 1.0,
            damper_add: 0.0,
            damper_multiplier: 1.0,
            max_force_multiplier: 1.0,
            impulse_multiplier: 1.0,
        }
    }
}

/// 物理/约束层
///
/// 索引按肌肉布局顺序；越界索引由实现方忽略。
pub trait MuscleDriver {
    fn muscle_count(&self) -> usize;

    /// 肌肉刚体当前世界位姿
    fn muscle_pose(&self, muscle: usize) -> Option<(Vec3, Quat)>;

    /// 本帧接触数
    fn collision_count(&self, muscle: usize) -> u32;

    fn set_kinematic(&mut self, muscle: usize, kinematic: bool);

    fn set_colliders_enabled(&mut self, muscle: usize, enabled: bool);

    fn set_drive(&mut self, muscle: usize, drive: MuscleDrive);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 记录调用的内存驱动
    #[derive(Clone, Debug, Default)]
    pub struct RecordingDriver {
        pub poses: Vec<(Vec3, Quat)>,
        pub collisions: Vec<u32>,
        pub kinematic: Vec<bool>,
        pub colliders: Vec<bool>,
        pub drives: Vec<MuscleDrive>,
    }

    impl RecordingDriver {
        pub fn new(count: usize) -> Self {
            Self {
                poses: vec![(Vec3::ZERO, Quat::IDENTITY); count],
                collisions: vec![0; count],
                kinematic: vec![false; count],
                colliders: vec![true; count],
                drives: vec![MuscleDrive::default(); count],
            }
        }
    }

    impl MuscleDriver for RecordingDriver {
        fn muscle_count(&self) -> usize {
            self.poses.len()
        }

        fn muscle_pose(&self, muscle: usize) -> Option<(Vec3, Quat)> {
            self.poses.get(muscle).copied()
        }

        fn collision_count(&self, muscle: usize) -> u32 {
            self.collisions.get(muscle).copied().unwrap_or(0)
        }

        fn set_kinematic(&mut self, muscle: usize, kinematic: bool) {
            if let Some(slot) = self.kinematic.get_mut(muscle) {
                *slot = kinematic;
            }
        }

        fn set_colliders_enabled(&mut self, muscle: usize, enabled: bool) {
            if let Some(slot) = self.colliders.get_mut(muscle) {
                *slot = enabled;
            }
        }

        fn set_drive(&mut self, muscle: usize, drive: MuscleDrive) {
            if let Some(slot) = self.drives.get_mut(muscle) {
                *slot = drive;
            }
        }
    }
}
