//! 单个布娃娃：配置混合 → 推给物理 → 物理后更新平衡与解钉

use super::balance::{MuscleDeviation, MuscleTarget, PuppetBalance, PuppetState};
use super::collision::CollisionUnpin;
use super::configuration::{PuppetConfigurationBlender, PuppetMuscleConfiguration};
use super::driver::{MuscleDrive, MuscleDriver};
use super::layout::MuscleLayout;
use super::muscle_state::{MuscleFlags, MuscleState};
use crate::config::get_config;
use crate::Result;

/// 按 collision_blend 在基础值与碰撞变体之间插值
pub fn effective_drive(state: &MuscleState, collision_blend: f32) -> MuscleDrive {
    let t = collision_blend.clamp(0.0, 1.0);
    let lerp = |a: f32, b: f32| a + (b - a) * t;
    MuscleDrive {
        pin_weight: lerp(state.pin_weight, state.collision_pin_weight),
        mapping_weight: lerp(state.mapping_weight, state.collision_mapping_weight),
        muscle_weight: lerp(state.muscle_weight, state.collision_muscle_weight),
        damper_add: state.muscle_damper_add,
        damper_multiplier: state.muscle_damper_multiplier,
        max_force_multiplier: lerp(state.max_force_multiplier, state.collision_max_force_multiplier),
        impulse_multiplier: state.impulse_multiplier,
    }
}

pub struct Puppet {
    layout: MuscleLayout,
    blender: PuppetConfigurationBlender,
    balance: PuppetBalance,
    unpin: CollisionUnpin,
    targets: Vec<MuscleTarget>,
    deviations: Vec<MuscleDeviation>,
    collisions: Vec<u32>,
}

impl Puppet {
    pub fn new(layout: MuscleLayout, default: &PuppetMuscleConfiguration) -> Result<Self> {
        let blender = PuppetConfigurationBlender::new(&layout, default)?;
        let count = layout.len();
        if get_config().debug_log {
            log::info!("[Puppet] 创建布娃娃：{} 块肌肉", count);
        }
        Ok(Self {
            layout,
            blender,
            balance: PuppetBalance::default(),
            unpin: CollisionUnpin::new(count),
            targets: vec![MuscleTarget::default(); count],
            deviations: vec![MuscleDeviation::default(); count],
            collisions: vec![0; count],
        })
    }

    pub fn layout(&self) -> &MuscleLayout {
        &self.layout
    }

    pub fn muscle_count(&self) -> usize {
        self.layout.len()
    }

    pub fn blender(&self) -> &PuppetConfigurationBlender {
        &self.blender
    }

    pub fn balance(&self) -> f32 {
        self.balance.balance()
    }

    pub fn state(&self) -> PuppetState {
        self.balance.state()
    }

    pub fn balance_machine(&self) -> &PuppetBalance {
        &self.balance
    }

    pub fn collision_blend(&self, muscle: usize) -> f32 {
        self.unpin.blend(muscle)
    }

    pub fn applied_state(&self, muscle: usize) -> Option<&MuscleState> {
        self.blender.applied().get(muscle)
    }

    pub fn deviation(&self, muscle: usize) -> Option<&MuscleDeviation> {
        self.deviations.get(muscle)
    }

    /// 动画层在物理前提供目标位姿（按肌肉顺序，多余的忽略）
    pub fn set_targets(&mut self, targets: &[MuscleTarget]) {
        for (slot, target) in self.targets.iter_mut().zip(targets) {
            *slot = *target;
        }
    }

    pub fn set_target(&mut self, muscle: usize, target: MuscleTarget) {
        if let Some(slot) = self.targets.get_mut(muscle) {
            *slot = target;
        }
    }

    /// 混合配置，结果留在混合器里等待推送
    pub fn apply_mix(&mut self, mix: &[(&PuppetMuscleConfiguration, f32)]) {
        self.blender.apply_mix(&self.layout, mix);
    }

    /// 当前生效的驱动参数
    pub fn drive(&self, muscle: usize) -> Option<MuscleDrive> {
        self.applied_state(muscle)
            .map(|state| effective_drive(state, self.unpin.blend(muscle)))
    }

    /// 把混合结果推给物理层
    pub fn push_to_driver(&self, driver: &mut dyn MuscleDriver) {
        let no_colliders = self.state() == PuppetState::NormalNoCollider;
        let count = self.layout.len().min(driver.muscle_count());
        for (muscle, state) in self.blender.applied().iter().enumerate().take(count) {
            let drive = effective_drive(state, self.unpin.blend(muscle));
            let colliders = if no_colliders {
                false
            } else if drive.pin_weight < state.disable_colliders_unpin_threshold {
                state.flags.contains(MuscleFlags::UNPINNED_COLLIDERS)
            } else {
                state.flags.contains(MuscleFlags::PINNED_COLLIDERS)
            };
            driver.set_drive(muscle, drive);
            driver.set_colliders_enabled(muscle, colliders);
            driver.set_kinematic(muscle, state.flags.contains(MuscleFlags::KINEMATIC));
        }
    }

    /// 物理写回之后：测偏差、更新解钉与平衡，再推送一次驱动
    ///
    /// 读不到位姿的肌肉这一帧不参与平衡计算。
    pub fn post_physics(&mut self, driver: &mut dyn MuscleDriver, dt: f32) -> Option<PuppetState> {
        for muscle in 0..self.layout.len() {
            self.deviations[muscle] = match driver.muscle_pose(muscle) {
                Some((position, rotation)) => MuscleDeviation::measure(position, rotation, &self.targets[muscle]),
                None => MuscleDeviation {
                    distance: f32::NAN,
                    angle: f32::NAN,
                },
            };
            self.collisions[muscle] = driver.collision_count(muscle);
        }

        let speeds = *self.blender.speeds();
        self.unpin
            .update(&self.layout, self.blender.applied(), &self.collisions, &speeds, dt);
        let transition = self
            .balance
            .update(self.blender.applied(), &self.deviations, &speeds, dt);
        self.push_to_driver(driver);
        transition
    }

    /// 瞬移：平衡归 1、状态回 Normal、碰撞混合清零
    pub fn teleport(&mut self) {
        self.balance.reset();
        self.unpin.reset();
        if get_config().debug_log {
            log::info!("[Puppet] 瞬移复位");
        }
    }

    pub fn begin_getting_up(&mut self) {
        self.balance.begin_getting_up();
    }

    pub fn force_state(&mut self, state: PuppetState) {
        self.balance.force_state(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puppet::driver::tests::RecordingDriver;
    use crate::puppet::layout::MuscleDef;
    use glam::{Quat, Vec3};

    fn puppet() -> Puppet {
        let layout = MuscleLayout::new(vec![
            MuscleDef::root("hips"),
            MuscleDef::child("spine", 0),
            MuscleDef::child("head", 1),
        ])
        .unwrap();
        let state = MuscleState {
            unbalance_distance_threshold: 0.1,
            unbalance_distance_range: 0.1,
            collision_pin_weight: 0.0,
            ..MuscleState::default()
        };
        let default = PuppetMuscleConfiguration::full("default", &layout, &[state; 3]).unwrap();
        Puppet::new(layout, &default).unwrap()
    }

    #[test]
    fn test_push_drives_and_collider_threshold() {
        let mut puppet = puppet();
        let mut loose = MuscleState {
            pin_weight: 0.2,
            ..MuscleState::default()
        };
        loose.flags = MuscleFlags::PINNED_COLLIDERS | MuscleFlags::KINEMATIC;
        let config = PuppetMuscleConfiguration::new("loose").with_muscle("head", loose);
        puppet.apply_mix(&[(&config, 1.0)]);

        let mut driver = RecordingDriver::new(3);
        puppet.push_to_driver(&mut driver);
        assert!((driver.drives[2].pin_weight - 0.2).abs() < 1e-6);
        // 0.2 < 0.5：走解钉开关，而 loose 没打开它
        assert_eq!(driver.colliders, vec![true, true, false]);
        assert_eq!(driver.kinematic, vec![false, false, true]);

        puppet.force_state(PuppetState::NormalNoCollider);
        puppet.push_to_driver(&mut driver);
        assert!(driver.colliders.iter().all(|c| !c));
    }

    #[test]
    fn test_collision_lowers_pin_and_teleport_restores() {
        let mut puppet = puppet();
        let mut driver = RecordingDriver::new(3);
        driver.collisions[2] = 1;
        puppet.post_physics(&mut driver, 0.05);

        // 0.05 * 10 / 1 = 0.5
        assert!((puppet.collision_blend(2) - 0.5).abs() < 1e-6);
        assert!((driver.drives[2].pin_weight - 0.5).abs() < 1e-6);
        assert!(puppet.collision_blend(1) > 0.0);

        puppet.teleport();
        assert_eq!(puppet.collision_blend(2), 0.0);
        assert_eq!(puppet.balance(), 1.0);
        assert_eq!(puppet.state(), PuppetState::Normal);
    }

    #[test]
    fn test_immunity_and_collision_force_variant() {
        let mut puppet = puppet();
        let guarded = MuscleState {
            immunity: 1.0,
            max_force_multiplier: 1.0,
            collision_max_force_multiplier: 0.0,
            impulse_multiplier: 0.25,
            ..MuscleState::default()
        };
        let armored = MuscleState {
            immunity: 0.5,
            max_force_multiplier: 1.0,
            collision_max_force_multiplier: 0.0,
            unpin_parents: 0.0,
            ..MuscleState::default()
        };
        let config = PuppetMuscleConfiguration::new("guarded")
            .with_muscle("hips", guarded)
            .with_muscle("head", armored);
        puppet.apply_mix(&[(&config, 1.0)]);

        let mut driver = RecordingDriver::new(3);
        driver.collisions[0] = 1;
        driver.collisions[2] = 1;
        puppet.post_physics(&mut driver, 0.05);

        // 完全免疫：碰撞不解钉
        assert_eq!(puppet.collision_blend(0), 0.0);
        assert_eq!(driver.drives[0].max_force_multiplier, 1.0);
        assert_eq!(driver.drives[0].impulse_multiplier, 0.25);
        // 0.05 * 10 * (1 - 0.5) = 0.25
        assert!((puppet.collision_blend(2) - 0.25).abs() < 1e-6);
        assert!((driver.drives[2].max_force_multiplier - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_balance_follows_target_deviation() {
        let mut puppet = puppet();
        let mut driver = RecordingDriver::new(3);
        let far = MuscleTarget {
            position: Vec3::new(0.0, 1.0, 0.0),
            rotation: Quat::IDENTITY,
        };
        puppet.set_targets(&[far; 3]);

        let mut transitions = Vec::new();
        for _ in 0..30 {
            if let Some(state) = puppet.post_physics(&mut driver, 1.0 / 60.0) {
                transitions.push(state);
            }
        }
        assert_eq!(transitions, vec![PuppetState::OffBalance, PuppetState::Tumbling]);
        assert_eq!(puppet.balance(), 0.0);

        // 目标贴合后平衡回升，但只有起身才会回到 Normal
        puppet.set_targets(&[MuscleTarget::default(); 3]);
        puppet.begin_getting_up();
        let mut recovered = false;
        for _ in 0..60 {
            if puppet.post_physics(&mut driver, 1.0 / 60.0) == Some(PuppetState::Normal) {
                recovered = true;
                break;
            }
        }
        assert!(recovered);
    }

    #[test]
    fn test_missing_pose_is_skipped() {
        let mut puppet = puppet();
        let mut driver = RecordingDriver::new(1);
        puppet.post_physics(&mut driver, 1.0 / 60.0);
        assert!(puppet.deviation(2).is_some_and(|d| d.distance.is_nan()));
        assert_eq!(puppet.balance(), 1.0);
    }
}
