//! 肌肉配置与混合
//!
//! 混合语义：默认配置打底；同一轮里第一次碰到某块肌肉的配置
//! 用 weight × state 覆盖它，之后的配置在其上累加 weight × state。
//! 没被某个配置碰到的肌肉保留之前的值。权重不做归一化，由调用方负责。

use super::layout::MuscleLayout;
use super::muscle_state::{MuscleState, NamedMuscleState};
use crate::config::get_config;
use crate::{Result, RigError};

/// 整体速度参数，与肌肉状态同样方式混合
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PuppetSpeeds {
    pub rebalance_speed: f32,
    pub unbalance_speed: f32,
    /// 碰撞时 collision_blend 向 1 移动的基础速度
    pub collision_unpin_speed: f32,
    pub collision_recovery_speed: f32,
}

impl Default for PuppetSpeeds {
    fn default() -> Self {
        Self {
            rebalance_speed: 1.0,
            unbalance_speed: 1.0,
            collision_unpin_speed: 10.0,
            collision_recovery_speed: 2.0,
        }
    }
}

impl PuppetSpeeds {
    fn scaled(&self, weight: f32) -> Self {
        Self {
            rebalance_speed: self.rebalance_speed * weight,
            unbalance_speed: self.unbalance_speed * weight,
            collision_unpin_speed: self.collision_unpin_speed * weight,
            collision_recovery_speed: self.collision_recovery_speed * weight,
        }
    }

    fn add_scaled(&mut self, other: &Self, weight: f32) {
        self.rebalance_speed += other.rebalance_speed * weight;
        self.unbalance_speed += other.unbalance_speed * weight;
        self.collision_unpin_speed += other.collision_unpin_speed * weight;
        self.collision_recovery_speed += other.collision_recovery_speed * weight;
    }
}

/// 一套命名配置：按肌肉名给出的状态子集 + 可选速度
#[derive(Clone, Debug, Default)]
pub struct PuppetMuscleConfiguration {
    pub name: String,
    pub muscles: Vec<NamedMuscleState>,
    /// None 表示不参与速度混合
    pub speeds: Option<PuppetSpeeds>,
}

impl PuppetMuscleConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            muscles: Vec::new(),
            speeds: None,
        }
    }

    /// 按布局顺序覆盖全部肌肉的配置
    pub fn full(name: impl Into<String>, layout: &MuscleLayout, states: &[MuscleState]) -> Result<Self> {
        let name = name.into();
        if states.len() != layout.len() {
            return Err(RigError::MuscleCountMismatch {
                name,
                expected: layout.len(),
                got: states.len(),
            });
        }
        let muscles = layout
            .muscles()
            .iter()
            .zip(states)
            .map(|(def, state)| NamedMuscleState::new(def.name.clone(), *state))
            .collect();
        Ok(Self {
            name,
            muscles,
            speeds: Some(PuppetSpeeds::default()),
        })
    }

    pub fn with_muscle(mut self, name: impl Into<String>, state: MuscleState) -> Self {
        self.muscles.push(NamedMuscleState::new(name, state));
        self
    }

    pub fn with_speeds(mut self, speeds: PuppetSpeeds) -> Self {
        self.speeds = Some(speeds);
        self
    }

    /// 配置期解析全部名字，返回未解析的个数（逐个 warn）
    pub fn resolve_all(&self, layout: &MuscleLayout) -> usize {
        let mut unresolved = 0;
        for muscle in &self.muscles {
            if muscle.resolve(layout).is_none() {
                log::warn!("[Puppet] 配置 '{}' 中的肌肉 '{}' 找不到，混合时跳过", self.name, muscle.name);
                unresolved += 1;
            }
        }
        unresolved
    }
}

/// 配置混合器
#[derive(Clone, Debug)]
pub struct PuppetConfigurationBlender {
    default: Vec<MuscleState>,
    default_speeds: PuppetSpeeds,
    applied: Vec<MuscleState>,
    speeds: PuppetSpeeds,
    /// 本轮是否已被某个配置碰过
    touched: Vec<bool>,
}

impl PuppetConfigurationBlender {
    /// 默认配置必须覆盖全部肌肉
    pub fn new(layout: &MuscleLayout, default: &PuppetMuscleConfiguration) -> Result<Self> {
        let mismatch = || RigError::MuscleCountMismatch {
            name: default.name.clone(),
            expected: layout.len(),
            got: default.muscles.len(),
        };
        if default.muscles.len() != layout.len() {
            return Err(mismatch());
        }

        let mut states = vec![None; layout.len()];
        for muscle in &default.muscles {
            if let Some(index) = muscle.resolve(layout) {
                states[index] = Some(muscle.state);
            }
        }
        let states: Option<Vec<MuscleState>> = states.into_iter().collect();
        let states = states.ok_or_else(mismatch)?;
        let speeds = default.speeds.unwrap_or_default();

        if get_config().debug_log {
            log::info!("[Puppet] 默认配置 '{}'：{} 块肌肉", default.name, states.len());
        }

        Ok(Self {
            touched: vec![false; states.len()],
            applied: states.clone(),
            default: states,
            default_speeds: speeds,
            speeds,
        })
    }

    pub fn muscle_count(&self) -> usize {
        self.default.len()
    }

    pub fn default_state(&self, muscle: usize) -> Option<&MuscleState> {
        self.default.get(muscle)
    }

    /// 上一次混合的结果
    pub fn applied(&self) -> &[MuscleState] {
        &self.applied
    }

    pub fn speeds(&self) -> &PuppetSpeeds {
        &self.speeds
    }

    /// 混合一轮：默认配置打底，再按顺序合并 (配置, 权重)
    ///
    /// 权重 <= 0 的配置整体跳过。
    pub fn apply_mix(&mut self, layout: &MuscleLayout, mix: &[(&PuppetMuscleConfiguration, f32)]) -> &[MuscleState] {
        self.applied.clone_from(&self.default);
        self.speeds = self.default_speeds;
        self.touched.iter_mut().for_each(|t| *t = false);
        let mut speeds_touched = false;

        for &(config, weight) in mix {
            if weight.is_nan() || weight <= 0.0 {
                continue;
            }
            for muscle in &config.muscles {
                let Some(index) = muscle.resolve(layout) else {
                    continue;
                };
                let Some(slot) = self.applied.get_mut(index) else {
                    continue;
                };
                if self.touched[index] {
                    slot.add_scaled(&muscle.state, weight);
                } else {
                    *slot = muscle.state.scaled(weight);
                    self.touched[index] = true;
                }
                slot.flags = muscle.state.flags;
            }

            if let Some(speeds) = &config.speeds {
                if speeds_touched {
                    self.speeds.add_scaled(speeds, weight);
                } else {
                    self.speeds = speeds.scaled(weight);
                    speeds_touched = true;
                }
            }
        }
        &self.applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puppet::layout::MuscleDef;

    fn layout() -> MuscleLayout {
        MuscleLayout::new(vec![
            MuscleDef::root("m0"),
            MuscleDef::child("m1", 0),
            MuscleDef::child("m2", 0),
            MuscleDef::child("m3", 0),
            MuscleDef::child("m4", 0),
        ])
        .unwrap()
    }

    fn state(pin: f32) -> MuscleState {
        MuscleState {
            pin_weight: pin,
            ..MuscleState::default()
        }
    }

    fn blender(layout: &MuscleLayout) -> PuppetConfigurationBlender {
        let default = PuppetMuscleConfiguration::full("default", layout, &[state(1.0); 5]).unwrap();
        PuppetConfigurationBlender::new(layout, &default).unwrap()
    }

    #[test]
    fn test_default_must_cover_all_muscles() {
        let layout = layout();
        assert!(matches!(
            PuppetMuscleConfiguration::full("short", &layout, &[state(1.0); 3]),
            Err(RigError::MuscleCountMismatch { expected: 5, got: 3, .. })
        ));
        let partial = PuppetMuscleConfiguration::new("partial").with_muscle("m1", state(0.5));
        assert!(PuppetConfigurationBlender::new(&layout, &partial).is_err());
    }

    #[test]
    fn test_disjoint_configurations_do_not_mix() {
        let layout = layout();
        let mut blender = blender(&layout);
        let a = PuppetMuscleConfiguration::new("a")
            .with_muscle("m1", state(0.2))
            .with_muscle("m2", state(0.3));
        let b = PuppetMuscleConfiguration::new("b")
            .with_muscle("m3", state(0.4))
            .with_muscle("m4", state(0.6));

        let applied = blender.apply_mix(&layout, &[(&a, 1.0), (&b, 1.0)]);
        assert_eq!(applied[0], state(1.0));
        assert_eq!(applied[1], state(0.2));
        assert_eq!(applied[2], state(0.3));
        assert_eq!(applied[3], state(0.4));
        assert_eq!(applied[4], state(0.6));
    }

    #[test]
    fn test_overlapping_configurations_accumulate() {
        let layout = layout();
        let mut blender = blender(&layout);
        let a = PuppetMuscleConfiguration::new("a").with_muscle("m1", state(0.2));
        let b = PuppetMuscleConfiguration::new("b").with_muscle("m1", state(0.6));

        // 调用方按配置数归一化
        let applied = blender.apply_mix(&layout, &[(&a, 0.5), (&b, 0.5)]);
        assert!((applied[1].pin_weight - 0.4).abs() < 1e-6);

        // 不归一化时结果超过单个配置
        let applied = blender.apply_mix(&layout, &[(&a, 1.0), (&b, 1.0)]);
        assert!((applied[1].pin_weight - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_immunity_and_impulse_fields_blend() {
        let layout = layout();
        let mut blender = blender(&layout);
        let guarded = MuscleState {
            immunity: 1.0,
            impulse_multiplier: 0.0,
            collision_max_force_multiplier: 0.2,
            ..state(1.0)
        };
        let a = PuppetMuscleConfiguration::new("a").with_muscle("m3", guarded);

        let applied = blender.apply_mix(&layout, &[(&a, 0.5)]);
        assert!((applied[3].immunity - 0.5).abs() < 1e-6);
        assert!(applied[3].impulse_multiplier.abs() < 1e-6);
        assert!((applied[3].collision_max_force_multiplier - 0.1).abs() < 1e-6);
        // 未触及的肌肉保持默认
        assert_eq!(applied[0].immunity, 0.0);
        assert_eq!(applied[0].impulse_multiplier, 1.0);
    }

    #[test]
    fn test_each_pass_starts_from_default() {
        let layout = layout();
        let mut blender = blender(&layout);
        let a = PuppetMuscleConfiguration::new("a").with_muscle("m2", state(0.0));
        blender.apply_mix(&layout, &[(&a, 1.0)]);
        let applied = blender.apply_mix(&layout, &[]);
        assert_eq!(applied[2], state(1.0));
    }

    #[test]
    fn test_flags_override_and_unknown_names_skip() {
        let layout = layout();
        let mut blender = blender(&layout);
        let mut loose = state(0.0);
        loose.flags = crate::puppet::MuscleFlags::empty();
        let a = PuppetMuscleConfiguration::new("a")
            .with_muscle("m1", loose)
            .with_muscle("tail", state(0.0));
        assert_eq!(a.resolve_all(&layout), 1);

        let applied = blender.apply_mix(&layout, &[(&a, 0.25), (&a, 0.0)]);
        assert!(applied[1].flags.is_empty());
        assert_eq!(applied.len(), 5);
    }

    #[test]
    fn test_speeds_blend() {
        let layout = layout();
        let mut blender = blender(&layout);
        let fast = PuppetMuscleConfiguration::new("fast").with_speeds(PuppetSpeeds {
            rebalance_speed: 4.0,
            ..PuppetSpeeds::default()
        });
        let slow = PuppetMuscleConfiguration::new("slow").with_speeds(PuppetSpeeds {
            rebalance_speed: 2.0,
            ..PuppetSpeeds::default()
        });
        blender.apply_mix(&layout, &[(&fast, 0.5), (&slow, 0.5)]);
        assert!((blender.speeds().rebalance_speed - 3.0).abs() < 1e-6);
        blender.apply_mix(&layout, &[]);
        assert_eq!(*blender.speeds(), PuppetSpeeds::default());
    }
}
