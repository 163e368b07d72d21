//! 碰撞解钉传播
//!
//! 本帧有碰撞的肌肉 collision_blend 向 1 移动（速度除以碰撞抗性，乘 1 - immunity），
//! 然后把更新后的 blend 按 unpin_parents / unpin_children 逐级衰减地
//! 传给父链和子树，按 unpin_group 传给同组肌肉，取最大值合并。
//! 没被碰撞或传播触及的肌肉以 collision_recovery_speed 回落到 0。

use super::configuration::PuppetSpeeds;
use super::layout::MuscleLayout;
use super::muscle_state::MuscleState;
use crate::math::move_towards;

const MIN_RESISTANCE: f32 = 1e-4;
/// 传播值低于此值即停止
const PROPAGATION_CUTOFF: f32 = 1e-4;

#[derive(Clone, Debug, Default)]
pub struct CollisionUnpin {
    blends: Vec<f32>,
    /// 本帧被传播触及的下限值
    floor: Vec<f32>,
    held: Vec<bool>,
    stack: Vec<(usize, f32)>,
}

impl CollisionUnpin {
    pub fn new(muscle_count: usize) -> Self {
        Self {
            blends: vec![0.0; muscle_count],
            floor: vec![0.0; muscle_count],
            held: vec![false; muscle_count],
            stack: Vec::new(),
        }
    }

    #[inline]
    pub fn blends(&self) -> &[f32] {
        &self.blends
    }

    pub fn blend(&self, muscle: usize) -> f32 {
        self.blends.get(muscle).copied().unwrap_or(0.0)
    }

    pub fn reset(&mut self) {
        self.blends.iter_mut().for_each(|b| *b = 0.0);
    }

    /// collisions[i] 为肌肉 i 本帧的碰撞数
    pub fn update(
        &mut self,
        layout: &MuscleLayout,
        states: &[MuscleState],
        collisions: &[u32],
        speeds: &PuppetSpeeds,
        dt: f32,
    ) {
        let count = self.blends.len().min(states.len()).min(layout.len());
        let dt = dt.max(0.0);
        self.floor.iter_mut().for_each(|f| *f = 0.0);
        self.held.iter_mut().for_each(|h| *h = false);

        // 碰撞肌肉自身
        for muscle in 0..count {
            if collisions.get(muscle).copied().unwrap_or(0) == 0 {
                continue;
            }
            let state = &states[muscle];
            let resistance = state.collision_resistance.max(MIN_RESISTANCE);
            let step = dt * speeds.collision_unpin_speed * (1.0 - state.immunity.clamp(0.0, 1.0)) / resistance;
            self.blends[muscle] = move_towards(self.blends[muscle], 1.0, step);
            self.held[muscle] = true;
        }

        for muscle in 0..count {
            if self.held[muscle] && self.blends[muscle] > 0.0 {
                self.propagate(layout, states, muscle, count);
            }
        }

        for muscle in 0..count {
            if self.held[muscle] {
                self.blends[muscle] = self.blends[muscle].max(self.floor[muscle]);
            } else if self.floor[muscle] > 0.0 {
                self.blends[muscle] = self.blends[muscle].max(self.floor[muscle]);
            } else {
                let step = dt * speeds.collision_recovery_speed;
                self.blends[muscle] = move_towards(self.blends[muscle], 0.0, step);
            }
        }
    }

    fn raise(&mut self, muscle: usize, value: f32) {
        if value > self.floor[muscle] {
            self.floor[muscle] = value;
        }
    }

    fn propagate(&mut self, layout: &MuscleLayout, states: &[MuscleState], source: usize, count: usize) {
        let blend = self.blends[source];
        let state = &states[source];

        // 父链：每一级乘一次
        let mut value = blend;
        let mut current = source;
        while let Some(parent) = layout.parent(current).filter(|&p| p < count) {
            value *= states[current].unpin_parents;
            if value < PROPAGATION_CUTOFF {
                break;
            }
            self.raise(parent, value);
            current = parent;
        }

        // 子树：深度优先，每深一层乘一次
        self.stack.clear();
        self.stack.push((source, blend));
        while let Some((muscle, value)) = self.stack.pop() {
            let factor = states[muscle].unpin_children;
            for &child in layout.children(muscle) {
                if child >= count {
                    continue;
                }
                let child_value = value * factor;
                if child_value < PROPAGATION_CUTOFF {
                    continue;
                }
                self.raise(child, child_value);
                self.stack.push((child, child_value));
            }
        }

        // 同组（未分组的肌肉不传播）
        let group_value = blend * state.unpin_group;
        if group_value >= PROPAGATION_CUTOFF {
            if let Some(group) = layout.group(source) {
                for other in 0..count {
                    if other != source && layout.group(other) == Some(group) {
                        self.raise(other, group_value);
                    }
                }
            }
        }
    }
}
