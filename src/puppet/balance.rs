//! 平衡值与状态机
//!
//! 每块肌肉比较物理位姿与动画目标的位置/角度偏差：
//! 超过阈值贡献失衡，低于阈值贡献回稳。某块肌肉一旦有失衡贡献，
//! 它这一帧的回稳贡献清零。

use glam::{Quat, Vec3};

use super::configuration::PuppetSpeeds;
use super::muscle_state::MuscleState;
use crate::config::get_config;

/// 布娃娃整体状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PuppetState {
    #[default]
    Normal,
    /// 正常但碰撞体全部关闭
    NormalNoCollider,
    OffBalance,
    Tumbling,
    GettingUp,
    Floating,
}

impl PuppetState {
    /// 是否处于站立类状态
    pub fn is_upright(self) -> bool {
        matches!(self, PuppetState::Normal | PuppetState::NormalNoCollider)
    }
}

/// 动画层提供的目标位姿
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MuscleTarget {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for MuscleTarget {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// 单块肌肉的偏差
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MuscleDeviation {
    pub distance: f32,
    /// 弧度
    pub angle: f32,
}

impl MuscleDeviation {
    pub fn measure(position: Vec3, rotation: Quat, target: &MuscleTarget) -> Self {
        Self {
            distance: position.distance(target.position),
            angle: rotation.normalize().angle_between(target.rotation.normalize()),
        }
    }
}

/// 状态切换阈值
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BalanceThresholds {
    pub off_balance: f32,
    pub tumbling: f32,
    pub recovered: f32,
    pub rate_scale: f32,
}

impl BalanceThresholds {
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            off_balance: config.off_balance_threshold,
            tumbling: config.tumbling_threshold,
            recovered: config.recovered_threshold,
            rate_scale: config.balance_rate_scale,
        }
    }
}

impl Default for BalanceThresholds {
    fn default() -> Self {
        Self::from_config()
    }
}

/// 单项检查：(回稳, 失衡)
fn check(value: f32, threshold: f32, range: f32) -> (f32, f32) {
    if threshold.is_nan() || threshold <= 0.0 || !value.is_finite() {
        return (0.0, 0.0);
    }
    if value > threshold {
        let over = if range > 0.0 {
            ((value - threshold) / range).clamp(0.0, 1.0)
        } else {
            1.0
        };
        (0.0, over)
    } else {
        (0.0f32.max((threshold - value) / threshold), 0.0)
    }
}

/// 单块肌肉的 (回稳贡献, 失衡贡献)
pub fn muscle_contribution(state: &MuscleState, deviation: &MuscleDeviation) -> (f32, f32) {
    let (bal_d, unb_d) = check(
        deviation.distance,
        state.unbalance_distance_threshold,
        state.unbalance_distance_range,
    );
    let (bal_a, unb_a) = check(
        deviation.angle,
        state.unbalance_angle_threshold,
        state.unbalance_angle_range,
    );
    let unbalance = (unb_d + unb_a) * state.unbalance_contribution;
    if unbalance > 0.0 {
        return (0.0, unbalance);
    }
    ((bal_d + bal_a) * state.balance_contribution, 0.0)
}

/// 平衡值 + 状态
#[derive(Clone, Debug)]
pub struct PuppetBalance {
    balance: f32,
    state: PuppetState,
    thresholds: BalanceThresholds,
    last_balance_sum: f32,
    last_unbalance_sum: f32,
}

impl Default for PuppetBalance {
    fn default() -> Self {
        Self::new(BalanceThresholds::from_config())
    }
}

impl PuppetBalance {
    pub fn new(thresholds: BalanceThresholds) -> Self {
        Self {
            balance: 1.0,
            state: PuppetState::Normal,
            thresholds,
            last_balance_sum: 0.0,
            last_unbalance_sum: 0.0,
        }
    }

    #[inline]
    pub fn balance(&self) -> f32 {
        self.balance
    }

    #[inline]
    pub fn state(&self) -> PuppetState {
        self.state
    }

    pub fn thresholds(&self) -> &BalanceThresholds {
        &self.thresholds
    }

    /// 上一次更新的 (Σ回稳, Σ失衡)
    pub fn last_contributions(&self) -> (f32, f32) {
        (self.last_balance_sum, self.last_unbalance_sum)
    }

    /// 物理写回后调用；状态变化时返回新状态
    pub fn update(
        &mut self,
        states: &[MuscleState],
        deviations: &[MuscleDeviation],
        speeds: &PuppetSpeeds,
        dt: f32,
    ) -> Option<PuppetState> {
        let (mut balance_sum, mut unbalance_sum) = (0.0f32, 0.0f32);
        for (state, deviation) in states.iter().zip(deviations) {
            let (bal, unb) = muscle_contribution(state, deviation);
            balance_sum += bal;
            unbalance_sum += unb;
        }
        self.last_balance_sum = balance_sum;
        self.last_unbalance_sum = unbalance_sum;

        let rate = dt.max(0.0) * self.thresholds.rate_scale;
        let next = self.balance + balance_sum * rate * speeds.rebalance_speed
            - unbalance_sum * rate * speeds.unbalance_speed;
        if next.is_finite() {
            self.balance = next.clamp(0.0, 1.0);
        }
        self.evaluate_transition()
    }

    fn evaluate_transition(&mut self) -> Option<PuppetState> {
        let t = self.thresholds;
        let next = match self.state {
            PuppetState::Normal | PuppetState::NormalNoCollider if self.balance < t.off_balance => {
                PuppetState::OffBalance
            }
            PuppetState::OffBalance | PuppetState::Floating if self.balance < t.tumbling => PuppetState::Tumbling,
            PuppetState::GettingUp if self.balance >= t.recovered => PuppetState::Normal,
            _ => return None,
        };
        self.set_state(next);
        Some(next)
    }

    fn set_state(&mut self, state: PuppetState) {
        if state != self.state && get_config().debug_log {
            log::info!("[Puppet] 状态 {:?} → {:?}（平衡 {:.3}）", self.state, state, self.balance);
        }
        self.state = state;
    }

    /// 外部强制切换状态（动画驱动的起身、漂浮等）
    pub fn force_state(&mut self, state: PuppetState) {
        self.set_state(state);
    }

    /// 开始起身：平衡值回到 recovered 以上后自动回 Normal
    pub fn begin_getting_up(&mut self) {
        self.set_state(PuppetState::GettingUp);
    }

    /// 瞬移复位
    pub fn reset(&mut self) {
        self.balance = 1.0;
        self.last_balance_sum = 0.0;
        self.last_unbalance_sum = 0.0;
        self.set_state(PuppetState::Normal);
    }

    /// 直接设置平衡值（测试与存档恢复）
    pub fn set_balance(&mut self, balance: f32) {
        if balance.is_finite() {
            self.balance = balance.clamp(0.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn thresholds() -> BalanceThresholds {
        BalanceThresholds {
            off_balance: 0.5,
            tumbling: 0.1,
            recovered: 0.8,
            rate_scale: 3.0,
        }
    }

    fn checked_state() -> MuscleState {
        MuscleState {
            unbalance_distance_threshold: 0.1,
            unbalance_distance_range: 0.2,
            unbalance_angle_threshold: 0.5,
            unbalance_angle_range: 0.5,
            ..MuscleState::default()
        }
    }

    #[test]
    fn test_contribution_rules() {
        let state = checked_state();
        // 完全贴合：两项都满额回稳
        let (bal, unb) = muscle_contribution(&state, &MuscleDeviation::default());
        assert!((bal - 2.0).abs() < 1e-6);
        assert_eq!(unb, 0.0);

        // 距离超阈值一半范围：失衡 0.5，回稳被清零
        let deviation = MuscleDeviation {
            distance: 0.2,
            angle: 0.0,
        };
        let (bal, unb) = muscle_contribution(&state, &deviation);
        assert_eq!(bal, 0.0);
        assert!((unb - 0.5).abs() < 1e-6);

        // 超出范围封顶
        let deviation = MuscleDeviation {
            distance: 5.0,
            angle: 0.0,
        };
        assert!((muscle_contribution(&state, &deviation).1 - 1.0).abs() < 1e-6);

        // 阈值为 0 不检查
        let (bal, unb) = muscle_contribution(&MuscleState::default(), &deviation);
        assert_eq!((bal, unb), (0.0, 0.0));
    }

    #[test]
    fn test_balance_rises_monotonically_when_matching() {
        let mut balance = PuppetBalance::new(thresholds());
        balance.set_balance(0.2);
        let states = [checked_state(); 4];
        let deviations = [MuscleDeviation::default(); 4];
        let speeds = PuppetSpeeds::default();

        let mut previous = balance.balance();
        for _ in 0..120 {
            balance.update(&states, &deviations, &speeds, DT);
            assert!(balance.balance() >= previous);
            previous = balance.balance();
        }
        assert_eq!(balance.balance(), 1.0);
    }

    #[test]
    fn test_falls_through_off_balance_to_tumbling() {
        let mut balance = PuppetBalance::new(thresholds());
        let states = [checked_state(); 2];
        let far = [MuscleDeviation {
            distance: 1.0,
            angle: 2.0,
        }; 2];
        let speeds = PuppetSpeeds::default();

        let mut seen = Vec::new();
        for _ in 0..60 {
            if let Some(state) = balance.update(&states, &far, &speeds, DT) {
                seen.push(state);
            }
        }
        assert_eq!(seen, vec![PuppetState::OffBalance, PuppetState::Tumbling]);
        assert_eq!(balance.balance(), 0.0);

        // 平衡恢复也不会自动站起
        let near = [MuscleDeviation::default(); 2];
        for _ in 0..120 {
            balance.update(&states, &near, &speeds, DT);
        }
        assert_eq!(balance.state(), PuppetState::Tumbling);
    }

    #[test]
    fn test_getting_up_recovers_at_threshold() {
        let mut balance = PuppetBalance::new(thresholds());
        balance.set_balance(0.0);
        balance.force_state(PuppetState::Tumbling);
        balance.begin_getting_up();

        let states = [checked_state()];
        let near = [MuscleDeviation::default()];
        let speeds = PuppetSpeeds::default();
        let mut recovered_at = None;
        for _ in 0..120 {
            if balance.update(&states, &near, &speeds, DT) == Some(PuppetState::Normal) {
                recovered_at = Some(balance.balance());
                break;
            }
        }
        assert!(recovered_at.is_some_and(|b| b >= 0.8));
    }

    #[test]
    fn test_floating_and_no_collider_transitions() {
        let mut balance = PuppetBalance::new(thresholds());
        balance.force_state(PuppetState::Floating);
        balance.set_balance(0.3);
        let speeds = PuppetSpeeds::default();
        assert_eq!(balance.update(&[], &[], &speeds, DT), None);
        balance.set_balance(0.05);
        assert_eq!(balance.update(&[], &[], &speeds, DT), Some(PuppetState::Tumbling));

        balance.reset();
        balance.force_state(PuppetState::NormalNoCollider);
        balance.set_balance(0.4);
        assert_eq!(balance.update(&[], &[], &speeds, DT), Some(PuppetState::OffBalance));
    }
}
