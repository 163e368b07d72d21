//! 肌肉驱动的宽度贡献
//!
//! 外部肌肉数据（质量、收缩）按组重映射为肩宽/髋宽增量。
//! 数据变化只标脏受影响的组，下一次读取时增量重算。

use std::collections::HashMap;

use bitflags::bitflags;

use crate::math::inverse_lerp;

/// 外部肌肉数据（只读）
pub trait MuscleDataSource {
    fn muscle_index(&self, name: &str) -> Option<usize>;
    fn mass(&self, index: usize) -> f32;
    fn flex(&self, index: usize) -> f32;
}

bitflags! {
    /// 宽度目标
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct WidthTargets: u8 {
        const SHOULDER_L = 1 << 0;
        const SHOULDER_R = 1 << 1;
        const HIP_L = 1 << 2;
        const HIP_R = 1 << 3;
        const SHOULDERS = Self::SHOULDER_L.bits() | Self::SHOULDER_R.bits();
        const HIPS = Self::HIP_L.bits() | Self::HIP_R.bits();
    }
}

impl WidthTargets {
    /// 与 Sizes::widths 同序
    pub const SLOTS: [WidthTargets; 4] = [
        WidthTargets::SHOULDER_L,
        WidthTargets::SHOULDER_R,
        WidthTargets::HIP_L,
        WidthTargets::HIP_R,
    ];
}

/// 线性重映射，可选钳制
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Remap {
    pub in_min: f32,
    pub in_max: f32,
    pub out_min: f32,
    pub out_max: f32,
    pub clamp: bool,
}

impl Remap {
    pub fn new(in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> Self {
        Self {
            in_min,
            in_max,
            out_min,
            out_max,
            clamp: true,
        }
    }

    /// 恒为 0
    pub fn zero() -> Self {
        Self::new(0.0, 1.0, 0.0, 0.0)
    }

    pub fn evaluate(&self, value: f32) -> f32 {
        let mut t = inverse_lerp(self.in_min, self.in_max, value);
        if self.clamp {
            t = t.clamp(0.0, 1.0);
        }
        self.out_min + (self.out_max - self.out_min) * t
    }
}

/// 一块贡献宽度的肌肉
#[derive(Clone, Debug)]
pub struct WidthContributingMuscle {
    pub name: String,
    pub mass: Remap,
    pub flex: Remap,
    cached_index: Option<usize>,
}

impl WidthContributingMuscle {
    pub fn new(name: impl Into<String>, mass: Remap, flex: Remap) -> Self {
        Self {
            name: name.into(),
            mass,
            flex,
            cached_index: None,
        }
    }

    #[inline]
    pub fn cached_index(&self) -> Option<usize> {
        self.cached_index
    }
}

/// 一组肌肉，贡献累加到 targets 中的每个宽度
#[derive(Clone, Debug)]
pub struct WidthContributionGroup {
    pub name: String,
    pub targets: WidthTargets,
    pub muscles: Vec<WidthContributingMuscle>,
    value: f32,
    dirty: bool,
}

impl WidthContributionGroup {
    pub fn new(name: impl Into<String>, targets: WidthTargets, muscles: Vec<WidthContributingMuscle>) -> Self {
        Self {
            name: name.into(),
            targets,
            muscles,
            value: 0.0,
            dirty: true,
        }
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }

    fn recompute(&mut self, source: &dyn MuscleDataSource) {
        self.value = self
            .muscles
            .iter()
            .filter_map(|m| {
                let index = m.cached_index?;
                Some(m.mass.evaluate(source.mass(index)) + m.flex.evaluate(source.flex(index)))
            })
            .sum();
        self.dirty = false;
    }
}

// ============================================================================
// 依赖跟踪
// ============================================================================

/// 全部宽度贡献组 + 肌肉索引到组的反向表
#[derive(Clone, Debug, Default)]
pub struct WidthContributions {
    groups: Vec<WidthContributionGroup>,
    dependents: HashMap<usize, Vec<usize>>,
    resolved: bool,
    totals: [f32; 4],
}

impl WidthContributions {
    pub fn new(groups: Vec<WidthContributionGroup>) -> Self {
        Self {
            groups,
            ..Self::default()
        }
    }

    pub fn groups(&self) -> &[WidthContributionGroup] {
        &self.groups
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// 宽度槽当前总贡献
    #[inline]
    pub fn total(&self, slot: usize) -> f32 {
        self.totals.get(slot).copied().unwrap_or(0.0)
    }

    /// 按名解析肌肉索引（只做一次），未解析的肌肉告警后忽略
    pub fn resolve(&mut self, source: &dyn MuscleDataSource) {
        self.dependents.clear();
        for (group_index, group) in self.groups.iter_mut().enumerate() {
            for muscle in &mut group.muscles {
                muscle.cached_index = source.muscle_index(&muscle.name);
                match muscle.cached_index {
                    Some(index) => {
                        let entry = self.dependents.entry(index).or_default();
                        if !entry.contains(&group_index) {
                            entry.push(group_index);
                        }
                    }
                    None => log::warn!(
                        "[Biped] 宽度组 '{}' 的肌肉 '{}' 未找到，忽略",
                        group.name,
                        muscle.name
                    ),
                }
            }
            group.dirty = true;
        }
        self.resolved = true;
    }

    /// 肌肉数据变化：标脏受影响的组，返回可能变化的宽度目标
    pub fn mark_muscle_changed(&mut self, muscle_index: usize) -> WidthTargets {
        let mut affected = WidthTargets::empty();
        if let Some(groups) = self.dependents.get(&muscle_index) {
            for &g in groups {
                self.groups[g].dirty = true;
                affected |= self.groups[g].targets;
            }
        }
        affected
    }

    pub fn mark_all_dirty(&mut self) {
        for group in &mut self.groups {
            group.dirty = true;
        }
    }

    pub fn has_dirty(&self) -> bool {
        self.groups.iter().any(|g| g.dirty)
    }

    /// 只重算脏组，返回总量变化的目标
    pub fn recalculate(&mut self, source: &dyn MuscleDataSource) -> WidthTargets {
        if !self.resolved {
            self.resolve(source);
        }
        for group in self.groups.iter_mut().filter(|g| g.dirty) {
            group.recompute(source);
        }

        let mut totals = [0.0f32; 4];
        for group in &self.groups {
            for (slot, target) in WidthTargets::SLOTS.iter().enumerate() {
                if group.targets.contains(*target) {
                    totals[slot] += group.value;
                }
            }
        }

        let mut changed = WidthTargets::empty();
        for (slot, target) in WidthTargets::SLOTS.iter().enumerate() {
            if totals[slot] != self.totals[slot] {
                changed |= *target;
            }
        }
        self.totals = totals;
        changed
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Default)]
    pub(crate) struct TableSource {
        pub names: Vec<&'static str>,
        pub mass: Vec<f32>,
        pub flex: Vec<f32>,
    }

    impl MuscleDataSource for TableSource {
        fn muscle_index(&self, name: &str) -> Option<usize> {
            self.names.iter().position(|n| *n == name)
        }
        fn mass(&self, index: usize) -> f32 {
            self.mass.get(index).copied().unwrap_or(0.0)
        }
        fn flex(&self, index: usize) -> f32 {
            self.flex.get(index).copied().unwrap_or(0.0)
        }
    }

    pub(crate) fn delts() -> (TableSource, WidthContributions) {
        let source = TableSource {
            names: vec!["DeltL", "DeltR", "Glute"],
            mass: vec![0.5, 0.5, 0.0],
            flex: vec![0.0, 0.0, 0.0],
        };
        let groups = vec![
            WidthContributionGroup::new(
                "deltoids",
                WidthTargets::SHOULDERS,
                vec![
                    WidthContributingMuscle::new("DeltL", Remap::new(0.0, 1.0, 0.0, 0.02), Remap::zero()),
                    WidthContributingMuscle::new("DeltR", Remap::new(0.0, 1.0, 0.0, 0.02), Remap::zero()),
                ],
            ),
            WidthContributionGroup::new(
                "glutes",
                WidthTargets::HIPS,
                vec![
                    WidthContributingMuscle::new("Glute", Remap::new(0.0, 1.0, 0.0, 0.04), Remap::zero()),
                    WidthContributingMuscle::new("Missing", Remap::new(0.0, 1.0, 0.0, 1.0), Remap::zero()),
                ],
            ),
        ];
        (source, WidthContributions::new(groups))
    }

    #[test]
    fn test_totals_and_unresolved_muscle_ignored() {
        let (source, mut widths) = delts();
        let changed = widths.recalculate(&source);
        assert_eq!(changed, WidthTargets::SHOULDERS);
        assert!((widths.total(0) - 0.02).abs() < 1e-6);
        assert!((widths.total(1) - 0.02).abs() < 1e-6);
        assert_eq!(widths.total(2), 0.0);
    }

    #[test]
    fn test_only_affected_groups_recompute() {
        let (mut source, mut widths) = delts();
        widths.recalculate(&source);

        source.mass[2] = 1.0;
        // 肩部肌肉未通知，即使数据改了也不重算
        source.mass[0] = 1.0;
        let affected = widths.mark_muscle_changed(2);
        assert_eq!(affected, WidthTargets::HIPS);
        let changed = widths.recalculate(&source);
        assert_eq!(changed, WidthTargets::HIPS);
        assert!((widths.total(3) - 0.04).abs() < 1e-6);
        assert!((widths.total(0) - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_remap_clamp() {
        let remap = Remap::new(0.0, 1.0, 0.0, 2.0);
        assert_eq!(remap.evaluate(2.0), 2.0);
        let unclamped = Remap { clamp: false, ..remap };
        assert_eq!(unclamped.evaluate(2.0), 4.0);
    }
}
