//! 每实例肢体数据与尺寸记录

use glam::Vec3;

use super::topology::{BipedBone, Side, WRITE_COUNT};

// ============================================================================
// 尺寸来源
// ============================================================================

/// 可缩放的肢体/躯干区域
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SizeSource {
    SpineLength,
    NeckLength,
    ShoulderWidthL,
    ShoulderWidthR,
    UpperArmL,
    ForearmL,
    UpperArmR,
    ForearmR,
    HipWidthL,
    HipWidthR,
    ThighL,
    CalfL,
    ThighR,
    CalfR,
}

impl SizeSource {
    pub const COUNT: usize = 14;

    pub const ALL: [SizeSource; Self::COUNT] = [
        SizeSource::SpineLength,
        SizeSource::NeckLength,
        SizeSource::ShoulderWidthL,
        SizeSource::ShoulderWidthR,
        SizeSource::UpperArmL,
        SizeSource::ForearmL,
        SizeSource::UpperArmR,
        SizeSource::ForearmR,
        SizeSource::HipWidthL,
        SizeSource::HipWidthR,
        SizeSource::ThighL,
        SizeSource::CalfL,
        SizeSource::ThighR,
        SizeSource::CalfR,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// 是否为宽度类（可叠加肌肉宽度贡献）
    #[inline]
    pub fn is_width(self) -> bool {
        matches!(
            self,
            SizeSource::ShoulderWidthL | SizeSource::ShoulderWidthR | SizeSource::HipWidthL | SizeSource::HipWidthR
        )
    }

    /// 宽度槽索引：ShoulderL, ShoulderR, HipL, HipR
    pub fn width_slot(self) -> Option<usize> {
        match self {
            SizeSource::ShoulderWidthL => Some(0),
            SizeSource::ShoulderWidthR => Some(1),
            SizeSource::HipWidthL => Some(2),
            SizeSource::HipWidthR => Some(3),
            _ => None,
        }
    }

    /// 该区域长度测量的 (父骨骼, 子骨骼)
    ///
    /// 脊柱由三段组成，单独处理，这里返回 None。
    pub fn measured_segment(self) -> Option<(BipedBone, BipedBone)> {
        use BipedBone::*;
        match self {
            SizeSource::SpineLength => None,
            SizeSource::NeckLength => Some((Spine3, Neck)),
            SizeSource::ShoulderWidthL => Some((Spine3, UpperArmL)),
            SizeSource::ShoulderWidthR => Some((Spine3, UpperArmR)),
            SizeSource::UpperArmL => Some((UpperArmL, ForearmL)),
            SizeSource::ForearmL => Some((ForearmL, WristL)),
            SizeSource::UpperArmR => Some((UpperArmR, ForearmR)),
            SizeSource::ForearmR => Some((ForearmR, WristR)),
            SizeSource::HipWidthL => Some((Pelvis, ThighL)),
            SizeSource::HipWidthR => Some((Pelvis, ThighR)),
            SizeSource::ThighL => Some((ThighL, CalfL)),
            SizeSource::CalfL => Some((CalfL, FootL)),
            SizeSource::ThighR => Some((ThighR, CalfR)),
            SizeSource::CalfR => Some((CalfR, FootR)),
        }
    }
}

// ============================================================================
// 尺寸
// ============================================================================

/// 一个实例的全部尺寸（真实长度，不是倍率）
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sizes {
    pub spine_length: f32,
    pub neck_length: f32,
    /// ShoulderL, ShoulderR, HipL, HipR
    pub widths: [f32; 4],
    /// UpperArmL, ForearmL, UpperArmR, ForearmR
    pub arm_lengths: [f32; 4],
    /// ThighL, CalfL, ThighR, CalfR
    pub leg_lengths: [f32; 4],
}

impl Sizes {
    pub fn get(&self, source: SizeSource) -> f32 {
        match source {
            SizeSource::SpineLength => self.spine_length,
            SizeSource::NeckLength => self.neck_length,
            SizeSource::ShoulderWidthL => self.widths[0],
            SizeSource::ShoulderWidthR => self.widths[1],
            SizeSource::HipWidthL => self.widths[2],
            SizeSource::HipWidthR => self.widths[3],
            SizeSource::UpperArmL => self.arm_lengths[0],
            SizeSource::ForearmL => self.arm_lengths[1],
            SizeSource::UpperArmR => self.arm_lengths[2],
            SizeSource::ForearmR => self.arm_lengths[3],
            SizeSource::ThighL => self.leg_lengths[0],
            SizeSource::CalfL => self.leg_lengths[1],
            SizeSource::ThighR => self.leg_lengths[2],
            SizeSource::CalfR => self.leg_lengths[3],
        }
    }

    pub fn set(&mut self, source: SizeSource, value: f32) {
        let slot = match source {
            SizeSource::SpineLength => &mut self.spine_length,
            SizeSource::NeckLength => &mut self.neck_length,
            SizeSource::ShoulderWidthL => &mut self.widths[0],
            SizeSource::ShoulderWidthR => &mut self.widths[1],
            SizeSource::HipWidthL => &mut self.widths[2],
            SizeSource::HipWidthR => &mut self.widths[3],
            SizeSource::UpperArmL => &mut self.arm_lengths[0],
            SizeSource::ForearmL => &mut self.arm_lengths[1],
            SizeSource::UpperArmR => &mut self.arm_lengths[2],
            SizeSource::ForearmR => &mut self.arm_lengths[3],
            SizeSource::ThighL => &mut self.leg_lengths[0],
            SizeSource::CalfL => &mut self.leg_lengths[1],
            SizeSource::ThighR => &mut self.leg_lengths[2],
            SizeSource::CalfR => &mut self.leg_lengths[3],
        };
        *slot = value;
    }

    /// 手臂 (上臂, 前臂)
    #[inline]
    pub fn arm(&self, side: Side) -> (f32, f32) {
        let i = side.index() * 2;
        (self.arm_lengths[i], self.arm_lengths[i + 1])
    }

    /// 腿 (大腿, 小腿)
    #[inline]
    pub fn leg(&self, side: Side) -> (f32, f32) {
        let i = side.index() * 2;
        (self.leg_lengths[i], self.leg_lengths[i + 1])
    }
}

/// 当前/上一次尺寸
///
/// previous 只由外部显式同步，求解器从不写它。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SizesPair {
    pub current: Sizes,
    pub previous: Sizes,
}

impl SizesPair {
    pub fn new(sizes: Sizes) -> Self {
        Self {
            current: sizes,
            previous: sizes,
        }
    }

    #[inline]
    pub fn is_unchanged(&self) -> bool {
        self.current == self.previous
    }

    #[inline]
    pub fn delta(&self, source: SizeSource) -> f32 {
        self.current.get(source) - self.previous.get(source)
    }

    /// previous ← current
    pub fn sync(&mut self) {
        self.previous = self.current;
    }
}

// ============================================================================
// 肢体数据
// ============================================================================

/// 每实例轴向与保持权重
///
/// 轴向全部在骨骼自身的本地空间内。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LimbData {
    /// 每个写槽骨骼指向其主子骨骼的延伸轴
    pub extension_axes: [Vec3; WRITE_COUNT],
    /// socket 侧宽度轴（躯干骨骼空间）：ShoulderL, ShoulderR, HipL, HipR
    pub width_axes: [Vec3; 4],
    /// 肢体侧宽度轴（socket 骨骼空间）：同上顺序
    pub limb_width_axes: [Vec3; 4],
    /// 伸直时使用的弯曲轴（上段骨骼空间）：ArmL, ArmR, LegL, LegR
    pub bend_axes: [Vec3; 4],
    /// 手位置保持 L/R
    pub hand_preserve: [f32; 2],
    /// 脚位置保持 L/R
    pub foot_preserve: [f32; 2],
    /// 膝盖弯曲角保持 L/R
    pub knee_preserve: [f32; 2],
    /// 肩宽分配：1 = 全部由肩 socket 吸收
    pub shoulder_split: f32,
    /// 髋宽分配：1 = 全部由髋 socket 吸收
    pub hip_split: f32,
    /// 脊柱长度在 Spine1/2/3 上的分配比例
    pub spine_fractions: [f32; 3],
}

impl Default for LimbData {
    fn default() -> Self {
        Self {
            extension_axes: [Vec3::Y; WRITE_COUNT],
            width_axes: [Vec3::X, Vec3::NEG_X, Vec3::X, Vec3::NEG_X],
            limb_width_axes: [Vec3::X, Vec3::NEG_X, Vec3::X, Vec3::NEG_X],
            bend_axes: [Vec3::Y, Vec3::Y, Vec3::X, Vec3::X],
            hand_preserve: [0.0; 2],
            foot_preserve: [1.0; 2],
            knee_preserve: [1.0; 2],
            shoulder_split: 0.5,
            hip_split: 0.5,
            spine_fractions: [1.0 / 3.0; 3],
        }
    }
}

impl LimbData {
    #[inline]
    pub fn extension_axis(&self, bone: BipedBone) -> Vec3 {
        self.extension_axes
            .get(bone.index())
            .copied()
            .unwrap_or(Vec3::Y)
    }
}

/// 宽度变化拆分为 (socket 侧, 肢体侧)，两者之和恒等于 delta
#[inline]
pub fn split_width(delta: f32, socket_fraction: f32) -> (f32, f32) {
    let socket = delta * socket_fraction.clamp(0.0, 1.0);
    (socket, delta - socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_get_set_cover_every_source() {
        let mut sizes = Sizes::default();
        for (i, source) in SizeSource::ALL.iter().enumerate() {
            sizes.set(*source, i as f32 + 1.0);
        }
        for (i, source) in SizeSource::ALL.iter().enumerate() {
            assert_eq!(sizes.get(*source), i as f32 + 1.0);
            assert_eq!(source.index(), i);
        }
    }

    #[test]
    fn test_width_split_conserves_delta() {
        for s in [0.0, 0.5, 1.0] {
            for d in [0.3, -0.3] {
                let (socket, limb) = split_width(d, s);
                assert_eq!(socket + limb, d);
            }
        }
        assert_eq!(split_width(0.3, 1.0), (0.3, 0.0));
        assert_eq!(split_width(0.3, 0.0), (0.0, 0.3));
    }

    #[test]
    fn test_sync_copies_current() {
        let mut pair = SizesPair::new(Sizes::default());
        pair.current.leg_lengths[0] = 0.6;
        assert!(!pair.is_unchanged());
        assert!((pair.delta(SizeSource::ThighL) - 0.6).abs() < 1e-6);
        pair.sync();
        assert!(pair.is_unchanged());
    }
}
