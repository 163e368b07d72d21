//! 肢体缩放求解器
//!
//! 每个实例只读写自己的 26/21 槽切片，实例之间完全独立，
//! 因此批次顺序与是否并行都不影响结果。
//!
//! 求解是增量式的：只把尺寸变化（current - previous）造成的几何差
//! 叠加到当前本地位姿上，不覆盖动画已经写入的姿态。

use glam::{Quat, Vec3};
use rayon::prelude::*;

use super::limb::{split_width, LimbData, SizeSource, SizesPair};
use super::topology::{BipedBone, LimbChain, Side, READ_COUNT, SPINE_SEGMENTS, WRITE_COUNT};
use crate::config::get_config;
use crate::math::{angle_between, apply_world_delta, max_step_in_shell, solve_triangle, third_side};
use crate::skeleton::{LocalPose, SnapshotFrame, TransformSnapshot};

/// 一帧内固定的求解参数
#[derive(Clone, Copy, Debug)]
pub struct SolverParams {
    pub tolerance: f32,
    pub min_length: f32,
}

impl SolverParams {
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            tolerance: config.triangle_tolerance,
            min_length: config.min_length_epsilon,
        }
    }
}

/// 单实例的读写视图
struct InstanceView<'a> {
    read: &'a [TransformSnapshot],
    read_valid: &'a [bool],
    write: &'a mut [LocalPose],
    dirty: &'a mut [bool],
}

impl InstanceView<'_> {
    #[inline]
    fn valid(&self, bone: BipedBone) -> bool {
        self.read_valid[bone.index()]
    }

    /// 本地位置平移，槽无效或偏移非有限时跳过
    fn offset_position(&mut self, bone: BipedBone, offset: Vec3) {
        let i = bone.index();
        if i >= WRITE_COUNT || !self.read_valid[i] || offset == Vec3::ZERO || !offset.is_finite() {
            return;
        }
        self.write[i].position += offset;
        self.dirty[i] = true;
    }

    fn set_rotation(&mut self, bone: BipedBone, rotation: Quat) {
        let i = bone.index();
        self.write[i].rotation = rotation;
        self.dirty[i] = true;
    }
}

// ============================================================================
// 批处理
// ============================================================================

/// 对整批实例求解
///
/// frame 的读/写数组按 26/21 步长分块，与 limbs / sizes 一一对应。
pub fn solve_batch(frame: &mut SnapshotFrame, limbs: &[LimbData], sizes: &[SizesPair], params: &SolverParams) {
    let count = limbs.len().min(sizes.len());
    if count == 0 {
        return;
    }
    let parallel = count >= get_config().parallel_threshold;
    let SnapshotFrame { read, read_valid, write, write_dirty } = frame;

    if parallel {
        read.par_chunks(READ_COUNT)
            .zip(read_valid.par_chunks(READ_COUNT))
            .zip(write.par_chunks_mut(WRITE_COUNT))
            .zip(write_dirty.par_chunks_mut(WRITE_COUNT))
            .zip(limbs.par_iter())
            .zip(sizes.par_iter())
            .for_each(|(((((read, read_valid), write), dirty), limb), sizes)| {
                let mut view = InstanceView { read, read_valid, write, dirty };
                solve_instance(&mut view, limb, sizes, params);
            });
    } else {
        read.chunks(READ_COUNT)
            .zip(read_valid.chunks(READ_COUNT))
            .zip(write.chunks_mut(WRITE_COUNT))
            .zip(write_dirty.chunks_mut(WRITE_COUNT))
            .zip(limbs.iter())
            .zip(sizes.iter())
            .for_each(|(((((read, read_valid), write), dirty), limb), sizes)| {
                let mut view = InstanceView { read, read_valid, write, dirty };
                solve_instance(&mut view, limb, sizes, params);
            });
    }
}

// ============================================================================
// 单实例
// ============================================================================

fn solve_instance(view: &mut InstanceView<'_>, limb: &LimbData, sizes: &SizesPair, params: &SolverParams) {
    if view.read.len() < READ_COUNT || view.write.len() < WRITE_COUNT {
        return;
    }
    // 尺寸未变：精确恒等
    if sizes.is_unchanged() {
        return;
    }

    solve_spine(view, limb, sizes);
    solve_widths(view, limb, sizes);

    for side in Side::BOTH {
        let i = side.index();
        let chain = LimbChain::arm(side);
        let weights = TwoSegmentWeights {
            preserve: limb.hand_preserve[i],
            knee_preserve: 0.0,
            bend_axis: limb.bend_axes[i],
        };
        let lengths = (sizes.previous.arm(side), sizes.current.arm(side));
        if lengths.0 == lengths.1 {
            continue;
        }
        let span = measure_span(view, &chain, lengths, weights, params);
        solve_two_segment(view, &chain, limb, lengths, weights, span.as_ref(), Vec3::ZERO, params);
    }

    // 腿：先测量两侧跨距，统一决定骨盆位移，再由每条腿吸收剩余部分
    let leg_weights = Side::BOTH.map(|side| {
        let i = side.index();
        TwoSegmentWeights {
            preserve: limb.foot_preserve[i],
            knee_preserve: limb.knee_preserve[i],
            bend_axis: limb.bend_axes[2 + i],
        }
    });
    let leg_lengths = Side::BOTH.map(|side| (sizes.previous.leg(side), sizes.current.leg(side)));
    if leg_lengths.iter().all(|(old, new)| old == new) {
        return;
    }
    let spans = Side::BOTH.map(|side| {
        let i = side.index();
        measure_span(view, &LimbChain::leg(side), leg_lengths[i], leg_weights[i], params)
    });
    let shift = if view.valid(BipedBone::Pelvis) {
        pelvis_shift(&spans, params)
    } else {
        Vec3::ZERO
    };

    for side in Side::BOTH {
        let i = side.index();
        let chain = LimbChain::leg(side);
        solve_two_segment(
            view,
            &chain,
            limb,
            leg_lengths[i],
            leg_weights[i],
            spans[i].as_ref(),
            shift,
            params,
        );
    }

    if shift != Vec3::ZERO {
        let parent = view.read[BipedBone::Pelvis.index()].parent_rotation();
        view.offset_position(BipedBone::Pelvis, parent.inverse() * shift);
    }
}

/// 脊柱与颈部：沿父骨骼延伸轴直接平移
fn solve_spine(view: &mut InstanceView<'_>, limb: &LimbData, sizes: &SizesPair) {
    let spine = sizes.delta(SizeSource::SpineLength);
    if spine != 0.0 {
        for (fraction, bone) in limb.spine_fractions.iter().zip(SPINE_SEGMENTS) {
            if let Some(parent) = bone.parent() {
                view.offset_position(bone, limb.extension_axis(parent) * (spine * fraction));
            }
        }
    }

    let neck = sizes.delta(SizeSource::NeckLength);
    if neck != 0.0 {
        view.offset_position(BipedBone::Neck, limb.extension_axis(BipedBone::Spine3) * neck);
    }
}

/// 肩宽/髋宽：socket 与肢体按比例分摊
fn solve_widths(view: &mut InstanceView<'_>, limb: &LimbData, sizes: &SizesPair) {
    for side in Side::BOTH {
        let arm = LimbChain::arm(side);
        let leg = LimbChain::leg(side);
        let shoulder_slot = side.index();
        let hip_slot = 2 + side.index();

        for (chain, slot, split) in [(arm, shoulder_slot, limb.shoulder_split), (leg, hip_slot, limb.hip_split)] {
            let delta = sizes.current.widths[slot] - sizes.previous.widths[slot];
            if delta == 0.0 {
                continue;
            }
            let (socket, limb_side) = split_width(delta, split);
            view.offset_position(chain.socket, limb.width_axes[slot] * socket);
            view.offset_position(chain.upper, limb.limb_width_axes[slot] * limb_side);
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct TwoSegmentWeights {
    /// 末端位置保持 p
    preserve: f32,
    /// 弯曲角保持 k
    knee_preserve: f32,
    /// 肢体伸直时的弯曲轴（上段本地空间）
    bend_axis: Vec3,
}

type SegmentLengths = ((f32, f32), (f32, f32));

/// 快照中一条两段肢体的跨距
#[derive(Clone, Copy, Debug)]
struct LimbSpan {
    /// 上段起点 → 末端的单位向量（世界空间）
    direction: Vec3,
    h0: f32,
    /// h_t = lerp(h0, 保持当前弯曲角时的跨距, k)
    h_target: f32,
    preserve: f32,
    /// 新段长下可达的跨距区间
    reach: (f32, f32),
}

impl LimbSpan {
    /// 单独保持末端时 socket 需要的世界空间补偿 -p·(h_t - h0)·û
    fn compensation(&self) -> Vec3 {
        let compensation = -self.direction * (self.preserve * (self.h_target - self.h0));
        if compensation.is_finite() {
            compensation
        } else {
            Vec3::ZERO
        }
    }

    /// socket 不动时求解用的跨距向量；socket 平移 s 后为 base - s
    fn base(&self) -> Vec3 {
        self.direction * self.h_target + self.compensation()
    }
}

fn measure_span(
    view: &InstanceView<'_>,
    chain: &LimbChain,
    ((a0, b0), (a1, b1)): SegmentLengths,
    weights: TwoSegmentWeights,
    params: &SolverParams,
) -> Option<LimbSpan> {
    if !(view.valid(chain.upper) && view.valid(chain.lower) && view.valid(chain.end)) {
        return None;
    }
    let upper = view.read[chain.upper.index()];
    let lower = view.read[chain.lower.index()];
    let end = view.read[chain.end.index()];

    let height_vector = end.world_position - upper.world_position;
    let h0 = height_vector.length();
    if !(h0 > params.min_length) || !h0.is_finite() {
        return None;
    }

    let h_target = if a0 == a1 && b0 == b1 {
        h0
    } else {
        let bend_now = angle_between(
            upper.world_position - lower.world_position,
            end.world_position - lower.world_position,
        );
        let h_keep = third_side(a1, b1, bend_now);
        h0 + (h_keep - h0) * weights.knee_preserve.clamp(0.0, 1.0)
    };

    Some(LimbSpan {
        direction: height_vector / h0,
        h0,
        h_target,
        preserve: weights.preserve.clamp(0.0, 1.0),
        reach: ((a1 - b1).abs(), a1 + b1),
    })
}

/// 骨盆的世界空间位移
///
/// 取补偿最大的一侧；其余保持末端的一侧够不到时按比例缩短，
/// 剩余部分由各腿自己的三角求解吸收，两只脚都不动。
fn pelvis_shift(spans: &[Option<LimbSpan>], params: &SolverParams) -> Vec3 {
    let dominant = spans
        .iter()
        .flatten()
        .map(LimbSpan::compensation)
        .max_by(|a, b| a.length_squared().total_cmp(&b.length_squared()))
        .unwrap_or(Vec3::ZERO);
    if dominant == Vec3::ZERO {
        return Vec3::ZERO;
    }
    let scale = spans
        .iter()
        .flatten()
        .filter(|span| span.preserve > 0.0)
        .fold(1.0f32, |scale, span| {
            let (min, max) = span.reach;
            scale.min(max_step_in_shell(span.base(), dominant, min + params.min_length, max))
        });
    dominant * scale
}

/// 两段肢体（上段 + 下段）
///
/// 1. 段长变化沿父段延伸轴平移下段与末端；
/// 2. socket 平移 s 后的目标跨距向量 t = base - s；
/// 3. 旧三角 (h0, A0, B0) 与新三角 (|t|, A1, B1) 的 rise/bend 差，
///    加上跨距方向 û → t̂ 的摆动，乘 p 后作为世界空间增量旋转
///    叠加到上段/下段，末端反向旋转保持朝向。
///
/// 任一三角无效时跳过旋转，位移照常。
#[allow(clippy::too_many_arguments)]
fn solve_two_segment(
    view: &mut InstanceView<'_>,
    chain: &LimbChain,
    limb: &LimbData,
    ((a0, b0), (a1, b1)): SegmentLengths,
    weights: TwoSegmentWeights,
    span: Option<&LimbSpan>,
    socket_shift: Vec3,
    params: &SolverParams,
) {
    // 段长平移
    view.offset_position(chain.lower, limb.extension_axis(chain.upper) * (a1 - a0));
    view.offset_position(chain.end, limb.extension_axis(chain.lower) * (b1 - b0));

    let Some(span) = span else {
        return;
    };
    let preserve = span.preserve;
    if preserve <= 0.0 {
        return;
    }
    if a0 == a1 && b0 == b1 && socket_shift == Vec3::ZERO {
        return;
    }

    let target = span.base() - socket_shift;
    let h_new = target.length();
    let Some(target_direction) = target.try_normalize() else {
        return;
    };
    let (Some(old), Some(new)) = (
        solve_triangle(span.h0, a0, b0, params.tolerance, params.min_length),
        solve_triangle(h_new, a1, b1, params.tolerance, params.min_length),
    ) else {
        return;
    };

    let upper = view.read[chain.upper.index()];
    let lower = view.read[chain.lower.index()];
    let end = view.read[chain.end.index()];
    let Some(normal) = bend_normal(
        lower.world_position - upper.world_position,
        end.world_position - lower.world_position,
        upper.world_rotation * weights.bend_axis,
    ) else {
        return;
    };

    let swing = Quat::IDENTITY.slerp(Quat::from_rotation_arc(span.direction, target_direction), preserve);
    let upper_delta = swing * Quat::from_axis_angle(normal, (old.rise - new.rise) * preserve);
    let lower_delta = Quat::from_axis_angle(normal, (old.bend - new.bend) * preserve);
    let end_delta = (upper_delta * lower_delta).inverse();

    let upper_local = apply_world_delta(view.write[chain.upper.index()].rotation, upper.world_rotation, upper_delta);
    let lower_local = apply_world_delta(view.write[chain.lower.index()].rotation, lower.world_rotation, lower_delta);
    let end_local = apply_world_delta(view.write[chain.end.index()].rotation, end.world_rotation, end_delta);

    if upper_local.is_finite() && lower_local.is_finite() && end_local.is_finite() {
        view.set_rotation(chain.upper, upper_local);
        view.set_rotation(chain.lower, lower_local);
        view.set_rotation(chain.end, end_local);
    }
}

/// 弯曲平面法线：upper × lower，伸直时退回配置的弯曲轴
fn bend_normal(upper_segment: Vec3, lower_segment: Vec3, fallback: Vec3) -> Option<Vec3> {
    let normal = upper_segment.cross(lower_segment);
    if normal.length_squared() > 1e-12 {
        return Some(normal.normalize());
    }
    let fallback = fallback.normalize_or_zero();
    if fallback == Vec3::ZERO {
        None
    } else {
        Some(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_for(read: Vec<TransformSnapshot>) -> SnapshotFrame {
        let write = read[..WRITE_COUNT].iter().map(|s| s.local_pose()).collect();
        SnapshotFrame {
            read_valid: vec![true; READ_COUNT],
            read,
            write,
            write_dirty: vec![false; WRITE_COUNT],
        }
    }

    #[test]
    fn test_unchanged_sizes_leave_frame_untouched() {
        let read = vec![TransformSnapshot::default(); READ_COUNT];
        let mut frame = frame_for(read);
        let before = frame.write.clone();
        let sizes = SizesPair::default();
        solve_batch(&mut frame, &[LimbData::default()], &[sizes], &SolverParams::from_config());
        assert_eq!(frame.write, before);
        assert!(frame.write_dirty.iter().all(|d| !d));
    }

    #[test]
    fn test_bend_normal_fallback_for_straight_limb() {
        let n = bend_normal(Vec3::NEG_Y, Vec3::NEG_Y, Vec3::X).unwrap();
        assert_eq!(n, Vec3::X);
        assert!(bend_normal(Vec3::NEG_Y, Vec3::NEG_Y, Vec3::ZERO).is_none());
        let n = bend_normal(Vec3::X, Vec3::Y, Vec3::Z).unwrap();
        assert!(n.abs_diff_eq(Vec3::Z, 1e-6));
    }
}
