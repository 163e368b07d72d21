//! 数学工具
//!
//! 重映射、折返、余弦定理、带符号角等纯函数。

use glam::{Quat, Vec3};

// ============================================================================
// 标量
// ============================================================================

/// 反向插值，区间退化时返回 0
#[inline]
pub fn inverse_lerp(a: f32, b: f32, value: f32) -> f32 {
    let span = b - a;
    if span.abs() < f32::EPSILON {
        return 0.0;
    }
    (value - a) / span
}

/// 将 value 从 [in_min, in_max] 线性映射到 [out_min, out_max]（不钳制）
#[inline]
pub fn remap(value: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    let t = inverse_lerp(in_min, in_max, value);
    out_min + (out_max - out_min) * t
}

/// 三角折返：超过 1 的部分反射回来，再钳制到 [0, 1]
#[inline]
pub fn fold01(value: f32) -> f32 {
    let folded = if value > 1.0 { 2.0 - value } else { value };
    folded.clamp(0.0, 1.0)
}

/// 角度折回 (-π, π]
#[inline]
pub fn wrap_angle(angle: f32) -> f32 {
    angle.sin().atan2(angle.cos())
}

/// 向 target 移动，单步最多 max_delta
#[inline]
pub fn move_towards(current: f32, target: f32, max_delta: f32) -> f32 {
    let diff = target - current;
    if diff.abs() <= max_delta {
        target
    } else {
        current + diff.signum() * max_delta
    }
}

// ============================================================================
// 余弦定理
// ============================================================================

/// 两段肢体三角形的解
///
/// - rise: 上段与 起点→终点 连线的夹角
/// - bend: 关节处内角（π 表示完全伸直）
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleAngles {
    pub rise: f32,
    pub bend: f32,
}

/// 由三边 (height, a, b) 求 rise / bend
///
/// 违反三角不等式、边长退化或结果非有限时返回 None，
/// 调用方据此跳过本帧的旋转重建。
/// 余弦在 ±1 的 tolerance 内吸附为精确的 0 / π（acos 在端点附近病态）。
pub fn solve_triangle(height: f32, a: f32, b: f32, tolerance: f32, min_length: f32) -> Option<TriangleAngles> {
    if !(height > min_length && a > min_length && b > min_length) {
        return None;
    }
    let cos_rise = (height * height + a * a - b * b) / (2.0 * height * a);
    let cos_bend = (a * a + b * b - height * height) / (2.0 * a * b);
    let limit = 1.0 + tolerance;
    if !cos_rise.is_finite() || !cos_bend.is_finite() || cos_rise.abs() > limit || cos_bend.abs() > limit {
        return None;
    }
    let rise = snapped_acos(cos_rise, tolerance);
    let bend = snapped_acos(cos_bend, tolerance);
    if rise.is_finite() && bend.is_finite() {
        Some(TriangleAngles { rise, bend })
    } else {
        None
    }
}

#[inline]
fn snapped_acos(cos: f32, tolerance: f32) -> f32 {
    if cos >= 1.0 - tolerance {
        0.0
    } else if cos <= -1.0 + tolerance {
        std::f32::consts::PI
    } else {
        cos.acos()
    }
}

/// 已知两边与夹角求第三边
#[inline]
pub fn third_side(a: f32, b: f32, included_angle: f32) -> f32 {
    (a * a + b * b - 2.0 * a * b * included_angle.cos()).max(0.0).sqrt()
}

/// from - λ·step 的长度保持在 [min, max] 内时 λ ∈ [0, 1] 的最大值
///
/// |from - λ·step|² 是 λ 的凸二次式：外壳取正根，内壳取第一个穿入点。
/// 起点已越界时结果钳制为 0。
pub fn max_step_in_shell(from: Vec3, step: Vec3, min: f32, max: f32) -> f32 {
    let ss = step.length_squared();
    if ss < 1e-12 {
        return 1.0;
    }
    let b = from.dot(step);
    let ff = from.length_squared();

    let outer = (b * b - ss * (ff - max * max)).max(0.0);
    let mut lambda = ((b + outer.sqrt()) / ss).min(1.0);

    let vertex = b / ss;
    if vertex > 0.0 && (from - step * vertex).length_squared() < min * min {
        let inner = (b * b - ss * (ff - min * min)).max(0.0);
        lambda = lambda.min((b - inner.sqrt()) / ss);
    }
    if lambda.is_finite() {
        lambda.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// 两向量夹角（钳制，永远有限）
#[inline]
pub fn angle_between(a: Vec3, b: Vec3) -> f32 {
    let a = a.normalize_or_zero();
    let b = b.normalize_or_zero();
    if a == Vec3::ZERO || b == Vec3::ZERO {
        return 0.0;
    }
    a.dot(b).clamp(-1.0, 1.0).acos()
}

/// from 绕 axis 转到 to 的带符号角（弧度），两者先投影到 axis 的法平面
pub fn signed_angle_around(from: Vec3, to: Vec3, axis: Vec3) -> f32 {
    let axis = axis.normalize_or_zero();
    if axis == Vec3::ZERO {
        return 0.0;
    }
    let from_p = from - axis * from.dot(axis);
    let to_p = to - axis * to.dot(axis);
    if from_p.length_squared() < 1e-12 || to_p.length_squared() < 1e-12 {
        return 0.0;
    }
    let sin = axis.dot(from_p.cross(to_p));
    let cos = from_p.dot(to_p);
    sin.atan2(cos)
}

// ============================================================================
// 旋转
// ============================================================================

/// 由世界旋转与本地旋转反推父骨骼世界旋转
#[inline]
pub fn parent_rotation(world: Quat, local: Quat) -> Quat {
    world * local.inverse()
}

/// 把世界空间增量旋转 delta 作用到本地旋转上
///
/// world' = delta * world，父骨骼不变 → local' = local * (world⁻¹ * delta * world)
#[inline]
pub fn apply_world_delta(local: Quat, world: Quat, delta: Quat) -> Quat {
    (local * (world.inverse() * delta * world)).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, PI};

    fn assert_approx(actual: f32, expected: f32) {
        let diff = (actual - expected).abs();
        assert!(diff <= 1.0e-4, "expected {expected}, got {actual} (diff {diff})");
    }

    #[test]
    fn test_remap_and_degenerate_range() {
        assert_approx(remap(0.5, 0.0, 1.0, 10.0, 20.0), 15.0);
        assert_approx(remap(3.0, 2.0, 2.0, 10.0, 20.0), 10.0);
    }

    #[test]
    fn test_fold_is_triangular() {
        assert_approx(fold01(0.25), 0.25);
        assert_approx(fold01(1.25), 0.75);
        assert_approx(fold01(2.5), 0.0);
        assert_approx(fold01(-1.0), 0.0);
    }

    #[test]
    fn test_wrap_angle() {
        assert_approx(wrap_angle(0.5), 0.5);
        assert_approx(wrap_angle(3.15 - (-3.13)), 6.28 - 2.0 * PI);
        assert_approx(wrap_angle(-3.0 * FRAC_PI_2), FRAC_PI_2);
    }

    #[test]
    fn test_right_triangle() {
        // 3-4-5 三角形：斜边作为 height
        let angles = solve_triangle(5.0, 3.0, 4.0, 1e-5, 1e-6).unwrap();
        assert_approx(angles.bend, FRAC_PI_2);
        assert_approx(angles.rise, (3.0f32 / 5.0).acos());
    }

    #[test]
    fn test_reach_limit_is_invalid() {
        assert!(solve_triangle(2.0, 0.5, 0.4, 1e-5, 1e-6).is_none());
        assert!(solve_triangle(0.05, 0.5, 0.4, 1e-5, 1e-6).is_none());
        assert!(solve_triangle(0.9, 0.0, 0.4, 1e-5, 1e-6).is_none());
        assert!(solve_triangle(f32::NAN, 0.5, 0.4, 1e-5, 1e-6).is_none());
    }

    #[test]
    fn test_straight_limb_within_tolerance() {
        let angles = solve_triangle(0.9, 0.5, 0.4, 1e-5, 1e-6).unwrap();
        assert_eq!(angles.bend, PI);
        assert_eq!(angles.rise, 0.0);

        // 折叠：上段更短时 rise 为 π
        let folded = solve_triangle(0.2, 0.2, 0.4, 1e-5, 1e-6).unwrap();
        assert_eq!(folded.bend, 0.0);
        assert_eq!(folded.rise, PI);
    }

    #[test]
    fn test_shell_step_stops_at_reach() {
        // 0.86 向外走 0.1，最远 0.9
        let lambda = max_step_in_shell(Vec3::new(0.0, -0.86, 0.0), Vec3::new(0.0, 0.1, 0.0), 0.1, 0.9);
        assert_approx(lambda, 0.4);
        // 范围足够时走满
        let lambda = max_step_in_shell(Vec3::new(0.0, -0.86, 0.0), Vec3::new(0.0, 0.1, 0.0), 0.1, 1.0);
        assert_approx(lambda, 1.0);
        // 向内收缩碰到最短跨距
        let lambda = max_step_in_shell(Vec3::new(0.0, -0.5, 0.0), Vec3::new(0.0, -0.4, 0.0), 0.3, 1.0);
        assert_approx(lambda, 0.5);
        // 起点已越界
        assert_eq!(max_step_in_shell(Vec3::new(0.0, -2.0, 0.0), Vec3::new(0.0, 0.1, 0.0), 0.1, 0.9), 0.0);
        assert_eq!(max_step_in_shell(Vec3::X, Vec3::ZERO, 0.1, 0.9), 1.0);
    }

    #[test]
    fn test_signed_angle() {
        assert_approx(signed_angle_around(Vec3::X, Vec3::Y, Vec3::Z), FRAC_PI_2);
        assert_approx(signed_angle_around(Vec3::Y, Vec3::X, Vec3::Z), -FRAC_PI_2);
    }

    #[test]
    fn test_world_delta_matches_world_rotation() {
        let parent = Quat::from_rotation_y(0.7);
        let local = Quat::from_rotation_x(0.3);
        let world = parent * local;
        let delta = Quat::from_rotation_z(0.4);
        let new_local = apply_world_delta(local, world, delta);
        let new_world = parent * new_local;
        assert!(new_world.abs_diff_eq(delta * world, 1e-5));
    }
}
