//! 自动收缩子目标配置

use glam::Vec3;

use crate::math::{fold01, inverse_lerp};
use crate::skeleton::TransformId;

/// 超出 [0, 1] 的处理方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RangeMode {
    /// 钳制
    #[default]
    Clamp,
    /// 三角折返（超过 1 的部分反射回来）
    Fold,
}

/// 输入区间 → [0, 1] 的整形
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightShape {
    pub min: f32,
    pub max: f32,
    pub mode: RangeMode,
    pub invert: bool,
}

impl WeightShape {
    pub fn new(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            mode: RangeMode::Clamp,
            invert: false,
        }
    }

    pub fn folded(mut self) -> Self {
        self.mode = RangeMode::Fold;
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn evaluate(&self, value: f32) -> f32 {
        let t = inverse_lerp(self.min, self.max, value);
        let t = match self.mode {
            RangeMode::Clamp => t.clamp(0.0, 1.0),
            RangeMode::Fold => fold01(t),
        };
        if self.invert {
            1.0 - t
        } else {
            t
        }
    }
}

/// 角速度门控：带符号角速度（rad/s）→ 倍率
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeedGate {
    pub speed_min: f32,
    pub speed_max: f32,
    pub multiplier_min: f32,
    pub multiplier_max: f32,
}

impl SpeedGate {
    pub fn evaluate(&self, speed: f32) -> f32 {
        let t = inverse_lerp(self.speed_min, self.speed_max, speed).clamp(0.0, 1.0);
        self.multiplier_min + (self.multiplier_max - self.multiplier_min) * t
    }
}

/// 一个子目标：变换 + 旋转轴 + 距离/角度两路权重
///
/// weight 为 0 的一路不参与组合（而不是按 0 参与）。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlexTarget {
    pub transform: TransformId,
    /// 目标本地空间中的旋转轴
    pub axis: Vec3,

    pub distance_weight: f32,
    /// 距标定位置的偏移距离
    pub distance: WeightShape,

    pub angle_weight: f32,
    /// 绕轴带符号角（弧度）
    pub angle: WeightShape,
    /// 轴向对齐衰减：dot(标定轴, 当前轴) 的区间
    pub axis_falloff: (f32, f32),
    pub speed_gate: Option<SpeedGate>,
}

impl FlexTarget {
    /// 纯距离目标
    pub fn distance(transform: TransformId, shape: WeightShape) -> Self {
        Self {
            transform,
            axis: Vec3::X,
            distance_weight: 1.0,
            distance: shape,
            angle_weight: 0.0,
            angle: WeightShape::new(0.0, 1.0),
            axis_falloff: (0.5, 1.0),
            speed_gate: None,
        }
    }

    /// 纯角度目标
    pub fn angle(transform: TransformId, axis: Vec3, shape: WeightShape) -> Self {
        Self {
            transform,
            axis: axis.normalize_or_zero(),
            distance_weight: 0.0,
            distance: WeightShape::new(0.0, 1.0),
            angle_weight: 1.0,
            angle: shape,
            axis_falloff: (0.5, 1.0),
            speed_gate: None,
        }
    }

    pub fn with_weights(mut self, distance_weight: f32, angle_weight: f32) -> Self {
        self.distance_weight = distance_weight.clamp(0.0, 1.0);
        self.angle_weight = angle_weight.clamp(0.0, 1.0);
        self
    }

    pub fn with_speed_gate(mut self, gate: SpeedGate) -> Self {
        self.speed_gate = Some(gate);
        self
    }

    pub fn with_axis_falloff(mut self, min_dot: f32, max_dot: f32) -> Self {
        self.axis_falloff = (min_dot, max_dot);
        self
    }

    /// 对齐衰减 [0, 1]
    pub fn alignment(&self, dot: f32) -> f32 {
        let (lo, hi) = self.axis_falloff;
        if hi <= lo {
            return if dot >= hi { 1.0 } else { 0.0 };
        }
        inverse_lerp(lo, hi, dot).clamp(0.0, 1.0)
    }
}
