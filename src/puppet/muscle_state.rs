//! 肌肉状态表
//!
//! 数值字段由宏按固定表生成，混合函数逐字段展开；
//! 布尔开关放在 MuscleFlags 里，只做覆盖不参与加权。

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use super::layout::MuscleLayout;

bitflags! {
    /// 覆盖型开关（取最后一个正权重配置的值）
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MuscleFlags: u8 {
        /// 钉住时碰撞体启用
        const PINNED_COLLIDERS = 0x01;
        /// 解钉时碰撞体启用
        const UNPINNED_COLLIDERS = 0x02;
        /// 运动学刚体（完全跟随动画）
        const KINEMATIC = 0x04;
    }
}

impl Default for MuscleFlags {
    fn default() -> Self {
        MuscleFlags::PINNED_COLLIDERS | MuscleFlags::UNPINNED_COLLIDERS
    }
}

macro_rules! muscle_state_schema {
    ($( $(#[$doc:meta])* $field:ident = $default:expr ),* $(,)?) => {
        /// 单块肌肉的配置状态
        #[derive(Clone, Copy, Debug, PartialEq)]
        pub struct MuscleState {
            $( $(#[$doc])* pub $field: f32, )*
            pub flags: MuscleFlags,
        }

        impl Default for MuscleState {
            fn default() -> Self {
                Self {
                    $( $field: $default, )*
                    flags: MuscleFlags::default(),
                }
            }
        }

        impl MuscleState {
            /// 数值字段名，按声明顺序
            pub const FIELD_NAMES: &'static [&'static str] = &[$( stringify!($field) ),*];

            /// 全零状态（开关保持默认）
            pub fn zero() -> Self {
                Self {
                    $( $field: 0.0, )*
                    flags: MuscleFlags::default(),
                }
            }

            /// self += other * weight（开关不动）
            pub fn add_scaled(&mut self, other: &Self, weight: f32) {
                $( self.$field += other.$field * weight; )*
            }

            /// 数值字段整体缩放
            pub fn scaled(&self, weight: f32) -> Self {
                Self {
                    $( $field: self.$field * weight, )*
                    flags: self.flags,
                }
            }

            /// 逐字段线性插值；开关在 t >= 0.5 时取 b
            pub fn lerp(a: &Self, b: &Self, t: f32) -> Self {
                Self {
                    $( $field: a.$field + (b.$field - a.$field) * t, )*
                    flags: if t >= 0.5 { b.flags } else { a.flags },
                }
            }

            pub fn is_finite(&self) -> bool {
                true $( && self.$field.is_finite() )*
            }

            /// 按字段名读取（调试/编辑器用）
            pub fn field(&self, name: &str) -> Option<f32> {
                match name {
                    $( stringify!($field) => Some(self.$field), )*
                    _ => None,
                }
            }
        }
    };
}

muscle_state_schema! {
    // ========== 驱动 ==========
    /// 钉向动画目标的强度
    pin_weight = 1.0,
    /// 动画 (0) 与自由物理 (1) 的混合
    mapping_weight = 1.0,
    /// 关节驱动强度
    muscle_weight = 1.0,
    muscle_damper_add = 0.0,
    muscle_damper_multiplier = 1.0,
    max_force_multiplier = 1.0,
    /// 外部冲量的缩放
    impulse_multiplier = 1.0,
    /// 碰撞免疫 [0, 1]，1 时碰撞不再解钉
    immunity = 0.0,

    // ========== 碰撞变体 ==========
    /// collision_blend = 1 时的取值
    collision_pin_weight = 0.0,
    collision_mapping_weight = 1.0,
    collision_muscle_weight = 0.5,
    collision_max_force_multiplier = 1.0,
    /// 越大解钉越慢
    collision_resistance = 1.0,
    unpin_parents = 0.5,
    unpin_children = 0.5,
    unpin_group = 0.0,
    /// 低于此钉住权重时使用解钉碰撞体开关
    disable_colliders_unpin_threshold = 0.5,

    // ========== 平衡 ==========
    /// 为 0 时不检查位置偏差
    unbalance_distance_threshold = 0.0,
    unbalance_distance_range = 0.1,
    /// 为 0 时不检查角度偏差（弧度）
    unbalance_angle_threshold = 0.0,
    unbalance_angle_range = 0.5,
    balance_contribution = 1.0,
    unbalance_contribution = 1.0,
}

/// 按名字引用的肌肉状态，缓存解析出的肌肉索引
///
/// 缓存值 1 起始，0 表示未解析；每次使用前按名字复核。
#[derive(Debug)]
pub struct NamedMuscleState {
    pub name: String,
    pub state: MuscleState,
    cached_index: AtomicU32,
}

impl Clone for NamedMuscleState {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            state: self.state,
            cached_index: AtomicU32::new(self.cached_index.load(Ordering::Relaxed)),
        }
    }
}

impl NamedMuscleState {
    pub fn new(name: impl Into<String>, state: MuscleState) -> Self {
        Self {
            name: name.into(),
            state,
            cached_index: AtomicU32::new(0),
        }
    }

    /// 解析目标肌肉索引
    pub fn resolve(&self, layout: &MuscleLayout) -> Option<usize> {
        let cached = self.cached_index.load(Ordering::Relaxed) as usize;
        if cached > 0 && layout.name(cached - 1) == Some(self.name.as_str()) {
            return Some(cached - 1);
        }
        match layout.find(&self.name) {
            Some(index) => {
                self.cached_index.store(index as u32 + 1, Ordering::Relaxed);
                Some(index)
            }
            None => {
                self.cached_index.store(0, Ordering::Relaxed);
                None
            }
        }
    }

    /// 当前缓存（未解析为 None）
    pub fn cached_index(&self) -> Option<usize> {
        match self.cached_index.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n as usize - 1),
        }
    }
}
