//! 运行时配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 运行时配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct RigConfig {
    // ========== 几何求解 ==========
    /// 余弦定理容差：cos 超出 [-1-tol, 1+tol] 视为三角形无效，默认 1e-5
    pub triangle_tolerance: f32,
    /// 最短有效骨段长度，低于此值视为退化，默认 1e-6
    pub min_length_epsilon: f32,

    // ========== 批处理 ==========
    /// 批大小达到此值才走 rayon 并行，默认 8
    /// 小批次顺序执行，结果完全一致
    pub parallel_threshold: usize,

    // ========== 尺寸参数 ==========
    /// 长度/宽度倍率下限，默认 0.5
    pub min_size_multiplier: f32,
    /// 长度/宽度倍率上限，默认 2.0
    pub max_size_multiplier: f32,

    // ========== 平衡状态机 ==========
    /// Normal → OffBalance 阈值，默认 0.5
    pub off_balance_threshold: f32,
    /// OffBalance/Floating → Tumbling 阈值，默认 0.1
    pub tumbling_threshold: f32,
    /// GettingUp → Normal 阈值，默认 0.8
    pub recovered_threshold: f32,
    /// 平衡值变化速率系数，默认 3.0
    pub balance_rate_scale: f32,

    // ========== 调试 ==========
    /// 是否输出生命周期日志，默认 false
    pub debug_log: bool,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            triangle_tolerance: 1e-5,
            min_length_epsilon: 1e-6,

            // rayon 调度开销对少量角色不划算
            parallel_threshold: 8,

            min_size_multiplier: 0.5,
            max_size_multiplier: 2.0,

            off_balance_threshold: 0.5,
            tumbling_threshold: 0.1,
            recovered_threshold: 0.8,
            balance_rate_scale: 3.0,

            debug_log: false,
        }
    }
}

/// 全局配置实例
static RIG_CONFIG: Lazy<RwLock<RigConfig>> = Lazy::new(|| RwLock::new(RigConfig::default()));

/// 获取当前配置（只读）
pub fn get_config() -> RigConfig {
    RIG_CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: RigConfig) {
    *RIG_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    *RIG_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = RigConfig::default();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds_are_ordered() {
        let config = RigConfig::default();
        assert!(config.tumbling_threshold < config.off_balance_threshold);
        assert!(config.off_balance_threshold < config.recovered_threshold);
        assert!(config.min_size_multiplier < config.max_size_multiplier);
    }
}
