//! 宿主调度
//!
//! 一帧内的阶段顺序固定：
//! Rescale → (外部 IK) → AutoFlex → (外部物理) → Puppet。
//! 阶段只能前进，倒退的调用被忽略；begin_frame 重新开始一帧。

use crate::biped::BipedRegistry;
use crate::config::get_config;
use crate::flex::AutoFlexEngine;
use crate::handle::HandleTable;
use crate::puppet::{MuscleDriver, Puppet, PuppetState};
use crate::skeleton::TransformStore;

/// 帧内阶段（按执行顺序排序）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FramePhase {
    Rescale,
    /// 外部 IK
    Ik,
    AutoFlex,
    /// 外部物理 step
    Physics,
    Puppet,
}

slotmap::new_key_type! {
    pub struct PuppetHandle;
}

/// 进程级运行时：双足缩放、自动收缩、布娃娃
pub struct RigRuntime {
    bipeds: BipedRegistry,
    flex: AutoFlexEngine,
    puppet_handles: HandleTable<PuppetHandle>,
    puppets: Vec<Puppet>,
    phase: Option<FramePhase>,
}

impl Default for RigRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl RigRuntime {
    pub fn new() -> Self {
        if get_config().debug_log {
            log::info!("[Runtime] 创建运行时");
        }
        Self {
            bipeds: BipedRegistry::new(),
            flex: AutoFlexEngine::new(),
            puppet_handles: HandleTable::new(),
            puppets: Vec::new(),
            phase: None,
        }
    }

    pub fn bipeds(&self) -> &BipedRegistry {
        &self.bipeds
    }

    pub fn bipeds_mut(&mut self) -> &mut BipedRegistry {
        &mut self.bipeds
    }

    pub fn flex(&self) -> &AutoFlexEngine {
        &self.flex
    }

    pub fn flex_mut(&mut self) -> &mut AutoFlexEngine {
        &mut self.flex
    }

    // ========================================
    // 布娃娃
    // ========================================

    pub fn add_puppet(&mut self, puppet: Puppet) -> PuppetHandle {
        let handle = self.puppet_handles.insert();
        self.puppets.push(puppet);
        if get_config().debug_log {
            log::info!("[Runtime] 添加布娃娃 {:?}，共 {} 个", handle, self.puppets.len());
        }
        handle
    }

    pub fn remove_puppet(&mut self, handle: PuppetHandle) -> Option<Puppet> {
        let (dense, _) = self.puppet_handles.remove(handle)?;
        Some(self.puppets.swap_remove(dense))
    }

    pub fn puppet(&self, handle: PuppetHandle) -> Option<&Puppet> {
        self.puppets.get(self.puppet_handles.dense_index(handle)?)
    }

    pub fn puppet_mut(&mut self, handle: PuppetHandle) -> Option<&mut Puppet> {
        let dense = self.puppet_handles.dense_index(handle)?;
        self.puppets.get_mut(dense)
    }

    pub fn puppet_count(&self) -> usize {
        self.puppets.len()
    }

    // ========================================
    // 帧流程
    // ========================================

    /// 当前所处阶段（本帧尚未开始为 None）
    pub fn phase(&self) -> Option<FramePhase> {
        self.phase
    }

    pub fn begin_frame(&mut self) {
        self.phase = None;
    }

    /// 进入阶段；比当前阶段靠前时返回 false
    pub fn advance(&mut self, phase: FramePhase) -> bool {
        if let Some(current) = self.phase {
            if phase < current {
                log::trace!("[Runtime] 阶段 {:?} 已过（当前 {:?}），忽略", phase, current);
                return false;
            }
        }
        self.phase = Some(phase);
        true
    }

    /// 抓快照并把缩放求解放到后台；写回在 finalize 或下一个阶段发生
    pub fn schedule_rescale<S: TransformStore + ?Sized>(&mut self, store: &S) -> bool {
        if !self.advance(FramePhase::Rescale) {
            return false;
        }
        self.bipeds.schedule(store);
        true
    }

    /// 缩放：抓快照 → 求解 → 写回
    pub fn rescale<S: TransformStore + ?Sized>(&mut self, store: &mut S) -> bool {
        if !self.advance(FramePhase::Rescale) {
            return false;
        }
        self.bipeds.run_frame(store);
        true
    }

    /// 完成缩放的写回（用于 schedule_rescale 之后）
    pub fn apply_rescale<S: TransformStore + ?Sized>(&mut self, store: &mut S) {
        self.bipeds.apply(store);
    }

    /// 自动收缩：读取最终骨骼位置求值
    pub fn auto_flex<S: TransformStore + ?Sized>(&mut self, store: &S, dt: f32) -> bool {
        if !self.advance(FramePhase::AutoFlex) {
            return false;
        }
        self.bipeds.finalize_all_jobs();
        self.flex.evaluate(store, dt);
        true
    }

    /// 物理写回之后更新一个布娃娃
    pub fn post_physics(
        &mut self,
        handle: PuppetHandle,
        driver: &mut dyn MuscleDriver,
        dt: f32,
    ) -> Option<PuppetState> {
        if !self.advance(FramePhase::Puppet) {
            return None;
        }
        self.puppet_mut(handle)?.post_physics(driver, dt)
    }

    /// 阻塞等待所有后台任务
    pub fn finalize_all_jobs(&mut self) {
        self.bipeds.finalize_all_jobs();
    }

    /// 物理前的整段：缩放 → IK 回调 → 自动收缩
    pub fn run_animation_phases<S, F>(&mut self, store: &mut S, dt: f32, ik: F)
    where
        S: TransformStore + ?Sized,
        F: FnOnce(&mut S),
    {
        self.begin_frame();
        self.rescale(store);
        if self.advance(FramePhase::Ik) {
            ik(store);
        }
        self.auto_flex(&*store, dt);
        self.advance(FramePhase::Physics);
    }
}
