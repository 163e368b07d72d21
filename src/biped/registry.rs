//! 双足实例注册表
//!
//! 持有全部批处理数组（快照帧、LimbData、Sizes），外部只能通过这里的 API 修改。
//! 每帧：schedule（并行读取 + 后台求解）→ finalize_all_jobs（阻塞等待）→ apply（写回）。

use std::sync::mpsc::{self, Receiver};

use super::limb::{LimbData, SizeSource, Sizes, SizesPair};
use super::solver::{solve_batch, SolverParams};
use super::topology::{BipedBone, READ_COUNT, WRITE_COUNT};
use crate::config::get_config;
use crate::handle::HandleTable;
use crate::skeleton::{
    BoneSet, SnapshotFrame, TransformId, TransformSnapshot, TransformSnapshotBuffer, TransformStore,
};
use crate::{Result, RigError};

slotmap::new_key_type! {
    /// 稳定实例句柄（swap-remove 不会使其失效）
    pub struct BipedHandle;
}

// ============================================================================
// 描述符
// ============================================================================

/// 注册用的骨骼映射，按 BipedBone 槽序
#[derive(Clone, Debug)]
pub struct BipedDescriptor {
    pub bones: [Option<TransformId>; READ_COUNT],
    pub limb: LimbData,
}

impl Default for BipedDescriptor {
    fn default() -> Self {
        Self {
            bones: [None; READ_COUNT],
            limb: LimbData::default(),
        }
    }
}

impl BipedDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bone(mut self, bone: BipedBone, id: TransformId) -> Self {
        self.bones[bone.index()] = Some(id);
        self
    }

    #[inline]
    pub fn bone(&self, bone: BipedBone) -> Option<TransformId> {
        self.bones[bone.index()]
    }

    /// 按默认骨骼名从 BoneSet 查找
    pub fn from_bone_set(set: &BoneSet) -> Self {
        let mut descriptor = Self::default();
        for bone in BipedBone::ALL {
            descriptor.bones[bone.index()] = set.find_bone_by_name(bone.name());
        }
        descriptor
    }
}

// ============================================================================
// 后台任务
// ============================================================================

/// 移交给后台求解的数据
struct BatchJob {
    frame: SnapshotFrame,
}

struct PendingJob {
    receiver: Receiver<BatchJob>,
}

// ============================================================================
// 注册表
// ============================================================================

pub struct BipedRegistry {
    handles: HandleTable<BipedHandle>,
    buffer: TransformSnapshotBuffer,
    limbs: Vec<LimbData>,
    sizes: Vec<SizesPair>,
    pending: Option<PendingJob>,
}

impl Default for BipedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BipedRegistry {
    pub fn new() -> Self {
        Self {
            handles: HandleTable::new(),
            buffer: TransformSnapshotBuffer::new(READ_COUNT, WRITE_COUNT),
            limbs: Vec::new(),
            sizes: Vec::new(),
            pending: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    #[inline]
    pub fn contains(&self, handle: BipedHandle) -> bool {
        self.handles.contains(handle)
    }

    /// 当前密集索引（只在下一次 unregister 之前有效）
    #[inline]
    pub fn dense_index(&self, handle: BipedHandle) -> Option<usize> {
        self.handles.dense_index(handle)
    }

    pub fn handles(&self) -> impl Iterator<Item = BipedHandle> + '_ {
        self.handles.handles()
    }

    #[inline]
    pub fn has_pending_job(&self) -> bool {
        self.pending.is_some()
    }

    // ========================================
    // 注册 / 注销
    // ========================================

    /// 注册实例，骨盆必须存在
    pub fn register(&mut self, descriptor: &BipedDescriptor, sizes: Sizes) -> Result<BipedHandle> {
        self.finalize_all_jobs();

        if descriptor.bone(BipedBone::Pelvis).is_none() {
            return Err(RigError::MissingBone { bone: BipedBone::Pelvis.name() });
        }

        let handle = self.handles.insert();
        self.buffer.push_block(&descriptor.bones);
        self.limbs.push(descriptor.limb);
        self.sizes.push(SizesPair::new(sizes));

        if get_config().debug_log {
            log::info!("[Biped] 注册实例 {:?}，当前共 {} 个", handle, self.len());
        }
        Ok(handle)
    }

    /// 注销实例，末尾实例搬到空位，其句柄保持有效
    pub fn unregister(&mut self, handle: BipedHandle) -> bool {
        self.finalize_all_jobs();

        let Some((dense, _moved)) = self.handles.remove(handle) else {
            return false;
        };
        self.buffer.swap_remove_block(dense);
        self.limbs.swap_remove(dense);
        self.sizes.swap_remove(dense);

        if get_config().debug_log {
            log::info!("[Biped] 注销实例 {:?}，剩余 {} 个", handle, self.len());
        }
        true
    }

    // ========================================
    // 数据访问
    // ========================================

    pub fn sizes(&self, handle: BipedHandle) -> Option<&SizesPair> {
        let dense = self.handles.dense_index(handle)?;
        self.sizes.get(dense)
    }

    pub fn limb_data(&self, handle: BipedHandle) -> Option<&LimbData> {
        let dense = self.handles.dense_index(handle)?;
        self.limbs.get(dense)
    }

    /// 修改 LimbData（权重、轴向）
    pub fn update_limb_data(&mut self, handle: BipedHandle, update: impl FnOnce(&mut LimbData)) -> bool {
        match self.handles.dense_index(handle).and_then(|d| self.limbs.get_mut(d)) {
            Some(limb) => {
                update(limb);
                true
            }
            None => false,
        }
    }

    pub fn set_current(&mut self, handle: BipedHandle, source: SizeSource, value: f32) -> bool {
        self.update_sizes(handle, |pair| pair.current.set(source, value))
    }

    pub fn set_previous(&mut self, handle: BipedHandle, source: SizeSource, value: f32) -> bool {
        self.update_sizes(handle, |pair| pair.previous.set(source, value))
    }

    /// previous ← current（全部区域）
    pub fn sync_previous(&mut self, handle: BipedHandle) -> bool {
        self.update_sizes(handle, SizesPair::sync)
    }

    fn update_sizes(&mut self, handle: BipedHandle, update: impl FnOnce(&mut SizesPair)) -> bool {
        match self.handles.dense_index(handle).and_then(|d| self.sizes.get_mut(d)) {
            Some(pair) => {
                update(pair);
                true
            }
            None => false,
        }
    }

    pub fn bone_id(&self, handle: BipedHandle, bone: BipedBone) -> Option<TransformId> {
        let dense = self.handles.dense_index(handle)?;
        self.buffer.block_ids(dense)?.get(bone.index()).copied().flatten()
    }

    /// 最近一次 fetch 的快照（有后台任务时返回 None）
    pub fn snapshot(&self, handle: BipedHandle, bone: BipedBone) -> Option<TransformSnapshot> {
        if self.pending.is_some() {
            return None;
        }
        let dense = self.handles.dense_index(handle)?;
        let slot = dense * READ_COUNT + bone.index();
        let frame = self.buffer.frame();
        if *frame.read_valid.get(slot)? {
            frame.read.get(slot).copied()
        } else {
            None
        }
    }

    // ========================================
    // 帧流程
    // ========================================

    /// 读取快照并把求解放到 rayon 线程池
    pub fn schedule<S: TransformStore + ?Sized>(&mut self, store: &S) {
        self.finalize_all_jobs();
        if self.is_empty() {
            return;
        }

        self.buffer.fetch_pass(store);

        let mut frame = self.buffer.take_frame();
        let limbs = self.limbs.clone();
        let sizes = self.sizes.clone();
        let params = SolverParams::from_config();
        let (sender, receiver) = mpsc::channel();

        rayon::spawn(move || {
            solve_batch(&mut frame, &limbs, &sizes, &params);
            let _ = sender.send(BatchJob { frame });
        });
        self.pending = Some(PendingJob { receiver });
    }

    /// 阻塞等待后台求解完成并归还数组
    pub fn finalize_all_jobs(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        match pending.receiver.recv() {
            Ok(job) => self.buffer.restore_frame(job.frame),
            Err(_) => {
                log::error!("[Biped] 求解任务异常终止，丢弃本帧写入");
                self.buffer.reset_frame();
            }
        }
    }

    /// 等待求解并写回
    pub fn apply<S: TransformStore + ?Sized>(&mut self, store: &mut S) {
        self.finalize_all_jobs();
        self.buffer.apply_pass(store);
    }

    /// schedule + apply
    pub fn run_frame<S: TransformStore + ?Sized>(&mut self, store: &mut S) {
        self.schedule(&*store);
        self.apply(store);
    }
}

impl Drop for BipedRegistry {
    fn drop(&mut self) {
        self.finalize_all_jobs();
    }
}
