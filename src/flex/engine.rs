//! 自动收缩批处理引擎
//!
//! 追踪变换按引用计数共享，最后一个引用释放时 swap-remove 压缩，
//! 并把指向原末尾槽的绑定改写到新位置。

use std::collections::HashMap;

use rayon::prelude::*;

use super::binding::{AutoFlexBinding, Calibration, TargetState, MAX_FLEX_TARGETS};
use super::target::FlexTarget;
use crate::config::get_config;
use crate::handle::HandleTable;
use crate::skeleton::{TransformId, TransformSnapshotBuffer, TransformStore};
use crate::{Result, RigError};

slotmap::new_key_type! {
    /// 绑定句柄
    pub struct AutoFlexHandle;
}

/// 引用计数的追踪变换列表
#[derive(Debug)]
struct TrackedTransforms {
    ids: Vec<TransformId>,
    refcounts: Vec<u32>,
    lookup: HashMap<TransformId, usize>,
    buffer: TransformSnapshotBuffer,
}

impl TrackedTransforms {
    fn new() -> Self {
        Self {
            ids: Vec::new(),
            refcounts: Vec::new(),
            lookup: HashMap::new(),
            buffer: TransformSnapshotBuffer::new(1, 0),
        }
    }

    fn acquire(&mut self, id: TransformId) -> usize {
        if let Some(&slot) = self.lookup.get(&id) {
            self.refcounts[slot] += 1;
            return slot;
        }
        let slot = self.ids.len();
        self.ids.push(id);
        self.refcounts.push(1);
        self.lookup.insert(id, slot);
        self.buffer.push_block(&[Some(id)]);
        slot
    }

    /// 释放一次引用；槽被回收时返回 (回收的槽, 被搬过来的原末尾槽)
    fn release(&mut self, slot: usize) -> Option<(usize, usize)> {
        let count = self.refcounts.get_mut(slot)?;
        *count -= 1;
        if *count > 0 {
            return None;
        }
        let last = self.ids.len() - 1;
        let removed = self.ids.swap_remove(slot);
        self.refcounts.swap_remove(slot);
        self.lookup.remove(&removed);
        self.buffer.swap_remove_block(slot);
        if slot != last {
            self.lookup.insert(self.ids[slot], slot);
        }
        Some((slot, last))
    }
}

pub struct AutoFlexEngine {
    tracked: TrackedTransforms,
    handles: HandleTable<AutoFlexHandle>,
    bindings: Vec<AutoFlexBinding>,
}

impl Default for AutoFlexEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoFlexEngine {
    pub fn new() -> Self {
        Self {
            tracked: TrackedTransforms::new(),
            handles: HandleTable::new(),
            bindings: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// 当前追踪的变换数（共享变换只算一次）
    #[inline]
    pub fn tracked_transform_count(&self) -> usize {
        self.tracked.ids.len()
    }

    /// 创建绑定，以当前姿态标定
    pub fn create_binding<S: TransformStore + ?Sized>(
        &mut self,
        store: &S,
        root: TransformId,
        targets: &[FlexTarget],
    ) -> Result<AutoFlexHandle> {
        if targets.is_empty() {
            return Err(RigError::EmptyFlexBinding);
        }
        if targets.len() > MAX_FLEX_TARGETS {
            return Err(RigError::TooManyFlexTargets {
                count: targets.len(),
                max: MAX_FLEX_TARGETS,
            });
        }

        let root_snapshot = store.snapshot(root).ok_or(RigError::MissingTransform(root))?;
        let mut calibrations = Vec::with_capacity(targets.len());
        for target in targets {
            let snapshot = store
                .snapshot(target.transform)
                .ok_or(RigError::MissingTransform(target.transform))?;
            calibrations.push(Calibration::capture(&root_snapshot, &snapshot, target.axis));
        }

        let root_slot = self.tracked.acquire(root);
        let states = targets
            .iter()
            .zip(calibrations)
            .map(|(config, calibration)| TargetState {
                config: *config,
                slot: self.tracked.acquire(config.transform),
                calibration,
                distance_value: 0.0,
                angle_value: 0.0,
                previous_angle: None,
            })
            .collect();

        let handle = self.handles.insert();
        self.bindings.push(AutoFlexBinding::new(root_slot, states));

        if get_config().debug_log {
            log::info!(
                "[AutoFlex] 创建绑定 {:?}: {} 个子目标，追踪变换 {} 个",
                handle,
                targets.len(),
                self.tracked_transform_count()
            );
        }
        Ok(handle)
    }

    /// 销毁绑定并释放追踪变换
    pub fn destroy_binding(&mut self, handle: AutoFlexHandle) -> bool {
        let Some((dense, _moved)) = self.handles.remove(handle) else {
            return false;
        };
        let binding = self.bindings.swap_remove(dense);

        let mut slots: Vec<usize> = std::iter::once(binding.root_slot)
            .chain(binding.targets.iter().map(|t| t.slot))
            .collect();
        for i in 0..slots.len() {
            if let Some((freed, moved_from)) = self.tracked.release(slots[i]) {
                self.retarget_slot(moved_from, freed);
                // 本绑定尚未释放的槽也要跟着改
                for pending in &mut slots[i + 1..] {
                    if *pending == moved_from {
                        *pending = freed;
                    }
                }
            }
        }
        true
    }

    /// 追踪槽 from 被搬到 to：改写所有引用
    fn retarget_slot(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        for binding in &mut self.bindings {
            if binding.root_slot == from {
                binding.root_slot = to;
            }
            for target in &mut binding.targets {
                if target.slot == from {
                    target.slot = to;
                }
            }
        }
    }

    pub fn binding(&self, handle: AutoFlexHandle) -> Option<&AutoFlexBinding> {
        let dense = self.handles.dense_index(handle)?;
        self.bindings.get(dense)
    }

    /// 绑定输出，无效句柄返回 0
    pub fn output(&self, handle: AutoFlexHandle) -> f32 {
        self.binding(handle).map(|b| b.output()).unwrap_or(0.0)
    }

    /// 以当前姿态重新标定
    pub fn recalibrate<S: TransformStore + ?Sized>(&mut self, store: &S, handle: AutoFlexHandle) -> bool {
        let Some(dense) = self.handles.dense_index(handle) else {
            return false;
        };
        self.tracked.buffer.fetch_pass(store);
        let frame = self.tracked.buffer.frame();
        self.bindings[dense].recalibrate(&frame.read, &frame.read_valid);
        true
    }

    /// 每帧求值：抓取追踪变换快照，然后并行计算全部绑定
    pub fn evaluate<S: TransformStore + ?Sized>(&mut self, store: &S, dt: f32) {
        if self.bindings.is_empty() {
            return;
        }
        self.tracked.buffer.fetch_pass(store);
        let frame = self.tracked.buffer.frame();
        let (read, valid) = (&frame.read, &frame.read_valid);

        if self.bindings.len() >= get_config().parallel_threshold {
            self.bindings
                .par_iter_mut()
                .for_each(|binding| binding.evaluate(read, valid, dt));
        } else {
            for binding in &mut self.bindings {
                binding.evaluate(read, valid, dt);
            }
        }
    }

    pub fn handles(&self) -> impl Iterator<Item = AutoFlexHandle> + '_ {
        self.handles.handles()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flex::WeightShape;
    use crate::skeleton::BoneSet;
    use glam::{Quat, Vec3};

    fn arm() -> (BoneSet, TransformId, TransformId, TransformId) {
        let mut set = BoneSet::new();
        let root = set.add_bone("root", None, Vec3::ZERO, Quat::IDENTITY);
        let elbow = set.add_bone("elbow", Some(root), Vec3::new(0.3, 0.0, 0.0), Quat::IDENTITY);
        let hand = set.add_bone("hand", Some(elbow), Vec3::new(0.25, 0.0, 0.0), Quat::IDENTITY);
        (set, root, elbow, hand)
    }

    #[test]
    fn test_binding_validation() {
        let (set, root, elbow, _) = arm();
        let mut engine = AutoFlexEngine::new();
        assert!(matches!(
            engine.create_binding(&set, root, &[]),
            Err(RigError::EmptyFlexBinding)
        ));
        let target = FlexTarget::distance(elbow, WeightShape::new(0.0, 0.1));
        assert!(matches!(
            engine.create_binding(&set, root, &[target; 5]),
            Err(RigError::TooManyFlexTargets { count: 5, max: 4 })
        ));
        assert!(matches!(
            engine.create_binding(&set, TransformId(99), &[target]),
            Err(RigError::MissingTransform(TransformId(99)))
        ));
        assert!(engine.is_empty());
        assert_eq!(engine.tracked_transform_count(), 0);
    }

    #[test]
    fn test_elbow_flex_output() {
        let (mut set, root, elbow, _) = arm();
        let mut engine = AutoFlexEngine::new();
        let target = FlexTarget::angle(elbow, Vec3::Z, WeightShape::new(0.0, std::f32::consts::FRAC_PI_2));
        let handle = engine.create_binding(&set, root, &[target]).unwrap();

        engine.evaluate(&set, 1.0 / 60.0);
        assert!(engine.output(handle).abs() < 1e-6);

        set.set_local(elbow, Vec3::new(0.3, 0.0, 0.0), Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        engine.evaluate(&set, 1.0 / 60.0);
        assert!((engine.output(handle) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_shared_transforms_are_refcounted_and_compacted() {
        let (mut set, root, elbow, hand) = arm();
        let mut engine = AutoFlexEngine::new();
        let near = FlexTarget::distance(elbow, WeightShape::new(0.0, 0.1));
        let far = FlexTarget::distance(hand, WeightShape::new(0.0, 0.1));

        let a = engine.create_binding(&set, root, &[near]).unwrap();
        let b = engine.create_binding(&set, root, &[far]).unwrap();
        assert_eq!(engine.tracked_transform_count(), 3);

        assert!(engine.destroy_binding(a));
        assert!(!engine.destroy_binding(a));
        // elbow 被释放，hand 搬到它的槽
        assert_eq!(engine.tracked_transform_count(), 2);
        assert_eq!(engine.output(a), 0.0);

        // b 仍然读到 hand
        set.set_local(hand, Vec3::new(0.35, 0.0, 0.0), Quat::IDENTITY);
        engine.evaluate(&set, 1.0 / 60.0);
        assert!((engine.output(b) - 1.0).abs() < 1e-5);

        assert!(engine.destroy_binding(b));
        assert_eq!(engine.tracked_transform_count(), 0);
    }
}
