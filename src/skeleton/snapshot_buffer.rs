//! 变换快照缓冲区
//!
//! 读集合与写集合分开：每个块（一个角色或一个被追踪变换）占
//! read_stride 个读槽和 write_stride 个写槽，写槽 j 对应同块读槽 j，
//! 因此 write_stride <= read_stride。
//!
//! 流程：fetch_pass（并行读）→ 外部计算写入 frame.write → apply_pass（写回）。

use rayon::prelude::*;

use super::{LocalPose, TransformId, TransformSnapshot, TransformStore};
use crate::config::get_config;

/// 一帧的快照数据，可整体移交给后台计算任务
#[derive(Clone, Debug, Default)]
pub struct SnapshotFrame {
    /// 读快照
    pub read: Vec<TransformSnapshot>,
    /// 读槽本帧是否有效（变换存在）
    pub read_valid: Vec<bool>,
    /// 待写回的本地位姿
    pub write: Vec<LocalPose>,
    /// 写槽本帧是否被修改
    pub write_dirty: Vec<bool>,
}

/// 双缓冲快照
#[derive(Clone, Debug)]
pub struct TransformSnapshotBuffer {
    read_stride: usize,
    write_stride: usize,
    read_ids: Vec<Option<TransformId>>,
    write_ids: Vec<Option<TransformId>>,
    frame: SnapshotFrame,
}

impl TransformSnapshotBuffer {
    pub fn new(read_stride: usize, write_stride: usize) -> Self {
        debug_assert!(write_stride <= read_stride);
        Self {
            read_stride,
            write_stride,
            read_ids: Vec::new(),
            write_ids: Vec::new(),
            frame: SnapshotFrame::default(),
        }
    }

    #[inline]
    pub fn read_stride(&self) -> usize {
        self.read_stride
    }

    #[inline]
    pub fn write_stride(&self) -> usize {
        self.write_stride
    }

    /// 块数量
    #[inline]
    pub fn block_count(&self) -> usize {
        if self.read_stride == 0 {
            0
        } else {
            self.read_ids.len() / self.read_stride
        }
    }

    /// 追加一个块，返回块索引
    ///
    /// ids 长度不足 read_stride 时补 None。
    pub fn push_block(&mut self, ids: &[Option<TransformId>]) -> usize {
        let block = self.block_count();
        for i in 0..self.read_stride {
            let id = ids.get(i).copied().flatten();
            self.read_ids.push(id);
            self.frame.read.push(TransformSnapshot::default());
            self.frame.read_valid.push(false);
            if i < self.write_stride {
                self.write_ids.push(id);
                self.frame.write.push(LocalPose::default());
                self.frame.write_dirty.push(false);
            }
        }
        block
    }

    /// swap-remove 一个块（末尾块搬到该位置）
    pub fn swap_remove_block(&mut self, block: usize) {
        let count = self.block_count();
        if block >= count {
            return;
        }
        let last = count - 1;
        if block != last {
            swap_blocks(&mut self.read_ids, block, last, self.read_stride);
            swap_blocks(&mut self.frame.read, block, last, self.read_stride);
            swap_blocks(&mut self.frame.read_valid, block, last, self.read_stride);
            swap_blocks(&mut self.write_ids, block, last, self.write_stride);
            swap_blocks(&mut self.frame.write, block, last, self.write_stride);
            swap_blocks(&mut self.frame.write_dirty, block, last, self.write_stride);
        }
        let read_len = last * self.read_stride;
        let write_len = last * self.write_stride;
        self.read_ids.truncate(read_len);
        self.frame.read.truncate(read_len);
        self.frame.read_valid.truncate(read_len);
        self.write_ids.truncate(write_len);
        self.frame.write.truncate(write_len);
        self.frame.write_dirty.truncate(write_len);
    }

    /// 块的读句柄，块不存在时返回 None
    pub fn block_ids(&self, block: usize) -> Option<&[Option<TransformId>]> {
        if block >= self.block_count() {
            return None;
        }
        let start = block * self.read_stride;
        self.read_ids.get(start..start + self.read_stride)
    }

    #[inline]
    pub fn frame(&self) -> &SnapshotFrame {
        &self.frame
    }

    #[inline]
    pub fn frame_mut(&mut self) -> &mut SnapshotFrame {
        &mut self.frame
    }

    /// 移出帧数据（交给后台任务），缓冲区留空帧
    pub fn take_frame(&mut self) -> SnapshotFrame {
        std::mem::take(&mut self.frame)
    }

    /// 归还帧数据
    pub fn restore_frame(&mut self, frame: SnapshotFrame) {
        self.frame = frame;
    }

    /// 帧数据丢失时按当前块数重建空帧（下一次 fetch_pass 会重新填充）
    pub fn reset_frame(&mut self) {
        let read_len = self.read_ids.len();
        let write_len = self.write_ids.len();
        self.frame = SnapshotFrame {
            read: vec![TransformSnapshot::default(); read_len],
            read_valid: vec![false; read_len],
            write: vec![LocalPose::default(); write_len],
            write_dirty: vec![false; write_len],
        };
    }

    /// 读取阶段：并行抓取全部读槽快照，写槽初始化为当前本地位姿
    pub fn fetch_pass<S: TransformStore + ?Sized>(&mut self, store: &S) {
        let parallel = self.read_ids.len() >= get_config().parallel_threshold;
        let blocks = self.block_count();
        let ids = &self.read_ids;
        let frame = &mut self.frame;

        let fetch = |(id, (snapshot, valid)): (&Option<TransformId>, (&mut TransformSnapshot, &mut bool))| {
            match id.and_then(|id| store.snapshot(id)) {
                Some(s) => {
                    *snapshot = s;
                    *valid = true;
                }
                None => *valid = false,
            }
        };
        if parallel {
            ids.par_iter()
                .zip(frame.read.par_iter_mut().zip(frame.read_valid.par_iter_mut()))
                .for_each(fetch);
        } else {
            ids.iter()
                .zip(frame.read.iter_mut().zip(frame.read_valid.iter_mut()))
                .for_each(fetch);
        }

        if self.write_stride == 0 {
            return;
        }
        let (read_stride, write_stride) = (self.read_stride, self.write_stride);
        for block in 0..blocks {
            for j in 0..write_stride {
                let r = block * read_stride + j;
                let w = block * write_stride + j;
                frame.write[w] = frame.read[r].local_pose();
                frame.write_dirty[w] = false;
            }
        }
    }

    /// 写回阶段：只写被修改且本帧有效的槽
    pub fn apply_pass<S: TransformStore + ?Sized>(&mut self, store: &mut S) {
        if self.write_stride == 0 {
            return;
        }
        let (read_stride, write_stride) = (self.read_stride, self.write_stride);
        let frame = &self.frame;
        let collect = |(w, id): (usize, &Option<TransformId>)| -> Option<(TransformId, LocalPose)> {
            let id = (*id)?;
            let block = w / write_stride;
            let r = block * read_stride + w % write_stride;
            if frame.write_dirty[w] && frame.read_valid[r] {
                Some((id, frame.write[w]))
            } else {
                None
            }
        };
        let writes: Vec<(TransformId, LocalPose)> = if self.write_ids.len() >= get_config().parallel_threshold {
            self.write_ids.par_iter().enumerate().filter_map(collect).collect()
        } else {
            self.write_ids.iter().enumerate().filter_map(collect).collect()
        };
        if !writes.is_empty() {
            store.write_locals(&writes);
        }
        for dirty in &mut self.frame.write_dirty {
            *dirty = false;
        }
    }
}

fn swap_blocks<T>(data: &mut [T], a: usize, b: usize, stride: usize) {
    for i in 0..stride {
        data.swap(a * stride + i, b * stride + i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::BoneSet;
    use glam::{Quat, Vec3};

    fn chain() -> (BoneSet, Vec<TransformId>) {
        let mut set = BoneSet::new();
        let a = set.add_bone("a", None, Vec3::ZERO, Quat::IDENTITY);
        let b = set.add_bone("b", Some(a), Vec3::Y, Quat::IDENTITY);
        let c = set.add_bone("c", Some(b), Vec3::Y, Quat::IDENTITY);
        (set, vec![a, b, c])
    }

    #[test]
    fn test_fetch_then_apply_only_dirty() {
        let (mut set, ids) = chain();
        let mut buffer = TransformSnapshotBuffer::new(3, 2);
        buffer.push_block(&[Some(ids[1]), Some(ids[2]), Some(ids[0])]);
        buffer.fetch_pass(&set);

        assert!(buffer.frame().read_valid.iter().all(|v| *v));
        assert!(buffer.frame().read[1].world_position.abs_diff_eq(Vec3::new(0.0, 2.0, 0.0), 1e-6));

        let frame = buffer.frame_mut();
        frame.write[0].position = Vec3::new(0.0, 3.0, 0.0);
        frame.write_dirty[0] = true;
        buffer.apply_pass(&mut set);

        assert!(set.world_position(ids[2]).unwrap().abs_diff_eq(Vec3::new(0.0, 4.0, 0.0), 1e-6));
    }

    #[test]
    fn test_destroyed_transform_is_skipped() {
        let (mut set, ids) = chain();
        let mut buffer = TransformSnapshotBuffer::new(2, 2);
        buffer.push_block(&[Some(ids[1]), Some(ids[2])]);
        set.destroy_bone(ids[2]);
        buffer.fetch_pass(&set);
        assert!(buffer.frame().read_valid[0]);
        assert!(!buffer.frame().read_valid[1]);

        let frame = buffer.frame_mut();
        frame.write_dirty[1] = true;
        frame.write[1].position = Vec3::splat(9.0);
        buffer.apply_pass(&mut set);
        assert!(set.get_bone(ids[2]).is_none());
    }

    #[test]
    fn test_swap_remove_block_moves_last() {
        let (_, ids) = chain();
        let mut buffer = TransformSnapshotBuffer::new(1, 1);
        for id in &ids {
            buffer.push_block(&[Some(*id)]);
        }
        buffer.swap_remove_block(0);
        assert_eq!(buffer.block_count(), 2);
        assert_eq!(buffer.block_ids(0), Some(&[Some(ids[2])][..]));
        assert_eq!(buffer.block_ids(1), Some(&[Some(ids[1])][..]));
        assert_eq!(buffer.block_ids(2), None);
    }
}
