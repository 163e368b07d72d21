//! 稳定句柄表
//!
//! slotmap 保存 句柄 → 密集索引，另有 密集索引 → 句柄 的反向数组。
//! 密集数组 swap-remove 时只需改写被移动那一项的索引，
//! 无需通知任何持有者；过期句柄由 slotmap 的版本号拒绝。

use slotmap::{Key, SlotMap};

/// 句柄 → 密集索引 间接表
#[derive(Clone, Debug)]
pub struct HandleTable<K: Key> {
    slots: SlotMap<K, usize>,
    /// 密集索引 → 句柄
    handles: Vec<K>,
}

impl<K: Key> Default for HandleTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key> HandleTable<K> {
    pub fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
            handles: Vec::new(),
        }
    }

    /// 当前存活数量（等于密集数组长度）
    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 分配新句柄，密集索引为当前末尾
    pub fn insert(&mut self) -> K {
        let handle = self.slots.insert(self.handles.len());
        self.handles.push(handle);
        handle
    }

    /// 句柄对应的密集索引，过期句柄返回 None
    #[inline]
    pub fn dense_index(&self, handle: K) -> Option<usize> {
        self.slots.get(handle).copied()
    }

    #[inline]
    pub fn contains(&self, handle: K) -> bool {
        self.slots.contains_key(handle)
    }

    /// 密集索引对应的句柄
    #[inline]
    pub fn handle_at(&self, dense: usize) -> Option<K> {
        self.handles.get(dense).copied()
    }

    /// 移除句柄，返回 (被移除的密集索引, 被搬到该位置的原末尾索引)
    ///
    /// 调用方必须对自己的所有密集数组做同样的 swap_remove。
    pub fn remove(&mut self, handle: K) -> Option<(usize, Option<usize>)> {
        let dense = self.slots.remove(handle)?;
        let last = self.handles.len() - 1;
        self.handles.swap_remove(dense);
        if dense == last {
            return Some((dense, None));
        }
        if let Some(slot) = self.slots.get_mut(self.handles[dense]) {
            *slot = dense;
        }
        Some((dense, Some(last)))
    }

    /// 按密集顺序遍历句柄
    pub fn handles(&self) -> impl Iterator<Item = K> + '_ {
        self.handles.iter().copied()
    }
}
