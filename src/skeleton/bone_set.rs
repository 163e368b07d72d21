//! 骨骼集合 - 类似 nphysics Multibody，管理骨骼层次
//!
//! 父骨骼总是先于子骨骼加入，因此按索引顺序遍历即可保证拓扑序。

use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};
use rayon::prelude::*;

use super::bone_link::{BoneFlags, BoneLink};
use super::{LocalPose, TransformId, TransformSnapshot, TransformStore};
use crate::config::get_config;

/// 参考骨骼层次
#[derive(Clone, Debug, Default)]
pub struct BoneSet {
    bones: Vec<BoneLink>,
    children_cache: Vec<Vec<usize>>,
    name_to_index: HashMap<String, usize>,
}

impl BoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加骨骼，父骨骼必须已存在
    pub fn add_bone(
        &mut self,
        name: impl Into<String>,
        parent: Option<TransformId>,
        local_position: Vec3,
        local_rotation: Quat,
    ) -> TransformId {
        let index = self.bones.len();
        let parent = parent.map(|p| p.index()).filter(|&p| p < index);
        let mut bone = BoneLink::new(name, parent);
        bone.set_local(local_position, local_rotation);

        self.name_to_index.insert(bone.name.clone(), index);
        self.bones.push(bone);
        self.children_cache.push(Vec::new());
        if let Some(p) = parent {
            self.children_cache[p].push(index);
        }

        Self::update_global_transform_recursive(&mut self.bones, &self.children_cache, index);
        TransformId(index as u32)
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    pub fn find_bone_by_name(&self, name: &str) -> Option<TransformId> {
        self.name_to_index.get(name).map(|&i| TransformId(i as u32))
    }

    pub fn get_bone(&self, id: TransformId) -> Option<&BoneLink> {
        self.bones.get(id.index()).filter(|b| !b.is_destroyed())
    }

    /// 世界位置（已销毁返回 None）
    pub fn world_position(&self, id: TransformId) -> Option<Vec3> {
        self.get_bone(id).map(|b| b.position())
    }

    pub fn world_rotation(&self, id: TransformId) -> Option<Quat> {
        self.get_bone(id).map(|b| b.rotation())
    }

    pub fn local_pose(&self, id: TransformId) -> Option<LocalPose> {
        self.get_bone(id).map(|b| LocalPose {
            position: b.local_position,
            rotation: b.local_rotation,
        })
    }

    /// 设置本地位姿并刷新子树
    pub fn set_local(&mut self, id: TransformId, position: Vec3, rotation: Quat) -> bool {
        let index = id.index();
        match self.bones.get_mut(index) {
            Some(bone) if !bone.is_destroyed() => {
                bone.set_local(position, rotation);
            }
            _ => return false,
        }
        Self::update_global_transform_recursive(&mut self.bones, &self.children_cache, index);
        true
    }

    /// 模拟宿主销毁变换
    pub fn destroy_bone(&mut self, id: TransformId) {
        if let Some(bone) = self.bones.get_mut(id.index()) {
            bone.flags.insert(BoneFlags::DESTROYED);
        }
    }

    /// 按拓扑序刷新全部世界变换
    pub fn update_world_transforms(&mut self) {
        let parallel = self.bones.len() >= get_config().parallel_threshold;
        if parallel {
            self.bones.par_iter_mut().for_each(|b| b.compute_local_transform());
        }
        for index in 0..self.bones.len() {
            let (parent_to_world, parent_rotation) = match self.bones[index].parent {
                Some(p) => (self.bones[p].local_to_world, self.bones[p].world_rotation),
                None => (Mat4::IDENTITY, Quat::IDENTITY),
            };
            self.bones[index].compute_world_transform(parent_to_world, parent_rotation);
        }
    }

    /// 递归更新全局变换
    pub(crate) fn update_global_transform_recursive(
        bones: &mut [BoneLink],
        children_cache: &[Vec<usize>],
        idx: usize,
    ) {
        if idx >= bones.len() {
            return;
        }

        let (parent_to_world, parent_rotation) = match bones[idx].parent {
            Some(p) if p < bones.len() => (bones[p].local_to_world, bones[p].world_rotation),
            _ => (Mat4::IDENTITY, Quat::IDENTITY),
        };
        bones[idx].compute_world_transform(parent_to_world, parent_rotation);

        // 递归更新子骨骼
        if idx < children_cache.len() {
            for &child_idx in &children_cache[idx] {
                Self::update_global_transform_recursive(bones, children_cache, child_idx);
            }
        }
    }
}

impl TransformStore for BoneSet {
    fn snapshot(&self, id: TransformId) -> Option<TransformSnapshot> {
        let bone = self.get_bone(id)?;
        Some(TransformSnapshot {
            world_position: bone.position(),
            world_rotation: bone.rotation(),
            local_position: bone.local_position,
            local_rotation: bone.local_rotation,
        })
    }

    fn write_local(&mut self, id: TransformId, pose: LocalPose) -> bool {
        self.set_local(id, pose.position, pose.rotation)
    }

    fn write_locals(&mut self, writes: &[(TransformId, LocalPose)]) {
        for (id, pose) in writes {
            if let Some(bone) = self.bones.get_mut(id.index()) {
                if !bone.is_destroyed() {
                    bone.set_local(pose.position, pose.rotation);
                }
            }
        }
        self.update_world_transforms();
    }
}
