//! 肌肉树布局：名字、父子关系、分组

use std::collections::HashMap;

use crate::{Result, RigError};

/// 单块肌肉的定义
#[derive(Clone, Debug, PartialEq)]
pub struct MuscleDef {
    pub name: String,
    pub parent: Option<usize>,
    /// 分组编号（同组肌肉互相传播解钉），None 表示不属于任何组
    pub group: Option<u32>,
}

impl MuscleDef {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            group: None,
        }
    }

    pub fn child(name: impl Into<String>, parent: usize) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent),
            group: None,
        }
    }

    pub fn in_group(mut self, group: u32) -> Self {
        self.group = Some(group);
        self
    }
}

/// 校验过的肌肉树
#[derive(Clone, Debug)]
pub struct MuscleLayout {
    muscles: Vec<MuscleDef>,
    children: Vec<Vec<usize>>,
    lookup: HashMap<String, usize>,
}

impl MuscleLayout {
    /// 父索引必须指向另一块已存在的肌肉，且不能成环
    pub fn new(muscles: Vec<MuscleDef>) -> Result<Self> {
        let count = muscles.len();
        let mut children = vec![Vec::new(); count];
        for (muscle, def) in muscles.iter().enumerate() {
            if let Some(parent) = def.parent {
                if parent >= count || parent == muscle {
                    return Err(RigError::InvalidMuscleParent { muscle, parent });
                }
                children[parent].push(muscle);
            }
        }

        // 沿父链走 count 步仍未到根即成环
        for (muscle, def) in muscles.iter().enumerate() {
            let mut current = def.parent;
            let mut steps = 0;
            while let Some(parent) = current {
                steps += 1;
                if steps > count {
                    return Err(RigError::InvalidMuscleParent { muscle, parent });
                }
                current = muscles[parent].parent;
            }
        }

        let mut lookup = HashMap::with_capacity(count);
        for (index, def) in muscles.iter().enumerate() {
            if lookup.insert(def.name.clone(), index).is_some() {
                log::warn!("[Puppet] 肌肉名 '{}' 重复，按名字只能找到最后一个", def.name);
            }
        }

        Ok(Self {
            muscles,
            children,
            lookup,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.muscles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.muscles.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.muscles.get(index).map(|m| m.name.as_str())
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.muscles.get(index).and_then(|m| m.parent)
    }

    pub fn children(&self, index: usize) -> &[usize] {
        self.children.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn group(&self, index: usize) -> Option<u32> {
        self.muscles.get(index).and_then(|m| m.group)
    }

    pub fn muscles(&self) -> &[MuscleDef] {
        &self.muscles
    }
}
