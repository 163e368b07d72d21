//! 双足固定拓扑
//!
//! 读集合 26 个槽，前 21 个同时是写集合。
//! 槽序是求解器的契约：改拓扑必须同时改 READ_COUNT / WRITE_COUNT 与本表。

/// 双足骨骼槽
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BipedBone {
    // 躯干
    Pelvis = 0,
    Spine1 = 1,
    Spine2 = 2,
    Spine3 = 3,
    Neck = 4,

    // 左臂
    ShoulderL = 5,
    UpperArmL = 6,
    ForearmL = 7,
    WristL = 8,

    // 右臂
    ShoulderR = 9,
    UpperArmR = 10,
    ForearmR = 11,
    WristR = 12,

    // 左腿
    HipL = 13,
    ThighL = 14,
    CalfL = 15,
    FootL = 16,

    // 右腿
    HipR = 17,
    ThighR = 18,
    CalfR = 19,
    FootR = 20,

    // 只读参考
    Root = 21,
    Head = 22,
    HeadTop = 23,
    ToeL = 24,
    ToeR = 25,
}

/// 读槽数量
pub const READ_COUNT: usize = 26;

/// 写槽数量（读槽前缀）
pub const WRITE_COUNT: usize = 21;

impl BipedBone {
    pub const ALL: [BipedBone; READ_COUNT] = [
        BipedBone::Pelvis,
        BipedBone::Spine1,
        BipedBone::Spine2,
        BipedBone::Spine3,
        BipedBone::Neck,
        BipedBone::ShoulderL,
        BipedBone::UpperArmL,
        BipedBone::ForearmL,
        BipedBone::WristL,
        BipedBone::ShoulderR,
        BipedBone::UpperArmR,
        BipedBone::ForearmR,
        BipedBone::WristR,
        BipedBone::HipL,
        BipedBone::ThighL,
        BipedBone::CalfL,
        BipedBone::FootL,
        BipedBone::HipR,
        BipedBone::ThighR,
        BipedBone::CalfR,
        BipedBone::FootR,
        BipedBone::Root,
        BipedBone::Head,
        BipedBone::HeadTop,
        BipedBone::ToeL,
        BipedBone::ToeR,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        (self as usize) < WRITE_COUNT
    }

    /// 默认骨骼名（BoneSet 按名绑定时使用）
    pub const fn name(self) -> &'static str {
        match self {
            BipedBone::Pelvis => "Pelvis",
            BipedBone::Spine1 => "Spine1",
            BipedBone::Spine2 => "Spine2",
            BipedBone::Spine3 => "Spine3",
            BipedBone::Neck => "Neck",
            BipedBone::ShoulderL => "ShoulderL",
            BipedBone::UpperArmL => "UpperArmL",
            BipedBone::ForearmL => "ForearmL",
            BipedBone::WristL => "WristL",
            BipedBone::ShoulderR => "ShoulderR",
            BipedBone::UpperArmR => "UpperArmR",
            BipedBone::ForearmR => "ForearmR",
            BipedBone::WristR => "WristR",
            BipedBone::HipL => "HipL",
            BipedBone::ThighL => "ThighL",
            BipedBone::CalfL => "CalfL",
            BipedBone::FootL => "FootL",
            BipedBone::HipR => "HipR",
            BipedBone::ThighR => "ThighR",
            BipedBone::CalfR => "CalfR",
            BipedBone::FootR => "FootR",
            BipedBone::Root => "Root",
            BipedBone::Head => "Head",
            BipedBone::HeadTop => "HeadTop",
            BipedBone::ToeL => "ToeL",
            BipedBone::ToeR => "ToeR",
        }
    }

    /// 结构父骨骼
    pub const fn parent(self) -> Option<BipedBone> {
        use BipedBone::*;
        match self {
            Root => None,
            Pelvis => Some(Root),
            Spine1 => Some(Pelvis),
            Spine2 => Some(Spine1),
            Spine3 => Some(Spine2),
            Neck => Some(Spine3),
            Head => Some(Neck),
            HeadTop => Some(Head),
            ShoulderL => Some(Spine3),
            UpperArmL => Some(ShoulderL),
            ForearmL => Some(UpperArmL),
            WristL => Some(ForearmL),
            ShoulderR => Some(Spine3),
            UpperArmR => Some(ShoulderR),
            ForearmR => Some(UpperArmR),
            WristR => Some(ForearmR),
            HipL => Some(Pelvis),
            ThighL => Some(HipL),
            CalfL => Some(ThighL),
            FootL => Some(CalfL),
            ToeL => Some(FootL),
            HipR => Some(Pelvis),
            ThighR => Some(HipR),
            CalfR => Some(ThighR),
            FootR => Some(CalfR),
            ToeR => Some(FootR),
        }
    }

    /// 沿延伸轴的主子骨骼（用于测量延伸轴与长度）
    pub const fn primary_child(self) -> Option<BipedBone> {
        use BipedBone::*;
        match self {
            Root => Some(Pelvis),
            Pelvis => Some(Spine1),
            Spine1 => Some(Spine2),
            Spine2 => Some(Spine3),
            Spine3 => Some(Neck),
            Neck => Some(Head),
            Head => Some(HeadTop),
            ShoulderL => Some(UpperArmL),
            UpperArmL => Some(ForearmL),
            ForearmL => Some(WristL),
            ShoulderR => Some(UpperArmR),
            UpperArmR => Some(ForearmR),
            ForearmR => Some(WristR),
            HipL => Some(ThighL),
            ThighL => Some(CalfL),
            CalfL => Some(FootL),
            FootL => Some(ToeL),
            HipR => Some(ThighR),
            ThighR => Some(CalfR),
            CalfR => Some(FootR),
            FootR => Some(ToeR),
            WristL | WristR | HeadTop | ToeL | ToeR => None,
        }
    }
}

/// 左右
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left = 0,
    Right = 1,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// 两段肢体链：socket → upper → lower → end
#[derive(Clone, Copy, Debug)]
pub struct LimbChain {
    pub socket: BipedBone,
    pub upper: BipedBone,
    pub lower: BipedBone,
    pub end: BipedBone,
    /// socket 所在的躯干骨骼（宽度轴所在空间）
    pub girdle: BipedBone,
}

impl LimbChain {
    pub const fn arm(side: Side) -> Self {
        match side {
            Side::Left => Self {
                socket: BipedBone::ShoulderL,
                upper: BipedBone::UpperArmL,
                lower: BipedBone::ForearmL,
                end: BipedBone::WristL,
                girdle: BipedBone::Spine3,
            },
            Side::Right => Self {
                socket: BipedBone::ShoulderR,
                upper: BipedBone::UpperArmR,
                lower: BipedBone::ForearmR,
                end: BipedBone::WristR,
                girdle: BipedBone::Spine3,
            },
        }
    }

    pub const fn leg(side: Side) -> Self {
        match side {
            Side::Left => Self {
                socket: BipedBone::HipL,
                upper: BipedBone::ThighL,
                lower: BipedBone::CalfL,
                end: BipedBone::FootL,
                girdle: BipedBone::Pelvis,
            },
            Side::Right => Self {
                socket: BipedBone::HipR,
                upper: BipedBone::ThighR,
                lower: BipedBone::CalfR,
                end: BipedBone::FootR,
                girdle: BipedBone::Pelvis,
            },
        }
    }
}

/// 脊柱三段（子骨骼本地位置承载长度变化）
pub const SPINE_SEGMENTS: [BipedBone; 3] = [BipedBone::Spine1, BipedBone::Spine2, BipedBone::Spine3];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order_matches_discriminants() {
        for (i, bone) in BipedBone::ALL.iter().enumerate() {
            assert_eq!(bone.index(), i);
        }
        assert_eq!(BipedBone::ALL.iter().filter(|b| b.is_writable()).count(), WRITE_COUNT);
    }

    #[test]
    fn test_parents_precede_children_in_read_set() {
        // 每个可写骨骼的父骨骼都在读集合内
        for bone in BipedBone::ALL {
            if bone.is_writable() {
                assert!(bone.parent().is_some(), "{:?}", bone);
            }
        }
    }
}
