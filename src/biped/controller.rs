//! 双足参数控制器
//!
//! 面向内容作者的接口：倍率 → 真实长度 → 写入注册表的 current 尺寸，
//! 并重新应用对应区域的组件编辑。

use glam::Vec3;

use super::component_edit::{ComponentEdit, ComponentSink};
use super::limb::{LimbData, SizeSource, Sizes};
use super::registry::{BipedDescriptor, BipedHandle, BipedRegistry};
use super::topology::{BipedBone, LimbChain, Side, READ_COUNT, SPINE_SEGMENTS, WRITE_COUNT};
use super::width::{MuscleDataSource, WidthContributionGroup, WidthContributions, WidthTargets};
use crate::config::get_config;
use crate::skeleton::{TransformSnapshot, TransformStore};
use crate::{Result, RigError};

/// 绑定姿态快照（未映射的骨骼为 None）
struct BindPose([Option<TransformSnapshot>; READ_COUNT]);

impl BindPose {
    fn capture<S: TransformStore + ?Sized>(store: &S, descriptor: &BipedDescriptor) -> Result<Self> {
        let mut pose = [None; READ_COUNT];
        for bone in BipedBone::ALL {
            let Some(id) = descriptor.bone(bone) else {
                continue;
            };
            let snapshot = store.snapshot(id).ok_or(RigError::MissingTransform(id))?;
            let finite = snapshot.world_position.is_finite()
                && snapshot.local_position.is_finite()
                && snapshot.world_rotation.is_finite()
                && snapshot.local_rotation.is_finite();
            if !finite {
                return Err(RigError::NonFiniteBindPose { bone: bone.name() });
            }
            pose[bone.index()] = Some(snapshot);
        }
        Ok(Self(pose))
    }

    #[inline]
    fn get(&self, bone: BipedBone) -> Option<&TransformSnapshot> {
        self.0[bone.index()].as_ref()
    }

    /// 脊柱三段（Pelvis→Spine1→Spine2→Spine3）的投影长度
    fn spine_lengths(&self, limb: &LimbData) -> [f32; 3] {
        let mut lengths = [0.0f32; 3];
        for (length, bone) in lengths.iter_mut().zip(SPINE_SEGMENTS) {
            if let Some(parent) = bone.parent() {
                *length = self.projected_length(parent, bone, limb.extension_axis(parent));
            }
        }
        lengths
    }

    /// |dot(child - parent, parent_rot · axis)|
    fn projected_length(&self, parent: BipedBone, child: BipedBone, local_axis: Vec3) -> f32 {
        match (self.get(parent), self.get(child)) {
            (Some(p), Some(c)) => {
                let axis = p.world_rotation * local_axis;
                (c.world_position - p.world_position).dot(axis).abs()
            }
            _ => 0.0,
        }
    }
}

// ============================================================================
// 控制器
// ============================================================================

pub struct BipedParameterController {
    handle: BipedHandle,
    defaults: Sizes,
    multipliers: [f32; SizeSource::COUNT],
    edits: Vec<(SizeSource, ComponentEdit)>,
    widths: WidthContributions,
}

impl BipedParameterController {
    /// 测量绑定姿态并注册实例
    ///
    /// descriptor.limb 中的保持权重与分配比例原样保留，轴向由绑定姿态推导。
    pub fn bind<S: TransformStore + ?Sized>(
        registry: &mut BipedRegistry,
        store: &S,
        descriptor: &BipedDescriptor,
    ) -> Result<Self> {
        let pose = BindPose::capture(store, descriptor)?;
        let limb = measure_limb_data(&pose, descriptor.limb);
        let defaults = measure_defaults(&pose, &limb);

        let mut descriptor = descriptor.clone();
        descriptor.limb = limb;
        let handle = registry.register(&descriptor, defaults)?;

        if get_config().debug_log {
            log::info!(
                "[Biped] 绑定完成: 脊柱 {:.4}, 颈 {:.4}, 腿 {:?}, 臂 {:?}",
                defaults.spine_length,
                defaults.neck_length,
                defaults.leg_lengths,
                defaults.arm_lengths
            );
        }

        Ok(Self {
            handle,
            defaults,
            multipliers: [1.0; SizeSource::COUNT],
            edits: Vec::new(),
            widths: WidthContributions::default(),
        })
    }

    /// 注销实例
    pub fn unbind(self, registry: &mut BipedRegistry) -> bool {
        registry.unregister(self.handle)
    }

    #[inline]
    pub fn handle(&self) -> BipedHandle {
        self.handle
    }

    // ========================================
    // 测量
    // ========================================

    #[inline]
    pub fn default_length(&self, source: SizeSource) -> f32 {
        self.defaults.get(source)
    }

    /// 倍率 × 默认长度（宽度再加肌肉贡献）
    pub fn real_length(&self, source: SizeSource) -> f32 {
        let mut real = self.multipliers[source.index()] * self.defaults.get(source);
        if let Some(slot) = source.width_slot() {
            real += self.widths.total(slot);
        }
        real
    }

    #[inline]
    pub fn multiplier(&self, source: SizeSource) -> f32 {
        self.multipliers[source.index()]
    }

    /// 站立高度相对默认值的变化（脊柱 + 颈 + 两腿平均）
    pub fn standing_height_contribution(&self) -> f32 {
        let delta = |source| self.real_length(source) - self.default_length(source);
        let left = delta(SizeSource::ThighL) + delta(SizeSource::CalfL);
        let right = delta(SizeSource::ThighR) + delta(SizeSource::CalfR);
        delta(SizeSource::SpineLength) + delta(SizeSource::NeckLength) + (left + right) * 0.5
    }

    // ========================================
    // 长度 / 宽度
    // ========================================

    /// 设置单个区域倍率（钳制到配置范围）
    pub fn set_multiplier(
        &mut self,
        registry: &mut BipedRegistry,
        sink: &mut dyn ComponentSink,
        source: SizeSource,
        multiplier: f32,
    ) {
        if !multiplier.is_finite() {
            return;
        }
        let config = get_config();
        self.multipliers[source.index()] = multiplier.clamp(config.min_size_multiplier, config.max_size_multiplier);
        self.apply_size(registry, sink, source);
    }

    fn set_pair(
        &mut self,
        registry: &mut BipedRegistry,
        sink: &mut dyn ComponentSink,
        sources: [SizeSource; 2],
        multiplier: f32,
    ) {
        for source in sources {
            self.set_multiplier(registry, sink, source, multiplier);
        }
    }

    pub fn set_spine_length(&mut self, registry: &mut BipedRegistry, sink: &mut dyn ComponentSink, multiplier: f32) {
        self.set_multiplier(registry, sink, SizeSource::SpineLength, multiplier);
    }

    pub fn set_neck_length(&mut self, registry: &mut BipedRegistry, sink: &mut dyn ComponentSink, multiplier: f32) {
        self.set_multiplier(registry, sink, SizeSource::NeckLength, multiplier);
    }

    pub fn set_shoulder_width(&mut self, registry: &mut BipedRegistry, sink: &mut dyn ComponentSink, multiplier: f32) {
        self.set_pair(registry, sink, [SizeSource::ShoulderWidthL, SizeSource::ShoulderWidthR], multiplier);
    }

    pub fn set_arm_length(&mut self, registry: &mut BipedRegistry, sink: &mut dyn ComponentSink, multiplier: f32) {
        self.set_pair(registry, sink, [SizeSource::UpperArmL, SizeSource::UpperArmR], multiplier);
    }

    pub fn set_forearm_length(&mut self, registry: &mut BipedRegistry, sink: &mut dyn ComponentSink, multiplier: f32) {
        self.set_pair(registry, sink, [SizeSource::ForearmL, SizeSource::ForearmR], multiplier);
    }

    pub fn set_hip_width(&mut self, registry: &mut BipedRegistry, sink: &mut dyn ComponentSink, multiplier: f32) {
        self.set_pair(registry, sink, [SizeSource::HipWidthL, SizeSource::HipWidthR], multiplier);
    }

    pub fn set_leg_length(&mut self, registry: &mut BipedRegistry, sink: &mut dyn ComponentSink, multiplier: f32) {
        self.set_pair(registry, sink, [SizeSource::ThighL, SizeSource::ThighR], multiplier);
    }

    pub fn set_calf_length(&mut self, registry: &mut BipedRegistry, sink: &mut dyn ComponentSink, multiplier: f32) {
        self.set_pair(registry, sink, [SizeSource::CalfL, SizeSource::CalfR], multiplier);
    }

    /// 把真实值写入 current 尺寸并重新应用该区域的组件编辑
    fn apply_size(&mut self, registry: &mut BipedRegistry, sink: &mut dyn ComponentSink, source: SizeSource) {
        let real = self.real_length(source);
        registry.set_current(self.handle, source, real);
        let delta = real - self.defaults.get(source);
        for (_, edit) in self.edits.iter().filter(|(s, _)| *s == source) {
            edit.resize(delta, sink);
        }
    }

    // ========================================
    // previous 同步
    // ========================================

    /// previous ← current（单个区域）
    pub fn set_previous(&self, registry: &mut BipedRegistry, source: SizeSource) -> bool {
        match registry.sizes(self.handle).map(|pair| pair.current.get(source)) {
            Some(current) => registry.set_previous(self.handle, source, current),
            None => false,
        }
    }

    pub fn set_previous_spine_length(&self, registry: &mut BipedRegistry) {
        self.set_previous(registry, SizeSource::SpineLength);
    }

    pub fn set_previous_neck_length(&self, registry: &mut BipedRegistry) {
        self.set_previous(registry, SizeSource::NeckLength);
    }

    pub fn set_previous_shoulder_width(&self, registry: &mut BipedRegistry) {
        self.set_previous(registry, SizeSource::ShoulderWidthL);
        self.set_previous(registry, SizeSource::ShoulderWidthR);
    }

    pub fn set_previous_arm_length(&self, registry: &mut BipedRegistry) {
        self.set_previous(registry, SizeSource::UpperArmL);
        self.set_previous(registry, SizeSource::UpperArmR);
    }

    pub fn set_previous_forearm_length(&self, registry: &mut BipedRegistry) {
        self.set_previous(registry, SizeSource::ForearmL);
        self.set_previous(registry, SizeSource::ForearmR);
    }

    pub fn set_previous_hip_width(&self, registry: &mut BipedRegistry) {
        self.set_previous(registry, SizeSource::HipWidthL);
        self.set_previous(registry, SizeSource::HipWidthR);
    }

    pub fn set_previous_leg_length(&self, registry: &mut BipedRegistry) {
        self.set_previous(registry, SizeSource::ThighL);
        self.set_previous(registry, SizeSource::ThighR);
    }

    pub fn set_previous_calf_length(&self, registry: &mut BipedRegistry) {
        self.set_previous(registry, SizeSource::CalfL);
        self.set_previous(registry, SizeSource::CalfR);
    }

    pub fn sync_previous_sizes(&self, registry: &mut BipedRegistry) -> bool {
        registry.sync_previous(self.handle)
    }

    // ========================================
    // 保持权重
    // ========================================

    pub fn set_preserve_hand_position(&self, registry: &mut BipedRegistry, weight: f32) {
        let w = weight.clamp(0.0, 1.0);
        registry.update_limb_data(self.handle, |limb| limb.hand_preserve = [w; 2]);
    }

    pub fn set_preserve_foot_position(&self, registry: &mut BipedRegistry, weight: f32) {
        let w = weight.clamp(0.0, 1.0);
        registry.update_limb_data(self.handle, |limb| limb.foot_preserve = [w; 2]);
    }

    pub fn set_preserve_knee_bend(&self, registry: &mut BipedRegistry, weight: f32) {
        let w = weight.clamp(0.0, 1.0);
        registry.update_limb_data(self.handle, |limb| limb.knee_preserve = [w; 2]);
    }

    /// 单侧保持权重
    pub fn set_preserve_side(&self, registry: &mut BipedRegistry, side: Side, hand: f32, foot: f32, knee: f32) {
        let i = side.index();
        registry.update_limb_data(self.handle, |limb| {
            limb.hand_preserve[i] = hand.clamp(0.0, 1.0);
            limb.foot_preserve[i] = foot.clamp(0.0, 1.0);
            limb.knee_preserve[i] = knee.clamp(0.0, 1.0);
        });
    }

    pub fn set_shoulder_width_split(&self, registry: &mut BipedRegistry, socket_fraction: f32) {
        let s = socket_fraction.clamp(0.0, 1.0);
        registry.update_limb_data(self.handle, |limb| limb.shoulder_split = s);
    }

    pub fn set_hip_width_split(&self, registry: &mut BipedRegistry, socket_fraction: f32) {
        let s = socket_fraction.clamp(0.0, 1.0);
        registry.update_limb_data(self.handle, |limb| limb.hip_split = s);
    }

    // ========================================
    // 组件编辑
    // ========================================

    /// 登记组件编辑，并按当前尺寸立即应用一次
    pub fn add_component_edit(&mut self, sink: &mut dyn ComponentSink, source: SizeSource, edit: ComponentEdit) {
        edit.resize(self.real_length(source) - self.defaults.get(source), sink);
        self.edits.push((source, edit));
    }

    pub fn component_edits(&self, source: SizeSource) -> impl Iterator<Item = &ComponentEdit> + '_ {
        self.edits.iter().filter(move |(s, _)| *s == source).map(|(_, e)| e)
    }

    // ========================================
    // 宽度贡献
    // ========================================

    pub fn add_width_group(&mut self, group: WidthContributionGroup) {
        let mut groups = self.widths.groups().to_vec();
        groups.push(group);
        self.widths = WidthContributions::new(groups);
    }

    /// 外部肌肉数据变化：只标脏，下次同步时重算
    pub fn notify_muscle_changed(&mut self, muscle_index: usize) -> WidthTargets {
        self.widths.mark_muscle_changed(muscle_index)
    }

    /// 全量重算
    pub fn recalculate_width_contributions(
        &mut self,
        registry: &mut BipedRegistry,
        sink: &mut dyn ComponentSink,
        source: &dyn MuscleDataSource,
    ) {
        self.widths.mark_all_dirty();
        self.sync_width_contributions(registry, sink, source);
    }

    /// 重算脏组，宽度总量变化的区域重新调用对应的宽度设置
    pub fn sync_width_contributions(
        &mut self,
        registry: &mut BipedRegistry,
        sink: &mut dyn ComponentSink,
        source: &dyn MuscleDataSource,
    ) -> WidthTargets {
        let changed = self.widths.recalculate(source);
        let sources = [
            SizeSource::ShoulderWidthL,
            SizeSource::ShoulderWidthR,
            SizeSource::HipWidthL,
            SizeSource::HipWidthR,
        ];
        for (target, size_source) in WidthTargets::SLOTS.iter().zip(sources) {
            if changed.contains(*target) {
                self.apply_size(registry, sink, size_source);
            }
        }
        changed
    }

    #[inline]
    pub fn width_contribution(&self, slot: usize) -> f32 {
        self.widths.total(slot)
    }
}

// ============================================================================
// 绑定姿态测量
// ============================================================================

/// 由绑定姿态推导轴向；权重沿用输入
fn measure_limb_data(pose: &BindPose, mut limb: LimbData) -> LimbData {
    // 延伸轴：指向主子骨骼的本地方向
    for bone in BipedBone::ALL.iter().take(WRITE_COUNT) {
        let Some(child) = bone.primary_child() else {
            continue;
        };
        if let (Some(_), Some(c)) = (pose.get(*bone), pose.get(child)) {
            let axis = c.local_position.normalize_or_zero();
            if axis != Vec3::ZERO {
                limb.extension_axes[bone.index()] = axis;
            }
        }
    }

    // 宽度轴：socket 本地位置去掉躯干延伸分量
    for side in Side::BOTH {
        for (chain, slot) in [(LimbChain::arm(side), side.index()), (LimbChain::leg(side), 2 + side.index())] {
            let Some(socket) = pose.get(chain.socket) else {
                continue;
            };
            let girdle_axis = limb.extension_axis(chain.girdle);
            let p = socket.local_position;
            let lateral = (p - girdle_axis * p.dot(girdle_axis)).normalize_or_zero();
            if lateral != Vec3::ZERO {
                limb.width_axes[slot] = lateral;
            }
            let in_socket = socket.local_rotation.inverse() * limb.width_axes[slot];
            limb.limb_width_axes[slot] = in_socket.normalize_or_zero();
        }
    }

    // 弯曲轴：绑定姿态已弯曲时取弯曲平面法线
    for side in Side::BOTH {
        for (chain, slot) in [(LimbChain::arm(side), side.index()), (LimbChain::leg(side), 2 + side.index())] {
            if let (Some(u), Some(l), Some(e)) = (pose.get(chain.upper), pose.get(chain.lower), pose.get(chain.end)) {
                let normal = (l.world_position - u.world_position).cross(e.world_position - l.world_position);
                if normal.length_squared() > 1e-10 {
                    let local = u.world_rotation.inverse() * normal.normalize();
                    limb.bend_axes[slot] = local;
                }
            }
        }
    }

    limb.spine_fractions = spine_fractions(pose.spine_lengths(&limb));
    limb
}

fn measure_defaults(pose: &BindPose, limb: &LimbData) -> Sizes {
    let mut sizes = Sizes::default();
    sizes.spine_length = pose.spine_lengths(limb).iter().sum();

    for source in SizeSource::ALL {
        let Some((parent, child)) = source.measured_segment() else {
            continue;
        };
        let axis = match source.width_slot() {
            Some(slot) => limb.width_axes[slot],
            None => limb.extension_axis(parent),
        };
        sizes.set(source, pose.projected_length(parent, child, axis));
    }
    sizes
}

/// 脊柱三段在总长中的比例
fn spine_fractions(lengths: [f32; 3]) -> [f32; 3] {
    let total: f32 = lengths.iter().sum();
    if total > f32::EPSILON {
        lengths.map(|l| l / total)
    } else {
        [1.0 / 3.0; 3]
    }
}
