//! Shader resource group management
//!
//! A shader resource group is a bound set of buffer, texture and sampler
//! bindings consumed by a shader program. Groups are allocated from a
//! fixed-capacity pool sized at creation from the layout, and writes to a
//! group are buffered until `compile()` flushes them in one batched native
//! update call.

use crate::error::{RenderError, RenderResult};
use crate::slot_pool::SlotPool;
use ash::{vk, Device};
use std::collections::BTreeMap;

/// One binding slot of a layout, kept as plain data for pool sizing
#[derive(Debug, Clone, Copy)]
pub struct BindingDesc {
    /// Shader binding index
    pub binding: u32,
    /// Descriptor type bound at this index
    pub ty: vk::DescriptorType,
    /// Array length of the binding (1 for scalars)
    pub count: u32,
}

/// Builder for shader resource group layouts
pub struct BindGroupLayoutBuilder {
    bindings: Vec<BindingDesc>,
    stage_flags: Vec<vk::ShaderStageFlags>,
}

impl BindGroupLayoutBuilder {
    /// Create an empty layout builder
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            stage_flags: Vec::new(),
        }
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(
        self,
        binding: u32,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER, count, stage_flags)
    }

    /// Add a storage buffer binding
    pub fn add_storage_buffer(
        self,
        binding: u32,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.add(binding, vk::DescriptorType::STORAGE_BUFFER, count, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(
        self,
        binding: u32,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.add(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count,
            stage_flags,
        )
    }

    fn add(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        debug_assert!(count >= 1, "binding array length must be at least 1");
        self.bindings.push(BindingDesc { binding, ty, count });
        self.stage_flags.push(stage_flags);
        self
    }

    /// Create the native layout
    pub fn build(self, device: &Device) -> RenderResult<BindGroupLayout> {
        let native_bindings: Vec<vk::DescriptorSetLayoutBinding> = self
            .bindings
            .iter()
            .zip(&self.stage_flags)
            .map(|(desc, &stages)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(desc.binding)
                    .descriptor_type(desc.ty)
                    .descriptor_count(desc.count)
                    .stage_flags(stages)
                    .build()
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&native_bindings);

        let layout = unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(RenderError::Api)?
        };

        Ok(BindGroupLayout {
            device: device.clone(),
            layout,
            bindings: self.bindings,
        })
    }
}

impl Default for BindGroupLayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shader resource group layout with automatic cleanup
pub struct BindGroupLayout {
    device: Device,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<BindingDesc>,
}

impl BindGroupLayout {
    /// Native layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Binding slots declared in this layout
    pub fn bindings(&self) -> &[BindingDesc] {
        &self.bindings
    }
}

impl Drop for BindGroupLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Per-kind descriptor capacity for a pool of `max_groups` groups
fn pool_sizes(bindings: &[BindingDesc], max_groups: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut per_kind: BTreeMap<i32, u32> = BTreeMap::new();
    for desc in bindings {
        *per_kind.entry(desc.ty.as_raw()).or_insert(0) += desc.count;
    }
    per_kind
        .into_iter()
        .map(|(raw_ty, count)| vk::DescriptorPoolSize {
            ty: vk::DescriptorType::from_raw(raw_ty),
            descriptor_count: count * max_groups,
        })
        .collect()
}

/// A write staged on a group, flushed by `compile()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingWrite {
    UniformBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    StorageBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    CombinedImageSampler {
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
}

impl PendingWrite {
    fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
            Self::CombinedImageSampler { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// A bound set of shader resources with buffered writes
///
/// Setters only stage state; nothing reaches the GPU until `compile()`.
/// Staging a second write for the same binding and array element replaces
/// the first, so redundant updates collapse into one.
pub struct ShaderResourceGroup {
    set: vk::DescriptorSet,
    pending: BTreeMap<(u32, u32), PendingWrite>,
}

impl ShaderResourceGroup {
    pub(crate) fn new(set: vk::DescriptorSet) -> Self {
        Self {
            set,
            pending: BTreeMap::new(),
        }
    }

    /// Stage a uniform buffer write
    pub fn set_uniform_buffer(
        &mut self,
        binding: u32,
        array_element: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) {
        self.pending.insert(
            (binding, array_element),
            PendingWrite::UniformBuffer {
                buffer,
                offset,
                range,
            },
        );
    }

    /// Stage a storage buffer write
    pub fn set_storage_buffer(
        &mut self,
        binding: u32,
        array_element: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) {
        self.pending.insert(
            (binding, array_element),
            PendingWrite::StorageBuffer {
                buffer,
                offset,
                range,
            },
        );
    }

    /// Stage a combined image sampler write
    pub fn set_texture_sampler(
        &mut self,
        binding: u32,
        array_element: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) {
        self.pending.insert(
            (binding, array_element),
            PendingWrite::CombinedImageSampler { view, sampler },
        );
    }

    /// Number of writes staged and not yet compiled
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Flush every staged write in one batched native update
    pub fn compile(&mut self, device: &Device) {
        if self.pending.is_empty() {
            return;
        }

        // Collect infos first so the write structs reference finished
        // vectors; pushing while building writes would move the storage.
        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        let mut plan = Vec::with_capacity(self.pending.len());

        for (&(binding, array_element), write) in &self.pending {
            let info_index = match *write {
                PendingWrite::UniformBuffer {
                    buffer,
                    offset,
                    range,
                }
                | PendingWrite::StorageBuffer {
                    buffer,
                    offset,
                    range,
                } => {
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer,
                        offset,
                        range,
                    });
                    buffer_infos.len() - 1
                }
                PendingWrite::CombinedImageSampler { view, sampler } => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler,
                        image_view: view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    });
                    image_infos.len() - 1
                }
            };
            plan.push((binding, array_element, write.descriptor_type(), info_index));
        }

        let writes: Vec<vk::WriteDescriptorSet> = plan
            .iter()
            .map(|&(binding, array_element, ty, info_index)| {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(binding)
                    .dst_array_element(array_element)
                    .descriptor_type(ty);
                match ty {
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER => write
                        .image_info(std::slice::from_ref(&image_infos[info_index]))
                        .build(),
                    _ => write
                        .buffer_info(std::slice::from_ref(&buffer_infos[info_index]))
                        .build(),
                }
            })
            .collect();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }

        self.pending.clear();
    }

    /// Native descriptor set handle
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }
}

/// Fixed-capacity pool of shader resource groups sharing one layout
pub struct ShaderResourceGroupPool {
    device: Device,
    layout: BindGroupLayout,
    pool: vk::DescriptorPool,
    groups: SlotPool<ShaderResourceGroup>,
}

impl ShaderResourceGroupPool {
    /// Size the backing pool for `max_groups` groups of `layout`
    pub fn new(device: Device, layout: BindGroupLayout, max_groups: u32) -> RenderResult<Self> {
        debug_assert!(max_groups > 0);

        let sizes = pool_sizes(layout.bindings(), max_groups);
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_groups)
            .pool_sizes(&sizes);

        let pool = unsafe {
            device
                .create_descriptor_pool(&pool_info, None)
                .map_err(RenderError::Api)?
        };

        log::debug!(
            "Created shader resource group pool: {} groups, {} binding kinds",
            max_groups,
            sizes.len()
        );

        Ok(Self {
            device,
            layout,
            pool,
            groups: SlotPool::new(max_groups as usize),
        })
    }

    /// Allocate a group, reusing a freed pool index when one exists
    pub fn allocate_group(&mut self) -> RenderResult<usize> {
        if self.groups.len() == self.groups.capacity() {
            return Err(RenderError::OutOfPoolCapacity {
                capacity: self.groups.capacity(),
            });
        }

        let layouts = [self.layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let set = unsafe {
            self.device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(RenderError::Api)?[0]
        };

        let index = self
            .groups
            .insert(ShaderResourceGroup::new(set))
            .ok_or(RenderError::OutOfPoolCapacity {
                capacity: self.groups.capacity(),
            })?;
        Ok(index)
    }

    /// Return a group's backing allocation and free its pool index
    pub fn deallocate_group(&mut self, index: usize) -> RenderResult<()> {
        let group = self
            .groups
            .remove(index)
            .ok_or_else(|| RenderError::InvalidOperation {
                reason: format!("deallocate of unbound group index {index}"),
            })?;

        unsafe {
            self.device
                .free_descriptor_sets(self.pool, &[group.handle()])
                .map_err(RenderError::Api)?;
        }
        Ok(())
    }

    /// Direct lookup of a live group, `None` for unbound indices
    pub fn get_group(&self, index: usize) -> Option<&ShaderResourceGroup> {
        self.groups.get(index)
    }

    /// Mutable lookup of a live group
    pub fn get_group_mut(&mut self, index: usize) -> Option<&mut ShaderResourceGroup> {
        self.groups.get_mut(index)
    }

    /// Flush one group's staged writes
    pub fn compile_group(&mut self, index: usize) -> RenderResult<()> {
        let device = self.device.clone();
        let group = self
            .groups
            .get_mut(index)
            .ok_or_else(|| RenderError::InvalidOperation {
                reason: format!("compile of unbound group index {index}"),
            })?;
        group.compile(&device);
        Ok(())
    }

    /// Layout the pool was sized for
    pub fn layout(&self) -> &BindGroupLayout {
        &self.layout
    }

    /// Number of live groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no groups are live
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Maximum number of concurrently live groups
    pub fn capacity(&self) -> usize {
        self.groups.capacity()
    }
}

impl Drop for ShaderResourceGroupPool {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees every set allocated from it
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_pending_write_overwrites_same_slot() {
        let mut group = ShaderResourceGroup::new(vk::DescriptorSet::null());
        group.set_uniform_buffer(0, 0, vk::Buffer::from_raw(1), 0, 64);
        group.set_uniform_buffer(0, 0, vk::Buffer::from_raw(2), 0, 128);
        assert_eq!(group.pending_writes(), 1);
    }

    #[test]
    fn test_array_elements_are_distinct_slots() {
        let mut group = ShaderResourceGroup::new(vk::DescriptorSet::null());
        group.set_texture_sampler(1, 0, vk::ImageView::from_raw(1), vk::Sampler::from_raw(1));
        group.set_texture_sampler(1, 1, vk::ImageView::from_raw(2), vk::Sampler::from_raw(1));
        group.set_texture_sampler(1, 2, vk::ImageView::from_raw(3), vk::Sampler::from_raw(1));
        assert_eq!(group.pending_writes(), 3);
    }

    #[test]
    fn test_kind_change_replaces_pending_write() {
        let mut group = ShaderResourceGroup::new(vk::DescriptorSet::null());
        group.set_uniform_buffer(2, 0, vk::Buffer::from_raw(5), 0, 16);
        group.set_storage_buffer(2, 0, vk::Buffer::from_raw(5), 0, 16);
        assert_eq!(group.pending_writes(), 1);
    }

    #[test]
    fn test_pool_sizes_scale_by_group_count() {
        let bindings = [
            BindingDesc {
                binding: 0,
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                count: 2,
            },
            BindingDesc {
                binding: 1,
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
            },
            BindingDesc {
                binding: 2,
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                count: 4,
            },
        ];
        let sizes = pool_sizes(&bindings, 8);
        assert_eq!(sizes.len(), 2);
        let uniform = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER)
            .unwrap();
        assert_eq!(uniform.descriptor_count, 3 * 8);
        let sampler = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .unwrap();
        assert_eq!(sampler.descriptor_count, 4 * 8);
    }
}
