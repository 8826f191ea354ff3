// Descriptor pool allocation
//
// Pools have fixed capacity declared at creation and never auto-grow:
// callers size them for the known maximum object/texture count up front or
// accept allocation failure. Exhaustion is reported distinctly from
// device-memory pressure.

use crate::device::DeviceContext;
use crate::error::FrameError;
use ash::vk;
use std::sync::Arc;

/// CPU-side set budget for a pool. Rejects over-capacity requests before
/// the driver sees them, so exhaustion is deterministic and previously
/// allocated sets are never disturbed.
#[derive(Debug, Clone, Copy)]
pub struct PoolBudget {
    max_sets: u32,
    allocated: u32,
}

impl PoolBudget {
    pub fn new(max_sets: u32) -> Self {
        Self {
            max_sets,
            allocated: 0,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.max_sets - self.allocated
    }

    pub fn try_reserve(&mut self, count: u32) -> Result<(), FrameError> {
        if count > self.remaining() {
            return Err(FrameError::PoolExhausted);
        }
        self.allocated += count;
        Ok(())
    }

    pub fn release(&mut self, count: u32) {
        self.allocated = self.allocated.saturating_sub(count);
    }
}

pub struct DescriptorAllocator {
    device: Arc<DeviceContext>,
    pool: vk::DescriptorPool,
    budget: PoolBudget,
    individually_freeable: bool,
}

impl DescriptorAllocator {
    /// Create a pool with `max_sets` capacity and the given per-type counts.
    pub fn new(
        device: Arc<DeviceContext>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        individually_freeable: bool,
    ) -> Result<Self, FrameError> {
        if max_sets == 0 || pool_sizes.is_empty() {
            return Err(FrameError::InvalidArgument(
                "descriptor pool needs a non-zero capacity",
            ));
        }

        let flags = if individually_freeable {
            vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET
        } else {
            vk::DescriptorPoolCreateFlags::empty()
        };

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(flags);

        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .map_err(FrameError::Device)?;

        log::debug!(
            "Created descriptor pool: {} sets, freeable={}",
            max_sets,
            individually_freeable
        );

        Ok(Self {
            device,
            pool,
            budget: PoolBudget::new(max_sets),
            individually_freeable,
        })
    }

    /// Allocate one set per layout.
    ///
    /// Over-capacity requests fail with `PoolExhausted`; an empty layout
    /// list is an `InvalidArgument`. A failed allocation leaves previously
    /// allocated sets untouched.
    pub fn allocate(
        &mut self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>, FrameError> {
        if layouts.is_empty() {
            return Err(FrameError::InvalidArgument("no descriptor set layouts given"));
        }

        self.budget.try_reserve(layouts.len() as u32)?;

        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        match unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => Ok(sets),
            Err(e) => {
                // Per-type counts can exhaust before the set budget does
                self.budget.release(layouts.len() as u32);
                Err(FrameError::from(e))
            }
        }
    }

    /// Return sets to the pool. Only valid when the pool was created
    /// individually-freeable.
    pub fn free(&mut self, sets: &[vk::DescriptorSet]) -> Result<(), FrameError> {
        if !self.individually_freeable {
            return Err(FrameError::InvalidArgument(
                "pool was not created individually-freeable",
            ));
        }
        if sets.is_empty() {
            return Ok(());
        }

        unsafe { self.device.device.free_descriptor_sets(self.pool, sets) }
            .map_err(FrameError::Device)?;
        self.budget.release(sets.len() as u32);
        Ok(())
    }

    pub fn remaining_sets(&self) -> u32 {
        self.budget.remaining()
    }

    pub fn destroy(&self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_rejects_over_capacity() {
        let mut budget = PoolBudget::new(4);
        assert!(budget.try_reserve(3).is_ok());
        assert!(matches!(
            budget.try_reserve(2),
            Err(FrameError::PoolExhausted)
        ));
        // The failed reservation did not consume capacity
        assert_eq!(budget.remaining(), 1);
        assert!(budget.try_reserve(1).is_ok());
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn budget_release_restores_capacity() {
        let mut budget = PoolBudget::new(2);
        budget.try_reserve(2).unwrap();
        budget.release(1);
        assert_eq!(budget.remaining(), 1);
        assert!(budget.try_reserve(1).is_ok());
    }

    #[test]
    fn budget_release_saturates() {
        let mut budget = PoolBudget::new(2);
        budget.release(5);
        assert_eq!(budget.remaining(), 2);
    }
}
