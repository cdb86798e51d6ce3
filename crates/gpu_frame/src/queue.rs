//! Queue family discovery and capability filtering

use ash::vk;
use bitflags::bitflags;

bitflags! {
    /// Hardware queue capabilities exposed to callers
    ///
    /// GRAPHICS and COMPUTE families implicitly support transfer operations,
    /// so their records carry TRANSFER as well even when the driver does not
    /// advertise the bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueCapabilities: u32 {
        /// Rasterization and render pass execution
        const GRAPHICS = 1 << 0;
        /// Compute dispatch
        const COMPUTE = 1 << 1;
        /// Buffer and image copies
        const TRANSFER = 1 << 2;
        /// Swapchain presentation
        const PRESENT = 1 << 3;
    }
}

/// One queue family as reported by the physical device
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilyInfo {
    /// Family index used for pool creation and queue retrieval
    pub index: u32,
    /// Capabilities of queues in this family
    pub capabilities: QueueCapabilities,
    /// Number of queues the family exposes
    pub queue_count: u32,
}

impl QueueFamilyInfo {
    /// Build a family record from driver-reported properties
    pub fn from_properties(
        index: u32,
        properties: &vk::QueueFamilyProperties,
        present_support: bool,
    ) -> Self {
        let mut capabilities = QueueCapabilities::empty();
        if properties.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            capabilities |= QueueCapabilities::GRAPHICS | QueueCapabilities::TRANSFER;
        }
        if properties.queue_flags.contains(vk::QueueFlags::COMPUTE) {
            capabilities |= QueueCapabilities::COMPUTE | QueueCapabilities::TRANSFER;
        }
        if properties.queue_flags.contains(vk::QueueFlags::TRANSFER) {
            capabilities |= QueueCapabilities::TRANSFER;
        }
        if present_support {
            capabilities |= QueueCapabilities::PRESENT;
        }
        Self {
            index,
            capabilities,
            queue_count: properties.queue_count,
        }
    }
}

/// A retrievable device queue together with its family capabilities
#[derive(Debug, Clone, Copy)]
pub struct CommandQueue {
    /// Queue family index this queue was created from
    pub family_index: u32,
    /// Native queue handle
    pub handle: vk::Queue,
    /// Capabilities of the owning family
    pub capabilities: QueueCapabilities,
}

/// Pick the family best matching `required`, preferring dedicated families
///
/// Among all families satisfying the request, the one advertising the fewest
/// additional capabilities wins. A discrete transfer family is therefore
/// chosen over the graphics family for transfer work when one exists.
pub fn find_queue_family(
    families: &[QueueFamilyInfo],
    required: QueueCapabilities,
) -> Option<u32> {
    families
        .iter()
        .filter(|family| family.capabilities.contains(required))
        .min_by_key(|family| (family.capabilities & !required).bits().count_ones())
        .map(|family| family.index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(index: u32, capabilities: QueueCapabilities) -> QueueFamilyInfo {
        QueueFamilyInfo {
            index,
            capabilities,
            queue_count: 1,
        }
    }

    #[test]
    fn test_graphics_family_implies_transfer() {
        let properties = vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS,
            queue_count: 4,
            ..Default::default()
        };
        let info = QueueFamilyInfo::from_properties(0, &properties, true);
        assert!(info.capabilities.contains(QueueCapabilities::TRANSFER));
        assert!(info.capabilities.contains(QueueCapabilities::PRESENT));
    }

    #[test]
    fn test_dedicated_transfer_family_preferred() {
        let families = [
            family(
                0,
                QueueCapabilities::GRAPHICS
                    | QueueCapabilities::COMPUTE
                    | QueueCapabilities::TRANSFER
                    | QueueCapabilities::PRESENT,
            ),
            family(1, QueueCapabilities::TRANSFER),
        ];
        assert_eq!(
            find_queue_family(&families, QueueCapabilities::TRANSFER),
            Some(1)
        );
    }

    #[test]
    fn test_graphics_family_satisfies_transfer_when_alone() {
        let families = [family(
            0,
            QueueCapabilities::GRAPHICS | QueueCapabilities::TRANSFER,
        )];
        assert_eq!(
            find_queue_family(&families, QueueCapabilities::TRANSFER),
            Some(0)
        );
    }

    #[test]
    fn test_unsatisfiable_request_is_none() {
        let families = [family(0, QueueCapabilities::TRANSFER)];
        assert_eq!(
            find_queue_family(&families, QueueCapabilities::GRAPHICS),
            None
        );
    }

    #[test]
    fn test_combined_requirement() {
        let families = [
            family(0, QueueCapabilities::GRAPHICS | QueueCapabilities::TRANSFER),
            family(
                1,
                QueueCapabilities::GRAPHICS
                    | QueueCapabilities::TRANSFER
                    | QueueCapabilities::PRESENT,
            ),
        ];
        assert_eq!(
            find_queue_family(
                &families,
                QueueCapabilities::GRAPHICS | QueueCapabilities::PRESENT
            ),
            Some(1)
        );
    }
}
