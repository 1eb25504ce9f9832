use crate::address;
use std::collections::HashMap;

/// Page-granular address translation.
///
/// Every address space has its own page table.
/// Physical frames are allocated on first touch.
#[derive(Debug)]
pub struct Mmu {
    page_size: u64,
    num_address_spaces: usize,
    next_frame: u64,
    page_table: HashMap<(usize, u64), u64>,
}

impl Mmu {
    #[must_use]
    pub fn new(page_size: u64) -> Self {
        assert!(page_size.is_power_of_two());
        Self {
            page_size,
            num_address_spaces: 0,
            next_frame: 0,
            page_table: HashMap::new(),
        }
    }

    pub fn new_address_space(&mut self) -> usize {
        let id = self.num_address_spaces;
        self.num_address_spaces += 1;
        id
    }

    pub fn translate(&mut self, address_space: usize, virtual_addr: address) -> address {
        assert!(
            address_space < self.num_address_spaces,
            "unknown address space {address_space}"
        );
        let page = virtual_addr / self.page_size;
        let offset = virtual_addr % self.page_size;
        let frame = *self
            .page_table
            .entry((address_space, page))
            .or_insert_with(|| {
                let frame = self.next_frame;
                self.next_frame += 1;
                log::trace!("mmu: space {address_space} page {page:#x} -> frame {frame:#x}");
                frame
            });
        frame * self.page_size + offset
    }
}

#[cfg(test)]
mod tests {
    use super::Mmu;

    #[test]
    fn test_translate_allocates_frames_per_space() {
        let mut mmu = Mmu::new(4096);
        let first = mmu.new_address_space();
        let second = mmu.new_address_space();

        let a = mmu.translate(first, 0x10_0004);
        let b = mmu.translate(first, 0x10_0ff0);
        assert_eq!(a & !0xfff, b & !0xfff);
        assert_eq!(a & 0xfff, 0x4);
        assert_eq!(b & 0xfff, 0xff0);

        let c = mmu.translate(second, 0x10_0004);
        assert_ne!(a, c);
        assert_eq!(mmu.translate(second, 0x20_0000), 2 * 4096);
        assert_eq!(mmu.translate(first, 0x10_0004), a);
    }
}
