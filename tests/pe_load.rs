mod common;

use common::{Pe32, TestMemory, HEADERS_LEN, TEXT_FILL, TEXT_LEN, TEXT_RVA};
use vdisk_boot::pe;
use vdisk_boot::{BootError, PhysMemory};

#[test]
fn loads_at_preferred_base() {
    let raw = Pe32::default().build();
    let mut mem = TestMemory::new(0x10_0000, 0x10_0000);
    // Stale bytes that must be cleared.
    mem.bytes[..0x4000].fill(0x5a);

    let image = pe::load(&raw, &mut mem).unwrap();
    assert_eq!(image.base, 0x10_0000);
    assert_eq!(image.len, 0x2000);
    assert_eq!(image.entry, 0x10_0000 + TEXT_RVA as u64);

    let headers = mem.region(0x10_0000, HEADERS_LEN as usize).unwrap();
    assert_eq!(headers, &raw[..HEADERS_LEN as usize]);

    let text = mem
        .region(0x10_0000 + TEXT_RVA as u64, TEXT_LEN as usize)
        .unwrap();
    assert!(text.iter().all(|&b| b == TEXT_FILL));

    // Between headers and .text, and after .text up to the page-rounded end: zero.
    let gap = mem.region(0x10_0200, 0xe00).unwrap();
    assert!(gap.iter().all(|&b| b == 0));
    let tail = mem.region(0x10_1200, 0xe00).unwrap();
    assert!(tail.iter().all(|&b| b == 0));
    // Outside the image nothing is touched.
    assert_eq!(mem.region(0x10_2000, 1).unwrap(), &[0x5a]);
}

#[test]
fn image_length_is_page_rounded() {
    let raw = Pe32 {
        size_of_image: 0x1201,
        ..Pe32::default()
    }
    .build();
    let mut mem = TestMemory::new(0x10_0000, 0x10_0000);
    let image = pe::load(&raw, &mut mem).unwrap();
    assert_eq!(image.len, 0x2000);
}

#[test]
fn rejects_other_machines() {
    let raw = Pe32 {
        machine: 0x8664,
        ..Pe32::default()
    }
    .build();
    let mut mem = TestMemory::new(0x10_0000, 0x10_0000);
    assert_eq!(
        pe::load(&raw, &mut mem),
        Err(BootError::UnsupportedArchitecture(0x8664))
    );
}

#[test]
fn rejects_non_executable_images() {
    let raw = Pe32 {
        characteristics: 0x0100,
        ..Pe32::default()
    }
    .build();
    let mut mem = TestMemory::new(0x10_0000, 0x10_0000);
    assert!(matches!(
        pe::load(&raw, &mut mem),
        Err(BootError::MalformedImage(_))
    ));
}

#[test]
fn rejects_entry_outside_image() {
    let raw = Pe32 {
        entry_rva: 0x4000,
        ..Pe32::default()
    }
    .build();
    let mut mem = TestMemory::new(0x10_0000, 0x10_0000);
    assert!(matches!(
        pe::load(&raw, &mut mem),
        Err(BootError::MalformedImage(_))
    ));
}

#[test]
fn image_outside_memory_is_a_memory_error() {
    let raw = Pe32 {
        image_base: 0x0080_0000,
        ..Pe32::default()
    }
    .build();
    let mut mem = TestMemory::new(0x10_0000, 0x10_0000);
    assert!(matches!(
        pe::load(&raw, &mut mem),
        Err(BootError::Memory(_))
    ));
}

#[test]
fn rejects_section_past_end_of_file() {
    let raw = Pe32 {
        text_raw_offset: 0x300,
        ..Pe32::default()
    }
    .build();
    let mut mem = TestMemory::new(0x10_0000, 0x10_0000);
    assert!(matches!(
        pe::load(&raw, &mut mem),
        Err(BootError::MalformedImage(_))
    ));
}
