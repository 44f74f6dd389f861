use proptest::prelude::*;

use vdisk_boot::{BlockIoError, Media, SynthesizedFs, VirtualDisk};

const BLOCK_SIZE: u32 = 512;
const LAST_BLOCK: u64 = 63;
const DISK_LEN: usize = (LAST_BLOCK as usize + 1) * BLOCK_SIZE as usize;

fn image() -> Vec<u8> {
    (0..DISK_LEN).map(|i| (i * 7 % 251) as u8).collect()
}

struct Filler(u8);

impl SynthesizedFs for Filler {
    fn read(&mut self, _lba: u64, _count: u64, buf: &mut [u8]) {
        buf.fill(self.0);
    }
}

/// A request that fits entirely on the disk.
fn in_bounds() -> impl Strategy<Value = (u64, usize)> {
    (0..=LAST_BLOCK).prop_flat_map(|lba| {
        let max = LAST_BLOCK - lba + 1;
        (Just(lba), (1..=max).prop_map(|blocks| blocks as usize * BLOCK_SIZE as usize))
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn read_then_write_back_restores_content((lba, len) in in_bounds()) {
        let original = image();
        let mut data = original.clone();
        {
            let mut disk = VirtualDisk::memory(Media::new(1, BLOCK_SIZE, LAST_BLOCK), &mut data).unwrap();
            let mut buf = vec![0u8; len];
            prop_assert_eq!(disk.read_blocks(1, lba, Some(&mut buf[..])), Ok(()));
            let start = lba as usize * BLOCK_SIZE as usize;
            prop_assert_eq!(&buf[..], &original[start..start + len]);
            prop_assert_eq!(disk.write_blocks(1, lba, Some(&buf[..])), Ok(()));
        }
        prop_assert_eq!(data, original);
    }

    #[test]
    fn zero_length_always_succeeds(lba in any::<u64>(), media_id in any::<u32>()) {
        let mut data = image();
        let mut disk = VirtualDisk::memory(Media::new(1, BLOCK_SIZE, LAST_BLOCK), &mut data).unwrap();
        prop_assert_eq!(disk.read_blocks(media_id, lba, Some(&mut [0u8; 0][..])), Ok(()));
        prop_assert_eq!(disk.write_blocks(media_id, lba, Some(&[0u8; 0][..])), Ok(()));
    }

    #[test]
    fn missing_buffer_is_invalid(lba in any::<u64>(), media_id in any::<u32>()) {
        let mut data = image();
        let mut disk = VirtualDisk::memory(Media::new(1, BLOCK_SIZE, LAST_BLOCK), &mut data).unwrap();
        prop_assert_eq!(disk.read_blocks(media_id, lba, None), Err(BlockIoError::InvalidParameter));
        prop_assert_eq!(disk.write_blocks(media_id, lba, None), Err(BlockIoError::InvalidParameter));
    }

    #[test]
    fn lba_past_last_block_is_invalid(lba in (LAST_BLOCK + 1)..=u64::MAX, blocks in 1usize..4) {
        let mut data = image();
        let mut disk = VirtualDisk::memory(Media::new(1, BLOCK_SIZE, LAST_BLOCK), &mut data).unwrap();
        let mut buf = vec![0u8; blocks * BLOCK_SIZE as usize];
        prop_assert_eq!(disk.read_blocks(1, lba, Some(&mut buf[..])), Err(BlockIoError::InvalidParameter));
        prop_assert_eq!(disk.write_blocks(1, lba, Some(&buf[..])), Err(BlockIoError::InvalidParameter));
    }

    #[test]
    fn unaligned_length_is_bad_buffer_size(lba in 0..=LAST_BLOCK, len in 1usize..4096) {
        prop_assume!(len % BLOCK_SIZE as usize != 0);
        let mut data = image();
        let mut disk = VirtualDisk::memory(Media::new(1, BLOCK_SIZE, LAST_BLOCK), &mut data).unwrap();
        let mut buf = vec![0u8; len];
        prop_assert_eq!(disk.read_blocks(1, lba, Some(&mut buf[..])), Err(BlockIoError::BadBufferSize));
        prop_assert_eq!(disk.write_blocks(1, lba, Some(&buf[..])), Err(BlockIoError::BadBufferSize));
    }

    #[test]
    fn protected_disks_never_change((lba, len) in in_bounds(), fill in any::<u8>()) {
        let original = image();
        let mut data = original.clone();
        {
            let media = Media::new(1, BLOCK_SIZE, LAST_BLOCK).read_only(true);
            let mut disk = VirtualDisk::memory(media, &mut data).unwrap();
            let buf = vec![fill; len];
            prop_assert_eq!(disk.write_blocks(1, lba, Some(&buf[..])), Err(BlockIoError::WriteProtected));
        }
        prop_assert_eq!(data, original);

        let mut disk = VirtualDisk::synthesized(
            Media::new(1, BLOCK_SIZE, LAST_BLOCK),
            Box::new(Filler(fill)),
            0,
        )
        .unwrap();
        let buf = vec![fill; len];
        prop_assert_eq!(disk.write_blocks(1, lba, Some(&buf[..])), Err(BlockIoError::WriteProtected));
    }
}

#[test]
fn memory_disk_scenario() {
    let mut data: Vec<u8> = (0..100 * 512).map(|i| (i / 512) as u8).collect();
    let mut disk = VirtualDisk::memory(Media::new(1, 512, 99), &mut data).unwrap();

    let mut buf = [0u8; 512];
    assert_eq!(disk.read_blocks(1, 50, Some(&mut buf[..])), Ok(()));
    assert!(buf.iter().all(|&b| b == 50));

    let mut two = [0u8; 1024];
    assert_eq!(
        disk.read_blocks(1, 99, Some(&mut two[..])),
        Err(BlockIoError::InvalidParameter)
    );
    assert_eq!(
        disk.read_blocks(2, 50, Some(&mut buf[..])),
        Err(BlockIoError::MediaChanged)
    );
}
