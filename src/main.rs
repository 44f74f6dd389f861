#![no_std]
#![no_main]

extern crate alloc;

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use uefi::prelude::*;
use uefi::proto::loaded_image::LoadedImage;
use uefi::proto::media::block::BlockIO;
use uefi::proto::media::file::{File, FileAttribute, FileInfo, FileMode, FileType};
use uefi::table::boot::{BootServices, LoadImageSource};
use uefi::table::runtime::ResetType;
use uefi::{CStr16, CString16, Identify};

use vdisk_boot::blockio::EfiBlockIo;
use vdisk_boot::log::logger::{log_critical, log_info, log_warn};
use vdisk_boot::vdisk::{Media, VirtualDisk};
use vdisk_boot::options::BOOT_MANAGER;
use vdisk_boot::BootCommand;

const DISK_IMAGE: &CStr16 = cstr16!("vdisk.img");
const SECTOR_SIZE: u32 = 512;
const MEDIA_ID: u32 = 1;

#[entry]
fn efi_main(image: Handle, mut system_table: SystemTable<Boot>) -> Status {
    if uefi_services::init(&mut system_table).is_err() {
        fatal_reset(&system_table, "UEFI service initialization failed");
    }

    log_info("boot", "virtual disk boot loader starting");
    let command = boot_command(system_table.boot_services(), image);
    let options = &command.options;
    log_info("boot", &format!("{:?}", options));

    let disk = match attach_disk(system_table.boot_services(), image) {
        Ok(handle) => handle,
        Err(reason) => fatal_reset(&system_table, reason),
    };

    let Some(payload) = command.boot_file() else {
        fatal_reset(&system_table, "FATAL: bootmgfw.efi not found");
    };
    log_info(
        "boot",
        &format!("boot file {} from {} ({:?})", payload.name, payload.path, payload.mode),
    );
    let boot_file = match volume_path(&payload.path)
        .and_then(|path| read_file(system_table.boot_services(), image, &path))
    {
        Ok(bytes) => bytes,
        Err(reason) => {
            log_critical("boot", "FATAL: no boot application");
            fatal_reset(&system_table, reason);
        }
    };

    if options.pause {
        wait_for_key(&mut system_table);
    }

    let bt = system_table.boot_services();
    let app = match bt.load_image(
        image,
        LoadImageSource::FromBuffer {
            buffer: &boot_file,
            file_path: None,
        },
    ) {
        Ok(app) => app,
        Err(_) => fatal_reset(&system_table, "FATAL: could not load boot application"),
    };

    log_info(
        "boot",
        &format!("starting boot application ({} bytes) with disk {:?}", boot_file.len(), disk),
    );
    if bt.start_image(app).is_err() {
        log_warn("boot", "boot application exited with an error");
    }
    fatal_reset(&system_table, "FATAL: boot application returned")
}

/// Parse the image's load options. Without payload arguments the boot manager is taken
/// from the root of the loader's volume.
fn boot_command(bt: &BootServices, image: Handle) -> BootCommand {
    let args: String = match bt.open_protocol_exclusive::<LoadedImage>(image) {
        Ok(loaded) => match loaded.load_options_as_cstr16() {
            Ok(opts) => opts.to_string(),
            Err(_) => String::new(),
        },
        Err(_) => {
            log_warn("boot", "cannot read load options");
            String::new()
        }
    };

    let mut command = BootCommand::parse(args.split_whitespace());
    if command.payloads.is_empty() {
        command.payloads = vdisk_boot::parse_payloads([BOOT_MANAGER]);
    }
    command
}

fn volume_path(path: &str) -> Result<CString16, &'static str> {
    let path = path.replace('/', "\\");
    CString16::try_from(path.as_str()).map_err(|_| "boot file path is not UCS-2")
}

/// Load the disk image and expose it as a Block I/O device on a new handle.
fn attach_disk(bt: &BootServices, image: Handle) -> Result<Handle, &'static str> {
    let bytes = read_file(bt, image, DISK_IMAGE)?;
    let blocks = bytes.len() as u64 / SECTOR_SIZE as u64;
    if blocks == 0 {
        return Err("disk image is smaller than one sector");
    }

    let media = Media::new(MEDIA_ID, SECTOR_SIZE, blocks - 1);
    let disk = VirtualDisk::memory(media, bytes.leak()).map_err(|_| "invalid disk geometry")?;
    let interface = EfiBlockIo::new(disk).into_interface();

    // SAFETY: the protocol instance is never freed, so it outlives the handle.
    let handle = unsafe {
        bt.install_protocol_interface(None, &BlockIO::GUID, interface)
            .map_err(|_| "cannot install Block I/O protocol")?
    };
    log_info("blockio", &format!("Block I/O installed on {:?}", handle));

    if bt.connect_controller(handle, None, None, true).is_err() {
        log_warn("blockio", "no driver bound to the virtual disk");
    }
    Ok(handle)
}

fn read_file(bt: &BootServices, image: Handle, path: &CStr16) -> Result<Vec<u8>, &'static str> {
    let mut fs = bt
        .get_image_file_system(image)
        .map_err(|_| "missing SimpleFileSystem")?;
    let mut root = fs.open_volume().map_err(|_| "cannot open boot volume")?;
    let handle = root
        .open(path, FileMode::Read, FileAttribute::empty())
        .map_err(|_| "file not found")?;

    let mut file = match handle.into_type().map_err(|_| "cannot open file")? {
        FileType::Regular(f) => f,
        FileType::Dir(_) => return Err("not a regular file"),
    };
    let info = file
        .get_boxed_info::<FileInfo>()
        .map_err(|_| "cannot query file size")?;

    let mut bytes = vec![0u8; info.file_size() as usize];
    let read = file.read(&mut bytes).map_err(|_| "file read failed")?;
    bytes.truncate(read);
    log_info("loader", &format!("read {} ({} bytes)", path, read));
    Ok(bytes)
}

fn wait_for_key(st: &mut SystemTable<Boot>) {
    log_info("boot", "press any key to continue");
    loop {
        if let Ok(Some(_)) = st.stdin().read_key() {
            return;
        }
        st.boot_services().stall(10_000);
    }
}

/// Non-returning hard reset path for failed boots
fn fatal_reset(st: &SystemTable<Boot>, reason: &str) -> ! {
    log_critical("fatal", reason);
    st.runtime_services()
        .reset(ResetType::Shutdown, Status::LOAD_ERROR, Some(reason.as_bytes()))
}
