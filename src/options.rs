//! Boot configuration.
//!
//! One [`BootOptions`] value is built per boot attempt and passed down explicitly.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// Default directory for injected files inside the boot image.
pub const DEFAULT_INJECT_DIR: &str = "\\Windows\\System32";

/// Name the Windows boot manager is stored under.
pub const BOOT_MANAGER: &str = "bootmgfw.efi";

/// Removable-media default boot file for the running architecture.
#[cfg(target_arch = "x86")]
pub const ARCH_BOOT_FILE: &str = "BOOTIA32.EFI";
#[cfg(target_arch = "arm")]
pub const ARCH_BOOT_FILE: &str = "BOOTARM.EFI";
#[cfg(target_arch = "aarch64")]
pub const ARCH_BOOT_FILE: &str = "BOOTAA64.EFI";
#[cfg(not(any(target_arch = "x86", target_arch = "arm", target_arch = "aarch64")))]
pub const ARCH_BOOT_FILE: &str = "BOOTX64.EFI";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootOptions {
    /// Leave graphical video modes visible to the boot application.
    pub gui: bool,
    /// Wait for a keypress before entering the boot application.
    pub pause: bool,
    // The remaining fields are carried for the image patcher that prepares the payload
    // content; nothing in this crate acts on them.
    /// Use the boot configuration database as supplied.
    pub raw_bcd: bool,
    /// Use WIM images as supplied.
    pub raw_wim: bool,
    /// WIM image index to boot (0 selects the image's default).
    pub index: u32,
    pub inject_dir: String,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            gui: false,
            pause: false,
            raw_bcd: false,
            raw_wim: false,
            index: 0,
            inject_dir: DEFAULT_INJECT_DIR.to_string(),
        }
    }
}

impl BootOptions {
    pub fn gui(mut self, gui: bool) -> Self {
        self.gui = gui;
        self
    }

    pub fn pause(mut self, pause: bool) -> Self {
        self.pause = pause;
        self
    }

    pub fn raw_bcd(mut self, raw_bcd: bool) -> Self {
        self.raw_bcd = raw_bcd;
        self
    }

    pub fn raw_wim(mut self, raw_wim: bool) -> Self {
        self.raw_wim = raw_wim;
        self
    }

    pub fn index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    pub fn inject_dir(mut self, dir: &str) -> Self {
        self.inject_dir = dir.to_string();
        self
    }
}

/// A parsed boot command line: switches plus the payload list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BootCommand {
    pub options: BootOptions,
    pub payloads: Vec<PayloadSpec>,
}

impl BootCommand {
    /// Accepts `--gui`, `--rawbcd`, `--rawwim`, `--pause`, `--index=N` and `--inject=PATH`;
    /// every other argument is a payload. Unparsable indices fall back to 0.
    pub fn parse<'a, I: IntoIterator<Item = &'a str>>(args: I) -> Self {
        let mut options = BootOptions::default();
        let mut payloads = Vec::new();
        for arg in args {
            match arg {
                "--gui" => options.gui = true,
                "--rawbcd" => options.raw_bcd = true,
                "--rawwim" => options.raw_wim = true,
                "--pause" => options.pause = true,
                _ => {
                    if let Some(index) = arg.strip_prefix("--index=") {
                        options.index = parse_index(index);
                    } else if let Some(dir) = arg.strip_prefix("--inject=") {
                        options.inject_dir = dir.to_string();
                    } else {
                        payloads.push(arg);
                    }
                }
            }
        }
        Self {
            options,
            payloads: parse_payloads(payloads),
        }
    }

    /// The payload to hand control to: the first one named `bootmgfw.efi` or the
    /// architecture's default boot file, compared case-insensitively.
    pub fn boot_file(&self) -> Option<&PayloadSpec> {
        self.payloads.iter().find(|p| p.is_boot_file())
    }
}

fn parse_index(value: &str) -> u32 {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.unwrap_or(0)
}

/// How a payload file is made available to the boot application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    /// Read from its file on demand.
    Streamed,
    /// Copied into memory before boot.
    Resident,
}

/// One payload file reference: `@:NAME:PATH`, `m:NAME:PATH` or a bare `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSpec {
    /// Name the file appears under on the synthesized disk.
    pub name: String,
    pub path: String,
    pub mode: PayloadMode,
}

impl PayloadSpec {
    pub fn parse(arg: &str) -> Self {
        let (mode, rest) = if let Some(rest) = arg.strip_prefix("@:") {
            (PayloadMode::Streamed, Some(rest))
        } else if let Some(rest) = arg.strip_prefix("m:") {
            (PayloadMode::Resident, Some(rest))
        } else {
            (PayloadMode::Streamed, None)
        };

        let (name, path) = match rest.and_then(|rest| rest.split_once(':')) {
            Some((name, path)) => (name.trim_start_matches('/'), path),
            None => ("", rest.unwrap_or(arg)),
        };
        let name = if name.is_empty() {
            path.rsplit(['/', '\\']).next().unwrap_or(path)
        } else {
            name
        };

        Self {
            name: name.to_string(),
            path: path.to_string(),
            mode,
        }
    }

    pub fn is_boot_file(&self) -> bool {
        self.name.eq_ignore_ascii_case(BOOT_MANAGER)
            || self.name.eq_ignore_ascii_case(ARCH_BOOT_FILE)
    }

    pub fn is_wim(&self) -> bool {
        let name = self.name.as_bytes();
        name.len() > 4 && name[name.len() - 4..].eq_ignore_ascii_case(b".wim")
    }
}

/// Parse every payload argument. The first WIM image is moved to the end of the list so
/// the smaller files are laid out ahead of it.
pub fn parse_payloads<'a, I: IntoIterator<Item = &'a str>>(args: I) -> Vec<PayloadSpec> {
    let mut payloads: Vec<PayloadSpec> = args.into_iter().map(PayloadSpec::parse).collect();
    if let Some(pos) = payloads.iter().position(PayloadSpec::is_wim) {
        let wim = payloads.remove(pos);
        payloads.push(wim);
    }
    payloads
}
