//! Loading firmware through the debug probe's GDB server.
//!
//! The raw image is wrapped into an ELF placed at the flash base address, then
//! loaded and compared by `gdb` in batch mode:
//!
//! ```text
//! image.bin --objcopy--> image.elf @ 0x08000000
//! gdb: target extended-remote <probe> / monitor swdp_scan / attach 1
//!      load / compare-sections / kill
//! ```

use crate::error::{Error, Result};
use crate::fieldbus::{CommandOutput, CommandRunner};
use crate::firmware::FirmwareImage;
use log::{debug, info, trace};
use std::io::Write;
use std::path::Path;

/// Prefix of the cross toolchain binaries.
pub const DEFAULT_TOOLCHAIN_PREFIX: &str = "arm-none-eabi-";

/// Flash base address of the target MCU.
pub const FLASH_BASE_ADDRESS: u32 = 0x0800_0000;

/// Probe monitor command that discovers the target.
pub const DEFAULT_ATTACH_COMMAND: &str = "swdp_scan";

/// Something that writes a firmware image to the unit.
pub trait FirmwareFlasher {
    /// Flash `image` through the debug probe at `port`.
    fn flash(&mut self, image: &FirmwareImage, port: &Path) -> Result<()>;
}

/// Flashes with `objcopy` and `gdb` from a cross toolchain.
#[derive(Debug, Clone)]
pub struct GdbFlasher<R: CommandRunner> {
    runner: R,
    toolchain_prefix: String,
    base_address: u32,
    attach_command: String,
}

impl<R: CommandRunner> GdbFlasher<R> {
    /// Flasher with the default toolchain, base address and attach command.
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            toolchain_prefix: DEFAULT_TOOLCHAIN_PREFIX.to_string(),
            base_address: FLASH_BASE_ADDRESS,
            attach_command: DEFAULT_ATTACH_COMMAND.to_string(),
        }
    }

    /// Set the toolchain prefix.
    #[must_use]
    pub fn with_toolchain_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.toolchain_prefix = prefix.into();
        self
    }

    /// Set the monitor command used to find the target.
    #[must_use]
    pub fn with_attach_command(mut self, command: impl Into<String>) -> Self {
        self.attach_command = command.into();
        self
    }

    /// The command runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn tool(&self, name: &str) -> String {
        format!("{}{name}", self.toolchain_prefix)
    }

    fn run_tool(&mut self, name: &str, args: &[&str]) -> Result<CommandOutput> {
        let program = self.tool(name);
        let out = self
            .runner
            .run(&program, args)
            .map_err(|e| Error::Flash(e.to_string()))?;
        trace!("{program} stdout: {}", out.stdout.trim());
        if !out.success {
            return Err(Error::Flash(format!(
                "{program} failed: {}",
                out.stderr.trim()
            )));
        }
        Ok(out)
    }
}

impl<R: CommandRunner> FirmwareFlasher for GdbFlasher<R> {
    fn flash(&mut self, image: &FirmwareImage, port: &Path) -> Result<()> {
        info!(
            "Flashing {} bytes via {}",
            image.len(),
            port.display()
        );

        let dir = tempfile::tempdir()?;
        let bin = dir.path().join("image.bin");
        let elf = dir.path().join("image.elf");
        std::fs::File::create(&bin)?.write_all(image.bytes())?;

        let bin = bin.to_string_lossy().into_owned();
        let elf = elf.to_string_lossy().into_owned();
        let offset = format!("{:#010x}", self.base_address);
        self.run_tool("objcopy", &[
            "-I",
            "binary",
            "-O",
            "elf32-littlearm",
            "-B",
            "arm",
            "--change-addresses",
            &offset,
            &bin,
            &elf,
        ])?;

        let target = format!("target extended-remote {}", port.display());
        let attach = format!("monitor {}", self.attach_command);
        let out = self.run_tool("gdb", &[
            "--batch",
            "-nx",
            "-ex",
            &target,
            "-ex",
            &attach,
            "-ex",
            "attach 1",
            "-ex",
            "load",
            "-ex",
            "compare-sections",
            "-ex",
            "kill",
            &elf,
        ])?;

        if out.stdout.contains("MIS-MATCHED") {
            return Err(Error::Flash(
                "flash contents differ from the image after load".into(),
            ));
        }
        debug!("Flashing finished");
        Ok(())
    }
}
