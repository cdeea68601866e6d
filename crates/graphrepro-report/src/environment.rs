//! Best-effort description of the machine a repro was captured on.

use std::env;

/// Host and device facts recorded in a script header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub arch: &'static str,
    pub os: &'static str,
    /// Logical cores available to the process (at least 1).
    pub cores: usize,
    pub hostname: Option<String>,
    /// Value of `CUDA_VISIBLE_DEVICES`, if set.
    pub cuda_visible_devices: Option<String>,
}

impl DeviceInfo {
    /// Reads the current process environment. Fields that cannot be read are left empty.
    pub fn detect() -> Self {
        Self {
            arch: env::consts::ARCH,
            os: env::consts::OS,
            cores: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok()),
            cuda_visible_devices: env::var("CUDA_VISIBLE_DEVICES").ok(),
        }
    }

    /// Comment lines for the script header, without the leading `#`.
    pub fn comment_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(host) = &self.hostname {
            lines.push(format!("host: {host}"));
        }
        let mut device = format!("device info: os={} arch={} cores={}", self.os, self.arch, self.cores);
        if let Some(visible) = &self.cuda_visible_devices {
            device.push_str(&format!(" cuda_visible_devices={visible}"));
        }
        lines.push(device);
        lines
    }
}
