/// Represents the physical location where tensor data is stored.
///
/// The tensor runtime itself only computes on the host; the device is the
/// placement label that distribution strategies use to tell replicas apart
/// and to colocate optimizer state with model variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageDevice {
    /// Main system memory. This is the default device.
    #[default]
    CPU,
    /// Accelerator with the given ordinal.
    GPU(usize),
}
