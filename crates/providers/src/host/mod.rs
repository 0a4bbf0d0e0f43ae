//! Providers that act on a host over SSH.

pub mod file;
pub mod iommu;
pub mod reboot;
pub mod run;

pub use file::{SaveFileInputs, SaveFileOutputs, SaveFileProvider};
pub use iommu::{CpuVendor, IommuInputs, IommuOutputs, IommuProvider, parse_pci_ids};
pub use reboot::{ElapsedOutputs, RebootInputs, RebootProvider, WaitForHostInputs, WaitForHostProvider};
pub use run::{RemoteCommandInputs, RemoteCommandOutputs, RemoteCommandProvider};
