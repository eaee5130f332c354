//! Compute, storage, and cloud-service operations on a subscription.
//!
//! [`ResourceOperations`] is the capability set a session exposes. The
//! provider-side implementation lives outside this crate; the crate supplies
//! [`super::RetryingSession`], which adds the refresh-and-retry protocol to any
//! implementation.

use async_trait::async_trait;

use crate::auth::SecureString;
use crate::error::ManagementError;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CloudService {
    pub name: String,
    pub label: String,
    pub description: String,
    /// Either `location` or `affinity_group` is set.
    pub location: String,
    pub affinity_group: String,
    pub production_deployment: Option<String>,
    pub staging_deployment: Option<String>,
    pub subscription_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VirtualMachineStatus {
    Ready,
    Stopped,
    StoppedDeallocated,
    Starting,
    Restarting,
    Deleting,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub name: String,
    pub protocol: String,
    pub private_port: u16,
    pub public_port: u16,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VirtualMachine {
    pub name: String,
    pub service_name: String,
    pub deployment_name: String,
    pub availability_set: String,
    pub subnet: String,
    pub size: String,
    pub status: VirtualMachineStatus,
    pub endpoints: Vec<Endpoint>,
    pub subscription_id: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StorageAccount {
    pub name: String,
    /// Replication type, e.g. `Standard_LRS`.
    pub account_type: String,
    pub description: String,
    pub label: String,
    pub status: String,
    pub location: String,
    pub affinity_group: String,
    pub primary_key: Option<SecureString>,
    pub blob_endpoint: String,
    pub subscription_id: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VirtualMachineImage {
    pub name: String,
    /// `OS` or `VM` image.
    pub image_type: String,
    pub category: String,
    pub publisher_name: String,
    pub published_date: Option<chrono::DateTime<chrono::Utc>>,
    pub label: String,
    pub description: String,
    pub operating_system_type: String,
    pub location: String,
    pub recommended_vm_size: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VirtualMachineSize {
    pub name: String,
    pub label: String,
    pub cores: u32,
    pub memory_mb: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Location {
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AffinityGroup {
    pub name: String,
    pub label: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VirtualNetwork {
    pub name: String,
    pub id: String,
    pub affinity_group: String,
    pub location: String,
    pub subnets: Vec<String>,
}

/// Where a new virtual machine's OS disk is stored.
#[derive(Debug, Clone, PartialEq)]
pub enum VmMediaTarget {
    /// A container in this storage account.
    StorageAccount(StorageAccount),
    /// An explicit blob URL.
    MediaLocation(String),
}

/// Settings for a new virtual machine.
#[derive(Debug, Clone)]
pub struct NewVirtualMachine {
    pub machine: VirtualMachine,
    pub image: VirtualMachineImage,
    pub media: VmMediaTarget,
    pub virtual_network: String,
    pub username: String,
    pub password: SecureString,
    /// X.509 certificate for SSH access, possibly empty.
    pub certificate: Vec<u8>,
}

#[async_trait]
pub trait ResourceOperations: Send + Sync {
    async fn list_cloud_services(&self, subscription_id: &str) -> Result<Vec<CloudService>, ManagementError>;

    async fn list_virtual_machines(&self, subscription_id: &str) -> Result<Vec<VirtualMachine>, ManagementError>;

    async fn refresh_virtual_machine(&self, vm: &VirtualMachine) -> Result<VirtualMachine, ManagementError>;

    async fn start_virtual_machine(&self, vm: &VirtualMachine) -> Result<(), ManagementError>;

    async fn shutdown_virtual_machine(&self, vm: &VirtualMachine, deallocate: bool) -> Result<(), ManagementError>;

    async fn restart_virtual_machine(&self, vm: &VirtualMachine) -> Result<(), ManagementError>;

    async fn delete_virtual_machine(&self, vm: &VirtualMachine, delete_from_storage: bool) -> Result<(), ManagementError>;

    /// Remote desktop connection file for `vm`.
    async fn download_rdp(&self, vm: &VirtualMachine) -> Result<Vec<u8>, ManagementError>;

    async fn list_storage_accounts(&self, subscription_id: &str) -> Result<Vec<StorageAccount>, ManagementError>;

    async fn list_virtual_machine_images(&self, subscription_id: &str) -> Result<Vec<VirtualMachineImage>, ManagementError>;

    async fn list_virtual_machine_sizes(&self, subscription_id: &str) -> Result<Vec<VirtualMachineSize>, ManagementError>;

    async fn list_locations(&self, subscription_id: &str) -> Result<Vec<Location>, ManagementError>;

    async fn list_affinity_groups(&self, subscription_id: &str) -> Result<Vec<AffinityGroup>, ManagementError>;

    async fn list_virtual_networks(&self, subscription_id: &str) -> Result<Vec<VirtualNetwork>, ManagementError>;

    async fn create_storage_account(&self, account: &StorageAccount) -> Result<(), ManagementError>;

    async fn create_cloud_service(&self, service: &CloudService) -> Result<(), ManagementError>;

    async fn create_virtual_machine(&self, request: &NewVirtualMachine) -> Result<(), ManagementError>;

    async fn refresh_storage_account(&self, account: &StorageAccount) -> Result<StorageAccount, ManagementError>;

    /// Upload a PFX certificate to a cloud service; returns its thumbprint.
    async fn create_service_certificate(
        &self,
        subscription_id: &str,
        service_name: &str,
        data: &[u8],
        password: &SecureString,
    ) -> Result<String, ManagementError>;

    async fn delete_storage_account(&self, account: &StorageAccount) -> Result<(), ManagementError>;
}
