//! [`ResourceOperations`] decorator applying the refresh-and-retry protocol.

use std::sync::Arc;

use async_trait::async_trait;

use super::operations::{
    AffinityGroup, CloudService, Location, NewVirtualMachine, ResourceOperations, StorageAccount,
    VirtualMachine, VirtualMachineImage, VirtualMachineSize, VirtualNetwork,
};
use super::refresher::TokenRefresher;
use crate::auth::SecureString;
use crate::error::ManagementError;

/// Forwards every call to `inner`; a call failing with HTTP 401 refreshes the
/// token of the call's subscription and is replayed once.
pub struct RetryingSession<T> {
    inner: T,
    refresher: Arc<TokenRefresher>,
}

impl<T: ResourceOperations> RetryingSession<T> {
    pub fn new(inner: T, refresher: Arc<TokenRefresher>) -> Self {
        Self { inner, refresher }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: ResourceOperations> ResourceOperations for RetryingSession<T> {
    async fn list_cloud_services(&self, subscription_id: &str) -> Result<Vec<CloudService>, ManagementError> {
        self.refresher
            .run_with_retry(Some(subscription_id), || self.inner.list_cloud_services(subscription_id))
            .await
    }

    async fn list_virtual_machines(&self, subscription_id: &str) -> Result<Vec<VirtualMachine>, ManagementError> {
        self.refresher
            .run_with_retry(Some(subscription_id), || self.inner.list_virtual_machines(subscription_id))
            .await
    }

    async fn refresh_virtual_machine(&self, vm: &VirtualMachine) -> Result<VirtualMachine, ManagementError> {
        self.refresher
            .run_with_retry(Some(vm.subscription_id.as_str()), || self.inner.refresh_virtual_machine(vm))
            .await
    }

    async fn start_virtual_machine(&self, vm: &VirtualMachine) -> Result<(), ManagementError> {
        self.refresher
            .run_with_retry(Some(vm.subscription_id.as_str()), || self.inner.start_virtual_machine(vm))
            .await
    }

    async fn shutdown_virtual_machine(&self, vm: &VirtualMachine, deallocate: bool) -> Result<(), ManagementError> {
        self.refresher
            .run_with_retry(Some(vm.subscription_id.as_str()), || {
                self.inner.shutdown_virtual_machine(vm, deallocate)
            })
            .await
    }

    async fn restart_virtual_machine(&self, vm: &VirtualMachine) -> Result<(), ManagementError> {
        self.refresher
            .run_with_retry(Some(vm.subscription_id.as_str()), || self.inner.restart_virtual_machine(vm))
            .await
    }

    async fn delete_virtual_machine(&self, vm: &VirtualMachine, delete_from_storage: bool) -> Result<(), ManagementError> {
        self.refresher
            .run_with_retry(Some(vm.subscription_id.as_str()), || {
                self.inner.delete_virtual_machine(vm, delete_from_storage)
            })
            .await
    }

    async fn download_rdp(&self, vm: &VirtualMachine) -> Result<Vec<u8>, ManagementError> {
        self.refresher
            .run_with_retry(Some(vm.subscription_id.as_str()), || self.inner.download_rdp(vm))
            .await
    }

    async fn list_storage_accounts(&self, subscription_id: &str) -> Result<Vec<StorageAccount>, ManagementError> {
        self.refresher
            .run_with_retry(Some(subscription_id), || self.inner.list_storage_accounts(subscription_id))
            .await
    }

    async fn list_virtual_machine_images(&self, subscription_id: &str) -> Result<Vec<VirtualMachineImage>, ManagementError> {
        self.refresher
            .run_with_retry(Some(subscription_id), || {
                self.inner.list_virtual_machine_images(subscription_id)
            })
            .await
    }

    async fn list_virtual_machine_sizes(&self, subscription_id: &str) -> Result<Vec<VirtualMachineSize>, ManagementError> {
        self.refresher
            .run_with_retry(Some(subscription_id), || {
                self.inner.list_virtual_machine_sizes(subscription_id)
            })
            .await
    }

    async fn list_locations(&self, subscription_id: &str) -> Result<Vec<Location>, ManagementError> {
        self.refresher
            .run_with_retry(Some(subscription_id), || self.inner.list_locations(subscription_id))
            .await
    }

    async fn list_affinity_groups(&self, subscription_id: &str) -> Result<Vec<AffinityGroup>, ManagementError> {
        self.refresher
            .run_with_retry(Some(subscription_id), || self.inner.list_affinity_groups(subscription_id))
            .await
    }

    async fn list_virtual_networks(&self, subscription_id: &str) -> Result<Vec<VirtualNetwork>, ManagementError> {
        self.refresher
            .run_with_retry(Some(subscription_id), || self.inner.list_virtual_networks(subscription_id))
            .await
    }

    async fn create_storage_account(&self, account: &StorageAccount) -> Result<(), ManagementError> {
        self.refresher
            .run_with_retry(Some(account.subscription_id.as_str()), || {
                self.inner.create_storage_account(account)
            })
            .await
    }

    async fn create_cloud_service(&self, service: &CloudService) -> Result<(), ManagementError> {
        self.refresher
            .run_with_retry(Some(service.subscription_id.as_str()), || {
                self.inner.create_cloud_service(service)
            })
            .await
    }

    async fn create_virtual_machine(&self, request: &NewVirtualMachine) -> Result<(), ManagementError> {
        self.refresher
            .run_with_retry(Some(request.machine.subscription_id.as_str()), || {
                self.inner.create_virtual_machine(request)
            })
            .await
    }

    async fn refresh_storage_account(&self, account: &StorageAccount) -> Result<StorageAccount, ManagementError> {
        self.refresher
            .run_with_retry(Some(account.subscription_id.as_str()), || {
                self.inner.refresh_storage_account(account)
            })
            .await
    }

    async fn create_service_certificate(
        &self,
        subscription_id: &str,
        service_name: &str,
        data: &[u8],
        password: &SecureString,
    ) -> Result<String, ManagementError> {
        self.refresher
            .run_with_retry(Some(subscription_id), || {
                self.inner
                    .create_service_certificate(subscription_id, service_name, data, password)
            })
            .await
    }

    async fn delete_storage_account(&self, account: &StorageAccount) -> Result<(), ManagementError> {
        self.refresher
            .run_with_retry(Some(account.subscription_id.as_str()), || {
                self.inner.delete_storage_account(account)
            })
            .await
    }
}
