//! Resource-manager REST client

use async_trait::async_trait;
use lockwarden_api::{
    DiskState, LockLevel, LockSpec, ManagementLock, NicAssociation, PowerState,
    PublicIpAssociation, ResourceGroup, Scope, ScopeLevel, StorageEmptiness, TaggedResource,
    VmInstanceView,
};
use lockwarden_cloud_api::{CloudClient, CloudError, CloudResult, DeleteOutcome, ResourceProbe};
use lockwarden_config::GovernanceConfig;
use reqwest::{Method, Response, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{
    DiskResource, ErrorBody, GenericResource, InstanceView, LockBody, LockProperties,
    LockResource, NicResource, Page, PublicIpResource, ResourceGroupResource,
};
use crate::{ClientCredentials, TokenProvider};

const LOCKS_API: &str = "2016-09-01";
const RESOURCES_API: &str = "2021-04-01";
const DISKS_API: &str = "2023-04-02";
const NETWORK_API: &str = "2023-09-01";
const COMPUTE_API: &str = "2023-09-01";
const STORAGE_API: &str = "2023-01-01";

const LOCKS_SEGMENT: &str = "/providers/Microsoft.Authorization/locks";

/// Connection settings for one subscription
#[derive(Debug, Clone)]
pub struct ArmSettings {
    pub subscription_id: String,
    pub credentials: Option<ClientCredentials>,
    pub management_endpoint: String,
    pub login_endpoint: String,
    pub request_timeout: Duration,
}

impl ArmSettings {
    pub fn from_config(config: &GovernanceConfig) -> Self {
        let azure = &config.azure;
        let credentials = match (&azure.tenant_id, &azure.client_id, &azure.client_secret) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Some(ClientCredentials {
                tenant_id: tenant_id.clone(),
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            _ => None,
        };

        Self {
            subscription_id: azure.subscription_id.clone(),
            credentials,
            management_endpoint: azure.management_endpoint.clone(),
            login_endpoint: azure.login_endpoint.clone(),
            request_timeout: config.limits.call_timeout,
        }
    }
}

/// `CloudClient` over the resource-manager REST API
pub struct ArmClient {
    http: reqwest::Client,
    tokens: TokenProvider,
    subscription_id: String,
    management_endpoint: String,
}

impl ArmClient {
    pub fn new(settings: ArmSettings) -> CloudResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| CloudError::Transport(format!("building HTTP client: {}", e)))?;

        let tokens = TokenProvider::new(
            http.clone(),
            settings.credentials,
            &settings.login_endpoint,
            &settings.management_endpoint,
        );

        Ok(Self {
            http,
            tokens,
            subscription_id: settings.subscription_id,
            management_endpoint: settings.management_endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.management_endpoint, path, api_version
        )
    }

    /// Lock names are free text, so the name goes in as one encoded segment
    fn locks_url(&self, scope: &Scope, name: Option<&str>) -> CloudResult<String> {
        let base = self.url(&format!("{}{}", scope.path(), LOCKS_SEGMENT), LOCKS_API);
        let mut url = Url::parse(&base)
            .map_err(|e| CloudError::Transport(format!("invalid locks URL '{}': {}", base, e)))?;
        if let Some(name) = name {
            url.path_segments_mut()
                .map_err(|_| CloudError::Transport(format!("locks URL '{}' has no path", base)))?
                .push(name);
        }
        Ok(url.into())
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> CloudResult<Response> {
        let token = self.tokens.token().await?;
        let mut request = self.http.request(method.clone(), url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(method = %method, url = %url, "Resource manager call");
        request
            .send()
            .await
            .map_err(|e| CloudError::Transport(e.to_string()))
    }

    /// GET a single object; 404 is `None`
    async fn get_optional<T: DeserializeOwned>(&self, url: &str) -> CloudResult<Option<T>> {
        let response = self.send::<()>(Method::GET, url, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        decode(response).await.map(Some)
    }

    /// GET every page of a list, following `nextLink`
    async fn list_all<T: DeserializeOwned>(&self, url: String) -> CloudResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let response = self.send::<()>(Method::GET, &url, None).await?;
            if !response.status().is_success() {
                return Err(error_for(response).await);
            }
            let page: Page<T> = decode(response).await?;
            items.extend(page.value);
            next = page.next_link.filter(|link| !link.is_empty());
        }
        Ok(items)
    }

    /// Resource manager answers 204 when the target of a delete is already gone
    async fn delete(&self, url: &str) -> CloudResult<DeleteOutcome> {
        let response = self.send::<()>(Method::DELETE, url, None).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(DeleteOutcome::NotFound),
            status if status.is_success() => Ok(DeleteOutcome::Deleted),
            _ => Err(error_for(response).await),
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> CloudResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| CloudError::Malformed(e.to_string()))
}

async fn error_for(response: Response) -> CloudError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.error)
        .map(|e| format!("{}: {}", e.code, e.message))
        .unwrap_or(body);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CloudError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => CloudError::Throttled { retry_after },
        _ => CloudError::Remote {
            status: status.as_u16(),
            message,
        },
    }
}

fn parse_level(level: &str) -> Option<LockLevel> {
    match level {
        "ReadOnly" => Some(LockLevel::ReadOnly),
        "CanNotDelete" => Some(LockLevel::CanNotDelete),
        _ => None,
    }
}

/// The scope a lock applies to: its id without the locks suffix
fn lock_scope(id: &str) -> String {
    let lower = id.to_ascii_lowercase();
    match lower.rfind(&LOCKS_SEGMENT.to_ascii_lowercase()) {
        Some(at) => id[..at].to_string(),
        None => id.to_string(),
    }
}

fn to_lock(resource: LockResource) -> Option<ManagementLock> {
    let Some(level) = parse_level(&resource.properties.level) else {
        warn!(lock = %resource.id, level = %resource.properties.level, "Skipping lock with unknown level");
        return None;
    };
    Some(ManagementLock {
        scope: lock_scope(&resource.id),
        name: resource.name,
        level,
        notes: resource.properties.notes,
        created_at: resource.system_data.and_then(|d| d.created_at),
    })
}

/// api-version used to delete each resource type this service may remove
fn delete_api_version(resource_type: &str) -> Option<&'static str> {
    match resource_type.to_ascii_lowercase().as_str() {
        "microsoft.compute/disks" => Some(DISKS_API),
        "microsoft.network/networkinterfaces" => Some(NETWORK_API),
        "microsoft.network/publicipaddresses" => Some(NETWORK_API),
        "microsoft.compute/virtualmachines" => Some(COMPUTE_API),
        "microsoft.storage/storageaccounts" => Some(STORAGE_API),
        _ => None,
    }
}

#[async_trait]
impl ResourceProbe for ArmClient {
    async fn disk_state(&self, disk: &Scope) -> CloudResult<Option<DiskState>> {
        let url = self.url(&disk.path(), DISKS_API);
        let disk: Option<DiskResource> = self.get_optional(&url).await?;
        Ok(disk.and_then(|d| d.properties.disk_state.map(|s| DiskState::from_provider(&s))))
    }

    async fn nic_association(&self, nic: &Scope) -> CloudResult<Option<NicAssociation>> {
        let url = self.url(&nic.path(), NETWORK_API);
        let nic: Option<NicResource> = self.get_optional(&url).await?;
        Ok(nic.map(|n| NicAssociation {
            virtual_machine: n.properties.virtual_machine.map(|r| r.id),
            private_endpoint: n.properties.private_endpoint.map(|r| r.id),
        }))
    }

    async fn public_ip_association(
        &self,
        ip: &Scope,
    ) -> CloudResult<Option<PublicIpAssociation>> {
        let url = self.url(&ip.path(), NETWORK_API);
        let ip: Option<PublicIpResource> = self.get_optional(&url).await?;
        Ok(ip.map(|ip| PublicIpAssociation {
            ip_configuration: ip.properties.ip_configuration.map(|r| r.id),
        }))
    }

    async fn vm_instance_view(&self, vm: &Scope) -> CloudResult<Option<VmInstanceView>> {
        let url = self.url(&format!("{}/instanceView", vm.path()), COMPUTE_API);
        let Some(view) = self.get_optional::<InstanceView>(&url).await? else {
            return Ok(None);
        };

        let Some(power) = view
            .statuses
            .iter()
            .find(|s| s.code.starts_with("PowerState/"))
        else {
            return Ok(None);
        };

        // The power status rarely carries a time; the last provisioning
        // status marks when the deallocation finished
        let since = power.time.or_else(|| {
            view.statuses
                .iter()
                .filter(|s| s.code.starts_with("ProvisioningState/"))
                .find_map(|s| s.time)
        });

        Ok(Some(VmInstanceView {
            power_state: PowerState::from_code(&power.code),
            since,
        }))
    }

    async fn storage_emptiness(&self, account: &Scope) -> CloudResult<Option<StorageEmptiness>> {
        let url = self.url(
            &format!("{}/blobServices/default/containers", account.path()),
            STORAGE_API,
        );
        let response = self.send::<()>(Method::GET, &url, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }

        let page: Page<serde_json::Value> = decode(response).await?;
        let more = page.next_link.is_some_and(|link| !link.is_empty());
        Ok(Some(if page.value.is_empty() && !more {
            StorageEmptiness::Empty
        } else {
            StorageEmptiness::NonEmpty {
                containers: page.value.len(),
            }
        }))
    }
}

#[async_trait]
impl CloudClient for ArmClient {
    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    async fn list_locks(&self, scope: &Scope) -> CloudResult<Vec<ManagementLock>> {
        let resources: Vec<LockResource> = self.list_all(self.locks_url(scope, None)?).await?;
        Ok(resources.into_iter().filter_map(to_lock).collect())
    }

    async fn upsert_lock(&self, scope: &Scope, lock: &LockSpec) -> CloudResult<ManagementLock> {
        let url = self.locks_url(scope, Some(&lock.name))?;
        let body = LockBody {
            properties: LockProperties {
                level: lock.level.as_str().to_string(),
                notes: lock.notes.clone(),
            },
        };

        let response = self.send(Method::PUT, &url, Some(&body)).await?;
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        let created: LockResource = decode(response).await?;
        to_lock(created)
            .ok_or_else(|| CloudError::Malformed("lock returned with unknown level".into()))
    }

    async fn delete_lock(&self, scope: &Scope, name: &str) -> CloudResult<DeleteOutcome> {
        self.delete(&self.locks_url(scope, Some(name))?).await
    }

    async fn list_resource_groups(&self) -> CloudResult<Vec<ResourceGroup>> {
        let path = format!("/subscriptions/{}/resourcegroups", self.subscription_id);
        let groups: Vec<ResourceGroupResource> =
            self.list_all(self.url(&path, RESOURCES_API)).await?;
        Ok(groups
            .into_iter()
            .map(|g| ResourceGroup {
                name: g.name.into(),
                location: g.location,
                tags: g.tags.unwrap_or_default(),
            })
            .collect())
    }

    async fn list_resources(&self, scope: Option<&Scope>) -> CloudResult<Vec<TaggedResource>> {
        let subscription = Scope::subscription(&self.subscription_id);
        let (base, filter) = match scope {
            None => (subscription, None),
            Some(s) if s.level() == ScopeLevel::Subscription => (s.clone(), None),
            Some(s) if s.level() == ScopeLevel::ResourceGroup => (s.clone(), None),
            Some(s) => (
                s.group_scope().unwrap_or(subscription),
                Some(s.path().to_ascii_lowercase()),
            ),
        };

        let url = self.url(&format!("{}/resources", base.path()), RESOURCES_API);
        let resources: Vec<GenericResource> = self.list_all(url).await?;
        Ok(resources
            .into_iter()
            .filter(|r| {
                filter
                    .as_deref()
                    .is_none_or(|prefix| r.id.to_ascii_lowercase().starts_with(prefix))
            })
            .map(|r| TaggedResource {
                id: r.id,
                name: r.name,
                resource_type: r.resource_type,
                location: r.location,
                tags: r.tags.unwrap_or_default(),
            })
            .collect())
    }

    async fn delete_resource(&self, resource: &Scope) -> CloudResult<DeleteOutcome> {
        let resource_type = resource.full_resource_type().unwrap_or_default();
        let Some(api_version) = delete_api_version(&resource_type) else {
            return Err(CloudError::Unsupported(format!(
                "deleting resources of type '{}'",
                resource_type
            )));
        };
        self.delete(&self.url(&resource.path(), api_version)).await
    }

    fn is_healthy(&self) -> bool {
        self.tokens.has_credentials()
    }
}
