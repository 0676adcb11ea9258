//! Resource-manager wire formats

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One page of a list response
#[derive(Debug, Deserialize)]
pub(crate) struct Page<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LockResource {
    pub id: String,
    pub name: String,
    pub properties: LockProperties,
    #[serde(rename = "systemData")]
    pub system_data: Option<SystemData>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LockProperties {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct LockBody {
    pub properties: LockProperties,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SystemData {
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResourceGroupResource {
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenericResource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DiskResource {
    pub properties: DiskProperties,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DiskProperties {
    #[serde(rename = "diskState")]
    pub disk_state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubResource {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NicResource {
    pub properties: NicProperties,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NicProperties {
    #[serde(rename = "virtualMachine")]
    pub virtual_machine: Option<SubResource>,
    #[serde(rename = "privateEndpoint")]
    pub private_endpoint: Option<SubResource>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublicIpResource {
    pub properties: PublicIpProperties,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublicIpProperties {
    #[serde(rename = "ipConfiguration")]
    pub ip_configuration: Option<SubResource>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InstanceView {
    #[serde(default)]
    pub statuses: Vec<InstanceViewStatus>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InstanceViewStatus {
    pub code: String,
    pub time: Option<DateTime<Utc>>,
}
