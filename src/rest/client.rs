//! Service Management REST client.
//!
//! Every operation resolves a credential for the active authentication mode,
//! sends through the [`ManagementTransport`], decodes XML with `roxmltree` or
//! JSON with `serde`, and wraps any failure in a [`ManagementError`] naming
//! the operation. In Active Directory mode calls go through the shared
//! [`TokenRefresher`], so a 401 is answered with one refresh and one replay.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Method;
use roxmltree::{Document, Node};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use urlencoding::encode;
use uuid::Uuid;

use super::models::{
    ColumnData, CustomApi, CustomApiData, CustomApiPermissions, Job, JobData, JobSchedule, LogData,
    LogEntry, MobileService, MobileServiceData, RegionData, Script, ScriptData, ServiceRuntime,
    SqlDb, SqlServer, Table, TableData, TablePermissions,
};
use super::template::{NewService, ServiceTemplate, APPLICATION_SUFFIX};
use super::transport::{
    BodyFormat, Credential, ManagementRequest, ManagementResponse, ManagementTransport,
    REQUEST_ID_HEADER,
};
use crate::auth::{AuthenticationMode, CredentialStore, SecureString};
use crate::config::{Config, PollingConfig};
use crate::error::{ApiError, ManagementError};
use crate::session::TokenRefresher;
use crate::settings::KEY_SUBSCRIPTION_FILE;
use crate::subscriptions::publish_settings::certificate_for;
use crate::subscriptions::SubscriptionSource;

const MOBILE_SERVICES: &str = "services/mobileservices/mobileservices";

const SUBSCRIPTION_LIST_ERROR: &str = "Error getting subscription list";
const SERVICE_LIST_ERROR: &str = "Error getting service list";
const REGION_LIST_ERROR: &str = "Error getting region list";
const SERVER_LIST_ERROR: &str = "Error getting server list";
const DATABASE_LIST_ERROR: &str = "Error getting database list";
const CREATE_SERVICE_ERROR: &str = "Error creating service";
const TABLE_LIST_ERROR: &str = "Error getting table list";
const CREATE_TABLE_ERROR: &str = "Error creating table";
const UPDATE_TABLE_ERROR: &str = "Error updating table";
const TABLE_DATA_ERROR: &str = "Error getting table data";
const DOWNLOAD_SCRIPT_ERROR: &str = "Error downloading script";
const UPLOAD_SCRIPT_ERROR: &str = "Error uploading script";
const API_LIST_ERROR: &str = "Error getting API list";
const CREATE_API_ERROR: &str = "Error creating API";
const UPDATE_API_ERROR: &str = "Error updating API";
const JOB_LIST_ERROR: &str = "Error getting job list";
const CREATE_JOB_ERROR: &str = "Error creating job";
const UPDATE_JOB_ERROR: &str = "Error updating job";
const LOG_ERROR: &str = "Error getting log";

/// A request before a credential is attached.
#[derive(Debug, Clone)]
struct Call {
    method: Method,
    path: String,
    format: BodyFormat,
    body: Option<String>,
}

impl Call {
    fn new(method: Method, path: String, format: BodyFormat) -> Self {
        Self {
            method,
            path,
            format,
            body: None,
        }
    }

    fn get(path: String, format: BodyFormat) -> Self {
        Self::new(Method::GET, path, format)
    }

    fn json(method: Method, path: String, body: &Value) -> Self {
        Self {
            body: Some(body.to_string()),
            ..Self::new(method, path, BodyFormat::Json)
        }
    }

    fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }
}

/// `/<subscription>/services/mobileservices/mobileservices/<service><rest>`
fn service_path(subscription_id: Uuid, service: &str, rest: &str) -> String {
    format!(
        "/{}/{}/{}{}",
        subscription_id,
        MOBILE_SERVICES,
        encode(service),
        rest
    )
}

/// Split a table script name `<table>.<operation>`.
fn table_script_parts(script_name: &str) -> Result<(&str, &str), ApiError> {
    let mut parts = script_name.split('.');
    match (parts.next(), parts.next()) {
        (Some(table), Some(operation)) if !table.is_empty() && !operation.is_empty() => {
            Ok((table, operation))
        }
        _ => Err(ApiError::Parse(format!(
            "Script name '{}' is not <table>.<operation>",
            script_name
        ))),
    }
}

/// Resource part of an API or job script name, dropping any extension.
fn script_resource(script_name: &str) -> &str {
    script_name.split('.').next().unwrap_or(script_name)
}

fn child_text(node: Node, name: &str) -> String {
    node.children()
        .find(|child| child.has_tag_name(name))
        .and_then(|child| child.text())
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn parse_sql_servers(xml: &str) -> Result<Vec<SqlServer>, ApiError> {
    let doc = Document::parse(xml)?;
    Ok(doc
        .descendants()
        .filter(|node| node.has_tag_name("Server"))
        .map(|node| SqlServer {
            admin: child_text(node, "AdministratorLogin"),
            name: child_text(node, "Name"),
            region: child_text(node, "Location"),
        })
        .collect())
}

fn parse_sql_databases(xml: &str, server: &SqlServer) -> Result<Vec<SqlDb>, ApiError> {
    let doc = Document::parse(xml)?;
    Ok(doc
        .descendants()
        .filter(|node| node.has_tag_name("ServiceResource"))
        .map(|node| SqlDb {
            name: child_text(node, "Name"),
            edition: child_text(node, "Edition"),
            server: server.clone(),
        })
        .collect())
}

/// State of an asynchronous management operation.
#[derive(Debug, PartialEq)]
enum OperationStatus {
    InProgress,
    Succeeded,
    Failed(String),
}

fn parse_operation_status(xml: &str) -> Result<OperationStatus, ApiError> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    match child_text(root, "Status").as_str() {
        "Succeeded" => Ok(OperationStatus::Succeeded),
        "Failed" => {
            let message = root
                .children()
                .find(|child| child.has_tag_name("Error"))
                .map(|error| child_text(error, "Message"))
                .unwrap_or_default();
            Ok(OperationStatus::Failed(message))
        }
        _ => Ok(OperationStatus::InProgress),
    }
}

/// `None` when the application is healthy, otherwise the server-reported
/// failure message (possibly empty).
///
/// `FailureCode` holds an escaped XML document whose `Message` is the reason.
fn provisioning_failure(xml: &str) -> Result<Option<String>, ApiError> {
    let doc = Document::parse(xml)?;
    let state = doc
        .descendants()
        .find(|node| {
            node.has_tag_name("State")
                && node
                    .parent_element()
                    .is_some_and(|parent| parent.has_tag_name("Application"))
        })
        .and_then(|node| node.text())
        .map(str::trim);

    if state == Some("Healthy") {
        return Ok(None);
    }

    let failure = doc
        .descendants()
        .find(|node| node.has_tag_name("FailureCode"))
        .and_then(|node| node.text())
        .unwrap_or_default()
        .trim();

    let message = match Document::parse(failure) {
        Ok(inner) => inner
            .descendants()
            .find(|node| node.has_tag_name("Message"))
            .and_then(|node| node.text())
            .unwrap_or_default()
            .trim()
            .to_string(),
        Err(_) => failure.to_string(),
    };
    Ok(Some(message))
}

fn job_interval_fields(body: &mut Value, schedule: &JobSchedule) {
    if let JobSchedule::Every {
        period,
        unit,
        start_time,
    } = schedule
    {
        body["intervalUnit"] = json!(unit);
        body["intervalPeriod"] = json!(period);
        body["startTime"] = json!(start_time.to_rfc3339_opts(SecondsFormat::Millis, true));
    }
}

pub struct ManagementRestClient {
    credentials: Arc<CredentialStore>,
    transport: Arc<dyn ManagementTransport>,
    refresher: Option<Arc<TokenRefresher>>,
    polling: PollingConfig,
    management_base_url: String,
}

impl ManagementRestClient {
    pub fn new(
        config: &Config,
        credentials: Arc<CredentialStore>,
        transport: Arc<dyn ManagementTransport>,
    ) -> Self {
        Self {
            credentials,
            transport,
            refresher: None,
            polling: config.polling.clone(),
            management_base_url: config.api.management_base_url.clone(),
        }
    }

    /// Route Active Directory calls through `refresher`.
    pub fn with_refresher(mut self, refresher: Arc<TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    fn credential(&self, subscription_id: Option<Uuid>) -> Result<Credential, ApiError> {
        match self.credentials.mode() {
            AuthenticationMode::ActiveDirectory => {
                let key = subscription_id.map(|id| id.to_string());
                self.credentials
                    .effective_token(key.as_deref())
                    .map(|token| Credential::Bearer(SecureString::new(token.authorization_header())))
                    .ok_or_else(|| {
                        ApiError::NotConfigured("No Active Directory token, sign in first".into())
                    })
            }
            AuthenticationMode::SubscriptionSettings => {
                let id = subscription_id.ok_or_else(|| {
                    ApiError::NotConfigured(
                        "Certificate authentication needs a subscription".into(),
                    )
                })?;
                let blob = self
                    .credentials
                    .settings()
                    .get_property_or(KEY_SUBSCRIPTION_FILE, "");
                if blob.trim().is_empty() {
                    return Err(ApiError::NotConfigured(
                        "No subscription file imported".into(),
                    ));
                }
                let certificate = certificate_for(&blob, &id.to_string())?.ok_or_else(|| {
                    ApiError::NotConfigured(format!(
                        "No management certificate for subscription {}",
                        id
                    ))
                })?;
                Credential::from_management_certificate(certificate.as_str())
            }
            AuthenticationMode::Unknown => Err(ApiError::NotConfigured(
                "No authentication mode selected".into(),
            )),
        }
    }

    /// Send `call` once, waiting for an accepted asynchronous operation to finish.
    async fn send_once(
        &self,
        subscription_id: Option<Uuid>,
        call: &Call,
    ) -> Result<ManagementResponse, ApiError> {
        let credential = self.credential(subscription_id)?;
        let request = ManagementRequest {
            method: call.method.clone(),
            path: call.path.clone(),
            format: call.format,
            body: call.body.clone(),
            credential: credential.clone(),
        };

        let response = self.transport.send(request).await?.error_for_status()?;

        if let (202, Some(id), Some(request_id)) = (
            response.status,
            subscription_id,
            response.header(REQUEST_ID_HEADER),
        ) {
            self.wait_for_operation(id, request_id, &credential).await?;
        }
        Ok(response)
    }

    async fn wait_for_operation(
        &self,
        subscription_id: Uuid,
        request_id: &str,
        credential: &Credential,
    ) -> Result<(), ApiError> {
        let path = format!("/{}/operations/{}", subscription_id, encode(request_id));

        for attempt in 1..=self.polling.max_attempts {
            let request = ManagementRequest {
                method: Method::GET,
                path: path.clone(),
                format: BodyFormat::Xml,
                body: None,
                credential: credential.clone(),
            };
            let response = self.transport.send(request).await?.error_for_status()?;

            match parse_operation_status(&response.body)? {
                OperationStatus::Succeeded => return Ok(()),
                OperationStatus::Failed(message) => return Err(ApiError::OperationFailed(message)),
                OperationStatus::InProgress => {
                    debug!("Operation {} in progress (attempt {})", request_id, attempt);
                    if attempt < self.polling.max_attempts {
                        tokio::time::sleep(self.polling.interval()).await;
                    }
                }
            }
        }

        Err(ApiError::Timeout(format!(
            "operation {} still running after {} polls",
            request_id, self.polling.max_attempts
        )))
    }

    async fn send(
        &self,
        subscription_id: Option<Uuid>,
        call: Call,
    ) -> Result<ManagementResponse, ApiError> {
        let call = &call;
        match &self.refresher {
            Some(refresher)
                if self.credentials.mode() == AuthenticationMode::ActiveDirectory =>
            {
                let key = subscription_id.map(|id| id.to_string());
                refresher
                    .run_with_retry(key.as_deref(), move || self.send_once(subscription_id, call))
                    .await
            }
            _ => self.send_once(subscription_id, call).await,
        }
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        subscription_id: Uuid,
        path: String,
    ) -> Result<T, ApiError> {
        let response = self
            .send(Some(subscription_id), Call::get(path, BodyFormat::Json))
            .await?;
        Ok(serde_json::from_str(&response.body)?)
    }

    async fn fetch_xml(&self, subscription_id: Uuid, path: String) -> Result<String, ApiError> {
        let response = self
            .send(Some(subscription_id), Call::get(path, BodyFormat::Xml))
            .await?;
        Ok(response.body)
    }

    pub async fn list_services(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<MobileService>, ManagementError> {
        let path = format!("/{}/{}", subscription_id, MOBILE_SERVICES);
        let services: Vec<MobileServiceData> = self
            .fetch_json(subscription_id, path)
            .await
            .map_err(|e| ManagementError::new(SERVICE_LIST_ERROR, e))?;

        Ok(services
            .into_iter()
            .map(|service| service.into_service(subscription_id))
            .collect())
    }

    /// Regions that can host a mobile service.
    pub async fn list_regions(&self, subscription_id: Uuid) -> Result<Vec<String>, ManagementError> {
        let path = format!("/{}/services/mobileservices/regions", subscription_id);
        let regions: Vec<RegionData> = self
            .fetch_json(subscription_id, path)
            .await
            .map_err(|e| ManagementError::new(REGION_LIST_ERROR, e))?;

        Ok(regions.into_iter().map(|r| r.region).collect())
    }

    pub async fn list_sql_servers(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<SqlServer>, ManagementError> {
        let path = format!("/{}/services/sqlservers/servers", subscription_id);
        async {
            let xml = self.fetch_xml(subscription_id, path).await?;
            parse_sql_servers(&xml)
        }
        .await
        .map_err(|e| ManagementError::new(SERVER_LIST_ERROR, e))
    }

    pub async fn list_sql_databases(
        &self,
        subscription_id: Uuid,
        server: &SqlServer,
    ) -> Result<Vec<SqlDb>, ManagementError> {
        let path = format!(
            "/{}/services/sqlservers/servers/{}/databases?contentview=generic",
            subscription_id,
            encode(&server.name)
        );
        async {
            let xml = self.fetch_xml(subscription_id, path).await?;
            parse_sql_databases(&xml, server)
        }
        .await
        .map_err(|e| ManagementError::new(DATABASE_LIST_ERROR, e))
    }

    /// Provision a mobile service and its database.
    ///
    /// Submits the application template, then reads the application back. An
    /// application that is not `Healthy` is deleted before the error is
    /// returned; the error carries the server's failure message when there is one.
    pub async fn create_service(
        &self,
        subscription_id: Uuid,
        service: &NewService,
    ) -> Result<(), ManagementError> {
        let template = ServiceTemplate::new(subscription_id, service, &self.management_base_url);
        let application = template.application_name();

        let xml = async {
            let submit = Call::new(
                Method::POST,
                format!("/{}/applications", subscription_id),
                BodyFormat::Xml,
            )
            .with_body(template.to_envelope());
            self.send(Some(subscription_id), submit).await?;

            let path = format!("/{}/applications/{}", subscription_id, encode(&application));
            let xml = self.fetch_xml(subscription_id, path).await?;
            provisioning_failure(&xml)
        }
        .await
        .map_err(|e| ManagementError::new(CREATE_SERVICE_ERROR, e))?;

        match xml {
            None => {
                info!("Created mobile service {}", service.name);
                Ok(())
            }
            Some(message) => {
                warn!(
                    "Mobile service {} did not provision, removing it",
                    service.name
                );
                self.delete_service(subscription_id, &service.name).await;
                if message.is_empty() {
                    Err(ManagementError::message_only(CREATE_SERVICE_ERROR))
                } else {
                    Err(ManagementError::message_only(message))
                }
            }
        }
    }

    /// Delete the mobile service and its application. Failures are logged,
    /// and a failure of the first delete does not prevent the second.
    pub async fn delete_service(&self, subscription_id: Uuid, service_name: &str) {
        let service = Call::new(
            Method::DELETE,
            service_path(subscription_id, service_name, "?deletedata=true"),
            BodyFormat::Json,
        );
        if let Err(e) = self.send(Some(subscription_id), service).await {
            warn!("Failed to delete mobile service {}: {}", service_name, e);
        }

        let application = Call::new(
            Method::DELETE,
            format!(
                "/{}/applications/{}{}",
                subscription_id,
                encode(service_name),
                APPLICATION_SUFFIX
            ),
            BodyFormat::Xml,
        );
        if let Err(e) = self.send(Some(subscription_id), application).await {
            warn!("Failed to delete application for {}: {}", service_name, e);
        }
    }

    pub async fn list_tables(
        &self,
        subscription_id: Uuid,
        service_name: &str,
    ) -> Result<Vec<Table>, ManagementError> {
        let tables: Vec<TableData> = self
            .fetch_json(subscription_id, service_path(subscription_id, service_name, "/tables"))
            .await
            .map_err(|e| ManagementError::new(TABLE_LIST_ERROR, e))?;

        Ok(tables.into_iter().map(TableData::into_table).collect())
    }

    pub async fn create_table(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        table_name: &str,
        permissions: &TablePermissions,
    ) -> Result<(), ManagementError> {
        async {
            let mut body = serde_json::to_value(permissions)?;
            body["name"] = json!(table_name);
            body["idType"] = json!("string");

            let path = service_path(subscription_id, service_name, "/tables");
            self.send(Some(subscription_id), Call::json(Method::POST, path, &body))
                .await
                .map(drop)
        }
        .await
        .map_err(|e| ManagementError::new(CREATE_TABLE_ERROR, e))
    }

    pub async fn update_table(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        table_name: &str,
        permissions: &TablePermissions,
    ) -> Result<(), ManagementError> {
        async {
            let body = serde_json::to_value(permissions)?;
            let path = service_path(
                subscription_id,
                service_name,
                &format!("/tables/{}/permissions", encode(table_name)),
            );
            self.send(Some(subscription_id), Call::json(Method::PUT, path, &body))
                .await
                .map(drop)
        }
        .await
        .map_err(|e| ManagementError::new(UPDATE_TABLE_ERROR, e))
    }

    /// A table with its permissions, columns, and scripts.
    pub async fn show_table_details(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        table_name: &str,
    ) -> Result<Table, ManagementError> {
        let path = service_path(
            subscription_id,
            service_name,
            &format!("/tables/{}", encode(table_name)),
        );

        async {
            let data: TableData = self.fetch_json(subscription_id, path.clone()).await?;
            let permissions: TablePermissions = self
                .fetch_json(subscription_id, format!("{}/permissions", path))
                .await?;
            let columns: Option<Vec<ColumnData>> = self
                .fetch_json(subscription_id, format!("{}/columns", path))
                .await?;
            let scripts: Option<Vec<ScriptData>> = self
                .fetch_json(subscription_id, format!("{}/scripts", path))
                .await?;

            let mut table = data.into_table();
            table.permissions = Some(permissions);
            table.columns = columns.unwrap_or_default().into_iter().map(Into::into).collect();
            table.scripts = scripts
                .unwrap_or_default()
                .into_iter()
                .map(|script| Script {
                    name: format!("{}.{}", table.name, script.operation),
                    operation: script.operation,
                    bytes: script.size_bytes,
                    self_link: script.selflink,
                })
                .collect();
            Ok::<_, ApiError>(table)
        }
        .await
        .map_err(|e| ManagementError::new(TABLE_DATA_ERROR, e))
    }

    async fn download_script(
        &self,
        subscription_id: Uuid,
        path: Result<String, ApiError>,
        destination: &Path,
    ) -> Result<(), ManagementError> {
        async {
            let response = self
                .send(Some(subscription_id), Call::get(path?, BodyFormat::Text))
                .await?;
            tokio::fs::write(destination, response.body).await?;
            Ok::<_, ApiError>(())
        }
        .await
        .map_err(|e| ManagementError::new(DOWNLOAD_SCRIPT_ERROR, e))?;

        debug!("Saved script to {:?}", destination);
        Ok(())
    }

    async fn upload_script(
        &self,
        subscription_id: Uuid,
        path: Result<String, ApiError>,
        source: &Path,
    ) -> Result<(), ManagementError> {
        async {
            let path = path?;
            let script = tokio::fs::read_to_string(source).await?;
            let call = Call::new(Method::PUT, path, BodyFormat::Text).with_body(script);
            self.send(Some(subscription_id), call).await.map(drop)
        }
        .await
        .map_err(|e| ManagementError::new(UPLOAD_SCRIPT_ERROR, e))
    }

    fn table_script_path(
        subscription_id: Uuid,
        service_name: &str,
        script_name: &str,
    ) -> Result<String, ApiError> {
        let (table, operation) = table_script_parts(script_name)?;
        Ok(service_path(
            subscription_id,
            service_name,
            &format!("/tables/{}/scripts/{}/code", encode(table), encode(operation)),
        ))
    }

    fn api_script_path(subscription_id: Uuid, service_name: &str, script_name: &str) -> String {
        service_path(
            subscription_id,
            service_name,
            &format!("/apis/{}/script", encode(script_resource(script_name))),
        )
    }

    fn job_script_path(subscription_id: Uuid, service_name: &str, script_name: &str) -> String {
        service_path(
            subscription_id,
            service_name,
            &format!("/scheduler/jobs/{}/script", encode(script_resource(script_name))),
        )
    }

    /// Save a table script (`<table>.<operation>`) to `destination`.
    pub async fn download_table_script(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        script_name: &str,
        destination: &Path,
    ) -> Result<(), ManagementError> {
        let path = Self::table_script_path(subscription_id, service_name, script_name);
        self.download_script(subscription_id, path, destination).await
    }

    pub async fn upload_table_script(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        script_name: &str,
        source: &Path,
    ) -> Result<(), ManagementError> {
        let path = Self::table_script_path(subscription_id, service_name, script_name);
        self.upload_script(subscription_id, path, source).await
    }

    pub async fn list_apis(
        &self,
        subscription_id: Uuid,
        service_name: &str,
    ) -> Result<Vec<CustomApi>, ManagementError> {
        let apis: Vec<CustomApiData> = self
            .fetch_json(subscription_id, service_path(subscription_id, service_name, "/apis"))
            .await
            .map_err(|e| ManagementError::new(API_LIST_ERROR, e))?;

        Ok(apis
            .into_iter()
            .map(|api| CustomApi {
                name: api.name,
                permissions: api.permissions,
            })
            .collect())
    }

    pub async fn create_api(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        api_name: &str,
        permissions: &CustomApiPermissions,
    ) -> Result<(), ManagementError> {
        async {
            let mut body = serde_json::to_value(permissions)?;
            body["name"] = json!(api_name);

            let path = service_path(subscription_id, service_name, "/apis");
            self.send(Some(subscription_id), Call::json(Method::POST, path, &body))
                .await
                .map(drop)
        }
        .await
        .map_err(|e| ManagementError::new(CREATE_API_ERROR, e))
    }

    pub async fn update_api(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        api_name: &str,
        permissions: &CustomApiPermissions,
    ) -> Result<(), ManagementError> {
        async {
            let body = serde_json::to_value(permissions)?;
            let path = service_path(
                subscription_id,
                service_name,
                &format!("/apis/{}", encode(api_name)),
            );
            self.send(Some(subscription_id), Call::json(Method::PUT, path, &body))
                .await
                .map(drop)
        }
        .await
        .map_err(|e| ManagementError::new(UPDATE_API_ERROR, e))
    }

    pub async fn download_api_script(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        script_name: &str,
        destination: &Path,
    ) -> Result<(), ManagementError> {
        let path = Self::api_script_path(subscription_id, service_name, script_name);
        self.download_script(subscription_id, Ok(path), destination).await
    }

    pub async fn upload_api_script(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        script_name: &str,
        source: &Path,
    ) -> Result<(), ManagementError> {
        let path = Self::api_script_path(subscription_id, service_name, script_name);
        self.upload_script(subscription_id, Ok(path), source).await
    }

    pub async fn list_jobs(
        &self,
        subscription_id: Uuid,
        service_name: &str,
    ) -> Result<Vec<Job>, ManagementError> {
        let jobs: Vec<JobData> = self
            .fetch_json(
                subscription_id,
                service_path(subscription_id, service_name, "/scheduler/jobs"),
            )
            .await
            .map_err(|e| ManagementError::new(JOB_LIST_ERROR, e))?;

        Ok(jobs.into_iter().map(Job::from).collect())
    }

    pub async fn create_job(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        job_name: &str,
        schedule: &JobSchedule,
    ) -> Result<(), ManagementError> {
        let mut body = json!({ "name": job_name });
        job_interval_fields(&mut body, schedule);

        let path = service_path(subscription_id, service_name, "/scheduler/jobs");
        self.send(Some(subscription_id), Call::json(Method::POST, path, &body))
            .await
            .map(drop)
            .map_err(|e| ManagementError::new(CREATE_JOB_ERROR, e))
    }

    /// Update a job's status and schedule. An on-demand schedule always
    /// disables the job.
    pub async fn update_job(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        job_name: &str,
        schedule: &JobSchedule,
        enabled: bool,
    ) -> Result<(), ManagementError> {
        let body = match schedule {
            JobSchedule::OnDemand => json!({ "status": "disabled" }),
            JobSchedule::Every { .. } => {
                let status = if enabled { "enabled" } else { "disabled" };
                let mut body = json!({ "status": status });
                job_interval_fields(&mut body, schedule);
                body
            }
        };

        let path = service_path(
            subscription_id,
            service_name,
            &format!("/scheduler/jobs/{}", encode(job_name)),
        );
        self.send(Some(subscription_id), Call::json(Method::PUT, path, &body))
            .await
            .map(drop)
            .map_err(|e| ManagementError::new(UPDATE_JOB_ERROR, e))
    }

    pub async fn download_job_script(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        script_name: &str,
        destination: &Path,
    ) -> Result<(), ManagementError> {
        let path = Self::job_script_path(subscription_id, service_name, script_name);
        self.download_script(subscription_id, Ok(path), destination).await
    }

    pub async fn upload_job_script(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        script_name: &str,
        source: &Path,
    ) -> Result<(), ManagementError> {
        let path = Self::job_script_path(subscription_id, service_name, script_name);
        self.upload_script(subscription_id, Ok(path), source).await
    }

    /// The ten most recent log entries. Timestamps are read in the layout of
    /// the service's `runtime`.
    pub async fn list_logs(
        &self,
        subscription_id: Uuid,
        service_name: &str,
        runtime: ServiceRuntime,
    ) -> Result<Vec<LogEntry>, ManagementError> {
        async {
            let logs: LogData = self
                .fetch_json(
                    subscription_id,
                    service_path(subscription_id, service_name, "/logs?$top=10"),
                )
                .await?;

            logs.results
                .into_iter()
                .map(|entry| -> Result<LogEntry, ApiError> {
                    let time_created = runtime.parse_log_time(&entry.time_created).map_err(|e| {
                        ApiError::Parse(format!(
                            "Invalid log timestamp '{}': {}",
                            entry.time_created, e
                        ))
                    })?;
                    Ok(LogEntry {
                        time_created,
                        entry_type: entry.entry_type,
                        source: entry.source,
                        message: entry.message,
                    })
                })
                .collect::<Result<Vec<_>, ApiError>>()
        }
        .await
        .map_err(|e| ManagementError::new(LOG_ERROR, e))
    }
}

#[async_trait]
impl SubscriptionSource for ManagementRestClient {
    async fn list_subscriptions_xml(&self) -> Result<String, ManagementError> {
        self.send(None, Call::get("/subscriptions".into(), BodyFormat::Xml))
            .await
            .map(|response| response.body)
            .map_err(|e| ManagementError::new(SUBSCRIPTION_LIST_ERROR, e))
    }
}
