//! Application template submitted when provisioning a mobile service.
//!
//! The template is JSON describing the mobile service and its SQL backing
//! store; it travels base64-encoded inside an `<Application>` XML envelope.

use base64::{engine::general_purpose::STANDARD, Engine};
use quick_xml::escape::escape;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::SecureString;

const SCHEMA_VERSION: &str = "2012-05.1.0";
const MOBILE_SERVICE_VERSION: &str = "2012-05-21.1.0";
const SQL_VERSION: &str = "1.0";
const SQL_SERVER_TYPE: &str = "Microsoft.WindowsAzure.SQLAzure.Server";
const SQL_DATABASE_TYPE: &str = "Microsoft.WindowsAzure.SQLAzure.DataBase";
const MOBILE_SERVICE_TYPE: &str = "Microsoft.WindowsAzure.MobileServices.MobileService";

/// Suffix of the application resource wrapping a mobile service.
pub const APPLICATION_SUFFIX: &str = "mobileservice";

/// Where the new service keeps its data.
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseTarget {
    /// Provision a new server and a `<service>_db` database.
    New,
    /// Attach to an existing server and database.
    Existing { server: String, database: String },
}

/// A mobile service to provision.
#[derive(Debug, Clone)]
pub struct NewService {
    pub name: String,
    pub region: String,
    /// SQL administrator login.
    pub admin_login: String,
    pub admin_password: SecureString,
    pub database: DatabaseTarget,
}

#[derive(Debug, Clone)]
pub struct ServiceTemplate<'a> {
    pub subscription_id: Uuid,
    pub service_name: &'a str,
    pub region: &'a str,
    pub admin_login: &'a str,
    pub admin_password: &'a str,
    pub database: &'a DatabaseTarget,
    /// Base URL external SQL resource URIs point at.
    pub management_base_url: &'a str,
}

/// Resource names are the type prefix plus a dash-less random id.
fn resource_name(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

fn reference(resource: &str) -> Value {
    json!({ "ResourceReference": format!("{}.Name", resource) })
}

impl<'a> ServiceTemplate<'a> {
    pub fn new(subscription_id: Uuid, service: &'a NewService, management_base_url: &'a str) -> Self {
        Self {
            subscription_id,
            service_name: &service.name,
            region: &service.region,
            admin_login: &service.admin_login,
            admin_password: service.admin_password.as_str(),
            database: &service.database,
            management_base_url,
        }
    }

    pub fn application_name(&self) -> String {
        format!("{}{}", self.service_name, APPLICATION_SUFFIX)
    }

    fn mobile_service(&self, server: &str, database: &str) -> Value {
        json!({
            "ProvisioningParameters": {
                "Name": self.service_name,
                "Location": self.region,
            },
            "ProvisioningConfigParameters": {
                "Server": { "StringConcat": [reference(server), ".database.windows.net"] },
                "Database": reference(database),
                "AdministratorLogin": self.admin_login,
                "AdministratorLoginPassword": self.admin_password,
            },
            "Version": MOBILE_SERVICE_VERSION,
            "Name": "ZumoMobileService",
            "Type": MOBILE_SERVICE_TYPE,
        })
    }

    /// The JSON template document.
    pub fn to_json(&self) -> Value {
        let server = resource_name("ZumoSqlServer");
        let database = resource_name("ZumoSqlDatabase");

        match self.database {
            DatabaseTarget::New => json!({
                "SchemaVersion": SCHEMA_VERSION,
                "Location": self.region,
                "ExternalResources": {},
                "InternalResources": {
                    "ZumoMobileService": self.mobile_service(&server, &database),
                    server.clone(): {
                        "ProvisioningParameters": {
                            "AdministratorLogin": self.admin_login,
                            "AdministratorLoginPassword": self.admin_password,
                            "Location": self.region,
                        },
                        "ProvisioningConfigParameters": {
                            "FirewallRules": [{
                                "Name": "AllowAllWindowsAzureIps",
                                "StartIPAddress": "0.0.0.0",
                                "EndIPAddress": "0.0.0.0",
                            }]
                        },
                        "Version": SQL_VERSION,
                        "Name": server.clone(),
                        "Type": SQL_SERVER_TYPE,
                    },
                    database.clone(): {
                        "ProvisioningParameters": {
                            "Name": format!("{}_db", self.service_name),
                            "Edition": "WEB",
                            "MaxSizeInGB": "1",
                            "DBServer": reference(&server),
                            "CollationName": "SQL_Latin1_General_CP1_CI_AS",
                        },
                        "Version": SQL_VERSION,
                        "Name": database.clone(),
                        "Type": SQL_DATABASE_TYPE,
                    },
                },
            }),
            DatabaseTarget::Existing {
                server: server_name,
                database: database_name,
            } => {
                let server_uri = format!(
                    "{}/{}/services/sqlservers/servers/{}",
                    self.management_base_url.trim_end_matches('/'),
                    self.subscription_id,
                    server_name
                );
                json!({
                    "SchemaVersion": SCHEMA_VERSION,
                    "Location": self.region,
                    "ExternalResources": {
                        server.clone(): {
                            "Name": server.clone(),
                            "Type": SQL_SERVER_TYPE,
                            "URI": server_uri.clone(),
                        },
                        database.clone(): {
                            "Name": database.clone(),
                            "Type": SQL_DATABASE_TYPE,
                            "URI": format!("{}/databases/{}", server_uri, database_name),
                        },
                    },
                    "InternalResources": {
                        "ZumoMobileService": self.mobile_service(&server, &database),
                    },
                })
            }
        }
    }

    /// The `<Application>` envelope POSTed to `/<subscription>/applications`.
    pub fn to_envelope(&self) -> String {
        let configuration = STANDARD.encode(self.to_json().to_string());
        let name = escape(self.service_name);
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
             <Application xmlns=\"http://schemas.microsoft.com/windowsazure\">\
             <Name>{}</Name><Label>{}</Label><Description>{}</Description>\
             <Configuration>{}</Configuration></Application>",
            escape(&self.application_name()),
            name,
            name,
            configuration
        )
    }
}
