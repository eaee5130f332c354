//! Mobile Services and SQL domain records, plus the JSON wire types they are
//! decoded from.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::SecureString;

/// Who may call a table operation or custom API method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PermissionLevel {
    /// Anyone, no key required.
    #[serde(rename = "public")]
    Everyone,
    /// Anybody holding the application key.
    #[default]
    #[serde(rename = "application", alias = "anybody")]
    Application,
    /// Signed-in users.
    #[serde(rename = "user")]
    Authenticated,
    /// Scripts and administrators holding the master key.
    #[serde(rename = "admin")]
    Admin,
}

impl PermissionLevel {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Everyone => "public",
            Self::Application => "application",
            Self::Authenticated => "user",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" | "everyone" => Ok(Self::Everyone),
            "application" | "anybody" => Ok(Self::Application),
            "user" | "authenticated" => Ok(Self::Authenticated),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown permission level '{}'", other)),
        }
    }
}

/// Per-operation table permissions; also the wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TablePermissions {
    pub insert: PermissionLevel,
    pub read: PermissionLevel,
    pub update: PermissionLevel,
    pub delete: PermissionLevel,
}

/// Per-method custom API permissions; also the wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomApiPermissions {
    #[serde(default)]
    pub get: PermissionLevel,
    #[serde(default)]
    pub put: PermissionLevel,
    #[serde(default)]
    pub post: PermissionLevel,
    #[serde(default)]
    pub patch: PermissionLevel,
    #[serde(default)]
    pub delete: PermissionLevel,
}

/// Backend runtime of a mobile service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceRuntime {
    #[default]
    Node,
    DotNet,
}

impl ServiceRuntime {
    pub fn from_platform(platform: Option<&str>) -> Self {
        match platform {
            Some("dotNet") => Self::DotNet,
            _ => Self::Node,
        }
    }

    /// Timestamp layout used by this runtime's log entries.
    pub fn log_time_format(&self) -> &'static str {
        match self {
            Self::Node => "%Y-%m-%dT%H:%M:%S%.3fZ",
            Self::DotNet => "%Y-%m-%dT%H:%M:%SZ",
        }
    }

    pub fn parse_log_time(&self, value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        NaiveDateTime::parse_from_str(value, self.log_time_format()).map(|t| t.and_utc())
    }
}

impl fmt::Display for ServiceRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => f.write_str("Node.js"),
            Self::DotNet => f.write_str(".NET"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MobileService {
    pub name: String,
    pub service_type: String,
    pub state: String,
    pub self_link: String,
    pub app_url: String,
    pub app_key: SecureString,
    pub master_key: SecureString,
    pub webspace: String,
    pub region: String,
    pub management_portal_link: String,
    pub subscription_id: Uuid,
    pub runtime: ServiceRuntime,
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub name: String,
    pub self_link: String,
    pub permissions: Option<TablePermissions>,
    pub columns: Vec<Column>,
    pub scripts: Vec<Script>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub column_type: String,
    pub self_link: String,
    pub indexed: bool,
    pub zumo_index: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    /// `<table>.<operation>`.
    pub name: String,
    pub operation: String,
    pub bytes: u64,
    pub self_link: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomApi {
    pub name: String,
    pub permissions: CustomApiPermissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Minute,
    Hour,
    Day,
    Month,
}

impl FromStr for IntervalUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            other => Err(format!("unknown interval unit '{}'", other)),
        }
    }
}

/// When a scheduler job runs. `OnDemand` is the API's interval unit `none`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobSchedule {
    OnDemand,
    Every {
        period: u32,
        unit: IntervalUnit,
        start_time: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub app_name: String,
    pub enabled: bool,
    /// Interval, when the job runs on one.
    pub interval: Option<(u32, IntervalUnit)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub time_created: DateTime<Utc>,
    pub entry_type: String,
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlServer {
    pub name: String,
    pub admin: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlDb {
    pub name: String,
    pub edition: String,
    pub server: SqlServer,
}

// Wire types.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MobileServiceData {
    pub name: String,
    #[serde(default, rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub selflink: String,
    #[serde(default)]
    pub application_url: String,
    #[serde(default)]
    pub application_key: String,
    #[serde(default)]
    pub master_key: String,
    #[serde(default)]
    pub webspace: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub management_portal_link: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableData>,
}

impl MobileServiceData {
    pub fn into_service(self, subscription_id: Uuid) -> MobileService {
        MobileService {
            runtime: ServiceRuntime::from_platform(self.platform.as_deref()),
            name: self.name,
            service_type: self.service_type,
            state: self.state,
            self_link: self.selflink,
            app_url: self.application_url,
            app_key: SecureString::new(self.application_key),
            master_key: SecureString::new(self.master_key),
            webspace: self.webspace,
            region: self.region,
            management_portal_link: self.management_portal_link,
            subscription_id,
            tables: self.tables.into_iter().map(TableData::into_table).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TableData {
    pub name: String,
    #[serde(default)]
    pub selflink: String,
}

impl TableData {
    pub fn into_table(self) -> Table {
        Table {
            name: self.name,
            self_link: self.selflink,
            ..Table::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ColumnData {
    pub name: String,
    #[serde(default, rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub selflink: String,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub zumo_index: bool,
}

impl From<ColumnData> for Column {
    fn from(data: ColumnData) -> Self {
        Self {
            name: data.name,
            column_type: data.column_type,
            self_link: data.selflink,
            indexed: data.indexed,
            zumo_index: data.zumo_index,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScriptData {
    pub operation: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub selflink: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegionData {
    pub region: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CustomApiData {
    pub name: String,
    #[serde(flatten)]
    pub permissions: CustomApiPermissions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobData {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub interval_period: u32,
    #[serde(default)]
    pub interval_unit: Option<String>,
}

impl From<JobData> for Job {
    fn from(data: JobData) -> Self {
        let interval = match (data.interval_period, data.interval_unit.as_deref()) {
            (period, Some(unit)) if period > 0 => unit.parse().ok().map(|unit| (period, unit)),
            _ => None,
        };

        Self {
            id: data.id,
            name: data.name,
            app_name: data.app_name,
            enabled: data.status == "enabled",
            interval,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogData {
    #[serde(default)]
    pub results: Vec<LogEntryData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LogEntryData {
    pub time_created: String,
    #[serde(default, rename = "type")]
    pub entry_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_permission_wire_vocabulary() {
        let permissions = TablePermissions {
            insert: PermissionLevel::Everyone,
            read: PermissionLevel::Application,
            update: PermissionLevel::Authenticated,
            delete: PermissionLevel::Admin,
        };
        let json = serde_json::to_value(permissions).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"insert": "public", "read": "application", "update": "user", "delete": "admin"})
        );

        let parsed: TablePermissions = serde_json::from_str(
            r#"{"insert":"anybody","read":"public","update":"user","delete":"admin"}"#,
        )
        .unwrap();
        assert_eq!(parsed.insert, PermissionLevel::Application);
        assert_eq!(parsed.read, PermissionLevel::Everyone);

        assert_eq!("Authenticated".parse::<PermissionLevel>(), Ok(PermissionLevel::Authenticated));
        assert!("nobody".parse::<PermissionLevel>().is_err());
    }

    #[test]
    fn test_runtime_from_platform_and_log_times() {
        assert_eq!(ServiceRuntime::from_platform(Some("dotNet")), ServiceRuntime::DotNet);
        assert_eq!(ServiceRuntime::from_platform(Some("node")), ServiceRuntime::Node);
        assert_eq!(ServiceRuntime::from_platform(None), ServiceRuntime::Node);

        let node = ServiceRuntime::Node
            .parse_log_time("2014-08-01T10:15:30.123Z")
            .unwrap();
        assert_eq!((node.hour(), node.minute(), node.second()), (10, 15, 30));
        assert_eq!(node.timestamp_subsec_millis(), 123);

        let dotnet = ServiceRuntime::DotNet
            .parse_log_time("2014-08-01T10:15:30Z")
            .unwrap();
        assert_eq!(dotnet.day(), 1);
        assert!(ServiceRuntime::DotNet
            .parse_log_time("2014-08-01T10:15:30.123Z")
            .is_err());
    }

    #[test]
    fn test_job_interval_only_when_positive() {
        let data: JobData = serde_json::from_str(
            r#"{"id":"7d0c4f59-0c6b-4a8e-9b2a-3f0b7c1d2e3f","name":"cleanup","appName":"todo","status":"enabled","intervalPeriod":15,"intervalUnit":"minute"}"#,
        )
        .unwrap();
        let job = Job::from(data);
        assert!(job.enabled);
        assert_eq!(job.interval, Some((15, IntervalUnit::Minute)));

        let data: JobData = serde_json::from_str(
            r#"{"id":"7d0c4f59-0c6b-4a8e-9b2a-3f0b7c1d2e3f","name":"manual","status":"disabled","intervalPeriod":0,"intervalUnit":"none"}"#,
        )
        .unwrap();
        let job = Job::from(data);
        assert!(!job.enabled);
        assert_eq!(job.interval, None);
    }
}
