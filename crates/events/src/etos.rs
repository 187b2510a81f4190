//! Event payloads consumed by migration services.
//!
//! Field names serialize in PascalCase so the payloads stay wire-compatible with
//! producers that publish `{"TenantId": ..., "DatabaseName": ..., "Properties": {...}}`.

use serde::{Deserialize, Serialize};

use fleetmig_core::TenantId;

use crate::event::{Event, HasProperties, Properties};
use crate::tenant::TenantScoped;

/// Request to bring a logical database up to date.
///
/// `tenant_id == None` targets the host (shared) database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApplyDatabaseMigrations {
    pub tenant_id: Option<TenantId>,
    pub database_name: String,
    #[serde(default)]
    pub properties: Properties,
}

impl ApplyDatabaseMigrations {
    pub fn new(tenant_id: Option<TenantId>, database_name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            database_name: database_name.into(),
            properties: Properties::new(),
        }
    }

    pub fn for_host(database_name: impl Into<String>) -> Self {
        Self::new(None, database_name)
    }

    pub fn for_tenant(tenant_id: TenantId, database_name: impl Into<String>) -> Self {
        Self::new(Some(tenant_id), database_name)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A tenant was registered in the tenant directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TenantCreated {
    pub id: TenantId,
    pub name: String,
    #[serde(default)]
    pub properties: Properties,
}

impl TenantCreated {
    pub fn new(id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// One of a tenant's connection strings changed.
///
/// `connection_string_name` names the logical database whose string changed;
/// absent means the producer did not say, which consumers treat as "Default".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TenantConnectionStringUpdated {
    pub id: TenantId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string_name: Option<String>,
    #[serde(default)]
    pub properties: Properties,
}

impl TenantConnectionStringUpdated {
    pub fn new(id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            connection_string_name: None,
            properties: Properties::new(),
        }
    }

    pub fn with_connection_string_name(mut self, name: impl Into<String>) -> Self {
        self.connection_string_name = Some(name.into());
        self
    }
}

macro_rules! impl_eto {
    ($t:ty, $name:literal) => {
        impl Event for $t {
            fn event_type(&self) -> &'static str {
                $name
            }
        }

        impl HasProperties for $t {
            fn properties(&self) -> &Properties {
                &self.properties
            }

            fn properties_mut(&mut self) -> &mut Properties {
                &mut self.properties
            }
        }
    };
}

impl_eto!(ApplyDatabaseMigrations, "migrations.database.apply");
impl_eto!(TenantCreated, "tenancy.tenant.created");
impl_eto!(
    TenantConnectionStringUpdated,
    "tenancy.tenant.connection_string_updated"
);

impl TenantScoped for ApplyDatabaseMigrations {
    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }
}

impl TenantScoped for TenantCreated {
    fn tenant_id(&self) -> Option<TenantId> {
        Some(self.id)
    }
}

impl TenantScoped for TenantConnectionStringUpdated {
    fn tenant_id(&self) -> Option<TenantId> {
        Some(self.id)
    }
}
