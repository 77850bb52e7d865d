use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::services::pipeline::ProvisionStep;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported engine: {0}")]
pub struct UnknownEngine(pub String);

/// Application stack variant a store runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// WordPress + WooCommerce on MySQL
    #[default]
    Woocommerce,
}

impl Engine {
    pub const ALL: &'static [Engine] = &[Engine::Woocommerce];

    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Woocommerce => "woocommerce",
        }
    }

    /// Ordered resource-creation steps for this engine
    pub fn steps(&self) -> &'static [ProvisionStep] {
        use ProvisionStep::*;
        match self {
            Engine::Woocommerce => &[
                Namespace,
                ResourceQuota,
                LimitRange,
                DefaultDenyPolicy,
                AllowAppToDatabasePolicy,
                AllowPublicToAppPolicy,
                DatabaseSecret,
                DatabaseService,
                DatabaseWorkload,
                AppService,
                AppWorkload,
                Ingress,
            ],
        }
    }

    pub fn profile(&self) -> &'static EngineProfile {
        match self {
            Engine::Woocommerce => &WOOCOMMERCE,
        }
    }
}

impl FromStr for Engine {
    type Err = UnknownEngine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "woocommerce" | "wordpress" => Ok(Engine::Woocommerce),
            _ => Err(UnknownEngine(s.to_string())),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an application environment variable takes its value from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSource {
    Literal(&'static str),
    /// Key inside the tenant's database secret
    SecretKey(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct EnvVar {
    pub name: &'static str,
    pub source: EnvSource,
}

#[derive(Debug)]
pub struct DatabaseProfile {
    pub name: &'static str,
    pub image: &'static str,
    pub port: u16,
    pub data_path: &'static str,
    pub root_password_key: &'static str,
    pub database_key: &'static str,
    pub user_key: &'static str,
    pub password_key: &'static str,
    pub database_name: &'static str,
    pub user_name: &'static str,
}

#[derive(Debug)]
pub struct AppProfile {
    pub name: &'static str,
    pub image: &'static str,
    pub port: u16,
    pub env: &'static [EnvVar],
}

/// Static description of the two workloads an engine deploys
#[derive(Debug)]
pub struct EngineProfile {
    pub secret_name: &'static str,
    pub database: DatabaseProfile,
    pub app: AppProfile,
}

static WOOCOMMERCE: EngineProfile = EngineProfile {
    secret_name: "mysql-secret",
    database: DatabaseProfile {
        name: "mysql",
        image: "mysql:8.0",
        port: 3306,
        data_path: "/var/lib/mysql",
        root_password_key: "MYSQL_ROOT_PASSWORD",
        database_key: "MYSQL_DATABASE",
        user_key: "MYSQL_USER",
        password_key: "MYSQL_PASSWORD",
        database_name: "wordpress",
        user_name: "wordpress",
    },
    app: AppProfile {
        name: "wordpress",
        image: "wordpress:6-apache",
        port: 80,
        env: &[
            EnvVar {
                name: "WORDPRESS_DB_HOST",
                source: EnvSource::Literal("mysql:3306"),
            },
            EnvVar {
                name: "WORDPRESS_DB_NAME",
                source: EnvSource::SecretKey("MYSQL_DATABASE"),
            },
            EnvVar {
                name: "WORDPRESS_DB_USER",
                source: EnvSource::SecretKey("MYSQL_USER"),
            },
            EnvVar {
                name: "WORDPRESS_DB_PASSWORD",
                source: EnvSource::SecretKey("MYSQL_PASSWORD"),
            },
        ],
    },
};

/// Per-tenant generated database credentials
#[derive(Clone)]
pub struct Credentials {
    pub root_password: String,
    pub password: String,
}

impl Credentials {
    const LENGTH: usize = 24;

    pub fn generate() -> Self {
        Self {
            root_password: random_secret(Self::LENGTH),
            password: random_secret(Self::LENGTH),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(**redacted**)")
    }
}

fn random_secret(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

impl DatabaseProfile {
    /// Secret payload consumed by the database workload
    pub fn secret_data(&self, credentials: &Credentials) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                self.root_password_key.to_string(),
                credentials.root_password.clone(),
            ),
            (self.database_key.to_string(), self.database_name.to_string()),
            (self.user_key.to_string(), self.user_name.to_string()),
            (self.password_key.to_string(), credentials.password.clone()),
        ])
    }
}
