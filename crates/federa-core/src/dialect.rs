//! Source dialect profiles.
//!
//! Everything that differs between source engines (JDBC URL shape, TLS
//! parameters, identifier quoting, type names) lives behind
//! [`DialectProfile`]. A profile is chosen once, when a [`Dialect`] is parsed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FederaError;
use crate::types;

/// Supported source engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "MySQL")]
    MySql,
    #[serde(alias = "MariaDB")]
    MariaDb,
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgres,
    #[serde(alias = "mssql")]
    SqlServer,
}

impl Dialect {
    /// The capability set for this dialect.
    pub fn profile(self) -> &'static dyn DialectProfile {
        match self {
            Dialect::MySql => &MySqlProfile,
            Dialect::MariaDb => &MariaDbProfile,
            Dialect::Postgres => &PostgresProfile,
            Dialect::SqlServer => &SqlServerProfile,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::MariaDb => "mariadb",
            Dialect::Postgres => "postgresql",
            Dialect::SqlServer => "sqlserver",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = FederaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" => Ok(Dialect::MySql),
            "mariadb" => Ok(Dialect::MariaDb),
            "postgresql" | "postgres" | "pg" => Ok(Dialect::Postgres),
            "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            other => Err(FederaError::Config(format!("unsupported dialect '{}'", other))),
        }
    }
}

/// Keystore format the driver expects for the CA truststore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruststoreFormat {
    Pem,
    Pkcs12,
}

impl TruststoreFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TruststoreFormat::Pem => "pem",
            TruststoreFormat::Pkcs12 => "p12",
        }
    }
}

/// How query parameters are attached to the JDBC base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `jdbc:mysql://h:p/db?a=1&b=2`
    Query,
    /// `jdbc:sqlserver://h:p;databaseName=db;a=1;b=2`
    Semicolon,
}

/// HTTP locations of provisioned TLS artifacts, as seen by the JDBC driver.
#[derive(Clone, Default)]
pub struct TlsUrls {
    pub ca_url: Option<String>,
    pub client_url: Option<String>,
    pub keystore_password: String,
}

impl fmt::Debug for TlsUrls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsUrls")
            .field("ca_url", &self.ca_url)
            .field("client_url", &self.client_url)
            .field("keystore_password", &"***")
            .finish()
    }
}

/// Per-dialect capabilities used by provisioning and import.
pub trait DialectProfile: Send + Sync {
    fn dialect(&self) -> Dialect;
    fn driver_class(&self) -> &'static str;
    /// Jar file name, resolved against the configured driver directory URL.
    fn driver_jar(&self) -> &'static str;
    fn truststore_format(&self) -> TruststoreFormat;
    fn param_style(&self) -> ParamStyle;
    fn jdbc_base(&self, host: &str, port: u16, database: &str) -> String;
    /// Connection parameters, including TLS ones when artifacts exist.
    fn jdbc_params(&self, tls: Option<&TlsUrls>) -> Vec<(String, String)>;
    fn quote_identifier(&self, ident: &str) -> String;

    fn warehouse_type(&self, source_type: &str) -> String {
        types::to_warehouse_type(self.dialect(), source_type)
    }

    fn jdbc_url(&self, host: &str, port: u16, database: &str, tls: Option<&TlsUrls>) -> String {
        let base = self.jdbc_base(host, port, database);
        let params = self.jdbc_params(tls);
        if params.is_empty() {
            return base;
        }
        let rendered: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        match self.param_style() {
            ParamStyle::Query => format!("{}?{}", base, rendered.join("&")),
            ParamStyle::Semicolon => format!("{};{}", base, rendered.join(";")),
        }
    }
}

fn kv(k: &str, v: impl Into<String>) -> (String, String) {
    (k.to_string(), v.into())
}

fn backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

pub struct MySqlProfile;

impl DialectProfile for MySqlProfile {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }
    fn driver_class(&self) -> &'static str {
        "com.mysql.cj.jdbc.Driver"
    }
    fn driver_jar(&self) -> &'static str {
        "mysql-connector-j-8.3.0.jar"
    }
    fn truststore_format(&self) -> TruststoreFormat {
        TruststoreFormat::Pkcs12
    }
    fn param_style(&self) -> ParamStyle {
        ParamStyle::Query
    }
    fn jdbc_base(&self, host: &str, port: u16, database: &str) -> String {
        format!("jdbc:mysql://{}:{}/{}", host, port, database)
    }
    fn jdbc_params(&self, tls: Option<&TlsUrls>) -> Vec<(String, String)> {
        let mut params = vec![
            kv("zeroDateTimeBehavior", "convertToNull"),
            kv("useCursorFetch", "true"),
        ];
        let Some(tls) = tls else {
            params.push(kv("useSSL", "false"));
            return params;
        };
        params.push(kv("useSSL", "true"));
        params.push(kv("requireSSL", "true"));
        if let Some(ca) = &tls.ca_url {
            params.push(kv("verifyServerCertificate", "true"));
            params.push(kv("trustCertificateKeyStoreUrl", ca.as_str()));
            params.push(kv("trustCertificateKeyStoreType", "PKCS12"));
            params.push(kv("trustCertificateKeyStorePassword", tls.keystore_password.as_str()));
        } else {
            params.push(kv("verifyServerCertificate", "false"));
        }
        if let Some(client) = &tls.client_url {
            params.push(kv("clientCertificateKeyStoreUrl", client.as_str()));
            params.push(kv("clientCertificateKeyStoreType", "PKCS12"));
            params.push(kv("clientCertificateKeyStorePassword", tls.keystore_password.as_str()));
        }
        params
    }
    fn quote_identifier(&self, ident: &str) -> String {
        backtick(ident)
    }
}

pub struct MariaDbProfile;

impl DialectProfile for MariaDbProfile {
    fn dialect(&self) -> Dialect {
        Dialect::MariaDb
    }
    fn driver_class(&self) -> &'static str {
        "org.mariadb.jdbc.Driver"
    }
    fn driver_jar(&self) -> &'static str {
        "mariadb-java-client-3.3.3.jar"
    }
    fn truststore_format(&self) -> TruststoreFormat {
        TruststoreFormat::Pem
    }
    fn param_style(&self) -> ParamStyle {
        ParamStyle::Query
    }
    fn jdbc_base(&self, host: &str, port: u16, database: &str) -> String {
        format!("jdbc:mariadb://{}:{}/{}", host, port, database)
    }
    fn jdbc_params(&self, tls: Option<&TlsUrls>) -> Vec<(String, String)> {
        let Some(tls) = tls else {
            return vec![kv("sslMode", "disable")];
        };
        let mut params = Vec::new();
        match &tls.ca_url {
            Some(ca) => {
                params.push(kv("sslMode", "verify-ca"));
                params.push(kv("serverSslCert", ca.as_str()));
            }
            None => params.push(kv("sslMode", "trust")),
        }
        if let Some(client) = &tls.client_url {
            params.push(kv("keyStore", client.as_str()));
            params.push(kv("keyStoreType", "PKCS12"));
            params.push(kv("keyStorePassword", tls.keystore_password.as_str()));
        }
        params
    }
    fn quote_identifier(&self, ident: &str) -> String {
        backtick(ident)
    }
}

/// Class name of the socket factory that fetches keystores over HTTP; the
/// Postgres driver has no URL-based keystore parameters of its own.
pub const POSTGRES_SSL_FACTORY: &str = "io.federa.jdbc.RemoteKeystoreSSLFactory";

pub struct PostgresProfile;

impl DialectProfile for PostgresProfile {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }
    fn driver_class(&self) -> &'static str {
        "org.postgresql.Driver"
    }
    fn driver_jar(&self) -> &'static str {
        "postgresql-42.7.3.jar"
    }
    fn truststore_format(&self) -> TruststoreFormat {
        TruststoreFormat::Pem
    }
    fn param_style(&self) -> ParamStyle {
        ParamStyle::Query
    }
    fn jdbc_base(&self, host: &str, port: u16, database: &str) -> String {
        format!("jdbc:postgresql://{}:{}/{}", host, port, database)
    }
    fn jdbc_params(&self, tls: Option<&TlsUrls>) -> Vec<(String, String)> {
        let Some(tls) = tls else {
            return vec![kv("sslmode", "disable")];
        };
        let mode = if tls.ca_url.is_some() { "verify-ca" } else { "require" };
        let mut factory_args = Vec::new();
        if let Some(ca) = &tls.ca_url {
            factory_args.push(format!("ca={}", ca));
        }
        if let Some(client) = &tls.client_url {
            factory_args.push(format!("client={}", client));
            factory_args.push(format!("password={}", tls.keystore_password));
        }
        vec![
            kv("ssl", "true"),
            kv("sslmode", mode),
            kv("sslfactory", POSTGRES_SSL_FACTORY),
            kv("sslfactoryarg", factory_args.join(",")),
        ]
    }
    fn quote_identifier(&self, ident: &str) -> String {
        ident.to_string()
    }
}

pub struct SqlServerProfile;

impl DialectProfile for SqlServerProfile {
    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }
    fn driver_class(&self) -> &'static str {
        "com.microsoft.sqlserver.jdbc.SQLServerDriver"
    }
    fn driver_jar(&self) -> &'static str {
        "mssql-jdbc-12.6.1.jre11.jar"
    }
    fn truststore_format(&self) -> TruststoreFormat {
        TruststoreFormat::Pkcs12
    }
    fn param_style(&self) -> ParamStyle {
        ParamStyle::Semicolon
    }
    fn jdbc_base(&self, host: &str, port: u16, database: &str) -> String {
        format!("jdbc:sqlserver://{}:{};databaseName={}", host, port, database)
    }
    fn jdbc_params(&self, tls: Option<&TlsUrls>) -> Vec<(String, String)> {
        let Some(tls) = tls else {
            return vec![kv("encrypt", "false")];
        };
        let mut params = vec![kv("encrypt", "true")];
        match &tls.ca_url {
            Some(ca) => {
                params.push(kv("trustServerCertificate", "false"));
                params.push(kv("trustStore", ca.as_str()));
                params.push(kv("trustStoreType", "PKCS12"));
                params.push(kv("trustStorePassword", tls.keystore_password.as_str()));
            }
            None => params.push(kv("trustServerCertificate", "true")),
        }
        if let Some(client) = &tls.client_url {
            params.push(kv("clientCertificate", client.as_str()));
            params.push(kv("clientKeyPassword", tls.keystore_password.as_str()));
        }
        params
    }
    fn quote_identifier(&self, ident: &str) -> String {
        ident.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls() -> TlsUrls {
        TlsUrls {
            ca_url: Some("http://files/tls/r1_ca.p12".to_string()),
            client_url: Some("http://files/tls/r1_client.p12".to_string()),
            keystore_password: "secret".to_string(),
        }
    }

    #[test]
    fn parses_dialect_names() {
        assert_eq!("MySQL".parse::<Dialect>().unwrap(), Dialect::MySql);
        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("mssql".parse::<Dialect>().unwrap(), Dialect::SqlServer);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn dialect_serde_names() {
        let d: Dialect = serde_json::from_str("\"postgresql\"").unwrap();
        assert_eq!(d, Dialect::Postgres);
        assert_eq!(serde_json::to_string(&Dialect::SqlServer).unwrap(), "\"sqlserver\"");
    }

    #[test]
    fn quoting_differs_per_dialect() {
        assert_eq!(Dialect::MySql.profile().quote_identifier("id"), "`id`");
        assert_eq!(Dialect::MariaDb.profile().quote_identifier("a`b"), "`a``b`");
        assert_eq!(Dialect::Postgres.profile().quote_identifier("id"), "id");
        assert_eq!(Dialect::SqlServer.profile().quote_identifier("id"), "id");
    }

    #[test]
    fn mysql_url_without_tls() {
        let url = Dialect::MySql.profile().jdbc_url("db.local", 3306, "shop", None);
        assert_eq!(
            url,
            "jdbc:mysql://db.local:3306/shop?zeroDateTimeBehavior=convertToNull&useCursorFetch=true&useSSL=false"
        );
    }

    #[test]
    fn mysql_url_with_pkcs12_keystores() {
        let url = Dialect::MySql.profile().jdbc_url("db.local", 3306, "shop", Some(&tls()));
        assert!(url.contains("useSSL=true"));
        assert!(url.contains("trustCertificateKeyStoreUrl=http://files/tls/r1_ca.p12"));
        assert!(url.contains("trustCertificateKeyStoreType=PKCS12"));
        assert!(url.contains("clientCertificateKeyStoreUrl=http://files/tls/r1_client.p12"));
    }

    #[test]
    fn postgres_uses_ssl_factory_argument_string() {
        let url = Dialect::Postgres.profile().jdbc_url("pg", 5432, "app", Some(&tls()));
        assert!(url.starts_with("jdbc:postgresql://pg:5432/app?ssl=true&sslmode=verify-ca"));
        assert!(url.contains(&format!("sslfactory={}", POSTGRES_SSL_FACTORY)));
        assert!(url.contains(
            "sslfactoryarg=ca=http://files/tls/r1_ca.p12,client=http://files/tls/r1_client.p12,password=secret"
        ));
    }

    #[test]
    fn sqlserver_uses_semicolon_parameters() {
        let url = Dialect::SqlServer.profile().jdbc_url("mssql", 1433, "erp", Some(&tls()));
        assert!(url.starts_with("jdbc:sqlserver://mssql:1433;databaseName=erp;encrypt=true"));
        assert!(url.contains(";trustStore=http://files/tls/r1_ca.p12;"));
        let plain = Dialect::SqlServer.profile().jdbc_url("mssql", 1433, "erp", None);
        assert_eq!(plain, "jdbc:sqlserver://mssql:1433;databaseName=erp;encrypt=false");
    }

    #[test]
    fn truststore_formats() {
        assert_eq!(Dialect::MySql.profile().truststore_format(), TruststoreFormat::Pkcs12);
        assert_eq!(Dialect::SqlServer.profile().truststore_format(), TruststoreFormat::Pkcs12);
        assert_eq!(Dialect::Postgres.profile().truststore_format(), TruststoreFormat::Pem);
        assert_eq!(Dialect::MariaDb.profile().truststore_format(), TruststoreFormat::Pem);
    }

    #[test]
    fn tls_urls_debug_redacts_password() {
        let rendered = format!("{:?}", tls());
        assert!(!rendered.contains("secret"));
    }
}
