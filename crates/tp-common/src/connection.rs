//! Database connection parameters.
//!
//! The engine never opens connections itself; these parameters are only
//! rendered into the OGR-style PostGIS DSN that external tools consume.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbParams {
    pub dbname: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl DbParams {
    pub fn new(dbname: &str, host: &str, port: u16, user: &str) -> Self {
        DbParams {
            dbname: dbname.to_string(),
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// `PG:dbname=.. host=.. port=.. user=.. [password=..]`
    pub fn dsn(&self) -> String {
        let mut dsn = format!(
            "PG:dbname={} host={} port={} user={}",
            self.dbname, self.host, self.port, self.user
        );
        if let Some(password) = &self.password {
            dsn.push_str(&format!(" password={}", password));
        }
        dsn
    }

    /// DSN restricted to one schema and table, as 3dfier reads its polygons.
    pub fn postgis_dsn(&self, schema: &str, table: &str) -> String {
        format!("{} schemas={} tables={}", self.dsn(), schema, table)
    }
}

impl fmt::Debug for DbParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbParams")
            .field("dbname", &self.dbname)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dsn_without_password() {
        let db = DbParams::new("bag", "localhost", 5432, "batch3dfier");
        assert_eq!(db.dsn(), "PG:dbname=bag host=localhost port=5432 user=batch3dfier");
    }

    #[test]
    fn test_postgis_dsn_with_password() {
        let db = DbParams::new("bag", "localhost", 5432, "batch3dfier").with_password("s3cret");
        assert_eq!(
            db.postgis_dsn("bagactueel", "pandactueelbestaand"),
            "PG:dbname=bag host=localhost port=5432 user=batch3dfier password=s3cret \
             schemas=bagactueel tables=pandactueelbestaand"
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let db = DbParams::new("bag", "localhost", 5432, "u").with_password("s3cret");
        let dbg = format!("{:?}", db);
        assert!(!dbg.contains("s3cret"));
        assert!(dbg.contains("[redacted]"));
    }
}
