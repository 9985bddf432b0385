use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub api: Api,
    #[serde(default)]
    pub returns: Vec<ReportDefinition>,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub output: Output,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()
            .with_context(|| format!("invalid config: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.url.trim().is_empty() {
            bail!("api.url is empty");
        }
        if self.returns.is_empty() {
            bail!("no [[returns]] configured");
        }

        let safe = Regex::new(r"^[A-Za-z0-9_.-]+$")?;
        let mut seen = BTreeSet::new();
        for r in &self.returns {
            if !safe.is_match(&r.name) {
                bail!(
                    "return name {:?} must be non-empty and contain only [A-Za-z0-9_.-]",
                    r.name
                );
            }
            if !seen.insert(r.name.as_str()) {
                bail!("duplicate return name: {}", r.name);
            }
            if r.query.trim().is_empty() {
                bail!("return {} has an empty query", r.name);
            }
            if r.token.trim().is_empty() {
                bail!("return {} has an empty token", r.name);
            }
        }
        Ok(())
    }

    pub fn report(&self, name: &str) -> Result<&ReportDefinition> {
        self.returns
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| anyhow!("unknown return: {name}"))
    }

    /// Reports to process, in configuration order. An empty filter selects all of them.
    pub fn selected_reports(&self, only: &[String]) -> Result<Vec<ReportDefinition>> {
        for name in only {
            self.report(name)?;
        }
        Ok(self
            .returns
            .iter()
            .filter(|r| only.is_empty() || only.contains(&r.name))
            .cloned()
            .collect())
    }

    /// Copy of the config with credentials masked, for printing.
    pub fn redacted(&self) -> Config {
        let mut cfg = self.clone();
        if !cfg.database.password.is_empty() {
            cfg.database.password = REDACTED.into();
        }
        for r in &mut cfg.returns {
            r.token = REDACTED.into();
        }
        cfg
    }
}

const REDACTED: &str = "<redacted>";

/// One unit of extract-and-submit work.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDefinition {
    pub name: String,
    pub query: String,
    pub token: String,
}

impl std::fmt::Debug for ReportDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportDefinition")
            .field("name", &self.name)
            .field("query", &self.query)
            .field("token", &REDACTED)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub schema: String,
    pub driver: String,
    pub use_windows_auth: bool,
    pub login_timeout_seconds: u32,
    pub query_timeout_seconds: u32,
}
impl Default for Database {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1433,
            user: "".into(),
            password: "".into(),
            database: "".into(),
            schema: "dbo".into(),
            driver: "ODBC Driver 17 for SQL Server".into(),
            use_windows_auth: false,
            login_timeout_seconds: 30,
            query_timeout_seconds: 0,
        }
    }
}

impl Database {
    pub fn is_sqlite(&self) -> bool {
        self.driver.eq_ignore_ascii_case("sqlite")
    }

    /// ODBC connection string. With Windows auth the credentials are left out
    /// and the driver uses the process identity.
    pub fn odbc_connection_string(&self) -> String {
        let mut s = format!(
            "Driver={{{}}};Server={},{};Database={};",
            self.driver, self.host, self.port, self.database
        );
        if self.use_windows_auth {
            s.push_str("Trusted_Connection=yes;");
        } else {
            s.push_str(&format!(
                "UID={};PWD={};Trusted_Connection=no;",
                odbc_value(&self.user),
                odbc_value(&self.password)
            ));
        }
        s
    }
}

/// Values containing `;` or braces must be wrapped in braces, with `}` doubled.
fn odbc_value(v: &str) -> String {
    if v.contains([';', '{', '}']) || v.starts_with(' ') || v.ends_with(' ') {
        format!("{{{}}}", v.replace('}', "}}"))
    } else {
        v.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Api {
    pub url: String,
    pub timeout_seconds: u64,
    pub user_agent: String,
}
impl Default for Api {
    fn default() -> Self {
        Self {
            url: "".into(),
            timeout_seconds: 300,
            user_agent: concat!("returns-submitter/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub csv_dir: String,
    pub api_response_dir: String,
    pub log_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            csv_dir: "out/csv".into(),
            api_response_dir: "out/api_responses".into(),
            log_dir: "out/logs".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_prefix: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_prefix: "returns_submission".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub print_summary: bool,
    pub write_run_report: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            print_summary: true,
            write_run_report: true,
        }
    }
}
