use crate::errors::{FsError, FsResult};
use std::{collections::HashMap, env, str::FromStr, time::Duration};

pub const DEFAULT_CONTAINER: &str = "objectfs";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_HTTPS_PORT: u16 = 443;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_RETRY_COUNT: u32 = 3;
/// Just under the 5 GiB single-object ceiling of Swift-style stores.
pub const DEFAULT_PARTITION_SIZE: u64 = 4608 * 1024 * 1024;
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_BLOCK_SIZE: u64 = 32 * 1024 * 1024;
pub const DEFAULT_LOOKAHEAD: u64 = 64 * 1024;

/// Physical layout of files inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Layout {
    /// One object per file (manifest + parts once it outgrows `partition_size`).
    #[default]
    Flat,
    /// An inode object per file referencing fixed-size block objects.
    Block,
}

impl FromStr for Layout {
    type Err = FsError;

    fn from_str(s: &str) -> FsResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(Layout::Flat),
            "block" => Ok(Layout::Block),
            other => Err(FsError::Configuration(format!(
                "unknown layout `{other}` (expected `flat` or `block`)"
            ))),
        }
    }
}

/// Everything one mounted filesystem needs to talk to the store.
#[derive(Clone)]
pub struct FsConfig {
    pub auth_url: String,
    pub tenant: String,
    pub username: String,
    pub password: String,
    pub region: Option<String>,
    pub container: String,
    pub http_port: u16,
    pub https_port: u16,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub retry_count: u32,
    pub partition_size: u64,
    pub buffer_size: usize,
    pub block_size: u64,
    pub lookahead: u64,
    pub layout: Layout,
}

impl std::fmt::Debug for FsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsConfig")
            .field("auth_url", &self.auth_url)
            .field("tenant", &self.tenant)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("region", &self.region)
            .field("container", &self.container)
            .field("retry_count", &self.retry_count)
            .field("partition_size", &self.partition_size)
            .field("block_size", &self.block_size)
            .field("layout", &self.layout)
            .finish()
    }
}

/// Connection flags shared by every CLI subcommand.
#[derive(clap::Args, Debug, Default)]
pub struct Args {
    /// Authentication endpoint (overrides OBJECTFS_AUTH_URL)
    #[arg(long, global = true)]
    pub auth_url: Option<String>,

    /// Tenant name (overrides OBJECTFS_TENANT)
    #[arg(long, global = true)]
    pub tenant: Option<String>,

    /// User name (overrides OBJECTFS_USERNAME)
    #[arg(long, global = true)]
    pub username: Option<String>,

    /// Password (overrides OBJECTFS_PASSWORD)
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Endpoint region to select from the service catalog (overrides OBJECTFS_REGION)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Container holding the filesystem (overrides OBJECTFS_CONTAINER)
    #[arg(long, global = true)]
    pub container: Option<String>,

    /// Physical file layout (overrides OBJECTFS_LAYOUT)
    #[arg(long, value_enum, global = true)]
    pub layout: Option<Layout>,
}

impl FsConfig {
    /// Minimal config with every optional setting at its default.
    pub fn new(
        auth_url: impl Into<String>,
        tenant: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            auth_url: auth_url.into(),
            tenant: tenant.into(),
            username: username.into(),
            password: password.into(),
            region: None,
            container: DEFAULT_CONTAINER.into(),
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            retry_count: DEFAULT_RETRY_COUNT,
            partition_size: DEFAULT_PARTITION_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            lookahead: DEFAULT_LOOKAHEAD,
            layout: Layout::Flat,
        }
    }

    /// Build a config from `objectfs.*` properties, the form a host framework hands over.
    pub fn from_properties(props: &HashMap<String, String>) -> FsResult<Self> {
        let required = |key: &str| -> FsResult<String> {
            props
                .get(key)
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .ok_or_else(|| FsError::Configuration(format!("missing required property `{key}`")))
        };

        let mut cfg = Self::new(
            required("objectfs.auth.url")?,
            required("objectfs.tenant")?,
            required("objectfs.username")?,
            required("objectfs.password")?,
        );

        cfg.region = props.get("objectfs.region").filter(|v| !v.is_empty()).cloned();
        if let Some(container) = props.get("objectfs.container") {
            cfg.container = container.clone();
        }
        if let Some(v) = parse_prop(props, "objectfs.http.port")? {
            cfg.http_port = v;
        }
        if let Some(v) = parse_prop(props, "objectfs.https.port")? {
            cfg.https_port = v;
        }
        if let Some(ms) = parse_prop::<u64>(props, "objectfs.connect.timeout")? {
            cfg.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_prop::<u64>(props, "objectfs.request.timeout")? {
            cfg.request_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = parse_prop(props, "objectfs.retry.count")? {
            cfg.retry_count = v;
        }
        if let Some(v) = parse_prop(props, "objectfs.partition.size")? {
            cfg.partition_size = v;
        }
        if let Some(v) = parse_prop(props, "objectfs.buffer.size")? {
            cfg.buffer_size = v;
        }
        if let Some(v) = parse_prop(props, "objectfs.block.size")? {
            cfg.block_size = v;
        }
        if let Some(v) = parse_prop(props, "objectfs.lookahead")? {
            cfg.lookahead = v;
        }
        if let Some(layout) = props.get("objectfs.layout") {
            cfg.layout = layout.parse()?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Merge CLI flags over `OBJECTFS_*` environment variables.
    pub fn from_env_and_args(args: Args) -> FsResult<Self> {
        let from_env = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());
        let required = |flag: Option<String>, name: &str| -> FsResult<String> {
            flag.or_else(|| from_env(name))
                .ok_or_else(|| FsError::Configuration(format!("set --{} or {name}", flag_name(name))))
        };

        let mut cfg = Self::new(
            required(args.auth_url, "OBJECTFS_AUTH_URL")?,
            required(args.tenant, "OBJECTFS_TENANT")?,
            required(args.username, "OBJECTFS_USERNAME")?,
            required(args.password, "OBJECTFS_PASSWORD")?,
        );
        cfg.region = args.region.or_else(|| from_env("OBJECTFS_REGION"));
        if let Some(container) = args.container.or_else(|| from_env("OBJECTFS_CONTAINER")) {
            cfg.container = container;
        }
        cfg.layout = match args.layout {
            Some(layout) => layout,
            None => match from_env("OBJECTFS_LAYOUT") {
                Some(value) => value.parse()?,
                None => Layout::Flat,
            },
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> FsResult<()> {
        if self.container.is_empty() || self.container.contains('/') {
            return Err(FsError::Configuration(format!(
                "invalid container name `{}`",
                self.container
            )));
        }
        if self.partition_size == 0 || self.block_size == 0 || self.lookahead == 0 {
            return Err(FsError::Configuration(
                "partition, block and lookahead sizes must be positive".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(FsError::Configuration("buffer size must be positive".into()));
        }
        url::Url::parse(&self.auth_url).map_err(|err| {
            FsError::Configuration(format!("invalid auth url `{}`: {err}", self.auth_url))
        })?;
        Ok(())
    }
}

fn parse_prop<T: FromStr>(props: &HashMap<String, String>, key: &str) -> FsResult<Option<T>> {
    match props.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            FsError::Configuration(format!("cannot parse property `{key}` value `{raw}`"))
        }),
    }
}

fn flag_name(env_name: &str) -> String {
    env_name
        .trim_start_matches("OBJECTFS_")
        .to_ascii_lowercase()
        .replace('_', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_props() -> HashMap<String, String> {
        [
            ("objectfs.auth.url", "http://127.0.0.1:5000/v2.0/tokens"),
            ("objectfs.tenant", "demo"),
            ("objectfs.username", "alice"),
            ("objectfs.password", "secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn properties_fill_defaults() {
        let cfg = FsConfig::from_properties(&base_props()).unwrap();
        assert_eq!(cfg.container, DEFAULT_CONTAINER);
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.https_port, 443);
        assert_eq!(cfg.retry_count, 3);
        assert_eq!(cfg.layout, Layout::Flat);
        assert!(cfg.region.is_none());
    }

    #[test]
    fn properties_override_defaults() {
        let mut props = base_props();
        props.insert("objectfs.region".into(), "RegionTwo".into());
        props.insert("objectfs.partition.size".into(), "1024".into());
        props.insert("objectfs.layout".into(), "BLOCK".into());
        props.insert("objectfs.connect.timeout".into(), "250".into());

        let cfg = FsConfig::from_properties(&props).unwrap();
        assert_eq!(cfg.region.as_deref(), Some("RegionTwo"));
        assert_eq!(cfg.partition_size, 1024);
        assert_eq!(cfg.layout, Layout::Block);
        assert_eq!(cfg.connect_timeout, Duration::from_millis(250));
    }

    #[test]
    fn missing_required_property_is_configuration_error() {
        let mut props = base_props();
        props.remove("objectfs.password");
        let err = FsConfig::from_properties(&props).unwrap_err();
        assert!(matches!(err, FsError::Configuration(msg) if msg.contains("objectfs.password")));
    }

    #[test]
    fn unparsable_value_is_rejected() {
        let mut props = base_props();
        props.insert("objectfs.http.port".into(), "eighty".into());
        assert!(matches!(
            FsConfig::from_properties(&props),
            Err(FsError::Configuration(_))
        ));
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let mut props = base_props();
        props.insert("objectfs.block.size".into(), "0".into());
        assert!(FsConfig::from_properties(&props).is_err());
    }

    #[test]
    fn debug_output_hides_password() {
        let cfg = FsConfig::from_properties(&base_props()).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("secret"));
    }
}
