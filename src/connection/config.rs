use std::time::Duration;

pub const URI_SCHEME: &str = "memdoc://";
pub const DEFAULT_PORT: u16 = 27017;

/// Endpoint and pool configuration
///
/// Mirrors the options understood in a connection string.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Default database named in the URI, if any
    pub database: Option<String>,

    /// Time to wait for a free pooled connection
    pub connect_timeout: Duration,

    /// Maximum number of connections in pool
    pub max_connections: usize,

    /// Minimum number of connections kept open
    pub min_connections: usize,

    /// Connection idle timeout
    pub idle_timeout: Option<Duration>,

    /// Maximum connection lifetime
    pub max_lifetime: Option<Duration>,
}

impl ConnectionConfig {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: DEFAULT_PORT,
            database: None,
            connect_timeout: Duration::from_secs(30),
            max_connections: 10,
            min_connections: 0,
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Endpoint address (`host:port`) the pool connects to
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse from connection string
    ///
    /// Format: `memdoc://host[:port][/database][?option=value&...]`
    ///
    /// Supported options: `maxPoolSize`, `minPoolSize`, `connectTimeoutMS`,
    /// `maxIdleTimeMS`, `maxLifeTimeMS`.
    ///
    /// # Examples
    ///
    /// ```
    /// use docbulk::ConnectionConfig;
    ///
    /// let config = ConnectionConfig::from_uri("memdoc://localhost:27017/chain?maxPoolSize=4").unwrap();
    /// assert_eq!(config.max_connections, 4);
    /// ```
    pub fn from_uri(uri: &str) -> Result<Self, String> {
        let rest = uri
            .strip_prefix(URI_SCHEME)
            .ok_or_else(|| format!("URI must start with '{URI_SCHEME}'"))?;

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        let (host_port, database) = match location.split_once('/') {
            Some((host_port, database)) => (host_port, Some(database)),
            None => (location, None),
        };

        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => (
                host,
                port.parse().map_err(|_| format!("Invalid port '{port}'"))?,
            ),
            None => (host_port, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err("URI is missing a host".to_string());
        }

        let mut config = Self::new(host).port(port);
        if let Some(database) = database.filter(|name| !name.is_empty()) {
            config = config.database(database);
        }

        for option in query.into_iter().flat_map(|q| q.split('&')).filter(|o| !o.is_empty()) {
            let (key, value) = option
                .split_once('=')
                .ok_or_else(|| format!("Invalid option '{option}'"))?;
            let number: u64 = value
                .parse()
                .map_err(|_| format!("Option '{key}' expects a number, got '{value}'"))?;
            config = match key {
                "maxPoolSize" => config.max_connections(number as usize),
                "minPoolSize" => config.min_connections(number as usize),
                "connectTimeoutMS" => config.connect_timeout(Duration::from_millis(number)),
                "maxIdleTimeMS" => config.idle_timeout(Duration::from_millis(number)),
                "maxLifeTimeMS" => config.max_lifetime(Duration::from_millis(number)),
                _ => return Err(format!("Unknown option '{key}'")),
            };
        }

        Ok(config)
    }

    /// Convert to connection string
    pub fn to_uri(&self) -> String {
        format!(
            "{}{}/{}?maxPoolSize={}&minPoolSize={}&connectTimeoutMS={}",
            URI_SCHEME,
            self.address(),
            self.database.as_deref().unwrap_or_default(),
            self.max_connections,
            self.min_connections,
            self.connect_timeout.as_millis()
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("host cannot be empty".to_string());
        }

        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }

        if self.min_connections > self.max_connections {
            return Err("min_connections cannot exceed max_connections".to_string());
        }

        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}

/// Engine level tuning
#[derive(Debug, Clone)]
pub struct BulkWriterConfig {
    /// Largest number of operations submitted in one round trip; larger
    /// partitions are sent as consecutive sub-batches on the same connection.
    pub max_batch_size: usize,
}

impl BulkWriterConfig {
    pub const DEFAULT_MAX_BATCH_SIZE: usize = 100_000;

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_size == 0 {
            return Err("max_batch_size must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for BulkWriterConfig {
    fn default() -> Self {
        Self {
            max_batch_size: Self::DEFAULT_MAX_BATCH_SIZE,
        }
    }
}
