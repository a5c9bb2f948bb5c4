use quai_rpc::CallOptions;
use serde::Deserialize;
use std::{env, fs, time::Duration};

/// JSON-RPC method names consumed from the node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MethodNames {
    pub block_number: String,
    pub miner_difficulty: String,
    pub best_difficulty: String,
    pub header: String,
    pub quai_to_qi: String,
    pub qi_to_quai: String,
}

impl Default for MethodNames {
    fn default() -> Self {
        Self {
            block_number: "quai_blockNumber".to_string(),
            miner_difficulty: "quai_getMinerDifficulty".to_string(),
            best_difficulty: "quai_getBestDifficulty".to_string(),
            header: "quai_getHeaderByNumber".to_string(),
            quai_to_qi: "quai_quaiToQi".to_string(),
            qi_to_quai: "quai_qiToQuai".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node_url: String,
    pub web_server_address: String,
    pub methods: MethodNames,
    pub window_length: u64,
    pub chunk_size: usize,
    pub max_items_per_post: usize,
    pub bulk_timeout_secs: u64,
    pub lookup_timeout_secs: u64,
    pub retries: u32,
    pub pool_idle_timeout_secs: u64,
    pub allow_approximate: bool,
    pub auto_enabled: bool,
    pub auto_interval_secs: u64,
    pub log_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ViewerConfig {
    #[serde(default)]
    node: NodeConfig,
    #[serde(default)]
    rpc: RpcConfig,
    #[serde(default)]
    window: WindowConfig,
    #[serde(default)]
    auto: AutoConfig,
    #[serde(default)]
    server: ServerConfig,
}

#[derive(Debug, Deserialize)]
struct NodeConfig {
    url: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: Some("http://127.0.0.1:9001".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcConfig {
    max_items_per_post: Option<usize>,
    bulk_timeout_secs: Option<u64>,
    lookup_timeout_secs: Option<u64>,
    retries: Option<u32>,
    pool_idle_timeout_secs: Option<u64>,
    #[serde(default)]
    methods: MethodNames,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_items_per_post: Some(2000),
            bulk_timeout_secs: Some(120),
            lookup_timeout_secs: Some(12),
            retries: Some(2),
            pool_idle_timeout_secs: Some(300),
            methods: MethodNames::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WindowConfig {
    length: Option<u64>,
    chunk_size: Option<usize>,
    allow_approximate: Option<bool>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            length: Some(4000),
            chunk_size: Some(200),
            allow_approximate: Some(true),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AutoConfig {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
}

impl Default for AutoConfig {
    fn default() -> Self {
        Self {
            enabled: Some(false),
            interval_secs: Some(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerConfig {
    listen_address: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: Some("127.0.0.1:8090".to_string()),
        }
    }
}

fn flag_value<'a>(args: &'a [String], names: &[&str]) -> Option<&'a String> {
    args.iter()
        .position(|arg| names.contains(&arg.as_str()))
        .and_then(|i| args.get(i + 1))
}

fn parse_flag<T: std::str::FromStr>(
    args: &[String],
    names: &[&str],
) -> Result<Option<T>, Box<dyn std::error::Error>> {
    match flag_value(args, names) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| format!("Invalid value for {}: {}", names[0], raw).into()),
        None => Ok(None),
    }
}

impl Config {
    pub fn from_args() -> Result<Self, Box<dyn std::error::Error>> {
        let args: Vec<String> = env::args().collect();
        Self::from_arg_list(&args)
    }

    pub fn from_arg_list(args: &[String]) -> Result<Self, Box<dyn std::error::Error>> {
        let log_file = flag_value(args, &["--log-file", "-f"]).cloned();

        // Load viewer config file (can be overridden via CLI)
        let config_path = flag_value(args, &["--config", "-c"])
            .map(|s| s.as_str())
            .unwrap_or("config/kquai-viewer.config.toml");

        let config_str = fs::read_to_string(config_path).unwrap_or_default();
        let file_config: ViewerConfig = if config_str.is_empty() {
            ViewerConfig::default()
        } else {
            toml::from_str(&config_str)?
        };

        Self::merge(args, file_config, log_file)
    }

    fn merge(
        args: &[String],
        file_config: ViewerConfig,
        log_file: Option<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let rpc_defaults = RpcConfig::default();
        let window_defaults = WindowConfig::default();
        let auto_defaults = AutoConfig::default();

        let node_url = flag_value(args, &["--node-url", "-n"])
            .cloned()
            .or(file_config.node.url)
            .ok_or("Missing required config: node.url")?;

        let web_server_address = flag_value(args, &["--web-address", "-w"])
            .cloned()
            .or(file_config.server.listen_address)
            .ok_or("Missing required config: server.listen_address")?;

        let window_length = parse_flag(args, &["--window"])?
            .or(file_config.window.length)
            .or(window_defaults.length)
            .unwrap_or(4000);
        if window_length == 0 {
            return Err("window.length must be positive".into());
        }

        let chunk_size = parse_flag(args, &["--chunk-size"])?
            .or(file_config.window.chunk_size)
            .or(window_defaults.chunk_size)
            .unwrap_or(200);
        if chunk_size == 0 {
            return Err("window.chunk_size must be positive".into());
        }

        let max_items_per_post = file_config
            .rpc
            .max_items_per_post
            .or(rpc_defaults.max_items_per_post)
            .unwrap_or(2000);
        if max_items_per_post == 0 {
            return Err("rpc.max_items_per_post must be positive".into());
        }

        let auto_enabled = args.iter().any(|arg| arg == "--auto")
            || file_config
                .auto
                .enabled
                .or(auto_defaults.enabled)
                .unwrap_or(false);

        Ok(Config {
            node_url,
            web_server_address,
            methods: file_config.rpc.methods,
            window_length,
            chunk_size,
            max_items_per_post,
            bulk_timeout_secs: file_config
                .rpc
                .bulk_timeout_secs
                .or(rpc_defaults.bulk_timeout_secs)
                .unwrap_or(120),
            lookup_timeout_secs: file_config
                .rpc
                .lookup_timeout_secs
                .or(rpc_defaults.lookup_timeout_secs)
                .unwrap_or(12),
            retries: file_config.rpc.retries.or(rpc_defaults.retries).unwrap_or(2),
            pool_idle_timeout_secs: file_config
                .rpc
                .pool_idle_timeout_secs
                .or(rpc_defaults.pool_idle_timeout_secs)
                .unwrap_or(300),
            allow_approximate: file_config
                .window
                .allow_approximate
                .or(window_defaults.allow_approximate)
                .unwrap_or(true),
            auto_enabled,
            auto_interval_secs: file_config
                .auto
                .interval_secs
                .or(auto_defaults.interval_secs)
                .unwrap_or(10),
            log_file,
        })
    }

    /// Timeout and retries for bulk historical batches.
    pub fn bulk_options(&self) -> CallOptions {
        CallOptions::new(Duration::from_secs(self.bulk_timeout_secs), self.retries)
    }

    /// Timeout and retries for single-value lookups.
    pub fn lookup_options(&self) -> CallOptions {
        CallOptions::new(Duration::from_secs(self.lookup_timeout_secs), self.retries)
    }

    pub fn auto_interval(&self) -> Duration {
        Duration::from_secs(self.auto_interval_secs)
    }

    /// Chart age after which `/health` reports unhealthy. Only the auto loop
    /// keeps the chart fresh, so manual mode never goes stale.
    pub fn stale_after_secs(&self) -> Option<u64> {
        self.auto_enabled.then(|| {
            self.auto_interval_secs
                .saturating_mul(3)
                .saturating_add(self.bulk_timeout_secs)
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_url: "http://127.0.0.1:9001".to_string(),
            web_server_address: "127.0.0.1:8090".to_string(),
            methods: MethodNames::default(),
            window_length: 4000,
            chunk_size: 200,
            max_items_per_post: 2000,
            bulk_timeout_secs: 120,
            lookup_timeout_secs: 12,
            retries: 2,
            pool_idle_timeout_secs: 300,
            allow_approximate: true,
            auto_enabled: false,
            auto_interval_secs: 10,
            log_file: None,
        }
    }
}
