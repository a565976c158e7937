use std::{
    env, fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use serde::Serialize;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 0.9;
pub const DEFAULT_TOP_K: u32 = 40;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Wire dialect spoken by the inference backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendFlavor {
    Ollama,
    OpenAi,
}

impl BackendFlavor {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendFlavor::Ollama => "ollama",
            BackendFlavor::OpenAi => "openai",
        }
    }
}

impl fmt::Display for BackendFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendFlavor {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "ollama" => Ok(BackendFlavor::Ollama),
            "openai" | "openai-compatible" => Ok(BackendFlavor::OpenAi),
            other => anyhow::bail!("unknown backend flavor '{other}' (expected ollama or openai)"),
        }
    }
}

/// Decoding parameters applied when a request leaves one unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodingDefaults {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_tokens: u32,
}

impl Default for DecodingDefaults {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            top_k: DEFAULT_TOP_K,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub flavor: BackendFlavor,
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub pull_timeout: Duration,
    pub decoding: DecodingDefaults,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));

        let flavor = match env::var("BACKEND_FLAVOR") {
            Ok(raw) => raw.parse()?,
            Err(_) => BackendFlavor::Ollama,
        };

        let base_url = env::var("OLLAMA_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_key = env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty());

        let request_timeout = secs_var("REQUEST_TIMEOUT_SECS", 30);
        let connect_timeout = secs_var("CONNECT_TIMEOUT_SECS", 5);
        let pull_timeout = secs_var("PULL_TIMEOUT_SECS", 3600);

        let decoding = DecodingDefaults {
            temperature: parsed_var("TEMPERATURE").unwrap_or(DEFAULT_TEMPERATURE),
            top_p: parsed_var("TOP_P").unwrap_or(DEFAULT_TOP_P),
            top_k: parsed_var("TOP_K").unwrap_or(DEFAULT_TOP_K),
            max_tokens: parsed_var("MAX_TOKENS").unwrap_or(DEFAULT_MAX_TOKENS),
        };

        Ok(Self {
            listen_addr,
            flavor,
            base_url: normalize_base_url(&base_url),
            api_key,
            request_timeout,
            connect_timeout,
            pull_timeout,
            decoding,
        })
    }

    /// Configuration pointing at `base_url` with every other knob at its default.
    pub fn for_backend(flavor: BackendFlavor, base_url: &str) -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            flavor,
            base_url: normalize_base_url(base_url),
            api_key: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            pull_timeout: Duration::from_secs(3600),
            decoding: DecodingDefaults::default(),
        }
    }
}

fn parsed_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn secs_var(name: &str, default: u64) -> Duration {
    parsed_var(name)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
