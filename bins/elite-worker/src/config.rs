// Worker settings and language toolchain configuration
use anyhow::{bail, Context, Result};
use elite_common::config::BrokerConfig;
use elite_common::types::Language;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::languages;

pub const DEFAULT_LANGUAGES_CONFIG: &str = "config/languages.json";
pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:9090";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub broker: BrokerConfig,
    /// Worker tasks in this process, each with its own broker connection
    pub concurrency: usize,
    pub health_addr: SocketAddr,
    pub languages_config: PathBuf,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let concurrency = match lookup("WORKER_CONCURRENCY") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("WORKER_CONCURRENCY must be a positive integer, got {:?}", raw))?,
            None => 1,
        };

        let health_addr = lookup("WORKER_HEALTH_ADDR").unwrap_or_else(|| DEFAULT_HEALTH_ADDR.to_string());
        let health_addr = health_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid WORKER_HEALTH_ADDR: {}", health_addr))?;

        Ok(Self {
            broker: BrokerConfig::from_lookup(&lookup),
            concurrency,
            health_addr,
            languages_config: lookup("LANGUAGES_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LANGUAGES_CONFIG)),
        })
    }
}

/// How a program receives a test case's input elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputChannel {
    /// Elements joined by newlines on stdin
    #[default]
    Stdin,
    /// Elements as positional arguments
    Args,
}

/// Everything needed to build and run one language.
///
/// Command templates may use `{dir}` (workspace directory), `{src}` (source
/// file path) and `{bin}` (compiled artifact path).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toolchain {
    pub source_file: String,
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
    #[serde(default)]
    pub input: InputChannel,
}

impl Toolchain {
    /// Substitute workspace paths into a command template.
    pub fn expand(template: &[String], dir: &Path, src: &Path, bin: &Path) -> Vec<String> {
        template
            .iter()
            .map(|arg| {
                arg.replace("{dir}", &dir.to_string_lossy())
                    .replace("{src}", &src.to_string_lossy())
                    .replace("{bin}", &bin.to_string_lossy())
            })
            .collect()
    }

    fn validate(&self, language: Language) -> Result<()> {
        if self.source_file.trim().is_empty() {
            bail!("{}: source_file is empty", language);
        }
        if self.run.is_empty() {
            bail!("{}: run command is empty", language);
        }
        if matches!(&self.compile, Some(cmd) if cmd.is_empty()) {
            bail!("{}: compile command is empty (omit it for interpreted languages)", language);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub toolchain: Toolchain,
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Toolchains for the closed language set. Lookup is total: a manager can
/// only be built when every language is covered.
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    cpp: Toolchain,
    java: Toolchain,
    python: Toolchain,
    rust: Toolchain,
    /// Where the toolchains came from, for logs
    source: String,
}

impl LanguageConfigManager {
    /// Built-in toolchains
    pub fn builtin() -> Self {
        Self {
            cpp: languages::default_toolchain(Language::Cpp),
            java: languages::default_toolchain(Language::Java),
            python: languages::default_toolchain(Language::Python),
            rust: languages::default_toolchain(Language::Rust),
            source: "built-in".to_string(),
        }
    }

    /// Load toolchains from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid language config {}", config_path.display()))
            .map(|mut manager| {
                manager.source = config_path.display().to_string();
                manager
            })
    }

    /// Load from `config_path`, or fall back to the built-in toolchains when
    /// the file does not exist. A file that exists but is invalid is an error.
    pub fn load_or_builtin(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            warn!(path = %config_path.display(), "Language config not found, using built-in toolchains");
            Ok(Self::builtin())
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson =
            serde_json::from_str(content).context("Failed to parse languages.json")?;

        let mut cpp = None;
        let mut java = None;
        let mut python = None;
        let mut rust = None;

        for entry in languages_json.languages {
            let language: Language = entry
                .name
                .parse()
                .with_context(|| format!("Unknown language in config: {}", entry.name))?;
            entry.toolchain.validate(language)?;

            let slot = match language {
                Language::Cpp => &mut cpp,
                Language::Java => &mut java,
                Language::Python => &mut python,
                Language::Rust => &mut rust,
            };
            if slot.replace(entry.toolchain).is_some() {
                bail!("Language configured twice: {}", language);
            }
        }

        let missing: Vec<String> = [
            (Language::Cpp, cpp.is_none()),
            (Language::Java, java.is_none()),
            (Language::Python, python.is_none()),
            (Language::Rust, rust.is_none()),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(lang, _)| lang.to_string())
        .collect();

        match (cpp, java, python, rust) {
            (Some(cpp), Some(java), Some(python), Some(rust)) => Ok(Self {
                cpp,
                java,
                python,
                rust,
                source: "inline".to_string(),
            }),
            _ => bail!("No toolchain configured for: {}", missing.join(", ")),
        }
    }

    /// Toolchain for a language
    pub fn toolchain(&self, language: Language) -> &Toolchain {
        match language {
            Language::Cpp => &self.cpp,
            Language::Java => &self.java,
            Language::Python => &self.python,
            Language::Rust => &self.rust,
        }
    }

    /// Replace one toolchain (used to point tests at portable commands)
    pub fn with_toolchain(mut self, language: Language, toolchain: Toolchain) -> Self {
        match language {
            Language::Cpp => self.cpp = toolchain,
            Language::Java => self.java = toolchain,
            Language::Python => self.python = toolchain,
            Language::Rust => self.rust = toolchain,
        }
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// List all configured languages
    pub fn list_languages(&self) -> Vec<String> {
        Language::ALL.iter().map(|lang| lang.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_config() -> serde_json::Value {
        serde_json::json!({
            "languages": [
                { "name": "C++", "version": "17", "toolchain": {
                    "source_file": "main.cpp",
                    "compile": ["g++", "-O2", "-o", "{bin}", "{src}"],
                    "run": ["{bin}"] } },
                { "name": "Java", "toolchain": {
                    "source_file": "Main.java",
                    "compile": ["javac", "-d", "{dir}", "{src}"],
                    "run": ["java", "-cp", "{dir}", "Main"] } },
                { "name": "Python", "toolchain": {
                    "source_file": "main.py",
                    "run": ["python3", "{src}"],
                    "input": "args" } },
                { "name": "rust", "toolchain": {
                    "source_file": "main.rs",
                    "compile": ["rustc", "-o", "{bin}", "{src}"],
                    "run": ["{bin}"] } }
            ]
        })
    }

    #[test]
    fn test_load_full_config() {
        let manager = LanguageConfigManager::from_json(&full_config().to_string()).unwrap();
        assert_eq!(manager.toolchain(Language::Python).input, InputChannel::Args);
        assert_eq!(manager.toolchain(Language::Cpp).input, InputChannel::Stdin);
        assert!(manager.toolchain(Language::Python).compile.is_none());
        assert_eq!(manager.list_languages().len(), Language::ALL.len());
    }

    #[test]
    fn test_missing_language_rejected() {
        let mut config = full_config();
        config["languages"].as_array_mut().unwrap().remove(1);
        let err = LanguageConfigManager::from_json(&config.to_string()).unwrap_err();
        assert!(format!("{:#}", err).contains("Java"));
    }

    #[test]
    fn test_duplicate_and_unknown_rejected() {
        let mut config = full_config();
        let first = config["languages"][0].clone();
        config["languages"].as_array_mut().unwrap().push(first);
        assert!(LanguageConfigManager::from_json(&config.to_string()).is_err());

        let mut config = full_config();
        config["languages"][0]["name"] = "COBOL".into();
        assert!(LanguageConfigManager::from_json(&config.to_string()).is_err());
    }

    #[test]
    fn test_empty_run_rejected() {
        let mut config = full_config();
        config["languages"][2]["toolchain"]["run"] = serde_json::json!([]);
        assert!(LanguageConfigManager::from_json(&config.to_string()).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_builtin() {
        let manager = LanguageConfigManager::load_or_builtin(Path::new("/nonexistent/languages.json")).unwrap();
        assert_eq!(manager.source(), "built-in");
        assert!(LanguageConfigManager::load(Path::new("/nonexistent/languages.json")).is_err());
    }

    #[test]
    fn test_bundled_config_is_complete() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/languages.json");
        let manager = LanguageConfigManager::load(&path).unwrap();
        for lang in Language::ALL {
            assert!(!manager.toolchain(lang).run.is_empty());
        }
    }

    #[test]
    fn test_expand_placeholders() {
        let template: Vec<String> = vec!["g++".into(), "-o".into(), "{bin}".into(), "{src}".into(), "-I{dir}".into()];
        let argv = Toolchain::expand(&template, Path::new("/w"), Path::new("/w/main.cpp"), Path::new("/w/main"));
        assert_eq!(argv, vec!["g++", "-o", "/w/main", "/w/main.cpp", "-I/w"]);
    }

    #[test]
    fn test_worker_config_from_env() {
        let config = WorkerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.health_addr.port(), 9090);
        assert_eq!(config.languages_config, PathBuf::from(DEFAULT_LANGUAGES_CONFIG));

        let env: HashMap<&str, &str> = [("WORKER_CONCURRENCY", "4"), ("WORKER_HEALTH_ADDR", "127.0.0.1:9191")]
            .into_iter()
            .collect();
        let config = WorkerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.health_addr.port(), 9191);

        assert!(WorkerConfig::from_lookup(|k| (k == "WORKER_CONCURRENCY").then(|| "0".to_string())).is_err());
    }
}
