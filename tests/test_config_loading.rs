//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading: what a file on disk
//! turns into, and which mistakes are refused before anything starts.

use agentdeploy::config::{ConfigError, ContentBackendKind, DeployConfig, QueueBackendKind};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

const REGISTRY: &str = r#"
[registry]
rpc_url = "http://127.0.0.1:8545"
contract_address = "0x5fbdb2315678afecb367f032d93f642f64180aa3"
from_address = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_file() {
    let temp_file = write_config(&format!(
        r#"
[content_store]
token_env = "PIN_TOKEN"
{REGISTRY}
[database]
path = "data/agents.db"
"#
    ));

    let config = DeployConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.content_store.backend, ContentBackendKind::Http);
    assert_eq!(config.content_store.token_env, "PIN_TOKEN");
    assert_eq!(config.registry.rpc_url, "http://127.0.0.1:8545");
    assert_eq!(config.queue.backend, QueueBackendKind::Sqlite);
    // the queue shares the agent database unless told otherwise
    assert_eq!(config.queue_path(), Path::new("data/agents.db"));
    assert_eq!(config.bind_addr().unwrap().port(), 4000);
}

#[test]
fn test_sample_config_is_valid() {
    let config = DeployConfig::load_from_file(Path::new("agentdeploy.toml")).unwrap();
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_file_is_read_error() {
    let err = DeployConfig::load_from_file(Path::new("does/not/exist.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::FileRead(_)));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let temp_file = write_config("[registry\nrpc_url = ");
    let err = DeployConfig::load_from_file(temp_file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::TomlParse(_)));
}

#[test]
fn test_missing_registry_section_is_refused() {
    let temp_file = write_config("[content_store]\nbackend = \"memory\"\n");
    let err = DeployConfig::load_from_file(temp_file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::TomlParse(_)));
}

#[test]
fn test_invalid_values_are_refused() {
    let cases = [
        ("[server]\nbind = \"not an address\"\n", "server.bind"),
        ("[content_store]\napi_url = \"ftp://example.com\"\n", "content_store.api_url"),
        ("[content_store]\nretry_attempts = 0\n", "retry_attempts"),
        ("[queue]\nmax_attempts = 0\n", "max_attempts"),
        ("[queue]\nworkers = 0\n", "workers"),
    ];

    for (section, field) in cases {
        let temp_file = write_config(&format!("{section}{REGISTRY}"));
        match DeployConfig::load_from_file(temp_file.path()) {
            Err(ConfigError::InvalidConfig(message)) => {
                assert!(message.contains(field), "{message} should mention {field}")
            }
            other => panic!("expected InvalidConfig for {field}, got {other:?}"),
        }
    }
}

#[test]
fn test_bad_event_topic_is_refused() {
    let temp_file = write_config(&format!("{REGISTRY}event_topic = \"0x1234\"\n"));
    let err = DeployConfig::load_from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("registry.event_topic"));
}

#[test]
fn test_missing_token_env_var() {
    let temp_file = write_config(&format!(
        "[content_store]\ntoken_env = \"AGENTDEPLOY_TEST_TOKEN_THAT_IS_NOT_SET\"\n{REGISTRY}"
    ));
    let config = DeployConfig::load_from_file(temp_file.path()).unwrap();

    let err = config.get_content_token().unwrap_err();
    assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "AGENTDEPLOY_TEST_TOKEN_THAT_IS_NOT_SET"));
}

#[test]
fn test_config_round_trips_through_toml() {
    let temp_file = write_config(REGISTRY);
    let config = DeployConfig::load_from_file(temp_file.path()).unwrap();

    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed = DeployConfig::from_toml_str(&rendered).unwrap();
    assert_eq!(reparsed, config);
}
